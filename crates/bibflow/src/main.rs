use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use bibflow::config::{load_config, validate_config};
use bibflow::{ImporterConfig, Pipeline};

#[derive(Parser, Debug)]
#[command(name = "bibflow", version, about = "Convert, modify and load MARC record batches")]
struct Cli {
    /// Configuration file (JSON, or YAML with a .yaml/.yml extension)
    #[arg(short, long, default_value = "bibflow.json")]
    config: PathBuf,

    /// Run the convert stage. Any stage flag replaces the configured stage selection.
    #[arg(long)]
    convert: bool,

    /// Run the modify stage
    #[arg(long)]
    modify: bool,

    /// Run the load stage
    #[arg(long)]
    load: bool,

    /// Enable production mode
    #[arg(long)]
    production: bool,

    /// Worker threads for convert and modify (0 = one per CPU)
    #[arg(long)]
    workers: Option<usize>,

    /// Log every file and record milestone
    #[arg(short, long)]
    verbose: bool,

    /// Print the run statistics as JSON on stdout
    #[arg(long)]
    json_summary: bool,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install tracing subscriber: {}", e);
    }
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to forward log records: {}", e);
    }
}

fn apply_overrides(config: &mut ImporterConfig, cli: &Cli) {
    if cli.convert || cli.modify || cli.load {
        config.need_convert = cli.convert;
        config.need_modify = cli.modify;
        config.need_load = cli.load;
    }
    if cli.production {
        config.production_mode = true;
    }
    if cli.verbose {
        config.log_detail = true;
    }
    match cli.workers {
        Some(0) => config.worker_count = num_cpus::get(),
        Some(n) => config.worker_count = n,
        None => {}
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    log::info!("Starting bibflow v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    apply_overrides(&mut config, &cli);
    if let Err(e) = validate_config(&config) {
        log::error!("{}", e);
        return ExitCode::FAILURE;
    }

    let statistics = Pipeline::from_config(config).run();

    if cli.json_summary {
        match serde_json::to_string_pretty(&statistics) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                log::error!("Failed to serialize statistics: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}
