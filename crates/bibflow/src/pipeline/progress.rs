use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Local;

use super::stage::Stage;
use super::stats::StageStatistics;

/// Events emitted by the stage runners and the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// No stage flag is set.
    UsageHint,
    StageStarted {
        stage: Stage,
        source: PathBuf,
        target: PathBuf,
        settings: Option<String>,
    },
    StageSkipped {
        stage: Stage,
        reason: String,
    },
    NoInputFiles {
        stage: Stage,
        directory: PathBuf,
    },
    FileStarted {
        stage: Stage,
        file: String,
    },
    RecordProgress {
        stage: Stage,
        file: String,
        records: u64,
        percent: Option<u8>,
    },
    FileFinished {
        stage: Stage,
        file: String,
        statistics: StageStatistics,
    },
    FileFailed {
        stage: Stage,
        file: String,
        message: String,
        /// Control number of the last record read (or imported) before the failure.
        last_record: Option<String>,
        invalid_file: bool,
    },
    Relocated {
        stage: Stage,
        file: String,
        /// `None` when the input was deleted or left in place.
        destination: Option<PathBuf>,
    },
    RelocationFailed {
        stage: Stage,
        file: String,
        message: String,
    },
    BadRecordSinkFailed {
        stage: Stage,
        file: String,
        message: String,
    },
    StageFinished {
        stage: Stage,
        statistics: StageStatistics,
        /// Statistics of the backend driven by a fused convert stage.
        load_statistics: Option<StageStatistics>,
    },
    Warning {
        stage: Option<Stage>,
        message: String,
    },
}

pub trait PipelineObserver: Send + Sync {
    fn report(&self, event: PipelineEvent);
}

/// Discards every event.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {
    fn report(&self, _event: PipelineEvent) {}
}

/// Collects events so they can be inspected or replayed later.
#[derive(Default)]
pub struct EventBuffer {
    events: Mutex<Vec<PipelineEvent>>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<PipelineEvent> {
        match self.events.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    /// Forwards the buffered events, in arrival order, to `observer`.
    pub fn replay(&self, observer: &dyn PipelineObserver) {
        for event in self.take() {
            observer.report(event);
        }
    }
}

impl PipelineObserver for EventBuffer {
    fn report(&self, event: PipelineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Forwards events to the `log` facade. Per-file lines and stage timestamps
/// are only written when detailed logging is on.
pub struct LogObserver {
    detail: bool,
}

const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

impl LogObserver {
    pub fn new(detail: bool) -> Self {
        Self { detail }
    }
}

impl PipelineObserver for LogObserver {
    fn report(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::UsageHint => log::warn!(
                "No stage selected. Enable at least one of need_convert, need_modify or need_load \
                 (or pass --convert, --modify, --load)."
            ),
            PipelineEvent::StageStarted {
                stage,
                source,
                target,
                settings,
            } => {
                log::info!(
                    "[{}] Start from {} to {}",
                    stage,
                    source.display(),
                    target.display()
                );
                if let Some(settings) = settings {
                    log::info!("[{}] {}", stage, settings);
                }
                if self.detail {
                    log::info!(
                        "[{}] {} started at {}",
                        stage,
                        stage.activity(),
                        Local::now().format(TIMESTAMP_FORMAT)
                    );
                }
            }
            PipelineEvent::StageSkipped { stage, reason } => {
                log::error!("[{}] Stage skipped: {}", stage, reason)
            }
            PipelineEvent::NoInputFiles { stage, directory } => log::warn!(
                "[{}] There's no .{} file in the source directory: {}",
                stage,
                stage.input_extension(),
                directory.display()
            ),
            PipelineEvent::FileStarted { stage, file } => {
                if self.detail {
                    log::info!("[{}] Processing {}", stage, file);
                }
            }
            PipelineEvent::RecordProgress {
                stage,
                file,
                records,
                percent,
            } => {
                if self.detail {
                    match percent {
                        Some(p) => log::info!("[{}] {}: {} records ({}%)", stage, file, records, p),
                        None => log::debug!("[{}] {}: {} records", stage, file, records),
                    }
                }
            }
            PipelineEvent::FileFinished {
                stage, statistics, file,
            } => {
                if self.detail {
                    log::info!("[{}] {}", stage, statistics.describe(&file));
                }
            }
            PipelineEvent::FileFailed {
                stage,
                file,
                message,
                last_record,
                invalid_file,
            } => {
                if invalid_file {
                    log::error!("[{}] {}", stage, message);
                } else {
                    match last_record {
                        Some(id) => log::error!(
                            "[{}] {} ({}). The last successfully read record's Control Number is {}. \
                             The error may be in the next record.",
                            stage,
                            message,
                            file,
                            id
                        ),
                        None => log::error!("[{}] {} ({})", stage, message, file),
                    }
                }
            }
            PipelineEvent::Relocated {
                stage,
                file,
                destination,
            } => {
                if self.detail {
                    match destination {
                        Some(dst) => log::info!("[{}] Moved {} to {}", stage, file, dst.display()),
                        None => log::info!("[{}] Removed {}", stage, file),
                    }
                }
            }
            PipelineEvent::RelocationFailed {
                stage,
                file,
                message,
            } => log::error!(
                "[{}] {} left in place for the next run: {}",
                stage,
                file,
                message
            ),
            PipelineEvent::BadRecordSinkFailed {
                stage,
                file,
                message,
            } => log::error!(
                "[{}] Error in writing bad records of {}: {}",
                stage,
                file,
                message
            ),
            PipelineEvent::StageFinished {
                stage,
                statistics,
                load_statistics,
            } => {
                if self.detail {
                    log::info!(
                        "[{}] {} completed at {}",
                        stage,
                        stage.activity(),
                        Local::now().format(TIMESTAMP_FORMAT)
                    );
                }
                log::info!(
                    "[{}] {} statistics summary: {}",
                    stage,
                    stage.activity(),
                    statistics
                );
                if let Some(load) = load_statistics {
                    log::info!("[{}] Load statistics summary: {}", stage, load);
                }
            }
            PipelineEvent::Warning { stage, message } => match stage {
                Some(stage) => log::warn!("[{}] {}", stage, message),
                None => log::warn!("{}", message),
            },
        }
    }
}
