use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImporterError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Unsupported MARC encoding '{0}'")]
    UnsupportedEncoding(String),

    #[error("The {stage} stage requires the '{role}' directory, but it is not set")]
    MissingDirectory { stage: String, role: &'static str },
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("{message} (record #{record_index}, last successfully read control number: {})", .last_good_id.as_deref().unwrap_or("none"))]
    Parse {
        message: String,
        last_good_id: Option<String>,
        record_index: usize,
    },

    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CodecError {
    /// Control number of the last record read before the failure, if any.
    pub fn last_good_id(&self) -> Option<&str> {
        match self {
            CodecError::Parse { last_good_id, .. } => last_good_id.as_deref(),
            CodecError::Io { .. } => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to list directory '{path}': {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete '{path}': {source}")]
    DeleteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Can't delete the temporary directory '{path}', because there exist {count} files in it")]
    ResidualFiles { path: PathBuf, count: usize },
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to (de)serialize index data: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend lock poisoned")]
    LockPoisoned,

    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Worker {0} panicked")]
    Panicked(usize),
}

pub type Result<T> = std::result::Result<T, ImporterError>;
