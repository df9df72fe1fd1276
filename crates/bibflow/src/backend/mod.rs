//! Storage backends driven by the load stage.
//!
//! A backend receives one record at a time, classifies it as new, updated,
//! deleted or invalid, and flushes buffered work on `commit`. The concrete
//! variant is chosen at startup from [`StorageKind`].

pub mod composite;
pub mod importer;
pub mod memory;
pub mod relational;
pub mod search_index;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::Record;
use crate::error::BackendError;

pub use composite::CompositeBackend;
pub use importer::RecordImporter;
pub use memory::MemoryBackend;
pub use relational::RelationalBackend;
pub use search_index::SearchIndexBackend;

/// Classification of a record after an import attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportOutcome {
    New,
    Updated,
    Deleted,
    Invalid,
}

impl ImportOutcome {
    pub const ALL: [ImportOutcome; 4] = [
        ImportOutcome::New,
        ImportOutcome::Updated,
        ImportOutcome::Deleted,
        ImportOutcome::Invalid,
    ];
}

impl fmt::Display for ImportOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImportOutcome::New => "created",
            ImportOutcome::Updated => "updated",
            ImportOutcome::Deleted => "deleted",
            ImportOutcome::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    #[default]
    Relational,
    SearchIndex,
    Composite,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageKind::Relational => "relational",
            StorageKind::SearchIndex => "search_index",
            StorageKind::Composite => "composite",
        };
        f.write_str(name)
    }
}

pub trait StorageBackend: Send {
    fn name(&self) -> &'static str;

    /// Name of the input file the following records come from.
    fn set_current_file(&mut self, _file_name: &str) {}

    /// Classifies and stages one record. Validation failures map to
    /// [`ImportOutcome::Invalid`]; only infrastructure failures are errors.
    fn import_record(
        &mut self,
        record: &Record,
        is_deletion_feed: bool,
    ) -> Result<ImportOutcome, BackendError>;

    /// Flushes everything imported since the previous commit.
    fn commit(&mut self) -> Result<(), BackendError>;

    /// Post-run maintenance. Called once at the end of a stage.
    fn optimize(&mut self) -> Result<(), BackendError>;

    /// Duration of the existence check of the last import.
    fn check_time(&self) -> Duration;

    /// Duration of the write of the last import.
    fn insert_time(&self) -> Duration;
}

/// Opens a fresh backend session for a stage.
pub trait BackendFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn StorageBackend>, BackendError>;
}

/// Returns the control number when the record may be stored at all.
pub(crate) fn storable_id(record: &Record) -> Option<&str> {
    if !record.has_valid_leader() {
        return None;
    }
    record.control_number().map(str::trim).filter(|id| !id.is_empty())
}

pub(crate) fn is_deletion(record: &Record, is_deletion_feed: bool) -> bool {
    is_deletion_feed || record.is_deleted()
}

/// Builds backends from the configured [`StorageKind`] and locations.
#[derive(Debug, Clone)]
pub struct ConfiguredBackends {
    pub kind: StorageKind,
    pub database_path: Option<PathBuf>,
    pub search_index_path: Option<PathBuf>,
}

impl ConfiguredBackends {
    /// Whether every location the storage kind needs is configured.
    pub fn is_located(&self) -> bool {
        match self.kind {
            StorageKind::Relational => self.database_path.is_some(),
            StorageKind::SearchIndex => self.search_index_path.is_some(),
            StorageKind::Composite => {
                self.database_path.is_some() && self.search_index_path.is_some()
            }
        }
    }

    fn relational(&self) -> Result<Box<dyn StorageBackend>, BackendError> {
        let path = self.database_path.as_ref().ok_or_else(|| {
            BackendError::Unavailable("database_path is not configured".to_string())
        })?;
        Ok(Box::new(RelationalBackend::open(path)?))
    }

    fn search_index(&self) -> Result<Box<dyn StorageBackend>, BackendError> {
        let path = self.search_index_path.as_ref().ok_or_else(|| {
            BackendError::Unavailable("search_index_path is not configured".to_string())
        })?;
        Ok(Box::new(SearchIndexBackend::open(path)?))
    }
}

impl BackendFactory for ConfiguredBackends {
    fn open(&self) -> Result<Box<dyn StorageBackend>, BackendError> {
        match self.kind {
            StorageKind::Relational => self.relational(),
            StorageKind::SearchIndex => self.search_index(),
            StorageKind::Composite => Ok(Box::new(CompositeBackend::new(vec![
                self.relational()?,
                self.search_index()?,
            ]))),
        }
    }
}
