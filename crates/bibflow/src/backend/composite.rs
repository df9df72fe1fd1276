//! Fans every operation out to several backends.

use std::time::Duration;

use super::{ImportOutcome, StorageBackend};
use crate::codec::Record;
use crate::error::BackendError;

/// A record is invalid only when every constituent rejects it; otherwise the
/// first non-invalid outcome, in constituent order, is reported.
pub struct CompositeBackend {
    backends: Vec<Box<dyn StorageBackend>>,
}

impl CompositeBackend {
    pub fn new(backends: Vec<Box<dyn StorageBackend>>) -> Self {
        Self { backends }
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl StorageBackend for CompositeBackend {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn set_current_file(&mut self, file_name: &str) {
        for backend in &mut self.backends {
            backend.set_current_file(file_name);
        }
    }

    fn import_record(
        &mut self,
        record: &Record,
        is_deletion_feed: bool,
    ) -> Result<ImportOutcome, BackendError> {
        let mut combined: Option<ImportOutcome> = None;
        for backend in &mut self.backends {
            let outcome = backend.import_record(record, is_deletion_feed)?;
            if outcome != ImportOutcome::Invalid && combined.is_none() {
                combined = Some(outcome);
            }
        }
        Ok(combined.unwrap_or(ImportOutcome::Invalid))
    }

    fn commit(&mut self) -> Result<(), BackendError> {
        for backend in &mut self.backends {
            backend.commit()?;
        }
        Ok(())
    }

    fn optimize(&mut self) -> Result<(), BackendError> {
        for backend in &mut self.backends {
            backend.optimize()?;
        }
        Ok(())
    }

    fn check_time(&self) -> Duration {
        self.backends.iter().map(|b| b.check_time()).sum()
    }

    fn insert_time(&self) -> Duration {
        self.backends.iter().map(|b| b.insert_time()).sum()
    }
}
