//! In-memory backend used by tests and dry runs.
//!
//! Clones share state, so a test can hand one clone to the pipeline and
//! inspect the other afterwards.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{is_deletion, storable_id, BackendFactory, ImportOutcome, StorageBackend};
use crate::codec::Record;
use crate::error::BackendError;

#[derive(Debug, Default)]
struct MemoryState {
    committed: BTreeMap<String, bool>,
    pending: BTreeMap<String, bool>,
    files: Vec<String>,
    imports: usize,
    commits: usize,
    optimizations: usize,
}

#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    rejected: Arc<HashSet<String>>,
    failing: Option<String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports the given control numbers as invalid.
    pub fn rejecting<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rejected = Arc::new(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Fails with a backend error when this control number is imported.
    pub fn failing_on(mut self, id: &str) -> Self {
        self.failing = Some(id.to_string());
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, BackendError> {
        self.state.lock().map_err(|_| BackendError::LockPoisoned)
    }

    fn read<T>(&self, f: impl FnOnce(&MemoryState) -> T) -> T {
        match self.state.lock() {
            Ok(state) => f(&*state),
            Err(poisoned) => f(&*poisoned.into_inner()),
        }
    }

    /// Whether a committed record with this control number exists.
    pub fn contains(&self, id: &str) -> bool {
        self.read(|s| s.committed.contains_key(id))
    }

    pub fn is_deleted(&self, id: &str) -> Option<bool> {
        self.read(|s| s.committed.get(id).copied())
    }

    pub fn committed_ids(&self) -> Vec<String> {
        self.read(|s| s.committed.keys().cloned().collect())
    }

    pub fn pending_count(&self) -> usize {
        self.read(|s| s.pending.len())
    }

    pub fn import_count(&self) -> usize {
        self.read(|s| s.imports)
    }

    pub fn commit_count(&self) -> usize {
        self.read(|s| s.commits)
    }

    pub fn optimize_count(&self) -> usize {
        self.read(|s| s.optimizations)
    }

    /// Input file names announced through `set_current_file`, in order.
    pub fn files(&self) -> Vec<String> {
        self.read(|s| s.files.clone())
    }
}

impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn set_current_file(&mut self, file_name: &str) {
        if let Ok(mut state) = self.lock() {
            state.files.push(file_name.to_string());
        }
    }

    fn import_record(
        &mut self,
        record: &Record,
        is_deletion_feed: bool,
    ) -> Result<ImportOutcome, BackendError> {
        let mut state = self.lock()?;
        state.imports += 1;

        let Some(id) = storable_id(record) else {
            return Ok(ImportOutcome::Invalid);
        };
        if self.failing.as_deref() == Some(id) {
            return Err(BackendError::Unavailable(format!(
                "memory backend refused record {}",
                id
            )));
        }
        if self.rejected.contains(id) {
            return Ok(ImportOutcome::Invalid);
        }

        let exists = state.committed.contains_key(id) || state.pending.contains_key(id);
        let deleted = is_deletion(record, is_deletion_feed);
        state.pending.insert(id.to_string(), deleted);

        Ok(if deleted {
            ImportOutcome::Deleted
        } else if exists {
            ImportOutcome::Updated
        } else {
            ImportOutcome::New
        })
    }

    fn commit(&mut self) -> Result<(), BackendError> {
        let mut state = self.lock()?;
        let pending = std::mem::take(&mut state.pending);
        state.committed.extend(pending);
        state.commits += 1;
        Ok(())
    }

    fn optimize(&mut self) -> Result<(), BackendError> {
        self.lock()?.optimizations += 1;
        Ok(())
    }

    fn check_time(&self) -> Duration {
        Duration::ZERO
    }

    fn insert_time(&self) -> Duration {
        Duration::ZERO
    }
}

impl BackendFactory for MemoryBackend {
    fn open(&self) -> Result<Box<dyn StorageBackend>, BackendError> {
        Ok(Box::new(self.clone()))
    }
}
