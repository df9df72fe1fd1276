//! Relational record store backed by SQLite.
//!
//! Records are keyed by control number. Imports between two commits run in
//! one transaction, so a commit is the unit of durability.

mod migrations;

use std::path::Path;
use std::time::{Duration, Instant};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::{is_deletion, storable_id, ImportOutcome, StorageBackend};
use crate::codec::{to_marcxml, Record};
use crate::error::BackendError;

pub struct RelationalBackend {
    conn: Connection,
    in_transaction: bool,
    current_file: Option<String>,
    check_time: Duration,
    insert_time: Duration,
}

impl RelationalBackend {
    /// Opens (or creates) the database at the given path and runs all
    /// pending migrations.
    pub fn open(path: &Path) -> Result<Self, BackendError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BackendError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        migrations::run_all(&conn)?;

        log::info!("Record database opened at {}", path.display());
        Ok(Self::with_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, BackendError> {
        let conn = Connection::open_in_memory()?;
        migrations::run_all(&conn)?;
        Ok(Self::with_connection(conn))
    }

    fn with_connection(conn: Connection) -> Self {
        Self {
            conn,
            in_transaction: false,
            current_file: None,
            check_time: Duration::ZERO,
            insert_time: Duration::ZERO,
        }
    }

    fn begin(&mut self) -> Result<(), BackendError> {
        if !self.in_transaction {
            self.conn.execute_batch("BEGIN")?;
            self.in_transaction = true;
        }
        Ok(())
    }

    /// Number of stored records, including deleted ones.
    pub fn record_count(&self) -> Result<u64, BackendError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |r| r.get(0))?)
    }

    /// Deletion flag of a stored record, `None` when absent.
    pub fn is_deleted(&self, control_number: &str) -> Result<Option<bool>, BackendError> {
        Ok(self
            .conn
            .query_row(
                "SELECT deleted FROM records WHERE control_number = ?1",
                params![control_number],
                |r| r.get::<_, bool>(0),
            )
            .optional()?)
    }
}

impl StorageBackend for RelationalBackend {
    fn name(&self) -> &'static str {
        "relational"
    }

    fn set_current_file(&mut self, file_name: &str) {
        self.current_file = Some(file_name.to_string());
    }

    fn import_record(
        &mut self,
        record: &Record,
        is_deletion_feed: bool,
    ) -> Result<ImportOutcome, BackendError> {
        let Some(id) = storable_id(record) else {
            return Ok(ImportOutcome::Invalid);
        };
        self.begin()?;

        let started = Instant::now();
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM records WHERE control_number = ?1)",
            params![id],
            |r| r.get(0),
        )?;
        self.check_time = started.elapsed();

        let outcome = if is_deletion(record, is_deletion_feed) {
            ImportOutcome::Deleted
        } else if exists {
            ImportOutcome::Updated
        } else {
            ImportOutcome::New
        };

        let started = Instant::now();
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO records (control_number, leader, xml, deleted, source_file, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(control_number) DO UPDATE SET
                leader = excluded.leader,
                xml = excluded.xml,
                deleted = excluded.deleted,
                source_file = excluded.source_file,
                updated_at = excluded.updated_at",
            params![
                id,
                record.leader,
                to_marcxml(record, false),
                outcome == ImportOutcome::Deleted,
                self.current_file,
                now,
            ],
        )?;
        self.conn.execute(
            "INSERT INTO load_log (control_number, outcome, source_file, loaded_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, outcome.to_string(), self.current_file, now],
        )?;
        self.insert_time = started.elapsed();

        Ok(outcome)
    }

    fn commit(&mut self) -> Result<(), BackendError> {
        if self.in_transaction {
            self.conn.execute_batch("COMMIT")?;
            self.in_transaction = false;
        }
        Ok(())
    }

    fn optimize(&mut self) -> Result<(), BackendError> {
        self.commit()?;
        self.conn.execute_batch("PRAGMA optimize; VACUUM;")?;
        log::debug!("Record database optimized");
        Ok(())
    }

    fn check_time(&self) -> Duration {
        self.check_time
    }

    fn insert_time(&self) -> Duration {
        self.insert_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEADER: &str = "00000nam a2200000 a 4500";

    fn record(id: &str) -> Record {
        Record::new(LEADER).with_control_field("001", id)
    }

    #[test]
    fn test_new_then_updated() {
        let mut backend = RelationalBackend::open_in_memory().unwrap();
        assert_eq!(
            backend.import_record(&record("1"), false).unwrap(),
            ImportOutcome::New
        );
        assert_eq!(
            backend.import_record(&record("1"), false).unwrap(),
            ImportOutcome::Updated
        );
        backend.commit().unwrap();
        assert_eq!(backend.record_count().unwrap(), 1);
    }

    #[test]
    fn test_deletion_feed_marks_deleted() {
        let mut backend = RelationalBackend::open_in_memory().unwrap();
        backend.import_record(&record("7"), false).unwrap();
        assert_eq!(
            backend.import_record(&record("7"), true).unwrap(),
            ImportOutcome::Deleted
        );
        backend.commit().unwrap();
        assert_eq!(backend.is_deleted("7").unwrap(), Some(true));
        assert_eq!(backend.is_deleted("8").unwrap(), None);
    }

    #[test]
    fn test_leader_status_d_is_deletion() {
        let mut backend = RelationalBackend::open_in_memory().unwrap();
        let mut deleted = record("9");
        deleted.set_status('d');
        assert_eq!(
            backend.import_record(&deleted, false).unwrap(),
            ImportOutcome::Deleted
        );
    }

    #[test]
    fn test_record_without_control_number_is_invalid() {
        let mut backend = RelationalBackend::open_in_memory().unwrap();
        assert_eq!(
            backend.import_record(&Record::new(LEADER), false).unwrap(),
            ImportOutcome::Invalid
        );
        backend.commit().unwrap();
        assert_eq!(backend.record_count().unwrap(), 0);
    }

    #[test]
    fn test_commit_persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");
        {
            let mut backend = RelationalBackend::open(&path).unwrap();
            backend.set_current_file("batch.xml");
            backend.import_record(&record("1"), false).unwrap();
            backend.import_record(&record("2"), false).unwrap();
            backend.commit().unwrap();
            backend.optimize().unwrap();
        }
        let backend = RelationalBackend::open(&path).unwrap();
        assert_eq!(backend.record_count().unwrap(), 2);
    }

    #[test]
    fn test_uncommitted_work_is_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");
        {
            let mut backend = RelationalBackend::open(&path).unwrap();
            backend.import_record(&record("1"), false).unwrap();
        }
        let backend = RelationalBackend::open(&path).unwrap();
        assert_eq!(backend.record_count().unwrap(), 0);
    }
}
