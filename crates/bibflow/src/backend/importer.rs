//! Load-side facade pairing a backend session with the bad-record sink of
//! the file being imported.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{ImportOutcome, StorageBackend};
use crate::codec::{Record, XmlOptions};
use crate::error::{BackendError, StorageError};
use crate::storage::BadRecordSink;

pub struct RecordImporter {
    backend: Box<dyn StorageBackend>,
    bad_records_dir: PathBuf,
    xml_options: XmlOptions,
    current_file: Option<String>,
    sink: Option<BadRecordSink>,
    last_record: Option<String>,
}

impl RecordImporter {
    pub fn new(backend: Box<dyn StorageBackend>, bad_records_dir: &Path, xml_options: XmlOptions) -> Self {
        Self {
            backend,
            bad_records_dir: bad_records_dir.to_path_buf(),
            xml_options,
            current_file: None,
            sink: None,
            last_record: None,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Starts a new input file. Any sink left open by the previous file is
    /// closed first.
    pub fn begin_file(&mut self, file_name: &str) {
        if let Err(e) = self.end_file() {
            log::error!("{}", e);
        }
        self.backend.set_current_file(file_name);
        self.current_file = Some(file_name.to_string());
        self.last_record = None;
    }

    pub fn import_record(
        &mut self,
        record: &Record,
        is_deletion_feed: bool,
    ) -> Result<ImportOutcome, BackendError> {
        self.last_record = record.control_number().map(str::to_string);
        self.backend.import_record(record, is_deletion_feed)
    }

    /// Appends the record to `error_records_in_<file>` in the bad-record
    /// directory.
    pub fn write_bad_record(&mut self, record: &Record) -> Result<(), StorageError> {
        if self.sink.is_none() {
            let file_name = self.current_file.as_deref().unwrap_or("unknown.xml");
            self.sink = Some(BadRecordSink::new(
                &self.bad_records_dir,
                file_name,
                self.xml_options,
            ));
        }
        match self.sink.as_mut() {
            Some(sink) => sink.write(record),
            None => Ok(()),
        }
    }

    /// Closes the current file's sink. Returns its path if anything was written.
    pub fn end_file(&mut self) -> Result<Option<PathBuf>, StorageError> {
        match self.sink.take() {
            Some(sink) => sink.finish(),
            None => Ok(None),
        }
    }

    /// Control number of the record most recently handed to the backend.
    pub fn last_record(&self) -> Option<&str> {
        self.last_record.as_deref()
    }

    pub fn commit(&mut self) -> Result<(), BackendError> {
        self.backend.commit()
    }

    pub fn optimize(&mut self) -> Result<(), BackendError> {
        self.backend.optimize()
    }

    pub fn check_time(&self) -> Duration {
        self.backend.check_time()
    }

    pub fn insert_time(&self) -> Duration {
        self.backend.insert_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use tempfile::TempDir;

    const LEADER: &str = "00000nam a2200000 a 4500";

    #[test]
    fn test_bad_records_go_to_per_file_sink() {
        let dir = TempDir::new().unwrap();
        let handle = MemoryBackend::new();
        let mut importer =
            RecordImporter::new(Box::new(handle.clone()), dir.path(), XmlOptions::default());

        importer.begin_file("first.xml");
        let invalid = Record::new(LEADER);
        assert_eq!(
            importer.import_record(&invalid, false).unwrap(),
            ImportOutcome::Invalid
        );
        importer.write_bad_record(&invalid).unwrap();

        importer.begin_file("second.xml");
        let sink = importer.end_file().unwrap();
        assert!(sink.is_none());

        assert!(dir.path().join("error_records_in_first.xml").exists());
        assert!(!dir.path().join("error_records_in_second.xml").exists());
        assert_eq!(handle.files(), vec!["first.xml", "second.xml"]);
    }

    #[test]
    fn test_last_record_tracks_control_number() {
        let dir = TempDir::new().unwrap();
        let mut importer =
            RecordImporter::new(Box::new(MemoryBackend::new()), dir.path(), XmlOptions::default());
        importer.begin_file("a.xml");
        importer
            .import_record(&Record::new(LEADER).with_control_field("001", "abc"), false)
            .unwrap();
        assert_eq!(importer.last_record(), Some("abc"));
    }
}
