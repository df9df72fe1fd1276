//! Per-input-file collection of records that could not be stored.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::codec::{MarcXmlWriter, Record, XmlOptions};
use crate::error::StorageError;

/// Sink file name for an input file: `name.xml` gives `error_records_in_name.xml`.
pub fn sink_file_name(input_file_name: &str) -> String {
    format!("error_records_in_{}", input_file_name)
}

/// MARCXML collection of invalid records, created on first write.
pub struct BadRecordSink {
    path: PathBuf,
    options: XmlOptions,
    writer: Option<MarcXmlWriter<BufWriter<File>>>,
    written: usize,
}

impl BadRecordSink {
    pub fn new(dir: &Path, input_file_name: &str, options: XmlOptions) -> Self {
        Self {
            path: dir.join(sink_file_name(input_file_name)),
            options,
            writer: None,
            written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn write(&mut self, record: &Record) -> Result<(), StorageError> {
        let write_error = |source| StorageError::WriteFile {
            path: self.path.clone(),
            source,
        };
        if self.writer.is_none() {
            let file = File::create(&self.path).map_err(write_error)?;
            let writer = MarcXmlWriter::new(BufWriter::new(file), self.options)
                .map_err(write_error)?;
            self.writer = Some(writer);
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.write_record(record).map_err(write_error)?;
        }
        self.written += 1;
        Ok(())
    }

    /// Closes the collection. Returns the sink path when anything was written.
    pub fn finish(mut self) -> Result<Option<PathBuf>, StorageError> {
        match self.writer.take() {
            Some(writer) => {
                writer.finish().map_err(|source| StorageError::WriteFile {
                    path: self.path.clone(),
                    source,
                })?;
                Ok(Some(self.path.clone()))
            }
            None => Ok(None),
        }
    }
}

impl Drop for BadRecordSink {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finish() {
                log::error!(
                    "Error in closing bad records file {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MarcXmlReader;
    use tempfile::TempDir;

    const LEADER: &str = "00000nam a2200000 a 4500";

    #[test]
    fn test_sink_is_not_created_until_first_write() {
        let dir = TempDir::new().unwrap();
        let sink = BadRecordSink::new(dir.path(), "batch.xml", XmlOptions::default());
        assert_eq!(sink.finish().unwrap(), None);
        assert!(!dir.path().join("error_records_in_batch.xml").exists());
    }

    #[test]
    fn test_sink_collects_written_records() {
        let dir = TempDir::new().unwrap();
        let mut sink = BadRecordSink::new(dir.path(), "batch.xml", XmlOptions::default());
        sink.write(&Record::new(LEADER).with_control_field("001", "7"))
            .unwrap();
        assert_eq!(sink.written(), 1);

        let path = sink.finish().unwrap().unwrap();
        assert_eq!(path, dir.path().join("error_records_in_batch.xml"));

        let records: Vec<Record> = MarcXmlReader::open(&path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].control_number(), Some("7"));
    }

    #[test]
    fn test_dropped_sink_is_still_closed() {
        let dir = TempDir::new().unwrap();
        {
            let mut sink = BadRecordSink::new(dir.path(), "a.xml", XmlOptions::default());
            sink.write(&Record::new(LEADER).with_control_field("001", "1"))
                .unwrap();
        }
        let content = std::fs::read_to_string(dir.path().join("error_records_in_a.xml")).unwrap();
        assert!(content.trim_end().ends_with("</collection>"));
    }

    #[test]
    fn test_write_into_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let mut sink = BadRecordSink::new(&dir.path().join("nope"), "a.xml", XmlOptions::default());
        assert!(sink.write(&Record::new(LEADER)).is_err());
    }
}
