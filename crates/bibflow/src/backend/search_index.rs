//! File-based search index.
//!
//! The index directory holds a JSON snapshot (`index.json`) plus one
//! JSON-lines segment per commit. Opening replays the segments on top of the
//! snapshot; `optimize` folds everything back into a single snapshot.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{is_deletion, storable_id, ImportOutcome, StorageBackend};
use crate::codec::{to_marcxml, Record};
use crate::error::BackendError;

const SNAPSHOT_FILE: &str = "index.json";
const SEGMENT_PREFIX: &str = "segment-";
const SEGMENT_SUFFIX: &str = ".jsonl";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub id: String,
    pub xml: String,
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    pub indexed_at: String,
}

pub struct SearchIndexBackend {
    dir: PathBuf,
    documents: BTreeMap<String, IndexedDocument>,
    pending: Vec<IndexedDocument>,
    next_segment: u64,
    current_file: Option<String>,
    check_time: Duration,
    insert_time: Duration,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> BackendError + '_ {
    move |source| BackendError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn segment_number(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    name.strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?
        .parse()
        .ok()
}

/// Writes through a temporary file so readers never see a torn file.
fn write_atomically(
    path: &Path,
    write: impl FnOnce(&mut BufWriter<File>) -> Result<(), BackendError>,
) -> Result<(), BackendError> {
    let tmp = path.with_extension("tmp");
    let file = File::create(&tmp).map_err(io_error(&tmp))?;
    let mut writer = BufWriter::new(file);
    write(&mut writer)?;
    writer.flush().map_err(io_error(&tmp))?;
    drop(writer);
    fs::rename(&tmp, path).map_err(io_error(path))
}

impl SearchIndexBackend {
    pub fn open(dir: &Path) -> Result<Self, BackendError> {
        fs::create_dir_all(dir).map_err(io_error(dir))?;

        let mut documents = BTreeMap::new();
        let snapshot = dir.join(SNAPSHOT_FILE);
        if snapshot.exists() {
            let file = File::open(&snapshot).map_err(io_error(&snapshot))?;
            let stored: Vec<IndexedDocument> = serde_json::from_reader(BufReader::new(file))?;
            documents.extend(stored.into_iter().map(|d| (d.id.clone(), d)));
        }

        let segments = Self::segments(dir)?;
        for (_, path) in &segments {
            let file = File::open(path).map_err(io_error(path))?;
            for line in BufReader::new(file).lines() {
                let line = line.map_err(io_error(path))?;
                if line.trim().is_empty() {
                    continue;
                }
                let doc: IndexedDocument = serde_json::from_str(&line)?;
                documents.insert(doc.id.clone(), doc);
            }
        }
        let next_segment = segments.last().map(|(n, _)| n + 1).unwrap_or(1);

        log::info!(
            "Search index opened at {} ({} documents, {} segments)",
            dir.display(),
            documents.len(),
            segments.len()
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            documents,
            pending: Vec::new(),
            next_segment,
            current_file: None,
            check_time: Duration::ZERO,
            insert_time: Duration::ZERO,
        })
    }

    fn segments(dir: &Path) -> Result<Vec<(u64, PathBuf)>, BackendError> {
        let mut segments = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_error(dir))? {
            let path = entry.map_err(io_error(dir))?.path();
            if let Some(n) = segment_number(&path) {
                segments.push((n, path));
            }
        }
        segments.sort_by_key(|(n, _)| *n);
        Ok(segments)
    }

    pub fn document(&self, id: &str) -> Option<&IndexedDocument> {
        self.documents.get(id)
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn segment_count(&self) -> Result<usize, BackendError> {
        Ok(Self::segments(&self.dir)?.len())
    }
}

impl StorageBackend for SearchIndexBackend {
    fn name(&self) -> &'static str {
        "search_index"
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

        let started = Instant::now();
        let exists = self.documents.contains_key(id);
        self.check_time = started.elapsed();

        let started = Instant::now();
        let deleted = is_deletion(record, is_deletion_feed);
        let doc = IndexedDocument {
            id: id.to_string(),
            xml: to_marcxml(record, false),
            deleted,
            source_file: self.current_file.clone(),
            indexed_at: Utc::now().to_rfc3339(),
        };
        self.pending.push(doc.clone());
        self.documents.insert(doc.id.clone(), doc);
        self.insert_time = started.elapsed();

        Ok(if deleted {
            ImportOutcome::Deleted
        } else if exists {
            ImportOutcome::Updated
        } else {
            ImportOutcome::New
        })
    }

    fn commit(&mut self) -> Result<(), BackendError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let path = self.dir.join(format!(
            "{}{:08}{}",
            SEGMENT_PREFIX, self.next_segment, SEGMENT_SUFFIX
        ));
        let pending = std::mem::take(&mut self.pending);
        write_atomically(&path, |writer| {
            for doc in &pending {
                serde_json::to_writer(&mut *writer, doc)?;
                writer.write_all(b"\n").map_err(io_error(&path))?;
            }
            Ok(())
        })?;
        log::debug!(
            "Committed {} documents to segment {}",
            pending.len(),
            self.next_segment
        );
        self.next_segment += 1;
        Ok(())
    }

    fn optimize(&mut self) -> Result<(), BackendError> {
        self.commit()?;
        let snapshot = self.dir.join(SNAPSHOT_FILE);
        write_atomically(&snapshot, |writer| {
            let docs: Vec<&IndexedDocument> = self.documents.values().collect();
            serde_json::to_writer(writer, &docs)?;
            Ok(())
        })?;
        for (_, path) in Self::segments(&self.dir)? {
            fs::remove_file(&path).map_err(io_error(&path))?;
        }
        self.next_segment = 1;
        log::debug!(
            "Search index merged into snapshot ({} documents)",
            self.documents.len()
        );
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
    use tempfile::TempDir;

    const LEADER: &str = "00000nam a2200000 a 4500";

    fn record(id: &str) -> Record {
        Record::new(LEADER).with_control_field("001", id)
    }

    #[test]
    fn test_commit_writes_segment_and_reopen_replays_it() {
        let dir = TempDir::new().unwrap();
        {
            let mut index = SearchIndexBackend::open(dir.path()).unwrap();
            assert_eq!(
                index.import_record(&record("a"), false).unwrap(),
                ImportOutcome::New
            );
            index.commit().unwrap();
            assert_eq!(index.segment_count().unwrap(), 1);
        }
        let mut index = SearchIndexBackend::open(dir.path()).unwrap();
        assert_eq!(index.document_count(), 1);
        assert_eq!(
            index.import_record(&record("a"), false).unwrap(),
            ImportOutcome::Updated
        );
    }

    #[test]
    fn test_uncommitted_documents_are_lost() {
        let dir = TempDir::new().unwrap();
        {
            let mut index = SearchIndexBackend::open(dir.path()).unwrap();
            index.import_record(&record("a"), false).unwrap();
        }
        let index = SearchIndexBackend::open(dir.path()).unwrap();
        assert_eq!(index.document_count(), 0);
    }

    #[test]
    fn test_optimize_merges_segments_into_snapshot() {
        let dir = TempDir::new().unwrap();
        let mut index = SearchIndexBackend::open(dir.path()).unwrap();
        index.import_record(&record("a"), false).unwrap();
        index.commit().unwrap();
        index.import_record(&record("b"), true).unwrap();
        index.commit().unwrap();
        assert_eq!(index.segment_count().unwrap(), 2);

        index.optimize().unwrap();
        assert_eq!(index.segment_count().unwrap(), 0);
        assert!(dir.path().join(SNAPSHOT_FILE).exists());

        let reopened = SearchIndexBackend::open(dir.path()).unwrap();
        assert_eq!(reopened.document_count(), 2);
        assert!(reopened.document("b").unwrap().deleted);
    }

    #[test]
    fn test_invalid_record_is_not_indexed() {
        let dir = TempDir::new().unwrap();
        let mut index = SearchIndexBackend::open(dir.path()).unwrap();
        assert_eq!(
            index.import_record(&Record::new(LEADER), false).unwrap(),
            ImportOutcome::Invalid
        );
        index.commit().unwrap();
        assert_eq!(index.segment_count().unwrap(), 0);
    }
}
