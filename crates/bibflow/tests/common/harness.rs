//! Test harness for isolated pipeline runs.
//!
//! Every harness owns an `assert_fs` temp directory holding the source,
//! destination and error directories of one installation.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use assert_fs::prelude::*;
use assert_fs::fixture::ChildPath;
use assert_fs::TempDir;

use bibflow::backend::MemoryBackend;
use bibflow::codec::{encode_record, MarcXmlReader, MarcXmlWriter, Record, XmlOptions};
use bibflow::pipeline::EventBuffer;
use bibflow::{ImporterConfig, Pipeline, PipelineEvent, PipelineStatistics};

use super::builders::ConfigBuilder;

/// Outcome of one pipeline run.
pub struct RunResult {
    pub statistics: PipelineStatistics,
    pub events: Vec<PipelineEvent>,
}

impl RunResult {
    pub fn failures(&self) -> Vec<&PipelineEvent> {
        self.events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::FileFailed { .. }))
            .collect()
    }
}

pub struct TestHarness {
    temp_dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        Self { temp_dir }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// A config builder whose directories live in this harness.
    pub fn config(&self) -> ConfigBuilder {
        ConfigBuilder::new(self.root())
    }

    pub fn dir(&self, name: &str) -> PathBuf {
        self.temp_dir.child(name).path().to_path_buf()
    }

    fn file_in(&self, dir: &str, file_name: &str) -> ChildPath {
        let parent = self.temp_dir.child(dir);
        parent.create_dir_all().expect("Failed to create directory");
        parent.child(file_name)
    }

    /// Writes `records` as one binary MARC file into `marc/`.
    pub fn write_marc(&self, file_name: &str, records: &[Record]) -> PathBuf {
        let bytes: Vec<u8> = records.iter().flat_map(encode_record).collect();
        self.write_marc_bytes(file_name, &bytes)
    }

    pub fn write_marc_bytes(&self, file_name: &str, bytes: &[u8]) -> PathBuf {
        let child = self.file_in("marc", file_name);
        child.write_binary(bytes).expect("Failed to write MARC input");
        child.path().to_path_buf()
    }

    /// Writes `records` as one MARCXML collection into `dir`.
    pub fn write_xml(&self, dir: &str, file_name: &str, records: &[Record]) -> PathBuf {
        let child = self.file_in(dir, file_name);
        let file = std::fs::File::create(child.path()).expect("Failed to open XML input");
        let mut writer =
            MarcXmlWriter::new(file, XmlOptions::default()).expect("Failed to start collection");
        for record in records {
            writer.write_record(record).expect("Failed to write record");
        }
        writer.finish().expect("Failed to close collection");
        child.path().to_path_buf()
    }

    pub fn write_raw(&self, dir: &str, file_name: &str, content: &str) -> PathBuf {
        let child = self.file_in(dir, file_name);
        child.write_str(content).expect("Failed to write file");
        child.path().to_path_buf()
    }

    /// Serializes `config` as JSON into the harness root.
    pub fn write_config(&self, file_name: &str, config: &ImporterConfig) -> PathBuf {
        let json = serde_json::to_string_pretty(config).expect("Failed to serialize config");
        let child = self.temp_dir.child(file_name);
        child.write_str(&json).expect("Failed to write config");
        child.path().to_path_buf()
    }

    /// Runs the pipeline with an in-memory backend and captures its events.
    pub fn run(&self, config: ImporterConfig, backend: &MemoryBackend) -> RunResult {
        let events = Arc::new(EventBuffer::new());
        let statistics = Pipeline::from_config(config)
            .with_backends(backend.clone())
            .with_observer(events.clone())
            .run();
        RunResult {
            statistics,
            events: events.take(),
        }
    }

    /// Runs the pipeline against the backends named in `config`.
    pub fn run_configured(&self, config: ImporterConfig) -> RunResult {
        let events = Arc::new(EventBuffer::new());
        let statistics = Pipeline::from_config(config)
            .with_observer(events.clone())
            .run();
        RunResult {
            statistics,
            events: events.take(),
        }
    }

    /// Sorted names of the files directly inside `dir`; empty if it does not exist.
    pub fn files_in(&self, dir: &str) -> Vec<String> {
        let path = self.dir(dir);
        let Ok(entries) = std::fs::read_dir(&path) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.root().join(relative).exists()
    }

    /// Records of a MARCXML file under the harness root.
    pub fn read_xml(&self, relative: &str) -> Vec<Record> {
        MarcXmlReader::open(&self.root().join(relative))
            .expect("Failed to open MARCXML")
            .map(|r| r.expect("Failed to read record"))
            .collect()
    }

    pub fn read_ids(&self, relative: &str) -> Vec<String> {
        self.read_xml(relative)
            .iter()
            .map(|r| r.control_number().unwrap_or_default().to_string())
            .collect()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
