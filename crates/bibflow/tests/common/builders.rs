//! Builder patterns for creating test data programmatically.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use bibflow::codec::{DataField, Record};
use bibflow::{ImporterConfig, StorageKind};

pub const LEADER: &str = "00000nam a2200000 a 4500";

/// Builder for `Record` instances.
pub struct RecordBuilder {
    record: Record,
}

impl RecordBuilder {
    /// A record with a valid leader and the given control number.
    pub fn new(id: &str) -> Self {
        Self {
            record: Record::new(LEADER).with_control_field("001", id),
        }
    }

    /// A record without any 001 field.
    pub fn without_id() -> Self {
        Self {
            record: Record::new(LEADER),
        }
    }

    pub fn repository_code(mut self, code: &str) -> Self {
        self.record.set_control_field("003", code);
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.record = self
            .record
            .with_data_field(DataField::new("245", '1', '0').with_subfield('a', title));
        self
    }

    pub fn deleted(mut self) -> Self {
        self.record.set_status('d');
        self
    }

    pub fn build(self) -> Record {
        self.record
    }
}

/// Records `prefix1 ..= prefixN`.
pub fn numbered_records(prefix: &str, count: usize) -> Vec<Record> {
    (1..=count)
        .map(|i| {
            RecordBuilder::new(&format!("{}{}", prefix, i))
                .title(&format!("Title {}", i))
                .build()
        })
        .collect()
}

/// Builder for `ImporterConfig` instances rooted in a test directory.
pub struct ConfigBuilder {
    config: ImporterConfig,
}

impl ConfigBuilder {
    /// Directories laid out under `root` the way an installation would.
    pub fn new(root: &Path) -> Self {
        let dir = |name: &str| Some(root.join(name));
        Self {
            config: ImporterConfig {
                source_dir: dir("marc"),
                destination_dir: dir("marc_done"),
                destination_xml_dir: dir("xml"),
                error_dir: dir("marc_error"),
                error_xml_dir: dir("xml_error"),
                load_error_dir: dir("load_error"),
                database_path: dir("db/records.sqlite"),
                ..ImporterConfig::default()
            },
        }
    }

    pub fn convert(mut self) -> Self {
        self.config.need_convert = true;
        self
    }

    pub fn modify(mut self) -> Self {
        self.config.need_modify = true;
        self
    }

    pub fn load(mut self) -> Self {
        self.config.need_load = true;
        self
    }

    pub fn production(mut self) -> Self {
        self.config.production_mode = true;
        self
    }

    pub fn source_dir(mut self, path: PathBuf) -> Self {
        self.config.source_dir = Some(path);
        self
    }

    pub fn repository_code(mut self, code: &str) -> Self {
        self.config.default_repository_code = Some(code.to_string());
        self
    }

    pub fn split_size(mut self, size: usize) -> Self {
        self.config.split_size = size;
        self
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = count;
        self
    }

    pub fn delete_temporary_files(mut self) -> Self {
        self.config.delete_temporary_files = true;
        self
    }

    pub fn deletion_feed(mut self) -> Self {
        self.config.file_of_deleted_records = true;
        self
    }

    pub fn storage_kind(mut self, kind: StorageKind, root: &Path) -> Self {
        self.config.storage_kind = kind;
        self.config.search_index_path = Some(root.join("index"));
        self
    }

    pub fn build(self) -> ImporterConfig {
        self.config
    }
}
