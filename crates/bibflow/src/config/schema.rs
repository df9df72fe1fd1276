use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::backend::{ConfiguredBackends, StorageKind};
use crate::codec::{MarcEncoding, ReaderOptions, XmlOptions};
use crate::error::ConfigError;

/// Importer configuration. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImporterConfig {
    pub version: String,

    #[serde(default)]
    pub need_convert: bool,
    #[serde(default)]
    pub need_modify: bool,
    #[serde(default)]
    pub need_load: bool,
    /// Fuses modification into convert and lets convert drive the backend.
    #[serde(default)]
    pub production_mode: bool,
    #[serde(default)]
    pub log_detail: bool,
    /// After a successful load, delete the XML input instead of moving it.
    #[serde(default)]
    pub delete_temporary_files: bool,
    /// Every record in the input describes a deletion.
    #[serde(default)]
    pub file_of_deleted_records: bool,

    #[serde(default)]
    pub source_dir: Option<PathBuf>,
    #[serde(default)]
    pub destination_dir: Option<PathBuf>,
    #[serde(default)]
    pub destination_xml_dir: Option<PathBuf>,
    #[serde(default)]
    pub error_dir: Option<PathBuf>,
    #[serde(default)]
    pub error_xml_dir: Option<PathBuf>,
    /// Where load puts files failing the well-formedness gate. Defaults to
    /// `error_xml_dir`.
    #[serde(default)]
    pub load_error_dir: Option<PathBuf>,
    /// Handoff directory for convert output. Defaults to `tempXml` next to
    /// `destination_xml_dir`.
    #[serde(default)]
    pub temp_xml_dir: Option<PathBuf>,

    #[serde(default = "default_marc_encoding")]
    pub marc_encoding: String,
    #[serde(default)]
    pub translate_leader_bad_chars_to_zero: bool,
    #[serde(default)]
    pub translate_nonleader_bad_chars_to_spaces: bool,
    /// Maximum records per convert output file; 0 keeps one output per input.
    #[serde(default)]
    pub split_size: usize,
    #[serde(default)]
    pub indent_xml: bool,
    #[serde(default)]
    pub create_xml11: bool,

    #[serde(default)]
    pub default_repository_code: Option<String>,
    #[serde(default)]
    pub ignore_repository_code: bool,

    #[serde(default)]
    pub storage_kind: StorageKind,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub search_index_path: Option<PathBuf>,

    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
}

fn default_marc_encoding() -> String {
    "UTF-8".to_string()
}

fn default_worker_count() -> usize {
    1
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            need_convert: false,
            need_modify: false,
            need_load: false,
            production_mode: false,
            log_detail: false,
            delete_temporary_files: false,
            file_of_deleted_records: false,
            source_dir: None,
            destination_dir: None,
            destination_xml_dir: None,
            error_dir: None,
            error_xml_dir: None,
            load_error_dir: None,
            temp_xml_dir: None,
            marc_encoding: default_marc_encoding(),
            translate_leader_bad_chars_to_zero: false,
            translate_nonleader_bad_chars_to_spaces: false,
            split_size: 0,
            indent_xml: false,
            create_xml11: false,
            default_repository_code: None,
            ignore_repository_code: false,
            storage_kind: StorageKind::default(),
            database_path: None,
            search_index_path: None,
            worker_count: default_worker_count(),
        }
    }
}

impl ImporterConfig {
    pub fn any_stage_enabled(&self) -> bool {
        self.need_convert || self.need_modify || self.need_load
    }

    pub fn reader_options(&self) -> Result<ReaderOptions, ConfigError> {
        Ok(ReaderOptions {
            encoding: MarcEncoding::from_name(&self.marc_encoding)?,
            translate_leader_bad_chars_to_zero: self.translate_leader_bad_chars_to_zero,
            translate_nonleader_bad_chars_to_spaces: self.translate_nonleader_bad_chars_to_spaces,
        })
    }

    pub fn xml_options(&self) -> XmlOptions {
        XmlOptions {
            indent: self.indent_xml,
            xml11: self.create_xml11,
        }
    }

    pub fn backends(&self) -> ConfiguredBackends {
        ConfiguredBackends {
            kind: self.storage_kind,
            database_path: self.database_path.clone(),
            search_index_path: self.search_index_path.clone(),
        }
    }

    /// One-line description of the conversion settings, logged at stage start.
    pub fn conversion_settings(&self) -> String {
        format!(
            "encoding: {}, split size: {}, indent XML: {}, XML 1.1: {}, \
             translate leader bad chars: {}, translate non-leader bad chars: {}, \
             default repository code: {}, ignore repository code: {}",
            self.marc_encoding,
            self.split_size,
            self.indent_xml,
            self.create_xml11,
            self.translate_leader_bad_chars_to_zero,
            self.translate_nonleader_bad_chars_to_spaces,
            self.default_repository_code.as_deref().unwrap_or("-"),
            self.ignore_repository_code
        )
    }
}
