//! Directory roles of each stage, and the temporary handoff directories
//! between stages of the same run.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::stage::Stage;
use crate::config::ImporterConfig;
use crate::error::{ConfigError, StorageError};
use crate::storage::ensure_directory;

const CONVERT_HANDOFF_DIR: &str = "tempXml";
const MODIFY_HANDOFF_DIR: &str = "tempModifiedXml";

/// Which stages run in this invocation, derived from the stage flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StagePlan {
    pub convert: bool,
    pub modify: bool,
    pub load: bool,
    /// Convert imports records itself (production mode with load requested).
    pub convert_drives_backend: bool,
    /// The modifier runs inside convert and load instead of as a stage.
    pub fuse_modifier: bool,
}

impl StagePlan {
    pub fn from_config(config: &ImporterConfig) -> Self {
        let production = config.production_mode;
        Self {
            convert: config.need_convert,
            modify: config.need_modify && !production,
            load: config.need_load && (!production || !config.need_convert),
            convert_drives_backend: production && config.need_convert && config.need_load,
            fuse_modifier: production && config.need_modify,
        }
    }

    pub fn runs(&self, stage: Stage) -> bool {
        match stage {
            Stage::Convert => self.convert,
            Stage::Modify => self.modify,
            Stage::Load => self.load,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StageDirectories {
    pub stage: Stage,
    pub source: PathBuf,
    /// Destination of inputs (convert, load) or outputs (modify) on success.
    pub success: PathBuf,
    /// Destination of failed inputs.
    pub error: PathBuf,
    /// Where convert writes its XML.
    pub xml_output: Option<PathBuf>,
    /// Partial XML output and bad-record sinks.
    pub error_xml: PathBuf,
    /// The source is a handoff directory created by an earlier stage.
    pub source_is_temporary: bool,
}

impl StageDirectories {
    /// Creates every directory the stage touches.
    pub fn prepare(&self) -> Result<(), StorageError> {
        ensure_directory(&self.source)?;
        ensure_directory(&self.success)?;
        ensure_directory(&self.error)?;
        if let Some(xml_output) = &self.xml_output {
            ensure_directory(xml_output)?;
        }
        ensure_directory(&self.error_xml)
    }

    /// Directory that receives the stage's output.
    pub fn target(&self) -> &Path {
        self.xml_output.as_deref().unwrap_or(&self.success)
    }
}

pub struct DirectoryLayout {
    plan: StagePlan,
    source_dir: Option<PathBuf>,
    destination_dir: Option<PathBuf>,
    destination_xml_dir: Option<PathBuf>,
    error_dir: Option<PathBuf>,
    error_xml_dir: Option<PathBuf>,
    load_error_dir: Option<PathBuf>,
    temp_xml_dir: Option<PathBuf>,
}

fn required(value: &Option<PathBuf>, stage: Stage, role: &'static str) -> Result<PathBuf, ConfigError> {
    value.clone().ok_or_else(|| ConfigError::MissingDirectory {
        stage: stage.to_string(),
        role,
    })
}

fn sibling(dir: &Path, name: &str) -> PathBuf {
    match dir.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

impl DirectoryLayout {
    pub fn new(config: &ImporterConfig, plan: StagePlan) -> Self {
        Self {
            plan,
            source_dir: config.source_dir.clone(),
            destination_dir: config.destination_dir.clone(),
            destination_xml_dir: config.destination_xml_dir.clone(),
            error_dir: config.error_dir.clone(),
            error_xml_dir: config.error_xml_dir.clone(),
            load_error_dir: config.load_error_dir.clone(),
            temp_xml_dir: config.temp_xml_dir.clone(),
        }
    }

    pub fn plan(&self) -> StagePlan {
        self.plan
    }

    fn convert_output(&self, stage: Stage) -> Result<(PathBuf, bool), ConfigError> {
        let destination_xml = required(&self.destination_xml_dir, stage, "destination_xml_dir")?;
        if self.plan.modify || self.plan.load {
            let temp = self
                .temp_xml_dir
                .clone()
                .unwrap_or_else(|| sibling(&destination_xml, CONVERT_HANDOFF_DIR));
            Ok((temp, true))
        } else {
            Ok((destination_xml, false))
        }
    }

    fn modify_output(&self, stage: Stage) -> Result<(PathBuf, bool), ConfigError> {
        let destination_xml = required(&self.destination_xml_dir, stage, "destination_xml_dir")?;
        if self.plan.load {
            Ok((sibling(&destination_xml, MODIFY_HANDOFF_DIR), true))
        } else {
            Ok((destination_xml, false))
        }
    }

    /// Resolves the directories of `stage`, failing if a required one is
    /// not configured.
    pub fn resolve(&self, stage: Stage) -> Result<StageDirectories, ConfigError> {
        let error_xml = required(&self.error_xml_dir, stage, "error_xml_dir")?;
        match stage {
            Stage::Convert => {
                let (xml_output, _) = self.convert_output(stage)?;
                Ok(StageDirectories {
                    stage,
                    source: required(&self.source_dir, stage, "source_dir")?,
                    success: required(&self.destination_dir, stage, "destination_dir")?,
                    error: required(&self.error_dir, stage, "error_dir")?,
                    xml_output: Some(xml_output),
                    error_xml,
                    source_is_temporary: false,
                })
            }
            Stage::Modify => {
                let (source, source_is_temporary) = if self.plan.convert {
                    self.convert_output(stage)?
                } else {
                    (required(&self.source_dir, stage, "source_dir")?, false)
                };
                let (success, _) = self.modify_output(stage)?;
                Ok(StageDirectories {
                    stage,
                    source,
                    success,
                    error: error_xml.clone(),
                    xml_output: None,
                    error_xml,
                    source_is_temporary,
                })
            }
            Stage::Load => {
                let (source, source_is_temporary) = if self.plan.modify {
                    self.modify_output(stage)?
                } else if self.plan.convert {
                    self.convert_output(stage)?
                } else {
                    (required(&self.source_dir, stage, "source_dir")?, false)
                };
                Ok(StageDirectories {
                    stage,
                    source,
                    success: required(&self.destination_xml_dir, stage, "destination_xml_dir")?,
                    error: self.load_error_dir.clone().unwrap_or_else(|| error_xml.clone()),
                    xml_output: None,
                    error_xml,
                    source_is_temporary,
                })
            }
        }
    }

    /// Handoff directories used by this run, in the order they are drained.
    pub fn temporary_directories(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if self.plan.convert {
            if let Ok((dir, true)) = self.convert_output(Stage::Convert) {
                dirs.push(dir);
            }
        }
        if self.plan.modify {
            if let Ok((dir, true)) = self.modify_output(Stage::Modify) {
                dirs.push(dir);
            }
        }
        dirs
    }
}

/// Removes a drained handoff directory. A directory that still holds files
/// is kept and reported.
pub fn remove_temporary_directory(dir: &Path) -> Result<(), StorageError> {
    if !dir.exists() {
        return Ok(());
    }
    let mut count = 0;
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        entry.map_err(|e| StorageError::ReadDirectory {
            path: dir.to_path_buf(),
            source: e,
        })?;
        count += 1;
    }
    if count > 0 {
        return Err(StorageError::ResidualFiles {
            path: dir.to_path_buf(),
            count,
        });
    }
    std::fs::remove_dir(dir).map_err(|e| StorageError::DeleteFile {
        path: dir.to_path_buf(),
        source: e,
    })
}
