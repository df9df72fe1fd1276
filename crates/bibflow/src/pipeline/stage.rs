//! Pieces shared by the three stage runners.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::layout::StageDirectories;
use super::progress::{PipelineEvent, PipelineObserver};
use crate::error::StorageError;
use crate::storage::filesystem::{self, relocate_to};
use crate::worker::DirectoryScanner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Convert,
    Modify,
    Load,
}

impl Stage {
    /// Extension of the files the stage consumes.
    pub fn input_extension(self) -> &'static str {
        match self {
            Stage::Convert => "mrc",
            Stage::Modify | Stage::Load => "xml",
        }
    }

    /// Noun used in log lines, e.g. "Conversion started at ...".
    pub fn activity(self) -> &'static str {
        match self {
            Stage::Convert => "Conversion",
            Stage::Modify => "Modification",
            Stage::Load => "Load",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Convert => "convert",
            Stage::Modify => "modify",
            Stage::Load => "load",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Pending,
    Processing,
    Succeeded,
    Failed,
}

/// What happens to an input file once its processing has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    MoveToSuccess,
    MoveToError,
    Delete,
    /// The file already sits in its final directory.
    Keep,
}

/// One input file of a stage together with its two possible destinations.
#[derive(Debug, Clone)]
pub struct FileTask {
    pub stage: Stage,
    pub source: PathBuf,
    pub name: String,
    pub success_path: PathBuf,
    pub error_path: PathBuf,
    state: FileState,
}

impl FileTask {
    pub fn new(stage: Stage, source: PathBuf, dirs: &StageDirectories) -> Self {
        let name = filesystem::file_name(&source);
        Self {
            stage,
            success_path: dirs.success.join(&name),
            error_path: dirs.error.join(&name),
            source,
            name,
            state: FileState::Pending,
        }
    }

    pub fn state(&self) -> FileState {
        self.state
    }

    pub fn start(&mut self) {
        debug_assert_eq!(self.state, FileState::Pending);
        self.state = FileState::Processing;
    }

    pub fn file_size(&self) -> u64 {
        std::fs::metadata(&self.source).map(|m| m.len()).unwrap_or(0)
    }

    /// Moves the input to its final place and records the terminal state.
    /// A failed move is reported and leaves the task `Processing`; the input
    /// then stays where it is and is picked up again by the next run.
    pub fn settle(&mut self, disposition: Disposition, observer: &dyn PipelineObserver) {
        let result: Result<Option<&Path>, StorageError> = match disposition {
            Disposition::MoveToSuccess => {
                relocate_to(&self.source, &self.success_path).map(|_| Some(self.success_path.as_path()))
            }
            Disposition::MoveToError => {
                relocate_to(&self.source, &self.error_path).map(|_| Some(self.error_path.as_path()))
            }
            Disposition::Delete => filesystem::remove_file(&self.source).map(|_| None),
            Disposition::Keep => Ok(None),
        };

        match result {
            Ok(destination) => {
                self.state = match disposition {
                    Disposition::MoveToError => FileState::Failed,
                    _ => FileState::Succeeded,
                };
                observer.report(PipelineEvent::Relocated {
                    stage: self.stage,
                    file: self.name.clone(),
                    destination: destination.map(Path::to_path_buf),
                });
            }
            Err(e) => observer.report(PipelineEvent::RelocationFailed {
                stage: self.stage,
                file: self.name.clone(),
                message: e.to_string(),
            }),
        }
    }
}

/// Lists the stage's input files in processing order. An unreadable or empty
/// source directory is reported and yields no files.
pub fn list_inputs(
    stage: Stage,
    dirs: &StageDirectories,
    observer: &dyn PipelineObserver,
) -> Vec<FileTask> {
    let scanner = DirectoryScanner::new(&dirs.source, stage.input_extension());
    let files = match scanner.scan() {
        Ok(files) => files,
        Err(e) => {
            observer.report(PipelineEvent::Warning {
                stage: Some(stage),
                message: e.to_string(),
            });
            Vec::new()
        }
    };
    if files.is_empty() {
        observer.report(PipelineEvent::NoInputFiles {
            stage,
            directory: dirs.source.clone(),
        });
    }
    files
        .into_iter()
        .map(|path| FileTask::new(stage, path, dirs))
        .collect()
}

/// Percentage of the input consumed, reported once per ten-percent step.
pub(crate) struct ProgressTracker {
    file_size: u64,
    last_percent: u8,
}

impl ProgressTracker {
    pub const RECORD_INTERVAL: u64 = 100;

    pub fn new(file_size: u64) -> Self {
        Self {
            file_size,
            last_percent: 0,
        }
    }

    pub fn update(
        &mut self,
        records: u64,
        bytes_read: u64,
        task: &FileTask,
        observer: &dyn PipelineObserver,
    ) {
        if records == 0 || records % Self::RECORD_INTERVAL != 0 {
            return;
        }
        let percent = if self.file_size == 0 {
            None
        } else {
            Some((bytes_read.min(self.file_size) * 100 / self.file_size) as u8)
        };
        let crossed = percent
            .map(|p| p / 10 > self.last_percent / 10)
            .unwrap_or(false);
        if crossed {
            self.last_percent = percent.unwrap_or(self.last_percent);
        }
        observer.report(PipelineEvent::RecordProgress {
            stage: task.stage,
            file: task.name.clone(),
            records,
            percent: percent.filter(|_| crossed),
        });
    }
}
