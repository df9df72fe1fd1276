//! Load stage: MARCXML files into the configured storage backend.
//!
//! Files are imported one after another through a single backend session.
//! Every file that was opened is committed, whether or not it succeeded;
//! the backend is optimized once when the stage ends.

use std::sync::Arc;

use tracing::info_span;

use super::error::FileError;
use super::layout::StageDirectories;
use super::progress::{PipelineEvent, PipelineObserver};
use super::stage::{list_inputs, Disposition, FileTask, ProgressTracker, Stage};
use super::stats::StageStatistics;
use crate::backend::{ImportOutcome, RecordImporter};
use crate::checker::check_well_formed;
use crate::codec::open_marcxml;
use crate::config::ImporterConfig;
use crate::modifier::RecordModifier;
use crate::storage::filesystem::same_directory;

pub struct LoadStage {
    dirs: StageDirectories,
    modifier: Option<Arc<dyn RecordModifier>>,
    deletion_feed: bool,
    delete_after_load: bool,
    observer: Arc<dyn PipelineObserver>,
}

impl LoadStage {
    /// `modifier` is only given when the modifier is fused into the load.
    pub fn new(
        config: &ImporterConfig,
        dirs: StageDirectories,
        modifier: Option<Arc<dyn RecordModifier>>,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        Self {
            dirs,
            modifier,
            deletion_feed: config.file_of_deleted_records,
            delete_after_load: config.delete_temporary_files,
            observer,
        }
    }

    pub fn run(&self, mut importer: RecordImporter) -> StageStatistics {
        let _span = info_span!("stage", stage = %Stage::Load, backend = importer.backend_name()).entered();
        self.observer.report(PipelineEvent::StageStarted {
            stage: Stage::Load,
            source: self.dirs.source.clone(),
            target: self.dirs.success.clone(),
            settings: Some(format!("storage: {}", importer.backend_name())),
        });

        let mut statistics = StageStatistics::new();
        for mut task in list_inputs(Stage::Load, &self.dirs, &*self.observer) {
            statistics.merge(&self.load_file(&mut task, &mut importer));
        }

        if let Err(e) = importer.optimize() {
            self.observer.report(PipelineEvent::Warning {
                stage: Some(Stage::Load),
                message: format!("Optimizing {} failed: {}", importer.backend_name(), e),
            });
        }

        self.observer.report(PipelineEvent::StageFinished {
            stage: Stage::Load,
            statistics: statistics.clone(),
            load_statistics: None,
        });
        statistics
    }

    fn success_disposition(&self) -> Disposition {
        if self.delete_after_load {
            Disposition::Delete
        } else if same_directory(&self.dirs.source, &self.dirs.success) {
            Disposition::Keep
        } else {
            Disposition::MoveToSuccess
        }
    }

    fn load_file(&self, task: &mut FileTask, importer: &mut RecordImporter) -> StageStatistics {
        let observer = &*self.observer;
        let _span = info_span!("file", name = %task.name).entered();
        task.start();
        observer.report(PipelineEvent::FileStarted {
            stage: Stage::Load,
            file: task.name.clone(),
        });
        let mut stats = StageStatistics::for_file();

        if let Err(e) = check_well_formed(&task.source) {
            stats.mark_invalid_file();
            observer.report(PipelineEvent::FileFailed {
                stage: Stage::Load,
                file: task.name.clone(),
                message: e.to_string(),
                last_record: None,
                invalid_file: true,
            });
            task.settle(Disposition::MoveToError, observer);
            return stats;
        }

        importer.begin_file(&task.name);
        let mut result = self.import_records(task, importer, &mut stats);
        if let Err(e) = importer.commit() {
            if result.is_ok() {
                result = Err(e.into());
            } else {
                log::error!("Commit after failed file {} also failed: {}", task.name, e);
            }
        }
        if let Err(e) = importer.end_file() {
            observer.report(PipelineEvent::BadRecordSinkFailed {
                stage: Stage::Load,
                file: task.name.clone(),
                message: e.to_string(),
            });
        }

        match result {
            Ok(()) => {
                observer.report(PipelineEvent::FileFinished {
                    stage: Stage::Load,
                    file: task.name.clone(),
                    statistics: stats.clone(),
                });
                task.settle(self.success_disposition(), observer);
            }
            Err(e) => {
                stats.mark_failed();
                let last_record = e
                    .last_good_id()
                    .or_else(|| importer.last_record())
                    .map(str::to_string);
                observer.report(PipelineEvent::FileFailed {
                    stage: Stage::Load,
                    file: task.name.clone(),
                    message: e.to_string(),
                    last_record,
                    invalid_file: false,
                });
                task.settle(Disposition::MoveToError, observer);
            }
        }
        stats
    }

    fn import_records(
        &self,
        task: &FileTask,
        importer: &mut RecordImporter,
        stats: &mut StageStatistics,
    ) -> Result<(), FileError> {
        let observer = &*self.observer;
        let mut reader = open_marcxml(&task.source)?;
        let mut progress = ProgressTracker::new(task.file_size());
        let mut records = 0u64;

        while let Some(next) = reader.next() {
            let record = next?;
            records += 1;

            let modified = match &self.modifier {
                Some(modifier) => modifier.modify(record.clone(), self.deletion_feed),
                None => Ok(record.clone()),
            };
            let outcome = match modified {
                Ok(modified) => {
                    let outcome = importer.import_record(&modified, self.deletion_feed)?;
                    stats.add_timing(importer.check_time(), importer.insert_time());
                    stats.record_processed();
                    outcome
                }
                Err(e) => {
                    log::warn!("{}: {}", task.name, e);
                    ImportOutcome::Invalid
                }
            };
            stats.record_outcome(outcome);
            if outcome == ImportOutcome::Invalid {
                if let Err(e) = importer.write_bad_record(&record) {
                    observer.report(PipelineEvent::BadRecordSinkFailed {
                        stage: Stage::Load,
                        file: task.name.clone(),
                        message: e.to_string(),
                    });
                }
            }

            progress.update(records, reader.bytes_read(), task, observer);
        }
        Ok(())
    }
}
