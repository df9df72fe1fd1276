//! Modify stage: MARCXML in, transformed MARCXML out.

use std::sync::Arc;

use tracing::info_span;

use super::error::FileError;
use super::layout::StageDirectories;
use super::output::StagedOutput;
use super::progress::{EventBuffer, PipelineEvent, PipelineObserver};
use super::stage::{list_inputs, Disposition, FileTask, ProgressTracker, Stage};
use super::stats::StageStatistics;
use crate::backend::ImportOutcome;
use crate::checker::check_well_formed;
use crate::codec::{open_marcxml, XmlOptions};
use crate::config::ImporterConfig;
use crate::modifier::RecordModifier;
use crate::storage::filesystem::same_directory;
use crate::storage::BadRecordSink;
use crate::worker::run_ordered;

const PARTIAL_PREFIX: &str = "partial_";

struct ModifyJob {
    dirs: StageDirectories,
    modifier: Arc<dyn RecordModifier>,
    xml_options: XmlOptions,
    deletion_feed: bool,
}

pub struct ModifyStage {
    job: Arc<ModifyJob>,
    worker_count: usize,
    observer: Arc<dyn PipelineObserver>,
}

impl ModifyStage {
    pub fn new(
        config: &ImporterConfig,
        dirs: StageDirectories,
        modifier: Arc<dyn RecordModifier>,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        Self {
            job: Arc::new(ModifyJob {
                dirs,
                modifier,
                xml_options: config.xml_options(),
                deletion_feed: config.file_of_deleted_records,
            }),
            worker_count: config.worker_count.max(1),
            observer,
        }
    }

    pub fn run(&self) -> StageStatistics {
        let dirs = &self.job.dirs;
        let _span = info_span!("stage", stage = %Stage::Modify).entered();
        self.observer.report(PipelineEvent::StageStarted {
            stage: Stage::Modify,
            source: dirs.source.clone(),
            target: dirs.success.clone(),
            settings: None,
        });

        let tasks = list_inputs(Stage::Modify, dirs, &*self.observer);
        let mut statistics = StageStatistics::new();

        if self.worker_count > 1 && tasks.len() > 1 {
            let job = Arc::clone(&self.job);
            let observer = &*self.observer;
            let result = run_ordered(
                self.worker_count,
                tasks,
                move |mut task: FileTask| {
                    let events = EventBuffer::new();
                    let stats = job.modify_file(&mut task, &events);
                    (stats, events)
                },
                |(stats, events): (StageStatistics, EventBuffer)| {
                    events.replay(observer);
                    statistics.merge(&stats);
                },
            );
            if let Err(e) = result {
                self.observer.report(PipelineEvent::Warning {
                    stage: Some(Stage::Modify),
                    message: e.to_string(),
                });
            }
        } else {
            for mut task in tasks {
                statistics.merge(&self.job.modify_file(&mut task, &*self.observer));
            }
        }

        self.observer.report(PipelineEvent::StageFinished {
            stage: Stage::Modify,
            statistics: statistics.clone(),
            load_statistics: None,
        });
        statistics
    }
}

impl ModifyJob {
    fn modify_file(&self, task: &mut FileTask, observer: &dyn PipelineObserver) -> StageStatistics {
        let _span = info_span!("file", name = %task.name).entered();
        task.start();
        observer.report(PipelineEvent::FileStarted {
            stage: Stage::Modify,
            file: task.name.clone(),
        });
        let mut stats = StageStatistics::for_file();

        if let Err(e) = check_well_formed(&task.source) {
            stats.mark_invalid_file();
            observer.report(PipelineEvent::FileFailed {
                stage: Stage::Modify,
                file: task.name.clone(),
                message: e.to_string(),
                last_record: None,
                invalid_file: true,
            });
            task.settle(Disposition::MoveToError, observer);
            return stats;
        }

        let mut output = StagedOutput::new(&self.dirs.success, &task.name, 0, self.xml_options);
        let mut rejected = BadRecordSink::new(&self.dirs.error_xml, &task.name, self.xml_options);
        let result = self.modify_records(task, &mut output, &mut rejected, &mut stats, observer);
        if let Err(e) = rejected.finish() {
            observer.report(PipelineEvent::BadRecordSinkFailed {
                stage: Stage::Modify,
                file: task.name.clone(),
                message: e.to_string(),
            });
        }

        let result = match result {
            Ok(()) => output.commit().map_err(FileError::from),
            Err(e) => {
                let moved = output.quarantine(&self.dirs.error_xml, |name| {
                    format!("{}{}", PARTIAL_PREFIX, name)
                });
                for failure in moved.into_iter().filter_map(Result::err) {
                    log::error!("Failed to keep partial output of {}: {}", task.name, failure);
                }
                Err(e)
            }
        };

        match result {
            Ok(_) => {
                observer.report(PipelineEvent::FileFinished {
                    stage: Stage::Modify,
                    file: task.name.clone(),
                    statistics: stats.clone(),
                });
                // The output may have replaced the input in place.
                let disposition = if same_directory(&self.dirs.source, &self.dirs.success) {
                    Disposition::Keep
                } else {
                    Disposition::Delete
                };
                task.settle(disposition, observer);
            }
            Err(e) => {
                stats.mark_failed();
                observer.report(PipelineEvent::FileFailed {
                    stage: Stage::Modify,
                    file: task.name.clone(),
                    message: e.to_string(),
                    last_record: e.last_good_id().map(str::to_string),
                    invalid_file: false,
                });
                task.settle(Disposition::MoveToError, observer);
            }
        }
        stats
    }

    fn modify_records(
        &self,
        task: &FileTask,
        output: &mut StagedOutput,
        rejected: &mut BadRecordSink,
        stats: &mut StageStatistics,
        observer: &dyn PipelineObserver,
    ) -> Result<(), FileError> {
        let mut reader = open_marcxml(&task.source)?;
        let mut progress = ProgressTracker::new(task.file_size());
        let mut records = 0u64;

        while let Some(next) = reader.next() {
            let record = next?;
            records += 1;
            let original = record.clone();
            match self.modifier.modify(record, self.deletion_feed) {
                Ok(modified) => {
                    output.write(&modified)?;
                    stats.record_processed();
                }
                Err(e) => {
                    log::warn!("{}: {}", task.name, e);
                    stats.record_outcome(ImportOutcome::Invalid);
                    if let Err(e) = rejected.write(&original) {
                        observer.report(PipelineEvent::BadRecordSinkFailed {
                            stage: Stage::Modify,
                            file: task.name.clone(),
                            message: e.to_string(),
                        });
                    }
                }
            }
            progress.update(records, reader.bytes_read(), task, observer);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{MarcXmlReader, MarcXmlWriter, Record};
    use crate::modifier::RepositoryCodeModifier;
    use crate::pipeline::progress::NoopObserver;
    use std::path::Path;
    use tempfile::TempDir;

    const LEADER: &str = "00000nam a2200000 a 4500";

    fn write_xml(path: &Path, ids: &[&str]) {
        let mut writer =
            MarcXmlWriter::new(std::fs::File::create(path).unwrap(), XmlOptions::default())
                .unwrap();
        for id in ids {
            writer
                .write_record(&Record::new(LEADER).with_control_field("001", id))
                .unwrap();
        }
        writer.finish().unwrap();
    }

    fn setup(root: &Path) -> StageDirectories {
        let dirs = StageDirectories {
            stage: Stage::Modify,
            source: root.join("in"),
            success: root.join("out"),
            error: root.join("xml_error"),
            xml_output: None,
            error_xml: root.join("xml_error"),
            source_is_temporary: true,
        };
        dirs.prepare().unwrap();
        dirs
    }

    fn stage(dirs: &StageDirectories) -> ModifyStage {
        ModifyStage::new(
            &ImporterConfig::default(),
            dirs.clone(),
            Arc::new(RepositoryCodeModifier::new(Some("XYZ".to_string()), false)),
            Arc::new(NoopObserver),
        )
    }

    #[test]
    fn test_modify_transforms_and_consumes_input() {
        let root = TempDir::new().unwrap();
        let dirs = setup(root.path());
        write_xml(&dirs.source.join("a.xml"), &["1", "2"]);

        let stats = stage(&dirs).run();

        assert_eq!(stats.records_processed, 2);
        assert!(!dirs.source.join("a.xml").exists());
        let records: Vec<Record> = MarcXmlReader::open(&dirs.success.join("a.xml"))
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].control_field("003"), Some("XYZ"));
    }

    #[test]
    fn test_output_replacing_input_under_another_spelling_is_kept() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("sub")).unwrap();
        let dirs = StageDirectories {
            stage: Stage::Modify,
            source: root.path().join("xml"),
            success: root.path().join("sub/../xml"),
            error: root.path().join("xml_error"),
            xml_output: None,
            error_xml: root.path().join("xml_error"),
            source_is_temporary: false,
        };
        dirs.prepare().unwrap();
        write_xml(&dirs.source.join("a.xml"), &["1"]);

        let stats = stage(&dirs).run();

        assert_eq!(stats.records_processed, 1);
        assert_eq!(stats.files_failed, 0);
        let records: Vec<Record> = MarcXmlReader::open(&dirs.source.join("a.xml"))
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].control_field("003"), Some("XYZ"));
    }

    #[test]
    fn test_malformed_xml_is_rejected_before_reading() {
        let root = TempDir::new().unwrap();
        let dirs = setup(root.path());
        std::fs::write(dirs.source.join("bad.xml"), b"<collection><record>").unwrap();

        let stats = stage(&dirs).run();

        assert_eq!(stats.invalid_files, 1);
        assert!(dirs.error.join("bad.xml").exists());
        assert!(!dirs.success.join("bad.xml").exists());
    }

    #[test]
    fn test_records_failing_the_modifier_are_sunk() {
        let root = TempDir::new().unwrap();
        let dirs = setup(root.path());
        write_xml(&dirs.source.join("a.xml"), &["1", " "]);

        let stats = stage(&dirs).run();

        assert_eq!(stats.records_processed, 1);
        assert_eq!(stats.count(ImportOutcome::Invalid), 1);
        assert_eq!(stats.files_failed, 0);
        assert!(dirs.error_xml.join("error_records_in_a.xml").exists());
    }
}
