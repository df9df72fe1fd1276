//! Convert stage: binary MARC files in, MARCXML files out.
//!
//! In production mode with load requested, the converted records are also
//! imported here and the modifier runs in-line; no separate load stage
//! follows.

use std::sync::Arc;

use tracing::info_span;

use super::error::FileError;
use super::layout::StageDirectories;
use super::output::StagedOutput;
use super::progress::{EventBuffer, PipelineEvent, PipelineObserver};
use super::stage::{list_inputs, Disposition, FileTask, ProgressTracker, Stage};
use super::stats::StageStatistics;
use crate::backend::{ImportOutcome, RecordImporter};
use crate::codec::{open_marc, ReaderOptions, Record, XmlOptions};
use crate::config::ImporterConfig;
use crate::error::ConfigError;
use crate::modifier::RecordModifier;
use crate::storage::filesystem::xml_file_name;
use crate::storage::BadRecordSink;
use crate::worker::run_ordered;

/// Statistics of one convert run.
#[derive(Debug, Clone, Default)]
pub struct ConvertReport {
    pub statistics: StageStatistics,
    /// Present when the stage drove the storage backend.
    pub load: Option<StageStatistics>,
}

impl ConvertReport {
    fn merge(&mut self, other: &ConvertReport) {
        self.statistics.merge(&other.statistics);
        if let (Some(load), Some(other)) = (self.load.as_mut(), other.load.as_ref()) {
            load.merge(other);
        }
    }
}

/// Everything needed to convert a single file, shared by the workers.
struct ConvertJob {
    dirs: StageDirectories,
    reader_options: ReaderOptions,
    xml_options: XmlOptions,
    split_size: usize,
    deletion_feed: bool,
    modifier: Option<Arc<dyn RecordModifier>>,
}

pub struct ConvertStage {
    job: Arc<ConvertJob>,
    settings: String,
    worker_count: usize,
    observer: Arc<dyn PipelineObserver>,
}

impl ConvertStage {
    /// `modifier` is only given when the modifier is fused into conversion.
    pub fn new(
        config: &ImporterConfig,
        dirs: StageDirectories,
        modifier: Option<Arc<dyn RecordModifier>>,
        observer: Arc<dyn PipelineObserver>,
    ) -> Result<Self, ConfigError> {
        let job = ConvertJob {
            dirs,
            reader_options: config.reader_options()?,
            xml_options: config.xml_options(),
            split_size: config.split_size,
            deletion_feed: config.file_of_deleted_records,
            modifier,
        };
        Ok(Self {
            job: Arc::new(job),
            settings: config.conversion_settings(),
            worker_count: config.worker_count.max(1),
            observer,
        })
    }

    pub fn run(&self, mut importer: Option<RecordImporter>) -> ConvertReport {
        let dirs = &self.job.dirs;
        let _span = info_span!("stage", stage = %Stage::Convert).entered();
        self.observer.report(PipelineEvent::StageStarted {
            stage: Stage::Convert,
            source: dirs.source.clone(),
            target: dirs.target().to_path_buf(),
            settings: Some(self.settings.clone()),
        });

        let tasks = list_inputs(Stage::Convert, dirs, &*self.observer);
        let mut report = ConvertReport {
            load: importer.as_ref().map(|_| StageStatistics::new()),
            ..ConvertReport::default()
        };

        // Backend sessions are single-threaded, so a fused load stays sequential.
        if importer.is_none() && self.worker_count > 1 && tasks.len() > 1 {
            let job = Arc::clone(&self.job);
            let observer = &*self.observer;
            let result = run_ordered(
                self.worker_count,
                tasks,
                move |mut task: FileTask| {
                    let events = EventBuffer::new();
                    let file_report = job.convert_file(&mut task, None, &events);
                    (file_report, events)
                },
                |(file_report, events): (ConvertReport, EventBuffer)| {
                    events.replay(observer);
                    report.merge(&file_report);
                },
            );
            if let Err(e) = result {
                self.observer.report(PipelineEvent::Warning {
                    stage: Some(Stage::Convert),
                    message: e.to_string(),
                });
            }
        } else {
            for mut task in tasks {
                let file_report =
                    self.job
                        .convert_file(&mut task, importer.as_mut(), &*self.observer);
                report.merge(&file_report);
            }
        }

        if let Some(importer) = importer.as_mut() {
            if let Err(e) = importer.optimize() {
                self.observer.report(PipelineEvent::Warning {
                    stage: Some(Stage::Convert),
                    message: format!("Optimizing {} failed: {}", importer.backend_name(), e),
                });
            }
        }

        self.observer.report(PipelineEvent::StageFinished {
            stage: Stage::Convert,
            statistics: report.statistics.clone(),
            load_statistics: report.load.clone(),
        });
        report
    }
}

impl ConvertJob {
    fn convert_file(
        &self,
        task: &mut FileTask,
        mut importer: Option<&mut RecordImporter>,
        observer: &dyn PipelineObserver,
    ) -> ConvertReport {
        let _span = info_span!("file", name = %task.name).entered();
        task.start();
        observer.report(PipelineEvent::FileStarted {
            stage: Stage::Convert,
            file: task.name.clone(),
        });

        let xml_name = xml_file_name(&task.name);
        let mut report = ConvertReport {
            statistics: StageStatistics::for_file(),
            load: importer.as_ref().map(|_| StageStatistics::for_file()),
        };
        let mut output = StagedOutput::new(
            self.dirs.target(),
            &xml_name,
            self.split_size,
            self.xml_options,
        );
        let mut rejected = BadRecordSink::new(&self.dirs.error_xml, &xml_name, self.xml_options);
        if let Some(importer) = importer.as_deref_mut() {
            importer.begin_file(&xml_name);
        }

        let mut result =
            self.convert_records(task, &mut output, &mut rejected, importer.as_deref_mut(), &mut report, observer);

        let mut last_record = None;
        if let Some(importer) = importer.as_deref_mut() {
            if let Err(e) = importer.commit() {
                if result.is_ok() {
                    result = Err(e.into());
                } else {
                    log::error!("Commit after failed file {} also failed: {}", task.name, e);
                }
            }
            if let Err(e) = importer.end_file() {
                report_sink_failure(task, &e.to_string(), observer);
            }
            last_record = importer.last_record().map(str::to_string);
        }
        if let Err(e) = rejected.finish() {
            report_sink_failure(task, &e.to_string(), observer);
        }

        let result = match result {
            Ok(()) => output.commit().map_err(FileError::from),
            Err(e) => {
                for moved in output.quarantine(&self.dirs.error_xml, str::to_string) {
                    if let Err(move_error) = moved {
                        log::error!("Failed to keep partial output of {}: {}", task.name, move_error);
                    }
                }
                Err(e)
            }
        };

        match result {
            Ok(_) => {
                observer.report(PipelineEvent::FileFinished {
                    stage: Stage::Convert,
                    file: task.name.clone(),
                    statistics: report.statistics.clone(),
                });
                task.settle(Disposition::MoveToSuccess, observer);
            }
            Err(e) => {
                report.statistics.mark_failed();
                if let Some(load) = report.load.as_mut() {
                    load.mark_failed();
                }
                observer.report(PipelineEvent::FileFailed {
                    stage: Stage::Convert,
                    file: task.name.clone(),
                    message: e.to_string(),
                    last_record: e.last_good_id().map(str::to_string).or(last_record),
                    invalid_file: false,
                });
                task.settle(Disposition::MoveToError, observer);
            }
        }
        report
    }

    fn convert_records(
        &self,
        task: &FileTask,
        output: &mut StagedOutput,
        rejected: &mut BadRecordSink,
        mut importer: Option<&mut RecordImporter>,
        report: &mut ConvertReport,
        observer: &dyn PipelineObserver,
    ) -> Result<(), FileError> {
        let mut reader = open_marc(&task.source, self.reader_options)?;
        let mut progress = ProgressTracker::new(task.file_size());
        let mut records = 0u64;

        while let Some(next) = reader.next() {
            let record = next?;
            records += 1;

            let record = match self.apply_modifier(record) {
                Ok(record) => record,
                Err((record, message)) => {
                    log::warn!("{}: {}", task.name, message);
                    report.statistics.record_outcome(ImportOutcome::Invalid);
                    let written = match importer.as_deref_mut() {
                        Some(importer) => {
                            if let Some(load) = report.load.as_mut() {
                                load.record_outcome(ImportOutcome::Invalid);
                            }
                            importer.write_bad_record(&record)
                        }
                        None => rejected.write(&record),
                    };
                    if let Err(e) = written {
                        report_sink_failure(task, &e.to_string(), observer);
                    }
                    progress.update(records, reader.bytes_read(), task, observer);
                    continue;
                }
            };

            output.write(&record)?;
            report.statistics.record_processed();

            if let Some(importer) = importer.as_deref_mut() {
                let outcome = importer.import_record(&record, self.deletion_feed)?;
                if let Some(load) = report.load.as_mut() {
                    load.record_outcome(outcome);
                    load.add_timing(importer.check_time(), importer.insert_time());
                }
                if outcome == ImportOutcome::Invalid {
                    if let Err(e) = importer.write_bad_record(&record) {
                        report_sink_failure(task, &e.to_string(), observer);
                    }
                }
            }

            progress.update(records, reader.bytes_read(), task, observer);
        }
        Ok(())
    }

    /// Runs the fused modifier, handing the untouched record back on failure.
    fn apply_modifier(&self, record: Record) -> Result<Record, (Record, String)> {
        match &self.modifier {
            Some(modifier) => {
                let original = record.clone();
                modifier
                    .modify(record, self.deletion_feed)
                    .map_err(|e| (original, e.to_string()))
            }
            None => Ok(record),
        }
    }
}

fn report_sink_failure(task: &FileTask, message: &str, observer: &dyn PipelineObserver) {
    observer.report(PipelineEvent::BadRecordSinkFailed {
        stage: task.stage,
        file: task.name.clone(),
        message: message.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::codec::{encode_record, MarcXmlReader};
    use crate::modifier::RepositoryCodeModifier;
    use crate::pipeline::progress::NoopObserver;
    use std::path::Path;
    use tempfile::TempDir;

    const LEADER: &str = "00000nam a2200000 a 4500";

    fn record(id: &str) -> Record {
        Record::new(LEADER).with_control_field("001", id)
    }

    fn write_marc(path: &Path, ids: &[&str]) {
        let bytes: Vec<u8> = ids.iter().flat_map(|id| encode_record(&record(id))).collect();
        std::fs::write(path, bytes).unwrap();
    }

    fn setup(root: &Path) -> StageDirectories {
        let dirs = StageDirectories {
            stage: Stage::Convert,
            source: root.join("marc"),
            success: root.join("marc_done"),
            error: root.join("marc_error"),
            xml_output: Some(root.join("xml")),
            error_xml: root.join("xml_error"),
            source_is_temporary: false,
        };
        dirs.prepare().unwrap();
        dirs
    }

    fn ids_in(path: &Path) -> Vec<String> {
        MarcXmlReader::open(path)
            .unwrap()
            .map(|r| r.unwrap().control_number().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_convert_moves_input_and_writes_xml() {
        let root = TempDir::new().unwrap();
        let dirs = setup(root.path());
        write_marc(&dirs.source.join("a.mrc"), &["1", "2", "3"]);

        let stage = ConvertStage::new(
            &ImporterConfig::default(),
            dirs.clone(),
            None,
            Arc::new(NoopObserver),
        )
        .unwrap();
        let report = stage.run(None);

        assert_eq!(report.statistics.files_total, 1);
        assert_eq!(report.statistics.records_processed, 3);
        assert!(report.load.is_none());
        assert!(dirs.success.join("a.mrc").exists());
        assert!(!dirs.source.join("a.mrc").exists());
        assert_eq!(ids_in(&root.path().join("xml/a.xml")), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_fused_load_imports_while_converting() {
        let root = TempDir::new().unwrap();
        let dirs = setup(root.path());
        write_marc(&dirs.source.join("a.mrc"), &["1", "2"]);
        let backend = MemoryBackend::new().rejecting(["2"]);
        let importer = RecordImporter::new(
            Box::new(backend.clone()),
            &dirs.error_xml,
            XmlOptions::default(),
        );
        let modifier: Arc<dyn RecordModifier> =
            Arc::new(RepositoryCodeModifier::new(Some("XYZ".to_string()), false));

        let stage = ConvertStage::new(
            &ImporterConfig::default(),
            dirs.clone(),
            Some(modifier),
            Arc::new(NoopObserver),
        )
        .unwrap();
        let report = stage.run(Some(importer));

        let load = report.load.unwrap();
        assert_eq!(load.count(ImportOutcome::New), 1);
        assert_eq!(load.count(ImportOutcome::Invalid), 1);
        assert!(backend.contains("1"));
        assert_eq!(backend.commit_count(), 1);
        assert_eq!(backend.optimize_count(), 1);
        assert_eq!(ids_in(&dirs.error_xml.join("error_records_in_a.xml")), vec!["2"]);
    }

    #[test]
    fn test_modifier_failure_sinks_record_without_importer() {
        let root = TempDir::new().unwrap();
        let dirs = setup(root.path());
        write_marc(&dirs.source.join("a.mrc"), &["1", " ", "3"]);
        let modifier: Arc<dyn RecordModifier> = Arc::new(RepositoryCodeModifier::default());

        let stage = ConvertStage::new(
            &ImporterConfig::default(),
            dirs.clone(),
            Some(modifier),
            Arc::new(NoopObserver),
        )
        .unwrap();
        let report = stage.run(None);

        assert_eq!(report.statistics.records_processed, 2);
        assert_eq!(report.statistics.count(ImportOutcome::Invalid), 1);
        assert_eq!(ids_in(&root.path().join("xml/a.xml")), vec!["1", "3"]);
        assert!(dirs.error_xml.join("error_records_in_a.xml").exists());
    }

    #[test]
    fn test_corrupt_input_is_moved_to_error_dir() {
        let root = TempDir::new().unwrap();
        let dirs = setup(root.path());
        let mut bytes = encode_record(&record("1"));
        bytes.extend_from_slice(b"99999garbage");
        std::fs::write(dirs.source.join("bad.mrc"), bytes).unwrap();
        let events = Arc::new(EventBuffer::new());

        let stage = ConvertStage::new(
            &ImporterConfig::default(),
            dirs.clone(),
            None,
            events.clone(),
        )
        .unwrap();
        let report = stage.run(None);

        assert_eq!(report.statistics.files_failed, 1);
        assert!(dirs.error.join("bad.mrc").exists());
        assert!(!dirs.success.join("bad.mrc").exists());
        assert!(!root.path().join("xml/bad.xml").exists());
        assert!(events.take().iter().any(|e| matches!(
            e,
            PipelineEvent::FileFailed { last_record: Some(id), .. } if id == "1"
        )));
    }

    #[test]
    fn test_pooled_conversion_reports_in_file_order() {
        let root = TempDir::new().unwrap();
        let dirs = setup(root.path());
        for name in ["f10", "f2", "f1"] {
            write_marc(&dirs.source.join(format!("{}.mrc", name)), &["1"]);
        }
        let events = Arc::new(EventBuffer::new());
        let config = ImporterConfig {
            worker_count: 3,
            ..ImporterConfig::default()
        };

        let stage = ConvertStage::new(&config, dirs.clone(), None, events.clone()).unwrap();
        let report = stage.run(None);

        assert_eq!(report.statistics.files_total, 3);
        let started: Vec<String> = events
            .take()
            .into_iter()
            .filter_map(|e| match e {
                PipelineEvent::FileStarted { file, .. } => Some(file),
                _ => None,
            })
            .collect();
        assert_eq!(started, vec!["f1.mrc", "f2.mrc", "f10.mrc"]);
    }
}
