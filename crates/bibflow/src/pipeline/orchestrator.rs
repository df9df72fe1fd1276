use std::sync::Arc;

use tracing::info_span;
use uuid::Uuid;

use super::convert::ConvertStage;
use super::layout::{remove_temporary_directory, DirectoryLayout, StageDirectories, StagePlan};
use super::load::LoadStage;
use super::modify::ModifyStage;
use super::progress::{LogObserver, PipelineEvent, PipelineObserver};
use super::stage::Stage;
use super::stats::PipelineStatistics;
use crate::backend::{BackendFactory, RecordImporter};
use crate::config::ImporterConfig;
use crate::modifier::{RecordModifier, RepositoryCodeModifier};

/// Runs the enabled stages in order: convert, modify, load.
///
/// Stages of one run hand their output to the next through temporary
/// directories, which are removed at the end once drained.
pub struct Pipeline {
    config: Arc<ImporterConfig>,
    backends: Arc<dyn BackendFactory>,
    modifier: Arc<dyn RecordModifier>,
    observer: Arc<dyn PipelineObserver>,
}

impl Pipeline {
    pub fn from_config(config: ImporterConfig) -> Self {
        let backends = Arc::new(config.backends());
        let modifier = Arc::new(RepositoryCodeModifier::from_config(&config));
        let observer = Arc::new(LogObserver::new(config.log_detail));
        Self {
            config: Arc::new(config),
            backends,
            modifier,
            observer,
        }
    }

    pub fn with_backends(mut self, backends: impl BackendFactory + 'static) -> Self {
        self.backends = Arc::new(backends);
        self
    }

    pub fn with_modifier(mut self, modifier: impl RecordModifier + 'static) -> Self {
        self.modifier = Arc::new(modifier);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &ImporterConfig {
        &self.config
    }

    pub fn run(&self) -> PipelineStatistics {
        let mut statistics = PipelineStatistics::default();
        if !self.config.any_stage_enabled() {
            self.observer.report(PipelineEvent::UsageHint);
            return statistics;
        }

        let run_id = Uuid::new_v4();
        let _span = info_span!("pipeline", run_id = %run_id).entered();
        let plan = StagePlan::from_config(&self.config);
        log::debug!("Run {} with {:?}", run_id, plan);
        let layout = DirectoryLayout::new(&self.config, plan);

        if plan.convert {
            if let Some(dirs) = self.prepare(&layout, Stage::Convert) {
                let report = self.run_convert(plan, dirs);
                if plan.convert_drives_backend {
                    statistics.load = report.as_ref().and_then(|r| r.load.clone());
                }
                statistics.conversion = report.map(|r| r.statistics);
            }
        }

        if plan.modify {
            if let Some(dirs) = self.prepare(&layout, Stage::Modify) {
                let stage = ModifyStage::new(
                    &self.config,
                    dirs,
                    Arc::clone(&self.modifier),
                    Arc::clone(&self.observer),
                );
                statistics.modification = Some(stage.run());
            }
        }

        if plan.load {
            if let Some(dirs) = self.prepare(&layout, Stage::Load) {
                if let Some(importer) = self.open_importer(Stage::Load, &dirs) {
                    let stage = LoadStage::new(
                        &self.config,
                        dirs,
                        self.fused_modifier(plan),
                        Arc::clone(&self.observer),
                    );
                    statistics.load = Some(stage.run(importer));
                }
            }
        }

        for dir in layout.temporary_directories() {
            if let Err(e) = remove_temporary_directory(&dir) {
                self.observer.report(PipelineEvent::Warning {
                    stage: None,
                    message: e.to_string(),
                });
            }
        }
        statistics
    }

    fn run_convert(
        &self,
        plan: StagePlan,
        dirs: StageDirectories,
    ) -> Option<super::convert::ConvertReport> {
        let importer = if plan.convert_drives_backend {
            Some(self.open_importer(Stage::Convert, &dirs)?)
        } else {
            None
        };
        match ConvertStage::new(
            &self.config,
            dirs,
            self.fused_modifier(plan),
            Arc::clone(&self.observer),
        ) {
            Ok(stage) => Some(stage.run(importer)),
            Err(e) => {
                self.skip(Stage::Convert, e.to_string());
                None
            }
        }
    }

    fn fused_modifier(&self, plan: StagePlan) -> Option<Arc<dyn RecordModifier>> {
        plan.fuse_modifier.then(|| Arc::clone(&self.modifier))
    }

    /// Resolves and creates the stage's directories; a stage whose
    /// directories are unusable is skipped.
    fn prepare(&self, layout: &DirectoryLayout, stage: Stage) -> Option<StageDirectories> {
        let dirs = match layout.resolve(stage) {
            Ok(dirs) => dirs,
            Err(e) => {
                self.skip(stage, e.to_string());
                return None;
            }
        };
        if let Err(e) = dirs.prepare() {
            self.skip(stage, e.to_string());
            return None;
        }
        Some(dirs)
    }

    fn open_importer(&self, stage: Stage, dirs: &StageDirectories) -> Option<RecordImporter> {
        match self.backends.open() {
            Ok(backend) => Some(RecordImporter::new(
                backend,
                &dirs.error_xml,
                self.config.xml_options(),
            )),
            Err(e) => {
                self.skip(stage, format!("Cannot open the storage backend: {}", e));
                None
            }
        }
    }

    fn skip(&self, stage: Stage, reason: String) {
        self.observer
            .report(PipelineEvent::StageSkipped { stage, reason });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::pipeline::progress::EventBuffer;
    use tempfile::TempDir;

    #[test]
    fn test_no_stage_flags_only_hints() {
        let root = TempDir::new().unwrap();
        let config = ImporterConfig {
            source_dir: Some(root.path().join("marc")),
            ..ImporterConfig::default()
        };
        let events = Arc::new(EventBuffer::new());

        let stats = Pipeline::from_config(config)
            .with_observer(events.clone())
            .run();

        assert_eq!(stats, PipelineStatistics::default());
        assert_eq!(events.take(), vec![PipelineEvent::UsageHint]);
        assert!(!root.path().join("marc").exists());
    }

    #[test]
    fn test_missing_directories_skip_the_stage() {
        let events = Arc::new(EventBuffer::new());
        let config = ImporterConfig {
            need_load: true,
            ..ImporterConfig::default()
        };

        let stats = Pipeline::from_config(config)
            .with_backends(MemoryBackend::new())
            .with_observer(events.clone())
            .run();

        assert!(stats.load.is_none());
        assert!(matches!(
            events.take().as_slice(),
            [PipelineEvent::StageSkipped { stage: Stage::Load, .. }]
        ));
    }
}
