pub mod convert;
pub mod error;
pub mod layout;
pub mod load;
pub mod modify;
pub mod orchestrator;
mod output;
pub mod progress;
pub mod stage;
pub mod stats;

pub use convert::{ConvertReport, ConvertStage};
pub use error::FileError;
pub use layout::{remove_temporary_directory, DirectoryLayout, StageDirectories, StagePlan};
pub use load::LoadStage;
pub use modify::ModifyStage;
pub use orchestrator::Pipeline;
pub use progress::{EventBuffer, LogObserver, NoopObserver, PipelineEvent, PipelineObserver};
pub use stage::{Disposition, FileState, FileTask, Stage};
pub use stats::{PipelineStatistics, StageStatistics};
