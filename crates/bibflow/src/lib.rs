pub mod backend;
pub mod checker;
pub mod codec;
pub mod config;
pub mod error;
pub mod modifier;
pub mod pipeline;
pub mod storage;
pub mod worker;

pub use backend::{BackendFactory, ImportOutcome, RecordImporter, StorageBackend, StorageKind};
pub use codec::{MarcReader, MarcXmlReader, MarcXmlWriter, Record};
pub use config::{load_config, ImporterConfig};
pub use error::{
    BackendError, CodecError, ConfigError, ImporterError, Result, StorageError, WorkerError,
};
pub use modifier::{ModifyError, RecordModifier, RepositoryCodeModifier};
pub use pipeline::{Pipeline, PipelineEvent, PipelineObserver, PipelineStatistics, Stage, StageStatistics};
