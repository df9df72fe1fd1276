pub mod bad_records;
pub mod filesystem;

pub use bad_records::{sink_file_name, BadRecordSink};
pub use filesystem::{ensure_directory, relocate, relocate_to, StagedFile};
