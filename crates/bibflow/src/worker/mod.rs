pub mod ordering;
pub mod pool;
pub mod scanner;

pub use ordering::{compare_names, sort_paths};
pub use pool::{run_ordered, WorkerPool};
pub use scanner::DirectoryScanner;
