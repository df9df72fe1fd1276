use std::path::{Path, PathBuf};

use log::{debug, info};
use walkdir::WalkDir;

use crate::error::StorageError;
use crate::worker::ordering::sort_paths;

/// Lists the top-level files of a stage's source directory that carry the
/// stage's extension, in processing order.
pub struct DirectoryScanner {
    directory: PathBuf,
    extension: &'static str,
}

impl DirectoryScanner {
    pub fn new<P: AsRef<Path>>(directory: P, extension: &'static str) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            extension,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(self.extension))
            .unwrap_or(false)
    }

    pub fn scan(&self) -> Result<Vec<PathBuf>, StorageError> {
        let mut files = Vec::new();

        for entry in WalkDir::new(&self.directory)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
        {
            let entry = entry.map_err(|e| StorageError::ReadDirectory {
                path: self.directory.clone(),
                source: e,
            })?;
            let path = entry.path();

            if !entry.file_type().is_file() {
                continue;
            }

            if self.matches(path) {
                debug!("Found {}", path.display());
                files.push(path.to_path_buf());
            }
        }

        sort_paths(&mut files);

        info!(
            "Scanned {} .{} files in {}",
            files.len(),
            self.extension,
            self.directory.display()
        );
        Ok(files)
    }
}
