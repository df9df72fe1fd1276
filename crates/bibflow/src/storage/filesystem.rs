use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Move a file from `src` to `dst`. Uses `rename` first (fast, atomic on same
/// filesystem). Falls back to copy + delete when rename fails, which covers
/// cross-device moves.
fn move_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    std::fs::copy(src, dst).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    std::fs::remove_file(src).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

pub fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

pub fn remove_file(path: &Path) -> Result<(), StorageError> {
    std::fs::remove_file(path).map_err(|e| StorageError::DeleteFile {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Final path component as an owned string.
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `name.mrc` becomes `name.xml`; names without an extension get one.
pub fn xml_file_name(input: &str) -> String {
    match input.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => format!("{}.xml", stem),
        _ => format!("{}.xml", input),
    }
}

/// Whether two paths name the same directory, however they are spelled.
/// Paths that cannot be resolved are compared as written.
pub fn same_directory(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Moves `src` to `dst`, replacing whatever is already at `dst`.
///
/// On failure the source is left where it was so the next run picks it up.
pub fn relocate_to(src: &Path, dst: &Path) -> Result<(), StorageError> {
    if dst.exists() {
        remove_file(dst)?;
        log::info!("Deleted {} before relocation", dst.display());
    }
    move_file(src, dst)
}

/// Moves `src` into `dir`, keeping its file name.
pub fn relocate(src: &Path, dir: &Path) -> Result<PathBuf, StorageError> {
    let dst = dir.join(src.file_name().unwrap_or_default());
    relocate_to(src, &dst)?;
    Ok(dst)
}

/// Output that only appears under its final name once fully written.
///
/// Content goes to `<target>.part`; `commit` renames it into place. Dropping
/// an uncommitted `StagedFile` removes the part file.
#[derive(Debug)]
pub struct StagedFile {
    part: PathBuf,
    target: PathBuf,
    armed: bool,
}

impl StagedFile {
    pub fn create(target: PathBuf) -> Result<(Self, File), StorageError> {
        let mut part = target.clone().into_os_string();
        part.push(".part");
        let part = PathBuf::from(part);

        let file = File::create(&part).map_err(|e| StorageError::WriteFile {
            path: part.clone(),
            source: e,
        })?;
        Ok((
            Self {
                part,
                target,
                armed: true,
            },
            file,
        ))
    }

    pub fn part_path(&self) -> &Path {
        &self.part
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Renames the finished part file to its target name.
    pub fn commit(mut self) -> Result<PathBuf, StorageError> {
        relocate_to(&self.part, &self.target)?;
        self.armed = false;
        Ok(self.target.clone())
    }

    /// Moves the incomplete output to `dir` under `name` for inspection.
    pub fn quarantine(mut self, dir: &Path, name: &str) -> Result<PathBuf, StorageError> {
        let dst = dir.join(name);
        relocate_to(&self.part, &dst)?;
        self.armed = false;
        Ok(dst)
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.armed && self.part.exists() {
            if let Err(e) = std::fs::remove_file(&self.part) {
                log::warn!(
                    "Failed to remove staged file {}: {}",
                    self.part.display(),
                    e
                );
            }
        }
    }
}
