//! MARCXML output of one input file, optionally split into chunks.
//!
//! Every chunk is written through a [`StagedFile`], so nothing appears under
//! a final name until [`StagedOutput::commit`] runs.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::codec::{MarcXmlWriter, Record, XmlOptions};
use crate::error::StorageError;
use crate::storage::StagedFile;

struct OpenChunk {
    staged: StagedFile,
    writer: MarcXmlWriter<BufWriter<File>>,
}

pub(crate) struct StagedOutput {
    dir: PathBuf,
    stem: String,
    split_size: usize,
    options: XmlOptions,
    current: Option<OpenChunk>,
    closed: Vec<StagedFile>,
    chunks: usize,
}

fn write_error(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::WriteFile {
        path: path.to_path_buf(),
        source,
    }
}

impl StagedOutput {
    /// `file_name` is the name of the (unsplit) output, e.g. `batch.xml`.
    pub fn new(dir: &Path, file_name: &str, split_size: usize, options: XmlOptions) -> Self {
        let stem = file_name
            .strip_suffix(".xml")
            .unwrap_or(file_name)
            .to_string();
        Self {
            dir: dir.to_path_buf(),
            stem,
            split_size,
            options,
            current: None,
            closed: Vec::new(),
            chunks: 0,
        }
    }

    fn chunk_name(&self, chunk: usize) -> String {
        if self.split_size == 0 {
            format!("{}.xml", self.stem)
        } else {
            format!("{}_{}.xml", self.stem, chunk)
        }
    }

    fn open_chunk(&mut self) -> Result<(), StorageError> {
        self.chunks += 1;
        let target = self.dir.join(self.chunk_name(self.chunks));
        let (staged, file) = StagedFile::create(target)?;
        let writer = MarcXmlWriter::new(BufWriter::new(file), self.options)
            .map_err(write_error(staged.part_path()))?;
        self.current = Some(OpenChunk { staged, writer });
        Ok(())
    }

    fn close_chunk(&mut self) -> Result<(), StorageError> {
        if let Some(OpenChunk { staged, writer }) = self.current.take() {
            let result = writer.finish().map_err(write_error(staged.part_path()));
            self.closed.push(staged);
            result?;
        }
        Ok(())
    }

    pub fn write(&mut self, record: &Record) -> Result<(), StorageError> {
        let full = self
            .current
            .as_ref()
            .map(|c| self.split_size > 0 && c.writer.records_written() >= self.split_size)
            .unwrap_or(false);
        if full {
            self.close_chunk()?;
        }
        if self.current.is_none() {
            self.open_chunk()?;
        }
        match self.current.as_mut() {
            Some(chunk) => chunk
                .writer
                .write_record(record)
                .map_err(write_error(chunk.staged.part_path())),
            None => Ok(()),
        }
    }

    /// Closes the last chunk and renames every chunk into place. An input
    /// without records still yields one empty collection.
    pub fn commit(mut self) -> Result<Vec<PathBuf>, StorageError> {
        if self.chunks == 0 {
            self.open_chunk()?;
        }
        self.close_chunk()?;
        std::mem::take(&mut self.closed)
            .into_iter()
            .map(StagedFile::commit)
            .collect()
    }

    /// Moves whatever was written to `dir`, naming each chunk with `rename`.
    pub fn quarantine(
        mut self,
        dir: &Path,
        rename: impl Fn(&str) -> String,
    ) -> Vec<Result<PathBuf, StorageError>> {
        if let Err(e) = self.close_chunk() {
            log::warn!("Failed to close partial output: {}", e);
        }
        std::mem::take(&mut self.closed)
            .into_iter()
            .map(|staged| {
                let name = rename(&crate::storage::filesystem::file_name(staged.target()));
                staged.quarantine(dir, &name)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MarcXmlReader;
    use tempfile::TempDir;

    const LEADER: &str = "00000nam a2200000 a 4500";

    fn record(id: usize) -> Record {
        Record::new(LEADER).with_control_field("001", &id.to_string())
    }

    fn count(path: &Path) -> usize {
        MarcXmlReader::open(path).unwrap().count()
    }

    #[test]
    fn test_unsplit_output() {
        let dir = TempDir::new().unwrap();
        let mut output = StagedOutput::new(dir.path(), "batch.xml", 0, XmlOptions::default());
        for i in 0..3 {
            output.write(&record(i)).unwrap();
        }
        assert!(!dir.path().join("batch.xml").exists());

        let paths = output.commit().unwrap();
        assert_eq!(paths, vec![dir.path().join("batch.xml")]);
        assert_eq!(count(&paths[0]), 3);
    }

    #[test]
    fn test_split_output_names_chunks() {
        let dir = TempDir::new().unwrap();
        let mut output = StagedOutput::new(dir.path(), "batch.xml", 2, XmlOptions::default());
        for i in 0..5 {
            output.write(&record(i)).unwrap();
        }
        let paths = output.commit().unwrap();
        assert_eq!(
            paths,
            vec![
                dir.path().join("batch_1.xml"),
                dir.path().join("batch_2.xml"),
                dir.path().join("batch_3.xml"),
            ]
        );
        assert_eq!(count(&paths[2]), 1);
    }

    #[test]
    fn test_empty_input_still_produces_a_collection() {
        let dir = TempDir::new().unwrap();
        let output = StagedOutput::new(dir.path(), "empty.xml", 0, XmlOptions::default());
        let paths = output.commit().unwrap();
        assert_eq!(count(&paths[0]), 0);
    }

    #[test]
    fn test_quarantine_moves_partial_output() {
        let dir = TempDir::new().unwrap();
        let errors = dir.path().join("errors");
        std::fs::create_dir(&errors).unwrap();

        let mut output = StagedOutput::new(dir.path(), "batch.xml", 0, XmlOptions::default());
        output.write(&record(1)).unwrap();
        let moved = output.quarantine(&errors, |name| format!("partial_{}", name));

        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].as_ref().unwrap(), &errors.join("partial_batch.xml"));
        assert!(!dir.path().join("batch.xml").exists());
        assert!(!dir.path().join("batch.xml.part").exists());
    }
}
