use thiserror::Error;

use crate::checker::WellFormedError;
use crate::error::{BackendError, CodecError, StorageError};

/// Failure of a single input file. Caught at the file boundary and turned
/// into statistics plus relocation; never stops the stage.
#[derive(Error, Debug)]
pub enum FileError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    InvalidFile(#[from] WellFormedError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl FileError {
    pub fn is_invalid_file(&self) -> bool {
        matches!(self, FileError::InvalidFile(_))
    }

    /// Control number of the last record read before a codec failure.
    pub fn last_good_id(&self) -> Option<&str> {
        match self {
            FileError::Codec(e) => e.last_good_id(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_good_id_comes_from_codec_errors() {
        let err = FileError::from(CodecError::Parse {
            message: "bad record length".to_string(),
            last_good_id: Some("r5".to_string()),
            record_index: 6,
        });
        assert_eq!(err.last_good_id(), Some("r5"));
        assert!(!err.is_invalid_file());
        assert!(err.to_string().contains("r5"));

        let err = FileError::from(BackendError::LockPoisoned);
        assert_eq!(err.last_good_id(), None);
    }
}
