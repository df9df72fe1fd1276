//! In-line record transform applied by the modify stage, or fused into
//! convert and load in production mode.

use thiserror::Error;

use crate::codec::Record;
use crate::config::ImporterConfig;

/// Control field carrying the organization code of the record's source.
const REPOSITORY_CODE_TAG: &str = "003";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModifyError {
    #[error("Record has no control number")]
    MissingControlNumber,

    #[error("Record {control_number} has a malformed leader '{leader}'")]
    MalformedLeader {
        control_number: String,
        leader: String,
    },
}

pub trait RecordModifier: Send + Sync {
    /// Transforms one record. An error marks the record invalid; it never
    /// fails the surrounding file.
    fn modify(&self, record: Record, is_deletion_feed: bool) -> Result<Record, ModifyError>;
}

/// Normalizes the repository code and the deletion status of each record.
#[derive(Debug, Clone, Default)]
pub struct RepositoryCodeModifier {
    default_code: Option<String>,
    ignore_existing: bool,
}

impl RepositoryCodeModifier {
    pub fn new(default_code: Option<String>, ignore_existing: bool) -> Self {
        Self {
            default_code: default_code.filter(|c| !c.trim().is_empty()),
            ignore_existing,
        }
    }

    pub fn from_config(config: &ImporterConfig) -> Self {
        Self::new(
            config.default_repository_code.clone(),
            config.ignore_repository_code,
        )
    }
}

impl RecordModifier for RepositoryCodeModifier {
    fn modify(&self, mut record: Record, is_deletion_feed: bool) -> Result<Record, ModifyError> {
        let control_number = match record.control_number().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(ModifyError::MissingControlNumber),
        };
        if !record.has_valid_leader() {
            return Err(ModifyError::MalformedLeader {
                control_number,
                leader: record.leader.clone(),
            });
        }

        if let Some(code) = &self.default_code {
            let has_code = record
                .control_field(REPOSITORY_CODE_TAG)
                .map(|c| !c.trim().is_empty())
                .unwrap_or(false);
            if self.ignore_existing || !has_code {
                record.set_control_field(REPOSITORY_CODE_TAG, code);
            }
        }

        if is_deletion_feed {
            record.set_status('d');
        }

        Ok(record)
    }
}
