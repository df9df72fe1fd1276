//! Per-file and per-stage counters.
//!
//! Each file produces its own [`StageStatistics`]; the stage driver folds
//! them together with [`StageStatistics::merge`]. Merging is a field-wise
//! sum, so the result does not depend on the order files finished in.

use std::collections::BTreeMap;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::time::Duration;

use serde::Serialize;

use crate::backend::ImportOutcome;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageStatistics {
    pub files_total: u64,
    pub files_failed: u64,
    /// Files rejected by the well-formedness gate.
    pub invalid_files: u64,
    /// Records converted or transformed.
    pub records_processed: u64,
    outcomes: BTreeMap<ImportOutcome, u64>,
    pub check_time: Duration,
    pub import_time: Duration,
}

impl StageStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statistics for a single file that has been opened for processing.
    pub fn for_file() -> Self {
        Self {
            files_total: 1,
            ..Self::default()
        }
    }

    pub fn mark_failed(&mut self) {
        self.files_failed = self.files_total.max(1);
    }

    pub fn mark_invalid_file(&mut self) {
        self.mark_failed();
        self.invalid_files += 1;
    }

    pub fn record_processed(&mut self) {
        self.records_processed += 1;
    }

    pub fn record_outcome(&mut self, outcome: ImportOutcome) {
        *self.outcomes.entry(outcome).or_insert(0) += 1;
    }

    pub fn add_timing(&mut self, check: Duration, import: Duration) {
        self.check_time += check;
        self.import_time += import;
    }

    pub fn count(&self, outcome: ImportOutcome) -> u64 {
        self.outcomes.get(&outcome).copied().unwrap_or(0)
    }

    pub fn records_imported(&self) -> u64 {
        self.outcomes.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn merge(&mut self, other: &StageStatistics) {
        self.files_total += other.files_total;
        self.files_failed += other.files_failed;
        self.invalid_files += other.invalid_files;
        self.records_processed += other.records_processed;
        for (outcome, count) in &other.outcomes {
            *self.outcomes.entry(*outcome).or_insert(0) += count;
        }
        self.check_time += other.check_time;
        self.import_time += other.import_time;
    }

    /// Summary line for one input file.
    pub fn describe(&self, file_name: &str) -> String {
        format!("{}: {}", file_name, self)
    }
}

impl fmt::Display for StageStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "files: {}, failed: {}, invalid files: {}, records: {}",
            self.files_total, self.files_failed, self.invalid_files, self.records_processed
        )?;
        if !self.outcomes.is_empty() {
            for outcome in ImportOutcome::ALL {
                write!(f, ", {}: {}", outcome, self.count(outcome))?;
            }
            write!(
                f,
                ", check time: {:.3}s, import time: {:.3}s",
                self.check_time.as_secs_f64(),
                self.import_time.as_secs_f64()
            )?;
        }
        Ok(())
    }
}

impl AddAssign<&StageStatistics> for StageStatistics {
    fn add_assign(&mut self, rhs: &StageStatistics) {
        self.merge(rhs);
    }
}

impl AddAssign for StageStatistics {
    fn add_assign(&mut self, rhs: StageStatistics) {
        self.merge(&rhs);
    }
}

impl Add for StageStatistics {
    type Output = StageStatistics;

    fn add(mut self, rhs: StageStatistics) -> StageStatistics {
        self.merge(&rhs);
        self
    }
}

impl Sum for StageStatistics {
    fn sum<I: Iterator<Item = StageStatistics>>(iter: I) -> Self {
        iter.fold(StageStatistics::default(), Add::add)
    }
}

/// Statistics of every stage that ran.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStatistics {
    pub conversion: Option<StageStatistics>,
    pub modification: Option<StageStatistics>,
    pub load: Option<StageStatistics>,
}
