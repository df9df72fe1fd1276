//! Shared test utilities for bibflow integration tests.
//!
//! This module provides:
//! - `TestHarness` for running the pipeline against isolated temp directories
//! - Builders for configurations and MARC records

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
