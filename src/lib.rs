//! swe-eval: commit evaluation harness for the SWE-bench dataset.
//!
//! This library loads benchmark records, checks out each record's base
//! commit, applies the test and candidate patches, runs the repository's
//! tests and classifies the outcome against the gold test lists.

// Core modules
pub mod cli;
pub mod dataset;
pub mod error;
pub mod evaluation;
pub mod patch;
pub mod pipeline;
pub mod runner;
pub mod workspace;

// Re-export commonly used error types
pub use error::{
    ApplyError, CheckoutError, ConventionError, DatasetError, RecordError, Step, TestRunError,
};
