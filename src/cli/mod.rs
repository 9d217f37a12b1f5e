//! Command-line interface for swe-eval.
//!
//! Provides commands for end-to-end evaluation, workspace checkout, dataset
//! inspection and line-diff scoring.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
