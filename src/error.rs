//! Error types for swe-eval operations.
//!
//! Defines error types for each stage of the evaluation pipeline:
//! - Dataset loading and record field access
//! - Workspace clone and checkout
//! - Patch application
//! - Test execution and convention lookup
//! - Per-record failures, tagged with the step that failed

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while reading the benchmark dataset.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Dataset format error in '{path}': {reason}")]
    Format { path: String, reason: String },

    #[error("Missing required column '{column}' for the {subset} subset in '{path}'")]
    MissingColumn {
        path: String,
        column: String,
        subset: String,
    },

    #[error("Instance '{instance_id}' has no evaluation fields (training subset record)")]
    SubsetMismatch { instance_id: String },

    #[error("Repository '{repo}' not found in dataset. Available: {available}")]
    UnknownRepository { repo: String, available: String },

    #[error("Invalid predictions file '{path}': {reason}")]
    Predictions { path: String, reason: String },

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while preparing a repository checkout.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("Invalid repository identifier '{repo}': {reason}")]
    InvalidRepo { repo: String, reason: String },

    #[error("Invalid commit ref '{commit}': {reason}")]
    InvalidCommit { commit: String, reason: String },

    #[error("Failed to clone {repo}: {stderr}")]
    CloneFailed { repo: String, stderr: String },

    #[error("Commit {commit} not found in {repo} (history may be truncated by a shallow clone)")]
    CommitNotFound { repo: String, commit: String },

    #[error("git {command} failed in {repo}: {stderr}")]
    GitFailed {
        repo: String,
        command: String,
        stderr: String,
    },

    #[error("HEAD of {repo} is {actual} after checkout, expected {expected}")]
    HeadMismatch {
        repo: String,
        expected: String,
        actual: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while applying a diff to a workspace.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("Patch rejected for {} file(s) [{}]: {}", .files.len(), .files.join(", "), .stderr)]
    Rejected { files: Vec<String>, stderr: String },

    #[error("git apply failed: {0}")]
    GitFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while invoking a repository's test command.
#[derive(Debug, Error)]
pub enum TestRunError {
    #[error("No test convention registered for repository '{0}'")]
    UnsupportedRepository(String),

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed waiting for test process: {0}")]
    Wait(#[from] std::io::Error),
}

/// Errors that can occur while loading test convention overrides.
#[derive(Debug, Error)]
pub enum ConventionError {
    #[error("Invalid convention for '{repo}': {reason}")]
    Invalid { repo: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Pipeline step a per-record failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Dataset,
    Checkout,
    TestPatch,
    Patch,
    Test,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dataset => write!(f, "dataset"),
            Self::Checkout => write!(f, "checkout"),
            Self::TestPatch => write!(f, "test_patch"),
            Self::Patch => write!(f, "patch"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// A failure confined to a single record. Recorded as an `error` verdict.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    Subset(DatasetError),

    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error("test_patch: {0}")]
    TestPatch(ApplyError),

    #[error("patch: {0}")]
    Patch(ApplyError),

    #[error("No candidate patch for instance '{0}'")]
    MissingPrediction(String),

    #[error(transparent)]
    Test(#[from] TestRunError),
}

impl RecordError {
    /// The step at which this record stopped.
    pub fn step(&self) -> Step {
        match self {
            Self::Subset(_) => Step::Dataset,
            Self::Checkout(_) => Step::Checkout,
            Self::TestPatch(_) => Step::TestPatch,
            Self::Patch(_) | Self::MissingPrediction(_) => Step::Patch,
            Self::Test(_) => Step::Test,
        }
    }
}
