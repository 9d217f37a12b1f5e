//! Benchmark record types.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DatasetError;

/// Dataset subset. Only the `test` subset carries evaluation labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Subset {
    Train,
    Test,
}

impl Subset {
    /// Whether records of this subset must carry a test patch and gold tests.
    pub fn requires_labels(self) -> bool {
        matches!(self, Self::Test)
    }
}

impl fmt::Display for Subset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Train => write!(f, "train"),
            Self::Test => write!(f, "test"),
        }
    }
}

impl FromStr for Subset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "train" => Ok(Self::Train),
            "test" | "eval" | "evaluation" => Ok(Self::Test),
            other => Err(format!("unknown subset '{other}': expected 'train' or 'test'")),
        }
    }
}

/// Evaluation-only fields of a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationLabels {
    /// Diff touching only test files.
    pub test_patch: String,
    /// Test ids that must pass once `test_patch` and `patch` are applied.
    pub passed_tests: BTreeSet<String>,
    /// Test ids that must still fail (or be absent) once the fix is applied.
    pub failed_tests: BTreeSet<String>,
}

impl EvaluationLabels {
    /// Every gold test id, passing and failing.
    pub fn all_test_ids(&self) -> BTreeSet<String> {
        self.passed_tests
            .iter()
            .chain(self.failed_tests.iter())
            .cloned()
            .collect()
    }
}

/// One benchmark task instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    /// Unique identifier within the dataset.
    pub instance_id: String,
    /// Source repository in `owner/name` form.
    pub repo: String,
    /// Commit the evaluation starts from.
    pub base_commit: String,
    /// Gold (or candidate) solution diff.
    pub patch: String,
    /// Issue commentary, informational only.
    pub first_hints: Option<String>,
    pub problem_statement: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub version: Option<String>,
    /// Present only for records of the evaluation subset.
    pub labels: Option<EvaluationLabels>,
}

impl BenchmarkRecord {
    pub fn new(
        instance_id: impl Into<String>,
        repo: impl Into<String>,
        base_commit: impl Into<String>,
        patch: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            repo: repo.into(),
            base_commit: base_commit.into(),
            patch: patch.into(),
            first_hints: None,
            problem_statement: None,
            created_at: None,
            version: None,
            labels: None,
        }
    }

    pub fn with_labels(mut self, labels: EvaluationLabels) -> Self {
        self.labels = Some(labels);
        self
    }

    /// Evaluation labels, or `SubsetMismatch` for a training record.
    pub fn labels(&self) -> Result<&EvaluationLabels, DatasetError> {
        self.labels
            .as_ref()
            .ok_or_else(|| DatasetError::SubsetMismatch {
                instance_id: self.instance_id.clone(),
            })
    }
}
