//! Outcome Aggregator: per-record verdicts and run-level summaries.
//!
//! [`evaluate`] is a pure function of the gold labels and the observed
//! outcome. A gold id that never appears in the outcome means the harness
//! could not judge the record, and yields [`RecordVerdict::Error`] before any
//! pass/fail comparison is made.

pub mod report;
pub mod summary;

pub use report::{render, render_json, render_text, ReportFormat};
pub use summary::{RecordReport, RunSummary, VerdictCounts};

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dataset::{BenchmarkRecord, EvaluationLabels};
use crate::error::DatasetError;
use crate::runner::{TestOutcome, TestStatus};

/// Classification of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordVerdict {
    Resolved,
    Unresolved,
    Error,
}

impl fmt::Display for RecordVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved => write!(f, "resolved"),
            Self::Unresolved => write!(f, "unresolved"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Verdict plus the gold ids that were never observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub verdict: RecordVerdict,
    pub missing: BTreeSet<String>,
}

/// Compare an outcome against the gold test lists.
pub fn evaluate(labels: &EvaluationLabels, outcome: &TestOutcome) -> Evaluation {
    let missing: BTreeSet<String> = labels
        .all_test_ids()
        .into_iter()
        .filter(|id| outcome.get(id).is_none())
        .collect();
    if !missing.is_empty() {
        return Evaluation {
            verdict: RecordVerdict::Error,
            missing,
        };
    }

    let passing = labels
        .passed_tests
        .iter()
        .all(|id| outcome.get(id) == Some(TestStatus::Passed));
    let still_failing = labels
        .failed_tests
        .iter()
        .all(|id| matches!(outcome.get(id), Some(TestStatus::Failed | TestStatus::Error)));

    let verdict = if passing && still_failing {
        RecordVerdict::Resolved
    } else {
        RecordVerdict::Unresolved
    };
    Evaluation { verdict, missing }
}

/// [`evaluate`] on a record's own labels. Training records have none.
pub fn evaluate_record(
    record: &BenchmarkRecord,
    outcome: &TestOutcome,
) -> Result<Evaluation, DatasetError> {
    Ok(evaluate(record.labels()?, outcome))
}
