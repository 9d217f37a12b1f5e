//! Per-test results of one test invocation.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Result of a single test id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    /// Errored, or expected but never run.
    Error,
}

impl TestStatus {
    fn severity(self) -> u8 {
        match self {
            Self::Passed => 0,
            Self::Failed => 1,
            Self::Error => 2,
        }
    }

    /// Map a framework status word to a status.
    pub fn from_word(word: &str) -> Option<Self> {
        match word {
            "PASSED" | "SKIPPED" | "XFAIL" | "XPASS" | "ok" | "skipped" | "expected failure" => {
                Some(Self::Passed)
            }
            "FAILED" | "FAIL" | "F" | "unexpected success" => Some(Self::Failed),
            "ERROR" | "E" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Mapping from test id to status, built fresh for every record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    results: BTreeMap<String, TestStatus>,
}

/// Per-status counts of an outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub passed: usize,
    pub failed: usize,
    pub error: usize,
}

impl TestOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a result. When an id is reported twice the worse status wins.
    pub fn record(&mut self, id: impl Into<String>, status: TestStatus) {
        self.results
            .entry(id.into())
            .and_modify(|existing| {
                if status.severity() > existing.severity() {
                    *existing = status;
                }
            })
            .or_insert(status);
    }

    pub fn get(&self, id: &str) -> Option<TestStatus> {
        self.results.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, TestStatus)> {
        self.results.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Merge another outcome into this one, worse status winning.
    pub fn merge(&mut self, other: TestOutcome) {
        for (id, status) in other.results {
            self.record(id, status);
        }
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for status in self.results.values() {
            match status {
                TestStatus::Passed => counts.passed += 1,
                TestStatus::Failed => counts.failed += 1,
                TestStatus::Error => counts.error += 1,
            }
        }
        counts
    }
}

impl FromIterator<(String, TestStatus)> for TestOutcome {
    fn from_iter<I: IntoIterator<Item = (String, TestStatus)>>(iter: I) -> Self {
        let mut outcome = Self::new();
        for (id, status) in iter {
            outcome.record(id, status);
        }
        outcome
    }
}
