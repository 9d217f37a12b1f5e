//! Per-record reports and the run summary.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Evaluation, RecordVerdict};
use crate::dataset::BenchmarkRecord;
use crate::error::{RecordError, Step};
use crate::runner::{StatusCounts, TestRun};

/// Outcome of one record, as listed in the final report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordReport {
    /// Position of the record in the evaluated sequence.
    pub position: usize,
    pub instance_id: String,
    pub repo: String,
    pub verdict: RecordVerdict,
    /// Step at which the record stopped, for harness errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<Step>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub tests: StatusCounts,
    /// Gold ids never observed in the test output.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_tests: Vec<String>,
    pub duration_secs: f64,
}

impl RecordReport {
    /// Report for a record whose tests ran to completion or timed out.
    pub fn evaluated(
        position: usize,
        record: &BenchmarkRecord,
        evaluation: Evaluation,
        run: &TestRun,
        duration: Duration,
    ) -> Self {
        let error = run
            .timed_out
            .then(|| "test command timed out".to_string());
        Self {
            position,
            instance_id: record.instance_id.clone(),
            repo: record.repo.clone(),
            verdict: evaluation.verdict,
            step: (evaluation.verdict == RecordVerdict::Error).then_some(Step::Test),
            error,
            timed_out: run.timed_out,
            tests: run.outcome.counts(),
            missing_tests: evaluation.missing.into_iter().collect(),
            duration_secs: duration.as_secs_f64(),
        }
    }

    /// Error report for a record that could not be evaluated.
    pub fn failed(
        position: usize,
        record: &BenchmarkRecord,
        error: &RecordError,
        duration: Duration,
    ) -> Self {
        Self {
            position,
            instance_id: record.instance_id.clone(),
            repo: record.repo.clone(),
            verdict: RecordVerdict::Error,
            step: Some(error.step()),
            error: Some(error.to_string()),
            timed_out: false,
            tests: StatusCounts::default(),
            missing_tests: Vec::new(),
            duration_secs: duration.as_secs_f64(),
        }
    }

    /// Error report for a record whose worker died before reporting it.
    pub fn aborted(position: usize, instance_id: String, repo: &str, reason: &str) -> Self {
        Self {
            position,
            instance_id,
            repo: repo.to_string(),
            verdict: RecordVerdict::Error,
            step: None,
            error: Some(reason.to_string()),
            timed_out: false,
            tests: StatusCounts::default(),
            missing_tests: Vec::new(),
            duration_secs: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictCounts {
    pub resolved: usize,
    pub unresolved: usize,
    pub error: usize,
}

impl VerdictCounts {
    pub fn total(&self) -> usize {
        self.resolved + self.unresolved + self.error
    }
}

/// Aggregate of a run. Reports are only ever appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Dispatch stopped early on a cancellation request.
    #[serde(default)]
    pub cancelled: bool,
    pub counts: VerdictCounts,
    pub reports: Vec<RecordReport>,
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}

impl RunSummary {
    pub fn new() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            cancelled: false,
            counts: VerdictCounts::default(),
            reports: Vec::new(),
        }
    }

    /// Append a finished record.
    pub fn record(&mut self, report: RecordReport) {
        match report.verdict {
            RecordVerdict::Resolved => self.counts.resolved += 1,
            RecordVerdict::Unresolved => self.counts.unresolved += 1,
            RecordVerdict::Error => self.counts.error += 1,
        }
        self.reports.push(report);
    }

    /// Stamp the finish time and put reports back in record order.
    pub fn finish(&mut self) {
        self.reports.sort_by_key(|r| r.position);
        self.finished_at = Some(Utc::now());
    }

    pub fn total(&self) -> usize {
        self.reports.len()
    }

    /// Fraction of records resolved, 0 for an empty run.
    pub fn resolve_rate(&self) -> f64 {
        if self.reports.is_empty() {
            0.0
        } else {
            self.counts.resolved as f64 / self.reports.len() as f64
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CheckoutError;
    use crate::runner::TestStatus;
    use std::collections::BTreeSet;

    fn record(id: &str) -> BenchmarkRecord {
        BenchmarkRecord::new(id, "o/r", "abc", "")
    }

    fn test_run(timed_out: bool) -> TestRun {
        TestRun {
            outcome: [("t".to_string(), TestStatus::Passed)].into_iter().collect(),
            timed_out,
            exit_code: Some(0),
            duration: Duration::from_secs(1),
            log_tail: String::new(),
        }
    }

    #[test]
    fn test_counts_sum_to_records() {
        let mut summary = RunSummary::new();
        let verdicts = [
            RecordVerdict::Resolved,
            RecordVerdict::Error,
            RecordVerdict::Unresolved,
            RecordVerdict::Resolved,
        ];
        for (i, verdict) in verdicts.iter().enumerate() {
            let evaluation = Evaluation {
                verdict: *verdict,
                missing: BTreeSet::new(),
            };
            summary.record(RecordReport::evaluated(
                i,
                &record(&format!("r{i}")),
                evaluation,
                &test_run(false),
                Duration::ZERO,
            ));
        }
        assert_eq!(summary.counts.total(), summary.total());
        assert_eq!(summary.counts.resolved, 2);
        assert_eq!(summary.counts.unresolved, 1);
        assert_eq!(summary.counts.error, 1);
        assert_eq!(summary.resolve_rate(), 0.5);
    }

    #[test]
    fn test_failed_report_carries_step() {
        let err = RecordError::Checkout(CheckoutError::CommitNotFound {
            repo: "o/r".to_string(),
            commit: "abc".to_string(),
        });
        let report = RecordReport::failed(0, &record("x"), &err, Duration::from_millis(5));
        assert_eq!(report.verdict, RecordVerdict::Error);
        assert_eq!(report.step, Some(Step::Checkout));
        assert!(report.error.as_deref().unwrap_or("").contains("abc"));
    }

    #[test]
    fn test_timed_out_report() {
        let evaluation = Evaluation {
            verdict: RecordVerdict::Unresolved,
            missing: BTreeSet::new(),
        };
        let report = RecordReport::evaluated(0, &record("x"), evaluation, &test_run(true), Duration::ZERO);
        assert!(report.timed_out);
        assert!(report.step.is_none());
        assert_eq!(report.tests.passed, 1);
    }

    #[test]
    fn test_finish_restores_order() {
        let mut summary = RunSummary::new();
        let err = RecordError::MissingPrediction("x".to_string());
        for pos in [2usize, 0, 1] {
            summary.record(RecordReport::failed(pos, &record(&format!("r{pos}")), &err, Duration::ZERO));
        }
        assert!(!summary.is_finished());
        summary.finish();
        let ids: Vec<&str> = summary.reports.iter().map(|r| r.instance_id.as_str()).collect();
        assert_eq!(ids, vec!["r0", "r1", "r2"]);
        assert!(summary.finished_at.unwrap() >= summary.started_at);
    }

    #[test]
    fn test_summary_json_shape() {
        let mut summary = RunSummary::new();
        let err = RecordError::MissingPrediction("x".to_string());
        summary.record(RecordReport::failed(0, &record("x"), &err, Duration::ZERO));
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["counts"]["error"], 1);
        assert_eq!(json["reports"][0]["verdict"], "error");
        assert_eq!(json["reports"][0]["step"], "patch");
        assert!(uuid::Uuid::parse_str(json["run_id"].as_str().unwrap()).is_ok());
    }
}
