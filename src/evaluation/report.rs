//! Rendering a [`RunSummary`] for humans or machines.

use std::fmt::Write;

use super::summary::RunSummary;

/// Output format of the final report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

/// Render in the given format.
pub fn render(summary: &RunSummary, format: ReportFormat) -> serde_json::Result<String> {
    match format {
        ReportFormat::Text => Ok(render_text(summary)),
        ReportFormat::Json => render_json(summary),
    }
}

pub fn render_json(summary: &RunSummary) -> serde_json::Result<String> {
    serde_json::to_string_pretty(summary)
}

/// Plain-text table: aggregate counts, then one line per record.
pub fn render_text(summary: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== SWE Evaluation Results ===");
    let _ = writeln!(out, "Run id:      {}", summary.run_id);
    let _ = writeln!(out, "Started:     {}", summary.started_at.to_rfc3339());
    if let Some(finished) = summary.finished_at {
        let _ = writeln!(out, "Finished:    {}", finished.to_rfc3339());
    }
    let _ = writeln!(out, "Total:       {}", summary.total());
    let _ = writeln!(out, "Resolved:    {}", summary.counts.resolved);
    let _ = writeln!(out, "Unresolved:  {}", summary.counts.unresolved);
    let _ = writeln!(out, "Error:       {}", summary.counts.error);
    let _ = writeln!(out, "Resolve rate: {:.1}%", summary.resolve_rate() * 100.0);
    if summary.cancelled {
        let _ = writeln!(out, "Cancelled before all records were dispatched");
    }

    if summary.reports.is_empty() {
        return out;
    }

    let width = summary
        .reports
        .iter()
        .map(|r| r.instance_id.len())
        .max()
        .unwrap_or(0)
        .max("INSTANCE".len());
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{:<width$}  {:<10}  {:<10}  {:>6}  {:>6}  {:>6}  {:>8}",
        "INSTANCE", "VERDICT", "STEP", "PASS", "FAIL", "ERR", "TIME",
    );
    for r in &summary.reports {
        let step = r.step.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:<width$}  {:<10}  {:<10}  {:>6}  {:>6}  {:>6}  {:>7.1}s",
            r.instance_id,
            r.verdict.to_string(),
            step,
            r.tests.passed,
            r.tests.failed,
            r.tests.error,
            r.duration_secs,
        );
        if let Some(err) = &r.error {
            let _ = writeln!(out, "    error: {err}");
        }
        if !r.missing_tests.is_empty() {
            let _ = writeln!(
                out,
                "    missing: {} gold test(s) never ran ({})",
                r.missing_tests.len(),
                r.missing_tests
                    .iter()
                    .take(3)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::BenchmarkRecord;
    use crate::error::{CheckoutError, RecordError};
    use crate::evaluation::summary::RecordReport;
    use std::time::Duration;

    fn summary() -> RunSummary {
        let mut summary = RunSummary::new();
        let record = BenchmarkRecord::new("psf__requests-1142", "psf/requests", "abc", "");
        let err = RecordError::Checkout(CheckoutError::CommitNotFound {
            repo: "psf/requests".to_string(),
            commit: "abc".to_string(),
        });
        summary.record(RecordReport::failed(0, &record, &err, Duration::from_secs(2)));
        summary.finish();
        summary
    }

    #[test]
    fn test_text_report_lists_every_record() {
        let text = render_text(&summary());
        assert!(text.contains("Total:       1"));
        assert!(text.contains("Error:       1"));
        assert!(text.contains("psf__requests-1142"));
        assert!(text.contains("checkout"));
        assert!(text.contains("error: Commit abc not found"));
    }

    #[test]
    fn test_empty_report() {
        let text = render_text(&RunSummary::new());
        assert!(text.contains("Total:       0"));
        assert!(!text.contains("INSTANCE"));
    }

    #[test]
    fn test_json_report_round_trips() {
        let s = summary();
        let json = render(&s, ReportFormat::Json).unwrap();
        let back: RunSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
