//! Parsers for test framework output.
//!
//! Each parser reads the framework's own per-test result lines and records
//! only the ids it actually observes. Lines it does not recognize are
//! ignored.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::outcome::{TestOutcome, TestStatus};

/// Output format of a test command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// `pytest -rA` summary lines and `-v` node lines.
    Pytest,
    /// Django `runtests.py --verbosity 2`.
    Django,
    /// SymPy `bin/test --verbose`.
    Sympy,
}

static ANSI: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").unwrap());

static PYTEST_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(PASSED|FAILED|ERROR|SKIPPED|XFAIL|XPASS)\s+(\S.*)$").unwrap()
});
static PYTEST_VERBOSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+::\S.*?)\s+(PASSED|FAILED|ERROR|SKIPPED|XFAIL|XPASS)(?:\s+\[\s*\d+%\])?$")
        .unwrap()
});

static DJANGO_RESULT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\w+ \([\w.]+\))(?:\s.*)?\s\.\.\.\s(ok|FAIL|ERROR|skipped|expected failure|unexpected success)\b")
        .unwrap()
});
static DJANGO_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(FAIL|ERROR): (\w+ \([\w.]+\))").unwrap());
static DJANGO_ID_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w+ \([\w.]+\))$").unwrap());
static DJANGO_TRAILING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s\.\.\.\s(ok|FAIL|ERROR|skipped|expected failure|unexpected success)\b").unwrap()
});

static SYMPY_RESULT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(test_\w+)\s+(ok|F|E)$").unwrap());
static SYMPY_FAILURE_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^_{3,}\s+\S+:(test_\w+)\s+_{3,}$").unwrap());

/// Parse `log` in `format` into an outcome.
pub fn parse(format: LogFormat, log: &str) -> TestOutcome {
    let clean = ANSI.replace_all(log, "");
    match format {
        LogFormat::Pytest => parse_pytest(&clean),
        LogFormat::Django => parse_django(&clean),
        LogFormat::Sympy => parse_sympy(&clean),
    }
}

/// Node id of a `-rA` summary line body, without the ` - message` suffix.
///
/// Parametrize brackets may themselves contain ` - `, so the suffix is only
/// recognized outside them.
fn summary_node_id(rest: &str) -> &str {
    let bytes = rest.as_bytes();
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'[' => depth += 1,
            b']' => depth = depth.saturating_sub(1),
            b' ' if depth == 0 && rest[i..].starts_with(" - ") => return rest[..i].trim_end(),
            _ => {}
        }
    }
    rest.trim_end()
}

fn parse_pytest(log: &str) -> TestOutcome {
    let mut outcome = TestOutcome::new();
    for line in log.lines().map(str::trim) {
        if let Some(caps) = PYTEST_SUMMARY.captures(line) {
            let id = summary_node_id(&caps[2]);
            // `SKIPPED [1] path:line: reason` carries no node id.
            if id.starts_with('[') {
                continue;
            }
            if let Some(status) = TestStatus::from_word(&caps[1]) {
                outcome.record(id, status);
            }
        } else if let Some(caps) = PYTEST_VERBOSE.captures(line) {
            if let Some(status) = TestStatus::from_word(&caps[2]) {
                outcome.record(&caps[1], status);
            }
        }
    }
    outcome
}

fn parse_django(log: &str) -> TestOutcome {
    let mut outcome = TestOutcome::new();
    // Verbose runs print a docstring line between the id and the status.
    let mut pending: Option<String> = None;

    for line in log.lines().map(str::trim_end) {
        if let Some(caps) = DJANGO_RESULT.captures(line) {
            if let Some(status) = TestStatus::from_word(&caps[2]) {
                outcome.record(&caps[1], status);
            }
            pending = None;
        } else if let Some(caps) = DJANGO_HEADER.captures(line) {
            if let Some(status) = TestStatus::from_word(&caps[1]) {
                outcome.record(&caps[2], status);
            }
            pending = None;
        } else if let Some(caps) = DJANGO_ID_ONLY.captures(line) {
            pending = Some(caps[1].to_string());
        } else if let Some(id) = pending.take() {
            if let Some(caps) = DJANGO_TRAILING.captures(line) {
                if let Some(status) = TestStatus::from_word(&caps[1]) {
                    outcome.record(id, status);
                }
            }
        }
    }
    outcome
}

fn parse_sympy(log: &str) -> TestOutcome {
    let mut outcome = TestOutcome::new();
    for line in log.lines().map(str::trim) {
        if let Some(caps) = SYMPY_RESULT.captures(line) {
            if let Some(status) = TestStatus::from_word(&caps[2]) {
                outcome.record(&caps[1], status);
            }
        } else if let Some(caps) = SYMPY_FAILURE_HEADER.captures(line) {
            outcome.record(&caps[1], TestStatus::Failed);
        }
    }
    outcome
}
