//! Test Runner: invoke a repository's own test command and collect per-test
//! results.
//!
//! The command for a repository comes from the [`ConventionRegistry`]. The
//! child runs in its own process group with a wall-clock bound; on expiry
//! the group is killed and every expected test is reported as not run.

pub mod conventions;
pub mod log_parser;
pub mod outcome;

pub use conventions::{ConventionRegistry, Invocation, TestConvention};
pub use log_parser::LogFormat;
pub use outcome::{StatusCounts, TestOutcome, TestStatus};

use std::collections::BTreeSet;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::dataset::EvaluationLabels;
use crate::error::TestRunError;
use crate::patch::files_touched;
use crate::workspace::Workspace;

/// Default per-record test timeout.
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(1800);

const LOG_TAIL_BYTES: usize = 4000;

/// Which tests a run invokes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TestSelection {
    /// The repository's whole test invocation.
    #[default]
    Full,
    /// Only the test files touched by the record's test patch.
    TestPatch,
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub timeout: Duration,
    /// Interpreter used by the Python conventions.
    pub python: String,
    pub selection: TestSelection,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TEST_TIMEOUT,
            python: "python".to_string(),
            selection: TestSelection::Full,
        }
    }
}

impl RunnerConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    pub fn with_selection(mut self, selection: TestSelection) -> Self {
        self.selection = selection;
        self
    }
}

/// What to run for one record.
#[derive(Debug, Clone, Default)]
pub struct TestPlan {
    /// Test files passed to the command.
    pub test_files: Vec<String>,
    /// Ids reported as not run when the command times out.
    pub expected: BTreeSet<String>,
}

impl TestPlan {
    pub fn for_labels(labels: &EvaluationLabels, selection: TestSelection) -> Self {
        let test_files = match selection {
            TestSelection::Full => Vec::new(),
            TestSelection::TestPatch => files_touched(&labels.test_patch),
        };
        Self {
            test_files,
            expected: labels.all_test_ids(),
        }
    }
}

/// Result of one test invocation.
#[derive(Debug, Clone)]
pub struct TestRun {
    pub outcome: TestOutcome,
    pub timed_out: bool,
    /// `None` when the process was killed.
    pub exit_code: Option<i32>,
    pub duration: Duration,
    /// End of the combined stdout and stderr.
    pub log_tail: String,
}

pub struct TestRunner {
    config: RunnerConfig,
    conventions: Arc<ConventionRegistry>,
}

impl TestRunner {
    pub fn new(config: RunnerConfig, conventions: Arc<ConventionRegistry>) -> Self {
        Self {
            config,
            conventions,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn plan(&self, labels: &EvaluationLabels) -> TestPlan {
        TestPlan::for_labels(labels, self.config.selection)
    }

    /// Run the workspace repository's tests.
    pub async fn run(&self, workspace: &Workspace, plan: &TestPlan) -> Result<TestRun, TestRunError> {
        self.run_in(workspace.repo(), workspace.path(), plan).await
    }

    /// Run `repo`'s tests in `dir`.
    pub async fn run_in(
        &self,
        repo: &str,
        dir: &Path,
        plan: &TestPlan,
    ) -> Result<TestRun, TestRunError> {
        let convention = self
            .conventions
            .get(repo)
            .ok_or_else(|| TestRunError::UnsupportedRepository(repo.to_string()))?;
        let directives = convention.directives(&plan.test_files);
        let invocation = convention.invocation(&self.config.python, &directives);

        info!(repo = repo, command = %invocation.display(), "Running tests");
        let started = Instant::now();

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .current_dir(dir)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|source| TestRunError::Spawn {
            program: invocation.program.clone(),
            source,
        })?;
        let pid = child.id();

        match tokio::time::timeout(self.config.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let mut log = String::from_utf8_lossy(&output.stdout).to_string();
                log.push('\n');
                log.push_str(&String::from_utf8_lossy(&output.stderr));

                let outcome = log_parser::parse(invocation.log_format, &log);
                let duration = started.elapsed();
                let counts = outcome.counts();
                info!(
                    repo = repo,
                    exit_code = ?output.status.code(),
                    passed = counts.passed,
                    failed = counts.failed,
                    error = counts.error,
                    duration_secs = duration.as_secs(),
                    "Tests finished"
                );
                if outcome.is_empty() {
                    warn!(repo = repo, "No test results recognized in output");
                }

                Ok(TestRun {
                    outcome,
                    timed_out: false,
                    exit_code: output.status.code(),
                    duration,
                    log_tail: tail(&log, LOG_TAIL_BYTES),
                })
            }
            Ok(Err(e)) => Err(TestRunError::Wait(e)),
            Err(_) => {
                if let Some(pid) = pid {
                    kill_process_group(pid).await;
                }
                warn!(
                    repo = repo,
                    timeout_secs = self.config.timeout.as_secs(),
                    "Test command timed out, marking expected tests as not run"
                );
                let outcome = plan
                    .expected
                    .iter()
                    .map(|id| (id.clone(), TestStatus::Error))
                    .collect();
                Ok(TestRun {
                    outcome,
                    timed_out: true,
                    exit_code: None,
                    duration: started.elapsed(),
                    log_tail: format!("timed out after {}s", self.config.timeout.as_secs()),
                })
            }
        }
    }
}

/// Kill every process in the group led by `pid`.
#[cfg(unix)]
async fn kill_process_group(pid: u32) {
    let group = format!("-{pid}");
    let result = Command::new("kill")
        .args(["-KILL", "--", group.as_str()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(e) = result {
        debug!(pid, error = %e, "Failed to kill test process group");
    }
}

#[cfg(not(unix))]
async fn kill_process_group(_pid: u32) {}

/// Last `max` bytes of `s`, starting on a char boundary.
fn tail(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}
