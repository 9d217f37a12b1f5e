//! Patch Applier: stage unified diffs into a prepared workspace.
//!
//! Diffs are checked with `git apply --check` before anything is written, so
//! a rejected diff leaves the workspace untouched.

pub mod line_diff;

use std::io::Write;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use crate::error::ApplyError;
use crate::workspace::git::{run_git, truncate};
use crate::workspace::Workspace;

pub use line_diff::files_touched;

static PATCH_FAILED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^error: patch failed: (.+?):\d+\s*$").unwrap());
static NO_SUCH_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^error: (.+?): No such file or directory\s*$").unwrap());
static NOT_IN_INDEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^error: (.+?): does not exist in index\s*$").unwrap());
static ALREADY_EXISTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^error: (.+?): already exists in working directory\s*$").unwrap());

/// Files git reported as rejected, in order of appearance.
fn rejected_files(stderr: &str) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    for re in [&*PATCH_FAILED, &*NO_SUCH_FILE, &*NOT_IN_INDEX, &*ALREADY_EXISTS] {
        for caps in re.captures_iter(stderr) {
            let path = caps[1].to_string();
            if !files.contains(&path) {
                files.push(path);
            }
        }
    }
    files
}

/// Applies diffs with `git apply`, without fuzz.
#[derive(Debug, Clone)]
pub struct PatchApplier {
    timeout: Duration,
}

impl Default for PatchApplier {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
        }
    }
}

impl PatchApplier {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Apply `diff` to the workspace.
    ///
    /// An empty or whitespace-only diff is a no-op. A diff that does not
    /// apply cleanly yields [`ApplyError::Rejected`] listing the offending
    /// files.
    pub async fn apply(&self, workspace: &Workspace, diff: &str) -> Result<(), ApplyError> {
        if diff.trim().is_empty() {
            debug!(repo = workspace.repo(), "Empty diff, nothing to apply");
            return Ok(());
        }

        let mut file = tempfile::Builder::new()
            .prefix("swe-eval-")
            .suffix(".patch")
            .tempfile()?;
        file.write_all(diff.as_bytes())?;
        if !diff.ends_with('\n') {
            file.write_all(b"\n")?;
        }
        file.flush()?;
        let patch_path = file.path().display().to_string();

        let check = run_git(
            workspace.path(),
            &["apply", "--check", "--whitespace=nowarn", &patch_path],
            self.timeout,
        )
        .await
        .map_err(|e| ApplyError::GitFailed(e.to_string()))?;

        if !check.success {
            let mut files = rejected_files(&check.stderr);
            if files.is_empty() {
                files = files_touched(diff);
            }
            warn!(
                repo = workspace.repo(),
                files = ?files,
                "Patch does not apply cleanly"
            );
            return Err(ApplyError::Rejected {
                files,
                stderr: truncate(check.stderr.trim(), 1000),
            });
        }

        let output = run_git(
            workspace.path(),
            &["apply", "--whitespace=nowarn", &patch_path],
            self.timeout,
        )
        .await
        .map_err(|e| ApplyError::GitFailed(e.to_string()))?;
        if !output.success {
            return Err(ApplyError::GitFailed(truncate(output.stderr.trim(), 1000)));
        }

        debug!(
            repo = workspace.repo(),
            files = files_touched(diff).len(),
            "Patch applied"
        );
        Ok(())
    }
}
