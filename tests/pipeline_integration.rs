//! Integration tests for checkout, patching and end-to-end evaluation.
//!
//! Each test builds a throwaway upstream repository under a temporary
//! directory and points the workspace manager at it through a `file://`
//! remote base. Tests are skipped when `git` is not installed.

use std::collections::BTreeSet;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use swe_eval::dataset::{BenchmarkRecord, EvaluationLabels, Predictions};
use swe_eval::evaluation::RecordVerdict;
use swe_eval::patch::PatchApplier;
use swe_eval::pipeline::{CancelSignal, HarnessEvaluator, Pipeline, PipelineConfig};
use swe_eval::runner::{ConventionRegistry, LogFormat, RunnerConfig, TestConvention, TestRunner};
use swe_eval::workspace::{WorkspaceConfig, WorkspaceManager};
use swe_eval::{ApplyError, CheckoutError, Step};

const REPO: &str = "o/r";

const GOLD_PATCH: &str = "--- a/app.txt\n+++ b/app.txt\n@@ -1 +1 @@\n-bug\n+fixed\n";

const TEST_PATCH: &str = "--- /dev/null\n+++ b/tests/test_app.py\n@@ -0,0 +1 @@\n+def test_fixed(): pass\n";

const TEST_SCRIPT: &str = "if test -f tests/test_app.py && grep -q fixed app.txt; \
    then echo 'PASSED tests/test_app.py::test_fixed'; \
    else echo 'FAILED tests/test_app.py::test_fixed'; fi; \
    echo 'FAILED tests/test_app.py::test_known_bad'";

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "user.name=swe-eval", "-c", "user.email=swe-eval@example.com"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git should run");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Upstream with two commits. Returns the remote base URL and both hashes.
struct Upstream {
    _dir: tempfile::TempDir,
    remote_base: String,
    first: String,
    second: String,
}

fn upstream() -> Upstream {
    let dir = tempfile::tempdir().expect("tempdir");
    let src = dir.path().join("src");
    std::fs::create_dir_all(&src).expect("mkdir");

    git(&src, &["init", "--quiet"]);
    std::fs::write(src.join("app.txt"), "bug\n").expect("write");
    git(&src, &["add", "."]);
    git(&src, &["commit", "--quiet", "-m", "first"]);
    let first = git(&src, &["rev-parse", "HEAD"]);

    std::fs::write(src.join("README"), "readme\n").expect("write");
    git(&src, &["add", "."]);
    git(&src, &["commit", "--quiet", "-m", "second"]);
    let second = git(&src, &["rev-parse", "HEAD"]);

    let remotes = dir.path().join("remotes");
    std::fs::create_dir_all(remotes.join("o")).expect("mkdir");
    git(
        dir.path(),
        &[
            "clone",
            "--quiet",
            "--bare",
            src.to_str().expect("utf8 path"),
            remotes.join("o/r.git").to_str().expect("utf8 path"),
        ],
    );

    Upstream {
        remote_base: format!("file://{}", remotes.display()),
        _dir: dir,
        first,
        second,
    }
}

fn manager(upstream: &Upstream, root: &Path) -> WorkspaceManager {
    WorkspaceManager::new(WorkspaceConfig::new(root).with_remote_base(upstream.remote_base.clone()))
}

fn ids(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn record(id: &str, commit: &str, patch: &str) -> BenchmarkRecord {
    BenchmarkRecord::new(id, REPO, commit, patch).with_labels(EvaluationLabels {
        test_patch: TEST_PATCH.to_string(),
        passed_tests: ids(&["tests/test_app.py::test_fixed"]),
        failed_tests: ids(&["tests/test_app.py::test_known_bad"]),
    })
}

fn shell_harness(workspace: WorkspaceConfig, script: &str, timeout: Duration) -> HarnessEvaluator {
    let mut conventions = ConventionRegistry::empty();
    conventions.insert(
        REPO,
        TestConvention::Custom {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            log_format: LogFormat::Pytest,
        },
    );
    let runner = TestRunner::new(
        RunnerConfig::default().with_timeout(timeout),
        Arc::new(conventions),
    );
    HarnessEvaluator::new(
        WorkspaceManager::new(workspace),
        PatchApplier::default(),
        runner,
    )
}

fn harness(upstream: &Upstream, root: &Path) -> HarnessEvaluator {
    shell_harness(
        WorkspaceConfig::new(root).with_remote_base(upstream.remote_base.clone()),
        TEST_SCRIPT,
        Duration::from_secs(60),
    )
}

fn quiet() -> PipelineConfig {
    PipelineConfig::default().with_progress_interval(None)
}

fn head(dir: &Path) -> String {
    git(dir, &["rev-parse", "HEAD"])
}

#[tokio::test]
async fn test_checkout_is_idempotent_and_resets_tree() {
    if !git_available() {
        return;
    }
    let upstream = upstream();
    let root = tempfile::tempdir().expect("tempdir");
    let manager = manager(&upstream, root.path());

    let path = {
        let ws = manager.prepare(REPO, &upstream.first).await.expect("checkout");
        assert_eq!(ws.commit(), upstream.first);
        assert_eq!(head(ws.path()), upstream.first);
        std::fs::write(ws.path().join("app.txt"), "dirty\n").expect("write");
        std::fs::write(ws.path().join("stray.txt"), "x").expect("write");
        ws.path().to_path_buf()
    };

    let ws = manager.prepare(REPO, &upstream.first).await.expect("checkout again");
    assert_eq!(ws.path(), path);
    assert_eq!(head(&path), upstream.first);
    assert_eq!(std::fs::read_to_string(path.join("app.txt")).expect("read"), "bug\n");
    assert!(!path.join("stray.txt").exists());
    drop(ws);

    let ws = manager.prepare(REPO, &upstream.second).await.expect("checkout second");
    assert_eq!(head(ws.path()), upstream.second);
}

#[tokio::test]
async fn test_shallow_clone_missing_commit() {
    if !git_available() {
        return;
    }
    let upstream = upstream();
    let root = tempfile::tempdir().expect("tempdir");
    let manager = WorkspaceManager::new(
        WorkspaceConfig::new(root.path())
            .with_remote_base(upstream.remote_base.clone())
            .with_clone_depth(Some(1))
            .with_fetch_missing(false),
    );

    let err = manager
        .prepare(REPO, &upstream.first)
        .await
        .expect_err("first commit is outside the shallow history");
    assert!(matches!(err, CheckoutError::CommitNotFound { .. }), "{err:?}");

    let ws = manager.prepare(REPO, &upstream.second).await.expect("tip is present");
    assert_eq!(ws.commit(), upstream.second);
}

#[tokio::test]
async fn test_unknown_commit_is_not_found() {
    if !git_available() {
        return;
    }
    let upstream = upstream();
    let root = tempfile::tempdir().expect("tempdir");
    let err = manager(&upstream, root.path())
        .prepare(REPO, "0123456789abcdef0123456789abcdef01234567")
        .await
        .expect_err("commit does not exist");
    assert!(matches!(err, CheckoutError::CommitNotFound { .. }), "{err:?}");
}

#[tokio::test]
async fn test_patch_application() {
    if !git_available() {
        return;
    }
    let upstream = upstream();
    let root = tempfile::tempdir().expect("tempdir");
    let manager = manager(&upstream, root.path());
    let applier = PatchApplier::default();
    let ws = manager.prepare(REPO, &upstream.first).await.expect("checkout");

    applier.apply(&ws, "").await.expect("empty diff is a no-op");
    applier.apply(&ws, "\n  \n").await.expect("blank diff is a no-op");

    applier.apply(&ws, GOLD_PATCH).await.expect("gold patch applies");
    assert_eq!(
        std::fs::read_to_string(ws.path().join("app.txt")).expect("read"),
        "fixed\n"
    );

    let missing = "--- a/nope.txt\n+++ b/nope.txt\n@@ -1 +1 @@\n-a\n+b\n";
    match applier.apply(&ws, missing).await {
        Err(ApplyError::Rejected { files, .. }) => assert_eq!(files, vec!["nope.txt"]),
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_pipeline_end_to_end() {
    if !git_available() {
        return;
    }
    let upstream = upstream();
    let root = tempfile::tempdir().expect("tempdir");
    let pipeline = Pipeline::new(
        Arc::new(harness(&upstream, root.path())),
        quiet(),
    );

    let records = vec![
        record("o__r-1", &upstream.first, GOLD_PATCH),
        record("o__r-2", &upstream.first, ""),
        record("o__r-3", "not a commit", GOLD_PATCH),
        record("o__r-4", &upstream.second, "--- a/nope.txt\n+++ b/nope.txt\n@@ -1 +1 @@\n-a\n+b\n"),
    ];
    let summary = pipeline.run(records, &CancelSignal::new()).await;

    assert!(summary.is_finished());
    assert_eq!(summary.total(), 4);
    let verdicts: Vec<_> = summary.reports.iter().map(|r| r.verdict).collect();
    assert_eq!(
        verdicts,
        vec![
            RecordVerdict::Resolved,
            RecordVerdict::Unresolved,
            RecordVerdict::Error,
            RecordVerdict::Error,
        ]
    );
    assert_eq!(summary.reports[0].tests.passed, 1);
    assert_eq!(summary.reports[0].tests.failed, 1);
    assert_eq!(summary.reports[2].step, Some(Step::Checkout));
    assert_eq!(summary.reports[3].step, Some(Step::Patch));
    assert_eq!(summary.counts.resolved, 1);
    assert_eq!(summary.counts.unresolved, 1);
    assert_eq!(summary.counts.error, 2);
}

#[tokio::test]
async fn test_pipeline_with_predictions() {
    if !git_available() {
        return;
    }
    let upstream = upstream();
    let root = tempfile::tempdir().expect("tempdir");
    let mut predictions = Predictions::default();
    predictions.insert("o__r-1", GOLD_PATCH);

    let evaluator = harness(&upstream, root.path()).with_predictions(predictions);
    let pipeline = Pipeline::new(
        Arc::new(evaluator),
        quiet(),
    );

    let records = vec![
        record("o__r-1", &upstream.first, ""),
        record("o__r-2", &upstream.first, GOLD_PATCH),
    ];
    let summary = pipeline.run(records, &CancelSignal::new()).await;

    assert_eq!(summary.reports[0].verdict, RecordVerdict::Resolved);
    assert_eq!(summary.reports[1].verdict, RecordVerdict::Error);
    assert_eq!(summary.reports[1].step, Some(Step::Patch));
}

#[tokio::test]
async fn test_pipeline_continues_past_commit_missing_from_shallow_clone() {
    if !git_available() {
        return;
    }
    let upstream = upstream();
    let root = tempfile::tempdir().expect("tempdir");
    let workspace = WorkspaceConfig::new(root.path())
        .with_remote_base(upstream.remote_base.clone())
        .with_clone_depth(Some(1))
        .with_fetch_missing(false);
    let pipeline = Pipeline::new(
        Arc::new(shell_harness(workspace, TEST_SCRIPT, Duration::from_secs(60))),
        quiet(),
    );

    let records = vec![
        record("o__r-old", &upstream.first, GOLD_PATCH),
        record("o__r-tip", &upstream.second, GOLD_PATCH),
    ];
    let summary = pipeline.run(records, &CancelSignal::new()).await;

    assert_eq!(summary.total(), 2);
    let missing = &summary.reports[0];
    assert_eq!(missing.verdict, RecordVerdict::Error);
    assert_eq!(missing.step, Some(Step::Checkout));
    assert!(
        missing
            .error
            .as_deref()
            .is_some_and(|e| e.contains(&upstream.first)),
        "{:?}",
        missing.error
    );
    assert_eq!(summary.reports[1].verdict, RecordVerdict::Resolved);
    assert_eq!(summary.reports[1].step, None);
}

#[tokio::test]
async fn test_pipeline_test_timeout_marks_expected_ids_error() {
    if !git_available() {
        return;
    }
    let upstream = upstream();
    let root = tempfile::tempdir().expect("tempdir");
    let workspace =
        WorkspaceConfig::new(root.path()).with_remote_base(upstream.remote_base.clone());
    let pipeline = Pipeline::new(
        Arc::new(shell_harness(workspace, "sleep 30", Duration::from_millis(500))),
        quiet(),
    );

    let summary = pipeline
        .run(
            vec![record("o__r-slow", &upstream.first, GOLD_PATCH)],
            &CancelSignal::new(),
        )
        .await;

    let report = &summary.reports[0];
    assert!(report.timed_out);
    assert_eq!(report.verdict, RecordVerdict::Unresolved);
    assert_eq!(report.tests.error, 2);
    assert_eq!(report.tests.passed, 0);
    assert!(report.missing_tests.is_empty());
    assert!(report.duration_secs < 30.0);
}
