//! CLI command definitions for swe-eval.
//!
//! Every command reads the benchmark dataset file. `run` evaluates records
//! end to end, `checkout` only prepares workspaces, `inspect` summarizes the
//! dataset and `line-diff` scores predicted line edits against gold patches.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::dataset::{BenchmarkRecord, DatasetQuery, Predictions, RecordStore, Subset};
use crate::evaluation::{render, ReportFormat};
use crate::patch::line_diff::{self, DiffScore, SearchScore};
use crate::patch::PatchApplier;
use crate::pipeline::{CancelSignal, HarnessEvaluator, Pipeline, PipelineConfig};
use crate::runner::{ConventionRegistry, RunnerConfig, TestRunner, TestSelection};
use crate::workspace::{
    WorkspaceConfig, WorkspaceManager, DEFAULT_REMOTE_BASE, DEFAULT_WORKSPACE_ROOT,
};

/// Evaluate SWE-bench records against their repositories' test suites.
#[derive(Parser)]
#[command(name = "swe-eval")]
#[command(about = "Check out SWE-bench commits, apply patches, run tests and report verdicts")]
#[command(version)]
#[command(
    long_about = "swe-eval walks a SWE-bench dataset file, checks out each record's base commit, applies the test patch and the candidate patch, runs the repository's tests and compares the results against the gold test lists.\n\nExample usage:\n  swe-eval run --dataset swe-bench-test.parquet --repo psf/requests --limit 5"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Evaluate records end to end and print the run summary.
    #[command(alias = "eval")]
    Run(RunArgs),

    /// Clone repositories and check out every record's base commit.
    Checkout(CheckoutArgs),

    /// Summarize a dataset file: records per repository and label coverage.
    Inspect(InspectArgs),

    /// Score predicted line edits against the gold patches.
    LineDiff(LineDiffArgs),
}

/// Dataset selection shared by all commands.
#[derive(clap::Args, Debug, Clone)]
pub struct DatasetArgs {
    /// Path to the dataset file (parquet).
    #[arg(short, long)]
    pub dataset: String,

    /// Dataset subset. Only `test` carries evaluation labels.
    #[arg(long, value_enum, default_value = "test")]
    pub subset: Subset,

    /// Only records of this repository (owner/name).
    #[arg(short, long)]
    pub repo: Option<String>,

    /// Only these instance ids (repeatable).
    #[arg(long = "instance")]
    pub instances: Vec<String>,

    /// Evaluate at most this many records.
    #[arg(long)]
    pub limit: Option<usize>,

    /// Order records by creation date, oldest first.
    #[arg(long)]
    pub sort_by_created: bool,
}

impl DatasetArgs {
    fn query(&self) -> DatasetQuery {
        let mut query = DatasetQuery::default().with_instances(self.instances.clone());
        if let Some(repo) = &self.repo {
            query = query.with_repo(repo.clone());
        }
        if let Some(limit) = self.limit {
            query = query.with_limit(limit);
        }
        if self.sort_by_created {
            query = query.sorted_by_created();
        }
        query
    }

    fn load(&self) -> anyhow::Result<Vec<BenchmarkRecord>> {
        let records = RecordStore::new(&self.dataset).load(self.subset)?;
        let records = self.query().apply(records)?;
        info!(
            dataset = %self.dataset,
            subset = %self.subset,
            records = records.len(),
            "Dataset loaded"
        );
        Ok(records)
    }
}

/// Workspace location and clone options.
#[derive(clap::Args, Debug, Clone)]
pub struct WorkspaceArgs {
    /// Directory holding one clone per repository.
    #[arg(long, env = "CLONE_DIR", default_value = DEFAULT_WORKSPACE_ROOT)]
    pub workspace_root: String,

    /// Token for cloning over HTTPS.
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Base URL repositories are cloned from.
    #[arg(long, default_value = DEFAULT_REMOTE_BASE)]
    pub remote_base: String,

    /// Shallow clone depth (full history when omitted).
    #[arg(long)]
    pub clone_depth: Option<u32>,
}

impl WorkspaceArgs {
    fn config(&self) -> WorkspaceConfig {
        WorkspaceConfig::new(&self.workspace_root)
            .with_remote_base(self.remote_base.clone())
            .with_token(self.github_token.clone())
            .with_clone_depth(self.clone_depth)
    }
}

/// Arguments for `swe-eval run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub dataset: DatasetArgs,

    #[command(flatten)]
    pub workspace: WorkspaceArgs,

    /// Predictions file whose `model_patch` replaces each record's gold patch.
    #[arg(short, long)]
    pub predictions: Option<String>,

    /// Maximum number of repositories evaluated at once.
    #[arg(short, long, default_value = "1")]
    pub concurrency: usize,

    /// Per-record test timeout in seconds.
    #[arg(long, default_value = "1800")]
    pub test_timeout: u64,

    /// Which tests to invoke.
    #[arg(long, value_enum, default_value = "full")]
    pub selection: TestSelection,

    /// Python interpreter used to run the tests.
    #[arg(long, default_value = "python")]
    pub python: String,

    /// YAML file overriding or extending the test conventions.
    #[arg(long)]
    pub conventions: Option<String>,

    /// Seconds between progress log lines (0 disables).
    #[arg(long, default_value = "30")]
    pub progress_interval: u64,

    /// Output the summary as JSON.
    #[arg(short, long)]
    pub json: bool,

    /// Also write the report to this file.
    #[arg(short, long)]
    pub output: Option<String>,
}

/// Arguments for `swe-eval checkout`.
#[derive(Parser, Debug)]
pub struct CheckoutArgs {
    #[command(flatten)]
    pub dataset: DatasetArgs,

    #[command(flatten)]
    pub workspace: WorkspaceArgs,
}

/// Arguments for `swe-eval inspect`.
#[derive(Parser, Debug)]
pub struct InspectArgs {
    #[command(flatten)]
    pub dataset: DatasetArgs,

    /// Output as JSON.
    #[arg(short, long)]
    pub json: bool,
}

/// Arguments for `swe-eval line-diff`.
#[derive(Parser, Debug)]
pub struct LineDiffArgs {
    #[command(flatten)]
    pub dataset: DatasetArgs,

    /// Predictions file with one candidate diff per instance.
    #[arg(short, long)]
    pub predictions: String,

    /// Output as JSON.
    #[arg(short, long)]
    pub json: bool,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse CLI args and run the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_evaluation_command(args).await,
        Commands::Checkout(args) => run_checkout_command(args).await,
        Commands::Inspect(args) => run_inspect_command(args),
        Commands::LineDiff(args) => run_line_diff_command(args),
    }
}

async fn run_evaluation_command(args: RunArgs) -> anyhow::Result<()> {
    let records = args.dataset.load()?;

    let mut conventions = ConventionRegistry::builtin();
    if let Some(path) = &args.conventions {
        conventions.load_overrides(Path::new(path))?;
    }

    let runner_config = RunnerConfig::default()
        .with_timeout(Duration::from_secs(args.test_timeout))
        .with_python(args.python.clone())
        .with_selection(args.selection);
    let runner = TestRunner::new(runner_config, Arc::new(conventions));
    let workspaces = WorkspaceManager::new(args.workspace.config());

    let mut evaluator = HarnessEvaluator::new(workspaces, PatchApplier::default(), runner);
    if let Some(path) = &args.predictions {
        evaluator = evaluator.with_predictions(Predictions::load(Path::new(path))?);
    }

    let progress = (args.progress_interval > 0).then(|| Duration::from_secs(args.progress_interval));
    let pipeline = Pipeline::new(
        Arc::new(evaluator),
        PipelineConfig::default()
            .with_concurrency(args.concurrency)
            .with_progress_interval(progress),
    );

    let cancel = CancelSignal::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if watch_interrupts(tokio::signal::ctrl_c, &cancel).await {
                warn!("Second interrupt received, exiting without a report");
                std::process::exit(130);
            }
        })
    };

    let summary = pipeline.run(records, &cancel).await;
    watcher.abort();

    let format = if args.json {
        ReportFormat::Json
    } else {
        ReportFormat::Text
    };
    let rendered = render(&summary, format)
        .map_err(|e| anyhow::anyhow!("Failed to serialize report: {}", e))?;

    if let Some(output) = &args.output {
        std::fs::write(output, &rendered)?;
        info!(path = %output, "Report written");
    }
    println!("{rendered}");
    Ok(())
}

/// Raise `cancel` on the first interrupt. Returns `true` once a second
/// interrupt arrives, `false` if the signal source fails.
async fn watch_interrupts<F, Fut>(mut interrupt: F, cancel: &CancelSignal) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::io::Result<()>>,
{
    if interrupt().await.is_err() {
        return false;
    }
    warn!("Interrupt received, finishing in-flight records (interrupt again to exit)");
    cancel.cancel();
    interrupt().await.is_ok()
}

async fn run_checkout_command(args: CheckoutArgs) -> anyhow::Result<()> {
    let records = args.dataset.load()?;
    let manager = WorkspaceManager::new(args.workspace.config());

    let mut ok = 0usize;
    let mut failed = 0usize;
    for record in &records {
        match manager.prepare(&record.repo, &record.base_commit).await {
            Ok(workspace) => {
                ok += 1;
                println!(
                    "Checked out {} for repo {} at {}",
                    record.base_commit,
                    record.repo,
                    workspace.path().display()
                );
            }
            Err(e) => {
                failed += 1;
                println!(
                    "Failed to checkout {} for repo {}: {}",
                    record.base_commit, record.repo, e
                );
            }
        }
    }

    println!();
    println!("Checked out: {ok}");
    println!("Failed:      {failed}");
    Ok(())
}

#[derive(Debug, Clone, Default, Serialize)]
struct InspectOutput {
    dataset: String,
    subset: String,
    records: usize,
    repositories: BTreeMap<String, usize>,
    labelled: usize,
    with_hints: usize,
    passed_tests: usize,
    failed_tests: usize,
}

fn inspect(dataset: &str, subset: Subset, records: &[BenchmarkRecord]) -> InspectOutput {
    let mut output = InspectOutput {
        dataset: dataset.to_string(),
        subset: subset.to_string(),
        records: records.len(),
        ..Default::default()
    };
    for record in records {
        *output.repositories.entry(record.repo.clone()).or_default() += 1;
        if record.first_hints.as_deref().is_some_and(|h| !h.trim().is_empty()) {
            output.with_hints += 1;
        }
        if let Some(labels) = &record.labels {
            output.labelled += 1;
            output.passed_tests += labels.passed_tests.len();
            output.failed_tests += labels.failed_tests.len();
        }
    }
    output
}

fn run_inspect_command(args: InspectArgs) -> anyhow::Result<()> {
    let records = args.dataset.load()?;
    let output = inspect(&args.dataset.dataset, args.dataset.subset, &records);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Loaded {} records from {}", output.records, output.dataset);
    println!("  Subset:       {}", output.subset);
    println!("  With labels:  {}", output.labelled);
    println!("  With hints:   {}", output.with_hints);
    println!("  Gold passing: {}", output.passed_tests);
    println!("  Gold failing: {}", output.failed_tests);
    println!("  By repository:");
    for (repo, count) in &output.repositories {
        println!("    {}: {}", repo, count);
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
struct LineDiffEntry {
    instance_id: String,
    search: SearchScore,
    diff: DiffScore,
}

#[derive(Debug, Clone, Serialize)]
struct LineDiffOutput {
    scored: usize,
    missing_predictions: usize,
    mean_recall: f64,
    mean_precision: f64,
    mean_iou: f64,
    results: Vec<LineDiffEntry>,
}

fn score_line_diffs(records: &[BenchmarkRecord], predictions: &Predictions) -> LineDiffOutput {
    let mut results = Vec::new();
    let mut missing = 0usize;
    for record in records {
        let Some(candidate) = predictions.get(&record.instance_id) else {
            missing += 1;
            continue;
        };
        results.push(LineDiffEntry {
            instance_id: record.instance_id.clone(),
            search: line_diff::evaluate_search(&record.patch, &line_diff::windows_from_diff(candidate)),
            diff: line_diff::evaluate_diff(&record.patch, &line_diff::predicted_from_diff(candidate)),
        });
    }

    let mean = |f: &dyn Fn(&LineDiffEntry) -> f64| {
        if results.is_empty() {
            0.0
        } else {
            results.iter().map(f).sum::<f64>() / results.len() as f64
        }
    };
    LineDiffOutput {
        scored: results.len(),
        missing_predictions: missing,
        mean_recall: mean(&|e| e.search.recall),
        mean_precision: mean(&|e| e.search.precision),
        mean_iou: mean(&|e| e.diff.iou),
        results,
    }
}

fn run_line_diff_command(args: LineDiffArgs) -> anyhow::Result<()> {
    let records = args.dataset.load()?;
    let predictions = Predictions::load(Path::new(&args.predictions))?;
    let output = score_line_diffs(&records, &predictions);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("\n=== Line Diff Scores ===");
    println!("Scored:              {}", output.scored);
    println!("Missing predictions: {}", output.missing_predictions);
    println!("Mean recall:         {:.3}", output.mean_recall);
    println!("Mean precision:      {:.3}", output.mean_precision);
    println!("Mean IoU:            {:.3}", output.mean_iou);
    println!();
    for r in &output.results {
        println!(
            "  {} recall={:.3} precision={:.3} surplus={:.3} iou={:.3} ({}/{})",
            r.instance_id,
            r.search.recall,
            r.search.precision,
            r.search.surplus_rate,
            r.diff.iou,
            r.diff.intersection,
            r.diff.union,
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::EvaluationLabels;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_command_defaults() {
        let cli = Cli::try_parse_from(["swe-eval", "run", "--dataset", "d.parquet"])
            .expect("should parse");
        assert_eq!(cli.log_level, "info");
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.dataset.dataset, "d.parquet");
                assert_eq!(args.dataset.subset, Subset::Test);
                assert!(args.dataset.repo.is_none());
                assert_eq!(args.concurrency, 1);
                assert_eq!(args.test_timeout, 1800);
                assert_eq!(args.selection, TestSelection::Full);
                assert_eq!(args.python, "python");
                assert_eq!(args.workspace.remote_base, DEFAULT_REMOTE_BASE);
                assert!(args.workspace.clone_depth.is_none());
                assert!(!args.json);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_command_with_options() {
        let cli = Cli::try_parse_from([
            "swe-eval",
            "--log-level",
            "debug",
            "run",
            "-d",
            "d.parquet",
            "--subset",
            "train",
            "--repo",
            "psf/requests",
            "--instance",
            "a",
            "--instance",
            "b",
            "--limit",
            "3",
            "-c",
            "4",
            "--selection",
            "test-patch",
            "--clone-depth",
            "50",
            "--workspace-root",
            "/tmp/ws",
            "-p",
            "preds.jsonl",
            "-j",
            "-o",
            "report.json",
        ])
        .expect("should parse");
        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.dataset.subset, Subset::Train);
                assert_eq!(args.dataset.repo.as_deref(), Some("psf/requests"));
                assert_eq!(args.dataset.instances, vec!["a", "b"]);
                assert_eq!(args.dataset.limit, Some(3));
                assert_eq!(args.concurrency, 4);
                assert_eq!(args.selection, TestSelection::TestPatch);
                assert_eq!(args.workspace.clone_depth, Some(50));
                assert_eq!(args.workspace.workspace_root, "/tmp/ws");
                assert_eq!(args.predictions.as_deref(), Some("preds.jsonl"));
                assert!(args.json);
                assert_eq!(args.output.as_deref(), Some("report.json"));
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_eval_alias_and_other_commands() {
        let cli = Cli::try_parse_from(["swe-eval", "eval", "-d", "x"]).expect("alias");
        assert!(matches!(cli.command, Commands::Run(_)));

        let cli = Cli::try_parse_from(["swe-eval", "checkout", "-d", "x", "-r", "o/r"])
            .expect("checkout");
        assert!(matches!(cli.command, Commands::Checkout(_)));

        let cli = Cli::try_parse_from(["swe-eval", "inspect", "-d", "x", "--json"]).expect("inspect");
        assert!(matches!(cli.command, Commands::Inspect(ref a) if a.json));

        let cli = Cli::try_parse_from(["swe-eval", "line-diff", "-d", "x", "-p", "p.json"])
            .expect("line-diff");
        assert!(matches!(cli.command, Commands::LineDiff(ref a) if a.predictions == "p.json"));
    }

    #[test]
    fn test_dataset_is_required() {
        assert!(Cli::try_parse_from(["swe-eval", "run"]).is_err());
        assert!(Cli::try_parse_from(["swe-eval", "line-diff", "-d", "x"]).is_err());
    }

    #[tokio::test]
    async fn test_watch_interrupts_cancels_then_forces_exit() {
        let cancel = CancelSignal::new();
        let calls = std::cell::Cell::new(0);
        let forced = watch_interrupts(
            || {
                calls.set(calls.get() + 1);
                async { Ok(()) }
            },
            &cancel,
        )
        .await;
        assert!(forced);
        assert!(cancel.is_cancelled());
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn test_watch_interrupts_signal_failure() {
        let cancel = CancelSignal::new();
        let forced = watch_interrupts(
            || async { Err(std::io::Error::other("no signal handler")) },
            &cancel,
        )
        .await;
        assert!(!forced);
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn test_inspect_counts() {
        let mut hinted = BenchmarkRecord::new("a", "o/x", "c", "");
        hinted.first_hints = Some("see issue".to_string());
        let labelled = BenchmarkRecord::new("b", "o/y", "c", "").with_labels(EvaluationLabels {
            test_patch: String::new(),
            passed_tests: ["t1", "t2"].iter().map(|s| s.to_string()).collect(),
            failed_tests: ["t3"].iter().map(|s| s.to_string()).collect(),
        });
        let output = inspect("d.parquet", Subset::Test, &[hinted, labelled]);
        assert_eq!(output.records, 2);
        assert_eq!(output.repositories["o/x"], 1);
        assert_eq!(output.labelled, 1);
        assert_eq!(output.with_hints, 1);
        assert_eq!(output.passed_tests, 2);
        assert_eq!(output.failed_tests, 1);
    }

    #[test]
    fn test_score_line_diffs() {
        let gold = "--- a/f.py\n+++ b/f.py\n@@ -1,3 +1,3 @@ ctx\n-a\n+b\n";
        let records = vec![
            BenchmarkRecord::new("hit", "o/x", "c", gold),
            BenchmarkRecord::new("nopred", "o/x", "c", gold),
        ];
        let mut predictions = Predictions::default();
        predictions.insert("hit", gold);

        let output = score_line_diffs(&records, &predictions);
        assert_eq!(output.scored, 1);
        assert_eq!(output.missing_predictions, 1);
        assert_eq!(output.mean_iou, 1.0);
        assert_eq!(output.mean_recall, 1.0);
    }
}
