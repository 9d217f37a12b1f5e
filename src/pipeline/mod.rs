//! Pipeline Driver: evaluate a sequence of records and build the run summary.
//!
//! # Per-record flow
//!
//! 1. Resolve gold labels and the candidate patch
//! 2. Prepare the repository workspace at `base_commit`
//! 3. Apply `test_patch`, then the candidate patch
//! 4. Run the repository's tests
//! 5. Compare the outcome against the gold lists
//!
//! A failure at any step becomes an `error` report for that record only.
//!
//! # Scheduling
//!
//! With `concurrency = 1` records are processed one after another in input
//! order. With more, records are grouped by repository and each group runs
//! on its own worker, at most `concurrency` workers at a time. Records of one
//! repository are never in flight together, since they share a clone.
//! Workers send finished reports over a channel and the driver alone appends
//! them to the [`RunSummary`].

pub mod progress;

pub use progress::{ProgressCounters, ProgressMonitor, ProgressSnapshot};

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::dataset::{BenchmarkRecord, Predictions};
use crate::error::RecordError;
use crate::evaluation::{evaluate, Evaluation, RecordReport, RecordVerdict, RunSummary};
use crate::patch::PatchApplier;
use crate::runner::{TestRun, TestRunner};
use crate::workspace::WorkspaceManager;

/// Configuration for the pipeline driver.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum number of repositories evaluated at once.
    pub concurrency: usize,
    /// Interval of progress log lines. `None` disables them.
    pub progress_interval: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            progress_interval: Some(Duration::from_secs(30)),
        }
    }
}

impl PipelineConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_progress_interval(mut self, interval: Option<Duration>) -> Self {
        self.progress_interval = interval;
        self
    }
}

/// External request to stop dispatching records.
///
/// Records already in flight are allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of fully evaluating one record.
#[derive(Debug, Clone)]
pub struct EvaluatedRecord {
    pub evaluation: Evaluation,
    pub run: TestRun,
}

/// Per-record work driven by the [`Pipeline`].
#[async_trait]
pub trait InstanceEvaluator: Send + Sync {
    async fn evaluate(&self, record: &BenchmarkRecord) -> Result<EvaluatedRecord, RecordError>;
}

/// Production evaluator: checkout, patch, test, compare.
pub struct HarnessEvaluator {
    workspaces: WorkspaceManager,
    applier: PatchApplier,
    runner: TestRunner,
    predictions: Option<Predictions>,
}

impl HarnessEvaluator {
    pub fn new(workspaces: WorkspaceManager, applier: PatchApplier, runner: TestRunner) -> Self {
        Self {
            workspaces,
            applier,
            runner,
            predictions: None,
        }
    }

    /// Evaluate candidate patches instead of the records' gold patches.
    pub fn with_predictions(mut self, predictions: Predictions) -> Self {
        self.predictions = Some(predictions);
        self
    }
}

#[async_trait]
impl InstanceEvaluator for HarnessEvaluator {
    async fn evaluate(&self, record: &BenchmarkRecord) -> Result<EvaluatedRecord, RecordError> {
        let labels = record.labels().map_err(RecordError::Subset)?;
        let patch = match &self.predictions {
            Some(predictions) => predictions
                .get(&record.instance_id)
                .ok_or_else(|| RecordError::MissingPrediction(record.instance_id.clone()))?,
            None => record.patch.as_str(),
        };

        let workspace = self
            .workspaces
            .prepare(&record.repo, &record.base_commit)
            .await?;

        self.applier
            .apply(&workspace, &labels.test_patch)
            .await
            .map_err(RecordError::TestPatch)?;
        self.applier
            .apply(&workspace, patch)
            .await
            .map_err(RecordError::Patch)?;

        let plan = self.runner.plan(labels);
        let run = self.runner.run(&workspace, &plan).await?;
        let evaluation = evaluate(labels, &run.outcome);
        Ok(EvaluatedRecord { evaluation, run })
    }
}

/// Drives an [`InstanceEvaluator`] over a record sequence.
pub struct Pipeline {
    evaluator: Arc<dyn InstanceEvaluator>,
    config: PipelineConfig,
    counters: ProgressCounters,
}

impl Pipeline {
    pub fn new(evaluator: Arc<dyn InstanceEvaluator>, config: PipelineConfig) -> Self {
        Self {
            evaluator,
            config,
            counters: ProgressCounters::new(),
        }
    }

    pub fn counters(&self) -> &ProgressCounters {
        &self.counters
    }

    /// Evaluate every record, stopping dispatch early only when `cancel` is
    /// raised. Per-record failures never abort the run.
    pub async fn run(&self, records: Vec<BenchmarkRecord>, cancel: &CancelSignal) -> RunSummary {
        let total = records.len();
        let mut summary = RunSummary::new();
        info!(
            run_id = %summary.run_id,
            records = total,
            concurrency = self.config.concurrency,
            "Starting evaluation run"
        );

        let monitor = self
            .config
            .progress_interval
            .map(|interval| ProgressMonitor::start(self.counters.clone(), total, interval));

        if self.config.concurrency <= 1 {
            self.run_sequential(records, cancel, &mut summary).await;
        } else {
            self.run_grouped(records, cancel, &mut summary).await;
        }

        if let Some(monitor) = monitor {
            monitor.stop().await;
        }

        summary.cancelled = cancel.is_cancelled() && summary.total() < total;
        summary.finish();
        info!(
            run_id = %summary.run_id,
            total = summary.total(),
            resolved = summary.counts.resolved,
            unresolved = summary.counts.unresolved,
            error = summary.counts.error,
            cancelled = summary.cancelled,
            "Evaluation run finished"
        );
        summary
    }

    async fn run_sequential(
        &self,
        records: Vec<BenchmarkRecord>,
        cancel: &CancelSignal,
        summary: &mut RunSummary,
    ) {
        for (position, record) in records.into_iter().enumerate() {
            if cancel.is_cancelled() {
                warn!("Cancellation requested, not dispatching further records");
                break;
            }
            let report =
                process_record(self.evaluator.as_ref(), &self.counters, position, &record).await;
            summary.record(report);
        }
    }

    async fn run_grouped(
        &self,
        records: Vec<BenchmarkRecord>,
        cancel: &CancelSignal,
        summary: &mut RunSummary,
    ) {
        let groups = group_by_repo(records);
        debug!(groups = groups.len(), "Records grouped by repository");

        let (tx, mut rx) = mpsc::channel::<RecordReport>(64);
        let workers = Arc::new(Semaphore::new(self.config.concurrency));
        let mut handles = Vec::with_capacity(groups.len());

        for (repo, group) in groups {
            let members: Vec<(usize, String)> = group
                .iter()
                .map(|(position, record)| (*position, record.instance_id.clone()))
                .collect();
            let worker_repo = repo.clone();
            let tx = tx.clone();
            let workers = workers.clone();
            let evaluator = self.evaluator.clone();
            let counters = self.counters.clone();
            let cancel = cancel.clone();

            handles.push((worker_repo, members, tokio::spawn(async move {
                let Ok(_permit) = workers.acquire_owned().await else {
                    return;
                };
                debug!(repo = %repo, records = group.len(), "Repository worker started");
                for (position, record) in group {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let report =
                        process_record(evaluator.as_ref(), &counters, position, &record).await;
                    if tx.send(report).await.is_err() {
                        break;
                    }
                }
            })));
        }
        drop(tx);

        while let Some(report) = rx.recv().await {
            summary.record(report);
        }

        let (groups, tasks): (Vec<_>, Vec<_>) = handles
            .into_iter()
            .map(|(repo, members, task)| ((repo, members), task))
            .unzip();
        let results = futures::future::join_all(tasks).await;
        for ((repo, members), result) in groups.into_iter().zip(results) {
            let Err(e) = result else {
                continue;
            };
            warn!(repo = %repo, error = %e, "Repository worker panicked");
            let reported: BTreeSet<usize> = summary
                .reports
                .iter()
                .filter(|r| r.repo == repo)
                .map(|r| r.position)
                .collect();
            let reason = format!("repository worker panicked: {e}");
            for (position, instance_id) in members {
                if reported.contains(&position) {
                    continue;
                }
                self.counters.record(RecordVerdict::Error);
                summary.record(RecordReport::aborted(position, instance_id, &repo, &reason));
            }
        }
    }
}

type RepoGroup = (String, Vec<(usize, BenchmarkRecord)>);

/// Group records by repository in first-seen order, keeping input order
/// inside each group.
fn group_by_repo(records: Vec<BenchmarkRecord>) -> Vec<RepoGroup> {
    let mut groups: Vec<RepoGroup> = Vec::new();
    for (position, record) in records.into_iter().enumerate() {
        match groups.iter_mut().find(|(repo, _)| *repo == record.repo) {
            Some((_, group)) => group.push((position, record)),
            None => groups.push((record.repo.clone(), vec![(position, record)])),
        }
    }
    groups
}

async fn process_record(
    evaluator: &dyn InstanceEvaluator,
    counters: &ProgressCounters,
    position: usize,
    record: &BenchmarkRecord,
) -> RecordReport {
    counters.in_flight.fetch_add(1, Ordering::Relaxed);
    let started = Instant::now();
    let result = evaluator.evaluate(record).await;
    let elapsed = started.elapsed();
    counters.in_flight.fetch_sub(1, Ordering::Relaxed);

    let report = match result {
        Ok(evaluated) => {
            RecordReport::evaluated(position, record, evaluated.evaluation, &evaluated.run, elapsed)
        }
        Err(e) => {
            warn!(
                instance_id = %record.instance_id,
                repo = %record.repo,
                step = %e.step(),
                error = %e,
                "Record could not be evaluated"
            );
            RecordReport::failed(position, record, &e, elapsed)
        }
    };
    info!(
        instance_id = %record.instance_id,
        verdict = %report.verdict,
        duration_secs = elapsed.as_secs(),
        "Record finished"
    );
    counters.record(report.verdict);
    report
}
