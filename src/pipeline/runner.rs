//! Resumable batch classification loop.
//!
//! Pipeline flow per cycle:
//! Checkpoint → unprocessed records → Service → Parser → selection →
//! pending batch → Checkpoint append → accuracy report
//!
//! Epistemic foundation:
//! - K_i: Resume position is computed purely from checkpoint contents
//! - K_i: A record already in the checkpoint is never sent again
//! - B_i: Each service call may fail → the record stays unprocessed
//! - I^B: Checkpoint I/O failure → abort, resume state is unknowable
//!
//! Each cycle writes the attempt ledger before the checkpoint. A crash
//! between the two writes leaves ledger entries for records that did reach
//! the checkpoint; they are pruned when the next run starts, so failure
//! counts are never lost.

use crate::checkpoint::{AttemptLedger, CheckpointState, CheckpointStore};
use crate::client::ClassificationService;
use crate::models::{
    ClassificationResult, Config, ParseFailure, ParseFailurePolicy, Record, Result, ServiceError,
};
use crate::parser::{CategoryScores, CategorySet};
use crate::pipeline::{AccuracyReport, Dataset};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Knobs for the batch runner.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Records to classify before stopping
    pub target_count: u64,
    /// Records per persisted batch
    pub batch_size: usize,
    /// Failures before dead-lettering; `None` retries forever
    pub attempt_limit: Option<u32>,
    /// Upper bound on one service call
    pub record_timeout: Duration,
    /// Stop after this many cycles
    pub max_cycles: Option<u32>,
    /// Handling of uninterpretable responses
    pub parse_failure: ParseFailurePolicy,
}

impl RunnerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            target_count: config.runner.target_count,
            batch_size: config.runner.batch_size.max(1),
            attempt_limit: config.runner.attempt_limit(),
            record_timeout: Duration::from_secs(config.runner.record_timeout_secs),
            max_cycles: config.runner.max_cycles,
            parse_failure: config.classification.parse_failure,
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            target_count: 10_000,
            batch_size: 100,
            attempt_limit: Some(3),
            record_timeout: Duration::from_secs(300),
            max_cycles: None,
            parse_failure: ParseFailurePolicy::Sentinel,
        }
    }
}

/// Why the runner reached DONE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Checkpoint holds the target number of rows
    TargetReached,
    /// Nothing eligible left (remaining records are dead-lettered)
    Exhausted,
    /// Cancellation was requested
    Cancelled,
    /// `max_cycles` reached
    CycleLimit,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::TargetReached => write!(f, "target reached"),
            StopReason::Exhausted => write!(f, "no eligible records left"),
            StopReason::Cancelled => write!(f, "cancelled"),
            StopReason::CycleLimit => write!(f, "cycle limit reached"),
        }
    }
}

/// Runner state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Running,
    Done(StopReason),
}

/// Outcome of one record within a cycle.
#[derive(Debug)]
enum RecordOutcome {
    Classified(ClassificationResult),
    /// Persisted with the null category
    Unparsable(ClassificationResult, ParseFailure),
    /// Left unprocessed
    Failed(String),
    Cancelled,
}

/// Statistics for one invocation of the runner.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Effective target (bounded by dataset size)
    pub target: u64,
    /// Checkpoint size when the run started
    pub resumed_from: usize,
    /// Cycles executed
    pub cycles: u32,
    /// Results persisted by this run
    pub classified: usize,
    /// Of those, stored with the null category
    pub unparsable: usize,
    /// Failed attempts (service errors, or parse failures under `retry`)
    pub failures: usize,
    /// Records dead-lettered at the end of the run
    pub dead_lettered: usize,
    /// Checkpoint size at the end of the run
    pub final_size: usize,
    /// Accuracy over the final checkpoint
    pub accuracy: AccuracyReport,
    /// Why the run stopped
    pub stop_reason: Option<StopReason>,
    /// Total runtime in seconds
    pub runtime_secs: f64,
    /// Records per hour throughput
    pub throughput_per_hour: f64,
}

impl RunSummary {
    /// Calculate derived stats.
    pub fn finalize(&mut self, runtime: Duration) {
        self.runtime_secs = runtime.as_secs_f64();
        if self.runtime_secs > 0.0 {
            self.throughput_per_hour = self.classified as f64 / self.runtime_secs * 3600.0;
        }
    }
}

/// Sequential, checkpointed classification loop.
pub struct BatchRunner {
    service: Arc<dyn ClassificationService>,
    store: CheckpointStore,
    dataset: Dataset,
    categories: CategorySet,
    settings: RunnerSettings,
    cancel: CancellationToken,
    show_progress: bool,
}

impl BatchRunner {
    /// Create a runner over a dataset and checkpoint.
    pub fn new(
        service: Arc<dyn ClassificationService>,
        store: CheckpointStore,
        dataset: Dataset,
        categories: CategorySet,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            service,
            store,
            dataset,
            categories,
            settings,
            cancel: CancellationToken::new(),
            show_progress: false,
        }
    }

    /// Use an external cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Draw a progress bar on stderr.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Target bounded by the dataset size.
    pub fn effective_target(&self) -> u64 {
        self.settings.target_count.min(self.dataset.len() as u64)
    }

    /// Run cycles until DONE.
    ///
    /// Per-record failures are logged and retried on later cycles; only
    /// checkpoint I/O failures end the run with an error.
    pub async fn run(&self) -> Result<RunSummary> {
        let start = Instant::now();
        let ledger_path = AttemptLedger::path_for(self.store.path());
        let mut ledger = AttemptLedger::load(&ledger_path)?;

        let initial = self.store.load()?;
        let stale = ledger.prune(&initial);
        if stale > 0 {
            debug!(pruned = stale, "Dropped ledger entries for checkpointed records");
            ledger.save()?;
        }
        let mut summary = RunSummary {
            target: self.effective_target(),
            resumed_from: initial.size(),
            final_size: initial.size(),
            accuracy: AccuracyReport::from_state(&initial),
            ..Default::default()
        };

        if initial.is_empty() {
            info!(
                target = summary.target,
                records = self.dataset.len(),
                batch_size = self.settings.batch_size,
                "Starting classification run"
            );
        } else {
            info!(
                target = summary.target,
                resume_offset = initial.size(),
                dead_lettered = ledger.dead_letter_count(),
                "Resuming classification run"
            );
        }

        let pb = self.progress_bar(summary.target, initial.size() as u64);

        let mut state = RunnerState::Running;
        while state == RunnerState::Running {
            state = self
                .step(&mut ledger, &mut summary, &pb)
                .await
                .inspect_err(|e| {
                    if e.is_checkpoint_failure() {
                        pb.abandon();
                        error!(error = %e, "Checkpoint cannot be trusted, aborting run");
                    }
                })?;
        }

        if let RunnerState::Done(reason) = state {
            summary.stop_reason = Some(reason);
        }
        summary.dead_lettered = ledger.dead_letter_count();
        summary.finalize(start.elapsed());

        pb.finish_with_message(format!("{} classified", summary.final_size));
        info!(
            stop_reason = %summary.stop_reason.map(|r| r.to_string()).unwrap_or_default(),
            cycles = summary.cycles,
            classified = summary.classified,
            unparsable = summary.unparsable,
            failures = summary.failures,
            dead_lettered = summary.dead_lettered,
            checkpoint_size = summary.final_size,
            accuracy = %summary.accuracy,
            "Classification run complete"
        );

        Ok(summary)
    }

    /// One RUNNING → RUNNING | DONE transition.
    async fn step(
        &self,
        ledger: &mut AttemptLedger,
        summary: &mut RunSummary,
        pb: &ProgressBar,
    ) -> Result<RunnerState> {
        if self.cancel.is_cancelled() {
            return Ok(RunnerState::Done(StopReason::Cancelled));
        }
        if self
            .settings
            .max_cycles
            .is_some_and(|max| summary.cycles >= max)
        {
            return Ok(RunnerState::Done(StopReason::CycleLimit));
        }

        let target = self.effective_target();
        let checkpoint = self.store.load()?;
        if checkpoint.size() as u64 >= target {
            return Ok(RunnerState::Done(StopReason::TargetReached));
        }

        let pending = self.pending_records(&checkpoint, ledger);
        if pending.is_empty() {
            warn!(
                checkpoint_size = checkpoint.size(),
                target = target,
                dead_lettered = ledger.dead_letter_count(),
                "No eligible records left before reaching target"
            );
            return Ok(RunnerState::Done(StopReason::Exhausted));
        }

        summary.cycles += 1;
        let cycle = summary.cycles;
        let cycle_start = Instant::now();
        debug!(
            cycle = cycle,
            resume_offset = checkpoint.size(),
            first = pending[0].index,
            count = pending.len(),
            "Cycle started"
        );

        let mut batch = Vec::with_capacity(pending.len());
        let mut cancelled = false;

        for record in pending {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            match self.classify_record(record).await {
                RecordOutcome::Classified(result) => batch.push(result),
                RecordOutcome::Unparsable(result, failure) => {
                    warn!(index = record.index, error = %failure, "Unparsable response, storing null category");
                    summary.unparsable += 1;
                    batch.push(result);
                }
                RecordOutcome::Failed(reason) => {
                    summary.failures += 1;
                    ledger.record_failure(record.index, &reason, self.settings.attempt_limit);
                    warn!(
                        index = record.index,
                        attempts = ledger.attempts(record.index),
                        error = %reason,
                        "Classification failed"
                    );
                }
                RecordOutcome::Cancelled => {
                    cancelled = true;
                    break;
                }
            }
        }

        let persisted = batch.len();
        ledger.save()?;
        let refreshed = self.store.append(batch)?;
        if ledger.prune(&refreshed) > 0 {
            ledger.save()?;
        }

        summary.classified += persisted;
        summary.final_size = refreshed.size();
        summary.accuracy = AccuracyReport::from_state(&refreshed);
        pb.set_position((refreshed.size() as u64).min(target));
        pb.set_message(format!("accuracy {}", format_proportion(&summary.accuracy)));

        info!(
            cycle = cycle,
            persisted = persisted,
            checkpoint_size = refreshed.size(),
            target = target,
            elapsed_secs = %format!("{:.1}", cycle_start.elapsed().as_secs_f64()),
            accuracy = %format_proportion(&summary.accuracy),
            "Cycle complete"
        );

        if cancelled {
            info!("Cancellation requested, stopping after persisted batch");
            return Ok(RunnerState::Done(StopReason::Cancelled));
        }
        if refreshed.size() as u64 >= target {
            return Ok(RunnerState::Done(StopReason::TargetReached));
        }
        Ok(RunnerState::Running)
    }

    /// Next batch: in-scope records with no result and not dead-lettered.
    fn pending_records<'a>(
        &'a self,
        checkpoint: &CheckpointState,
        ledger: &AttemptLedger,
    ) -> Vec<&'a Record> {
        self.dataset
            .records()
            .iter()
            .take(self.effective_target() as usize)
            .filter(|r| !checkpoint.contains(r.index) && !ledger.is_dead_lettered(r.index))
            .take(self.settings.batch_size)
            .collect()
    }

    /// Call the service for one record and interpret the answer.
    async fn classify_record(&self, record: &Record) -> RecordOutcome {
        let timeout = self.settings.record_timeout;
        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ServiceError::Cancelled),
            r = tokio::time::timeout(timeout, self.service.classify(&record.text)) => {
                r.unwrap_or(Err(ServiceError::Timeout(timeout)))
            }
        };

        let raw = match response {
            Ok(raw) => raw,
            Err(ServiceError::Cancelled) => return RecordOutcome::Cancelled,
            Err(e) => return RecordOutcome::Failed(e.to_string()),
        };

        match CategoryScores::parse(&raw.content, &self.categories) {
            Ok(scores) => {
                let selected = scores.select();
                debug!(
                    index = record.index,
                    category = selected.map(|s| s.category.as_str()).unwrap_or(""),
                    probability = selected.map(|s| s.probability).unwrap_or(0.0),
                    scored = scores.len(),
                    "Record classified"
                );
                RecordOutcome::Classified(ClassificationResult::from_selection(record, selected))
            }
            Err(failure) => match self.settings.parse_failure {
                ParseFailurePolicy::Sentinel => RecordOutcome::Unparsable(
                    ClassificationResult::from_selection(record, None),
                    failure,
                ),
                ParseFailurePolicy::Retry => RecordOutcome::Failed(failure.to_string()),
            },
        }
    }

    fn progress_bar(&self, target: u64, done: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(target);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        pb.set_position(done.min(target));
        pb
    }
}

fn format_proportion(report: &AccuracyReport) -> String {
    report
        .proportion()
        .map(|p| format!("{p:.4}"))
        .unwrap_or_else(|| "n/a".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawClassification;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use tempfile::TempDir;

    const PAYLOAD: &str = "Anxiety: 0.0111\nBipolar: 0.0693\nDepression: 0.1111\nNormal: 0.7580";

    /// Answers from a script keyed by record text, recording every call.
    #[derive(Default)]
    struct ScriptedService {
        replies: HashMap<String, String>,
        always_fail: HashSet<String>,
        fail_once: Mutex<HashSet<String>>,
        hang: HashSet<String>,
        cancel_on: Option<(String, CancellationToken)>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedService {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ClassificationService for ScriptedService {
        async fn classify(&self, text: &str) -> std::result::Result<RawClassification, ServiceError> {
            self.calls.lock().unwrap().push(text.to_string());
            if let Some((trigger, token)) = &self.cancel_on {
                if trigger == text {
                    token.cancel();
                }
            }
            if self.hang.contains(text) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.always_fail.contains(text) || self.fail_once.lock().unwrap().remove(text) {
                return Err(ServiceError::Api {
                    status: 500,
                    message: format!("failed on {text}"),
                });
            }
            let content = self
                .replies
                .get(text)
                .cloned()
                .unwrap_or_else(|| PAYLOAD.to_string());
            Ok(RawClassification::new(content))
        }
    }

    fn dataset(n: u64) -> Dataset {
        Dataset::new(
            (1..=n)
                .map(|i| Record::new(i, format!("record {i}"), Some("Normal".to_string())))
                .collect(),
        )
        .unwrap()
    }

    fn settings(target: u64, batch: usize) -> RunnerSettings {
        RunnerSettings {
            target_count: target,
            batch_size: batch,
            record_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    fn runner(
        service: Arc<ScriptedService>,
        dir: &TempDir,
        n: u64,
        settings: RunnerSettings,
    ) -> BatchRunner {
        BatchRunner::new(
            service,
            CheckpointStore::new(dir.path().join("results.csv")),
            dataset(n),
            CategorySet::new(["Anxiety", "Bipolar", "Depression", "Normal"]),
            settings,
        )
    }

    fn orders(state: &CheckpointState) -> Vec<u64> {
        state.results().iter().map(|r| r.order).collect()
    }

    #[tokio::test]
    async fn test_full_run_reaches_target() {
        let temp_dir = TempDir::new().unwrap();
        let service = Arc::new(ScriptedService::default());
        let summary = runner(service.clone(), &temp_dir, 5, settings(5, 2))
            .run()
            .await
            .unwrap();

        assert_eq!(summary.stop_reason, Some(StopReason::TargetReached));
        assert_eq!(summary.cycles, 3);
        assert_eq!(summary.final_size, 5);
        assert_eq!(summary.accuracy.proportion(), Some(1.0));
        assert_eq!(service.calls().len(), 5);

        let state = CheckpointStore::new(temp_dir.path().join("results.csv")).load().unwrap();
        let first = state.get(1).unwrap();
        assert_eq!(first.condition.as_deref(), Some("Normal"));
        assert_eq!(first.value, Some(0.7580));
    }

    #[tokio::test]
    async fn test_service_error_leaves_gap_then_retried() {
        let temp_dir = TempDir::new().unwrap();
        let service = Arc::new(ScriptedService {
            fail_once: Mutex::new(HashSet::from(["record 7".to_string()])),
            ..Default::default()
        });

        let mut first_cycle = settings(10, 10);
        first_cycle.max_cycles = Some(1);
        let summary = runner(service.clone(), &temp_dir, 10, first_cycle)
            .run()
            .await
            .unwrap();
        assert_eq!(summary.stop_reason, Some(StopReason::CycleLimit));
        assert_eq!(summary.failures, 1);

        let store = CheckpointStore::new(temp_dir.path().join("results.csv"));
        let state = store.load().unwrap();
        assert_eq!(orders(&state), [1, 2, 3, 4, 5, 6, 8, 9, 10]);

        let summary = runner(service.clone(), &temp_dir, 10, settings(10, 10))
            .run()
            .await
            .unwrap();
        assert_eq!(summary.stop_reason, Some(StopReason::TargetReached));
        assert_eq!(service.calls().last().map(String::as_str), Some("record 7"));
        assert_eq!(service.calls().len(), 11);
        assert_eq!(store.load().unwrap().size(), 10);
    }

    #[tokio::test]
    async fn test_resume_never_recalls_checkpointed_records() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path().join("results.csv"));
        let existing = dataset(4)
            .records()
            .iter()
            .map(|r| ClassificationResult::from_selection(r, None))
            .collect();
        store.append(existing).unwrap();

        let service = Arc::new(ScriptedService::default());
        runner(service.clone(), &temp_dir, 6, settings(6, 10))
            .run()
            .await
            .unwrap();

        assert_eq!(service.calls(), ["record 5", "record 6"]);
    }

    #[tokio::test]
    async fn test_empty_payload_persisted_as_sentinel() {
        let temp_dir = TempDir::new().unwrap();
        let service = Arc::new(ScriptedService {
            replies: HashMap::from([("record 2".to_string(), String::new())]),
            ..Default::default()
        });
        let summary = runner(service, &temp_dir, 3, settings(3, 10))
            .run()
            .await
            .unwrap();

        assert_eq!(summary.unparsable, 1);
        assert_eq!(summary.final_size, 3);
        assert_eq!(summary.accuracy.compared, 2);
        assert_eq!(summary.accuracy.unclassified, 1);

        let state = CheckpointStore::new(temp_dir.path().join("results.csv")).load().unwrap();
        assert!(state.get(2).unwrap().is_sentinel());
    }

    #[tokio::test]
    async fn test_retry_policy_leaves_unparsable_unprocessed() {
        let temp_dir = TempDir::new().unwrap();
        let service = Arc::new(ScriptedService {
            replies: HashMap::from([("record 2".to_string(), "Stress: 0.9".to_string())]),
            ..Default::default()
        });
        let mut s = settings(3, 10);
        s.parse_failure = ParseFailurePolicy::Retry;
        s.attempt_limit = Some(2);

        let summary = runner(service.clone(), &temp_dir, 3, s).run().await.unwrap();

        assert_eq!(summary.stop_reason, Some(StopReason::Exhausted));
        assert_eq!(summary.failures, 2);
        assert_eq!(summary.dead_lettered, 1);
        let state = CheckpointStore::new(temp_dir.path().join("results.csv")).load().unwrap();
        assert_eq!(orders(&state), [1, 3]);
    }

    #[tokio::test]
    async fn test_permanent_failure_dead_lettered_and_run_terminates() {
        let temp_dir = TempDir::new().unwrap();
        let service = Arc::new(ScriptedService {
            always_fail: HashSet::from(["record 2".to_string()]),
            ..Default::default()
        });
        let mut s = settings(4, 10);
        s.attempt_limit = Some(3);

        let summary = runner(service.clone(), &temp_dir, 4, s).run().await.unwrap();

        assert_eq!(summary.stop_reason, Some(StopReason::Exhausted));
        assert_eq!(summary.dead_lettered, 1);
        let attempts = service.calls().iter().filter(|c| *c == "record 2").count();
        assert_eq!(attempts, 3);

        let ledger = AttemptLedger::load(&AttemptLedger::path_for(
            &temp_dir.path().join("results.csv"),
        ))
        .unwrap();
        assert!(ledger.is_dead_lettered(2));
    }

    #[tokio::test]
    async fn test_unbounded_retries_keep_reoffering() {
        let temp_dir = TempDir::new().unwrap();
        let service = Arc::new(ScriptedService {
            always_fail: HashSet::from(["record 1".to_string()]),
            ..Default::default()
        });
        let mut s = settings(2, 10);
        s.attempt_limit = None;
        s.max_cycles = Some(5);

        let summary = runner(service.clone(), &temp_dir, 2, s).run().await.unwrap();

        assert_eq!(summary.stop_reason, Some(StopReason::CycleLimit));
        assert_eq!(summary.dead_lettered, 0);
        let attempts = service.calls().iter().filter(|c| *c == "record 1").count();
        assert_eq!(attempts, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_call_times_out() {
        let temp_dir = TempDir::new().unwrap();
        let service = Arc::new(ScriptedService {
            hang: HashSet::from(["record 1".to_string()]),
            ..Default::default()
        });
        let mut s = settings(2, 10);
        s.max_cycles = Some(1);

        let summary = runner(service, &temp_dir, 2, s).run().await.unwrap();

        assert_eq!(summary.failures, 1);
        let state = CheckpointStore::new(temp_dir.path().join("results.csv")).load().unwrap();
        assert_eq!(orders(&state), [2]);
    }

    #[tokio::test]
    async fn test_cancellation_persists_completed_records() {
        let temp_dir = TempDir::new().unwrap();
        let token = CancellationToken::new();
        let service = Arc::new(ScriptedService {
            cancel_on: Some(("record 3".to_string(), token.clone())),
            ..Default::default()
        });

        let summary = runner(service.clone(), &temp_dir, 10, settings(10, 10))
            .with_cancellation(token)
            .run()
            .await
            .unwrap();

        assert_eq!(summary.stop_reason, Some(StopReason::Cancelled));
        assert_eq!(service.calls().len(), 3);
        let state = CheckpointStore::new(temp_dir.path().join("results.csv")).load().unwrap();
        assert_eq!(orders(&state), [1, 2, 3]);
    }

    #[tokio::test]
    async fn test_target_bounded_by_dataset() {
        let temp_dir = TempDir::new().unwrap();
        let service = Arc::new(ScriptedService::default());
        let runner = runner(service, &temp_dir, 3, settings(10_000, 100));
        assert_eq!(runner.effective_target(), 3);

        let summary = runner.run().await.unwrap();
        assert_eq!(summary.stop_reason, Some(StopReason::TargetReached));
        assert_eq!(summary.final_size, 3);
    }

    #[tokio::test]
    async fn test_already_complete_makes_no_calls() {
        let temp_dir = TempDir::new().unwrap();
        let service = Arc::new(ScriptedService::default());
        runner(service.clone(), &temp_dir, 2, settings(2, 10))
            .run()
            .await
            .unwrap();
        let before = service.calls().len();

        let summary = runner(service.clone(), &temp_dir, 2, settings(2, 10))
            .run()
            .await
            .unwrap();
        assert_eq!(summary.cycles, 0);
        assert_eq!(summary.resumed_from, 2);
        assert_eq!(service.calls().len(), before);
    }

    #[tokio::test]
    async fn test_unwritable_checkpoint_aborts_run() {
        let temp_dir = TempDir::new().unwrap();
        // A directory squatting on the temp path makes every checkpoint write fail.
        std::fs::create_dir(temp_dir.path().join("results.csv.tmp")).unwrap();
        let service = Arc::new(ScriptedService {
            fail_once: Mutex::new(HashSet::from(["record 1".to_string()])),
            ..Default::default()
        });

        let err = runner(service.clone(), &temp_dir, 4, settings(4, 2))
            .run()
            .await
            .unwrap_err();
        assert!(err.is_checkpoint_failure());
        assert_eq!(service.calls(), ["record 1", "record 2"]);
        assert!(!temp_dir.path().join("results.csv").exists());

        // The failure count was saved ahead of the checkpoint write.
        let ledger =
            AttemptLedger::load(&AttemptLedger::path_for(&temp_dir.path().join("results.csv")))
                .unwrap();
        assert_eq!(ledger.attempts(1), 1);
    }
}
