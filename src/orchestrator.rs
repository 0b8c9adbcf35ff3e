//! The polling loop: fetch -> transform -> score -> persist -> notify -> sleep
//!
//! One transaction is fully handled before the next fetch. Every external
//! call is bounded by a timeout and every per-transaction error is caught at
//! the cycle boundary, so the loop only stops when its shutdown token fires.

use crate::config::AppConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::features::FeatureTransformer;
use crate::metrics::RunStats;
use crate::models::inference::{check_probability, Scorer};
use crate::alerts::AlertSink;
use crate::source::TransactionSource;
use crate::store::{PutOutcome, ResultStore};
use crate::types::scored::{ScoredTransaction, Threshold};
use crate::types::transaction::{RawRecord, Transaction};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Cadence and per-call bounds for one loop instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub poll_interval: Duration,
    pub failure_backoff: Duration,
    pub fetch_timeout: Duration,
    pub score_timeout: Duration,
    pub store_timeout: Duration,
    pub notify_timeout: Duration,
}

impl PollPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            poll_interval: config.pipeline.poll_interval(),
            failure_backoff: config.pipeline.failure_backoff(),
            fetch_timeout: Duration::from_millis(config.source.fetch_timeout_ms),
            score_timeout: Duration::from_millis(config.model.score_timeout_ms),
            store_timeout: Duration::from_millis(config.pipeline.store_timeout_ms),
            notify_timeout: Duration::from_millis(config.pipeline.notify_timeout_ms),
        }
    }

    /// Only a failed fetch shortens the pause; every other outcome keeps the normal cadence.
    pub fn pause_after(&self, outcome: &CycleOutcome) -> Duration {
        match outcome {
            CycleOutcome::FetchFailed => self.failure_backoff,
            _ => self.poll_interval,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Stage a cycle was in when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetching,
    Transforming,
    Scoring,
    Persisting,
    Notifying,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetching => "fetching",
            Stage::Transforming => "transforming",
            Stage::Scoring => "scoring",
            Stage::Persisting => "persisting",
            Stage::Notifying => "notifying",
        }
    }
}

/// What a single cycle ended with
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Newly stored; `alerted` is true when a fraud alert was delivered
    Recorded {
        transaction_id: String,
        probability: f64,
        predicted_fraud: bool,
        alerted: bool,
    },
    /// The store already held this identifier; nothing written, no alert
    Duplicate { transaction_id: String },
    /// Source unreachable or timed out; the cycle was abandoned
    FetchFailed,
    /// Malformed record or scoring failure; nothing written
    Skipped {
        transaction_id: Option<String>,
        stage: Stage,
    },
    /// Scored but not stored; no alert is sent for an unpersisted decision
    NotPersisted { transaction_id: String },
}

/// Shared collaborators, cloned into every loop instance
#[derive(Clone)]
pub struct Components {
    pub source: Arc<dyn TransactionSource>,
    pub transformer: FeatureTransformer,
    pub scorer: Arc<dyn Scorer>,
    pub store: Arc<dyn ResultStore>,
    pub sink: Arc<dyn AlertSink>,
}

impl Components {
    /// The transformer is bound to the schema the scorer was verified against.
    pub fn new(
        source: Arc<dyn TransactionSource>,
        scorer: Arc<dyn Scorer>,
        store: Arc<dyn ResultStore>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        let transformer = FeatureTransformer::new(Arc::new(scorer.schema().clone()));
        Self {
            source,
            transformer,
            scorer,
            store,
            sink,
        }
    }
}

/// One loop instance: owns its collaborators, decision rule and counters
pub struct Orchestrator {
    worker: usize,
    components: Components,
    threshold: Threshold,
    policy: PollPolicy,
    stats: Arc<RunStats>,
}

impl Orchestrator {
    pub fn new(worker: usize, components: Components, threshold: Threshold, policy: PollPolicy) -> Self {
        Self {
            worker,
            components,
            threshold,
            policy,
            stats: Arc::new(RunStats::new(worker)),
        }
    }

    pub fn stats(&self) -> Arc<RunStats> {
        self.stats.clone()
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Cancellation is honoured while fetching or sleeping; a transaction
    /// that has been fetched is always carried through persistence.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            worker = self.worker,
            poll_interval_secs = self.policy.poll_interval.as_secs(),
            failure_backoff_secs = self.policy.failure_backoff.as_secs(),
            threshold = self.threshold.value(),
            model_version = %self.components.scorer.version(),
            store = self.components.store.backend(),
            alerts = self.components.sink.transport(),
            "Polling loop started"
        );

        let mut cycle: u64 = 0;
        loop {
            cycle += 1;
            debug!(worker = self.worker, cycle, "Cycle started");

            let fetched = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                fetched = self.fetch() => fetched,
            };

            let outcome = match fetched {
                Ok(record) => self.process(record).await,
                Err(outcome) => outcome,
            };

            let pause = self.policy.pause_after(&outcome);
            if outcome == CycleOutcome::FetchFailed {
                warn!(worker = self.worker, cycle, retry_in_secs = pause.as_secs(), "Fetch failed, backing off");
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = sleep(pause) => {}
            }
        }

        info!(worker = self.worker, cycles = cycle, "Polling loop stopped");
        self.stats.log_summary();
    }

    /// One full cycle without the trailing sleep
    pub async fn run_cycle(&self) -> CycleOutcome {
        match self.fetch().await {
            Ok(record) => self.process(record).await,
            Err(outcome) => outcome,
        }
    }

    async fn fetch(&self) -> Result<RawRecord, CycleOutcome> {
        let result = match timeout(self.policy.fetch_timeout, self.components.source.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::TransientNetwork(format!(
                "fetch timed out after {:?}",
                self.policy.fetch_timeout
            ))),
        };

        match result {
            Ok(record) => Ok(record),
            Err(e @ PipelineError::MalformedInput { .. }) => {
                error!(worker = self.worker, stage = Stage::Fetching.as_str(), error = %e, "Source returned an unusable record");
                self.stats.record_skipped();
                Err(CycleOutcome::Skipped {
                    transaction_id: None,
                    stage: Stage::Fetching,
                })
            }
            Err(e) => {
                error!(worker = self.worker, stage = Stage::Fetching.as_str(), kind = e.kind(), error = %e, "Failed to fetch transaction");
                self.stats.record_fetch_failure();
                Err(CycleOutcome::FetchFailed)
            }
        }
    }

    /// Transform, score, persist and (for fraud) notify one fetched record
    pub async fn process(&self, record: RawRecord) -> CycleOutcome {
        let started = Instant::now();

        let scored = match self.score(&record).await {
            Ok(scored) => scored,
            Err((stage, e)) => {
                let transaction_id = match &e {
                    PipelineError::MalformedInput { transaction_id, .. } => transaction_id.clone(),
                    _ => record_id(&record),
                };
                error!(
                    worker = self.worker,
                    transaction_id = transaction_id.as_deref().unwrap_or("<unknown>"),
                    stage = stage.as_str(),
                    kind = e.kind(),
                    error = %e,
                    "Transaction skipped"
                );
                self.stats.record_skipped();
                return CycleOutcome::Skipped { transaction_id, stage };
            }
        };

        let transaction_id = scored.transaction_id().to_string();
        info!(
            worker = self.worker,
            transaction_id = %transaction_id,
            amount = scored.transaction.amount,
            probability = scored.fraud_probability,
            prediction = if scored.predicted_fraud { "FRAUD" } else { "LEGITIMATE" },
            "Transaction scored"
        );

        match self.persist(&scored).await {
            Ok(PutOutcome::Inserted) => {
                let alerted = scored.predicted_fraud && self.notify(&scored).await;
                self.stats
                    .record_inserted(started.elapsed(), scored.fraud_probability, scored.predicted_fraud);
                debug!(worker = self.worker, transaction_id = %transaction_id, "Stored in result store");

                CycleOutcome::Recorded {
                    transaction_id,
                    probability: scored.fraud_probability,
                    predicted_fraud: scored.predicted_fraud,
                    alerted,
                }
            }
            Ok(PutOutcome::AlreadyPresent) => {
                info!(worker = self.worker, transaction_id = %transaction_id, "Transaction already recorded, skipping alert");
                self.stats.record_duplicate(started.elapsed());
                CycleOutcome::Duplicate { transaction_id }
            }
            Err(e) => {
                error!(
                    worker = self.worker,
                    transaction_id = %transaction_id,
                    stage = Stage::Persisting.as_str(),
                    kind = e.kind(),
                    retryable = e.is_retryable(),
                    error = %e,
                    "Failed to store scored transaction"
                );
                self.stats.record_store_failure();
                CycleOutcome::NotPersisted { transaction_id }
            }
        }
    }

    async fn score(&self, record: &RawRecord) -> Result<ScoredTransaction, (Stage, PipelineError)> {
        let transaction = Transaction::from_record(record).map_err(|e| (Stage::Transforming, e))?;
        let features = self
            .components
            .transformer
            .transform(&transaction)
            .map_err(|e| (Stage::Transforming, e))?;

        let scorer = self.components.scorer.clone();
        let job = tokio::task::spawn_blocking(move || scorer.score(&features));

        let probability = match timeout(self.policy.score_timeout, job).await {
            Ok(Ok(result)) => result.and_then(check_probability),
            Ok(Err(join)) => Err(PipelineError::Scoring(format!("scoring task failed: {join}"))),
            Err(_) => Err(PipelineError::Scoring(format!(
                "scoring timed out after {:?}",
                self.policy.score_timeout
            ))),
        }
        .map_err(|e| (Stage::Scoring, e))?;

        Ok(ScoredTransaction::new(transaction, probability, self.threshold))
    }

    async fn persist(&self, scored: &ScoredTransaction) -> PipelineResult<PutOutcome> {
        match timeout(self.policy.store_timeout, self.components.store.put(scored)).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::StoreUnavailable(format!(
                "write timed out after {:?}",
                self.policy.store_timeout
            ))),
        }
    }

    /// Deliver an alert; failures are logged and never retried here.
    async fn notify(&self, scored: &ScoredTransaction) -> bool {
        let result = match timeout(self.policy.notify_timeout, self.components.sink.notify(scored)).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::TransientNetwork(format!(
                "alert delivery timed out after {:?}",
                self.policy.notify_timeout
            ))),
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                error!(
                    worker = self.worker,
                    transaction_id = %scored.transaction_id(),
                    stage = Stage::Notifying.as_str(),
                    transport = self.components.sink.transport(),
                    error = %e,
                    "Failed to deliver fraud alert"
                );
                self.stats.record_alert_failure();
                false
            }
        }
    }
}

fn record_id(record: &RawRecord) -> Option<String> {
    record
        .get("trans_num")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureSchema, FeatureVector};
    use crate::source::SourceHealth;
    use crate::store::{FraudSummary, MemoryResultStore, ReportWindow};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    // ── test doubles ───────────────────────────────────────────

    #[derive(Clone)]
    enum Step {
        Record(Value),
        Fail(&'static str),
        Hang,
    }

    /// Replays a script; once exhausted, serves fresh unique records
    struct ScriptedSource {
        steps: Mutex<VecDeque<Step>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TransactionSource for ScriptedSource {
        async fn fetch(&self) -> PipelineResult<RawRecord> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some(Step::Record(value)) => Ok(value.as_object().cloned().unwrap()),
                Some(Step::Fail(msg)) => Err(PipelineError::TransientNetwork(msg.to_string())),
                Some(Step::Hang) => std::future::pending().await,
                None => Ok(record(&format!("AUTO-{n}"), 10.0, "2024-03-05 14:00:00", "grocery_pos")
                    .as_object()
                    .cloned()
                    .unwrap()),
            }
        }

        async fn health(&self) -> PipelineResult<SourceHealth> {
            Ok(SourceHealth {
                status: "healthy".to_string(),
                timestamp: None,
                transactions_available: None,
            })
        }
    }

    type ScoreFn = Box<dyn Fn(&FeatureVector) -> PipelineResult<f64> + Send + Sync>;

    struct StubScorer {
        schema: FeatureSchema,
        f: ScoreFn,
    }

    impl StubScorer {
        fn fixed(p: f64) -> Arc<Self> {
            Self::with(move |_| Ok(p))
        }

        fn with(f: impl Fn(&FeatureVector) -> PipelineResult<f64> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                schema: FeatureSchema::v1(),
                f: Box::new(f),
            })
        }
    }

    impl Scorer for StubScorer {
        fn score(&self, features: &FeatureVector) -> PipelineResult<f64> {
            (self.f)(features)
        }

        fn schema(&self) -> &FeatureSchema {
            &self.schema
        }

        fn version(&self) -> &str {
            "stub"
        }
    }

    /// Records alerts and whether the store already held the row at notify time
    struct RecordingSink {
        store: Arc<dyn ResultStore>,
        seen: Mutex<Vec<(String, bool)>>,
        fail: bool,
    }

    impl RecordingSink {
        fn new(store: Arc<dyn ResultStore>) -> Arc<Self> {
            Arc::new(Self {
                store,
                seen: Mutex::new(Vec::new()),
                fail: false,
            })
        }

        fn failing(store: Arc<dyn ResultStore>) -> Arc<Self> {
            Arc::new(Self {
                store,
                seen: Mutex::new(Vec::new()),
                fail: true,
            })
        }

        fn seen(&self) -> Vec<(String, bool)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn notify(&self, scored: &ScoredTransaction) -> PipelineResult<()> {
            let persisted = self.store.get(scored.transaction_id()).await?.is_some();
            self.seen
                .lock()
                .unwrap()
                .push((scored.transaction_id().to_string(), persisted));
            if self.fail {
                return Err(PipelineError::AlertDelivery("smtp down".to_string()));
            }
            Ok(())
        }

        fn transport(&self) -> &'static str {
            "recording"
        }
    }

    struct UnavailableStore;

    #[async_trait]
    impl ResultStore for UnavailableStore {
        async fn ensure_schema(&self) -> PipelineResult<()> {
            Ok(())
        }

        async fn put(&self, _scored: &ScoredTransaction) -> PipelineResult<PutOutcome> {
            Err(PipelineError::StoreUnavailable("connection refused".to_string()))
        }

        async fn get(&self, _transaction_id: &str) -> PipelineResult<Option<ScoredTransaction>> {
            Err(PipelineError::StoreUnavailable("connection refused".to_string()))
        }

        async fn summary(&self, _window: ReportWindow) -> PipelineResult<FraudSummary> {
            Err(PipelineError::StoreUnavailable("connection refused".to_string()))
        }

        fn backend(&self) -> &'static str {
            "unavailable"
        }
    }

    fn record(id: &str, amt: f64, ts: &str, category: &str) -> Value {
        json!({
            "trans_num": id,
            "trans_date_trans_time": ts,
            "amt": amt,
            "category": category,
            "merchant": "fraud_Acme Electronics",
            "gender": "M",
            "city_pop": 1500,
            "lat": 40.7,
            "long": -74.0,
        })
    }

    /// T1: $500 electronics at 02:00 on a Tuesday
    fn t1() -> Value {
        record("T1", 500.0, "2024-03-05 02:00:00", "electronics")
    }

    struct Harness {
        orchestrator: Orchestrator,
        source: Arc<ScriptedSource>,
        store: Arc<MemoryResultStore>,
        sink: Arc<RecordingSink>,
    }

    fn harness(steps: Vec<Step>, scorer: Arc<dyn Scorer>) -> Harness {
        let store = Arc::new(MemoryResultStore::new());
        let sink = RecordingSink::new(store.clone());
        harness_with(steps, scorer, store.clone(), store, sink)
    }

    fn harness_with(
        steps: Vec<Step>,
        scorer: Arc<dyn Scorer>,
        memory: Arc<MemoryResultStore>,
        store: Arc<dyn ResultStore>,
        sink: Arc<RecordingSink>,
    ) -> Harness {
        let source = ScriptedSource::new(steps);
        let components = Components::new(source.clone(), scorer, store, sink.clone());
        Harness {
            orchestrator: Orchestrator::new(0, components, Threshold::default(), PollPolicy::default()),
            source,
            store: memory,
            sink,
        }
    }

    // ── scenarios ──────────────────────────────────────────────

    #[tokio::test]
    async fn test_fraud_is_stored_then_alerted_once() {
        let h = harness(vec![Step::Record(t1())], StubScorer::fixed(0.87));

        let outcome = h.orchestrator.run_cycle().await;
        assert_eq!(
            outcome,
            CycleOutcome::Recorded {
                transaction_id: "T1".to_string(),
                probability: 0.87,
                predicted_fraud: true,
                alerted: true,
            }
        );

        let stored = h.store.get("T1").await.unwrap().unwrap();
        assert!(stored.predicted_fraud);
        assert_eq!(stored.transaction.amount, 500.0);

        // the row was readable when the alert went out
        assert_eq!(h.sink.seen(), vec![("T1".to_string(), true)]);

        let stats = h.orchestrator.stats().snapshot();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.frauds_detected, 1);
    }

    #[tokio::test]
    async fn test_duplicate_fetch_is_not_realerted() {
        let h = harness(vec![Step::Record(t1()), Step::Record(t1())], StubScorer::fixed(0.87));

        h.orchestrator.run_cycle().await;
        let outcome = h.orchestrator.run_cycle().await;

        assert_eq!(outcome, CycleOutcome::Duplicate { transaction_id: "T1".to_string() });
        assert_eq!(h.store.len(), 1);
        assert_eq!(h.sink.seen().len(), 1);

        let stats = h.orchestrator.stats().snapshot();
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.frauds_detected, 1);
    }

    #[tokio::test]
    async fn test_threshold_boundary_is_flagged() {
        let h = harness(vec![Step::Record(t1())], StubScorer::fixed(0.4));
        match h.orchestrator.run_cycle().await {
            CycleOutcome::Recorded { predicted_fraud, alerted, .. } => {
                assert!(predicted_fraud);
                assert!(alerted);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let below = f64::from_bits(0.4_f64.to_bits() - 1);
        let h = harness(vec![Step::Record(t1())], StubScorer::fixed(below));
        match h.orchestrator.run_cycle().await {
            CycleOutcome::Recorded { predicted_fraud, alerted, .. } => {
                assert!(!predicted_fraud);
                assert!(!alerted);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(h.sink.seen().is_empty());
    }

    #[tokio::test]
    async fn test_scorer_sees_transformed_features() {
        let scorer = StubScorer::with(|fv| {
            assert_eq!(fv.hour, 2);
            assert_eq!(fv.day_of_week, 1);
            assert!(fv.is_night);
            assert!(!fv.is_weekend);
            assert_eq!(fv.category, "electronics");
            assert_eq!(fv.schema_version, "v1");
            Ok(0.1)
        });
        let h = harness(vec![Step::Record(t1())], scorer);
        assert!(matches!(h.orchestrator.run_cycle().await, CycleOutcome::Recorded { .. }));
    }

    #[tokio::test]
    async fn test_malformed_record_is_skipped() {
        let mut bad = t1();
        bad.as_object_mut().unwrap().remove("amt");
        let h = harness(vec![Step::Record(bad)], StubScorer::fixed(0.87));

        let outcome = h.orchestrator.run_cycle().await;
        assert_eq!(
            outcome,
            CycleOutcome::Skipped {
                transaction_id: Some("T1".to_string()),
                stage: Stage::Transforming,
            }
        );
        assert!(h.store.is_empty());

        let stats = h.orchestrator.stats().snapshot();
        assert_eq!(stats.processed, 0);
        assert_eq!(stats.skipped, 1);
    }

    #[tokio::test]
    async fn test_scoring_failure_is_skipped() {
        let h = harness(
            vec![Step::Record(t1())],
            StubScorer::with(|_| Err(PipelineError::Scoring("bad tensor".to_string()))),
        );
        let outcome = h.orchestrator.run_cycle().await;
        assert!(matches!(outcome, CycleOutcome::Skipped { stage: Stage::Scoring, .. }));
        assert!(h.store.is_empty());
        assert!(h.sink.seen().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_probability_is_skipped() {
        let h = harness(vec![Step::Record(t1())], StubScorer::fixed(f64::NAN));
        let outcome = h.orchestrator.run_cycle().await;
        assert!(matches!(outcome, CycleOutcome::Skipped { stage: Stage::Scoring, .. }));
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_store_outage_suppresses_alert() {
        let memory = Arc::new(MemoryResultStore::new());
        let sink = RecordingSink::new(memory.clone());
        let h = harness_with(
            vec![Step::Record(t1())],
            StubScorer::fixed(0.87),
            memory,
            Arc::new(UnavailableStore),
            sink,
        );

        let outcome = h.orchestrator.run_cycle().await;
        assert_eq!(outcome, CycleOutcome::NotPersisted { transaction_id: "T1".to_string() });
        assert!(h.sink.seen().is_empty());
        assert_eq!(h.orchestrator.policy().pause_after(&outcome), h.orchestrator.policy().poll_interval);

        let stats = h.orchestrator.stats().snapshot();
        assert_eq!(stats.store_failures, 1);
        assert_eq!(stats.processed, 0);
    }

    #[tokio::test]
    async fn test_alert_failure_keeps_persisted_row() {
        let store = Arc::new(MemoryResultStore::new());
        let sink = RecordingSink::failing(store.clone());
        let h = harness_with(vec![Step::Record(t1())], StubScorer::fixed(0.87), store.clone(), store, sink);

        match h.orchestrator.run_cycle().await {
            CycleOutcome::Recorded { alerted, .. } => assert!(!alerted),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(h.store.get("T1").await.unwrap().is_some());
        assert_eq!(h.orchestrator.stats().snapshot().alert_failures, 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_does_not_leak_into_next_cycle() {
        let clean = harness(vec![Step::Record(t1())], StubScorer::fixed(0.87));
        let clean_outcome = clean.orchestrator.run_cycle().await;

        let h = harness(vec![Step::Fail("connection reset"), Step::Record(t1())], StubScorer::fixed(0.87));
        assert_eq!(h.orchestrator.run_cycle().await, CycleOutcome::FetchFailed);
        assert_eq!(h.orchestrator.run_cycle().await, clean_outcome);
        assert_eq!(
            h.store.get("T1").await.unwrap(),
            clean.store.get("T1").await.unwrap()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_workers_record_and_alert_once() {
        for _ in 0..20 {
            let store = Arc::new(MemoryResultStore::new());
            let sink = RecordingSink::new(store.clone());
            let worker = |sink: Arc<RecordingSink>| {
                harness_with(
                    vec![Step::Record(t1())],
                    StubScorer::fixed(0.87),
                    store.clone(),
                    store.clone(),
                    sink,
                )
            };
            let (a, b) = (worker(sink.clone()), worker(sink.clone()));

            let (first, second) = tokio::join!(a.orchestrator.run_cycle(), b.orchestrator.run_cycle());
            let outcomes = [first, second];

            let duplicates = outcomes
                .iter()
                .filter(|o| matches!(o, CycleOutcome::Duplicate { .. }))
                .count();
            let alerted = outcomes
                .iter()
                .filter(|o| matches!(o, CycleOutcome::Recorded { alerted: true, .. }))
                .count();

            assert_eq!(duplicates, 1, "outcomes: {outcomes:?}");
            assert_eq!(alerted, 1, "outcomes: {outcomes:?}");
            assert_eq!(store.len(), 1);
            assert_eq!(sink.seen(), vec![("T1".to_string(), true)]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_fetch_timeouts_then_recovery() {
        let h = harness(
            vec![Step::Hang, Step::Hang, Step::Hang, Step::Record(t1())],
            StubScorer::fixed(0.87),
        );

        for _ in 0..3 {
            assert_eq!(h.orchestrator.run_cycle().await, CycleOutcome::FetchFailed);
        }
        let stats = h.orchestrator.stats().snapshot();
        assert_eq!(stats.fetch_failures, 3);
        assert_eq!(stats.processed, 0);

        assert!(matches!(h.orchestrator.run_cycle().await, CycleOutcome::Recorded { .. }));
        assert_eq!(h.source.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_cadence_after_fetch_failures() {
        let h = harness(
            vec![Step::Fail("down"), Step::Fail("down"), Step::Fail("down"), Step::Fail("down")],
            StubScorer::fixed(0.1),
        );
        let orchestrator = Arc::new(h.orchestrator);
        let shutdown = CancellationToken::new();

        let handle = {
            let orchestrator = orchestrator.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { orchestrator.run(shutdown).await })
        };

        // fetches at t = 0, 10, 20, 30 under the 10s backoff
        sleep(Duration::from_secs(35)).await;
        assert_eq!(h.source.calls(), 4);

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(orchestrator.stats().snapshot().fetch_failures, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_normal_cadence_and_shutdown() {
        let h = harness(vec![], StubScorer::fixed(0.1));
        let orchestrator = Arc::new(h.orchestrator);
        let shutdown = CancellationToken::new();

        let handle = {
            let orchestrator = orchestrator.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { orchestrator.run(shutdown).await })
        };

        // fetches at t = 0 and 60 under the 60s interval
        sleep(Duration::from_secs(65)).await;
        assert_eq!(h.source.calls(), 2);
        assert_eq!(h.store.len(), 2);

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(h.source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_hanging_fetch() {
        let h = harness(vec![Step::Hang], StubScorer::fixed(0.1));
        let mut policy = PollPolicy::default();
        policy.fetch_timeout = Duration::from_secs(3600);
        let orchestrator = Arc::new(Orchestrator::new(
            0,
            h.orchestrator.components.clone(),
            Threshold::default(),
            policy,
        ));
        let shutdown = CancellationToken::new();

        let handle = {
            let orchestrator = orchestrator.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { orchestrator.run(shutdown).await })
        };

        sleep(Duration::from_secs(1)).await;
        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(orchestrator.stats().snapshot().fetch_failures, 0);
    }
}
