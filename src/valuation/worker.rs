//! Background valuation worker
//!
//! Claims pending valuations, calls the pricing collaborator with bounded
//! retries and records the outcome through the recorder. Woken early by
//! appraisal confirmations, otherwise polls.

use crate::db::{ConversationContext, DbResult, Valuation};
use crate::engine::ValuationCompute;
use crate::event_log::payload::{
    self, MessagePayload, ValuationCompletedPayload, ValuationFailedPayload,
};
use crate::event_log::{RecordError, Recorder};
use crate::orchestrator::Prompts;
use crate::state_machine::EventType;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Compute calls per valuation before it is recorded as failed
    pub max_attempts: u32,
    /// Fixed wait between attempts
    pub backoff: Duration,
    /// How often to look for pending valuations when not woken
    pub poll_interval: Duration,
    /// Pending valuations handled per pass
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
            poll_interval: Duration::from_secs(5),
            batch_size: 20,
        }
    }
}

pub struct ValuationWorker<C: ValuationCompute> {
    recorder: Recorder,
    compute: C,
    prompts: Arc<Prompts>,
    config: WorkerConfig,
    wake: Arc<Notify>,
}

impl<C: ValuationCompute> ValuationWorker<C> {
    pub fn new(
        recorder: Recorder,
        compute: C,
        prompts: Arc<Prompts>,
        config: WorkerConfig,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            recorder,
            compute,
            prompts,
            config,
            wake,
        }
    }

    /// Return valuations a previous process left `RUNNING` to the queue
    pub fn requeue_interrupted(&self) -> DbResult<usize> {
        let count = self.recorder.db().requeue_running_valuations()?;
        if count > 0 {
            tracing::warn!(count, "Requeued interrupted valuations");
        }
        Ok(count)
    }

    /// Process pending valuations until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            max_attempts = self.config.max_attempts,
            poll_secs = self.config.poll_interval.as_secs(),
            "Valuation worker started"
        );
        loop {
            if let Err(e) = self.run_once().await {
                tracing::error!(error = %e, "Valuation pass failed");
            }
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = self.wake.notified() => {}
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        tracing::info!("Valuation worker stopped");
    }

    /// One pass over the pending queue; returns how many valuations finished
    pub async fn run_once(&self) -> DbResult<usize> {
        let pending = self
            .recorder
            .db()
            .pending_valuation_ids(self.config.batch_size)?;
        let mut finished = 0;
        for id in pending {
            match self.process(id).await {
                Ok(true) => finished += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(valuation_id = id, error = %e, "Valuation processing failed");
                }
            }
        }
        Ok(finished)
    }

    /// Claim and run one valuation. `Ok(false)` if another worker owns it or
    /// it already finished.
    pub async fn process(&self, valuation_id: i64) -> Result<bool, RecordError> {
        let Some(valuation) = self.recorder.db().claim_valuation(valuation_id)? else {
            tracing::debug!(valuation_id, "Valuation not claimable");
            return Ok(false);
        };
        tracing::info!(
            valuation_id,
            conv_id = %valuation.conversation_id,
            "Valuation claimed"
        );

        if let Err(e) = self.run_claimed(&valuation).await {
            // Back to PENDING so a later pass picks it up again
            match self.recorder.db().release_valuation(valuation_id) {
                Ok(_) => {
                    tracing::warn!(valuation_id, error = %e, "Valuation released after error");
                }
                Err(release) => {
                    tracing::error!(valuation_id, error = %release, "Failed to release valuation");
                }
            }
            return Err(e);
        }
        Ok(true)
    }

    /// Attempt loop for a claimed valuation, ending in its terminal event
    async fn run_claimed(&self, valuation: &Valuation) -> Result<(), RecordError> {
        let valuation_id = valuation.id;
        loop {
            let attempts = self.recorder.db().bump_valuation_attempts(valuation_id)?;
            match self
                .compute
                .compute(&valuation.tenant_id, &valuation.input_snapshot)
                .await
            {
                Ok(result) => {
                    let summary = self.prompts.valuation_summary(&result);
                    self.record_outcome(
                        valuation,
                        "completed",
                        EventType::ValuationCompleted,
                        payload::to_value(&ValuationCompletedPayload {
                            valuation_id,
                            snapshot_hash: valuation.snapshot_hash.clone(),
                            result,
                        }),
                        summary,
                    )?;
                    tracing::info!(valuation_id, attempts, "Valuation completed");
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempts < self.config.max_attempts => {
                    tracing::warn!(
                        valuation_id,
                        attempts,
                        error = %e,
                        "Valuation attempt failed, retrying"
                    );
                    tokio::time::sleep(self.config.backoff).await;
                }
                Err(e) => {
                    self.record_outcome(
                        valuation,
                        "failed",
                        EventType::ValuationFailed,
                        payload::to_value(&ValuationFailedPayload {
                            valuation_id,
                            snapshot_hash: valuation.snapshot_hash.clone(),
                            error: e.message.clone(),
                            attempts,
                        }),
                        self.prompts.valuation_failed.clone(),
                    )?;
                    tracing::error!(valuation_id, attempts, error = %e, "Valuation failed");
                    return Ok(());
                }
            }
        }
    }

    /// Record the terminal event plus the assistant message announcing it.
    ///
    /// Keyed by the request event too, so a failed valuation that was
    /// requested again can record a fresh outcome.
    fn record_outcome(
        &self,
        valuation: &Valuation,
        outcome: &str,
        event_type: EventType,
        event_payload: serde_json::Value,
        message: String,
    ) -> Result<(), RecordError> {
        let ctx = ConversationContext::new(&valuation.tenant_id, &valuation.conversation_id);
        let correlation_id = Uuid::new_v4().to_string();
        let key = format!(
            "valuation:{}:{}:{outcome}",
            valuation.id, valuation.event_id
        );

        self.recorder
            .record(&ctx, event_type, event_payload, Some(&key), Some(&correlation_id))?;
        self.recorder.record(
            &ctx,
            EventType::AssistantMessageCreated,
            payload::to_value(&MessagePayload { text: message }),
            Some(&format!("{key}:assistant")),
            Some(&correlation_id),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{AnswerMap, Database, ValuationStatus};
    use crate::engine::testing::MockValuationCompute;
    use crate::event_log::payload::ValuationRequestedPayload;
    use crate::state_machine::ConvState;
    use crate::valuation::{snapshot_hash, ComputeError, PriceRange, ValuationResult};

    struct Setup {
        db: Database,
        worker: ValuationWorker<Arc<MockValuationCompute>>,
        compute: Arc<MockValuationCompute>,
        valuation_id: i64,
    }

    fn setup(max_attempts: u32) -> Setup {
        let db = Database::open_in_memory().unwrap();
        db.create_tenant("acme", "Acme").unwrap();
        db.create_conversation("conv-1", "acme", "hash-1").unwrap();
        let recorder = Recorder::new(db.clone());

        let snapshot = AnswerMap::from([("maker".to_string(), "Omega".to_string())]);
        recorder
            .record(
                &ConversationContext::new("acme", "conv-1"),
                EventType::ValuationRequested,
                payload::to_value(&ValuationRequestedPayload {
                    snapshot_hash: snapshot_hash(&snapshot),
                    snapshot,
                }),
                None,
                None,
            )
            .unwrap();
        let valuation_id = db.list_valuations("conv-1").unwrap()[0].id;

        let compute = Arc::new(MockValuationCompute::new());
        let worker = ValuationWorker::new(
            recorder,
            compute.clone(),
            Arc::new(Prompts::default()),
            WorkerConfig {
                max_attempts,
                backoff: Duration::ZERO,
                poll_interval: Duration::from_millis(10),
                batch_size: 10,
            },
            Arc::new(Notify::new()),
        );

        Setup {
            db,
            worker,
            compute,
            valuation_id,
        }
    }

    fn result() -> ValuationResult {
        ValuationResult {
            count: 4,
            median: Some(1200.0),
            range: Some(PriceRange {
                low: 1000.0,
                high: 1500.0,
            }),
            confidence: 0.7,
            ..ValuationResult::default()
        }
    }

    #[tokio::test]
    async fn test_success_records_completion_and_summary() {
        let s = setup(3);
        s.compute.queue_result(result());

        assert_eq!(s.worker.run_once().await.unwrap(), 1);

        let valuation = s.db.get_valuation(s.valuation_id).unwrap();
        assert_eq!(valuation.status, ValuationStatus::Completed);
        assert_eq!(valuation.attempts, 1);
        assert_eq!(valuation.result.unwrap()["median"], 1200.0);
        assert_eq!(s.db.get_conversation("conv-1").unwrap().state, ConvState::ValuationReady);

        let messages = s.db.list_messages("conv-1").unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].text.contains("$1200"));

        let (tenant, snapshot) = s.compute.calls.lock().unwrap()[0].clone();
        assert_eq!(tenant, "acme");
        assert_eq!(snapshot.get("maker").map(String::as_str), Some("Omega"));
    }

    #[tokio::test]
    async fn test_terminal_valuation_is_not_reprocessed() {
        let s = setup(3);
        s.compute.queue_result(result());
        s.worker.run_once().await.unwrap();
        let events = s.db.conversation_events("conv-1").unwrap().len();

        assert!(!s.worker.process(s.valuation_id).await.unwrap());
        assert_eq!(s.worker.run_once().await.unwrap(), 0);
        assert_eq!(s.compute.call_count(), 1);
        assert_eq!(s.db.conversation_events("conv-1").unwrap().len(), events);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let s = setup(3);
        s.compute.queue_error(ComputeError::network("timeout"));
        s.compute.queue_result(result());

        s.worker.run_once().await.unwrap();

        let valuation = s.db.get_valuation(s.valuation_id).unwrap();
        assert_eq!(valuation.status, ValuationStatus::Completed);
        assert_eq!(valuation.attempts, 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_record_failure() {
        let s = setup(3);
        for _ in 0..3 {
            s.compute.queue_error(ComputeError::server_error("503"));
        }

        s.worker.run_once().await.unwrap();

        let valuation = s.db.get_valuation(s.valuation_id).unwrap();
        assert_eq!(valuation.status, ValuationStatus::Failed);
        assert_eq!(valuation.attempts, 3);
        assert_eq!(valuation.error.as_deref(), Some("503"));
        assert_eq!(s.compute.call_count(), 3);
        assert_eq!(s.db.get_conversation("conv-1").unwrap().state, ConvState::ValuationFailed);

        let key = format!("valuation:{}:{}:failed", s.valuation_id, valuation.event_id);
        assert!(s.db.find_event_by_key("conv-1", &key).unwrap().is_some());
        let messages = s.db.list_messages("conv-1").unwrap();
        assert_eq!(messages[0].text, Prompts::default().valuation_failed);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        let s = setup(3);
        s.compute.queue_error(ComputeError::invalid_request("bad snapshot"));

        s.worker.run_once().await.unwrap();

        let valuation = s.db.get_valuation(s.valuation_id).unwrap();
        assert_eq!(valuation.status, ValuationStatus::Failed);
        assert_eq!(valuation.attempts, 1);
    }

    #[tokio::test]
    async fn test_requeue_interrupted() {
        let s = setup(3);
        // Simulate a crash after the claim
        s.db.claim_valuation(s.valuation_id).unwrap().unwrap();
        assert_eq!(s.worker.run_once().await.unwrap(), 0);

        assert_eq!(s.worker.requeue_interrupted().unwrap(), 1);
        s.compute.queue_result(result());
        assert_eq!(s.worker.run_once().await.unwrap(), 1);
        assert_eq!(
            s.db.get_valuation(s.valuation_id).unwrap().status,
            ValuationStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_record_error_releases_claim() {
        let s = setup(3);
        s.compute.queue_result(result());
        s.compute.queue_result(result());
        s.db.lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER block_completion BEFORE INSERT ON events
                 WHEN NEW.type = 'valuation.completed'
                 BEGIN SELECT RAISE(ABORT, 'blocked'); END;",
            )
            .unwrap();

        assert!(s.worker.process(s.valuation_id).await.is_err());
        let valuation = s.db.get_valuation(s.valuation_id).unwrap();
        assert_eq!(valuation.status, ValuationStatus::Pending);
        assert_eq!(valuation.attempts, 1);
        assert!(s.db.list_messages("conv-1").unwrap().is_empty());

        s.db.lock()
            .unwrap()
            .execute_batch("DROP TRIGGER block_completion;")
            .unwrap();
        assert_eq!(s.worker.run_once().await.unwrap(), 1);
        assert_eq!(
            s.db.get_valuation(s.valuation_id).unwrap().status,
            ValuationStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let s = setup(3);
        s.compute.queue_result(result());
        let shutdown = CancellationToken::new();
        let db = s.db.clone();
        let valuation_id = s.valuation_id;

        let handle = tokio::spawn(s.worker.run(shutdown.clone()));
        for _ in 0..50 {
            if db.get_valuation(valuation_id).unwrap().status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            db.get_valuation(valuation_id).unwrap().status,
            ValuationStatus::Completed
        );
    }
}
