//! Background reconciliation loop for 3D generation jobs.
//!
//! [`JobTracker`] owns at most one background task per process. Each cycle
//! queries the store for the trackable set, polls the provider for every
//! record (bounded fan-out, per-call timeout) and writes one patch per
//! record. Each write is guarded on the state and job id that were polled,
//! so a record resubmitted mid-cycle is left alone. The task sleeps for the configured interval between cycles and
//! exits promptly once [`JobTracker::stop`] cancels it.
//!
//! Transitions are broadcast as [`TrackerEvent`]s. Call
//! [`JobTracker::subscribe`] to receive them.

use std::sync::Arc;

use charforge_core::types::DbId;
use charforge_db::filter::GenerationFilter;
use charforge_db::models::generation::GenerationRecord;
use charforge_db::store::{GenerationStore, StoreError};
use charforge_meshy::ModelProvider;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::TrackerConfig;
use crate::events::{TrackerEvent, EVENT_CHANNEL_CAPACITY};
use crate::reconcile::{
    plan_exhausted, plan_poll, plan_settle, PollOutcome, PollPlan, Transition,
};

/// Drives trackable generation records to a terminal state.
///
/// Constructed once by the process entry point and shared as an `Arc` with
/// whatever needs to call [`start`](Self::start).
pub struct JobTracker {
    store: Arc<dyn GenerationStore>,
    provider: Arc<dyn ModelProvider>,
    config: TrackerConfig,
    event_tx: broadcast::Sender<TrackerEvent>,
    /// The background task, when one is running.
    running: Mutex<Option<RunningLoop>>,
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// What happened to one record during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// A patch was persisted.
    Applied(Transition),
    /// Nothing was written (no job id, or provider misconfigured).
    Skipped,
    /// The record was resubmitted, settled elsewhere or deleted before the
    /// update landed.
    Superseded,
    /// The store rejected the update; the record is retried next cycle.
    WriteFailed,
}

/// Per-cycle counters, mostly for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub discovered: usize,
    pub progressed: usize,
    pub completed: usize,
    pub failed: usize,
    pub exhausted: usize,
    pub unreachable: usize,
    pub settled: usize,
    pub skipped: usize,
    pub superseded: usize,
    pub write_failed: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Applied(Transition::Progressed) => self.progressed += 1,
            RecordOutcome::Applied(Transition::Completed) => self.completed += 1,
            RecordOutcome::Applied(Transition::Failed) => self.failed += 1,
            RecordOutcome::Applied(Transition::Exhausted) => self.exhausted += 1,
            RecordOutcome::Applied(Transition::Unreachable) => self.unreachable += 1,
            RecordOutcome::Applied(Transition::Settled) => self.settled += 1,
            RecordOutcome::Skipped => self.skipped += 1,
            RecordOutcome::Superseded => self.superseded += 1,
            RecordOutcome::WriteFailed => self.write_failed += 1,
        }
    }
}

impl JobTracker {
    pub fn new(
        store: Arc<dyn GenerationStore>,
        provider: Arc<dyn ModelProvider>,
        config: TrackerConfig,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            store,
            provider,
            config,
            event_tx,
            running: Mutex::new(None),
        })
    }

    /// Subscribe to tracker events.
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Spawn the background loop unless one is already running.
    ///
    /// Returns `true` if this call started the loop. Concurrent callers are
    /// serialised on the internal lock, so exactly one of them wins.
    pub async fn start(self: &Arc<Self>) -> bool {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            if !current.handle.is_finished() {
                tracing::debug!("Job tracker already running");
                return false;
            }
            tracing::warn!("Job tracker task had exited; restarting");
        }

        let cancel = CancellationToken::new();
        let tracker = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { tracker.run(token).await });

        *running = Some(RunningLoop { cancel, handle });

        tracing::info!(
            interval_secs = self.config.poll_interval.as_secs(),
            max_attempts = self.config.max_polling_attempts,
            concurrency = self.config.poll_concurrency,
            "Job tracker started",
        );
        true
    }

    /// Cancel the background loop and wait for it to exit.
    ///
    /// Waits up to `shutdown_timeout` before aborting the task. Returns
    /// `false` (and does nothing) when the loop was not running.
    pub async fn stop(&self) -> bool {
        let mut running = self.running.lock().await;
        let Some(RunningLoop { cancel, handle }) = running.take() else {
            tracing::debug!("Job tracker not running; nothing to stop");
            return false;
        };

        tracing::info!("Stopping job tracker");
        cancel.cancel();

        let abort = handle.abort_handle();
        match tokio::time::timeout(self.config.shutdown_timeout, handle).await {
            Ok(Ok(())) => tracing::info!("Job tracker stopped"),
            Ok(Err(e)) => tracing::error!(error = %e, "Job tracker task ended abnormally"),
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.config.shutdown_timeout.as_secs(),
                    "Job tracker did not stop in time; aborting",
                );
                abort.abort();
            }
        }
        true
    }

    /// Whether a background loop is currently alive.
    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|current| !current.handle.is_finished())
    }

    /// Run one reconciliation pass over the trackable set.
    ///
    /// Fails only when the trackable set cannot be queried within
    /// `store_timeout`; per-record failures are logged and counted in the
    /// report.
    pub async fn run_cycle(&self) -> Result<CycleReport, StoreError> {
        let filter = GenerationFilter::trackable();
        let query = self.store.find_many(&filter);
        let records = tokio::time::timeout(self.config.store_timeout, query)
            .await
            .map_err(|_| StoreError::Timeout(self.config.store_timeout))??;

        let mut report = CycleReport {
            discovered: records.len(),
            ..Default::default()
        };
        if records.is_empty() {
            return Ok(report);
        }

        let outcomes: Vec<RecordOutcome> = stream::iter(records)
            .map(|record| self.reconcile(record))
            .buffer_unordered(self.config.poll_concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            report.record(outcome);
        }
        Ok(report)
    }

    // ---- private helpers ----

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.run_cycle() => match result {
                    Ok(report) if report.discovered > 0 => {
                        tracing::debug!(?report, "Reconciliation cycle finished");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to query trackable generations");
                    }
                },
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        tracing::info!("Job tracker loop exited");
    }

    /// Decide, persist and announce the update for a single record.
    async fn reconcile(&self, record: GenerationRecord) -> RecordOutcome {
        let plan = if record.tracking_state.is_terminal() {
            plan_settle()
        } else if record.polling_attempts >= self.config.max_polling_attempts {
            plan_exhausted(&record)
        } else {
            let Some(job_id) = record.external_job_id.as_deref() else {
                tracing::warn!(
                    generation_id = record.id,
                    "Record marked for polling has no external job id; skipping",
                );
                return RecordOutcome::Skipped;
            };
            let Some(outcome) = self.poll_provider(record.id, job_id).await else {
                return RecordOutcome::Skipped;
            };
            plan_poll(
                &record,
                &outcome,
                Utc::now(),
                self.config.max_polling_attempts,
            )
        };

        let guard =
            GenerationFilter::unchanged(record.tracking_state, record.external_job_id.as_deref());
        let write = self.store.update_where(record.id, &guard, &plan.patch);
        match tokio::time::timeout(self.config.store_timeout, write).await {
            Ok(Ok(true)) => {
                self.announce(&record, &plan);
                RecordOutcome::Applied(plan.transition)
            }
            Ok(Ok(false)) => {
                tracing::warn!(
                    generation_id = record.id,
                    external_job_id = ?record.external_job_id,
                    "Generation changed or vanished before update; dropping result",
                );
                RecordOutcome::Superseded
            }
            Err(_) => {
                tracing::error!(
                    generation_id = record.id,
                    timeout_secs = self.config.store_timeout.as_secs(),
                    "Generation update timed out",
                );
                RecordOutcome::WriteFailed
            }
            Ok(Err(e)) => {
                tracing::error!(
                    generation_id = record.id,
                    error = %e,
                    "Failed to persist generation update",
                );
                RecordOutcome::WriteFailed
            }
        }
    }

    /// Ask the provider for the job status, bounded by `provider_timeout`.
    ///
    /// `None` means the call could not be made because of local
    /// configuration; the record keeps its attempt budget.
    async fn poll_provider(&self, generation_id: DbId, job_id: &str) -> Option<PollOutcome> {
        let call = self.provider.get_status(job_id);
        match tokio::time::timeout(self.config.provider_timeout, call).await {
            Ok(Ok(status)) => Some(PollOutcome::Status(status)),
            Ok(Err(e)) if e.is_configuration() => {
                tracing::error!(
                    generation_id,
                    external_job_id = job_id,
                    error = %e,
                    "Provider is not configured; skipping record",
                );
                None
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    generation_id,
                    external_job_id = job_id,
                    error = %e,
                    "Provider status call failed",
                );
                Some(PollOutcome::Unreachable(e.to_string()))
            }
            Err(_) => {
                tracing::warn!(
                    generation_id,
                    external_job_id = job_id,
                    timeout_secs = self.config.provider_timeout.as_secs(),
                    "Provider status call timed out",
                );
                Some(PollOutcome::Unreachable("provider call timed out".into()))
            }
        }
    }

    /// Log the persisted transition and broadcast it.
    fn announce(&self, record: &GenerationRecord, plan: &PollPlan) {
        let generation_id = record.id;
        let external_job_id = record.external_job_id.clone().unwrap_or_default();
        let attempt = plan.patch.polling_attempts.unwrap_or(record.polling_attempts);

        let event = match plan.transition {
            Transition::Progressed => {
                let progress = plan.patch.progress.unwrap_or(record.progress);
                tracing::debug!(generation_id, attempt, progress, "Generation still processing");
                if progress <= record.progress {
                    return;
                }
                TrackerEvent::ModelProgress {
                    generation_id,
                    external_job_id,
                    progress,
                }
            }
            Transition::Completed => {
                tracing::info!(generation_id, %external_job_id, attempt, "3D model completed");
                let Some(Some(artifacts)) = plan.patch.result_payload.clone() else {
                    return;
                };
                TrackerEvent::ModelCompleted {
                    generation_id,
                    external_job_id,
                    artifacts,
                }
            }
            Transition::Failed | Transition::Exhausted => {
                if plan.transition == Transition::Exhausted {
                    tracing::warn!(
                        generation_id,
                        %external_job_id,
                        attempt,
                        "Max polling attempts exceeded; marking failed",
                    );
                } else {
                    tracing::info!(generation_id, %external_job_id, attempt, "3D model failed");
                }
                let error = plan
                    .patch
                    .error_payload
                    .clone()
                    .flatten()
                    .unwrap_or(serde_json::Value::Null);
                TrackerEvent::ModelFailed {
                    generation_id,
                    external_job_id,
                    error,
                }
            }
            Transition::Unreachable => {
                tracing::debug!(generation_id, attempt, "Poll attempt recorded without a status");
                return;
            }
            Transition::Settled => {
                tracing::info!(
                    generation_id,
                    state = %record.tracking_state,
                    "Cleared polling flag on terminal generation",
                );
                return;
            }
        };

        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}
