mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use charforge_core::tracking::{
    TrackingState, DEFAULT_TASK_ERROR, MAX_ATTEMPTS_EXCEEDED, MAX_ATTEMPTS_EXCEEDED_CODE,
};
use async_trait::async_trait;
use charforge_core::types::DbId;
use charforge_db::memory::MemoryGenerationStore;
use charforge_db::models::generation::CreateGeneration;
use charforge_db::store::StoreError;
use charforge_meshy::{ModelProvider, ProviderError, TaskStatus};
use charforge_worker::events::TrackerEvent;
use charforge_worker::tracker::{CycleReport, JobTracker};
use common::{build_tracker, seed_processing, test_config, Reply, ScriptedProvider};

fn setup() -> (Arc<MemoryGenerationStore>, Arc<ScriptedProvider>) {
    (Arc::new(MemoryGenerationStore::new()), ScriptedProvider::new())
}

// ---------------------------------------------------------------------------
// Single cycle behaviour
// ---------------------------------------------------------------------------

#[tokio::test]
async fn succeeded_job_completes_record() {
    let (store, provider) = setup();
    let id = seed_processing(&store, "job-a", 3);
    provider.script("job-a", Reply::succeeded("x"));
    let tracker = build_tracker(&store, &provider, test_config());

    let report = tracker.run_cycle().await.unwrap();
    assert_eq!(report.completed, 1);

    let record = store.get(id).unwrap();
    assert_eq!(record.tracking_state, TrackingState::Completed);
    assert_eq!(record.is_polling, Some(false));
    assert_eq!(record.artifacts().unwrap().glb.as_deref(), Some("x"));
    assert_eq!(record.polling_attempts, 4);
    assert_eq!(record.progress, 100);
    assert!(record.has_3d_model);
    assert!(!record.is_3d_generating);
    assert!(record.last_polled_at.is_some());
}

#[tokio::test]
async fn failed_job_stores_error_payload() {
    let (store, provider) = setup();
    let id = seed_processing(&store, "job-a", 0);
    provider.script("job-a", Reply::failed(serde_json::json!({})));
    let tracker = build_tracker(&store, &provider, test_config());

    tracker.run_cycle().await.unwrap();

    let record = store.get(id).unwrap();
    assert_eq!(record.tracking_state, TrackingState::Failed);
    assert_eq!(record.is_polling, Some(false));
    assert_eq!(record.error_payload.unwrap()["error"], DEFAULT_TASK_ERROR);
    assert!(record.result_payload.is_none());
}

#[tokio::test]
async fn processing_job_updates_progress_and_keeps_polling() {
    let (store, provider) = setup();
    let id = seed_processing(&store, "job-a", 5);
    provider.script("job-a", Reply::processing(42));
    let tracker = build_tracker(&store, &provider, test_config());

    let report = tracker.run_cycle().await.unwrap();
    assert_eq!(report.progressed, 1);

    let record = store.get(id).unwrap();
    assert_eq!(record.tracking_state, TrackingState::Processing);
    assert_eq!(record.is_polling, Some(true));
    assert_eq!(record.progress, 42);
    assert_eq!(record.polling_attempts, 6);
}

#[tokio::test]
async fn provider_error_keeps_state_but_counts_attempt() {
    let (store, provider) = setup();
    let id = seed_processing(&store, "job-a", 10);
    provider.script("job-a", Reply::ApiError(503));
    let tracker = build_tracker(&store, &provider, test_config());

    let report = tracker.run_cycle().await.unwrap();
    assert_eq!(report.unreachable, 1);

    let record = store.get(id).unwrap();
    assert_eq!(record.tracking_state, TrackingState::Processing);
    assert_eq!(record.is_polling, Some(true));
    assert_eq!(record.polling_attempts, 11);
    assert!(record.last_polled_at.is_some());
}

#[tokio::test]
async fn record_at_ceiling_fails_without_polling() {
    let (store, provider) = setup();
    let id = seed_processing(&store, "job-a", 120);
    provider.script("job-a", Reply::succeeded("x"));
    let tracker = build_tracker(&store, &provider, test_config());

    let report = tracker.run_cycle().await.unwrap();
    assert_eq!(report.exhausted, 1);
    assert_eq!(provider.status_calls(), 0);

    let record = store.get(id).unwrap();
    assert_eq!(record.tracking_state, TrackingState::Failed);
    assert_eq!(record.is_polling, Some(false));
    assert_eq!(record.polling_attempts, 120);
    assert_eq!(record.error_payload.unwrap()["error"], MAX_ATTEMPTS_EXCEEDED);
}

#[tokio::test(start_paused = true)]
async fn timeout_on_last_attempt_fails_record() {
    let (store, provider) = setup();
    let id = seed_processing(&store, "job-a", 119);
    provider.script("job-a", Reply::Hang);
    let tracker = build_tracker(&store, &provider, test_config());

    tracker.run_cycle().await.unwrap();

    let record = store.get(id).unwrap();
    assert_eq!(record.tracking_state, TrackingState::Failed);
    assert_eq!(record.polling_attempts, 120);
    assert_eq!(record.is_polling, Some(false));
    let error = record.error_payload.unwrap();
    assert_eq!(error["error"], MAX_ATTEMPTS_EXCEEDED);
    assert_eq!(error["code"], MAX_ATTEMPTS_EXCEEDED_CODE);
}

#[tokio::test(start_paused = true)]
async fn hanging_provider_call_does_not_stall_other_records() {
    let (store, provider) = setup();
    let slow = seed_processing(&store, "job-slow", 0);
    let fast = seed_processing(&store, "job-fast", 0);
    provider.script("job-slow", Reply::Hang);
    provider.script("job-fast", Reply::succeeded("fast.glb"));
    let tracker = build_tracker(&store, &provider, test_config());

    let report = tracker.run_cycle().await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(report.unreachable, 1);

    assert_eq!(store.get(fast).unwrap().tracking_state, TrackingState::Completed);
    let slow = store.get(slow).unwrap();
    assert_eq!(slow.tracking_state, TrackingState::Processing);
    assert_eq!(slow.polling_attempts, 1);
}

#[tokio::test]
async fn missing_api_key_skips_without_consuming_attempt() {
    let (store, provider) = setup();
    let id = seed_processing(&store, "job-a", 4);
    provider.script("job-a", Reply::MissingKey);
    let tracker = build_tracker(&store, &provider, test_config());

    let report = tracker.run_cycle().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(store.update_count(), 0);

    let record = store.get(id).unwrap();
    assert_eq!(record.polling_attempts, 4);
    assert!(record.last_polled_at.is_none());
}

#[tokio::test]
async fn attempts_grow_by_one_per_cycle() {
    let (store, provider) = setup();
    let id = seed_processing(&store, "job-a", 0);
    provider.script("job-a", Reply::processing(10));
    let tracker = build_tracker(&store, &provider, test_config());

    for expected in 1..=3 {
        tracker.run_cycle().await.unwrap();
        assert_eq!(store.get(id).unwrap().polling_attempts, expected);
    }
}

#[tokio::test]
async fn untracked_records_are_not_polled() {
    let (store, provider) = setup();
    store.create(CreateGeneration::default());
    let id = seed_processing(&store, "job-a", 0);
    let mut stopped = store.get(id).unwrap();
    stopped.is_polling = Some(false);
    store.insert(stopped);
    let tracker = build_tracker(&store, &provider, test_config());

    let report = tracker.run_cycle().await.unwrap();
    assert_eq!(report, CycleReport::default());
    assert_eq!(provider.status_calls(), 0);
}

#[tokio::test]
async fn record_with_unset_polling_flag_is_picked_up() {
    let (store, provider) = setup();
    let id = seed_processing(&store, "job-a", 0);
    let mut record = store.get(id).unwrap();
    record.is_polling = None;
    store.insert(record);
    provider.script("job-a", Reply::succeeded("x"));
    let tracker = build_tracker(&store, &provider, test_config());

    let report = tracker.run_cycle().await.unwrap();
    assert_eq!(report.discovered, 1);
    assert_eq!(store.get(id).unwrap().tracking_state, TrackingState::Completed);
}

#[tokio::test]
async fn terminal_record_with_stale_flag_is_settled() {
    let (store, provider) = setup();
    let id = seed_processing(&store, "job-a", 9);
    let mut record = store.get(id).unwrap();
    record.tracking_state = TrackingState::Completed;
    store.insert(record);
    let tracker = build_tracker(&store, &provider, test_config());
    let mut events = tracker.subscribe();

    let report = tracker.run_cycle().await.unwrap();
    assert_eq!(report.settled, 1);
    assert_eq!(provider.status_calls(), 0);

    let record = store.get(id).unwrap();
    assert_eq!(record.tracking_state, TrackingState::Completed);
    assert_eq!(record.is_polling, Some(false));
    assert_eq!(record.polling_attempts, 9);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn record_without_job_id_is_skipped() {
    let (store, provider) = setup();
    let mut record = store.create(CreateGeneration::default());
    record.is_polling = Some(true);
    record.tracking_state = TrackingState::Processing;
    store.insert(record);
    let tracker = build_tracker(&store, &provider, test_config());

    let report = tracker.run_cycle().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(provider.status_calls(), 0);
}

#[tokio::test]
async fn write_failure_is_retried_next_cycle() {
    let (store, provider) = setup();
    let id = seed_processing(&store, "job-a", 2);
    provider.script("job-a", Reply::succeeded("x"));
    let tracker = build_tracker(&store, &provider, test_config());

    store.set_fail_updates(true);
    let report = tracker.run_cycle().await.unwrap();
    assert_eq!(report.write_failed, 1);
    let record = store.get(id).unwrap();
    assert_eq!(record.tracking_state, TrackingState::Processing);
    assert_eq!(record.polling_attempts, 2);

    store.set_fail_updates(false);
    tracker.run_cycle().await.unwrap();
    let record = store.get(id).unwrap();
    assert_eq!(record.tracking_state, TrackingState::Completed);
    assert_eq!(record.polling_attempts, 3);
}

#[tokio::test]
async fn repeated_terminal_status_keeps_result_payload() {
    let (store, provider) = setup();
    let id = seed_processing(&store, "job-a", 0);
    provider.script("job-a", Reply::succeeded("x"));
    let tracker = build_tracker(&store, &provider, test_config());

    tracker.run_cycle().await.unwrap();
    let first = store.get(id).unwrap();

    // Simulate a lost flag write: the record is polled again.
    let mut record = first.clone();
    record.tracking_state = TrackingState::Processing;
    record.is_polling = Some(true);
    store.insert(record);
    tracker.run_cycle().await.unwrap();

    let second = store.get(id).unwrap();
    assert_eq!(second.artifacts(), first.artifacts());
    assert_eq!(second.tracking_state, TrackingState::Completed);
}

#[tokio::test]
async fn one_failing_record_does_not_abort_the_cycle() {
    let (store, provider) = setup();
    let broken = seed_processing(&store, "job-broken", 0);
    let healthy = seed_processing(&store, "job-healthy", 0);
    provider.script("job-broken", Reply::ApiError(500));
    provider.script("job-healthy", Reply::processing(30));
    let tracker = build_tracker(&store, &provider, test_config());

    let report = tracker.run_cycle().await.unwrap();
    assert_eq!(report.discovered, 2);
    assert_eq!(report.unreachable, 1);
    assert_eq!(report.progressed, 1);
    assert_eq!(store.get(broken).unwrap().polling_attempts, 1);
    assert_eq!(store.get(healthy).unwrap().progress, 30);
}

#[tokio::test]
async fn query_failure_is_reported() {
    let (store, provider) = setup();
    seed_processing(&store, "job-a", 0);
    store.set_fail_queries(true);
    let tracker = build_tracker(&store, &provider, test_config());

    assert!(tracker.run_cycle().await.is_err());
    assert_eq!(provider.status_calls(), 0);
}

/// Provider that resubmits the record to a new job while a status call
/// for the old one is in flight.
struct ResubmittingProvider {
    store: Arc<MemoryGenerationStore>,
    generation_id: DbId,
}

#[async_trait]
impl ModelProvider for ResubmittingProvider {
    async fn submit(&self, _image_url: &str) -> Result<String, ProviderError> {
        Ok("job-new".into())
    }

    async fn get_status(&self, _job_id: &str) -> Result<TaskStatus, ProviderError> {
        let mut record = self.store.get(self.generation_id).unwrap();
        record.external_job_id = Some("job-new".into());
        record.tracking_state = TrackingState::Processing;
        record.is_polling = Some(true);
        record.polling_attempts = 0;
        record.progress = 0;
        self.store.insert(record);

        let Reply::Status(status) = Reply::succeeded("old.glb") else {
            unreachable!()
        };
        Ok(status)
    }

    async fn delete(&self, _job_id: &str) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[tokio::test]
async fn result_for_a_replaced_job_is_dropped() {
    let store = Arc::new(MemoryGenerationStore::new());
    let id = seed_processing(&store, "job-old", 5);
    let provider = Arc::new(ResubmittingProvider {
        store: store.clone(),
        generation_id: id,
    });
    let tracker = JobTracker::new(store.clone(), provider, test_config());
    let mut events = tracker.subscribe();

    let report = tracker.run_cycle().await.unwrap();
    assert_eq!(report.superseded, 1);
    assert_eq!(report.completed, 0);

    let record = store.get(id).unwrap();
    assert_eq!(record.external_job_id.as_deref(), Some("job-new"));
    assert_eq!(record.tracking_state, TrackingState::Processing);
    assert_eq!(record.is_polling, Some(true));
    assert_eq!(record.polling_attempts, 0);
    assert!(record.result_payload.is_none());
    assert!(events.try_recv().is_err());
}

// ---------------------------------------------------------------------------
// Store timeouts
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn hanging_store_query_times_out() {
    let (store, provider) = setup();
    seed_processing(&store, "job-a", 0);
    store.set_hang_queries(true);
    let tracker = build_tracker(&store, &provider, test_config());

    assert_matches!(
        tracker.run_cycle().await,
        Err(StoreError::Timeout(limit)) if limit == Duration::from_secs(3)
    );
    assert_eq!(provider.status_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn hanging_store_update_counts_as_write_failure() {
    let (store, provider) = setup();
    let id = seed_processing(&store, "job-a", 2);
    provider.script("job-a", Reply::succeeded("x"));
    store.set_hang_updates(true);
    let tracker = build_tracker(&store, &provider, test_config());

    let report = tracker.run_cycle().await.unwrap();
    assert_eq!(report.write_failed, 1);
    let record = store.get(id).unwrap();
    assert_eq!(record.tracking_state, TrackingState::Processing);
    assert_eq!(record.polling_attempts, 2);

    store.set_hang_updates(false);
    let report = tracker.run_cycle().await.unwrap();
    assert_eq!(report.completed, 1);
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transitions_are_broadcast() {
    let (store, provider) = setup();
    let done = seed_processing(&store, "job-done", 0);
    provider.script("job-done", Reply::succeeded("x"));
    let tracker = build_tracker(&store, &provider, test_config());
    let mut events = tracker.subscribe();

    tracker.run_cycle().await.unwrap();

    let event = events.try_recv().unwrap();
    assert_matches!(
        event,
        TrackerEvent::ModelCompleted { generation_id, ref external_job_id, ref artifacts }
            if generation_id == done
                && external_job_id == "job-done"
                && artifacts.glb.as_deref() == Some("x")
    );
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn progress_event_only_when_progress_rises() {
    let (store, provider) = setup();
    let id = seed_processing(&store, "job-a", 0);
    provider.script("job-a", Reply::processing(25));
    let tracker = build_tracker(&store, &provider, test_config());
    let mut events = tracker.subscribe();

    tracker.run_cycle().await.unwrap();
    assert_matches!(
        events.try_recv(),
        Ok(TrackerEvent::ModelProgress { generation_id, progress: 25, .. }) if generation_id == id
    );

    tracker.run_cycle().await.unwrap();
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn exhausted_record_emits_failure_event() {
    let (store, provider) = setup();
    let id = seed_processing(&store, "job-a", 120);
    let tracker = build_tracker(&store, &provider, test_config());
    let mut events = tracker.subscribe();

    tracker.run_cycle().await.unwrap();

    assert_matches!(
        events.try_recv(),
        Ok(TrackerEvent::ModelFailed { generation_id, error, .. })
            if generation_id == id && error["error"] == MAX_ATTEMPTS_EXCEEDED
    );
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Yield until the store has served `n` queries.
async fn wait_for_queries(store: &MemoryGenerationStore, n: usize) {
    for _ in 0..1_000 {
        if store.query_count() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("tracker never reached {n} queries");
}

#[tokio::test(start_paused = true)]
async fn loop_polls_every_interval() {
    let (store, provider) = setup();
    let tracker = build_tracker(&store, &provider, test_config());

    assert!(tracker.start().await);
    wait_for_queries(&store, 1).await;

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(store.query_count(), 3);

    assert!(tracker.stop().await);
}

#[tokio::test(start_paused = true)]
async fn stop_while_sleeping_prevents_next_cycle() {
    let (store, provider) = setup();
    let tracker = build_tracker(&store, &provider, test_config());

    tracker.start().await;
    wait_for_queries(&store, 1).await;

    assert!(tracker.stop().await);
    assert!(!tracker.is_running().await);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(store.query_count(), 1);

    assert!(!tracker.stop().await);
}

#[tokio::test]
async fn stop_without_start_is_a_no_op() {
    let (store, provider) = setup();
    let tracker = build_tracker(&store, &provider, test_config());

    assert!(!tracker.stop().await);
    assert!(!tracker.stop().await);
    assert!(!tracker.is_running().await);
}

#[tokio::test(start_paused = true)]
async fn concurrent_starts_spawn_one_loop() {
    let (store, provider) = setup();
    let tracker = build_tracker(&store, &provider, test_config());

    let (a, b) = tokio::join!(tracker.start(), tracker.start());
    assert!(a ^ b);
    assert!(!tracker.start().await);

    wait_for_queries(&store, 1).await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(store.query_count(), 1);

    tracker.stop().await;
}

#[tokio::test(start_paused = true)]
async fn loop_survives_store_outage() {
    let (store, provider) = setup();
    let id = seed_processing(&store, "job-a", 0);
    provider.script("job-a", Reply::succeeded("x"));
    store.set_fail_queries(true);
    let tracker = build_tracker(&store, &provider, test_config());

    tracker.start().await;
    wait_for_queries(&store, 1).await;
    assert!(tracker.is_running().await);

    store.set_fail_queries(false);
    tokio::time::sleep(Duration::from_secs(11)).await;

    assert_eq!(store.get(id).unwrap().tracking_state, TrackingState::Completed);
    tracker.stop().await;
}

#[tokio::test(start_paused = true)]
async fn loop_recovers_from_a_hung_store() {
    let (store, provider) = setup();
    let id = seed_processing(&store, "job-a", 0);
    provider.script("job-a", Reply::succeeded("x"));
    store.set_hang_queries(true);
    let tracker = build_tracker(&store, &provider, test_config());

    tracker.start().await;
    wait_for_queries(&store, 1).await;
    store.set_hang_queries(false);

    // Query timeout (3s) plus one poll interval (10s).
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert!(tracker.is_running().await);
    assert_eq!(store.get(id).unwrap().tracking_state, TrackingState::Completed);

    assert!(tracker.stop().await);
}

#[tokio::test(start_paused = true)]
async fn tracker_can_restart_after_stop() {
    let (store, provider) = setup();
    let tracker = build_tracker(&store, &provider, test_config());

    assert!(tracker.start().await);
    wait_for_queries(&store, 1).await;
    assert!(tracker.stop().await);

    assert!(tracker.start().await);
    wait_for_queries(&store, 2).await;
    assert!(tracker.is_running().await);
    assert!(tracker.stop().await);
}
