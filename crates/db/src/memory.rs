//! In-process [`GenerationStore`].
//!
//! Holds records in a `BTreeMap` behind a mutex, evaluating filters with
//! [`GenerationFilter::matches`]. Used by tests and local tooling; failure
//! switches let callers simulate an unavailable store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use charforge_core::tracking::TrackingState;
use charforge_core::types::DbId;
use chrono::Utc;

use crate::filter::GenerationFilter;
use crate::models::generation::{CreateGeneration, GenerationPatch, GenerationRecord};
use crate::store::{GenerationStore, StoreError};

#[derive(Default)]
struct MemoryState {
    next_id: DbId,
    records: BTreeMap<DbId, GenerationRecord>,
    fail_queries: bool,
    fail_updates: bool,
    hang_queries: bool,
    hang_updates: bool,
}

/// Generation records kept in memory.
#[derive(Default)]
pub struct MemoryGenerationStore {
    state: Mutex<MemoryState>,
    queries: AtomicUsize,
    updates: AtomicUsize,
}

impl MemoryGenerationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a new `not_started` record, mirroring the table defaults.
    pub fn create(&self, input: CreateGeneration) -> GenerationRecord {
        let mut state = self.state();
        state.next_id += 1;
        let now = Utc::now();
        let record = GenerationRecord {
            id: state.next_id,
            character_id: input.character_id,
            image_url: input.image_url,
            external_job_id: None,
            tracking_state: TrackingState::NotStarted,
            is_polling: None,
            progress: 0,
            last_polled_at: None,
            polling_attempts: 0,
            result_payload: None,
            error_payload: None,
            is_3d_generating: false,
            has_3d_model: false,
            created_at: now,
            updated_at: now,
        };
        state.records.insert(record.id, record.clone());
        record
    }

    /// Store a record verbatim, replacing any record with the same id.
    pub fn insert(&self, record: GenerationRecord) {
        let mut state = self.state();
        state.next_id = state.next_id.max(record.id);
        state.records.insert(record.id, record);
    }

    /// Snapshot of a record.
    pub fn get(&self, id: DbId) -> Option<GenerationRecord> {
        self.state().records.get(&id).cloned()
    }

    /// Make every `find_*` call fail until switched off.
    pub fn set_fail_queries(&self, fail: bool) {
        self.state().fail_queries = fail;
    }

    /// Make every `update_one` call fail until switched off.
    pub fn set_fail_updates(&self, fail: bool) {
        self.state().fail_updates = fail;
    }

    /// Make `find_many` never return until switched off for later calls.
    pub fn set_hang_queries(&self, hang: bool) {
        self.state().hang_queries = hang;
    }

    /// Make `update_one` / `update_where` never return.
    pub fn set_hang_updates(&self, hang: bool) {
        self.state().hang_updates = hang;
    }

    /// Number of `find_many` calls served (including failed ones).
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Number of update calls received (including failed ones).
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

impl MemoryGenerationStore {
    async fn apply(
        &self,
        id: DbId,
        guard: Option<&GenerationFilter>,
        patch: &GenerationPatch,
    ) -> Result<bool, StoreError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let hang = self.state().hang_updates;
        if hang {
            std::future::pending::<()>().await;
        }
        let mut state = self.state();
        if state.fail_updates {
            return Err(StoreError::Unavailable("updates disabled".into()));
        }
        match state.records.get_mut(&id) {
            Some(record) if guard.map_or(true, |g| g.matches(record)) => {
                patch.apply_to(record, Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl GenerationStore for MemoryGenerationStore {
    async fn find_many(
        &self,
        filter: &GenerationFilter,
    ) -> Result<Vec<GenerationRecord>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let hang = self.state().hang_queries;
        if hang {
            std::future::pending::<()>().await;
        }
        let state = self.state();
        if state.fail_queries {
            return Err(StoreError::Unavailable("queries disabled".into()));
        }
        Ok(state
            .records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn find_by_id(&self, id: DbId) -> Result<Option<GenerationRecord>, StoreError> {
        let state = self.state();
        if state.fail_queries {
            return Err(StoreError::Unavailable("queries disabled".into()));
        }
        Ok(state.records.get(&id).cloned())
    }

    async fn update_one(&self, id: DbId, patch: &GenerationPatch) -> Result<bool, StoreError> {
        self.apply(id, None, patch).await
    }

    async fn update_where(
        &self,
        id: DbId,
        guard: &GenerationFilter,
        patch: &GenerationPatch,
    ) -> Result<bool, StoreError> {
        self.apply(id, Some(guard), patch).await
    }

    async fn delete_one(&self, id: DbId) -> Result<bool, StoreError> {
        Ok(self.state().records.remove(&id).is_some())
    }
}
