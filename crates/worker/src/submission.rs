//! Hand-off from "generate a 3D model for this image" to the tracker.
//!
//! Submitting writes the initial tracking columns and makes sure the
//! tracker loop is running, so a new job is picked up even when nothing
//! started the tracker at boot.

use std::sync::Arc;

use charforge_core::error::CoreError;
use charforge_core::tracking::TrackingState;
use charforge_core::types::DbId;
use charforge_db::filter::GenerationFilter;
use charforge_db::models::generation::{GenerationPatch, GenerationRecord};
use charforge_db::store::{GenerationStore, StoreError};
use charforge_meshy::{ModelProvider, ProviderError};

use crate::tracker::JobTracker;

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Starts and discards 3D jobs for generation records.
pub struct SubmissionService {
    store: Arc<dyn GenerationStore>,
    provider: Arc<dyn ModelProvider>,
    tracker: Arc<JobTracker>,
}

impl SubmissionService {
    pub fn new(
        store: Arc<dyn GenerationStore>,
        provider: Arc<dyn ModelProvider>,
        tracker: Arc<JobTracker>,
    ) -> Self {
        Self {
            store,
            provider,
            tracker,
        }
    }

    /// Submit `image_url` to the provider for generation `generation_id`.
    ///
    /// Returns the provider's job id. The record is reset to a fresh
    /// `processing` state with `is_polling = true`.
    pub async fn submit(
        &self,
        generation_id: DbId,
        image_url: &str,
    ) -> Result<String, SubmissionError> {
        let image_url = image_url.trim();
        if image_url.is_empty() {
            return Err(CoreError::Validation("image_url must not be empty".into()).into());
        }

        let untracked = GenerationFilter::untracked();
        let record = self.load(generation_id).await?;
        if !untracked.matches(&record) {
            return Err(conflict(generation_id).into());
        }

        let job_id = self.provider.submit(image_url).await?;

        let patch = GenerationPatch {
            external_job_id: Some(job_id.clone()),
            tracking_state: Some(TrackingState::Processing),
            is_polling: Some(true),
            progress: Some(0),
            last_polled_at: Some(None),
            polling_attempts: Some(0),
            result_payload: Some(None),
            error_payload: Some(None),
            is_3d_generating: Some(true),
            has_3d_model: Some(false),
        };

        // Another submission or a delete may have landed while the provider
        // call was in flight; the guarded write decides who owns the record.
        match self.store.update_where(generation_id, &untracked, &patch).await {
            Ok(true) => {}
            Ok(false) => {
                self.delete_orphan(generation_id, &job_id).await;
                let error = match self.store.find_by_id(generation_id).await? {
                    Some(_) => conflict(generation_id),
                    None => not_found(generation_id),
                };
                return Err(error.into());
            }
            Err(e) => {
                self.delete_orphan(generation_id, &job_id).await;
                return Err(e.into());
            }
        }

        tracing::info!(generation_id, external_job_id = %job_id, "3D generation submitted");

        self.tracker.start().await;
        Ok(job_id)
    }

    /// Delete a generation record, cancelling its provider job if it is
    /// still running.
    ///
    /// Provider deletion is best-effort; the record is removed regardless.
    pub async fn discard(&self, generation_id: DbId) -> Result<(), SubmissionError> {
        let record = self.load(generation_id).await?;

        if record.tracking_state == TrackingState::Processing {
            if let Some(job_id) = record.external_job_id.as_deref() {
                match self.provider.delete(job_id).await {
                    Ok(()) => tracing::info!(
                        generation_id,
                        external_job_id = job_id,
                        "Deleted provider job",
                    ),
                    Err(e) => tracing::warn!(
                        generation_id,
                        external_job_id = job_id,
                        error = %e,
                        "Failed to delete provider job",
                    ),
                }
            }
        }

        if !self.store.delete_one(generation_id).await? {
            return Err(not_found(generation_id).into());
        }
        tracing::info!(generation_id, "Generation discarded");
        Ok(())
    }

    /// Best-effort removal of a provider job no record points at.
    async fn delete_orphan(&self, generation_id: DbId, job_id: &str) {
        match self.provider.delete(job_id).await {
            Ok(()) => tracing::warn!(
                generation_id,
                external_job_id = job_id,
                "Submission lost the record; deleted its provider job",
            ),
            Err(e) => tracing::warn!(
                generation_id,
                external_job_id = job_id,
                error = %e,
                "Failed to delete orphaned provider job",
            ),
        }
    }

    async fn load(&self, generation_id: DbId) -> Result<GenerationRecord, SubmissionError> {
        self.store
            .find_by_id(generation_id)
            .await?
            .ok_or_else(|| not_found(generation_id).into())
    }
}

fn conflict(id: DbId) -> CoreError {
    CoreError::Conflict(format!("generation {id} already has a 3D job in progress"))
}

fn not_found(id: DbId) -> CoreError {
    CoreError::NotFound {
        entity: "generation",
        id,
    }
}
