//! Generation record model.
//!
//! A generation is one requested 2D image plus, once submitted, the
//! external 3D job built from it. The tracking columns are written by the
//! submission path once and by the tracker afterwards.

use charforge_core::artifacts::ModelArtifacts;
use charforge_core::tracking::TrackingState;
use charforge_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// A row from the `generations` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct GenerationRecord {
    pub id: DbId,
    pub character_id: Option<DbId>,
    pub image_url: Option<String>,
    /// Provider job id; `None` until a 3D job has been submitted.
    pub external_job_id: Option<String>,
    #[sqlx(try_from = "String")]
    pub tracking_state: TrackingState,
    /// `None` when the flag was never written explicitly.
    pub is_polling: Option<bool>,
    pub progress: i16,
    pub last_polled_at: Option<Timestamp>,
    pub polling_attempts: i32,
    pub result_payload: Option<Json<ModelArtifacts>>,
    pub error_payload: Option<serde_json::Value>,
    pub is_3d_generating: bool,
    pub has_3d_model: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl GenerationRecord {
    /// Completed artifacts, if any were stored.
    pub fn artifacts(&self) -> Option<&ModelArtifacts> {
        self.result_payload.as_ref().map(|json| &json.0)
    }

    /// Whether the tracker has been told to keep polling this record.
    pub fn is_polling(&self) -> bool {
        self.is_polling.unwrap_or(false)
    }
}

/// DTO for inserting a new generation (tracking starts at `not_started`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateGeneration {
    pub character_id: Option<DbId>,
    pub image_url: Option<String>,
}

/// Partial update of a single generation record.
///
/// `None` leaves a column untouched. Nullable columns use a nested
/// `Option` so a patch can also clear them (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationPatch {
    pub external_job_id: Option<String>,
    pub tracking_state: Option<TrackingState>,
    pub is_polling: Option<bool>,
    pub progress: Option<i16>,
    pub last_polled_at: Option<Option<Timestamp>>,
    pub polling_attempts: Option<i32>,
    pub result_payload: Option<Option<ModelArtifacts>>,
    pub error_payload: Option<Option<serde_json::Value>>,
    pub is_3d_generating: Option<bool>,
    pub has_3d_model: Option<bool>,
}

impl GenerationPatch {
    /// Apply the patch to an in-memory copy of a record.
    pub fn apply_to(&self, record: &mut GenerationRecord, now: Timestamp) {
        if let Some(job_id) = &self.external_job_id {
            record.external_job_id = Some(job_id.clone());
        }
        if let Some(state) = self.tracking_state {
            record.tracking_state = state;
        }
        if let Some(flag) = self.is_polling {
            record.is_polling = Some(flag);
        }
        if let Some(progress) = self.progress {
            record.progress = progress;
        }
        if let Some(polled_at) = self.last_polled_at {
            record.last_polled_at = polled_at;
        }
        if let Some(attempts) = self.polling_attempts {
            record.polling_attempts = attempts;
        }
        if let Some(result) = &self.result_payload {
            record.result_payload = result.clone().map(Json);
        }
        if let Some(error) = &self.error_payload {
            record.error_payload = error.clone();
        }
        if let Some(flag) = self.is_3d_generating {
            record.is_3d_generating = flag;
        }
        if let Some(flag) = self.has_3d_model {
            record.has_3d_model = flag;
        }
        record.updated_at = now;
    }
}
