//! Notifications emitted by the job tracker.
//!
//! Consumers (websocket fan-out, audit, metrics) subscribe through
//! [`JobTracker::subscribe`](crate::tracker::JobTracker::subscribe).
//! Terminal events are sent once per transition; a record that was already
//! terminal in the store produces none.

use charforge_core::artifacts::ModelArtifacts;
use charforge_core::types::DbId;
use serde::Serialize;

/// Broadcast channel capacity for tracker events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub enum TrackerEvent {
    /// The provider reported higher progress for a processing job.
    ModelProgress {
        generation_id: DbId,
        external_job_id: String,
        /// Completion percentage (0-100).
        progress: i16,
    },

    /// The 3D model is ready.
    ModelCompleted {
        generation_id: DbId,
        external_job_id: String,
        artifacts: ModelArtifacts,
    },

    /// The job failed on the provider or ran out of poll attempts.
    ModelFailed {
        generation_id: DbId,
        external_job_id: String,
        error: serde_json::Value,
    },
}
