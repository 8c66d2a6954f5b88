//! Per-record reconciliation rules.
//!
//! Given a stored record and what the provider said about its job, decide
//! the single patch to write. Nothing here performs I/O; the tracker feeds
//! in the poll outcome and persists the returned [`PollPlan`].
//!
//! Rules, in order:
//! - A record already at the attempt ceiling fails without polling.
//! - Every poll (successful or not) bumps `polling_attempts` by one and
//!   stamps `last_polled_at` in the same patch as any state change.
//! - `SUCCEEDED` completes, `FAILED` fails, anything else keeps processing.
//! - An unreachable provider leaves the state alone.
//! - The attempt that reaches the ceiling without a terminal provider
//!   status fails the record in that same write.

use charforge_core::tracking::{
    max_attempts_error, next_progress, task_error, TrackingState, MAX_PROGRESS,
};
use charforge_core::types::Timestamp;
use charforge_db::models::generation::{GenerationPatch, GenerationRecord};
use charforge_meshy::TaskStatus;

/// What the tracker learned from the provider this cycle.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// The provider answered with a task snapshot.
    Status(TaskStatus),
    /// The call failed transiently (network, non-2xx, timeout).
    Unreachable(String),
}

/// Kind of change a [`PollPlan`] makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Still processing; progress refreshed.
    Progressed,
    /// Provider reported success.
    Completed,
    /// Provider reported failure.
    Failed,
    /// Attempt budget used up.
    Exhausted,
    /// Provider unreachable; only the attempt bookkeeping moved.
    Unreachable,
    /// Record was already terminal; the stale polling flag is cleared.
    Settled,
}

/// The single update to persist for one record this cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPlan {
    pub transition: Transition,
    pub patch: GenerationPatch,
}

/// Fail a record that has reached `max_attempts` before being polled again.
///
/// The attempt counter is left as is so it never exceeds the ceiling.
pub fn plan_exhausted(record: &GenerationRecord) -> PollPlan {
    let mut patch = GenerationPatch::default();
    exhaust(&mut patch, record.polling_attempts);
    PollPlan {
        transition: Transition::Exhausted,
        patch,
    }
}

/// Clear the polling flag of a record that is already terminal.
pub fn plan_settle() -> PollPlan {
    PollPlan {
        transition: Transition::Settled,
        patch: GenerationPatch {
            is_polling: Some(false),
            is_3d_generating: Some(false),
            ..Default::default()
        },
    }
}

/// Build the update for a record that was just polled.
///
/// `record.polling_attempts` must be below `max_attempts`; callers check
/// with [`plan_exhausted`] first.
pub fn plan_poll(
    record: &GenerationRecord,
    outcome: &PollOutcome,
    now: Timestamp,
    max_attempts: i32,
) -> PollPlan {
    let attempts = record.polling_attempts.saturating_add(1);
    let mut patch = GenerationPatch {
        last_polled_at: Some(Some(now)),
        polling_attempts: Some(attempts),
        ..Default::default()
    };

    let transition = match outcome {
        PollOutcome::Status(task) => match TrackingState::from_provider(&task.status) {
            TrackingState::Completed => {
                patch.tracking_state = Some(TrackingState::Completed);
                patch.progress = Some(MAX_PROGRESS);
                patch.result_payload = Some(Some(task.artifacts()));
                patch.error_payload = Some(None);
                patch.is_polling = Some(false);
                patch.is_3d_generating = Some(false);
                patch.has_3d_model = Some(true);
                Transition::Completed
            }
            TrackingState::Failed => {
                patch.tracking_state = Some(TrackingState::Failed);
                patch.error_payload = Some(Some(task_error(task.task_error.as_ref())));
                patch.result_payload = Some(None);
                patch.is_polling = Some(false);
                patch.is_3d_generating = Some(false);
                patch.has_3d_model = Some(false);
                Transition::Failed
            }
            TrackingState::Processing | TrackingState::NotStarted => {
                patch.tracking_state = Some(TrackingState::Processing);
                patch.progress = Some(next_progress(record.progress, task.progress));
                patch.is_polling = Some(true);
                Transition::Progressed
            }
        },
        PollOutcome::Unreachable(_) => Transition::Unreachable,
    };

    if attempts >= max_attempts
        && matches!(transition, Transition::Progressed | Transition::Unreachable)
    {
        exhaust(&mut patch, attempts);
        return PollPlan {
            transition: Transition::Exhausted,
            patch,
        };
    }

    PollPlan { transition, patch }
}

fn exhaust(patch: &mut GenerationPatch, attempts: i32) {
    patch.tracking_state = Some(TrackingState::Failed);
    patch.error_payload = Some(Some(max_attempts_error(attempts)));
    patch.result_payload = Some(None);
    patch.is_polling = Some(false);
    patch.is_3d_generating = Some(false);
    patch.has_3d_model = Some(false);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
