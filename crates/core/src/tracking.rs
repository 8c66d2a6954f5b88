//! 3D-generation tracking state machine and provider status mapping.
//!
//! A generation record moves `NotStarted -> Processing -> Completed | Failed`.
//! The provider reports its own status vocabulary; [`TrackingState::from_provider`]
//! is the single place where that vocabulary is translated.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Poll attempts allowed per record before it is forced to `Failed`.
///
/// Paired with [`DEFAULT_POLL_INTERVAL_SECS`] this gives a ~20 minute ceiling.
pub const DEFAULT_MAX_POLLING_ATTEMPTS: i32 = 120;

/// Seconds the tracker sleeps between cycles.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Upper bound of the `progress` column.
pub const MAX_PROGRESS: i16 = 100;

// ---------------------------------------------------------------------------
// Tracking state
// ---------------------------------------------------------------------------

/// Lifecycle state of a generation record's 3D job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    NotStarted,
    Processing,
    Completed,
    Failed,
}

impl TrackingState {
    /// Database / wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// `Completed` and `Failed` admit no further automatic transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Map a provider status onto the internal state.
    ///
    /// Anything the provider reports that is not explicitly terminal keeps
    /// the record in `Processing`; an unrecognised status must never end
    /// tracking.
    pub fn from_provider(status: &ProviderStatus) -> Self {
        match status {
            ProviderStatus::Succeeded => Self::Completed,
            ProviderStatus::Failed => Self::Failed,
            ProviderStatus::Pending | ProviderStatus::Processing | ProviderStatus::Unknown(_) => {
                Self::Processing
            }
        }
    }
}

impl fmt::Display for TrackingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackingState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::UnknownTrackingState(other.to_string())),
        }
    }
}

impl TryFrom<String> for TrackingState {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ---------------------------------------------------------------------------
// Provider status
// ---------------------------------------------------------------------------

/// Job status as reported by the external 3D provider.
///
/// Deserializes from the provider's upper-case strings. Unrecognised or null
/// values are kept in [`ProviderStatus::Unknown`] rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "Option<String>")]
pub enum ProviderStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
    Unknown(String),
}

impl Default for ProviderStatus {
    fn default() -> Self {
        Self::Unknown(String::new())
    }
}

impl From<&str> for ProviderStatus {
    fn from(value: &str) -> Self {
        match value {
            "PENDING" => Self::Pending,
            "PROCESSING" | "IN_PROGRESS" => Self::Processing,
            "SUCCEEDED" => Self::Succeeded,
            "FAILED" => Self::Failed,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl From<String> for ProviderStatus {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<Option<String>> for ProviderStatus {
    fn from(value: Option<String>) -> Self {
        value.map(Self::from).unwrap_or_default()
    }
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("PENDING"),
            Self::Processing => f.write_str("PROCESSING"),
            Self::Succeeded => f.write_str("SUCCEEDED"),
            Self::Failed => f.write_str("FAILED"),
            Self::Unknown(raw) => write!(f, "UNKNOWN({raw})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Clamp a provider-reported progress value into `0..=100`.
pub fn clamp_progress(reported: i64) -> i16 {
    reported.clamp(0, i64::from(MAX_PROGRESS)) as i16
}

/// Progress to store after a processing poll: never lower than what is
/// already persisted.
pub fn next_progress(current: i16, reported: i64) -> i16 {
    clamp_progress(reported).max(current)
}

// ---------------------------------------------------------------------------
// Error payloads
// ---------------------------------------------------------------------------

/// Message stored when a record runs out of poll attempts.
pub const MAX_ATTEMPTS_EXCEEDED: &str = "Max polling attempts exceeded";

/// Machine-readable code paired with [`MAX_ATTEMPTS_EXCEEDED`].
pub const MAX_ATTEMPTS_EXCEEDED_CODE: &str = "max_attempts_exceeded";

/// Message stored when the provider fails a job without detail.
pub const DEFAULT_TASK_ERROR: &str = "Task failed";

/// Error payload for a record that exhausted its poll attempts.
pub fn max_attempts_error(attempts: i32) -> serde_json::Value {
    serde_json::json!({
        "error": MAX_ATTEMPTS_EXCEEDED,
        "code": MAX_ATTEMPTS_EXCEEDED_CODE,
        "attempts": attempts,
    })
}

/// Error payload for a provider-side failure.
///
/// Uses the provider's own `task_error` object when it sent a non-empty one.
pub fn task_error(provider_error: Option<&serde_json::Value>) -> serde_json::Value {
    match provider_error {
        Some(value) if !value.is_null() && value != &serde_json::json!({}) => value.clone(),
        _ => serde_json::json!({ "error": DEFAULT_TASK_ERROR }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
