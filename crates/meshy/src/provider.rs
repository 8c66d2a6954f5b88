//! The external 3D-generation provider seam.

use async_trait::async_trait;

use crate::messages::TaskStatus;

/// Errors from a 3D provider call.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider returned a non-2xx status code.
    #[error("Provider API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// No API key is configured, so no request was sent.
    #[error("Provider API key is not configured")]
    MissingApiKey,

    /// The provider answered with something we cannot use.
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Local misconfiguration rather than a provider-side failure.
    ///
    /// Retrying cannot succeed until the process is reconfigured, so these
    /// do not count against a record's poll attempts.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::MissingApiKey)
    }
}

/// Remote service that turns a 2D image into a 3D model asynchronously.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Start a job for `image_url`, returning the provider's job id.
    async fn submit(&self, image_url: &str) -> Result<String, ProviderError>;

    /// Current status of a job. Read-only on the provider side.
    async fn get_status(&self, job_id: &str) -> Result<TaskStatus, ProviderError>;

    /// Delete a job and its artifacts on the provider side.
    async fn delete(&self, job_id: &str) -> Result<(), ProviderError>;
}
