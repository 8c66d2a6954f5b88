//! REST client for the Meshy image-to-3D endpoints.
//!
//! Wraps task submission, status retrieval and deletion using
//! [`reqwest`], with bearer-token auth on every request.

use std::time::Duration;

use async_trait::async_trait;

use crate::messages::{SubmitRequest, SubmitResponse, TaskStatus};
use crate::provider::{ModelProvider, ProviderError};

/// Default Meshy OpenAPI base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.meshy.ai/openapi/v1";

/// Model requested when submitting a job.
pub const DEFAULT_AI_MODEL: &str = "meshy-5";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for the Meshy API.
#[derive(Debug, Clone)]
pub struct MeshyConfig {
    /// Bearer token. Calls fail with [`ProviderError::MissingApiKey`] when unset.
    pub api_key: Option<String>,
    /// Base URL without trailing slash.
    pub base_url: String,
    pub ai_model: String,
    pub request_timeout: Duration,
}

impl Default for MeshyConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            ai_model: DEFAULT_AI_MODEL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// HTTP client for the Meshy image-to-3D API.
pub struct MeshyApi {
    client: reqwest::Client,
    config: MeshyConfig,
}

impl MeshyApi {
    /// Create a client with its own connection pool and request timeout.
    pub fn new(config: MeshyConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, config: MeshyConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &MeshyConfig {
        &self.config
    }

    fn tasks_url(&self) -> String {
        format!("{}/image-to-3d", self.config.base_url.trim_end_matches('/'))
    }

    fn task_url(&self, job_id: &str) -> String {
        format!("{}/{}", self.tasks_url(), job_id)
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        match self.config.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ProviderError::MissingApiKey),
        }
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ProviderError::Api`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl ModelProvider for MeshyApi {
    /// Sends `POST /image-to-3d` and returns the task id from `result`.
    async fn submit(&self, image_url: &str) -> Result<String, ProviderError> {
        let key = self.api_key()?;
        let body = SubmitRequest {
            image_url,
            ai_model: &self.config.ai_model,
        };

        let response = self
            .client
            .post(self.tasks_url())
            .bearer_auth(key)
            .json(&body)
            .send()
            .await?;

        let submitted: SubmitResponse = Self::parse_response(response).await?;
        if submitted.result.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "submission returned an empty task id".into(),
            ));
        }

        tracing::info!(job_id = %submitted.result, "Submitted image-to-3D task");
        Ok(submitted.result)
    }

    async fn get_status(&self, job_id: &str) -> Result<TaskStatus, ProviderError> {
        let key = self.api_key()?;
        let response = self
            .client
            .get(self.task_url(job_id))
            .bearer_auth(key)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn delete(&self, job_id: &str) -> Result<(), ProviderError> {
        let key = self.api_key()?;
        let response = self
            .client
            .delete(self.task_url(job_id))
            .bearer_auth(key)
            .send()
            .await?;

        Self::ensure_success(response).await?;
        Ok(())
    }
}
