#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use charforge_core::tracking::{ProviderStatus, TrackingState};
use charforge_core::types::DbId;
use charforge_db::memory::MemoryGenerationStore;
use charforge_db::models::generation::CreateGeneration;
use charforge_meshy::messages::ModelUrls;
use charforge_meshy::{ModelProvider, ProviderError, TaskStatus};
use charforge_worker::config::TrackerConfig;
use charforge_worker::tracker::JobTracker;

/// Scripted answer for one provider job.
#[derive(Debug, Clone)]
pub enum Reply {
    Status(TaskStatus),
    /// Non-2xx response with the given status code.
    ApiError(u16),
    MissingKey,
    /// Never resolves.
    Hang,
}

impl Reply {
    pub fn processing(progress: i64) -> Self {
        Self::Status(TaskStatus {
            status: ProviderStatus::Processing,
            progress,
            ..Default::default()
        })
    }

    pub fn succeeded(glb: &str) -> Self {
        Self::Status(TaskStatus {
            status: ProviderStatus::Succeeded,
            progress: 100,
            model_urls: Some(ModelUrls {
                glb: Some(glb.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    pub fn failed(task_error: serde_json::Value) -> Self {
        Self::Status(TaskStatus {
            status: ProviderStatus::Failed,
            task_error: Some(task_error),
            ..Default::default()
        })
    }
}

/// In-process [`ModelProvider`] that answers from a per-job script.
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<HashMap<String, Reply>>,
    submit_failure: Mutex<Option<u16>>,
    deleted: Mutex<Vec<String>>,
    status_calls: AtomicUsize,
    submit_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer every status call for `job_id` with `reply` until changed.
    pub fn script(&self, job_id: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id.to_string(), reply);
    }

    /// Make `submit` fail with the given HTTP status.
    pub fn fail_submit(&self, status: u16) {
        *self
            .submit_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(status);
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn submit(&self, _image_url: &str) -> Result<String, ProviderError> {
        // Let concurrent submissions interleave like a real network call.
        tokio::task::yield_now().await;
        let n = self.submit_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let failure = *self
            .submit_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match failure {
            Some(status) => Err(ProviderError::Api {
                status,
                body: "submit rejected".into(),
            }),
            None => Ok(format!("job-{n}")),
        }
    }

    async fn get_status(&self, job_id: &str) -> Result<TaskStatus, ProviderError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .cloned()
            .unwrap_or(Reply::ApiError(404));

        match reply {
            Reply::Status(mut status) => {
                status.id = job_id.to_string();
                Ok(status)
            }
            Reply::ApiError(status) => Err(ProviderError::Api {
                status,
                body: "scripted".into(),
            }),
            Reply::MissingKey => Err(ProviderError::MissingApiKey),
            Reply::Hang => std::future::pending().await,
        }
    }

    async fn delete(&self, job_id: &str) -> Result<(), ProviderError> {
        self.deleted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(job_id.to_string());
        Ok(())
    }
}

/// Tracker settings suited to tests: short timeouts, default ceiling.
pub fn test_config() -> TrackerConfig {
    TrackerConfig {
        max_polling_attempts: 120,
        poll_interval: Duration::from_secs(10),
        provider_timeout: Duration::from_secs(2),
        store_timeout: Duration::from_secs(3),
        poll_concurrency: 4,
        shutdown_timeout: Duration::from_secs(5),
    }
}

pub fn build_tracker(
    store: &Arc<MemoryGenerationStore>,
    provider: &Arc<ScriptedProvider>,
    config: TrackerConfig,
) -> Arc<JobTracker> {
    JobTracker::new(store.clone(), provider.clone(), config)
}

/// Seed a record that looks freshly submitted with `attempts` polls done.
pub fn seed_processing(store: &MemoryGenerationStore, job_id: &str, attempts: i32) -> DbId {
    let mut record = store.create(CreateGeneration {
        character_id: Some(7),
        image_url: Some("https://images.example/front.png".into()),
    });
    record.external_job_id = Some(job_id.to_string());
    record.tracking_state = TrackingState::Processing;
    record.is_polling = Some(true);
    record.polling_attempts = attempts;
    record.is_3d_generating = true;
    let id = record.id;
    store.insert(record);
    id
}
