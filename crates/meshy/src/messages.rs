//! Meshy image-to-3D request and response bodies.

use charforge_core::artifacts::{ModelArtifacts, TextureSet};
use charforge_core::tracking::ProviderStatus;
use serde::{Deserialize, Deserializer, Serialize};

/// Body of `POST /image-to-3d`.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitRequest<'a> {
    pub image_url: &'a str,
    pub ai_model: &'a str,
}

/// Response to a successful submission.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    /// Provider-assigned task id.
    pub result: String,
}

/// Model file URLs keyed by format.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelUrls {
    #[serde(default)]
    pub glb: Option<String>,
    #[serde(default)]
    pub fbx: Option<String>,
    #[serde(default)]
    pub usdz: Option<String>,
    #[serde(default)]
    pub obj: Option<String>,
}

/// Task snapshot returned by `GET /image-to-3d/{id}`.
///
/// Only `status` drives state transitions; every other field is optional
/// because the provider fills them in progressively.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskStatus {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default)]
    pub status: ProviderStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub progress: i64,
    #[serde(default)]
    pub model_urls: Option<ModelUrls>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub texture_prompt: Option<String>,
    #[serde(default)]
    pub texture_urls: Option<Vec<TextureSet>>,
    #[serde(default)]
    pub task_error: Option<serde_json::Value>,
}

impl TaskStatus {
    /// Artifact references to persist once the task has succeeded.
    pub fn artifacts(&self) -> ModelArtifacts {
        let urls = self.model_urls.clone().unwrap_or_default();
        ModelArtifacts {
            glb: urls.glb,
            fbx: urls.fbx,
            usdz: urls.usdz,
            obj: urls.obj,
            thumbnail_url: self.thumbnail_url.clone(),
            texture_prompt: self.texture_prompt.clone(),
            texture_urls: self.texture_urls.clone().unwrap_or_default(),
        }
    }
}

/// Treat an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
