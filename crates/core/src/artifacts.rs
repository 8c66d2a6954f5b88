//! Output artifacts of a completed 3D generation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// One set of PBR texture maps produced alongside a model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureSet {
    #[serde(default)]
    pub base_color: Option<String>,
    #[serde(default)]
    pub metallic: Option<String>,
    #[serde(default)]
    pub normal: Option<String>,
    #[serde(default)]
    pub roughness: Option<String>,
}

/// Artifact references stored in a record's `result_payload`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelArtifacts {
    #[serde(default)]
    pub glb: Option<String>,
    #[serde(default)]
    pub fbx: Option<String>,
    #[serde(default)]
    pub usdz: Option<String>,
    #[serde(default)]
    pub obj: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub texture_prompt: Option<String>,
    #[serde(default)]
    pub texture_urls: Vec<TextureSet>,
}

impl ModelArtifacts {
    /// URL of the requested artifact, if the provider produced one.
    pub fn url_for(&self, format: ModelFormat) -> Option<&str> {
        match format {
            ModelFormat::Glb => self.glb.as_deref(),
            ModelFormat::Fbx => self.fbx.as_deref(),
            ModelFormat::Usdz => self.usdz.as_deref(),
            ModelFormat::Obj => self.obj.as_deref(),
            ModelFormat::Thumbnail => self.thumbnail_url.as_deref(),
        }
    }

    /// Formats for which a URL is available.
    pub fn available_formats(&self) -> Vec<ModelFormat> {
        ModelFormat::ALL
            .into_iter()
            .filter(|f| self.url_for(*f).is_some())
            .collect()
    }
}

/// Downloadable artifact kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFormat {
    Glb,
    Fbx,
    Usdz,
    Obj,
    Thumbnail,
}

impl ModelFormat {
    pub const ALL: [ModelFormat; 5] = [
        ModelFormat::Glb,
        ModelFormat::Fbx,
        ModelFormat::Usdz,
        ModelFormat::Obj,
        ModelFormat::Thumbnail,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Glb => "glb",
            Self::Fbx => "fbx",
            Self::Usdz => "usdz",
            Self::Obj => "obj",
            Self::Thumbnail => "thumbnail",
        }
    }

    /// MIME type to serve the artifact with.
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Glb => "model/gltf-binary",
            Self::Fbx => "application/octet-stream",
            Self::Usdz => "model/vnd.usdz+zip",
            Self::Obj => "application/object",
            Self::Thumbnail => "image/jpeg",
        }
    }
}

impl fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| CoreError::UnknownModelFormat(s.to_string()))
    }
}
