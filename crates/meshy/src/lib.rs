//! Meshy image-to-3D REST client.
//!
//! Provides the [`ModelProvider`] trait the tracker polls through, typed
//! response messages, and [`MeshyApi`], the reqwest-backed implementation.

pub mod api;
pub mod messages;
pub mod provider;

pub use api::{MeshyApi, MeshyConfig};
pub use messages::TaskStatus;
pub use provider::{ModelProvider, ProviderError};
