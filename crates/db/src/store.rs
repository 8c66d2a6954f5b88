//! Storage seam used by the tracker and the submission path.

use std::time::Duration;

use async_trait::async_trait;
use charforge_core::types::DbId;

use crate::filter::GenerationFilter;
use crate::models::generation::{GenerationPatch, GenerationRecord};
use crate::repositories::GenerationRepo;
use crate::DbPool;

/// Errors surfaced by a [`GenerationStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A database query failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The backing store could not serve the request.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The caller gave up waiting for the store.
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),
}

/// Document-store style access to generation records.
///
/// Every mutation touches exactly one record and is atomic on its own;
/// there are no multi-record transactions.
#[async_trait]
pub trait GenerationStore: Send + Sync {
    /// All records matching `filter`.
    async fn find_many(
        &self,
        filter: &GenerationFilter,
    ) -> Result<Vec<GenerationRecord>, StoreError>;

    /// A single record by id.
    async fn find_by_id(&self, id: DbId) -> Result<Option<GenerationRecord>, StoreError>;

    /// Apply `patch` to the record `id`. Returns `false` if it does not exist.
    async fn update_one(&self, id: DbId, patch: &GenerationPatch) -> Result<bool, StoreError>;

    /// Apply `patch` to the record `id` only if it still matches `guard`,
    /// atomically. Returns `false` if it is missing or no longer matches.
    async fn update_where(
        &self,
        id: DbId,
        guard: &GenerationFilter,
        patch: &GenerationPatch,
    ) -> Result<bool, StoreError>;

    /// Remove the record `id`. Returns `false` if it does not exist.
    async fn delete_one(&self, id: DbId) -> Result<bool, StoreError>;
}

/// [`GenerationStore`] backed by the `generations` table.
#[derive(Clone)]
pub struct PgGenerationStore {
    pool: DbPool,
}

impl PgGenerationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl GenerationStore for PgGenerationStore {
    async fn find_many(
        &self,
        filter: &GenerationFilter,
    ) -> Result<Vec<GenerationRecord>, StoreError> {
        Ok(GenerationRepo::find_many(&self.pool, filter).await?)
    }

    async fn find_by_id(&self, id: DbId) -> Result<Option<GenerationRecord>, StoreError> {
        Ok(GenerationRepo::find_by_id(&self.pool, id).await?)
    }

    async fn update_one(&self, id: DbId, patch: &GenerationPatch) -> Result<bool, StoreError> {
        Ok(GenerationRepo::update(&self.pool, id, patch).await?)
    }

    async fn update_where(
        &self,
        id: DbId,
        guard: &GenerationFilter,
        patch: &GenerationPatch,
    ) -> Result<bool, StoreError> {
        Ok(GenerationRepo::update_where(&self.pool, id, guard, patch).await?)
    }

    async fn delete_one(&self, id: DbId) -> Result<bool, StoreError> {
        Ok(GenerationRepo::delete(&self.pool, id).await?)
    }
}
