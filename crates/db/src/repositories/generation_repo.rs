//! Repository for the `generations` table.

use charforge_core::types::DbId;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::filter::GenerationFilter;
use crate::models::generation::{CreateGeneration, GenerationPatch, GenerationRecord};

/// Column list for `generations` queries.
const COLUMNS: &str = "\
    id, character_id, image_url, external_job_id, tracking_state, \
    is_polling, progress, last_polled_at, polling_attempts, \
    result_payload, error_payload, is_3d_generating, has_3d_model, \
    created_at, updated_at";

/// Provides query operations for generation records.
pub struct GenerationRepo;

impl GenerationRepo {
    // ── Queries ──────────────────────────────────────────────────────

    /// Insert a new generation in the `not_started` state.
    pub async fn create(
        pool: &PgPool,
        input: &CreateGeneration,
    ) -> Result<GenerationRecord, sqlx::Error> {
        let query = format!(
            "INSERT INTO generations (character_id, image_url) \
             VALUES ($1, $2) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, GenerationRecord>(&query)
            .bind(input.character_id)
            .bind(&input.image_url)
            .fetch_one(pool)
            .await
    }

    /// Find a generation by its primary key.
    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<GenerationRecord>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM generations WHERE id = $1");
        sqlx::query_as::<_, GenerationRecord>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find the generation linked to a provider job.
    pub async fn find_by_external_job_id(
        pool: &PgPool,
        job_id: &str,
    ) -> Result<Option<GenerationRecord>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM generations WHERE external_job_id = $1");
        sqlx::query_as::<_, GenerationRecord>(&query)
            .bind(job_id)
            .fetch_optional(pool)
            .await
    }

    /// List all generations matching `filter`, oldest first.
    pub async fn find_many(
        pool: &PgPool,
        filter: &GenerationFilter,
    ) -> Result<Vec<GenerationRecord>, sqlx::Error> {
        let mut qb =
            QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM generations WHERE "));
        filter.push_sql(&mut qb);
        qb.push(" ORDER BY id");
        qb.build_query_as::<GenerationRecord>().fetch_all(pool).await
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Apply a partial update to one generation in a single statement.
    ///
    /// Returns `false` when no row with `id` exists. `updated_at` is always
    /// refreshed, even for an empty patch.
    pub async fn update(
        pool: &PgPool,
        id: DbId,
        patch: &GenerationPatch,
    ) -> Result<bool, sqlx::Error> {
        let result = update_query(id, None, patch).build().execute(pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Like [`update`](Self::update), but only when the row still matches
    /// `guard`. The check and the write are one statement.
    ///
    /// Returns `false` when the row is missing or no longer matches.
    pub async fn update_where(
        pool: &PgPool,
        id: DbId,
        guard: &GenerationFilter,
        patch: &GenerationPatch,
    ) -> Result<bool, sqlx::Error> {
        let result = update_query(id, Some(guard), patch)
            .build()
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a generation. Returns `false` if it did not exist.
    pub async fn delete(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM generations WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// `UPDATE generations SET ... WHERE id = $n [AND <guard>]`.
fn update_query<'a>(
    id: DbId,
    guard: Option<&GenerationFilter>,
    patch: &GenerationPatch,
) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::<Postgres>::new("UPDATE generations SET updated_at = NOW()");

    if let Some(job_id) = &patch.external_job_id {
        qb.push(", external_job_id = ").push_bind(job_id.clone());
    }
    if let Some(state) = patch.tracking_state {
        qb.push(", tracking_state = ").push_bind(state.as_str());
    }
    if let Some(flag) = patch.is_polling {
        qb.push(", is_polling = ").push_bind(flag);
    }
    if let Some(progress) = patch.progress {
        qb.push(", progress = ").push_bind(progress);
    }
    if let Some(polled_at) = patch.last_polled_at {
        qb.push(", last_polled_at = ").push_bind(polled_at);
    }
    if let Some(attempts) = patch.polling_attempts {
        qb.push(", polling_attempts = ").push_bind(attempts);
    }
    if let Some(result) = &patch.result_payload {
        qb.push(", result_payload = ").push_bind(result.clone().map(Json));
    }
    if let Some(error) = &patch.error_payload {
        qb.push(", error_payload = ").push_bind(error.clone());
    }
    if let Some(flag) = patch.is_3d_generating {
        qb.push(", is_3d_generating = ").push_bind(flag);
    }
    if let Some(flag) = patch.has_3d_model {
        qb.push(", has_3d_model = ").push_bind(flag);
    }

    qb.push(" WHERE id = ").push_bind(id);
    if let Some(guard) = guard {
        qb.push(" AND ");
        guard.push_sql(&mut qb);
    }
    qb
}
