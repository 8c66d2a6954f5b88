//! Generation record persistence.
//!
//! The tracker talks to storage exclusively through the
//! [`store::GenerationStore`] trait: query-by-filter, atomic single-record
//! partial update, lookup and delete. [`store::PgGenerationStore`] backs it
//! with PostgreSQL; [`memory::MemoryGenerationStore`] keeps records in
//! process.

use sqlx::postgres::PgPoolOptions;

pub mod filter;
pub mod memory;
pub mod models;
pub mod repositories;
pub mod store;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to confirm the database is reachable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply pending migrations from `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
