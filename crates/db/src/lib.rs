//! Persistent job table for labelbench.
//!
//! Repositories in [`repositories`] speak SQL against Postgres. Callers
//! outside this crate go through the [`store::JobStore`] trait, which wraps
//! every call in the contention retry discipline of [`retry`].

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;

pub mod memory;
pub mod models;
pub mod pg;
pub mod repositories;
pub mod retry;
pub mod store;

pub use memory::MemoryJobStore;
pub use pg::PgJobStore;
pub use store::{JobStore, StoreError, UpdateOutcome};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
///
/// Workers and the API server each hold their own pool; keep it small so
/// a handful of worker processes cannot exhaust the server's connections.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to verify connectivity.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await
        .map(|_| ())
}

/// Apply pending migrations from `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
