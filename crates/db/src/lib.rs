//! Postgres persistence for redirect rules.
//!
//! [`PgRuleStore`] implements the core store traits on top of the
//! repositories in [`repositories`]. Every repository function is generic
//! over the executor so the same SQL runs against the pool for reads and
//! against an open transaction for writes.

use sqlx::postgres::PgPoolOptions;
use waypoint_core::error::StoreError;

pub mod models;
pub mod repositories;
pub mod store;

pub use store::{PgRuleStore, PgRuleTransaction};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to confirm the pool can reach the server.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply pending migrations from `db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}

/// Map a sqlx error onto the store error taxonomy.
///
/// Unique (`23505`) and check (`23514`) violations become
/// [`StoreError::Conflict`] carrying the constraint name so callers can tell
/// a duplicate old URL from an enabled 404.
pub fn store_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        if matches!(db_err.code().as_deref(), Some("23505") | Some("23514")) {
            let constraint = db_err.constraint().unwrap_or("unknown").to_string();
            return StoreError::Conflict(constraint);
        }
    }
    StoreError::Backend(Box::new(err))
}
