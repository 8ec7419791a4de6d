//! Database initialization and migration runner.
//!
//! SYSTEM CONTEXT
//! ==============
//! The operator binary uses this module to open the shared SQLx pool and
//! apply schema migrations before mounting sessions against
//! `PgBoardStore`.

pub mod store;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::env_parse;

pub use store::PgBoardStore;

const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

/// Open a pool without touching the schema.
///
/// # Errors
///
/// Returns an error if the connection fails.
pub async fn connect_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS))
        .connect(database_url)
        .await
}

/// Apply the embedded migrations.
///
/// # Errors
///
/// Returns an error if a migration fails.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("src/db/migrations").run(pool).await
}

/// Initialize the `PostgreSQL` connection pool and run migrations.
///
/// # Errors
///
/// Returns an error if the connection or migrations fail.
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = connect_pool(database_url).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}
