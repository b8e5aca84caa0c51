//! PostgreSQL pool and schema bootstrap for the transfer store.

use std::time::Duration;

use sqlx::{Pool, Postgres};

/// Type alias for the PostgreSQL connection pool shared by the store.
pub type DbPool = Pool<Postgres>;

/// Saga drivers, the recovery scanner and HTTP reads share the pool.
const MAX_CONNECTIONS: u32 = 10;

/// Fail a store call instead of queueing forever when the pool is exhausted.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a new PostgreSQL connection pool.
///
/// # Errors
///
/// Returns an error if:
/// - Database connection string is invalid
/// - Cannot connect to PostgreSQL server
/// - Database authentication fails
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await
}

/// Apply the `transfers` schema from `migrations/`.
///
/// Applied migrations are tracked in `_sqlx_migrations`, so each runs once.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
