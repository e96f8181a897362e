//! Database module for PostgreSQL connection management and schema migrations.

mod migrations;

pub use migrations::{Migration, MIGRATIONS};

use crate::config::DatabaseConfig;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Failed to read schema version: {0}")]
    Version(#[source] sqlx::Error),

    #[error("Migration {version} ({name}) failed: {source}")]
    Step {
        version: i32,
        name: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

/// Create a PostgreSQL connection pool.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.url)
        .await?;

    tracing::info!("Successfully connected to PostgreSQL");

    Ok(pool)
}

/// Apply every pending step of [`MIGRATIONS`].
///
/// Each step runs in its own transaction together with the version bump, so
/// a failing step leaves the recorded version at the last successful one and
/// stops the run. Returns the resulting schema version.
pub async fn run_migrations(pool: &PgPool) -> Result<i32, MigrationError> {
    tracing::info!("Running database migrations...");

    sqlx::query("CREATE TABLE IF NOT EXISTS migrations (id INTEGER PRIMARY KEY, version INTEGER NOT NULL)")
        .execute(pool)
        .await
        .map_err(MigrationError::Version)?;

    let current: Option<i32> = sqlx::query_scalar("SELECT version FROM migrations WHERE id = 1")
        .fetch_optional(pool)
        .await
        .map_err(MigrationError::Version)?;
    let mut version = current.unwrap_or(0);

    for step in pending(MIGRATIONS, version) {
        let fail = |source| MigrationError::Step {
            version: step.version,
            name: step.name,
            source,
        };

        let mut tx = pool.begin().await.map_err(fail)?;
        for statement in step.statements {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(fail)?;
        }
        sqlx::query(
            "INSERT INTO migrations (id, version) VALUES (1, $1) ON CONFLICT (id) DO UPDATE SET version = EXCLUDED.version",
        )
        .bind(step.version)
        .execute(&mut *tx)
        .await
        .map_err(fail)?;
        tx.commit().await.map_err(fail)?;

        version = step.version;
        tracing::info!(version, name = step.name, "Applied migration");
    }

    tracing::info!(version, "Database migrations completed");
    Ok(version)
}

/// Steps newer than `current`, in order.
pub fn pending(steps: &'static [Migration], current: i32) -> impl Iterator<Item = &'static Migration> {
    steps.iter().filter(move |step| step.version > current)
}
