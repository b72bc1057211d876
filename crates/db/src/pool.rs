//! Postgres connection pool for `PgStore`.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::DbError;

pub type DbPool = PgPool;

/// Connection settings for [`create_pool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long a caller waits for a free connection before failing.
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolSettings {
    /// Settings with a ceiling of `max_connections`; the floor never
    /// exceeds it.
    pub fn with_max_connections(max_connections: u32) -> Self {
        let max_connections = max_connections.max(1);
        let defaults = Self::default();
        Self {
            max_connections,
            min_connections: defaults.min_connections.min(max_connections),
            acquire_timeout: defaults.acquire_timeout,
        }
    }
}

pub async fn create_pool(database_url: &str, settings: &PoolSettings) -> Result<DbPool, DbError> {
    info!(
        max_connections = settings.max_connections,
        min_connections = settings.min_connections,
        acquire_timeout_ms = settings.acquire_timeout.as_millis() as u64,
        "connecting to database"
    );
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Apply the workflow, execution and job schema from `migrations/`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbError> {
    let migrator = sqlx::migrate!("../../migrations");
    info!(available = migrator.iter().count(), "running database migrations");
    migrator.run(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_never_exceeds_ceiling() {
        let settings = PoolSettings::with_max_connections(1);
        assert_eq!(settings.max_connections, 1);
        assert_eq!(settings.min_connections, 1);

        let settings = PoolSettings::with_max_connections(0);
        assert_eq!(settings.max_connections, 1);
    }

    #[test]
    fn larger_ceiling_keeps_default_floor() {
        let settings = PoolSettings::with_max_connections(20);
        assert_eq!(settings.min_connections, PoolSettings::default().min_connections);
        assert_eq!(settings.acquire_timeout, Duration::from_secs(30));
    }
}
