//! Database configuration
//!
//! `DATABASE_URL` is the single source of truth, read from the environment
//! (a `.env` file is honored if present). Pool sizing has env overrides
//! with conservative defaults.

use crate::error::{Result, StoreError};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

/// Production trade table.
pub const TRADE_TABLE: &str = "cites_trade_records";

/// Staging table, cleared at the start of every load.
pub const STAGING_TABLE: &str = "cites_trade_records_staging";

/// Species registry table.
pub const SPECIES_TABLE: &str = "species";

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl DbConfig {
    /// Load from the environment. Fails when `DATABASE_URL` is unset.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| StoreError::Config("DATABASE_URL is not set".to_string()))?;

        let max_connections = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8);

        let acquire_timeout = std::env::var("DB_ACQUIRE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(30));

        Ok(Self {
            database_url,
            max_connections,
            acquire_timeout,
        })
    }

    /// Open a connection pool.
    pub async fn connect(&self) -> Result<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect(&self.database_url)
            .await?;
        info!(
            max_connections = self.max_connections,
            "Connected to database"
        );
        Ok(pool)
    }

    /// Run pending migrations.
    pub async fn migrate(pool: &PgPool) -> Result<()> {
        sqlx::migrate!("./migrations").run(pool).await?;
        Ok(())
    }
}
