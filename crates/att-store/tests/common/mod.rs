//! Shared PostgreSQL container harness for att-store integration tests
//!
//! Each test gets its own container with the migrations applied, so tests
//! are isolated and need no manual database setup. Tests that use this
//! harness are `#[ignore]`d by default and run with
//! `cargo test -p att-store -- --ignored` when Docker is available.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::postgres::Postgres;
use uuid::Uuid;

/// PostgreSQL test container wrapper with migrations pre-applied.
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        let container = Postgres::default()
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&format!(
                "postgresql://postgres:postgres@{}:{}/postgres",
                host, port
            ))
            .await
            .context("Failed to connect to PostgreSQL")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert a registry species and return its id.
    pub async fn seed_species(&self, scientific_name: &str) -> Result<Uuid> {
        let (id,): (Uuid,) =
            sqlx::query_as("INSERT INTO species (scientific_name) VALUES ($1) RETURNING id")
                .bind(scientific_name)
                .fetch_one(&self.pool)
                .await
                .context("Failed to seed species")?;
        Ok(id)
    }
}
