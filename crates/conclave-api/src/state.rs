//! Application state wiring the engine to its concrete infrastructure.
//!
//! AppState holds the `Conclave` engine used by both CLI and REST API.
//! The engine is generic over its repositories; AppState pins it to the
//! SQLite implementations and the configured model gateway.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use conclave_core::Conclave;
use conclave_infra::gateway;
use conclave_infra::sqlite::{
    DatabasePool, SqliteEscalationRepository, SqliteRoleCardRepository, SqliteRoomRepository,
};
use conclave_types::config::ConclaveConfig;

/// The engine pinned to infra implementations.
pub type ConcreteConclave =
    Conclave<SqliteRoomRepository, SqliteRoleCardRepository, SqliteEscalationRepository>;

/// Shared application state.
///
/// Used by both CLI commands and REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub conclave: Arc<ConcreteConclave>,
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Create the data directory, open the database and wire the engine.
    /// Ensures the default room exists.
    pub async fn init(data_dir: PathBuf, config: ConclaveConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;
        Self::with_config(data_dir, config).await
    }

    pub async fn with_config(data_dir: PathBuf, config: ConclaveConfig) -> anyhow::Result<Self> {
        let db_pool = DatabasePool::open(&data_dir)
            .await
            .context("failed to open database")?;

        let (invoker, tools) = gateway::from_config(&config.invoker);

        let conclave = Conclave::new(
            config,
            SqliteRoomRepository::new(db_pool.clone()),
            SqliteRoleCardRepository::new(db_pool.clone()),
            SqliteEscalationRepository::new(db_pool.clone()),
            invoker,
            tools,
        );
        conclave.rooms().get_or_create_default().await?;

        Ok(Self {
            conclave: Arc::new(conclave),
            data_dir,
            db_pool,
        })
    }

    pub fn config(&self) -> &ConclaveConfig {
        self.conclave.config()
    }
}
