//! Storage backend factory
//!
//! Builds the warehouse, checkpoint store and failure sink selected by the
//! configuration. Backends that point at PostgreSQL share one adapter and
//! therefore one connection pool.

use crate::adapters::database::file::{FileCheckpointStorage, JsonLinesFailureStorage};
use crate::adapters::database::memory::{
    InMemoryCheckpointStorage, InMemoryFailureStorage, InMemoryWarehouse,
};
use crate::adapters::database::traits::{CheckpointStorage, FailureStorage, WarehouseClient};
use crate::adapters::postgresql::{PostgreSQLAdapter, PostgreSQLClient};
use crate::config::schema::{StoreBackend, StrataConfig, WarehouseTarget};
use crate::domain::{Result, StrataError};
use std::sync::Arc;

/// Storage backends used by a run
#[derive(Clone)]
pub struct Backends {
    pub warehouse: Arc<dyn WarehouseClient>,
    pub checkpoints: Arc<dyn CheckpointStorage>,
    pub failures: Arc<dyn FailureStorage>,
}

impl Backends {
    /// All three backends in process memory
    pub fn in_memory() -> Self {
        Self {
            warehouse: Arc::new(InMemoryWarehouse::new()),
            checkpoints: Arc::new(InMemoryCheckpointStorage::new()),
            failures: Arc::new(InMemoryFailureStorage::new()),
        }
    }
}

/// Create the storage backends based on the configuration
///
/// No connection is opened here; call `test_connection` on the warehouse
/// to check reachability.
///
/// # Errors
///
/// Returns an error if the PostgreSQL pool cannot be built or a file
/// backend's directory cannot be created
pub async fn create_backends(config: &StrataConfig) -> Result<Backends> {
    let postgresql = match &config.warehouse.postgresql {
        Some(pg_config) if needs_postgresql(config) => {
            tracing::info!("Creating PostgreSQL client");
            let client = PostgreSQLClient::new(pg_config.clone())?;
            Some(Arc::new(PostgreSQLAdapter::new(client)))
        }
        _ => None,
    };

    let warehouse: Arc<dyn WarehouseClient> = match config.warehouse.target {
        WarehouseTarget::PostgreSQL => require_pg(&postgresql, "warehouse")?,
        WarehouseTarget::Memory => {
            tracing::info!("Using in-memory warehouse");
            Arc::new(InMemoryWarehouse::new())
        }
    };

    let checkpoints: Arc<dyn CheckpointStorage> = match config.state.backend {
        StoreBackend::PostgreSQL => require_pg(&postgresql, "state")?,
        StoreBackend::File => Arc::new(FileCheckpointStorage::new(&config.state.path).await?),
        StoreBackend::Memory => Arc::new(InMemoryCheckpointStorage::new()),
    };

    let failures: Arc<dyn FailureStorage> = match config.failures.backend {
        StoreBackend::PostgreSQL => require_pg(&postgresql, "failures")?,
        StoreBackend::File => Arc::new(JsonLinesFailureStorage::new(&config.failures.path).await?),
        StoreBackend::Memory => Arc::new(InMemoryFailureStorage::new()),
    };

    Ok(Backends {
        warehouse,
        checkpoints,
        failures,
    })
}

fn needs_postgresql(config: &StrataConfig) -> bool {
    config.warehouse.target == WarehouseTarget::PostgreSQL
        || config.state.backend == StoreBackend::PostgreSQL
        || config.failures.backend == StoreBackend::PostgreSQL
}

fn require_pg(adapter: &Option<Arc<PostgreSQLAdapter>>, section: &str) -> Result<Arc<PostgreSQLAdapter>> {
    adapter.clone().ok_or_else(|| {
        StrataError::Configuration(format!(
            "{} uses PostgreSQL but [warehouse.postgresql] is missing",
            section
        ))
    })
}
