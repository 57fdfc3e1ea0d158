//! Configuration management for Strata.
//!
//! Strata is configured with one TOML file (`strata.toml` by default) with:
//! - Environment variable substitution (`${VAR_NAME}`)
//! - `STRATA_<SECTION>_<KEY>` overrides
//! - Default values for optional settings
//! - Validation with descriptive messages
//!
//! # Example Configuration
//!
//! ```toml
//! [application]
//! log_level = "info"
//!
//! [pipeline]
//! target_crs = "EPSG:4326"
//! max_in_flight_records = 2000
//!
//! [pipeline.batch]
//! max_records = 500
//!
//! [warehouse]
//! target = "postgresql"
//!
//! [warehouse.postgresql]
//! connection_string = "${STRATA_PG_URL}"
//!
//! [[sources]]
//! id = "chr_herds"
//! type = "soap"
//! crs = "EPSG:25832"
//!
//! [sources.soap]
//! endpoint = "https://chr.example.dk/service"
//! soap_action = "ListHerds"
//! body_template = "<ListHerds><Offset>{offset}</Offset><Limit>{limit}</Limit></ListHerds>"
//! record_element = "Herd"
//!
//! [sources.schema]
//! id_field = "HerdNumber"
//! geometry = { format = "xy", x_field = "X", y_field = "Y" }
//! ```
//!
//! ```rust,no_run
//! use strata::config::load_config;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("strata.toml")?;
//! for source in &config.sources {
//!     println!("{} ({})", source.id, source.kind.as_str());
//! }
//! # Ok(())
//! # }
//! ```

pub mod loader;
pub mod schema;
pub mod secret;
pub mod sources;

pub use loader::{load_config, parse_config};
pub use schema::{
    ApplicationConfig, BatchConfig, FailureStoreConfig, LoggingConfig, PipelineConfig,
    PostgreSQLConfig, RetryConfig, StateConfig, StoreBackend, StrataConfig, WarehouseConfig,
    WarehouseTarget,
};
pub use secret::{secret_string, SecretString, SecretValue};
pub use sources::{
    FieldMapping, FieldType, GeometryMapping, JsonStreamSourceConfig, LineFormat,
    ObjectStorageSourceConfig, ObjectStoreBackend, ObjectStoreConfig, PdfSourceConfig,
    SchemaMapping, SftpSourceConfig, SoapSourceConfig, SourceConfig, SourceKind,
};
