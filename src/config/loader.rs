//! Configuration loader with TOML parsing and environment variable overrides

use super::schema::{StoreBackend, StrataConfig, WarehouseTarget};
use crate::domain::errors::StrataError;
use crate::domain::result::Result;
use regex::Regex;
use std::fs;
use std::path::Path;

/// Loads configuration from a TOML file
///
/// This function:
/// 1. Reads the TOML file
/// 2. Substitutes `${VAR}` environment references (comment lines skipped)
/// 3. Parses the TOML into [`StrataConfig`]
/// 4. Applies `STRATA_*` environment overrides
/// 5. Validates the result
///
/// # Examples
///
/// ```no_run
/// use strata::config::loader::load_config;
///
/// let config = load_config("strata.toml").expect("Failed to load config");
/// println!("{} sources configured", config.sources.len());
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<StrataConfig> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(StrataError::Configuration(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        StrataError::Configuration(format!(
            "Failed to read configuration file {}: {}",
            path.display(),
            e
        ))
    })?;

    parse_config(&contents)
}

/// Parses configuration text, applying substitution, overrides and validation
pub fn parse_config(contents: &str) -> Result<StrataConfig> {
    let contents = substitute_env_vars(contents)?;

    let mut config: StrataConfig = toml::from_str(&contents)
        .map_err(|e| StrataError::Configuration(format!("Failed to parse TOML: {}", e)))?;

    apply_env_overrides(&mut config)?;

    config.validate().map_err(|e| {
        StrataError::Configuration(format!("Configuration validation failed: {}", e))
    })?;

    Ok(config)
}

/// Substitutes environment variables in the format ${VAR_NAME}
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
        .map_err(|e| StrataError::Configuration(format!("Invalid substitution pattern: {}", e)))?;
    let mut result = String::with_capacity(input.len());
    let mut missing_vars: Vec<String> = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            result.push_str(line);
            result.push('\n');
            continue;
        }

        let processed = re.replace_all(line, |caps: &regex::Captures| {
            let name = &caps[1];
            match std::env::var(name) {
                Ok(value) => value,
                Err(_) => {
                    if !missing_vars.iter().any(|v| v == name) {
                        missing_vars.push(name.to_string());
                    }
                    caps[0].to_string()
                }
            }
        });
        result.push_str(&processed);
        result.push('\n');
    }

    if !missing_vars.is_empty() {
        return Err(StrataError::Configuration(format!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(result)
}

/// Applies environment variable overrides using the STRATA_* prefix
///
/// Variables follow `STRATA_<SECTION>_<KEY>`, e.g. `STRATA_PIPELINE_TARGET_CRS`.
fn apply_env_overrides(config: &mut StrataConfig) -> Result<()> {
    fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
        match std::env::var(name) {
            Ok(val) => val.parse().map(Some).map_err(|_| {
                StrataError::Configuration(format!("Invalid value '{}' for {}", val, name))
            }),
            Err(_) => Ok(None),
        }
    }

    // Application
    if let Ok(val) = std::env::var("STRATA_APPLICATION_LOG_LEVEL") {
        config.application.log_level = val;
    }
    if let Some(val) = parse_env("STRATA_APPLICATION_DRY_RUN")? {
        config.application.dry_run = val;
    }

    // Pipeline
    if let Ok(val) = std::env::var("STRATA_PIPELINE_TARGET_CRS") {
        config.pipeline.target_crs = val;
    }
    if let Some(val) = parse_env("STRATA_PIPELINE_MAX_IN_FLIGHT_RECORDS")? {
        config.pipeline.max_in_flight_records = val;
    }
    if let Some(val) = parse_env("STRATA_PIPELINE_QUEUE_CAPACITY")? {
        config.pipeline.queue_capacity = val;
    }
    if let Some(val) = parse_env("STRATA_PIPELINE_BATCH_MAX_RECORDS")? {
        config.pipeline.batch.max_records = val;
    }
    if let Some(val) = parse_env("STRATA_PIPELINE_BATCH_MAX_BYTES")? {
        config.pipeline.batch.max_bytes = val;
    }

    // Warehouse
    if let Ok(val) = std::env::var("STRATA_WAREHOUSE_TARGET") {
        config.warehouse.target = match val.to_lowercase().as_str() {
            "postgresql" => WarehouseTarget::PostgreSQL,
            "memory" => WarehouseTarget::Memory,
            other => {
                return Err(StrataError::Configuration(format!(
                    "Invalid STRATA_WAREHOUSE_TARGET '{}'",
                    other
                )))
            }
        };
    }
    if let Some(ref mut pg) = config.warehouse.postgresql {
        if let Ok(val) = std::env::var("STRATA_WAREHOUSE_POSTGRESQL_CONNECTION_STRING") {
            pg.connection_string = super::secret_string(val);
        }
        if let Some(val) = parse_env("STRATA_WAREHOUSE_POSTGRESQL_MAX_CONNECTIONS")? {
            pg.max_connections = val;
        }
    }

    // State and failures
    if let Ok(val) = std::env::var("STRATA_STATE_BACKEND") {
        config.state.backend = parse_backend("STRATA_STATE_BACKEND", &val)?;
    }
    if let Ok(val) = std::env::var("STRATA_STATE_PATH") {
        config.state.path = val;
    }
    if let Ok(val) = std::env::var("STRATA_FAILURES_BACKEND") {
        config.failures.backend = parse_backend("STRATA_FAILURES_BACKEND", &val)?;
    }
    if let Ok(val) = std::env::var("STRATA_FAILURES_PATH") {
        config.failures.path = val;
    }

    // Logging
    if let Some(val) = parse_env("STRATA_LOGGING_LOCAL_ENABLED")? {
        config.logging.local_enabled = val;
    }
    if let Ok(val) = std::env::var("STRATA_LOGGING_LOCAL_PATH") {
        config.logging.local_path = val;
    }

    Ok(())
}

fn parse_backend(name: &str, value: &str) -> Result<StoreBackend> {
    match value.to_lowercase().as_str() {
        "postgresql" => Ok(StoreBackend::PostgreSQL),
        "file" => Ok(StoreBackend::File),
        "memory" => Ok(StoreBackend::Memory),
        other => Err(StrataError::Configuration(format!(
            "Invalid {} '{}'",
            name, other
        ))),
    }
}
