//! Validate config command implementation

use super::exit_code;
use crate::config::load_config;
use crate::config::{ObjectStoreBackend, ObjectStoreConfig, SourceConfig, StrataConfig, WarehouseTarget};
use clap::Args;

/// Arguments for the validate-config command
#[derive(Args, Debug)]
pub struct ValidateArgs {}

impl ValidateArgs {
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(config_path = %config_path, "Validating configuration");

        println!("Validating configuration file: {config_path}");
        println!();

        // load_config validates as part of loading
        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                println!("Configuration is invalid");
                println!("   Error: {e}");
                return Ok(exit_code::CONFIGURATION);
            }
        };

        println!("Configuration is valid");
        println!();
        print_summary(&config);
        Ok(exit_code::SUCCESS)
    }
}

fn print_summary(config: &StrataConfig) {
    println!("Configuration Summary:");
    println!("  Log Level: {}", config.application.log_level);
    println!("  Dry Run: {}", config.application.dry_run);
    println!("  Target CRS: {}", config.pipeline.target_crs);
    println!(
        "  Batch: {} records / {} bytes / {} ms",
        config.pipeline.batch.max_records,
        config.pipeline.batch.max_bytes,
        config.pipeline.batch.max_age_ms
    );
    println!("  In-flight Records: {}", config.pipeline.max_in_flight_records);

    match config.warehouse.target {
        WarehouseTarget::PostgreSQL => {
            if let Some(ref pg_config) = config.warehouse.postgresql {
                use secrecy::ExposeSecret;
                println!("  Warehouse: PostgreSQL");
                println!(
                    "  PostgreSQL Connection: {}",
                    connection_host(pg_config.connection_string.expose_secret().as_str())
                );
                println!("  Max Connections: {}", pg_config.max_connections);
            }
        }
        WarehouseTarget::Memory => println!("  Warehouse: in-memory"),
    }
    println!("  Checkpoints: {:?} ({})", config.state.backend, config.state.path);
    println!("  Failures: {:?} ({})", config.failures.backend, config.failures.path);

    println!("  Sources:");
    for source in &config.sources {
        println!(
            "    - {:<20} {:<15} {:<12} {}{}",
            source.id,
            source.kind.as_str(),
            source.crs,
            location(source),
            if source.enabled { "" } else { " (disabled)" }
        );
    }
    println!();
}

fn location(source: &SourceConfig) -> String {
    if let Some(soap) = &source.soap {
        return soap.endpoint.clone();
    }
    if let Some(sftp) = &source.sftp {
        return format!("sftp://{}:{}/{}", sftp.host, sftp.port, sftp.directory.trim_start_matches('/'));
    }
    if let Some(json) = &source.json_stream {
        return json.url.clone();
    }
    if let Some(pdf) = &source.pdf {
        return store_location(&pdf.store);
    }
    if let Some(objects) = &source.object_storage {
        return store_location(&objects.store);
    }
    String::new()
}

fn store_location(store: &ObjectStoreConfig) -> String {
    match store.backend {
        ObjectStoreBackend::Gcs => format!(
            "gs://{}/{}",
            store.bucket.as_deref().unwrap_or(""),
            store.prefix
        ),
        ObjectStoreBackend::Local => format!(
            "{}/{}",
            store.root.as_deref().unwrap_or(".").trim_end_matches('/'),
            store.prefix
        ),
    }
}

/// Part of a connection string after the credentials
fn connection_host(connection_string: &str) -> &str {
    connection_string
        .rsplit_once('@')
        .map(|(_, host)| host)
        .unwrap_or("***")
}
