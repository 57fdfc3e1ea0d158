//! Source adapter construction

use super::json_stream::JsonStreamSource;
use super::object_storage::{object_storage_source, sftp_source};
use super::pdf::PdfSource;
use super::soap::SoapSource;
use super::traits::SourceAdapter;
use crate::adapters::storage::create_object_store;
use crate::config::{SourceConfig, SourceKind};
use crate::domain::{Result, SourceId, StrataError};

fn missing_section(config: &SourceConfig) -> StrataError {
    StrataError::Configuration(format!(
        "source '{}' has type '{}' but no [sources.{}] table",
        config.id,
        config.kind.as_str(),
        config.kind.as_str()
    ))
}

/// Builds the protocol adapter for a source
///
/// The coordinator wraps the result in [`RetryingSource`](super::RetryingSource)
/// with the source's retry policy.
///
/// # Errors
///
/// Returns a configuration error if the protocol table is missing or the
/// adapter rejects its parameters. Nothing is connected yet; call
/// `open()` on the result.
pub fn create_source_adapter(config: &SourceConfig) -> Result<Box<dyn SourceAdapter>> {
    let source_id = SourceId::new(config.id.as_str()).map_err(StrataError::Configuration)?;
    let invalid = |e: crate::domain::SourceError| {
        StrataError::Configuration(format!("source '{}': {}", config.id, e))
    };

    let adapter: Box<dyn SourceAdapter> = match config.kind {
        SourceKind::Soap => {
            let soap = config.soap.as_ref().ok_or_else(|| missing_section(config))?;
            Box::new(SoapSource::new(source_id, soap).map_err(invalid)?)
        }
        SourceKind::Sftp => {
            let sftp = config.sftp.as_ref().ok_or_else(|| missing_section(config))?;
            Box::new(sftp_source(source_id, sftp).map_err(invalid)?)
        }
        SourceKind::JsonStream => {
            let json = config
                .json_stream
                .as_ref()
                .ok_or_else(|| missing_section(config))?;
            Box::new(JsonStreamSource::new(source_id, json).map_err(invalid)?)
        }
        SourceKind::Pdf => {
            let pdf = config.pdf.as_ref().ok_or_else(|| missing_section(config))?;
            let store = create_object_store(&pdf.store).map_err(invalid)?;
            Box::new(PdfSource::new(source_id, store, &pdf.line_pattern).map_err(invalid)?)
        }
        SourceKind::ObjectStorage => {
            let objects = config
                .object_storage
                .as_ref()
                .ok_or_else(|| missing_section(config))?;
            Box::new(object_storage_source(source_id, objects).map_err(invalid)?)
        }
    };
    tracing::debug!(
        source_id = %config.id,
        kind = adapter.kind(),
        max_attempts = config.retry.max_attempts,
        "Created source adapter"
    );
    Ok(adapter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> SourceConfig {
        toml::from_str(toml_src).unwrap()
    }

    const SCHEMA: &str = r#"
        [schema]
        id_field = "properties.id"
        geometry = { format = "geojson", field = "geometry" }
    "#;

    #[test]
    fn test_creates_json_stream_adapter() {
        let config = parse(&format!(
            r#"
            id = "parcels"
            type = "json_stream"
            [json_stream]
            url = "https://example.com/parcels.geojson"
            records_path = "features"
            {SCHEMA}
            "#
        ));
        let adapter = create_source_adapter(&config).unwrap();
        assert_eq!(adapter.kind(), "json_stream");
        assert_eq!(adapter.source_id().as_str(), "parcels");
    }

    #[test]
    fn test_missing_protocol_table() {
        let config = parse(&format!(
            r#"
            id = "herds"
            type = "soap"
            {SCHEMA}
            "#
        ));
        assert!(matches!(
            create_source_adapter(&config),
            Err(StrataError::Configuration(_))
        ));
    }
}
