//! Line files from object storage and SFTP directories

use super::lines::{LineFileSource, LineOptions};
use super::sftp::SftpFiles;
use crate::adapters::storage::create_object_store;
use crate::config::{LineFormat, ObjectStorageSourceConfig, SftpSourceConfig};
use crate::domain::{SourceError, SourceId};
use std::sync::Arc;

fn line_options(format: LineFormat, csv_delimiter: char, chunk_bytes: u64) -> Result<LineOptions, SourceError> {
    // UTF-8 input: only ASCII characters are a single byte on the wire
    if !csv_delimiter.is_ascii() {
        return Err(SourceError::fatal(format!(
            "csv_delimiter '{csv_delimiter}' is not an ASCII character"
        )));
    }
    let csv_delimiter = csv_delimiter as u8;
    Ok(LineOptions {
        format,
        csv_delimiter,
        chunk_bytes,
    })
}

/// Objects under a bucket prefix (GCS) or a local directory
pub fn object_storage_source(
    source_id: SourceId,
    config: &ObjectStorageSourceConfig,
) -> Result<LineFileSource, SourceError> {
    let store = create_object_store(&config.store)?;
    let options = line_options(config.format, config.csv_delimiter, config.chunk_bytes)?;
    Ok(LineFileSource::new(source_id, "object_storage", store, options))
}

/// Files of a remote SFTP directory
pub fn sftp_source(source_id: SourceId, config: &SftpSourceConfig) -> Result<LineFileSource, SourceError> {
    let options = line_options(config.format, config.csv_delimiter, config.chunk_bytes)?;
    Ok(LineFileSource::new(
        source_id,
        "sftp",
        Arc::new(SftpFiles::new(config)),
        options,
    ))
}
