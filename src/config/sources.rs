//! Source configuration
//!
//! One `[[sources]]` table per configured source. The `type` key selects the
//! protocol and the matching protocol table (`[sources.soap]`,
//! `[sources.sftp]`, ...) must be present. Every source also carries a
//! `[sources.schema]` mapping and an optional `[sources.retry]` policy.

use super::schema::RetryConfig;
use super::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Source protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Soap,
    Sftp,
    JsonStream,
    Pdf,
    ObjectStorage,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Soap => "soap",
            Self::Sftp => "sftp",
            Self::JsonStream => "json_stream",
            Self::Pdf => "pdf",
            Self::ObjectStorage => "object_storage",
        }
    }
}

/// Configuration of a single source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique source id (checkpoint and warehouse key)
    pub id: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(rename = "type")]
    pub kind: SourceKind,

    /// CRS of the geometries this source delivers, e.g. "EPSG:25832"
    #[serde(default = "default_source_crs")]
    pub crs: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soap: Option<SoapSourceConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sftp: Option<SftpSourceConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_stream: Option<JsonStreamSourceConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf: Option<PdfSourceConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_storage: Option<ObjectStorageSourceConfig>,

    pub schema: SchemaMapping,

    /// Retry policy for transient adapter failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl SourceConfig {
    pub(crate) fn validate(&self) -> Result<(), String> {
        crate::domain::SourceId::new(self.id.as_str())
            .map_err(|e| format!("sources: {}", e))?;

        let ctx = |msg: String| format!("source '{}': {}", self.id, msg);

        let protocol = match self.kind {
            SourceKind::Soap => self.soap.as_ref().map(|c| c.validate()),
            SourceKind::Sftp => self.sftp.as_ref().map(|c| c.validate()),
            SourceKind::JsonStream => self.json_stream.as_ref().map(|c| c.validate()),
            SourceKind::Pdf => self.pdf.as_ref().map(|c| c.validate()),
            SourceKind::ObjectStorage => self.object_storage.as_ref().map(|c| c.validate()),
        };
        match protocol {
            None => {
                return Err(ctx(format!(
                    "[sources.{kind}] table is required when type = '{kind}'",
                    kind = self.kind.as_str()
                )))
            }
            Some(result) => result.map_err(ctx)?,
        }

        if self.crs.trim().is_empty() {
            return Err(ctx("crs cannot be empty".to_string()));
        }
        crate::core::geometry::Crs::parse(&self.crs).map_err(|e| ctx(format!("crs: {}", e)))?;

        self.schema.validate().map_err(ctx)?;
        self.retry.validate().map_err(|e| ctx(format!("retry.{}", e)))?;
        Ok(())
    }
}

/// Line-oriented file format (SFTP and object storage sources)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LineFormat {
    /// One JSON object per line
    #[default]
    Ndjson,
    /// Delimited text with a header row
    Csv,
}

/// SOAP service source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoapSourceConfig {
    pub endpoint: String,

    /// Value of the SOAPAction header
    pub soap_action: String,

    /// Body element(s) of the request; `{offset}` and `{limit}` are replaced
    /// for every page
    pub body_template: String,

    /// Local name of the element that holds one record in the response
    pub record_element: String,

    #[serde(default = "default_page_size")]
    pub page_size: u64,

    /// WS-Security UsernameToken credentials
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<SecretString>,

    #[serde(default = "default_http_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl SoapSourceConfig {
    fn validate(&self) -> Result<(), String> {
        validate_http_url("soap.endpoint", &self.endpoint)?;
        if self.record_element.trim().is_empty() {
            return Err("soap.record_element cannot be empty".to_string());
        }
        if !self.body_template.contains("{offset}") {
            return Err("soap.body_template must contain an {offset} placeholder".to_string());
        }
        if self.page_size == 0 {
            return Err("soap.page_size must be > 0".to_string());
        }
        if self.username.is_some() != self.password.is_some() {
            return Err("soap.username and soap.password must be set together".to_string());
        }
        Ok(())
    }
}

/// SFTP directory source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SftpSourceConfig {
    pub host: String,

    #[serde(default = "default_sftp_port")]
    pub port: u16,

    pub username: String,

    #[serde(default)]
    pub password: Option<SecretString>,

    #[serde(default)]
    pub private_key_path: Option<String>,

    #[serde(default)]
    pub private_key_passphrase: Option<SecretString>,

    /// Remote directory to list
    pub directory: String,

    /// Only files whose name ends with this suffix are read
    #[serde(default)]
    pub suffix: Option<String>,

    #[serde(default)]
    pub format: LineFormat,

    #[serde(default = "default_csv_delimiter")]
    pub csv_delimiter: char,

    #[serde(default = "default_chunk_bytes")]
    pub chunk_bytes: u64,

    #[serde(default = "default_sftp_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl SftpSourceConfig {
    fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("sftp.host cannot be empty".to_string());
        }
        if self.username.trim().is_empty() {
            return Err("sftp.username cannot be empty".to_string());
        }
        if self.password.is_none() && self.private_key_path.is_none() {
            return Err("sftp requires either password or private_key_path".to_string());
        }
        validate_lines("sftp", self.format, self.csv_delimiter, self.chunk_bytes)
    }
}

/// Streaming JSON over HTTP source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonStreamSourceConfig {
    pub url: String,

    /// Dotted path of the array holding the records (e.g. "features").
    /// When unset the body is a top-level array or newline-delimited JSON.
    #[serde(default)]
    pub records_path: Option<String>,

    #[serde(default = "default_records_per_chunk")]
    pub records_per_chunk: usize,

    #[serde(default)]
    pub bearer_token: Option<SecretString>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default = "default_stream_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl JsonStreamSourceConfig {
    fn validate(&self) -> Result<(), String> {
        validate_http_url("json_stream.url", &self.url)?;
        if self.records_per_chunk == 0 {
            return Err("json_stream.records_per_chunk must be > 0".to_string());
        }
        if let Some(path) = &self.records_path {
            if path.split('.').any(|part| part.is_empty()) {
                return Err(format!("json_stream.records_path '{}' is malformed", path));
            }
        }
        Ok(())
    }
}

/// Object store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectStoreBackend {
    /// Google Cloud Storage JSON API
    Gcs,
    /// Local directory (tests, mounted buckets)
    Local,
}

/// Location of objects in a bucket or directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    pub backend: ObjectStoreBackend,

    #[serde(default)]
    pub bucket: Option<String>,

    #[serde(default = "default_gcs_base_url")]
    pub base_url: String,

    /// OAuth2 bearer token for GCS
    #[serde(default)]
    pub token: Option<SecretString>,

    /// Root directory for the local backend
    #[serde(default)]
    pub root: Option<String>,

    #[serde(default)]
    pub prefix: String,

    #[serde(default)]
    pub suffix: Option<String>,

    #[serde(default = "default_http_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl ObjectStoreConfig {
    pub(crate) fn validate(&self, section: &str) -> Result<(), String> {
        match self.backend {
            ObjectStoreBackend::Gcs => {
                if self.bucket.as_deref().map_or(true, |b| b.trim().is_empty()) {
                    return Err(format!("{}.bucket is required for the gcs backend", section));
                }
                validate_http_url(&format!("{}.base_url", section), &self.base_url)
            }
            ObjectStoreBackend::Local => {
                if self.root.as_deref().map_or(true, |r| r.trim().is_empty()) {
                    return Err(format!("{}.root is required for the local backend", section));
                }
                Ok(())
            }
        }
    }
}

/// Line-oriented files in object storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStorageSourceConfig {
    pub store: ObjectStoreConfig,

    #[serde(default)]
    pub format: LineFormat,

    #[serde(default = "default_csv_delimiter")]
    pub csv_delimiter: char,

    #[serde(default = "default_chunk_bytes")]
    pub chunk_bytes: u64,
}

impl ObjectStorageSourceConfig {
    fn validate(&self) -> Result<(), String> {
        self.store.validate("object_storage.store")?;
        validate_lines(
            "object_storage",
            self.format,
            self.csv_delimiter,
            self.chunk_bytes,
        )
    }
}

/// PDF documents in object storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfSourceConfig {
    pub store: ObjectStoreConfig,

    /// Regex with named captures applied to each text line of a page.
    /// Lines that do not match are not records.
    pub line_pattern: String,
}

impl PdfSourceConfig {
    fn validate(&self) -> Result<(), String> {
        self.store.validate("pdf.store")?;
        let re = regex::Regex::new(&self.line_pattern)
            .map_err(|e| format!("pdf.line_pattern is not a valid regex: {}", e))?;
        if re.capture_names().flatten().next().is_none() {
            return Err("pdf.line_pattern must contain at least one named capture".to_string());
        }
        Ok(())
    }
}

/// Declarative mapping from provisional fields to the canonical model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaMapping {
    /// Field holding the record's business key (dotted paths allowed)
    pub id_field: String,

    pub geometry: GeometryMapping,

    /// Accept "12,5" as 12.5
    #[serde(default)]
    pub decimal_comma: bool,

    #[serde(default)]
    pub fields: Vec<FieldMapping>,
}

impl SchemaMapping {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.id_field.trim().is_empty() {
            return Err("schema.id_field cannot be empty".to_string());
        }
        self.geometry.validate()?;

        let mut targets = std::collections::HashSet::new();
        for field in &self.fields {
            if field.source.trim().is_empty() || field.target.trim().is_empty() {
                return Err("schema.fields entries need a source and a target".to_string());
            }
            if !targets.insert(field.target.as_str()) {
                return Err(format!(
                    "schema.fields target '{}' is mapped twice",
                    field.target
                ));
            }
            if let (Some(min), Some(max)) = (field.min, field.max) {
                if min > max {
                    return Err(format!(
                        "schema.fields '{}': min ({}) is greater than max ({})",
                        field.target, min, max
                    ));
                }
            }
            if let Some(pattern) = &field.pattern {
                regex::Regex::new(pattern).map_err(|e| {
                    format!("schema.fields '{}': invalid pattern: {}", field.target, e)
                })?;
            }
        }
        Ok(())
    }
}

/// Where a record's geometry comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum GeometryMapping {
    /// A GeoJSON geometry object (or a JSON string containing one)
    Geojson { field: String },
    /// A WKT string
    Wkt { field: String },
    /// A point from two numeric fields
    Xy { x_field: String, y_field: String },
}

impl GeometryMapping {
    fn validate(&self) -> Result<(), String> {
        let empty = match self {
            Self::Geojson { field } | Self::Wkt { field } => field.trim().is_empty(),
            Self::Xy { x_field, y_field } => x_field.trim().is_empty() || y_field.trim().is_empty(),
        };
        if empty {
            return Err("schema.geometry field names cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Canonical attribute type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Date,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
            Self::Date => "date",
        }
    }
}

/// One attribute mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Provisional field name (dotted paths allowed)
    pub source: String,

    /// Canonical attribute name
    pub target: String,

    #[serde(rename = "type")]
    pub field_type: FieldType,

    #[serde(default)]
    pub required: bool,

    /// Value used when the field is missing
    #[serde(default)]
    pub default: Option<serde_json::Value>,

    /// Numeric lower bound (inclusive)
    #[serde(default)]
    pub min: Option<f64>,

    /// Numeric upper bound (inclusive)
    #[serde(default)]
    pub max: Option<f64>,

    #[serde(default)]
    pub max_length: Option<usize>,

    /// Regex the string form must match
    #[serde(default)]
    pub pattern: Option<String>,

    /// Allowed string values
    #[serde(default)]
    pub allowed: Option<Vec<String>>,
}

fn validate_http_url(name: &str, value: &str) -> Result<(), String> {
    let url = url::Url::parse(value).map_err(|e| format!("{} is not a valid URL: {}", name, e))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("{} must use http or https, got '{}'", name, url.scheme()));
    }
    Ok(())
}

fn validate_lines(section: &str, format: LineFormat, delimiter: char, chunk_bytes: u64) -> Result<(), String> {
    if chunk_bytes < 1024 {
        return Err(format!("{}.chunk_bytes must be at least 1024", section));
    }
    if format == LineFormat::Csv && (!delimiter.is_ascii() || delimiter == '\n' || delimiter == '"') {
        return Err(format!(
            "{}.csv_delimiter must be a single ASCII character other than newline or quote",
            section
        ));
    }
    Ok(())
}

fn default_true() -> bool {
    true
}

fn default_source_crs() -> String {
    "EPSG:4326".to_string()
}

fn default_page_size() -> u64 {
    100
}

fn default_http_timeout_seconds() -> u64 {
    60
}

fn default_sftp_port() -> u16 {
    22
}

fn default_csv_delimiter() -> char {
    ','
}

fn default_chunk_bytes() -> u64 {
    1024 * 1024
}

fn default_sftp_timeout_seconds() -> u64 {
    30
}

fn default_records_per_chunk() -> usize {
    500
}

fn default_stream_timeout_seconds() -> u64 {
    600
}

fn default_gcs_base_url() -> String {
    "https://storage.googleapis.com".to_string()
}
