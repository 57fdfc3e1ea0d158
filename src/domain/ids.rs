//! Domain identifier types with validation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Source identifier newtype wrapper
///
/// Names one configured source. Used as the key for checkpoints, failure
/// records and warehouse rows, so it is restricted to characters that are
/// safe in file names and SQL literals.
///
/// # Examples
///
/// ```
/// use strata::domain::ids::SourceId;
/// use std::str::FromStr;
///
/// let id = SourceId::from_str("chr_herds").unwrap();
/// assert_eq!(id.as_str(), "chr_herds");
/// assert!(SourceId::new("bad id!").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceId(String);

impl SourceId {
    /// Creates a new SourceId, rejecting empty ids and characters outside
    /// `[A-Za-z0-9_.-]`
    pub fn new(id: impl Into<String>) -> Result<Self, String> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err("Source ID cannot be empty".to_string());
        }
        if let Some(c) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(format!(
                "Source ID '{}' contains invalid character '{}'",
                id, c
            ));
        }
        Ok(Self(id))
    }

    /// Returns the source ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes self and returns the inner String
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for SourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Record identifier newtype wrapper
///
/// The business key of a canonical record, taken from the mapped id field.
/// Unique within a batch is not required; the warehouse key also includes
/// the batch sequence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(String);

impl RecordId {
    /// Creates a new RecordId from a non-blank string
    pub fn new(id: impl Into<String>) -> Result<Self, String> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err("Record ID cannot be empty".to_string());
        }
        Ok(Self(id))
    }

    /// Returns the record ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
