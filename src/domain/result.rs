//! Result type alias for Strata

use super::errors::StrataError;

/// Result type alias for Strata operations
///
/// # Examples
///
/// ```
/// use strata::domain::result::Result;
/// use strata::domain::errors::StrataError;
///
/// fn failing_function() -> Result<()> {
///     Err(StrataError::Validation("Invalid input".to_string()))
/// }
///
/// assert!(failing_function().is_err());
/// ```
pub type Result<T> = std::result::Result<T, StrataError>;
