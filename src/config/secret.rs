//! Credential wrappers
//!
//! Source passwords, bearer tokens and the warehouse connection string are
//! held in `secrecy::Secret`, which redacts `Debug` output and zeroizes the
//! value on drop. Values must be read with `expose_secret()`.
//!
//! ```rust
//! use strata::config::secret_string;
//! use secrecy::ExposeSecret;
//!
//! let token = secret_string("s3cr3t".to_string());
//! assert_eq!(token.expose_secret().as_str(), "s3cr3t");
//! assert!(!format!("{:?}", token).contains("s3cr3t"));
//! ```

use secrecy::{CloneableSecret, DebugSecret, Secret, SerializableSecret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

/// String payload of a [`SecretString`]
#[derive(Clone, Debug, Zeroize)]
#[zeroize(drop)]
pub struct SecretValue(String);

impl CloneableSecret for SecretValue {}
impl DebugSecret for SecretValue {}
impl SerializableSecret for SecretValue {}

impl SecretValue {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<String> for SecretValue {
    fn from(s: String) -> Self {
        SecretValue(s)
    }
}

impl PartialEq<str> for SecretValue {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl AsRef<str> for SecretValue {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for SecretValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SecretValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(SecretValue)
    }
}

/// A zeroizing, debug-redacted string
pub type SecretString = Secret<SecretValue>;

/// Wraps a plain string in a [`SecretString`]
#[inline]
pub fn secret_string(value: String) -> SecretString {
    Secret::new(SecretValue::from(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_secret_debug_redacted() {
        let secret = secret_string("sftp-password".to_string());
        let debug_output = format!("{secret:?}");
        assert!(!debug_output.contains("sftp-password"));
    }

    #[test]
    fn test_secret_deserialize() {
        #[derive(Deserialize)]
        struct Credentials {
            password: SecretString,
        }

        let creds: Credentials = toml::from_str("password = \"hunter2\"").unwrap();
        assert_eq!(creds.password.expose_secret(), "hunter2");
    }

    #[test]
    fn test_secret_blank() {
        assert!(secret_string("  ".to_string()).expose_secret().is_empty());
        assert!(!secret_string("x".to_string()).expose_secret().is_empty());
    }
}
