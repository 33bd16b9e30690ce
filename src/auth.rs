//! HTTP Basic authentication
//!
//! Credentials are checked against the `users` table from [`Config`]. The
//! authenticated email never reaches storage; fragments are owned by the
//! hex-encoded SHA-256 of it.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::Config;
use crate::error::FragmentError;

/// Owner id for an email address
pub fn owner_id(email: &str) -> String {
    hex::encode(Sha256::digest(email.as_bytes()))
}

/// Split a `Basic` Authorization header into (email, password)
pub fn parse_basic(header: &str) -> Result<(String, String), FragmentError> {
    let encoded = header
        .strip_prefix("Basic ")
        .or_else(|| header.strip_prefix("basic "))
        .ok_or_else(|| FragmentError::Auth("Expected Basic credentials".to_string()))?;

    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|e| FragmentError::Auth(format!("Malformed credentials: {e}")))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| FragmentError::Auth("Credentials are not UTF-8".to_string()))?;

    let (email, password) = decoded
        .split_once(':')
        .ok_or_else(|| FragmentError::Auth("Malformed credentials".to_string()))?;

    Ok((email.to_string(), password.to_string()))
}

/// Known users and their passwords
#[derive(Debug, Clone, Default)]
pub struct Authenticator {
    users: BTreeMap<String, String>,
}

impl Authenticator {
    pub fn new(users: BTreeMap<String, String>) -> Self {
        Self { users }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.users.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Verify an Authorization header value, returning the owner id
    pub fn authenticate(&self, header: Option<&str>) -> Result<String, FragmentError> {
        let header =
            header.ok_or_else(|| FragmentError::Auth("Missing Authorization header".to_string()))?;
        let (email, password) = parse_basic(header)?;

        let expected = self
            .users
            .get(&email)
            .ok_or_else(|| FragmentError::Auth("Unknown user or wrong password".to_string()))?;

        if Sha256::digest(expected.as_bytes()) != Sha256::digest(password.as_bytes()) {
            debug!(email = %email, "Rejected credentials");
            return Err(FragmentError::Auth("Unknown user or wrong password".to_string()));
        }

        Ok(owner_id(&email))
    }
}
