//! Error types for fragments

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FragmentError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Conversion from {from} to .{ext} is not supported")]
    UnsupportedConversion { from: String, ext: String },

    #[error("Conversion failed: {0}")]
    ConversionFailure(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FragmentError {
    /// Whether the error means "nothing stored at that address"
    pub fn is_not_found(&self) -> bool {
        matches!(self, FragmentError::NotFound(_))
    }
}
