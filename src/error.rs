//! Error types for depot
//!
//! All modules use `DepotResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for depot operations
pub type DepotResult<T> = Result<T, DepotError>;

/// All errors that can occur in depot
#[derive(Error, Debug)]
pub enum DepotError {
    // Manifest errors
    #[error("Invalid manifest at {path}: {reason}")]
    ManifestInvalid { path: PathBuf, reason: String },

    #[error("Manifest file not found: {0}")]
    ManifestNotFound(PathBuf),

    #[error("Unknown pack: {0}")]
    PackNotFound(String),

    #[error("Pack {pack} does not contain item: {item}")]
    ItemNotFound { pack: String, item: String },

    // Load errors
    #[error("Failed to load pack {pack}: {reason}")]
    PackLoadFailed { pack: String, reason: String },

    #[error("Failed to load item {item} from pack {pack}: {reason}")]
    ItemLoadFailed {
        pack: String,
        item: String,
        reason: String,
    },

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Malformed pack image for {pack}: {reason}")]
    ImageMalformed { pack: String, reason: String },

    // Network errors
    #[error("HTTP {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl DepotError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a network error for a URL
    pub fn network(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Network {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Whether a failed fetch may be retried.
    ///
    /// Transport-level failures and server-side/throttling statuses are
    /// retryable; client errors and local failures are not. This is the
    /// default classifier for the retry loop.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
