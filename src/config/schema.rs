//! Configuration schema for depot
//!
//! Configuration is stored at `~/.config/depot/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Timed-retention settings
    pub retain: RetainConfig,

    /// Remote fetch retry policy
    pub retry: RetryConfig,

    /// Pack source settings
    pub source: SourceConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
        }
    }
}

/// Timed-retention policy
///
/// A cache entry whose refcount reaches zero is parked in the retained
/// stage for the configured duration instead of being evicted outright.
/// Any new acquisition before expiry cancels the eviction without a
/// reload. With `enabled = false`, refcount-zero entries are marked for
/// eviction immediately.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetainConfig {
    /// Keep zero-refcount entries alive for a while
    pub enabled: bool,

    /// How long a zero-refcount pack lingers, in seconds
    pub pack_seconds: f64,

    /// How long a zero-refcount item lingers, in seconds
    pub item_seconds: f64,
}

impl Default for RetainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pack_seconds: 30.0,
            item_seconds: 10.0,
        }
    }
}

/// Retry policy for remote fetches
///
/// The delay is fixed between attempts, not exponential. Each attempt
/// consumes one unit of the retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts for one fetch
    pub max_retries: u32,

    /// Fixed pause between attempts, in seconds
    pub delay_seconds: f64,

    /// Per-request timeout, in seconds
    pub timeout_seconds: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay_seconds: 1.0,
            timeout_seconds: 30.0,
        }
    }
}

/// Where pack images are fetched from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Root directory for local pack files
    pub root: PathBuf,

    /// Base URL for remote packs; non-empty selects the remote strategy
    pub base_url: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("packs"),
            base_url: String::new(),
        }
    }
}

impl SourceConfig {
    /// Whether packs are fetched over HTTP rather than from disk
    pub fn is_remote(&self) -> bool {
        !self.base_url.is_empty()
    }
}
