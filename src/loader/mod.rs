//! Load primitives: fetching pack images and materializing items
//!
//! The cache consumes loading through the [`PackLoader`] trait so the
//! same engine works against local files, a remote CDN, or a test stub.
//! Strategy selection follows the configured source.

pub mod file;
pub mod image;
pub mod remote;
pub mod retry;

pub use file::FileLoader;
pub use remote::RemoteLoader;

use crate::error::{DepotError, DepotResult};
use crate::manifest::PackDescriptor;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Raw pack image handle shared between the pack entry and its items
pub type PackBytes = Arc<[u8]>;

/// Materialized item payload
pub type ItemBytes = Arc<[u8]>;

/// Load priority, forwarded to the underlying fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

/// A resolved fetch location for a pack image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Uri {
    /// Path on the local filesystem
    File(PathBuf),
    /// HTTP(S) URL
    Http(String),
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Http(url) => write!(f, "{}", url),
        }
    }
}

/// Abstract pack fetch and item materialization
///
/// `fetch_pack` runs on a spawned task; its completion is marshaled back
/// to the registry thread over the registry's event channel. Expected
/// failures (network, missing files) come back as `Err`, never panics.
#[async_trait]
pub trait PackLoader: Send + Sync {
    /// Fetch the raw pack image for a descriptor
    async fn fetch_pack(
        &self,
        descriptor: &PackDescriptor,
        uri: &Uri,
        priority: Priority,
    ) -> DepotResult<Vec<u8>>;

    /// Materialize one item from an already-fetched pack image.
    ///
    /// The default parses the in-memory image directory; stubs and
    /// exotic backends may override.
    async fn materialize_item(
        &self,
        descriptor: &PackDescriptor,
        pack: &PackBytes,
        item: &str,
    ) -> DepotResult<Vec<u8>> {
        image::extract_item(pack, &descriptor.id, item)
    }

    /// Human-readable strategy name for diagnostics
    fn strategy_name(&self) -> &'static str;
}

/// Verify fetched bytes against the descriptor's optional checksum.
pub fn verify_checksum(descriptor: &PackDescriptor, bytes: &[u8]) -> DepotResult<()> {
    let Some(expected) = descriptor.sha256.as_deref() else {
        return Ok(());
    };
    let actual = hex::encode(Sha256::digest(bytes));
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(DepotError::ChecksumMismatch {
            path: descriptor.path.clone(),
            expected: expected.to_string(),
            actual,
        })
    }
}
