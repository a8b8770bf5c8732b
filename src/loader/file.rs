//! Local-filesystem pack fetch strategy

use crate::error::{DepotError, DepotResult};
use crate::loader::{verify_checksum, PackLoader, Priority, Uri};
use crate::manifest::PackDescriptor;
use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

/// Fetches pack images from a local directory tree
#[derive(Debug, Default)]
pub struct FileLoader;

impl FileLoader {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PackLoader for FileLoader {
    async fn fetch_pack(
        &self,
        descriptor: &PackDescriptor,
        uri: &Uri,
        _priority: Priority,
    ) -> DepotResult<Vec<u8>> {
        let Uri::File(path) = uri else {
            return Err(DepotError::Internal(format!(
                "file loader given non-file uri {uri}"
            )));
        };

        debug!(pack = %descriptor.id, path = %path.display(), "reading pack image");
        let bytes = fs::read(path).await.map_err(|e| DepotError::PackLoadFailed {
            pack: descriptor.id.clone(),
            reason: format!("reading {}: {}", path.display(), e),
        })?;

        verify_checksum(descriptor, &bytes)?;
        Ok(bytes)
    }

    fn strategy_name(&self) -> &'static str {
        "file"
    }
}
