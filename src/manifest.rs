//! Pack manifest parsing and validation
//!
//! The manifest is a JSON document produced by the build-time packer. It
//! maps pack ids to descriptors: the file path of the pack image, the
//! items the pack contains, the packs it depends on, and an optional
//! content checksum. The cache consumes nothing else from it.

use crate::error::{DepotError, DepotResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

/// Identifier of a pack, e.g. `ui/common`
pub type PackId = String;

/// Name of an item inside a pack, e.g. `button.png`
pub type ItemId = String;

/// Immutable metadata for one pack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackDescriptor {
    /// Pack id, filled in from the manifest key
    #[serde(skip)]
    pub id: PackId,

    /// Pack image path, relative to the source root or base URL
    pub path: String,

    /// Items contained in the pack image
    #[serde(default)]
    pub items: Vec<ItemId>,

    /// Packs that must be loaded before this one counts as loaded
    #[serde(default)]
    pub dependencies: Vec<PackId>,

    /// Optional hex-encoded SHA-256 of the pack image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl PackDescriptor {
    /// Whether the pack image contains the named item
    pub fn has_item(&self, item: &str) -> bool {
        self.items.iter().any(|i| i == item)
    }
}

/// Raw manifest document shape
#[derive(Debug, Deserialize)]
struct ManifestDoc {
    packs: HashMap<PackId, PackDescriptor>,
}

/// Parsed and validated pack manifest
#[derive(Debug, Clone)]
pub struct PackManifest {
    origin: PathBuf,
    packs: HashMap<PackId, Arc<PackDescriptor>>,
}

impl PackManifest {
    /// Parse a manifest from a JSON string.
    ///
    /// `origin` is only used in error messages.
    pub fn parse(json: &str, origin: &Path) -> DepotResult<Self> {
        let doc: ManifestDoc =
            serde_json::from_str(json).map_err(|e| DepotError::ManifestInvalid {
                path: origin.to_path_buf(),
                reason: e.to_string(),
            })?;

        let mut packs = HashMap::with_capacity(doc.packs.len());
        for (id, mut desc) in doc.packs {
            validate_pack_id(&id).map_err(|reason| DepotError::ManifestInvalid {
                path: origin.to_path_buf(),
                reason,
            })?;
            desc.id = id.clone();
            packs.insert(id, Arc::new(desc));
        }

        let manifest = Self {
            origin: origin.to_path_buf(),
            packs,
        };
        manifest.validate()?;
        Ok(manifest)
    }

    /// Load and parse a manifest file
    pub async fn from_file(path: &Path) -> DepotResult<Self> {
        if !path.exists() {
            return Err(DepotError::ManifestNotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| DepotError::io(format!("reading manifest {}", path.display()), e))?;
        Self::parse(&content, path)
    }

    /// Where this manifest was loaded from
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    /// Look up a descriptor
    pub fn get(&self, id: &str) -> Option<&Arc<PackDescriptor>> {
        self.packs.get(id)
    }

    /// Look up a descriptor, erroring on unknown packs
    pub fn descriptor(&self, id: &str) -> DepotResult<Arc<PackDescriptor>> {
        self.packs
            .get(id)
            .cloned()
            .ok_or_else(|| DepotError::PackNotFound(id.to_string()))
    }

    /// All pack ids, sorted
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.packs.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of packs in the manifest
    pub fn len(&self) -> usize {
        self.packs.len()
    }

    /// Whether the manifest declares no packs
    pub fn is_empty(&self) -> bool {
        self.packs.is_empty()
    }

    /// Transitive dependency closure of a pack, sorted, excluding the pack itself
    pub fn dependency_closure(&self, id: &str) -> DepotResult<Vec<PackId>> {
        let mut closure = BTreeSet::new();
        let mut stack = vec![self.descriptor(id)?];

        while let Some(desc) = stack.pop() {
            for dep in &desc.dependencies {
                if dep != id && closure.insert(dep.clone()) {
                    stack.push(self.descriptor(dep)?);
                }
            }
        }

        Ok(closure.into_iter().collect())
    }

    /// Reject unknown dependencies, self-dependencies, and dependency cycles.
    ///
    /// A self-loop is a build-time error in the packer; catching it here
    /// keeps the fan-in group from ever being asked to wait on itself.
    fn validate(&self) -> DepotResult<()> {
        for (id, desc) in &self.packs {
            for dep in &desc.dependencies {
                if dep == id {
                    return self.invalid(format!("pack {} depends on itself", id));
                }
                if !self.packs.contains_key(dep) {
                    return self.invalid(format!("pack {} depends on unknown pack {}", id, dep));
                }
            }
        }

        // Cycle detection over the whole graph, DFS with an on-stack marker
        let mut visited: HashMap<&str, bool> = HashMap::new(); // false = on stack
        for id in self.packs.keys() {
            if !visited.contains_key(id.as_str()) {
                if let Some(cycle_at) = self.find_cycle(id, &mut visited) {
                    return self.invalid(format!("dependency cycle involving pack {}", cycle_at));
                }
            }
        }

        Ok(())
    }

    fn find_cycle<'a>(
        &'a self,
        id: &'a str,
        visited: &mut HashMap<&'a str, bool>,
    ) -> Option<&'a str> {
        visited.insert(id, false);
        let desc = &self.packs[id];
        for dep in &desc.dependencies {
            match visited.get(dep.as_str()) {
                Some(false) => return Some(dep),
                Some(true) => {}
                None => {
                    if let Some(found) = self.find_cycle(dep, visited) {
                        return Some(found);
                    }
                }
            }
        }
        visited.insert(id, true);
        None
    }

    fn invalid(&self, reason: String) -> DepotResult<()> {
        Err(DepotError::ManifestInvalid {
            path: self.origin.clone(),
            reason,
        })
    }
}

/// Validate that a pack id is safe to join against a source root.
fn validate_pack_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("pack id cannot be empty".to_string());
    }
    if id.contains("..") || id.contains('\\') || id.contains('\0') || id.starts_with('/') {
        return Err(format!(
            "invalid pack id '{}': must be a relative path without '..'",
            id
        ));
    }
    Ok(())
}
