//! Archive and resource abstraction.
//!
//! Every deployed application reads its classes and static resources through a
//! [`ResourceManager`]: an ordered list of [`ResourceSet`] layers (exploded
//! directory, zip archive, in-memory overlay). Lookup is first-match by layer
//! order for single resources, with an all-matches mode used for merged
//! resource overlays.

mod archive;
mod directory;
mod memory;
mod rebased;

pub use archive::ArchiveResources;
pub use directory::DirectoryResources;
pub use memory::MemoryResources;
pub use rebased::RebasedResources;

use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;

/// Error raised while reading resource bytes.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("i/o error reading resource: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive error: {0}")]
    Archive(String),
}

/// Normalize a logical resource path: forward slashes, no leading slash.
pub(crate) fn normalize(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// A read-only, ordered set of byte resources addressed by logical path
/// (e.g. `WEB-INF/classes/com/x/Y.class`).
pub trait ResourceSet: Send + Sync + Debug {
    /// Read the bytes at `path`, or `None` if this set has no such entry.
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>, ResourceError>;

    /// Whether this set contains an entry at `path`.
    fn contains(&self, path: &str) -> bool;

    /// Enumerate every logical path in this set, in a stable order.
    fn paths(&self) -> Vec<String>;
}

/// An ordered collection of [`ResourceSet`] layers owned by one loader tier.
///
/// Earlier layers win for single-resource lookup; [`ResourceManager::read_all`]
/// returns every layer's match in order, which callers use for merged
/// `META-INF/resources` style overlays.
#[derive(Debug, Default, Clone)]
pub struct ResourceManager {
    sets: Vec<Arc<dyn ResourceSet>>,
}

impl ResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer. Later layers are shadowed by earlier ones.
    pub fn add(&mut self, set: Arc<dyn ResourceSet>) {
        self.sets.push(set);
    }

    /// Prepend a layer so it shadows everything already present.
    pub fn add_overriding(&mut self, set: Arc<dyn ResourceSet>) {
        self.sets.insert(0, set);
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// First-match lookup across layers.
    pub fn read(&self, path: &str) -> Result<Option<Vec<u8>>, ResourceError> {
        let path = normalize(path);
        for set in &self.sets {
            if let Some(bytes) = set.read(path)? {
                return Ok(Some(bytes));
            }
        }
        Ok(None)
    }

    /// All-matches lookup across layers, in layer order.
    pub fn read_all(&self, path: &str) -> Result<Vec<Vec<u8>>, ResourceError> {
        let path = normalize(path);
        let mut out = Vec::new();
        for set in &self.sets {
            if let Some(bytes) = set.read(path)? {
                out.push(bytes);
            }
        }
        Ok(out)
    }

    pub fn contains(&self, path: &str) -> bool {
        let path = normalize(path);
        self.sets.iter().any(|s| s.contains(path))
    }

    /// Every logical path across all layers, in layer order, duplicates kept.
    pub fn paths(&self) -> Vec<String> {
        self.sets.iter().flat_map(|s| s.paths()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_match_wins_across_layers() {
        let mut a = MemoryResources::new();
        a.insert("x.txt", b"layer-a".to_vec());
        let mut b = MemoryResources::new();
        b.insert("x.txt", b"layer-b".to_vec());
        b.insert("only-b.txt", b"b".to_vec());

        let mut rm = ResourceManager::new();
        rm.add(Arc::new(a));
        rm.add(Arc::new(b));

        assert_eq!(rm.read("/x.txt").unwrap().unwrap(), b"layer-a");
        assert_eq!(rm.read("only-b.txt").unwrap().unwrap(), b"b");
        assert!(rm.read("missing").unwrap().is_none());
    }

    #[test]
    fn read_all_returns_every_layer_match_in_order() {
        let mut a = MemoryResources::new();
        a.insert("merged/item", b"a".to_vec());
        let mut b = MemoryResources::new();
        b.insert("merged/item", b"b".to_vec());

        let mut rm = ResourceManager::new();
        rm.add(Arc::new(a));
        rm.add(Arc::new(b));

        let all = rm.read_all("merged/item").unwrap();
        assert_eq!(all, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn overriding_layer_shadows_existing() {
        let mut base = MemoryResources::new();
        base.insert("x", b"base".to_vec());
        let mut over = MemoryResources::new();
        over.insert("x", b"override".to_vec());

        let mut rm = ResourceManager::new();
        rm.add(Arc::new(base));
        rm.add_overriding(Arc::new(over));
        assert_eq!(rm.read("x").unwrap().unwrap(), b"override");
    }
}
