use super::{normalize, ResourceError, ResourceSet};
use std::collections::BTreeMap;

/// An in-memory resource overlay, used for synthesized entries such as the
/// serialized annotation index attached to a deployable unit.
#[derive(Debug, Default, Clone)]
pub struct MemoryResources {
    entries: BTreeMap<String, Vec<u8>>,
}

impl MemoryResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, bytes: Vec<u8>) {
        self.entries.insert(normalize(path).to_string(), bytes);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ResourceSet for MemoryResources {
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>, ResourceError> {
        Ok(self.entries.get(normalize(path)).cloned())
    }

    fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(normalize(path))
    }

    fn paths(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}
