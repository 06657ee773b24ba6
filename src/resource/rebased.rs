use super::{normalize, ResourceError, ResourceSet};
use std::sync::Arc;

/// View of another set under a path prefix, so archive layouts that nest
/// classes (e.g. `WEB-INF/classes/`) can serve them at the logical root.
#[derive(Debug)]
pub struct RebasedResources {
    prefix: String,
    inner: Arc<dyn ResourceSet>,
}

impl RebasedResources {
    /// `prefix` is the directory inside `inner` that becomes this set's
    /// root. A trailing slash is added when missing.
    pub fn new(prefix: &str, inner: Arc<dyn ResourceSet>) -> Self {
        let mut prefix = normalize(prefix).to_string();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        Self { prefix, inner }
    }

    fn rebase(&self, path: &str) -> String {
        format!("{}{}", self.prefix, normalize(path))
    }
}

impl ResourceSet for RebasedResources {
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>, ResourceError> {
        self.inner.read(&self.rebase(path))
    }

    fn contains(&self, path: &str) -> bool {
        self.inner.contains(&self.rebase(path))
    }

    fn paths(&self) -> Vec<String> {
        self.inner
            .paths()
            .into_iter()
            .filter_map(|p| p.strip_prefix(&self.prefix).map(String::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::MemoryResources;

    #[test]
    fn serves_nested_entries_at_the_root() {
        let mut mem = MemoryResources::new();
        mem.insert("WEB-INF/classes/com/x/A.class", vec![1]);
        mem.insert("index.html", vec![2]);
        let rebased = RebasedResources::new("WEB-INF/classes", Arc::new(mem));

        assert_eq!(rebased.read("com/x/A.class").unwrap(), Some(vec![1]));
        assert!(rebased.contains("com/x/A.class"));
        assert!(!rebased.contains("index.html"));
        assert_eq!(rebased.paths(), vec!["com/x/A.class".to_string()]);
    }
}
