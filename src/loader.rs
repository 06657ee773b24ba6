//! Isolating loader tiers.
//!
//! A [`ClassSpace`] resolves class bytes and resources exclusively from its
//! attached [`ResourceManager`]. It has at most one explicit parent tier,
//! consulted only for binary names under a fixed allow-list of shared
//! prefixes. Two tiers are built per deployment: a runtime tier holding
//! resolved dependencies and an application tier holding the archive's own
//! classes, so application code can neither see nor shadow runtime internals.
//!
//! Loaded entries are cached for the life of the space with define-once
//! semantics: concurrent first loads of the same name resolve to a single
//! definition. Dropping the space releases every cached entry.

use crate::classfile::{self, ClassFileError, ClassInfo};
use crate::resource::ResourceManager;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

static NEXT_SPACE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error)]
pub enum LoaderError {
    /// Normal not-found: the tier (and its allow-listed parent) has no such
    /// class. Non-fatal; callers typically fall back or answer 404.
    #[error("class not found: {0}")]
    NotFound(String),
    /// The bytes were found but are not a valid class file. Fatal for the
    /// triggering request, not for the server.
    #[error("malformed class {name}: {source}")]
    Malformed {
        name: String,
        #[source]
        source: ClassFileError,
    },
    #[error("resource error loading {name}: {source}")]
    Resource {
        name: String,
        #[source]
        source: crate::resource::ResourceError,
    },
}

/// A class defined in one [`ClassSpace`]. The defining space id is part of
/// the identity: the same binary name loaded in two spaces yields two
/// distinct definitions.
#[derive(Debug)]
pub struct LoadedClass {
    pub binary_name: String,
    pub info: ClassInfo,
    space_id: u64,
    space_name: String,
}

impl LoadedClass {
    pub fn defining_space_id(&self) -> u64 {
        self.space_id
    }

    pub fn defining_space_name(&self) -> &str {
        &self.space_name
    }

    /// Whether two loaded classes are the same definition (same name *and*
    /// same defining space), the assignability analog across tiers.
    pub fn same_definition(&self, other: &LoadedClass) -> bool {
        self.space_id == other.space_id && self.binary_name == other.binary_name
    }
}

/// One loader tier. See the module docs for the delegation model.
#[derive(Debug)]
pub struct ClassSpace {
    name: String,
    id: u64,
    resources: ResourceManager,
    parent: Option<Arc<ClassSpace>>,
    shared_prefixes: Vec<String>,
    cache: DashMap<String, Arc<LoadedClass>>,
}

impl ClassSpace {
    /// A root tier with no parent; nothing is delegated.
    pub fn root(name: &str, resources: ResourceManager) -> Self {
        Self::with_parent(name, resources, None, Vec::new())
    }

    /// A child tier delegating only `shared_prefixes` (dotted binary-name
    /// prefixes, e.g. `jakarta.servlet.`) to `parent`.
    pub fn with_parent(
        name: &str,
        resources: ResourceManager,
        parent: Option<Arc<ClassSpace>>,
        shared_prefixes: Vec<String>,
    ) -> Self {
        let id = NEXT_SPACE_ID.fetch_add(1, Ordering::Relaxed);
        debug!(space = %name, space_id = id, shared_prefixes = ?shared_prefixes, "Class space created");
        Self {
            name: name.to_string(),
            id,
            resources,
            parent,
            shared_prefixes,
            cache: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn resource_manager(&self) -> &ResourceManager {
        &self.resources
    }

    fn is_shared(&self, binary_name: &str) -> bool {
        self.shared_prefixes
            .iter()
            .any(|p| binary_name.starts_with(p.as_str()))
    }

    /// Resolve a class by dotted binary name.
    ///
    /// Resolution order: allow-listed names delegate to the parent tier;
    /// everything else is defined from this tier's own resources or fails
    /// with [`LoaderError::NotFound`]. Duplicate loads return the cached
    /// definition.
    pub fn load(&self, binary_name: &str) -> Result<Arc<LoadedClass>, LoaderError> {
        if self.is_shared(binary_name) {
            return match &self.parent {
                Some(parent) => parent.load(binary_name),
                None => Err(LoaderError::NotFound(binary_name.to_string())),
            };
        }

        if let Some(cached) = self.cache.get(binary_name) {
            trace!(space = %self.name, class = %binary_name, "Class cache hit");
            return Ok(Arc::clone(cached.value()));
        }

        let path = format!("{}.class", binary_name.replace('.', "/"));
        let bytes = self
            .resources
            .read(&path)
            .map_err(|source| LoaderError::Resource {
                name: binary_name.to_string(),
                source,
            })?
            .ok_or_else(|| LoaderError::NotFound(binary_name.to_string()))?;

        let info = classfile::parse(&bytes).map_err(|source| LoaderError::Malformed {
            name: binary_name.to_string(),
            source,
        })?;

        // Define-once under concurrent first-load: the entry API makes the
        // first writer win and everyone else observe that definition.
        let entry = self
            .cache
            .entry(binary_name.to_string())
            .or_insert_with(|| {
                Arc::new(LoadedClass {
                    binary_name: binary_name.to_string(),
                    info,
                    space_id: self.id,
                    space_name: self.name.clone(),
                })
            });
        Ok(Arc::clone(entry.value()))
    }

    /// First-match resource lookup, following the same delegation boundary
    /// as class resolution: allow-listed paths go to the parent tier.
    pub fn resource(&self, path: &str) -> Option<Vec<u8>> {
        if self.is_shared_path(path) {
            return self.parent.as_ref().and_then(|p| p.resource(path));
        }
        self.resources.read(path).ok().flatten()
    }

    /// All-matches resource lookup across this tier's layered resources.
    /// Used for merged overlays (`META-INF/resources`), where every layer's
    /// entry matters, not just the first.
    pub fn resources(&self, path: &str) -> Vec<Vec<u8>> {
        if self.is_shared_path(path) {
            return self
                .parent
                .as_ref()
                .map(|p| p.resources(path))
                .unwrap_or_default();
        }
        self.resources.read_all(path).unwrap_or_default()
    }

    fn is_shared_path(&self, path: &str) -> bool {
        let dotted = path
            .trim_start_matches('/')
            .trim_end_matches(".class")
            .replace('/', ".");
        self.is_shared(&dotted)
    }

    /// Number of classes currently defined in this tier.
    pub fn defined_count(&self) -> usize {
        self.cache.len()
    }
}

impl Drop for ClassSpace {
    fn drop(&mut self) {
        debug!(space = %self.name, space_id = self.id, defined = self.cache.len(), "Class space released");
        self.cache.clear();
    }
}
