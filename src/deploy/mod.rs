//! The outer deployer.
//!
//! [`MicroDeployer`] turns an application archive into a running deployment:
//! it resolves the configured runtime dependencies, builds the two loader
//! tiers (runtime parent, application child with an allow-list boundary),
//! builds or loads the annotation index, and then starts an inner bootstrap
//! obtained by name from the [`BootstrapRegistry`]. Configuration crosses
//! the outer/inner boundary as a plain string map in both directions, so the
//! outer side never depends on application-tier types.

mod inner;
pub mod resolver;

pub use inner::{default_registry, WebAppBootstrap, DEFAULT_BOOTSTRAP};
pub use resolver::{
    Dependency, DependencyResolver, DirFetcher, Fetcher, HttpFetcher, ResolveError,
};

use crate::app::WebApp;
use crate::index::{AnnotationIndex, IndexBuilder, IndexError, INDEX_RESOURCE};
use crate::loader::ClassSpace;
use crate::resource::{
    ArchiveResources, RebasedResources, ResourceError, ResourceManager, ResourceSet,
};
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{info, warn};

/// Config keys crossing the outer/inner boundary.
pub mod keys {
    /// Context path the application mounts at. In on deploy, out on start.
    pub const CONTEXT_ROOT: &str = "caribe.context_root";
    /// Async hand-off timeout override, milliseconds.
    pub const ASYNC_TIMEOUT_MS: &str = "caribe.async_timeout_ms";
    /// Comma-joined servlet names, reported back by the inner bootstrap.
    pub const SERVLET_NAMES: &str = "caribe.servlet_names";
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("archive {path}: {source}")]
    Archive {
        path: String,
        #[source]
        source: ResourceError,
    },
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("no bootstrap registered under {0:?}")]
    UnknownBootstrap(String),
    #[error("inner bootstrap failed: {0}")]
    Boundary(String),
}

/// Everything the outer deployer built for one deployment, handed to the
/// inner bootstrap at construction.
#[derive(Debug, Clone)]
pub struct DeployEnv {
    /// Default context root derived from the archive name.
    pub context_root: String,
    /// The application tier's layered resources.
    pub resources: ResourceManager,
    /// The application-tier class space (child of the runtime tier).
    pub class_space: Arc<ClassSpace>,
    /// The deployment's annotation index.
    pub index: Arc<AnnotationIndex>,
}

/// Inner side of the deployment boundary.
///
/// `start` and `stop` exchange plain string maps only. `web_app` exposes the
/// running application through the shared runtime surface so the host can
/// route requests to it.
pub trait InnerBootstrap: Send {
    fn start(
        &mut self,
        config: &HashMap<String, String>,
    ) -> Result<HashMap<String, String>, String>;

    /// Tear down. Must be safe to call repeatedly and after a failed or
    /// never-attempted `start`.
    fn stop(&mut self);

    fn web_app(&self) -> Option<Arc<WebApp>>;
}

type BootstrapCtor = Box<dyn Fn(DeployEnv) -> Box<dyn InnerBootstrap> + Send + Sync>;

/// Process-wide, injected name-to-bootstrap bindings. Owned by whoever runs
/// deployments and passed down through construction, never a global.
#[derive(Default)]
pub struct BootstrapRegistry {
    ctors: DashMap<String, BootstrapCtor>,
}

impl BootstrapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, name: &str, ctor: F)
    where
        F: Fn(DeployEnv) -> Box<dyn InnerBootstrap> + Send + Sync + 'static,
    {
        self.ctors.insert(name.to_string(), Box::new(ctor));
    }

    pub fn create(&self, name: &str, env: DeployEnv) -> Option<Box<dyn InnerBootstrap>> {
        self.ctors.get(name).map(|ctor| ctor(env))
    }
}

impl fmt::Debug for BootstrapRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapRegistry")
            .field("bootstraps", &self.ctors.len())
            .finish()
    }
}

/// Handle over a started deployment.
pub struct DeployHandle {
    bootstrap: Mutex<Box<dyn InnerBootstrap>>,
}

impl DeployHandle {
    fn new(bootstrap: Box<dyn InnerBootstrap>) -> Self {
        Self {
            bootstrap: Mutex::new(bootstrap),
        }
    }

    /// Stop the deployment. Idempotent.
    pub fn stop(&self) {
        self.bootstrap.lock().unwrap().stop();
    }

    pub fn web_app(&self) -> Option<Arc<WebApp>> {
        self.bootstrap.lock().unwrap().web_app()
    }
}

impl fmt::Debug for DeployHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeployHandle")
    }
}

#[derive(Debug)]
pub struct DeployOutcome {
    pub servlet_names: Vec<String>,
    pub context_root: String,
    pub handle: DeployHandle,
}

/// The outer deployer. One instance may run many deployments; each gets its
/// own loader tiers and index.
pub struct MicroDeployer {
    resolver: DependencyResolver,
    registry: Arc<BootstrapRegistry>,
    dependencies: Vec<Dependency>,
    shared_prefixes: Vec<String>,
    bootstrap_name: String,
}

impl fmt::Debug for MicroDeployer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicroDeployer")
            .field("dependencies", &self.dependencies)
            .field("shared_prefixes", &self.shared_prefixes)
            .field("bootstrap_name", &self.bootstrap_name)
            .finish()
    }
}

impl MicroDeployer {
    pub fn new(resolver: DependencyResolver, registry: Arc<BootstrapRegistry>) -> Self {
        Self {
            resolver,
            registry,
            dependencies: Vec::new(),
            shared_prefixes: vec!["jakarta.".to_string()],
            bootstrap_name: DEFAULT_BOOTSTRAP.to_string(),
        }
    }

    /// Runtime dependencies resolved before any deployment code loads.
    pub fn with_dependencies(mut self, dependencies: Vec<Dependency>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Dotted binary-name prefixes the application tier delegates upward.
    pub fn with_shared_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.shared_prefixes = prefixes;
        self
    }

    pub fn with_bootstrap(mut self, name: &str) -> Self {
        self.bootstrap_name = name.to_string();
        self
    }

    /// Deploy an archive and start it. A failure is fatal to this deployment
    /// only; the deployer and its registry remain usable.
    pub fn deploy(
        &self,
        archive: &Path,
        mut config: HashMap<String, String>,
    ) -> Result<DeployOutcome, DeployError> {
        let archive_name = archive.display().to_string();
        let jars = self.resolver.resolve_all(&self.dependencies)?;

        let mut runtime_resources = ResourceManager::new();
        for jar in &jars {
            let set = ArchiveResources::open(jar).map_err(|source| DeployError::Archive {
                path: jar.display().to_string(),
                source,
            })?;
            runtime_resources.add(Arc::new(set));
        }
        let runtime = Arc::new(ClassSpace::root("runtime", runtime_resources));

        let archive_set: Arc<ArchiveResources> = Arc::new(
            ArchiveResources::open(archive).map_err(|source| DeployError::Archive {
                path: archive_name.clone(),
                source,
            })?,
        );
        let classes: Arc<dyn ResourceSet> = Arc::new(RebasedResources::new(
            "WEB-INF/classes",
            Arc::clone(&archive_set) as Arc<dyn ResourceSet>,
        ));
        let mut lib_sets: Vec<Arc<dyn ResourceSet>> = Vec::new();
        for path in archive_set.paths() {
            if path.starts_with("WEB-INF/lib/") && path.ends_with(".jar") {
                let bytes = archive_set
                    .read(&path)
                    .map_err(|source| DeployError::Archive {
                        path: archive_name.clone(),
                        source,
                    })?
                    .unwrap_or_default();
                match ArchiveResources::from_bytes(path.clone(), bytes) {
                    Ok(set) => lib_sets.push(Arc::new(set)),
                    Err(err) => {
                        warn!(archive = %archive_name, jar = %path, error = %err, "Skipping unreadable library jar");
                    }
                }
            }
        }

        // Application classes shadow library classes for loading.
        let mut app_resources = ResourceManager::new();
        app_resources.add(Arc::clone(&classes));
        for lib in &lib_sets {
            app_resources.add(Arc::clone(lib));
        }
        app_resources.add(Arc::clone(&archive_set) as Arc<dyn ResourceSet>);

        let index = self.build_index(&app_resources, &lib_sets, &classes)?;

        let context_root = config
            .get(keys::CONTEXT_ROOT)
            .cloned()
            .unwrap_or_else(|| default_context_root(archive));
        config.insert(keys::CONTEXT_ROOT.to_string(), context_root.clone());

        let class_space = Arc::new(ClassSpace::with_parent(
            &format!("app:{archive_name}"),
            app_resources.clone(),
            Some(runtime),
            self.shared_prefixes.clone(),
        ));

        let env = DeployEnv {
            context_root: context_root.clone(),
            resources: app_resources,
            class_space,
            index: Arc::new(index),
        };
        let mut bootstrap = self
            .registry
            .create(&self.bootstrap_name, env)
            .ok_or_else(|| DeployError::UnknownBootstrap(self.bootstrap_name.clone()))?;

        let out = match bootstrap.start(&config) {
            Ok(out) => out,
            Err(message) => {
                // Partial initialization is cleaned up by the inner side.
                bootstrap.stop();
                return Err(DeployError::Boundary(message));
            }
        };

        let servlet_names: Vec<String> = out
            .get(keys::SERVLET_NAMES)
            .map(|joined| {
                joined
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        let context_root = out
            .get(keys::CONTEXT_ROOT)
            .cloned()
            .unwrap_or(context_root);

        info!(
            archive = %archive_name,
            context_root = %context_root,
            servlets = servlet_names.len(),
            "Deployment started"
        );
        Ok(DeployOutcome {
            servlet_names,
            context_root,
            handle: DeployHandle::new(bootstrap),
        })
    }

    /// Prefer a prebuilt index shipped in the archive; otherwise scan class
    /// bytes, libraries first so application classes win.
    fn build_index(
        &self,
        app_resources: &ResourceManager,
        lib_sets: &[Arc<dyn ResourceSet>],
        classes: &Arc<dyn ResourceSet>,
    ) -> Result<AnnotationIndex, DeployError> {
        if app_resources.contains(INDEX_RESOURCE) {
            return Ok(AnnotationIndex::from_resources(app_resources)?);
        }
        let mut builder = IndexBuilder::new();
        for lib in lib_sets {
            builder.add_set(lib.as_ref());
        }
        builder.add_set(classes.as_ref());
        if builder.skipped() > 0 {
            warn!(skipped = builder.skipped(), "Some class files were skipped during indexing");
        }
        Ok(builder.build())
    }
}

/// `shop.war` deploys at `/shop`; the conventional `ROOT` archive mounts at
/// the root context.
fn default_context_root(archive: &Path) -> String {
    let stem = archive
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    if stem.is_empty() || stem.eq_ignore_ascii_case("root") {
        String::new()
    } else {
        format!("/{stem}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn war_with(entries: &[(&str, &[u8])]) -> tempfile::NamedTempFile {
        let file = tempfile::Builder::new().suffix(".war").tempfile().unwrap();
        let mut writer = zip::ZipWriter::new(file.reopen().unwrap());
        for (path, bytes) in entries {
            writer
                .start_file(*path, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap();
        file
    }

    fn offline_deployer(registry: Arc<BootstrapRegistry>) -> MicroDeployer {
        let cache = tempfile::tempdir().unwrap();
        let resolver = DependencyResolver::new(
            cache.keep(),
            Vec::new(),
            true,
            Arc::new(DirFetcher::new("/nonexistent")),
        );
        MicroDeployer::new(resolver, registry)
    }

    #[test]
    fn deploys_a_static_archive_end_to_end() {
        let war = war_with(&[("index.html", b"<h1>hi</h1>")]);
        let deployer = offline_deployer(Arc::new(default_registry()));

        let outcome = deployer.deploy(war.path(), HashMap::new()).unwrap();
        assert!(outcome.servlet_names.contains(&"default".to_string()));

        let app = outcome.handle.web_app().unwrap();
        assert_eq!(app.state(), crate::app::AppState::Running);

        outcome.handle.stop();
        assert_eq!(app.state(), crate::app::AppState::Stopped);
        // Stop twice is harmless.
        outcome.handle.stop();
    }

    #[test]
    fn context_root_defaults_from_the_archive_name() {
        assert_eq!(default_context_root(Path::new("/tmp/shop.war")), "/shop");
        assert_eq!(default_context_root(Path::new("ROOT.war")), "");
    }

    #[test]
    fn unknown_bootstrap_name_fails_the_deployment() {
        let war = war_with(&[("index.html", b"x")]);
        let deployer =
            offline_deployer(Arc::new(BootstrapRegistry::new())).with_bootstrap("ghost");
        assert!(matches!(
            deployer.deploy(war.path(), HashMap::new()),
            Err(DeployError::UnknownBootstrap(_))
        ));
    }

    #[test]
    fn missing_runtime_dependency_fails_fast_offline() {
        let war = war_with(&[("index.html", b"x")]);
        let deployer = offline_deployer(Arc::new(default_registry())).with_dependencies(vec![
            Dependency::new("com.example", "runtime", "1.0.0"),
        ]);
        assert!(matches!(
            deployer.deploy(war.path(), HashMap::new()),
            Err(DeployError::Resolve(ResolveError::OfflineMiss(_)))
        ));
    }
}
