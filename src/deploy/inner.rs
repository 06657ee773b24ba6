//! Default inner bootstrap: builds a [`WebApp`] from the deployment
//! environment, applies the descriptor and annotation scan, and runs the
//! lifecycle. Every error crosses the boundary as a plain string.

use super::{keys, DeployEnv, InnerBootstrap};
use crate::app::{AppInitializer, InstanceFactory, ServletDef, StaticResourceServlet, WebApp};
use crate::bootstrap::{scanner, WebDescriptor};
use crate::lifecycle;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Name the default bootstrap registers under.
pub const DEFAULT_BOOTSTRAP: &str = "caribe.web";

/// A [`BootstrapRegistry`](super::BootstrapRegistry) with [`WebAppBootstrap`]
/// bound to [`DEFAULT_BOOTSTRAP`].
pub fn default_registry() -> super::BootstrapRegistry {
    let registry = super::BootstrapRegistry::new();
    registry.register(DEFAULT_BOOTSTRAP, |env| Box::new(WebAppBootstrap::new(env)));
    registry
}

pub struct WebAppBootstrap {
    env: DeployEnv,
    factory: Option<Arc<dyn InstanceFactory>>,
    initializers: Vec<Arc<dyn AppInitializer>>,
    app: Option<Arc<WebApp>>,
}

impl WebAppBootstrap {
    pub fn new(env: DeployEnv) -> Self {
        Self {
            env,
            factory: None,
            initializers: Vec::new(),
            app: None,
        }
    }

    /// Instance factory used for class-name registrations. Without one, only
    /// instance registrations and the built-in default servlet resolve.
    pub fn with_factory(mut self, factory: Arc<dyn InstanceFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Programmatic initializer run inside the startup registration window.
    pub fn with_initializer(mut self, initializer: Arc<dyn AppInitializer>) -> Self {
        self.initializers.push(initializer);
        self
    }

    fn build_app(&self, config: &HashMap<String, String>) -> Result<Arc<WebApp>, String> {
        let context_root = config
            .get(keys::CONTEXT_ROOT)
            .cloned()
            .unwrap_or_else(|| self.env.context_root.clone());
        let app = WebApp::new(&context_root).map_err(|e| e.to_string())?;

        if let Some(factory) = &self.factory {
            app.set_instance_factory(Arc::clone(factory))
                .map_err(|e| e.to_string())?;
        }
        app.set_class_space(Arc::clone(&self.env.class_space));
        app.set_annotation_index(Arc::clone(&self.env.index));
        if let Some(ms) = config.get(keys::ASYNC_TIMEOUT_MS) {
            let ms: u64 = ms
                .parse()
                .map_err(|_| format!("invalid {}: {ms:?}", keys::ASYNC_TIMEOUT_MS))?;
            app.set_async_timeout(Duration::from_millis(ms));
        }

        // The default servlet goes in first so the descriptor or a scanned
        // registration can replace it.
        app.add_servlet(ServletDef::of_instance(
            "default",
            Arc::new(StaticResourceServlet::new(self.env.resources.clone())),
        ))
        .map_err(|e| e.to_string())?;
        app.add_servlet_mapping("/", "default")
            .map_err(|e| e.to_string())?;

        match WebDescriptor::load(&self.env.resources) {
            Ok(Some(descriptor)) => {
                descriptor.apply(&app).map_err(|e| e.to_string())?;
            }
            Ok(None) => debug!(context_root = %context_root, "No deployment descriptor"),
            Err(err) => return Err(err.to_string()),
        }
        scanner::apply(&self.env.index, &app).map_err(|e| e.to_string())?;

        for initializer in &self.initializers {
            app.add_initializer(Arc::clone(initializer))
                .map_err(|e| e.to_string())?;
        }

        Ok(Arc::new(app))
    }
}

impl InnerBootstrap for WebAppBootstrap {
    fn start(
        &mut self,
        config: &HashMap<String, String>,
    ) -> Result<HashMap<String, String>, String> {
        if self.app.is_some() {
            return Err("bootstrap already started".to_string());
        }
        let app = self.build_app(config)?;
        lifecycle::start(&app).map_err(|e| e.to_string())?;

        let names: Vec<String> = app
            .servlet_registrations()
            .iter()
            .map(|r| r.name().to_string())
            .collect();

        let mut out = HashMap::new();
        out.insert(keys::SERVLET_NAMES.to_string(), names.join(","));
        out.insert(
            keys::CONTEXT_ROOT.to_string(),
            app.context_path().to_string(),
        );
        self.app = Some(app);
        Ok(out)
    }

    fn stop(&mut self) {
        if let Some(app) = self.app.take() {
            if let Err(err) = lifecycle::stop(&app) {
                warn!(context_path = %app.context_path(), error = %err, "Shutdown did not complete cleanly");
            }
        }
    }

    fn web_app(&self) -> Option<Arc<WebApp>> {
        self.app.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppState;
    use crate::index::AnnotationIndex;
    use crate::loader::ClassSpace;
    use crate::resource::{MemoryResources, ResourceManager};

    fn env_with(resources: ResourceManager) -> DeployEnv {
        DeployEnv {
            context_root: "/demo".to_string(),
            class_space: Arc::new(ClassSpace::root("test", resources.clone())),
            index: Arc::new(AnnotationIndex::default()),
            resources,
        }
    }

    #[test]
    fn start_reports_servlet_names_and_context_root() {
        let mut mem = MemoryResources::new();
        mem.insert(
            "WEB-INF/web.yaml",
            b"servlets:\n  - name: hello\n    class-name: com.x.Hello\n".to_vec(),
        );
        let mut rm = ResourceManager::new();
        rm.add(Arc::new(mem));

        let mut bootstrap = WebAppBootstrap::new(env_with(rm));
        let out = bootstrap.start(&HashMap::new()).unwrap();

        assert_eq!(out[keys::CONTEXT_ROOT], "/demo");
        let names = &out[keys::SERVLET_NAMES];
        assert!(names.contains("default"));
        assert!(names.contains("hello"));
        assert_eq!(
            bootstrap.web_app().unwrap().state(),
            AppState::Running
        );
    }

    #[test]
    fn double_start_is_rejected_and_stop_is_idempotent() {
        let mut bootstrap = WebAppBootstrap::new(env_with(ResourceManager::new()));
        bootstrap.start(&HashMap::new()).unwrap();
        assert!(bootstrap.start(&HashMap::new()).is_err());

        let app = bootstrap.web_app().unwrap();
        bootstrap.stop();
        assert_eq!(app.state(), AppState::Stopped);
        assert!(bootstrap.web_app().is_none());
        bootstrap.stop();
    }

    #[test]
    fn config_context_root_overrides_the_default() {
        let mut bootstrap = WebAppBootstrap::new(env_with(ResourceManager::new()));
        let mut config = HashMap::new();
        config.insert(keys::CONTEXT_ROOT.to_string(), "/other".to_string());
        let out = bootstrap.start(&config).unwrap();
        assert_eq!(out[keys::CONTEXT_ROOT], "/other");
    }
}
