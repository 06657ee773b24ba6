use super::{Filter, HttpServlet, LifecycleListener, ServletError};
use dashmap::DashMap;
use std::sync::Arc;

type ServletCtor = Box<dyn Fn() -> Arc<dyn HttpServlet> + Send + Sync>;
type FilterCtor = Box<dyn Fn() -> Arc<dyn Filter> + Send + Sync>;
type ListenerCtor = Box<dyn Fn() -> Arc<dyn LifecycleListener> + Send + Sync>;

/// Resolves dotted class names from descriptors and annotation scans into
/// live trait objects. Registrations made by class name go through the
/// application's factory at instantiation time.
pub trait InstanceFactory: Send + Sync {
    fn servlet(&self, class_name: &str) -> Result<Arc<dyn HttpServlet>, ServletError>;

    fn filter(&self, class_name: &str) -> Result<Arc<dyn Filter>, ServletError>;

    fn lifecycle_listener(&self, class_name: &str)
        -> Result<Arc<dyn LifecycleListener>, ServletError>;
}

fn unknown(class_name: &str) -> ServletError {
    ServletError::new(
        "caribe.factory.UnknownClass",
        format!("no binding for class {class_name}"),
    )
    .with_status(500)
}

/// The default factory: every class name is unknown. Applications that only
/// register instances never need anything else.
#[derive(Debug, Default)]
pub struct NullInstanceFactory;

impl InstanceFactory for NullInstanceFactory {
    fn servlet(&self, class_name: &str) -> Result<Arc<dyn HttpServlet>, ServletError> {
        Err(unknown(class_name))
    }

    fn filter(&self, class_name: &str) -> Result<Arc<dyn Filter>, ServletError> {
        Err(unknown(class_name))
    }

    fn lifecycle_listener(
        &self,
        class_name: &str,
    ) -> Result<Arc<dyn LifecycleListener>, ServletError> {
        Err(unknown(class_name))
    }
}

/// Class-name to constructor bindings, populated by the embedder before
/// descriptor or annotation registration runs.
#[derive(Default)]
pub struct RegistryInstanceFactory {
    servlets: DashMap<String, ServletCtor>,
    filters: DashMap<String, FilterCtor>,
    listeners: DashMap<String, ListenerCtor>,
}

impl RegistryInstanceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_servlet<F>(&self, class_name: &str, ctor: F)
    where
        F: Fn() -> Arc<dyn HttpServlet> + Send + Sync + 'static,
    {
        self.servlets.insert(class_name.to_string(), Box::new(ctor));
    }

    pub fn bind_filter<F>(&self, class_name: &str, ctor: F)
    where
        F: Fn() -> Arc<dyn Filter> + Send + Sync + 'static,
    {
        self.filters.insert(class_name.to_string(), Box::new(ctor));
    }

    pub fn bind_listener<F>(&self, class_name: &str, ctor: F)
    where
        F: Fn() -> Arc<dyn LifecycleListener> + Send + Sync + 'static,
    {
        self.listeners.insert(class_name.to_string(), Box::new(ctor));
    }
}

impl std::fmt::Debug for RegistryInstanceFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryInstanceFactory")
            .field("servlets", &self.servlets.len())
            .field("filters", &self.filters.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl InstanceFactory for RegistryInstanceFactory {
    fn servlet(&self, class_name: &str) -> Result<Arc<dyn HttpServlet>, ServletError> {
        self.servlets
            .get(class_name)
            .map(|ctor| ctor())
            .ok_or_else(|| unknown(class_name))
    }

    fn filter(&self, class_name: &str) -> Result<Arc<dyn Filter>, ServletError> {
        self.filters
            .get(class_name)
            .map(|ctor| ctor())
            .ok_or_else(|| unknown(class_name))
    }

    fn lifecycle_listener(
        &self,
        class_name: &str,
    ) -> Result<Arc<dyn LifecycleListener>, ServletError> {
        self.listeners
            .get(class_name)
            .map(|ctor| ctor())
            .ok_or_else(|| unknown(class_name))
    }
}
