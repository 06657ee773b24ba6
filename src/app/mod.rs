//! The web application model.
//!
//! A [`WebApp`] is the unit of deployment: a context path, registries of
//! servlets, filters, mappings, error pages and listeners, an attribute map,
//! and pluggable managers. Registrations mutate freely before startup; once
//! the lifecycle coordinator moves the application to `Running` the routing
//! table is frozen into an immutable snapshot and further registration
//! attempts fail fast.

mod error;
mod factory;
mod listeners;
mod registration;
mod servlet;
mod static_files;

pub use error::{AppError, ServletError};
pub use factory::{InstanceFactory, NullInstanceFactory, RegistryInstanceFactory};
pub use listeners::{AttributeEvent, AttributeListener, LifecycleListener, RequestListener};
pub use registration::{
    FilterDef, FilterRegistration, FilterTarget, ServletDef, ServletRegistration, ServletTarget,
    DEFAULT_FILTER_PRIORITY,
};
pub use servlet::{Filter, FilterConfig, HttpServlet, ServletConfig};
pub use static_files::StaticResourceServlet;

use crate::dispatch::routing::{RoutingTable, UrlPattern};
use crate::index::AnnotationIndex;
use crate::loader::ClassSpace;
use crate::managers::{
    FormMultipartManager, InMemoryNamingManager, InMemorySessionManager, MultipartManager,
    NamingManager, NoopSecurityManager, SecurityManager, SessionManager,
};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{info, warn};

/// Lifecycle states of a [`WebApp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Created,
    Initializing,
    Running,
    Stopping,
    Stopped,
    /// Startup aborted partway; the application never served a request.
    Failed,
}

/// The manager set consulted during dispatch. Swapped atomically as a whole
/// so a request observes one consistent set.
#[derive(Clone)]
pub struct Managers {
    pub security: Arc<dyn SecurityManager>,
    pub session: Arc<dyn SessionManager>,
    pub naming: Arc<dyn NamingManager>,
    pub multipart: Arc<dyn MultipartManager>,
}

impl Default for Managers {
    fn default() -> Self {
        Self {
            security: Arc::new(NoopSecurityManager),
            session: Arc::new(InMemorySessionManager::new()),
            naming: Arc::new(InMemoryNamingManager::new()),
            multipart: Arc::new(FormMultipartManager::new()),
        }
    }
}

impl fmt::Debug for Managers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Managers { .. }")
    }
}

/// Where a filter applies.
#[derive(Debug, Clone)]
pub enum FilterScope {
    Pattern(UrlPattern),
    Servlet(String),
}

/// One filter-to-scope binding.
#[derive(Debug, Clone)]
pub struct FilterMapping {
    pub filter_name: String,
    pub scope: FilterScope,
}

/// Error page matching: by error kind first, then by status.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ErrorMatcher {
    Status(u16),
    Kind(String),
}

#[derive(Debug, Clone)]
struct ErrorPage {
    matcher: ErrorMatcher,
    location: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InitKind {
    Filter,
    Servlet,
}

/// Startup log used to destroy components in reverse init order.
#[derive(Debug, Clone)]
pub(crate) struct InitRecord {
    pub kind: InitKind,
    pub name: String,
}

/// Hook run at the very start of application startup, before listeners.
/// The registration window is still open, so initializers may add servlets,
/// filters and listeners programmatically.
pub trait AppInitializer: Send + Sync {
    fn on_startup(&self, app: &WebApp) -> Result<(), ServletError>;
}

pub struct WebApp {
    context_path: String,
    state: RwLock<AppState>,
    attributes: DashMap<String, Value>,
    init_params: RwLock<HashMap<String, String>>,
    servlets: RwLock<Vec<Arc<ServletRegistration>>>,
    filters: RwLock<Vec<Arc<FilterRegistration>>>,
    servlet_mappings: RwLock<Vec<(UrlPattern, String)>>,
    filter_mappings: RwLock<Vec<FilterMapping>>,
    error_pages: RwLock<Vec<ErrorPage>>,
    lifecycle_listeners: RwLock<Vec<Arc<dyn LifecycleListener>>>,
    request_listeners: RwLock<Vec<Arc<dyn RequestListener>>>,
    attribute_listeners: RwLock<Vec<Arc<dyn AttributeListener>>>,
    initializers: RwLock<Vec<Arc<dyn AppInitializer>>>,
    factory: RwLock<Arc<dyn InstanceFactory>>,
    managers: ArcSwap<Managers>,
    routing: ArcSwap<RoutingTable>,
    class_space: RwLock<Option<Arc<ClassSpace>>>,
    annotation_index: RwLock<Option<Arc<AnnotationIndex>>>,
    async_timeout: RwLock<Duration>,
    next_order: AtomicUsize,
    pub(crate) init_log: Mutex<Vec<InitRecord>>,
}

impl WebApp {
    /// An application mounted at `context_path`. Valid paths are `""` (the
    /// root mount) or `/`-prefixed without a trailing slash.
    pub fn new(context_path: &str) -> Result<Self, AppError> {
        let valid = context_path.is_empty()
            || (context_path.starts_with('/') && !context_path.ends_with('/'));
        if !valid {
            return Err(AppError::InvalidContextPath(context_path.to_string()));
        }
        Ok(Self {
            context_path: context_path.to_string(),
            state: RwLock::new(AppState::Created),
            attributes: DashMap::new(),
            init_params: RwLock::new(HashMap::new()),
            servlets: RwLock::new(Vec::new()),
            filters: RwLock::new(Vec::new()),
            servlet_mappings: RwLock::new(Vec::new()),
            filter_mappings: RwLock::new(Vec::new()),
            error_pages: RwLock::new(Vec::new()),
            lifecycle_listeners: RwLock::new(Vec::new()),
            request_listeners: RwLock::new(Vec::new()),
            attribute_listeners: RwLock::new(Vec::new()),
            initializers: RwLock::new(Vec::new()),
            factory: RwLock::new(Arc::new(NullInstanceFactory)),
            managers: ArcSwap::from_pointee(Managers::default()),
            routing: ArcSwap::from_pointee(RoutingTable::empty()),
            class_space: RwLock::new(None),
            annotation_index: RwLock::new(None),
            async_timeout: RwLock::new(crate::config::default_async_timeout()),
            next_order: AtomicUsize::new(0),
            init_log: Mutex::new(Vec::new()),
        })
    }

    /// An application mounted at the root.
    pub fn root() -> Self {
        #[allow(clippy::unwrap_used)]
        Self::new("").unwrap()
    }

    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    pub fn state(&self) -> AppState {
        *self.state.read().unwrap()
    }

    pub(crate) fn set_state(&self, state: AppState) {
        let mut guard = self.state.write().unwrap();
        info!(context_path = %self.context_path, from = ?*guard, to = ?state, "Application state change");
        *guard = state;
    }

    fn ensure_mutable(&self) -> Result<(), AppError> {
        match self.state() {
            AppState::Created | AppState::Initializing => Ok(()),
            state => Err(AppError::RegistrationClosed {
                context_path: self.context_path.clone(),
                state,
            }),
        }
    }

    // ---- registration window ------------------------------------------------

    pub fn add_servlet(&self, def: ServletDef) -> Result<(), AppError> {
        self.ensure_mutable()?;
        let mut servlets = self.servlets.write().unwrap();
        if let Some(pos) = servlets.iter().position(|s| s.name() == def.name) {
            warn!(servlet = %def.name, "Servlet registration replaced");
            servlets.remove(pos);
        }
        let order = self.next_order.fetch_add(1, Ordering::Relaxed);
        servlets.push(Arc::new(ServletRegistration::from_def(def, order)));
        Ok(())
    }

    /// Map a URL pattern to a named servlet. Remapping an existing pattern
    /// replaces the previous mapping.
    pub fn add_servlet_mapping(&self, pattern: &str, servlet_name: &str) -> Result<(), AppError> {
        self.ensure_mutable()?;
        let parsed =
            UrlPattern::parse(pattern).ok_or_else(|| AppError::InvalidPattern(pattern.to_string()))?;
        let mut mappings = self.servlet_mappings.write().unwrap();
        if let Some(pos) = mappings.iter().position(|(p, _)| *p == parsed) {
            warn!(pattern = %pattern, servlet = %servlet_name, "Servlet mapping replaced");
            mappings.remove(pos);
        }
        mappings.push((parsed, servlet_name.to_string()));
        Ok(())
    }

    pub fn add_filter(&self, def: FilterDef) -> Result<(), AppError> {
        self.ensure_mutable()?;
        let mut filters = self.filters.write().unwrap();
        if let Some(pos) = filters.iter().position(|f| f.name() == def.name) {
            warn!(filter = %def.name, "Filter registration replaced");
            filters.remove(pos);
        }
        let order = self.next_order.fetch_add(1, Ordering::Relaxed);
        filters.push(Arc::new(FilterRegistration::from_def(def, order)));
        Ok(())
    }

    /// Bind a filter to a URL pattern.
    pub fn add_filter_mapping(&self, pattern: &str, filter_name: &str) -> Result<(), AppError> {
        self.ensure_mutable()?;
        let parsed =
            UrlPattern::parse(pattern).ok_or_else(|| AppError::InvalidPattern(pattern.to_string()))?;
        self.filter_mappings.write().unwrap().push(FilterMapping {
            filter_name: filter_name.to_string(),
            scope: FilterScope::Pattern(parsed),
        });
        Ok(())
    }

    /// Bind a filter to every request dispatched to a named servlet.
    pub fn add_filter_for_servlet(
        &self,
        servlet_name: &str,
        filter_name: &str,
    ) -> Result<(), AppError> {
        self.ensure_mutable()?;
        if !self
            .servlets
            .read()
            .unwrap()
            .iter()
            .any(|s| s.name() == servlet_name)
        {
            return Err(AppError::UnknownServlet(servlet_name.to_string()));
        }
        self.filter_mappings.write().unwrap().push(FilterMapping {
            filter_name: filter_name.to_string(),
            scope: FilterScope::Servlet(servlet_name.to_string()),
        });
        Ok(())
    }

    pub fn add_error_page_for_status(&self, status: u16, location: &str) -> Result<(), AppError> {
        self.ensure_mutable()?;
        self.error_pages.write().unwrap().push(ErrorPage {
            matcher: ErrorMatcher::Status(status),
            location: location.to_string(),
        });
        Ok(())
    }

    pub fn add_error_page_for_kind(&self, kind: &str, location: &str) -> Result<(), AppError> {
        self.ensure_mutable()?;
        self.error_pages.write().unwrap().push(ErrorPage {
            matcher: ErrorMatcher::Kind(kind.to_string()),
            location: location.to_string(),
        });
        Ok(())
    }

    pub fn add_lifecycle_listener(&self, listener: Arc<dyn LifecycleListener>) -> Result<(), AppError> {
        self.ensure_mutable()?;
        self.lifecycle_listeners.write().unwrap().push(listener);
        Ok(())
    }

    pub fn add_request_listener(&self, listener: Arc<dyn RequestListener>) -> Result<(), AppError> {
        self.ensure_mutable()?;
        self.request_listeners.write().unwrap().push(listener);
        Ok(())
    }

    pub fn add_attribute_listener(&self, listener: Arc<dyn AttributeListener>) -> Result<(), AppError> {
        self.ensure_mutable()?;
        self.attribute_listeners.write().unwrap().push(listener);
        Ok(())
    }

    pub fn add_initializer(&self, initializer: Arc<dyn AppInitializer>) -> Result<(), AppError> {
        self.ensure_mutable()?;
        self.initializers.write().unwrap().push(initializer);
        Ok(())
    }

    pub fn set_init_param(&self, name: &str, value: &str) -> Result<(), AppError> {
        self.ensure_mutable()?;
        self.init_params
            .write()
            .unwrap()
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    pub fn set_instance_factory(&self, factory: Arc<dyn InstanceFactory>) -> Result<(), AppError> {
        self.ensure_mutable()?;
        *self.factory.write().unwrap() = factory;
        Ok(())
    }

    pub fn set_async_timeout(&self, timeout: Duration) {
        *self.async_timeout.write().unwrap() = timeout;
    }

    // ---- manager slots ------------------------------------------------------

    pub fn managers(&self) -> Arc<Managers> {
        self.managers.load_full()
    }

    pub fn set_security_manager(&self, security: Arc<dyn SecurityManager>) {
        self.managers.rcu(|cur| {
            let mut next = Managers::clone(cur);
            next.security = Arc::clone(&security);
            next
        });
    }

    pub fn set_session_manager(&self, session: Arc<dyn SessionManager>) {
        self.managers.rcu(|cur| {
            let mut next = Managers::clone(cur);
            next.session = Arc::clone(&session);
            next
        });
    }

    pub fn set_naming_manager(&self, naming: Arc<dyn NamingManager>) {
        self.managers.rcu(|cur| {
            let mut next = Managers::clone(cur);
            next.naming = Arc::clone(&naming);
            next
        });
    }

    pub fn set_multipart_manager(&self, multipart: Arc<dyn MultipartManager>) {
        self.managers.rcu(|cur| {
            let mut next = Managers::clone(cur);
            next.multipart = Arc::clone(&multipart);
            next
        });
    }

    // ---- read side ----------------------------------------------------------

    pub fn init_param(&self, name: &str) -> Option<String> {
        self.init_params.read().unwrap().get(name).cloned()
    }

    pub fn attribute(&self, name: &str) -> Option<Value> {
        self.attributes.get(name).map(|v| v.clone())
    }

    /// Set an application-scoped attribute, firing attribute listeners.
    /// Allowed in every state.
    pub fn set_attribute(&self, name: &str, value: Value) {
        let old = self.attributes.insert(name.to_string(), value.clone());
        let listeners = self.attribute_listeners.read().unwrap();
        let event = match &old {
            Some(old) => AttributeEvent::Replaced {
                name,
                old,
                new: &value,
            },
            None => AttributeEvent::Added { name, value: &value },
        };
        for listener in listeners.iter() {
            listener.attribute_changed(&event);
        }
    }

    pub fn remove_attribute(&self, name: &str) -> Option<Value> {
        let removed = self.attributes.remove(name).map(|(_, v)| v);
        if let Some(value) = &removed {
            let listeners = self.attribute_listeners.read().unwrap();
            for listener in listeners.iter() {
                listener.attribute_changed(&AttributeEvent::Removed { name, value });
            }
        }
        removed
    }

    pub fn servlet_registration(&self, name: &str) -> Option<Arc<ServletRegistration>> {
        self.servlets
            .read()
            .unwrap()
            .iter()
            .find(|s| s.name() == name)
            .map(Arc::clone)
    }

    pub fn servlet_registrations(&self) -> Vec<Arc<ServletRegistration>> {
        self.servlets.read().unwrap().iter().map(Arc::clone).collect()
    }

    pub fn filter_registration(&self, name: &str) -> Option<Arc<FilterRegistration>> {
        self.filters
            .read()
            .unwrap()
            .iter()
            .find(|f| f.name() == name)
            .map(Arc::clone)
    }

    pub fn filter_registrations(&self) -> Vec<Arc<FilterRegistration>> {
        self.filters.read().unwrap().iter().map(Arc::clone).collect()
    }

    pub fn instance_factory(&self) -> Arc<dyn InstanceFactory> {
        Arc::clone(&self.factory.read().unwrap())
    }

    pub fn async_timeout(&self) -> Duration {
        *self.async_timeout.read().unwrap()
    }

    /// Error-page location for a failed invocation. Kind chain entries are
    /// tried outermost first; status matching is the fallback.
    pub fn error_page_for(&self, status: u16, kinds: &[&str]) -> Option<String> {
        let pages = self.error_pages.read().unwrap();
        for kind in kinds {
            if let Some(page) = pages
                .iter()
                .find(|p| p.matcher == ErrorMatcher::Kind((*kind).to_string()))
            {
                return Some(page.location.clone());
            }
        }
        pages
            .iter()
            .find(|p| p.matcher == ErrorMatcher::Status(status))
            .map(|p| p.location.clone())
    }

    pub(crate) fn lifecycle_listeners(&self) -> Vec<Arc<dyn LifecycleListener>> {
        self.lifecycle_listeners
            .read()
            .unwrap()
            .iter()
            .map(Arc::clone)
            .collect()
    }

    pub(crate) fn request_listeners(&self) -> Vec<Arc<dyn RequestListener>> {
        self.request_listeners
            .read()
            .unwrap()
            .iter()
            .map(Arc::clone)
            .collect()
    }

    pub(crate) fn initializers(&self) -> Vec<Arc<dyn AppInitializer>> {
        self.initializers.read().unwrap().iter().map(Arc::clone).collect()
    }

    // ---- routing snapshot ---------------------------------------------------

    /// The immutable routing snapshot used by dispatch. Empty until startup
    /// freezes the registrations.
    pub fn routing(&self) -> Arc<RoutingTable> {
        self.routing.load_full()
    }

    /// Build and publish the routing snapshot from the current mappings.
    pub(crate) fn freeze_routing(&self) {
        let servlet_mappings = self.servlet_mappings.read().unwrap().clone();
        let filter_mappings = self.filter_mappings.read().unwrap().clone();
        let table = RoutingTable::build(servlet_mappings, filter_mappings);
        info!(
            context_path = %self.context_path,
            servlet_mappings = table.servlet_mapping_count(),
            filter_mappings = table.filter_mapping_count(),
            "Routing table frozen"
        );
        self.routing.store(Arc::new(table));
    }

    // ---- deployment wiring --------------------------------------------------

    pub fn set_class_space(&self, space: Arc<ClassSpace>) {
        *self.class_space.write().unwrap() = Some(space);
    }

    pub fn class_space(&self) -> Option<Arc<ClassSpace>> {
        self.class_space.read().unwrap().as_ref().map(Arc::clone)
    }

    /// Drop the application's class space reference so its definitions can
    /// be released. Called at the end of shutdown.
    pub(crate) fn release_class_space(&self) {
        *self.class_space.write().unwrap() = None;
    }

    pub fn set_annotation_index(&self, index: Arc<AnnotationIndex>) {
        *self.annotation_index.write().unwrap() = Some(index);
    }

    pub fn annotation_index(&self) -> Option<Arc<AnnotationIndex>> {
        self.annotation_index.read().unwrap().as_ref().map(Arc::clone)
    }
}

impl fmt::Debug for WebApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebApp")
            .field("context_path", &self.context_path)
            .field("state", &self.state())
            .field("servlets", &self.servlets.read().unwrap().len())
            .field("filters", &self.filters.read().unwrap().len())
            .finish()
    }
}
