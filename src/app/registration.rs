use super::{Filter, FilterConfig, HttpServlet, InstanceFactory, ServletConfig, ServletError};
use crate::managers::MultipartConfig;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Filters with no explicit priority run here. Lower runs earlier.
pub const DEFAULT_FILTER_PRIORITY: i32 = 50;

/// What a registration resolves to at instantiation time.
pub enum ServletTarget {
    Instance(Arc<dyn HttpServlet>),
    ClassName(String),
}

impl fmt::Debug for ServletTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(_) => f.write_str("Instance(..)"),
            Self::ClassName(name) => write!(f, "ClassName({name:?})"),
        }
    }
}

pub enum FilterTarget {
    Instance(Arc<dyn Filter>),
    ClassName(String),
}

impl fmt::Debug for FilterTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(_) => f.write_str("Instance(..)"),
            Self::ClassName(name) => write!(f, "ClassName({name:?})"),
        }
    }
}

/// Builder for a servlet registration.
#[derive(Debug)]
pub struct ServletDef {
    pub(crate) name: String,
    pub(crate) target: ServletTarget,
    pub(crate) init_params: HashMap<String, String>,
    pub(crate) load_on_startup: i32,
    pub(crate) async_supported: bool,
    pub(crate) run_as: Option<String>,
    pub(crate) multipart: Option<MultipartConfig>,
}

impl ServletDef {
    pub fn of_instance(name: &str, servlet: Arc<dyn HttpServlet>) -> Self {
        Self::new(name, ServletTarget::Instance(servlet))
    }

    pub fn of_class(name: &str, class_name: &str) -> Self {
        Self::new(name, ServletTarget::ClassName(class_name.to_string()))
    }

    fn new(name: &str, target: ServletTarget) -> Self {
        Self {
            name: name.to_string(),
            target,
            init_params: HashMap::new(),
            load_on_startup: -1,
            async_supported: false,
            run_as: None,
            multipart: None,
        }
    }

    pub fn init_param(mut self, name: &str, value: &str) -> Self {
        self.init_params.insert(name.to_string(), value.to_string());
        self
    }

    /// Non-negative values initialize eagerly at startup, in ascending order.
    /// Negative (the default) defers to first dispatch.
    pub fn load_on_startup(mut self, order: i32) -> Self {
        self.load_on_startup = order;
        self
    }

    pub fn async_supported(mut self, supported: bool) -> Self {
        self.async_supported = supported;
        self
    }

    pub fn run_as(mut self, role: &str) -> Self {
        self.run_as = Some(role.to_string());
        self
    }

    pub fn multipart(mut self, config: MultipartConfig) -> Self {
        self.multipart = Some(config);
        self
    }
}

/// Builder for a filter registration.
#[derive(Debug)]
pub struct FilterDef {
    pub(crate) name: String,
    pub(crate) target: FilterTarget,
    pub(crate) init_params: HashMap<String, String>,
    pub(crate) priority: i32,
}

impl FilterDef {
    pub fn of_instance(name: &str, filter: Arc<dyn Filter>) -> Self {
        Self::new(name, FilterTarget::Instance(filter))
    }

    pub fn of_class(name: &str, class_name: &str) -> Self {
        Self::new(name, FilterTarget::ClassName(class_name.to_string()))
    }

    fn new(name: &str, target: FilterTarget) -> Self {
        Self {
            name: name.to_string(),
            target,
            init_params: HashMap::new(),
            priority: DEFAULT_FILTER_PRIORITY,
        }
    }

    pub fn init_param(mut self, name: &str, value: &str) -> Self {
        self.init_params.insert(name.to_string(), value.to_string());
        self
    }

    /// Chain position. Lower priorities run earlier; equal priorities keep
    /// registration order.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// A named servlet plus its instantiation state. The instance cell enforces
/// init-exactly-once: a failed lazy init leaves the cell empty so the next
/// request retries.
pub struct ServletRegistration {
    name: String,
    target: ServletTarget,
    init_params: HashMap<String, String>,
    load_on_startup: i32,
    async_supported: bool,
    run_as: Option<String>,
    multipart: Option<MultipartConfig>,
    order: usize,
    instance: OnceCell<Arc<dyn HttpServlet>>,
    destroyed: AtomicBool,
}

impl fmt::Debug for ServletRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServletRegistration")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("init_params", &self.init_params)
            .field("load_on_startup", &self.load_on_startup)
            .field("async_supported", &self.async_supported)
            .field("run_as", &self.run_as)
            .field("multipart", &self.multipart)
            .field("order", &self.order)
            .field("initialized", &self.instance.get().is_some())
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

impl ServletRegistration {
    pub(crate) fn from_def(def: ServletDef, order: usize) -> Self {
        Self {
            name: def.name,
            target: def.target,
            init_params: def.init_params,
            load_on_startup: def.load_on_startup,
            async_supported: def.async_supported,
            run_as: def.run_as,
            multipart: def.multipart,
            order,
            instance: OnceCell::new(),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn load_on_startup(&self) -> i32 {
        self.load_on_startup
    }

    pub fn async_supported(&self) -> bool {
        self.async_supported
    }

    pub fn run_as(&self) -> Option<&str> {
        self.run_as.as_deref()
    }

    pub fn multipart(&self) -> Option<&MultipartConfig> {
        self.multipart.as_ref()
    }

    pub(crate) fn order(&self) -> usize {
        self.order
    }

    pub fn is_initialized(&self) -> bool {
        self.instance.get().is_some()
    }

    /// Resolve and initialize the servlet instance, once. Concurrent first
    /// calls observe a single `init`.
    pub fn instance(
        &self,
        factory: &dyn InstanceFactory,
    ) -> Result<Arc<dyn HttpServlet>, ServletError> {
        let servlet = self.instance.get_or_try_init(|| {
            let servlet = match &self.target {
                ServletTarget::Instance(s) => Arc::clone(s),
                ServletTarget::ClassName(class_name) => factory.servlet(class_name)?,
            };
            let config = ServletConfig {
                name: self.name.clone(),
                init_params: self.init_params.clone(),
            };
            servlet.init(&config)?;
            debug!(servlet = %self.name, "Servlet initialized");
            Ok::<_, ServletError>(servlet)
        })?;
        Ok(Arc::clone(servlet))
    }

    /// Destroy the instance if it was ever initialized. Safe to call more
    /// than once; only the first call reaches the servlet.
    pub(crate) fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(servlet) = self.instance.get() {
            servlet.destroy();
            debug!(servlet = %self.name, "Servlet destroyed");
        }
    }
}

/// A named filter plus its instantiation state.
pub struct FilterRegistration {
    name: String,
    target: FilterTarget,
    init_params: HashMap<String, String>,
    priority: i32,
    order: usize,
    instance: OnceCell<Arc<dyn Filter>>,
    destroyed: AtomicBool,
}

impl fmt::Debug for FilterRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterRegistration")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("init_params", &self.init_params)
            .field("priority", &self.priority)
            .field("order", &self.order)
            .field("initialized", &self.instance.get().is_some())
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

impl FilterRegistration {
    pub(crate) fn from_def(def: FilterDef, order: usize) -> Self {
        Self {
            name: def.name,
            target: def.target,
            init_params: def.init_params,
            priority: def.priority,
            order,
            instance: OnceCell::new(),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub(crate) fn order(&self) -> usize {
        self.order
    }

    pub fn instance(&self, factory: &dyn InstanceFactory) -> Result<Arc<dyn Filter>, ServletError> {
        let filter = self.instance.get_or_try_init(|| {
            let filter = match &self.target {
                FilterTarget::Instance(f) => Arc::clone(f),
                FilterTarget::ClassName(class_name) => factory.filter(class_name)?,
            };
            let config = FilterConfig {
                name: self.name.clone(),
                init_params: self.init_params.clone(),
            };
            filter.init(&config)?;
            debug!(filter = %self.name, "Filter initialized");
            Ok::<_, ServletError>(filter)
        })?;
        Ok(Arc::clone(filter))
    }

    pub(crate) fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(filter) = self.instance.get() {
            filter.destroy();
            debug!(filter = %self.name, "Filter destroyed");
        }
    }
}
