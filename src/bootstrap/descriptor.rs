//! Declarative registration from the `WEB-INF/web.yaml` descriptor.
//!
//! The descriptor is optional; when present it is applied before the
//! annotation scan so scanned registrations can be overridden by hand.

use crate::app::{AppError, FilterDef, ServletDef, ServletError, WebApp};
use crate::managers::MultipartConfig;
use crate::resource::ResourceManager;
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

pub const DESCRIPTOR_PATH: &str = "WEB-INF/web.yaml";

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("descriptor is not valid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("descriptor entry is invalid: {0}")]
    Invalid(String),
    #[error(transparent)]
    Apply(#[from] AppError),
    #[error("descriptor listener failed: {0}")]
    Instantiate(#[from] ServletError),
    #[error(transparent)]
    Resource(#[from] crate::resource::ResourceError),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct WebDescriptor {
    pub display_name: Option<String>,
    pub context_params: HashMap<String, String>,
    pub servlets: Vec<ServletEntry>,
    pub servlet_mappings: Vec<ServletMappingEntry>,
    pub filters: Vec<FilterEntry>,
    pub filter_mappings: Vec<FilterMappingEntry>,
    pub listeners: Vec<ListenerEntry>,
    pub error_pages: Vec<ErrorPageEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServletEntry {
    pub name: String,
    pub class_name: String,
    #[serde(default)]
    pub init_params: HashMap<String, String>,
    #[serde(default = "default_load_on_startup")]
    pub load_on_startup: i32,
    #[serde(default)]
    pub async_supported: bool,
    pub run_as: Option<String>,
    pub multipart: Option<MultipartConfig>,
}

fn default_load_on_startup() -> i32 {
    -1
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServletMappingEntry {
    pub pattern: String,
    pub servlet: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FilterEntry {
    pub name: String,
    pub class_name: String,
    #[serde(default)]
    pub init_params: HashMap<String, String>,
    pub priority: Option<i32>,
}

/// Exactly one of `pattern` and `servlet` must be set.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FilterMappingEntry {
    pub filter: String,
    pub pattern: Option<String>,
    pub servlet: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ListenerEntry {
    pub class_name: String,
}

/// Exactly one of `status` and `kind` must be set.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ErrorPageEntry {
    pub location: String,
    pub status: Option<u16>,
    pub kind: Option<String>,
}

impl WebDescriptor {
    pub fn parse(bytes: &[u8]) -> Result<Self, DescriptorError> {
        Ok(serde_yaml::from_slice(bytes)?)
    }

    /// Read the descriptor from an application's resources, if present.
    pub fn load(resources: &ResourceManager) -> Result<Option<Self>, DescriptorError> {
        match resources.read(DESCRIPTOR_PATH)? {
            Some(bytes) => Ok(Some(Self::parse(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Apply every entry to the application's registries.
    pub fn apply(&self, app: &WebApp) -> Result<(), DescriptorError> {
        for entry in &self.context_params {
            app.set_init_param(entry.0, entry.1)?;
        }

        for servlet in &self.servlets {
            let mut def = ServletDef::of_class(&servlet.name, &servlet.class_name)
                .load_on_startup(servlet.load_on_startup)
                .async_supported(servlet.async_supported);
            for (k, v) in &servlet.init_params {
                def = def.init_param(k, v);
            }
            if let Some(role) = &servlet.run_as {
                def = def.run_as(role);
            }
            if let Some(multipart) = &servlet.multipart {
                def = def.multipart(multipart.clone());
            }
            app.add_servlet(def)?;
            debug!(servlet = %servlet.name, class = %servlet.class_name, "Descriptor servlet registered");
        }

        for mapping in &self.servlet_mappings {
            app.add_servlet_mapping(&mapping.pattern, &mapping.servlet)?;
        }

        for filter in &self.filters {
            let mut def = FilterDef::of_class(&filter.name, &filter.class_name);
            if let Some(priority) = filter.priority {
                def = def.priority(priority);
            }
            for (k, v) in &filter.init_params {
                def = def.init_param(k, v);
            }
            app.add_filter(def)?;
        }

        for mapping in &self.filter_mappings {
            match (&mapping.pattern, &mapping.servlet) {
                (Some(pattern), None) => app.add_filter_mapping(pattern, &mapping.filter)?,
                (None, Some(servlet)) => app.add_filter_for_servlet(servlet, &mapping.filter)?,
                _ => {
                    return Err(DescriptorError::Invalid(format!(
                        "filter mapping for {:?} needs exactly one of pattern or servlet",
                        mapping.filter
                    )))
                }
            }
        }

        let factory = app.instance_factory();
        for listener in &self.listeners {
            let instance = factory.lifecycle_listener(&listener.class_name)?;
            app.add_lifecycle_listener(instance)?;
        }

        for page in &self.error_pages {
            match (page.status, &page.kind) {
                (Some(status), None) => app.add_error_page_for_status(status, &page.location)?,
                (None, Some(kind)) => app.add_error_page_for_kind(kind, &page.location)?,
                _ => {
                    return Err(DescriptorError::Invalid(format!(
                        "error page {:?} needs exactly one of status or kind",
                        page.location
                    )))
                }
            }
        }

        info!(
            servlets = self.servlets.len(),
            filters = self.filters.len(),
            listeners = self.listeners.len(),
            "Descriptor applied"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{HttpServlet, RegistryInstanceFactory};
    use crate::http::{HttpRequest, HttpResponse};
    use std::sync::Arc;

    struct Nop;

    impl HttpServlet for Nop {
        fn service(
            &self,
            _req: &mut HttpRequest,
            _res: &mut HttpResponse,
        ) -> Result<(), ServletError> {
            Ok(())
        }
    }

    const DESCRIPTOR: &str = r#"
display-name: Shop
context-params:
  greeting: hello
servlets:
  - name: orders
    class-name: com.example.OrderServlet
    load-on-startup: 1
    async-supported: true
    init-params:
      page-size: "25"
servlet-mappings:
  - pattern: /orders/*
    servlet: orders
filters:
  - name: audit
    class-name: com.example.AuditFilter
    priority: 10
filter-mappings:
  - filter: audit
    pattern: /*
error-pages:
  - status: 404
    location: /missing.html
  - kind: db.Timeout
    location: /oops.html
"#;

    #[test]
    fn full_descriptor_round_trips_into_registrations() {
        let descriptor = WebDescriptor::parse(DESCRIPTOR.as_bytes()).unwrap();
        let app = WebApp::root();
        let factory = RegistryInstanceFactory::new();
        factory.bind_servlet("com.example.OrderServlet", || Arc::new(Nop));
        app.set_instance_factory(Arc::new(factory)).unwrap();

        descriptor.apply(&app).unwrap();

        let reg = app.servlet_registration("orders").unwrap();
        assert_eq!(reg.load_on_startup(), 1);
        assert!(reg.async_supported());
        assert_eq!(app.init_param("greeting").as_deref(), Some("hello"));
        assert_eq!(app.filter_registration("audit").unwrap().priority(), 10);

        app.freeze_routing();
        let table = app.routing();
        assert_eq!(table.route("/orders/7").unwrap().servlet_name, "orders");
        assert_eq!(table.filters_for("/orders/7", "orders"), vec!["audit"]);
        assert_eq!(
            app.error_page_for(500, &["db.Timeout"]),
            Some("/oops.html".to_string())
        );
    }

    #[test]
    fn ambiguous_filter_mapping_is_rejected() {
        let descriptor = WebDescriptor::parse(
            b"filter-mappings:\n  - filter: f\n    pattern: /*\n    servlet: s\n",
        )
        .unwrap();
        let app = WebApp::root();
        assert!(matches!(
            descriptor.apply(&app),
            Err(DescriptorError::Invalid(_))
        ));
    }
}
