//! Annotation-driven registration.
//!
//! Walks the application's [`AnnotationIndex`] for the standard servlet
//! annotations and turns them into registrations. Runs after the descriptor;
//! names the descriptor already claimed are skipped, so hand-written entries
//! win over scanned ones.

use crate::app::{AppError, FilterDef, ServletDef, ServletError, WebApp};
use crate::index::{AnnotationIndex, ElementKind};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const WEB_SERVLET: &str = "jakarta.servlet.annotation.WebServlet";
pub const WEB_FILTER: &str = "jakarta.servlet.annotation.WebFilter";
pub const WEB_LISTENER: &str = "jakarta.servlet.annotation.WebListener";

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("annotated class {0} declares no URL patterns")]
    MissingPatterns(String),
    #[error(transparent)]
    Apply(#[from] AppError),
    #[error("scanned listener failed: {0}")]
    Instantiate(#[from] ServletError),
}

/// Register everything the index declares onto `app`.
pub fn apply(index: &AnnotationIndex, app: &WebApp) -> Result<(), ScanError> {
    let mut servlets = 0usize;
    for element in index.annotated(WEB_SERVLET) {
        if element.kind != ElementKind::Class {
            continue;
        }
        let name = string_attr(&element.attributes, "name")
            .unwrap_or_else(|| element.class_name.clone());
        if app.servlet_registration(&name).is_some() {
            debug!(servlet = %name, "Scanned servlet skipped: name already registered");
            continue;
        }
        let patterns = patterns_of(&element.attributes);
        if patterns.is_empty() {
            return Err(ScanError::MissingPatterns(element.class_name.clone()));
        }

        let mut def = ServletDef::of_class(&name, &element.class_name);
        if let Some(load) = int_attr(&element.attributes, "loadOnStartup") {
            def = def.load_on_startup(load as i32);
        }
        if bool_attr(&element.attributes, "asyncSupported") {
            def = def.async_supported(true);
        }
        app.add_servlet(def)?;
        for pattern in &patterns {
            app.add_servlet_mapping(pattern, &name)?;
        }
        servlets += 1;
    }

    let mut filters = 0usize;
    for element in index.annotated(WEB_FILTER) {
        if element.kind != ElementKind::Class {
            continue;
        }
        let name = string_attr(&element.attributes, "filterName")
            .unwrap_or_else(|| element.class_name.clone());
        if app.filter_registration(&name).is_some() {
            debug!(filter = %name, "Scanned filter skipped: name already registered");
            continue;
        }
        app.add_filter(FilterDef::of_class(&name, &element.class_name))?;

        let patterns = patterns_of(&element.attributes);
        let servlet_names = string_list_attr(&element.attributes, "servletNames");
        if patterns.is_empty() && servlet_names.is_empty() {
            return Err(ScanError::MissingPatterns(element.class_name.clone()));
        }
        for pattern in &patterns {
            app.add_filter_mapping(pattern, &name)?;
        }
        for servlet in &servlet_names {
            app.add_filter_for_servlet(servlet, &name)?;
        }
        filters += 1;
    }

    let factory = app.instance_factory();
    let mut listeners = 0usize;
    for element in index.annotated(WEB_LISTENER) {
        if element.kind != ElementKind::Class {
            continue;
        }
        match factory.lifecycle_listener(&element.class_name) {
            Ok(listener) => {
                app.add_lifecycle_listener(listener)?;
                listeners += 1;
            }
            Err(err) => {
                warn!(
                    class = %element.class_name,
                    error = %err,
                    "Scanned listener has no factory binding; skipped"
                );
            }
        }
    }

    info!(
        servlets = servlets,
        filters = filters,
        listeners = listeners,
        "Annotation scan applied"
    );
    Ok(())
}

/// `value` and `urlPatterns` are aliases; either may be a single string or
/// an array.
fn patterns_of(attributes: &Value) -> Vec<String> {
    for key in ["urlPatterns", "value"] {
        let patterns = string_list(attributes.get(key));
        if !patterns.is_empty() {
            return patterns;
        }
    }
    Vec::new()
}

fn string_list_attr(attributes: &Value, key: &str) -> Vec<String> {
    string_list(attributes.get(key))
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    }
}

fn string_attr(attributes: &Value, key: &str) -> Option<String> {
    attributes
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn int_attr(attributes: &Value, key: &str) -> Option<i64> {
    attributes.get(key).and_then(Value::as_i64)
}

fn bool_attr(attributes: &Value, key: &str) -> bool {
    attributes
        .get(key)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}
