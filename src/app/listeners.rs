use super::WebApp;
use crate::http::HttpRequest;
use serde_json::Value;

/// Observes application start and stop. `started` runs during startup,
/// before filters and eager servlets initialize; `stopping` runs during
/// shutdown, after every servlet and filter was destroyed, in reverse
/// registration order.
pub trait LifecycleListener: Send + Sync {
    fn started(&self, _app: &WebApp) {}

    fn stopping(&self, _app: &WebApp) {}
}

/// Observes the bounds of each request invocation.
pub trait RequestListener: Send + Sync {
    fn request_started(&self, _req: &HttpRequest) {}

    fn request_completed(&self, _req: &HttpRequest) {}
}

/// A change to the application-scoped attribute map.
#[derive(Debug)]
pub enum AttributeEvent<'a> {
    Added {
        name: &'a str,
        value: &'a Value,
    },
    Replaced {
        name: &'a str,
        old: &'a Value,
        new: &'a Value,
    },
    Removed {
        name: &'a str,
        value: &'a Value,
    },
}

pub trait AttributeListener: Send + Sync {
    fn attribute_changed(&self, event: &AttributeEvent<'_>);
}
