use super::ServletError;
use crate::dispatch::FilterChain;
use crate::http::{HttpRequest, HttpResponse};
use std::collections::HashMap;

/// A request endpoint. Implementations must be thread-safe: one instance
/// serves concurrent requests, so per-request state lives on the request and
/// response, never on `self`.
pub trait HttpServlet: Send + Sync {
    /// Called exactly once before the first `service` call.
    fn init(&self, _config: &ServletConfig) -> Result<(), ServletError> {
        Ok(())
    }

    fn service(&self, req: &mut HttpRequest, res: &mut HttpResponse) -> Result<(), ServletError>;

    /// Called exactly once during application shutdown, only if `init`
    /// succeeded.
    fn destroy(&self) {}
}

/// An interceptor wrapped around servlet invocation. Calling
/// `chain.proceed()` continues to the next filter (or the servlet);
/// not calling it short-circuits the request.
pub trait Filter: Send + Sync {
    fn init(&self, _config: &FilterConfig) -> Result<(), ServletError> {
        Ok(())
    }

    fn filter(
        &self,
        req: &mut HttpRequest,
        res: &mut HttpResponse,
        chain: &FilterChain<'_>,
    ) -> Result<(), ServletError>;

    fn destroy(&self) {}
}

/// Static configuration handed to [`HttpServlet::init`].
#[derive(Debug, Clone)]
pub struct ServletConfig {
    pub name: String,
    pub init_params: HashMap<String, String>,
}

impl ServletConfig {
    pub fn init_param(&self, name: &str) -> Option<&str> {
        self.init_params.get(name).map(String::as_str)
    }
}

/// Static configuration handed to [`Filter::init`].
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub name: String,
    pub init_params: HashMap<String, String>,
}

impl FilterConfig {
    pub fn init_param(&self, name: &str) -> Option<&str> {
        self.init_params.get(name).map(String::as_str)
    }
}
