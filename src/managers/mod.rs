//! Pluggable per-application managers.
//!
//! Security, session, naming and multipart handling are capability
//! interfaces the dispatch engine calls at fixed points. Every accessor on a
//! [`crate::app::WebApp`] returns a real implementation (the no-op defaults
//! below when nothing was set), so dispatch code calls them unconditionally.

mod multipart;
mod naming;
mod security;
mod session;

pub use multipart::{FormMultipartManager, MultipartConfig, Part};
pub use naming::InMemoryNamingManager;
pub use security::HeaderKeySecurityManager;
pub use session::{InMemorySessionManager, SESSION_COOKIE};

use crate::app::ServletError;
use crate::http::{HttpRequest, HttpResponse};
use serde_json::Value;

/// Outcome of the pre-request authentication hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Proceed with dispatch.
    Continue,
    /// Stop: the manager has written (or requested) a denial status.
    Denied(u16),
}

/// Pre-request authentication hook.
pub trait SecurityManager: Send + Sync {
    fn authenticate(
        &self,
        req: &mut HttpRequest,
        res: &mut HttpResponse,
    ) -> Result<AuthOutcome, ServletError>;
}

/// Session lookup-or-create keyed by an opaque session id.
pub trait SessionManager: Send + Sync {
    /// Return the request's session id, creating a session (and setting the
    /// cookie on the response) if none exists yet.
    fn lookup_or_create(&self, req: &mut HttpRequest, res: &mut HttpResponse) -> String;

    fn get(&self, session_id: &str, key: &str) -> Option<Value>;

    fn put(&self, session_id: &str, key: &str, value: Value);

    fn invalidate(&self, session_id: &str);
}

/// Flat naming context (the JNDI analog).
pub trait NamingManager: Send + Sync {
    fn bind(&self, name: &str, value: Value);

    fn lookup(&self, name: &str) -> Option<Value>;

    fn unbind(&self, name: &str) -> Option<Value>;
}

/// On-demand multipart part extraction.
pub trait MultipartManager: Send + Sync {
    /// Extract the parts of a `multipart/form-data` body. Called lazily, only
    /// when a servlet asks for parts.
    fn parts(
        &self,
        req: &HttpRequest,
        config: Option<&MultipartConfig>,
    ) -> Result<Vec<Part>, ServletError>;
}

/// Default security manager: every request proceeds.
#[derive(Debug, Default)]
pub struct NoopSecurityManager;

impl SecurityManager for NoopSecurityManager {
    fn authenticate(
        &self,
        _req: &mut HttpRequest,
        _res: &mut HttpResponse,
    ) -> Result<AuthOutcome, ServletError> {
        Ok(AuthOutcome::Continue)
    }
}

/// Default multipart manager: no parts, never an error.
#[derive(Debug, Default)]
pub struct NoopMultipartManager;

impl MultipartManager for NoopMultipartManager {
    fn parts(
        &self,
        _req: &HttpRequest,
        _config: Option<&MultipartConfig>,
    ) -> Result<Vec<Part>, ServletError> {
        Ok(Vec::new())
    }
}
