//! Per-invocation request/response pair.
//!
//! These are single-use, mutable objects created by the transport adapter for
//! each inbound connection and destroyed once the dispatch chain completes
//! (or ownership transfers at the async hand-off). Header storage is
//! stack-allocated up to [`MAX_INLINE_HEADERS`] entries, multi-valued, with
//! case-insensitive names.

mod request;
mod response;

pub use request::HttpRequest;
pub use response::HttpResponse;

use smallvec::SmallVec;
use std::sync::Arc;

/// Maximum inline headers/cookies before heap allocation.
pub const MAX_INLINE_HEADERS: usize = 16;

/// Stack-allocated header/cookie storage for the hot path. Names use
/// `Arc<str>` because they repeat across requests; values are per-request.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// Request attribute names set by the engine during error dispatch.
pub mod attrs {
    /// Original request path that triggered the error dispatch.
    pub const ERROR_REQUEST_PATH: &str = "caribe.error.request_path";
    /// Error kind name (the exception-type analog).
    pub const ERROR_KIND: &str = "caribe.error.kind";
    /// Human-readable error message.
    pub const ERROR_MESSAGE: &str = "caribe.error.message";
    /// HTTP status associated with the error.
    pub const ERROR_STATUS: &str = "caribe.error.status";
    /// Session id attached by the session manager.
    pub const SESSION_ID: &str = "caribe.session.id";
    /// Role a servlet registration runs as, from its `run-as` setting.
    pub const RUN_AS: &str = "caribe.security.run_as";
}
