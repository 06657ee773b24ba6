//! The request dispatch engine.
//!
//! One `process` call takes a request through the full container pipeline:
//! application state check, request listeners, security, routing, the filter
//! chain, the servlet, and error dispatch when anything fails. Servlets with
//! async support may hand the request off to another thread and resolve it
//! later; the transport adapter parks on [`DispatchEngine::finish_async`]
//! until then.

pub mod async_support;
mod chain;
mod engine;
pub mod routing;

pub use async_support::{AsyncContext, AsyncResponse};
pub use chain::FilterChain;
pub use engine::{DispatchEngine, EndState};

use async_support::AsyncSignal;
use may::sync::mpsc;

/// Token for a request parked on an async hand-off.
pub struct PendingAsync {
    pub(crate) rx: mpsc::Receiver<AsyncSignal>,
}

impl std::fmt::Debug for PendingAsync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PendingAsync")
    }
}
