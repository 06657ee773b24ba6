//! Async hand-off plumbing.
//!
//! A servlet whose registration declares async support may call
//! `HttpRequest::start_async` and return immediately; the connection
//! coroutine then parks on a channel until some thread resolves the request.
//! Exactly one resolution wins: completion, re-dispatch, or the timeout
//! sentinel. Later attempts are ignored and logged.

use crate::http::HeaderVec;
use may::sync::mpsc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Terminal payload produced by an async completion.
#[derive(Debug)]
pub struct AsyncResponse {
    pub status: u16,
    pub headers: HeaderVec,
    pub body: Vec<u8>,
}

impl AsyncResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderVec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((Arc::from(name), value.to_string()));
        self
    }

    pub fn body(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.body = bytes.into();
        self
    }
}

/// What resolved the hand-off.
#[derive(Debug)]
pub(crate) enum AsyncSignal {
    Complete(AsyncResponse),
    Dispatch(String),
    Timeout,
}

/// Shared state between the parked connection coroutine and whoever holds
/// the [`AsyncContext`].
#[derive(Debug)]
pub struct AsyncCell {
    started: AtomicBool,
    resolved: AtomicBool,
    tx: mpsc::Sender<AsyncSignal>,
}

impl AsyncCell {
    pub(crate) fn new() -> (Arc<Self>, mpsc::Receiver<AsyncSignal>) {
        let (tx, rx) = mpsc::channel();
        (
            Arc::new(Self {
                started: AtomicBool::new(false),
                resolved: AtomicBool::new(false),
                tx,
            }),
            rx,
        )
    }

    pub(crate) fn mark_started(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    pub(crate) fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// First resolution wins; the send only happens for the winner.
    fn resolve(&self, signal: AsyncSignal) -> bool {
        if self.resolved.swap(true, Ordering::SeqCst) {
            warn!(signal = ?signal, "Async resolution ignored: request already resolved");
            return false;
        }
        // The receiver only disappears after a winning signal was consumed,
        // so a failed send here means nothing is waiting anymore.
        let _ = self.tx.send(signal);
        true
    }

    /// Fired by the timeout sentinel.
    pub(crate) fn timeout(&self) -> bool {
        self.resolve(AsyncSignal::Timeout)
    }

    /// Spawn the sentinel that force-resolves this cell after `timeout`.
    pub(crate) fn arm_timeout(self: &Arc<Self>, timeout: Duration) {
        let cell = Arc::clone(self);
        std::thread::spawn(move || {
            std::thread::sleep(timeout);
            if cell.timeout() {
                warn!(timeout_ms = timeout.as_millis() as u64, "Async request timed out");
            }
        });
    }
}

/// Handle returned by `start_async`. May be moved to any thread; consuming
/// methods resolve the parked request exactly once.
#[derive(Debug)]
pub struct AsyncContext {
    cell: Arc<AsyncCell>,
}

impl AsyncContext {
    pub(crate) fn new(cell: Arc<AsyncCell>) -> Self {
        Self { cell }
    }

    /// Complete the request with the given payload. Returns whether this
    /// resolution won.
    pub fn complete(self, response: AsyncResponse) -> bool {
        debug!(status = response.status, "Async completion");
        self.cell.resolve(AsyncSignal::Complete(response))
    }

    /// Resolve by re-dispatching the request to another path inside the same
    /// application. The target runs synchronously.
    pub fn dispatch(self, path: &str) -> bool {
        debug!(path = %path, "Async re-dispatch");
        self.cell.resolve(AsyncSignal::Dispatch(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_resolution_wins() {
        let (cell, rx) = AsyncCell::new();
        let winner = AsyncContext::new(Arc::clone(&cell));
        let loser = AsyncContext::new(Arc::clone(&cell));

        assert!(winner.complete(AsyncResponse::new(200).body("done")));
        assert!(!loser.complete(AsyncResponse::new(500)));
        assert!(!cell.timeout());

        match rx.recv().unwrap() {
            AsyncSignal::Complete(payload) => {
                assert_eq!(payload.status, 200);
                assert_eq!(payload.body, b"done");
            }
            other => panic!("unexpected signal: {other:?}"),
        }
        // Exactly one signal was delivered.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn timeout_sentinel_resolves_unattended_requests() {
        let (cell, rx) = AsyncCell::new();
        cell.arm_timeout(Duration::from_millis(10));
        match rx.recv().unwrap() {
            AsyncSignal::Timeout => {}
            other => panic!("unexpected signal: {other:?}"),
        }
    }
}
