use super::HeaderVec;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Callback invoked when a deferred (async) response is finally closed.
pub type ResponseCloser = Arc<dyn Fn() + Send + Sync>;

/// The mutable output side of one request invocation.
///
/// Once committed, the status line and headers are frozen: further mutation
/// attempts are silently ignored, matching standard reverse-proxy behavior.
/// The body sink stays writable so streaming continues after commit.
pub struct HttpResponse {
    status: u16,
    headers: HeaderVec,
    body: Vec<u8>,
    committed: bool,
    error_status: Option<u16>,
    closer: Option<ResponseCloser>,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpResponse {
    pub fn new() -> Self {
        Self {
            status: 200,
            headers: HeaderVec::new(),
            body: Vec::new(),
            committed: false,
            error_status: None,
            closer: None,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Set the status code. Ignored once the response is committed.
    pub fn set_status(&mut self, status: u16) {
        if self.committed {
            debug!(status = status, "Status change ignored: response committed");
            return;
        }
        self.status = status;
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &HeaderVec {
        &self.headers
    }

    /// Set (replace) a header. Ignored once committed.
    pub fn set_header(&mut self, name: &str, value: &str) {
        if self.committed {
            debug!(header = name, "Header change ignored: response committed");
            return;
        }
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value.to_string()));
    }

    /// Append a header without replacing existing values. Ignored once
    /// committed.
    pub fn add_header(&mut self, name: &str, value: &str) {
        if self.committed {
            debug!(header = name, "Header change ignored: response committed");
            return;
        }
        self.headers.push((Arc::from(name), value.to_string()));
    }

    /// Append bytes to the body sink.
    pub fn write(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn take_body(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.body)
    }

    /// Freeze status and headers. Idempotent.
    pub fn commit(&mut self) {
        self.committed = true;
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Signal an error status to be handled by error dispatch. No-op once
    /// committed.
    pub fn send_error(&mut self, status: u16) {
        if self.committed {
            debug!(status = status, "send_error ignored: response committed");
            return;
        }
        self.status = status;
        self.error_status = Some(status);
    }

    pub(crate) fn error_status(&self) -> Option<u16> {
        self.error_status
    }

    pub(crate) fn clear_error_status(&mut self) {
        self.error_status = None;
    }

    /// Discard status/headers/body if not yet committed. Returns whether the
    /// reset took effect.
    pub fn reset(&mut self) -> bool {
        if self.committed {
            return false;
        }
        self.status = 200;
        self.headers.clear();
        self.body.clear();
        self.error_status = None;
        true
    }

    /// Attach the callback to invoke when the response is finally closed
    /// (possibly on a different thread after an async hand-off). Preserved
    /// across error dispatch and resets.
    pub fn set_closer(&mut self, closer: ResponseCloser) {
        self.closer = Some(closer);
    }

    pub fn take_closer(&mut self) -> Option<ResponseCloser> {
        self.closer.take()
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("committed", &self.committed)
            .finish()
    }
}
