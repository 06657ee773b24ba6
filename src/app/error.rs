use super::AppState;
use std::error::Error;
use std::fmt;
use thiserror::Error;

/// A failure raised by a servlet, filter or listener during request
/// processing.
///
/// The `kind` is a dotted type name (the exception-class analog) used by
/// error-page matching; wrapped causes form a chain that is walked innermost
/// to outermost. An optional status overrides the default 500.
#[derive(Debug)]
pub struct ServletError {
    kind: String,
    message: String,
    status: Option<u16>,
    source: Option<Box<ServletError>>,
}

impl ServletError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            status: None,
            source: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Wrap `source` under a new outer kind, preserving the cause chain.
    pub fn wrap(kind: impl Into<String>, message: impl Into<String>, source: ServletError) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            status: None,
            source: Some(Box::new(source)),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Explicit status of the outermost error carrying one, walking the
    /// cause chain.
    pub fn status(&self) -> Option<u16> {
        self.status
            .or_else(|| self.source.as_ref().and_then(|s| s.status()))
    }

    /// Kinds from the outermost error inward. Error-page matching tries each
    /// in order and takes the first configured page.
    pub fn kind_chain(&self) -> Vec<&str> {
        let mut kinds = Vec::new();
        let mut cursor = Some(self);
        while let Some(err) = cursor {
            kinds.push(err.kind.as_str());
            cursor = err.source.as_deref();
        }
        kinds
    }
}

impl fmt::Display for ServletError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl Error for ServletError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_ref().map(|s| s as &(dyn Error + 'static))
    }
}

impl From<std::io::Error> for ServletError {
    fn from(err: std::io::Error) -> Self {
        ServletError::new("std.io.Error", err.to_string())
    }
}

impl From<crate::resource::ResourceError> for ServletError {
    fn from(err: crate::resource::ResourceError) -> Self {
        ServletError::new("caribe.resource.Error", err.to_string())
    }
}

/// Configuration-time failures on a [`super::WebApp`].
#[derive(Debug, Error)]
pub enum AppError {
    #[error("registrations are closed: application {context_path:?} is {state:?}")]
    RegistrationClosed {
        context_path: String,
        state: AppState,
    },
    #[error("invalid URL pattern {0:?}")]
    InvalidPattern(String),
    #[error("invalid context path {0:?}: must be empty or start with '/' without a trailing '/'")]
    InvalidContextPath(String),
    #[error("filter mapping references unknown servlet {0:?}")]
    UnknownServlet(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_chain_walks_outermost_first() {
        let inner = ServletError::new("db.Timeout", "query stalled").with_status(504);
        let outer = ServletError::wrap("app.OrderFailure", "order not placed", inner);
        assert_eq!(outer.kind_chain(), vec!["app.OrderFailure", "db.Timeout"]);
        // Status is inherited from the first cause that set one.
        assert_eq!(outer.status(), Some(504));
    }

    #[test]
    fn io_errors_convert_with_a_stable_kind() {
        let err: ServletError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind(), "std.io.Error");
        assert!(err.status().is_none());
    }
}
