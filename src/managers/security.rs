use super::{AuthOutcome, SecurityManager};
use crate::app::ServletError;
use crate::http::{HttpRequest, HttpResponse};
use tracing::debug;

/// Shared-key authentication against a single request header.
///
/// A demonstration implementation of the security seam: requests must carry
/// `header: key` exactly, anything else is denied with 401. Real deployments
/// plug in their own [`SecurityManager`].
#[derive(Debug)]
pub struct HeaderKeySecurityManager {
    header: String,
    key: String,
}

impl HeaderKeySecurityManager {
    pub fn new(header: &str, key: &str) -> Self {
        Self {
            header: header.to_string(),
            key: key.to_string(),
        }
    }
}

impl SecurityManager for HeaderKeySecurityManager {
    fn authenticate(
        &self,
        req: &mut HttpRequest,
        _res: &mut HttpResponse,
    ) -> Result<AuthOutcome, ServletError> {
        match req.header(&self.header) {
            Some(value) if value == self.key => Ok(AuthOutcome::Continue),
            _ => {
                debug!(request_id = %req.id, header = %self.header, "Key authentication failed");
                Ok(AuthOutcome::Denied(401))
            }
        }
    }
}
