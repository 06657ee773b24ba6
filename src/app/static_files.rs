use super::{HttpServlet, ServletError};
use crate::http::{HttpRequest, HttpResponse};
use crate::resource::ResourceManager;
use tracing::trace;

/// Serves static content from an application's layered resources. Mounted on
/// the default pattern `/` it answers whatever no other servlet claimed.
#[derive(Debug)]
pub struct StaticResourceServlet {
    resources: ResourceManager,
    welcome_file: String,
}

impl StaticResourceServlet {
    pub fn new(resources: ResourceManager) -> Self {
        Self {
            resources,
            welcome_file: "index.html".to_string(),
        }
    }

    pub fn with_welcome_file(mut self, name: &str) -> Self {
        self.welcome_file = name.to_string();
        self
    }

    fn content_type(path: &str) -> &'static str {
        match path.rsplit('.').next().unwrap_or("").to_lowercase().as_str() {
            "html" => "text/html",
            "css" => "text/css",
            "js" => "application/javascript",
            "json" => "application/json",
            "txt" => "text/plain",
            "png" => "image/png",
            "svg" => "image/svg+xml",
            _ => "application/octet-stream",
        }
    }

    /// Resolve `path` against the layered resources, falling back to the
    /// `META-INF/resources` overlay that library jars contribute.
    fn lookup(&self, path: &str) -> Option<(String, Vec<u8>)> {
        let rel = path.trim_start_matches('/');
        let candidate = if rel.is_empty() || rel.ends_with('/') {
            format!("{rel}{}", self.welcome_file)
        } else {
            rel.to_string()
        };
        if let Some(bytes) = self.resources.read(&candidate).ok().flatten() {
            return Some((candidate, bytes));
        }
        let overlay = format!("META-INF/resources/{candidate}");
        let bytes = self.resources.read(&overlay).ok().flatten()?;
        Some((overlay, bytes))
    }
}

impl HttpServlet for StaticResourceServlet {
    fn service(&self, req: &mut HttpRequest, res: &mut HttpResponse) -> Result<(), ServletError> {
        let path = if req.servlet_path().is_empty() {
            req.path()
        } else {
            req.servlet_path()
        };
        match self.lookup(path) {
            Some((resolved, bytes)) => {
                trace!(path = %resolved, bytes = bytes.len(), "Static resource served");
                res.set_status(200);
                res.set_header("Content-Type", Self::content_type(&resolved));
                res.write(&bytes);
            }
            None => res.send_error(404),
        }
        Ok(())
    }
}
