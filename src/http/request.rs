use super::HeaderVec;
use crate::dispatch::async_support::{AsyncCell, AsyncContext};
use crate::ids::RequestId;
use http::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A single in-flight HTTP request as seen by filters and servlets.
#[derive(Debug)]
pub struct HttpRequest {
    pub id: RequestId,
    pub method: Method,
    path: String,
    query: Option<String>,
    /// Query parameters in raw order; lookups are last-write-wins.
    pub query_params: Vec<(String, String)>,
    pub headers: HeaderVec,
    pub cookies: HeaderVec,
    pub body: Vec<u8>,
    attributes: HashMap<String, Value>,
    context_path: String,
    servlet_path: String,
    path_info: Option<String>,
    pub(crate) async_cell: Option<Arc<AsyncCell>>,
}

impl HttpRequest {
    /// Build a request from a method and raw path (query string included).
    pub fn new(method: Method, raw_path: &str) -> Self {
        let (path, query) = match raw_path.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (raw_path.to_string(), None),
        };
        let query_params = query
            .as_deref()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            id: RequestId::new(),
            method,
            path,
            query,
            query_params,
            headers: HeaderVec::new(),
            cookies: HeaderVec::new(),
            body: Vec::new(),
            attributes: HashMap::new(),
            context_path: String::new(),
            servlet_path: String::new(),
            path_info: None,
            async_cell: None,
        }
    }

    /// Full request path, context path included, query string excluded.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Header lookup, case-insensitive per RFC 7230.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push((Arc::from(name), value.to_string()));
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Last-write-wins query parameter lookup.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query_params
            .iter()
            .rfind(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn set_attribute(&mut self, name: &str, value: Value) {
        self.attributes.insert(name.to_string(), value);
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<Value> {
        self.attributes.remove(name)
    }

    /// Context path of the owning application (`""` for a root mount).
    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    /// Path of the matched servlet mapping, relative to the context path.
    pub fn servlet_path(&self) -> &str {
        &self.servlet_path
    }

    /// Remainder of the path after the servlet path for prefix mappings.
    pub fn path_info(&self) -> Option<&str> {
        self.path_info.as_deref()
    }

    pub(crate) fn set_dispatch_paths(
        &mut self,
        context_path: &str,
        servlet_path: &str,
        path_info: Option<String>,
    ) {
        self.context_path = context_path.to_string();
        self.servlet_path = servlet_path.to_string();
        self.path_info = path_info;
    }

    /// Copy of this request aimed at another path, used for internal
    /// re-dispatch. Attributes, headers, cookies and body carry over; the
    /// async slot does not.
    pub(crate) fn for_dispatch(&self, raw_path: &str) -> HttpRequest {
        let mut next = HttpRequest::new(self.method.clone(), raw_path);
        next.id = self.id;
        next.headers = self.headers.clone();
        next.cookies = self.cookies.clone();
        next.body = self.body.clone();
        next.attributes = self.attributes.clone();
        next
    }

    /// Begin async processing. Only available when the engine attached an
    /// async slot, i.e. the matched servlet's registration declares
    /// `async_supported`. The returned context may be moved to another
    /// thread; the original thread must not touch the response afterwards.
    pub fn start_async(&mut self) -> Option<AsyncContext> {
        let cell = self.async_cell.as_ref()?;
        cell.mark_started();
        Some(AsyncContext::new(Arc::clone(cell)))
    }

    pub(crate) fn async_started(&self) -> bool {
        self.async_cell
            .as_ref()
            .map(|c| c.started())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_query_and_decodes_params() {
        let req = HttpRequest::new(Method::GET, "/shop/items?limit=10&limit=20&q=a%20b");
        assert_eq!(req.path(), "/shop/items");
        assert_eq!(req.query(), Some("limit=10&limit=20&q=a%20b"));
        // Last write wins on duplicates.
        assert_eq!(req.query_param("limit"), Some("20"));
        assert_eq!(req.query_param("q"), Some("a b"));
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut req = HttpRequest::new(Method::GET, "/");
        req.add_header("Content-Type", "text/plain");
        assert_eq!(req.header("content-type"), Some("text/plain"));
        assert_eq!(req.header("CONTENT-TYPE"), Some("text/plain"));
        assert_eq!(req.header("accept"), None);
    }

    #[test]
    fn attributes_are_request_scoped_key_values() {
        let mut req = HttpRequest::new(Method::GET, "/");
        req.set_attribute("k", serde_json::json!(1));
        assert_eq!(req.attribute("k"), Some(&serde_json::json!(1)));
        assert_eq!(req.remove_attribute("k"), Some(serde_json::json!(1)));
        assert!(req.attribute("k").is_none());
    }

    #[test]
    fn start_async_requires_engine_slot() {
        let mut req = HttpRequest::new(Method::GET, "/");
        assert!(req.start_async().is_none());
        assert!(!req.async_started());
    }
}
