use super::SessionManager;
use crate::http::{attrs, HttpRequest, HttpResponse};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;
use ulid::Ulid;

/// Cookie carrying the session id.
pub const SESSION_COOKIE: &str = "CARIBESESSION";

/// In-memory session store keyed by a ULID session id.
///
/// Sessions live for the life of the application; invalidation removes them
/// eagerly. A presented cookie whose session no longer exists is treated as
/// absent and a fresh session is created.
#[derive(Debug, Default)]
pub struct InMemorySessionManager {
    sessions: DashMap<String, HashMap<String, Value>>,
}

impl InMemorySessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl SessionManager for InMemorySessionManager {
    fn lookup_or_create(&self, req: &mut HttpRequest, res: &mut HttpResponse) -> String {
        if let Some(id) = req.cookie(SESSION_COOKIE) {
            if self.sessions.contains_key(id) {
                let id = id.to_string();
                req.set_attribute(attrs::SESSION_ID, Value::String(id.clone()));
                return id;
            }
        }

        let id = Ulid::new().to_string();
        self.sessions.insert(id.clone(), HashMap::new());
        res.add_header(
            "Set-Cookie",
            &format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly"),
        );
        req.set_attribute(attrs::SESSION_ID, Value::String(id.clone()));
        debug!(session_id = %id, "Session created");
        id
    }

    fn get(&self, session_id: &str, key: &str) -> Option<Value> {
        self.sessions
            .get(session_id)
            .and_then(|s| s.get(key).cloned())
    }

    fn put(&self, session_id: &str, key: &str, value: Value) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.insert(key.to_string(), value);
        }
    }

    fn invalidate(&self, session_id: &str) {
        if self.sessions.remove(session_id).is_some() {
            debug!(session_id = %session_id, "Session invalidated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use serde_json::json;

    #[test]
    fn creates_session_and_sets_cookie() {
        let mgr = InMemorySessionManager::new();
        let mut req = HttpRequest::new(Method::GET, "/");
        let mut res = HttpResponse::new();

        let id = mgr.lookup_or_create(&mut req, &mut res);
        assert_eq!(mgr.session_count(), 1);
        let cookie = res.header("Set-Cookie").unwrap();
        assert!(cookie.starts_with(&format!("{SESSION_COOKIE}={id}")));
        assert_eq!(req.attribute(attrs::SESSION_ID), Some(&json!(id)));
    }

    #[test]
    fn reuses_presented_session() {
        let mgr = InMemorySessionManager::new();
        let mut req = HttpRequest::new(Method::GET, "/");
        let mut res = HttpResponse::new();
        let id = mgr.lookup_or_create(&mut req, &mut res);
        mgr.put(&id, "user", json!("ada"));

        let mut second = HttpRequest::new(Method::GET, "/");
        second.cookies.push(("CARIBESESSION".into(), id.clone()));
        let mut res2 = HttpResponse::new();
        let same = mgr.lookup_or_create(&mut second, &mut res2);
        assert_eq!(same, id);
        // No new cookie for a live session.
        assert!(res2.header("Set-Cookie").is_none());
        assert_eq!(mgr.get(&id, "user"), Some(json!("ada")));
    }

    #[test]
    fn invalidated_session_is_replaced() {
        let mgr = InMemorySessionManager::new();
        let mut req = HttpRequest::new(Method::GET, "/");
        let mut res = HttpResponse::new();
        let id = mgr.lookup_or_create(&mut req, &mut res);
        mgr.invalidate(&id);
        assert!(mgr.get(&id, "anything").is_none());

        let mut stale = HttpRequest::new(Method::GET, "/");
        stale.cookies.push(("CARIBESESSION".into(), id.clone()));
        let mut res2 = HttpResponse::new();
        let fresh = mgr.lookup_or_create(&mut stale, &mut res2);
        assert_ne!(fresh, id);
        assert!(res2.header("Set-Cookie").is_some());
    }
}
