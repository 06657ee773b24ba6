use super::NamingManager;
use dashmap::DashMap;
use serde_json::Value;

/// Flat in-memory name-to-value bindings, scoped to one application.
#[derive(Debug, Default)]
pub struct InMemoryNamingManager {
    bindings: DashMap<String, Value>,
}

impl InMemoryNamingManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NamingManager for InMemoryNamingManager {
    fn bind(&self, name: &str, value: Value) {
        self.bindings.insert(name.to_string(), value);
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        self.bindings.get(name).map(|v| v.clone())
    }

    fn unbind(&self, name: &str) -> Option<Value> {
        self.bindings.remove(name).map(|(_, v)| v)
    }
}
