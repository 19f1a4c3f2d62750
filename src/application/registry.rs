use std::collections::HashMap;
use std::sync::Arc;

use crate::application::hooks::Hooks;
use crate::application::service::Service;

#[derive(Clone)]
pub struct ServiceEntry {
    pub path: String,
    pub service: Arc<dyn Service>,
    pub hooks: Hooks,
}

/// Mounted services keyed by normalized path, in mount order.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    entries: HashMap<String, ServiceEntry>,
    order: Vec<String>,
}

pub fn normalize_path(path: &str) -> String {
    path.trim_matches('/').to_string()
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mounts `service` at `path`. Returns `false` if the path is already taken.
    pub fn insert(&mut self, path: &str, service: Arc<dyn Service>, hooks: Hooks) -> bool {
        let path = normalize_path(path);
        if path.is_empty() || self.entries.contains_key(&path) {
            return false;
        }
        self.order.push(path.clone());
        self.entries.insert(
            path.clone(),
            ServiceEntry {
                path,
                service,
                hooks,
            },
        );
        true
    }

    pub fn lookup(&self, path: &str) -> Option<&ServiceEntry> {
        self.entries.get(&normalize_path(path))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lookup(path).is_some()
    }

    pub fn paths(&self) -> &[String] {
        &self.order
    }
}
