//! In-memory app catalog
//!
//! Written rarely (startup, folder events) and read on every session
//! request, so a shared-read / exclusive-write lock is enough.

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::RwLock;

use super::descriptor::{AppDescriptor, AppKey};

/// Catalog of installable app versions keyed by `basePackage:version`
#[derive(Debug, Default)]
pub struct AppRegistry {
    apps: RwLock<BTreeMap<AppKey, AppDescriptor>>,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor, replacing any previous one with the same key
    pub fn register(&self, app: AppDescriptor) -> AppKey {
        let key = app.key();
        let previous = self.apps.write().insert(key.clone(), app);

        if previous.is_some() {
            tracing::info!(app = %key, "App re-registered, previous descriptor replaced");
        } else {
            tracing::info!(app = %key, "App registered");
        }

        key
    }

    /// Remove every descriptor whose binary lives at `path`
    pub fn unregister(&self, path: &Path) -> Vec<AppKey> {
        let mut apps = self.apps.write();
        let removed: Vec<AppKey> = apps
            .iter()
            .filter(|(_, app)| app.source_path == path)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &removed {
            apps.remove(key);
            tracing::info!(app = %key, path = %path.display(), "App unregistered");
        }

        removed
    }

    /// Resolve a requested app identifier to a catalog key
    ///
    /// - with an explicit launch activity the identifier is returned as-is
    /// - a `package:version` identifier must exist exactly
    /// - a bare package resolves to the greatest matching key by plain
    ///   string ordering, so `a:2` sorts after `a:10`
    pub fn resolve(&self, requested: &str, launch_activity_given: bool) -> Option<AppKey> {
        let requested = AppKey::new(requested);

        if launch_activity_given {
            return Some(requested);
        }

        let apps = self.apps.read();

        if requested.has_version() {
            return apps.contains_key(&requested).then_some(requested);
        }

        apps.keys()
            .filter(|key| key.package() == requested.as_str())
            .max()
            .cloned()
    }

    /// Whether any catalog entry came from this file
    pub fn contains_path(&self, path: &Path) -> bool {
        self.apps.read().values().any(|app| app.source_path == path)
    }

    /// Look up a descriptor by exact key
    pub fn get(&self, key: &AppKey) -> Option<AppDescriptor> {
        self.apps.read().get(key).cloned()
    }

    /// All catalog keys in key order
    pub fn keys(&self) -> Vec<AppKey> {
        self.apps.read().keys().cloned().collect()
    }

    /// All descriptors in key order
    pub fn all(&self) -> Vec<AppDescriptor> {
        self.apps.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.apps.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.read().is_empty()
    }
}
