//! # Environment Index
//!
//! A cached snapshot of every environment's module map. The snapshot is
//! replaced wholesale by [`EnvIndex::replace`]; there is no incremental
//! update. Readers get a clone and never hold the lock while working.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::Serialize;

/// One module deployed in an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleEntry {
    /// Deployed version.
    pub version: String,
    /// Full `author-name`, when known. Modules placed by other tools only
    /// have their directory name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    /// Whether the version came from a legacy probe instead of a sidecar.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub legacy: bool,
}

/// Friendly module name → version.
pub type ModuleMap = BTreeMap<String, String>;

/// Environment name → friendly module name → entry.
pub type EnvSnapshot = BTreeMap<String, BTreeMap<String, ModuleEntry>>;

/// Project detailed entries down to friendly name → version.
pub fn to_module_map(entries: &BTreeMap<String, ModuleEntry>) -> ModuleMap {
    entries
        .iter()
        .map(|(k, e)| (k.clone(), e.version.clone()))
        .collect()
}

/// The cached snapshot.
#[derive(Debug, Default)]
pub struct EnvIndex {
    snapshot: RwLock<EnvSnapshot>,
}

impl EnvIndex {
    /// An empty index. Call the owner's refresh before reading.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot.
    pub fn replace(&self, snapshot: EnvSnapshot) {
        *self.snapshot.write() = snapshot;
    }

    /// A copy of the whole snapshot.
    pub fn snapshot(&self) -> EnvSnapshot {
        self.snapshot.read().clone()
    }

    /// Names of every indexed environment, sorted.
    pub fn names(&self) -> Vec<String> {
        self.snapshot.read().keys().cloned().collect()
    }

    /// Module map of one environment.
    pub fn modules(&self, env: &str) -> Option<ModuleMap> {
        self.snapshot.read().get(env).map(to_module_map)
    }

    /// Every environment's module map.
    pub fn module_maps(&self) -> BTreeMap<String, ModuleMap> {
        self.snapshot
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), to_module_map(v)))
            .collect()
    }
}
