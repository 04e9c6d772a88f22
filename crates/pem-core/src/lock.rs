//! # Keyed Locks
//!
//! Mutations are serialized per key: one artifact version, one data
//! registration version, or one environment name. Readers never take these
//! locks; they tolerate torn intermediate states instead.
//!
//! Key formats used across the workspace:
//!
//! | Key                                  | Held by                          |
//! |--------------------------------------|----------------------------------|
//! | `module:<name>@<version>`            | module deploy, purge, env copy   |
//! | `data:<name>@<axis>/<version>`       | data register and purge          |
//! | `env:<name>`                         | environment deploy, destroy      |

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{ArcMutexGuard, Mutex, RawMutex};

/// Entries above this count trigger pruning of idle keys.
const PRUNE_THRESHOLD: usize = 256;

/// A set of named mutexes created on demand.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Exclusive hold on one key. Released on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct KeyGuard {
    key: String,
    _guard: ArcMutexGuard<RawMutex, ()>,
}

impl std::fmt::Debug for KeyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyGuard").field("key", &self.key).finish()
    }
}

impl KeyGuard {
    /// The key this guard holds.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl KeyedLocks {
    /// An empty lock set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `key` is free, then hold it.
    ///
    /// Locks are not reentrant: taking the same key twice on one thread
    /// deadlocks.
    pub fn lock(&self, key: impl Into<String>) -> KeyGuard {
        let key = key.into();
        let slot = {
            let mut slots = self.slots.lock();
            if slots.len() > PRUNE_THRESHOLD {
                slots.retain(|_, m| Arc::strong_count(m) > 1);
            }
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        tracing::trace!(key = %key, "acquiring keyed lock");
        let guard = slot.lock_arc();
        KeyGuard { key, _guard: guard }
    }

    /// Hold `key` only if nobody else does.
    pub fn try_lock(&self, key: impl Into<String>) -> Option<KeyGuard> {
        let key = key.into();
        let slot = Arc::clone(self.slots.lock().entry(key.clone()).or_default());
        let guard = slot.try_lock_arc()?;
        Some(KeyGuard { key, _guard: guard })
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Whether no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lock key for one module version.
pub fn module_key(name: &str, version: &str) -> String {
    format!("module:{name}@{version}")
}

/// Lock key for one data registration version on an axis (`git/<branch>`
/// or `upload`).
pub fn data_key(name: &str, axis: &str, version: &str) -> String {
    format!("data:{name}@{axis}/{version}")
}

/// Lock key for one environment.
pub fn env_key(name: &str) -> String {
    format!("env:{name}")
}
