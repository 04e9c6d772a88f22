//! Which environments reference a module version.

use serde::Serialize;

use pem_core::ArtifactName;

use crate::index::EnvSnapshot;

/// Result of a usage check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Usage {
    /// Whether any environment references the version.
    pub in_use: bool,
    /// Environments referencing it, sorted.
    pub environments: Vec<String>,
}

/// Find environments holding `name` at exactly `version`.
///
/// `name` may be friendly (`ntp`) or full (`acme-ntp`). A full name matches
/// entries whose recorded full name is equal; entries without a recorded
/// full name (placed by other tools) match on the friendly part.
pub fn find_usage(snapshot: &EnvSnapshot, name: &str, version: &str) -> Usage {
    let full = ArtifactName::new(name).ok();
    let environments: Vec<String> = snapshot
        .iter()
        .filter(|(_, modules)| {
            modules.iter().any(|(friendly, entry)| {
                if entry.version != version {
                    return false;
                }
                match (&full, &entry.full_name) {
                    (Some(full), Some(recorded)) => recorded == full.as_str(),
                    (Some(full), None) => friendly == full.friendly(),
                    (None, _) => friendly == name,
                }
            })
        })
        .map(|(env, _)| env.clone())
        .collect();
    Usage {
        in_use: !environments.is_empty(),
        environments,
    }
}
