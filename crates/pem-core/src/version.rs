//! # Version Records
//!
//! A [`VersionRecord`] is the immutable descriptor of one materialized
//! artifact version. It is built only from a sidecar that was written after
//! the content was complete, and it is never mutated: redeploying a version
//! purges the directory and writes a fresh record.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PemError, Result};
use crate::identity::{ArtifactName, Version};
use crate::sidecar;

/// Base of the public registry web pages, used to synthesize locators for
/// registry-sourced versions.
pub const FORGE_WEB_URL: &str = "https://forge.puppet.com";

/// Locator recorded for uploads that came without one.
pub const UPLOAD_SOURCE: &str = "Upload";

/// How a version's bytes were obtained.
///
/// Serialized with the on-disk names (`forge`, `git`, `upload`) so sidecars
/// written by earlier tooling stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceType {
    /// Release archive fetched from the module registry.
    #[serde(rename = "forge", alias = "registry")]
    Registry,
    /// Cloned from a version-control remote.
    #[serde(rename = "git", alias = "vcs")]
    Vcs,
    /// Archive supplied by the caller.
    #[serde(rename = "upload")]
    Upload,
}

impl SourceType {
    /// The on-disk tag for this source type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registry => "forge",
            Self::Vcs => "git",
            Self::Upload => "upload",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceType {
    type Err = PemError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "forge" | "registry" => Ok(Self::Registry),
            "git" | "vcs" => Ok(Self::Vcs),
            "upload" => Ok(Self::Upload),
            _ => Err(PemError::invalid_name(
                "source type",
                s,
                "expected forge, git, or upload",
            )),
        }
    }
}

/// Descriptor of one deployed artifact version.
///
/// The serialized form is the `.pemversion` sidecar in the version
/// directory. Field names match that file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Version string.
    pub version: Version,
    /// Directory holding the materialized content.
    pub location: PathBuf,
    /// Provenance.
    #[serde(rename = "type")]
    pub source_type: SourceType,
    /// Where the bytes came from: a registry page, a clone URL, or
    /// [`UPLOAD_SOURCE`].
    #[serde(rename = "source")]
    pub source_locator: String,
}

impl VersionRecord {
    /// Build the record for a freshly materialized version.
    ///
    /// Registry locators are synthesized from the name; uploads without a
    /// locator get the [`UPLOAD_SOURCE`] sentinel.
    pub fn new(
        name: &ArtifactName,
        version: Version,
        location: PathBuf,
        source_type: SourceType,
        locator: Option<&str>,
    ) -> Self {
        let source_locator = match (source_type, locator) {
            (SourceType::Registry, _) => registry_locator(name),
            (_, Some(l)) if !l.is_empty() => l.to_string(),
            (SourceType::Upload, _) => UPLOAD_SOURCE.to_string(),
            (SourceType::Vcs, _) => String::new(),
        };
        Self {
            version,
            location,
            source_type,
            source_locator,
        }
    }

    /// Write this record as the sidecar of its version directory.
    pub fn write(&self) -> Result<()> {
        sidecar::write_yaml(&self.location, self)
    }

    /// Read the record from a version directory.
    ///
    /// Returns `Ok(None)` when no sidecar exists (the version is incomplete
    /// or foreign) and [`PemError::CorruptSidecar`] when it does not parse.
    pub fn read(dir: &Path) -> Result<Option<Self>> {
        sidecar::read_yaml(dir)
    }
}

/// Canonical registry page for an artifact.
pub fn registry_locator(name: &ArtifactName) -> String {
    format!("{FORGE_WEB_URL}/{}/{}", name.author(), name.friendly())
}
