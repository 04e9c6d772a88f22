//! # Module Store
//!
//! `modules/<author-name>/<version>/` holds one materialized module version
//! per directory. A version exists if and only if its `.pemversion` sidecar
//! parses; the sidecar is written after the content is complete.
//!
//! ## Deploy
//!
//! 1. Validate the name and version (nothing is created on failure).
//! 2. Take the `module:<name>@<version>` lock.
//! 3. Purge any existing directory for the version.
//! 4. Run the materialization strategy for the source.
//! 5. Write the sidecar.
//!
//! A failure in step 4 removes the partial directory on a best-effort basis;
//! with no sidecar it is never listed either way.
//!
//! ## Multi-version deploys
//!
//! [`ModuleStore::deploy_many`] continues after a failed version and reports
//! one outcome per requested version.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pem_core::fsutil::{remove_dir_all_idempotent, visible_subdirs};
use pem_core::lock::module_key;
use pem_core::{ArtifactName, KeyedLocks, PemError, Result, Version, VersionRecord};

use crate::fetch::ArchiveFetcher;
use crate::materialize::{Materializer, ModuleSource};
use crate::vcs::VcsClient;

/// Versions of one module, keyed by version string.
pub type VersionMap = BTreeMap<String, VersionRecord>;

/// The on-disk module repository.
pub struct ModuleStore {
    root: PathBuf,
    fetcher: Arc<dyn ArchiveFetcher>,
    vcs: Arc<dyn VcsClient>,
    locks: Arc<KeyedLocks>,
}

impl std::fmt::Debug for ModuleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleStore").field("root", &self.root).finish_non_exhaustive()
    }
}

/// Per-version outcomes of a multi-version deploy.
#[derive(Debug)]
pub struct DeployReport {
    /// Module name as requested.
    pub name: String,
    /// One entry per requested version, in request order.
    pub outcomes: Vec<(String, Result<VersionRecord>)>,
}

impl DeployReport {
    /// Whether every version deployed.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|(_, r)| r.is_ok())
    }

    /// Records of the versions that deployed.
    pub fn deployed(&self) -> impl Iterator<Item = &VersionRecord> {
        self.outcomes.iter().filter_map(|(_, r)| r.as_ref().ok())
    }

    /// Versions that failed, with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &PemError)> {
        self.outcomes
            .iter()
            .filter_map(|(v, r)| r.as_ref().err().map(|e| (v.as_str(), e)))
    }
}

impl ModuleStore {
    /// A store rooted at `root` (usually `<basedir>/modules`).
    pub fn new(
        root: impl Into<PathBuf>,
        fetcher: Arc<dyn ArchiveFetcher>,
        vcs: Arc<dyn VcsClient>,
        locks: Arc<KeyedLocks>,
    ) -> Self {
        Self {
            root: root.into(),
            fetcher,
            vcs,
            locks,
        }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory a version lives in, whether or not it exists.
    pub fn version_dir(&self, name: &ArtifactName, version: &Version) -> PathBuf {
        self.root.join(name.as_str()).join(version.as_str())
    }

    /// Deploy one version, replacing any existing copy of it.
    #[tracing::instrument(skip(self, source), fields(kind = %source.source_type()))]
    pub fn deploy(&self, name: &str, version: &str, source: &ModuleSource) -> Result<VersionRecord> {
        let name = ArtifactName::new(name)?;
        let version = Version::new(version)?;
        let _guard = self.locks.lock(module_key(name.as_str(), version.as_str()));

        let dir = self.version_dir(&name, &version);
        if remove_dir_all_idempotent(&dir)? {
            tracing::info!(dir = %dir.display(), "purged existing version before redeploy");
        }
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| PemError::io(format!("creating {}", parent.display()), e))?;
        }

        let materializer = Materializer::new(self.fetcher.as_ref(), self.vcs.as_ref());
        if let Err(e) = materializer.materialize(source, &name, &version, &dir) {
            tracing::error!(error = %e, "materialization failed");
            if let Err(cleanup) = remove_dir_all_idempotent(&dir) {
                tracing::warn!(error = %cleanup, dir = %dir.display(), "could not remove partial version");
            }
            return Err(e);
        }

        let record = VersionRecord::new(&name, version, dir, source.source_type(), source.locator());
        record.write()?;
        tracing::info!(location = %record.location.display(), "module version deployed");
        Ok(record)
    }

    /// Deploy several versions of one module from the same source.
    ///
    /// Every version is attempted; a failure does not stop the rest.
    pub fn deploy_many(&self, name: &str, versions: &[String], source: &ModuleSource) -> DeployReport {
        let outcomes = versions
            .iter()
            .map(|v| (v.clone(), self.deploy(name, v, source)))
            .collect();
        DeployReport {
            name: name.to_string(),
            outcomes,
        }
    }

    /// Remove a version. Removing an absent version succeeds and returns
    /// `false`.
    pub fn purge(&self, name: &str, version: &str) -> Result<bool> {
        self.purge_guarded(name, version, |_, _| Ok(()))
    }

    /// Remove a version after `precondition` passes, with the version lock
    /// held across both.
    #[tracing::instrument(skip(self, precondition))]
    pub fn purge_guarded<F>(&self, name: &str, version: &str, precondition: F) -> Result<bool>
    where
        F: FnOnce(&ArtifactName, &Version) -> Result<()>,
    {
        let name = ArtifactName::new(name)?;
        let version = Version::new(version)?;
        let _guard = self.locks.lock(module_key(name.as_str(), version.as_str()));
        precondition(&name, &version)?;

        let dir = self.version_dir(&name, &version);
        let removed = remove_dir_all_idempotent(&dir)?;
        if removed {
            tracing::info!(dir = %dir.display(), "module version purged");
            remove_if_empty(&self.root.join(name.as_str()));
        } else {
            tracing::debug!("version absent; nothing to purge");
        }
        Ok(removed)
    }

    /// The record of one version, if it is complete.
    pub fn get(&self, name: &ArtifactName, version: &Version) -> Option<VersionRecord> {
        let dir = self.version_dir(name, version);
        match VersionRecord::read(&dir) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable version");
                None
            }
        }
    }

    /// Run `f` on a version's record while holding its lock, so the version
    /// cannot be purged or redeployed underneath the caller.
    pub fn with_version<T>(
        &self,
        name: &ArtifactName,
        version: &Version,
        f: impl FnOnce(&VersionRecord) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.locks.lock(module_key(name.as_str(), version.as_str()));
        let record = self.get(name, version).ok_or_else(|| PemError::UnknownArtifact {
            name: name.to_string(),
            version: version.to_string(),
            reason: "version is not deployed".into(),
        })?;
        f(&record)
    }

    /// All complete versions of `name`.
    pub fn list_versions(&self, name: &ArtifactName) -> Result<VersionMap> {
        let mut out = VersionMap::new();
        for (dir_name, path) in visible_subdirs(&self.root.join(name.as_str()))? {
            match VersionRecord::read(&path) {
                Ok(Some(record)) => {
                    out.insert(record.version.to_string(), record);
                }
                Ok(None) => {
                    tracing::warn!(module = %name, version = %dir_name, "skipping version without sidecar");
                }
                Err(e) => {
                    tracing::warn!(module = %name, version = %dir_name, error = %e, "skipping version with corrupt sidecar");
                }
            }
        }
        Ok(out)
    }

    /// Every module with at least one complete version.
    pub fn list_all(&self) -> Result<BTreeMap<String, VersionMap>> {
        let mut out = BTreeMap::new();
        for (dir_name, _) in visible_subdirs(&self.root)? {
            let Ok(name) = ArtifactName::new(dir_name.as_str()) else {
                tracing::warn!(dir = %dir_name, "skipping directory with invalid module name");
                continue;
            };
            let versions = self.list_versions(&name)?;
            if !versions.is_empty() {
                out.insert(dir_name, versions);
            }
        }
        Ok(out)
    }

    /// Resolve a full or friendly module name to the artifact holding
    /// `version`.
    ///
    /// A valid `author-name` is used as is. Otherwise the one module whose
    /// friendly name matches and which holds the version is chosen; none or
    /// several is [`PemError::UnknownArtifact`].
    pub fn resolve(&self, key: &str, version: &Version) -> Result<(ArtifactName, VersionRecord)> {
        let unknown = |reason: String| PemError::UnknownArtifact {
            name: key.to_string(),
            version: version.to_string(),
            reason,
        };

        if let Ok(name) = ArtifactName::new(key) {
            return match self.get(&name, version) {
                Some(record) => Ok((name, record)),
                None => Err(unknown("version is not deployed".into())),
            };
        }

        let mut matches = Vec::new();
        for (dir_name, _) in visible_subdirs(&self.root)? {
            let Ok(name) = ArtifactName::new(dir_name.as_str()) else { continue };
            if name.friendly() != key {
                continue;
            }
            if let Some(record) = self.get(&name, version) {
                matches.push((name, record));
            }
        }
        match matches.len() {
            0 => Err(unknown("no module with that name holds the version".into())),
            1 => Ok(matches.remove(0)),
            _ => Err(unknown(format!(
                "ambiguous friendly name; candidates: {}",
                matches
                    .iter()
                    .map(|(n, _)| n.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

/// Drop a module directory once its last version is gone.
///
/// A concurrent deploy may repopulate it at any time, so failures are logged
/// and otherwise ignored.
fn remove_if_empty(dir: &Path) {
    let empty = match fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "cannot list module directory");
            return;
        }
    };
    if !empty {
        return;
    }
    match fs::remove_dir(dir) {
        Ok(()) => tracing::debug!(dir = %dir.display(), "empty module directory removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::debug!(dir = %dir.display(), error = %e, "module directory kept"),
    }
}
