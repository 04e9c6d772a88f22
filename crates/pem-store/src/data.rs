//! # Data Registrations
//!
//! Data registrations are versioned trees of data (typically Hiera) that
//! environments mount but never copy. Two axes:
//!
//! - `data/git/<name>/<branch>/<commit>/`: a branch of a remote repository,
//!   keyed by the commit the branch pointed at when registered.
//! - `data/upload/<name>/<version>/`: an uploaded archive under a
//!   caller-assigned version.
//!
//! Registering a branch whose remote head is already present is a no-op; the
//! remote is queried before anything is cloned.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use pem_core::fsutil::{remove_dir_all_idempotent, visible_subdirs};
use pem_core::identity::validate_segment;
use pem_core::lock::data_key;
use pem_core::sidecar::{read_yaml, write_yaml};
use pem_core::{
    ArtifactName, DataSidecar, KeyedLocks, PemError, Result, SourceType, Version, UPLOAD_SOURCE,
};

use crate::archive;
use crate::vcs::VcsClient;

/// Every version of one registration, on both axes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DataEntry {
    /// branch → commit → sidecar.
    pub branches: BTreeMap<String, BTreeMap<String, DataSidecar>>,
    /// version → sidecar.
    pub uploads: BTreeMap<String, DataSidecar>,
}

/// The on-disk data repository.
pub struct DataRegistry {
    root: PathBuf,
    vcs: Arc<dyn VcsClient>,
    locks: Arc<KeyedLocks>,
}

impl std::fmt::Debug for DataRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataRegistry").field("root", &self.root).finish_non_exhaustive()
    }
}

fn require<'a>(value: Option<&'a str>, what: &str) -> Result<&'a str> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| PemError::MissingInput(format!("{what} is required")))
}

impl DataRegistry {
    /// A registry rooted at `root` (usually `<basedir>/data`).
    pub fn new(root: impl Into<PathBuf>, vcs: Arc<dyn VcsClient>, locks: Arc<KeyedLocks>) -> Self {
        Self {
            root: root.into(),
            vcs,
            locks,
        }
    }

    fn git_root(&self) -> PathBuf {
        self.root.join("git")
    }

    fn upload_root(&self) -> PathBuf {
        self.root.join("upload")
    }

    /// Register the current head of `branch` on `source`.
    ///
    /// Returns the sidecar of the registered commit. When that commit is
    /// already registered nothing is cloned and the existing sidecar is
    /// returned.
    #[tracing::instrument(skip(self))]
    pub fn register_git(
        &self,
        name: &str,
        source: &str,
        branch: Option<&str>,
        prefix: Option<&str>,
    ) -> Result<DataSidecar> {
        let name = ArtifactName::new(name)?;
        let source = require(Some(source), "source URL")?;
        let branch = require(branch, "branch")?;
        validate_segment("branch", branch)?;

        let branch_dir = self.git_root().join(name.as_str()).join(branch);
        if let Some(head) = self.vcs.remote_branch_head(source, branch)? {
            if let Ok(Some(existing)) = read_yaml::<DataSidecar>(&branch_dir.join(&head)) {
                tracing::info!(commit = %head, "commit already registered; skipping clone");
                return Ok(existing);
            }
        } else {
            return Err(PemError::Checkout(format!("branch {branch} not found on {source}")));
        }

        fs::create_dir_all(&branch_dir)
            .map_err(|e| PemError::io(format!("creating {}", branch_dir.display()), e))?;
        let staging = branch_dir.join(format!(".staging-{}", uuid::Uuid::new_v4().simple()));
        let result = self.clone_branch(source, branch, &staging);
        let commit = match result {
            Ok(commit) => commit,
            Err(e) => {
                let _ = remove_dir_all_idempotent(&staging);
                return Err(e);
            }
        };
        let commit = Version::new(commit)?;

        let _guard = self
            .locks
            .lock(data_key(name.as_str(), &format!("git/{branch}"), commit.as_str()));
        let dest = branch_dir.join(commit.as_str());
        // Another registration may have installed this commit during the clone.
        match read_yaml::<DataSidecar>(&dest) {
            Ok(Some(existing)) => {
                remove_dir_all_idempotent(&staging)?;
                tracing::info!(commit = %commit, "commit registered concurrently; keeping existing copy");
                return Ok(existing);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "replacing registration with unreadable sidecar"),
        }
        remove_dir_all_idempotent(&dest)?;
        fs::rename(&staging, &dest).map_err(|e| {
            let _ = remove_dir_all_idempotent(&staging);
            PemError::io(format!("installing {}", dest.display()), e)
        })?;

        let sidecar = DataSidecar {
            version: commit.to_string(),
            location: dest.clone(),
            source_type: SourceType::Vcs,
            source: source.to_string(),
            branch: Some(branch.to_string()),
            prefix: prefix.map(str::to_string),
        };
        write_yaml(&dest, &sidecar)?;
        tracing::info!(commit = %commit, location = %dest.display(), "data registered from git");
        Ok(sidecar)
    }

    fn clone_branch(&self, source: &str, branch: &str, dest: &Path) -> Result<String> {
        let handle = self.vcs.clone_at(source, dest)?;
        self.vcs.checkout(&handle, branch)?;
        self.vcs.head_commit(&handle)
    }

    /// Register an uploaded archive under a caller-assigned version.
    #[tracing::instrument(skip(self))]
    pub fn register_upload(
        &self,
        name: &str,
        version: Option<&str>,
        archive_path: Option<&Path>,
        prefix: Option<&str>,
    ) -> Result<DataSidecar> {
        let name = ArtifactName::new(name)?;
        let version = Version::new(require(version, "version")?)?;
        let archive_path =
            archive_path.ok_or_else(|| PemError::MissingInput("upload archive is required".into()))?;
        if !archive_path.is_file() {
            return Err(PemError::MissingInput(format!(
                "upload archive {} does not exist",
                archive_path.display()
            )));
        }

        let _guard = self
            .locks
            .lock(data_key(name.as_str(), "upload", version.as_str()));
        let dest = self.upload_root().join(name.as_str()).join(version.as_str());
        remove_dir_all_idempotent(&dest)?;
        if let Err(e) = archive::unpack_tarball(archive_path, &dest) {
            let _ = remove_dir_all_idempotent(&dest);
            return Err(e);
        }

        let sidecar = DataSidecar {
            version: version.to_string(),
            location: dest.clone(),
            source_type: SourceType::Upload,
            source: UPLOAD_SOURCE.to_string(),
            branch: None,
            prefix: prefix.map(str::to_string),
        };
        write_yaml(&dest, &sidecar)?;
        tracing::info!(location = %dest.display(), "data registered from upload");
        Ok(sidecar)
    }

    /// Every registration with at least one complete version.
    pub fn list(&self) -> Result<BTreeMap<String, DataEntry>> {
        let mut out: BTreeMap<String, DataEntry> = BTreeMap::new();

        for (name, name_dir) in visible_subdirs(&self.git_root())? {
            for (branch, branch_dir) in visible_subdirs(&name_dir)? {
                let versions = scan_versions(&branch_dir)?;
                if !versions.is_empty() {
                    out.entry(name.clone()).or_default().branches.insert(branch, versions);
                }
            }
        }
        for (name, name_dir) in visible_subdirs(&self.upload_root())? {
            let versions = scan_versions(&name_dir)?;
            if !versions.is_empty() {
                out.entry(name).or_default().uploads = versions;
            }
        }
        Ok(out)
    }

    /// Remove one registered commit. Idempotent.
    pub fn purge_git(&self, name: &str, branch: &str, commit: &str) -> Result<bool> {
        let name = ArtifactName::new(name)?;
        validate_segment("branch", branch)?;
        let commit = Version::new(commit)?;
        let _guard = self
            .locks
            .lock(data_key(name.as_str(), &format!("git/{branch}"), commit.as_str()));
        let dir = self.git_root().join(name.as_str()).join(branch).join(commit.as_str());
        let removed = remove_dir_all_idempotent(&dir)?;
        tracing::info!(%name, branch, %commit, removed, "purged git data");
        Ok(removed)
    }

    /// Remove one uploaded version. Idempotent.
    pub fn purge_upload(&self, name: &str, version: &str) -> Result<bool> {
        let name = ArtifactName::new(name)?;
        let version = Version::new(version)?;
        let _guard = self
            .locks
            .lock(data_key(name.as_str(), "upload", version.as_str()));
        let dir = self.upload_root().join(name.as_str()).join(version.as_str());
        let removed = remove_dir_all_idempotent(&dir)?;
        tracing::info!(%name, %version, removed, "purged uploaded data");
        Ok(removed)
    }
}

fn scan_versions(dir: &Path) -> Result<BTreeMap<String, DataSidecar>> {
    let mut out = BTreeMap::new();
    for (version, path) in visible_subdirs(dir)? {
        match read_yaml::<DataSidecar>(&path) {
            Ok(Some(sc)) => {
                out.insert(version, sc);
            }
            Ok(None) => tracing::warn!(path = %path.display(), "skipping data version without sidecar"),
            Err(e) => tracing::warn!(error = %e, "skipping data version with corrupt sidecar"),
        }
    }
    Ok(out)
}
