//! # Materialization Strategies
//!
//! One [`ModuleSource`] variant per provenance type. The variant is chosen
//! once by the caller; [`Materializer::materialize`] dispatches to exactly
//! one strategy and either leaves complete content in the destination or
//! fails.

use std::path::{Path, PathBuf};

use pem_core::{ArtifactName, PemError, Result, SourceType, Version};

use crate::archive;
use crate::fetch::ArchiveFetcher;
use crate::vcs::{self, VcsClient};

/// Where a module version's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSource {
    /// Release archive from the module registry.
    Registry,
    /// Clone of a remote repository, checked out at the version.
    Vcs {
        /// Clone URL.
        remote: String,
    },
    /// Archive already on local disk.
    Upload {
        /// Path of the `.tar.gz` payload.
        archive: PathBuf,
        /// Recorded source locator; the upload sentinel when absent.
        locator: Option<String>,
    },
}

impl ModuleSource {
    /// Build a source from the CLI/API triple.
    ///
    /// `vcs` requires a remote and `upload` requires an archive.
    pub fn from_parts(
        source_type: SourceType,
        locator: Option<String>,
        archive: Option<PathBuf>,
    ) -> Result<Self> {
        match source_type {
            SourceType::Registry => Ok(Self::Registry),
            SourceType::Vcs => {
                let remote = locator
                    .filter(|l| !l.is_empty())
                    .ok_or_else(|| PemError::MissingInput("git deploys need a source URL".into()))?;
                Ok(Self::Vcs { remote })
            }
            SourceType::Upload => {
                let archive = archive
                    .ok_or_else(|| PemError::MissingInput("upload deploys need an archive file".into()))?;
                Ok(Self::Upload { archive, locator })
            }
        }
    }

    /// The provenance recorded in the sidecar.
    pub fn source_type(&self) -> SourceType {
        match self {
            Self::Registry => SourceType::Registry,
            Self::Vcs { .. } => SourceType::Vcs,
            Self::Upload { .. } => SourceType::Upload,
        }
    }

    /// The locator recorded in the sidecar before synthesis.
    pub fn locator(&self) -> Option<&str> {
        match self {
            Self::Registry => None,
            Self::Vcs { remote } => Some(remote),
            Self::Upload { locator, .. } => locator.as_deref(),
        }
    }
}

/// Runs one materialization strategy against the collaborators.
#[derive(Clone, Copy)]
pub struct Materializer<'a> {
    fetcher: &'a dyn ArchiveFetcher,
    vcs: &'a dyn VcsClient,
}

impl<'a> Materializer<'a> {
    /// Bind the collaborators.
    pub fn new(fetcher: &'a dyn ArchiveFetcher, vcs: &'a dyn VcsClient) -> Self {
        Self { fetcher, vcs }
    }

    /// Produce the content of `name@version` in `dest`.
    ///
    /// `dest` must not exist yet.
    pub fn materialize(
        &self,
        source: &ModuleSource,
        name: &ArtifactName,
        version: &Version,
        dest: &Path,
    ) -> Result<()> {
        match source {
            ModuleSource::Registry => self.from_registry(name, version, dest),
            ModuleSource::Vcs { remote } => self.from_vcs(remote, version, dest),
            ModuleSource::Upload { archive, .. } => from_upload(archive, dest),
        }
    }

    fn from_registry(&self, name: &ArtifactName, version: &Version, dest: &Path) -> Result<()> {
        let fetched = self.fetcher.fetch(name, version)?;
        self.fetcher.verify(&fetched)?;
        self.fetcher.unpack(&fetched, dest)
    }

    fn from_vcs(&self, remote: &str, version: &Version, dest: &Path) -> Result<()> {
        let handle = self.vcs.clone_at(remote, dest)?;
        let commit = vcs::checkout_peeling(self.vcs, &handle, version.as_str())?;
        tracing::debug!(remote, %version, commit, "vcs checkout complete");
        Ok(())
    }
}

fn from_upload(archive_path: &Path, dest: &Path) -> Result<()> {
    if !archive_path.is_file() {
        return Err(PemError::MissingInput(format!(
            "upload archive {} does not exist",
            archive_path.display()
        )));
    }
    archive::unpack_tarball(archive_path, dest).map(|_| ())
}
