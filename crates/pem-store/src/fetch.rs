//! # Registry Archive Fetching
//!
//! The [`ArchiveFetcher`] contract: given an artifact name and version,
//! produce a local archive, verify it, and unpack it. [`ForgeFetcher`] talks
//! to the Forge v3 API:
//!
//! 1. `GET {forge}/v3/releases/{author}-{name}-{version}` for the release
//!    metadata (`file_uri`, `file_sha256`, `file_md5`);
//! 2. `GET {forge}{file_uri}` for the tarball, streamed to a scratch
//!    directory;
//! 3. SHA-256 of the download compared with `file_sha256`, or MD5 with
//!    `file_md5` when the release publishes no SHA-256. A release with
//!    neither is rejected.
//!
//! Retries are not built in. A failure surfaces once as `Fetch`,
//! `Integrity`, or `Timeout`.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use md5::Md5;
use sha2::{Digest, Sha256};

use pem_core::{ArtifactName, PemError, Result, Version};

use crate::archive;

/// The digest a fetched archive must match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedDigest {
    /// Hex SHA-256.
    Sha256(String),
    /// Hex MD5, for releases that publish nothing stronger.
    Md5(String),
    /// The source published no digest. Verification fails.
    Missing,
    /// The archive comes from a trusted local source and is not checked.
    Trusted,
}

impl ExpectedDigest {
    /// The strongest of the published digests. Empty strings count as absent.
    pub fn published(sha256: Option<String>, md5: Option<String>) -> Self {
        let present = |d: Option<String>| d.filter(|d| !d.trim().is_empty());
        match (present(sha256), present(md5)) {
            (Some(sha256), _) => Self::Sha256(sha256),
            (None, Some(md5)) => Self::Md5(md5),
            (None, None) => Self::Missing,
        }
    }
}

/// A downloaded archive and the digest it is expected to have.
///
/// The scratch directory holding it is removed when this value is dropped.
#[derive(Debug)]
pub struct FetchedArchive {
    /// Local path of the archive.
    pub path: PathBuf,
    /// What [`ArchiveFetcher::verify`] checks the archive against.
    pub expected: ExpectedDigest,
    _scratch: Option<tempfile::TempDir>,
}

impl FetchedArchive {
    /// Wrap an archive that lives in a scratch directory owned by this value.
    pub fn in_scratch(scratch: tempfile::TempDir, path: PathBuf, expected: ExpectedDigest) -> Self {
        Self {
            path,
            expected,
            _scratch: Some(scratch),
        }
    }

    /// Wrap an archive owned by someone else.
    pub fn borrowed(path: PathBuf, expected: ExpectedDigest) -> Self {
        Self {
            path,
            expected,
            _scratch: None,
        }
    }
}

/// Fetches, verifies, and unpacks release archives.
pub trait ArchiveFetcher: Send + Sync {
    /// Download the release archive for `name` at `version`.
    fn fetch(&self, name: &ArtifactName, version: &Version) -> Result<FetchedArchive>;

    /// Check the archive against its published digest.
    ///
    /// An archive with no published digest fails unless it is
    /// [`ExpectedDigest::Trusted`].
    fn verify(&self, archive: &FetchedArchive) -> Result<()> {
        let (algorithm, expected, actual) = match &archive.expected {
            ExpectedDigest::Sha256(expected) => ("sha256", expected, sha256_file(&archive.path)?),
            ExpectedDigest::Md5(expected) => ("md5", expected, md5_file(&archive.path)?),
            ExpectedDigest::Missing => {
                return Err(PemError::Integrity(format!(
                    "{}: no sha256 or md5 published for this release",
                    archive.path.display()
                )))
            }
            ExpectedDigest::Trusted => {
                tracing::debug!(path = %archive.path.display(), "trusted archive; skipping verification");
                return Ok(());
            }
        };
        if actual.eq_ignore_ascii_case(expected.trim()) {
            tracing::debug!(path = %archive.path.display(), algorithm, "archive digest verified");
            Ok(())
        } else {
            Err(PemError::Integrity(format!(
                "{}: expected {algorithm} {expected}, got {actual}",
                archive.path.display()
            )))
        }
    }

    /// Unpack a verified archive into `dest`.
    fn unpack(&self, archive: &FetchedArchive, dest: &Path) -> Result<()> {
        archive::unpack_tarball(&archive.path, dest).map(|_| ())
    }
}

/// Lowercase hex SHA-256 of a file.
pub fn sha256_file(path: &Path) -> Result<String> {
    digest_file::<Sha256>(path)
}

/// Lowercase hex MD5 of a file.
pub fn md5_file(path: &Path) -> Result<String> {
    digest_file::<Md5>(path)
}

fn digest_file<D: Digest>(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| PemError::io(format!("opening {}", path.display()), e))?;
    let mut hasher = D::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| PemError::io(format!("reading {}", path.display()), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Deserialize)]
struct ReleaseInfo {
    file_uri: String,
    #[serde(default)]
    file_sha256: Option<String>,
    #[serde(default)]
    file_md5: Option<String>,
}

/// [`ArchiveFetcher`] backed by the Forge v3 API.
#[derive(Debug)]
pub struct ForgeFetcher {
    client: reqwest::blocking::Client,
    base: url::Url,
    timeout: Duration,
}

impl ForgeFetcher {
    /// Build a fetcher for the API at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = url::Url::parse(base_url)
            .map_err(|e| PemError::Config(format!("invalid forge_url {base_url:?}: {e}")))?;
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pem/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PemError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, base, timeout })
    }

    fn map_send_error(&self, operation: &str, e: reqwest::Error) -> PemError {
        if e.is_timeout() {
            PemError::Timeout {
                operation: operation.to_string(),
                after: self.timeout,
            }
        } else {
            PemError::Fetch(format!("{operation}: {e}"))
        }
    }

    fn get(&self, url: &url::Url, operation: &str) -> Result<reqwest::blocking::Response> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| self.map_send_error(operation, e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(PemError::Fetch(format!(
                "{operation}: HTTP {status} from {url}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }
        Ok(resp)
    }

    fn join(&self, path: &str) -> Result<url::Url> {
        self.base
            .join(path)
            .map_err(|e| PemError::Fetch(format!("bad URL path {path:?}: {e}")))
    }
}

impl ArchiveFetcher for ForgeFetcher {
    fn fetch(&self, name: &ArtifactName, version: &Version) -> Result<FetchedArchive> {
        let slug = format!("{name}-{version}");
        let release_url = self.join(&format!("/v3/releases/{slug}"))?;
        tracing::info!(%name, %version, url = %release_url, "fetching release metadata");

        let operation = format!("release lookup for {slug}");
        let info: ReleaseInfo = self
            .get(&release_url, &operation)?
            .json()
            .map_err(|e| self.map_send_error(&operation, e))?;

        let file_url = self.join(&info.file_uri)?;
        let scratch = tempfile::tempdir().map_err(|e| PemError::io("creating scratch directory", e))?;
        let path = scratch.path().join(format!("{slug}.tar.gz"));
        let mut out = File::create(&path).map_err(|e| PemError::io(format!("creating {}", path.display()), e))?;

        let operation = format!("download of {slug}");
        let mut resp = self.get(&file_url, &operation)?;
        let bytes = io::copy(&mut resp, &mut out).map_err(|e| {
            // reqwest reports body timeouts through the io::Error it returns.
            if e.kind() == io::ErrorKind::TimedOut {
                PemError::Timeout {
                    operation: operation.clone(),
                    after: self.timeout,
                }
            } else {
                PemError::Fetch(format!("{operation}: {e}"))
            }
        })?;
        tracing::debug!(%name, %version, bytes, "release archive downloaded");

        let expected = ExpectedDigest::published(info.file_sha256, info.file_md5);
        Ok(FetchedArchive::in_scratch(scratch, path, expected))
    }
}
