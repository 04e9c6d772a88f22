//! # Configuration
//!
//! Loads `config.yml` and derives the on-disk layout from it.
//!
//! ```yaml
//! basedir: /etc/puppetlabs/code-staging
//! master: puppet.example.com
//! filesync_cert: /etc/pem/cert.pem
//! filesync_cert_key: /etc/pem/key.pem
//! filesync_ca_cert: /etc/pem/ca.pem
//! verify_ssl: true
//! user: pe-puppet
//! group: pe-puppet
//! ```
//!
//! `basedir` is required. When `master` is set, all three `filesync_*`
//! paths are required too; without `master`, publishing is disabled.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PemError, Result};

/// Environment variable overriding the configuration file path.
pub const CONFIG_ENV_VAR: &str = "PEM_CONFIG";

/// Default configuration file path, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

/// Default module registry API.
pub const DEFAULT_FORGE_URL: &str = "https://forgeapi.puppet.com";

fn default_true() -> bool {
    true
}

fn default_forge_url() -> String {
    DEFAULT_FORGE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

/// Process configuration as read from YAML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PemConfig {
    /// Root under which modules, environments, and data live.
    pub basedir: PathBuf,
    /// Host running the file-sync service; publishing is disabled when unset.
    #[serde(default)]
    pub master: Option<String>,
    /// Client certificate (PEM) for the file-sync endpoints.
    #[serde(default)]
    pub filesync_cert: Option<PathBuf>,
    /// Client key (PEM) for the file-sync endpoints.
    #[serde(default)]
    pub filesync_cert_key: Option<PathBuf>,
    /// CA bundle (PEM) the file-sync server is verified against.
    #[serde(default)]
    pub filesync_ca_cert: Option<PathBuf>,
    /// Verify the file-sync server certificate.
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
    /// Owner applied to deployed environments (name or numeric uid).
    #[serde(default)]
    pub user: Option<String>,
    /// Group applied to deployed environments (name or numeric gid).
    #[serde(default)]
    pub group: Option<String>,
    /// Module registry API base URL.
    #[serde(default = "default_forge_url")]
    pub forge_url: String,
    /// Deadline for one archive download or repository clone.
    #[serde(default = "default_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Per-request timeout for the file-sync endpoints.
    #[serde(default = "default_timeout_secs")]
    pub filesync_timeout_secs: u64,
}

/// Everything needed to reach the file-sync service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesyncConfig {
    /// Host name of the primary server.
    pub master: String,
    /// Client certificate path.
    pub cert: PathBuf,
    /// Client key path.
    pub key: PathBuf,
    /// CA bundle path.
    pub ca_cert: PathBuf,
    /// Verify the server certificate.
    pub verify_ssl: bool,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// Owner and group to apply to deployed environments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerSpec {
    /// User name or numeric uid.
    pub user: Option<String>,
    /// Group name or numeric gid.
    pub group: Option<String>,
}

impl OwnerSpec {
    /// Whether any ownership change is requested.
    pub fn is_empty(&self) -> bool {
        self.user.is_none() && self.group.is_none()
    }
}

impl PemConfig {
    /// A configuration with only `basedir` set; everything else defaulted.
    pub fn with_basedir(basedir: impl Into<PathBuf>) -> Self {
        Self {
            basedir: basedir.into(),
            master: None,
            filesync_cert: None,
            filesync_cert_key: None,
            filesync_ca_cert: None,
            verify_ssl: true,
            user: None,
            group: None,
            forge_url: default_forge_url(),
            fetch_timeout_secs: default_timeout_secs(),
            filesync_timeout_secs: default_timeout_secs(),
        }
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)
            .map_err(|e| PemError::Config(format!("parsing configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            PemError::Config(format!(
                "missing config file, or required configuration values - check {}: {e}",
                path.display()
            ))
        })?;
        Self::from_yaml(&raw)
    }

    /// Resolve the configuration path from an explicit argument, then
    /// `PEM_CONFIG`, then `config.yml`.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    fn validate(&self) -> Result<()> {
        if self.basedir.as_os_str().is_empty() {
            return Err(PemError::Config("basedir must not be empty".into()));
        }
        if self.master.is_some() {
            let missing: Vec<&str> = [
                ("filesync_cert", self.filesync_cert.is_none()),
                ("filesync_cert_key", self.filesync_cert_key.is_none()),
                ("filesync_ca_cert", self.filesync_ca_cert.is_none()),
            ]
            .into_iter()
            .filter_map(|(k, absent)| absent.then_some(k))
            .collect();
            if !missing.is_empty() {
                return Err(PemError::Config(format!(
                    "master is set but required settings are missing: {}",
                    missing.join(", ")
                )));
            }
        }
        if self.fetch_timeout_secs == 0 || self.filesync_timeout_secs == 0 {
            return Err(PemError::Config("timeouts must be greater than zero".into()));
        }
        Ok(())
    }

    /// Directory layout derived from `basedir`.
    pub fn layout(&self) -> Layout {
        Layout::new(&self.basedir)
    }

    /// File-sync settings, when publishing is enabled.
    pub fn filesync(&self) -> Option<FilesyncConfig> {
        Some(FilesyncConfig {
            master: self.master.clone()?,
            cert: self.filesync_cert.clone()?,
            key: self.filesync_cert_key.clone()?,
            ca_cert: self.filesync_ca_cert.clone()?,
            verify_ssl: self.verify_ssl,
            timeout: Duration::from_secs(self.filesync_timeout_secs),
        })
    }

    /// Ownership to apply to deployed environments.
    pub fn owner(&self) -> OwnerSpec {
        OwnerSpec {
            user: self.user.clone(),
            group: self.group.clone(),
        }
    }

    /// Deadline for one fetch or clone.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// On-disk layout under `basedir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// `<basedir>`
    pub basedir: PathBuf,
    /// `<basedir>/modules`: `<author-name>/<version>/`
    pub module_dir: PathBuf,
    /// `<basedir>/environments`: `<env>/modules/<friendly>/`
    pub env_dir: PathBuf,
    /// `<basedir>/data`: `git/<name>/<branch>/<commit>/`, `upload/<name>/<version>/`
    pub data_dir: PathBuf,
}

impl Layout {
    /// Derive the layout from a base directory.
    pub fn new(basedir: &Path) -> Self {
        Self {
            basedir: basedir.to_path_buf(),
            module_dir: basedir.join("modules"),
            env_dir: basedir.join("environments"),
            data_dir: basedir.join("data"),
        }
    }

    /// Create every root directory that does not exist yet.
    pub fn ensure(&self) -> Result<()> {
        for dir in [
            &self.basedir,
            &self.module_dir,
            &self.env_dir,
            &self.data_dir,
            &self.data_dir.join("git"),
            &self.data_dir.join("upload"),
        ] {
            if !dir.is_dir() {
                tracing::debug!(dir = %dir.display(), "creating directory");
                fs::create_dir_all(dir)
                    .map_err(|e| PemError::io(format!("creating {}", dir.display()), e))?;
            }
        }
        Ok(())
    }
}
