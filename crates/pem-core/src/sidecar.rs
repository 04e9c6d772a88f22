//! # Sidecar Codec
//!
//! Every materialized directory carries a `.pemversion` YAML file. The
//! sidecar is the completeness marker: it is written last, to a temporary
//! sibling, and renamed into place, so a reader either sees a whole sidecar
//! or none at all.
//!
//! Three shapes live in this format:
//!
//! - store versions ([`VersionRecord`](crate::VersionRecord)):
//!   `version`, `location`, `type`, `source`;
//! - environment-local modules ([`EnvModuleSidecar`]): `version`, `name`;
//! - whole environments ([`EnvSidecar`]): `environment`, `modules`, written
//!   once every module is in place;
//! - data registrations ([`DataSidecar`]): the store fields plus `branch`
//!   and `prefix`.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{PemError, Result};
use crate::version::SourceType;

/// File name of the sidecar inside a version or module directory.
pub const SIDECAR_FILE: &str = ".pemversion";

/// Path of the sidecar inside `dir`.
pub fn sidecar_path(dir: &Path) -> PathBuf {
    dir.join(SIDECAR_FILE)
}

/// Atomically write `value` as the sidecar of `dir`.
pub fn write_yaml<T: Serialize>(dir: &Path, value: &T) -> Result<()> {
    let body = serde_yaml::to_string(value).map_err(|e| PemError::CorruptSidecar {
        path: sidecar_path(dir),
        reason: format!("serialization failed: {e}"),
    })?;
    let tmp = dir.join(format!("{SIDECAR_FILE}.{}.tmp", uuid::Uuid::new_v4().simple()));
    let target = sidecar_path(dir);

    let mut file = fs::File::create(&tmp)
        .map_err(|e| PemError::io(format!("creating {}", tmp.display()), e))?;
    file.write_all(body.as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|e| PemError::io(format!("writing {}", tmp.display()), e))?;
    drop(file);

    fs::rename(&tmp, &target).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        PemError::io(format!("installing {}", target.display()), e)
    })
}

/// Read the sidecar of `dir`.
///
/// `Ok(None)` when the file is absent; [`PemError::CorruptSidecar`] when it
/// exists but cannot be read or parsed.
pub fn read_yaml<T: DeserializeOwned>(dir: &Path) -> Result<Option<T>> {
    let path = sidecar_path(dir);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(PemError::CorruptSidecar {
                path,
                reason: e.to_string(),
            })
        }
    };
    serde_yaml::from_str(&raw)
        .map(Some)
        .map_err(|e| PemError::CorruptSidecar {
            path,
            reason: e.to_string(),
        })
}

/// Sidecar of a module copied into an environment.
///
/// Lets the environment's module map be rebuilt from disk alone, without
/// consulting the global store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvModuleSidecar {
    /// Deployed version.
    pub version: String,
    /// Full `author-name` of the module.
    pub name: String,
}

/// Sidecar at the top of a deployed environment.
///
/// Present only once the build finished, so recovery can tell a complete
/// environment from one a crash left half-built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvSidecar {
    /// Environment name.
    pub environment: String,
    /// Friendly module name to deployed version.
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

/// Sidecar of a data registration version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSidecar {
    /// Commit id (git) or caller-assigned version (upload).
    pub version: String,
    /// Directory holding the content.
    pub location: PathBuf,
    /// Provenance.
    #[serde(rename = "type")]
    pub source_type: SourceType,
    /// Clone URL, or the upload sentinel.
    pub source: String,
    /// Branch the commit was taken from (git only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Mount hint for consumers; not interpreted by the store.
    #[serde(default)]
    pub prefix: Option<String>,
}
