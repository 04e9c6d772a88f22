//! # Environment Backups
//!
//! Before an environment is rebuilt or destroyed, its directory is renamed
//! to a hidden sibling `.pem-backup-<name>-<uuid>` in the environment root.
//! The rename is atomic on one filesystem, so the environment is either in
//! place or fully moved aside.
//!
//! A [`Backup`] is consumed by exactly one of [`Backup::discard`] or
//! [`Backup::restore`]. Backups left by a crash are found with
//! [`find_stale`].
//!
//! Destroy moves the environment to `.pem-destroy-<name>-<uuid>` instead
//! ([`Backup::retire`]), so a tree left by an interrupted destroy is never
//! mistaken for one worth restoring. [`find_retired`] lists those.

use std::fs;
use std::path::{Path, PathBuf};

use pem_core::fsutil::remove_dir_all_idempotent;
use pem_core::{EnvName, PemError, Result};

const BACKUP_PREFIX: &str = ".pem-backup-";
const DESTROY_PREFIX: &str = ".pem-destroy-";

/// An environment directory moved aside.
#[derive(Debug)]
#[must_use = "a backup must be discarded or restored"]
pub struct Backup {
    path: PathBuf,
}

impl Backup {
    /// Move `env_dir` aside. `Ok(None)` when there is nothing to back up.
    pub fn stash(env_root: &Path, name: &EnvName, env_dir: &Path) -> Result<Option<Self>> {
        Self::move_aside(BACKUP_PREFIX, env_root, name, env_dir)
    }

    /// Move `env_dir` aside for deletion. A retired tree is never restored.
    pub fn retire(env_root: &Path, name: &EnvName, env_dir: &Path) -> Result<Option<Self>> {
        Self::move_aside(DESTROY_PREFIX, env_root, name, env_dir)
    }

    fn move_aside(prefix: &str, env_root: &Path, name: &EnvName, env_dir: &Path) -> Result<Option<Self>> {
        if !env_dir.exists() {
            return Ok(None);
        }
        let path = env_root.join(format!("{prefix}{name}-{}", uuid::Uuid::new_v4().simple()));
        fs::rename(env_dir, &path).map_err(|e| {
            PemError::io(format!("moving {} aside to {}", env_dir.display(), path.display()), e)
        })?;
        tracing::debug!(environment = %name, backup = %path.display(), "environment moved aside");
        Ok(Some(Self { path }))
    }

    /// Where the backup lives.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Put the backup back at `env_dir`, which must not exist.
    pub fn restore(self, env_dir: &Path) -> Result<()> {
        fs::rename(&self.path, env_dir).map_err(|e| {
            PemError::io(
                format!("restoring {} from {}", env_dir.display(), self.path.display()),
                e,
            )
        })?;
        tracing::info!(environment = %env_dir.display(), "environment restored from backup");
        Ok(())
    }

    /// Delete the backup.
    pub fn discard(self) -> Result<()> {
        remove_dir_all_idempotent(&self.path)?;
        tracing::debug!(backup = %self.path.display(), "backup discarded");
        Ok(())
    }
}

/// Backups left in `env_root`, with the environment name each belongs to.
pub fn find_stale(env_root: &Path) -> Result<Vec<(EnvName, Backup)>> {
    scan(env_root, BACKUP_PREFIX)
}

/// Trees left in `env_root` by a destroy that did not finish.
pub fn find_retired(env_root: &Path) -> Result<Vec<(EnvName, Backup)>> {
    scan(env_root, DESTROY_PREFIX)
}

fn scan(env_root: &Path, prefix: &str) -> Result<Vec<(EnvName, Backup)>> {
    let rd = match fs::read_dir(env_root) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PemError::io(format!("listing {}", env_root.display()), e)),
    };
    let mut out = Vec::new();
    for entry in rd.flatten() {
        let Ok(file_name) = entry.file_name().into_string() else { continue };
        let Some(rest) = file_name.strip_prefix(prefix) else { continue };
        let Some((name, _suffix)) = rest.rsplit_once('-') else { continue };
        match EnvName::new(name) {
            Ok(env) => out.push((env, Backup { path: entry.path() })),
            Err(e) => tracing::warn!(path = %entry.path().display(), error = %e, "ignoring unrecognized backup"),
        }
    }
    out.sort_by(|a, b| a.1.path.cmp(&b.1.path));
    Ok(out)
}
