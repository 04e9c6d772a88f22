//! # Environment Manager
//!
//! An environment is `environments/<name>/modules/<friendly>/`, each module
//! directory a copy of one store version plus a `.pemversion` recording
//! `{version, name}`.
//!
//! ## Deploy
//!
//! Under the `env:<name>` lock:
//!
//! 1. Move an existing environment aside ([`Backup::stash`]).
//! 2. Create the environment and its `modules/` directory.
//! 3. For each requested module, resolve it in the store, copy the version
//!    under its `module:` lock, and write the local sidecar.
//! 4. Apply ownership, write the environment sidecar ([`EnvSidecar`]),
//!    publish once, discard the backup, refresh the index.
//!
//! Any failure in steps 2–4 removes the partial tree, puts the backup back,
//! publishes once so consumers see the restored state, and returns
//! [`PemError::RolledBack`]. If putting the backup back fails the error is
//! [`PemError::RestoreFailed`] and the backup stays on disk for
//! [`EnvironmentManager::recover`].
//!
//! A publish failure after a successful rebuild does not roll anything back;
//! it is reported in [`DeployOutcome::publish`].
//!
//! ## Recovery
//!
//! The environment sidecar is the last thing a build writes. After a crash,
//! [`EnvironmentManager::recover`] keeps an environment only if it carries
//! that sidecar; otherwise the tree is partial and the backup goes back in
//! its place. Destroy moves the tree to a separate `.pem-destroy-` name, and
//! recovery finishes deleting it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use pem_core::fsutil::{chown_recursive, copy_dir, remove_dir_all_idempotent, visible_subdirs};
use pem_core::lock::env_key;
use pem_core::sidecar::{read_yaml, sidecar_path, write_yaml};
use pem_core::{
    EnvModuleSidecar, EnvName, EnvSidecar, KeyedLocks, OwnerSpec, PemError, PublishStatus, Result, Version,
};
use pem_store::archive::pack_dir;
use pem_store::ModuleStore;

use crate::backup::{self, Backup};
use crate::diff::{self, EnvDiff};
use crate::index::{to_module_map, EnvIndex, EnvSnapshot, ModuleEntry, ModuleMap};
use crate::legacy::LegacyVersionResolver;
use crate::sync::{publish_status, SyncNotifier};
use crate::usage::{find_usage, Usage};

/// Result of a successful environment deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployOutcome {
    /// Environment name.
    pub environment: String,
    /// Module map now on disk.
    pub modules: ModuleMap,
    /// Downstream publish result.
    pub publish: PublishStatus,
}

/// Result of destroying an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DestroyOutcome {
    /// Environment name.
    pub environment: String,
    /// Whether there was anything to remove.
    pub existed: bool,
    /// Downstream publish result.
    pub publish: PublishStatus,
}

/// What [`EnvironmentManager::recover`] did with leftover backups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Environments put back from a backup.
    pub restored: Vec<String>,
    /// Backups deleted because the environment was intact.
    pub discarded: Vec<String>,
    /// Environments whose interrupted destroy was completed.
    pub destroyed: Vec<String>,
}

impl RecoveryReport {
    fn is_empty(&self) -> bool {
        self.restored.is_empty() && self.discarded.is_empty() && self.destroyed.is_empty()
    }
}

/// Builds, replaces, and removes environments.
pub struct EnvironmentManager {
    root: PathBuf,
    store: Arc<ModuleStore>,
    notifier: Arc<dyn SyncNotifier>,
    locks: Arc<KeyedLocks>,
    owner: OwnerSpec,
    legacy: LegacyVersionResolver,
    index: EnvIndex,
}

impl std::fmt::Debug for EnvironmentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentManager")
            .field("root", &self.root)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl EnvironmentManager {
    /// A manager for environments under `root`.
    pub fn new(
        root: impl Into<PathBuf>,
        store: Arc<ModuleStore>,
        notifier: Arc<dyn SyncNotifier>,
        locks: Arc<KeyedLocks>,
    ) -> Self {
        Self {
            root: root.into(),
            store,
            notifier,
            locks,
            owner: OwnerSpec::default(),
            legacy: LegacyVersionResolver::default(),
            index: EnvIndex::new(),
        }
    }

    /// Apply `owner` to every deployed tree.
    pub fn with_owner(mut self, owner: OwnerSpec) -> Self {
        self.owner = owner;
        self
    }

    /// Replace the legacy probe chain.
    pub fn with_legacy_resolver(mut self, legacy: LegacyVersionResolver) -> Self {
        self.legacy = legacy;
        self
    }

    /// Root of all environments.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The cached index.
    pub fn index(&self) -> &EnvIndex {
        &self.index
    }

    fn env_dir(&self, name: &EnvName) -> PathBuf {
        self.root.join(name.as_str())
    }

    /// Build or rebuild `name` from `modules` (full or friendly name →
    /// version).
    #[tracing::instrument(skip(self, modules), fields(count = modules.len()))]
    pub fn deploy(&self, name: &str, modules: &BTreeMap<String, String>) -> Result<DeployOutcome> {
        let env = EnvName::new(name)?;
        let requested = modules
            .iter()
            .map(|(k, v)| -> Result<(String, Version)> { Ok((k.clone(), Version::new(v.as_str())?)) })
            .collect::<Result<Vec<_>>>()?;

        let _guard = self.locks.lock(env_key(env.as_str()));
        fs::create_dir_all(&self.root)
            .map_err(|e| PemError::io(format!("creating {}", self.root.display()), e))?;
        let env_dir = self.env_dir(&env);
        let backup = Backup::stash(&self.root, &env, &env_dir)?;

        match self.build(&env, &env_dir, &requested) {
            Ok(deployed) => {
                let publish = publish_status(self.notifier.as_ref());
                if let Some(backup) = backup {
                    if let Err(e) = backup.discard() {
                        tracing::warn!(error = %e, "could not discard backup; recover will remove it");
                    }
                }
                self.refresh_index_logged();
                tracing::info!(%publish, "environment deployed");
                Ok(DeployOutcome {
                    environment: env.to_string(),
                    modules: deployed,
                    publish,
                })
            }
            Err(cause) => Err(self.roll_back(&env, &env_dir, backup, cause)),
        }
    }

    fn build(&self, env: &EnvName, env_dir: &Path, requested: &[(String, Version)]) -> Result<ModuleMap> {
        let modules_dir = env_dir.join("modules");
        fs::create_dir_all(&modules_dir)
            .map_err(|e| PemError::io(format!("creating {}", modules_dir.display()), e))?;

        let mut deployed = ModuleMap::new();
        for (key, version) in requested {
            let (name, _) = self.store.resolve(key, version)?;
            let friendly = name.friendly().to_string();
            let target = modules_dir.join(&friendly);
            if target.exists() {
                return Err(PemError::invalid_name(
                    "module",
                    key,
                    format!("another requested module is also named {friendly}"),
                ));
            }
            self.store.with_version(&name, version, |record| {
                copy_dir(&record.location, &target)?;
                write_yaml(
                    &target,
                    &EnvModuleSidecar {
                        version: version.to_string(),
                        name: name.to_string(),
                    },
                )
            })?;
            tracing::debug!(module = %name, %version, "module copied into environment");
            deployed.insert(friendly, version.to_string());
        }

        chown_recursive(env_dir, &self.owner)?;
        write_yaml(
            env_dir,
            &EnvSidecar {
                environment: env.to_string(),
                modules: deployed.clone(),
            },
        )?;
        chown_recursive(&sidecar_path(env_dir), &self.owner)?;
        Ok(deployed)
    }

    fn roll_back(&self, env: &EnvName, env_dir: &Path, backup: Option<Backup>, cause: PemError) -> PemError {
        tracing::error!(environment = %env, error = %cause, "deploy failed; rolling back");
        let restored = remove_dir_all_idempotent(env_dir).and_then(|_| match backup {
            Some(b) => b.restore(env_dir),
            None => Ok(()),
        });
        if let Err(restore) = restored {
            tracing::error!(environment = %env, error = %restore, "restore failed; run recover");
            self.refresh_index_logged();
            return PemError::RestoreFailed {
                environment: env.to_string(),
                cause: Box::new(cause),
                restore: Box::new(restore),
            };
        }
        let publish = publish_status(self.notifier.as_ref());
        self.refresh_index_logged();
        PemError::RolledBack {
            environment: env.to_string(),
            cause: Box::new(cause),
            publish,
        }
    }

    /// Remove an environment. Removing an absent environment succeeds.
    #[tracing::instrument(skip(self))]
    pub fn destroy(&self, name: &str) -> Result<DestroyOutcome> {
        let env = EnvName::new(name)?;
        let _guard = self.locks.lock(env_key(env.as_str()));
        let env_dir = self.env_dir(&env);
        let existed = match Backup::retire(&self.root, &env, &env_dir)? {
            Some(backup) => {
                backup.discard()?;
                true
            }
            None => false,
        };
        let publish = publish_status(self.notifier.as_ref());
        self.refresh_index_logged();
        tracing::info!(existed, %publish, "environment destroyed");
        Ok(DestroyOutcome {
            environment: env.to_string(),
            existed,
            publish,
        })
    }

    /// The module map of `name`, read from disk.
    pub fn current_modules(&self, name: &str) -> Result<ModuleMap> {
        let env = EnvName::new(name)?;
        let env_dir = self.env_dir(&env);
        if !env_dir.is_dir() {
            return Err(PemError::UnknownEnvironment(env.to_string()));
        }
        Ok(to_module_map(&self.scan_env(&env_dir)?))
    }

    /// Module entries of one environment directory.
    ///
    /// Module directories without a sidecar go through the legacy probes;
    /// anything unresolvable or corrupt is logged and left out.
    fn scan_env(&self, env_dir: &Path) -> Result<BTreeMap<String, ModuleEntry>> {
        let mut out = BTreeMap::new();
        for (friendly, dir) in visible_subdirs(&env_dir.join("modules"))? {
            match read_yaml::<EnvModuleSidecar>(&dir) {
                Ok(Some(sc)) => {
                    out.insert(
                        friendly,
                        ModuleEntry {
                            version: sc.version,
                            full_name: Some(sc.name),
                            legacy: false,
                        },
                    );
                }
                Ok(None) => match self.legacy.resolve(env_dir, &friendly) {
                    Some(version) => {
                        out.insert(
                            friendly,
                            ModuleEntry {
                                version,
                                full_name: None,
                                legacy: true,
                            },
                        );
                    }
                    None => tracing::warn!(module = %friendly, env = %env_dir.display(), "cannot determine module version"),
                },
                Err(e) => tracing::warn!(error = %e, "skipping module with corrupt sidecar"),
            }
        }
        Ok(out)
    }

    /// Rebuild the index from disk.
    pub fn refresh_index(&self) -> Result<()> {
        let snapshot = self.scan_all()?;
        self.index.replace(snapshot);
        Ok(())
    }

    /// Environments referencing `name` at `version`, read from disk rather
    /// than the index. Also refreshes the index.
    pub fn current_usage(&self, name: &str, version: &str) -> Result<Usage> {
        let snapshot = self.scan_all()?;
        let usage = find_usage(&snapshot, name, version);
        self.index.replace(snapshot);
        Ok(usage)
    }

    fn scan_all(&self) -> Result<EnvSnapshot> {
        let mut snapshot = EnvSnapshot::new();
        for (name, dir) in visible_subdirs(&self.root)? {
            match self.scan_env(&dir) {
                Ok(modules) => {
                    snapshot.insert(name, modules);
                }
                Err(e) => tracing::warn!(environment = %name, error = %e, "skipping unreadable environment"),
            }
        }
        tracing::debug!(environments = snapshot.len(), "environments scanned");
        Ok(snapshot)
    }

    fn refresh_index_logged(&self) {
        if let Err(e) = self.refresh_index() {
            tracing::warn!(error = %e, "environment index refresh failed");
        }
    }

    /// Names of all environments, from the index.
    pub fn list_environments(&self) -> Vec<String> {
        self.index.names()
    }

    /// Every environment's module map, from the index.
    pub fn environments(&self) -> BTreeMap<String, ModuleMap> {
        self.index.module_maps()
    }

    /// Compare two environments from the index.
    pub fn compare(&self, left: &str, right: &str) -> Result<EnvDiff> {
        let lookup = |name: &str| {
            self.index
                .modules(name)
                .ok_or_else(|| PemError::UnknownEnvironment(name.to_string()))
        };
        let (l, r) = (lookup(left)?, lookup(right)?);
        Ok(diff::compare(left, &l, right, &r))
    }

    /// Environments referencing `name` at `version`, from the index.
    pub fn usage(&self, name: &str, version: &str) -> Usage {
        find_usage(&self.index.snapshot(), name, version)
    }

    /// Pack an environment into a `.tar.gz` at `dest`.
    pub fn archive(&self, name: &str, dest: &Path) -> Result<PathBuf> {
        let env = EnvName::new(name)?;
        let _guard = self.locks.lock(env_key(env.as_str()));
        let env_dir = self.env_dir(&env);
        if !env_dir.is_dir() {
            return Err(PemError::UnknownEnvironment(env.to_string()));
        }
        pack_dir(&env_dir, env.as_str(), dest)?;
        tracing::info!(environment = %env, archive = %dest.display(), "environment archived");
        Ok(dest.to_path_buf())
    }

    /// Resolve trees left by an interrupted deploy or destroy.
    ///
    /// A backup is deleted only when the environment beside it carries its
    /// environment sidecar. A missing or partial environment is replaced by
    /// the backup. Trees retired by destroy are deleted.
    pub fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        for (env, retired) in backup::find_retired(&self.root)? {
            let _guard = self.locks.lock(env_key(env.as_str()));
            retired.discard()?;
            report.destroyed.push(env.to_string());
        }
        for (env, backup) in backup::find_stale(&self.root)? {
            let _guard = self.locks.lock(env_key(env.as_str()));
            let env_dir = self.env_dir(&env);
            if is_complete(&env_dir) {
                backup.discard()?;
                report.discarded.push(env.to_string());
            } else {
                if remove_dir_all_idempotent(&env_dir)? {
                    tracing::warn!(environment = %env, "removed partially built environment");
                }
                backup.restore(&env_dir)?;
                report.restored.push(env.to_string());
            }
        }
        if !report.is_empty() {
            tracing::warn!(
                restored = ?report.restored,
                discarded = ?report.discarded,
                destroyed = ?report.destroyed,
                "recovered interrupted environment changes"
            );
        }
        self.refresh_index()?;
        Ok(report)
    }
}

/// Whether `env_dir` holds a build that ran to completion.
fn is_complete(env_dir: &Path) -> bool {
    match read_yaml::<EnvSidecar>(env_dir) {
        Ok(found) => found.is_some(),
        Err(e) => {
            tracing::warn!(error = %e, "environment sidecar unreadable; treating as partial");
            false
        }
    }
}
