//! # Service Facade
//!
//! [`Pem`] owns one instance of every component, wired from a
//! [`PemConfig`]: the module store, the data registry, and the environment
//! manager share one set of keyed locks and one index. Callers (the CLI, or
//! an API layer) talk only to this type.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use pem_core::{ArtifactName, KeyedLocks, Layout, PemConfig, PemError, Result, Version};
use pem_store::{
    ArchiveFetcher, DataRegistry, ForgeFetcher, GitClient, ModuleSource, ModuleStore, VcsClient,
};

use crate::manager::{DeployOutcome, EnvironmentManager};
use crate::puppetfile::{self, ModuleKind};
use crate::sync::{FilesyncNotifier, NoopNotifier, SyncNotifier};
use crate::usage::Usage;

/// Author given to git modules declared without one.
pub const DEFAULT_GIT_AUTHOR: &str = "myorg";

/// Length of commit refs used as module versions on import.
pub const IMPORTED_COMMIT_LEN: usize = 6;

/// Result of importing a Puppetfile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportOutcome {
    /// Modules deployed to the store (or already present), name → version.
    pub modules: BTreeMap<String, String>,
    /// Declarations left out, with the reason.
    pub skipped: BTreeMap<String, String>,
    /// The environment deploy.
    pub deploy: DeployOutcome,
}

/// The whole system behind one handle.
#[derive(Debug)]
pub struct Pem {
    layout: Layout,
    modules: Arc<ModuleStore>,
    data: DataRegistry,
    envs: EnvironmentManager,
}

impl Pem {
    /// Wire production collaborators from `config`: the Forge fetcher, the
    /// libgit2 client, and file-sync when `master` is set.
    pub fn from_config(config: &PemConfig) -> Result<Self> {
        let fetcher = Arc::new(ForgeFetcher::new(&config.forge_url, config.fetch_timeout())?);
        let vcs = Arc::new(GitClient::new(config.fetch_timeout()));
        let notifier: Arc<dyn SyncNotifier> = match config.filesync() {
            Some(fs) => Arc::new(FilesyncNotifier::new(&fs)?),
            None => {
                tracing::warn!("no master configured; publishing is disabled");
                Arc::new(NoopNotifier)
            }
        };
        Self::with_collaborators(config, fetcher, vcs, notifier)
    }

    /// Wire the given collaborators.
    pub fn with_collaborators(
        config: &PemConfig,
        fetcher: Arc<dyn ArchiveFetcher>,
        vcs: Arc<dyn VcsClient>,
        notifier: Arc<dyn SyncNotifier>,
    ) -> Result<Self> {
        let layout = config.layout();
        layout.ensure()?;
        let locks = Arc::new(KeyedLocks::new());
        let modules = Arc::new(ModuleStore::new(
            &layout.module_dir,
            fetcher,
            Arc::clone(&vcs),
            Arc::clone(&locks),
        ));
        let data = DataRegistry::new(&layout.data_dir, vcs, Arc::clone(&locks));
        let envs = EnvironmentManager::new(&layout.env_dir, Arc::clone(&modules), notifier, locks)
            .with_owner(config.owner());
        envs.recover()?;
        tracing::info!(basedir = %layout.basedir.display(), "pem ready");
        Ok(Self {
            layout,
            modules,
            data,
            envs,
        })
    }

    /// On-disk layout.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// The module store.
    pub fn modules(&self) -> &ModuleStore {
        &self.modules
    }

    /// The data registry.
    pub fn data(&self) -> &DataRegistry {
        &self.data
    }

    /// The environment manager.
    pub fn environments(&self) -> &EnvironmentManager {
        &self.envs
    }

    /// Environments referencing a module version, read from disk.
    pub fn module_usage(&self, name: &str, version: &str) -> Result<Usage> {
        self.envs.current_usage(name, version)
    }

    /// Purge a module version unless an environment still uses it.
    pub fn purge_module(&self, name: &str, version: &str) -> Result<bool> {
        self.modules.purge_guarded(name, version, |n, v| {
            let usage = self.envs.current_usage(n.as_str(), v.as_str())?;
            if usage.in_use {
                tracing::warn!(module = %n, version = %v, environments = ?usage.environments, "purge refused");
                return Err(PemError::InUse {
                    name: n.to_string(),
                    version: v.to_string(),
                    environments: usage.environments,
                });
            }
            Ok(())
        })
    }

    /// Deploy every pinned module of a Puppetfile to the store, then deploy
    /// environment `env` from them.
    ///
    /// Registry modules without a pinned version are skipped. Git modules
    /// without an author become `myorg-<name>`; a commit pin is shortened to
    /// six characters and used as the version. Versions already in the
    /// store are not fetched again.
    #[tracing::instrument(skip(self))]
    pub fn import_puppetfile(&self, env: &str, path: &Path) -> Result<ImportOutcome> {
        let declared = puppetfile::load(path)?;
        let mut modules = BTreeMap::new();
        let mut skipped = BTreeMap::new();

        for decl in declared {
            let (name, version, source) = match &decl.kind {
                ModuleKind::Forge { version: Some(v) } => match decl.full_name() {
                    Some(full) => (full, v.clone(), ModuleSource::Registry),
                    None => {
                        skipped.insert(decl.name.clone(), "registry module without an author".into());
                        continue;
                    }
                },
                ModuleKind::Forge { version: None } => {
                    skipped.insert(
                        decl.full_name().unwrap_or_else(|| decl.name.clone()),
                        "no pinned version".into(),
                    );
                    continue;
                }
                ModuleKind::Git { remote, reference } => {
                    let Some(reference) = reference else {
                        skipped.insert(decl.name.clone(), "git module without a ref".into());
                        continue;
                    };
                    let version = if reference.is_commit() {
                        reference.as_str().chars().take(IMPORTED_COMMIT_LEN).collect()
                    } else {
                        reference.as_str().to_string()
                    };
                    let name = decl
                        .full_name()
                        .unwrap_or_else(|| format!("{DEFAULT_GIT_AUTHOR}-{}", decl.name));
                    (name, version, ModuleSource::Vcs { remote: remote.clone() })
                }
            };

            let present = match (ArtifactName::new(name.as_str()), Version::new(version.as_str())) {
                (Ok(n), Ok(v)) => self.modules.get(&n, &v).is_some(),
                _ => false,
            };
            if present {
                tracing::debug!(module = %name, %version, "already in store");
            } else {
                self.modules.deploy(&name, &version, &source)?;
            }
            modules.insert(name, version);
        }

        let deploy = self.envs.deploy(env, &modules)?;
        Ok(ImportOutcome {
            modules,
            skipped,
            deploy,
        })
    }
}
