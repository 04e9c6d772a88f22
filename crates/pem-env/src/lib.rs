//! # pem-env: Environment Composition Engine
//!
//! Builds named environments out of module versions held by the
//! [`ModuleStore`](pem_store::ModuleStore), and answers questions about
//! them.
//!
//! ## Components
//!
//! - [`EnvironmentManager`]: deploy, redeploy, and destroy environments.
//!   A redeploy moves the old tree aside, builds the new one, and either
//!   discards the backup or puts it back.
//! - [`EnvIndex`]: the cached snapshot of every environment's module map,
//!   rebuilt wholesale by [`EnvironmentManager::refresh_index`] after every
//!   mutation.
//! - [`diff::compare`]: pure set difference of two module maps.
//! - [`usage`]: which environments reference a module version.
//! - [`LegacyVersionResolver`]: version probes for modules placed by other
//!   tools.
//! - [`SyncNotifier`]: publishes staged changes downstream;
//!   [`FilesyncNotifier`] talks to the Puppet file-sync service.
//! - [`Pem`]: one instance of everything, wired from a
//!   [`PemConfig`](pem_core::PemConfig).

#![deny(unsafe_code)]

pub mod backup;
pub mod diff;
pub mod index;
pub mod legacy;
pub mod manager;
pub mod puppetfile;
pub mod service;
pub mod sync;
pub mod usage;

pub use diff::EnvDiff;
pub use index::{EnvIndex, EnvSnapshot, ModuleEntry, ModuleMap};
pub use legacy::LegacyVersionResolver;
pub use manager::{DeployOutcome, DestroyOutcome, EnvironmentManager, RecoveryReport};
pub use service::{ImportOutcome, Pem};
pub use sync::{FilesyncNotifier, NoopNotifier, SyncNotifier};
pub use usage::Usage;
