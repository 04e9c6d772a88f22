//! # pem-core: Foundational Types for the Puppet Environment Manager
//!
//! This crate is the leaf of the workspace DAG. It defines the types every
//! other crate agrees on:
//!
//! - **Validated names.** [`ArtifactName`] (`author-name`), [`EnvName`],
//!   [`Version`]. No bare strings reach the filesystem layer; every name is
//!   checked once, at construction, and is safe to use as a path segment.
//!
//! - **Version records and sidecars.** A [`VersionRecord`] describes one
//!   materialized artifact version. The `.pemversion` sidecar next to the
//!   content is the single source of truth: it is written last, atomically,
//!   so "sidecar exists" means "version is complete".
//!
//! - **Error taxonomy.** [`PemError`] carries every failure class the system
//!   distinguishes, and [`FailureState`] tells callers whether a failure left
//!   things untouched (safe to retry) or needs an operator.
//!
//! - **Configuration and layout.** [`PemConfig`] is read from `config.yml`;
//!   [`Layout`] derives the module, environment, and data roots from it.
//!
//! - **Keyed locks.** [`KeyedLocks`] serializes mutations per artifact
//!   version and per environment name.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `pem-*` crates.
//! - No `unsafe` code.
//! - No `.unwrap()` outside tests.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod fsutil;
pub mod identity;
pub mod lock;
pub mod sidecar;
pub mod version;

// Re-export primary types for ergonomic imports.
pub use config::{FilesyncConfig, Layout, OwnerSpec, PemConfig};
pub use error::{FailureState, PemError, PublishStatus, Result};
pub use identity::{ArtifactName, EnvName, Version};
pub use lock::{KeyGuard, KeyedLocks};
pub use sidecar::{DataSidecar, EnvModuleSidecar, EnvSidecar, SIDECAR_FILE};
pub use version::{SourceType, VersionRecord, FORGE_WEB_URL, UPLOAD_SOURCE};
