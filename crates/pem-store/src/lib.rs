//! # pem-store: Versioned Artifact Store
//!
//! Owns the on-disk repositories of artifact versions:
//!
//! - [`ModuleStore`]: `modules/<author-name>/<version>/`, one directory per
//!   deployed module version, each completed by a `.pemversion` sidecar.
//! - [`DataRegistry`]: `data/git/<name>/<branch>/<commit>/` and
//!   `data/upload/<name>/<version>/`.
//!
//! Bytes arrive through one of three strategies selected by
//! [`ModuleSource`]: a registry archive fetched by an [`ArchiveFetcher`], a
//! repository cloned by a [`VcsClient`], or an archive the caller already
//! has. [`ForgeFetcher`] and [`GitClient`] are the production
//! implementations of the two collaborator traits.
//!
//! Listings are always derived from a directory scan. A directory without a
//! readable sidecar is not a version: it is logged and skipped.

#![deny(unsafe_code)]

pub mod archive;
pub mod data;
pub mod fetch;
pub mod materialize;
pub mod module_store;
pub mod vcs;

pub use data::{DataEntry, DataRegistry};
pub use fetch::{ArchiveFetcher, ExpectedDigest, FetchedArchive, ForgeFetcher};
pub use materialize::{Materializer, ModuleSource};
pub use module_store::{DeployReport, ModuleStore};
pub use vcs::{GitClient, VcsClient, VcsHandle};
