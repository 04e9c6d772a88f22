//! # Error Types
//!
//! One error enum for the whole core. Variants follow the failure classes
//! an operator has to tell apart:
//!
//! - input rejected before anything was touched (`InvalidName`,
//!   `MissingInput`, `UnknownArtifact`, `UnknownEnvironment`, `InUse`);
//! - a collaborator failed (`Fetch`, `Integrity`, `Checkout`, `Timeout`,
//!   `Notify`);
//! - an environment deploy failed and was rolled back (`RolledBack`), or the
//!   rollback itself failed (`RestoreFailed`).
//!
//! [`PemError::failure_state`] folds these into the two outcomes callers act
//! on: retry, or page someone.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience alias used across the workspace.
pub type Result<T, E = PemError> = std::result::Result<T, E>;

/// Top-level error type for the Puppet environment manager.
#[derive(Error, Debug)]
pub enum PemError {
    /// A name failed validation (artifact, environment, version, branch).
    #[error("invalid {kind} name {value:?}: {reason}")]
    InvalidName {
        /// What kind of name was rejected.
        kind: &'static str,
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A referenced artifact name/version does not exist in the store.
    #[error("unknown module or version supplied for {name} @ {version}: {reason}")]
    UnknownArtifact {
        /// Requested name (full or friendly).
        name: String,
        /// Requested version.
        version: String,
        /// Why resolution failed.
        reason: String,
    },

    /// A referenced environment does not exist.
    #[error("unknown environment: {0}")]
    UnknownEnvironment(String),

    /// A required input was not supplied.
    #[error("missing input: {0}")]
    MissingInput(String),

    /// Fetching an archive from the registry failed.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// A fetched archive failed integrity verification.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// Cloning or checking out a version-control source failed.
    #[error("checkout failed: {0}")]
    Checkout(String),

    /// A long-running collaborator step exceeded its deadline.
    #[error("{operation} timed out after {}s", after.as_secs())]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The configured limit.
        after: Duration,
    },

    /// Purge refused because the version is referenced by environments.
    #[error("{name} @ {version} is in use by environments: {}", environments.join(", "))]
    InUse {
        /// Artifact name.
        name: String,
        /// Artifact version.
        version: String,
        /// Environments referencing the version.
        environments: Vec<String>,
    },

    /// A sidecar file could not be read or parsed.
    #[error("corrupt sidecar at {}: {reason}", path.display())]
    CorruptSidecar {
        /// Path of the sidecar.
        path: PathBuf,
        /// Parse or read failure.
        reason: String,
    },

    /// Configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The downstream sync notification failed.
    #[error("sync notification failed: {0}")]
    Notify(String),

    /// Environment deploy failed; the previous state was put back.
    #[error("deploy of environment {environment} failed and was rolled back: {cause}")]
    RolledBack {
        /// Environment name.
        environment: String,
        /// The original failure.
        cause: Box<PemError>,
        /// Whether the restored state was republished.
        publish: PublishStatus,
    },

    /// Environment deploy failed and restoring the previous state failed too.
    #[error("deploy of environment {environment} failed ({cause}); restore failed: {restore}")]
    RestoreFailed {
        /// Environment name.
        environment: String,
        /// The original failure.
        cause: Box<PemError>,
        /// The restore failure.
        restore: Box<PemError>,
    },

    /// Filesystem failure with the path or step that produced it.
    #[error("{context}: {source}")]
    Io {
        /// What was being done.
        context: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// What a failure means for the state of the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureState {
    /// Nothing observable changed; the operation can be retried.
    Unchanged,
    /// Disk or downstream state is unknown; needs operator inspection.
    Indeterminate,
}

/// Outcome of the downstream publish step after an environment mutation.
///
/// Kept separate from the mutation result: an environment can be correct on
/// disk while publishing is still pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PublishStatus {
    /// Commit, force-sync, and cache invalidation all succeeded.
    Published,
    /// The notifier failed; the change is on disk but not yet live.
    Pending {
        /// Notifier failure.
        reason: String,
    },
    /// No notifier is configured.
    Disabled,
}

impl PublishStatus {
    /// Whether downstream consumers are known to see the change.
    pub fn is_published(&self) -> bool {
        matches!(self, Self::Published)
    }
}

impl std::fmt::Display for PublishStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Published => f.write_str("published"),
            Self::Pending { reason } => write!(f, "pending ({reason})"),
            Self::Disabled => f.write_str("disabled"),
        }
    }
}

impl PemError {
    /// Wrap an I/O error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Build an `InvalidName` error.
    pub fn invalid_name(kind: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            kind,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Classify the failure for callers deciding between retry and escalation.
    pub fn failure_state(&self) -> FailureState {
        match self {
            Self::InvalidName { .. }
            | Self::UnknownArtifact { .. }
            | Self::UnknownEnvironment(_)
            | Self::MissingInput(_)
            | Self::InUse { .. }
            | Self::CorruptSidecar { .. }
            | Self::Config(_)
            | Self::Fetch(_)
            | Self::Integrity(_)
            | Self::Checkout(_)
            | Self::Timeout { .. } => FailureState::Unchanged,
            Self::RolledBack { publish, .. } => {
                if matches!(publish, PublishStatus::Pending { .. }) {
                    FailureState::Indeterminate
                } else {
                    FailureState::Unchanged
                }
            }
            Self::Notify(_) | Self::RestoreFailed { .. } | Self::Io { .. } => {
                FailureState::Indeterminate
            }
        }
    }

    /// Whether the caller can retry without inspecting anything first.
    pub fn is_retry_safe(&self) -> bool {
        self.failure_state() == FailureState::Unchanged
    }
}
