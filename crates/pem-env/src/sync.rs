//! # Downstream Publishing
//!
//! After an environment changes on disk, the Puppet primary server has to be
//! told: file-sync commits the staging directory, force-syncs it to the
//! live code directory, and the environment cache is flushed. The calls are
//! made in that order and stop at the first failure.
//!
//! A failed publish never undoes a successful environment change. It is
//! reported as [`PublishStatus::Pending`] next to the result.

use std::fs;
use std::time::Duration;

use pem_core::{FilesyncConfig, PemError, PublishStatus, Result};

/// Tells downstream consumers that staged changes are ready.
pub trait SyncNotifier: Send + Sync {
    /// Publish staged changes.
    fn publish(&self) -> Result<()>;

    /// Whether publishing is configured at all.
    fn enabled(&self) -> bool {
        true
    }
}

/// Run `notifier` and fold the outcome into a [`PublishStatus`].
pub fn publish_status(notifier: &dyn SyncNotifier) -> PublishStatus {
    if !notifier.enabled() {
        return PublishStatus::Disabled;
    }
    match notifier.publish() {
        Ok(()) => PublishStatus::Published,
        Err(e) => {
            tracing::error!(error = %e, "publish failed; change is staged but not live");
            PublishStatus::Pending {
                reason: e.to_string(),
            }
        }
    }
}

/// Publishing is not configured.
#[derive(Debug, Default)]
pub struct NoopNotifier;

impl SyncNotifier for NoopNotifier {
    fn publish(&self) -> Result<()> {
        tracing::debug!("publishing disabled; skipping file-sync");
        Ok(())
    }

    fn enabled(&self) -> bool {
        false
    }
}

/// Port of the Puppet Server admin endpoints.
pub const FILESYNC_PORT: u16 = 8140;

/// [`SyncNotifier`] for the Puppet Server file-sync service.
#[derive(Debug)]
pub struct FilesyncNotifier {
    client: reqwest::blocking::Client,
    base_url: String,
}

fn read_pem(path: &std::path::Path, what: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| PemError::Config(format!("reading {what} {}: {e}", path.display())))
}

impl FilesyncNotifier {
    /// Build a notifier for `https://<master>:8140` with client certificate
    /// authentication.
    pub fn new(config: &FilesyncConfig) -> Result<Self> {
        let mut identity = read_pem(&config.cert, "filesync_cert")?;
        identity.push(b'\n');
        identity.extend(read_pem(&config.key, "filesync_cert_key")?);
        let identity = reqwest::Identity::from_pem(&identity)
            .map_err(|e| PemError::Config(format!("invalid filesync client certificate: {e}")))?;
        let ca = reqwest::Certificate::from_pem(&read_pem(&config.ca_cert, "filesync_ca_cert")?)
            .map_err(|e| PemError::Config(format!("invalid filesync CA certificate: {e}")))?;

        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .identity(identity)
            .add_root_certificate(ca)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| PemError::Config(format!("failed to build file-sync client: {e}")))?;
        Ok(Self::from_client(
            client,
            format!("https://{}:{FILESYNC_PORT}", config.master),
        ))
    }

    /// Use an existing client against `base_url`.
    pub fn from_client(client: reqwest::blocking::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// A plain client against `base_url`, without client certificates.
    pub fn plain(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PemError::Config(format!("failed to build file-sync client: {e}")))?;
        Ok(Self::from_client(client, base_url))
    }

    fn call(&self, step: &str, request: reqwest::blocking::RequestBuilder) -> Result<()> {
        tracing::debug!(step, "calling file-sync");
        let resp = request
            .send()
            .map_err(|e| PemError::Notify(format!("{step}: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(PemError::Notify(format!(
                "{step}: HTTP {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }
        Ok(())
    }
}

impl SyncNotifier for FilesyncNotifier {
    fn publish(&self) -> Result<()> {
        tracing::info!(server = %self.base_url, "starting file-sync publish");
        self.call(
            "commit",
            self.client
                .post(format!("{}/file-sync/v1/commit", self.base_url))
                .json(&serde_json::json!({ "commit-all": true })),
        )?;
        self.call(
            "force-sync",
            self.client
                .post(format!("{}/file-sync/v1/force-sync", self.base_url)),
        )?;
        self.call(
            "environment-cache",
            self.client
                .delete(format!("{}/puppet-admin-api/v1/environment-cache", self.base_url)),
        )?;
        tracing::info!("file-sync publish complete");
        Ok(())
    }
}
