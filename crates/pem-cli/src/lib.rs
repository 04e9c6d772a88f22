//! # pem-cli: Command-Line Interface
//!
//! Argument parsing and output formatting for the `pem` binary. Every
//! handler takes a wired [`Pem`] and delegates to it; nothing here touches
//! the filesystem layout directly.
//!
//! ## Subcommands
//!
//! - `module`: deploy, purge, list, and usage of store versions
//! - `data`: git and upload registrations
//! - `env`: deploy, destroy, inspect, compare, archive, and Puppetfile import
//!
//! Results are printed as pretty JSON on stdout. Handlers return the exit
//! code; `main` maps errors to 1, or 2 when the failure left state that
//! needs inspection.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use pem_core::{FailureState, PemConfig, PemError};
use pem_env::Pem;

pub mod data;
pub mod env;
pub mod module;

/// Exit code for success.
pub const EXIT_OK: u8 = 0;
/// Exit code for a failure that left nothing changed.
pub const EXIT_FAILED: u8 = 1;
/// Exit code for a failure whose outcome is unknown.
pub const EXIT_INDETERMINATE: u8 = 2;

/// Load the configuration and wire every component.
pub fn open(config: Option<&Path>) -> Result<Pem> {
    let path = PemConfig::resolve_path(config);
    tracing::debug!(config = %path.display(), "loading configuration");
    let config = PemConfig::load(&path)?;
    Pem::from_config(&config).context("initializing pem")
}

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("serializing output")?;
    println!("{out}");
    Ok(())
}

/// Exit code for an error returned by a handler.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<PemError>().map(PemError::failure_state) {
        Some(FailureState::Indeterminate) => EXIT_INDETERMINATE,
        _ => EXIT_FAILED,
    }
}

/// JSON body describing an error.
pub fn error_body(err: &anyhow::Error) -> serde_json::Value {
    let state = err
        .downcast_ref::<PemError>()
        .map(PemError::failure_state)
        .unwrap_or(FailureState::Unchanged);
    serde_json::json!({
        "error": format!("{err:#}"),
        "state": state,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::time::Duration;

    use pem_core::PemConfig;
    use pem_env::{NoopNotifier, Pem};
    use pem_store::{ForgeFetcher, GitClient};

    /// An instance over `base` that never reaches a network.
    pub fn pem(base: &std::path::Path) -> Pem {
        Pem::with_collaborators(
            &PemConfig::with_basedir(base),
            Arc::new(ForgeFetcher::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap()),
            Arc::new(GitClient::new(Duration::from_secs(5))),
            Arc::new(NoopNotifier),
        )
        .unwrap()
    }

    /// Write a `.tar.gz` with `files` under `top/`.
    pub fn tarball(out: &std::path::Path, top: &str, files: &[(&str, &str)]) {
        let file = std::fs::File::create(out).unwrap();
        let enc = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut b = tar::Builder::new(enc);
        for (path, body) in files {
            let mut h = tar::Header::new_gnu();
            h.set_size(body.len() as u64);
            h.set_mode(0o644);
            h.set_cksum();
            b.append_data(&mut h, format!("{top}/{path}"), body.as_bytes())
                .unwrap();
        }
        b.into_inner().unwrap().finish().unwrap();
    }
}
