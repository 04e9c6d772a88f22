//! # Data Subcommand
//!
//! Data registrations: git branches keyed by commit, and uploaded archives
//! keyed by a caller-assigned version.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use pem_env::Pem;

use crate::{print_json, EXIT_OK};

/// Arguments for `pem data`.
#[derive(Args, Debug)]
pub struct DataArgs {
    #[command(subcommand)]
    pub command: DataCommand,
}

/// Data subcommands.
#[derive(Subcommand, Debug)]
pub enum DataCommand {
    /// Register the current head of a branch.
    Git {
        /// Registration name (`author-name`).
        name: String,
        /// Clone URL.
        #[arg(long)]
        source: String,
        /// Branch to register.
        #[arg(long)]
        branch: String,
        /// Mount hint recorded for consumers.
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Register an uploaded archive.
    Upload {
        /// Registration name (`author-name`).
        name: String,
        /// Version to store the archive under.
        #[arg(long)]
        version: String,
        /// The `.tar.gz` archive.
        #[arg(long)]
        file: PathBuf,
        /// Mount hint recorded for consumers.
        #[arg(long)]
        prefix: Option<String>,
    },

    /// List every registration.
    List,

    /// Remove one registered commit.
    PurgeGit {
        /// Registration name.
        name: String,
        /// Branch the commit was registered from.
        branch: String,
        /// Commit id.
        commit: String,
    },

    /// Remove one uploaded version.
    PurgeUpload { name: String, version: String },
}

/// Execute a data subcommand.
pub fn run_data(args: &DataArgs, pem: &Pem) -> Result<u8> {
    let data = pem.data();
    match &args.command {
        DataCommand::Git {
            name,
            source,
            branch,
            prefix,
        } => {
            let sidecar = data
                .register_git(name, source, Some(branch.as_str()), prefix.as_deref())
                .with_context(|| format!("registering {name} from {source}"))?;
            print_json(&sidecar)?;
        }
        DataCommand::Upload {
            name,
            version,
            file,
            prefix,
        } => {
            let sidecar = data
                .register_upload(name, Some(version.as_str()), Some(file.as_path()), prefix.as_deref())
                .with_context(|| format!("registering upload {name} @ {version}"))?;
            print_json(&sidecar)?;
        }
        DataCommand::List => print_json(&data.list()?)?,
        DataCommand::PurgeGit {
            name,
            branch,
            commit,
        } => {
            let removed = data.purge_git(name, branch, commit)?;
            print_json(&serde_json::json!({ "removed": removed }))?;
        }
        DataCommand::PurgeUpload { name, version } => {
            let removed = data.purge_upload(name, version)?;
            print_json(&serde_json::json!({ "removed": removed }))?;
        }
    }
    Ok(EXIT_OK)
}
