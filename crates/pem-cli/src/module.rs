//! # Module Subcommand
//!
//! Store operations on `author-name` modules.
//!
//! - `deploy`: materialize one or more versions from the Forge, git, or an
//!   uploaded archive. Every version is attempted; the exit code is 1 if
//!   any failed.
//! - `purge`: remove a version unless an environment uses it.
//! - `list`: every stored version, or the versions of one module.
//! - `usage`: which environments reference a version.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use pem_core::{ArtifactName, SourceType};
use pem_env::Pem;
use pem_store::ModuleSource;

use crate::{print_json, EXIT_FAILED, EXIT_OK};

/// Arguments for `pem module`.
#[derive(Args, Debug)]
pub struct ModuleArgs {
    #[command(subcommand)]
    pub command: ModuleCommand,
}

/// Module subcommands.
#[derive(Subcommand, Debug)]
pub enum ModuleCommand {
    /// Deploy module versions into the store.
    Deploy {
        /// Module name (`author-name`).
        name: String,
        /// Version to deploy; repeat for several.
        #[arg(long = "version", required = true)]
        versions: Vec<String>,
        /// Where the bytes come from: forge, git, or upload.
        #[arg(long = "type", default_value = "forge")]
        source_type: SourceType,
        /// Clone URL (git) or recorded locator (upload).
        #[arg(long)]
        source: Option<String>,
        /// Archive to unpack (upload).
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Remove a version from the store.
    Purge {
        /// Module name.
        name: String,
        /// Version to remove.
        version: String,
    },

    /// List stored versions.
    List {
        /// Restrict to one module.
        name: Option<String>,
    },

    /// Show which environments use a version.
    Usage {
        /// Module name (full or friendly).
        name: String,
        /// Version.
        version: String,
    },
}

/// Execute a module subcommand.
pub fn run_module(args: &ModuleArgs, pem: &Pem) -> Result<u8> {
    match &args.command {
        ModuleCommand::Deploy {
            name,
            versions,
            source_type,
            source,
            file,
        } => cmd_deploy(pem, name, versions, *source_type, source.clone(), file.clone()),
        ModuleCommand::Purge { name, version } => {
            let removed = pem
                .purge_module(name, version)
                .with_context(|| format!("purging {name} @ {version}"))?;
            print_json(&serde_json::json!({
                "name": name,
                "version": version,
                "removed": removed,
            }))?;
            Ok(EXIT_OK)
        }
        ModuleCommand::List { name: Some(name) } => {
            let name = ArtifactName::new(name.as_str())?;
            print_json(&pem.modules().list_versions(&name)?)?;
            Ok(EXIT_OK)
        }
        ModuleCommand::List { name: None } => {
            print_json(&pem.modules().list_all()?)?;
            Ok(EXIT_OK)
        }
        ModuleCommand::Usage { name, version } => {
            print_json(&pem.module_usage(name, version)?)?;
            Ok(EXIT_OK)
        }
    }
}

fn cmd_deploy(
    pem: &Pem,
    name: &str,
    versions: &[String],
    source_type: SourceType,
    source: Option<String>,
    file: Option<PathBuf>,
) -> Result<u8> {
    let source = ModuleSource::from_parts(source_type, source, file)?;
    let report = pem.modules().deploy_many(name, versions, &source);

    let deployed: Vec<_> = report.deployed().collect();
    let failed: BTreeMap<&str, String> = report
        .failures()
        .map(|(v, e)| {
            tracing::error!(module = %name, version = v, error = %e, "deploy failed");
            (v, e.to_string())
        })
        .collect();
    print_json(&serde_json::json!({
        "name": report.name,
        "deployed": deployed,
        "failed": failed,
    }))?;
    Ok(if report.is_success() { EXIT_OK } else { EXIT_FAILED })
}
