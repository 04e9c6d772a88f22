//! # Env Subcommand
//!
//! Environment lifecycle and queries. A deploy request is either repeated
//! `--module NAME=VERSION` flags or a JSON/YAML file mapping names to
//! versions:
//!
//! ```yaml
//! puppetlabs-ntp: 6.4.1
//! apache: 2.0.0
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};

use pem_core::PublishStatus;
use pem_env::Pem;

use crate::{print_json, EXIT_OK};

/// Arguments for `pem env`.
#[derive(Args, Debug)]
pub struct EnvArgs {
    #[command(subcommand)]
    pub command: EnvCommand,
}

/// Environment subcommands.
#[derive(Subcommand, Debug)]
pub enum EnvCommand {
    /// Build or rebuild an environment.
    Deploy {
        /// Environment name.
        name: String,
        /// `NAME=VERSION`; repeat for each module.
        #[arg(long = "module", value_parser = parse_pin, conflicts_with = "from")]
        modules: Vec<(String, String)>,
        /// JSON or YAML file mapping module names to versions.
        #[arg(long)]
        from: Option<PathBuf>,
    },

    /// Remove an environment.
    Destroy {
        /// Environment name.
        name: String,
    },

    /// Show the modules of one environment.
    Modules {
        /// Environment name.
        name: String,
    },

    /// List every environment with its modules.
    List,

    /// Compare two environments.
    Compare {
        /// First environment.
        left: String,
        /// Second environment.
        right: String,
    },

    /// Pack an environment into a `.tar.gz`.
    Archive {
        /// Environment name.
        name: String,
        /// Output file.
        #[arg(long)]
        out: PathBuf,
    },

    /// Deploy the modules pinned by a Puppetfile, then the environment.
    Import {
        /// Environment name.
        name: String,
        /// Puppetfile to read.
        #[arg(long)]
        puppetfile: PathBuf,
    },
}

/// Parse `NAME=VERSION`.
fn parse_pin(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, version)) if !name.is_empty() && !version.is_empty() => {
            Ok((name.to_string(), version.to_string()))
        }
        _ => Err(format!("expected NAME=VERSION, got {raw:?}")),
    }
}

/// Read a module request file; `.json` as JSON, anything else as YAML.
///
/// Numeric versions (`apache: 2.0`) are taken as written.
fn read_request(path: &Path) -> Result<BTreeMap<String, String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let parsed: BTreeMap<String, serde_yaml::Value> =
        if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        } else {
            serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        };
    parsed
        .into_iter()
        .map(|(name, value)| {
            let version = match value {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                other => bail!("version of {name} must be a string, got {other:?}"),
            };
            Ok((name, version))
        })
        .collect()
}

fn warn_pending(publish: &PublishStatus) {
    if let PublishStatus::Pending { reason } = publish {
        tracing::warn!(%reason, "change is on disk but not yet published");
    }
}

/// Execute an env subcommand.
pub fn run_env(args: &EnvArgs, pem: &Pem) -> Result<u8> {
    let envs = pem.environments();
    match &args.command {
        EnvCommand::Deploy {
            name,
            modules,
            from,
        } => {
            let request = match from {
                Some(path) => read_request(path)?,
                None if modules.is_empty() => bail!("give --module NAME=VERSION or --from FILE"),
                None => modules.iter().cloned().collect(),
            };
            let outcome = envs
                .deploy(name, &request)
                .with_context(|| format!("deploying environment {name}"))?;
            warn_pending(&outcome.publish);
            print_json(&outcome)?;
        }
        EnvCommand::Destroy { name } => {
            let outcome = envs
                .destroy(name)
                .with_context(|| format!("destroying environment {name}"))?;
            warn_pending(&outcome.publish);
            print_json(&outcome)?;
        }
        EnvCommand::Modules { name } => print_json(&envs.current_modules(name)?)?,
        EnvCommand::List => print_json(&envs.environments())?,
        EnvCommand::Compare { left, right } => print_json(&envs.compare(left, right)?)?,
        EnvCommand::Archive { name, out } => {
            let path = envs.archive(name, out)?;
            print_json(&serde_json::json!({ "environment": name, "archive": path }))?;
        }
        EnvCommand::Import { name, puppetfile } => {
            let outcome = pem
                .import_puppetfile(name, puppetfile)
                .with_context(|| format!("importing {}", puppetfile.display()))?;
            warn_pending(&outcome.deploy.publish);
            print_json(&outcome)?;
        }
    }
    Ok(EXIT_OK)
}
