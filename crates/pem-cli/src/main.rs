//! # pem CLI entry point
//!
//! Parses arguments, installs the tracing subscriber, wires a [`Pem`] from
//! the configuration file, and dispatches to the subcommand handlers.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pem_cli::data::{run_data, DataArgs};
use pem_cli::env::{run_env, EnvArgs};
use pem_cli::module::{run_module, ModuleArgs};
use pem_cli::{error_body, exit_code, open, print_json};

/// Puppet environment manager.
///
/// Keeps every deployed module version side by side and composes named
/// environments out of them.
#[derive(Parser, Debug)]
#[command(name = "pem", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    /// Path to the configuration file.
    #[arg(long, global = true, env = "PEM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Module store operations.
    Module(ModuleArgs),

    /// Data registrations.
    Data(DataArgs),

    /// Environment operations.
    Env(EnvArgs),
}

fn init_tracing(verbose: u8, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        })
    });
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "pem starting");

    let result = open(cli.config.as_deref()).and_then(|pem| match &cli.command {
        Commands::Module(args) => run_module(args, &pem),
        Commands::Data(args) => run_data(args, &pem),
        Commands::Env(args) => run_env(args, &pem),
    });

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            let _ = print_json(&error_body(&e));
            ExitCode::from(exit_code(&e))
        }
    }
}
