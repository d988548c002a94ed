//! CLI command definitions and dispatch.

pub mod build;
pub mod bundle;

use clap::{Parser, Subcommand};
use tessera_common::config::LogFormat;

/// Render Kubernetes objects from declarative modules and bundles.
#[derive(Parser, Debug)]
#[command(name = "tsr", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Log record format written to standard error (text or json).
    #[arg(long, global = true, env = "TESSERA_LOG_FORMAT", default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Render a module instance into Kubernetes objects.
    Build(build::BuildArgs),
    /// Build or vet bundles of module instances.
    Bundle(bundle::BundleArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Build(args) => build::execute(args, cli.log_format),
        Command::Bundle(args) => bundle::execute(args),
    }
}
