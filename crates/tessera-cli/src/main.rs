//! # tsr: tessera CLI
//!
//! Builds module instances and bundles from declarative sources.
//! Rendered documents go to standard output, logs to standard error.

mod commands;
mod output;

use clap::Parser;
use tessera_common::config::LogFormat;

use crate::commands::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);
    commands::execute(cli)
}

fn init_tracing(format: LogFormat) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}
