//! `tsr bundle`: Build or vet bundles of module instances.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Args, Subcommand};
use serde::Serialize;
use tessera_bundle::{Bundle, BundleBuilder, BundleInstance};
use tessera_common::types::{ModuleReference, OutputFormat};
use tessera_engine::Context;

use crate::output;

/// Arguments for the `bundle` command.
#[derive(Args, Debug)]
pub struct BundleArgs {
    /// Bundle subcommand to execute.
    #[command(subcommand)]
    pub command: BundleCommand,
}

/// Available bundle subcommands.
#[derive(Subcommand, Debug)]
pub enum BundleCommand {
    /// Build a bundle and print its instances with their values.
    Build(BundleBuildArgs),
    /// Validate a bundle and print its instance names.
    Vet(BundleVetArgs),
}

/// Arguments for `bundle build`.
#[derive(Args, Debug)]
pub struct BundleBuildArgs {
    /// Bundle file; repeat to apply several in order.
    #[arg(short = 'f', long = "file", required = true)]
    pub files: Vec<PathBuf>,

    /// Output format (yaml or json).
    #[arg(short, long, env = "TESSERA_OUTPUT", default_value_t = OutputFormat::Yaml)]
    pub output: OutputFormat,
}

/// Arguments for `bundle vet`.
#[derive(Args, Debug)]
pub struct BundleVetArgs {
    /// Bundle file; repeat to apply several in order.
    #[arg(short = 'f', long = "file", required = true)]
    pub files: Vec<PathBuf>,
}

/// An instance as printed by `bundle build`.
#[derive(Debug, Serialize)]
struct InstanceDocument<'a> {
    bundle: &'a str,
    name: &'a str,
    namespace: &'a str,
    module: &'a ModuleReference,
    values: serde_json::Value,
}

impl<'a> InstanceDocument<'a> {
    fn resolve(instance: &'a BundleInstance) -> anyhow::Result<Self> {
        Ok(Self {
            bundle: &instance.bundle,
            name: &instance.name,
            namespace: &instance.namespace,
            module: &instance.module,
            values: instance.values.resolve()?,
        })
    }
}

/// Executes a `bundle` subcommand.
///
/// # Errors
///
/// Returns an error if the bundle fails to build or its values are not
/// concrete.
pub fn execute(args: BundleArgs) -> anyhow::Result<()> {
    match args.command {
        BundleCommand::Build(args) => build(&args),
        BundleCommand::Vet(args) => vet(&args),
    }
}

fn load(files: &[PathBuf]) -> anyhow::Result<Bundle> {
    let ctx = Context::new();
    let workspace = tempfile::tempdir().context("failed to create bundle workspace")?;
    let mut builder = BundleBuilder::new(&ctx, files.to_vec());
    builder.init_workspace(workspace.path())?;
    let value = builder.build()?;
    Ok(builder.get_bundle(&value)?)
}

fn build(args: &BundleBuildArgs) -> anyhow::Result<()> {
    tracing::info!(files = args.files.len(), "building bundle");
    let bundle = load(&args.files)?;
    let documents = bundle
        .instances
        .iter()
        .map(InstanceDocument::resolve)
        .collect::<anyhow::Result<Vec<_>>>()?;

    let rendered = match args.output {
        OutputFormat::Json => output::json_array(&documents)?,
        OutputFormat::Yaml => output::yaml_stream(&documents)?,
    };
    write_stdout(&rendered)
}

fn vet(args: &BundleVetArgs) -> anyhow::Result<()> {
    tracing::info!(files = args.files.len(), "vetting bundle");
    let bundle = load(&args.files)?;
    let mut rendered = String::new();
    for name in bundle.names() {
        rendered.push_str(name);
        rendered.push('\n');
    }
    tracing::info!(bundle = %bundle.name, instances = bundle.instances.len(), "bundle is valid");
    write_stdout(&rendered)
}

fn write_stdout(text: &str) -> anyhow::Result<()> {
    std::io::stdout()
        .lock()
        .write_all(text.as_bytes())
        .context("failed to write output")
}
