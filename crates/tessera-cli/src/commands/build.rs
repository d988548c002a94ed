//! `tsr build`: Render a module instance into Kubernetes objects.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context as _;
use clap::Args;
use tessera_common::config::{BuildConfig, LogFormat};
use tessera_common::constants::{DEFAULT_MODULE_PACKAGE, DEFAULT_NAMESPACE};
use tessera_common::types::OutputFormat;
use tessera_engine::Context;
use tessera_module::ModuleBuilder;

use crate::output;

/// Arguments for the `build` command.
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Name of the module instance.
    pub name: String,

    /// Path to the module directory.
    pub module: PathBuf,

    /// Namespace of the module instance.
    #[arg(short, long, default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Values file merged over the module defaults; repeat to apply several in order.
    #[arg(short = 'f', long = "values")]
    pub values: Vec<PathBuf>,

    /// Module package to load (`_` accepts any).
    #[arg(short, long, env = "TESSERA_PACKAGE", default_value = DEFAULT_MODULE_PACKAGE)]
    pub package: String,

    /// Output format (yaml or json).
    #[arg(short, long, env = "TESSERA_OUTPUT", default_value_t = OutputFormat::Yaml)]
    pub output: OutputFormat,
}

impl BuildArgs {
    fn config(&self, log_format: LogFormat) -> BuildConfig {
        BuildConfig {
            package: self.package.clone(),
            output: self.output,
            log_format,
        }
    }
}

/// Executes the `build` command.
///
/// Nothing is written to standard output unless the whole build succeeds.
///
/// # Errors
///
/// Returns an error if staging, value merging, evaluation or rendering fails.
pub fn execute(args: BuildArgs, log_format: LogFormat) -> anyhow::Result<()> {
    let config = args.config(log_format);
    tracing::info!(
        name = %args.name,
        namespace = %args.namespace,
        module = %args.module.display(),
        package = %config.package,
        "building module instance"
    );

    let ctx = Context::new();
    let workspace = tempfile::tempdir().context("failed to create build workspace")?;
    let mut builder = ModuleBuilder::new(
        &ctx,
        &args.name,
        &args.namespace,
        &args.module,
        &config.package,
    );
    builder.init_workspace(workspace.path())?;
    builder.merge_values(&args.values)?;
    let value = builder.build()?;
    let objects = builder.render(&value)?;

    let rendered = output::render_objects(config.output, &objects)?;
    std::io::stdout()
        .lock()
        .write_all(rendered.as_bytes())
        .context("failed to write output")?;
    Ok(())
}
