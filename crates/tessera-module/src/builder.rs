//! Builds a module instance and renders its objects.
//!
//! A module is a directory of declarative sources in one package. Its
//! default values live in `values.cue`; user supplied value files are merged
//! over them before the package is evaluated with the instance name and
//! namespace injected.

use std::path::{Path, PathBuf};

use tessera_bundle::{Injector, workspace};
use tessera_common::constants::{
    ANY_PACKAGE, MODULE_OBJECTS_SELECTOR, MODULE_VALUES_FILE, MODULE_VALUES_SELECTOR,
    RUNTIME_NAME_KEY, RUNTIME_NAMESPACE_KEY, SOURCE_EXTENSION,
};
use tessera_common::error::{Result, TesseraError};
use tessera_common::types::Encoding;
use tessera_engine::parser::{self, ast::SourceFile};
use tessera_engine::{Context, DataFile, LoadConfig, Selector, SourceText, Value};

use crate::values;

/// Compiles a module directory into rendered objects.
#[derive(Debug)]
pub struct ModuleBuilder<'c> {
    ctx: &'c Context,
    name: String,
    namespace: String,
    module_dir: PathBuf,
    package: String,
    injector: Injector,
    workspace: Option<PathBuf>,
    files: Vec<PathBuf>,
    values_file: Option<PathBuf>,
}

impl<'c> ModuleBuilder<'c> {
    /// Creates a builder for the instance `name` in `namespace`.
    ///
    /// `package` selects the module package; `_` accepts whichever package
    /// the files declare.
    #[must_use]
    pub fn new(
        ctx: &'c Context,
        name: impl Into<String>,
        namespace: impl Into<String>,
        module_dir: impl Into<PathBuf>,
        package: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let namespace = namespace.into();
        let injector = Injector::from_process_env()
            .with_runtime(RUNTIME_NAME_KEY, name.clone())
            .with_runtime(RUNTIME_NAMESPACE_KEY, namespace.clone());
        Self {
            ctx,
            name,
            namespace,
            module_dir: module_dir.into(),
            package: package.into(),
            injector,
            workspace: None,
            files: Vec::new(),
            values_file: None,
        }
    }

    /// Replaces the injector. The instance name and namespace are always
    /// set as `runtime` values on top of it.
    #[must_use]
    pub fn with_injector(mut self, injector: Injector) -> Self {
        self.injector = injector
            .with_runtime(RUNTIME_NAME_KEY, self.name.clone())
            .with_runtime(RUNTIME_NAMESPACE_KEY, self.namespace.clone());
        self
    }

    /// Instance name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instance namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Staged files, empty until [`ModuleBuilder::init_workspace`] runs.
    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Stages the module's sources into `dir` and injects runtime values.
    ///
    /// Only the top level of the module directory is read, in file name
    /// order.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the module cannot be read or staged, a load
    /// error if it holds no sources, or an injection error.
    pub fn init_workspace(&mut self, dir: &Path) -> Result<()> {
        let sources = self.module_sources()?;
        if sources.is_empty() {
            return Err(TesseraError::Load {
                message: format!("no .{SOURCE_EXTENSION} files in {}", self.module_dir.display()),
            });
        }
        tracing::info!(
            module = %self.module_dir.display(),
            workspace = %dir.display(),
            count = sources.len(),
            "staging module"
        );

        let staged = workspace::stage_files(&sources, dir)?;
        for path in &staged {
            let text = self.injector.inject(path)?;
            std::fs::write(path, text).map_err(|e| TesseraError::io(path, e))?;
        }

        self.values_file = sources
            .iter()
            .position(|p| p.file_name().is_some_and(|n| n == MODULE_VALUES_FILE))
            .map(|idx| staged[idx].clone());
        self.files = staged;
        self.workspace = Some(dir.to_path_buf());
        Ok(())
    }

    fn module_sources(&self) -> Result<Vec<PathBuf>> {
        let entries =
            std::fs::read_dir(&self.module_dir).map_err(|e| TesseraError::io(&self.module_dir, e))?;
        let mut sources = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| TesseraError::io(&self.module_dir, e))?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == SOURCE_EXTENSION) {
                sources.push(path);
            }
        }
        sources.sort();
        Ok(sources)
    }

    /// Merges the given value files, in order, over the module defaults and
    /// replaces the staged `values.cue` with the result.
    ///
    /// Each file is evaluated on its own and its `values` field must be
    /// concrete. Maps are merged key by key; any other value is replaced by
    /// the last file that sets it.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the workspace is not initialised, or
    /// the first read, evaluation or export error, attributed to its file.
    pub fn merge_values(&mut self, files: &[PathBuf]) -> Result<()> {
        let Some(dir) = self.workspace.clone() else {
            return Err(TesseraError::Config {
                message: "module workspace is not initialised".into(),
            });
        };
        if files.is_empty() {
            return Ok(());
        }

        let (package, mut merged) = match &self.values_file {
            Some(path) => {
                let source = SourceText::read(path)?;
                let package = self.parse(&source)?.package;
                let value = self.ctx.compile_str(&source.name, &source.text)?;
                (package, export_values(&value, &source.name)?)
            }
            None => (
                self.declared_package()?,
                serde_json::Value::Object(serde_json::Map::new()),
            ),
        };

        for path in files {
            tracing::debug!(path = %path.display(), "merging values file");
            let overlay = self.read_values(path)?;
            values::merge(&mut merged, overlay);
        }

        let text = values::render_source(package.as_deref(), &merged)?;

        let target = if let Some(path) = &self.values_file {
            std::fs::write(path, &text).map_err(|e| TesseraError::io(path, e))?;
            path.clone()
        } else {
            let path = workspace::stage_text(&dir, self.files.len(), MODULE_VALUES_FILE, &text)?;
            self.files.push(path.clone());
            self.values_file = Some(path.clone());
            path
        };
        tracing::info!(path = %target.display(), count = files.len(), "values merged");
        Ok(())
    }

    /// Package clause of the first staged source, used when the module has
    /// no values file of its own.
    fn declared_package(&self) -> Result<Option<String>> {
        let Some(first) = self.files.first() else {
            return Ok(None);
        };
        let source = SourceText::read(first)?;
        Ok(self.parse(&source)?.package)
    }

    fn parse(&self, source: &SourceText) -> Result<SourceFile> {
        parser::parse_source_nested(&source.name, &source.text, self.ctx.options().max_depth)
    }

    fn read_values(&self, path: &Path) -> Result<serde_json::Value> {
        let source = SourceText::read(path)?;
        let value = match Encoding::from_file_name(&source.name) {
            Some(Encoding::Cue) => self.ctx.compile_str(&source.name, &source.text)?,
            Some(encoding) => self.ctx.parse_data(&DataFile {
                name: source.name.clone(),
                encoding,
                text: source.text,
            })?,
            None => {
                return Err(TesseraError::Load {
                    message: format!("{}: unsupported values file type", source.name),
                });
            }
        };
        export_values(&value, &source.name)
    }

    /// Loads and evaluates the module package and checks that its values
    /// and objects are concrete.
    ///
    /// # Errors
    ///
    /// Returns a load error if the package is missing, an evaluation error,
    /// or a lookup error if `values` or `objects` is not defined.
    pub fn build(&self) -> Result<Value> {
        let config = if self.package == ANY_PACKAGE {
            LoadConfig {
                data_files: false,
                ..LoadConfig::any_package()
            }
        } else {
            LoadConfig::package(self.package.as_str())
        };

        let instance = self
            .ctx
            .load(&self.files, &config)
            .into_iter()
            .next()
            .ok_or_else(|| TesseraError::Load {
                message: "no instances found".into(),
            })?
            .into_result()?;

        let value = self.ctx.build_instance(&instance)?;
        for selector in [MODULE_VALUES_SELECTOR, MODULE_OBJECTS_SELECTOR] {
            let _ = value.lookup(&Selector::parse(selector)?)?;
        }
        value.validate(true)?;
        tracing::info!(name = %self.name, namespace = %self.namespace, "module built");
        Ok(value)
    }

    /// Exports every object of a built module, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns a lookup error if `objects` is missing or not a struct, or a
    /// validation error naming the first unresolved path.
    pub fn render(&self, value: &Value) -> Result<Vec<serde_json::Value>> {
        let objects_path = Selector::parse(MODULE_OBJECTS_SELECTOR)?;
        let fields = value
            .lookup(&objects_path)?
            .fields()
            .map_err(|e| TesseraError::Lookup {
                path: objects_path.to_string(),
                message: e.to_string(),
            })?;

        let objects = fields
            .into_iter()
            .map(|(name, object)| {
                let base = objects_path.child(name);
                object.to_json().map_err(|err| rooted(&base, err))
            })
            .collect::<Result<Vec<_>>>()?;
        tracing::info!(count = objects.len(), "module rendered");
        Ok(objects)
    }
}

fn export_values(value: &Value, file: &str) -> Result<serde_json::Value> {
    let selector = Selector::parse(MODULE_VALUES_SELECTOR)?;
    value
        .lookup(&selector)
        .and_then(|values| values.to_json().map_err(|e| rooted(&selector, e)))
        .map_err(|e| e.in_file(file))
}

/// Moves the path of a validation error raised on a sub-value under `base`.
fn rooted(base: &Selector, err: TesseraError) -> TesseraError {
    match err {
        TesseraError::Validation { path, message } => {
            let path = if path.is_empty() {
                base.to_string()
            } else {
                Selector::parse(&path).map_or(path, |inner| base.join(&inner).to_string())
            };
            TesseraError::Validation { path, message }
        }
        other => other,
    }
}
