//! Builds bundle files into a validated value and extracts its instances.
//!
//! The pipeline is Stage -> Inject -> Compose -> Validate -> Extract:
//! [`BundleBuilder::init_workspace`] stages and injects the files and appends
//! the schema, [`BundleBuilder::build`] composes and validates them, and
//! [`BundleBuilder::get_bundle`] extracts the typed records.

use std::path::{Path, PathBuf};

use tessera_common::constants::{
    BUNDLE_INSTANCES_SELECTOR, BUNDLE_MODULE_DIGEST_SELECTOR, BUNDLE_MODULE_URL_SELECTOR,
    BUNDLE_MODULE_VERSION_SELECTOR, BUNDLE_NAME_SELECTOR, BUNDLE_NAMESPACE_SELECTOR,
    BUNDLE_SCHEMA_FILE, BUNDLE_VALUES_SELECTOR,
};
use tessera_common::error::{Result, TesseraError};
use tessera_common::types::{Encoding, ModuleReference};
use tessera_engine::{Context, LoadConfig, Selector, Value};

use crate::bundle::{Bundle, BundleInstance, DeferredValue};
use crate::inject::Injector;
use crate::workspace;

/// The schema every bundle is unified with.
pub const BUNDLE_SCHEMA: &str = include_str!("schema/bundle.cue");

/// Compiles bundle files into [`Bundle`] records.
#[derive(Debug)]
pub struct BundleBuilder<'c> {
    ctx: &'c Context,
    files: Vec<PathBuf>,
    injector: Injector,
}

impl<'c> BundleBuilder<'c> {
    /// Creates a builder for `files`, applied in order.
    ///
    /// The `env` injection source is the current process environment.
    #[must_use]
    pub fn new(ctx: &'c Context, files: Vec<PathBuf>) -> Self {
        Self {
            ctx,
            files,
            injector: Injector::from_process_env(),
        }
    }

    /// Replaces the injector, e.g. to supply `runtime` values.
    #[must_use]
    pub fn with_injector(mut self, injector: Injector) -> Self {
        self.injector = injector;
        self
    }

    /// The files the builder will load; staged paths once initialised.
    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Stages the files into `dir`, injects runtime values and appends the
    /// schema. Must be called before [`BundleBuilder::build`].
    ///
    /// Only declarative sources are injected; YAML and JSON files are staged
    /// as they are. `dir` must exist and belong to this build alone.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if staging fails, or an injection error.
    pub fn init_workspace(&mut self, dir: &Path) -> Result<()> {
        tracing::info!(workspace = %dir.display(), count = self.files.len(), "staging bundle");
        let mut staged = workspace::stage_files(&self.files, dir)?;
        for path in staged.iter().filter(|p| is_source(p)) {
            let text = self.injector.inject(path)?;
            std::fs::write(path, text).map_err(|e| TesseraError::io(path, e))?;
        }

        let schema = workspace::stage_text(dir, staged.len(), BUNDLE_SCHEMA_FILE, BUNDLE_SCHEMA)?;
        staged.push(schema);
        self.files = staged;
        Ok(())
    }

    /// Loads the files as one instance, unifies data files onto it in order
    /// and validates that the result is concrete.
    ///
    /// # Errors
    ///
    /// Returns a load error if nothing could be loaded, and otherwise the
    /// first conflict or unresolved field, attributed to its file.
    pub fn build(&self) -> Result<Value> {
        let instance = self
            .ctx
            .load(&self.files, &LoadConfig::any_package())
            .into_iter()
            .next()
            .ok_or_else(|| TesseraError::Load {
                message: "no instances found".into(),
            })?
            .into_result()?;

        let mut value = self.ctx.build_instance(&instance)?;
        for data in &instance.data {
            tracing::debug!(file = %data.name, "unifying data file");
            let overlay = self.ctx.parse_data(data)?;
            value = value
                .unify(&overlay, &Selector::root())
                .map_err(|e| e.in_file(&data.name))?;
        }

        value.validate(true)?;
        tracing::info!(files = self.files.len(), "bundle built");
        Ok(value)
    }

    /// Extracts the bundle name and instances from a built value.
    ///
    /// # Errors
    ///
    /// Returns a lookup error if the name, the instances or an instance's
    /// module URL is missing.
    pub fn get_bundle(&self, value: &Value) -> Result<Bundle> {
        let name_path = Selector::parse(BUNDLE_NAME_SELECTOR)?;
        let name = lookup_str(value, &name_path)?.to_string();

        let instances_path = Selector::parse(BUNDLE_INSTANCES_SELECTOR)?;
        let fields = value
            .lookup(&instances_path)?
            .fields()
            .map_err(|e| TesseraError::Lookup {
                path: instances_path.to_string(),
                message: e.to_string(),
            })?;

        let url = Selector::parse(BUNDLE_MODULE_URL_SELECTOR)?;
        let version = Selector::parse(BUNDLE_MODULE_VERSION_SELECTOR)?;
        let digest = Selector::parse(BUNDLE_MODULE_DIGEST_SELECTOR)?;
        let namespace = Selector::parse(BUNDLE_NAMESPACE_SELECTOR)?;
        let values = Selector::parse(BUNDLE_VALUES_SELECTOR)?;

        let mut instances = Vec::with_capacity(fields.len());
        for (key, _) in fields {
            let base = instances_path.child(key);
            let optional = |rel: &Selector| {
                value
                    .lookup(&base.join(rel))
                    .ok()
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            let values_path = base.join(&values);
            let values_value = value.lookup(&values_path).cloned().unwrap_or(Value::Top);

            instances.push(BundleInstance {
                bundle: name.clone(),
                name: key.to_string(),
                namespace: optional(&namespace),
                module: ModuleReference {
                    repository: lookup_str(value, &base.join(&url))?.to_string(),
                    version: optional(&version),
                    digest: optional(&digest),
                },
                values: DeferredValue::new(values_path, values_value),
            });
        }

        tracing::info!(bundle = %name, instances = instances.len(), "bundle extracted");
        Ok(Bundle { name, instances })
    }
}

fn is_source(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| Encoding::from_file_name(&name.to_string_lossy()))
        == Some(Encoding::Cue)
}

fn lookup_str<'v>(value: &'v Value, path: &Selector) -> Result<&'v str> {
    let found = value.lookup(path)?;
    found.as_str().ok_or_else(|| TesseraError::Lookup {
        path: path.to_string(),
        message: format!("expected a concrete string, found {found}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(src: &str) -> Value {
        Context::new()
            .compile_str("bundle.cue", src)
            .expect("should compile")
    }

    fn extract(src: &str) -> Result<Bundle> {
        let ctx = Context::new();
        BundleBuilder::new(&ctx, Vec::new()).get_bundle(&value(src))
    }

    #[test]
    fn get_bundle_extracts_instances_in_order() {
        let bundle = extract(
            r#"
bundle: {
    name: "apps"
    instances: {
        web: {
            module: {url: "oci://ghcr.io/org/web", version: "1.0.0", digest: "sha256:abc"}
            namespace: "frontend"
            values: replicas: 2
        }
        db: {
            module: url: "oci://ghcr.io/org/db"
            values: {}
        }
    }
}
"#,
        )
        .expect("should extract");

        assert_eq!(bundle.name, "apps");
        assert_eq!(bundle.names().collect::<Vec<_>>(), ["web", "db"]);
        let web = &bundle.instances[0];
        assert_eq!(web.bundle, "apps");
        assert_eq!(web.namespace, "frontend");
        assert_eq!(web.module.version, "1.0.0");
        assert_eq!(web.module.digest, "sha256:abc");
        assert_eq!(web.values.path().to_string(), "bundle.instances.web.values");

        let db = &bundle.instances[1];
        assert_eq!(db.module.repository, "oci://ghcr.io/org/db");
        assert!(db.module.version.is_empty());
        assert!(db.module.digest.is_empty());
        assert!(db.namespace.is_empty());
    }

    #[test]
    fn get_bundle_requires_name() {
        let err = extract("bundle: instances: {}").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("lookup bundle.name failed"), "got: {msg}");
    }

    #[test]
    fn get_bundle_requires_module_url() {
        let err = extract(r#"bundle: {name: "x", instances: app: {module: version: "1", values: {}}}"#)
            .unwrap_err();
        assert_eq!(err.field_path(), Some("bundle.instances.app.module.url"));
    }

    #[test]
    fn build_requires_files() {
        let ctx = Context::new();
        let err = BundleBuilder::new(&ctx, Vec::new()).build().unwrap_err();
        assert!(err.to_string().contains("no instances found"));
    }

    #[test]
    fn schema_parses() {
        let schema = tessera_engine::parser::parse_source("schema.cue", BUNDLE_SCHEMA);
        assert!(schema.is_ok(), "got: {schema:?}");
    }
}
