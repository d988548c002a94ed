//! Workspace-wide constants: file naming, selectors and defaults.

/// Attribute name recognized by the injector (`@tessera(...)`).
pub const INJECT_ATTRIBUTE: &str = "tessera";

/// File extension for declarative configuration sources.
pub const SOURCE_EXTENSION: &str = "cue";

/// File name the bundle schema is staged under (prefixed with its ordinal).
pub const BUNDLE_SCHEMA_FILE: &str = "schema.cue";

/// Package selector meaning "whatever package the files declare".
pub const ANY_PACKAGE: &str = "_";

/// Default package name for modules.
pub const DEFAULT_MODULE_PACKAGE: &str = "main";

/// Name of the file holding a module's default values.
pub const MODULE_VALUES_FILE: &str = "values.cue";

/// Selector of the bundle name.
pub const BUNDLE_NAME_SELECTOR: &str = "bundle.name";

/// Selector of the bundle instances mapping.
pub const BUNDLE_INSTANCES_SELECTOR: &str = "bundle.instances";

/// Selector of an instance's module repository URL, relative to the instance.
pub const BUNDLE_MODULE_URL_SELECTOR: &str = "module.url";

/// Selector of an instance's module version, relative to the instance.
pub const BUNDLE_MODULE_VERSION_SELECTOR: &str = "module.version";

/// Selector of an instance's module digest, relative to the instance.
pub const BUNDLE_MODULE_DIGEST_SELECTOR: &str = "module.digest";

/// Selector of an instance's namespace, relative to the instance.
pub const BUNDLE_NAMESPACE_SELECTOR: &str = "namespace";

/// Selector of an instance's values, relative to the instance.
pub const BUNDLE_VALUES_SELECTOR: &str = "values";

/// Selector of a module's user supplied values.
pub const MODULE_VALUES_SELECTOR: &str = "values";

/// Selector of a module's rendered objects.
pub const MODULE_OBJECTS_SELECTOR: &str = "objects";

/// Runtime injection key carrying the instance name.
pub const RUNTIME_NAME_KEY: &str = "name";

/// Runtime injection key carrying the instance namespace.
pub const RUNTIME_NAMESPACE_KEY: &str = "namespace";

/// Namespace used when none is given on the command line.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Maximum nesting depth of source expressions and of field evaluations.
pub const MAX_EVAL_DEPTH: usize = 256;
