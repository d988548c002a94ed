//! Typed records extracted from a built bundle.

use tessera_common::error::{Result, TesseraError};
use tessera_common::types::ModuleReference;
use tessera_engine::{Selector, Value};

/// An instance's values, kept as evaluated but not forced concrete.
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredValue {
    path: Selector,
    value: Value,
}

impl DeferredValue {
    /// Wraps the value found at `path`.
    #[must_use]
    pub const fn new(path: Selector, value: Value) -> Self {
        Self { path, value }
    }

    /// Where the value was found in the bundle.
    #[must_use]
    pub const fn path(&self) -> &Selector {
        &self.path
    }

    /// The unresolved value.
    #[must_use]
    pub const fn value(&self) -> &Value {
        &self.value
    }

    /// Forces the value into a concrete document.
    ///
    /// # Errors
    ///
    /// Returns [`TesseraError::Validation`] naming the first unresolved path,
    /// prefixed with this value's location in the bundle.
    pub fn resolve(&self) -> Result<serde_json::Value> {
        self.value.to_json().map_err(|err| match err {
            TesseraError::Validation { path, message } => TesseraError::Validation {
                path: Selector::parse(&path)
                    .map(|inner| self.path.join(&inner).to_string())
                    .unwrap_or(path),
                message,
            },
            other => other,
        })
    }
}

/// One deployable instance declared by a bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleInstance {
    /// Name of the bundle declaring the instance.
    pub bundle: String,
    /// Instance name, equal to its key in `bundle.instances`.
    pub name: String,
    /// Target namespace; empty when not set.
    pub namespace: String,
    /// Module the instance deploys.
    pub module: ModuleReference,
    /// Instance values for the downstream renderer.
    pub values: DeferredValue,
}

/// A named collection of instances, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    /// Bundle name.
    pub name: String,
    /// Instances in declaration order; names are unique.
    pub instances: Vec<BundleInstance>,
}

impl Bundle {
    /// Looks up an instance by name.
    #[must_use]
    pub fn instance(&self, name: &str) -> Option<&BundleInstance> {
        self.instances.iter().find(|i| i.name == name)
    }

    /// Instance names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.instances.iter().map(|i| i.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sel(s: &str) -> Selector {
        Selector::parse(s).expect("should parse selector")
    }

    #[test]
    fn deferred_value_resolves_concrete_values() {
        let value = Value::from(serde_json::json!({"replicas": 2}));
        let deferred = DeferredValue::new(sel("bundle.instances.app.values"), value);
        assert_eq!(
            deferred.resolve().expect("should resolve"),
            serde_json::json!({"replicas": 2})
        );
    }

    #[test]
    fn deferred_value_reports_full_path() {
        let value = tessera_engine::Context::new()
            .compile_str("v.cue", "image: tag: string")
            .expect("should compile");
        let deferred = DeferredValue::new(sel("bundle.instances.app.values"), value);
        let err = deferred.resolve().unwrap_err();
        assert_eq!(
            err.field_path(),
            Some("bundle.instances.app.values.image.tag")
        );
    }

    #[test]
    fn bundle_finds_instances_by_name() {
        let instance = |name: &str| BundleInstance {
            bundle: "b".into(),
            name: name.into(),
            namespace: String::new(),
            module: ModuleReference::default(),
            values: DeferredValue::new(Selector::root(), Value::Top),
        };
        let bundle = Bundle {
            name: "b".into(),
            instances: vec![instance("one"), instance("two")],
        };
        assert_eq!(bundle.names().collect::<Vec<_>>(), ["one", "two"]);
        assert!(bundle.instance("two").is_some());
        assert!(bundle.instance("three").is_none());
    }
}
