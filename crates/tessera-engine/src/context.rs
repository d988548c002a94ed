//! The caller-owned evaluation context.

use std::path::PathBuf;

use tessera_common::constants::MAX_EVAL_DEPTH;
use tessera_common::error::{Result, TesseraError};
use tessera_common::types::Encoding;

use crate::eval;
use crate::load::{self, DataFile, Instance, LoadConfig};
use crate::parser;
use crate::value::Value;

/// Tuning knobs for a [`Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextOptions {
    /// How deeply source expressions and field evaluations may nest. Deeper
    /// sources fail to parse; deeper evaluations report a structural cycle.
    pub max_depth: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            max_depth: MAX_EVAL_DEPTH,
        }
    }
}

/// Entry point for loading, building and parsing configuration.
///
/// A context holds no mutable state, so one value can serve concurrent
/// builds from several threads.
#[derive(Debug, Clone, Default)]
pub struct Context {
    options: ContextOptions,
}

impl Context {
    /// Creates a context with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context with the given options.
    #[must_use]
    pub const fn with_options(options: ContextOptions) -> Self {
        Self { options }
    }

    /// The options this context was created with.
    #[must_use]
    pub const fn options(&self) -> &ContextOptions {
        &self.options
    }

    /// Loads files as package instances. See [`load::load`].
    #[must_use]
    pub fn load(&self, paths: &[PathBuf], config: &LoadConfig) -> Vec<Instance> {
        load::load(paths, config, self.options.max_depth)
    }

    /// Evaluates the declarative files of an instance.
    ///
    /// Data files are not included; parse them with [`Context::parse_data`].
    ///
    /// # Errors
    ///
    /// Returns the instance's load error, or the first evaluation error.
    pub fn build_instance(&self, instance: &Instance) -> Result<Value> {
        if let Some(err) = &instance.error {
            return Err(TesseraError::Load {
                message: err.to_string(),
            });
        }
        eval::evaluate_files(&instance.files, self.options.max_depth)
    }

    /// Parses a YAML or JSON document into a value.
    ///
    /// A YAML file without content, such as one holding only comments,
    /// parses to top and so leaves whatever it is unified with unchanged.
    ///
    /// # Errors
    ///
    /// Returns a decoding error attributed to the file.
    pub fn parse_data(&self, file: &DataFile) -> Result<Value> {
        tracing::debug!(file = %file.name, encoding = %file.encoding, "parsing data file");
        let parsed = match file.encoding {
            Encoding::Yaml => match serde_yaml::from_str::<serde_yaml::Value>(&file.text) {
                Ok(serde_yaml::Value::Null) => Ok(Value::Top),
                Ok(doc) => Value::from_yaml(doc),
                Err(err) => Err(TesseraError::from(err)),
            },
            Encoding::Json => serde_json::from_str::<serde_json::Value>(&file.text)
                .map(Value::from)
                .map_err(TesseraError::from),
            Encoding::Cue => Err(TesseraError::Config {
                message: "declarative sources are not data documents".into(),
            }),
        };
        parsed.map_err(|e| e.in_file(&file.name))
    }

    /// Parses and evaluates a single declarative source.
    ///
    /// # Errors
    ///
    /// Returns parse or evaluation errors attributed to `name`.
    pub fn compile_str(&self, name: &str, text: &str) -> Result<Value> {
        let file = parser::parse_source_nested(name, text, self.options.max_depth)?;
        eval::evaluate_files(std::slice::from_ref(&file), self.options.max_depth)
            .map_err(|e| e.in_file(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::Selector;

    #[test]
    fn context_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Context>();
    }

    #[test]
    fn compile_str_evaluates() {
        let value = Context::new()
            .compile_str("a.cue", "a: b: \"x\"")
            .expect("should compile");
        let selector = Selector::parse("a.b").expect("should parse selector");
        assert_eq!(value.lookup(&selector).ok().and_then(Value::as_str), Some("x"));
    }

    #[test]
    fn parse_data_decodes_yaml_and_json() {
        let ctx = Context::new();
        let yaml = DataFile {
            name: "v.yaml".into(),
            encoding: Encoding::Yaml,
            text: "a: 1\nb: [true]\n".into(),
        };
        let json = DataFile {
            name: "v.json".into(),
            encoding: Encoding::Json,
            text: r#"{"a": 1, "b": [true]}"#.into(),
        };
        let from_yaml = ctx.parse_data(&yaml).expect("should parse yaml");
        let from_json = ctx.parse_data(&json).expect("should parse json");
        assert_eq!(from_yaml, from_json);
    }

    #[test]
    fn parse_data_names_the_file() {
        let bad = DataFile {
            name: "broken.json".into(),
            encoding: Encoding::Json,
            text: "{".into(),
        };
        let err = Context::new().parse_data(&bad).unwrap_err();
        assert!(err.to_string().starts_with("broken.json"), "got: {err}");
    }

    #[test]
    fn build_instance_spans_files() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let a = dir.path().join("0.a.cue");
        let b = dir.path().join("1.b.cue");
        std::fs::write(&a, "#A: {port: int}\nsvc: #A").expect("should write");
        std::fs::write(&b, "svc: port: 80").expect("should write");

        let ctx = Context::new();
        let instance = ctx
            .load(&[a, b], &LoadConfig::any_package())
            .remove(0);
        let value = ctx.build_instance(&instance).expect("should build");
        let json = value.to_json().expect("should export");
        assert_eq!(json, serde_json::json!({"svc": {"port": 80}}));
    }

    #[test]
    fn small_depth_limit_reports_cycle() {
        let ctx = Context::with_options(ContextOptions { max_depth: 3 });
        let err = ctx
            .compile_str("deep.cue", "a: b + 1\nb: c + 1\nc: d + 1\nd: 1")
            .unwrap_err();
        assert!(err.to_string().contains("structural cycle"), "got: {err}");
    }

    #[test]
    fn deeply_nested_source_fails_to_parse() {
        let depth = 2000;
        let text = format!("a: {}1{}", "{x: ".repeat(depth), "}".repeat(depth));
        let ctx = Context::with_options(ContextOptions { max_depth: 16 });
        let err = ctx.compile_str("deep.cue", &text).unwrap_err();
        assert!(matches!(err, TesseraError::Parse { .. }), "got: {err}");
        assert!(err.to_string().contains("nesting deeper than 16"), "got: {err}");
    }

    #[test]
    fn parse_data_without_content_is_top() {
        let ctx = Context::new();
        for text in ["", "# overrides disabled for now\n", "---\n"] {
            let file = DataFile {
                name: "o.yaml".into(),
                encoding: Encoding::Yaml,
                text: text.into(),
            };
            assert_eq!(ctx.parse_data(&file).expect("should parse"), Value::Top);
        }
    }
}
