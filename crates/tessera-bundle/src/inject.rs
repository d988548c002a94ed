//! Late-binding injection of runtime values into staged sources.
//!
//! A field annotated with `@tessera(<source>:<type>:<key>)` gets the marker
//! replaced by `& <literal>`, so the authored constraint is unified with the
//! injected value:
//!
//! ```text
//! name: string @tessera(runtime:string:name)   =>   name: string & "podinfo"
//! ```
//!
//! Sources are `env` (the process environment, captured when the injector is
//! created) and `runtime` (values supplied by the caller). Markers inside
//! string literals and comments are left alone, as are other attributes.

use std::collections::BTreeMap;
use std::path::Path;

use nom::{
    IResult, Parser,
    bytes::complete::take_while1,
    character::complete::{alpha1, char},
    combinator::all_consuming,
    sequence::terminated,
};
use tessera_common::constants::INJECT_ATTRIBUTE;
use tessera_common::error::{Result, TesseraError};

/// Rewrites injection markers into literals.
#[derive(Debug, Clone, Default)]
pub struct Injector {
    env: BTreeMap<String, String>,
    runtime: BTreeMap<String, String>,
}

#[derive(Clone, Copy)]
enum Scan {
    Code,
    String,
    MultiLineString,
    Comment,
}

impl Injector {
    /// Creates an injector with no values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an injector whose `env` source is a snapshot of the process
    /// environment.
    #[must_use]
    pub fn from_process_env() -> Self {
        Self {
            env: std::env::vars().collect(),
            runtime: BTreeMap::new(),
        }
    }

    /// Sets an `env` value.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.env.insert(key.into(), value.into());
        self
    }

    /// Sets a `runtime` value.
    #[must_use]
    pub fn with_runtime(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.runtime.insert(key.into(), value.into());
        self
    }

    /// Reads a staged file and returns its text with all markers replaced.
    ///
    /// # Errors
    ///
    /// Returns [`TesseraError::Io`] if the file cannot be read, or
    /// [`TesseraError::Inject`] if a marker is malformed or unresolvable.
    pub fn inject(&self, path: &Path) -> Result<String> {
        let text = std::fs::read_to_string(path).map_err(|e| TesseraError::io(path, e))?;
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        self.inject_str(&name, &text)
    }

    /// Replaces all markers in `text`; `file` names it in errors.
    ///
    /// # Errors
    ///
    /// Returns [`TesseraError::Inject`] if a marker is malformed or unresolvable.
    pub fn inject_str(&self, file: &str, text: &str) -> Result<String> {
        let marker = format!("@{INJECT_ATTRIBUTE}(");
        let bytes = text.as_bytes();
        let fail = |message: String| TesseraError::Inject {
            file: file.to_string(),
            message,
        };

        let mut out = String::with_capacity(text.len());
        let mut state = Scan::Code;
        let mut copied = 0;
        let mut count = 0usize;
        let mut i = 0;
        while i < bytes.len() {
            match state {
                Scan::Code => {
                    if bytes[i..].starts_with(b"\"\"\"") {
                        state = Scan::MultiLineString;
                        i += 3;
                        continue;
                    }
                    match bytes[i] {
                        b'"' => state = Scan::String,
                        b'/' if bytes.get(i + 1) == Some(&b'/') => state = Scan::Comment,
                        b'@' if bytes[i..].starts_with(marker.as_bytes()) => {
                            let start = i + marker.len();
                            let len = text[start..]
                                .find(')')
                                .ok_or_else(|| fail(format!("unterminated {marker}...) marker")))?;
                            let literal = self.resolve(&text[start..start + len]).map_err(fail)?;
                            out.push_str(&text[copied..i]);
                            out.push_str("& ");
                            out.push_str(&literal);
                            i = start + len + 1;
                            copied = i;
                            count += 1;
                            continue;
                        }
                        _ => {}
                    }
                }
                Scan::String => match bytes[i] {
                    b'\\' => {
                        i += 2;
                        continue;
                    }
                    b'"' | b'\n' => state = Scan::Code,
                    _ => {}
                },
                Scan::MultiLineString => {
                    if bytes[i..].starts_with(b"\"\"\"") {
                        state = Scan::Code;
                        i += 3;
                        continue;
                    }
                    if bytes[i] == b'\\' {
                        i += 2;
                        continue;
                    }
                }
                Scan::Comment => {
                    if bytes[i] == b'\n' {
                        state = Scan::Code;
                    }
                }
            }
            i += 1;
        }
        out.push_str(&text[copied..]);

        tracing::debug!(file, count, "injected values");
        Ok(out)
    }

    fn resolve(&self, body: &str) -> std::result::Result<String, String> {
        let (_, (source, kind, key)) = all_consuming(marker_body)
            .parse(body.trim())
            .map_err(|_| format!("malformed marker \"{body}\" (expected <source>:<type>:<key>)"))?;

        let values = match source {
            "env" => &self.env,
            "runtime" => &self.runtime,
            other => return Err(format!("unknown source \"{other}\"")),
        };
        let raw = values
            .get(key)
            .ok_or_else(|| format!("{source} value \"{key}\" is not set"))?;
        literal(kind, raw).map_err(|reason| format!("{source} value \"{key}\" {reason}"))
    }
}

fn marker_body(input: &str) -> IResult<&str, (&str, &str, &str)> {
    (
        terminated(alpha1, char(':')),
        terminated(alpha1, char(':')),
        take_while1(|c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')),
    )
        .parse(input)
}

fn literal(kind: &str, raw: &str) -> std::result::Result<String, String> {
    let trimmed = raw.trim();
    match kind {
        "string" => serde_json::to_string(raw).map_err(|e| e.to_string()),
        "int" => trimmed
            .parse::<i64>()
            .map(|n| n.to_string())
            .map_err(|_| format!("{raw:?} is not an int")),
        "number" => match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => Ok(n.to_string()),
            _ => Err(format!("{raw:?} is not a number")),
        },
        "bool" => trimmed
            .parse::<bool>()
            .map(|b| b.to_string())
            .map_err(|_| format!("{raw:?} is not a bool")),
        other => Err(format!("has unsupported type \"{other}\"")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn injector() -> Injector {
        Injector::new()
            .with_env("REPLICAS", "3")
            .with_env("DEBUG", "true")
            .with_env("RATIO", "0.5")
            .with_runtime("name", "pod\"info")
    }

    #[test]
    fn inject_replaces_markers_with_unification() {
        let src = "name: string @tessera(runtime:string:name)\nreplicas: int @tessera(env:int:REPLICAS)\n";
        let out = injector().inject_str("a.cue", src).expect("should inject");
        assert_eq!(
            out,
            "name: string & \"pod\\\"info\"\nreplicas: int & 3\n"
        );
    }

    #[test]
    fn inject_supports_number_and_bool() {
        let src = "r: number @tessera(env:number:RATIO)\nd: bool @tessera(env:bool:DEBUG)";
        let out = injector().inject_str("a.cue", src).expect("should inject");
        assert_eq!(out, "r: number & 0.5\nd: bool & true");
    }

    #[test]
    fn inject_leaves_strings_comments_and_other_attributes() {
        let src = concat!(
            "a: \"@tessera(env:int:MISSING)\"\n",
            "// @tessera(env:int:MISSING)\n",
            "b: int @other(x)\n",
            "c: \"\"\"\n  @tessera(env:int:MISSING)\n  \"\"\"\n",
        );
        let out = injector().inject_str("a.cue", src).expect("should inject");
        assert_eq!(out, src);
    }

    #[test]
    fn inject_fails_on_missing_key() {
        let err = injector()
            .inject_str("a.cue", "x: string @tessera(env:string:NOPE)")
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("failed to inject a.cue"), "got: {msg}");
        assert!(msg.contains("NOPE"), "got: {msg}");
    }

    #[test]
    fn inject_fails_on_bad_type_value() {
        let err = injector()
            .inject_str("a.cue", "x: int @tessera(env:int:DEBUG)")
            .unwrap_err();
        assert!(err.to_string().contains("is not an int"), "got: {err}");
    }

    #[test]
    fn inject_fails_on_malformed_markers() {
        for src in [
            "x: int @tessera(env:int)",
            "x: int @tessera(disk:int:A)",
            "x: int @tessera(env:float:REPLICAS)",
            "x: int @tessera(env:int:REPLICAS",
        ] {
            let result = injector().inject_str("a.cue", src);
            assert!(
                matches!(result, Err(TesseraError::Inject { .. })),
                "should reject {src}"
            );
        }
    }

    #[test]
    fn inject_reads_file() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("0.bundle.cue");
        std::fs::write(&path, "n: int @tessera(env:int:REPLICAS)").expect("should write");
        let out = injector().inject(&path).expect("should inject");
        assert_eq!(out, "n: int & 3");
    }
}
