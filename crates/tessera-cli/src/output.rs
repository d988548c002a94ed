//! Encoding of rendered documents for standard output.
//!
//! Objects are printed either as a single Kubernetes `List` in JSON or as a
//! multi-document YAML stream.

use serde::Serialize;
use tessera_common::types::OutputFormat;

/// Encodes rendered objects in the requested format.
///
/// # Errors
///
/// Returns an error if an object cannot be serialized.
pub fn render_objects(format: OutputFormat, objects: &[serde_json::Value]) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => json_list(objects),
        OutputFormat::Yaml => yaml_stream(objects),
    }
}

/// Wraps objects in a `v1/List` and encodes it as indented JSON.
///
/// # Errors
///
/// Returns an error if the list cannot be serialized.
pub fn json_list(objects: &[serde_json::Value]) -> anyhow::Result<String> {
    let list = serde_json::json!({
        "apiVersion": "v1",
        "kind": "List",
        "items": objects,
    });
    Ok(format!("{}\n", serde_json::to_string_pretty(&list)?))
}

/// Encodes documents as an indented JSON array.
///
/// # Errors
///
/// Returns an error if a document cannot be serialized.
pub fn json_array<T: Serialize>(docs: &[T]) -> anyhow::Result<String> {
    Ok(format!("{}\n", serde_json::to_string_pretty(docs)?))
}

/// Encodes documents as a YAML stream, each one preceded by `---`.
///
/// # Errors
///
/// Returns an error if a document cannot be serialized.
pub fn yaml_stream<T: Serialize>(docs: &[T]) -> anyhow::Result<String> {
    let mut out = String::new();
    for doc in docs {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(doc)?);
    }
    Ok(out)
}
