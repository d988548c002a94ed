//! Merging of user supplied values onto a module's defaults.

use serde_json::Value as Json;
use tessera_common::constants::MODULE_VALUES_SELECTOR;
use tessera_common::error::Result;

/// Merges `overlay` onto `base`.
///
/// Objects take the union of their keys, recursively. Any other value in
/// `overlay`, lists included, replaces the one in `base`.
pub fn merge(base: &mut Json, overlay: Json) {
    match (base, overlay) {
        (Json::Object(base), Json::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        let _ = base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Renders merged values as a declarative source file.
///
/// JSON is valid source text, so the document is embedded as is.
///
/// # Errors
///
/// Returns a serialization error if the document cannot be encoded.
pub fn render_source(package: Option<&str>, values: &Json) -> Result<String> {
    let body = serde_json::to_string_pretty(values)?;
    Ok(match package {
        Some(package) => format!("package {package}\n\n{MODULE_VALUES_SELECTOR}: {body}\n"),
        None => format!("{MODULE_VALUES_SELECTOR}: {body}\n"),
    })
}
