//! Unified error types for the tessera workspace.
//!
//! Every pipeline stage reports failures through [`TesseraError`]. Stages that
//! know which staged file or field path caused a failure attach it, either in
//! the variant itself or by wrapping with [`TesseraError::InFile`].

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum TesseraError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A source file could not be tokenized or parsed.
    #[error("{file}:{line}:{column}: {message}")]
    Parse {
        /// Name of the file being parsed.
        file: String,
        /// One-based line of the offending token.
        line: usize,
        /// One-based column of the offending token.
        column: usize,
        /// Description of the syntax error.
        message: String,
    },

    /// An injection marker was malformed or referenced an unresolvable value.
    #[error("failed to inject {file}: {message}")]
    Inject {
        /// Staged file containing the marker.
        file: String,
        /// Description of the injection failure.
        message: String,
    },

    /// No loadable instance was found, or the requested package is missing.
    #[error("{message}")]
    Load {
        /// Description of the load failure.
        message: String,
    },

    /// Two values could not be unified, or an expression failed to evaluate.
    #[error("{}", with_path(.path, .message))]
    Conflict {
        /// Dotted path of the conflicting field (empty for the root).
        path: String,
        /// Description of the conflict.
        message: String,
    },

    /// A value is not concrete where a concrete value is required.
    #[error("{}", with_path(.path, .message))]
    Validation {
        /// Dotted path of the first unresolved field.
        path: String,
        /// Description of what remains unresolved.
        message: String,
    },

    /// A selector lookup on a value tree failed.
    #[error("lookup {path} failed: {message}")]
    Lookup {
        /// Selector that failed.
        path: String,
        /// Reason for the failure.
        message: String,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// An error reported while processing a specific staged file.
    ///
    /// The wrapped error is part of the message and not exposed as a
    /// `source()`, so error reports print it once.
    #[error("{file}: {error}")]
    InFile {
        /// Name of the staged file.
        file: String,
        /// Underlying error.
        error: Box<TesseraError>,
    },

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// YAML serialization or deserialization failed.
    #[error("YAML error: {source}")]
    Yaml {
        /// Underlying YAML error.
        #[from]
        source: serde_yaml::Error,
    },
}

fn with_path(path: &str, message: &str) -> String {
    if path.is_empty() {
        message.to_string()
    } else {
        format!("{path}: {message}")
    }
}

impl TesseraError {
    /// Wraps this error with the name of the file it originated from.
    ///
    /// Errors that already carry a file context are returned unchanged so the
    /// innermost (most precise) file name wins.
    #[must_use]
    pub fn in_file(self, file: impl Into<String>) -> Self {
        match self {
            Self::InFile { .. } | Self::Parse { .. } | Self::Inject { .. } => self,
            other => Self::InFile {
                file: file.into(),
                error: Box::new(other),
            },
        }
    }

    /// Returns the innermost error, looking through file context wrappers.
    #[must_use]
    pub fn innermost(&self) -> &Self {
        match self {
            Self::InFile { error, .. } => error.innermost(),
            other => other,
        }
    }

    /// Returns the field path attached to this error, if any.
    #[must_use]
    pub fn field_path(&self) -> Option<&str> {
        match self.innermost() {
            Self::Conflict { path, .. }
            | Self::Validation { path, .. }
            | Self::Lookup { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Builds a [`TesseraError::Io`] for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, TesseraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_display_includes_path() {
        let err = TesseraError::Conflict {
            path: "client.enabled".into(),
            message: "conflicting values false and true".into(),
        };
        assert_eq!(
            err.to_string(),
            "client.enabled: conflicting values false and true"
        );
    }

    #[test]
    fn conflict_display_without_path() {
        let err = TesseraError::Conflict {
            path: String::new(),
            message: "explicit error (_|_ literal)".into(),
        };
        assert_eq!(err.to_string(), "explicit error (_|_ literal)");
    }

    #[test]
    fn in_file_keeps_innermost_context() {
        let err = TesseraError::Validation {
            path: "bundle.name".into(),
            message: "incomplete value string".into(),
        }
        .in_file("1.bundle.cue")
        .in_file("ignored.cue");

        assert_eq!(
            err.to_string(),
            "1.bundle.cue: bundle.name: incomplete value string"
        );
        assert_eq!(err.field_path(), Some("bundle.name"));
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn parse_errors_are_not_wrapped() {
        let err = TesseraError::Parse {
            file: "0.a.cue".into(),
            line: 3,
            column: 7,
            message: "expected ':'".into(),
        }
        .in_file("0.a.cue");
        assert!(matches!(err, TesseraError::Parse { .. }));
    }
}
