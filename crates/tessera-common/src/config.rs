//! Build configuration shared by the CLI and the builders.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TesseraError;
use crate::types::OutputFormat;

/// Format of log records written to standard error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Text,
    /// One JSON object per record.
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(TesseraError::Config {
                message: format!("unsupported log format \"{other}\" (expected text or json)"),
            }),
        }
    }
}

/// Options for a single build invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Package to load from module sources (`_` accepts any).
    pub package: String,
    /// Output encoding for rendered documents.
    pub output: OutputFormat,
    /// Log record format.
    pub log_format: LogFormat,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            package: crate::constants::DEFAULT_MODULE_PACKAGE.to_string(),
            output: OutputFormat::default(),
            log_format: LogFormat::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_targets_main_package() {
        let config = BuildConfig::default();
        assert_eq!(config.package, "main");
        assert_eq!(config.output, OutputFormat::Yaml);
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn config_deserializes_lowercase_enums() {
        let config: BuildConfig =
            serde_json::from_str(r#"{"package":"_","output":"json","log_format":"json"}"#)
                .expect("deserialize");
        assert_eq!(config.output, OutputFormat::Json);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn log_format_parses_from_flag_value() {
        assert_eq!("json".parse::<LogFormat>().expect("parse"), LogFormat::Json);
        assert_eq!(LogFormat::Text.to_string(), "text");
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
