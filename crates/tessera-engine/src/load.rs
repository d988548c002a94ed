//! Loading of staged files into package instances.
//!
//! Declarative sources are parsed and grouped by their package clause; plain
//! data documents are kept as text until the caller asks for them.

use std::path::{Path, PathBuf};

use tessera_common::constants::ANY_PACKAGE;
use tessera_common::error::{Result, TesseraError};
use tessera_common::types::Encoding;

use crate::parser::{self, ast::SourceFile};

/// A file read from disk, immutable once read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceText {
    /// Where the text was read from.
    pub path: PathBuf,
    /// File name used in error messages.
    pub name: String,
    /// Raw contents.
    pub text: String,
}

impl SourceText {
    /// Reads a file.
    ///
    /// # Errors
    ///
    /// Returns [`TesseraError::Io`] if the file cannot be read.
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| TesseraError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            name: display_name(path),
            text,
        })
    }
}

fn display_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |name| name.to_string_lossy().into_owned(),
    )
}

/// Options for [`load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadConfig {
    /// Package to load, or `_` for whatever package the files declare.
    pub package: String,
    /// Whether YAML and JSON files are accepted alongside declarative sources.
    pub data_files: bool,
}

impl LoadConfig {
    /// Loads any single package, accepting data files.
    #[must_use]
    pub fn any_package() -> Self {
        Self {
            package: ANY_PACKAGE.to_string(),
            data_files: true,
        }
    }

    /// Loads only the named package.
    #[must_use]
    pub fn package(name: impl Into<String>) -> Self {
        Self {
            package: name.into(),
            data_files: false,
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self::any_package()
    }
}

/// A plain data document loaded with an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    /// File name used in error messages.
    pub name: String,
    /// YAML or JSON.
    pub encoding: Encoding,
    /// Raw contents.
    pub text: String,
}

/// The files of one package, ready to be built.
#[derive(Debug, Default)]
pub struct Instance {
    /// Package the files declare, if any.
    pub package: Option<String>,
    /// Parsed declarative sources, in load order.
    pub files: Vec<SourceFile>,
    /// Data documents, in load order.
    pub data: Vec<DataFile>,
    /// Set when the instance could not be loaded.
    pub error: Option<TesseraError>,
}

impl Instance {
    fn failed(error: TesseraError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// Returns the instance, or the error recorded while loading it.
    ///
    /// # Errors
    ///
    /// Returns the load error, if any.
    pub fn into_result(self) -> Result<Self> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// Loads the given files as a single instance.
///
/// An empty path list yields no instances. Read, parse and package errors
/// are recorded in [`Instance::error`] rather than returned. Sources nesting
/// deeper than `max_depth` fail to parse.
#[must_use]
pub fn load(paths: &[PathBuf], config: &LoadConfig, max_depth: usize) -> Vec<Instance> {
    if paths.is_empty() {
        return Vec::new();
    }
    tracing::debug!(count = paths.len(), package = %config.package, "loading instance");
    vec![load_instance(paths, config, max_depth).unwrap_or_else(Instance::failed)]
}

fn load_instance(paths: &[PathBuf], config: &LoadConfig, max_depth: usize) -> Result<Instance> {
    let mut sources = Vec::new();
    let mut data = Vec::new();

    for path in paths {
        let source = SourceText::read(path)?;
        match Encoding::from_file_name(&source.name) {
            Some(Encoding::Cue) => {
                sources.push(parser::parse_source_nested(
                    &source.name,
                    &source.text,
                    max_depth,
                )?);
            }
            Some(encoding) if config.data_files => data.push(DataFile {
                name: source.name,
                encoding,
                text: source.text,
            }),
            Some(encoding) => {
                return Err(TesseraError::Load {
                    message: format!("{}: {encoding} files are not accepted here", source.name),
                });
            }
            None => {
                return Err(TesseraError::Load {
                    message: format!("{}: unsupported file type", source.name),
                });
            }
        }
    }

    let (package, files) = select_package(sources, &config.package)?;
    Ok(Instance {
        package,
        files,
        data,
        error: None,
    })
}

fn select_package(
    sources: Vec<SourceFile>,
    wanted: &str,
) -> Result<(Option<String>, Vec<SourceFile>)> {
    if wanted != ANY_PACKAGE {
        let files: Vec<SourceFile> = sources
            .into_iter()
            .filter(|f| f.package.as_deref() == Some(wanted))
            .collect();
        if files.is_empty() {
            return Err(TesseraError::Load {
                message: format!("cannot find package \"{wanted}\""),
            });
        }
        return Ok((Some(wanted.to_string()), files));
    }

    let mut package: Option<&str> = None;
    for file in &sources {
        match (package, file.package.as_deref()) {
            (Some(found), Some(other)) if found != other => {
                return Err(TesseraError::Load {
                    message: format!(
                        "found packages \"{found}\" and \"{other}\" (in {})",
                        file.name
                    ),
                });
            }
            (None, Some(name)) => package = Some(name),
            _ => {}
        }
    }
    let package = package.map(str::to_string);
    Ok((package, sources))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_common::constants::MAX_EVAL_DEPTH;

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, text).expect("should write file");
        path
    }

    #[test]
    fn load_empty_list_yields_no_instances() {
        assert!(load(&[], &LoadConfig::any_package(), MAX_EVAL_DEPTH).is_empty());
    }

    #[test]
    fn load_groups_sources_and_data() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let paths = vec![
            write(dir.path(), "0.a.cue", "package app\na: 1"),
            write(dir.path(), "1.b.yaml", "b: 2"),
            write(dir.path(), "2.c.cue", "c: 3"),
        ];
        let mut instances = load(&paths, &LoadConfig::any_package(), MAX_EVAL_DEPTH);
        assert_eq!(instances.len(), 1);
        let instance = instances.remove(0).into_result().expect("should load");
        assert_eq!(instance.package.as_deref(), Some("app"));
        assert_eq!(instance.files.len(), 2);
        assert_eq!(instance.data.len(), 1);
        assert_eq!(instance.data[0].encoding, Encoding::Yaml);
    }

    #[test]
    fn load_named_package_filters_files() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let paths = vec![
            write(dir.path(), "a.cue", "package main\na: 1"),
            write(dir.path(), "b.cue", "package other\nb: 1"),
        ];
        let instance = load(&paths, &LoadConfig::package("main"), MAX_EVAL_DEPTH)
            .remove(0)
            .into_result()
            .expect("should load");
        assert_eq!(instance.files.len(), 1);
        assert_eq!(instance.files[0].name, "a.cue");
    }

    #[test]
    fn load_missing_package_records_error() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let paths = vec![write(dir.path(), "a.cue", "package main\na: 1")];
        let instance = load(&paths, &LoadConfig::package("test"), MAX_EVAL_DEPTH).remove(0);
        let msg = instance.error.expect("should fail").to_string();
        assert!(msg.contains("cannot find package \"test\""), "got: {msg}");
    }

    #[test]
    fn load_mixed_packages_is_an_error() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let paths = vec![
            write(dir.path(), "a.cue", "package one\na: 1"),
            write(dir.path(), "b.cue", "package two\nb: 1"),
        ];
        let err = load(&paths, &LoadConfig::any_package(), MAX_EVAL_DEPTH)
            .remove(0)
            .into_result()
            .unwrap_err();
        assert!(err.to_string().contains("found packages"));
    }

    #[test]
    fn load_records_parse_and_read_errors() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let bad = vec![write(dir.path(), "bad.cue", "a: {")];
        let err = load(&bad, &LoadConfig::any_package(), MAX_EVAL_DEPTH).remove(0).error;
        assert!(matches!(err, Some(TesseraError::Parse { .. })));

        let missing = vec![dir.path().join("missing.cue")];
        let err = load(&missing, &LoadConfig::any_package(), MAX_EVAL_DEPTH).remove(0).error;
        assert!(matches!(err, Some(TesseraError::Io { .. })));
    }

    #[test]
    fn load_rejects_data_files_when_disabled() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let paths = vec![write(dir.path(), "v.json", "{}")];
        let config = LoadConfig {
            package: ANY_PACKAGE.to_string(),
            data_files: false,
        };
        assert!(load(&paths, &config, MAX_EVAL_DEPTH).remove(0).error.is_some());
    }
}
