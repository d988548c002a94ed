//! Staging of source files into a build workspace.
//!
//! Staged files are named `<index>.<original name>` so their order on disk
//! matches the order they were given in, which is also their precedence.

use std::path::{Path, PathBuf};

use tessera_common::error::{Result, TesseraError};

/// Name a source is staged under.
#[must_use]
pub fn staged_name(index: usize, source: &Path) -> String {
    let file_name = source
        .file_name()
        .map_or_else(|| source.display().to_string(), |n| n.to_string_lossy().into_owned());
    format!("{index}.{file_name}")
}

/// Copies `sources` into `dir`, preserving their order.
///
/// The directory must already exist; it is never created here.
///
/// # Errors
///
/// Returns [`TesseraError::Io`] if `dir` is missing, a source cannot be read
/// or a destination cannot be written.
pub fn stage_files(sources: &[PathBuf], dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(TesseraError::io(
            dir,
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "workspace directory does not exist",
            ),
        ));
    }

    let mut staged = Vec::with_capacity(sources.len());
    for (index, source) in sources.iter().enumerate() {
        let text = std::fs::read(source).map_err(|e| TesseraError::io(source, e))?;
        let dest = dir.join(staged_name(index, source));
        std::fs::write(&dest, text).map_err(|e| TesseraError::io(&dest, e))?;
        tracing::debug!(source = %source.display(), dest = %dest.display(), "staged file");
        staged.push(dest);
    }
    Ok(staged)
}

/// Writes `text` into `dir` under the staged name `<index>.<name>`.
///
/// # Errors
///
/// Returns [`TesseraError::Io`] if the file cannot be written.
pub fn stage_text(dir: &Path, index: usize, name: &str, text: &str) -> Result<PathBuf> {
    let dest = dir.join(format!("{index}.{name}"));
    std::fs::write(&dest, text).map_err(|e| TesseraError::io(&dest, e))?;
    Ok(dest)
}
