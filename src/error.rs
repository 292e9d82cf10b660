use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading the metrics folder.
///
/// `FolderNotFound` is always fatal. `Parse` and `Io` are per-file and
/// recoverable when the loader runs with `skip_bad_files`.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("metrics folder not found: {0}")]
    FolderNotFound(PathBuf),

    #[error("failed to parse {file}: {message}")]
    Parse { file: PathBuf, message: String },

    #[error("failed to read {file}: {source}")]
    Io {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LoadError {
    /// The file this error is attached to, if any.
    pub fn file(&self) -> Option<&PathBuf> {
        match self {
            LoadError::FolderNotFound(_) => None,
            LoadError::Parse { file, .. } => Some(file),
            LoadError::Io { file, .. } => Some(file),
        }
    }
}
