//! Error types for tatami-core

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for tatami-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by path construction and manipulation
#[derive(Error, Debug)]
pub enum Error {
    /// Path is not absolute
    #[error("Path must be absolute: {path}")]
    PathNotAbsolute {
        /// The offending path
        path: PathBuf,
    },

    /// Path is not relative
    #[error("Path must be relative: {path}")]
    PathNotRelative {
        /// The offending path
        path: PathBuf,
    },

    /// Invalid path prefix
    #[error("Path {} is not under base directory {}", path.display(), base.display())]
    InvalidPathPrefix {
        /// The path that was being stripped
        path: PathBuf,
        /// The base that was expected to be a prefix
        base: PathBuf,
    },

    /// Path contains non-UTF-8 components
    #[error("Path is not valid UTF-8: {path}")]
    PathNotUtf8 {
        /// The offending path
        path: PathBuf,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
