//! Error types for tatami-engine
//!
//! This module defines all error types used throughout the engine. We use
//! `thiserror` for structured error handling with good error messages.
//! Leaf operations return typed errors; callers annotate them with path
//! context. Lazy evaluations cache their first error behind an `Arc` and
//! replay it on every re-evaluation.

use std::path::PathBuf;
use std::sync::Arc;
use tatami_core::path::AbsPath;
use thiserror::Error;

/// Result type alias for tatami-engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// A single target name claimed by more than one source path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateTarget {
    /// The contested target name
    pub target_name: String,
    /// All source paths mapping to it, lexicographically sorted
    pub source_paths: Vec<String>,
}

impl std::fmt::Display for DuplicateTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: duplicate target ({})",
            self.target_name,
            self.source_paths.join(", ")
        )
    }
}

/// Main error type for tatami-engine
#[derive(Error, Debug)]
pub enum Error {
    /// Error reading a file
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        /// The file that could not be read
        path: AbsPath,
        /// Underlying IO failure
        #[source]
        source: std::io::Error,
    },

    /// Error writing a file
    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        /// The file that could not be written
        path: AbsPath,
        /// Underlying IO failure
        #[source]
        source: std::io::Error,
    },

    /// Error creating a directory
    #[error("Failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// The directory that could not be created
        path: AbsPath,
        /// Underlying IO failure
        #[source]
        source: std::io::Error,
    },

    /// Error reading a directory
    #[error("Failed to read directory {path}: {source}")]
    DirectoryRead {
        /// The directory that could not be read
        path: AbsPath,
        /// Underlying IO failure
        #[source]
        source: std::io::Error,
    },

    /// A required path does not exist
    #[error("{path}: not found")]
    NotFound {
        /// The missing path
        path: PathBuf,
    },

    /// Source is not a directory
    #[error("{path}: not a directory")]
    NotADirectory {
        /// The offending path
        path: AbsPath,
    },

    /// Two or more source paths collide on target names
    #[error("{}", duplicates.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    DuplicateTargets {
        /// One record per contested target, sorted by target name
        duplicates: Vec<DuplicateTarget>,
    },

    /// Source contains an entry that is not a file, directory, or symlink
    #[error("{path}: unsupported file type {found}")]
    UnsupportedFileType {
        /// The offending path
        path: AbsPath,
        /// Human-readable type name (named pipe, socket, device)
        found: String,
    },

    /// Template, semver, format decode, or pattern-compile failure
    ///
    /// `context` carries the source path, with a `:line` suffix for
    /// line-based files.
    #[error("{context}: {message}")]
    Parse {
        /// Source location of the malformed input
        context: String,
        /// Human-readable failure description
        message: String,
    },

    /// The source tree requires a newer engine
    #[error("Version {current} is too old, source requires at least {required}")]
    VersionTooLow {
        /// This engine's version
        current: semver::Version,
        /// The maximum version named by the source tree
        required: semver::Version,
    },

    /// The persistent state could not be locked within the timeout
    #[error("Persistent state {path} is locked by another process (timeout {timeout:?})")]
    StateLocked {
        /// Path of the state file
        path: PathBuf,
        /// How long acquisition was attempted
        timeout: std::time::Duration,
    },

    /// A write was attempted through a read-only system
    #[error("{op} {path}: permission denied")]
    Permission {
        /// The rejected operation
        op: &'static str,
        /// The path the operation targeted
        path: PathBuf,
    },

    /// A chattr-style modifier token is not recognized
    #[error("Unknown attribute: {attribute}")]
    UnknownAttribute {
        /// The unrecognized token
        attribute: String,
    },

    /// A source entry that was expected to exist is missing
    #[error("{target_name}: no source state entry")]
    EntryNotFound {
        /// The target name with no entry
        target_name: String,
    },

    /// Template rendering error
    #[error(transparent)]
    Template(#[from] tatami_template::Error),

    /// Encryption or decryption error
    #[error("Encryption failed for {path}: {message}")]
    Encryption {
        /// The file being encrypted or decrypted
        path: String,
        /// Human-readable failure description
        message: String,
    },

    /// Invalid UTF-8 encountered where text was required
    #[error("Invalid UTF-8 in {path}")]
    InvalidUtf8 {
        /// The offending file
        path: String,
    },

    /// A script exited with a failure status
    #[error("Script {name} failed{}", code.map(|c| format!(" with exit code {c}")).unwrap_or_default())]
    Script {
        /// Name of the script
        name: String,
        /// Exit code, if the process exited normally
        code: Option<i32>,
    },

    /// An external command exited with a failure status
    #[error("Command {program} failed{}", code.map(|c| format!(" with exit code {c}")).unwrap_or_default())]
    Command {
        /// The program that was invoked
        program: String,
        /// Exit code, if the process exited normally
        code: Option<i32>,
    },

    /// Persistent state error
    #[error("State persistence error: {0}")]
    State(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Path error
    #[error(transparent)]
    Path(#[from] tatami_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A cached error replayed from a lazy evaluation
    #[error(transparent)]
    Shared(#[from] Arc<Error>),
}

impl Error {
    /// Whether this error means "the path does not exist"
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            Error::FileRead { source, .. } | Error::DirectoryRead { source, .. } => {
                source.kind() == std::io::ErrorKind::NotFound
            }
            Error::Shared(e) => e.is_not_found(),
            _ => false,
        }
    }
}
