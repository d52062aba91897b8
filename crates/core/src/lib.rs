//! # Tatami Core
//!
//! Shared foundation for the tatami reconciliation engine:
//!
//! - **Paths**: type-safe absolute/relative path newtypes
//! - **Platform**: umask capture and Unix file-mode constants
//! - **Errors**: the shared error type for path handling

pub mod error;
pub mod path;
pub mod platform;

pub use error::{Error, Result};
pub use path::{AbsPath, RelPath, SourceRelPath};
