//! Type-safe path types
//!
//! This module provides three distinct path types using the newtype pattern:
//!
//! - [`AbsPath`]: Absolute filesystem paths
//! - [`RelPath`]: Slash-separated relative target names
//! - [`SourceRelPath`]: Relative paths in the source directory with encoded
//!   attributes
//!
//! Target names are stored as slash-separated strings so that ordering and
//! pattern matching are identical on every platform. These types prevent
//! common path manipulation errors at compile time.
//!
//! # Examples
//!
//! ```
//! use tatami_core::path::{AbsPath, RelPath};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let home = AbsPath::new("/home/user".into())?;
//! let config = RelPath::new(".config/nvim/init.lua")?;
//! let nvim_config = home.join(&config);
//! assert_eq!(nvim_config.as_path().to_str().unwrap(), "/home/user/.config/nvim/init.lua");
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// An absolute path on the filesystem
///
/// This type guarantees that the path is absolute. Use this for file
/// operations and as base directories.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AbsPath(PathBuf);

impl AbsPath {
    /// Create a new `AbsPath` from a `PathBuf`
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute.
    pub fn new(path: PathBuf) -> Result<Self> {
        if path.is_absolute() {
            Ok(AbsPath(path))
        } else {
            Err(Error::PathNotAbsolute { path })
        }
    }

    /// Create a new `AbsPath` from a reference to a `Path`
    pub fn from_path(path: &Path) -> Result<Self> {
        Self::new(path.to_path_buf())
    }

    /// Get the underlying `Path`
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Convert to a `PathBuf`
    #[must_use]
    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }

    /// Join with a relative path to create a new absolute path
    ///
    /// Joining an empty relative path returns `self` unchanged.
    #[must_use]
    pub fn join(&self, rel: &RelPath) -> Self {
        if rel.is_empty() {
            self.clone()
        } else {
            AbsPath(self.0.join(rel.as_path()))
        }
    }

    /// Join with a single path component
    #[must_use]
    pub fn join_name(&self, name: &str) -> Self {
        AbsPath(self.0.join(name))
    }

    /// Get the parent directory
    ///
    /// Returns `None` if this is the root directory.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0.parent().map(|p| AbsPath(p.to_path_buf()))
    }

    /// Strip a base directory prefix to get a relative path
    ///
    /// # Errors
    ///
    /// Returns an error if `self` is not under `base` or the remainder is
    /// not valid UTF-8.
    pub fn strip_prefix(&self, base: &AbsPath) -> Result<RelPath> {
        let rest = self
            .0
            .strip_prefix(&base.0)
            .map_err(|_| Error::InvalidPathPrefix {
                path: self.0.clone(),
                base: base.0.clone(),
            })?;
        let rest = rest.to_str().ok_or_else(|| Error::PathNotUtf8 {
            path: rest.to_path_buf(),
        })?;
        RelPath::new(rest.replace(std::path::MAIN_SEPARATOR, "/"))
    }

    /// Get the file name
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.0.file_name().and_then(|s| s.to_str())
    }
}

impl AsRef<Path> for AbsPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl std::fmt::Display for AbsPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// A slash-separated relative path (a target name)
///
/// This type guarantees that the path is relative and UTF-8. The empty
/// path denotes the root of the tree it is resolved against. Ordering is
/// plain byte-wise string ordering, which gives the deterministic
/// traversal order the engine relies on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelPath(String);

impl RelPath {
    /// Create a new `RelPath`
    ///
    /// # Errors
    ///
    /// Returns an error if the path is absolute.
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if path.starts_with('/') {
            Err(Error::PathNotRelative {
                path: PathBuf::from(path),
            })
        } else {
            Ok(RelPath(path))
        }
    }

    /// The empty relative path
    #[must_use]
    pub fn empty() -> Self {
        RelPath(String::new())
    }

    /// Get the path as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the underlying `Path`
    #[must_use]
    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }

    /// Check whether this is the empty path
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Join with a single path component
    #[must_use]
    pub fn join_name(&self, name: &str) -> Self {
        if self.0.is_empty() {
            RelPath(name.to_string())
        } else {
            RelPath(format!("{}/{name}", self.0))
        }
    }

    /// Join with another relative path
    #[must_use]
    pub fn join(&self, other: &RelPath) -> Self {
        if other.is_empty() {
            self.clone()
        } else {
            self.join_name(other.as_str())
        }
    }

    /// Get the parent directory
    ///
    /// Returns `None` for the empty path; a single component path has the
    /// empty path as its parent.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        match self.0.rfind('/') {
            Some(index) => Some(RelPath(self.0[..index].to_string())),
            None => Some(RelPath::empty()),
        }
    }

    /// Get the final path component
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        if self.0.is_empty() {
            return None;
        }
        match self.0.rfind('/') {
            Some(index) => Some(&self.0[index + 1..]),
            None => Some(&self.0),
        }
    }
}

impl AsRef<Path> for RelPath {
    fn as_ref(&self) -> &Path {
        self.as_path()
    }
}

impl std::fmt::Display for RelPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A relative path in the source directory
///
/// This type represents paths whose components carry encoded attributes
/// (`dot_`, `private_`, `run_once_`, the `.tmpl` suffix, and so on). It is
/// deliberately distinct from [`RelPath`] so that encoded and decoded paths
/// cannot be mixed up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRelPath(String);

impl SourceRelPath {
    /// Create a new `SourceRelPath`
    ///
    /// # Errors
    ///
    /// Returns an error if the path is absolute.
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if path.starts_with('/') {
            Err(Error::PathNotRelative {
                path: PathBuf::from(path),
            })
        } else {
            Ok(SourceRelPath(path))
        }
    }

    /// The empty source-relative path
    #[must_use]
    pub fn empty() -> Self {
        SourceRelPath(String::new())
    }

    /// Get the path as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the underlying `Path`
    #[must_use]
    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }

    /// Check whether this is the empty path
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Join with a single encoded component
    #[must_use]
    pub fn join_name(&self, name: &str) -> Self {
        if self.0.is_empty() {
            SourceRelPath(name.to_string())
        } else {
            SourceRelPath(format!("{}/{name}", self.0))
        }
    }

    /// Get the final path component
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        if self.0.is_empty() {
            return None;
        }
        match self.0.rfind('/') {
            Some(index) => Some(&self.0[index + 1..]),
            None => Some(&self.0),
        }
    }

    /// Reinterpret as a plain relative path (keeps the encoded components)
    #[must_use]
    pub fn to_rel_path(&self) -> RelPath {
        RelPath(self.0.clone())
    }
}

impl AsRef<Path> for SourceRelPath {
    fn as_ref(&self) -> &Path {
        self.as_path()
    }
}

impl std::fmt::Display for SourceRelPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_abspath_new_valid() {
        let abs = AbsPath::new("/home/user".into()).expect("Should be valid");
        assert_eq!(abs.as_path(), Path::new("/home/user"));
    }

    #[test]
    fn test_abspath_new_invalid_relative() {
        assert!(AbsPath::new("relative/path".into()).is_err());
    }

    #[test]
    fn test_abspath_join() {
        let base = AbsPath::new("/home/user".into()).unwrap();
        let rel = RelPath::new(".config/nvim").unwrap();
        assert_eq!(
            base.join(&rel).as_path(),
            Path::new("/home/user/.config/nvim")
        );
    }

    #[test]
    fn test_abspath_join_empty() {
        let base = AbsPath::new("/home/user".into()).unwrap();
        assert_eq!(base.join(&RelPath::empty()), base);
    }

    #[test]
    fn test_abspath_strip_prefix() {
        let full = AbsPath::new("/home/user/.config/nvim/init.lua".into()).unwrap();
        let base = AbsPath::new("/home/user".into()).unwrap();
        let rel = full.strip_prefix(&base).expect("Should strip prefix");
        assert_eq!(rel.as_str(), ".config/nvim/init.lua");
    }

    #[test]
    fn test_abspath_strip_prefix_not_prefix() {
        let path = AbsPath::new("/home/user/file.txt".into()).unwrap();
        let not_prefix = AbsPath::new("/var/log".into()).unwrap();
        assert!(path.strip_prefix(&not_prefix).is_err());
    }

    #[test]
    fn test_abspath_parent() {
        let abs = AbsPath::new("/home/user/documents".into()).unwrap();
        assert_eq!(
            abs.parent().unwrap().as_path(),
            Path::new("/home/user")
        );
        assert!(AbsPath::new("/".into()).unwrap().parent().is_none());
    }

    #[test]
    fn test_relpath_new_invalid_absolute() {
        assert!(RelPath::new("/absolute/path").is_err());
    }

    #[test]
    fn test_relpath_join_name() {
        let base = RelPath::new(".config").unwrap();
        assert_eq!(base.join_name("nvim").as_str(), ".config/nvim");
        assert_eq!(RelPath::empty().join_name("nvim").as_str(), "nvim");
    }

    #[test]
    fn test_relpath_parent() {
        let rel = RelPath::new(".config/nvim/init.lua").unwrap();
        assert_eq!(rel.parent().unwrap().as_str(), ".config/nvim");
        let single = RelPath::new("file.txt").unwrap();
        assert_eq!(single.parent().unwrap(), RelPath::empty());
        assert!(RelPath::empty().parent().is_none());
    }

    #[test]
    fn test_relpath_file_name() {
        let rel = RelPath::new(".config/nvim/init.lua").unwrap();
        assert_eq!(rel.file_name(), Some("init.lua"));
        assert_eq!(RelPath::new("file.txt").unwrap().file_name(), Some("file.txt"));
        assert_eq!(RelPath::empty().file_name(), None);
    }

    #[test]
    fn test_relpath_ordering_is_lexicographic() {
        let mut names = vec![
            RelPath::new(".zshrc").unwrap(),
            RelPath::new(".bashrc").unwrap(),
            RelPath::new(".config/git").unwrap(),
        ];
        names.sort();
        assert_eq!(
            names.iter().map(RelPath::as_str).collect::<Vec<_>>(),
            vec![".bashrc", ".config/git", ".zshrc"]
        );
    }

    #[test]
    fn test_sourcerelpath_to_rel_path() {
        let src = SourceRelPath::new("dot_config/private_ssh").unwrap();
        assert_eq!(src.to_rel_path().as_str(), "dot_config/private_ssh");
    }

    #[test]
    fn test_sourcerelpath_file_name() {
        let src = SourceRelPath::new("dot_config/dot_gitconfig.tmpl").unwrap();
        assert_eq!(src.file_name(), Some("dot_gitconfig.tmpl"));
    }

    #[test]
    fn test_relpath_serde_roundtrip() {
        let rel = RelPath::new(".config/nvim").unwrap();
        let json = serde_json::to_string(&rel).expect("Serialize failed");
        assert_eq!(json, "\".config/nvim\"");
        let back: RelPath = serde_json::from_str(&json).expect("Deserialize failed");
        assert_eq!(rel, back);
    }
}
