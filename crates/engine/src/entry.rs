//! Source and destination entry types
//!
//! Source-state entries are read from the authored tree and know how to
//! materialize their target-state entry; destination-state entries are
//! discovered from the filesystem with `lstat` and evaluate their contents
//! lazily.

use crate::attr::{DirAttributes, FileAttributes, SourceFileKind};
use crate::error::{Error, Result};
use crate::lazy::{LazyContents, LazyLinkname};
use crate::state::SourceState;
use crate::system::{EntryInfo, FileKind, System};
use crate::target::{TargetStateEntry, is_empty_contents};
use once_cell::unsync::OnceCell;
use std::rc::Rc;
use std::sync::Arc;
use tatami_core::path::{AbsPath, RelPath};

/// The state of one entry in the source state
#[derive(Debug)]
pub enum SourceStateEntry {
    /// A directory
    Dir(SourceStateDir),
    /// A regular file (which may represent a file, script, or symlink)
    File(SourceStateFile),
    /// An entry scheduled for removal from the destination
    Remove(SourceStateRemove),
    /// A directory rename in the source tree
    RenameDir(SourceStateRenameDir),
}

impl SourceStateEntry {
    /// Scheduling order: negative first, then zero, then positive
    #[must_use]
    pub fn order(&self) -> i8 {
        match self {
            SourceStateEntry::File(file) => file.attrs.order,
            SourceStateEntry::RenameDir(_) => -1,
            _ => 0,
        }
    }

    /// The source path shown in error messages
    #[must_use]
    pub fn source_path(&self) -> String {
        match self {
            SourceStateEntry::Dir(dir) => dir.source_path.to_string(),
            SourceStateEntry::File(file) => file.source_path.to_string(),
            SourceStateEntry::Remove(remove) => remove.source_path.to_string(),
            SourceStateEntry::RenameDir(rename) => rename.new_name.clone(),
        }
    }

    /// Materialize the target-state entry for this source entry
    pub fn target_state_entry(&self, state: &SourceState) -> Result<TargetStateEntry> {
        match self {
            SourceStateEntry::Dir(dir) => Ok(TargetStateEntry::Dir {
                perm: dir.attrs.perm(),
            }),
            SourceStateEntry::File(file) => file.target_state_entry(state),
            SourceStateEntry::Remove(_) => Ok(TargetStateEntry::Absent),
            SourceStateEntry::RenameDir(rename) => Ok(TargetStateEntry::RenameDir {
                old_name: rename.old_name.clone(),
                new_name: rename.new_name.clone(),
            }),
        }
    }

    /// Force evaluation of contents and target state, caching errors
    pub fn evaluate(&self, state: &SourceState) -> Result<()> {
        if let SourceStateEntry::File(file) = self {
            file.contents.contents_sha256()?;
        }
        self.target_state_entry(state)?.evaluate()
    }
}

/// A directory in the source state
#[derive(Debug)]
pub struct SourceStateDir {
    /// Absolute path in the source tree
    pub source_path: AbsPath,
    /// Parsed directory attributes
    pub attrs: DirAttributes,
}

/// A regular file in the source state
///
/// Carries the raw (already decrypted) contents lazily and memoizes the
/// materialized target-state entry; materialization errors are cached and
/// replayed.
pub struct SourceStateFile {
    /// Absolute path in the source tree
    pub source_path: AbsPath,
    /// Parsed file attributes
    pub attrs: FileAttributes,
    /// The target name this file maps to
    pub target_name: RelPath,
    contents: Rc<LazyContents<'static>>,
    target: OnceCell<std::result::Result<TargetStateEntry, Arc<Error>>>,
}

impl std::fmt::Debug for SourceStateFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceStateFile")
            .field("source_path", &self.source_path)
            .field("attrs", &self.attrs)
            .field("target_name", &self.target_name)
            .finish_non_exhaustive()
    }
}

impl SourceStateFile {
    /// Create a source file whose target state is computed on demand
    pub(crate) fn new(
        source_path: AbsPath,
        attrs: FileAttributes,
        target_name: RelPath,
        contents: Rc<LazyContents<'static>>,
    ) -> Self {
        Self {
            source_path,
            attrs,
            target_name,
            contents,
            target: OnceCell::new(),
        }
    }

    /// Create a source file with an already-known target state
    ///
    /// Used when adding destination files to the source: the target state
    /// describes the source file to write, so no materialization from disk
    /// is needed.
    pub(crate) fn with_target_state(
        source_path: AbsPath,
        attrs: FileAttributes,
        target_name: RelPath,
        contents: Rc<LazyContents<'static>>,
        target: TargetStateEntry,
    ) -> Self {
        let cell = OnceCell::new();
        cell.set(Ok(target)).unwrap_or_else(|_| unreachable!());
        Self {
            source_path,
            attrs,
            target_name,
            contents,
            target: cell,
        }
    }

    /// The raw (decrypted, unrendered) source contents
    pub fn contents(&self) -> Result<&[u8]> {
        self.contents.contents()
    }

    fn target_state_entry(&self, state: &SourceState) -> Result<TargetStateEntry> {
        let cached = self
            .target
            .get_or_init(|| self.compute_target_state(state).map_err(Arc::new));
        match cached {
            Ok(entry) => Ok(entry.clone()),
            Err(e) => Err(Error::Shared(Arc::clone(e))),
        }
    }

    fn compute_target_state(&self, state: &SourceState) -> Result<TargetStateEntry> {
        let mut contents = self.contents.contents()?.to_vec();
        if self.attrs.is_template() {
            contents = state.execute_template(&self.source_path.to_string(), &contents)?;
        }
        match self.attrs.kind {
            SourceFileKind::File => {
                if !self.attrs.is_empty() && is_empty_contents(&contents) {
                    return Ok(TargetStateEntry::Absent);
                }
                Ok(TargetStateEntry::File {
                    contents: Rc::new(LazyContents::new(contents)),
                    perm: self.attrs.perm(),
                })
            }
            SourceFileKind::Present => Ok(TargetStateEntry::Present {
                contents: Rc::new(LazyContents::new(contents)),
                perm: self.attrs.perm(),
            }),
            SourceFileKind::Script => Ok(TargetStateEntry::Script {
                contents: Rc::new(LazyContents::new(contents)),
                name: self.target_name.clone(),
                once: self.attrs.is_once(),
            }),
            SourceFileKind::Symlink => {
                let text = String::from_utf8(contents).map_err(|_| Error::InvalidUtf8 {
                    path: self.source_path.to_string(),
                })?;
                Ok(TargetStateEntry::Symlink {
                    linkname: Rc::new(LazyLinkname::new(text.trim().to_string())),
                })
            }
        }
    }
}

/// An entry scheduled for removal from the destination
#[derive(Debug)]
pub struct SourceStateRemove {
    /// The source path that caused the removal (a remove-pattern file or
    /// an exact directory)
    pub source_path: AbsPath,
}

/// A directory rename in the source state
#[derive(Debug)]
pub struct SourceStateRenameDir {
    /// Current basename
    pub old_name: String,
    /// New basename
    pub new_name: String,
}

/// The observed state of one entry in the destination
#[derive(Debug)]
pub enum DestStateEntry<'a> {
    /// Nothing exists at the path
    Absent {
        /// The observed path
        path: AbsPath,
    },
    /// A directory
    Dir {
        /// The observed path
        path: AbsPath,
        /// Permission bits
        perm: u32,
    },
    /// A regular file
    File {
        /// The observed path
        path: AbsPath,
        /// Permission bits
        perm: u32,
        /// Contents, read on first use
        contents: LazyContents<'a>,
    },
    /// A symbolic link
    Symlink {
        /// The observed path
        path: AbsPath,
        /// Link target, read on first use
        linkname: LazyLinkname<'a>,
    },
}

impl<'a> DestStateEntry<'a> {
    /// Discover the entry at `path` via `lstat`
    ///
    /// Entries that are not files, directories, or symlinks fail with an
    /// unsupported-file-type error.
    pub fn read(system: &'a dyn System, path: &AbsPath) -> Result<Self> {
        match system.lstat(path)? {
            None => Ok(DestStateEntry::Absent { path: path.clone() }),
            Some(EntryInfo {
                kind: FileKind::File,
                perm,
                ..
            }) => {
                let contents_path = path.clone();
                Ok(DestStateEntry::File {
                    path: path.clone(),
                    perm,
                    contents: LazyContents::from_fn(move || system.read_file(&contents_path)),
                })
            }
            Some(EntryInfo {
                kind: FileKind::Dir,
                perm,
                ..
            }) => Ok(DestStateEntry::Dir {
                path: path.clone(),
                perm,
            }),
            Some(EntryInfo {
                kind: FileKind::Symlink,
                ..
            }) => {
                let linkname_path = path.clone();
                Ok(DestStateEntry::Symlink {
                    path: path.clone(),
                    linkname: LazyLinkname::from_fn(move || system.readlink(&linkname_path)),
                })
            }
            Some(EntryInfo { kind, .. }) => Err(Error::UnsupportedFileType {
                path: path.clone(),
                found: kind.type_name().to_string(),
            }),
        }
    }

    /// The observed path
    #[must_use]
    pub fn path(&self) -> &AbsPath {
        match self {
            DestStateEntry::Absent { path }
            | DestStateEntry::Dir { path, .. }
            | DestStateEntry::File { path, .. }
            | DestStateEntry::Symlink { path, .. } => path,
        }
    }

    /// Remove the entry; a no-op when already absent
    pub fn remove(&self, system: &dyn System) -> Result<()> {
        match self {
            DestStateEntry::Absent { .. } => Ok(()),
            _ => system.remove_all(self.path()),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use crate::database::MockPersistentState;
    use crate::system::RealSystem;
    use tempfile::TempDir;

    #[test]
    fn test_dest_entry_discovery() {
        let dir = TempDir::new().unwrap();
        let system = RealSystem::new(Box::new(MockPersistentState::new()));
        let file = AbsPath::new(dir.path().join("file")).unwrap();
        system.write_file(&file, b"contents", 0o644).unwrap();

        match DestStateEntry::read(&system, &file).unwrap() {
            DestStateEntry::File { contents, .. } => {
                assert_eq!(contents.contents().unwrap(), b"contents");
            }
            other => panic!("expected file, got {other:?}"),
        }

        let missing = AbsPath::new(dir.path().join("missing")).unwrap();
        assert!(matches!(
            DestStateEntry::read(&system, &missing).unwrap(),
            DestStateEntry::Absent { .. }
        ));

        let subdir = AbsPath::new(dir.path().join("sub")).unwrap();
        system.mkdir(&subdir, 0o755).unwrap();
        assert!(matches!(
            DestStateEntry::read(&system, &subdir).unwrap(),
            DestStateEntry::Dir { .. }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_dest_entry_unsupported_type() {
        use std::os::unix::net::UnixListener;
        let dir = TempDir::new().unwrap();
        let socket_path = dir.path().join("sock");
        let _listener = UnixListener::bind(&socket_path).unwrap();
        let system = RealSystem::new(Box::new(MockPersistentState::new()));
        let path = AbsPath::new(socket_path).unwrap();
        let err = DestStateEntry::read(&system, &path).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFileType { found, .. } if found == "socket"));
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let dir = TempDir::new().unwrap();
        let system = RealSystem::new(Box::new(MockPersistentState::new()));
        let missing = AbsPath::new(dir.path().join("missing")).unwrap();
        let entry = DestStateEntry::read(&system, &missing).unwrap();
        entry.remove(&system).unwrap();
    }
}
