//! System abstraction
//!
//! A [`System`] is the single capability surface the engine reads from and
//! writes to: filesystem operations, command execution, script execution,
//! and access to persistent state. Wrapping systems compose by forwarding
//! to an inner system while altering one concern, such as recording
//! instead of writing, emitting diffs, logging, or archiving.

pub mod debug;
pub mod dryrun;
pub mod dump;
pub mod gitdiff;
pub mod readonly;
pub mod real;
pub mod tar;

pub use self::debug::DebugSystem;
pub use self::dryrun::DryRunSystem;
pub use self::dump::DumpSystem;
pub use self::gitdiff::GitDiffSystem;
pub use self::readonly::ReadOnlySystem;
pub use self::real::RealSystem;
pub use self::tar::{TarHeaderDefaults, TarSystem};

use crate::database::PersistentState;
use crate::error::Result;
use std::process::Command;
use tatami_core::path::AbsPath;

/// The type of a filesystem entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    /// Regular file
    File,
    /// Directory
    Dir,
    /// Symbolic link
    Symlink,
    /// Anything else (named pipe, socket, device)
    Other(String),
}

impl FileKind {
    /// Human-readable type name for error messages
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            FileKind::File => "file",
            FileKind::Dir => "dir",
            FileKind::Symlink => "symlink",
            FileKind::Other(name) => name,
        }
    }
}

/// Metadata of a filesystem entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// The entry type
    pub kind: FileKind,
    /// Permission bits
    pub perm: u32,
    /// Size in bytes (0 for non-files)
    pub len: u64,
}

/// A directory entry as returned by [`System::read_dir`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    /// The entry's basename
    pub name: String,
    /// The entry's metadata (not following symlinks)
    pub info: EntryInfo,
}

/// Reads from and writes to a filesystem, executes idempotent commands,
/// runs scripts, and persists state
pub trait System {
    /// Change the permissions of `path`
    fn chmod(&self, path: &AbsPath, perm: u32) -> Result<()>;

    /// Expand a glob pattern against the filesystem
    fn glob(&self, pattern: &str) -> Result<Vec<String>>;

    /// Run a command with no side effects and return its standard output
    fn idempotent_cmd_output(&self, cmd: &mut Command) -> Result<Vec<u8>>;

    /// Get metadata without following symlinks; `None` if absent
    fn lstat(&self, path: &AbsPath) -> Result<Option<EntryInfo>>;

    /// Get metadata following symlinks; `None` if absent
    fn stat(&self, path: &AbsPath) -> Result<Option<EntryInfo>>;

    /// Create a directory
    fn mkdir(&self, path: &AbsPath, perm: u32) -> Result<()>;

    /// Access the persistent state routed through this system
    fn persistent_state(&self) -> Box<dyn PersistentState + '_>;

    /// Resolve `path` to the path the underlying tools must use
    fn raw_path(&self, path: &AbsPath) -> Result<AbsPath> {
        Ok(path.clone())
    }

    /// List a directory
    fn read_dir(&self, path: &AbsPath) -> Result<Vec<DirEntryInfo>>;

    /// Read a file's contents
    fn read_file(&self, path: &AbsPath) -> Result<Vec<u8>>;

    /// Read a symlink's target
    fn readlink(&self, path: &AbsPath) -> Result<String>;

    /// Remove a file or directory tree
    fn remove_all(&self, path: &AbsPath) -> Result<()>;

    /// Rename `old` to `new`
    fn rename(&self, old: &AbsPath, new: &AbsPath) -> Result<()>;

    /// Run a command to completion
    fn run_cmd(&self, cmd: &mut Command) -> Result<()>;

    /// Run a script with the given contents in `dir`
    fn run_script(&self, name: &str, dir: &AbsPath, data: &[u8]) -> Result<()>;

    /// Write a file with the given permissions
    fn write_file(&self, path: &AbsPath, data: &[u8], perm: u32) -> Result<()>;

    /// Create a symlink at `path` pointing to `linkname`
    fn write_symlink(&self, linkname: &str, path: &AbsPath) -> Result<()>;
}

impl<S: System + ?Sized> System for &S {
    fn chmod(&self, path: &AbsPath, perm: u32) -> Result<()> {
        (**self).chmod(path, perm)
    }

    fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        (**self).glob(pattern)
    }

    fn idempotent_cmd_output(&self, cmd: &mut Command) -> Result<Vec<u8>> {
        (**self).idempotent_cmd_output(cmd)
    }

    fn lstat(&self, path: &AbsPath) -> Result<Option<EntryInfo>> {
        (**self).lstat(path)
    }

    fn stat(&self, path: &AbsPath) -> Result<Option<EntryInfo>> {
        (**self).stat(path)
    }

    fn mkdir(&self, path: &AbsPath, perm: u32) -> Result<()> {
        (**self).mkdir(path, perm)
    }

    fn persistent_state(&self) -> Box<dyn PersistentState + '_> {
        (**self).persistent_state()
    }

    fn raw_path(&self, path: &AbsPath) -> Result<AbsPath> {
        (**self).raw_path(path)
    }

    fn read_dir(&self, path: &AbsPath) -> Result<Vec<DirEntryInfo>> {
        (**self).read_dir(path)
    }

    fn read_file(&self, path: &AbsPath) -> Result<Vec<u8>> {
        (**self).read_file(path)
    }

    fn readlink(&self, path: &AbsPath) -> Result<String> {
        (**self).readlink(path)
    }

    fn remove_all(&self, path: &AbsPath) -> Result<()> {
        (**self).remove_all(path)
    }

    fn rename(&self, old: &AbsPath, new: &AbsPath) -> Result<()> {
        (**self).rename(old, new)
    }

    fn run_cmd(&self, cmd: &mut Command) -> Result<()> {
        (**self).run_cmd(cmd)
    }

    fn run_script(&self, name: &str, dir: &AbsPath, data: &[u8]) -> Result<()> {
        (**self).run_script(name, dir, data)
    }

    fn write_file(&self, path: &AbsPath, data: &[u8], perm: u32) -> Result<()> {
        (**self).write_file(path, data, perm)
    }

    fn write_symlink(&self, linkname: &str, path: &AbsPath) -> Result<()> {
        (**self).write_symlink(linkname, path)
    }
}
