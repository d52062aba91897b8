//! Read-only system
//!
//! Identical to the dry-run wrapper for reads, but every mutating
//! operation fails with a permission error instead of silently
//! succeeding. The source tree is read through this wrapper so that no
//! code path can mutate it by accident.

use crate::database::{PersistentState, ReadOnlyPersistentState};
use crate::error::{Error, Result};
use crate::system::{DirEntryInfo, EntryInfo, System};
use std::process::Command;
use tatami_core::path::AbsPath;

/// A system that may only be read from
pub struct ReadOnlySystem<S> {
    inner: S,
}

impl<S: System> ReadOnlySystem<S> {
    /// Wrap `inner`
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Unwrap the inner system
    pub fn into_inner(self) -> S {
        self.inner
    }
}

fn permission(op: &'static str, path: &AbsPath) -> Error {
    Error::Permission {
        op,
        path: path.as_path().to_path_buf(),
    }
}

impl<S: System> System for ReadOnlySystem<S> {
    fn chmod(&self, path: &AbsPath, _perm: u32) -> Result<()> {
        Err(permission("chmod", path))
    }

    fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        self.inner.glob(pattern)
    }

    fn idempotent_cmd_output(&self, cmd: &mut Command) -> Result<Vec<u8>> {
        self.inner.idempotent_cmd_output(cmd)
    }

    fn lstat(&self, path: &AbsPath) -> Result<Option<EntryInfo>> {
        self.inner.lstat(path)
    }

    fn stat(&self, path: &AbsPath) -> Result<Option<EntryInfo>> {
        self.inner.stat(path)
    }

    fn mkdir(&self, path: &AbsPath, _perm: u32) -> Result<()> {
        Err(permission("mkdir", path))
    }

    fn persistent_state(&self) -> Box<dyn PersistentState + '_> {
        Box::new(ReadOnlyPersistentState::new(self.inner.persistent_state()))
    }

    fn raw_path(&self, path: &AbsPath) -> Result<AbsPath> {
        self.inner.raw_path(path)
    }

    fn read_dir(&self, path: &AbsPath) -> Result<Vec<DirEntryInfo>> {
        self.inner.read_dir(path)
    }

    fn read_file(&self, path: &AbsPath) -> Result<Vec<u8>> {
        self.inner.read_file(path)
    }

    fn readlink(&self, path: &AbsPath) -> Result<String> {
        self.inner.readlink(path)
    }

    fn remove_all(&self, path: &AbsPath) -> Result<()> {
        Err(permission("remove", path))
    }

    fn rename(&self, old: &AbsPath, _new: &AbsPath) -> Result<()> {
        Err(permission("rename", old))
    }

    fn run_cmd(&self, cmd: &mut Command) -> Result<()> {
        Err(Error::Permission {
            op: "run",
            path: cmd.get_program().into(),
        })
    }

    fn run_script(&self, name: &str, _dir: &AbsPath, _data: &[u8]) -> Result<()> {
        Err(Error::Permission {
            op: "run script",
            path: name.into(),
        })
    }

    fn write_file(&self, path: &AbsPath, _data: &[u8], _perm: u32) -> Result<()> {
        Err(permission("write", path))
    }

    fn write_symlink(&self, _linkname: &str, path: &AbsPath) -> Result<()> {
        Err(permission("symlink", path))
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
    fn test_reads_pass_writes_fail() {
        let dir = TempDir::new().unwrap();
        let real = RealSystem::new(Box::new(MockPersistentState::new()));
        let path = AbsPath::new(dir.path().join("file")).unwrap();
        real.write_file(&path, b"contents", 0o644).unwrap();

        let ro = ReadOnlySystem::new(&real);
        assert_eq!(ro.read_file(&path).unwrap(), b"contents");
        assert!(matches!(
            ro.write_file(&path, b"x", 0o644).unwrap_err(),
            Error::Permission { .. }
        ));
        assert!(matches!(
            ro.remove_all(&path).unwrap_err(),
            Error::Permission { .. }
        ));
        assert_eq!(real.read_file(&path).unwrap(), b"contents");
    }

    #[test]
    fn test_persistent_state_is_read_only() {
        let ps = MockPersistentState::new();
        ps.set("b", b"k", b"v").unwrap();
        let real = RealSystem::new(Box::new(ps));
        let ro = ReadOnlySystem::new(&real);
        assert_eq!(
            ro.persistent_state().get("b", b"k").unwrap(),
            Some(b"v".to_vec())
        );
        assert!(ro.persistent_state().set("b", b"k", b"x").is_err());
    }
}
