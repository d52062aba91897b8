//! Dry-run system
//!
//! Reads pass through to the wrapped system; every mutating operation is a
//! no-op that sets the `modified` flag. `verify` and `diff` run the full
//! reconciliation against this wrapper and inspect the flag afterwards.

use crate::database::{DryRunPersistentState, PersistentState};
use crate::error::Result;
use crate::system::{DirEntryInfo, EntryInfo, System};
use std::cell::Cell;
use std::process::Command;
use tatami_core::path::AbsPath;

/// A system that records whether it would have modified anything
pub struct DryRunSystem<S> {
    inner: S,
    modified: Cell<bool>,
}

impl<S: System> DryRunSystem<S> {
    /// Wrap `inner`
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            modified: Cell::new(false),
        }
    }

    /// Whether any mutating operation was attempted
    pub fn modified(&self) -> bool {
        self.modified.get()
    }

    /// Unwrap the inner system
    pub fn into_inner(self) -> S {
        self.inner
    }

    fn modify(&self) -> Result<()> {
        self.modified.set(true);
        Ok(())
    }
}

impl<S: System> System for DryRunSystem<S> {
    fn chmod(&self, _path: &AbsPath, _perm: u32) -> Result<()> {
        self.modify()
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

    fn mkdir(&self, _path: &AbsPath, _perm: u32) -> Result<()> {
        self.modify()
    }

    fn persistent_state(&self) -> Box<dyn PersistentState + '_> {
        Box::new(DryRunPersistentState::new(self.inner.persistent_state()))
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

    fn remove_all(&self, _path: &AbsPath) -> Result<()> {
        self.modify()
    }

    fn rename(&self, _old: &AbsPath, _new: &AbsPath) -> Result<()> {
        self.modify()
    }

    fn run_cmd(&self, _cmd: &mut Command) -> Result<()> {
        self.modify()
    }

    fn run_script(&self, _name: &str, _dir: &AbsPath, _data: &[u8]) -> Result<()> {
        self.modify()
    }

    fn write_file(&self, _path: &AbsPath, _data: &[u8], _perm: u32) -> Result<()> {
        self.modify()
    }

    fn write_symlink(&self, _linkname: &str, _path: &AbsPath) -> Result<()> {
        self.modify()
    }
}
