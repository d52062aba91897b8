//! Debug system
//!
//! Wraps a system and logs every call with its arguments, duration, and
//! outcome. The invocation is logged before it executes, so a hanging
//! call is visible in the log; calls that take longer than one second are
//! additionally logged at warn level.

use crate::database::{DebugPersistentState, PersistentState};
use crate::error::Result;
use crate::system::{DirEntryInfo, EntryInfo, System};
use std::process::Command;
use std::time::{Duration, Instant};
use tatami_core::path::AbsPath;

const SLOW_CALL: Duration = Duration::from_secs(1);

/// A system that logs all of the actions it executes
pub struct DebugSystem<S> {
    inner: S,
}

impl<S: System> DebugSystem<S> {
    /// Wrap `inner`
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Unwrap the inner system
    pub fn into_inner(self) -> S {
        self.inner
    }

    fn call<T>(&self, what: &str, f: impl FnOnce(&S) -> Result<T>) -> Result<T> {
        tracing::debug!(target: "tatami::system", call = %what);
        let start = Instant::now();
        let result = f(&self.inner);
        let elapsed = start.elapsed();
        if elapsed >= SLOW_CALL {
            tracing::warn!(target: "tatami::system", call = %what, ?elapsed, "slow system call");
        }
        match &result {
            Ok(_) => {
                tracing::debug!(target: "tatami::system", call = %what, ?elapsed, "ok");
            }
            Err(e) => {
                tracing::debug!(target: "tatami::system", call = %what, ?elapsed, error = %e, "failed");
            }
        }
        result
    }
}

impl<S: System> System for DebugSystem<S> {
    fn chmod(&self, path: &AbsPath, perm: u32) -> Result<()> {
        self.call(&format!("chmod({path}, 0o{perm:o})"), |s| {
            s.chmod(path, perm)
        })
    }

    fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        self.call(&format!("glob({pattern})"), |s| s.glob(pattern))
    }

    fn idempotent_cmd_output(&self, cmd: &mut Command) -> Result<Vec<u8>> {
        self.call(&format!("idempotent_cmd_output({cmd:?})"), |s| {
            s.idempotent_cmd_output(cmd)
        })
    }

    fn lstat(&self, path: &AbsPath) -> Result<Option<EntryInfo>> {
        self.call(&format!("lstat({path})"), |s| s.lstat(path))
    }

    fn stat(&self, path: &AbsPath) -> Result<Option<EntryInfo>> {
        self.call(&format!("stat({path})"), |s| s.stat(path))
    }

    fn mkdir(&self, path: &AbsPath, perm: u32) -> Result<()> {
        self.call(&format!("mkdir({path}, 0o{perm:o})"), |s| {
            s.mkdir(path, perm)
        })
    }

    fn persistent_state(&self) -> Box<dyn PersistentState + '_> {
        Box::new(DebugPersistentState::new(self.inner.persistent_state()))
    }

    fn raw_path(&self, path: &AbsPath) -> Result<AbsPath> {
        self.inner.raw_path(path)
    }

    fn read_dir(&self, path: &AbsPath) -> Result<Vec<DirEntryInfo>> {
        self.call(&format!("read_dir({path})"), |s| s.read_dir(path))
    }

    fn read_file(&self, path: &AbsPath) -> Result<Vec<u8>> {
        self.call(&format!("read_file({path})"), |s| s.read_file(path))
    }

    fn readlink(&self, path: &AbsPath) -> Result<String> {
        self.call(&format!("readlink({path})"), |s| s.readlink(path))
    }

    fn remove_all(&self, path: &AbsPath) -> Result<()> {
        self.call(&format!("remove_all({path})"), |s| s.remove_all(path))
    }

    fn rename(&self, old: &AbsPath, new: &AbsPath) -> Result<()> {
        self.call(&format!("rename({old}, {new})"), |s| s.rename(old, new))
    }

    fn run_cmd(&self, cmd: &mut Command) -> Result<()> {
        self.call(&format!("run_cmd({cmd:?})"), |s| s.run_cmd(cmd))
    }

    fn run_script(&self, name: &str, dir: &AbsPath, data: &[u8]) -> Result<()> {
        self.call(
            &format!("run_script({name}, {dir}, {} bytes)", data.len()),
            |s| s.run_script(name, dir, data),
        )
    }

    fn write_file(&self, path: &AbsPath, data: &[u8], perm: u32) -> Result<()> {
        self.call(
            &format!("write_file({path}, {} bytes, 0o{perm:o})", data.len()),
            |s| s.write_file(path, data, perm),
        )
    }

    fn write_symlink(&self, linkname: &str, path: &AbsPath) -> Result<()> {
        self.call(&format!("write_symlink({linkname}, {path})"), |s| {
            s.write_symlink(linkname, path)
        })
    }
}
