//! End-to-end reconciliation scenarios
//!
//! Each test builds a real source tree and destination in a tempdir and
//! drives them through `SourceState::read` + `apply_all`, observing the
//! operations through counting and dry-run wrappers.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::cell::Cell;
use std::fs;
use std::process::Command;
use std::rc::Rc;
use tatami_engine::database::{
    MockPersistentState, PersistentState, SCRIPT_STATE_BUCKET,
};
use tatami_engine::state::{AddOptions, ApplyOptions, SourceState};
use tatami_engine::system::{
    DirEntryInfo, DryRunSystem, EntryInfo, RealSystem, System,
};
use tatami_engine::AbsPath;
use tempfile::TempDir;

const UMASK: u32 = 0o022;

/// Counts mutating operations while delegating to an inner system.
struct CountingSystem<S> {
    inner: S,
    removes: Cell<usize>,
    symlink_writes: Cell<usize>,
    script_runs: Cell<usize>,
}

impl<S: System> CountingSystem<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            removes: Cell::new(0),
            symlink_writes: Cell::new(0),
            script_runs: Cell::new(0),
        }
    }
}

impl<S: System> System for CountingSystem<S> {
    fn chmod(&self, path: &AbsPath, perm: u32) -> tatami_engine::Result<()> {
        self.inner.chmod(path, perm)
    }

    fn glob(&self, pattern: &str) -> tatami_engine::Result<Vec<String>> {
        self.inner.glob(pattern)
    }

    fn idempotent_cmd_output(&self, cmd: &mut Command) -> tatami_engine::Result<Vec<u8>> {
        self.inner.idempotent_cmd_output(cmd)
    }

    fn lstat(&self, path: &AbsPath) -> tatami_engine::Result<Option<EntryInfo>> {
        self.inner.lstat(path)
    }

    fn stat(&self, path: &AbsPath) -> tatami_engine::Result<Option<EntryInfo>> {
        self.inner.stat(path)
    }

    fn mkdir(&self, path: &AbsPath, perm: u32) -> tatami_engine::Result<()> {
        self.inner.mkdir(path, perm)
    }

    fn persistent_state(&self) -> Box<dyn PersistentState + '_> {
        self.inner.persistent_state()
    }

    fn read_dir(&self, path: &AbsPath) -> tatami_engine::Result<Vec<DirEntryInfo>> {
        self.inner.read_dir(path)
    }

    fn read_file(&self, path: &AbsPath) -> tatami_engine::Result<Vec<u8>> {
        self.inner.read_file(path)
    }

    fn readlink(&self, path: &AbsPath) -> tatami_engine::Result<String> {
        self.inner.readlink(path)
    }

    fn remove_all(&self, path: &AbsPath) -> tatami_engine::Result<()> {
        self.removes.set(self.removes.get() + 1);
        self.inner.remove_all(path)
    }

    fn rename(&self, old: &AbsPath, new: &AbsPath) -> tatami_engine::Result<()> {
        self.inner.rename(old, new)
    }

    fn run_cmd(&self, cmd: &mut Command) -> tatami_engine::Result<()> {
        self.inner.run_cmd(cmd)
    }

    fn run_script(&self, name: &str, dir: &AbsPath, data: &[u8]) -> tatami_engine::Result<()> {
        self.script_runs.set(self.script_runs.get() + 1);
        self.inner.run_script(name, dir, data)
    }

    fn write_file(&self, path: &AbsPath, data: &[u8], perm: u32) -> tatami_engine::Result<()> {
        self.inner.write_file(path, data, perm)
    }

    fn write_symlink(&self, linkname: &str, path: &AbsPath) -> tatami_engine::Result<()> {
        self.symlink_writes.set(self.symlink_writes.get() + 1);
        self.inner.write_symlink(linkname, path)
    }
}

struct Fixture {
    _root: TempDir,
    source_dir: AbsPath,
    dest_dir: AbsPath,
    ps: Rc<MockPersistentState>,
    system: Rc<RealSystem>,
}

impl Fixture {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let source_dir = root.path().join("source");
        let dest_dir = root.path().join("dest");
        fs::create_dir_all(&source_dir).unwrap();
        fs::create_dir_all(&dest_dir).unwrap();
        let ps = Rc::new(MockPersistentState::new());
        let system = Rc::new(RealSystem::new(Box::new(Rc::clone(&ps))));
        Self {
            source_dir: AbsPath::new(source_dir).unwrap(),
            dest_dir: AbsPath::new(dest_dir).unwrap(),
            ps,
            system,
            _root: root,
        }
    }

    fn write_source(&self, rel: &str, contents: &[u8]) {
        let path = self.source_dir.as_path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn remove_source(&self, rel: &str) {
        fs::remove_file(self.source_dir.as_path().join(rel)).unwrap();
    }

    fn read_state(&self) -> SourceState {
        let mut state = SourceState::new(
            Rc::clone(&self.system) as Rc<dyn System>,
            self.source_dir.clone(),
            self.dest_dir.clone(),
        )
        .with_umask(UMASK);
        state.read().unwrap();
        state
    }

    fn options(&self) -> ApplyOptions {
        ApplyOptions {
            umask: UMASK,
            ..ApplyOptions::default()
        }
    }

    fn apply(&self, state: &SourceState) {
        state
            .apply_all(&*self.system, &self.dest_dir, &self.options())
            .unwrap();
    }

    /// Apply through a dry-run wrapper and report whether anything would
    /// have changed.
    fn would_modify(&self, state: &SourceState) -> bool {
        let dry = DryRunSystem::new(&*self.system);
        state
            .apply_all(&dry, &self.dest_dir, &self.options())
            .unwrap();
        dry.modified()
    }

    fn dest_path(&self, rel: &str) -> AbsPath {
        AbsPath::new(self.dest_dir.as_path().join(rel)).unwrap()
    }

    #[cfg(unix)]
    fn dest_perm(&self, rel: &str) -> u32 {
        use std::os::unix::fs::PermissionsExt;
        fs::symlink_metadata(self.dest_path(rel))
            .unwrap()
            .permissions()
            .mode()
            & 0o777
    }
}

// Scenario: adding an existing destination file creates an
// attribute-encoded source file with identical bytes.
#[test]
fn test_add_plain_file() {
    let fx = Fixture::new();
    let bashrc = fx.dest_path(".bashrc");
    fs::write(&bashrc, b"# bashrc\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&bashrc, fs::Permissions::from_mode(0o644)).unwrap();
    }

    let state = fx.read_state();
    state
        .add(
            &*fx.system,
            &*fx.system,
            &[bashrc],
            &AddOptions {
                umask: UMASK,
                ..AddOptions::default()
            },
        )
        .unwrap();

    let source_file = fx.source_dir.as_path().join("dot_bashrc");
    assert_eq!(fs::read(&source_file).unwrap(), b"# bashrc\n");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&source_file).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o666 & !UMASK);
    }
}

// Scenario: a file with the empty attribute materializes as a zero-byte
// file; dropping the attribute deletes it again.
#[test]
fn test_empty_file_semantics() {
    let fx = Fixture::new();
    fx.write_source("empty_dot_hushlogin", b"");

    let state = fx.read_state();
    fx.apply(&state);
    let hushlogin = fx.dest_path(".hushlogin");
    assert_eq!(fs::metadata(&hushlogin).unwrap().len(), 0);

    // A second apply performs zero writes.
    assert!(!fx.would_modify(&fx.read_state()));

    // Without the empty attribute, empty contents mean absent.
    fx.remove_source("empty_dot_hushlogin");
    fx.write_source("dot_hushlogin", b"");
    let state = fx.read_state();
    fx.apply(&state);
    assert!(fs::symlink_metadata(&hushlogin).is_err());
}

// Scenario: template expansion against template data.
#[test]
fn test_template_expansion() {
    let fx = Fixture::new();
    fx.write_source(
        "dot_gitconfig.tmpl",
        b"[user]\n  email = {{ \"you@example.com\" }}\n",
    );

    let state = fx.read_state();
    fx.apply(&state);
    assert_eq!(
        fs::read(fx.dest_path(".gitconfig")).unwrap(),
        b"[user]\n  email = you@example.com\n"
    );
    #[cfg(unix)]
    assert_eq!(fx.dest_perm(".gitconfig"), 0o666 & !UMASK);
}

// Scenario: private directories and their files get owner-only modes.
#[cfg(unix)]
#[test]
fn test_private_directory() {
    let fx = Fixture::new();
    fx.write_source("private_dot_ssh/config", b"Host *\n");

    let state = fx.read_state();
    fx.apply(&state);
    assert_eq!(fx.dest_perm(".ssh"), 0o700 & !UMASK);
    assert_eq!(fx.dest_perm(".ssh/config"), 0o600 & !UMASK);
    assert_eq!(fs::read(fx.dest_path(".ssh/config")).unwrap(), b"Host *\n");

    assert!(!fx.would_modify(&fx.read_state()));
}

// Scenario: symlink management; re-pointing performs exactly one remove
// and one symlink write.
#[cfg(unix)]
#[test]
fn test_symlink_repoint() {
    let fx = Fixture::new();
    fx.write_source("symlink_dot_symlink", b".bashrc\n");

    let state = fx.read_state();
    fx.apply(&state);
    let link = fx.dest_path(".symlink");
    assert_eq!(
        fs::read_link(&link).unwrap().to_string_lossy(),
        ".bashrc"
    );

    // Unchanged: no operations at all.
    let counting = CountingSystem::new(&*fx.system);
    fx.read_state()
        .apply_all(&counting, &fx.dest_dir, &fx.options())
        .unwrap();
    assert_eq!(counting.removes.get(), 0);
    assert_eq!(counting.symlink_writes.get(), 0);

    // Re-pointed: exactly one remove and one write.
    fx.write_source("symlink_dot_symlink", b".zshrc\n");
    let counting = CountingSystem::new(&*fx.system);
    fx.read_state()
        .apply_all(&counting, &fx.dest_dir, &fx.options())
        .unwrap();
    assert_eq!(counting.removes.get(), 1);
    assert_eq!(counting.symlink_writes.get(), 1);
    assert_eq!(fs::read_link(&link).unwrap().to_string_lossy(), ".zshrc");
}

// Scenario: run-once scripts execute at most once per distinct contents.
#[cfg(unix)]
#[test]
fn test_run_once_script() {
    let fx = Fixture::new();
    fx.write_source("run_once_install.sh", b"#!/bin/sh\necho hi\n");

    let counting = CountingSystem::new(&*fx.system);
    fx.read_state()
        .apply_all(&counting, &fx.dest_dir, &fx.options())
        .unwrap();
    assert_eq!(counting.script_runs.get(), 1);

    // Same contents: not run again.
    let counting = CountingSystem::new(&*fx.system);
    fx.read_state()
        .apply_all(&counting, &fx.dest_dir, &fx.options())
        .unwrap();
    assert_eq!(counting.script_runs.get(), 0);

    // Changed contents: runs exactly once more.
    fx.write_source("run_once_install.sh", b"#!/bin/sh\necho changed\n");
    let counting = CountingSystem::new(&*fx.system);
    fx.read_state()
        .apply_all(&counting, &fx.dest_dir, &fx.options())
        .unwrap();
    assert_eq!(counting.script_runs.get(), 1);

    // The state records carry the script name and an executedAt stamp.
    let mut keys = Vec::new();
    fx.ps
        .for_each(SCRIPT_STATE_BUCKET, &mut |k, v| {
            let key = String::from_utf8_lossy(k).into_owned();
            let value: serde_json::Value = serde_json::from_slice(v).unwrap();
            assert_eq!(value["name"], "install.sh");
            assert!(value["executedAt"].is_string());
            keys.push(key);
            Ok(())
        })
        .unwrap();
    assert_eq!(keys.len(), 2);
    assert!(keys.iter().all(|k| k.starts_with("install.sh:")));
}

// Scripts that are not marked once run on every apply.
#[cfg(unix)]
#[test]
fn test_plain_script_runs_every_time() {
    let fx = Fixture::new();
    fx.write_source("run_touch.sh", b"#!/bin/sh\ntouch ran\n");

    for _ in 0..2 {
        let counting = CountingSystem::new(&*fx.system);
        fx.read_state()
            .apply_all(&counting, &fx.dest_dir, &fx.options())
            .unwrap();
        assert_eq!(counting.script_runs.get(), 1);
    }
    // The script ran with the destination directory as its cwd.
    assert!(fx.dest_path("ran").as_path().exists());
}

// Scripts with empty rendered contents are no-ops.
#[test]
fn test_empty_script_is_noop() {
    let fx = Fixture::new();
    fx.write_source("run_noop.sh", b"  \n");
    let counting = CountingSystem::new(&*fx.system);
    fx.read_state()
        .apply_all(&counting, &fx.dest_dir, &fx.options())
        .unwrap();
    assert_eq!(counting.script_runs.get(), 0);
}

// A full tree applies idempotently: the second pass performs no writes.
#[cfg(unix)]
#[test]
fn test_apply_all_is_idempotent() {
    let fx = Fixture::new();
    fx.write_source("dot_bashrc", b"# bashrc\n");
    fx.write_source("dot_config/nvim/init.lua", b"-- init\n");
    fx.write_source("private_dot_netrc", b"machine example.com\n");
    fx.write_source("symlink_dot_link", b".bashrc\n");
    fx.write_source("empty_dot_hushlogin", b"");

    let state = fx.read_state();
    fx.apply(&state);
    assert!(!fx.would_modify(&fx.read_state()));

    // Drift in the destination is repaired and detected.
    fs::write(fx.dest_path(".bashrc"), b"drifted\n").unwrap();
    assert!(fx.would_modify(&fx.read_state()));
    fx.apply(&fx.read_state());
    assert_eq!(fs::read(fx.dest_path(".bashrc")).unwrap(), b"# bashrc\n");
    assert!(!fx.would_modify(&fx.read_state()));
}

// After a successful apply with state updates, the entry-state bucket
// records mode and content hash per destination path.
#[test]
fn test_update_state_persists_entry_states() {
    let fx = Fixture::new();
    fx.write_source("dot_bashrc", b"# bashrc\n");

    let state = fx.read_state();
    state
        .apply_all(
            &*fx.system,
            &fx.dest_dir,
            &ApplyOptions {
                umask: UMASK,
                update_state: true,
                ..ApplyOptions::default()
            },
        )
        .unwrap();

    let key = fx.dest_path(".bashrc").to_string().into_bytes();
    let raw = fx
        .ps
        .get(tatami_engine::database::ENTRY_STATE_BUCKET, &key)
        .unwrap()
        .expect("entry state recorded");
    let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(value["mode"], 0o666 & !UMASK);
    let sha = value["contentsSHA256"].as_str().unwrap();
    assert_eq!(sha.len(), 64);
    assert_eq!(sha, hex::encode(tatami_engine::hash::sha256(b"# bashrc\n")));
}

// After apply, every target compares equal to the fresh destination state.
#[cfg(unix)]
#[test]
fn test_targets_equal_destination_after_apply() {
    let fx = Fixture::new();
    fx.write_source("dot_bashrc", b"# bashrc\n");
    fx.write_source("dot_config/nvim/init.lua", b"-- init\n");
    fx.write_source("symlink_dot_link", b".bashrc\n");

    let state = fx.read_state();
    fx.apply(&state);
    for target_name in state.sorted_target_names() {
        let entry = state.entry(&target_name).unwrap();
        let target = entry.target_state_entry(&state).unwrap();
        let dest = tatami_engine::DestStateEntry::read(
            &*fx.system,
            &fx.dest_dir.join(&target_name),
        )
        .unwrap();
        assert!(
            target.equal(&dest, UMASK).unwrap(),
            "{target_name} should equal its destination"
        );
    }
}

// Exact directories delete drift on apply.
#[test]
fn test_exact_directory_removes_drift() {
    let fx = Fixture::new();
    fx.write_source("exact_dot_config/managed", b"x\n");
    fs::create_dir_all(fx.dest_path(".config").as_path()).unwrap();
    fs::write(fx.dest_path(".config/drift"), b"x\n").unwrap();

    fx.apply(&fx.read_state());
    assert!(fs::symlink_metadata(fx.dest_path(".config/drift")).is_err());
    assert!(fs::symlink_metadata(fx.dest_path(".config/managed")).is_ok());
}

// The include filter limits which entry kinds are applied.
#[test]
fn test_include_filter() {
    let fx = Fixture::new();
    fx.write_source("dot_bashrc", b"# bashrc\n");
    fx.write_source("dot_dir/file", b"x\n");

    let state = fx.read_state();
    state
        .apply_all(
            &*fx.system,
            &fx.dest_dir,
            &ApplyOptions {
                include: "dirs".parse().unwrap(),
                umask: UMASK,
                update_state: false,
            },
        )
        .unwrap();
    assert!(fs::symlink_metadata(fx.dest_path(".dir")).is_ok());
    assert!(fs::symlink_metadata(fx.dest_path(".bashrc")).is_err());
    assert!(fs::symlink_metadata(fx.dest_path(".dir/file")).is_err());
}

// Present targets keep existing contents and only fix the mode.
#[cfg(unix)]
#[test]
fn test_present_keeps_existing_contents() {
    let fx = Fixture::new();
    fx.write_source("exists_dot_profile", b"default contents\n");
    fs::write(fx.dest_path(".profile"), b"user contents\n").unwrap();
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(
            fx.dest_path(".profile"),
            fs::Permissions::from_mode(0o600),
        )
        .unwrap();
    }

    fx.apply(&fx.read_state());
    assert_eq!(
        fs::read(fx.dest_path(".profile")).unwrap(),
        b"user contents\n"
    );
    assert_eq!(fx.dest_perm(".profile"), 0o666 & !UMASK);

    // When absent, the default contents are written.
    fs::remove_file(fx.dest_path(".profile")).unwrap();
    fx.apply(&fx.read_state());
    assert_eq!(
        fs::read(fx.dest_path(".profile")).unwrap(),
        b"default contents\n"
    );
}
