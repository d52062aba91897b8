//! Diff-emitting system
//!
//! Wraps a system and writes every mutation as a git-format patch before
//! delegating it. Reads pass through untouched. The patch carries file
//! mode transitions and abbreviated blob hashes; binary contents are
//! detected and reported without hunks.

use crate::database::PersistentState;
use crate::error::{Error, Result};
use crate::hash::sha256;
use crate::system::{DirEntryInfo, EntryInfo, FileKind, System};
use similar::TextDiff;
use std::cell::RefCell;
use std::io::Write;
use std::process::Command;
use tatami_core::path::AbsPath;

const ZERO_HASH: &str = "0000000";

/// What a path looked like before a mutation
enum OldState {
    Absent,
    File { perm: u32, contents: Vec<u8> },
    Dir { perm: u32 },
    Symlink { linkname: String },
}

/// A system that emits a git-format diff of every mutation
pub struct GitDiffSystem<S, W: Write> {
    inner: S,
    writer: RefCell<W>,
    prefix: String,
}

impl<S: System, W: Write> GitDiffSystem<S, W> {
    /// Wrap `inner`, emitting diffs to `writer`
    ///
    /// `prefix` is stripped from paths in the patch, typically the
    /// destination directory plus a trailing slash.
    pub fn new(inner: S, writer: W, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            writer: RefCell::new(writer),
            prefix: prefix.into(),
        }
    }

    /// Unwrap the inner system, returning the writer too
    pub fn into_parts(self) -> (S, W) {
        (self.inner, self.writer.into_inner())
    }

    fn trim_prefix<'p>(&self, path: &'p str) -> &'p str {
        path.strip_prefix(&self.prefix).unwrap_or(path)
    }

    fn old_state(&self, path: &AbsPath) -> Result<OldState> {
        match self.inner.lstat(path)? {
            None => Ok(OldState::Absent),
            Some(EntryInfo {
                kind: FileKind::File,
                perm,
                ..
            }) => Ok(OldState::File {
                perm,
                contents: self.inner.read_file(path)?,
            }),
            Some(EntryInfo {
                kind: FileKind::Dir,
                perm,
                ..
            }) => Ok(OldState::Dir { perm }),
            Some(EntryInfo {
                kind: FileKind::Symlink,
                ..
            }) => Ok(OldState::Symlink {
                linkname: self.inner.readlink(path)?,
            }),
            Some(EntryInfo { kind, .. }) => Err(Error::UnsupportedFileType {
                path: path.clone(),
                found: kind.type_name().to_string(),
            }),
        }
    }

    fn emit(&self, patch: &str) -> Result<()> {
        self.writer
            .borrow_mut()
            .write_all(patch.as_bytes())
            .map_err(Error::Io)
    }

    fn emit_content_patch(
        &self,
        name: &str,
        old: Option<(&[u8], String)>,
        new: Option<(&[u8], String)>,
    ) -> Result<()> {
        let mut patch = format!("diff --git a/{name} b/{name}\n");
        let (old_bytes, old_hash) = match &old {
            Some((bytes, mode)) => {
                if new.is_none() {
                    patch.push_str(&format!("deleted file mode {mode}\n"));
                }
                (*bytes, blob_hash(bytes))
            }
            None => (&[][..], ZERO_HASH.to_string()),
        };
        let (new_bytes, new_hash) = match &new {
            Some((bytes, mode)) => {
                if old.is_none() {
                    patch.push_str(&format!("new file mode {mode}\n"));
                } else if let Some((_, old_mode)) = &old {
                    if old_mode != mode {
                        patch.push_str(&format!("old mode {old_mode}\n"));
                        patch.push_str(&format!("new mode {mode}\n"));
                    }
                }
                (*bytes, blob_hash(bytes))
            }
            None => (&[][..], ZERO_HASH.to_string()),
        };
        patch.push_str(&format!("index {old_hash}..{new_hash}\n"));

        let a_name = if old.is_some() {
            format!("a/{name}")
        } else {
            "/dev/null".to_string()
        };
        let b_name = if new.is_some() {
            format!("b/{name}")
        } else {
            "/dev/null".to_string()
        };
        if is_binary(old_bytes) || is_binary(new_bytes) {
            patch.push_str(&format!("Binary files {a_name} and {b_name} differ\n"));
        } else {
            let old_text = String::from_utf8_lossy(old_bytes).into_owned();
            let new_text = String::from_utf8_lossy(new_bytes).into_owned();
            let diff = TextDiff::from_lines(&old_text, &new_text);
            patch.push_str(
                &diff
                    .unified_diff()
                    .context_radius(3)
                    .header(&a_name, &b_name)
                    .to_string(),
            );
        }
        self.emit(&patch)
    }
}

fn is_binary(data: &[u8]) -> bool {
    data.contains(&0)
}

/// Abbreviated hash of a blob, using git's object construction
fn blob_hash(data: &[u8]) -> String {
    let mut blob = format!("blob {}\0", data.len()).into_bytes();
    blob.extend_from_slice(data);
    hex::encode(&sha256(&blob)[..4])[..7].to_string()
}

fn file_mode(perm: u32) -> String {
    if perm & 0o111 == 0 {
        "100644".to_string()
    } else {
        "100755".to_string()
    }
}

const DIR_MODE: &str = "040000";
const SYMLINK_MODE: &str = "120000";

fn old_mode(state: &OldState) -> Option<String> {
    match state {
        OldState::Absent => None,
        OldState::File { perm, .. } => Some(file_mode(*perm)),
        OldState::Dir { .. } => Some(DIR_MODE.to_string()),
        OldState::Symlink { .. } => Some(SYMLINK_MODE.to_string()),
    }
}

impl<S: System, W: Write> System for GitDiffSystem<S, W> {
    fn chmod(&self, path: &AbsPath, perm: u32) -> Result<()> {
        let name = path.to_string();
        let name = self.trim_prefix(&name);
        let old = self.old_state(path)?;
        let new_mode = match &old {
            OldState::Dir { .. } => DIR_MODE.to_string(),
            _ => file_mode(perm),
        };
        if let Some(old_mode) = old_mode(&old) {
            self.emit(&format!(
                "diff --git a/{name} b/{name}\nold mode {old_mode}\nnew mode {new_mode}\n"
            ))?;
        }
        self.inner.chmod(path, perm)
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

    fn mkdir(&self, path: &AbsPath, perm: u32) -> Result<()> {
        let name = path.to_string();
        let name = self.trim_prefix(&name);
        self.emit(&format!(
            "diff --git a/{name} b/{name}\nnew file mode {DIR_MODE}\n"
        ))?;
        self.inner.mkdir(path, perm)
    }

    fn persistent_state(&self) -> Box<dyn PersistentState + '_> {
        self.inner.persistent_state()
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
        let name = path.to_string();
        let name = self.trim_prefix(&name).to_string();
        match self.old_state(path)? {
            OldState::Absent => {}
            OldState::File { perm, contents } => {
                self.emit_content_patch(&name, Some((contents.as_slice(), file_mode(perm))), None)?;
            }
            OldState::Dir { .. } => {
                self.emit(&format!(
                    "diff --git a/{name} b/{name}\ndeleted file mode {DIR_MODE}\n"
                ))?;
            }
            OldState::Symlink { linkname } => {
                let contents = format!("{linkname}\n").into_bytes();
                self.emit_content_patch(
                    &name,
                    Some((contents.as_slice(), SYMLINK_MODE.to_string())),
                    None,
                )?;
            }
        }
        self.inner.remove_all(path)
    }

    fn rename(&self, old: &AbsPath, new: &AbsPath) -> Result<()> {
        let old_name = old.to_string();
        let new_name = new.to_string();
        let old_name = self.trim_prefix(&old_name);
        let new_name = self.trim_prefix(&new_name);
        self.emit(&format!(
            "diff --git a/{old_name} b/{new_name}\nrename from {old_name}\nrename to {new_name}\n"
        ))?;
        self.inner.rename(old, new)
    }

    fn run_cmd(&self, cmd: &mut Command) -> Result<()> {
        self.inner.run_cmd(cmd)
    }

    fn run_script(&self, name: &str, dir: &AbsPath, data: &[u8]) -> Result<()> {
        self.emit_content_patch(name, None, Some((data, "100700".to_string())))?;
        self.inner.run_script(name, dir, data)
    }

    fn write_file(&self, path: &AbsPath, data: &[u8], perm: u32) -> Result<()> {
        let name = path.to_string();
        let name = self.trim_prefix(&name).to_string();
        let old = self.old_state(path)?;
        let old_side = match &old {
            OldState::File { perm, contents } => Some((contents.as_slice(), file_mode(*perm))),
            _ => None,
        };
        self.emit_content_patch(&name, old_side, Some((data, file_mode(perm))))?;
        self.inner.write_file(path, data, perm)
    }

    fn write_symlink(&self, linkname: &str, path: &AbsPath) -> Result<()> {
        let name = path.to_string();
        let name = self.trim_prefix(&name).to_string();
        let old = self.old_state(path)?;
        let old_contents;
        let old_side = match &old {
            OldState::Symlink { linkname } => {
                old_contents = format!("{linkname}\n").into_bytes();
                Some((old_contents.as_slice(), SYMLINK_MODE.to_string()))
            }
            _ => None,
        };
        let new_contents = format!("{linkname}\n").into_bytes();
        self.emit_content_patch(
            &name,
            old_side,
            Some((new_contents.as_slice(), SYMLINK_MODE.to_string())),
        )?;
        self.inner.write_symlink(linkname, path)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use crate::database::MockPersistentState;
    use crate::system::RealSystem;
    use tempfile::TempDir;

    fn prefix(dir: &TempDir) -> String {
        format!("{}/", dir.path().display())
    }

    #[test]
    fn test_new_file_patch() {
        let dir = TempDir::new().unwrap();
        let real = RealSystem::new(Box::new(MockPersistentState::new()));
        let git = GitDiffSystem::new(&real, Vec::new(), prefix(&dir));
        let path = AbsPath::new(dir.path().join(".bashrc")).unwrap();
        git.write_file(&path, b"# bashrc\n", 0o644).unwrap();
        let (_, out) = git.into_parts();
        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("diff --git a/.bashrc b/.bashrc\n"));
        assert!(out.contains("new file mode 100644\n"));
        assert!(out.contains("--- /dev/null\n"));
        assert!(out.contains("+++ b/.bashrc\n"));
        assert!(out.contains("+# bashrc\n"));
        // The write went through to the wrapped system.
        assert_eq!(real.read_file(&path).unwrap(), b"# bashrc\n");
    }

    #[test]
    fn test_modify_file_patch_shows_both_sides() {
        let dir = TempDir::new().unwrap();
        let real = RealSystem::new(Box::new(MockPersistentState::new()));
        let path = AbsPath::new(dir.path().join("f")).unwrap();
        real.write_file(&path, b"old line\n", 0o644).unwrap();
        let git = GitDiffSystem::new(&real, Vec::new(), prefix(&dir));
        git.write_file(&path, b"new line\n", 0o644).unwrap();
        let (_, out) = git.into_parts();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("-old line\n"));
        assert!(out.contains("+new line\n"));
        assert!(!out.contains("new file mode"));
    }

    #[test]
    fn test_binary_detection() {
        let dir = TempDir::new().unwrap();
        let real = RealSystem::new(Box::new(MockPersistentState::new()));
        let git = GitDiffSystem::new(&real, Vec::new(), prefix(&dir));
        let path = AbsPath::new(dir.path().join("blob")).unwrap();
        git.write_file(&path, b"\x00\x01\x02", 0o644).unwrap();
        let (_, out) = git.into_parts();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("Binary files /dev/null and b/blob differ\n"));
        assert!(!out.contains("@@"));
    }

    #[test]
    fn test_remove_emits_deletion() {
        let dir = TempDir::new().unwrap();
        let real = RealSystem::new(Box::new(MockPersistentState::new()));
        let path = AbsPath::new(dir.path().join("gone")).unwrap();
        real.write_file(&path, b"contents\n", 0o644).unwrap();
        let git = GitDiffSystem::new(&real, Vec::new(), prefix(&dir));
        git.remove_all(&path).unwrap();
        let (_, out) = git.into_parts();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("deleted file mode 100644\n"));
        assert!(out.contains("-contents\n"));
        assert!(real.lstat(&path).unwrap().is_none());
    }

    #[test]
    fn test_chmod_emits_mode_transition() {
        let dir = TempDir::new().unwrap();
        let real = RealSystem::new(Box::new(MockPersistentState::new()));
        let path = AbsPath::new(dir.path().join("script")).unwrap();
        real.write_file(&path, b"x\n", 0o644).unwrap();
        let git = GitDiffSystem::new(&real, Vec::new(), prefix(&dir));
        git.chmod(&path, 0o755).unwrap();
        let (_, out) = git.into_parts();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("old mode 100644\n"));
        assert!(out.contains("new mode 100755\n"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_patch() {
        let dir = TempDir::new().unwrap();
        let real = RealSystem::new(Box::new(MockPersistentState::new()));
        let git = GitDiffSystem::new(&real, Vec::new(), prefix(&dir));
        let path = AbsPath::new(dir.path().join(".link")).unwrap();
        git.write_symlink(".bashrc", &path).unwrap();
        let (_, out) = git.into_parts();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("new file mode 120000\n"));
        assert!(out.contains("+.bashrc\n"));
    }
}
