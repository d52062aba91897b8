//! Real filesystem implementation
//!
//! Writes of regular files are atomic on POSIX: the contents go to a
//! tempfile on the same device which is renamed over the destination. The
//! tempfile is created `0o600` and chmod'd to its final permissions before
//! any bytes are written, so private contents never exist on disk with
//! wider permissions.

use crate::database::PersistentState;
use crate::error::{Error, Result};
use crate::system::{DirEntryInfo, EntryInfo, FileKind, System};
use std::fs;
use std::io::Write;
use std::process::Command;
use tatami_core::path::AbsPath;

/// A system backed by the operating system's filesystem
pub struct RealSystem {
    ps: Box<dyn PersistentState>,
}

impl RealSystem {
    /// Create a real system owning the given persistent state
    #[must_use]
    pub fn new(ps: Box<dyn PersistentState>) -> Self {
        Self { ps }
    }
}

fn file_kind(file_type: fs::FileType) -> FileKind {
    if file_type.is_symlink() {
        FileKind::Symlink
    } else if file_type.is_dir() {
        FileKind::Dir
    } else if file_type.is_file() {
        FileKind::File
    } else {
        FileKind::Other(unusual_type_name(file_type))
    }
}

#[cfg(unix)]
fn unusual_type_name(file_type: fs::FileType) -> String {
    use std::os::unix::fs::FileTypeExt;
    if file_type.is_fifo() {
        "named pipe".to_string()
    } else if file_type.is_socket() {
        "socket".to_string()
    } else if file_type.is_block_device() || file_type.is_char_device() {
        "device".to_string()
    } else {
        format!("{file_type:?}")
    }
}

#[cfg(not(unix))]
fn unusual_type_name(file_type: fs::FileType) -> String {
    format!("{file_type:?}")
}

#[cfg(unix)]
fn metadata_perm(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & tatami_core::platform::MODE_PERM
}

#[cfg(not(unix))]
fn metadata_perm(_metadata: &fs::Metadata) -> u32 {
    0o666
}

fn entry_info(metadata: &fs::Metadata) -> EntryInfo {
    EntryInfo {
        kind: file_kind(metadata.file_type()),
        perm: metadata_perm(metadata),
        len: metadata.len(),
    }
}

fn optional_metadata(result: std::io::Result<fs::Metadata>) -> Result<Option<EntryInfo>> {
    match result {
        Ok(metadata) => Ok(Some(entry_info(&metadata))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io(e)),
    }
}

#[cfg(unix)]
fn set_perm(file: &fs::File, perm: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(perm))
}

#[cfg(not(unix))]
fn set_perm(_file: &fs::File, _perm: u32) -> std::io::Result<()> {
    Ok(())
}

impl System for RealSystem {
    fn chmod(&self, path: &AbsPath, perm: u32) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(perm)).map_err(Error::Io)
        }
        #[cfg(not(unix))]
        {
            let _ = (path, perm);
            Ok(())
        }
    }

    fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        let options = glob::MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        let paths = glob::glob_with(pattern, options).map_err(|e| Error::Parse {
            context: pattern.to_string(),
            message: e.to_string(),
        })?;
        // Unreadable entries are skipped rather than aborting the whole
        // expansion.
        Ok(paths
            .filter_map(std::result::Result::ok)
            .map(|p| p.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/"))
            .collect())
    }

    fn idempotent_cmd_output(&self, cmd: &mut Command) -> Result<Vec<u8>> {
        let output = cmd.output()?;
        if !output.status.success() {
            return Err(Error::Command {
                program: cmd.get_program().to_string_lossy().into_owned(),
                code: output.status.code(),
            });
        }
        Ok(output.stdout)
    }

    fn lstat(&self, path: &AbsPath) -> Result<Option<EntryInfo>> {
        optional_metadata(fs::symlink_metadata(path))
    }

    fn stat(&self, path: &AbsPath) -> Result<Option<EntryInfo>> {
        optional_metadata(fs::metadata(path))
    }

    fn mkdir(&self, path: &AbsPath, perm: u32) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            fs::DirBuilder::new()
                .mode(perm)
                .create(path)
                .map_err(|e| Error::DirectoryCreate {
                    path: path.clone(),
                    source: e,
                })
        }
        #[cfg(not(unix))]
        {
            let _ = perm;
            fs::create_dir(path).map_err(|e| Error::DirectoryCreate {
                path: path.clone(),
                source: e,
            })
        }
    }

    fn persistent_state(&self) -> Box<dyn PersistentState + '_> {
        Box::new(self.ps.as_ref())
    }

    fn read_dir(&self, path: &AbsPath) -> Result<Vec<DirEntryInfo>> {
        let mut entries = Vec::new();
        let iter = fs::read_dir(path).map_err(|e| Error::DirectoryRead {
            path: path.clone(),
            source: e,
        })?;
        for entry in iter {
            let entry = entry.map_err(|e| Error::DirectoryRead {
                path: path.clone(),
                source: e,
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let metadata = fs::symlink_metadata(entry.path()).map_err(Error::Io)?;
            entries.push(DirEntryInfo {
                name,
                info: entry_info(&metadata),
            });
        }
        Ok(entries)
    }

    fn read_file(&self, path: &AbsPath) -> Result<Vec<u8>> {
        fs::read(path).map_err(|e| Error::FileRead {
            path: path.clone(),
            source: e,
        })
    }

    fn readlink(&self, path: &AbsPath) -> Result<String> {
        let target = fs::read_link(path).map_err(Error::Io)?;
        Ok(target.to_string_lossy().into_owned())
    }

    fn remove_all(&self, path: &AbsPath) -> Result<()> {
        match fs::symlink_metadata(path) {
            Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path).map_err(Error::Io),
            Ok(_) => fs::remove_file(path).map_err(Error::Io),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn rename(&self, old: &AbsPath, new: &AbsPath) -> Result<()> {
        fs::rename(old, new).map_err(Error::Io)
    }

    fn run_cmd(&self, cmd: &mut Command) -> Result<()> {
        let status = cmd.status()?;
        if !status.success() {
            return Err(Error::Command {
                program: cmd.get_program().to_string_lossy().into_owned(),
                code: status.code(),
            });
        }
        Ok(())
    }

    fn run_script(&self, name: &str, dir: &AbsPath, data: &[u8]) -> Result<()> {
        // Keep the script's basename as the tempfile suffix so interpreters
        // that key off the extension still work.
        let base = name.rsplit('/').next().unwrap_or(name);
        let mut file = tempfile::Builder::new()
            .prefix("tatami-")
            .suffix(&format!(".{base}"))
            .tempfile()
            .map_err(Error::Io)?;

        // Private before any bytes land, in case the script embeds secrets.
        set_perm(file.as_file(), 0o700).map_err(Error::Io)?;
        file.write_all(data).map_err(Error::Io)?;

        // Close the write handle before executing; the path object removes
        // the tempfile when dropped, on success and error alike.
        let temp_path = file.into_temp_path();
        let status = Command::new(temp_path.as_os_str()).current_dir(dir).status()?;
        if !status.success() {
            return Err(Error::Script {
                name: name.to_string(),
                code: status.code(),
            });
        }
        temp_path.close().map_err(Error::Io)
    }

    fn write_file(&self, path: &AbsPath, data: &[u8], perm: u32) -> Result<()> {
        let parent = path.parent().ok_or_else(|| Error::FileWrite {
            path: path.clone(),
            source: std::io::Error::other("path has no parent directory"),
        })?;
        let map_err = |e: std::io::Error| Error::FileWrite {
            path: path.clone(),
            source: e,
        };
        // Tempfile on the same device so the final rename is atomic.
        let mut file = tempfile::Builder::new()
            .prefix(".tatami-tmp")
            .tempfile_in(&parent)
            .map_err(map_err)?;
        // The tempfile is created 0o600; move to the final permissions
        // before writing so the contents are never more readable than the
        // destination will be.
        set_perm(file.as_file(), perm).map_err(map_err)?;
        file.write_all(data).map_err(map_err)?;
        file.persist(path).map_err(|e| map_err(e.error))?;
        Ok(())
    }

    fn write_symlink(&self, linkname: &str, path: &AbsPath) -> Result<()> {
        let parent = path.parent().ok_or_else(|| Error::FileWrite {
            path: path.clone(),
            source: std::io::Error::other("path has no parent directory"),
        })?;
        let base = path.file_name().unwrap_or("symlink");
        // Create at a temporary name, then rename over the destination so
        // readers never observe a missing link.
        for attempt in 0..8 {
            let temp = parent.join_name(&format!(".{base}.tatami{}-{attempt}", std::process::id()));
            match symlink(linkname, &temp) {
                Ok(()) => {
                    return fs::rename(&temp, path).map_err(|e| {
                        let _ = fs::remove_file(&temp);
                        Error::Io(e)
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Err(Error::FileWrite {
            path: path.clone(),
            source: std::io::Error::other("cannot create temporary symlink"),
        })
    }
}

#[cfg(unix)]
fn symlink(linkname: &str, path: &AbsPath) -> std::io::Result<()> {
    std::os::unix::fs::symlink(linkname, path)
}

#[cfg(windows)]
fn symlink(linkname: &str, path: &AbsPath) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(linkname, path)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use crate::database::MockPersistentState;
    use tempfile::TempDir;

    fn real() -> RealSystem {
        RealSystem::new(Box::new(MockPersistentState::new()))
    }

    fn abs(dir: &TempDir, name: &str) -> AbsPath {
        AbsPath::new(dir.path().join(name)).unwrap()
    }

    #[test]
    fn test_write_and_read_file() {
        let dir = TempDir::new().unwrap();
        let system = real();
        let path = abs(&dir, "file");
        system.write_file(&path, b"contents", 0o644).unwrap();
        assert_eq!(system.read_file(&path).unwrap(), b"contents");
        let info = system.lstat(&path).unwrap().unwrap();
        assert_eq!(info.kind, FileKind::File);
        #[cfg(unix)]
        assert_eq!(info.perm, 0o644);
    }

    #[test]
    fn test_write_file_private_perm() {
        let dir = TempDir::new().unwrap();
        let system = real();
        let path = abs(&dir, "secret");
        system.write_file(&path, b"s3cret", 0o600).unwrap();
        #[cfg(unix)]
        assert_eq!(system.lstat(&path).unwrap().unwrap().perm, 0o600);
    }

    #[test]
    fn test_write_file_overwrites_atomically() {
        let dir = TempDir::new().unwrap();
        let system = real();
        let path = abs(&dir, "file");
        system.write_file(&path, b"old", 0o644).unwrap();
        system.write_file(&path, b"new", 0o644).unwrap();
        assert_eq!(system.read_file(&path).unwrap(), b"new");
        // No tempfile debris left behind.
        assert_eq!(system.read_dir(&abs(&dir, "")).unwrap().len(), 1);
    }

    #[test]
    fn test_lstat_absent_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(real().lstat(&abs(&dir, "missing")).unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_roundtrip() {
        let dir = TempDir::new().unwrap();
        let system = real();
        let link = abs(&dir, "link");
        system.write_symlink(".bashrc", &link).unwrap();
        assert_eq!(system.readlink(&link).unwrap(), ".bashrc");
        let info = system.lstat(&link).unwrap().unwrap();
        assert_eq!(info.kind, FileKind::Symlink);
        // Re-pointing the link goes through remove + write.
        system.remove_all(&link).unwrap();
        system.write_symlink(".zshrc", &link).unwrap();
        assert_eq!(system.readlink(&link).unwrap(), ".zshrc");
    }

    #[test]
    fn test_remove_all_handles_all_kinds() {
        let dir = TempDir::new().unwrap();
        let system = real();
        let file = abs(&dir, "f");
        system.write_file(&file, b"x", 0o644).unwrap();
        system.remove_all(&file).unwrap();
        assert!(system.lstat(&file).unwrap().is_none());

        let subdir = abs(&dir, "d");
        system.mkdir(&subdir, 0o755).unwrap();
        system
            .write_file(&abs(&dir, "d/inner"), b"x", 0o644)
            .unwrap();
        system.remove_all(&subdir).unwrap();
        assert!(system.lstat(&subdir).unwrap().is_none());

        // Removing an absent path is a no-op.
        system.remove_all(&abs(&dir, "missing")).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_run_script_executes_in_dir() {
        let dir = TempDir::new().unwrap();
        let system = real();
        let cwd = AbsPath::from_path(dir.path()).unwrap();
        system
            .run_script("touch.sh", &cwd, b"#!/bin/sh\ntouch ran\n")
            .unwrap();
        assert!(system.lstat(&abs(&dir, "ran")).unwrap().is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_run_script_failure_reports_code() {
        let dir = TempDir::new().unwrap();
        let system = real();
        let cwd = AbsPath::from_path(dir.path()).unwrap();
        let err = system
            .run_script("fail.sh", &cwd, b"#!/bin/sh\nexit 3\n")
            .unwrap_err();
        assert!(matches!(err, Error::Script { code: Some(3), .. }));
    }

    #[test]
    fn test_glob_expands_doublestar() {
        let dir = TempDir::new().unwrap();
        let system = real();
        system.mkdir(&abs(&dir, "a"), 0o755).unwrap();
        system.write_file(&abs(&dir, "a/x"), b"", 0o644).unwrap();
        system.write_file(&abs(&dir, "y"), b"", 0o644).unwrap();
        let pattern = format!("{}/**", glob::Pattern::escape(&dir.path().to_string_lossy()));
        let matches = system.glob(&pattern).unwrap();
        assert!(matches.iter().any(|m| m.ends_with("a/x")));
        assert!(matches.iter().any(|m| m.ends_with("y")));
    }
}
