//! Archive sink
//!
//! A write-only system that turns every write into a tar entry:
//! directories become directory entries, scripts become `0o700` regular
//! files, symlinks become symlink entries. Reads and destructive
//! operations are rejected, so reconciliation against an empty observed
//! state streams the full target state into the archive.

use crate::database::{NullPersistentState, PersistentState};
use crate::error::{Error, Result};
use crate::system::{DirEntryInfo, EntryInfo, System};
use std::cell::RefCell;
use std::io::Write;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};
use tar::{EntryType, Header};
use tatami_core::path::AbsPath;

/// Identity fields stamped on every archive entry
#[derive(Debug, Clone)]
pub struct TarHeaderDefaults {
    /// Numeric owner
    pub uid: u64,
    /// Numeric group
    pub gid: u64,
    /// Owner name
    pub uname: String,
    /// Group name
    pub gname: String,
    /// Modification time, seconds since the epoch
    pub mtime: u64,
    /// Access time, seconds since the epoch
    pub atime: u64,
    /// Change time, seconds since the epoch
    pub ctime: u64,
}

impl TarHeaderDefaults {
    /// Defaults describing the invoking user, with all three timestamps
    /// set to the archive creation time
    #[must_use]
    pub fn for_current_user() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        #[cfg(unix)]
        {
            Self {
                uid: u64::from(uzers::get_current_uid()),
                gid: u64::from(uzers::get_current_gid()),
                uname: uzers::get_current_username()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                gname: uzers::get_current_groupname()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                mtime: now,
                atime: now,
                ctime: now,
            }
        }
        #[cfg(not(unix))]
        {
            Self {
                uid: 0,
                gid: 0,
                uname: std::env::var("USERNAME").unwrap_or_default(),
                gname: String::new(),
                mtime: now,
                atime: now,
                ctime: now,
            }
        }
    }
}

/// A system that writes a tar archive
pub struct TarSystem<W: Write> {
    builder: RefCell<tar::Builder<W>>,
    defaults: TarHeaderDefaults,
}

impl<W: Write> TarSystem<W> {
    /// Create a tar system writing to `writer`
    pub fn new(writer: W, defaults: TarHeaderDefaults) -> Self {
        Self {
            builder: RefCell::new(tar::Builder::new(writer)),
            defaults,
        }
    }

    /// Finish the archive and return the writer
    pub fn into_inner(self) -> Result<W> {
        self.builder.into_inner().into_inner().map_err(Error::Io)
    }

    fn header(&self, entry_type: EntryType, perm: u32, size: u64) -> Result<Header> {
        let mut header = Header::new_gnu();
        header.set_entry_type(entry_type);
        header.set_mode(perm);
        header.set_size(size);
        header.set_uid(self.defaults.uid);
        header.set_gid(self.defaults.gid);
        header.set_username(&self.defaults.uname).map_err(Error::Io)?;
        header.set_groupname(&self.defaults.gname).map_err(Error::Io)?;
        header.set_mtime(self.defaults.mtime);
        // atime/ctime only exist in the raw GNU header; the high-level
        // Header API stops at mtime.
        if let Some(gnu) = header.as_gnu_mut() {
            gnu.set_atime(self.defaults.atime);
            gnu.set_ctime(self.defaults.ctime);
        }
        Ok(header)
    }

    fn append(&self, header: &mut Header, name: &str, data: &[u8]) -> Result<()> {
        let mut builder = self.builder.borrow_mut();
        builder
            .append_data(header, name, data)
            .map_err(Error::Io)?;
        Ok(())
    }
}

/// Archive member name for a destination path
fn tar_name(path: &AbsPath) -> String {
    path.to_string().trim_start_matches('/').to_string()
}

fn permission(op: &'static str, path: &AbsPath) -> Error {
    Error::Permission {
        op,
        path: path.as_path().to_path_buf(),
    }
}

impl<W: Write> System for TarSystem<W> {
    fn chmod(&self, path: &AbsPath, _perm: u32) -> Result<()> {
        Err(permission("chmod", path))
    }

    fn glob(&self, _pattern: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn idempotent_cmd_output(&self, cmd: &mut Command) -> Result<Vec<u8>> {
        let output = cmd.output()?;
        Ok(output.stdout)
    }

    fn lstat(&self, _path: &AbsPath) -> Result<Option<EntryInfo>> {
        Ok(None)
    }

    fn stat(&self, _path: &AbsPath) -> Result<Option<EntryInfo>> {
        Ok(None)
    }

    fn mkdir(&self, path: &AbsPath, perm: u32) -> Result<()> {
        let mut header = self.header(EntryType::Directory, perm, 0)?;
        self.append(&mut header, &format!("{}/", tar_name(path)), &[])
    }

    fn persistent_state(&self) -> Box<dyn PersistentState + '_> {
        Box::new(NullPersistentState)
    }

    fn read_dir(&self, _path: &AbsPath) -> Result<Vec<DirEntryInfo>> {
        Ok(Vec::new())
    }

    fn read_file(&self, path: &AbsPath) -> Result<Vec<u8>> {
        Err(Error::NotFound {
            path: path.as_path().to_path_buf(),
        })
    }

    fn readlink(&self, path: &AbsPath) -> Result<String> {
        Err(Error::NotFound {
            path: path.as_path().to_path_buf(),
        })
    }

    fn remove_all(&self, path: &AbsPath) -> Result<()> {
        Err(permission("remove", path))
    }

    fn rename(&self, old: &AbsPath, _new: &AbsPath) -> Result<()> {
        Err(permission("rename", old))
    }

    fn run_cmd(&self, _cmd: &mut Command) -> Result<()> {
        Ok(())
    }

    fn run_script(&self, name: &str, _dir: &AbsPath, data: &[u8]) -> Result<()> {
        let mut header = self.header(EntryType::Regular, 0o700, data.len() as u64)?;
        self.append(&mut header, name, data)
    }

    fn write_file(&self, path: &AbsPath, data: &[u8], perm: u32) -> Result<()> {
        let mut header = self.header(EntryType::Regular, perm, data.len() as u64)?;
        self.append(&mut header, &tar_name(path), data)
    }

    fn write_symlink(&self, linkname: &str, path: &AbsPath) -> Result<()> {
        let mut header = self.header(EntryType::Symlink, 0o777, 0)?;
        header.set_link_name(linkname).map_err(Error::Io)?;
        self.append(&mut header, &tar_name(path), &[])
    }
}
