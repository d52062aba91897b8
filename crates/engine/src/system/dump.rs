//! Dump sink
//!
//! A system that accumulates every write in memory, keyed by path. The
//! result serializes through [`crate::format::Format`] to produce
//! structured dumps of the target state.

use crate::database::{NullPersistentState, PersistentState};
use crate::error::{Error, Result};
use crate::system::{DirEntryInfo, EntryInfo, System};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::process::Command;
use tatami_core::path::AbsPath;

/// One dumped entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DumpEntry {
    /// A directory
    Dir {
        /// Destination path
        name: String,
        /// Permission bits
        perm: u32,
    },
    /// A regular file
    File {
        /// Destination path
        name: String,
        /// File contents
        contents: String,
        /// Permission bits
        perm: u32,
    },
    /// A script
    Script {
        /// Script name
        name: String,
        /// Script contents
        contents: String,
    },
    /// A symbolic link
    Symlink {
        /// Destination path
        name: String,
        /// Link target
        linkname: String,
    },
}

/// A system that accumulates writes in memory
#[derive(Debug, Default)]
pub struct DumpSystem {
    data: RefCell<BTreeMap<String, DumpEntry>>,
}

impl DumpSystem {
    /// Create an empty dump system
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The accumulated entries, keyed by path
    #[must_use]
    pub fn data(&self) -> BTreeMap<String, DumpEntry> {
        self.data.borrow().clone()
    }

    fn insert(&self, key: String, entry: DumpEntry) -> Result<()> {
        let mut data = self.data.borrow_mut();
        if data.contains_key(&key) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                key,
            )));
        }
        data.insert(key, entry);
        Ok(())
    }
}

fn permission(op: &'static str, path: &AbsPath) -> Error {
    Error::Permission {
        op,
        path: path.as_path().to_path_buf(),
    }
}

impl System for DumpSystem {
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
        let name = path.to_string();
        self.insert(name.clone(), DumpEntry::Dir { name, perm })
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
        self.insert(
            name.to_string(),
            DumpEntry::Script {
                name: name.to_string(),
                contents: String::from_utf8_lossy(data).into_owned(),
            },
        )
    }

    fn write_file(&self, path: &AbsPath, data: &[u8], perm: u32) -> Result<()> {
        let name = path.to_string();
        self.insert(
            name.clone(),
            DumpEntry::File {
                name,
                contents: String::from_utf8_lossy(data).into_owned(),
                perm,
            },
        )
    }

    fn write_symlink(&self, linkname: &str, path: &AbsPath) -> Result<()> {
        let name = path.to_string();
        self.insert(
            name.clone(),
            DumpEntry::Symlink {
                name,
                linkname: linkname.to_string(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use crate::format::Format;

    fn abs(path: &str) -> AbsPath {
        AbsPath::new(path.into()).unwrap()
    }

    #[test]
    fn test_accumulates_entries_by_path() {
        let system = DumpSystem::new();
        system.mkdir(&abs("/.config"), 0o755).unwrap();
        system
            .write_file(&abs("/.bashrc"), b"# bashrc\n", 0o644)
            .unwrap();
        system.write_symlink(".bashrc", &abs("/.link")).unwrap();
        system
            .run_script("install.sh", &abs("/"), b"echo hi\n")
            .unwrap();

        let data = system.data();
        assert_eq!(data.len(), 4);
        assert_eq!(
            data.get("/.bashrc"),
            Some(&DumpEntry::File {
                name: "/.bashrc".to_string(),
                contents: "# bashrc\n".to_string(),
                perm: 0o644,
            })
        );
        assert_eq!(
            data.get("install.sh"),
            Some(&DumpEntry::Script {
                name: "install.sh".to_string(),
                contents: "echo hi\n".to_string(),
            })
        );
    }

    #[test]
    fn test_duplicate_write_fails() {
        let system = DumpSystem::new();
        system.write_file(&abs("/f"), b"a", 0o644).unwrap();
        assert!(system.write_file(&abs("/f"), b"b", 0o644).is_err());
    }

    #[test]
    fn test_serializes_as_tagged_records() {
        let system = DumpSystem::new();
        system.write_symlink(".bashrc", &abs("/.link")).unwrap();
        let json = Format::Json.marshal(&system.data()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["/.link"]["type"], "symlink");
        assert_eq!(value["/.link"]["linkname"], ".bashrc");
    }
}
