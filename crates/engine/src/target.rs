//! Target-state entries
//!
//! A target-state entry is the desired outcome for one managed path.
//! [`TargetStateEntry::apply`] compares it against the observed
//! destination entry and performs the minimal operation; within one
//! target the observable sequence is lstat, optional remove, optional
//! mkdir/write, optional chmod, optional persistent-state update.

use crate::database::SCRIPT_STATE_BUCKET;
use crate::entry::DestStateEntry;
use crate::error::{Error, Result};
use crate::hash::HexBytes;
use crate::lazy::{LazyContents, LazyLinkname};
use crate::system::System;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use tatami_core::path::RelPath;
use tatami_core::platform::{MODE_DIR, MODE_SYMLINK};

/// The persisted record of a successfully applied entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryState {
    /// File mode, including the type bits for directories and symlinks
    pub mode: u32,
    /// Content hash; for symlinks, the hash of the linkname bytes
    #[serde(
        rename = "contentsSHA256",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub contents_sha256: Option<HexBytes>,
}

/// The persisted record of a run-once script execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptOnceState {
    /// The script's target name
    pub name: String,
    /// When the script ran
    #[serde(rename = "executedAt")]
    pub executed_at: DateTime<Utc>,
}

/// Whether contents are empty after trimming whitespace
pub(crate) fn is_empty_contents(data: &[u8]) -> bool {
    data.iter().all(u8::is_ascii_whitespace)
}

/// The desired state of one entry in the target state
#[derive(Debug, Clone)]
pub enum TargetStateEntry {
    /// The entry must not exist
    Absent,
    /// A directory
    Dir {
        /// Permission bits before umask masking
        perm: u32,
    },
    /// A regular file with fixed contents
    File {
        /// The desired contents
        contents: Rc<LazyContents<'static>>,
        /// Permission bits before umask masking
        perm: u32,
    },
    /// A file that must exist; contents are only written when it is absent
    Present {
        /// Contents to write if the file is missing
        contents: Rc<LazyContents<'static>>,
        /// Permission bits before umask masking
        perm: u32,
    },
    /// A directory rename within its parent
    RenameDir {
        /// Current basename
        old_name: String,
        /// New basename
        new_name: String,
    },
    /// A script to run
    Script {
        /// The script's contents
        contents: Rc<LazyContents<'static>>,
        /// The script's target name
        name: RelPath,
        /// Run at most once per distinct contents
        once: bool,
    },
    /// A symbolic link
    Symlink {
        /// The link target
        linkname: Rc<LazyLinkname<'static>>,
    },
}

impl TargetStateEntry {
    /// Update the destination to match this entry
    pub fn apply(
        &self,
        system: &dyn System,
        dest: &DestStateEntry<'_>,
        umask: u32,
    ) -> Result<()> {
        match self {
            TargetStateEntry::Absent => {
                if matches!(dest, DestStateEntry::Absent { .. }) {
                    return Ok(());
                }
                system.remove_all(dest.path())
            }

            TargetStateEntry::Dir { perm } => {
                if let DestStateEntry::Dir {
                    path,
                    perm: dest_perm,
                } = dest
                {
                    if dest_perm & !umask == perm & !umask {
                        return Ok(());
                    }
                    return system.chmod(path, perm & !umask);
                }
                dest.remove(system)?;
                system.mkdir(dest.path(), perm & !umask)
            }

            TargetStateEntry::File { contents, perm } => {
                if let DestStateEntry::File {
                    path,
                    perm: dest_perm,
                    contents: dest_contents,
                } = dest
                {
                    // Contents compare by SHA-256 so last-written states can
                    // be checked without holding full file contents.
                    if dest_contents.contents_sha256()? == contents.contents_sha256()? {
                        if dest_perm & !umask == perm & !umask {
                            return Ok(());
                        }
                        return system.chmod(path, perm & !umask);
                    }
                } else {
                    dest.remove(system)?;
                }
                system.write_file(dest.path(), contents.contents()?, perm & !umask)
            }

            TargetStateEntry::Present { contents, perm } => {
                if let DestStateEntry::File {
                    path,
                    perm: dest_perm,
                    ..
                } = dest
                {
                    if dest_perm & !umask == perm & !umask {
                        return Ok(());
                    }
                    return system.chmod(path, perm & !umask);
                }
                dest.remove(system)?;
                system.write_file(dest.path(), contents.contents()?, perm & !umask)
            }

            TargetStateEntry::RenameDir { old_name, new_name } => {
                let parent = dest.path().parent().ok_or_else(|| Error::NotFound {
                    path: dest.path().as_path().to_path_buf(),
                })?;
                system.rename(&parent.join_name(old_name), &parent.join_name(new_name))
            }

            TargetStateEntry::Script {
                contents,
                name,
                once,
            } => {
                let mut once_key = None;
                if *once {
                    let contents_sha256 = contents.contents_sha256()?;
                    let key =
                        format!("{name}:{}", hex::encode(contents_sha256)).into_bytes();
                    if system
                        .persistent_state()
                        .get(SCRIPT_STATE_BUCKET, &key)?
                        .is_some()
                    {
                        return Ok(());
                    }
                    once_key = Some(key);
                }
                let script_contents = contents.contents()?;
                if is_empty_contents(script_contents) {
                    return Ok(());
                }
                let dir = dest.path().parent().ok_or_else(|| Error::NotFound {
                    path: dest.path().as_path().to_path_buf(),
                })?;
                system.run_script(name.as_str(), &dir, script_contents)?;
                if let Some(key) = once_key {
                    let state = ScriptOnceState {
                        name: name.to_string(),
                        executed_at: Utc::now(),
                    };
                    system.persistent_state().set(
                        SCRIPT_STATE_BUCKET,
                        &key,
                        &serde_json::to_vec(&state)?,
                    )?;
                }
                Ok(())
            }

            TargetStateEntry::Symlink { linkname } => {
                if let DestStateEntry::Symlink {
                    linkname: dest_linkname,
                    ..
                } = dest
                {
                    if dest_linkname.linkname()? == linkname.linkname()? {
                        return Ok(());
                    }
                }
                dest.remove(system)?;
                system.write_symlink(linkname.linkname()?, dest.path())
            }
        }
    }

    /// Whether the destination already matches this entry
    pub fn equal(&self, dest: &DestStateEntry<'_>, umask: u32) -> Result<bool> {
        match self {
            TargetStateEntry::Absent => Ok(matches!(dest, DestStateEntry::Absent { .. })),

            TargetStateEntry::Dir { perm } => match dest {
                DestStateEntry::Dir {
                    perm: dest_perm, ..
                } => Ok(dest_perm & !umask == perm & !umask),
                _ => Ok(false),
            },

            TargetStateEntry::File { contents, perm } => match dest {
                DestStateEntry::File {
                    perm: dest_perm,
                    contents: dest_contents,
                    ..
                } => {
                    if dest_perm & !umask != perm & !umask {
                        return Ok(false);
                    }
                    Ok(dest_contents.contents_sha256()? == contents.contents_sha256()?)
                }
                _ => Ok(false),
            },

            TargetStateEntry::Present { perm, .. } => match dest {
                DestStateEntry::File {
                    perm: dest_perm, ..
                } => Ok(dest_perm & !umask == perm & !umask),
                _ => Ok(false),
            },

            // The destination has not been renamed yet by definition.
            TargetStateEntry::RenameDir { .. } => Ok(false),

            // Scripts are independent of the destination state.
            TargetStateEntry::Script { .. } => Ok(true),

            TargetStateEntry::Symlink { linkname } => match dest {
                DestStateEntry::Symlink {
                    linkname: dest_linkname,
                    ..
                } => Ok(dest_linkname.linkname()? == linkname.linkname()?),
                _ => Ok(false),
            },
        }
    }

    /// The state to persist after a successful apply
    ///
    /// `None` for entries whose applied state is not a function of their
    /// own contents (absent, present, scripts, renames).
    pub fn entry_state(&self) -> Result<Option<EntryState>> {
        match self {
            TargetStateEntry::Absent
            | TargetStateEntry::Present { .. }
            | TargetStateEntry::RenameDir { .. }
            | TargetStateEntry::Script { .. } => Ok(None),
            TargetStateEntry::Dir { perm } => Ok(Some(EntryState {
                mode: MODE_DIR | perm,
                contents_sha256: None,
            })),
            TargetStateEntry::File { contents, perm } => Ok(Some(EntryState {
                mode: *perm,
                contents_sha256: Some(contents.contents_sha256()?.into()),
            })),
            TargetStateEntry::Symlink { linkname } => Ok(Some(EntryState {
                mode: MODE_SYMLINK,
                contents_sha256: Some(linkname.linkname_sha256()?.into()),
            })),
        }
    }

    /// Force evaluation of any lazy contents, caching errors
    pub fn evaluate(&self) -> Result<()> {
        match self {
            TargetStateEntry::File { contents, .. }
            | TargetStateEntry::Present { contents, .. }
            | TargetStateEntry::Script { contents, .. } => {
                contents.contents_sha256().map(|_| ())
            }
            TargetStateEntry::Symlink { linkname } => linkname.linkname().map(|_| ()),
            _ => Ok(()),
        }
    }
}
