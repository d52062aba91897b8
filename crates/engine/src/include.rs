//! Entry-kind include filters
//!
//! Commands can restrict which kinds of entries they act on. An
//! [`IncludeSet`] parses as a comma-separated list of kind names, with `!`
//! removing a kind, and filters target and destination entries by kind.

use crate::entry::DestStateEntry;
use crate::error::{Error, Result};
use crate::target::TargetStateEntry;

bitflags::bitflags! {
    /// Bitmask of entry kinds to include
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct IncludeBits: u8 {
        /// Targets that should be absent
        const ABSENT = 1 << 0;
        /// Directories
        const DIRS = 1 << 1;
        /// Regular files
        const FILES = 1 << 2;
        /// Scripts
        const SCRIPTS = 1 << 3;
        /// Symbolic links
        const SYMLINKS = 1 << 4;
    }
}

impl IncludeBits {
    /// All kinds
    pub const ALL: IncludeBits = IncludeBits::all();
}

/// A filter over entry kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncludeSet {
    bits: IncludeBits,
}

impl IncludeSet {
    /// Create an include set from explicit bits
    #[must_use]
    pub fn new(bits: IncludeBits) -> Self {
        Self { bits }
    }

    /// An include set accepting every kind
    #[must_use]
    pub fn all() -> Self {
        Self::new(IncludeBits::ALL)
    }

    /// Whether `entry` passes the filter
    #[must_use]
    pub fn includes_target(&self, entry: &TargetStateEntry) -> bool {
        let bit = match entry {
            TargetStateEntry::Absent => IncludeBits::ABSENT,
            TargetStateEntry::Dir { .. } | TargetStateEntry::RenameDir { .. } => IncludeBits::DIRS,
            TargetStateEntry::File { .. } | TargetStateEntry::Present { .. } => IncludeBits::FILES,
            TargetStateEntry::Script { .. } => IncludeBits::SCRIPTS,
            TargetStateEntry::Symlink { .. } => IncludeBits::SYMLINKS,
        };
        self.bits.contains(bit)
    }

    /// Whether the observed destination entry passes the filter
    #[must_use]
    pub fn includes_dest(&self, entry: &DestStateEntry<'_>) -> bool {
        let bit = match entry {
            DestStateEntry::Absent { .. } => return false,
            DestStateEntry::Dir { .. } => IncludeBits::DIRS,
            DestStateEntry::File { .. } => IncludeBits::FILES,
            DestStateEntry::Symlink { .. } => IncludeBits::SYMLINKS,
        };
        self.bits.contains(bit)
    }
}

impl Default for IncludeSet {
    fn default() -> Self {
        Self::all()
    }
}

impl std::str::FromStr for IncludeSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == "none" {
            return Ok(Self::new(IncludeBits::empty()));
        }
        let mut bits = IncludeBits::empty();
        for element in s.split(',') {
            if element.is_empty() {
                continue;
            }
            let (exclude, name) = match element.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, element),
            };
            let bit = match name {
                "a" | "absent" => IncludeBits::ABSENT,
                "all" => IncludeBits::ALL,
                "d" | "dirs" => IncludeBits::DIRS,
                "f" | "files" => IncludeBits::FILES,
                "scripts" => IncludeBits::SCRIPTS,
                "s" | "symlinks" => IncludeBits::SYMLINKS,
                _ => {
                    return Err(Error::Parse {
                        context: s.to_string(),
                        message: format!("{name}: unknown include element"),
                    });
                }
            };
            if exclude {
                bits &= !bit;
            } else {
                bits |= bit;
            }
        }
        Ok(Self::new(bits))
    }
}

impl std::fmt::Display for IncludeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.bits == IncludeBits::ALL {
            return f.write_str("all");
        }
        if self.bits.is_empty() {
            return f.write_str("none");
        }
        let mut elements = Vec::new();
        for (bit, name) in [
            (IncludeBits::ABSENT, "absent"),
            (IncludeBits::DIRS, "dirs"),
            (IncludeBits::FILES, "files"),
            (IncludeBits::SCRIPTS, "scripts"),
            (IncludeBits::SYMLINKS, "symlinks"),
        ] {
            if self.bits.contains(bit) {
                elements.push(name);
            }
        }
        f.write_str(&elements.join(","))
    }
}
