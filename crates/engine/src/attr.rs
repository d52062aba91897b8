//! File attribute parsing and encoding
//!
//! Attributes are encoded in source file and directory basenames using
//! underscore-terminated prefixes and the `.tmpl` suffix:
//!
//! - Directories: `exact_`?, `private_`?, then `dot_`
//! - Files: `encrypted_`?, `private_`?, `empty_`?, `executable_`?, `dot_`
//! - Present files: `exists_` followed by `encrypted_`?, `private_`?,
//!   `executable_`?
//! - Scripts: `run_` followed by (`first_` | `last_`)?, `once_`?
//! - Symlinks: `symlink_`
//!
//! `dot_` materializes a leading `.` in the target name, so on-disk source
//! names never start with a dot and the dot namespace stays reserved for
//! control files. The `.tmpl` suffix marks template content.
//!
//! Parsing is total: any basename decodes to some attribute record, and
//! [`DirAttributes::base_name`] / [`FileAttributes::base_name`] invert the
//! decoding exactly.
//!
//! # Examples
//!
//! ```
//! use tatami_engine::attr::{FileAttributes, SourceFileKind};
//!
//! let attrs = FileAttributes::parse("private_dot_netrc.tmpl");
//! assert_eq!(attrs.name, ".netrc");
//! assert_eq!(attrs.kind, SourceFileKind::File);
//! assert!(attrs.is_private());
//! assert!(attrs.is_template());
//! assert_eq!(attrs.base_name(), "private_dot_netrc.tmpl");
//! ```

use crate::error::{Error, Result};

/// Suffix marking template content
pub const TEMPLATE_SUFFIX: &str = ".tmpl";

const DOT_PREFIX: &str = "dot_";
const EMPTY_PREFIX: &str = "empty_";
const ENCRYPTED_PREFIX: &str = "encrypted_";
const EXACT_PREFIX: &str = "exact_";
const EXECUTABLE_PREFIX: &str = "executable_";
const EXISTS_PREFIX: &str = "exists_";
const FIRST_PREFIX: &str = "first_";
const LAST_PREFIX: &str = "last_";
const ONCE_PREFIX: &str = "once_";
const PRIVATE_PREFIX: &str = "private_";
const RUN_PREFIX: &str = "run_";
const SYMLINK_PREFIX: &str = "symlink_";

/// The type of target a source file represents
///
/// A file in the source state can represent a regular file, a file that
/// must merely be present, a script, or a symlink in the target state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFileKind {
    /// A regular file
    File,
    /// A file whose presence matters but whose contents are only written
    /// when it is absent
    Present,
    /// A script to execute
    Script,
    /// A symbolic link
    Symlink,
}

bitflags::bitflags! {
    /// Boolean attributes that can be encoded in a source file name
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FileAttrFlags: u8 {
        /// Keep the target even when the contents are empty
        const EMPTY = 1 << 0;
        /// Contents are encrypted in the source
        const ENCRYPTED = 1 << 1;
        /// Target is executable
        const EXECUTABLE = 1 << 2;
        /// Script runs at most once per distinct contents
        const ONCE = 1 << 3;
        /// Target permissions exclude group and other
        const PRIVATE = 1 << 4;
        /// Contents are a template
        const TEMPLATE = 1 << 5;
    }
}

/// Attributes parsed from a source directory name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirAttributes {
    /// The decoded target name
    pub name: String,
    /// Destination children not present in the source are removed
    pub exact: bool,
    /// Permissions exclude group and other
    pub private: bool,
}

impl DirAttributes {
    /// Parse a single directory name in the source state
    #[must_use]
    pub fn parse(source_name: &str) -> Self {
        let mut name = source_name;
        let mut exact = false;
        let mut private = false;
        if let Some(rest) = name.strip_prefix(EXACT_PREFIX) {
            name = rest;
            exact = true;
        }
        if let Some(rest) = name.strip_prefix(PRIVATE_PREFIX) {
            name = rest;
            private = true;
        }
        let name = match name.strip_prefix(DOT_PREFIX) {
            Some(rest) => format!(".{rest}"),
            None => name.to_string(),
        };
        Self {
            name,
            exact,
            private,
        }
    }

    /// Encode back into a source directory name
    #[must_use]
    pub fn base_name(&self) -> String {
        let mut source_name = String::new();
        if self.exact {
            source_name.push_str(EXACT_PREFIX);
        }
        if self.private {
            source_name.push_str(PRIVATE_PREFIX);
        }
        match self.name.strip_prefix('.') {
            Some(rest) => {
                source_name.push_str(DOT_PREFIX);
                source_name.push_str(rest);
            }
            None => source_name.push_str(&self.name),
        }
        source_name
    }

    /// The directory's permission bits before umask masking
    #[must_use]
    pub fn perm(&self) -> u32 {
        let mut perm = 0o777;
        if self.private {
            perm &= !0o077;
        }
        perm
    }

    /// Apply chattr-style modifiers, ignoring those that do not apply to
    /// directories
    pub fn apply_modifiers(&mut self, modifiers: &[AttrModifier]) {
        for modifier in modifiers {
            let (attribute, value) = modifier.parts();
            match attribute {
                Attribute::Exact => self.exact = value,
                Attribute::Private => self.private = value,
                _ => {}
            }
        }
    }
}

/// Attributes parsed from a source file name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileAttributes {
    /// The decoded target name
    pub name: String,
    /// What kind of target this file represents
    pub kind: SourceFileKind,
    /// Boolean attribute flags
    pub flags: FileAttrFlags,
    /// Script scheduling order: -1 first, 0 normal, +1 last
    pub order: i8,
}

impl FileAttributes {
    /// Parse a source file name in the source state
    #[must_use]
    pub fn parse(source_name: &str) -> Self {
        let mut kind = SourceFileKind::File;
        let mut name = source_name;
        let mut flags = FileAttrFlags::empty();
        let mut order = 0i8;

        if let Some(rest) = name.strip_prefix(EXISTS_PREFIX) {
            kind = SourceFileKind::Present;
            name = rest;
            if let Some(rest) = name.strip_prefix(ENCRYPTED_PREFIX) {
                name = rest;
                flags |= FileAttrFlags::ENCRYPTED;
            }
            if let Some(rest) = name.strip_prefix(PRIVATE_PREFIX) {
                name = rest;
                flags |= FileAttrFlags::PRIVATE;
            }
            if let Some(rest) = name.strip_prefix(EXECUTABLE_PREFIX) {
                name = rest;
                flags |= FileAttrFlags::EXECUTABLE;
            }
        } else if let Some(rest) = name.strip_prefix(RUN_PREFIX) {
            kind = SourceFileKind::Script;
            name = rest;
            if let Some(rest) = name.strip_prefix(FIRST_PREFIX) {
                name = rest;
                order = -1;
            } else if let Some(rest) = name.strip_prefix(LAST_PREFIX) {
                name = rest;
                order = 1;
            }
            if let Some(rest) = name.strip_prefix(ONCE_PREFIX) {
                name = rest;
                flags |= FileAttrFlags::ONCE;
            }
        } else if let Some(rest) = name.strip_prefix(SYMLINK_PREFIX) {
            kind = SourceFileKind::Symlink;
            name = rest;
        } else {
            if let Some(rest) = name.strip_prefix(ENCRYPTED_PREFIX) {
                name = rest;
                flags |= FileAttrFlags::ENCRYPTED;
            }
            if let Some(rest) = name.strip_prefix(PRIVATE_PREFIX) {
                name = rest;
                flags |= FileAttrFlags::PRIVATE;
            }
            if let Some(rest) = name.strip_prefix(EMPTY_PREFIX) {
                name = rest;
                flags |= FileAttrFlags::EMPTY;
            }
            if let Some(rest) = name.strip_prefix(EXECUTABLE_PREFIX) {
                name = rest;
                flags |= FileAttrFlags::EXECUTABLE;
            }
        }

        let mut name = match name.strip_prefix(DOT_PREFIX) {
            Some(rest) => format!(".{rest}"),
            None => name.to_string(),
        };
        if let Some(rest) = name.strip_suffix(TEMPLATE_SUFFIX) {
            name = rest.to_string();
            flags |= FileAttrFlags::TEMPLATE;
        }

        Self {
            name,
            kind,
            flags,
            order,
        }
    }

    /// Encode back into a source file name
    #[must_use]
    pub fn base_name(&self) -> String {
        let mut source_name = String::new();
        match self.kind {
            SourceFileKind::File => {
                if self.is_encrypted() {
                    source_name.push_str(ENCRYPTED_PREFIX);
                }
                if self.is_private() {
                    source_name.push_str(PRIVATE_PREFIX);
                }
                if self.is_empty() {
                    source_name.push_str(EMPTY_PREFIX);
                }
                if self.is_executable() {
                    source_name.push_str(EXECUTABLE_PREFIX);
                }
            }
            SourceFileKind::Present => {
                source_name.push_str(EXISTS_PREFIX);
                if self.is_encrypted() {
                    source_name.push_str(ENCRYPTED_PREFIX);
                }
                if self.is_private() {
                    source_name.push_str(PRIVATE_PREFIX);
                }
                if self.is_executable() {
                    source_name.push_str(EXECUTABLE_PREFIX);
                }
            }
            SourceFileKind::Script => {
                source_name.push_str(RUN_PREFIX);
                match self.order {
                    -1 => source_name.push_str(FIRST_PREFIX),
                    1 => source_name.push_str(LAST_PREFIX),
                    _ => {}
                }
                if self.is_once() {
                    source_name.push_str(ONCE_PREFIX);
                }
            }
            SourceFileKind::Symlink => source_name.push_str(SYMLINK_PREFIX),
        }
        match self.name.strip_prefix('.') {
            Some(rest) => {
                source_name.push_str(DOT_PREFIX);
                source_name.push_str(rest);
            }
            None => source_name.push_str(&self.name),
        }
        if self.is_template() {
            source_name.push_str(TEMPLATE_SUFFIX);
        }
        source_name
    }

    /// The file's permission bits before umask masking
    ///
    /// Always one of `0o666`, `0o777`, `0o600`, `0o700`, determined by the
    /// executable and private flags.
    #[must_use]
    pub fn perm(&self) -> u32 {
        let mut perm = 0o666;
        if self.is_executable() {
            perm |= 0o111;
        }
        if self.is_private() {
            perm &= !0o077;
        }
        perm
    }

    /// Check whether the empty flag is set
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flags.contains(FileAttrFlags::EMPTY)
    }

    /// Check whether the contents are encrypted
    #[inline]
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.flags.contains(FileAttrFlags::ENCRYPTED)
    }

    /// Check whether the target is executable
    #[inline]
    #[must_use]
    pub fn is_executable(&self) -> bool {
        self.flags.contains(FileAttrFlags::EXECUTABLE)
    }

    /// Check whether the script runs at most once
    #[inline]
    #[must_use]
    pub fn is_once(&self) -> bool {
        self.flags.contains(FileAttrFlags::ONCE)
    }

    /// Check whether the target is private
    #[inline]
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.flags.contains(FileAttrFlags::PRIVATE)
    }

    /// Check whether the contents are a template
    #[inline]
    #[must_use]
    pub fn is_template(&self) -> bool {
        self.flags.contains(FileAttrFlags::TEMPLATE)
    }

    /// Apply chattr-style modifiers, ignoring those that do not apply to
    /// files
    pub fn apply_modifiers(&mut self, modifiers: &[AttrModifier]) {
        for modifier in modifiers {
            let (attribute, value) = modifier.parts();
            let flag = match attribute {
                Attribute::Empty => FileAttrFlags::EMPTY,
                Attribute::Encrypted => FileAttrFlags::ENCRYPTED,
                Attribute::Executable => FileAttrFlags::EXECUTABLE,
                Attribute::Once => FileAttrFlags::ONCE,
                Attribute::Private => FileAttrFlags::PRIVATE,
                Attribute::Template => FileAttrFlags::TEMPLATE,
                Attribute::Exact => continue,
            };
            self.flags.set(flag, value);
        }
    }
}

/// An attribute that a chattr-style modifier can address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    /// The `empty` / `e` attribute
    Empty,
    /// The `encrypted` attribute
    Encrypted,
    /// The `exact` attribute (directories only)
    Exact,
    /// The `executable` / `x` attribute
    Executable,
    /// The `once` / `o` attribute (scripts only)
    Once,
    /// The `private` / `p` attribute
    Private,
    /// The `template` / `t` attribute
    Template,
}

/// A single parsed modifier: set or clear one attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrModifier {
    /// Set the attribute
    Set(Attribute),
    /// Clear the attribute
    Clear(Attribute),
}

impl AttrModifier {
    fn parts(self) -> (Attribute, bool) {
        match self {
            AttrModifier::Set(attribute) => (attribute, true),
            AttrModifier::Clear(attribute) => (attribute, false),
        }
    }
}

/// Parse a comma-separated modifier list
///
/// Each token is an attribute name (`empty`/`e`, `encrypted`, `exact`,
/// `executable`/`x`, `once`/`o`, `private`/`p`, `template`/`t`) optionally
/// prefixed with `+` (set, the default), `-`, or `no` (clear).
///
/// # Errors
///
/// Returns [`Error::UnknownAttribute`] for any unrecognized token.
pub fn parse_modifiers(s: &str) -> Result<Vec<AttrModifier>> {
    let mut modifiers = Vec::new();
    for token in s.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let (set, name) = if let Some(rest) = token.strip_prefix('+') {
            (true, rest)
        } else if let Some(rest) = token.strip_prefix('-') {
            (false, rest)
        } else if let Some(rest) = token.strip_prefix("no") {
            (false, rest)
        } else {
            (true, token)
        };
        let attribute = match name {
            "empty" | "e" => Attribute::Empty,
            "encrypted" => Attribute::Encrypted,
            "exact" => Attribute::Exact,
            "executable" | "x" => Attribute::Executable,
            "once" | "o" => Attribute::Once,
            "private" | "p" => Attribute::Private,
            "template" | "t" => Attribute::Template,
            _ => {
                return Err(Error::UnknownAttribute {
                    attribute: token.to_string(),
                });
            }
        };
        modifiers.push(if set {
            AttrModifier::Set(attribute)
        } else {
            AttrModifier::Clear(attribute)
        });
    }
    Ok(modifiers)
}
