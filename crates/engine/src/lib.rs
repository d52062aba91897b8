//! # Tatami Engine
//!
//! The state-reconciliation core of the tatami dotfile manager.
//!
//! The engine maintains three states and drives the destination toward the
//! target:
//!
//! - **Source state**: an authored directory tree whose file names encode
//!   metadata (permissions, template-ness, encryption, script ordering)
//! - **Target state**: the materialized desired outcome for each managed
//!   path, computed lazily from the source
//! - **Destination state**: what is actually observed on disk
//!
//! Reconciliation applies the minimal operation per target through a
//! [`system::System`] capability trait, over which dry-run, read-only,
//! diff-emitting, debug-logging, archiving, and dumping variants compose.

pub mod attr;
pub mod database;
pub mod encryption;
pub mod entry;
pub mod error;
pub mod format;
pub mod hash;
pub mod include;
pub mod lazy;
pub mod patterns;
pub mod state;
pub mod system;
pub mod target;

// Re-export path types from core
pub use tatami_core::path::{AbsPath, RelPath, SourceRelPath};

// Re-export commonly used types
pub use attr::{AttrModifier, Attribute, DirAttributes, FileAttributes, SourceFileKind, parse_modifiers};
pub use entry::{DestStateEntry, SourceStateEntry};
pub use error::{Error, Result};
pub use include::IncludeSet;
pub use state::{AddOptions, ApplyOptions, SourceState};
pub use target::{EntryState, TargetStateEntry};
