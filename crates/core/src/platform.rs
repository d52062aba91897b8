//! Platform constants and process-level capture
//!
//! Mode bits are carried as plain `u32` everywhere; on Windows they are
//! largely advisory and `UNIX_FILE_MODES` gates the comparisons that would
//! otherwise produce spurious differences.

/// Whether file permission bits are meaningful on this platform
pub const UNIX_FILE_MODES: bool = cfg!(unix);

/// Mask selecting the permission bits of a mode
pub const MODE_PERM: u32 = 0o777;

/// Mode type bit marking a directory
pub const MODE_DIR: u32 = 0o040_000;

/// Mode type bit marking a symbolic link
pub const MODE_SYMLINK: u32 = 0o120_000;

#[cfg(unix)]
fn read_umask() -> u32 {
    use rustix::fs::Mode;
    // umask can only be read by setting it, so set and restore.
    let previous = rustix::process::umask(Mode::empty());
    rustix::process::umask(previous);
    u32::from(previous.bits())
}

#[cfg(not(unix))]
fn read_umask() -> u32 {
    0
}

/// The process umask, captured once on first use
///
/// Apply calls thread this value explicitly; nothing else reads the
/// process umask afterwards, so later `umask(2)` calls by scripts cannot
/// change reconciliation behavior mid-run.
pub fn process_umask() -> u32 {
    static UMASK: std::sync::OnceLock<u32> = std::sync::OnceLock::new();
    *UMASK.get_or_init(read_umask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_umask_is_stable() {
        let first = process_umask();
        let second = process_umask();
        assert_eq!(first, second);
        assert_eq!(first & !MODE_PERM, 0);
    }

    #[test]
    fn test_mode_type_bits_are_disjoint() {
        assert_eq!(MODE_DIR & MODE_PERM, 0);
        assert_eq!(MODE_SYMLINK & MODE_PERM, 0);
        assert_ne!(MODE_DIR, MODE_SYMLINK);
    }
}
