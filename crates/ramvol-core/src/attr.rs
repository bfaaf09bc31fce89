//! NT file attributes and FILETIME helpers.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

bitflags::bitflags! {
    /// Windows file attribute bits carried by every node.
    ///
    /// The `DIRECTORY` bit is fixed at creation and never changes afterwards.
    /// A node whose attribute word is all zeroes is a free-list slot, so live
    /// nodes with no meaningful bits canonicalize to `NORMAL`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileAttributes: u32 {
        /// Read-only file.
        const READONLY            = 0x0000_0001;
        /// Hidden from normal listings.
        const HIDDEN              = 0x0000_0002;
        /// Operating-system file.
        const SYSTEM              = 0x0000_0004;
        /// Directory node.
        const DIRECTORY           = 0x0000_0010;
        /// Marked for backup.
        const ARCHIVE             = 0x0000_0020;
        /// No other attributes set.
        const NORMAL              = 0x0000_0080;
        /// Short-lived storage hint.
        const TEMPORARY           = 0x0000_0100;
        /// Sparse file.
        const SPARSE_FILE         = 0x0000_0200;
        /// Node carries a reparse tag and payload.
        const REPARSE_POINT       = 0x0000_0400;
        /// Contents are compressed.
        const COMPRESSED          = 0x0000_0800;
        /// Content not immediately available.
        const OFFLINE             = 0x0000_1000;
        /// Excluded from content indexing.
        const NOT_CONTENT_INDEXED = 0x0000_2000;
        /// Contents are encrypted.
        const ENCRYPTED           = 0x0000_4000;
    }
}

impl FileAttributes {
    /// Canonicalizes the attribute word for a live node.
    ///
    /// An empty set becomes `NORMAL`; the zero value is reserved for
    /// free-list slots.
    #[must_use]
    pub fn canonical(self) -> Self {
        if self.is_empty() {
            FileAttributes::NORMAL
        } else {
            self
        }
    }

    /// Whether the directory bit is set.
    #[inline]
    pub fn is_directory(self) -> bool {
        self.contains(FileAttributes::DIRECTORY)
    }

    /// Whether the reparse-point bit is set.
    #[inline]
    pub fn is_reparse_point(self) -> bool {
        self.contains(FileAttributes::REPARSE_POINT)
    }
}

/// Seconds between 1601-01-01 (FILETIME epoch) and 1970-01-01 (Unix epoch).
const FILETIME_UNIX_OFFSET_SECS: u64 = 11_644_473_600;

/// FILETIME ticks per second (100ns resolution).
const TICKS_PER_SEC: u64 = 10_000_000;

/// Returns the current time as 64-bit FILETIME ticks.
pub fn filetime_now() -> u64 {
    let since_unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    let ticks_since_unix =
        since_unix.as_secs() * TICKS_PER_SEC + u64::from(since_unix.subsec_nanos()) / 100;
    FILETIME_UNIX_OFFSET_SECS * TICKS_PER_SEC + ticks_since_unix
}
