//! NT status classification for engine errors.
//!
//! The engine reports small semantic error values; the host driver wants
//! NTSTATUS codes. This module is the single place that mapping lives, so
//! every backend returns the same status for the same condition.

use ramvol_core::{FsError, WalkError};

/// An NTSTATUS value as the host driver consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NtStatus(pub u32);

impl NtStatus {
    /// Operation completed.
    pub const SUCCESS: NtStatus = NtStatus(0x0000_0000);
    /// Returned while a reparse point is being crossed.
    pub const REPARSE: NtStatus = NtStatus(0x0000_0104);
    /// Object name not found.
    pub const OBJECT_NAME_NOT_FOUND: NtStatus = NtStatus(0xC000_0034);
    /// A name collided with an existing object.
    pub const OBJECT_NAME_COLLISION: NtStatus = NtStatus(0xC000_0035);
    /// An intermediate path component was missing or not a directory.
    pub const OBJECT_PATH_NOT_FOUND: NtStatus = NtStatus(0xC000_003A);
    /// The volume byte budget is exhausted.
    pub const DISK_FULL: NtStatus = NtStatus(0xC000_007F);
    /// The host allocator refused memory.
    pub const INSUFFICIENT_RESOURCES: NtStatus = NtStatus(0xC000_009A);
    /// A file was used where a directory was required.
    pub const NOT_A_DIRECTORY: NtStatus = NtStatus(0xC000_0103);
    /// A directory was used where a file was required.
    pub const FILE_IS_A_DIRECTORY: NtStatus = NtStatus(0xC000_00BA);
    /// The file does not carry a reparse point.
    pub const NOT_A_REPARSE_POINT: NtStatus = NtStatus(0xC000_0275);
    /// Directory is not empty.
    pub const DIRECTORY_NOT_EMPTY: NtStatus = NtStatus(0xC000_0101);

    /// Whether this status signals success (including informational
    /// values like [`REPARSE`](Self::REPARSE)).
    pub fn is_success(self) -> bool {
        self.0 < 0x8000_0000
    }
}

impl std::fmt::Display for NtStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl From<FsError> for NtStatus {
    fn from(e: FsError) -> Self {
        match e {
            FsError::Full => NtStatus::DISK_FULL,
            FsError::OutOfMemory => NtStatus::INSUFFICIENT_RESOURCES,
            FsError::AlreadyExists => NtStatus::OBJECT_NAME_COLLISION,
        }
    }
}

impl From<WalkError> for NtStatus {
    fn from(e: WalkError) -> Self {
        match e {
            WalkError::NotFound => NtStatus::OBJECT_PATH_NOT_FOUND,
            // The caller fingerprints the reparse point before surfacing
            // this status; the mapping itself is fixed.
            WalkError::ReparsePoint { .. } => NtStatus::REPARSE,
        }
    }
}

/// Folds an engine result into a status, discarding the value.
pub fn to_status<T>(result: Result<T, FsError>) -> NtStatus {
    match result {
        Ok(_) => NtStatus::SUCCESS,
        Err(e) => e.into(),
    }
}
