//! Error types for the filesystem engine.
//!
//! The engine distinguishes two recoverable failures: the volume byte budget
//! is exhausted ([`FsError::Full`]) and the host allocator refused memory
//! ([`FsError::OutOfMemory`]). Name collisions on create surface as
//! [`FsError::AlreadyExists`] so the host shim can map them to a collision
//! status. Lookup misses are not errors; they are reported through `Option`
//! returns.
//!
//! Path walking has its own outcome type, [`WalkError`], because the host
//! shim reacts to its variants differently (reparse handling vs. plain
//! not-found).

use thiserror::Error;

/// Errors produced by engine operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FsError {
    /// The volume byte budget cannot cover the requested charge.
    ///
    /// Recoverable: the caller can retry with a smaller request or free
    /// space first. Operations failing with `Full` leave the visible state
    /// unchanged.
    #[error("volume is full")]
    Full,

    /// The host allocator refused an allocation.
    ///
    /// May indicate a partial mutation for buffer growth; callers that need
    /// atomicity must re-check lengths.
    #[error("allocator refused memory")]
    OutOfMemory,

    /// A child with the same name (under the volume's case policy) already
    /// exists in the target directory.
    #[error("name already exists in directory")]
    AlreadyExists,
}

/// Result alias for engine operations.
pub type FsResult<T> = Result<T, FsError>;

/// Outcomes of a path walk that are not a successful resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WalkError {
    /// An intermediate component is missing or is not a directory.
    #[error("path component not found")]
    NotFound,

    /// An intermediate component is a directory carrying the reparse-point
    /// bit. The caller resolves the reparse target and restarts the walk.
    #[error("path crosses a reparse point (tag {reparse_tag:#010x})")]
    ReparsePoint {
        /// Node index of the reparse-point directory.
        node_index: u64,
        /// The reparse tag stored on that node.
        reparse_tag: u32,
    },
}
