//! In-memory, size-bounded hierarchical filesystem engine.
//!
//! This crate is the core of a RAM-backed volume with Windows-style file
//! semantics: case-preserving (optionally case-insensitive) names, NT
//! attribute bits, reparse points, and opaque security-descriptor blobs.
//! It services a host filesystem driver's per-operation callbacks; the
//! driver shim itself lives outside this crate and talks to the engine
//! through [`FileTree`].
//!
//! # Architecture
//!
//! - [`store`](crate::store) *(internal)* — two parallel dense arrays of
//!   node slots behind one reader-writer lock, a lock-free LIFO free list,
//!   and the atomic volume byte budget.
//! - [`ChildIndex`] — per-directory ordered entries, stored as a segmented
//!   array of sorted teeth and enumerated by k-way merge.
//! - [`SegmentedBuffer`] — file contents as a comb of 1 MiB segments,
//!   with partial-success growth under allocator pressure.
//! - [`FileTree`] — the facade: create, lookup, rename, remove, open and
//!   close, content and blob I/O, enumeration, all with exact byte
//!   accounting against the volume budget.
//! - [`path`] — backslash path walking and canonical-case recomposition
//!   for the shim.
//!
//! # Concurrency
//!
//! The engine is called from many preemptively scheduled worker threads.
//! One store-wide reader-writer lock protects the slot arrays from
//! relocation; handle counts, the byte budget and the free-list head stay
//! coherent through atomics. Conflicting operations on the *same* node
//! must be serialized by the caller (the host driver's per-file exclusion
//! provides this).

#![warn(missing_docs)]
#![warn(clippy::all)]

mod attr;
mod buffer;
mod children;
mod error;
mod name;
mod node;
pub mod path;
mod store;
mod tree;

pub use attr::{filetime_now, FileAttributes};
pub use buffer::{rounded_len, SegmentedBuffer, SEGMENT};
pub use children::{Child, ChildIndex, OrderedChildren, CHILD_OVERHEAD, TOOTH};
pub use error::{FsError, FsResult, WalkError};
pub use name::{name_cost, names_equal, ordinal_cmp, upcase};
pub use node::{
    NodeInfo, NodeState, Timestamps, DETACHED_PARENT, NODE_OVERHEAD, ROOT_NODE,
};
pub use tree::{FileTree, Found, TimesUpdate};
