//! Node records.
//!
//! Every filesystem object is a fixed-size [`Node`] record plus a variable
//! [`NodeAux`] record, both addressed by a stable `u64` index into the
//! store's parallel arrays. The `Node` holds only machine words, all of them
//! atomics: the store hands out shared references under its read lock, and
//! the fields that must stay coherent without external serialization
//! (`open_count`, the free-list link) are updated with compare-and-swap.
//! Everything else is serialized by the caller, per the engine contract, so
//! relaxed loads and stores suffice.
//!
//! One word of the record is a union interpreted by state: a free slot
//! threads the free list through it, a directory keeps its parent's index
//! in it, and a regular file keeps its link count in it. The interpretation
//! is surfaced as the tagged [`NodeState`] view instead of raw bit-punning.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::attr::FileAttributes;
use crate::buffer::SegmentedBuffer;
use crate::children::ChildIndex;

/// Index of the root directory. Created by the volume constructor, never
/// freed, never on the free list.
pub const ROOT_NODE: u64 = 0;

/// Parent sentinel for a directory that was unlinked while handles were
/// still open. The node survives until the last handle closes.
pub const DETACHED_PARENT: u64 = u64::MAX;

/// Free-list terminator. Index 0 is always the root, so 0 is unambiguous.
pub(crate) const FREE_LIST_END: u64 = 0;

/// The four FILETIME fields carried by every node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timestamps {
    /// Creation time.
    pub creation: u64,
    /// Last access time.
    pub last_access: u64,
    /// Last write time.
    pub last_write: u64,
    /// Metadata change time.
    pub change: u64,
}

impl Timestamps {
    /// All four fields set to the same instant.
    pub fn all(t: u64) -> Self {
        Self {
            creation: t,
            last_access: t,
            last_write: t,
            change: t,
        }
    }
}

/// Tagged view of a node's union word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Slot is on the free list; `next_free` is the next slot (0 = end).
    Free {
        /// Next free slot index.
        next_free: u64,
    },
    /// Directory; `parent` is the containing directory's index, or
    /// [`DETACHED_PARENT`] if the directory was unlinked while open.
    Directory {
        /// Parent directory index.
        parent: u64,
    },
    /// Regular file; `link_count` of 0 means unlinked.
    File {
        /// Number of directory entries pointing at this node.
        link_count: u64,
    },
}

/// Fixed-size per-node record.
#[derive(Debug, Default)]
pub struct Node {
    attributes: AtomicU32,
    reparse_tag: AtomicU32,
    file_size: AtomicU64,
    creation_time: AtomicU64,
    last_access_time: AtomicU64,
    last_write_time: AtomicU64,
    change_time: AtomicU64,
    /// Union word: next-free / parent-index / link-count, keyed by state.
    word: AtomicU64,
    open_count: AtomicU64,
    /// Mirror of the content buffer's allocated length, kept here so
    /// metadata snapshots (stat, directory listings) never need the
    /// auxiliary record's lock.
    allocation_size: AtomicU64,
}

impl Node {
    /// Raw attribute bits. Zero means the slot is free.
    pub fn attributes(&self) -> FileAttributes {
        FileAttributes::from_bits_retain(self.attributes.load(Ordering::Relaxed))
    }

    pub(crate) fn set_attributes(&self, attrs: FileAttributes) {
        self.attributes.store(attrs.bits(), Ordering::Relaxed)
    }

    /// Whether this slot is on the free list.
    pub fn is_free(&self) -> bool {
        self.attributes.load(Ordering::Relaxed) == 0
    }

    /// Reparse tag; meaningful only while the reparse-point bit is set.
    pub fn reparse_tag(&self) -> u32 {
        self.reparse_tag.load(Ordering::Relaxed)
    }

    pub(crate) fn set_reparse_tag(&self, tag: u32) {
        self.reparse_tag.store(tag, Ordering::Relaxed)
    }

    /// Logical file size in bytes (never exceeds the allocation size).
    pub fn file_size(&self) -> u64 {
        self.file_size.load(Ordering::Relaxed)
    }

    pub(crate) fn set_file_size(&self, size: u64) {
        self.file_size.store(size, Ordering::Relaxed)
    }

    /// Bytes allocated for content (mirrors the buffer's length).
    pub fn allocation_size(&self) -> u64 {
        self.allocation_size.load(Ordering::Relaxed)
    }

    pub(crate) fn set_allocation_size(&self, size: u64) {
        self.allocation_size.store(size, Ordering::Relaxed)
    }

    /// The node's four timestamps.
    pub fn times(&self) -> Timestamps {
        Timestamps {
            creation: self.creation_time.load(Ordering::Relaxed),
            last_access: self.last_access_time.load(Ordering::Relaxed),
            last_write: self.last_write_time.load(Ordering::Relaxed),
            change: self.change_time.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn set_times(&self, times: Timestamps) {
        self.creation_time.store(times.creation, Ordering::Relaxed);
        self.last_access_time.store(times.last_access, Ordering::Relaxed);
        self.last_write_time.store(times.last_write, Ordering::Relaxed);
        self.change_time.store(times.change, Ordering::Relaxed);
    }

    pub(crate) fn set_last_access_time(&self, t: u64) {
        self.last_access_time.store(t, Ordering::Relaxed);
    }

    pub(crate) fn set_last_write_time(&self, t: u64) {
        self.last_write_time.store(t, Ordering::Relaxed);
    }

    pub(crate) fn set_change_time(&self, t: u64) {
        self.change_time.store(t, Ordering::Relaxed);
    }

    /// Tagged interpretation of the union word.
    pub fn state(&self) -> NodeState {
        let word = self.word.load(Ordering::Relaxed);
        if self.is_free() {
            NodeState::Free { next_free: word }
        } else if self.attributes().is_directory() {
            NodeState::Directory { parent: word }
        } else {
            NodeState::File { link_count: word }
        }
    }

    /// Parent index; the node must be a directory.
    pub fn parent(&self) -> u64 {
        debug_assert!(self.attributes().is_directory());
        self.word.load(Ordering::Relaxed)
    }

    pub(crate) fn set_parent(&self, parent: u64) {
        debug_assert!(self.attributes().is_directory());
        self.word.store(parent, Ordering::Relaxed)
    }

    /// Link count; the node must be a regular file.
    pub fn link_count(&self) -> u64 {
        debug_assert!(!self.attributes().is_directory() && !self.is_free());
        self.word.load(Ordering::Relaxed)
    }

    pub(crate) fn set_link_count(&self, links: u64) {
        self.word.store(links, Ordering::Relaxed)
    }

    pub(crate) fn next_free(&self) -> u64 {
        self.word.load(Ordering::Acquire)
    }

    pub(crate) fn set_next_free(&self, next: u64) {
        self.word.store(next, Ordering::Release)
    }

    /// Outstanding open handles.
    pub fn open_count(&self) -> u64 {
        self.open_count.load(Ordering::Relaxed)
    }

    /// Atomically registers one more open handle.
    pub(crate) fn increment_open(&self) -> u64 {
        self.open_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Atomically releases one handle and returns the remaining count.
    ///
    /// Refuses to underflow: an unbalanced close is a caller bug, asserted
    /// in debug builds and ignored in release. AcqRel so the eviction
    /// check that follows observes every prior increment.
    pub(crate) fn decrement_open(&self) -> u64 {
        let mut current = self.open_count.load(Ordering::Relaxed);
        loop {
            debug_assert!(current > 0, "close without matching open");
            if current == 0 {
                return 0;
            }
            match self.open_count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return current - 1,
                Err(c) => current = c,
            }
        }
    }

    /// Rewrites the record for a freshly allocated slot.
    pub(crate) fn activate(
        &self,
        attrs: FileAttributes,
        reparse_tag: u32,
        times: Timestamps,
        word: u64,
    ) {
        self.set_attributes(attrs.canonical());
        self.set_reparse_tag(reparse_tag);
        self.set_file_size(0);
        self.set_times(times);
        self.word.store(word, Ordering::Relaxed);
        self.open_count.store(0, Ordering::Relaxed);
        self.allocation_size.store(0, Ordering::Relaxed);
    }

    /// Zeroes the record; the slot is about to join the free list.
    pub(crate) fn clear(&self) {
        self.set_attributes(FileAttributes::empty());
        self.set_reparse_tag(0);
        self.set_file_size(0);
        self.set_times(Timestamps::default());
        self.word.store(FREE_LIST_END, Ordering::Relaxed);
        self.open_count.store(0, Ordering::Relaxed);
        self.allocation_size.store(0, Ordering::Relaxed);
    }
}

/// Variable-size per-node record, kept apart from [`Node`] so it can grow
/// without disturbing references to the fixed records.
#[derive(Debug, Default)]
pub struct NodeAux {
    /// Opaque security descriptor blob.
    pub security: Option<Box<[u8]>>,
    /// Opaque extra-data blob (reparse payloads travel here).
    pub extra_data: Option<Box<[u8]>>,
    /// File contents; empty for directories.
    pub data: SegmentedBuffer,
    /// Child entries; empty for regular files.
    pub children: ChildIndex,
}

impl NodeAux {
    /// Bytes currently charged for the two blobs.
    pub fn blob_cost(&self) -> u64 {
        self.security.as_deref().map_or(0, |b| b.len() as u64)
            + self.extra_data.as_deref().map_or(0, |b| b.len() as u64)
    }
}

/// Fixed overhead charged against the volume budget for every live node.
pub const NODE_OVERHEAD: u64 =
    (std::mem::size_of::<Node>() + std::mem::size_of::<NodeAux>()) as u64;

/// Copy-out snapshot of a node's metadata, safe to hold without the store
/// lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    /// The node's stable index.
    pub node_index: u64,
    /// Attribute bits (canonicalized).
    pub attributes: FileAttributes,
    /// Reparse tag, meaningful when the reparse-point bit is set.
    pub reparse_tag: u32,
    /// Logical file size.
    pub file_size: u64,
    /// Bytes allocated for content.
    pub allocation_size: u64,
    /// The four FILETIME fields.
    pub times: Timestamps,
    /// Outstanding handle count at snapshot time.
    pub open_count: u64,
    /// Tagged union-word view at snapshot time.
    pub state: NodeState,
}
