//! The FileTree facade: every public engine operation.
//!
//! Callers address nodes by stable index or by a `(parent, leaf-name)`
//! pair; path resolution happens outside the engine. Each operation
//! acquires the store lock in the weakest mode that keeps the slot arrays
//! in place: shared for everything that mutates within existing slots,
//! upgradeable-shared for creation (which may have to grow the arrays),
//! exclusive only inside the grow step itself.
//!
//! The engine does not serialize conflicting operations on the same node;
//! the host driver's per-file exclusion does. What it does guarantee,
//! regardless of external serialization, is atomicity of the open-handle
//! count, the byte budget, and the free-list head.

use tracing::{debug, trace};

use crate::attr::{filetime_now, FileAttributes};
use crate::buffer::{rounded_len, SegmentedBuffer};
use crate::children::Child;
use crate::error::{FsError, FsResult};
use crate::name::name_cost;
use crate::node::{
    NodeAux, NodeInfo, NodeState, Timestamps, DETACHED_PARENT, NODE_OVERHEAD, ROOT_NODE,
};
use crate::store::{NodeStore, Slots};

/// Result of a successful name lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Found {
    /// Index of the resolved node.
    pub node_index: u64,
    /// The canonical-case spelling stored in the directory, present only
    /// on case-insensitive volumes. Case-sensitive volumes return `None`
    /// and the caller uses its input as-is.
    pub normalized_name: Option<String>,
}

/// Selective timestamp update; absent fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimesUpdate {
    /// New creation time.
    pub creation: Option<u64>,
    /// New last-access time.
    pub last_access: Option<u64>,
    /// New last-write time.
    pub last_write: Option<u64>,
    /// New change time.
    pub change: Option<u64>,
}

/// In-memory, size-bounded directory hierarchy.
#[derive(Debug)]
pub struct FileTree {
    store: NodeStore,
    ignore_case: bool,
}

impl FileTree {
    /// Creates a volume of `total_size` bytes with an empty root directory.
    ///
    /// The root lives at index [`ROOT_NODE`], can never be removed, and
    /// carries `root_security` as its descriptor blob. Fails with
    /// [`FsError::Full`] when the budget cannot even cover the root.
    pub fn new(
        total_size: u64,
        ignore_case: bool,
        root_security: Option<&[u8]>,
    ) -> FsResult<Self> {
        let store = NodeStore::new(total_size);
        let root = store.grow_root_slot()?;

        let slots = store.read();
        slots.node(root).activate(
            FileAttributes::DIRECTORY,
            0,
            Timestamps::all(filetime_now()),
            ROOT_NODE,
        );
        if let Some(sd) = root_security {
            store.charge(sd.len() as u64)?;
            slots.aux(root).write().security = Some(sd.into());
        }
        drop(slots);

        Ok(Self { store, ignore_case })
    }

    /// Volume capacity in bytes.
    pub fn total_size(&self) -> u64 {
        self.store.total_size()
    }

    /// Remaining byte budget.
    pub fn free_size(&self) -> u64 {
        self.store.free_size()
    }

    /// Whether name comparison folds case.
    pub fn case_insensitive(&self) -> bool {
        self.ignore_case
    }

    // =========================================================================
    // Creation and lookup
    // =========================================================================

    /// Creates a node named `name` under `parent`.
    ///
    /// Directories record `parent` as their back-pointer; regular files
    /// start with a link count of one. The entry and node costs are
    /// charged up front and released exactly on every failure path.
    pub fn add(
        &self,
        parent: u64,
        name: &str,
        attrs: FileAttributes,
        reparse_tag: u32,
        times: Timestamps,
    ) -> FsResult<u64> {
        let guard = self.store.upgradable();
        debug_assert!(guard.node(parent).attributes().is_directory());

        if guard
            .aux(parent)
            .read()
            .children
            .find(name, self.ignore_case)
            .is_some()
        {
            return Err(FsError::AlreadyExists);
        }

        let entry_cost = crate::children::CHILD_OVERHEAD + name_cost(name);
        self.store.charge(entry_cost)?;

        let (allocated, guard) = self.store.allocate(guard);
        let node_index = match allocated {
            Ok(idx) => idx,
            Err(e) => {
                self.store.release(entry_cost);
                return Err(e);
            }
        };

        let attrs = attrs.canonical();
        let word = if attrs.is_directory() { parent } else { 1 };
        guard.node(node_index).activate(attrs, reparse_tag, times, word);

        let child = Child {
            name: name.to_string(),
            node_index,
        };
        if let Err(e) = guard
            .aux(parent)
            .write()
            .children
            .add(child, self.ignore_case)
        {
            self.store.release(entry_cost);
            self.store.release(NODE_OVERHEAD);
            self.store.push_free(&guard, node_index);
            return Err(e);
        }

        debug!(parent, name, node_index, "add");
        Ok(node_index)
    }

    /// Looks up `name` under `parent`.
    pub fn find(&self, parent: u64, name: &str) -> Option<Found> {
        let slots = self.store.read();
        let aux = slots.aux(parent).read();
        aux.children.find(name, self.ignore_case).map(|c| Found {
            node_index: c.node_index,
            normalized_name: self.ignore_case.then(|| c.name.clone()),
        })
    }

    /// Metadata snapshot for a node.
    pub fn get(&self, node_index: u64) -> NodeInfo {
        let slots = self.store.read();
        Self::snapshot(node_index, &slots)
    }

    fn snapshot(node_index: u64, slots: &Slots) -> NodeInfo {
        let node = slots.node(node_index);
        NodeInfo {
            node_index,
            attributes: node.attributes(),
            reparse_tag: node.reparse_tag(),
            file_size: node.file_size(),
            allocation_size: node.allocation_size(),
            times: node.times(),
            open_count: node.open_count(),
            state: node.state(),
        }
    }

    // =========================================================================
    // Metadata updates
    // =========================================================================

    /// Replaces a node's attribute word and reparse tag.
    ///
    /// The directory bit is fixed at creation; incoming bits for it are
    /// ignored.
    pub fn set_attributes(&self, node_index: u64, attrs: FileAttributes, reparse_tag: u32) {
        let slots = self.store.read();
        let node = slots.node(node_index);
        let dir_bit = node.attributes() & FileAttributes::DIRECTORY;
        node.set_attributes(((attrs - FileAttributes::DIRECTORY) | dir_bit).canonical());
        node.set_reparse_tag(reparse_tag);
    }

    /// In-place update of attributes and any subset of the timestamps.
    pub fn set_times_and_attributes(
        &self,
        node_index: u64,
        attrs: Option<FileAttributes>,
        reparse_tag: u32,
        times: TimesUpdate,
    ) {
        let slots = self.store.read();
        let node = slots.node(node_index);
        if let Some(attrs) = attrs {
            let dir_bit = node.attributes() & FileAttributes::DIRECTORY;
            node.set_attributes(((attrs - FileAttributes::DIRECTORY) | dir_bit).canonical());
            node.set_reparse_tag(reparse_tag);
        }
        let mut t = node.times();
        if let Some(v) = times.creation {
            t.creation = v;
        }
        if let Some(v) = times.last_access {
            t.last_access = v;
        }
        if let Some(v) = times.last_write {
            t.last_write = v;
        }
        if let Some(v) = times.change {
            t.change = v;
        }
        node.set_times(t);
    }

    /// Supersede-on-overwrite: zero the file size, reset attributes, tag
    /// and times, preserve the link count / parent pointer, and return the
    /// resulting snapshot.
    pub fn reset_and_get(
        &self,
        node_index: u64,
        attrs: FileAttributes,
        reparse_tag: u32,
        times: Timestamps,
    ) -> NodeInfo {
        let slots = self.store.read();
        let node = slots.node(node_index);
        let dir_bit = node.attributes() & FileAttributes::DIRECTORY;
        node.set_attributes(((attrs - FileAttributes::DIRECTORY) | dir_bit).canonical());
        node.set_reparse_tag(reparse_tag);
        node.set_file_size(0);
        node.set_times(times);
        Self::snapshot(node_index, &slots)
    }

    // =========================================================================
    // Rename
    // =========================================================================

    /// Renames `src_name` under `src_parent` to `dst_name` under
    /// `dst_parent` (the parents may be equal).
    ///
    /// If the destination name already exists and refers to a different
    /// node, its entry is repointed at the source node and the superseded
    /// node is unlinked; an open handle keeps the superseded node's
    /// contents alive until the last close. A same-entry rename (case
    /// change) happens in place with a re-sort inside its tooth.
    pub fn rename(
        &self,
        src_parent: u64,
        src_name: &str,
        dst_parent: u64,
        dst_name: &str,
    ) -> FsResult<()> {
        let slots = self.store.read();
        let mut work = Vec::new();
        let result = if src_parent == dst_parent {
            self.rename_same_parent(&slots, src_parent, src_name, dst_name, &mut work)
        } else {
            self.rename_cross_parent(
                &slots, src_parent, src_name, dst_parent, dst_name, &mut work,
            )
        };
        self.reclaim(&slots, work);
        debug!(src_parent, src_name, dst_parent, dst_name, ok = result.is_ok(), "rename");
        result
    }

    fn rename_same_parent(
        &self,
        slots: &Slots,
        parent: u64,
        src_name: &str,
        dst_name: &str,
        work: &mut Vec<u64>,
    ) -> FsResult<()> {
        let mut aux = slots.aux(parent).write();
        let Some(src_pos) = aux.children.position(src_name, self.ignore_case) else {
            debug_assert!(false, "rename source {src_name:?} vanished");
            return Ok(());
        };

        match aux.children.position(dst_name, self.ignore_case) {
            Some(dst_pos) if dst_pos == src_pos => {
                // Same entry: in-place case change.
                let old_cost = name_cost(&aux.children.at(src_pos).name);
                let new_cost = name_cost(dst_name);
                if new_cost > old_cost {
                    self.store.charge(new_cost - old_cost)?;
                } else {
                    self.store.release(old_cost - new_cost);
                }
                aux.children
                    .rename_at(src_pos, dst_name.to_string(), self.ignore_case);
                Ok(())
            }
            Some(dst_pos) => {
                // Replace: the destination entry now points at the source
                // node; the superseded node is unlinked.
                let src_node = aux.children.at(src_pos).node_index;
                let superseded = aux.children.at(dst_pos).node_index;
                aux.children.set_node_at(dst_pos, src_node);
                let removed = aux.children.remove_at(src_pos, self.ignore_case);
                self.store.release(removed.cost());
                self.unlink_locked(slots, superseded, work);
                Ok(())
            }
            None => {
                let old_cost = name_cost(&aux.children.at(src_pos).name);
                let new_cost = name_cost(dst_name);
                if new_cost > old_cost {
                    self.store.charge(new_cost - old_cost)?;
                } else {
                    self.store.release(old_cost - new_cost);
                }
                aux.children
                    .rename_at(src_pos, dst_name.to_string(), self.ignore_case);
                Ok(())
            }
        }
    }

    fn rename_cross_parent(
        &self,
        slots: &Slots,
        src_parent: u64,
        src_name: &str,
        dst_parent: u64,
        dst_name: &str,
        work: &mut Vec<u64>,
    ) -> FsResult<()> {
        // Lock both parents in index order; concurrent renames between the
        // same pair of directories then cannot deadlock.
        let (lo, hi) = if src_parent < dst_parent {
            (src_parent, dst_parent)
        } else {
            (dst_parent, src_parent)
        };
        let mut lo_aux = slots.aux(lo).write();
        let mut hi_aux = slots.aux(hi).write();
        let (src_aux, dst_aux): (&mut NodeAux, &mut NodeAux) = if src_parent == lo {
            (&mut lo_aux, &mut hi_aux)
        } else {
            (&mut hi_aux, &mut lo_aux)
        };

        let Some(src_pos) = src_aux.children.position(src_name, self.ignore_case) else {
            debug_assert!(false, "rename source {src_name:?} vanished");
            return Ok(());
        };
        let src_node = src_aux.children.at(src_pos).node_index;

        match dst_aux.children.position(dst_name, self.ignore_case) {
            Some(dst_pos) => {
                let superseded = dst_aux.children.at(dst_pos).node_index;
                dst_aux.children.set_node_at(dst_pos, src_node);
                self.unlink_locked(slots, superseded, work);
            }
            None => {
                let entry_cost = crate::children::CHILD_OVERHEAD + name_cost(dst_name);
                self.store.charge(entry_cost)?;
                let child = Child {
                    name: dst_name.to_string(),
                    node_index: src_node,
                };
                if let Err(e) = dst_aux.children.add(child, self.ignore_case) {
                    self.store.release(entry_cost);
                    return Err(e);
                }
            }
        }

        let removed = src_aux.children.remove_at(src_pos, self.ignore_case);
        self.store.release(removed.cost());

        let node = slots.node(src_node);
        if node.attributes().is_directory() {
            node.set_parent(dst_parent);
        }
        Ok(())
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Deletes the entry `name` under `parent` and unlinks its node.
    ///
    /// Returns whether the entry existed. The node itself is freed once it
    /// is both unreachable and closed.
    pub fn remove(&self, parent: u64, name: &str) -> bool {
        let slots = self.store.read();
        let mut work = Vec::new();
        let found = {
            let mut aux = slots.aux(parent).write();
            match aux.children.position(name, self.ignore_case) {
                None => false,
                Some(pos) => {
                    let removed = aux.children.remove_at(pos, self.ignore_case);
                    self.store.release(removed.cost());
                    self.unlink_locked(&slots, removed.node_index, &mut work);
                    true
                }
            }
        };
        self.reclaim(&slots, work);
        debug!(parent, name, found, "remove");
        found
    }

    /// Bulk-unlinks every child of `parent`.
    pub fn remove_children(&self, parent: u64) {
        let slots = self.store.read();
        let mut work = Vec::new();
        {
            let mut aux = slots.aux(parent).write();
            let children = std::mem::take(&mut aux.children);
            for child in children.into_children() {
                self.store.release(child.cost());
                self.unlink_locked(&slots, child.node_index, &mut work);
            }
        }
        self.reclaim(&slots, work);
        debug!(parent, "remove_children");
    }

    // =========================================================================
    // Handles
    // =========================================================================

    /// Registers an open handle and returns the node's snapshot.
    pub fn open(&self, node_index: u64) -> NodeInfo {
        let slots = self.store.read();
        let opens = slots.node(node_index).increment_open();
        trace!(node_index, opens, "open");
        Self::snapshot(node_index, &slots)
    }

    /// Releases one handle; the node is freed if it was unlinked and this
    /// was the last handle.
    pub fn close(&self, node_index: u64) {
        let slots = self.store.read();
        let node = slots.node(node_index);
        let remaining = node.decrement_open();
        trace!(node_index, remaining, "close");
        if remaining == 0 {
            let unreachable = match node.state() {
                NodeState::Directory { parent } => parent == DETACHED_PARENT,
                NodeState::File { link_count } => link_count == 0,
                NodeState::Free { .. } => unreachable!("closing a free slot"),
            };
            if unreachable {
                self.reclaim(&slots, vec![node_index]);
            }
        }
    }

    // =========================================================================
    // Security and extra data
    // =========================================================================

    /// Copy of the node's security descriptor blob.
    pub fn security(&self, node_index: u64) -> Option<Vec<u8>> {
        let slots = self.store.read();
        let aux = slots.aux(node_index).read();
        aux.security.as_deref().map(<[u8]>::to_vec)
    }

    /// Replaces the security descriptor blob, accounting the byte delta.
    pub fn set_security(&self, node_index: u64, blob: Option<&[u8]>) -> FsResult<()> {
        let slots = self.store.read();
        let mut aux = slots.aux(node_index).write();
        let old = aux.security.as_deref().map_or(0, |b| b.len() as u64);
        let new = blob.map_or(0, |b| b.len() as u64);
        if new > old {
            self.store.charge(new - old)?;
        } else {
            self.store.release(old - new);
        }
        aux.security = blob.map(Into::into);
        Ok(())
    }

    /// Read-modify-write of the security blob under the shared lock.
    ///
    /// The callback receives the current blob (if any) for in-place
    /// modification; the byte delta is settled when it returns. A budget
    /// failure leaves the stored blob untouched.
    pub fn modify_security<A, R>(
        &self,
        node_index: u64,
        arg: A,
        f: impl FnOnce(&mut Option<Vec<u8>>, A) -> R,
    ) -> FsResult<R> {
        let slots = self.store.read();
        let mut aux = slots.aux(node_index).write();
        let old = aux.security.as_deref().map_or(0, |b| b.len() as u64);

        let mut scratch = aux.security.as_deref().map(<[u8]>::to_vec);
        let out = f(&mut scratch, arg);

        let new = scratch.as_deref().map_or(0, |b| b.len() as u64);
        if new > old {
            self.store.charge(new - old)?;
        } else {
            self.store.release(old - new);
        }
        aux.security = scratch.map(Vec::into_boxed_slice);
        Ok(out)
    }

    /// Copy of the node's extra-data blob (reparse payloads live here).
    pub fn extra_data(&self, node_index: u64) -> Option<Vec<u8>> {
        let slots = self.store.read();
        let aux = slots.aux(node_index).read();
        aux.extra_data.as_deref().map(<[u8]>::to_vec)
    }

    /// Replaces the extra-data blob, accounting the byte delta.
    pub fn set_extra_data(&self, node_index: u64, blob: Option<&[u8]>) -> FsResult<()> {
        let slots = self.store.read();
        let mut aux = slots.aux(node_index).write();
        let old = aux.extra_data.as_deref().map_or(0, |b| b.len() as u64);
        let new = blob.map_or(0, |b| b.len() as u64);
        if new > old {
            self.store.charge(new - old)?;
        } else {
            self.store.release(old - new);
        }
        aux.extra_data = blob.map(Into::into);
        Ok(())
    }

    // =========================================================================
    // Content
    // =========================================================================

    /// Bytes allocated for the node's content.
    pub fn allocation_size(&self, node_index: u64) -> u64 {
        let slots = self.store.read();
        slots.node(node_index).allocation_size()
    }

    /// Resizes the content allocation to exactly `new_size` bytes.
    ///
    /// Shrinking cannot fail and clamps the file size. Growing charges the
    /// delta up front; if the allocator then fails mid-resize the buffer
    /// keeps the partially reached length, the overcharge is released, and
    /// the call reports [`FsError::OutOfMemory`].
    pub fn set_allocation_size(&self, node_index: u64, new_size: u64) -> FsResult<()> {
        let slots = self.store.read();
        let node = slots.node(node_index);
        let mut aux = slots.aux(node_index).write();
        let old = aux.data.len();

        if new_size > old {
            self.store.charge(new_size - old)?;
            let result = aux.data.set_len(new_size);
            let reached = aux.data.len();
            node.set_allocation_size(reached);
            if reached < new_size {
                self.store.release(new_size - reached);
            }
            result
        } else {
            aux.data.set_len(new_size).expect("shrink cannot fail");
            node.set_allocation_size(new_size);
            self.store.release(old - new_size);
            if node.file_size() > new_size {
                node.set_file_size(new_size);
            }
            Ok(())
        }
    }

    /// Sets the logical file size, growing the allocation if needed.
    ///
    /// Growth targets the rounded (segment-aligned) size first and falls
    /// back to the exact size when the budget is tight. Bytes between the
    /// old and new file size read as zero.
    pub fn set_file_size(&self, node_index: u64, new_size: u64) -> FsResult<()> {
        let slots = self.store.read();
        let node = slots.node(node_index);
        let mut aux = slots.aux(node_index).write();
        let old_alloc = aux.data.len();
        let old_size = node.file_size();

        if new_size > old_alloc {
            let target = match self.charge_first_fit(old_alloc, &[rounded_len(new_size), new_size])
            {
                Some(t) => t,
                None => return Err(FsError::Full),
            };
            let result = aux.data.set_len(target);
            let reached = aux.data.len();
            node.set_allocation_size(reached);
            if reached < target {
                self.store.release(target - reached);
            }
            if reached < new_size {
                return result;
            }
        }

        if new_size > old_size {
            aux.data.zero_range(old_size, new_size);
        }
        node.set_file_size(new_size);
        Ok(())
    }

    /// Charges the first growth target the budget can cover, returning it.
    fn charge_first_fit(&self, current: u64, targets: &[u64]) -> Option<u64> {
        for &t in targets {
            if t <= current {
                continue;
            }
            if self.store.charge(t - current).is_ok() {
                return Some(t);
            }
        }
        None
    }

    /// Reads at most `dst.len()` bytes at `offset`, clamped to the file
    /// size. Returns the byte count; zero at or past end of file.
    pub fn read_data(&self, node_index: u64, offset: u64, dst: &mut [u8]) -> usize {
        let slots = self.store.read();
        let node = slots.node(node_index);
        let aux = slots.aux(node_index).read();
        let file_size = node.file_size();
        if offset >= file_size {
            return 0;
        }
        let n = (dst.len() as u64).min(file_size - offset) as usize;
        aux.data.read(offset, &mut dst[..n]);
        trace!(node_index, offset, n, "read_data");
        n
    }

    /// Writes `src` at `offset`, growing the file as needed.
    ///
    /// Allocation growth walks a fallback ladder: the segment-rounded end,
    /// the exact end, then geometric halves back toward the current
    /// allocation; only when nothing fits does the call fail `Full`. If
    /// the allocator fails mid-growth, whatever length was reached is
    /// kept, its charge retained, and the write is shortened to fit.
    /// Returns the number of bytes actually written.
    pub fn write_data(&self, node_index: u64, offset: u64, src: &[u8]) -> FsResult<usize> {
        // Clamp transfers that would run past the address ceiling.
        let len = (src.len() as u64).min(u64::MAX - offset) as usize;
        if len == 0 {
            return Ok(0);
        }
        let end = offset + len as u64;

        let slots = self.store.read();
        let node = slots.node(node_index);
        let mut aux = slots.aux(node_index).write();
        let old_alloc = aux.data.len();
        let old_size = node.file_size();

        let mut reached = old_alloc;
        if end > old_alloc {
            let mut targets = vec![rounded_len(end), end];
            let mut t = end;
            loop {
                t = old_alloc + (t - old_alloc) / 2;
                if t <= old_alloc {
                    break;
                }
                targets.push(t);
            }
            let target = match self.charge_first_fit(old_alloc, &targets) {
                Some(t) => t,
                None => return Err(FsError::Full),
            };
            aux.data.set_len(target).ok();
            reached = aux.data.len();
            node.set_allocation_size(reached);
            if reached < target {
                self.store.release(target - reached);
            }
        }

        if reached <= offset {
            // Nothing beyond the offset could be allocated.
            return Err(FsError::OutOfMemory);
        }

        // A sparse write past the old end must not expose stale bytes left
        // from an earlier, larger incarnation of the file.
        if offset > old_size {
            aux.data.zero_range(old_size, offset.min(reached));
        }

        let written = ((reached - offset) as usize).min(len);
        aux.data.write(offset, &src[..written]);

        let new_size = old_size.max(offset + written as u64);
        node.set_file_size(new_size);
        trace!(node_index, offset, written, new_size, "write_data");
        Ok(written)
    }

    // =========================================================================
    // Enumeration
    // =========================================================================

    /// Whether the directory has any entries.
    pub fn has_children(&self, node_index: u64) -> bool {
        let slots = self.store.read();
        let aux = slots.aux(node_index).read();
        !aux.children.is_empty()
    }

    /// Enumerates children whose names compare strictly greater than
    /// `marker`, in sorted order, invoking `f` with each stored name and
    /// node snapshot. Enumeration stops early when `f` returns `false`.
    ///
    /// The store's shared lock is held for the duration of the call.
    pub fn read_dir<F>(&self, node_index: u64, marker: Option<&str>, mut f: F)
    where
        F: FnMut(&str, &NodeInfo) -> bool,
    {
        let slots = self.store.read();
        let aux = slots.aux(node_index).read();
        for child in aux.children.iter_from(marker, self.ignore_case) {
            let info = Self::snapshot(child.node_index, &slots);
            if !f(&child.name, &info) {
                break;
            }
        }
    }

    // =========================================================================
    // Unlink internals
    // =========================================================================

    /// Unlinks a node from its (already removed) directory entry.
    ///
    /// Directories go detached; files lose one link. Nodes that become
    /// unreachable with no open handles are queued for reclamation.
    fn unlink_locked(&self, slots: &Slots, node_index: u64, work: &mut Vec<u64>) {
        let node = slots.node(node_index);
        let unreachable = match node.state() {
            NodeState::Directory { .. } => {
                node.set_parent(DETACHED_PARENT);
                true
            }
            NodeState::File { link_count } => {
                debug_assert!(link_count > 0, "unlinking file with zero links");
                node.set_link_count(link_count - 1);
                link_count == 1
            }
            NodeState::Free { .. } => unreachable!("unlinking a free slot"),
        };
        if unreachable && node.open_count() == 0 {
            work.push(node_index);
        }
    }

    /// Frees every node on the worklist, recursively unlinking any
    /// children a freed directory still had. Runs under the shared lock.
    fn reclaim(&self, slots: &Slots, mut work: Vec<u64>) {
        while let Some(node_index) = work.pop() {
            let released;
            {
                let mut aux = slots.aux(node_index).write();
                let children = std::mem::take(&mut aux.children);
                for child in children.into_children() {
                    self.store.release(child.cost());
                    self.unlink_locked(slots, child.node_index, &mut work);
                }
                released = aux.blob_cost() + aux.data.len();
                aux.security = None;
                aux.extra_data = None;
                aux.data = SegmentedBuffer::new();
            }
            self.store.release(released + NODE_OVERHEAD);
            self.store.push_free(slots, node_index);
            trace!(node_index, released, "reclaim");
        }
    }

    // =========================================================================
    // Structural self-check
    // =========================================================================

    /// Re-walks the whole tree and asserts every structural invariant:
    /// the reachable set, the free list and the unlinked-but-open set
    /// partition the slots; directory back-pointers agree with the child
    /// indexes; child orderings are strict; and the recomputed byte usage
    /// matches `free_size` exactly.
    ///
    /// Intended for tests and debug builds; panics on violation.
    pub fn validate(&self) {
        let slots = self.store.read();
        let slot_count = slots.slot_count();
        let mut seen = vec![false; slot_count];
        let mut used = 0u64;

        self.mark_subtree(&slots, ROOT_NODE, &mut seen, &mut used);

        let free_list = self.store.free_list(&slots);
        let mut free = vec![false; slot_count];
        for idx in free_list {
            let i = idx as usize;
            assert!(!free[i], "slot {idx} appears twice on the free list");
            assert!(!seen[i], "slot {idx} is both reachable and free-listed");
            assert!(slots.node(idx).is_free(), "non-free slot {idx} on free list");
            free[i] = true;
        }

        // Unlinked-but-open nodes (and anything a detached directory still
        // holds) form the third partition. Mark all of their subtrees
        // first; only then can leftover slots be called orphans.
        for idx in 0..slot_count as u64 {
            let i = idx as usize;
            if seen[i] || free[i] {
                continue;
            }
            let node = slots.node(idx);
            if node.is_free() {
                continue;
            }
            let detached_root = match node.state() {
                NodeState::Directory { parent } => parent == DETACHED_PARENT,
                NodeState::File { link_count } => link_count == 0,
                NodeState::Free { .. } => unreachable!(),
            };
            if detached_root {
                assert!(
                    node.open_count() > 0,
                    "unreachable slot {idx} has no open handles yet was not freed"
                );
                self.mark_subtree(&slots, idx, &mut seen, &mut used);
            }
        }
        for idx in 0..slot_count {
            assert!(
                seen[idx] || free[idx],
                "slot {idx} is neither reachable, free, nor unlinked-but-open"
            );
        }

        assert_eq!(
            self.store.free_size(),
            self.store.total_size() - used,
            "free_size drifted from recomputed usage"
        );
    }

    fn mark_subtree(&self, slots: &Slots, start: u64, seen: &mut [bool], used: &mut u64) {
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            let i = idx as usize;
            assert!(!seen[i], "slot {idx} reached twice");
            seen[i] = true;

            let node = slots.node(idx);
            assert!(!node.is_free(), "free slot {idx} is linked into the tree");
            let aux = slots.aux(idx).read();
            assert_eq!(
                node.allocation_size(),
                aux.data.len(),
                "allocation mirror drifted on slot {idx}"
            );
            assert!(
                node.file_size() <= aux.data.len(),
                "file size exceeds allocation on slot {idx}"
            );
            *used += NODE_OVERHEAD + aux.blob_cost() + aux.data.len();

            let mut prev: Option<String> = None;
            for child in aux.children.iter_from(None, self.ignore_case) {
                if let Some(p) = &prev {
                    assert!(
                        crate::name::ordinal_cmp(p, &child.name, self.ignore_case)
                            == std::cmp::Ordering::Less,
                        "duplicate or misordered child {:?} under slot {idx}",
                        child.name
                    );
                }
                prev = Some(child.name.clone());

                *used += child.cost();
                let cnode = slots.node(child.node_index);
                match cnode.state() {
                    NodeState::Directory { parent } => {
                        assert!(
                            parent == idx || parent == DETACHED_PARENT,
                            "directory {} has parent {parent}, expected {idx}",
                            child.node_index
                        );
                    }
                    NodeState::File { link_count } => {
                        assert!(
                            link_count >= 1,
                            "linked file {} has zero link count",
                            child.node_index
                        );
                    }
                    NodeState::Free { .. } => {
                        panic!("child entry {:?} points at free slot", child.name)
                    }
                }
                stack.push(child.node_index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{failpoint, SEGMENT};
    use crate::children::CHILD_OVERHEAD;

    fn volume(capacity: u64) -> FileTree {
        FileTree::new(capacity, true, None).expect("volume fits root")
    }

    fn file_attrs() -> FileAttributes {
        FileAttributes::NORMAL
    }

    fn now() -> Timestamps {
        Timestamps::all(filetime_now())
    }

    #[test]
    fn test_fresh_volume_accounting() {
        let tree = volume(1 << 20);
        assert_eq!(tree.total_size(), 1 << 20);
        assert_eq!(tree.free_size(), (1 << 20) - NODE_OVERHEAD);
        assert!(!tree.has_children(ROOT_NODE));
        tree.validate();
    }

    #[test]
    fn test_root_security_charged() {
        let sd = vec![0xAB; 64];
        let tree = FileTree::new(1 << 20, true, Some(&sd)).unwrap();
        assert_eq!(tree.free_size(), (1 << 20) - NODE_OVERHEAD - 64);
        assert_eq!(tree.security(ROOT_NODE).as_deref(), Some(&sd[..]));
        tree.validate();
    }

    #[test]
    fn test_volume_too_small_for_root() {
        assert_eq!(
            FileTree::new(NODE_OVERHEAD - 1, true, None).err(),
            Some(FsError::Full)
        );
    }

    #[test]
    fn test_small_file_lifecycle() {
        // Create, write, read, close, delete; the cycle must restore the
        // budget exactly.
        let tree = volume(1 << 20);
        let baseline = tree.free_size();

        let a = tree.add(ROOT_NODE, "a", file_attrs(), 0, now()).unwrap();
        tree.open(a);
        assert_eq!(tree.write_data(a, 0, &[1, 2, 3]).unwrap(), 3);

        let mut out = [0u8; 8];
        assert_eq!(tree.read_data(a, 0, &mut out), 3);
        assert_eq!(&out[..3], &[1, 2, 3]);

        tree.close(a);
        assert!(tree.remove(ROOT_NODE, "a"));
        assert_eq!(tree.free_size(), baseline);
        tree.validate();
    }

    #[test]
    fn test_add_remove_restores_free_size() {
        let tree = volume(1 << 20);
        let baseline = tree.free_size();
        tree.add(ROOT_NODE, "node", file_attrs(), 0, now()).unwrap();
        assert!(tree.free_size() < baseline);
        assert!(tree.remove(ROOT_NODE, "node"));
        assert_eq!(tree.free_size(), baseline);
        tree.validate();
    }

    #[test]
    fn test_duplicate_add_case_insensitive() {
        let tree = volume(1 << 20);
        let foo = tree.add(ROOT_NODE, "Foo", file_attrs(), 0, now()).unwrap();
        let before = tree.free_size();

        assert_eq!(
            tree.add(ROOT_NODE, "foo", file_attrs(), 0, now()),
            Err(FsError::AlreadyExists)
        );
        assert_eq!(tree.free_size(), before);

        let found = tree.find(ROOT_NODE, "FOO").unwrap();
        assert_eq!(found.node_index, foo);
        assert_eq!(found.normalized_name.as_deref(), Some("Foo"));
        tree.validate();
    }

    #[test]
    fn test_case_sensitive_allows_case_variants() {
        let tree = FileTree::new(1 << 20, false, None).unwrap();
        let upper = tree.add(ROOT_NODE, "Foo", file_attrs(), 0, now()).unwrap();
        let lower = tree.add(ROOT_NODE, "foo", file_attrs(), 0, now()).unwrap();
        assert_ne!(upper, lower);
        let found = tree.find(ROOT_NODE, "foo").unwrap();
        assert_eq!(found.node_index, lower);
        assert_eq!(found.normalized_name, None);
        tree.validate();
    }

    #[test]
    fn test_disk_full_on_allocation_leaves_state_unchanged() {
        // Capacity exactly covers the root and one empty file.
        let capacity = 2 * NODE_OVERHEAD + CHILD_OVERHEAD + name_cost("f");
        let tree = volume(capacity);
        let f = tree.add(ROOT_NODE, "f", file_attrs(), 0, now()).unwrap();
        assert_eq!(tree.free_size(), 0);

        assert_eq!(tree.set_allocation_size(f, SEGMENT), Err(FsError::Full));
        assert_eq!(tree.free_size(), 0);
        assert_eq!(tree.allocation_size(f), 0);
        assert!(tree.find(ROOT_NODE, "f").is_some());
        tree.validate();
    }

    #[test]
    fn test_rename_in_place() {
        let tree = volume(1 << 20);
        let x = tree.add(ROOT_NODE, "x", file_attrs(), 0, now()).unwrap();
        tree.rename(ROOT_NODE, "x", ROOT_NODE, "y").unwrap();
        assert!(tree.find(ROOT_NODE, "x").is_none());
        assert_eq!(tree.find(ROOT_NODE, "y").unwrap().node_index, x);
        tree.validate();
    }

    #[test]
    fn test_rename_case_change_same_entry() {
        let tree = volume(1 << 20);
        let x = tree.add(ROOT_NODE, "readme", file_attrs(), 0, now()).unwrap();
        tree.rename(ROOT_NODE, "README", ROOT_NODE, "ReadMe").unwrap();
        let found = tree.find(ROOT_NODE, "readme").unwrap();
        assert_eq!(found.node_index, x);
        assert_eq!(found.normalized_name.as_deref(), Some("ReadMe"));
        tree.validate();
    }

    #[test]
    fn test_rename_identity_roundtrip_restores_budget() {
        let tree = volume(1 << 20);
        tree.add(ROOT_NODE, "aa", file_attrs(), 0, now()).unwrap();
        let before = tree.free_size();
        tree.rename(ROOT_NODE, "aa", ROOT_NODE, "bb").unwrap();
        tree.rename(ROOT_NODE, "bb", ROOT_NODE, "aa").unwrap();
        assert_eq!(tree.free_size(), before);
        tree.validate();
    }

    #[test]
    fn test_rename_over_open_file_defers_free() {
        let tree = volume(1 << 20);
        let x = tree.add(ROOT_NODE, "x", file_attrs(), 0, now()).unwrap();
        let y = tree.add(ROOT_NODE, "y", file_attrs(), 0, now()).unwrap();
        tree.write_data(y, 0, b"victim").unwrap();
        tree.open(y);
        let before_close = tree.free_size();

        tree.rename(ROOT_NODE, "x", ROOT_NODE, "y").unwrap();

        // The surviving name resolves to the former "x" node.
        assert_eq!(tree.find(ROOT_NODE, "y").unwrap().node_index, x);
        assert!(tree.find(ROOT_NODE, "x").is_none());

        // The superseded node is unreachable but alive; its content is
        // still readable through the open handle.
        let info = tree.get(y);
        assert_eq!(info.state, NodeState::File { link_count: 0 });
        let mut out = [0u8; 6];
        assert_eq!(tree.read_data(y, 0, &mut out), 6);
        assert_eq!(&out, b"victim");
        tree.validate();

        // Last close frees it and returns its bytes.
        tree.close(y);
        assert!(tree.free_size() > before_close);
        tree.validate();
    }

    #[test]
    fn test_rename_cross_parent_fixes_back_pointer() {
        let tree = volume(1 << 20);
        let dir_a = tree
            .add(ROOT_NODE, "a", FileAttributes::DIRECTORY, 0, now())
            .unwrap();
        let dir_b = tree
            .add(ROOT_NODE, "b", FileAttributes::DIRECTORY, 0, now())
            .unwrap();
        let sub = tree
            .add(dir_a, "sub", FileAttributes::DIRECTORY, 0, now())
            .unwrap();

        tree.rename(dir_a, "sub", dir_b, "moved").unwrap();

        assert!(tree.find(dir_a, "sub").is_none());
        assert_eq!(tree.find(dir_b, "moved").unwrap().node_index, sub);
        assert_eq!(tree.get(sub).state, NodeState::Directory { parent: dir_b });
        tree.validate();
    }

    #[test]
    fn test_remove_open_directory_detaches() {
        let tree = volume(1 << 20);
        let d = tree
            .add(ROOT_NODE, "d", FileAttributes::DIRECTORY, 0, now())
            .unwrap();
        tree.open(d);
        assert!(tree.remove(ROOT_NODE, "d"));

        assert_eq!(
            tree.get(d).state,
            NodeState::Directory {
                parent: DETACHED_PARENT
            }
        );
        tree.validate();

        let baseline = (1u64 << 20) - NODE_OVERHEAD;
        tree.close(d);
        assert_eq!(tree.free_size(), baseline);
        tree.validate();
    }

    #[test]
    fn test_remove_children_bulk() {
        let tree = volume(1 << 20);
        let baseline = tree.free_size();
        let d = tree
            .add(ROOT_NODE, "dir", FileAttributes::DIRECTORY, 0, now())
            .unwrap();
        for i in 0..20 {
            let f = tree
                .add(d, &format!("f{i}"), file_attrs(), 0, now())
                .unwrap();
            tree.write_data(f, 0, &[i as u8; 32]).unwrap();
        }
        assert!(tree.has_children(d));

        tree.remove_children(d);
        assert!(!tree.has_children(d));
        tree.validate();

        assert!(tree.remove(ROOT_NODE, "dir"));
        assert_eq!(tree.free_size(), baseline);
        tree.validate();
    }

    #[test]
    fn test_removing_directory_with_children_reclaims_subtree() {
        // The engine does not require emptiness; freeing a directory
        // recursively unlinks whatever it still holds.
        let tree = volume(1 << 20);
        let baseline = tree.free_size();
        let d = tree
            .add(ROOT_NODE, "dir", FileAttributes::DIRECTORY, 0, now())
            .unwrap();
        let f = tree.add(d, "leaf", file_attrs(), 0, now()).unwrap();
        tree.write_data(f, 0, &[7; 100]).unwrap();

        assert!(tree.remove(ROOT_NODE, "dir"));
        assert_eq!(tree.free_size(), baseline);
        tree.validate();
    }

    #[test]
    fn test_set_file_size_grow_and_shrink() {
        let tree = volume(4 << 20);
        let f = tree.add(ROOT_NODE, "f", file_attrs(), 0, now()).unwrap();

        tree.set_file_size(f, 1000).unwrap();
        let info = tree.get(f);
        assert_eq!(info.file_size, 1000);
        assert_eq!(info.allocation_size, SEGMENT);

        // Shrinking the file does not shrink the allocation.
        tree.set_file_size(f, 10).unwrap();
        let info = tree.get(f);
        assert_eq!(info.file_size, 10);
        assert_eq!(info.allocation_size, SEGMENT);
        tree.validate();
    }

    #[test]
    fn test_file_size_regrow_reads_zero() {
        let tree = volume(4 << 20);
        let f = tree.add(ROOT_NODE, "f", file_attrs(), 0, now()).unwrap();
        tree.write_data(f, 0, &[0xFF; 64]).unwrap();
        tree.set_file_size(f, 8).unwrap();
        tree.set_file_size(f, 64).unwrap();

        let mut out = [0xAAu8; 64];
        assert_eq!(tree.read_data(f, 0, &mut out), 64);
        assert_eq!(&out[..8], &[0xFF; 8]);
        assert_eq!(&out[8..], &[0u8; 56]);
        tree.validate();
    }

    #[test]
    fn test_set_allocation_size_shrink_clamps_file_size() {
        let tree = volume(4 << 20);
        let f = tree.add(ROOT_NODE, "f", file_attrs(), 0, now()).unwrap();
        tree.write_data(f, 0, &[1; 500]).unwrap();
        tree.set_allocation_size(f, 100).unwrap();
        let info = tree.get(f);
        assert_eq!(info.allocation_size, 100);
        assert_eq!(info.file_size, 100);
        tree.validate();
    }

    #[test]
    fn test_set_allocation_size_idempotent() {
        let tree = volume(4 << 20);
        let f = tree.add(ROOT_NODE, "f", file_attrs(), 0, now()).unwrap();
        tree.set_allocation_size(f, 4096).unwrap();
        let free_after_first = tree.free_size();
        tree.set_allocation_size(f, 4096).unwrap();
        assert_eq!(tree.free_size(), free_after_first);
        tree.validate();
    }

    #[test]
    fn test_read_past_eof_returns_zero() {
        let tree = volume(1 << 20);
        let f = tree.add(ROOT_NODE, "f", file_attrs(), 0, now()).unwrap();
        tree.write_data(f, 0, &[1; 10]).unwrap();
        let mut out = [0u8; 4];
        assert_eq!(tree.read_data(f, 10, &mut out), 0);
        assert_eq!(tree.read_data(f, 11, &mut out), 0);
        assert_eq!(tree.read_data(f, 8, &mut out), 2);
    }

    #[test]
    fn test_write_at_address_ceiling_clamps_to_nothing() {
        let tree = volume(1 << 20);
        let f = tree.add(ROOT_NODE, "f", file_attrs(), 0, now()).unwrap();
        assert_eq!(tree.write_data(f, u64::MAX, &[1, 2, 3]).unwrap(), 0);
        assert_eq!(tree.get(f).file_size, 0);
    }

    #[test]
    fn test_write_partial_oom_keeps_first_segment() {
        // The allocator grants the first segment of a two-segment growth
        // and refuses the second: the write is shortened, the file size
        // reflects reality, and exactly one segment stays charged.
        let tree = volume(8 << 20);
        let f = tree.add(ROOT_NODE, "f", file_attrs(), 0, now()).unwrap();
        let before = tree.free_size();

        let payload = vec![0x42u8; (2 * SEGMENT - 100) as usize];
        failpoint::fail_after(1);
        let written = tree.write_data(f, 100, &payload);
        failpoint::reset();

        assert_eq!(written.unwrap(), (SEGMENT - 100) as usize);
        let info = tree.get(f);
        assert_eq!(info.file_size, SEGMENT);
        assert_eq!(info.allocation_size, SEGMENT);
        assert_eq!(tree.free_size(), before - SEGMENT);
        tree.validate();

        // The short prefix is intact and the sparse gap reads zero.
        let mut out = vec![0u8; 100];
        assert_eq!(tree.read_data(f, 0, &mut out), 100);
        assert_eq!(out, vec![0u8; 100]);
        let mut tailbyte = [0u8; 1];
        assert_eq!(tree.read_data(f, SEGMENT - 1, &mut tailbyte), 1);
        assert_eq!(tailbyte[0], 0x42);
    }

    #[test]
    fn test_write_ladder_falls_back_to_exact_size() {
        // Budget fits the exact request but not the segment-rounded one.
        let want = 1000u64;
        let capacity = 2 * NODE_OVERHEAD + CHILD_OVERHEAD + name_cost("f") + want;
        let tree = volume(capacity);
        let f = tree.add(ROOT_NODE, "f", file_attrs(), 0, now()).unwrap();

        assert_eq!(tree.write_data(f, 0, &vec![9u8; want as usize]).unwrap(), 1000);
        let info = tree.get(f);
        assert_eq!(info.file_size, 1000);
        assert_eq!(info.allocation_size, 1000);
        assert_eq!(tree.free_size(), 0);
        tree.validate();
    }

    #[test]
    fn test_write_ladder_geometric_fallback_short_write() {
        // Not even the exact size fits; the ladder halves back toward the
        // current allocation and the write comes up short.
        let slack = 4096u64;
        let capacity = 2 * NODE_OVERHEAD + CHILD_OVERHEAD + name_cost("f") + slack;
        let tree = volume(capacity);
        let f = tree.add(ROOT_NODE, "f", file_attrs(), 0, now()).unwrap();

        let written = tree.write_data(f, 0, &vec![1u8; 10_000]).unwrap();
        assert!(written > 0 && written <= slack as usize, "wrote {written}");
        let info = tree.get(f);
        assert_eq!(info.file_size, written as u64);
        assert!(info.allocation_size <= slack);
        tree.validate();
    }

    #[test]
    fn test_write_full_when_no_budget_at_all() {
        let capacity = 2 * NODE_OVERHEAD + CHILD_OVERHEAD + name_cost("f");
        let tree = volume(capacity);
        let f = tree.add(ROOT_NODE, "f", file_attrs(), 0, now()).unwrap();
        assert_eq!(tree.write_data(f, 0, &[1]), Err(FsError::Full));
        assert_eq!(tree.get(f).file_size, 0);
        tree.validate();
    }

    #[test]
    fn test_security_blob_roundtrip_and_accounting() {
        let tree = volume(1 << 20);
        let f = tree.add(ROOT_NODE, "f", file_attrs(), 0, now()).unwrap();
        let before = tree.free_size();

        tree.set_security(f, Some(&[1, 2, 3, 4])).unwrap();
        assert_eq!(tree.free_size(), before - 4);
        assert_eq!(tree.security(f).as_deref(), Some(&[1, 2, 3, 4][..]));

        tree.set_security(f, Some(&[9, 9])).unwrap();
        assert_eq!(tree.free_size(), before - 2);

        tree.set_security(f, None).unwrap();
        assert_eq!(tree.free_size(), before);
        assert_eq!(tree.security(f), None);
        tree.validate();
    }

    #[test]
    fn test_modify_security_delegate() {
        let tree = volume(1 << 20);
        let f = tree.add(ROOT_NODE, "f", file_attrs(), 0, now()).unwrap();
        tree.set_security(f, Some(b"base")).unwrap();

        let old_len = tree
            .modify_security(f, 0xEE_u8, |blob, fill| {
                let old = blob.as_ref().map_or(0, Vec::len);
                *blob = Some(vec![fill; 8]);
                old
            })
            .unwrap();

        assert_eq!(old_len, 4);
        assert_eq!(tree.security(f).as_deref(), Some(&[0xEE; 8][..]));
        tree.validate();
    }

    #[test]
    fn test_modify_security_full_leaves_blob_untouched() {
        let capacity = 2 * NODE_OVERHEAD + CHILD_OVERHEAD + name_cost("f") + 4;
        let tree = volume(capacity);
        let f = tree.add(ROOT_NODE, "f", file_attrs(), 0, now()).unwrap();
        tree.set_security(f, Some(&[7; 4])).unwrap();

        let res = tree.modify_security(f, (), |blob, ()| {
            *blob = Some(vec![1; 64]);
        });
        assert_eq!(res, Err(FsError::Full));
        assert_eq!(tree.security(f).as_deref(), Some(&[7; 4][..]));
        tree.validate();
    }

    #[test]
    fn test_extra_data_carries_reparse_payload() {
        let tree = volume(1 << 20);
        let f = tree
            .add(
                ROOT_NODE,
                "link",
                FileAttributes::REPARSE_POINT,
                0xA000_000C,
                now(),
            )
            .unwrap();
        tree.set_extra_data(f, Some(b"\\target\\path")).unwrap();

        let info = tree.get(f);
        assert!(info.attributes.is_reparse_point());
        assert_eq!(info.reparse_tag, 0xA000_000C);
        assert_eq!(tree.extra_data(f).as_deref(), Some(&b"\\target\\path"[..]));
        tree.validate();
    }

    #[test]
    fn test_reset_and_get_preserves_links() {
        let tree = volume(1 << 20);
        let f = tree.add(ROOT_NODE, "f", file_attrs(), 0, now()).unwrap();
        tree.write_data(f, 0, &[1; 128]).unwrap();

        let info = tree.reset_and_get(f, FileAttributes::ARCHIVE, 0, Timestamps::all(42));
        assert_eq!(info.file_size, 0);
        assert_eq!(info.times, Timestamps::all(42));
        assert_eq!(info.attributes, FileAttributes::ARCHIVE);
        assert_eq!(info.state, NodeState::File { link_count: 1 });
        tree.validate();
    }

    #[test]
    fn test_set_attributes_keeps_directory_bit() {
        let tree = volume(1 << 20);
        let d = tree
            .add(ROOT_NODE, "d", FileAttributes::DIRECTORY, 0, now())
            .unwrap();
        tree.set_attributes(d, FileAttributes::HIDDEN, 0);
        let attrs = tree.get(d).attributes;
        assert!(attrs.is_directory());
        assert!(attrs.contains(FileAttributes::HIDDEN));
    }

    #[test]
    fn test_set_times_partial_update() {
        let tree = volume(1 << 20);
        let f = tree.add(ROOT_NODE, "f", file_attrs(), 0, Timestamps::all(100)).unwrap();
        tree.set_times_and_attributes(
            f,
            None,
            0,
            TimesUpdate {
                last_write: Some(555),
                ..TimesUpdate::default()
            },
        );
        let t = tree.get(f).times;
        assert_eq!(t.creation, 100);
        assert_eq!(t.last_access, 100);
        assert_eq!(t.last_write, 555);
        assert_eq!(t.change, 100);
    }

    #[test]
    fn test_read_dir_sorted_with_marker() {
        let tree = volume(1 << 20);
        for name in ["delta", "alpha", "echo", "bravo", "charlie"] {
            tree.add(ROOT_NODE, name, file_attrs(), 0, now()).unwrap();
        }

        let mut all = Vec::new();
        tree.read_dir(ROOT_NODE, None, |name, _| {
            all.push(name.to_string());
            true
        });
        assert_eq!(all, ["alpha", "bravo", "charlie", "delta", "echo"]);

        let mut after = Vec::new();
        tree.read_dir(ROOT_NODE, Some("bravo"), |name, _| {
            after.push(name.to_string());
            true
        });
        assert_eq!(after, ["charlie", "delta", "echo"]);

        let mut first_two = Vec::new();
        tree.read_dir(ROOT_NODE, None, |name, _| {
            first_two.push(name.to_string());
            first_two.len() < 2
        });
        assert_eq!(first_two, ["alpha", "bravo"]);
    }

    #[test]
    fn test_concurrent_lifecycles_restore_budget() {
        use std::sync::Arc;
        use std::thread;

        let tree = Arc::new(volume(16 << 20));
        let baseline = tree.free_size();

        let mut handles = vec![];
        for t in 0..4 {
            let tree = Arc::clone(&tree);
            handles.push(thread::spawn(move || {
                for i in 0..50 {
                    let name = format!("t{t}_{i}");
                    let f = tree
                        .add(ROOT_NODE, &name, FileAttributes::NORMAL, 0, Timestamps::all(1))
                        .unwrap();
                    tree.open(f);
                    tree.write_data(f, 0, &[t as u8; 256]).unwrap();
                    let mut out = [0u8; 256];
                    assert_eq!(tree.read_data(f, 0, &mut out), 256);
                    assert_eq!(out, [t as u8; 256]);
                    tree.close(f);
                    assert!(tree.remove(ROOT_NODE, &name));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(tree.free_size(), baseline);
        tree.validate();
    }
}
