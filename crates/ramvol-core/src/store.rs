//! Node slot storage and the volume byte budget.
//!
//! Two parallel dense arrays hold every node: the fixed [`Node`] records and
//! their [`NodeAux`] companions. Both are guarded by one reader-writer lock,
//! the store lock. Shared mode covers everything that leaves the arrays in
//! place; exclusive mode is taken only to extend both arrays by one slot
//! when the free list is empty. Creation paths hold the lock in upgradeable
//! mode so they can take the exclusive upgrade for just the grow step.
//!
//! Freed slots form a LIFO list threaded through the free nodes' union
//! word, with an atomic head. Pops only happen on the creation path, which
//! parking_lot serializes through the single upgradeable guard, so the head
//! CAS races only with pushes and cannot see a stale successor.
//!
//! The byte budget is one atomic counter, `free_size`. Fallible operations
//! pre-charge with a CAS loop that refuses to underflow (failing cleanly
//! with [`FsError::Full`]) and release exactly what they charged on any
//! rollback path.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{
    RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard,
};

use crate::error::{FsError, FsResult};
use crate::node::{Node, NodeAux, FREE_LIST_END, NODE_OVERHEAD, ROOT_NODE};

/// The two parallel slot arrays, accessed through the store lock.
#[derive(Debug, Default)]
pub(crate) struct Slots {
    pub(crate) nodes: Vec<Node>,
    pub(crate) aux: Vec<RwLock<NodeAux>>,
}

impl Slots {
    /// Fixed record for `idx`.
    pub(crate) fn node(&self, idx: u64) -> &Node {
        &self.nodes[idx as usize]
    }

    /// Auxiliary record for `idx`.
    pub(crate) fn aux(&self, idx: u64) -> &RwLock<NodeAux> {
        &self.aux[idx as usize]
    }

    /// Total slots ever allocated (live + free-listed).
    pub(crate) fn slot_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Owner of all node slots and the byte budget.
#[derive(Debug)]
pub(crate) struct NodeStore {
    slots: RwLock<Slots>,
    free_head: AtomicU64,
    free_size: AtomicU64,
    total_size: u64,
}

impl NodeStore {
    pub(crate) fn new(total_size: u64) -> Self {
        Self {
            slots: RwLock::new(Slots::default()),
            free_head: AtomicU64::new(FREE_LIST_END),
            free_size: AtomicU64::new(total_size),
            total_size,
        }
    }

    /// Acquires the store lock in shared mode.
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Slots> {
        self.slots.read()
    }

    /// Acquires the store lock in upgradeable-shared mode (creation paths).
    pub(crate) fn upgradable(&self) -> RwLockUpgradableReadGuard<'_, Slots> {
        self.slots.upgradable_read()
    }

    /// Volume capacity in bytes.
    pub(crate) fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Remaining byte budget.
    pub(crate) fn free_size(&self) -> u64 {
        self.free_size.load(Ordering::Relaxed)
    }

    /// Atomically reserves `cost` bytes of budget.
    ///
    /// Fails with [`FsError::Full`] without underflowing when the budget
    /// cannot cover the charge.
    pub(crate) fn charge(&self, cost: u64) -> FsResult<()> {
        let mut free = self.free_size.load(Ordering::Relaxed);
        loop {
            if free < cost {
                return Err(FsError::Full);
            }
            match self.free_size.compare_exchange_weak(
                free,
                free - cost,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(f) => free = f,
            }
        }
    }

    /// Returns `cost` bytes to the budget.
    pub(crate) fn release(&self, cost: u64) {
        let old = self.free_size.fetch_add(cost, Ordering::Relaxed);
        debug_assert!(
            old + cost <= self.total_size,
            "budget release overflows capacity: {old} + {cost} > {}",
            self.total_size
        );
    }

    /// Allocates a slot, charging [`NODE_OVERHEAD`].
    ///
    /// The returned slot's record is stale; the caller must activate it
    /// immediately. The upgradeable guard is consumed and returned so the
    /// grow step can briefly upgrade to exclusive mode.
    pub(crate) fn allocate<'a>(
        &'a self,
        guard: RwLockUpgradableReadGuard<'a, Slots>,
    ) -> (FsResult<u64>, RwLockUpgradableReadGuard<'a, Slots>) {
        if let Err(e) = self.charge(NODE_OVERHEAD) {
            return (Err(e), guard);
        }

        // Fast path: pop the free list. Only creation paths pop, and they
        // are serialized by the upgradeable guard; pushes may interleave.
        let mut head = self.free_head.load(Ordering::Acquire);
        while head != FREE_LIST_END {
            let next = guard.node(head).next_free();
            match self.free_head.compare_exchange_weak(
                head,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return (Ok(head), guard),
                Err(h) => head = h,
            }
        }

        // Free list empty: extend both arrays by one slot under the
        // exclusive lock, then drop back to upgradeable.
        let mut write = RwLockUpgradableReadGuard::upgrade(guard);
        if write.nodes.try_reserve(1).is_err() || write.aux.try_reserve(1).is_err() {
            self.release(NODE_OVERHEAD);
            let guard = RwLockWriteGuard::downgrade_to_upgradable(write);
            return (Err(FsError::OutOfMemory), guard);
        }
        write.nodes.push(Node::default());
        write.aux.push(RwLock::new(NodeAux::default()));
        let idx = write.nodes.len() as u64 - 1;
        let guard = RwLockWriteGuard::downgrade_to_upgradable(write);
        (Ok(idx), guard)
    }

    /// Extends the arrays by one slot for the root node.
    ///
    /// Only used by the volume constructor, before the store is shared.
    pub(crate) fn grow_root_slot(&self) -> FsResult<u64> {
        self.charge(NODE_OVERHEAD)?;
        let mut write = self.slots.write();
        debug_assert_eq!(write.slot_count(), 0);
        if write.nodes.try_reserve(1).is_err() || write.aux.try_reserve(1).is_err() {
            self.release(NODE_OVERHEAD);
            return Err(FsError::OutOfMemory);
        }
        write.nodes.push(Node::default());
        write.aux.push(RwLock::new(NodeAux::default()));
        Ok(ROOT_NODE)
    }

    /// Zeroes a slot's record and pushes it onto the free list.
    ///
    /// The caller has already released every byte the node was charged for
    /// and detached it from the tree. Runs under the shared lock.
    pub(crate) fn push_free(&self, slots: &Slots, idx: u64) {
        debug_assert_ne!(idx, ROOT_NODE, "root slot can never be freed");
        let node = slots.node(idx);
        debug_assert_eq!(node.open_count(), 0, "freeing a node with open handles");
        node.clear();

        let mut head = self.free_head.load(Ordering::Relaxed);
        loop {
            node.set_next_free(head);
            match self.free_head.compare_exchange_weak(
                head,
                idx,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(h) => head = h,
            }
        }
    }

    /// Walks the free list, returning the slot indices on it.
    ///
    /// Used by the structural validator; runs under the shared lock.
    pub(crate) fn free_list(&self, slots: &Slots) -> Vec<u64> {
        let mut out = Vec::new();
        let mut head = self.free_head.load(Ordering::Acquire);
        while head != FREE_LIST_END {
            out.push(head);
            head = slots.node(head).next_free();
        }
        out
    }
}
