//! Per-directory ordered child index.
//!
//! Children are stored in a segmented array of fixed-capacity teeth. Each
//! tooth is kept sorted under the volume's name comparator, but teeth are
//! not ordered relative to one another: every tooth is an independent sorted
//! run. Adding a child only ever touches the tail tooth (a bounded shift),
//! so a directory that has grown across many teeth never pays an O(N)
//! relocation for one insert. Ordered enumeration is a k-way merge across
//! the teeth.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{FsError, FsResult};
use crate::name::{name_cost, ordinal_cmp};

/// Fixed tooth capacity (2^7 entries).
pub const TOOTH: usize = 1 << 7;

/// One directory entry: a name bound to a node index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Child {
    /// Stored (canonical-case) name.
    pub name: String,
    /// Index of the node this entry links.
    pub node_index: u64,
}

impl Child {
    /// Bytes charged against the volume budget for this entry.
    pub fn cost(&self) -> u64 {
        CHILD_OVERHEAD + name_cost(&self.name)
    }
}

/// Fixed per-entry overhead charged in addition to the name bytes.
pub const CHILD_OVERHEAD: u64 = std::mem::size_of::<Child>() as u64;

/// Position of a child inside the index: (tooth, slot within tooth).
pub type ChildPos = (usize, usize);

/// Segmented ordered set of directory entries.
#[derive(Debug, Default)]
pub struct ChildIndex {
    teeth: Vec<Vec<Child>>,
}

impl ChildIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        match self.teeth.split_last() {
            None => 0,
            Some((tail, full)) => full.len() * TOOTH + tail.len(),
        }
    }

    /// Whether the directory has no entries.
    pub fn is_empty(&self) -> bool {
        self.teeth.is_empty()
    }

    /// Looks up a child by name under the given case policy.
    pub fn find(&self, name: &str, ignore_case: bool) -> Option<&Child> {
        self.position(name, ignore_case)
            .map(|(t, s)| &self.teeth[t][s])
    }

    /// Locates a child by name, returning its (tooth, slot) position.
    ///
    /// Every tooth is binary-searched independently; names are unique under
    /// the configured comparator, so the first hit is the only hit.
    pub fn position(&self, name: &str, ignore_case: bool) -> Option<ChildPos> {
        for (t, tooth) in self.teeth.iter().enumerate() {
            if let Ok(s) =
                tooth.binary_search_by(|c| ordinal_cmp(&c.name, name, ignore_case))
            {
                return Some((t, s));
            }
        }
        None
    }

    /// Returns the child at a position previously returned by
    /// [`position`](Self::position).
    pub fn at(&self, pos: ChildPos) -> &Child {
        &self.teeth[pos.0][pos.1]
    }

    /// Inserts a child, keeping only the tail tooth's internal order.
    ///
    /// The caller has already verified the name is absent and charged the
    /// entry's byte cost.
    pub fn add(&mut self, child: Child, ignore_case: bool) -> FsResult<()> {
        let needs_tooth = self.teeth.last().is_none_or(|t| t.len() == TOOTH);
        if needs_tooth {
            if self.teeth.try_reserve(1).is_err() {
                return Err(FsError::OutOfMemory);
            }
            self.teeth.push(Vec::new());
        }
        let tail = self.teeth.last_mut().expect("tail exists");
        if tail.try_reserve_exact(1).is_err() {
            if tail.is_empty() {
                self.teeth.pop();
            }
            return Err(FsError::OutOfMemory);
        }
        let slot = tail
            .binary_search_by(|c| ordinal_cmp(&c.name, &child.name, ignore_case))
            .unwrap_err();
        tail.insert(slot, child);
        Ok(())
    }

    /// Removes the child at `pos`, filling the hole with the last entry.
    ///
    /// The replacement is re-sifted within the hole's tooth so the tooth
    /// stays sorted. Tail-tooth slack beyond one slot is released.
    pub fn remove_at(&mut self, pos: ChildPos, ignore_case: bool) -> Child {
        let (t, s) = pos;
        let last = {
            let tail = self.teeth.last_mut().expect("index not empty");
            tail.pop().expect("tail tooth not empty")
        };
        if self.teeth.last().is_some_and(Vec::is_empty) {
            self.teeth.pop();
        }

        let removed = if t < self.teeth.len() && s < self.teeth[t].len() {
            let removed = std::mem::replace(&mut self.teeth[t][s], last);
            self.sift(t, s, ignore_case);
            removed
        } else {
            // The popped entry was the target itself.
            last
        };

        if let Some(tail) = self.teeth.last_mut() {
            if tail.capacity() > tail.len() + 1 {
                tail.shrink_to_fit();
            }
        }
        self.teeth.shrink_to_fit();
        removed
    }

    /// Repoints the child at `pos` to a different node, keeping its name.
    ///
    /// Used by rename-with-replace: the surviving entry keeps its stored
    /// spelling but now maps to the renamed node.
    pub fn set_node_at(&mut self, pos: ChildPos, node_index: u64) {
        self.teeth[pos.0][pos.1].node_index = node_index;
    }

    /// Renames the child at `pos` in place and restores its tooth's order.
    ///
    /// Returns the old name. The caller has already settled the byte-cost
    /// difference between the two names.
    pub fn rename_at(
        &mut self,
        pos: ChildPos,
        new_name: String,
        ignore_case: bool,
    ) -> String {
        let old = std::mem::replace(&mut self.teeth[pos.0][pos.1].name, new_name);
        self.sift(pos.0, pos.1, ignore_case);
        old
    }

    /// Re-sorts the entry at `(t, s)` within its own tooth.
    fn sift(&mut self, t: usize, s: usize, ignore_case: bool) {
        let tooth = &mut self.teeth[t];
        let child = tooth.remove(s);
        let slot = tooth
            .binary_search_by(|c| ordinal_cmp(&c.name, &child.name, ignore_case))
            .unwrap_err();
        tooth.insert(slot, child);
    }

    /// Yields children in storage order.
    pub fn iter_unordered(&self) -> impl Iterator<Item = &Child> {
        self.teeth.iter().flatten()
    }

    /// Consumes the index, yielding every entry (used when a directory's
    /// remaining children are bulk-unlinked).
    pub fn into_children(self) -> impl Iterator<Item = Child> {
        self.teeth.into_iter().flatten()
    }

    /// Yields children whose names compare strictly greater than `marker`,
    /// in sorted order, by merging the per-tooth sorted runs.
    ///
    /// With no marker, enumeration starts from the smallest name.
    pub fn iter_from<'a>(
        &'a self,
        marker: Option<&str>,
        ignore_case: bool,
    ) -> OrderedChildren<'a> {
        let mut heap = BinaryHeap::with_capacity(self.teeth.len());
        for (t, tooth) in self.teeth.iter().enumerate() {
            let start = match marker {
                None => 0,
                Some(m) => tooth
                    .partition_point(|c| ordinal_cmp(&c.name, m, ignore_case) != Ordering::Greater),
            };
            if start < tooth.len() {
                heap.push(HeapItem {
                    child: &tooth[start],
                    tooth: t,
                    slot: start,
                    ignore_case,
                });
            }
        }
        OrderedChildren { index: self, heap }
    }
}

/// Ordered enumeration state: a min-heap with one cursor per non-exhausted
/// tooth. Exhausted teeth simply leave the heap.
pub struct OrderedChildren<'a> {
    index: &'a ChildIndex,
    heap: BinaryHeap<HeapItem<'a>>,
}

impl<'a> Iterator for OrderedChildren<'a> {
    type Item = &'a Child;

    fn next(&mut self) -> Option<Self::Item> {
        let top = self.heap.pop()?;
        let tooth = &self.index.teeth[top.tooth];
        let next = top.slot + 1;
        if next < tooth.len() {
            self.heap.push(HeapItem {
                child: &tooth[next],
                tooth: top.tooth,
                slot: next,
                ignore_case: top.ignore_case,
            });
        }
        Some(top.child)
    }
}

struct HeapItem<'a> {
    child: &'a Child,
    tooth: usize,
    slot: usize,
    ignore_case: bool,
}

impl Ord for HeapItem<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the smallest name surfaces.
        ordinal_cmp(&other.child.name, &self.child.name, self.ignore_case)
            .then_with(|| other.tooth.cmp(&self.tooth))
    }
}

impl PartialOrd for HeapItem<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapItem<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapItem<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_of(names: &[&str], ignore_case: bool) -> ChildIndex {
        let mut idx = ChildIndex::new();
        for (i, name) in names.iter().enumerate() {
            idx.add(
                Child {
                    name: (*name).to_string(),
                    node_index: i as u64 + 1,
                },
                ignore_case,
            )
            .unwrap();
        }
        idx
    }

    #[test]
    fn test_find_on_empty_index() {
        let idx = ChildIndex::new();
        assert!(idx.find("anything", false).is_none());
        assert!(idx.is_empty());
        assert_eq!(idx.len(), 0);
    }

    #[test]
    fn test_add_then_find() {
        let idx = index_of(&["beta", "alpha", "gamma"], false);
        assert_eq!(idx.len(), 3);
        assert_eq!(idx.find("alpha", false).unwrap().node_index, 2);
        assert_eq!(idx.find("beta", false).unwrap().node_index, 1);
        assert!(idx.find("delta", false).is_none());
    }

    #[test]
    fn test_find_ignore_case_returns_stored_spelling() {
        let idx = index_of(&["ReadMe.txt"], true);
        let child = idx.find("README.TXT", true).unwrap();
        assert_eq!(child.name, "ReadMe.txt");
        assert!(idx.find("README.TXT", false).is_none());
    }

    #[test]
    fn test_remove_swaps_last_into_hole() {
        let mut idx = index_of(&["a", "b", "c", "d"], false);
        let pos = idx.position("b", false).unwrap();
        let removed = idx.remove_at(pos, false);
        assert_eq!(removed.name, "b");
        assert_eq!(idx.len(), 3);
        assert!(idx.find("b", false).is_none());
        for n in ["a", "c", "d"] {
            assert!(idx.find(n, false).is_some(), "{n} lost after remove");
        }
    }

    #[test]
    fn test_remove_last_entry() {
        let mut idx = index_of(&["only"], false);
        let pos = idx.position("only", false).unwrap();
        idx.remove_at(pos, false);
        assert!(idx.is_empty());
    }

    #[test]
    fn test_rename_in_place_resorts_tooth() {
        let mut idx = index_of(&["aaa", "mmm", "zzz"], false);
        let pos = idx.position("mmm", false).unwrap();
        let old = idx.rename_at(pos, "zzzz".to_string(), false);
        assert_eq!(old, "mmm");
        assert!(idx.find("mmm", false).is_none());
        assert_eq!(idx.find("zzzz", false).unwrap().node_index, 2);

        let ordered: Vec<_> = idx.iter_from(None, false).map(|c| c.name.clone()).collect();
        assert_eq!(ordered, ["aaa", "zzz", "zzzz"]);
    }

    #[test]
    fn test_growth_across_teeth() {
        let names: Vec<String> = (0..TOOTH * 3 + 5).map(|i| format!("f{i:05}")).collect();
        let mut idx = ChildIndex::new();
        for (i, n) in names.iter().enumerate() {
            idx.add(
                Child {
                    name: n.clone(),
                    node_index: i as u64,
                },
                false,
            )
            .unwrap();
        }
        assert_eq!(idx.len(), names.len());
        for n in &names {
            assert!(idx.find(n, false).is_some());
        }
    }

    #[test]
    fn test_iter_from_none_is_fully_sorted() {
        let idx = index_of(&["pear", "apple", "plum", "fig", "date"], false);
        let got: Vec<_> = idx.iter_from(None, false).map(|c| c.name.as_str()).collect();
        assert_eq!(got, ["apple", "date", "fig", "pear", "plum"]);
    }

    #[test]
    fn test_iter_from_marker_is_strictly_greater() {
        let idx = index_of(&["a", "b", "c", "d"], false);
        let got: Vec<_> = idx
            .iter_from(Some("b"), false)
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(got, ["c", "d"]);

        // A marker between entries also works.
        let got: Vec<_> = idx
            .iter_from(Some("bb"), false)
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(got, ["c", "d"]);
    }

    #[test]
    fn test_iter_from_marker_past_end_is_empty() {
        let idx = index_of(&["a", "b"], false);
        assert_eq!(idx.iter_from(Some("z"), false).count(), 0);
    }

    #[test]
    fn test_iter_from_merges_across_many_teeth() {
        // Enough entries for several teeth, inserted in an order that
        // scatters sorted neighbors across different teeth.
        let mut names: Vec<String> = (0..TOOTH * 4).map(|i| format!("n{i:05}")).collect();
        let mut idx = ChildIndex::new();
        // Interleave: reverse order stresses the merge.
        names.reverse();
        for (i, n) in names.iter().enumerate() {
            idx.add(
                Child {
                    name: n.clone(),
                    node_index: i as u64,
                },
                false,
            )
            .unwrap();
        }
        names.sort();

        let got: Vec<_> = idx.iter_from(None, false).map(|c| c.name.clone()).collect();
        assert_eq!(got, names);

        let marker = &names[names.len() / 2];
        let got: Vec<_> = idx
            .iter_from(Some(marker), false)
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(got, &names[names.len() / 2 + 1..]);
    }

    #[test]
    fn test_iter_unordered_visits_everything_once() {
        let idx = index_of(&["x", "y", "z"], false);
        let mut seen: Vec<_> = idx.iter_unordered().map(|c| c.name.as_str()).collect();
        seen.sort_unstable();
        assert_eq!(seen, ["x", "y", "z"]);
    }

    #[test]
    fn test_case_insensitive_marker() {
        let idx = index_of(&["Alpha", "beta", "Gamma"], true);
        let got: Vec<_> = idx
            .iter_from(Some("ALPHA"), true)
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(got, ["beta", "Gamma"]);
    }

    #[test]
    fn test_child_cost_scales_with_name() {
        let short = Child {
            name: "a".into(),
            node_index: 1,
        };
        let long = Child {
            name: "abcd".into(),
            node_index: 1,
        };
        assert_eq!(long.cost() - short.cost(), 6);
    }
}
