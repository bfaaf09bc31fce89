//! Segmented byte storage for file contents.
//!
//! File data is stored as a comb of fixed-size segments rather than one
//! contiguous allocation. Content at or below [`SEGMENT`] bytes lives in a
//! single buffer; larger content is split into full 1 MiB segments with a
//! trailing partial segment. This bounds the cost of any individual
//! reallocation and lets a failed mid-growth allocation leave the buffer in
//! a valid, shorter state instead of losing everything.
//!
//! Growth goes through `try_reserve_exact`, so allocator refusal surfaces as
//! [`FsError::OutOfMemory`] with the buffer reflecting whatever length was
//! actually reached. Shrinking cannot fail.

use crate::error::{FsError, FsResult};

/// Segment size: 1 MiB.
pub const SEGMENT: u64 = 1 << 20;

/// Rounds a length up to the next segment boundary.
///
/// Zero rounds to zero.
#[inline]
pub fn rounded_len(n: u64) -> u64 {
    n.div_ceil(SEGMENT).saturating_mul(SEGMENT)
}

/// A comb of byte segments backing one file's contents.
///
/// Invariants: every segment except the last holds exactly [`SEGMENT`]
/// bytes; the last holds between 1 and [`SEGMENT`]; an empty buffer holds no
/// segments. The sum of segment lengths is the allocation size charged
/// against the volume budget.
#[derive(Debug, Default)]
pub struct SegmentedBuffer {
    segments: Vec<Vec<u8>>,
    len: u64,
}

impl SegmentedBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current allocated length in bytes.
    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether no bytes are allocated.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of segments currently held.
    #[cfg(test)]
    pub(crate) fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Grows or shrinks the buffer to `new_len` bytes.
    ///
    /// New bytes are zeroed. Shrinking always succeeds and releases trailing
    /// segments. On grow, an allocator refusal leaves the buffer valid at
    /// whatever length was reached; the caller observes the partial length
    /// through [`len`](Self::len) and must reconcile its byte accounting.
    pub fn set_len(&mut self, new_len: u64) -> FsResult<()> {
        if new_len < self.len {
            self.shrink(new_len);
            Ok(())
        } else if new_len > self.len {
            self.grow(new_len)
        } else {
            Ok(())
        }
    }

    fn grow(&mut self, new_len: u64) -> FsResult<()> {
        while self.len < new_len {
            let tail_room = match self.segments.last() {
                Some(tail) => SEGMENT - tail.len() as u64,
                None => 0,
            };
            if tail_room == 0 {
                #[cfg(test)]
                failpoint::check()?;
                if self.segments.try_reserve(1).is_err() {
                    return Err(FsError::OutOfMemory);
                }
                self.segments.push(Vec::new());
                continue;
            }
            let grow_by = tail_room.min(new_len - self.len) as usize;
            let tail = self.segments.last_mut().expect("tail exists");
            // A brand-new tooth's first fill shares the push's failpoint
            // budget; only an in-place tail extension counts separately.
            #[cfg(test)]
            if !tail.is_empty() {
                failpoint::check()?;
            }
            if tail.try_reserve_exact(grow_by).is_err() {
                if tail.is_empty() {
                    self.segments.pop();
                }
                return Err(FsError::OutOfMemory);
            }
            let old = tail.len();
            tail.resize(old + grow_by, 0);
            self.len += grow_by as u64;
        }
        Ok(())
    }

    fn shrink(&mut self, new_len: u64) {
        while self.len > new_len {
            let tail_len = self.segments.last().map_or(0, Vec::len) as u64;
            let excess = self.len - new_len;
            if tail_len <= excess {
                self.segments.pop();
                self.len -= tail_len;
            } else {
                let tail = self.segments.last_mut().expect("tail exists");
                tail.truncate((tail_len - excess) as usize);
                tail.shrink_to_fit();
                self.len = new_len;
            }
        }
        self.segments.shrink_to_fit();
    }

    /// Copies bytes out of the buffer starting at `offset`.
    ///
    /// The range `offset .. offset + dst.len()` must lie within the
    /// allocated length.
    pub fn read(&self, offset: u64, dst: &mut [u8]) {
        debug_assert!(offset + dst.len() as u64 <= self.len);
        let mut seg = (offset / SEGMENT) as usize;
        let mut within = (offset % SEGMENT) as usize;
        let mut copied = 0;
        while copied < dst.len() {
            let src = &self.segments[seg];
            let take = (src.len() - within).min(dst.len() - copied);
            dst[copied..copied + take].copy_from_slice(&src[within..within + take]);
            copied += take;
            seg += 1;
            within = 0;
        }
    }

    /// Zeroes the byte range `from..to`, which must lie within the
    /// allocated length.
    ///
    /// Used when the logical file size grows within an existing
    /// allocation, so a shrunken-then-regrown file never exposes stale
    /// bytes.
    pub fn zero_range(&mut self, from: u64, to: u64) {
        debug_assert!(from <= to && to <= self.len);
        let mut seg = (from / SEGMENT) as usize;
        let mut within = (from % SEGMENT) as usize;
        let mut remaining = (to - from) as usize;
        while remaining > 0 {
            let dst = &mut self.segments[seg];
            let take = (dst.len() - within).min(remaining);
            dst[within..within + take].fill(0);
            remaining -= take;
            seg += 1;
            within = 0;
        }
    }

    /// Copies bytes into the buffer starting at `offset`.
    ///
    /// The range `offset .. offset + src.len()` must lie within the
    /// allocated length.
    pub fn write(&mut self, offset: u64, src: &[u8]) {
        debug_assert!(offset + src.len() as u64 <= self.len);
        let mut seg = (offset / SEGMENT) as usize;
        let mut within = (offset % SEGMENT) as usize;
        let mut copied = 0;
        while copied < src.len() {
            let dst = &mut self.segments[seg];
            let take = (dst.len() - within).min(src.len() - copied);
            dst[within..within + take].copy_from_slice(&src[copied..copied + take]);
            copied += take;
            seg += 1;
            within = 0;
        }
    }
}
