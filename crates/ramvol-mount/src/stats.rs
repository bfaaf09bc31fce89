//! Operation counters for a mounted volume.
//!
//! Lock-free atomic counters the shim bumps on each callback; snapshots
//! feed statfs-style reporting and diagnostics. Relaxed ordering is
//! enough, these are monotone tallies with no synchronization role.

use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe per-volume operation counters.
#[derive(Debug, Default)]
pub struct VolumeStats {
    /// Name/path lookups served.
    pub lookups: AtomicU64,
    /// Node creations.
    pub creates: AtomicU64,
    /// Node removals.
    pub removes: AtomicU64,
    /// Renames (same- or cross-directory).
    pub renames: AtomicU64,
    /// Read calls.
    pub reads: AtomicU64,
    /// Write calls.
    pub writes: AtomicU64,
    /// Bytes handed back by reads.
    pub bytes_read: AtomicU64,
    /// Bytes accepted by writes.
    pub bytes_written: AtomicU64,
}

/// Point-in-time copy of [`VolumeStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VolumeStatsSnapshot {
    /// Name/path lookups served.
    pub lookups: u64,
    /// Node creations.
    pub creates: u64,
    /// Node removals.
    pub removes: u64,
    /// Renames.
    pub renames: u64,
    /// Read calls.
    pub reads: u64,
    /// Write calls.
    pub writes: u64,
    /// Bytes handed back by reads.
    pub bytes_read: u64,
    /// Bytes accepted by writes.
    pub bytes_written: u64,
}

impl VolumeStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a lookup.
    pub fn record_lookup(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a create.
    pub fn record_create(&self) {
        self.creates.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a remove.
    pub fn record_remove(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a rename.
    pub fn record_rename(&self) {
        self.renames.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a read of `bytes` bytes.
    pub fn record_read(&self, bytes: u64) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records a write of `bytes` bytes.
    pub fn record_write(&self, bytes: u64) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Copies the counters out.
    pub fn snapshot(&self) -> VolumeStatsSnapshot {
        VolumeStatsSnapshot {
            lookups: self.lookups.load(Ordering::Relaxed),
            creates: self.creates.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            renames: self.renames.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

/// Formats a byte count with a binary-unit suffix.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
