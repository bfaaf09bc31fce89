//! Mount backend abstraction.
//!
//! A backend is a host-driver binding that can expose a [`FileTree`] at a
//! mount point: the Windows filesystem driver in production, loopback or
//! test harness drivers elsewhere. This crate only defines the contract;
//! concrete bindings live behind their own cargo features in the binary.

use std::path::Path;
use std::sync::Arc;

use ramvol_core::FileTree;
use thiserror::Error;
use tracing::debug;

use crate::options::VolumeOptions;
use crate::stats::VolumeStats;

/// Errors surfaced by mount backends.
#[derive(Debug, Error)]
pub enum MountError {
    /// No backend compiled into this build can run on this host.
    #[error("no host driver backend available")]
    NoBackendAvailable,
    /// The mount point is missing or unusable.
    #[error("mount point {0:?} is not usable")]
    BadMountPoint(String),
    /// The backend's host driver reported a failure.
    #[error("host driver error: {0}")]
    Driver(String),
}

/// A live mounted volume.
///
/// Dropping the handle does not unmount; call
/// [`unmount`](MountHandle::unmount) for an orderly teardown.
pub trait MountHandle: Send {
    /// The engine behind this mount.
    fn tree(&self) -> &Arc<FileTree>;

    /// Operation counters for this mount.
    fn stats(&self) -> &Arc<VolumeStats>;

    /// Detaches the volume from the host.
    fn unmount(self: Box<Self>) -> Result<(), MountError>;
}

/// A mounting mechanism.
pub trait MountBackend {
    /// Short human-readable name ("winfsp", "loopback", ...).
    fn name(&self) -> &'static str;

    /// Whether this backend can run on the current host.
    fn is_available(&self) -> bool;

    /// Exposes `tree` at `mount_point`.
    fn mount(
        &self,
        tree: Arc<FileTree>,
        options: &VolumeOptions,
        mount_point: &Path,
    ) -> Result<Box<dyn MountHandle>, MountError>;
}

/// Picks the first available backend from `backends`.
pub fn first_available(
    backends: &[Box<dyn MountBackend>],
) -> Result<&dyn MountBackend, MountError> {
    backends
        .iter()
        .map(AsRef::as_ref)
        .find(|b| {
            let available = b.is_available();
            debug!(backend = b.name(), available, "probing mount backend");
            available
        })
        .ok_or(MountError::NoBackendAvailable)
}
