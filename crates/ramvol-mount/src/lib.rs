//! Host-driver support for ramvol volumes.
//!
//! The engine crate (`ramvol-core`) knows nothing about the host driver;
//! this crate holds everything a driver shim needs around it:
//!
//! - [`NtStatus`] — the one authoritative mapping from engine errors and
//!   walk outcomes to NTSTATUS values.
//! - [`VolumeOptions`] / [`parse_size`] — mount-time configuration and
//!   the `N[KMGT]` size grammar.
//! - [`MountBackend`] / [`MountHandle`] — the contract concrete driver
//!   bindings implement (the bindings themselves are feature-gated in the
//!   binary and out of scope here).
//! - [`VolumeStats`] — lock-free per-volume operation counters.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod backend;
mod options;
mod status;
mod stats;

pub use backend::{first_available, MountBackend, MountError, MountHandle};
pub use options::{
    parse_size, OptionsError, VolumeOptions, DEFAULT_SIZE, MAX_LABEL_LEN, MIN_SIZE,
};
pub use stats::{format_bytes, VolumeStats, VolumeStatsSnapshot};
pub use status::{to_status, NtStatus};
