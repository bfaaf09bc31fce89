//! Command-line front end: build a volume from flags and hand it to the
//! first available host driver backend.
//!
//! The driver bindings are feature-gated; a build without any binding
//! still parses options, constructs the volume, and then reports cleanly
//! that no backend is available.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use ramvol_core::FileTree;
use ramvol_mount::{
    first_available, format_bytes, parse_size, MountBackend, VolumeOptions, MIN_SIZE,
};

/// In-memory filesystem volume with Windows-style semantics.
#[derive(Parser)]
#[command(name = "ramvol")]
#[command(author, version)]
#[command(after_help = "EXAMPLES:
    # 2 GiB case-insensitive volume (defaults)
    ramvol Z:

    # 256 MiB scratch volume, case-sensitive names
    ramvol --size 256M --case-sensitive --label SCRATCH Z:
")]
struct Cli {
    /// Volume capacity, decimal with optional K/M/G/T suffix
    #[arg(short, long, default_value = "2G", value_parser = parse_size)]
    size: u64,

    /// Byte-exact name comparison instead of ignore-case
    #[arg(long)]
    case_sensitive: bool,

    /// Volume label reported to the host
    #[arg(short, long, default_value = "RAMVOL")]
    label: String,

    /// Filesystem name reported to the host
    #[arg(long, default_value = "ramvol")]
    file_system_name: String,

    /// Security descriptor for the root directory, in SDDL form.
    /// Passed through to the host shim, which owns the encoding.
    #[arg(long)]
    security: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Where to mount the volume
    #[arg(value_name = "MOUNTPOINT")]
    mount_point: PathBuf,
}

/// Driver bindings compiled into this build.
fn backends() -> Vec<Box<dyn MountBackend>> {
    // The Windows host driver binding lives behind a feature this
    // repository does not carry; other bindings slot in the same way.
    Vec::new()
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if cli.size < MIN_SIZE {
        bail!("--size must be at least {MIN_SIZE} bytes");
    }

    let mut options = VolumeOptions::default()
        .size(cli.size)
        .label(cli.label.clone())
        .fs_name(cli.file_system_name.clone());
    if cli.case_sensitive {
        options = options.case_sensitive();
    }
    if let Some(sddl) = &cli.security {
        options = options.root_security(sddl.as_bytes().to_vec());
    }
    options.validate().context("invalid volume options")?;

    debug!(
        size = options.size,
        case_insensitive = options.case_insensitive,
        label = %options.label,
        "volume options"
    );

    let tree = FileTree::new(
        options.size,
        options.case_insensitive,
        options.root_security.as_deref(),
    )
    .context("failed to create volume")?;
    info!(
        capacity = %format_bytes(tree.total_size()),
        free = %format_bytes(tree.free_size()),
        "volume ready"
    );

    let backends = backends();
    let backend = first_available(&backends)
        .context("cannot mount: rebuild with a host driver feature enabled")?;

    let handle = backend
        .mount(Arc::new(tree), &options, &cli.mount_point)
        .with_context(|| format!("failed to mount at {:?}", cli.mount_point))?;

    info!(mount_point = %cli.mount_point.display(), backend = backend.name(), "mounted");
    // The backend handle drives the volume until unmount.
    handle.unmount().context("unmount failed")?;
    Ok(())
}
