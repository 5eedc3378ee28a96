//! # Duplicate Media Scanner
//!
//! Finds byte-identical photos and videos across local volumes and remote
//! shares, in phases that can be paused, resumed and cancelled.
//!
//! ## How it narrows the search
//! 1. Enumerate media files into a persistent metadata store
//! 2. Drop files whose size nobody else shares
//! 3. Fingerprint the head and tail of the rest and drop unique fingerprints
//! 4. Fully hash what is left; equal digests form duplicate groups
//!
//! Nothing is ever deleted here. Resolving a group only reports which files
//! a caller may remove.
//!
//! ## Architecture
//! - `core` - The detection engine
//! - `events` - Progress snapshots and result events (UI-ready)
//! - `error` - Typed errors and the session error log

pub mod core;
pub mod error;
pub mod events;

// Re-export commonly used types at the crate root
pub use error::{Result, ScannerError};

/// Initialize tracing for the library
///
/// Called by the application entry point. `RUST_LOG` wins when set; otherwise
/// `verbose` picks between `debug` and `warn` for this crate.
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let fallback = if verbose {
        "duplicate_media_scanner=debug"
    } else {
        "duplicate_media_scanner=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    // A subscriber may already be installed, e.g. by a host application
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
