//! # media-dedup CLI
//!
//! Command-line interface for the duplicate media scanner.
//!
//! ## Usage
//! ```bash
//! media-dedup scan ~/Pictures /Volumes/Backup --fast
//! media-dedup scan ~/Pictures --output json --session nightly
//! media-dedup resume --session nightly
//! ```

mod cli;

use duplicate_media_scanner::Result;

fn main() -> Result<()> {
    cli::run()
}
