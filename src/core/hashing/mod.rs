//! # Hashing Module
//!
//! Content digests computed by bounded worker pools.
//!
//! ## Digests
//! - **Partial fingerprint** - BLAKE3 over a prefix chunk plus, for files longer
//!   than two chunks, a suffix chunk
//! - **Full hash** - BLAKE3 over the whole file, streamed in fixed-size chunks
//!
//! Local and remote files run on separate pools so a slow network mount never
//! starves local disks. Workers check the shared control signal before each
//! item; full-hash streams also check for cancellation between chunks.

mod digest;
mod pool;

pub use digest::{partial_fingerprint, stream_full_hash, PartialFingerprint};
pub use pool::{HashJob, HashJobKind, HashOutcome, HashingPipeline, SourceMap};
