//! # Core Module
//!
//! The UI-agnostic duplicate media engine.
//!
//! ## Modules
//! - `source` - Enumerates media on local volumes and remote shares
//! - `store` - Persists file records, reusable hashes and checkpoints
//! - `grouping` - Narrows candidates by size, then by partial fingerprint
//! - `hashing` - Computes fingerprints and full digests on bounded pools
//! - `groups` - Folds confirmed buckets into duplicate groups
//! - `session` - Sequences the phases with pause, resume and cancel
//! - `config` - Scan settings and their defaults

pub mod config;
pub mod control;
pub mod grouping;
pub mod groups;
pub mod hashing;
pub mod record;
pub mod session;
pub mod source;
pub mod store;

// Re-export commonly used types
pub use config::ScanConfig;
pub use groups::{DuplicateGroup, GroupId, Resolution};
pub use record::{ContentHash, FileKey, FileRecord, MediaKind, ProcessingState, SourceId};
pub use session::{ScanSession, SessionBuilder, SessionState, SessionSummary};
pub use source::{LocalSource, MediaSource, RemoteSource, SourceCatalog, StaticCatalog};
pub use store::{InMemoryStore, MetadataStore, SqliteStore};
