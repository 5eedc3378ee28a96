//! # Error Module
//!
//! Typed errors for the duplicate media scanner.
//!
//! ## Design Principles
//! - **Never panic** on user data - return errors instead
//! - **Include context** - source ids, relative paths, what went wrong
//! - **Per-file errors are data** - they land in the session error log,
//!   only source- and session-level conditions reach the caller as `Err`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Top-level application error
#[derive(Error, Debug)]
pub enum ScannerError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Hashing error: {0}")]
    Hash(#[from] HashError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors raised while enumerating or reading a media source
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    #[error("Source {source_id} is unavailable ({root}): {reason}")]
    SourceUnavailable {
        source_id: String,
        root: String,
        reason: String,
    },

    #[error("Cannot read {path}: {reason}")]
    ItemUnreadable { path: String, reason: String },

    #[error("Network error while accessing {path}: {reason}")]
    TransientNetwork { path: String, reason: String },
}

impl SourceError {
    /// Whether this error ends enumeration of the whole source
    pub fn is_source_fatal(&self) -> bool {
        matches!(self, SourceError::SourceUnavailable { .. })
    }
}

/// Errors that occur while computing content hashes
#[derive(Error, Debug)]
pub enum HashError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} changed size while hashing (expected {expected} bytes, read {actual})")]
    SizeChanged {
        path: String,
        expected: u64,
        actual: u64,
    },

    #[error("Hashing of {path} was cancelled")]
    Cancelled { path: String },

    #[error("Failed to build hashing pool: {0}")]
    PoolBuild(String),
}

/// Errors that occur with the metadata store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open metadata store at {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    #[error("Store query failed: {0}")]
    QueryFailed(String),

    #[error("Store corruption detected at {path}. Delete this file and rescan.")]
    Corrupted { path: PathBuf },

    #[error("Record not found: {key}")]
    NotFound { key: String },

    #[error("Illegal state change for {key}: {from} -> {to}")]
    IllegalTransition {
        key: String,
        from: String,
        to: String,
    },
}

impl From<rusqlite::Error> for StoreError {
    fn from(error: rusqlite::Error) -> Self {
        StoreError::QueryFailed(error.to_string())
    }
}

/// Errors surfaced by the scan session controller
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid selection for group {group_id}: {reason}")]
    InvalidSelection { group_id: String, reason: String },

    #[error("Checkpoint for session {session_id} is unusable: {reason}. Start a fresh scan instead.")]
    CorruptCheckpoint { session_id: String, reason: String },

    #[error("Cannot {action} while the session is {state}")]
    InvalidTransition { state: String, action: &'static str },

    #[error("Duplicate group invariant violated: {0}")]
    InvalidGroup(String),

    #[error("A session needs at least one source")]
    NoSources,
}

/// Classification of entries in the per-session error log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SourceUnavailable,
    ItemUnreadable,
    TransientNetwork,
    InvalidSelection,
    CorruptCheckpoint,
    Store,
}

impl ErrorKind {
    /// Session-level conditions need a caller decision; the rest are per-file
    pub fn is_session_level(&self) -> bool {
        matches!(
            self,
            ErrorKind::SourceUnavailable | ErrorKind::CorruptCheckpoint | ErrorKind::Store
        )
    }
}

/// One entry in the per-session error log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub source_id: Option<String>,
    pub path: Option<String>,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            source_id: None,
            path: None,
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Build a log entry from a source error
    pub fn from_source_error(source_id: &str, error: &SourceError) -> Self {
        let (kind, path) = match error {
            SourceError::SourceUnavailable { .. } => (ErrorKind::SourceUnavailable, None),
            SourceError::ItemUnreadable { path, .. } => (ErrorKind::ItemUnreadable, Some(path)),
            SourceError::TransientNetwork { path, .. } => {
                (ErrorKind::TransientNetwork, Some(path))
            }
        };
        let record = Self::new(kind, error.to_string()).with_source(source_id);
        match path {
            Some(path) => record.with_path(path.clone()),
            None => record,
        }
    }
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, ScannerError>;
