//! # Source Module
//!
//! Enumerates media files from heterogeneous sources.
//!
//! ## Variants
//! - `LocalSource` - local volumes and removable disks, walked with `walkdir`
//! - `RemoteSource` - remote mounts behind an abstract `RemoteTransport`
//!
//! Both traverse in component-wise sorted path order. The enumeration cursor is
//! the relative path of the last item handed out, so a restarted enumeration
//! can skip everything at or before it without revisiting the root.
//!
//! ## Example
//! ```rust,ignore
//! use duplicate_media_scanner::core::source::{LocalSource, MediaFilter, MediaSource};
//!
//! let source = LocalSource::new("/Volumes/Photos");
//! for item in source.enumerate(&MediaFilter::new(), None)? {
//!     println!("{:?}", item?);
//! }
//! ```

mod filter;
mod local;
pub mod remote;
mod retry;
mod traits;

pub use filter::{MediaFilter, DEFAULT_PHOTO_EXTENSIONS, DEFAULT_VIDEO_EXTENSIONS};
pub use local::LocalSource;
pub use remote::{RemoteEntry, RemoteSource, RemoteTransport, TransportError};
pub use retry::RetryPolicy;
pub use traits::{ContentReader, Enumeration, MediaSource, SourceCatalog, StaticCatalog};

use crate::core::record::{FileRecord, SourceId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Kind of source, used to pick a hashing pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    LocalVolume,
    RemoteProtocol,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::LocalVolume => f.write_str("local"),
            SourceKind::RemoteProtocol => f.write_str("remote"),
        }
    }
}

/// Describes a source. Immutable once a session starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub id: SourceId,
    pub kind: SourceKind,
    /// Root path or URL
    pub root: String,
    /// Opaque connection label owned by the caller
    pub connection: Option<String>,
}

impl SourceDescriptor {
    pub fn local(id: SourceId, root: impl Into<String>) -> Self {
        Self {
            id,
            kind: SourceKind::LocalVolume,
            root: root.into(),
            connection: None,
        }
    }

    pub fn remote(id: SourceId, root: impl Into<String>, connection: Option<String>) -> Self {
        Self {
            id,
            kind: SourceKind::RemoteProtocol,
            root: root.into(),
            connection,
        }
    }
}

/// Why an enumerated entry was not turned into a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    UnsupportedType,
    FilteredBySize,
    /// Permission or I/O problem, with a description
    Unreadable(String),
}

/// An entry the enumerator passed over
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipNotice {
    pub path: String,
    pub reason: SkipReason,
}

/// One step of an enumeration
#[derive(Debug, Clone, PartialEq)]
pub enum EnumerationItem {
    Found(FileRecord),
    Skipped(SkipNotice),
}

impl EnumerationItem {
    /// Relative path of the entry; becomes the cursor once processed
    pub fn path(&self) -> &str {
        match self {
            EnumerationItem::Found(record) => &record.key.path,
            EnumerationItem::Skipped(notice) => &notice.path,
        }
    }
}

/// Resume position within a source: the last processed relative path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnumerationCursor(String);

impl EnumerationCursor {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `path` was already handed out before this cursor
    pub fn covers(&self, path: &str) -> bool {
        compare_paths(path, &self.0) != Ordering::Greater
    }

    /// Whether a directory can be skipped entirely.
    ///
    /// True when the directory sorts before the cursor and does not contain it.
    pub fn covers_directory(&self, dir: &str) -> bool {
        self.covers(dir) && !self.0.starts_with(&format!("{dir}/"))
    }
}

/// Component-wise ordering of `/`-separated relative paths.
///
/// Matches the order of a depth-first traversal with name-sorted listings.
pub fn compare_paths(a: &str, b: &str) -> Ordering {
    a.split('/').cmp(b.split('/'))
}

/// Join a parent relative path and a child name
pub(crate) fn join_relative(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_order_differs_from_string_order() {
        // '-' sorts before '/' as bytes, but "a" is a prefix component of "a/x"
        assert_eq!(compare_paths("a/x", "a-b"), Ordering::Less);
        assert_eq!("a/x".cmp("a-b"), Ordering::Greater);
    }

    #[test]
    fn cursor_covers_earlier_and_equal_paths() {
        let cursor = EnumerationCursor::new("b/2.jpg");
        assert!(cursor.covers("a/9.jpg"));
        assert!(cursor.covers("b/1.jpg"));
        assert!(cursor.covers("b/2.jpg"));
        assert!(!cursor.covers("b/3.jpg"));
        assert!(!cursor.covers("c.jpg"));
    }

    #[test]
    fn cursor_does_not_skip_its_own_ancestors() {
        let cursor = EnumerationCursor::new("b/deep/2.jpg");
        assert!(cursor.covers_directory("a"));
        assert!(!cursor.covers_directory("b"));
        assert!(!cursor.covers_directory("b/deep"));
        assert!(!cursor.covers_directory("c"));
    }

    #[test]
    fn join_relative_handles_root() {
        assert_eq!(join_relative("", "a.jpg"), "a.jpg");
        assert_eq!(join_relative("x/y", "a.jpg"), "x/y/a.jpg");
    }
}
