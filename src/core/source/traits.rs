//! Source capability traits.

use super::{EnumerationCursor, EnumerationItem, MediaFilter, SourceDescriptor, SourceKind};
use crate::core::record::SourceId;
use crate::error::SourceError;
use std::io::{Read, Seek};
use std::sync::Arc;

/// Seekable byte stream over one file's content
pub trait ContentReader: Read + Seek + Send {}

impl<T: Read + Seek + Send> ContentReader for T {}

/// Lazy enumeration sequence.
///
/// A `SourceUnavailable` item is fatal for the source and ends the sequence.
/// Other `Err` items report a problem the walk got past, such as a remote
/// listing that needed retries. Per-entry problems arrive as `Skipped` items.
pub type Enumeration = Box<dyn Iterator<Item = Result<EnumerationItem, SourceError>> + Send>;

/// Trait for media sources
///
/// Implementors must be thread-safe: enumeration runs on its own thread while
/// hashing workers call `open` concurrently.
pub trait MediaSource: Send + Sync {
    fn descriptor(&self) -> &SourceDescriptor;

    fn id(&self) -> &SourceId {
        &self.descriptor().id
    }

    /// Used to pick the hashing pool
    fn kind(&self) -> SourceKind {
        self.descriptor().kind
    }

    /// Start (or restart after `resume_after`) enumeration.
    ///
    /// Fails with `SourceUnavailable` when the root cannot be reached.
    fn enumerate(
        &self,
        filter: &MediaFilter,
        resume_after: Option<&EnumerationCursor>,
    ) -> Result<Enumeration, SourceError>;

    /// Open a file for reading by its relative path
    fn open(&self, relative_path: &str) -> Result<Box<dyn ContentReader>, SourceError>;
}

/// Lists the sources available for scanning
pub trait SourceCatalog {
    fn list_sources(&self) -> Vec<SourceDescriptor>;

    fn source(&self, id: &SourceId) -> Option<Arc<dyn MediaSource>>;
}

/// A fixed set of sources
#[derive(Default, Clone)]
pub struct StaticCatalog {
    sources: Vec<Arc<dyn MediaSource>>,
}

impl StaticCatalog {
    pub fn new(sources: Vec<Arc<dyn MediaSource>>) -> Self {
        Self { sources }
    }

    pub fn add(&mut self, source: Arc<dyn MediaSource>) {
        self.sources.push(source);
    }

    pub fn sources(&self) -> &[Arc<dyn MediaSource>] {
        &self.sources
    }
}

impl SourceCatalog for StaticCatalog {
    fn list_sources(&self) -> Vec<SourceDescriptor> {
        self.sources.iter().map(|s| s.descriptor().clone()).collect()
    }

    fn source(&self, id: &SourceId) -> Option<Arc<dyn MediaSource>> {
        self.sources.iter().find(|s| s.id() == id).cloned()
    }
}
