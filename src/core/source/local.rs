//! Local filesystem source using walkdir.

use super::{
    ContentReader, Enumeration, EnumerationCursor, EnumerationItem, MediaFilter, MediaSource,
    SkipNotice, SkipReason, SourceDescriptor,
};
use crate::core::record::{FileKey, FileRecord, SourceId};
use crate::error::SourceError;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::WalkDir;

const ID_PREFIX: &str = "local:";
const NOT_UTF8: &str = "path is not valid UTF-8";

/// A local volume or removable disk
pub struct LocalSource {
    descriptor: SourceDescriptor,
    root: PathBuf,
}

impl LocalSource {
    /// Create a source whose id is derived from the root path
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let id = SourceId::new(format!("{ID_PREFIX}{}", root.display()));
        Self::with_id(id, root)
    }

    /// Rebuild a source from an id produced by [`LocalSource::new`]
    pub fn from_id(id: &SourceId) -> Option<Self> {
        let root = id.as_str().strip_prefix(ID_PREFIX)?;
        Some(Self::with_id(id.clone(), root))
    }

    pub fn with_id(id: SourceId, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            descriptor: SourceDescriptor::local(id, root.display().to_string()),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn unavailable(&self, reason: impl Into<String>) -> SourceError {
        SourceError::SourceUnavailable {
            source_id: self.descriptor.id.to_string(),
            root: self.descriptor.root.clone(),
            reason: reason.into(),
        }
    }

    fn check_root(&self) -> Result<(), SourceError> {
        match std::fs::metadata(&self.root) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(self.unavailable("root is not a directory")),
            Err(e) => Err(self.unavailable(e.to_string())),
        }
    }
}

impl MediaSource for LocalSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    fn enumerate(
        &self,
        filter: &MediaFilter,
        resume_after: Option<&EnumerationCursor>,
    ) -> Result<Enumeration, SourceError> {
        self.check_root()?;

        debug!(
            source = %self.descriptor.id,
            resume_after = resume_after.map(|c| c.as_str()),
            "Enumerating local source"
        );

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter();

        Ok(Box::new(LocalEnumeration {
            walker,
            root: self.root.clone(),
            source_id: self.descriptor.id.clone(),
            root_label: self.descriptor.root.clone(),
            filter: filter.clone(),
            resume_after: resume_after.cloned(),
            finished: false,
        }))
    }

    fn open(&self, relative_path: &str) -> Result<Box<dyn ContentReader>, SourceError> {
        let path = self.root.join(relative_path);
        match File::open(&path) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) => {
                if self.check_root().is_err() {
                    Err(self.unavailable(e.to_string()))
                } else {
                    Err(SourceError::ItemUnreadable {
                        path: relative_path.to_string(),
                        reason: e.to_string(),
                    })
                }
            }
        }
    }
}

struct LocalEnumeration {
    walker: walkdir::IntoIter,
    root: PathBuf,
    source_id: SourceId,
    root_label: String,
    filter: MediaFilter,
    resume_after: Option<EnumerationCursor>,
    finished: bool,
}

impl LocalEnumeration {
    /// Root-relative `/`-joined path. `Err` carries a lossy rendering when
    /// some component is not UTF-8, since such a key could never be reopened.
    fn relative(&self, path: &Path) -> Result<String, String> {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let mut exact = true;
        let joined = relative
            .components()
            .map(|c| {
                let part = c.as_os_str();
                exact &= part.to_str().is_some();
                part.to_string_lossy()
            })
            .collect::<Vec<_>>()
            .join("/");
        if exact {
            Ok(joined)
        } else {
            Err(joined)
        }
    }

    fn skipped(path: String, reason: SkipReason) -> Option<Result<EnumerationItem, SourceError>> {
        Some(Ok(EnumerationItem::Skipped(SkipNotice { path, reason })))
    }
}

impl Iterator for LocalEnumeration {
    type Item = Result<EnumerationItem, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            let entry = match self.walker.next() {
                Some(Ok(entry)) => entry,
                Some(Err(e)) => {
                    if !self.root.is_dir() {
                        self.finished = true;
                        return Some(Err(SourceError::SourceUnavailable {
                            source_id: self.source_id.to_string(),
                            root: self.root_label.clone(),
                            reason: e.to_string(),
                        }));
                    }
                    let path = e
                        .path()
                        .map(|p| self.relative(p).unwrap_or_else(|lossy| lossy))
                        .unwrap_or_default();
                    if let Some(cursor) = &self.resume_after {
                        if !path.is_empty() && cursor.covers(&path) {
                            continue;
                        }
                    }
                    return Self::skipped(path, SkipReason::Unreadable(e.to_string()));
                }
                None => {
                    self.finished = true;
                    return None;
                }
            };

            let name = entry.file_name().to_string_lossy();
            let is_dir = entry.file_type().is_dir();

            if !self.filter.include_hidden() && MediaFilter::is_hidden_name(&name) {
                if is_dir {
                    self.walker.skip_current_dir();
                }
                continue;
            }

            let rel = match self.relative(entry.path()) {
                Ok(rel) => rel,
                Err(lossy) => {
                    if is_dir {
                        self.walker.skip_current_dir();
                    } else if !entry.file_type().is_file() {
                        continue;
                    }
                    if let Some(cursor) = &self.resume_after {
                        if cursor.covers(&lossy) || (is_dir && cursor.covers_directory(&lossy)) {
                            continue;
                        }
                    }
                    debug!(path = %lossy, "Skipping entry with a non-UTF-8 name");
                    return Self::skipped(lossy, SkipReason::Unreadable(NOT_UTF8.to_string()));
                }
            };

            if is_dir {
                if let Some(cursor) = &self.resume_after {
                    if cursor.covers_directory(&rel) {
                        trace!(dir = %rel, "Skipping directory before cursor");
                        self.walker.skip_current_dir();
                    }
                }
                continue;
            }

            if !entry.file_type().is_file() {
                continue;
            }

            if let Some(cursor) = &self.resume_after {
                if cursor.covers(&rel) {
                    continue;
                }
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => return Self::skipped(rel, SkipReason::Unreadable(e.to_string())),
            };

            let size = metadata.len();
            return match self.filter.classify(&rel, size) {
                Ok(kind) => {
                    let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
                    let key = FileKey::new(self.source_id.clone(), rel);
                    Some(Ok(EnumerationItem::Found(FileRecord::discovered(
                        key, size, modified, kind,
                    ))))
                }
                Err(reason) => Self::skipped(rel, reason),
            };
        }
    }
}
