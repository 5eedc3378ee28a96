//! Remote sources behind an abstract transport.
//!
//! The protocol itself (WebDAV or otherwise) lives in a `RemoteTransport`
//! implementation supplied by the caller. This module adds traversal order,
//! resumable cursors, retry with backoff and a buffered ranged reader.

use super::{
    join_relative, ContentReader, Enumeration, EnumerationCursor, EnumerationItem, MediaFilter,
    MediaSource, RetryPolicy, SkipNotice, SkipReason, SourceDescriptor,
};
use crate::core::record::{FileKey, FileRecord, SourceId};
use crate::error::SourceError;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Default size of one ranged read
pub const DEFAULT_READ_BLOCK: usize = 256 * 1024;

/// Failures reported by a transport
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Timeouts, resets, 5xx responses - worth retrying
    #[error("transient failure: {0}")]
    Transient(String),

    /// The remote as a whole cannot be reached
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

/// One entry of a remote directory listing
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntry {
    /// Name within its parent directory
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Minimal remote file access needed by the scanner.
///
/// Paths are relative to the source root, `/`-separated; the root is `""`.
pub trait RemoteTransport: Send + Sync {
    fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, TransportError>;

    fn stat(&self, path: &str) -> Result<RemoteEntry, TransportError>;

    /// Read up to `len` bytes starting at `offset`
    fn read_range(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>, TransportError>;
}

/// A source reached over a `RemoteTransport`
pub struct RemoteSource<T: RemoteTransport> {
    descriptor: SourceDescriptor,
    transport: Arc<T>,
    retry: RetryPolicy,
    read_block: usize,
}

impl<T: RemoteTransport + 'static> RemoteSource<T> {
    pub fn new(descriptor: SourceDescriptor, transport: T) -> Self {
        Self {
            descriptor,
            transport: Arc::new(transport),
            retry: RetryPolicy::default(),
            read_block: DEFAULT_READ_BLOCK,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_read_block(mut self, bytes: usize) -> Self {
        self.read_block = bytes.max(1);
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn unavailable(&self, reason: impl Into<String>) -> SourceError {
        SourceError::SourceUnavailable {
            source_id: self.descriptor.id.to_string(),
            root: self.descriptor.root.clone(),
            reason: reason.into(),
        }
    }
}

impl<T: RemoteTransport + 'static> MediaSource for RemoteSource<T> {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    fn enumerate(
        &self,
        filter: &MediaFilter,
        resume_after: Option<&EnumerationCursor>,
    ) -> Result<Enumeration, SourceError> {
        debug!(
            source = %self.descriptor.id,
            resume_after = resume_after.map(|c| c.as_str()),
            "Enumerating remote source"
        );

        let transport = Arc::clone(&self.transport);
        let mut hiccups = Vec::new();
        let root_listing = self
            .retry
            .run_observed(
                "list root",
                || transport.list(""),
                |_, message| hiccups.push(message.to_string()),
            )
            .map_err(|e| self.unavailable(e.to_string()))?;

        let mut enumeration = RemoteEnumeration {
            transport,
            retry: self.retry.clone(),
            source_id: self.descriptor.id.clone(),
            root_label: self.descriptor.root.clone(),
            filter: filter.clone(),
            resume_after: resume_after.cloned(),
            stack: Vec::new(),
            notices: VecDeque::new(),
            finished: false,
        };
        enumeration.note_recovered("", hiccups);
        enumeration.push_listing("", root_listing);

        Ok(Box::new(enumeration))
    }

    fn open(&self, relative_path: &str) -> Result<Box<dyn ContentReader>, SourceError> {
        let transport = Arc::clone(&self.transport);
        let entry = self
            .retry
            .run("stat", || transport.stat(relative_path))
            .map_err(|e| match e {
                TransportError::Unavailable(reason) => self.unavailable(reason),
                other => SourceError::ItemUnreadable {
                    path: relative_path.to_string(),
                    reason: other.to_string(),
                },
            })?;

        Ok(Box::new(RangedReader {
            transport,
            retry: self.retry.clone(),
            path: relative_path.to_string(),
            size: entry.size,
            position: 0,
            block_size: self.read_block,
            buffer: Vec::new(),
            buffer_start: 0,
        }))
    }
}

/// Depth-first traversal with sorted listings and an explicit stack
struct RemoteEnumeration<T: RemoteTransport> {
    transport: Arc<T>,
    retry: RetryPolicy,
    source_id: SourceId,
    root_label: String,
    filter: MediaFilter,
    resume_after: Option<EnumerationCursor>,
    /// Pending entries per open directory, with their relative paths
    stack: Vec<VecDeque<(String, RemoteEntry)>>,
    /// Recovered transient failures not yet handed out
    notices: VecDeque<SourceError>,
    finished: bool,
}

impl<T: RemoteTransport> RemoteEnumeration<T> {
    fn push_listing(&mut self, dir: &str, mut entries: Vec<RemoteEntry>) {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let frame = entries
            .into_iter()
            .map(|entry| (join_relative(dir, &entry.name), entry))
            .collect();
        self.stack.push(frame);
    }

    /// Queue a `TransientNetwork` notice if listing `dir` needed retries
    fn note_recovered(&mut self, dir: &str, hiccups: Vec<String>) {
        let Some(last) = hiccups.last() else {
            return;
        };
        let path = if dir.is_empty() { "/" } else { dir };
        debug!(dir = path, retries = hiccups.len(), "Remote listing recovered");
        self.notices.push_back(SourceError::TransientNetwork {
            path: path.to_string(),
            reason: format!("recovered after {} retries, last: {}", hiccups.len(), last),
        });
    }

    fn next_entry(&mut self) -> Option<(String, RemoteEntry)> {
        while let Some(frame) = self.stack.last_mut() {
            if let Some(entry) = frame.pop_front() {
                return Some(entry);
            }
            self.stack.pop();
        }
        None
    }
}

impl<T: RemoteTransport> Iterator for RemoteEnumeration<T> {
    type Item = Result<EnumerationItem, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            if let Some(notice) = self.notices.pop_front() {
                return Some(Err(notice));
            }
            let Some((rel, entry)) = self.next_entry() else {
                self.finished = true;
                return None;
            };

            if !self.filter.include_hidden() && MediaFilter::is_hidden_name(&entry.name) {
                continue;
            }

            if entry.is_dir {
                if let Some(cursor) = &self.resume_after {
                    if cursor.covers_directory(&rel) {
                        trace!(dir = %rel, "Skipping remote directory before cursor");
                        continue;
                    }
                }

                let transport = Arc::clone(&self.transport);
                let mut hiccups = Vec::new();
                let listing = self.retry.run_observed(
                    "list",
                    || transport.list(&rel),
                    |_, message| hiccups.push(message.to_string()),
                );
                match listing {
                    Ok(listing) => {
                        self.note_recovered(&rel, hiccups);
                        self.push_listing(&rel, listing);
                        continue;
                    }
                    Err(TransportError::Unavailable(reason)) => {
                        self.finished = true;
                        return Some(Err(SourceError::SourceUnavailable {
                            source_id: self.source_id.to_string(),
                            root: self.root_label.clone(),
                            reason,
                        }));
                    }
                    Err(e) => {
                        warn!(dir = %rel, error = %e, "Skipping unreadable remote directory");
                        return Some(Ok(EnumerationItem::Skipped(SkipNotice {
                            path: rel,
                            reason: SkipReason::Unreadable(e.to_string()),
                        })));
                    }
                }
            }

            if let Some(cursor) = &self.resume_after {
                if cursor.covers(&rel) {
                    continue;
                }
            }

            return Some(Ok(match self.filter.classify(&rel, entry.size) {
                Ok(kind) => EnumerationItem::Found(FileRecord::discovered(
                    FileKey::new(self.source_id.clone(), rel),
                    entry.size,
                    entry.modified,
                    kind,
                )),
                Err(reason) => EnumerationItem::Skipped(SkipNotice { path: rel, reason }),
            }));
        }
    }
}

/// Buffered `Read + Seek` over ranged transport reads
struct RangedReader<T: RemoteTransport> {
    transport: Arc<T>,
    retry: RetryPolicy,
    path: String,
    size: u64,
    position: u64,
    block_size: usize,
    buffer: Vec<u8>,
    buffer_start: u64,
}

impl<T: RemoteTransport> RangedReader<T> {
    fn buffered(&self) -> Option<&[u8]> {
        let end = self.buffer_start + self.buffer.len() as u64;
        if self.position >= self.buffer_start && self.position < end {
            let offset = (self.position - self.buffer_start) as usize;
            Some(&self.buffer[offset..])
        } else {
            None
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        let remaining = self.size - self.position;
        let len = (self.block_size as u64).min(remaining) as usize;
        let transport = Arc::clone(&self.transport);
        let (path, offset) = (self.path.clone(), self.position);

        let bytes = self
            .retry
            .run("read", || transport.read_range(&path, offset, len))
            .map_err(|e| io::Error::other(format!("{}: {}", self.path, e)))?;

        if bytes.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{}: remote returned no data at offset {}", self.path, offset),
            ));
        }

        self.buffer = bytes;
        self.buffer_start = offset;
        Ok(())
    }
}

impl<T: RemoteTransport> Read for RangedReader<T> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() || self.position >= self.size {
            return Ok(0);
        }
        if self.buffered().is_none() {
            self.fill()?;
        }
        let available = self.buffered().unwrap_or(&[]);
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl<T: RemoteTransport> Seek for RangedReader<T> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.size.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        match target {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// In-memory remote tree with optional scripted transient failures
    #[derive(Default)]
    struct FakeTransport {
        files: BTreeMap<String, Vec<u8>>,
        failures: Mutex<BTreeMap<String, u32>>,
    }

    impl FakeTransport {
        fn with_file(mut self, path: &str, bytes: &[u8]) -> Self {
            self.files.insert(path.to_string(), bytes.to_vec());
            self
        }

        fn failing(self, op_path: &str, times: u32) -> Self {
            self.failures
                .lock()
                .unwrap()
                .insert(op_path.to_string(), times);
            self
        }

        fn maybe_fail(&self, op_path: &str) -> Result<(), TransportError> {
            let mut failures = self.failures.lock().unwrap();
            if let Some(left) = failures.get_mut(op_path) {
                if *left > 0 {
                    *left -= 1;
                    return Err(TransportError::Transient(format!("{op_path} timed out")));
                }
            }
            Ok(())
        }
    }

    impl RemoteTransport for FakeTransport {
        fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, TransportError> {
            self.maybe_fail(&format!("list:{dir}"))?;
            let prefix = if dir.is_empty() {
                String::new()
            } else {
                format!("{dir}/")
            };
            let mut entries: BTreeMap<String, RemoteEntry> = BTreeMap::new();
            for (path, bytes) in &self.files {
                let Some(rest) = path.strip_prefix(&prefix) else {
                    continue;
                };
                match rest.split_once('/') {
                    Some((child, _)) => {
                        entries.entry(child.to_string()).or_insert(RemoteEntry {
                            name: child.to_string(),
                            is_dir: true,
                            size: 0,
                            modified: None,
                        });
                    }
                    None => {
                        entries.insert(
                            rest.to_string(),
                            RemoteEntry {
                                name: rest.to_string(),
                                is_dir: false,
                                size: bytes.len() as u64,
                                modified: None,
                            },
                        );
                    }
                }
            }
            // Deliberately unsorted to exercise traversal sorting
            Ok(entries.into_values().rev().collect())
        }

        fn stat(&self, path: &str) -> Result<RemoteEntry, TransportError> {
            let bytes = self
                .files
                .get(path)
                .ok_or_else(|| TransportError::NotFound(path.to_string()))?;
            Ok(RemoteEntry {
                name: path.rsplit('/').next().unwrap_or(path).to_string(),
                is_dir: false,
                size: bytes.len() as u64,
                modified: None,
            })
        }

        fn read_range(
            &self,
            path: &str,
            offset: u64,
            len: usize,
        ) -> Result<Vec<u8>, TransportError> {
            self.maybe_fail(&format!("read:{path}"))?;
            let bytes = self
                .files
                .get(path)
                .ok_or_else(|| TransportError::NotFound(path.to_string()))?;
            let start = (offset as usize).min(bytes.len());
            let end = (start + len).min(bytes.len());
            Ok(bytes[start..end].to_vec())
        }
    }

    fn source(transport: FakeTransport) -> RemoteSource<FakeTransport> {
        RemoteSource::new(
            SourceDescriptor::remote(SourceId::new("nas"), "https://nas/photos", None),
            transport,
        )
        .with_retry(RetryPolicy::immediate(2))
    }

    fn found(source: &RemoteSource<FakeTransport>, cursor: Option<&EnumerationCursor>) -> Vec<String> {
        source
            .enumerate(&MediaFilter::new(), cursor)
            .unwrap()
            .filter_map(|item| match item {
                Ok(EnumerationItem::Found(record)) => Some(record.key.path),
                Ok(EnumerationItem::Skipped(_)) => None,
                Err(SourceError::TransientNetwork { .. }) => None,
                Err(e) => panic!("unexpected enumeration error: {e}"),
            })
            .collect()
    }

    #[test]
    fn remote_traversal_is_depth_first_and_sorted() {
        let remote = source(
            FakeTransport::default()
                .with_file("b/2.jpg", b"2")
                .with_file("a/x/1.jpg", b"1")
                .with_file("a-b.jpg", b"3"),
        );
        assert_eq!(found(&remote, None), vec!["a/x/1.jpg", "a-b.jpg", "b/2.jpg"]);
    }

    #[test]
    fn remote_enumeration_resumes_after_cursor() {
        let remote = source(
            FakeTransport::default()
                .with_file("a/1.jpg", b"1")
                .with_file("b/2.jpg", b"2")
                .with_file("b/3.jpg", b"3"),
        );
        let cursor = EnumerationCursor::new("b/2.jpg");
        assert_eq!(found(&remote, Some(&cursor)), vec!["b/3.jpg"]);
    }

    #[test]
    fn transient_listing_failure_is_retried() {
        let remote = source(
            FakeTransport::default()
                .with_file("a/1.jpg", b"1")
                .failing("list:a", 2),
        );
        assert_eq!(found(&remote, None), vec!["a/1.jpg"]);
    }

    #[test]
    fn recovered_listing_is_reported_before_its_entries() {
        let remote = source(
            FakeTransport::default()
                .with_file("a/1.jpg", b"1")
                .with_file("b.jpg", b"2")
                .failing("list:", 1)
                .failing("list:a", 2),
        );
        let items: Vec<_> = remote.enumerate(&MediaFilter::new(), None).unwrap().collect();

        assert_eq!(items.len(), 4);
        assert!(matches!(
            &items[0],
            Err(SourceError::TransientNetwork { path, .. }) if path == "/"
        ));
        match &items[1] {
            Err(SourceError::TransientNetwork { path, reason }) => {
                assert_eq!(path, "a");
                assert!(reason.contains("2 retries"), "{reason}");
            }
            other => panic!("expected a transient notice, got {other:?}"),
        }
        assert!(!items[1].as_ref().unwrap_err().is_source_fatal());
        assert!(matches!(&items[2], Ok(EnumerationItem::Found(r)) if r.key.path == "a/1.jpg"));
        assert!(matches!(&items[3], Ok(EnumerationItem::Found(r)) if r.key.path == "b.jpg"));
    }

    #[test]
    fn exhausted_listing_downgrades_to_unreadable_directory() {
        let remote = source(
            FakeTransport::default()
                .with_file("a/1.jpg", b"1")
                .with_file("b.jpg", b"2")
                .failing("list:a", 10),
        );
        let items: Vec<_> = remote
            .enumerate(&MediaFilter::new(), None)
            .unwrap()
            .map(|i| i.unwrap())
            .collect();

        assert!(matches!(
            &items[0],
            EnumerationItem::Skipped(SkipNotice { path, reason: SkipReason::Unreadable(_) }) if path == "a"
        ));
        assert!(matches!(&items[1], EnumerationItem::Found(r) if r.key.path == "b.jpg"));
    }

    #[test]
    fn unreachable_root_is_source_unavailable() {
        let remote = source(FakeTransport::default().failing("list:", 10));
        assert!(matches!(
            remote.enumerate(&MediaFilter::new(), None),
            Err(SourceError::SourceUnavailable { .. })
        ));
    }

    #[test]
    fn ranged_reader_reads_and_seeks() {
        let content: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let remote = source(FakeTransport::default().with_file("v.mp4", &content)).with_read_block(1000);

        let mut reader = remote.open("v.mp4").unwrap();
        let mut head = vec![0u8; 1500];
        reader.read_exact(&mut head).unwrap();
        assert_eq!(head, content[..1500]);

        reader.seek(SeekFrom::End(-100)).unwrap();
        let mut tail = Vec::new();
        reader.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, content[9_900..]);
    }

    #[test]
    fn ranged_reader_retries_transient_reads() {
        let remote = source(
            FakeTransport::default()
                .with_file("a.jpg", b"abcdef")
                .failing("read:a.jpg", 1),
        );
        let mut reader = remote.open("a.jpg").unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcdef");
    }
}
