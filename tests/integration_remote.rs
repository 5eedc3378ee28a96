//! Scans mixing a scripted remote source with a local directory.

mod common;

use common::{pattern, write_file};
use duplicate_media_scanner::core::record::{FileKey, ProcessingState};
use duplicate_media_scanner::core::session::SessionState;
use duplicate_media_scanner::core::source::{
    RemoteEntry, RemoteSource, RemoteTransport, RetryPolicy, SourceDescriptor, TransportError,
};
use duplicate_media_scanner::core::{
    DuplicateGroup, InMemoryStore, LocalSource, MetadataStore, ScanSession, SourceId,
};
use duplicate_media_scanner::error::ErrorKind;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Remote tree held in memory, with scripted failures
#[derive(Default)]
struct ScriptedTransport {
    files: BTreeMap<String, Vec<u8>>,
    /// Remaining transient failures per `op:path`
    flaky: Mutex<BTreeMap<String, u32>>,
    /// Paths whose reads never succeed
    broken: HashSet<String>,
    down: bool,
    reads: AtomicUsize,
}

impl ScriptedTransport {
    fn file(mut self, path: &str, bytes: Vec<u8>) -> Self {
        self.files.insert(path.to_string(), bytes);
        self
    }

    fn flaky(self, op_path: &str, times: u32) -> Self {
        self.flaky.lock().unwrap().insert(op_path.to_string(), times);
        self
    }

    fn broken(mut self, path: &str) -> Self {
        self.broken.insert(path.to_string());
        self
    }

    fn down(mut self) -> Self {
        self.down = true;
        self
    }

    fn check(&self, op_path: String) -> Result<(), TransportError> {
        if self.down {
            return Err(TransportError::Unavailable("connection refused".into()));
        }
        let mut flaky = self.flaky.lock().unwrap();
        match flaky.get_mut(&op_path) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Err(TransportError::Transient(format!("{op_path}: 503")))
            }
            _ => Ok(()),
        }
    }

    fn entry(name: &str, is_dir: bool, size: u64) -> RemoteEntry {
        RemoteEntry {
            name: name.to_string(),
            is_dir,
            size,
            modified: None,
        }
    }
}

impl RemoteTransport for ScriptedTransport {
    fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        self.check(format!("list:{dir}"))?;
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };
        let mut entries = BTreeMap::new();
        for (path, bytes) in &self.files {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            let entry = match rest.split_once('/') {
                Some((child, _)) => Self::entry(child, true, 0),
                None => Self::entry(rest, false, bytes.len() as u64),
            };
            entries.insert(entry.name.clone(), entry);
        }
        Ok(entries.into_values().collect())
    }

    fn stat(&self, path: &str) -> Result<RemoteEntry, TransportError> {
        self.check(format!("stat:{path}"))?;
        let bytes = self
            .files
            .get(path)
            .ok_or_else(|| TransportError::NotFound(path.to_string()))?;
        Ok(Self::entry(path, false, bytes.len() as u64))
    }

    fn read_range(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>, TransportError> {
        self.check(format!("read:{path}"))?;
        if self.broken.contains(path) {
            return Err(TransportError::Transient(format!("{path}: connection reset")));
        }
        self.reads.fetch_add(1, Ordering::SeqCst);
        let bytes = self
            .files
            .get(path)
            .ok_or_else(|| TransportError::NotFound(path.to_string()))?;
        let start = (offset as usize).min(bytes.len());
        let end = (start + len).min(bytes.len());
        Ok(bytes[start..end].to_vec())
    }
}

fn nas(transport: ScriptedTransport) -> Arc<RemoteSource<ScriptedTransport>> {
    Arc::new(
        RemoteSource::new(
            SourceDescriptor::remote(SourceId::new("nas"), "https://nas/photos", None),
            transport,
        )
        .with_retry(RetryPolicy::immediate(3)),
    )
}

/// `source:path` of every member, so groups spanning sources compare cleanly
fn qualified(groups: &[DuplicateGroup]) -> BTreeSet<Vec<String>> {
    groups
        .iter()
        .map(|group| {
            group
                .members
                .iter()
                .map(|key| format!("{}:{}", key.source_id.as_str(), key.path))
                .collect()
        })
        .collect()
}

#[test]
fn duplicates_span_remote_and_local_sources() {
    let temp = TempDir::new().unwrap();
    write_file(temp.path(), "a-copy.jpg", &pattern(5_000, 1));
    write_file(temp.path(), "c.jpg", &pattern(700, 3));
    write_file(temp.path(), "only-here.jpg", &pattern(5_000, 4));

    let remote = nas(ScriptedTransport::default()
        .file("albums/a.jpg", pattern(5_000, 1))
        .file("c.jpg", pattern(700, 3))
        .file("clip.mov", pattern(9_000, 5))
        .flaky("list:albums", 2)
        .flaky("read:c.jpg", 1));

    let store: Arc<dyn MetadataStore> = Arc::new(InMemoryStore::new());
    let session = ScanSession::builder(Arc::clone(&store))
        .source(remote.clone())
        .source(Arc::new(LocalSource::with_id(SourceId::new("photos"), temp.path())))
        .build()
        .unwrap();
    session.start().unwrap();
    let summary = session.wait();

    assert_eq!(summary.state, SessionState::Completed);
    let errors = session.errors();
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert_eq!(errors[0].kind, ErrorKind::TransientNetwork);
    assert_eq!(errors[0].source_id.as_deref(), Some("nas"));
    assert_eq!(errors[0].path.as_deref(), Some("albums"));
    assert_eq!(summary.records.total(), 6);
    assert_eq!(summary.records.unresolved(), 0);

    let mut expected = BTreeSet::new();
    expected.insert(vec!["nas:albums/a.jpg".to_string(), "photos:a-copy.jpg".to_string()]);
    expected.insert(vec!["nas:c.jpg".to_string(), "photos:c.jpg".to_string()]);
    assert_eq!(qualified(&session.groups()), expected);

    // clip.mov has a unique size and is never read
    assert!(remote.transport().reads.load(Ordering::SeqCst) > 0);
    let clip = store
        .get(&FileKey::new(SourceId::new("nas"), "clip.mov"))
        .unwrap()
        .unwrap();
    assert!(clip.partial_hash.is_none());
}

#[test]
fn unreadable_remote_file_is_logged_and_left_out() {
    let temp = TempDir::new().unwrap();
    write_file(temp.path(), "a.jpg", &pattern(5_000, 1));
    write_file(temp.path(), "b.jpg", &pattern(5_000, 1));

    let remote = nas(ScriptedTransport::default()
        .file("a.jpg", pattern(5_000, 1))
        .file("bad.jpg", pattern(5_000, 1))
        .broken("bad.jpg"));

    let store: Arc<dyn MetadataStore> = Arc::new(InMemoryStore::new());
    let session = ScanSession::builder(Arc::clone(&store))
        .source(remote)
        .source(Arc::new(LocalSource::with_id(SourceId::new("photos"), temp.path())))
        .build()
        .unwrap();
    session.start().unwrap();
    let summary = session.wait();

    assert_eq!(summary.state, SessionState::Completed);
    assert_eq!(summary.groups, 1);
    assert_eq!(summary.duplicate_files, 2);

    let errors = session.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::ItemUnreadable);
    assert_eq!(errors[0].source_id.as_deref(), Some("nas"));
    assert_eq!(errors[0].path.as_deref(), Some("bad.jpg"));

    let bad = store
        .get(&FileKey::new(SourceId::new("nas"), "bad.jpg"))
        .unwrap()
        .unwrap();
    assert_eq!(bad.state, ProcessingState::Unique);
    assert!(bad.failure.is_some());
}

#[test]
fn unreachable_remote_does_not_stop_local_scanning() {
    let temp = TempDir::new().unwrap();
    write_file(temp.path(), "a.jpg", &pattern(2_000, 1));
    write_file(temp.path(), "b.jpg", &pattern(2_000, 1));

    let session = ScanSession::builder(Arc::new(InMemoryStore::new()))
        .source(nas(ScriptedTransport::default()
            .file("x.jpg", pattern(2_000, 1))
            .down()))
        .source(Arc::new(LocalSource::with_id(SourceId::new("photos"), temp.path())))
        .build()
        .unwrap();
    session.start().unwrap();
    let summary = session.wait();

    assert_eq!(summary.state, SessionState::Completed);
    assert_eq!(summary.groups, 1);
    let errors = session.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::SourceUnavailable);
    assert_eq!(errors[0].source_id.as_deref(), Some("nas"));
    assert!(session.checkpoint().enumeration_settled());
}
