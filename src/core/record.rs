//! File records and their processing lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Stable identity of a media source
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique key of a file: its source plus the path relative to the source root.
///
/// Relative paths always use `/` as separator, for local and remote sources alike.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileKey {
    pub source_id: SourceId,
    pub path: String,
}

impl FileKey {
    pub fn new(source_id: SourceId, path: impl Into<String>) -> Self {
        Self {
            source_id,
            path: path.into(),
        }
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_id, self.path)
    }
}

/// Kind of media, derived from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "photo" => Some(MediaKind::Photo),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

/// Where a record is in the narrowing pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProcessingState {
    Discovered,
    SizeCandidate,
    PartialHashCandidate,
    FullHashed,
    DuplicateConfirmed,
    Unique,
}

impl ProcessingState {
    pub const ALL: [ProcessingState; 6] = [
        ProcessingState::Discovered,
        ProcessingState::SizeCandidate,
        ProcessingState::PartialHashCandidate,
        ProcessingState::FullHashed,
        ProcessingState::DuplicateConfirmed,
        ProcessingState::Unique,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingState::Discovered => "discovered",
            ProcessingState::SizeCandidate => "size_candidate",
            ProcessingState::PartialHashCandidate => "partial_hash_candidate",
            ProcessingState::FullHashed => "full_hashed",
            ProcessingState::DuplicateConfirmed => "duplicate_confirmed",
            ProcessingState::Unique => "unique",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == s)
    }

    /// `Unique` and `DuplicateConfirmed` end the lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessingState::Unique | ProcessingState::DuplicateConfirmed
        )
    }

    /// Forward-only transitions. Any non-terminal state may exit early to `Unique`.
    pub fn can_advance_to(&self, next: ProcessingState) -> bool {
        use ProcessingState::*;
        if *self == next {
            return true;
        }
        match (self, next) {
            (Discovered, SizeCandidate) => true,
            (SizeCandidate, PartialHashCandidate) => true,
            (PartialHashCandidate, FullHashed) => true,
            (FullHashed, DuplicateConfirmed) => true,
            (from, Unique) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A 256-bit BLAKE3 content digest
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub const LEN: usize = 32;

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Build from a byte slice, as read back from a store
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != Self::LEN * 2 || !hex.is_ascii() {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(bytes))
    }
}

impl From<blake3::Hash> for ContentHash {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        ContentHash::from_hex(&hex)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid content hash: {hex}")))
    }
}

/// A discovered media file and its hashing progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub key: FileKey,
    pub size: u64,
    /// Remote sources may not report a reliable modification time
    pub modified: Option<DateTime<Utc>>,
    pub media_kind: MediaKind,
    pub state: ProcessingState,
    pub partial_hash: Option<ContentHash>,
    pub full_hash: Option<ContentHash>,
    /// Why the file dropped out of the pipeline, if it became unreadable
    pub failure: Option<String>,
}

impl FileRecord {
    /// A freshly enumerated record
    pub fn discovered(
        key: FileKey,
        size: u64,
        modified: Option<DateTime<Utc>>,
        media_kind: MediaKind,
    ) -> Self {
        Self {
            key,
            size,
            modified,
            media_kind,
            state: ProcessingState::Discovered,
            partial_hash: None,
            full_hash: None,
            failure: None,
        }
    }

    pub fn source_id(&self) -> &SourceId {
        &self.key.source_id
    }
}

/// Field changes applied to an existing record by key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub state: Option<ProcessingState>,
    pub partial_hash: Option<ContentHash>,
    pub full_hash: Option<ContentHash>,
    pub failure: Option<String>,
}

impl RecordUpdate {
    pub fn state(state: ProcessingState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn partial_hash(hash: ContentHash) -> Self {
        Self {
            partial_hash: Some(hash),
            ..Default::default()
        }
    }

    pub fn full_hash(hash: ContentHash) -> Self {
        Self {
            full_hash: Some(hash),
            ..Default::default()
        }
    }

    /// Mark a record unreadable; it leaves the pipeline as `Unique`
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            state: Some(ProcessingState::Unique),
            failure: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_full_hash(mut self, hash: ContentHash) -> Self {
        self.full_hash = Some(hash);
        self
    }

    /// Apply onto a record, refusing backward state changes
    pub fn apply_to(&self, record: &mut FileRecord) -> Result<(), crate::error::StoreError> {
        if let Some(next) = self.state {
            if !record.state.can_advance_to(next) {
                return Err(crate::error::StoreError::IllegalTransition {
                    key: record.key.to_string(),
                    from: record.state.to_string(),
                    to: next.to_string(),
                });
            }
            record.state = next;
        }
        if let Some(hash) = self.partial_hash {
            record.partial_hash = Some(hash);
        }
        if let Some(hash) = self.full_hash {
            record.full_hash = Some(hash);
        }
        if let Some(ref failure) = self.failure {
            record.failure = Some(failure.clone());
        }
        Ok(())
    }
}
