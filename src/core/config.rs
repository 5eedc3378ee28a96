//! Scan configuration.
//!
//! Loaded from an optional TOML file and layered under command-line flags.
//! Every field has a default, so a partial file is valid.

use crate::core::source::{
    MediaFilter, RetryPolicy, DEFAULT_PHOTO_EXTENSIONS, DEFAULT_VIDEO_EXTENSIONS,
};
use crate::error::ScannerError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix and suffix length of a partial fingerprint for local files
pub const DEFAULT_PARTIAL_CHUNK_SIZE: usize = 4 * 1024;

/// Prefix and suffix length for buckets containing remote files
pub const DEFAULT_REMOTE_PARTIAL_CHUNK_SIZE: usize = 64 * 1024;

/// Read size when streaming a full hash
pub const DEFAULT_STREAM_CHUNK_SIZE: usize = 1024 * 1024;

pub const MAX_LOCAL_WORKERS: usize = 8;
pub const DEFAULT_REMOTE_WORKERS: usize = 3;

/// Enumerated items between periodic checkpoint writes
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 1_000;

/// What happens to persisted records when a session is cancelled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelPolicy {
    /// Keep records so a later rescan can reuse them
    #[default]
    RetainRecords,
    /// Delete the records of every source in the session
    DiscardRecords,
}

/// Configuration for a scan session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub photo_extensions: Vec<String>,
    pub video_extensions: Vec<String>,
    /// Inclusive minimum file size in bytes
    pub min_size: Option<u64>,
    /// Inclusive maximum file size in bytes
    pub max_size: Option<u64>,
    pub include_hidden: bool,
    pub partial_chunk_size: usize,
    pub remote_partial_chunk_size: usize,
    pub stream_chunk_size: usize,
    /// Take the full hash from the partial read when it covered the whole file
    pub fast_scan: bool,
    pub local_workers: usize,
    pub remote_workers: usize,
    /// Reuse full hashes from earlier scans when size and mtime still match
    pub reuse_cached_hashes: bool,
    pub cancel_policy: CancelPolicy,
    pub checkpoint_interval: u64,
    pub retry: RetryPolicy,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            photo_extensions: to_strings(DEFAULT_PHOTO_EXTENSIONS),
            video_extensions: to_strings(DEFAULT_VIDEO_EXTENSIONS),
            min_size: None,
            max_size: None,
            include_hidden: false,
            partial_chunk_size: DEFAULT_PARTIAL_CHUNK_SIZE,
            remote_partial_chunk_size: DEFAULT_REMOTE_PARTIAL_CHUNK_SIZE,
            stream_chunk_size: DEFAULT_STREAM_CHUNK_SIZE,
            fast_scan: false,
            local_workers: default_local_workers(),
            remote_workers: DEFAULT_REMOTE_WORKERS,
            reuse_cached_hashes: true,
            cancel_policy: CancelPolicy::default(),
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            retry: RetryPolicy::default(),
        }
    }
}

impl ScanConfig {
    /// Load from a TOML file; missing keys take their defaults
    pub fn from_toml_file(path: &Path) -> Result<Self, ScannerError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ScannerError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
            .map_err(|e| ScannerError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ScannerError> {
        let config: Self =
            toml::from_str(text).map_err(|e| ScannerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), ScannerError> {
        if self.partial_chunk_size == 0 || self.remote_partial_chunk_size == 0 {
            return Err(ScannerError::Config(
                "partial chunk sizes must be greater than zero".into(),
            ));
        }
        if self.stream_chunk_size == 0 {
            return Err(ScannerError::Config(
                "stream chunk size must be greater than zero".into(),
            ));
        }
        if self.local_workers == 0 || self.remote_workers == 0 {
            return Err(ScannerError::Config(
                "worker counts must be at least 1".into(),
            ));
        }
        if let (Some(min), Some(max)) = (self.min_size, self.max_size) {
            if min > max {
                return Err(ScannerError::Config(format!(
                    "min size {min} is larger than max size {max}"
                )));
            }
        }
        Ok(())
    }

    /// Build the enumeration filter for these settings
    pub fn media_filter(&self) -> MediaFilter {
        MediaFilter::new()
            .with_photo_extensions(&self.photo_extensions)
            .with_video_extensions(&self.video_extensions)
            .with_size_bounds(self.min_size, self.max_size)
            .with_hidden(self.include_hidden)
    }

    pub fn min_size(mut self, bytes: u64) -> Self {
        self.min_size = Some(bytes);
        self
    }

    pub fn max_size(mut self, bytes: u64) -> Self {
        self.max_size = Some(bytes);
        self
    }

    pub fn partial_chunk_size(mut self, bytes: usize) -> Self {
        self.partial_chunk_size = bytes;
        self
    }

    pub fn remote_partial_chunk_size(mut self, bytes: usize) -> Self {
        self.remote_partial_chunk_size = bytes;
        self
    }

    pub fn stream_chunk_size(mut self, bytes: usize) -> Self {
        self.stream_chunk_size = bytes;
        self
    }

    pub fn fast_scan(mut self, enabled: bool) -> Self {
        self.fast_scan = enabled;
        self
    }

    pub fn include_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    pub fn local_workers(mut self, workers: usize) -> Self {
        self.local_workers = workers;
        self
    }

    pub fn remote_workers(mut self, workers: usize) -> Self {
        self.remote_workers = workers;
        self
    }

    pub fn reuse_cached_hashes(mut self, reuse: bool) -> Self {
        self.reuse_cached_hashes = reuse;
        self
    }

    pub fn cancel_policy(mut self, policy: CancelPolicy) -> Self {
        self.cancel_policy = policy;
        self
    }

    pub fn checkpoint_interval(mut self, items: u64) -> Self {
        self.checkpoint_interval = items.max(1);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Available parallelism, capped for disk-bound work
pub fn default_local_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(MAX_LOCAL_WORKERS)
}

/// Default database location: `<cache dir>/duplicate-media-scanner/scanner.db`
pub fn default_db_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("duplicate-media-scanner")
        .join("scanner.db")
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
