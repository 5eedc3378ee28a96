//! Partial fingerprints and streaming full digests.

use crate::core::control::ScanControl;
use crate::core::record::ContentHash;
use crate::core::source::ContentReader;
use crate::error::HashError;
use std::io::{ErrorKind, Read, Seek, SeekFrom};

/// Result of a partial read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialFingerprint {
    pub hash: ContentHash,
    /// Set when the partial read covered the whole file and a full hash was asked for
    pub full_hash: Option<ContentHash>,
    pub bytes_read: u64,
}

/// Hash the first `chunk` bytes and, for files longer than two chunks, the last `chunk` bytes.
pub fn partial_fingerprint(
    reader: &mut dyn ContentReader,
    path: &str,
    size: u64,
    chunk: usize,
    derive_full: bool,
) -> Result<PartialFingerprint, HashError> {
    let head_len = (chunk as u64).min(size) as usize;
    let mut head = vec![0u8; head_len];
    read_exact(reader, path, &mut head, size)?;

    let mut hasher = blake3::Hasher::new();
    hasher.update(&head);
    let mut bytes_read = head_len as u64;

    if size > 2 * chunk as u64 {
        reader
            .seek(SeekFrom::Start(size - chunk as u64))
            .map_err(|source| HashError::Read {
                path: path.to_string(),
                source,
            })?;
        let mut tail = vec![0u8; chunk];
        read_exact(reader, path, &mut tail, size)?;
        hasher.update(&tail);
        bytes_read += chunk as u64;
    }

    let full_hash =
        (derive_full && size <= chunk as u64).then(|| ContentHash::from(blake3::hash(&head)));

    Ok(PartialFingerprint {
        hash: ContentHash::from(hasher.finalize()),
        full_hash,
        bytes_read,
    })
}

/// Stream the whole file through BLAKE3 in `chunk`-sized reads.
///
/// Cancellation is checked before every read. Returns the digest and bytes read.
pub fn stream_full_hash(
    reader: &mut dyn ContentReader,
    path: &str,
    size: u64,
    chunk: usize,
    control: &ScanControl,
) -> Result<(ContentHash, u64), HashError> {
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; chunk.max(1)];
    let mut total = 0u64;

    loop {
        if control.is_cancelled() {
            return Err(HashError::Cancelled {
                path: path.to_string(),
            });
        }

        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(HashError::Read {
                    path: path.to_string(),
                    source,
                })
            }
        };
        hasher.update(&buffer[..n]);
        total += n as u64;
    }

    if total != size {
        return Err(HashError::SizeChanged {
            path: path.to_string(),
            expected: size,
            actual: total,
        });
    }

    Ok((ContentHash::from(hasher.finalize()), total))
}

fn read_exact(
    reader: &mut dyn ContentReader,
    path: &str,
    buf: &mut [u8],
    expected_size: u64,
) -> Result<(), HashError> {
    reader.read_exact(buf).map_err(|source| {
        if source.kind() == ErrorKind::UnexpectedEof {
            HashError::SizeChanged {
                path: path.to_string(),
                expected: expected_size,
                actual: buf.len() as u64,
            }
        } else {
            HashError::Read {
                path: path.to_string(),
                source,
            }
        }
    })
}
