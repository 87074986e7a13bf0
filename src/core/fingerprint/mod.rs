//! # Fingerprint Module
//!
//! Streaming BLAKE3 content hashes.
//!
//! Files are read in fixed-size chunks so peak memory does not depend on
//! file size. The byte count observed while reading is recorded next to the
//! hash; a file that yields fewer bytes than its metadata promised is
//! treated as truncated.

use crate::core::record::{FailureReason, FileRecord, RecordState};
use crate::error::HashError;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Read buffer size for hashing
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Content identity of a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Hex BLAKE3 digest
    pub hash: String,
    /// Bytes actually read
    pub size: u64,
}

/// What happened to a record in the fingerprint stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintOutcome {
    Hashed,
    /// Hash reused from the manifest; the file was not read
    Cached,
    Failed(FailureReason),
}

/// Computes content hashes
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    chunk_size: usize,
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new(CHUNK_SIZE)
    }
}

impl Fingerprinter {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Hash a file, checking the observed length against `expected_size`
    pub fn hash_file(&self, path: &Path, expected_size: u64) -> Result<Fingerprint, HashError> {
        let mut file = File::open(path).map_err(|e| HashError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut hasher = blake3::Hasher::new();
        let mut buffer = vec![0u8; self.chunk_size];
        let mut size = 0u64;

        loop {
            let read = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(HashError::Read {
                        path: path.to_path_buf(),
                        source: e,
                    })
                }
            };
            hasher.update(&buffer[..read]);
            size += read as u64;
        }

        if size == 0 {
            return Err(HashError::Empty {
                path: path.to_path_buf(),
            });
        }
        if size < expected_size {
            return Err(HashError::Truncated {
                path: path.to_path_buf(),
                expected: expected_size,
                actual: size,
            });
        }

        Ok(Fingerprint {
            hash: hasher.finalize().to_hex().to_string(),
            size,
        })
    }

    /// Advance a record through the fingerprint stage.
    ///
    /// A record that already carries a hash for its current stamp is left
    /// untouched. Failures are written onto the record, never returned.
    pub fn fingerprint(&self, record: &mut FileRecord) -> FingerprintOutcome {
        if record.hash.is_some() && record.state.reached(RecordState::Hashed) {
            return FingerprintOutcome::Cached;
        }

        match self.hash_file(&record.path, record.stamp.size) {
            Ok(fingerprint) => {
                record.hash = Some(fingerprint.hash);
                record.size = fingerprint.size;
                record.state = RecordState::Hashed;
                FingerprintOutcome::Hashed
            }
            Err(error) => {
                let reason = failure_reason(&error);
                tracing::warn!(path = %record.path.display(), %reason, "fingerprint failed: {}", error);
                record.hash = None;
                record.mark_failed(reason, error.to_string());
                FingerprintOutcome::Failed(reason)
            }
        }
    }
}

/// Map a hashing error to the reason recorded on the file.
///
/// Open failures caused by permissions stay `PermissionDenied`; anything
/// else about the content (empty, short, unreadable) counts as corruption.
pub fn failure_reason(error: &HashError) -> FailureReason {
    match error {
        HashError::Open { source, .. } => match FailureReason::from_io(source) {
            FailureReason::PermissionDenied => FailureReason::PermissionDenied,
            FailureReason::Missing => FailureReason::Missing,
            _ => FailureReason::Corrupted,
        },
        HashError::Read { .. } | HashError::Empty { .. } | HashError::Truncated { .. } => {
            FailureReason::Corrupted
        }
    }
}

/// One-off hash of a file with the default chunk size
pub fn hash_file(path: &Path) -> Result<Fingerprint, HashError> {
    Fingerprinter::default().hash_file(path, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::{MediaKind, SourceStamp};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn scanned(path: PathBuf) -> FileRecord {
        let stamp = SourceStamp::from_metadata(&fs::metadata(&path).unwrap());
        FileRecord::new(path, stamp, MediaKind::Image)
    }

    #[test]
    fn identical_content_gives_identical_hash() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.jpg");
        let b = dir.path().join("b.jpg");
        fs::write(&a, b"same bytes").unwrap();
        fs::write(&b, b"same bytes").unwrap();

        let hasher = Fingerprinter::default();
        let first = hasher.hash_file(&a, 10).unwrap();
        let second = hasher.hash_file(&b, 10).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.size, 10);
        assert_eq!(first.hash.len(), 64);
    }

    #[test]
    fn chunk_size_does_not_change_the_hash() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.bin");
        let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &content).unwrap();

        let small = Fingerprinter::new(7).hash_file(&path, 0).unwrap();
        let large = Fingerprinter::new(CHUNK_SIZE).hash_file(&path, 0).unwrap();
        assert_eq!(small.hash, large.hash);
        assert_eq!(small.hash, blake3::hash(&content).to_hex().to_string());
    }

    #[test]
    fn empty_file_is_corrupted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.jpg");
        fs::write(&path, b"").unwrap();

        let mut record = scanned(path);
        let outcome = Fingerprinter::default().fingerprint(&mut record);

        assert_eq!(outcome, FingerprintOutcome::Failed(FailureReason::Corrupted));
        assert_eq!(record.state, RecordState::Failed);
        assert!(record.is_corrupted());
    }

    #[test]
    fn short_read_is_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.jpg");
        fs::write(&path, b"12345").unwrap();

        let error = Fingerprinter::default().hash_file(&path, 10).unwrap_err();
        assert!(matches!(error, HashError::Truncated { actual: 5, .. }));
        assert_eq!(failure_reason(&error), FailureReason::Corrupted);
    }

    #[test]
    fn vanished_file_is_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.jpg");
        fs::write(&path, b"data").unwrap();
        let mut record = scanned(path.clone());
        fs::remove_file(&path).unwrap();

        let outcome = Fingerprinter::default().fingerprint(&mut record);
        assert_eq!(outcome, FingerprintOutcome::Failed(FailureReason::Missing));
    }

    #[test]
    fn cached_hash_is_not_recomputed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.jpg");
        fs::write(&path, b"data").unwrap();

        let mut record = scanned(path);
        record.hash = Some("cached".to_string());
        record.state = RecordState::Scored;

        let outcome = Fingerprinter::default().fingerprint(&mut record);
        assert_eq!(outcome, FingerprintOutcome::Cached);
        assert_eq!(record.hash.as_deref(), Some("cached"));
        assert_eq!(record.state, RecordState::Scored);
    }
}
