//! Append-only, hash-chained, rotated audit log.
//!
//! One active file (`trust_log.jsonl`) plus timestamped archives
//! (`trust_log.YYYYMMDDThhmmssZ.jsonl`). The hash chain continues across
//! rotations through a sibling marker file (`trust_log.marker`) recording
//! the last hash at rotation time. Appends are serialized through a
//! reentrant lock and made durable with the fsync discipline of
//! [`crate::fsio`].
//!
//! Chain breaks are reported, never repaired.

pub mod entry;
pub mod verify;

pub use entry::TrustLogEntry;
pub use verify::{ChainDivergence, ChainReport, verify_chain};

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use parking_lot::ReentrantMutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::fsio::{self, FsIoError};

/// Active log file name.
pub const CURRENT_FILE: &str = "trust_log.jsonl";
/// Rotation marker file name.
pub const MARKER_FILE: &str = "trust_log.marker";
/// Block size for the backwards tail walk.
const TAIL_BLOCK: u64 = 4096;

/// Errors raised by TrustLog operations.
#[derive(Debug, Error, Diagnostic)]
pub enum TrustLogError {
    /// An atomic-I/O primitive failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Io(#[from] FsIoError),

    /// Raw I/O failure outside the substrate (reads, seeks).
    #[error("trust log read failed on {path}: {source}")]
    #[diagnostic(code(veritas::trustlog::read))]
    Read {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// An entry could not be serialized to a JSON line.
    #[error("trust log entry serialization failed: {source}")]
    #[diagnostic(code(veritas::trustlog::serde))]
    Serde {
        /// Underlying error.
        #[from]
        source: serde_json::Error,
    },

    /// The chain is broken; reported, never repaired.
    #[error("trust log chain break in {file} at line {line}")]
    #[diagnostic(
        code(veritas::trustlog::chain_break),
        help("Inspect the divergence with verify_chain; the log is never rewritten in place.")
    )]
    ChainBreak {
        /// File containing the divergence.
        file: String,
        /// 1-based line number.
        line: usize,
    },
}

/// Marker recording the chain tip at the most recent rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationMarker {
    /// Hash of the last entry written before rotation.
    pub last_hash: String,
    /// Archive file the hash belongs to.
    pub archive: String,
    /// When the rotation happened.
    pub rotated_at: DateTime<Utc>,
}

/// Result of a per-request audit read.
#[derive(Debug, Clone, Serialize)]
pub struct RequestAudit {
    /// Entries for the request, newest file first.
    pub entries: Vec<TrustLogEntry>,
    /// Whether the full chain verified clean.
    pub chain_ok: bool,
    /// The full verification result backing `chain_ok`.
    pub verification_result: ChainReport,
}

/// The append-only audit log service.
pub struct TrustLog {
    dir: PathBuf,
    max_log_size: u64,
    lock: ReentrantMutex<()>,
}

impl TrustLog {
    /// Open (or start) a log in `dir`, rotating when the active file
    /// exceeds `max_log_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`TrustLogError`] if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>, max_log_size: u64) -> Result<Self, TrustLogError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| TrustLogError::Read {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            max_log_size,
            lock: ReentrantMutex::new(()),
        })
    }

    /// Directory holding the active file, archives, and marker.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn current_path(&self) -> PathBuf {
        self.dir.join(CURRENT_FILE)
    }

    fn marker_path(&self) -> PathBuf {
        self.dir.join(MARKER_FILE)
    }

    /// Append an entry for `request_id` at `stage`, chaining it onto the
    /// current tip. Returns the durable entry.
    ///
    /// # Errors
    ///
    /// Returns [`TrustLogError`] on I/O failure; nothing partial is left
    /// in the log.
    pub fn append(
        &self,
        request_id: &str,
        stage: &str,
        payload: Value,
    ) -> Result<TrustLogEntry, TrustLogError> {
        let _guard = self.lock.lock();

        self.rotate_if_needed()?;

        let prev = self.last_hash()?;
        let entry = TrustLogEntry::chained(request_id, stage, payload, prev);
        let line = serde_json::to_string(&entry)?;

        let path = fsio::guard_path(&self.dir, &self.current_path())?;
        fsio::atomic_append_line(&path, &line)?;
        Ok(entry)
    }

    /// The hash of the most recent entry, following the marker across a
    /// fresh post-rotation file. `None` means the chain has no entries.
    ///
    /// # Errors
    ///
    /// Returns [`TrustLogError`] on read failure.
    pub fn last_hash(&self) -> Result<Option<String>, TrustLogError> {
        let _guard = self.lock.lock();

        if let Some(entry) = read_last_entry(&self.current_path())? {
            return Ok(Some(entry.sha256));
        }

        // Empty or absent active file: the marker carries the tip across
        // the most recent rotation.
        match self.read_marker()? {
            Some(marker) => Ok(Some(marker.last_hash)),
            None => Ok(None),
        }
    }

    /// Read the rotation marker, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`TrustLogError`] when the marker exists but is unreadable.
    pub fn read_marker(&self) -> Result<Option<RotationMarker>, TrustLogError> {
        let path = self.marker_path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path).map_err(|source| TrustLogError::Read {
            path: path.clone(),
            source,
        })?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Verify the whole chain in this log's directory.
    ///
    /// # Errors
    ///
    /// Returns [`TrustLogError`] on read failure; divergences are
    /// reported inside the [`ChainReport`], not as errors.
    pub fn verify(&self) -> Result<ChainReport, TrustLogError> {
        let _guard = self.lock.lock();
        verify_chain(&self.dir)
    }

    /// All entries for `request_id`, scanning the active file and
    /// archives in reverse chronological order, with chain verification
    /// attached.
    ///
    /// # Errors
    ///
    /// Returns [`TrustLogError`] on read failure.
    pub fn get_by_request_id(&self, request_id: &str) -> Result<RequestAudit, TrustLogError> {
        let _guard = self.lock.lock();

        let mut files = vec![self.current_path()];
        let mut archives = self.archive_paths()?;
        archives.reverse();
        files.extend(archives);

        let mut entries = Vec::new();
        for file in files {
            if !file.exists() {
                continue;
            }
            for entry in read_entries(&file)? {
                if entry.request_id == request_id {
                    entries.push(entry);
                }
            }
        }

        let verification_result = verify_chain(&self.dir)?;
        let chain_ok = verification_result.ok;
        if !chain_ok {
            error!(
                request_id,
                divergence = ?verification_result.first_divergence,
                "trust log chain break detected during audit read"
            );
        }

        Ok(RequestAudit {
            entries,
            chain_ok,
            verification_result,
        })
    }

    /// Archive files sorted chronologically (name order).
    fn archive_paths(&self) -> Result<Vec<PathBuf>, TrustLogError> {
        let mut archives: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .map_err(|source| TrustLogError::Read {
                path: self.dir.clone(),
                source,
            })?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                let name = p.file_name().map(|n| n.to_string_lossy().into_owned());
                name.is_some_and(|n| {
                    n.starts_with("trust_log.") && n.ends_with(".jsonl") && n != CURRENT_FILE
                })
            })
            .collect();
        archives.sort();
        Ok(archives)
    }

    /// Rotate the active file when it exceeds the size threshold. Runs
    /// under the append lock.
    fn rotate_if_needed(&self) -> Result<(), TrustLogError> {
        let path = self.current_path();
        let Ok(meta) = std::fs::symlink_metadata(&path) else {
            return Ok(()); // no active file yet
        };
        if meta.file_type().is_symlink() {
            return Err(FsIoError::SymlinkRefused { path }.into());
        }
        if meta.len() <= self.max_log_size {
            return Ok(());
        }

        let Some(last) = read_last_entry(&path)? else {
            return Ok(()); // oversized but unparseable tail; leave for verify
        };

        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let mut archive = self.dir.join(format!("trust_log.{stamp}.jsonl"));
        // Same-second rotations get a disambiguating suffix.
        let mut attempt = 1u32;
        while archive.exists() {
            archive = self
                .dir
                .join(format!("trust_log.{stamp}.{attempt}.jsonl"));
            attempt += 1;
        }

        std::fs::rename(&path, &archive).map_err(|source| TrustLogError::Read {
            path: path.clone(),
            source,
        })?;
        fsio::fsync_parent_dir(&path)?;

        let marker = RotationMarker {
            last_hash: last.sha256,
            archive: archive
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            rotated_at: Utc::now(),
        };
        fsio::atomic_write_json(&self.marker_path(), &marker)?;

        info!(
            archive = %marker.archive,
            last_hash = %marker.last_hash,
            "trust log rotated"
        );
        Ok(())
    }
}

/// Read every entry of a log file, skipping unparseable lines with a
/// warning (they surface as divergences in verification instead).
pub(crate) fn read_entries(path: &Path) -> Result<Vec<TrustLogEntry>, TrustLogError> {
    let raw = std::fs::read_to_string(path).map_err(|source| TrustLogError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut entries = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TrustLogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(err) => {
                warn!(
                    file = %path.display(),
                    line = idx + 1,
                    error = %err,
                    "unparseable trust log line"
                );
            }
        }
    }
    Ok(entries)
}

/// Read the last complete entry of `path` by walking backwards in bounded
/// blocks.
///
/// The walk grows the window until it finds a `\n`-terminated (or
/// file-initial) byte run that is valid UTF-8 and parses as an entry.
/// Truncated trailing garbage is skipped by retrying at the previous
/// newline, so a torn final write never hides the real tip. Multi-byte
/// UTF-8 sequences split across block boundaries are handled by operating
/// on bytes and only converting candidate lines.
fn read_last_entry(path: &Path) -> Result<Option<TrustLogEntry>, TrustLogError> {
    let Ok(mut file) = File::open(path) else {
        return Ok(None);
    };
    let len = file
        .metadata()
        .map_err(|source| TrustLogError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .len();
    if len == 0 {
        return Ok(None);
    }

    let mut window: Vec<u8> = Vec::new();
    let mut start = len;

    while start > 0 {
        let read_from = start.saturating_sub(TAIL_BLOCK);
        let mut block = vec![0u8; (start - read_from) as usize];
        file.seek(SeekFrom::Start(read_from))
            .map_err(|source| TrustLogError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        file.read_exact(&mut block)
            .map_err(|source| TrustLogError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        block.extend_from_slice(&window);
        window = block;
        start = read_from;

        if let Some(entry) = last_parseable_line(&window, start == 0) {
            return Ok(Some(entry));
        }
    }

    Ok(None)
}

/// Find the last line in `window` that parses as an entry.
///
/// Unless `complete` is true, the first (possibly truncated) line of the
/// window is ignored because its beginning may lie before the window.
fn last_parseable_line(window: &[u8], complete: bool) -> Option<TrustLogEntry> {
    let mut lines: Vec<&[u8]> = window.split(|&b| b == b'\n').collect();
    if !complete && !lines.is_empty() {
        lines.remove(0);
    }
    for candidate in lines.iter().rev() {
        if candidate.is_empty() {
            continue;
        }
        let Ok(text) = std::str::from_utf8(candidate) else {
            continue;
        };
        if let Ok(entry) = serde_json::from_str::<TrustLogEntry>(text) {
            return Some(entry);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn appends_chain_in_order() {
        let dir = tempdir().unwrap();
        let log = TrustLog::open(dir.path(), 1024 * 1024).unwrap();

        let a = log.append("r1", "decide", json!({"n": 1})).unwrap();
        let b = log.append("r2", "decide", json!({"n": 2})).unwrap();
        let c = log.append("r3", "decide", json!({"n": 3})).unwrap();

        assert!(a.sha256_prev.is_none());
        assert_eq!(b.sha256_prev.as_deref(), Some(a.sha256.as_str()));
        assert_eq!(c.sha256_prev.as_deref(), Some(b.sha256.as_str()));
    }

    #[test]
    fn last_hash_survives_torn_tail() {
        let dir = tempdir().unwrap();
        let log = TrustLog::open(dir.path(), 1024 * 1024).unwrap();
        let entry = log.append("r1", "decide", json!({})).unwrap();

        // Simulate a torn write: partial JSON with a multi-byte char cut in half.
        let path = dir.path().join(CURRENT_FILE);
        let mut raw = std::fs::read(&path).unwrap();
        raw.extend_from_slice(br#"{"request_id":"r2","created_at":"2026-"#);
        raw.extend_from_slice(&"傘".as_bytes()[..2]);
        std::fs::write(&path, raw).unwrap();

        assert_eq!(log.last_hash().unwrap(), Some(entry.sha256));
    }

    #[test]
    fn rotation_continues_chain_via_marker() {
        let dir = tempdir().unwrap();
        // Tiny threshold: every append after the first triggers rotation.
        let log = TrustLog::open(dir.path(), 64).unwrap();

        let first = log.append("r1", "decide", json!({"pad": "x".repeat(64)})).unwrap();
        let second = log.append("r2", "decide", json!({})).unwrap();

        let marker = log.read_marker().unwrap().expect("marker after rotation");
        assert_eq!(marker.last_hash, first.sha256);
        assert_eq!(second.sha256_prev.as_deref(), Some(first.sha256.as_str()));

        let archives: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| {
                let n = e.file_name().to_string_lossy().into_owned();
                n != CURRENT_FILE && n.ends_with(".jsonl")
            })
            .collect();
        assert_eq!(archives.len(), 1);
    }

    #[test]
    fn get_by_request_id_spans_archives() {
        let dir = tempdir().unwrap();
        let log = TrustLog::open(dir.path(), 64).unwrap();

        log.append("req-a", "decide", json!({"pad": "x".repeat(64)})).unwrap();
        log.append("req-b", "decide", json!({})).unwrap();
        log.append("req-a", "governance_policy_updated", json!({})).unwrap();

        let audit = log.get_by_request_id("req-a").unwrap();
        assert_eq!(audit.entries.len(), 2);
        assert!(audit.chain_ok);
    }
}
