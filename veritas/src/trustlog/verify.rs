//! Chain verification across the active file and all archives.

use std::path::Path;

use serde::Serialize;
use tracing::warn;

use super::{CURRENT_FILE, MARKER_FILE, RotationMarker, TrustLogError, read_entries};

/// Location and nature of the first divergence found.
#[derive(Debug, Clone, Serialize)]
pub struct ChainDivergence {
    /// File name containing the divergence.
    pub file: String,
    /// 1-based line number.
    pub line: usize,
    /// Expected value (previous hash or recomputed hash).
    pub expected: String,
    /// Actual value found in the entry.
    pub actual: String,
    /// What kind of mismatch was detected.
    pub kind: DivergenceKind,
}

/// The kinds of chain damage verification can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceKind {
    /// The entry's own hash does not match its recomputed value.
    HashMismatch,
    /// The entry's `sha256_prev` does not link to the previous entry.
    BrokenLink,
    /// Archives exist but the marker linking them to the active file is
    /// missing or inconsistent.
    MissingMarker,
}

/// Result of a full chain verification pass.
#[derive(Debug, Clone, Serialize)]
pub struct ChainReport {
    /// True when every entry re-hashed cleanly and every link held.
    pub ok: bool,
    /// Total entries checked across all files.
    pub entries_checked: usize,
    /// Files visited, in verification (chronological) order.
    pub files_checked: Vec<String>,
    /// First divergence, when the chain is broken.
    pub first_divergence: Option<ChainDivergence>,
}

/// Walk archives in chronological order followed by the active file,
/// re-hash every entry, and report the first divergence.
///
/// A missing rotation marker (archives present, no marker) is reported as
/// a chain break; nothing is ever repaired.
///
/// # Errors
///
/// Returns [`TrustLogError`] only for I/O failures – a broken chain is a
/// report, not an error.
pub fn verify_chain(dir: &Path) -> Result<ChainReport, TrustLogError> {
    let mut files: Vec<std::path::PathBuf> = std::fs::read_dir(dir)
        .map_err(|source| TrustLogError::Read {
            path: dir.to_path_buf(),
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
    files.sort();

    let has_archives = !files.is_empty();
    let current = dir.join(CURRENT_FILE);
    if current.exists() {
        files.push(current);
    }

    let mut report = ChainReport {
        ok: true,
        entries_checked: 0,
        files_checked: Vec::with_capacity(files.len()),
        first_divergence: None,
    };

    if has_archives && !dir.join(MARKER_FILE).exists() {
        report.ok = false;
        report.first_divergence = Some(ChainDivergence {
            file: MARKER_FILE.to_string(),
            line: 0,
            expected: "rotation marker".to_string(),
            actual: "missing".to_string(),
            kind: DivergenceKind::MissingMarker,
        });
        warn!("trust log archives present but rotation marker missing");
        return Ok(report);
    }

    let marker: Option<RotationMarker> = if has_archives {
        let raw = std::fs::read_to_string(dir.join(MARKER_FILE)).map_err(|source| {
            TrustLogError::Read {
                path: dir.join(MARKER_FILE),
                source,
            }
        })?;
        Some(serde_json::from_str(&raw)?)
    } else {
        None
    };

    let mut prev_hash: Option<String> = None;

    for file in files {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        report.files_checked.push(name.clone());

        for (idx, entry) in read_entries(&file)?.into_iter().enumerate() {
            let line = idx + 1;
            report.entries_checked += 1;

            let recomputed = entry.recompute_hash();
            if recomputed != entry.sha256 {
                report.ok = false;
                report.first_divergence = Some(ChainDivergence {
                    file: name.clone(),
                    line,
                    expected: recomputed,
                    actual: entry.sha256,
                    kind: DivergenceKind::HashMismatch,
                });
                return Ok(report);
            }

            if entry.sha256_prev != prev_hash {
                report.ok = false;
                report.first_divergence = Some(ChainDivergence {
                    file: name.clone(),
                    line,
                    expected: prev_hash.unwrap_or_else(|| "null".to_string()),
                    actual: entry
                        .sha256_prev
                        .unwrap_or_else(|| "null".to_string()),
                    kind: DivergenceKind::BrokenLink,
                });
                return Ok(report);
            }

            prev_hash = Some(entry.sha256);
        }
    }

    // The marker must agree with the chain tip recorded at rotation: the
    // active file's first entry links to marker.last_hash by the walk
    // above, but an out-of-date marker is still worth surfacing.
    if let Some(marker) = marker {
        let marker_seen = report.files_checked.iter().any(|f| *f == marker.archive);
        if !marker_seen {
            report.ok = false;
            report.first_divergence = Some(ChainDivergence {
                file: MARKER_FILE.to_string(),
                line: 0,
                expected: marker.archive,
                actual: "archive not found".to_string(),
                kind: DivergenceKind::MissingMarker,
            });
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::super::TrustLog;
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn fresh_log_verifies_clean() {
        let dir = tempdir().unwrap();
        let log = TrustLog::open(dir.path(), 1024 * 1024).unwrap();
        for n in 0..10 {
            log.append(&format!("r{n}"), "decide", json!({"n": n})).unwrap();
        }

        let report = verify_chain(dir.path()).unwrap();
        assert!(report.ok);
        assert_eq!(report.entries_checked, 10);
        assert!(report.first_divergence.is_none());
    }

    #[test]
    fn flipped_byte_is_located() {
        let dir = tempdir().unwrap();
        let log = TrustLog::open(dir.path(), 1024 * 1024).unwrap();
        for n in 0..5 {
            log.append(&format!("r{n}"), "decide", json!({"n": n})).unwrap();
        }

        // Corrupt the payload of line 3 without touching its hash.
        let path = dir.path().join(CURRENT_FILE);
        let raw = std::fs::read_to_string(&path).unwrap();
        let edited: Vec<String> = raw
            .lines()
            .enumerate()
            .map(|(i, l)| {
                if i == 2 {
                    l.replace(r#""n":2"#, r#""n":9"#)
                } else {
                    l.to_string()
                }
            })
            .collect();
        std::fs::write(&path, edited.join("\n") + "\n").unwrap();

        let report = verify_chain(dir.path()).unwrap();
        assert!(!report.ok);
        let div = report.first_divergence.unwrap();
        assert_eq!(div.file, CURRENT_FILE);
        assert_eq!(div.line, 3);
        assert_eq!(div.kind, DivergenceKind::HashMismatch);
        assert_ne!(div.expected, div.actual);
    }

    #[test]
    fn missing_marker_is_a_chain_break() {
        let dir = tempdir().unwrap();
        let log = TrustLog::open(dir.path(), 64).unwrap();
        log.append("r1", "decide", json!({"pad": "x".repeat(64)})).unwrap();
        log.append("r2", "decide", json!({})).unwrap(); // rotates

        std::fs::remove_file(dir.path().join(MARKER_FILE)).unwrap();

        let report = verify_chain(dir.path()).unwrap();
        assert!(!report.ok);
        assert_eq!(
            report.first_divergence.unwrap().kind,
            DivergenceKind::MissingMarker
        );
    }

    #[test]
    fn chain_verifies_across_rotation() {
        let dir = tempdir().unwrap();
        let log = TrustLog::open(dir.path(), 64).unwrap();
        for n in 0..4 {
            log.append(&format!("r{n}"), "decide", json!({"pad": "y".repeat(40)}))
                .unwrap();
        }

        let report = verify_chain(dir.path()).unwrap();
        assert!(report.ok, "divergence: {:?}", report.first_divergence);
        assert_eq!(report.entries_checked, 4);
        assert!(report.files_checked.len() >= 2);
    }
}
