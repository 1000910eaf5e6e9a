//! TrustLog entry type and chain hashing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::utils::canon::canonical_json;

/// One line in the hash-chained audit log.
///
/// `sha256` covers `sha256_prev` concatenated with the canonical JSON of
/// the entry without its hash fields; `sha256_prev` is the previous
/// entry's `sha256`, or `null` for the genesis entry of the whole chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustLogEntry {
    /// Request this entry belongs to.
    pub request_id: String,
    /// UTC creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Pipeline stage or governance event that produced the entry.
    pub stage: String,
    /// Arbitrary audit payload.
    pub payload: Value,
    /// Previous entry's hash (lowercase hex), `None` for genesis.
    pub sha256_prev: Option<String>,
    /// This entry's hash (lowercase hex).
    pub sha256: String,
}

impl TrustLogEntry {
    /// Build a new entry chained onto `prev_hash`.
    #[must_use]
    pub fn chained(
        request_id: impl Into<String>,
        stage: impl Into<String>,
        payload: Value,
        prev_hash: Option<String>,
    ) -> Self {
        let request_id = request_id.into();
        let stage = stage.into();
        let created_at = Utc::now();
        let sha256 = compute_hash(&request_id, created_at, &stage, &payload, prev_hash.as_deref());
        Self {
            request_id,
            created_at,
            stage,
            payload,
            sha256_prev: prev_hash,
            sha256,
        }
    }

    /// Recompute this entry's hash from its own fields.
    #[must_use]
    pub fn recompute_hash(&self) -> String {
        compute_hash(
            &self.request_id,
            self.created_at,
            &self.stage,
            &self.payload,
            self.sha256_prev.as_deref(),
        )
    }

    /// Whether the stored hash matches the recomputed one.
    #[must_use]
    pub fn hash_valid(&self) -> bool {
        self.sha256 == self.recompute_hash()
    }
}

/// `SHA-256(sha256_prev || canonical(entry_without_hashes))`, lowercase hex.
fn compute_hash(
    request_id: &str,
    created_at: DateTime<Utc>,
    stage: &str,
    payload: &Value,
    prev: Option<&str>,
) -> String {
    let without_hashes = json!({
        "request_id": request_id,
        "created_at": created_at,
        "stage": stage,
        "payload": payload,
    });

    let mut hasher = Sha256::new();
    if let Some(prev) = prev {
        hasher.update(prev.as_bytes());
    }
    hasher.update(canonical_json(&without_hashes).as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_has_no_prev() {
        let entry = TrustLogEntry::chained("r1", "decide", json!({"ok": true}), None);
        assert!(entry.sha256_prev.is_none());
        assert!(entry.hash_valid());
        assert_eq!(entry.sha256.len(), 64);
        assert!(entry.sha256.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(entry.sha256, entry.sha256.to_lowercase());
    }

    #[test]
    fn chained_entries_link() {
        let first = TrustLogEntry::chained("r1", "decide", json!({}), None);
        let second =
            TrustLogEntry::chained("r2", "decide", json!({}), Some(first.sha256.clone()));
        assert_eq!(second.sha256_prev.as_deref(), Some(first.sha256.as_str()));
        assert!(second.hash_valid());
    }

    #[test]
    fn tampering_invalidates_hash() {
        let mut entry = TrustLogEntry::chained("r1", "decide", json!({"risk": 0.1}), None);
        entry.payload = json!({"risk": 0.9});
        assert!(!entry.hash_valid());
    }

    #[test]
    fn json_line_round_trips() {
        let entry = TrustLogEntry::chained("r1", "governance_policy_updated", json!({"v": "2"}), None);
        let line = serde_json::to_string(&entry).unwrap();
        assert!(!line.contains('\n'));
        let back: TrustLogEntry = serde_json::from_str(&line).unwrap();
        assert_eq!(back, entry);
        assert!(back.hash_valid());
    }
}
