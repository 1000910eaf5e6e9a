//! Memory record types and the kind whitelist.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The closed set of record kinds the store accepts.
pub const VALID_MEMORY_KINDS: &[&str] = &["episodic", "semantic", "document", "citation"];

/// Kind of a memory record. Unknown kinds fail the request – they are
/// never coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// A concrete interaction or decision episode.
    Episodic,
    /// Distilled knowledge independent of a single episode.
    Semantic,
    /// An ingested document chunk.
    Document,
    /// A citation produced by the evidence stage.
    Citation,
}

impl MemoryKind {
    /// Parse a kind against the whitelist.
    ///
    /// # Errors
    ///
    /// Returns the offending string for the caller's error message.
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw {
            "episodic" => Ok(Self::Episodic),
            "semantic" => Ok(Self::Semantic),
            "document" => Ok(Self::Document),
            "citation" => Ok(Self::Citation),
            other => Err(other.to_string()),
        }
    }

    /// The wire label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Document => "document",
            Self::Citation => "citation",
        }
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted memory record. Mutated only by full replacement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Record identifier.
    pub id: Uuid,
    /// Owning user; authoritative, derived from the authenticated
    /// principal.
    pub user_id: String,
    /// Whitelisted kind.
    pub kind: MemoryKind,
    /// Record text (possibly redacted before persistence).
    pub text: String,
    /// Fixed-dimension embedding.
    pub embedding: Vec<f32>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Arbitrary caller metadata.
    #[serde(default)]
    pub metadata: FxHashMap<String, Value>,
}
