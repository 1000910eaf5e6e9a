//! Episodic + semantic memory with vector similarity search.
//!
//! Records are sharded per user; `user_id` is authoritative and must come
//! from the authenticated principal, never from the request body. Each
//! shard persists as one JSON document written atomically, and serves
//! similarity search through an immutable [`VectorIndex`] snapshot that
//! is pointer-swapped on rebuild.
//!
//! Only structured JSON is ever deserialized from disk. A shard file that
//! is not valid JSON – legacy binary state included – fails closed with a
//! security warning.

pub mod embedder;
pub mod index;
pub mod record;

pub use embedder::{Embedder, EmbedderError, HashEmbedder};
pub use index::{IndexHit, VectorIndex};
pub use record::{MemoryKind, MemoryRecord, VALID_MEMORY_KINDS};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::fsio::{self, FsIoError};

/// Default per-user record cap (configurable; see
/// [`crate::config::VeritasConfig`]).
pub const DEFAULT_MAX_RECORDS_PER_USER: usize = 512;
/// Maximum characters of text per record.
pub const MAX_TEXT_CHARS: usize = 20_000;

/// Errors raised by memory operations.
#[derive(Debug, Error, Diagnostic)]
pub enum MemoryError {
    /// `kind` is not in [`VALID_MEMORY_KINDS`].
    #[error("unknown memory kind: {kind}")]
    #[diagnostic(
        code(veritas::memory::unknown_kind),
        help("Valid kinds: episodic, semantic, document, citation.")
    )]
    UnknownKind {
        /// The rejected kind.
        kind: String,
    },

    /// Empty text is rejected.
    #[error("memory text must not be empty")]
    #[diagnostic(code(veritas::memory::empty_text))]
    EmptyText,

    /// Text exceeds [`MAX_TEXT_CHARS`].
    #[error("memory text too large: {chars} chars (limit {MAX_TEXT_CHARS})")]
    #[diagnostic(code(veritas::memory::text_too_large))]
    TextTooLarge {
        /// Offending size.
        chars: usize,
    },

    /// No record with that id is owned by the user.
    #[error("memory record not found: {id}")]
    #[diagnostic(code(veritas::memory::not_found))]
    NotFound {
        /// Requested id.
        id: Uuid,
    },

    /// Embedding failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Embedder(#[from] EmbedderError),

    /// Disk I/O failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Io(#[from] FsIoError),

    /// The shard file is not structured JSON; loading is fail-closed.
    #[error("refusing to load non-JSON shard state at {path}")]
    #[diagnostic(
        code(veritas::memory::legacy_format_refused),
        help("Migrate legacy state offline; the runtime only loads structured JSON.")
    )]
    LegacyFormatRefused {
        /// Offending file.
        path: PathBuf,
    },

    /// The shard file is JSON but does not match the record schema.
    #[error("shard state at {path} failed to parse: {source}")]
    #[diagnostic(code(veritas::memory::shard_parse))]
    ShardParse {
        /// Offending file.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// A background memory task died.
    #[error("background memory task failed: {0}")]
    #[diagnostic(code(veritas::memory::task_join))]
    TaskJoin(String),
}

/// Deterministic text redaction applied before persistence.
pub trait Redactor: Send + Sync {
    /// Return `text` with sensitive spans replaced.
    fn redact(&self, text: &str) -> String;
}

impl Redactor for vt_fuji::signals::PiiScanner {
    fn redact(&self, text: &str) -> String {
        vt_fuji::signals::PiiScanner::redact(self, text)
    }
}

/// In-memory state for one user.
struct Shard {
    records: Vec<MemoryRecord>,
    /// LRU bookkeeping: record id -> last-touch counter value.
    touches: FxHashMap<Uuid, u64>,
    counter: u64,
    index: Arc<VectorIndex>,
}

impl Shard {
    fn empty(dim: usize) -> Self {
        Self {
            records: Vec::new(),
            touches: FxHashMap::default(),
            counter: 0,
            index: Arc::new(VectorIndex::build(dim, [])),
        }
    }

    fn touch(&mut self, id: Uuid) {
        self.counter += 1;
        self.touches.insert(id, self.counter);
    }

    fn rebuild_index(&mut self, dim: usize) {
        self.index = Arc::new(VectorIndex::build(
            dim,
            self.records
                .iter()
                .map(|r| (r.id, r.embedding.clone())),
        ));
    }
}

/// The per-user memory store.
pub struct MemoryService {
    dir: PathBuf,
    embedder: Arc<dyn Embedder>,
    redactor: Option<Arc<dyn Redactor>>,
    max_records_per_user: usize,
    shards: Mutex<FxHashMap<String, Shard>>,
}

impl MemoryService {
    /// Open a store rooted at `dir` (created if absent).
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Io`] if the directory cannot be created.
    pub fn open(
        dir: impl Into<PathBuf>,
        embedder: Arc<dyn Embedder>,
        max_records_per_user: usize,
    ) -> Result<Self, MemoryError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| FsIoError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            embedder,
            redactor: None,
            max_records_per_user: max_records_per_user.max(1),
            shards: Mutex::new(FxHashMap::default()),
        })
    }

    /// Attach a redactor applied to text before embedding and persistence.
    #[must_use]
    pub fn with_redactor(mut self, redactor: Arc<dyn Redactor>) -> Self {
        self.redactor = Some(redactor);
        self
    }

    /// Store a record for `user_id`. Returns the new record id.
    ///
    /// # Errors
    ///
    /// Rejects unknown kinds, empty or oversized text, and propagates
    /// embedding and I/O failures. A failed put never mutates state.
    pub fn put(
        &self,
        user_id: &str,
        kind: &str,
        text: &str,
        metadata: FxHashMap<String, Value>,
    ) -> Result<Uuid, MemoryError> {
        let kind = MemoryKind::parse(kind).map_err(|kind| MemoryError::UnknownKind { kind })?;
        if text.trim().is_empty() {
            return Err(MemoryError::EmptyText);
        }
        let chars = text.chars().count();
        if chars > MAX_TEXT_CHARS {
            return Err(MemoryError::TextTooLarge { chars });
        }

        let stored_text = match &self.redactor {
            Some(redactor) => redactor.redact(text),
            None => text.to_string(),
        };
        let embedding = self.embedder.embed(&stored_text)?;

        let record = MemoryRecord {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            kind,
            text: stored_text,
            embedding,
            created_at: Utc::now(),
            metadata,
        };
        let id = record.id;

        let mut shards = self.shards.lock();
        let shard = self.load_shard_locked(&mut shards, user_id)?;
        shard.records.push(record);
        shard.touch(id);

        // Per-user cap with LRU eviction.
        while shard.records.len() > self.max_records_per_user {
            let Some(evict_id) = shard
                .records
                .iter()
                .map(|r| r.id)
                .min_by_key(|rid| shard.touches.get(rid).copied().unwrap_or(0))
            else {
                break;
            };
            shard.records.retain(|r| r.id != evict_id);
            shard.touches.remove(&evict_id);
            debug!(user_id, evicted = %evict_id, "memory record evicted (LRU)");
        }

        shard.rebuild_index(self.embedder.dim());
        self.persist_shard(user_id, shard)?;
        Ok(id)
    }

    /// Fetch a record owned by `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::NotFound`] when the id is absent from the
    /// user's shard (including ids owned by other users).
    pub fn get(&self, user_id: &str, id: Uuid) -> Result<MemoryRecord, MemoryError> {
        let mut shards = self.shards.lock();
        let shard = self.load_shard_locked(&mut shards, user_id)?;
        let found = shard
            .records
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(MemoryError::NotFound { id })?;
        shard.touch(id);
        Ok(found)
    }

    /// Top-`k` records of `user_id` most similar to `query`, optionally
    /// restricted to `kinds`.
    ///
    /// The index pointer is snapshotted into a local before searching;
    /// concurrent rebuilds never produce a partial view.
    ///
    /// # Errors
    ///
    /// Propagates embedding and shard-load failures.
    pub fn search(
        &self,
        user_id: &str,
        query: &str,
        k: usize,
        kinds: Option<&[MemoryKind]>,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        Ok(self
            .search_scored(user_id, query, k, kinds)?
            .into_iter()
            .map(|(record, _)| record)
            .collect())
    }

    /// Like [`search`](Self::search), but returns the cosine similarity
    /// alongside each record.
    ///
    /// # Errors
    ///
    /// Propagates embedding and shard-load failures.
    pub fn search_scored(
        &self,
        user_id: &str,
        query: &str,
        k: usize,
        kinds: Option<&[MemoryKind]>,
    ) -> Result<Vec<(MemoryRecord, f32)>, MemoryError> {
        let query_embedding = self.embedder.embed(query)?;

        let index: Arc<VectorIndex> = {
            let mut shards = self.shards.lock();
            let shard = self.load_shard_locked(&mut shards, user_id)?;
            shard.index.clone()
        };
        if index.is_empty() {
            return Ok(Vec::new());
        }

        let hits = index.search(&query_embedding, index.len());

        let mut shards = self.shards.lock();
        let shard = self.load_shard_locked(&mut shards, user_id)?;
        let mut results: Vec<(MemoryRecord, f32)> = Vec::with_capacity(k);
        for hit in hits {
            let Some(record) = shard.records.iter().find(|r| r.id == hit.id) else {
                continue; // evicted between snapshot and fetch
            };
            if record.user_id != user_id {
                continue;
            }
            if let Some(kinds) = kinds {
                if !kinds.contains(&record.kind) {
                    continue;
                }
            }
            results.push((record.clone(), hit.similarity));
            if results.len() == k {
                break;
            }
        }
        for (record, _) in &results {
            shard.touch(record.id);
        }
        Ok(results)
    }

    /// Number of records currently held for `user_id`.
    ///
    /// # Errors
    ///
    /// Propagates shard-load failures.
    pub fn count(&self, user_id: &str) -> Result<usize, MemoryError> {
        let mut shards = self.shards.lock();
        let shard = self.load_shard_locked(&mut shards, user_id)?;
        Ok(shard.records.len())
    }

    /// Rebuild the user's index off-thread and atomically swap it in.
    ///
    /// Readers holding the previous snapshot finish safely.
    ///
    /// # Errors
    ///
    /// Propagates shard-load failures and background-task panics.
    pub async fn rebuild_index(&self, user_id: &str) -> Result<usize, MemoryError> {
        let dim = self.embedder.dim();
        let entries: Vec<(Uuid, Vec<f32>)> = {
            let mut shards = self.shards.lock();
            let shard = self.load_shard_locked(&mut shards, user_id)?;
            shard
                .records
                .iter()
                .map(|r| (r.id, r.embedding.clone()))
                .collect()
        };

        let index = tokio::task::spawn_blocking(move || VectorIndex::build(dim, entries))
            .await
            .map_err(|e| MemoryError::TaskJoin(e.to_string()))?;
        let len = index.len();

        let mut shards = self.shards.lock();
        let shard = self.load_shard_locked(&mut shards, user_id)?;
        shard.index = Arc::new(index);
        Ok(len)
    }

    /// Load (or lazily read from disk) the shard for `user_id`.
    fn load_shard_locked<'a>(
        &self,
        shards: &'a mut FxHashMap<String, Shard>,
        user_id: &str,
    ) -> Result<&'a mut Shard, MemoryError> {
        match shards.entry(user_id.to_string()) {
            std::collections::hash_map::Entry::Occupied(entry) => Ok(entry.into_mut()),
            std::collections::hash_map::Entry::Vacant(entry) => {
                let shard = self.read_shard_from_disk(user_id)?;
                Ok(entry.insert(shard))
            }
        }
    }

    fn read_shard_from_disk(&self, user_id: &str) -> Result<Shard, MemoryError> {
        let path = self.shard_path(user_id);
        let dim = self.embedder.dim();
        if !path.exists() {
            return Ok(Shard::empty(dim));
        }

        let bytes = std::fs::read(&path).map_err(|source| FsIoError::Io {
            path: path.clone(),
            source,
        })?;
        // Legacy binary state (pickles, npz bundles renamed by hand, …)
        // must never reach a deserializer. Fail closed on anything that
        // is not printable JSON.
        if bytes.contains(&0u8) {
            warn!(
                path = %path.display(),
                "SECURITY: refusing to load binary shard state"
            );
            return Err(MemoryError::LegacyFormatRefused { path });
        }

        let records: Vec<MemoryRecord> =
            serde_json::from_slice(&bytes).map_err(|source| MemoryError::ShardParse {
                path: path.clone(),
                source,
            })?;

        let mut shard = Shard::empty(dim);
        // Disk order is oldest-first; touch in order so LRU starts sane.
        for record in records {
            let id = record.id;
            shard.records.push(record);
            shard.touch(id);
        }
        shard.rebuild_index(dim);
        Ok(shard)
    }

    fn persist_shard(&self, user_id: &str, shard: &Shard) -> Result<(), MemoryError> {
        let path = fsio::guard_path(&self.dir, &self.shard_path(user_id))?;
        fsio::atomic_write_json(&path, &shard.records)?;
        Ok(())
    }

    fn shard_path(&self, user_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", shard_file_stem(user_id)))
    }

    /// Directory the shards live in.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Filesystem-safe shard file stem: sanitized user id plus a short hash
/// so distinct ids never collide after sanitization.
fn shard_file_stem(user_id: &str) -> String {
    let safe: String = user_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(48)
        .collect();

    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in user_id.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    format!("{safe}.{hash:016x}")
}
