//! Immutable cosine-similarity index.
//!
//! A [`VectorIndex`] is built once and never mutated; the store publishes
//! it behind an `Arc` and swaps the pointer on rebuild. Readers that
//! cloned the previous pointer finish their search against a consistent
//! snapshot.

use uuid::Uuid;

/// One search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    /// Record identifier.
    pub id: Uuid,
    /// Cosine similarity in \[-1.0, 1.0\].
    pub similarity: f32,
}

/// Immutable flat vector index over one user shard.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    dim: usize,
    ids: Vec<Uuid>,
    // Row-major, ids.len() * dim.
    vectors: Vec<f32>,
}

impl VectorIndex {
    /// Build an index from `(id, embedding)` pairs.
    ///
    /// Embeddings whose dimensionality differs from `dim` are skipped –
    /// cardinality is enforced by the caller, which only hands in records
    /// produced by the active embedder.
    #[must_use]
    pub fn build(dim: usize, entries: impl IntoIterator<Item = (Uuid, Vec<f32>)>) -> Self {
        let mut ids = Vec::new();
        let mut vectors = Vec::new();
        for (id, embedding) in entries {
            if embedding.len() != dim {
                continue;
            }
            ids.push(id);
            vectors.extend(embedding);
        }
        Self { dim, ids, vectors }
    }

    /// Number of indexed vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True when no vectors are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Dimensionality of the indexed vectors.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Top-`k` hits by cosine similarity, descending, ties broken by id
    /// for determinism.
    #[must_use]
    pub fn search(&self, query: &[f32], k: usize) -> Vec<IndexHit> {
        if query.len() != self.dim || self.is_empty() || k == 0 {
            return Vec::new();
        }

        let query_norm: f32 = query.iter().map(|v| v * v).sum::<f32>().sqrt();
        if query_norm <= f32::EPSILON {
            return Vec::new();
        }

        let mut hits: Vec<IndexHit> = self
            .ids
            .iter()
            .enumerate()
            .map(|(row, &id)| {
                let vector = &self.vectors[row * self.dim..(row + 1) * self.dim];
                let dot: f32 = vector.iter().zip(query).map(|(a, b)| a * b).sum();
                let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
                let similarity = if norm <= f32::EPSILON {
                    0.0
                } else {
                    dot / (norm * query_norm)
                };
                IndexHit { id, similarity }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        hits
    }
}
