//! Embedding capability consumed by the memory subsystem.
//!
//! Providers live outside the core; [`HashEmbedder`] is the in-process
//! default used for tests and deployments without an embedding backend.
//! It is deterministic, so index rebuilds and similarity results are
//! reproducible.

use miette::Diagnostic;
use thiserror::Error;

/// Maximum characters accepted for a single embedding input.
pub const MAX_EMBED_INPUT_CHARS: usize = 100_000;
/// Maximum inputs per batch call.
pub const MAX_EMBED_BATCH: usize = 10_000;

/// Errors raised by embedder implementations.
#[derive(Debug, Error, Diagnostic)]
pub enum EmbedderError {
    /// Input exceeds [`MAX_EMBED_INPUT_CHARS`].
    #[error("embedding input too large: {chars} chars (limit {MAX_EMBED_INPUT_CHARS})")]
    #[diagnostic(code(veritas::memory::embed_input_too_large))]
    InputTooLarge {
        /// Offending input size.
        chars: usize,
    },

    /// Batch exceeds [`MAX_EMBED_BATCH`].
    #[error("embedding batch too large: {count} inputs (limit {MAX_EMBED_BATCH})")]
    #[diagnostic(code(veritas::memory::embed_batch_too_large))]
    BatchTooLarge {
        /// Offending batch size.
        count: usize,
    },

    /// The backing provider failed.
    #[error("embedding provider error: {0}")]
    #[diagnostic(code(veritas::memory::embed_provider))]
    Provider(String),
}

/// An embedding backend.
pub trait Embedder: Send + Sync {
    /// Embedding dimensionality; constant for the lifetime of the value.
    fn dim(&self) -> usize;

    /// Embed a single input.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedderError`] on size violations or provider failure.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed a batch of inputs.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedderError`] on size violations or provider failure.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.len() > MAX_EMBED_BATCH {
            return Err(EmbedderError::BatchTooLarge { count: texts.len() });
        }
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Deterministic feature-hashing embedder.
///
/// Tokenizes on non-alphanumerics, hashes each lowercased token into one
/// of `dim` buckets (FNV-1a), and L2-normalizes the result. Not a
/// semantic model – but stable, fast, and good enough for similarity
/// over overlapping vocabulary, which is what the tests and the default
/// local deployment need.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    /// Default dimensionality.
    pub const DEFAULT_DIM: usize = 64;

    /// Create an embedder with the given dimensionality (min 8).
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIM)
    }
}

fn fnv1a(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in token.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

impl Embedder for HashEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        if text.chars().count() > MAX_EMBED_INPUT_CHARS {
            return Err(EmbedderError::InputTooLarge {
                chars: text.chars().count(),
            });
        }

        let mut vector = vec![0.0f32; self.dim];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let lowered = token.to_lowercase();
            let hash = fnv1a(&lowered);
            let bucket = (hash % self.dim as u64) as usize;
            // Sign bit from a higher hash bit decorrelates buckets.
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let embedder = HashEmbedder::default();
        assert_eq!(
            embedder.embed("pack an umbrella").unwrap(),
            embedder.embed("pack an umbrella").unwrap()
        );
    }

    #[test]
    fn normalized() {
        let embedder = HashEmbedder::default();
        let v = embedder.embed("some words to embed here").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn similar_texts_closer_than_unrelated() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("umbrella rain weather forecast").unwrap();
        let b = embedder.embed("rain umbrella weather").unwrap();
        let c = embedder.embed("quarterly revenue spreadsheet").unwrap();

        let dot = |x: &[f32], y: &[f32]| -> f32 { x.iter().zip(y).map(|(a, b)| a * b).sum() };
        assert!(dot(&a, &b) > dot(&a, &c));
    }

    #[test]
    fn oversized_input_rejected() {
        let embedder = HashEmbedder::default();
        let huge = "a ".repeat(MAX_EMBED_INPUT_CHARS);
        assert!(matches!(
            embedder.embed(&huge),
            Err(EmbedderError::InputTooLarge { .. })
        ));
    }

    #[test]
    fn batch_cap_enforced() {
        let embedder = HashEmbedder::default();
        let one = "x";
        let batch: Vec<&str> = std::iter::repeat_n(one, MAX_EMBED_BATCH + 1).collect();
        assert!(matches!(
            embedder.embed_batch(&batch),
            Err(EmbedderError::BatchTooLarge { .. })
        ));
    }
}
