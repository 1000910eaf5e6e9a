//! Optional LLM safety advisor capability.
//!
//! When the embedding application wires one in (and the policy enables
//! `fuji_rules.llm_safety_head`), the gate consults it for a model-scored
//! risk estimate. Advisor failures degrade the signal to zero rather than
//! failing the evaluation.

use async_trait::async_trait;
use thiserror::Error;

/// Errors an advisor backend may raise.
#[derive(Debug, Error)]
pub enum AdvisorError {
    /// The backing model or service is unavailable.
    #[error("safety advisor unavailable: {0}")]
    Unavailable(String),

    /// The backend responded with something unusable.
    #[error("safety advisor returned an invalid assessment: {0}")]
    InvalidResponse(String),
}

/// A model-backed risk assessor.
///
/// Implementations must be cheap to share across tasks (`Arc`-wrapped)
/// and must apply their own timeout; the gate does not wait beyond the
/// pipeline deadline.
#[async_trait]
pub trait SafetyAdvisor: Send + Sync {
    /// Assess the risk of executing `action` for the given `query`.
    ///
    /// Returns a score in \[0.0, 1.0\].
    ///
    /// # Errors
    ///
    /// Returns [`AdvisorError`] when no assessment could be produced.
    async fn assess(&self, query: &str, action: &str) -> Result<f32, AdvisorError>;
}

/// Fixed-score advisor for tests and wiring checks.
#[derive(Debug, Clone, Copy)]
pub struct FixedAdvisor(pub f32);

#[async_trait]
impl SafetyAdvisor for FixedAdvisor {
    async fn assess(&self, _query: &str, _action: &str) -> Result<f32, AdvisorError> {
        Ok(self.0.clamp(0.0, 1.0))
    }
}
