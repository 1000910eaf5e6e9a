//! The stage trait, the accumulating decision context, and stage errors.
//!
//! Each stage receives the mutable [`DecisionCtx`] and appends its
//! output. Errors carry an explicit kind; [`StageError::is_fatal`]
//! decides whether the orchestrator aborts the pipeline or records a
//! `stage_degraded` marker and continues.

use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use serde_json::{Value, json};
use thiserror::Error;
use vt_fuji::outcome::FujiDecision;
use vt_fuji::policy::{FujiPolicy, PolicyError};

use crate::fsio::FsIoError;
use crate::llm::LlmError;
use crate::memory::MemoryError;
use crate::schema::coercion::CoercionLog;
use crate::schema::request::DecideRequest;
use crate::schema::response::{EvidenceItem, StageDegraded, TrustLogField};
use crate::trustlog::TrustLogError;
use crate::values::{AxisScores, DriftSnapshot, ValuesOut};

/// Errors raised by pipeline stages.
#[derive(Debug, Error, Diagnostic)]
pub enum StageError {
    /// Input validation failed. Fatal.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Invalid(#[from] crate::schema::request::InvalidInput),

    /// Policy could not be loaded or validated. Fatal; the gate never
    /// fails open.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// The gate itself could not be constructed or run. Fatal.
    #[error(transparent)]
    Gate(#[from] vt_fuji::gate::GateError),

    /// An optional capability is off or failing. Recoverable.
    #[error("capability unavailable: {capability}")]
    #[diagnostic(code(veritas::pipeline::capability_unavailable))]
    CapabilityUnavailable {
        /// The capability that was consulted.
        capability: &'static str,
    },

    /// An LLM call failed after retries. Recoverable.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Llm(#[from] LlmError),

    /// A memory operation failed. Recoverable.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Memory(#[from] MemoryError),

    /// Transient disk I/O failure. Recoverable.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Io(#[from] FsIoError),

    /// TrustLog failure. Recoverable – the response keeps the raw audit
    /// payload instead.
    #[error(transparent)]
    #[diagnostic(transparent)]
    TrustLog(#[from] TrustLogError),

    /// The request deadline expired. Fatal; the response abstains.
    #[error("request deadline exceeded")]
    #[diagnostic(code(veritas::pipeline::deadline_exceeded))]
    DeadlineExceeded,
}

impl StageError {
    /// Whether this error aborts the pipeline.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Invalid(_) | Self::Policy(_) | Self::Gate(_) | Self::DeadlineExceeded
        )
    }

    /// Short kind label for structured logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Invalid(_) => "invalid_input",
            Self::Policy(_) => "policy_error",
            Self::Gate(_) => "gate_error",
            Self::CapabilityUnavailable { .. } => "capability_unavailable",
            Self::Llm(_) => "llm_error",
            Self::Memory(_) => "memory_error",
            Self::Io(_) => "transient_io",
            Self::TrustLog(_) => "trust_log_error",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

/// The context accumulated across one pipeline execution.
#[derive(Debug)]
pub struct DecisionCtx {
    /// The (progressively normalized) request.
    pub request: DecideRequest,
    /// Unique id for this execution.
    pub request_id: String,
    /// Authoritative user id from the authenticated principal.
    pub principal: String,
    /// Coercion audit log.
    pub coercions: CoercionLog,
    /// Planner output.
    pub plan: Value,
    /// Planner diagnostics.
    pub planner: Value,
    /// Ranked evidence.
    pub evidence: Vec<EvidenceItem>,
    /// Critique output.
    pub critique: Value,
    /// Debate output.
    pub debate: Value,
    /// Normalized telos weights over the five axes.
    pub weights: [f32; 5],
    /// Axis scores per alternative, aligned with `request.alternatives`.
    pub alt_scores: Vec<AxisScores>,
    /// Aggregated values output for the chosen alternative.
    pub values: Option<ValuesOut>,
    /// EMA drift after this decision.
    pub drift: Option<DriftSnapshot>,
    /// Gate decision.
    pub gate: Option<FujiDecision>,
    /// Policy snapshot captured at gate entry; every later consumer of
    /// policy settings in this call uses the same snapshot.
    pub policy: Option<Arc<FujiPolicy>>,
    /// Stages that degraded.
    pub degraded: Vec<StageDegraded>,
    /// Memory records cited as evidence.
    pub memory_citations: Vec<String>,
    /// Memory records consulted.
    pub memory_used_count: usize,
    /// Persona state.
    pub persona: Value,
    /// Audit reference produced by finalize.
    pub trust_log: Option<TrustLogField>,
}

impl DecisionCtx {
    /// Start a context for one execution.
    #[must_use]
    pub fn new(request: DecideRequest, request_id: String, principal: String) -> Self {
        Self {
            request,
            request_id,
            principal,
            coercions: CoercionLog::default(),
            plan: json!({}),
            planner: json!({}),
            evidence: Vec::new(),
            critique: json!({}),
            debate: json!({}),
            weights: [0.2; 5],
            alt_scores: Vec::new(),
            values: None,
            drift: None,
            gate: None,
            policy: None,
            degraded: Vec::new(),
            memory_citations: Vec::new(),
            memory_used_count: 0,
            persona: Value::Null,
            trust_log: None,
        }
    }

    /// Text of the currently best-ranked alternative, used as the
    /// candidate action for the gate.
    #[must_use]
    pub fn candidate_action_text(&self) -> String {
        match self.request.alternatives.first() {
            Some(alt) => format!("{} {}", alt.title, alt.description),
            None => String::new(),
        }
    }

    /// Flattened context text surfaces for the gate.
    #[must_use]
    pub fn context_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        parts.extend(self.request.context.goals.iter().map(String::as_str));
        parts.extend(self.request.context.constraints.iter().map(String::as_str));
        parts.join("\n")
    }
}

/// A single unit of the decision pipeline.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    /// Stage name used in ordering, events, and degradation markers.
    fn name(&self) -> &'static str;

    /// Execute against the accumulating context.
    ///
    /// # Errors
    ///
    /// Returns [`StageError`]; the orchestrator consults
    /// [`StageError::is_fatal`] to abort or degrade.
    async fn run(&self, ctx: &mut DecisionCtx) -> Result<(), StageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(StageError::DeadlineExceeded.is_fatal());
        assert!(
            StageError::Invalid(crate::schema::request::InvalidInput::EmptyQuery).is_fatal()
        );
        assert!(
            !StageError::CapabilityUnavailable {
                capability: "web_search"
            }
            .is_fatal()
        );
        assert!(!StageError::Llm(LlmError::Timeout(std::time::Duration::from_secs(1))).is_fatal());
    }

    #[test]
    fn kind_labels_are_stable() {
        assert_eq!(StageError::DeadlineExceeded.kind(), "deadline_exceeded");
        assert_eq!(
            StageError::CapabilityUnavailable { capability: "x" }.kind(),
            "capability_unavailable"
        );
    }
}
