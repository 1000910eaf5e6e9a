//! The decide response and its component types.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use vt_fuji::outcome::{DecisionStatus, FujiDecision, Modification};

use super::coercion::CoercionEvent;
use super::request::AltItem;
use crate::values::ValuesOut;

/// Engine version stamped into every response.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Gate summary exposed on the response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateOut {
    /// Scalar risk in \[0.0, 1.0\].
    pub risk: f32,
    /// The gate's disposition (also mirrored to the response root).
    pub decision_status: DecisionStatus,
    /// Required modifications when the status is `modify`.
    pub modifications: Vec<Modification>,
}

impl From<&FujiDecision> for GateOut {
    fn from(decision: &FujiDecision) -> Self {
        Self {
            risk: decision.risk,
            decision_status: decision.decision_status,
            modifications: decision.modifications.clone(),
        }
    }
}

/// Canonical reference to the TrustLog entry written for this decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustLogRef {
    /// Stage recorded (`decide`).
    pub stage: String,
    /// The entry's chain hash.
    pub sha256: String,
    /// The entry's predecessor hash, if any.
    pub sha256_prev: Option<String>,
}

/// The `trust_log` response field.
///
/// Promotion to [`TrustLogRef`] can fail when the audit write was
/// degraded; the raw payload is retained so the audit surface never loses
/// data, and `coercion.trust_log_promotion_failed` is emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrustLogField {
    /// The canonical typed reference.
    Typed(TrustLogRef),
    /// Raw payload kept as-is after failed promotion.
    Raw(Value),
}

impl TrustLogField {
    /// The typed reference, when promotion succeeded.
    #[must_use]
    pub fn as_typed(&self) -> Option<&TrustLogRef> {
        match self {
            Self::Typed(r) => Some(r),
            Self::Raw(_) => None,
        }
    }
}

/// A collected evidence item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// Where the evidence came from (`memory`, `web`).
    pub source: String,
    /// Evidence text or snippet.
    pub text: String,
    /// Relevance in \[0.0, 1.0\].
    pub relevance: f32,
    /// Source reliability in \[0.0, 1.0\].
    pub reliability: f32,
    /// Combined ranking score (`relevance * reliability`).
    pub score: f32,
    /// Memory record id, when the source is memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<String>,
}

/// Marker attached for every stage that degraded instead of failing the
/// pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDegraded {
    /// Stage name.
    pub stage: String,
    /// Redacted reason.
    pub reason: String,
}

/// Response metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMeta {
    /// Fields touched by coercion, in first-seen order.
    pub x_coerced_fields: Vec<String>,
}

/// The decide response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecideResponse {
    /// False only for fatal failures.
    pub ok: bool,
    /// Generic error message when `ok` is false (detail gated behind
    /// debug mode).
    pub error: Option<String>,
    /// Unique request id (echoed when the client supplied one).
    pub request_id: String,
    /// Engine version.
    pub version: String,
    /// The selected alternative.
    pub chosen: Option<AltItem>,
    /// All alternatives, final score descending.
    pub alternatives: Vec<AltItem>,
    /// Legacy mirror of `alternatives`.
    pub options: Vec<AltItem>,
    /// Final disposition.
    pub decision_status: DecisionStatus,
    /// Present when `decision_status` is `rejected`.
    pub rejection_reason: Option<String>,
    /// Value scoring output.
    pub values: ValuesOut,
    /// Weighted total of the chosen alternative.
    pub telos_score: f32,
    /// Full gate decision.
    pub fuji: Option<FujiDecision>,
    /// Gate summary.
    pub gate: Option<GateOut>,
    /// Ranked evidence.
    pub evidence: Vec<EvidenceItem>,
    /// Critique stage output.
    pub critique: Value,
    /// Debate stage output.
    pub debate: Value,
    /// Plan produced by the planner stage.
    pub plan: Value,
    /// Planner diagnostics (model, degraded flag).
    pub planner: Value,
    /// Persona state after this interaction.
    pub persona: Value,
    /// Memory records cited by the evidence stage.
    pub memory_citations: Vec<String>,
    /// Number of memory records consulted.
    pub memory_used_count: usize,
    /// Audit reference (typed, or raw on failed promotion).
    pub trust_log: Option<TrustLogField>,
    /// Stages that degraded.
    pub stage_degraded: Vec<StageDegraded>,
    /// Free-form extras.
    pub extras: FxHashMap<String, Value>,
    /// Every coercion applied to the input.
    pub coercion_events: Vec<CoercionEvent>,
    /// Response metadata.
    pub meta: ResponseMeta,
}

impl DecideResponse {
    /// Skeleton response carrying identity fields; the finalizer fills
    /// the rest.
    #[must_use]
    pub fn skeleton(request_id: impl Into<String>) -> Self {
        Self {
            ok: true,
            error: None,
            request_id: request_id.into(),
            version: ENGINE_VERSION.to_string(),
            chosen: None,
            alternatives: Vec::new(),
            options: Vec::new(),
            decision_status: DecisionStatus::Abstain,
            rejection_reason: None,
            values: ValuesOut::default(),
            telos_score: 0.0,
            fuji: None,
            gate: None,
            evidence: Vec::new(),
            critique: Value::Null,
            debate: Value::Null,
            plan: Value::Null,
            planner: Value::Null,
            persona: Value::Null,
            memory_citations: Vec::new(),
            memory_used_count: 0,
            trust_log: None,
            stage_degraded: Vec::new(),
            extras: FxHashMap::default(),
            coercion_events: Vec::new(),
            meta: ResponseMeta::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trust_log_field_untagged_round_trip() {
        let typed = TrustLogField::Typed(TrustLogRef {
            stage: "decide".into(),
            sha256: "ab".repeat(32),
            sha256_prev: None,
        });
        let json = serde_json::to_value(&typed).unwrap();
        let back: TrustLogField = serde_json::from_value(json).unwrap();
        assert!(back.as_typed().is_some());

        let raw = TrustLogField::Raw(json!({"unexpected": true}));
        let json = serde_json::to_value(&raw).unwrap();
        let back: TrustLogField = serde_json::from_value(json).unwrap();
        assert!(back.as_typed().is_none());
    }

    #[test]
    fn skeleton_serializes() {
        let resp = DecideResponse::skeleton("req-1");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["request_id"], "req-1");
        assert_eq!(json["decision_status"], "abstain");
        assert_eq!(json["ok"], true);
    }
}
