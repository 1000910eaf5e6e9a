//! Decision types produced by the FUJI gate.
//!
//! Every gate evaluation yields a [`FujiDecision`] carrying the scalar risk
//! score, the bucketed [`DecisionStatus`], and the individual
//! [`Violation`]s and [`Modification`]s that explain how the score was
//! reached.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

// ── DecisionStatus ─────────────────────────────────────────────────────

/// Final disposition of a candidate action.
///
/// Ordered roughly by restrictiveness. `Ord` is not derived on purpose –
/// the bucketing thresholds in the policy define the mapping, not the
/// enum order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    /// The action may proceed unchanged.
    Allow,
    /// The action may proceed with the listed modifications applied.
    Modify,
    /// The action must not proceed.
    Rejected,
    /// A human must review the action before it proceeds.
    HumanReview,
    /// No decision was reached (deadline expiry, cancelled pipeline).
    Abstain,
}

impl DecisionStatus {
    /// Short label used in audit payloads and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Modify => "modify",
            Self::Rejected => "rejected",
            Self::HumanReview => "human_review",
            Self::Abstain => "abstain",
        }
    }
}

impl std::fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── SignalKind ─────────────────────────────────────────────────────────

/// Identifies which risk signal produced a violation or score component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum SignalKind {
    /// PII detector (regex + Luhn + national-ID checksums).
    Pii,
    /// Keyword hard/soft list matcher.
    Keywords,
    /// Prompt-injection pattern scanner.
    Injection,
    /// Optional LLM safety advisor.
    LlmSafetyHead,
    /// Content classifiers (minors, violence, self-harm, illicit).
    Content,
    /// Auto-stop circuit (consecutive rejects, request rate).
    AutoStop,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pii => "pii",
            Self::Keywords => "keywords",
            Self::Injection => "injection",
            Self::LlmSafetyHead => "llm_safety_head",
            Self::Content => "content",
            Self::AutoStop => "auto_stop",
        };
        f.write_str(s)
    }
}

// ── Violation ──────────────────────────────────────────────────────────

/// A single finding recorded during gate evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    /// Which signal raised the finding.
    pub signal: SignalKind,
    /// Stable rule identifier (e.g. `"KW-HARD-003"`, `"INJ-002"`).
    pub rule_id: Cow<'static, str>,
    /// Human-readable description, safe for audit logs (already redacted).
    pub detail: String,
    /// Score contribution of this finding before weighting.
    pub raw_score: f32,
}

// ── Modification ───────────────────────────────────────────────────────

/// A required change to the candidate action when the status is
/// [`DecisionStatus::Modify`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Modification {
    /// Which signal requested the change.
    pub signal: SignalKind,
    /// What must be changed (e.g. `"redact_pii"`).
    pub kind: Cow<'static, str>,
    /// Description of the change for the caller.
    pub detail: String,
}

// ── SignalReport ───────────────────────────────────────────────────────

/// Per-signal evaluation output, aggregated by the gate.
#[derive(Debug, Clone, Default)]
pub struct SignalReport {
    /// Unweighted score in \[0.0, 1.0\].
    pub score: f32,
    /// Findings backing the score.
    pub violations: Vec<Violation>,
    /// Modifications this signal would require for the action to proceed.
    pub modifications: Vec<Modification>,
    /// Whether a hard-block rule fired (forces rejection regardless of
    /// the weighted score).
    pub hard_block: bool,
}

impl SignalReport {
    /// A report with no findings.
    #[must_use]
    pub fn clean() -> Self {
        Self::default()
    }
}

// ── FujiDecision ───────────────────────────────────────────────────────

/// The full outcome of one gate evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FujiDecision {
    /// Bucketed disposition.
    pub decision_status: DecisionStatus,
    /// Scalar risk in \[0.0, 1.0\].
    pub risk: f32,
    /// All findings, in signal evaluation order.
    pub violations: Vec<Violation>,
    /// Required modifications (non-empty only for `Modify`).
    pub modifications: Vec<Modification>,
    /// One-line explanation of the disposition.
    pub reason: String,
    /// Warnings raised in the warn band (risk above `allow_upper` but
    /// still allowed).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Version string of the policy snapshot that produced this decision.
    pub policy_version: String,
}

impl FujiDecision {
    /// Returns `true` when the action may proceed (allow or modify).
    #[must_use]
    pub fn is_permitted(&self) -> bool {
        matches!(
            self.decision_status,
            DecisionStatus::Allow | DecisionStatus::Modify
        )
    }

    /// Returns `true` when the action was rejected outright.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.decision_status == DecisionStatus::Rejected
    }
}
