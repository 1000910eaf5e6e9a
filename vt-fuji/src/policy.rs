//! Declarative FUJI policy configuration.
//!
//! A [`FujiPolicy`] is a JSON document loaded from disk at startup and hot
//! reloaded whenever the file's mtime changes (see [`crate::reload`]).
//! Validation is strict: threshold monotonicity and field ranges are
//! checked before a policy is ever published, and a policy that fails
//! validation never replaces the running one.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use validator::Validate;

/// Errors raised while loading or validating a policy document.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The policy file could not be read.
    #[error("failed to read policy file {path}: {source}")]
    FileRead {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The policy document is not valid JSON or has the wrong shape.
    #[error("failed to parse policy JSON: {source}")]
    Parse {
        /// Underlying parse error.
        #[from]
        source: serde_json::Error,
    },

    /// Field-level validation failed.
    #[error("policy validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// Cross-field invariant violated.
    #[error("policy invariant violated: {0}")]
    Invariant(String),

    /// No policy file exists at the configured path.
    #[error("policy file missing at {path}")]
    Missing {
        /// Configured policy path.
        path: PathBuf,
    },
}

// ── AuditLevel ─────────────────────────────────────────────────────────

/// How much detail the TrustLog retains per decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    /// Nothing beyond the chain entry itself.
    None,
    /// Status and risk only.
    Minimal,
    /// Status, risk, violations.
    Standard,
    /// Everything including stage payloads.
    Full,
    /// Full, plus redaction disabled fields are refused.
    Strict,
}

impl Default for AuditLevel {
    fn default() -> Self {
        Self::Standard
    }
}

// ── FujiRules ──────────────────────────────────────────────────────────

/// The eight boolean capability flags gating individual risk signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FujiRules {
    /// Run the PII detector.
    pub pii_detection: bool,
    /// Hard keyword list forces rejection on match.
    pub keyword_hard_block: bool,
    /// Soft keyword list adds a fixed penalty on match.
    pub keyword_soft_penalty: bool,
    /// Prompt-injection pattern scanner.
    pub prompt_injection_guard: bool,
    /// Optional LLM safety advisor contributes to the score.
    pub llm_safety_head: bool,
    /// Minors-protection content classifier.
    pub minors_protection: bool,
    /// Violence content classifier.
    pub violence_filter: bool,
    /// Self-harm and illicit-activity content classifier.
    pub self_harm_illicit_filter: bool,
}

impl Default for FujiRules {
    fn default() -> Self {
        Self {
            pii_detection: true,
            keyword_hard_block: true,
            keyword_soft_penalty: true,
            prompt_injection_guard: true,
            llm_safety_head: false,
            minors_protection: true,
            violence_filter: true,
            self_harm_illicit_filter: true,
        }
    }
}

// ── RiskThresholds ─────────────────────────────────────────────────────

/// Bucketing thresholds mapping scalar risk to a decision.
///
/// Invariant: `allow_upper <= warn_upper <= human_review_upper <=
/// deny_upper`, all within \[0.0, 1.0\].
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RiskThresholds {
    /// Risk at or below this is allowed silently.
    #[validate(range(min = 0.0, max = 1.0))]
    pub allow_upper: f32,
    /// Risk at or below this is allowed with a warning.
    #[validate(range(min = 0.0, max = 1.0))]
    pub warn_upper: f32,
    /// Risk at or below this requires human review.
    #[validate(range(min = 0.0, max = 1.0))]
    pub human_review_upper: f32,
    /// Risk at or below this proceeds with modifications; above is rejected.
    #[validate(range(min = 0.0, max = 1.0))]
    pub deny_upper: f32,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            allow_upper: 0.4,
            warn_upper: 0.55,
            human_review_upper: 0.7,
            deny_upper: 0.85,
        }
    }
}

impl RiskThresholds {
    /// Check monotonicity across the four bounds.
    pub(crate) fn check_monotonic(&self) -> Result<(), PolicyError> {
        let ordered = self.allow_upper <= self.warn_upper
            && self.warn_upper <= self.human_review_upper
            && self.human_review_upper <= self.deny_upper;
        if ordered {
            Ok(())
        } else {
            Err(PolicyError::Invariant(format!(
                "risk_thresholds must be non-decreasing: allow={} warn={} human_review={} deny={}",
                self.allow_upper, self.warn_upper, self.human_review_upper, self.deny_upper
            )))
        }
    }
}

// ── AutoStop ───────────────────────────────────────────────────────────

/// Circuit-breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AutoStop {
    /// Master switch.
    pub enabled: bool,
    /// Risk score above which the circuit trips immediately.
    #[validate(range(min = 0.0, max = 1.0))]
    pub max_risk_score: f32,
    /// Consecutive rejected decisions before the circuit trips.
    pub max_consecutive_rejects: u32,
    /// Requests per rolling minute before the circuit trips.
    pub max_requests_per_minute: u32,
}

impl Default for AutoStop {
    fn default() -> Self {
        Self {
            enabled: true,
            max_risk_score: 0.95,
            max_consecutive_rejects: 5,
            max_requests_per_minute: 120,
        }
    }
}

// ── LogRetention ───────────────────────────────────────────────────────

/// Audit retention knobs consumed by the TrustLog owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogRetention {
    /// Days to keep archives before they are eligible for pruning.
    pub retention_days: u32,
    /// Detail level recorded per decision.
    pub audit_level: AuditLevel,
    /// Response fields copied into the audit payload.
    pub include_fields: Vec<String>,
    /// Redact PII from payloads before they are written.
    pub redact_before_log: bool,
    /// Rotation threshold for the active log file, in bytes.
    pub max_log_size: u64,
}

impl Default for LogRetention {
    fn default() -> Self {
        Self {
            retention_days: 365,
            audit_level: AuditLevel::Standard,
            include_fields: vec![
                "decision_status".to_string(),
                "telos_score".to_string(),
                "gate".to_string(),
            ],
            redact_before_log: true,
            max_log_size: 8 * 1024 * 1024,
        }
    }
}

// ── SignalWeights ──────────────────────────────────────────────────────

/// Per-signal weights combined into the scalar risk.
///
/// Exposed in the policy document so the risk composition is
/// audit-traceable. Weights are normalized over the signals that actually
/// ran for a given request.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SignalWeights {
    /// Weight of the PII signal.
    #[validate(range(min = 0.0))]
    pub pii: f32,
    /// Weight of the keyword signal (soft penalties only; hard matches
    /// bypass weighting).
    #[validate(range(min = 0.0))]
    pub keywords: f32,
    /// Weight of the injection-pattern signal.
    #[validate(range(min = 0.0))]
    pub injection: f32,
    /// Weight of the LLM safety advisor.
    #[validate(range(min = 0.0))]
    pub llm_safety_head: f32,
    /// Weight of the content classifiers.
    #[validate(range(min = 0.0))]
    pub content: f32,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            pii: 0.2,
            keywords: 0.25,
            injection: 0.25,
            llm_safety_head: 0.1,
            content: 0.2,
        }
    }
}

// ── FujiPolicy ─────────────────────────────────────────────────────────

/// The hot-reloadable safety configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FujiPolicy {
    /// Version string for compatibility tracking.
    #[validate(length(min = 1))]
    pub version: String,
    /// The eight signal capability flags.
    #[serde(default)]
    pub fuji_rules: FujiRules,
    /// Risk bucketing thresholds.
    #[serde(default)]
    #[validate(nested)]
    pub risk_thresholds: RiskThresholds,
    /// Circuit-breaker configuration.
    #[serde(default)]
    #[validate(nested)]
    pub auto_stop: AutoStop,
    /// Audit retention configuration.
    #[serde(default)]
    pub log_retention: LogRetention,
    /// Per-signal weights for risk composition.
    #[serde(default)]
    #[validate(nested)]
    pub signal_weights: SignalWeights,
    /// Last-updated timestamp, ISO-8601 with offset.
    pub updated_at: DateTime<FixedOffset>,
    /// Who performed the last update.
    #[serde(default)]
    pub updated_by: String,
}

impl FujiPolicy {
    /// A permissive-but-sane default policy, used to seed a fresh data dir.
    #[must_use]
    pub fn baseline(updated_by: impl Into<String>) -> Self {
        Self {
            version: "1.0".to_string(),
            fuji_rules: FujiRules::default(),
            risk_thresholds: RiskThresholds::default(),
            auto_stop: AutoStop::default(),
            log_retention: LogRetention::default(),
            signal_weights: SignalWeights::default(),
            updated_at: chrono::Utc::now().fixed_offset(),
            updated_by: updated_by.into(),
        }
    }

    /// Parse and fully validate a policy document.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] on malformed JSON, out-of-range fields, or
    /// non-monotonic thresholds.
    pub fn from_json_str(raw: &str) -> Result<Self, PolicyError> {
        let policy: Self = serde_json::from_str(raw)?;
        policy.check()?;
        Ok(policy)
    }

    /// Run field validation plus cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] describing the first failure.
    pub fn check(&self) -> Result<(), PolicyError> {
        self.validate()?;
        self.risk_thresholds.check_monotonic()?;
        Ok(())
    }

    /// Serialize to the on-disk JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Parse`] if serialization fails.
    pub fn to_json_string(&self) -> Result<String, PolicyError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
