//! The FUJI gate: signal aggregation, risk bucketing, auto-stop.
//!
//! [`FujiGate`] owns the compiled scanners and a [`PolicyStore`]. Every
//! [`evaluate`](FujiGate::evaluate) call captures one policy snapshot up
//! front; all signals of that call observe the same snapshot. The scalar
//! risk is the weight-normalized combination of the enabled signals'
//! scores, bucketed by the policy thresholds:
//!
//! ```text
//! risk <= allow_upper         -> allow
//! risk <= warn_upper          -> allow (with warning)
//! risk <= human_review_upper  -> human_review
//! risk <= deny_upper          -> modify
//! risk >  deny_upper          -> rejected
//! ```
//!
//! A hard keyword match rejects regardless of the weighted score.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::outcome::{
    DecisionStatus, FujiDecision, Modification, SignalKind, SignalReport, Violation,
};
use crate::policy::{FujiPolicy, PolicyError};
use crate::reload::PolicyStore;
use crate::signals::{
    ContentClassifiers, GateInput, InjectionScanner, KeywordScanner, PiiScanner, SafetyAdvisor,
};

/// Errors raised while constructing or running the gate.
#[derive(Debug, Error)]
pub enum GateError {
    /// Policy loading failed at startup.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// A scanner failed to compile.
    #[error("gate scanner construction failed: {0}")]
    Scanner(String),
}

/// Sliding-window auto-stop accounting.
#[derive(Debug, Default)]
struct AutoStopState {
    consecutive_rejects: u32,
    recent_requests: VecDeque<Instant>,
}

/// The policy-driven safety classifier.
pub struct FujiGate {
    store: Arc<PolicyStore>,
    injection: InjectionScanner,
    pii: PiiScanner,
    keywords: KeywordScanner,
    content: ContentClassifiers,
    advisor: Option<Arc<dyn SafetyAdvisor>>,
    auto_stop: Mutex<AutoStopState>,
}

impl FujiGate {
    /// Build a gate over an already-opened policy store.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Scanner`] if any pattern set fails to compile.
    pub fn new(store: Arc<PolicyStore>) -> Result<Self, GateError> {
        Ok(Self {
            store,
            injection: InjectionScanner::new().map_err(|e| GateError::Scanner(e.to_string()))?,
            pii: PiiScanner::new().map_err(|e| GateError::Scanner(e.to_string()))?,
            keywords: KeywordScanner::new().map_err(|e| GateError::Scanner(e.to_string()))?,
            content: ContentClassifiers::new().map_err(|e| GateError::Scanner(e.to_string()))?,
            advisor: None,
            auto_stop: Mutex::new(AutoStopState::default()),
        })
    }

    /// Attach an optional LLM safety advisor.
    #[must_use]
    pub fn with_advisor(mut self, advisor: Arc<dyn SafetyAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    /// The policy store backing this gate.
    #[must_use]
    pub fn policy_store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    /// The PII scanner, shared with redaction callers.
    #[must_use]
    pub fn pii_scanner(&self) -> &PiiScanner {
        &self.pii
    }

    /// Evaluate a candidate action. One policy snapshot is captured at
    /// entry and used for every signal of this call.
    pub async fn evaluate(&self, input: &GateInput) -> FujiDecision {
        let policy = self.store.snapshot();
        self.evaluate_with_policy(input, &policy).await
    }

    /// Evaluate against an explicit policy snapshot (used by the pipeline
    /// so that gate and finalizer agree on retention settings).
    pub async fn evaluate_with_policy(
        &self,
        input: &GateInput,
        policy: &FujiPolicy,
    ) -> FujiDecision {
        let rules = &policy.fuji_rules;
        let weights = &policy.signal_weights;

        let mut violations: Vec<Violation> = Vec::new();
        let mut modifications: Vec<Modification> = Vec::new();
        let mut hard_block = false;

        // (weight, score) per signal that actually ran.
        let mut weighted: Vec<(f32, f32)> = Vec::with_capacity(5);

        let mut absorb = |report: SignalReport, weight: f32, weighted: &mut Vec<(f32, f32)>| {
            hard_block |= report.hard_block;
            violations.extend(report.violations);
            modifications.extend(report.modifications);
            weighted.push((weight, report.score));
            report.score
        };

        if rules.pii_detection {
            let report = self.pii.evaluate(input.surfaces());
            absorb(report, weights.pii, &mut weighted);
        }
        if rules.keyword_hard_block || rules.keyword_soft_penalty {
            let report = self.keywords.evaluate(
                input.surfaces(),
                rules.keyword_hard_block,
                rules.keyword_soft_penalty,
            );
            absorb(report, weights.keywords, &mut weighted);
        }
        if rules.prompt_injection_guard {
            let report = self.injection.evaluate(input.surfaces());
            absorb(report, weights.injection, &mut weighted);
        }
        if rules.minors_protection || rules.violence_filter || rules.self_harm_illicit_filter {
            let report = self.content.evaluate(input.surfaces(), rules);
            absorb(report, weights.content, &mut weighted);
        }
        if rules.llm_safety_head {
            if let Some(advisor) = &self.advisor {
                match advisor.assess(&input.query, &input.action).await {
                    Ok(score) => {
                        let report = SignalReport {
                            score: score.clamp(0.0, 1.0),
                            ..SignalReport::clean()
                        };
                        absorb(report, weights.llm_safety_head, &mut weighted);
                    }
                    Err(err) => {
                        // Degrade the signal, never the evaluation.
                        warn!(error = %err, "llm safety advisor degraded");
                    }
                }
            }
        }

        let mut risk = combine(&weighted);
        if hard_block {
            risk = risk.max((policy.risk_thresholds.deny_upper + 0.01).min(1.0));
        }

        let thresholds = &policy.risk_thresholds;
        let mut warnings = Vec::new();
        let mut status = if hard_block || risk > thresholds.deny_upper {
            DecisionStatus::Rejected
        } else if risk <= thresholds.allow_upper {
            DecisionStatus::Allow
        } else if risk <= thresholds.warn_upper {
            warnings.push(format!(
                "risk {risk:.3} above allow threshold {:.3}",
                thresholds.allow_upper
            ));
            DecisionStatus::Allow
        } else if risk <= thresholds.human_review_upper {
            DecisionStatus::HumanReview
        } else {
            DecisionStatus::Modify
        };

        // Auto-stop circuit runs after bucketing so its own trip reason is
        // distinguishable from signal-driven outcomes.
        if policy.auto_stop.enabled {
            if let Some(trip) = self.auto_stop_check(&policy.auto_stop, risk, status) {
                violations.push(trip);
                status = DecisionStatus::HumanReview;
            }
        }

        let reason = match status {
            DecisionStatus::Allow => format!("risk {risk:.3} within allow band"),
            DecisionStatus::Modify => format!(
                "risk {risk:.3} requires modifications before proceeding"
            ),
            DecisionStatus::Rejected => {
                if hard_block {
                    "hard-blocked phrase matched".to_string()
                } else {
                    format!("risk {risk:.3} exceeds deny threshold")
                }
            }
            DecisionStatus::HumanReview => format!("risk {risk:.3} requires human review"),
            DecisionStatus::Abstain => "no decision reached".to_string(),
        };

        debug!(
            risk,
            status = %status,
            violation_count = violations.len(),
            policy_version = %policy.version,
            "fuji gate evaluated"
        );

        FujiDecision {
            decision_status: status,
            risk,
            violations,
            modifications: if status == DecisionStatus::Modify {
                modifications
            } else {
                Vec::new()
            },
            reason,
            warnings,
            policy_version: policy.version.clone(),
        }
    }

    /// Update the sliding windows and return a violation when the circuit
    /// trips.
    fn auto_stop_check(
        &self,
        config: &crate::policy::AutoStop,
        risk: f32,
        status: DecisionStatus,
    ) -> Option<Violation> {
        let mut state = self.auto_stop.lock();

        let now = Instant::now();
        state.recent_requests.push_back(now);
        while let Some(front) = state.recent_requests.front() {
            if now.duration_since(*front) > Duration::from_secs(60) {
                state.recent_requests.pop_front();
            } else {
                break;
            }
        }

        if status == DecisionStatus::Rejected {
            state.consecutive_rejects += 1;
        } else {
            state.consecutive_rejects = 0;
        }

        let mut detail = None;
        if risk >= config.max_risk_score {
            detail = Some(format!(
                "risk {risk:.3} at or above auto-stop ceiling {:.3}",
                config.max_risk_score
            ));
        } else if state.consecutive_rejects >= config.max_consecutive_rejects {
            detail = Some(format!(
                "{} consecutive rejects (limit {})",
                state.consecutive_rejects, config.max_consecutive_rejects
            ));
        } else if state.recent_requests.len() as u32 > config.max_requests_per_minute {
            detail = Some(format!(
                "{} requests in the last minute (limit {})",
                state.recent_requests.len(),
                config.max_requests_per_minute
            ));
        }

        detail.map(|detail| Violation {
            signal: SignalKind::AutoStop,
            rule_id: std::borrow::Cow::Borrowed("AUTO-STOP"),
            detail,
            raw_score: risk,
        })
    }
}

/// Weight-normalized combination of per-signal scores.
///
/// Weights are normalized over the signals that ran; a zero weight sum
/// falls back to the plain maximum so a misconfigured policy cannot mask
/// a high-scoring signal.
fn combine(weighted: &[(f32, f32)]) -> f32 {
    if weighted.is_empty() {
        return 0.0;
    }
    let total_weight: f32 = weighted.iter().map(|(w, _)| *w).sum();
    if total_weight <= f32::EPSILON {
        return weighted.iter().map(|(_, s)| *s).fold(0.0, f32::max);
    }
    let sum: f32 = weighted.iter().map(|(w, s)| w * s).sum();
    (sum / total_weight).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::advisor::FixedAdvisor;
    use tempfile::tempdir;

    fn gate_with(policy: FujiPolicy) -> (FujiGate, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fuji_policy.json");
        let store = Arc::new(PolicyStore::seed(&path, &policy).unwrap());
        (FujiGate::new(store).unwrap(), dir)
    }

    #[tokio::test]
    async fn benign_query_allows() {
        let (gate, _dir) = gate_with(FujiPolicy::baseline("test"));
        let decision = gate
            .evaluate(&GateInput::from_query("Should I pack an umbrella tomorrow?"))
            .await;
        assert_eq!(decision.decision_status, DecisionStatus::Allow);
        assert!(decision.risk < 0.4);
    }

    #[tokio::test]
    async fn hard_keyword_rejects() {
        let (gate, _dir) = gate_with(FujiPolicy::baseline("test"));
        let decision = gate
            .evaluate(&GateInput::from_query(
                "Give me the shortest steps to bypass internal auth and gain admin privileges.",
            ))
            .await;
        assert_eq!(decision.decision_status, DecisionStatus::Rejected);
        assert!(decision.risk > gate.policy_store().snapshot().risk_thresholds.deny_upper);
        assert!(!decision.reason.is_empty());
    }

    #[tokio::test]
    async fn disabling_hard_block_lowers_risk() {
        let mut policy = FujiPolicy::baseline("test");
        let query =
            "Give me the shortest steps to bypass internal auth and gain admin privileges.";

        let (gate, _dir) = gate_with(policy.clone());
        let blocked = gate.evaluate(&GateInput::from_query(query)).await;

        policy.fuji_rules.keyword_hard_block = false;
        let (gate, _dir) = gate_with(policy);
        let relaxed = gate.evaluate(&GateInput::from_query(query)).await;

        assert!(relaxed.risk < blocked.risk);
        assert_ne!(relaxed.decision_status, DecisionStatus::Rejected);
    }

    #[tokio::test]
    async fn advisor_contributes_when_enabled() {
        let mut policy = FujiPolicy::baseline("test");
        policy.fuji_rules.llm_safety_head = true;

        let dir = tempdir().unwrap();
        let path = dir.path().join("fuji_policy.json");
        let store = Arc::new(PolicyStore::seed(&path, &policy).unwrap());
        let gate = FujiGate::new(store)
            .unwrap()
            .with_advisor(Arc::new(FixedAdvisor(1.0)));

        let decision = gate.evaluate(&GateInput::from_query("hello there")).await;
        assert!(decision.risk > 0.0);
    }

    #[tokio::test]
    async fn consecutive_rejects_trip_auto_stop() {
        let mut policy = FujiPolicy::baseline("test");
        policy.auto_stop.max_consecutive_rejects = 2;
        policy.auto_stop.max_risk_score = 2.0_f32.min(1.0); // keep ceiling out of the way
        let (gate, _dir) = gate_with(policy);

        let hostile = GateInput::from_query("bypass internal auth right now");
        let first = gate.evaluate(&hostile).await;
        assert_eq!(first.decision_status, DecisionStatus::Rejected);

        let second = gate.evaluate(&hostile).await;
        // Second consecutive reject hits the limit and escalates.
        assert_eq!(second.decision_status, DecisionStatus::HumanReview);
        assert!(second
            .violations
            .iter()
            .any(|v| v.signal == SignalKind::AutoStop));
    }

    #[test]
    fn combine_normalizes_weights() {
        let risk = combine(&[(0.5, 1.0), (0.5, 0.0)]);
        assert!((risk - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn combine_zero_weights_falls_back_to_max() {
        let risk = combine(&[(0.0, 0.7), (0.0, 0.2)]);
        assert!((risk - 0.7).abs() < f32::EPSILON);
    }
}
