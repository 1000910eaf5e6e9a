//! `finalize`: audit write, optional memory auto-put, persona stamp.
//!
//! The TrustLog entry is built according to the pinned policy snapshot's
//! retention settings (audit level, field whitelist, pre-write
//! redaction). When the append fails, the raw payload is retained on the
//! response (`trust_log` stays a raw value) and
//! `coercion.trust_log_promotion_failed` is emitted – the audit surface
//! never silently loses data.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::warn;
use vt_fuji::policy::AuditLevel;

use super::Services;
use super::stage::{DecisionCtx, PipelineStage, StageError};
use crate::events::DecisionEvent;
use crate::memory::MemoryError;
use crate::schema::coercion::kinds;
use crate::schema::response::{TrustLogField, TrustLogRef};

/// The finalizer stage.
pub struct FinalizeStage {
    services: Arc<Services>,
}

impl FinalizeStage {
    /// Wire the stage to its services.
    #[must_use]
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    /// Build the audit payload for this decision under the policy's
    /// retention settings.
    fn audit_payload(&self, ctx: &DecisionCtx) -> Value {
        let Some(policy) = ctx.policy.as_deref() else {
            return json!({"note": "no policy snapshot"});
        };
        let retention = &policy.log_retention;

        let gate = ctx.gate.as_ref();
        let mut payload = match retention.audit_level {
            AuditLevel::None => json!({}),
            AuditLevel::Minimal => json!({
                "decision_status": gate.map(|g| g.decision_status.as_str()),
                "risk": gate.map(|g| g.risk),
            }),
            AuditLevel::Standard => json!({
                "decision_status": gate.map(|g| g.decision_status.as_str()),
                "risk": gate.map(|g| g.risk),
                "violations": gate.map(|g| g.violations.clone()),
                "policy_version": policy.version,
                "telos_score": ctx.values.as_ref().map(|v| v.total),
            }),
            AuditLevel::Full | AuditLevel::Strict => json!({
                "decision_status": gate.map(|g| g.decision_status.as_str()),
                "risk": gate.map(|g| g.risk),
                "violations": gate.map(|g| g.violations.clone()),
                "policy_version": policy.version,
                "telos_score": ctx.values.as_ref().map(|v| v.total),
                "query": ctx.request.query,
                "chosen": ctx.request.alternatives.first().map(|a| a.id.clone()),
                "evidence_count": ctx.evidence.len(),
                "degraded_stages": ctx.degraded.iter().map(|d| d.stage.clone()).collect::<Vec<_>>(),
            }),
        };

        if retention.redact_before_log {
            payload = redact_value(&payload, self.services.gate.pii_scanner());
        }
        payload
    }
}

/// Recursively redact every string in a JSON value.
fn redact_value(value: &Value, scanner: &vt_fuji::signals::PiiScanner) -> Value {
    match value {
        Value::String(s) => Value::String(scanner.redact(s)),
        Value::Array(items) => Value::Array(items.iter().map(|v| redact_value(v, scanner)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), redact_value(v, scanner)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[async_trait]
impl PipelineStage for FinalizeStage {
    fn name(&self) -> &'static str {
        "finalize"
    }

    async fn run(&self, ctx: &mut DecisionCtx) -> Result<(), StageError> {
        // Persona stamp before audit so the payload can include it later
        // if the retention settings grow.
        ctx.persona = json!({
            "affect_hint": ctx.request.context.affect_hint,
            "evolved": ctx.request.persona_evolve,
        });

        let payload = self.audit_payload(ctx);
        let trust_log = self.services.trust_log.clone();
        let request_id = ctx.request_id.clone();
        let payload_for_append = payload.clone();

        let appended = tokio::task::spawn_blocking(move || {
            trust_log.append(&request_id, "decide", payload_for_append)
        })
        .await;

        match appended {
            Ok(Ok(entry)) => {
                self.services.events.emit(DecisionEvent::TrustAppended {
                    request_id: ctx.request_id.clone(),
                    sha256: entry.sha256.clone(),
                });
                ctx.trust_log = Some(TrustLogField::Typed(TrustLogRef {
                    stage: entry.stage,
                    sha256: entry.sha256,
                    sha256_prev: entry.sha256_prev,
                }));
            }
            Ok(Err(err)) => {
                warn!(error = %err, "trust log append failed; keeping raw audit payload");
                ctx.coercions.record(
                    kinds::TRUST_LOG_PROMOTION_FAILED,
                    "trust_log",
                    "audit append failed; raw payload retained",
                );
                ctx.trust_log = Some(TrustLogField::Raw(payload));
                return Err(err.into());
            }
            Err(join_err) => {
                ctx.coercions.record(
                    kinds::TRUST_LOG_PROMOTION_FAILED,
                    "trust_log",
                    "audit task failed; raw payload retained",
                );
                ctx.trust_log = Some(TrustLogField::Raw(payload));
                return Err(StageError::Memory(MemoryError::TaskJoin(
                    join_err.to_string(),
                )));
            }
        }

        // Optional episodic write-back, only for permitted decisions.
        let permitted = ctx.gate.as_ref().is_some_and(vt_fuji::outcome::FujiDecision::is_permitted);
        if ctx.request.memory_auto_put && permitted {
            let memory = self.services.memory.clone();
            let principal = ctx.principal.clone();
            let text = format!(
                "decision: {} -> {}",
                ctx.request.query,
                ctx.request
                    .alternatives
                    .first()
                    .map(|a| a.title.as_str())
                    .unwrap_or("(none)")
            );
            let put = tokio::task::spawn_blocking(move || {
                memory.put(&principal, "episodic", &text, rustc_hash::FxHashMap::default())
            })
            .await;
            match put {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => return Err(err.into()),
                Err(join_err) => {
                    return Err(StageError::Memory(MemoryError::TaskJoin(
                        join_err.to_string(),
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedCompleter;
    use crate::pipeline::test_support::services_with_completer;
    use crate::schema::request::DecideRequest;

    #[tokio::test]
    async fn appends_audit_entry_and_promotes_ref() {
        let (services, _dirs) =
            services_with_completer(Arc::new(ScriptedCompleter::always("{}"))).await;

        let mut ctx = DecisionCtx::new(
            DecideRequest::from_query("q"),
            "req-42".into(),
            "u1".into(),
        );
        ctx.policy = Some(services.gate.policy_store().snapshot());
        FinalizeStage::new(services.clone()).run(&mut ctx).await.unwrap();

        let reference = ctx.trust_log.as_ref().unwrap().as_typed().unwrap();
        assert_eq!(reference.stage, "decide");
        let audit = services.trust_log.get_by_request_id("req-42").unwrap();
        assert_eq!(audit.entries.len(), 1);
        assert!(audit.chain_ok);
    }

    #[tokio::test]
    async fn memory_auto_put_persists_episode() {
        let (services, _dirs) =
            services_with_completer(Arc::new(ScriptedCompleter::always("{}"))).await;

        let mut request = DecideRequest::from_query("should I walk to work?");
        request.memory_auto_put = true;
        let mut ctx = DecisionCtx::new(request, "r1".into(), "u1".into());
        ctx.policy = Some(services.gate.policy_store().snapshot());
        ctx.gate = Some(vt_fuji::outcome::FujiDecision {
            decision_status: vt_fuji::outcome::DecisionStatus::Allow,
            risk: 0.0,
            violations: vec![],
            modifications: vec![],
            reason: String::new(),
            warnings: vec![],
            policy_version: "1.0".into(),
        });

        FinalizeStage::new(services.clone()).run(&mut ctx).await.unwrap();
        assert_eq!(services.memory.count("u1").unwrap(), 1);
    }

    #[tokio::test]
    async fn redaction_strips_pii_from_audit_payload() {
        let (services, _dirs) =
            services_with_completer(Arc::new(ScriptedCompleter::always("{}"))).await;

        let mut policy = vt_fuji::policy::FujiPolicy::baseline("test");
        policy.log_retention.audit_level = AuditLevel::Full;
        policy.log_retention.redact_before_log = true;

        let mut ctx = DecisionCtx::new(
            DecideRequest::from_query("email me at taro@example.com about the plan"),
            "r9".into(),
            "u1".into(),
        );
        ctx.policy = Some(Arc::new(policy));
        FinalizeStage::new(services.clone()).run(&mut ctx).await.unwrap();

        let audit = services.trust_log.get_by_request_id("r9").unwrap();
        let stored = audit.entries[0].payload["query"].as_str().unwrap();
        assert!(stored.contains("[REDACTED:email]"));
        assert!(!stored.contains("taro@example.com"));
    }
}
