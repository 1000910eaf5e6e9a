//! `plan`: LLM task decomposition.
//!
//! Produces a structured plan and, when the request carried no
//! alternatives, adopts candidate alternatives proposed by the model. An
//! LLM failure leaves the plan empty and degrades the stage; it never
//! fails the pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::Services;
use super::stage::{DecisionCtx, PipelineStage, StageError};
use crate::llm::{ChatMessage, ChatRequest, complete_with_retry, extract_first_json_object};
use crate::schema::request::{AltItem, MAX_ALTERNATIVES};

/// The planner stage.
pub struct PlanStage {
    services: Arc<Services>,
}

impl PlanStage {
    /// Wire the stage to its services.
    #[must_use]
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    fn prompt(&self, ctx: &DecisionCtx) -> ChatRequest {
        let horizon = ctx
            .request
            .context
            .time_horizon
            .map(|h| format!("{h:?}").to_lowercase())
            .unwrap_or_else(|| "unspecified".to_string());

        ChatRequest {
            messages: vec![
                ChatMessage::system(
                    "You decompose a decision query into a JSON plan. Respond with one JSON \
                     object: {\"steps\": [{\"id\": number, \"action\": string}], \
                     \"alternatives\": [{\"id\": string, \"title\": string, \
                     \"description\": string, \"score\": number}], \"confidence\": number}.",
                ),
                ChatMessage::user(format!(
                    "Query: {}\nGoals: {:?}\nConstraints: {:?}\nTime horizon: {horizon}",
                    ctx.request.query, ctx.request.context.goals, ctx.request.context.constraints,
                )),
            ],
            model: Some(self.services.config.model.clone()),
        }
    }
}

#[async_trait]
impl PipelineStage for PlanStage {
    fn name(&self) -> &'static str {
        "plan"
    }

    async fn run(&self, ctx: &mut DecisionCtx) -> Result<(), StageError> {
        let policy = crate::llm::RetryPolicy {
            timeout: self.services.config.llm_timeout,
            max_attempts: self.services.config.llm_max_attempts,
            base_backoff: std::time::Duration::from_millis(250),
        };

        let request = self.prompt(ctx);
        let raw = match complete_with_retry(&self.services.completer, &request, policy).await {
            Ok(raw) => raw,
            Err(err) => {
                // Empty plan; the pipeline continues degraded.
                ctx.plan = json!({});
                ctx.planner = json!({"degraded": true});
                return Err(err.into());
            }
        };

        let Some(parsed) = extract_first_json_object(&raw) else {
            ctx.plan = json!({});
            ctx.planner = json!({"degraded": true, "reason": "no JSON object in output"});
            return Ok(());
        };

        if ctx.request.alternatives.is_empty() {
            if let Some(alts) = parsed.get("alternatives").and_then(Value::as_array) {
                let adopted: Vec<AltItem> = alts
                    .iter()
                    .take(MAX_ALTERNATIVES)
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect();
                if !adopted.is_empty() {
                    ctx.request.alternatives = adopted.clone();
                    ctx.request.options = adopted;
                }
            }
        }

        ctx.plan = parsed;
        ctx.planner = json!({
            "model": self.services.config.model,
            "degraded": false,
        });
        Ok(())
    }
}
