//! `critique` and `debate`: adversarial LLM passes over the candidate
//! set.
//!
//! Both stages share the failure policy of the planner: an LLM failure
//! leaves the output empty and degrades the stage. Payloads handed to the
//! model are bounded by the schema-level alternative caps.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::Services;
use super::stage::{DecisionCtx, PipelineStage, StageError};
use crate::llm::{
    ChatMessage, ChatRequest, RetryPolicy, complete_with_retry, extract_first_json_object,
};

fn retry_policy(services: &Services) -> RetryPolicy {
    RetryPolicy {
        timeout: services.config.llm_timeout,
        max_attempts: services.config.llm_max_attempts,
        base_backoff: std::time::Duration::from_millis(250),
    }
}

fn alternatives_digest(ctx: &DecisionCtx) -> String {
    let digest: Vec<_> = ctx
        .request
        .alternatives
        .iter()
        .map(|alt| json!({"id": alt.id, "title": alt.title, "description": alt.description}))
        .collect();
    serde_json::to_string(&digest).unwrap_or_else(|_| "[]".to_string())
}

/// The critique stage: one skeptical pass over each alternative.
pub struct CritiqueStage {
    services: Arc<Services>,
}

impl CritiqueStage {
    /// Wire the stage to its services.
    #[must_use]
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl PipelineStage for CritiqueStage {
    fn name(&self) -> &'static str {
        "critique"
    }

    async fn run(&self, ctx: &mut DecisionCtx) -> Result<(), StageError> {
        let request = ChatRequest {
            messages: vec![
                ChatMessage::system(
                    "Critique each alternative. Respond with one JSON object: \
                     {\"critiques\": [{\"id\": string, \"weaknesses\": [string], \
                     \"severity\": number}]}.",
                ),
                ChatMessage::user(format!(
                    "Query: {}\nAlternatives: {}",
                    ctx.request.query,
                    alternatives_digest(ctx),
                )),
            ],
            model: Some(self.services.config.model.clone()),
        };

        let raw =
            complete_with_retry(&self.services.completer, &request, retry_policy(&self.services))
                .await?;
        ctx.critique = extract_first_json_object(&raw).unwrap_or_else(|| json!({}));
        Ok(())
    }
}

/// The debate stage: argues the strongest alternatives against each
/// other.
pub struct DebateStage {
    services: Arc<Services>,
}

impl DebateStage {
    /// Wire the stage to its services.
    #[must_use]
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl PipelineStage for DebateStage {
    fn name(&self) -> &'static str {
        "debate"
    }

    async fn run(&self, ctx: &mut DecisionCtx) -> Result<(), StageError> {
        let request = ChatRequest {
            messages: vec![
                ChatMessage::system(
                    "Hold a short debate between the alternatives, taking the critique into \
                     account. Respond with one JSON object: {\"rounds\": [{\"position\": \
                     string, \"argument\": string}], \"leaning\": string}.",
                ),
                ChatMessage::user(format!(
                    "Query: {}\nAlternatives: {}\nCritique: {}",
                    ctx.request.query,
                    alternatives_digest(ctx),
                    ctx.critique,
                )),
            ],
            model: Some(self.services.config.model.clone()),
        };

        let raw =
            complete_with_retry(&self.services.completer, &request, retry_policy(&self.services))
                .await?;
        ctx.debate = extract_first_json_object(&raw).unwrap_or_else(|| json!({}));
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
    async fn critique_parses_model_json() {
        let completer = ScriptedCompleter::always(
            r#"{"critiques": [{"id": "a", "weaknesses": ["slow"], "severity": 0.3}]}"#,
        );
        let (services, _dirs) = services_with_completer(Arc::new(completer)).await;

        let mut ctx = DecisionCtx::new(
            DecideRequest::from_query("q"),
            "r1".into(),
            "u1".into(),
        );
        CritiqueStage::new(services).run(&mut ctx).await.unwrap();
        assert_eq!(ctx.critique["critiques"][0]["id"], "a");
    }

    #[tokio::test]
    async fn debate_failure_is_recoverable() {
        let completer = ScriptedCompleter::failing("down");
        let (services, _dirs) = services_with_completer(Arc::new(completer)).await;

        let mut ctx = DecisionCtx::new(
            DecideRequest::from_query("q"),
            "r1".into(),
            "u1".into(),
        );
        let err = DebateStage::new(services).run(&mut ctx).await.unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(ctx.debate, json!({}));
    }
}
