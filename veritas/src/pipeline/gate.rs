//! `gate`: FUJI evaluation of the chosen candidate.
//!
//! The policy snapshot is captured once at gate entry and pinned on the
//! context; the finalizer reads its retention settings from the same
//! snapshot, so one call never observes two policies.

use std::sync::Arc;

use async_trait::async_trait;
use vt_fuji::signals::GateInput;

use super::Services;
use super::stage::{DecisionCtx, PipelineStage, StageError};

/// The gate stage.
pub struct GateStage {
    services: Arc<Services>,
}

impl GateStage {
    /// Wire the stage to its services.
    #[must_use]
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl PipelineStage for GateStage {
    fn name(&self) -> &'static str {
        "gate"
    }

    async fn run(&self, ctx: &mut DecisionCtx) -> Result<(), StageError> {
        // Hot reload happens inside snapshot(); one snapshot per call.
        let policy = self.services.gate.policy_store().snapshot();

        let input = GateInput {
            action: ctx.candidate_action_text(),
            query: ctx.request.query.clone(),
            context_text: ctx.context_text(),
            user_id: Some(ctx.principal.clone()),
        };

        let decision = self
            .services
            .gate
            .evaluate_with_policy(&input, &policy)
            .await;

        ctx.policy = Some(policy);
        ctx.gate = Some(decision);
        Ok(())
    }
}
