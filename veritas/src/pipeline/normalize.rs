//! `normalize`: schema coercion and input validation.

use async_trait::async_trait;

use super::stage::{DecisionCtx, PipelineStage, StageError};
use crate::values::normalize_weights;

/// Coerces the request and rejects invalid input before any other stage
/// spends work on it.
pub struct NormalizeStage;

#[async_trait]
impl PipelineStage for NormalizeStage {
    fn name(&self) -> &'static str {
        "normalize"
    }

    async fn run(&self, ctx: &mut DecisionCtx) -> Result<(), StageError> {
        // Split-borrow so the request and the coercion log can be used
        // together.
        let DecisionCtx {
            request, coercions, ..
        } = ctx;
        request.normalize(coercions)?;
        ctx.weights = normalize_weights(&ctx.request.context.telos_weights);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::request::DecideRequest;

    #[tokio::test]
    async fn rejects_oversized_query_as_fatal() {
        let request = DecideRequest::from_query("x".repeat(10_001));
        let mut ctx = DecisionCtx::new(request, "r1".into(), "u1".into());
        let err = NormalizeStage.run(&mut ctx).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn computes_weights() {
        let mut request = DecideRequest::from_query("q");
        request
            .context
            .telos_weights
            .insert("safety".to_string(), 3.0);
        let mut ctx = DecisionCtx::new(request, "r1".into(), "u1".into());
        NormalizeStage.run(&mut ctx).await.unwrap();
        let sum: f32 = ctx.weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(ctx.weights[1] > ctx.weights[0]);
    }
}
