//! `score`: ValueCore scoring, ranking, and EMA drift update.
//!
//! Alternatives are re-ordered by weighted total descending with ties
//! broken by original input order (the sort is stable). When the request
//! and planner produced no alternatives at all, two canonical candidates
//! are synthesized so every decision has a `chosen`.

use std::sync::Arc;

use async_trait::async_trait;

use super::Services;
use super::stage::{DecisionCtx, PipelineStage, StageError};
use crate::fsio::FsIoError;
use crate::schema::request::AltItem;
use crate::values::{score_alternative, values_out};

/// The scoring stage.
pub struct ScoreStage {
    services: Arc<Services>,
}

impl ScoreStage {
    /// Wire the stage to its services.
    #[must_use]
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    fn synthesize_alternatives(ctx: &mut DecisionCtx) {
        let subject: String = ctx.request.query.chars().take(80).collect();
        ctx.request.alternatives = vec![
            AltItem {
                id: "proceed".to_string(),
                title: format!("Proceed: {subject}"),
                description: "Act on the query as asked.".to_string(),
                score: 0.6,
                extra: rustc_hash::FxHashMap::default(),
            },
            AltItem {
                id: "defer".to_string(),
                title: "Defer and gather more information".to_string(),
                description: "Hold off until more evidence is available.".to_string(),
                score: 0.4,
                extra: rustc_hash::FxHashMap::default(),
            },
        ];
        ctx.request.options = ctx.request.alternatives.clone();
    }
}

#[async_trait]
impl PipelineStage for ScoreStage {
    fn name(&self) -> &'static str {
        "score"
    }

    async fn run(&self, ctx: &mut DecisionCtx) -> Result<(), StageError> {
        if ctx.request.alternatives.is_empty() {
            Self::synthesize_alternatives(ctx);
        }

        let goals = ctx.request.context.goals.clone();
        let siblings = ctx.request.alternatives.clone();

        let mut scored: Vec<(usize, AltItem, crate::values::AxisScores)> = ctx
            .request
            .alternatives
            .iter()
            .cloned()
            .enumerate()
            .map(|(idx, alt)| {
                let scores = score_alternative(&alt, &goals, &siblings, &ctx.weights);
                (idx, alt, scores)
            })
            .collect();

        // Stable sort: ties keep original input order.
        scored.sort_by(|a, b| {
            b.2.total
                .partial_cmp(&a.2.total)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        ctx.request.alternatives = scored.iter().map(|(_, alt, _)| alt.clone()).collect();
        ctx.request.options = ctx.request.alternatives.clone();
        ctx.alt_scores = scored.into_iter().map(|(_, _, s)| s).collect();

        let chosen_scores = &ctx.alt_scores[0];
        ctx.values = Some(values_out(chosen_scores, &ctx.weights));

        // Fold the total into the user's EMA; a failed write degrades the
        // stage but never blocks the decision.
        let drift = self.services.drift.clone();
        let principal = ctx.principal.clone();
        let total = chosen_scores.total;
        let snapshot = tokio::task::spawn_blocking(move || drift.update(&principal, total))
            .await
            .map_err(|e| {
                StageError::Io(FsIoError::Io {
                    path: std::path::PathBuf::from("value_ema.json"),
                    source: std::io::Error::other(e.to_string()),
                })
            })??;
        ctx.drift = Some(snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedCompleter;
    use crate::pipeline::test_support::services_with_completer;
    use crate::schema::request::DecideRequest;

    fn alt(id: &str, title: &str, score: f64) -> AltItem {
        AltItem {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            score,
            extra: rustc_hash::FxHashMap::default(),
        }
    }

    #[tokio::test]
    async fn ranks_by_total_descending() {
        let (services, _dirs) =
            services_with_completer(Arc::new(ScriptedCompleter::always("{}"))).await;

        let mut request = DecideRequest::from_query("pick");
        request
            .context
            .telos_weights
            .insert("utility".to_string(), 100.0);
        request.alternatives = vec![alt("low", "weak", 0.1), alt("high", "strong", 0.9)];
        let mut ctx = DecisionCtx::new(request, "r1".into(), "u1".into());
        ctx.weights = crate::values::normalize_weights(&ctx.request.context.telos_weights);

        ScoreStage::new(services).run(&mut ctx).await.unwrap();

        assert_eq!(ctx.request.alternatives[0].id, "high");
        assert_eq!(ctx.request.options[0].id, "high");
        assert!(ctx.alt_scores[0].total > ctx.alt_scores[1].total);
        assert!(ctx.values.is_some());
        assert!(ctx.drift.is_some());
    }

    #[tokio::test]
    async fn ties_keep_input_order() {
        let (services, _dirs) =
            services_with_completer(Arc::new(ScriptedCompleter::always("{}"))).await;

        let mut request = DecideRequest::from_query("pick");
        request.alternatives = vec![alt("first", "same", 0.5), alt("second", "same", 0.5)];
        let mut ctx = DecisionCtx::new(request, "r1".into(), "u1".into());

        ScoreStage::new(services).run(&mut ctx).await.unwrap();
        assert_eq!(ctx.request.alternatives[0].id, "first");
    }

    #[tokio::test]
    async fn synthesizes_alternatives_when_none() {
        let (services, _dirs) =
            services_with_completer(Arc::new(ScriptedCompleter::always("{}"))).await;

        let mut ctx = DecisionCtx::new(
            DecideRequest::from_query("should I pack an umbrella?"),
            "r1".into(),
            "u1".into(),
        );
        ScoreStage::new(services).run(&mut ctx).await.unwrap();

        assert_eq!(ctx.request.alternatives.len(), 2);
        assert!(!ctx.alt_scores.is_empty());
    }
}
