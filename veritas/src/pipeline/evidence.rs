//! `collect_evidence`: memory retrieval plus optional web search.
//!
//! Evidence is ranked by `relevance * reliability`. Memory results carry
//! the cosine similarity as relevance and a fixed high reliability; web
//! results carry the backend's reliability estimate. The stage keeps at
//! least `min_evidence` items when that many are available.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::Services;
use super::stage::{DecisionCtx, PipelineStage, StageError};
use crate::capability::clamp_max_results;
use crate::memory::MemoryError;
use crate::schema::response::EvidenceItem;

/// Reliability assigned to the caller's own memory.
const MEMORY_RELIABILITY: f32 = 0.9;
/// Memory hits requested per query when `min_evidence` asks for fewer.
const MEMORY_K: usize = 8;

/// The evidence-collection stage.
pub struct EvidenceStage {
    services: Arc<Services>,
}

impl EvidenceStage {
    /// Wire the stage to its services.
    #[must_use]
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl PipelineStage for EvidenceStage {
    fn name(&self) -> &'static str {
        "collect_evidence"
    }

    async fn run(&self, ctx: &mut DecisionCtx) -> Result<(), StageError> {
        let memory = self.services.memory.clone();
        let principal = ctx.principal.clone();
        let query = ctx.request.query.clone();

        // min_evidence is validated to 0..=100 by normalize; the fetch
        // size must cover it or the keep-at-least guarantee below would
        // be starved at the source.
        let min_evidence = ctx.request.min_evidence as usize;
        let fetch = MEMORY_K.max(min_evidence);

        // Shard load can hit disk; keep it off the async worker.
        let scored = tokio::task::spawn_blocking(move || {
            memory.search_scored(&principal, &query, fetch, None)
        })
        .await
        .map_err(|e| MemoryError::TaskJoin(e.to_string()))??;

        ctx.memory_used_count = scored.len();
        for (record, similarity) in scored {
            let relevance = similarity.clamp(0.0, 1.0);
            ctx.memory_citations.push(record.id.to_string());
            ctx.evidence.push(EvidenceItem {
                source: "memory".to_string(),
                text: record.text,
                relevance,
                reliability: MEMORY_RELIABILITY,
                score: relevance * MEMORY_RELIABILITY,
                memory_id: Some(record.id.to_string()),
            });
        }

        // Optional web search: failure degrades the stage but never
        // discards the memory evidence already collected.
        let mut web_error: Option<StageError> = None;
        if self.services.manifest.web_search {
            match &self.services.web_search {
                Some(backend) => {
                    let max = clamp_max_results(fetch);
                    match backend.search(&ctx.request.query, max).await {
                        Ok(hits) => {
                            for (rank, hit) in hits.into_iter().enumerate() {
                                #[allow(clippy::cast_precision_loss)]
                                let relevance = (1.0 - rank as f32 * 0.05).clamp(0.1, 1.0);
                                let reliability = hit.reliability.clamp(0.0, 1.0);
                                ctx.evidence.push(EvidenceItem {
                                    source: "web".to_string(),
                                    text: format!("{} – {}", hit.title, hit.snippet),
                                    relevance,
                                    reliability,
                                    score: relevance * reliability,
                                    memory_id: None,
                                });
                            }
                        }
                        Err(err) => {
                            debug!(error = %err, "web search degraded");
                            web_error = Some(StageError::CapabilityUnavailable {
                                capability: "web_search",
                            });
                        }
                    }
                }
                None => {
                    web_error = Some(StageError::CapabilityUnavailable {
                        capability: "web_search",
                    });
                }
            }
        }

        ctx.evidence.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        // Keep at least min_evidence items when that many were collected.
        ctx.evidence.truncate(min_evidence.max(MEMORY_K));

        match web_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedCompleter;
    use crate::pipeline::test_support::services_with_completer;
    use crate::schema::request::DecideRequest;
    use rustc_hash::FxHashMap;

    #[tokio::test]
    async fn collects_memory_evidence() {
        let (services, _dirs) =
            services_with_completer(Arc::new(ScriptedCompleter::always("{}"))).await;
        services
            .memory
            .put("u1", "semantic", "umbrella rain forecast", FxHashMap::default())
            .unwrap();

        let mut ctx = DecisionCtx::new(
            DecideRequest::from_query("should I bring an umbrella for the rain?"),
            "r1".into(),
            "u1".into(),
        );
        EvidenceStage::new(services).run(&mut ctx).await.unwrap();

        assert_eq!(ctx.memory_used_count, 1);
        assert_eq!(ctx.evidence.len(), 1);
        assert_eq!(ctx.evidence[0].source, "memory");
        assert_eq!(ctx.memory_citations.len(), 1);
        assert!(ctx.evidence[0].score > 0.0);
    }

    #[tokio::test]
    async fn large_min_evidence_is_honored() {
        let (services, _dirs) =
            services_with_completer(Arc::new(ScriptedCompleter::always("{}"))).await;
        for n in 0..60 {
            services
                .memory
                .put(
                    "u1",
                    "semantic",
                    &format!("commute note {n}: trains run on time"),
                    FxHashMap::default(),
                )
                .unwrap();
        }

        let mut request = DecideRequest::from_query("do the trains run on time?");
        request.min_evidence = 50;
        let mut ctx = DecisionCtx::new(request, "r1".into(), "u1".into());
        EvidenceStage::new(services).run(&mut ctx).await.unwrap();

        assert_eq!(ctx.evidence.len(), 50);
        assert_eq!(ctx.memory_used_count, 50);
    }

    #[tokio::test]
    async fn other_users_memory_never_leaks() {
        let (services, _dirs) =
            services_with_completer(Arc::new(ScriptedCompleter::always("{}"))).await;
        services
            .memory
            .put("owner", "semantic", "owner secret plans", FxHashMap::default())
            .unwrap();

        let mut ctx = DecisionCtx::new(
            DecideRequest::from_query("secret plans"),
            "r1".into(),
            "intruder".into(),
        );
        EvidenceStage::new(services).run(&mut ctx).await.unwrap();
        assert!(ctx.evidence.is_empty());
    }
}
