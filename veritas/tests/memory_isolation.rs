//! Memory ownership and whitelist behavior through the public surface.

mod common;

use common::bootstrap_pipeline;
use rustc_hash::FxHashMap;
use veritas::memory::{MemoryError, MemoryKind};
use veritas::schema::request::DecideRequest;

#[tokio::test]
async fn user_shards_never_cross() {
    let (pipeline, _dir) = bootstrap_pipeline();
    let memory = pipeline.services().memory.clone();

    memory
        .put("u1", "episodic", "u1 met the vendor on tuesday", FxHashMap::default())
        .unwrap();

    let hits = memory.search("u2", "vendor tuesday", 10, None).unwrap();
    assert!(hits.is_empty());

    // And through the pipeline: u2's evidence stage sees nothing of u1.
    let resp = pipeline
        .decide("u2", DecideRequest::from_query("vendor meeting tuesday"))
        .await;
    assert_eq!(resp.memory_used_count, 0);
    assert!(resp.memory_citations.is_empty());
}

#[tokio::test]
async fn unknown_kind_fails_without_state_change() {
    let (pipeline, _dir) = bootstrap_pipeline();
    let memory = pipeline.services().memory.clone();

    let err = memory
        .put("u1", "vibes", "not a real kind", FxHashMap::default())
        .unwrap_err();
    assert!(matches!(err, MemoryError::UnknownKind { .. }));
    assert_eq!(memory.count("u1").unwrap(), 0);
}

#[tokio::test]
async fn kinds_filter_search_results() {
    let (pipeline, _dir) = bootstrap_pipeline();
    let memory = pipeline.services().memory.clone();

    memory
        .put("u1", "citation", "weather report from the met office", FxHashMap::default())
        .unwrap();
    memory
        .put("u1", "episodic", "weather was bad last week", FxHashMap::default())
        .unwrap();

    let citations = memory
        .search("u1", "weather", 10, Some(&[MemoryKind::Citation]))
        .unwrap();
    assert_eq!(citations.len(), 1);
    assert_eq!(citations[0].kind, MemoryKind::Citation);
}

#[tokio::test]
async fn pii_redacted_before_persistence() {
    let (pipeline, _dir) = bootstrap_pipeline();
    let memory = pipeline.services().memory.clone();

    let id = memory
        .put(
            "u1",
            "episodic",
            "customer mail is hana@example.org",
            FxHashMap::default(),
        )
        .unwrap();

    let record = memory.get("u1", id).unwrap();
    assert!(record.text.contains("[REDACTED:email]"));
    assert!(!record.text.contains("hana@example.org"));
}

#[tokio::test]
async fn rebuild_swaps_while_readers_finish() {
    let (pipeline, _dir) = bootstrap_pipeline();
    let memory = pipeline.services().memory.clone();

    for n in 0..20 {
        memory
            .put("u1", "semantic", &format!("fact number {n}"), FxHashMap::default())
            .unwrap();
    }

    let searcher = {
        let memory = memory.clone();
        tokio::task::spawn_blocking(move || {
            for _ in 0..50 {
                let hits = memory.search("u1", "fact number", 5, None).unwrap();
                assert!(hits.len() <= 5);
            }
        })
    };
    let rebuilt = memory.rebuild_index("u1").await.unwrap();
    searcher.await.unwrap();
    assert_eq!(rebuilt, 20);
}
