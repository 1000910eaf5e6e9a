//! Property tests for the chain, canonicalization, and weight
//! normalization.

use proptest::prelude::*;
use rustc_hash::FxHashMap;
use serde_json::json;
use veritas::trustlog::{TrustLog, verify_chain};
use veritas::utils::canon::canonical_json;
use veritas::values::{AXES, normalize_weights};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn any_append_sequence_verifies(payloads in proptest::collection::vec(".{0,40}", 1..12)) {
        let dir = tempfile::tempdir().unwrap();
        let log = TrustLog::open(dir.path(), 1024 * 1024).unwrap();

        for (n, payload) in payloads.iter().enumerate() {
            log.append(&format!("req-{n}"), "decide", json!({"text": payload})).unwrap();
        }

        let report = verify_chain(dir.path()).unwrap();
        prop_assert!(report.ok);
        prop_assert_eq!(report.entries_checked, payloads.len());
    }

    #[test]
    fn canonical_json_ignores_key_insertion_order(
        keys in proptest::collection::btree_set("[a-z]{1,8}", 1..8),
    ) {
        let keys: Vec<String> = keys.into_iter().collect();
        let forward = {
            let mut map = serde_json::Map::new();
            for (i, k) in keys.iter().enumerate() {
                map.insert(k.clone(), json!(i));
            }
            serde_json::Value::Object(map)
        };
        let reverse = {
            let mut map = serde_json::Map::new();
            for (i, k) in keys.iter().enumerate().rev() {
                map.insert(k.clone(), json!(i));
            }
            serde_json::Value::Object(map)
        };
        prop_assert_eq!(canonical_json(&forward), canonical_json(&reverse));
    }

    #[test]
    fn normalized_weights_always_sum_to_one(
        raw in proptest::collection::vec(0.0f64..100.0, 5),
    ) {
        let mut map = FxHashMap::default();
        for (axis, w) in AXES.iter().zip(&raw) {
            map.insert(axis.as_str().to_string(), *w);
        }
        let weights = normalize_weights(&map);
        let sum: f32 = weights.iter().sum();
        prop_assert!((sum - 1.0).abs() < 1e-4);
        prop_assert!(weights.iter().all(|w| (0.0..=1.0).contains(w)));
    }
}
