//! Property-based tests using proptest.
//!
//! Tests the execution-strategy invariants of group compilation:
//! - Block and row compilation of the same group give the same results
//! - Spilling at any threshold gives the same results as no spilling
//! - Every input document lands in exactly one group

mod common;

use common::run;
use proptest::prelude::*;
use sbe_group::BuilderConfig;
use serde_json::{json, Map, Value as Json};

// ── Strategies ─────────────────────────────────────────────────────────────

/// A document with an optional small-domain key `a`, an optional numeric
/// `b` and an optional string `c`. Absent fields exercise missing-value
/// handling.
fn arb_doc() -> impl Strategy<Value = Json> {
    (
        prop::option::of(prop_oneof![Just(json!(null)), (0i64..4).prop_map(Json::from)]),
        prop::option::of(-50i64..50),
        prop::option::of(prop::sample::select(vec!["p", "q", "r"])),
    )
        .prop_map(|(a, b, c)| {
            let mut doc = Map::new();
            if let Some(a) = a {
                doc.insert("a".into(), a);
            }
            if let Some(b) = b {
                doc.insert("b".into(), json!(b));
            }
            if let Some(c) = c {
                doc.insert("c".into(), json!(c));
            }
            Json::Object(doc)
        })
}

fn arb_docs() -> impl Strategy<Value = Vec<Json>> {
    prop::collection::vec(arb_doc(), 0..40)
}

/// Specs whose accumulators all have block forms.
fn arb_block_spec() -> impl Strategy<Value = Json> {
    prop::sample::select(vec![
        json!({"_id": "$a", "s": {"$sum": "$b"}}),
        json!({"_id": "$a", "lo": {"$min": "$b"}, "hi": {"$max": "$b"}}),
        json!({"_id": "$c", "f": {"$first": "$b"}, "l": {"$last": "$a"}}),
        json!({"_id": null, "n": {"$count": {}}, "m": {"$avg": "$b"}}),
        json!({"_id": {"x": "$a", "y": "$c"}, "s": {"$sum": {"$add": ["$b", 1]}}}),
        json!({"_id": "$a", "t": {"$topN": {"output": "$c", "sortBy": {"b": 1}, "n": 2}}}),
        json!({"_id": null}),
        json!({"_id": "x", "s": {"$sum": "$b"}}),
    ])
}

/// Specs mixing in row-only accumulators.
fn arb_any_spec() -> impl Strategy<Value = Json> {
    prop_oneof![
        arb_block_spec(),
        prop::sample::select(vec![
            json!({"_id": "$a", "p": {"$push": "$b"}, "s": {"$sum": "$b"}}),
            json!({"_id": "$c", "u": {"$addToSet": "$a"}}),
            json!({"_id": "$a", "f": {"$firstN": {"input": "$c", "n": 2}}}),
            json!({"_id": "$a", "l": {"$lastN": {"input": "$b", "n": 3}}}),
        ]),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    // ── Block vs row ───────────────────────────────────────────────

    #[test]
    fn prop_block_and_row_agree(
        spec in arb_any_spec(),
        docs in arb_docs(),
        block_size in 1usize..8,
    ) {
        let rows = run(&spec, &docs, None, BuilderConfig::default()).unwrap();
        let blocks = run(&spec, &docs, Some(block_size), BuilderConfig::default()).unwrap();
        prop_assert_eq!(blocks, rows);
    }

    #[test]
    fn prop_block_switch_does_not_change_results(
        spec in arb_block_spec(),
        docs in arb_docs(),
        block_size in 1usize..8,
    ) {
        let on = run(&spec, &docs, Some(block_size), BuilderConfig::default()).unwrap();
        let off = run(
            &spec,
            &docs,
            Some(block_size),
            BuilderConfig::default().with_block_hash_agg(false),
        )
        .unwrap();
        prop_assert_eq!(on, off);
    }

    // ── Spill vs in-memory ─────────────────────────────────────────

    #[test]
    fn prop_spill_matches_in_memory(
        spec in arb_any_spec(),
        docs in arb_docs(),
        limit in 1usize..4,
        blocks in prop::option::of(1usize..6),
    ) {
        let expected = run(&spec, &docs, blocks, BuilderConfig::default()).unwrap();
        let spilled = run(
            &spec,
            &docs,
            blocks,
            BuilderConfig::default().with_max_groups_in_memory(limit),
        )
        .unwrap();
        prop_assert_eq!(spilled, expected);
    }

    // ── Counting ───────────────────────────────────────────────────

    #[test]
    fn prop_counts_cover_every_document(docs in arb_docs(), block_size in prop::option::of(1usize..8)) {
        let spec = json!({"_id": "$a", "n": {"$count": {}}});
        let results = run(&spec, &docs, block_size, BuilderConfig::default()).unwrap();
        let total: i64 = results.iter().map(|r| r["n"].as_i64().unwrap()).sum();
        prop_assert_eq!(total, docs.len() as i64);

        let mut keys: Vec<String> = results.iter().map(|r| r["_id"].to_string()).collect();
        let before = keys.len();
        keys.dedup();
        prop_assert_eq!(keys.len(), before);
    }
}
