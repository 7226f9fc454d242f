//! Shared test helpers for stage builder unit tests.
//!
//! Provides query node builders over a virtual scan and a bare scan stage
//! for tests that compile a single piece of a group in isolation.

use serde_json::{json, Value as Json};

use crate::query::{GroupNode, QuerySolutionNode, VirtualScanNode};
use crate::sbe::PlanStage;

// ── Query nodes ──────────────────────────────────────────────────────────

/// A group (node 2) over an empty virtual scan (node 1).
pub fn group(spec: Json) -> GroupNode {
    GroupNode::parse(2, VirtualScanNode::new(1, Vec::new()), &spec).unwrap()
}

/// A group over `docs`, scanned in blocks of `block_size` when given.
pub fn group_over(spec: Json, docs: Vec<Json>, block_size: Option<usize>) -> QuerySolutionNode {
    group_node(spec, docs, block_size, |g| g)
}

/// Like [`group_over`], with a hook to adjust the parsed node.
pub fn group_node(
    spec: Json,
    docs: Vec<Json>,
    block_size: Option<usize>,
    adjust: impl FnOnce(GroupNode) -> GroupNode,
) -> QuerySolutionNode {
    let mut scan = VirtualScanNode::from_json(1, &docs);
    if let Some(size) = block_size {
        scan = scan.with_blocks(size);
    }
    adjust(GroupNode::parse(2, scan, &spec).unwrap()).into()
}

// ── Documents ────────────────────────────────────────────────────────────

pub fn sample_docs() -> Vec<Json> {
    vec![
        json!({"a": 1, "b": 10, "c": "x"}),
        json!({"a": 2, "b": 20, "c": "y"}),
        json!({"a": 1, "b": 30, "c": "x"}),
        json!({"a": null, "b": 5}),
        json!({"b": 7}),
    ]
}

// ── Stages ───────────────────────────────────────────────────────────────

/// A row-mode scan with no outputs.
pub fn row_scan() -> PlanStage {
    PlanStage::VirtualScan {
        node_id: 1,
        docs: Vec::new(),
        result_slot: None,
        fields: Vec::new(),
        block: None,
    }
}
