//! Shared helpers for integration tests: build a group over in-memory
//! documents, run it, and compare results.

use sbe_group::query::{GroupNode, QuerySolutionNode, VirtualScanNode};
use sbe_group::{BuilderConfig, CompiledPlan, SbeGroupError, StageBuilder};
use serde_json::Value as Json;

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A group (node 2) over a virtual scan (node 1) of `docs`.
#[allow(dead_code)]
pub fn group_node(spec: &Json, docs: &[Json], block_size: Option<usize>) -> Result<GroupNode, SbeGroupError> {
    let mut scan = VirtualScanNode::from_json(1, docs);
    if let Some(size) = block_size {
        scan = scan.with_blocks(size);
    }
    GroupNode::parse(2, scan, spec)
}

#[allow(dead_code)]
pub fn compile(
    spec: &Json,
    docs: &[Json],
    block_size: Option<usize>,
    config: BuilderConfig,
) -> Result<CompiledPlan, SbeGroupError> {
    let node: QuerySolutionNode = group_node(spec, docs, block_size)?.into();
    StageBuilder::new(config).build_root(&node)
}

/// Compile and execute, returning result documents as JSON.
#[allow(dead_code)]
pub fn run(
    spec: &Json,
    docs: &[Json],
    block_size: Option<usize>,
    config: BuilderConfig,
) -> Result<Vec<Json>, SbeGroupError> {
    compile(spec, docs, block_size, config)?.execute_json()
}

/// Results ordered by their rendered `_id`, for comparisons that must not
/// depend on group order.
#[allow(dead_code)]
pub fn sorted_by_id(mut results: Vec<Json>) -> Vec<Json> {
    results.sort_by_key(|doc| doc.get("_id").map(Json::to_string).unwrap_or_default());
    results
}
