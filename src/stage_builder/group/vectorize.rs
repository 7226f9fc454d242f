//! Block versus row execution of a group.

use tracing::debug;

use crate::accumulator::AccumOp;
use crate::query::GroupNode;
use crate::stage_builder::state::StageBuilderState;

/// A group starts in `Block` mode when its child produces blocks and may
/// only ever move to `Row`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupExecMode {
    Block,
    Row,
}

impl GroupExecMode {
    pub fn for_child(has_block_output: bool) -> Self {
        if has_block_output {
            GroupExecMode::Block
        } else {
            GroupExecMode::Row
        }
    }

    pub fn is_block(self) -> bool {
        self == GroupExecMode::Block
    }
}

/// Whether a block hash aggregation may be attempted at all. Each failed
/// precondition is logged.
pub fn can_try_block_hash_agg(
    state: &StageBuilderState,
    group: &GroupNode,
    mode: GroupExecMode,
    has_variable_init: bool,
) -> bool {
    if !mode.is_block() {
        return false;
    }
    let blocked_by = if !state.config().allows_block_hash_agg() {
        Some("block hash aggregation is disabled".to_string())
    } else if has_variable_init {
        Some("variable accumulator initializer".to_string())
    } else if state.collator_slot().is_some() {
        Some("non-simple collation".to_string())
    } else {
        group
            .accumulators
            .iter()
            .map(|a| AccumOp::new(a.expr.op))
            .find(|acc| !acc.supports_block_exprs() || !acc.supports_block_aggs())
            .map(|acc| format!("{} has no block form", acc.name()))
    };
    match blocked_by {
        Some(reason) => {
            debug!(node = group.node_id, %reason, "not attempting block hash aggregation");
            false
        }
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BuilderConfig, Collation};
    use crate::stage_builder::test_helpers::group;
    use serde_json::json;

    #[test]
    fn test_row_mode_never_tries_blocks() {
        let state = StageBuilderState::new(BuilderConfig::default());
        let g = group(json!({"_id": "$a", "s": {"$sum": "$b"}}));
        assert!(!can_try_block_hash_agg(&state, &g, GroupExecMode::Row, false));
        assert!(can_try_block_hash_agg(&state, &g, GroupExecMode::Block, false));
    }

    #[test]
    fn test_blockers() {
        let g = group(json!({"_id": "$a", "s": {"$sum": "$b"}}));
        let disabled = StageBuilderState::new(BuilderConfig::default().with_block_hash_agg(false));
        assert!(!can_try_block_hash_agg(&disabled, &g, GroupExecMode::Block, false));

        let collated = StageBuilderState::new(
            BuilderConfig::default().with_collation(Collation::CaseInsensitive),
        );
        assert!(!can_try_block_hash_agg(&collated, &g, GroupExecMode::Block, false));

        let state = StageBuilderState::new(BuilderConfig::default());
        assert!(!can_try_block_hash_agg(&state, &g, GroupExecMode::Block, true));
        let push = group(json!({"_id": "$a", "p": {"$push": "$b"}}));
        assert!(!can_try_block_hash_agg(&state, &push, GroupExecMode::Block, false));
    }

    #[test]
    fn test_full_engine_flag_overrides_block_switch() {
        let mut config = BuilderConfig::default().with_block_hash_agg(false);
        config.sbe_full_enabled = true;
        let state = StageBuilderState::new(config);
        let g = group(json!({"_id": "$a", "s": {"$sum": "$b"}}));
        assert!(can_try_block_hash_agg(&state, &g, GroupExecMode::Block, false));
    }
}
