//! Stage builder: lowers a query solution tree into a [`PlanStage`] tree.
//!
//! Building is top-down. Each node receives a [`PlanStageReqs`] describing
//! what its parent will read, builds its child with derived requirements,
//! and returns its stage together with the [`PlanStageSlots`] under which
//! the requested values can be found.
//!
//! All slot ids and env registrations of one plan come from a single
//! [`StageBuilderState`], which is consumed into the runtime environment
//! once the root is built.

pub mod builder;
pub mod effects;
pub mod expression;
pub mod group;
pub mod reqs;
pub mod scan;
pub mod sort_keys;
pub mod state;
pub mod vectorizer;

#[cfg(test)]
pub mod test_helpers;

use serde_json::Value as Json;
use tracing::{debug, info};

use crate::config::BuilderConfig;
use crate::error::SbeGroupError;
use crate::exec::{self, ExecOptions};
use crate::query::{NodeId, QuerySolutionNode};
use crate::sbe::{PlanStage, RuntimeEnvironment, SbSlot};
use crate::value::Value;

use self::builder::SbBuilder;
use self::reqs::{PlanStageReqs, PlanStageSlots, SlotName};
use self::state::StageBuilderState;

pub struct StageBuilder {
    state: StageBuilderState,
}

impl StageBuilder {
    pub fn new(config: BuilderConfig) -> Self {
        StageBuilder {
            state: StageBuilderState::new(config),
        }
    }

    /// Whether groups marked for merging emit partial results.
    pub fn with_needs_merge(mut self, needs_merge: bool) -> Self {
        self.state = self.state.with_needs_merge(needs_merge);
        self
    }

    pub fn state(&self) -> &StageBuilderState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut StageBuilderState {
        &mut self.state
    }

    /// Make `$$name` available to every expression of the plan.
    pub fn bind_variable(&mut self, name: &str, value: Value) -> SbSlot {
        self.state.bind_variable(name, value)
    }

    pub fn build(
        &mut self,
        node: &QuerySolutionNode,
        reqs: &PlanStageReqs,
    ) -> Result<(PlanStage, PlanStageSlots), SbeGroupError> {
        debug!(node = node.node_id(), kind = node.name(), "building stage");
        match node {
            QuerySolutionNode::VirtualScan(scan) => scan::build_virtual_scan(&mut self.state, scan, reqs),
            QuerySolutionNode::Group(group) => group::build_group(self, group, reqs),
        }
    }

    /// Build `node` as the root of a plan that returns result objects.
    pub fn build_root(mut self, node: &QuerySolutionNode) -> Result<CompiledPlan, SbeGroupError> {
        self.state.config().validate()?;
        let (stage, outputs) = self.build(node, &PlanStageReqs::new().with_result())?;
        let result_slot = outputs.result_slot().ok_or_else(|| {
            SbeGroupError::InternalError(format!("{} produced no result slot", node.name()))
        })?;
        let options = ExecOptions {
            max_groups_in_memory: self.state.config().max_groups_in_memory,
        };
        info!(
            root = node.node_id(),
            stages = stage.stage_names().len(),
            "plan built"
        );
        Ok(CompiledPlan {
            stage,
            outputs,
            result_slot,
            env: self.state.into_env(),
            options,
        })
    }
}

/// A built plan with everything needed to run it.
#[derive(Debug, Clone)]
pub struct CompiledPlan {
    pub stage: PlanStage,
    pub outputs: PlanStageSlots,
    pub result_slot: SbSlot,
    pub env: RuntimeEnvironment,
    pub options: ExecOptions,
}

impl CompiledPlan {
    /// Run the plan and collect the result objects.
    pub fn execute(&self) -> Result<Vec<Value>, SbeGroupError> {
        let rows = exec::execute(&self.stage, &self.env, self.options)?;
        rows.iter()
            .map(|row| {
                row.get(self.result_slot.id).cloned().ok_or_else(|| {
                    SbeGroupError::InternalError(format!(
                        "result slot {} missing from output row",
                        self.result_slot
                    ))
                })
            })
            .collect()
    }

    pub fn execute_json(&self) -> Result<Vec<Json>, SbeGroupError> {
        Ok(self.execute()?.iter().map(Value::to_json).collect())
    }

    pub fn explain(&self) -> String {
        self.stage.to_string()
    }
}

/// End the block pipeline: unpack every block-typed output, plus the block
/// slots in `extra`, into scalar slots with one `blockToRow` stage.
///
/// Outputs are remapped in place and lose their selectivity bitmap. The
/// returned slots correspond to `extra`; non-block extras are returned
/// unchanged.
pub fn build_block_to_row(
    state: &mut StageBuilderState,
    stage: PlanStage,
    outputs: &mut PlanStageSlots,
    node_id: NodeId,
    extra: &[SbSlot],
) -> (PlanStage, Vec<SbSlot>) {
    let Some(bitmap) = outputs.bitmap_slot() else {
        return (stage, extra.to_vec());
    };
    outputs.clear(&SlotName::BlockSelectivityBitmap);

    let named: Vec<(SlotName, SbSlot)> = outputs
        .iter()
        .filter(|(_, slot)| slot.is_block())
        .map(|(name, slot)| (name.clone(), slot))
        .collect();
    let mut blocks: Vec<SbSlot> = Vec::new();
    let named_pos: Vec<usize> = named.iter().map(|(_, s)| block_position(&mut blocks, *s)).collect();
    let extra_pos: Vec<Option<usize>> = extra
        .iter()
        .map(|s| s.is_block().then(|| block_position(&mut blocks, *s)))
        .collect();

    debug!(node = node_id, blocks = blocks.len(), "closing block pipeline");
    let (stage, rows) = SbBuilder::new(state, node_id).make_block_to_row(stage, &blocks, bitmap);
    for ((name, _), i) in named.into_iter().zip(named_pos) {
        outputs.set(name, rows[i]);
    }
    let extras = extra
        .iter()
        .zip(extra_pos)
        .map(|(slot, pos)| pos.map_or(*slot, |i| rows[i]))
        .collect();
    (stage, extras)
}

fn block_position(blocks: &mut Vec<SbSlot>, slot: SbSlot) -> usize {
    match blocks.iter().position(|b| b.id == slot.id) {
        Some(i) => i,
        None => {
            blocks.push(slot);
            blocks.len() - 1
        }
    }
}
