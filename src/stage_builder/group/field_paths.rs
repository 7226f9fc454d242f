//! Multi-component field paths are traversed once, before aggregation, and
//! published as `PathExpr` slots.

use std::collections::BTreeSet;

use crate::error::SbeGroupError;
use crate::query::{Expression, FieldPath, GroupNode, NodeId};
use crate::sbe::{PlanStage, SbExpr};
use crate::stage_builder::build_block_to_row;
use crate::stage_builder::builder::SbBuilder;
use crate::stage_builder::expression::generate_expression;
use crate::stage_builder::reqs::{PlanStageSlots, SlotName};
use crate::stage_builder::state::StageBuilderState;

/// Dotted paths below a top-level field read by the key or an argument,
/// deduplicated, in order of first appearance.
pub fn collect_field_paths(group: &GroupNode) -> Vec<FieldPath> {
    let mut seen = BTreeSet::new();
    let mut paths = Vec::new();
    let mut visit = |fp: &FieldPath| {
        if fp.is_variable_reference() || fp.path_length() <= 2 {
            return;
        }
        if seen.insert(fp.dotted()) {
            paths.push(fp.clone());
        }
    };
    group.group_by_expression.walk_field_paths(&mut visit);
    for acc in &group.accumulators {
        acc.expr.argument.walk_field_paths(&mut visit);
    }
    paths
}

pub fn make_path_exprs_available_in_slots(
    state: &mut StageBuilderState,
    stage: PlanStage,
    outputs: &mut PlanStageSlots,
    paths: &[FieldPath],
    node_id: NodeId,
) -> Result<PlanStage, SbeGroupError> {
    if paths.is_empty() {
        return Ok(stage);
    }
    if !outputs.has_block_output() {
        return project_paths(state, stage, outputs, paths, node_id);
    }

    let (block_backed, scalar_backed): (Vec<FieldPath>, Vec<FieldPath>) =
        paths.iter().cloned().partition(|fp| {
            fp.top_level_field()
                .and_then(|top| outputs.field(top))
                .is_some_and(|slot| slot.is_block())
        });
    let stage = project_paths(state, stage, outputs, &scalar_backed, node_id)?;
    if block_backed.is_empty() {
        return Ok(stage);
    }
    let (stage, _) = build_block_to_row(state, stage, outputs, node_id, &[]);
    project_paths(state, stage, outputs, &block_backed, node_id)
}

fn project_paths(
    state: &mut StageBuilderState,
    stage: PlanStage,
    outputs: &mut PlanStageSlots,
    paths: &[FieldPath],
    node_id: NodeId,
) -> Result<PlanStage, SbeGroupError> {
    let exprs = paths
        .iter()
        .map(|fp| {
            let expr = Expression::FieldPath(fp.clone());
            Ok((generate_expression(state, &expr, None, outputs)?, None))
        })
        .collect::<Result<Vec<(SbExpr, _)>, SbeGroupError>>()?;
    let (stage, slots) = SbBuilder::new(state, node_id).make_project(stage, exprs);
    for (fp, slot) in paths.iter().zip(slots) {
        outputs.set(SlotName::PathExpr(fp.dotted()), slot);
    }
    Ok(stage)
}
