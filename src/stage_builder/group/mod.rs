//! Lowering of a `$group` node.
//!
//! # Stages
//!
//! A group compiles to, from the bottom up:
//!
//! 1. A projection of every dotted path the expressions read, so that
//!    later stages can refer to a slot instead of re-traversing.
//! 2. A projection of the key expressions (and, for block mode, the block
//!    accumulator arguments).
//! 3. One aggregation stage, `group` or `block_group`.
//! 4. For block mode, a `blockToRow` that unpacks the aggregated blocks.
//! 5. A finalizing projection from aggregate states to output values.
//! 6. Optionally a projection of the result object.
//!
//! # Block fallback
//!
//! When the child delivers blocks the builder tries the block path. If any
//! key or accumulator has no block form, everything the group reads is
//! unpacked with `blockToRow` and the whole group is compiled for rows.
//! There is no mixed plan.

pub mod accumulators;
pub mod aggregation;
pub mod child_reqs;
pub mod field_paths;
pub mod finalize;
pub mod keys;
pub mod top_bottom;
pub mod vectorize;

use tracing::debug;

use crate::error::{tassert, tasserted, uassert, SbeGroupError};
use crate::query::GroupNode;
use crate::sbe::{PlanStage, SbExpr, SbSlot, TypeSignature};
use crate::stage_builder::build_block_to_row;
use crate::stage_builder::builder::SbBuilder;
use crate::stage_builder::effects::FieldEffects;
use crate::stage_builder::reqs::{PlanStageReqs, PlanStageSlots, SlotName};
use crate::stage_builder::state::StageBuilderState;
use crate::stage_builder::StageBuilder;

use self::accumulators::{generate_all_aggs, generate_block_accumulators, generate_merging_exprs};
use self::aggregation::{build_block_aggregation, build_row_aggregation, GroupAggregation};
use self::child_reqs::compute_child_reqs_for_group;
use self::field_paths::{collect_field_paths, make_path_exprs_available_in_slots};
use self::finalize::{build_group_finalize, FinalKey};
use self::keys::{generate_group_by_key_exprs, generate_init_root_slot, GroupKeyExprs};
use self::vectorize::{can_try_block_hash_agg, GroupExecMode};

/// Per-node compile options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupCompileCtx {
    /// Produce partial results that a later merge will combine.
    pub needs_merge: bool,
}

pub fn build_group(
    builder: &mut StageBuilder,
    group: &GroupNode,
    reqs: &PlanStageReqs,
) -> Result<(PlanStage, PlanStageSlots), SbeGroupError> {
    uassert(6023414, "a group stage cannot produce sort keys", !reqs.has_sort_keys())?;
    uassert(6360401, "a group stage cannot produce a record id", !reqs.has_record_id())?;

    let allow_cheap = builder.state().config().allow_cheap_sort_key;
    let mut child_reqs = compute_child_reqs_for_group(reqs, group, allow_cheap);
    child_reqs.set_can_process_block_values(!child_reqs.has_result());
    let (child_stage, child_outputs) = builder.build(&group.child, &child_reqs)?;

    let state = builder.state_mut();
    let ctx = GroupCompileCtx {
        needs_merge: group.will_be_merged && state.needs_merge(),
    };
    let (stage, names, slots) = build_group_impl(state, ctx, group, child_stage, child_outputs)?;
    tassert(
        5851605,
        "a group produces one slot for _id and one per accumulator",
        slots.len() == 1 + group.accumulators.len(),
    )?;

    let mut outputs = PlanStageSlots::new();
    for (name, slot) in names.iter().zip(&slots) {
        outputs.set(SlotName::Field(name.clone()), *slot);
    }
    let unproduced: Vec<String> = reqs
        .fields()
        .filter(|f| !names.iter().any(|n| n.as_str() == *f))
        .map(str::to_string)
        .collect();
    if !unproduced.is_empty() {
        let nothing = state.nothing_slot();
        for name in unproduced {
            outputs.set(SlotName::Field(name), nothing);
        }
    }

    let mut produce_obj = reqs.has_result_obj();
    if let Some(info) = reqs.result_info() {
        let own = FieldEffects::for_group(names.iter().map(String::as_str)).narrow(&info.tracked_fields);
        match FieldEffects::compose(&own, &info.effects) {
            Some(effects) => {
                outputs.set(SlotName::ResultInfoBase, state.empty_obj_slot());
                outputs.add_effects(effects);
            }
            None => {
                debug!(node = group.node_id, "effects do not compose; materializing the result");
                produce_obj = true;
            }
        }
    }

    let stage = if produce_obj {
        let func = if group.should_produce_bson { "newBsonObj" } else { "newObj" };
        let obj = SbExpr::new_obj(
            func,
            names.iter().cloned().zip(slots.iter().map(|s| SbExpr::slot(*s))),
        );
        let result = SbSlot::with_type(state.slot_id(), TypeSignature::OBJECT);
        let (stage, _) = SbBuilder::new(state, group.node_id).make_project(stage, vec![(obj, Some(result))]);
        outputs.set(SlotName::Result, result);
        stage
    } else {
        stage
    };
    Ok((stage, outputs))
}

/// Aggregation and finalization. Returns the output names with one slot
/// each, `_id` first.
pub fn build_group_impl(
    state: &mut StageBuilderState,
    ctx: GroupCompileCtx,
    group: &GroupNode,
    stage: PlanStage,
    mut outputs: PlanStageSlots,
) -> Result<(PlanStage, Vec<String>, Vec<SbSlot>), SbeGroupError> {
    let node_id = group.node_id;
    let paths = collect_field_paths(group);
    let mut stage = make_path_exprs_available_in_slots(state, stage, &mut outputs, &paths, node_id)?;
    let has_variable_init = group.has_variable_group_init();
    let mut mode = GroupExecMode::for_child(outputs.has_block_output());

    let mut keys = compile_keys(state, group, &outputs)?;
    let mut vectorized_keys = false;
    if mode.is_block() {
        match keys.vectorize() {
            Some(exprs) => {
                keys.exprs = exprs;
                vectorized_keys = true;
            }
            None => {
                debug!(node = node_id, "group key has no block form");
                (stage, _) = build_block_to_row(state, stage, &mut outputs, node_id, &[]);
                mode = GroupExecMode::Row;
                keys = compile_keys(state, group, &outputs)?;
            }
        }
    }

    let init_root_slot =
        has_variable_init.then(|| SbSlot::with_type(state.slot_id(), TypeSignature::OBJECT));

    let block = if can_try_block_hash_agg(state, group, mode, has_variable_init) {
        generate_block_accumulators(state, group, &outputs)?
    } else {
        None
    };
    let child_bitmap = outputs.bitmap_slot();
    if block.is_none() && mode.is_block() {
        // Materialize the block keys first so blockToRow unpacks them
        // along with the fields.
        let exprs = std::mem::take(&mut keys.exprs);
        let (projected, key_slots) = SbBuilder::new(state, node_id)
            .make_project(stage, exprs.into_iter().map(|e| (e, None)).collect());
        let (unpacked, row_keys) = build_block_to_row(state, projected, &mut outputs, node_id, &key_slots);
        stage = unpacked;
        keys.exprs = row_keys.into_iter().map(SbExpr::slot).collect();
        mode = GroupExecMode::Row;
    }
    debug!(node = node_id, block = mode.is_block(), "compiling group");

    let row_aggs = if mode.is_block() {
        Vec::new()
    } else {
        generate_all_aggs(state, group, &outputs, init_root_slot)?
    };
    if let Some(root) = init_root_slot {
        stage = generate_init_root_slot(state, stage, &mut keys, root, node_id);
    }
    let merging = generate_merging_exprs(state, group)?;

    // Vectorized keys are always projected, a block aggregation needs a key
    // slot even when the key is constant.
    let constant_key = if vectorized_keys { None } else { keys.constant_value() };
    if constant_key.is_some() {
        keys.exprs.clear();
    }

    let GroupAggregation {
        stage,
        group_by_slots,
        agg_slots,
    } = match block {
        Some(block) => {
            let bitmap = child_bitmap
                .ok_or_else(|| tasserted(8448604, "block group without a selectivity bitmap"))?;
            let agg = build_block_aggregation(
                state,
                stage,
                node_id,
                std::mem::take(&mut keys.exprs),
                block,
                bitmap,
                merging,
            )?;
            let blocks: Vec<SbSlot> = agg.group_by_slots.iter().chain(&agg.agg_slots).copied().collect();
            let (stage, rows) = SbBuilder::new(state, node_id).make_block_to_row(agg.stage, &blocks, bitmap);
            let (group_by_slots, agg_slots) = rows.split_at(agg.group_by_slots.len());
            GroupAggregation {
                stage,
                group_by_slots: group_by_slots.to_vec(),
                agg_slots: agg_slots.to_vec(),
            }
        }
        None => build_row_aggregation(
            state,
            stage,
            node_id,
            std::mem::take(&mut keys.exprs),
            row_aggs,
            merging,
        ),
    };

    let key = match (constant_key, keys.object_fields.as_deref()) {
        (Some(v), _) => FinalKey::Constant(v),
        (None, Some(names)) => FinalKey::Object(names, &group_by_slots),
        (None, None) => match group_by_slots.as_slice() {
            [slot] => FinalKey::Single(*slot),
            _ => {
                return Err(tasserted(
                    8620901,
                    format!("expected one group-by slot, found {}", group_by_slots.len()),
                ));
            }
        },
    };
    build_group_finalize(state, ctx, group, stage, key, &agg_slots)
}

fn compile_keys(
    state: &StageBuilderState,
    group: &GroupNode,
    outputs: &PlanStageSlots,
) -> Result<GroupKeyExprs, SbeGroupError> {
    let mut keys = generate_group_by_key_exprs(state, &group.group_by_expression, outputs)?;
    keys.optimize();
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuilderConfig;
    use crate::stage_builder::effects::FieldEffect;
    use crate::stage_builder::reqs::ResultInfoReq;
    use crate::stage_builder::test_helpers::*;
    use serde_json::json;

    fn build(
        spec: serde_json::Value,
        block_size: Option<usize>,
        reqs: PlanStageReqs,
    ) -> Result<(PlanStage, PlanStageSlots), SbeGroupError> {
        let node = group_over(spec, sample_docs(), block_size);
        let mut builder = StageBuilder::new(BuilderConfig::default());
        builder.build(&node, &reqs)
    }

    #[test]
    fn test_sort_keys_and_record_ids_are_rejected() {
        let spec = json!({"_id": "$a"});
        let err = build(spec.clone(), None, PlanStageReqs::new().with_sort_keys(["a"])).unwrap_err();
        assert_eq!(err.code(), Some(6023414));
        let err = build(spec, None, PlanStageReqs::new().with_record_id()).unwrap_err();
        assert_eq!(err.code(), Some(6360401));
    }

    #[test]
    fn test_row_plan_shape() {
        let (stage, outputs) = build(
            json!({"_id": "$a", "s": {"$sum": "$b"}}),
            None,
            PlanStageReqs::new().with_result(),
        )
        .unwrap();
        let names = stage.stage_names();
        assert_eq!(names.first(), Some(&"project"));
        assert_eq!(names.last(), Some(&"virtualscan"));
        assert_eq!(names.iter().filter(|n| **n == "group").count(), 1);
        assert!(outputs.result_slot().is_some());
        assert!(outputs.field("_id").is_some());
        assert!(outputs.field("s").is_some());
    }

    #[test]
    fn test_block_plan_shape() {
        let (stage, _) = build(
            json!({"_id": "$a", "s": {"$sum": "$b"}}),
            Some(2),
            PlanStageReqs::new().with_result(),
        )
        .unwrap();
        assert!(stage.find(|s| matches!(s, PlanStage::BlockHashAgg { .. })).is_some());
        assert!(stage.find(|s| matches!(s, PlanStage::HashAgg { .. })).is_none());
    }

    #[test]
    fn test_block_fallback_is_all_or_nothing() {
        let (stage, _) = build(
            json!({"_id": "$a", "s": {"$sum": "$b"}, "p": {"$push": "$b"}}),
            Some(2),
            PlanStageReqs::new().with_result(),
        )
        .unwrap();
        assert!(stage.find(|s| matches!(s, PlanStage::BlockHashAgg { .. })).is_none());
        let agg = stage.find(|s| matches!(s, PlanStage::HashAgg { .. })).unwrap();
        assert!(agg.find(|s| matches!(s, PlanStage::BlockToRow { .. })).is_some());
    }

    #[test]
    fn test_unproduced_fields_read_nothing() {
        let (_, outputs) = build(
            json!({"_id": "$a"}),
            None,
            PlanStageReqs::new().with_fields(["_id", "missing"]),
        )
        .unwrap();
        let nothing = outputs.field("missing").unwrap();
        assert_eq!(nothing.type_sig, TypeSignature::NOTHING);
        assert!(outputs.result_slot().is_none());
    }

    #[test]
    fn test_result_info_skips_the_result_object() {
        let tracked = ["s".to_string()].into_iter().collect();
        let info = ResultInfoReq {
            tracked_fields: tracked,
            effects: FieldEffects::new(FieldEffect::Keep),
        };
        let (stage, outputs) = build(
            json!({"_id": "$a", "s": {"$sum": "$b"}}),
            None,
            PlanStageReqs::new().with_result_info(info),
        )
        .unwrap();
        assert!(outputs.result_slot().is_none());
        assert!(outputs.result_info_base().is_some());
        assert_eq!(outputs.effects().unwrap().get("s"), FieldEffect::Set);
        assert!(!stage.to_string().contains("newObj(\"_id\""));
    }

    #[test]
    fn test_uncomposable_result_info_materializes() {
        let info = ResultInfoReq {
            tracked_fields: ["s".to_string()].into_iter().collect(),
            effects: FieldEffects::new(FieldEffect::Generic),
        };
        let (_, outputs) = build(
            json!({"_id": "$a", "s": {"$sum": "$b"}}),
            None,
            PlanStageReqs::new().with_result_info(info),
        )
        .unwrap();
        assert!(outputs.result_slot().is_some());
        assert!(outputs.result_info_base().is_none());
    }

    #[test]
    fn test_bson_output_uses_the_bson_constructor() {
        let node = group_node(json!({"_id": "$a"}), sample_docs(), None, |g| g.with_bson_output(true));
        let mut builder = StageBuilder::new(BuilderConfig::default());
        let (stage, _) = builder.build(&node, &PlanStageReqs::new().with_result()).unwrap();
        assert!(stage.to_string().contains("newBsonObj("));
    }

    #[test]
    fn test_constant_key_is_projected_for_block_aggregation() {
        let (stage, outputs) = build(json!({"_id": null}), Some(2), PlanStageReqs::new().with_result()).unwrap();
        let PlanStage::BlockHashAgg { group_by, aggs, .. } =
            stage.find(|s| matches!(s, PlanStage::BlockHashAgg { .. })).unwrap()
        else {
            unreachable!()
        };
        assert_eq!(group_by.len(), 1);
        assert!(aggs.is_empty());
        assert!(outputs.field("_id").is_some());
    }

    #[test]
    fn test_constant_key_skips_projection_in_rows() {
        let (stage, _) = build(json!({"_id": "x", "n": {"$sum": 1}}), None, PlanStageReqs::new().with_result()).unwrap();
        let PlanStage::HashAgg { group_by, .. } = stage.find(|s| matches!(s, PlanStage::HashAgg { .. })).unwrap() else {
            unreachable!()
        };
        assert!(group_by.is_empty());
    }
}

