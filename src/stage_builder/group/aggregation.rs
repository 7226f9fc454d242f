//! Assembly of the hash aggregation stage itself.

use crate::error::{tassert, SbeGroupError};
use crate::query::NodeId;
use crate::sbe::{PlanStage, SbAggExpr, SbExpr, SbSlot};
use crate::stage_builder::builder::SbBuilder;
use crate::stage_builder::group::accumulators::BlockAccumulators;
use crate::stage_builder::state::StageBuilderState;

pub struct GroupAggregation {
    pub stage: PlanStage,
    pub group_by_slots: Vec<SbSlot>,
    /// Flattened over statements, one slot per internal aggregate.
    pub agg_slots: Vec<SbSlot>,
}

/// Row mode: project the key expressions, then aggregate.
pub fn build_row_aggregation(
    state: &mut StageBuilderState,
    stage: PlanStage,
    node_id: NodeId,
    key_exprs: Vec<SbExpr>,
    aggs: Vec<SbAggExpr>,
    merging: Vec<(SbSlot, SbExpr)>,
) -> GroupAggregation {
    let collator = state.collator_slot();
    let mut builder = SbBuilder::new(state, node_id);
    let (stage, group_by_slots) =
        builder.make_project(stage, key_exprs.into_iter().map(|e| (e, None)).collect());
    let (stage, agg_slots) = builder.make_hash_agg(stage, &group_by_slots, aggs, collator, merging);
    GroupAggregation {
        stage,
        group_by_slots,
        agg_slots,
    }
}

/// Block mode: project key and block argument expressions in one batch,
/// then aggregate blocks selected by `bitmap`.
pub fn build_block_aggregation(
    state: &mut StageBuilderState,
    stage: PlanStage,
    node_id: NodeId,
    key_exprs: Vec<SbExpr>,
    block: BlockAccumulators,
    bitmap: SbSlot,
    merging: Vec<(SbSlot, SbExpr)>,
) -> Result<GroupAggregation, SbeGroupError> {
    tassert(
        8448603,
        "block hash aggregation needs a block selectivity bitmap",
        bitmap.is_block(),
    )?;
    let num_keys = key_exprs.len();
    let projects: Vec<(SbExpr, Option<SbSlot>)> = key_exprs
        .into_iter()
        .map(|e| (e, None))
        .chain(block.arg_exprs.into_iter().zip(block.arg_slots.iter().copied().map(Some)))
        .collect();
    let mut builder = SbBuilder::new(state, node_id);
    let (stage, mut slots) = builder.make_project(stage, projects);
    slots.truncate(num_keys);
    tassert(
        8448606,
        "a block hash aggregation needs at least one key or aggregate",
        !slots.is_empty() || !block.aggs.is_empty(),
    )?;
    let (stage, group_by_slots, agg_slots) = builder.make_block_hash_agg(
        stage,
        &slots,
        block.aggs,
        bitmap,
        &block.arg_slots,
        block.bitmap_internal,
        &block.data_slots,
        merging,
    );
    Ok(GroupAggregation {
        stage,
        group_by_slots,
        agg_slots,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BuilderConfig, Collation};
    use crate::sbe::TypeSignature;
    use crate::stage_builder::test_helpers::row_scan;

    #[test]
    fn test_row_aggregation_carries_the_collator() {
        let mut state = StageBuilderState::new(
            BuilderConfig::default().with_collation(Collation::CaseInsensitive),
        );
        let agg = build_row_aggregation(
            &mut state,
            row_scan(),
            1,
            vec![SbExpr::slot(SbSlot::new(1))],
            vec![SbAggExpr::new(None, SbExpr::func("sum", vec![SbExpr::constant(1i64)]))],
            vec![],
        );
        let PlanStage::HashAgg { collator, group_by, .. } = &agg.stage else {
            panic!("expected a hash aggregation");
        };
        assert!(collator.is_some());
        assert_eq!(group_by, &vec![1]);
        assert_eq!(agg.agg_slots.len(), 1);
    }

    #[test]
    fn test_block_aggregation_needs_a_key_or_aggregate() {
        let mut state = StageBuilderState::new(BuilderConfig::default());
        let block = BlockAccumulators {
            arg_exprs: vec![],
            arg_slots: vec![],
            data_slots: vec![],
            bitmap_internal: SbSlot::with_type(50, TypeSignature::BLOCK),
            aggs: vec![],
        };
        let bitmap = SbSlot::with_type(51, TypeSignature::BLOCK);
        let err = build_block_aggregation(&mut state, row_scan(), 1, vec![], block, bitmap, vec![])
            .err()
            .unwrap();
        assert_eq!(err.code(), Some(8448606));
    }
}
