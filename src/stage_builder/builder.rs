//! Small stage constructors handing out fresh output slots.

use crate::query::NodeId;
use crate::sbe::{PlanStage, SbAggExpr, SbExpr, SbSlot, SlotId, TypeSignature};
use crate::stage_builder::state::StageBuilderState;

pub struct SbBuilder<'a> {
    state: &'a mut StageBuilderState,
    node_id: NodeId,
}

impl<'a> SbBuilder<'a> {
    pub fn new(state: &'a mut StageBuilderState, node_id: NodeId) -> Self {
        SbBuilder { state, node_id }
    }

    /// Project `exprs` on top of `stage`. An expression with a target slot
    /// is always projected into it; a plain slot reference without a
    /// target is passed through as is. Returns one slot per expression.
    pub fn make_project(
        &mut self,
        stage: PlanStage,
        exprs: Vec<(SbExpr, Option<SbSlot>)>,
    ) -> (PlanStage, Vec<SbSlot>) {
        let mut projects = Vec::new();
        let mut slots = Vec::with_capacity(exprs.len());
        for (expr, target) in exprs {
            let expr = expr.optimize();
            match (target, expr.as_slot()) {
                (None, Some(slot)) => slots.push(slot),
                (target, _) => {
                    let slot = target.unwrap_or_else(|| {
                        SbSlot::with_type(self.state.slot_id(), expr.type_signature())
                    });
                    projects.push((slot.id, expr));
                    slots.push(slot);
                }
            }
        }
        if projects.is_empty() {
            return (stage, slots);
        }
        let stage = PlanStage::Project {
            node_id: self.node_id,
            input: Box::new(stage),
            projects,
        };
        (stage, slots)
    }

    /// Returns the stage and one output slot per aggregate. Key slots pass
    /// through unchanged.
    pub fn make_hash_agg(
        &mut self,
        stage: PlanStage,
        group_by: &[SbSlot],
        aggs: Vec<SbAggExpr>,
        collator: Option<SbSlot>,
        merging: Vec<(SbSlot, SbExpr)>,
    ) -> (PlanStage, Vec<SbSlot>) {
        let (aggs, out) = self.agg_slots(aggs, TypeSignature::ANY_SCALAR);
        let stage = PlanStage::HashAgg {
            node_id: self.node_id,
            input: Box::new(stage),
            group_by: group_by.iter().map(|s| s.id).collect(),
            aggs,
            collator: collator.map(|s| s.id),
            merging: merging.into_iter().map(|(s, e)| (s.id, e)).collect(),
        };
        (stage, out)
    }

    /// Like [`Self::make_hash_agg`], but keys and aggregates come out as
    /// blocks, selected by `selectivity_bitmap`.
    #[allow(clippy::too_many_arguments)]
    pub fn make_block_hash_agg(
        &mut self,
        stage: PlanStage,
        group_by: &[SbSlot],
        aggs: Vec<SbAggExpr>,
        selectivity_bitmap: SbSlot,
        block_acc_args: &[SbSlot],
        bitmap_internal: SbSlot,
        acc_data: &[SbSlot],
        merging: Vec<(SbSlot, SbExpr)>,
    ) -> (PlanStage, Vec<SbSlot>, Vec<SbSlot>) {
        let (aggs, out) = self.agg_slots(aggs, TypeSignature::BLOCK);
        let keys = group_by
            .iter()
            .map(|s| SbSlot::with_type(s.id, TypeSignature::BLOCK))
            .collect();
        let stage = PlanStage::BlockHashAgg {
            node_id: self.node_id,
            input: Box::new(stage),
            group_by: group_by.iter().map(|s| s.id).collect(),
            aggs,
            selectivity_bitmap: selectivity_bitmap.id,
            block_acc_args: block_acc_args.iter().map(|s| s.id).collect(),
            bitmap_internal: bitmap_internal.id,
            acc_data: acc_data.iter().map(|s| s.id).collect(),
            merging: merging.into_iter().map(|(s, e)| (s.id, e)).collect(),
        };
        (stage, keys, out)
    }

    /// Unpack `blocks` into fresh scalar slots, one per block.
    pub fn make_block_to_row(
        &mut self,
        stage: PlanStage,
        blocks: &[SbSlot],
        bitmap: SbSlot,
    ) -> (PlanStage, Vec<SbSlot>) {
        let outputs: Vec<SbSlot> = blocks
            .iter()
            .map(|b| SbSlot::with_type(self.state.slot_id(), scalar_type(b.type_sig)))
            .collect();
        let stage = PlanStage::BlockToRow {
            node_id: self.node_id,
            input: Box::new(stage),
            blocks: blocks.iter().map(|s| s.id).collect(),
            outputs: outputs.iter().map(|s| s.id).collect(),
            bitmap: bitmap.id,
        };
        (stage, outputs)
    }

    fn agg_slots(
        &mut self,
        aggs: Vec<SbAggExpr>,
        type_sig: TypeSignature,
    ) -> (Vec<(SlotId, SbAggExpr)>, Vec<SbSlot>) {
        let out: Vec<SbSlot> = aggs
            .iter()
            .map(|_| SbSlot::with_type(self.state.slot_id(), type_sig))
            .collect();
        (out.iter().map(|s| s.id).zip(aggs).collect(), out)
    }
}

/// The element type of a block slot. Blocks carry no element typing, so
/// any scalar may come out.
fn scalar_type(type_sig: TypeSignature) -> TypeSignature {
    if type_sig.is_block() {
        TypeSignature::ANY_SCALAR
    } else {
        type_sig
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuilderConfig;
    use crate::value::Value;

    fn scan() -> PlanStage {
        PlanStage::VirtualScan {
            node_id: 1,
            docs: vec![],
            result_slot: Some(1),
            fields: vec![],
            block: None,
        }
    }

    #[test]
    fn test_project_reuses_plain_slots() {
        let mut state = StageBuilderState::new(BuilderConfig::default());
        let mut b = SbBuilder::new(&mut state, 2);
        let (stage, slots) = b.make_project(scan(), vec![(SbExpr::slot(SbSlot::new(1)), None)]);
        assert_eq!(stage.name(), "virtualscan");
        assert_eq!(slots, vec![SbSlot::new(1)]);
    }

    #[test]
    fn test_project_types_new_slots() {
        let mut state = StageBuilderState::new(BuilderConfig::default());
        let mut b = SbBuilder::new(&mut state, 2);
        let (stage, slots) = b.make_project(
            scan(),
            vec![(SbExpr::func("newObj", vec![]), None), (SbExpr::constant(Value::Int(1)), None)],
        );
        assert_eq!(stage.name(), "project");
        assert_eq!(slots[0].type_sig, TypeSignature::OBJECT);
        assert_eq!(slots[1].type_sig, TypeSignature::NUMBER);
    }

    #[test]
    fn test_block_to_row_outputs_scalars() {
        let mut state = StageBuilderState::new(BuilderConfig::default());
        let mut b = SbBuilder::new(&mut state, 2);
        let block = SbSlot::with_type(7, TypeSignature::BLOCK);
        let (_, out) = b.make_block_to_row(scan(), &[block], SbSlot::with_type(8, TypeSignature::BLOCK));
        assert!(!out[0].is_block());
    }
}
