//! `$avg`: a running sum and a running count of numeric inputs.

use crate::accumulator::{
    call_slot, single_input, AccumInputs, Accumulator, AddBlockExprs, BlockAggAndRowAgg,
};
use crate::error::SbeGroupError;
use crate::query::AccumulatorOp;
use crate::sbe::{SbExpr, SbSlot};

pub struct Avg;

impl Avg {
    fn slots(slots: &[SbSlot]) -> Result<(SbSlot, SbSlot), SbeGroupError> {
        match slots {
            [sum, count] => Ok((*sum, *count)),
            _ => Err(SbeGroupError::InternalError(format!(
                "$avg expects 2 aggregate slots, got {}",
                slots.len()
            ))),
        }
    }
}

impl Accumulator for Avg {
    fn op(&self) -> AccumulatorOp {
        AccumulatorOp::Avg
    }

    fn num_aggs(&self) -> usize {
        2
    }

    fn build_init(&self, _inputs: AccumInputs) -> Result<Vec<Option<SbExpr>>, SbeGroupError> {
        Ok(vec![Some(SbExpr::constant(0i64)), Some(SbExpr::constant(0i64))])
    }

    fn build_add_aggs(&self, inputs: AccumInputs) -> Result<Vec<SbExpr>, SbeGroupError> {
        let arg = single_input(self.op(), inputs)?;
        Ok(vec![
            SbExpr::func("sum", vec![arg.clone()]),
            SbExpr::func("countNumeric", vec![arg]),
        ])
    }

    fn build_finalize(
        &self,
        agg_slots: &[SbSlot],
        needs_merge: bool,
    ) -> Result<Option<SbExpr>, SbeGroupError> {
        let (sum, count) = Self::slots(agg_slots)?;
        // Partial results keep sum and count for the merge to add.
        if needs_merge {
            return Ok(Some(SbExpr::new_obj(
                "newObj",
                vec![
                    ("count".to_string(), SbExpr::slot(count)),
                    ("sum".to_string(), SbExpr::slot(sum)),
                ],
            )));
        }
        Ok(Some(SbExpr::func(
            "avgFinalize",
            vec![SbExpr::slot(sum), SbExpr::slot(count)],
        )))
    }

    fn build_combine_aggs(
        &self,
        spill_slots: &[SbSlot],
        _inputs: AccumInputs,
    ) -> Result<Vec<SbExpr>, SbeGroupError> {
        let (sum, count) = Self::slots(spill_slots)?;
        Ok(vec![call_slot("sum", sum), call_slot("sum", count)])
    }

    fn supports_block_exprs(&self) -> bool {
        true
    }

    fn supports_block_aggs(&self) -> bool {
        true
    }

    fn build_add_block_exprs(&self, inputs: AccumInputs) -> Option<AddBlockExprs> {
        let AccumInputs::Single(expr) = inputs else {
            return None;
        };
        Some(AddBlockExprs {
            exprs: vec![expr],
            inputs: AccumInputs::None,
        })
    }

    fn build_add_block_aggs(
        &self,
        block_args: &[SbSlot],
        data: &[SbSlot],
        bitmap: SbSlot,
        _inputs: &AccumInputs,
    ) -> Option<Vec<BlockAggAndRowAgg>> {
        let (&[arg], &[datum]) = (block_args, data) else {
            return None;
        };
        let bitmap = SbExpr::slot(bitmap);
        Some(vec![
            BlockAggAndRowAgg {
                block_agg: SbExpr::func("valueBlockAggSum", vec![bitmap.clone(), SbExpr::slot(arg)]),
                row_agg: call_slot("sum", datum),
            },
            BlockAggAndRowAgg {
                block_agg: SbExpr::func("valueBlockAggCount", vec![bitmap, SbExpr::slot(arg)]),
                row_agg: call_slot("countNumeric", datum),
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avg_expands_into_sum_and_count() {
        let aggs = Avg
            .build_add_aggs(AccumInputs::Single(SbExpr::slot(SbSlot::new(2))))
            .unwrap();
        let rendered: Vec<String> = aggs.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["sum(s2)", "countNumeric(s2)"]);
        assert_eq!(Avg.build_init(AccumInputs::None).unwrap().len(), 2);
    }

    #[test]
    fn test_finalize_depends_on_merge_mode() {
        let slots = [SbSlot::new(4), SbSlot::new(5)];
        let final_expr = Avg.build_finalize(&slots, false).unwrap().unwrap();
        assert_eq!(final_expr.to_string(), "avgFinalize(s4, s5)");
        let partial = Avg.build_finalize(&slots, true).unwrap().unwrap();
        assert_eq!(partial.function_name(), Some("newObj"));
    }

    #[test]
    fn test_combine_adds_both_halves() {
        let combine = Avg
            .build_combine_aggs(&[SbSlot::new(8), SbSlot::new(9)], AccumInputs::None)
            .unwrap();
        assert_eq!(combine[0].to_string(), "sum(s8)");
        assert_eq!(combine[1].to_string(), "sum(s9)");
    }

    #[test]
    fn test_wrong_slot_count_is_an_error() {
        assert!(Avg.build_finalize(&[SbSlot::new(1)], false).is_err());
    }
}
