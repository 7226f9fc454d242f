//! Bounded accumulators: `$firstN`, `$lastN`, `$topN`, `$bottomN`, `$top`
//! and `$bottom`.
//!
//! The state is created per group by `newAccumNState(n)`, where `n` is the
//! compiled initializer. The sorted variants fold `(sortKey, value, spec)`
//! triples; `spec` is the runtime sort specification held in an
//! environment slot.

use crate::accumulator::{
    call_slot, one_slot, single_input, unexpected_inputs, AccumInputs, Accumulator,
    AddBlockExprs, BlockAggAndRowAgg,
};
use crate::error::SbeGroupError;
use crate::query::AccumulatorOp;
use crate::sbe::{SbExpr, SbSlot};

fn init_n(op: AccumulatorOp, inputs: AccumInputs) -> Result<Vec<Option<SbExpr>>, SbeGroupError> {
    match inputs {
        AccumInputs::InitN { max_size } => {
            Ok(vec![Some(SbExpr::func("newAccumNState", vec![max_size]))])
        }
        other => Err(unexpected_inputs(op, &other)),
    }
}

// ── $firstN / $lastN ────────────────────────────────────────────────────

pub struct FirstLastN {
    pub is_first: bool,
}

impl Accumulator for FirstLastN {
    fn op(&self) -> AccumulatorOp {
        if self.is_first {
            AccumulatorOp::FirstN
        } else {
            AccumulatorOp::LastN
        }
    }

    fn build_init(&self, inputs: AccumInputs) -> Result<Vec<Option<SbExpr>>, SbeGroupError> {
        init_n(self.op(), inputs)
    }

    fn build_add_aggs(&self, inputs: AccumInputs) -> Result<Vec<SbExpr>, SbeGroupError> {
        let arg = SbExpr::fill_empty_null(single_input(self.op(), inputs)?);
        let name = if self.is_first { "aggFirstN" } else { "aggLastN" };
        Ok(vec![SbExpr::func(name, vec![arg])])
    }

    fn build_finalize(
        &self,
        agg_slots: &[SbSlot],
        needs_merge: bool,
    ) -> Result<Option<SbExpr>, SbeGroupError> {
        let slot = one_slot(self.op(), agg_slots)?;
        if needs_merge {
            return Ok(None);
        }
        Ok(Some(call_slot("aggNFinalize", slot)))
    }

    fn build_combine_aggs(
        &self,
        spill_slots: &[SbSlot],
        _inputs: AccumInputs,
    ) -> Result<Vec<SbExpr>, SbeGroupError> {
        let slot = one_slot(self.op(), spill_slots)?;
        let name = if self.is_first { "aggFirstNMerge" } else { "aggLastNMerge" };
        Ok(vec![call_slot(name, slot)])
    }
}

// ── $topN / $bottomN / $top / $bottom ───────────────────────────────────

pub struct TopBottomN {
    op: AccumulatorOp,
}

impl TopBottomN {
    pub const fn new(op: AccumulatorOp) -> Self {
        TopBottomN { op }
    }

    fn is_top(&self) -> bool {
        matches!(self.op, AccumulatorOp::TopN | AccumulatorOp::Top)
    }

    /// `$top` and `$bottom` produce one value rather than an array.
    fn is_single(&self) -> bool {
        matches!(self.op, AccumulatorOp::Top | AccumulatorOp::Bottom)
    }

    fn agg_name(&self) -> &'static str {
        if self.is_top() { "aggTopN" } else { "aggBottomN" }
    }
}

impl Accumulator for TopBottomN {
    fn op(&self) -> AccumulatorOp {
        self.op
    }

    fn build_init(&self, inputs: AccumInputs) -> Result<Vec<Option<SbExpr>>, SbeGroupError> {
        init_n(self.op, inputs)
    }

    fn build_add_aggs(&self, inputs: AccumInputs) -> Result<Vec<SbExpr>, SbeGroupError> {
        match inputs {
            AccumInputs::TopBottomN {
                value,
                sort_by,
                sort_spec,
            } => Ok(vec![SbExpr::func(self.agg_name(), vec![sort_by, value, sort_spec])]),
            other => Err(unexpected_inputs(self.op, &other)),
        }
    }

    fn build_finalize(
        &self,
        agg_slots: &[SbSlot],
        needs_merge: bool,
    ) -> Result<Option<SbExpr>, SbeGroupError> {
        let slot = one_slot(self.op, agg_slots)?;
        if needs_merge {
            return Ok(None);
        }
        let name = if self.is_single() { "aggTopFinalize" } else { "aggTopNFinalize" };
        Ok(Some(call_slot(name, slot)))
    }

    fn build_combine_aggs(
        &self,
        spill_slots: &[SbSlot],
        inputs: AccumInputs,
    ) -> Result<Vec<SbExpr>, SbeGroupError> {
        let slot = one_slot(self.op, spill_slots)?;
        let sort_spec = match inputs {
            AccumInputs::CombineTopBottomN { sort_spec } => sort_spec,
            other => return Err(unexpected_inputs(self.op, &other)),
        };
        let name = if self.is_top() { "aggTopNMerge" } else { "aggBottomNMerge" };
        Ok(vec![SbExpr::func(name, vec![SbExpr::slot(slot), sort_spec])])
    }

    fn supports_block_exprs(&self) -> bool {
        true
    }

    fn supports_block_aggs(&self) -> bool {
        true
    }

    fn build_add_block_exprs(&self, inputs: AccumInputs) -> Option<AddBlockExprs> {
        let AccumInputs::BlockTopBottomN {
            values,
            value_is_array,
            sort_by,
            sort_spec,
        } = inputs
        else {
            return None;
        };
        let value = match (value_is_array, values.len()) {
            (true, _) => SbExpr::func("block.newArray", values),
            (false, 1) => values.into_iter().next()?,
            _ => return None,
        };
        Some(AddBlockExprs {
            exprs: vec![sort_by, value],
            inputs: AccumInputs::BlockAggTopBottomN { sort_spec },
        })
    }

    fn build_add_block_aggs(
        &self,
        block_args: &[SbSlot],
        data: &[SbSlot],
        bitmap: SbSlot,
        inputs: &AccumInputs,
    ) -> Option<Vec<BlockAggAndRowAgg>> {
        let (&[key, value], &[data_key, data_value]) = (block_args, data) else {
            return None;
        };
        let AccumInputs::BlockAggTopBottomN { sort_spec } = inputs else {
            return None;
        };
        let block_fn = if self.is_top() { "valueBlockAggTopN" } else { "valueBlockAggBottomN" };
        Some(vec![BlockAggAndRowAgg {
            block_agg: SbExpr::func(
                block_fn,
                vec![
                    SbExpr::slot(bitmap),
                    SbExpr::slot(key),
                    SbExpr::slot(value),
                    sort_spec.clone(),
                ],
            ),
            row_agg: SbExpr::func(
                self.agg_name(),
                vec![SbExpr::slot(data_key), SbExpr::slot(data_value), sort_spec.clone()],
            ),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sbe::TypeSignature;

    fn spec() -> SbExpr {
        SbExpr::slot(SbSlot::new(50))
    }

    #[test]
    fn test_init_uses_max_size() {
        let init = FirstLastN { is_first: true }
            .build_init(AccumInputs::InitN {
                max_size: SbExpr::constant(3i64),
            })
            .unwrap();
        assert_eq!(init[0].as_ref().unwrap().to_string(), "newAccumNState(3)");
    }

    #[test]
    fn test_top_n_row_agg_shape() {
        let acc = TopBottomN::new(AccumulatorOp::TopN);
        let aggs = acc
            .build_add_aggs(AccumInputs::TopBottomN {
                value: SbExpr::slot(SbSlot::new(1)),
                sort_by: SbExpr::slot(SbSlot::new(2)),
                sort_spec: spec(),
            })
            .unwrap();
        assert_eq!(aggs[0].to_string(), "aggTopN(s2, s1, s50)");
    }

    #[test]
    fn test_finalize_in_merge_mode_keeps_raw_state() {
        let acc = TopBottomN::new(AccumulatorOp::Bottom);
        assert!(acc.build_finalize(&[SbSlot::new(1)], true).unwrap().is_none());
        let fin = acc.build_finalize(&[SbSlot::new(1)], false).unwrap().unwrap();
        assert_eq!(fin.to_string(), "aggTopFinalize(s1)");
    }

    #[test]
    fn test_block_exprs_recombine_array_outputs() {
        let acc = TopBottomN::new(AccumulatorOp::TopN);
        let b = |id| SbExpr::slot(SbSlot::with_type(id, TypeSignature::BLOCK));
        let exprs = acc
            .build_add_block_exprs(AccumInputs::BlockTopBottomN {
                values: vec![b(1), b(2)],
                value_is_array: true,
                sort_by: b(3),
                sort_spec: spec(),
            })
            .unwrap();
        assert_eq!(exprs.exprs[0].to_string(), "s3");
        assert_eq!(exprs.exprs[1].to_string(), "block.newArray(s1, s2)");
    }

    #[test]
    fn test_combine_requires_sort_spec() {
        let acc = TopBottomN::new(AccumulatorOp::TopN);
        assert!(acc.build_combine_aggs(&[SbSlot::new(1)], AccumInputs::None).is_err());
    }
}
