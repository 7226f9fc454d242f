//! Single-aggregate accumulators.

use crate::accumulator::{
    call_slot, one_slot, single_input, AccumInputs, Accumulator,
    AddBlockExprs, BlockAggAndRowAgg,
};
use crate::error::SbeGroupError;
use crate::query::AccumulatorOp;
use crate::sbe::{SbExpr, SbSlot};
use crate::value::Value;

fn spill_exprs(
    op: AccumulatorOp,
    name: &str,
    spill_slots: &[SbSlot],
) -> Result<Vec<SbExpr>, SbeGroupError> {
    Ok(vec![call_slot(name, one_slot(op, spill_slots)?)])
}

fn block_arg(inputs: AccumInputs) -> Option<AddBlockExprs> {
    match inputs {
        AccumInputs::Single(expr) => Some(AddBlockExprs {
            exprs: vec![expr],
            inputs: AccumInputs::None,
        }),
        _ => None,
    }
}

fn block_and_row(
    block_fn: &str,
    row_fn: &str,
    args: &[SbSlot],
    data: &[SbSlot],
    bitmap: SbSlot,
) -> Option<Vec<BlockAggAndRowAgg>> {
    let (&[arg], &[datum]) = (args, data) else {
        return None;
    };
    Some(vec![BlockAggAndRowAgg {
        block_agg: SbExpr::func(block_fn, vec![SbExpr::slot(bitmap), SbExpr::slot(arg)]),
        row_agg: call_slot(row_fn, datum),
    }])
}

// ── $sum ────────────────────────────────────────────────────────────────

pub struct Sum;

impl Accumulator for Sum {
    fn op(&self) -> AccumulatorOp {
        AccumulatorOp::Sum
    }

    fn build_init(&self, _inputs: AccumInputs) -> Result<Vec<Option<SbExpr>>, SbeGroupError> {
        Ok(vec![Some(SbExpr::constant(0i64))])
    }

    fn build_add_aggs(&self, inputs: AccumInputs) -> Result<Vec<SbExpr>, SbeGroupError> {
        let arg = single_input(self.op(), inputs)?;
        Ok(vec![SbExpr::func("sum", vec![arg])])
    }

    fn build_finalize(&self, _: &[SbSlot], _: bool) -> Result<Option<SbExpr>, SbeGroupError> {
        Ok(None)
    }

    fn build_combine_aggs(&self, spill: &[SbSlot], _: AccumInputs) -> Result<Vec<SbExpr>, SbeGroupError> {
        spill_exprs(self.op(), "sum", spill)
    }

    fn supports_block_exprs(&self) -> bool {
        true
    }

    fn supports_block_aggs(&self) -> bool {
        true
    }

    fn build_add_block_exprs(&self, inputs: AccumInputs) -> Option<AddBlockExprs> {
        block_arg(inputs)
    }

    fn build_add_block_aggs(
        &self,
        args: &[SbSlot],
        data: &[SbSlot],
        bitmap: SbSlot,
        _: &AccumInputs,
    ) -> Option<Vec<BlockAggAndRowAgg>> {
        block_and_row("valueBlockAggSum", "sum", args, data, bitmap)
    }
}

// ── $min / $max ─────────────────────────────────────────────────────────

pub struct MinMax {
    pub is_min: bool,
}

impl MinMax {
    fn agg_name(&self) -> &'static str {
        if self.is_min { "min" } else { "max" }
    }
}

impl Accumulator for MinMax {
    fn op(&self) -> AccumulatorOp {
        if self.is_min {
            AccumulatorOp::Min
        } else {
            AccumulatorOp::Max
        }
    }

    fn build_init(&self, _inputs: AccumInputs) -> Result<Vec<Option<SbExpr>>, SbeGroupError> {
        Ok(vec![None])
    }

    fn build_add_aggs(&self, inputs: AccumInputs) -> Result<Vec<SbExpr>, SbeGroupError> {
        let arg = single_input(self.op(), inputs)?;
        Ok(vec![SbExpr::func(self.agg_name(), vec![arg])])
    }

    /// A group whose inputs were all missing or null finalizes to null.
    fn build_finalize(&self, slots: &[SbSlot], _: bool) -> Result<Option<SbExpr>, SbeGroupError> {
        let slot = one_slot(self.op(), slots)?;
        Ok(Some(SbExpr::fill_empty_null(SbExpr::slot(slot))))
    }

    fn build_combine_aggs(&self, spill: &[SbSlot], _: AccumInputs) -> Result<Vec<SbExpr>, SbeGroupError> {
        spill_exprs(self.op(), self.agg_name(), spill)
    }

    fn supports_block_exprs(&self) -> bool {
        true
    }

    fn supports_block_aggs(&self) -> bool {
        true
    }

    fn build_add_block_exprs(&self, inputs: AccumInputs) -> Option<AddBlockExprs> {
        block_arg(inputs)
    }

    fn build_add_block_aggs(
        &self,
        args: &[SbSlot],
        data: &[SbSlot],
        bitmap: SbSlot,
        _: &AccumInputs,
    ) -> Option<Vec<BlockAggAndRowAgg>> {
        let block_fn = if self.is_min { "valueBlockAggMin" } else { "valueBlockAggMax" };
        block_and_row(block_fn, self.agg_name(), args, data, bitmap)
    }
}

// ── $first / $last ──────────────────────────────────────────────────────

pub struct FirstLast {
    pub is_first: bool,
}

impl FirstLast {
    fn agg_name(&self) -> &'static str {
        if self.is_first { "first" } else { "last" }
    }
}

impl Accumulator for FirstLast {
    fn op(&self) -> AccumulatorOp {
        if self.is_first {
            AccumulatorOp::First
        } else {
            AccumulatorOp::Last
        }
    }

    fn build_init(&self, _inputs: AccumInputs) -> Result<Vec<Option<SbExpr>>, SbeGroupError> {
        Ok(vec![None])
    }

    /// The argument is null-collapsed so that a missing value still counts
    /// as the first (or last) one seen.
    fn build_add_aggs(&self, inputs: AccumInputs) -> Result<Vec<SbExpr>, SbeGroupError> {
        let arg = single_input(self.op(), inputs)?;
        Ok(vec![SbExpr::func(self.agg_name(), vec![SbExpr::fill_empty_null(arg)])])
    }

    fn build_finalize(&self, _: &[SbSlot], _: bool) -> Result<Option<SbExpr>, SbeGroupError> {
        Ok(None)
    }

    fn build_combine_aggs(&self, spill: &[SbSlot], _: AccumInputs) -> Result<Vec<SbExpr>, SbeGroupError> {
        spill_exprs(self.op(), self.agg_name(), spill)
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
        let filled = if expr.references_block() {
            SbExpr::func("block.fillEmpty", vec![expr, SbExpr::null()])
        } else {
            SbExpr::fill_empty_null(expr)
        };
        Some(AddBlockExprs {
            exprs: vec![filled],
            inputs: AccumInputs::None,
        })
    }

    fn build_add_block_aggs(
        &self,
        args: &[SbSlot],
        data: &[SbSlot],
        bitmap: SbSlot,
        _: &AccumInputs,
    ) -> Option<Vec<BlockAggAndRowAgg>> {
        let block_fn = if self.is_first { "valueBlockAggFirst" } else { "valueBlockAggLast" };
        block_and_row(block_fn, self.agg_name(), args, data, bitmap)
    }
}

// ── $push / $addToSet ───────────────────────────────────────────────────

pub struct Collect {
    pub is_set: bool,
}

impl Accumulator for Collect {
    fn op(&self) -> AccumulatorOp {
        if self.is_set {
            AccumulatorOp::AddToSet
        } else {
            AccumulatorOp::Push
        }
    }

    fn build_init(&self, _inputs: AccumInputs) -> Result<Vec<Option<SbExpr>>, SbeGroupError> {
        Ok(vec![Some(SbExpr::Constant(Value::Array(vec![])))])
    }

    fn build_add_aggs(&self, inputs: AccumInputs) -> Result<Vec<SbExpr>, SbeGroupError> {
        let arg = single_input(self.op(), inputs)?;
        let name = if self.is_set { "addToSet" } else { "addToArray" };
        Ok(vec![SbExpr::func(name, vec![arg])])
    }

    fn build_finalize(&self, _: &[SbSlot], _: bool) -> Result<Option<SbExpr>, SbeGroupError> {
        Ok(None)
    }

    fn build_combine_aggs(&self, spill: &[SbSlot], _: AccumInputs) -> Result<Vec<SbExpr>, SbeGroupError> {
        let name = if self.is_set { "setUnion" } else { "concatArrays" };
        spill_exprs(self.op(), name, spill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sbe::TypeSignature;

    fn arg() -> AccumInputs {
        AccumInputs::Single(SbExpr::slot(SbSlot::new(3)))
    }

    #[test]
    fn test_min_finalize_collapses_missing() {
        let min = MinMax { is_min: true };
        let fin = min.build_finalize(&[SbSlot::new(7)], false).unwrap().unwrap();
        assert_eq!(fin.to_string(), "(s7 ?: null)");
    }

    #[test]
    fn test_first_last_finalize_is_noop() {
        for is_first in [true, false] {
            let acc = FirstLast { is_first };
            assert!(acc.build_finalize(&[SbSlot::new(1)], false).unwrap().is_none());
        }
    }

    #[test]
    fn test_first_arg_is_null_collapsed() {
        let aggs = FirstLast { is_first: true }.build_add_aggs(arg()).unwrap();
        assert_eq!(aggs[0].to_string(), "first((s3 ?: null))");
    }

    #[test]
    fn test_sum_block_forms() {
        let block = SbSlot::with_type(4, TypeSignature::BLOCK);
        let forms = Sum
            .build_add_block_aggs(&[block], &[SbSlot::new(5)], SbSlot::new(6), &AccumInputs::None)
            .unwrap();
        assert_eq!(forms[0].block_agg.to_string(), "valueBlockAggSum(s6, s4)");
        assert_eq!(forms[0].row_agg.to_string(), "sum(s5)");
    }

    #[test]
    fn test_push_has_no_block_form() {
        let push = Collect { is_set: false };
        assert!(!push.supports_block_exprs());
        assert!(push.build_add_block_exprs(arg()).is_none());
    }

    #[test]
    fn test_wrong_inputs_are_rejected() {
        assert!(Sum.build_add_aggs(AccumInputs::None).is_err());
    }
}
