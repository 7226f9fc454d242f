//! Accumulator-operator catalog.
//!
//! Every `$group` accumulator is described by an implementation of
//! [`Accumulator`]. The group compiler never matches on operator tags
//! itself: it asks the catalog entry to build each lifecycle phase
//! (init, row update, block update, finalize, combine) from an
//! [`AccumInputs`] value, and queries the capability probes before
//! committing to the columnar path.
//!
//! One statement may own several internal aggregates (`$avg` keeps a sum
//! and a count). Every phase that returns a list returns one entry per
//! internal aggregate, in the same order.
//!
//! # Submodules
//! - `basic` — `$sum`, `$min`, `$max`, `$first`, `$last`, `$push`, `$addToSet`
//! - `avg` — `$avg`
//! - `n` — `$firstN`, `$lastN` and the top/bottom family

pub mod avg;
pub mod basic;
pub mod n;

use crate::error::SbeGroupError;
use crate::query::AccumulatorOp;
use crate::sbe::{SbExpr, SbSlot};

/// Extra per-phase inputs, one variant per accumulator shape.
#[derive(Debug, Clone, PartialEq)]
pub enum AccumInputs {
    /// The phase takes no extra input.
    None,
    /// Plain single-argument accumulators.
    Single(SbExpr),
    /// Order-sensitive accumulators in row form.
    TopBottomN {
        value: SbExpr,
        sort_by: SbExpr,
        sort_spec: SbExpr,
    },
    /// Order-sensitive accumulators in block form. `values` and `sort_by`
    /// are already vectorized; `value_is_array` says the output parts must
    /// be recombined into an array.
    BlockTopBottomN {
        values: Vec<SbExpr>,
        value_is_array: bool,
        sort_by: SbExpr,
        sort_spec: SbExpr,
    },
    /// Initializer input of the bounded accumulators.
    InitN { max_size: SbExpr },
    /// Block aggregate input of the order-sensitive accumulators.
    BlockAggTopBottomN { sort_spec: SbExpr },
    /// Combine input of the order-sensitive accumulators.
    CombineTopBottomN { sort_spec: SbExpr },
}

/// Block argument expressions of one statement.
#[derive(Debug, Clone, PartialEq)]
pub struct AddBlockExprs {
    /// Expressions to project into block slots before aggregation.
    pub exprs: Vec<SbExpr>,
    /// Extra scalar inputs forwarded to the block aggregates.
    pub inputs: AccumInputs,
}

/// The two forms of one internal aggregate inside a block hash aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockAggAndRowAgg {
    /// Folds every selected element of a block at once.
    pub block_agg: SbExpr,
    /// Folds one row, reading the scalar data slots.
    pub row_agg: SbExpr,
}

/// One accumulator kind.
pub trait Accumulator: Sync {
    fn op(&self) -> AccumulatorOp;

    /// Number of internal aggregates.
    fn num_aggs(&self) -> usize {
        1
    }

    /// Initial state of every internal aggregate. `None` starts from
    /// Nothing.
    fn build_init(&self, inputs: AccumInputs) -> Result<Vec<Option<SbExpr>>, SbeGroupError>;

    /// Row-mode update expressions.
    fn build_add_aggs(&self, inputs: AccumInputs) -> Result<Vec<SbExpr>, SbeGroupError>;

    /// Final value given the aggregate slots. `None` means the single
    /// aggregate slot already holds the final value.
    fn build_finalize(
        &self,
        agg_slots: &[SbSlot],
        needs_merge: bool,
    ) -> Result<Option<SbExpr>, SbeGroupError>;

    /// Expressions folding a recovered partial state (bound to the
    /// matching spill slot) into the running state.
    fn build_combine_aggs(
        &self,
        spill_slots: &[SbSlot],
        inputs: AccumInputs,
    ) -> Result<Vec<SbExpr>, SbeGroupError>;

    /// Whether [`Accumulator::build_add_block_exprs`] can succeed.
    fn supports_block_exprs(&self) -> bool {
        false
    }

    /// Whether [`Accumulator::build_add_block_aggs`] can succeed.
    fn supports_block_aggs(&self) -> bool {
        false
    }

    /// Block argument expressions, or `None` when there is no block form
    /// for these inputs.
    fn build_add_block_exprs(&self, _inputs: AccumInputs) -> Option<AddBlockExprs> {
        None
    }

    /// Block aggregates over the projected block argument slots. `data`
    /// holds one scalar slot per block argument.
    fn build_add_block_aggs(
        &self,
        _block_args: &[SbSlot],
        _data: &[SbSlot],
        _bitmap: SbSlot,
        _inputs: &AccumInputs,
    ) -> Option<Vec<BlockAggAndRowAgg>> {
        None
    }
}

/// Accessor used by the group compiler: an operator tag bound to its
/// catalog entry.
#[derive(Clone, Copy)]
pub struct AccumOp {
    op: AccumulatorOp,
    imp: &'static dyn Accumulator,
}

impl AccumOp {
    pub fn new(op: AccumulatorOp) -> Self {
        AccumOp {
            op,
            imp: lookup(op),
        }
    }

    pub fn op(&self) -> AccumulatorOp {
        self.op
    }

    pub fn name(&self) -> &'static str {
        self.op.name()
    }

    pub fn num_aggs(&self) -> usize {
        self.imp.num_aggs()
    }

    pub fn supports_block_exprs(&self) -> bool {
        self.imp.supports_block_exprs()
    }

    pub fn supports_block_aggs(&self) -> bool {
        self.imp.supports_block_aggs()
    }

    pub fn build_init(&self, inputs: AccumInputs) -> Result<Vec<Option<SbExpr>>, SbeGroupError> {
        self.imp.build_init(inputs)
    }

    pub fn build_add_aggs(&self, inputs: AccumInputs) -> Result<Vec<SbExpr>, SbeGroupError> {
        self.imp.build_add_aggs(inputs)
    }

    pub fn build_add_block_exprs(&self, inputs: AccumInputs) -> Option<AddBlockExprs> {
        self.imp.build_add_block_exprs(inputs)
    }

    pub fn build_add_block_aggs(
        &self,
        block_args: &[SbSlot],
        data: &[SbSlot],
        bitmap: SbSlot,
        inputs: &AccumInputs,
    ) -> Option<Vec<BlockAggAndRowAgg>> {
        self.imp.build_add_block_aggs(block_args, data, bitmap, inputs)
    }

    pub fn build_finalize(
        &self,
        agg_slots: &[SbSlot],
        needs_merge: bool,
    ) -> Result<Option<SbExpr>, SbeGroupError> {
        self.imp.build_finalize(agg_slots, needs_merge)
    }

    pub fn build_combine_aggs(
        &self,
        spill_slots: &[SbSlot],
        inputs: AccumInputs,
    ) -> Result<Vec<SbExpr>, SbeGroupError> {
        self.imp.build_combine_aggs(spill_slots, inputs)
    }
}

impl std::fmt::Debug for AccumOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AccumOp").field(&self.op).finish()
    }
}

static SUM: basic::Sum = basic::Sum;
static MIN: basic::MinMax = basic::MinMax { is_min: true };
static MAX: basic::MinMax = basic::MinMax { is_min: false };
static FIRST: basic::FirstLast = basic::FirstLast { is_first: true };
static LAST: basic::FirstLast = basic::FirstLast { is_first: false };
static PUSH: basic::Collect = basic::Collect { is_set: false };
static ADD_TO_SET: basic::Collect = basic::Collect { is_set: true };
static AVG: avg::Avg = avg::Avg;
static FIRST_N: n::FirstLastN = n::FirstLastN { is_first: true };
static LAST_N: n::FirstLastN = n::FirstLastN { is_first: false };
static TOP_N: n::TopBottomN = n::TopBottomN::new(AccumulatorOp::TopN);
static BOTTOM_N: n::TopBottomN = n::TopBottomN::new(AccumulatorOp::BottomN);
static TOP: n::TopBottomN = n::TopBottomN::new(AccumulatorOp::Top);
static BOTTOM: n::TopBottomN = n::TopBottomN::new(AccumulatorOp::Bottom);

/// The catalog entry for `op`.
pub fn lookup(op: AccumulatorOp) -> &'static dyn Accumulator {
    match op {
        AccumulatorOp::Sum => &SUM,
        AccumulatorOp::Avg => &AVG,
        AccumulatorOp::Min => &MIN,
        AccumulatorOp::Max => &MAX,
        AccumulatorOp::First => &FIRST,
        AccumulatorOp::Last => &LAST,
        AccumulatorOp::Push => &PUSH,
        AccumulatorOp::AddToSet => &ADD_TO_SET,
        AccumulatorOp::FirstN => &FIRST_N,
        AccumulatorOp::LastN => &LAST_N,
        AccumulatorOp::TopN => &TOP_N,
        AccumulatorOp::BottomN => &BOTTOM_N,
        AccumulatorOp::Top => &TOP,
        AccumulatorOp::Bottom => &BOTTOM,
    }
}

// ── Shared helpers ──────────────────────────────────────────────────────

pub(crate) fn single_input(op: AccumulatorOp, inputs: AccumInputs) -> Result<SbExpr, SbeGroupError> {
    match inputs {
        AccumInputs::Single(expr) => Ok(expr),
        other => Err(unexpected_inputs(op, &other)),
    }
}

pub(crate) fn unexpected_inputs(op: AccumulatorOp, inputs: &AccumInputs) -> SbeGroupError {
    SbeGroupError::InternalError(format!("{} received unexpected inputs {inputs:?}", op.name()))
}

pub(crate) fn one_slot(op: AccumulatorOp, slots: &[SbSlot]) -> Result<SbSlot, SbeGroupError> {
    match slots {
        [slot] => Ok(*slot),
        _ => Err(SbeGroupError::InternalError(format!(
            "{} expects 1 aggregate slot, got {}",
            op.name(),
            slots.len()
        ))),
    }
}

pub(crate) fn call_slot(name: &str, slot: SbSlot) -> SbExpr {
    SbExpr::func(name, vec![SbExpr::slot(slot)])
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [AccumulatorOp; 14] = [
        AccumulatorOp::Sum,
        AccumulatorOp::Avg,
        AccumulatorOp::Min,
        AccumulatorOp::Max,
        AccumulatorOp::First,
        AccumulatorOp::Last,
        AccumulatorOp::Push,
        AccumulatorOp::AddToSet,
        AccumulatorOp::FirstN,
        AccumulatorOp::LastN,
        AccumulatorOp::TopN,
        AccumulatorOp::BottomN,
        AccumulatorOp::Top,
        AccumulatorOp::Bottom,
    ];

    #[test]
    fn test_catalog_entries_match_their_tags() {
        for op in ALL {
            assert_eq!(lookup(op).op(), op);
        }
    }

    #[test]
    fn test_block_capabilities() {
        let block: Vec<AccumulatorOp> = ALL
            .into_iter()
            .filter(|op| {
                let acc = AccumOp::new(*op);
                acc.supports_block_exprs() && acc.supports_block_aggs()
            })
            .collect();
        assert!(block.contains(&AccumulatorOp::Min));
        assert!(block.contains(&AccumulatorOp::Avg));
        assert!(block.contains(&AccumulatorOp::TopN));
        assert!(!block.contains(&AccumulatorOp::Push));
        assert!(!block.contains(&AccumulatorOp::FirstN));
    }

    #[test]
    fn test_combine_count_matches_agg_count() {
        for op in ALL {
            let acc = AccumOp::new(op);
            let spill: Vec<SbSlot> = (0..acc.num_aggs() as u32).map(SbSlot::new).collect();
            let inputs = if op.is_top_bottom_n() {
                AccumInputs::CombineTopBottomN {
                    sort_spec: SbExpr::slot(SbSlot::new(99)),
                }
            } else {
                AccumInputs::None
            };
            let combine = acc.build_combine_aggs(&spill, inputs).unwrap();
            assert_eq!(combine.len(), acc.num_aggs(), "{}", op.name());
        }
    }
}
