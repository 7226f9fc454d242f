//! Per-statement accumulator compilation: arguments, initializers, row and
//! block aggregates, and the expressions merging spilled partials.

use tracing::debug;

use crate::accumulator::{AccumInputs, AccumOp};
use crate::error::{tassert, SbeGroupError};
use crate::query::{AccumulationStatement, GroupNode, NodeId};
use crate::sbe::{SbAggExpr, SbExpr, SbSlot, TypeSignature};
use crate::stage_builder::expression::generate_expression;
use crate::stage_builder::group::top_bottom;
use crate::stage_builder::reqs::PlanStageSlots;
use crate::stage_builder::state::StageBuilderState;
use crate::stage_builder::vectorizer::build_vectorized_expr;

fn generate_accum_args(
    state: &mut StageBuilderState,
    stmt: &AccumulationStatement,
    outputs: &PlanStageSlots,
    node_id: NodeId,
) -> Result<AccumInputs, SbeGroupError> {
    if stmt.expr.op.is_top_bottom_n() {
        return top_bottom::build_row_inputs(state, stmt, outputs, node_id);
    }
    let arg = generate_expression(state, &stmt.expr.argument, None, outputs)?;
    Ok(AccumInputs::Single(arg))
}

/// Initial states. Only bounded accumulators read their initializer; a
/// non-constant one is compiled against `init_root`.
fn generate_init_exprs(
    state: &StageBuilderState,
    acc: AccumOp,
    stmt: &AccumulationStatement,
    init_root: Option<SbSlot>,
) -> Result<Vec<Option<SbExpr>>, SbeGroupError> {
    let inputs = match (&stmt.expr.initializer, acc.op().is_n_accumulator()) {
        (Some(init), true) => {
            let root = if init.is_constant() {
                None
            } else {
                Some(init_root.ok_or_else(|| {
                    SbeGroupError::InternalError(format!(
                        "{}: variable initializer without an init root",
                        stmt.field_name
                    ))
                })?)
            };
            AccumInputs::InitN {
                max_size: generate_expression(state, init, root, &PlanStageSlots::new())?,
            }
        }
        _ => AccumInputs::None,
    };
    acc.build_init(inputs)
}

/// Row-mode aggregates for every statement, flattened in declaration order.
pub fn generate_all_aggs(
    state: &mut StageBuilderState,
    group: &GroupNode,
    outputs: &PlanStageSlots,
    init_root: Option<SbSlot>,
) -> Result<Vec<SbAggExpr>, SbeGroupError> {
    let mut all = Vec::new();
    for stmt in &group.accumulators {
        let acc = AccumOp::new(stmt.expr.op);
        let args = generate_accum_args(state, stmt, outputs, group.node_id)?;
        let aggs = acc.build_add_aggs(args)?;
        tassert(
            8751301,
            format!("{} must define its aggregates", acc.name()),
            aggs.len() == acc.num_aggs(),
        )?;
        let inits = generate_init_exprs(state, acc, stmt, init_root)?;
        tassert(
            7567301,
            "the number of initializers must match the number of aggregates",
            inits.len() == aggs.len(),
        )?;
        all.extend(inits.into_iter().zip(aggs).map(|(i, a)| SbAggExpr::new(i, a)));
    }
    Ok(all)
}

/// Everything a block hash aggregation needs from the accumulators.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockAccumulators {
    /// Block argument expressions, projected into `arg_slots`.
    pub arg_exprs: Vec<SbExpr>,
    pub arg_slots: Vec<SbSlot>,
    /// One scalar slot per argument slot.
    pub data_slots: Vec<SbSlot>,
    pub bitmap_internal: SbSlot,
    pub aggs: Vec<SbAggExpr>,
}

/// Block forms for every statement, or `None` as soon as one statement
/// has none.
pub fn generate_block_accumulators(
    state: &mut StageBuilderState,
    group: &GroupNode,
    outputs: &PlanStageSlots,
) -> Result<Option<BlockAccumulators>, SbeGroupError> {
    let mut per_stmt = Vec::with_capacity(group.accumulators.len());
    for stmt in &group.accumulators {
        let acc = AccumOp::new(stmt.expr.op);
        let inputs = if stmt.expr.op.is_top_bottom_n() {
            top_bottom::build_block_inputs(state, stmt, outputs, group.node_id)?
        } else {
            let arg = generate_expression(state, &stmt.expr.argument, None, outputs)?.optimize();
            build_vectorized_expr(&arg).map(AccumInputs::Single)
        };
        let Some(inputs) = inputs else {
            debug!(field = %stmt.field_name, op = acc.name(), "argument has no block form");
            return Ok(None);
        };
        let Some(block_exprs) = acc.build_add_block_exprs(inputs) else {
            debug!(field = %stmt.field_name, op = acc.name(), "no block argument expressions");
            return Ok(None);
        };
        tassert(
            8751305,
            format!("{} block arguments must be defined", acc.name()),
            !block_exprs.exprs.is_empty(),
        )?;
        per_stmt.push((stmt, acc, block_exprs));
    }

    let bitmap_internal = SbSlot::with_type(state.slot_id(), TypeSignature::BLOCK);
    let mut out = BlockAccumulators {
        arg_exprs: Vec::new(),
        arg_slots: Vec::new(),
        data_slots: Vec::new(),
        bitmap_internal,
        aggs: Vec::new(),
    };
    for (stmt, acc, block_exprs) in per_stmt {
        let arg_slots: Vec<SbSlot> = block_exprs
            .exprs
            .iter()
            .map(|e| SbSlot::with_type(state.slot_id(), e.type_signature()))
            .collect();
        let data_slots: Vec<SbSlot> = arg_slots.iter().map(|_| SbSlot::new(state.slot_id())).collect();
        tassert(
            8448600,
            "block aggregates need a block internal bitmap",
            out.bitmap_internal.is_block(),
        )?;
        let Some(block_aggs) =
            acc.build_add_block_aggs(&arg_slots, &data_slots, out.bitmap_internal, &block_exprs.inputs)
        else {
            debug!(field = %stmt.field_name, op = acc.name(), "no block aggregate");
            return Ok(None);
        };
        tassert(
            8751300,
            format!("{} block aggregates must be defined", acc.name()),
            block_aggs.len() == acc.num_aggs(),
        )?;
        let inits = generate_init_exprs(state, acc, stmt, None)?;
        tassert(
            7567301,
            "the number of initializers must match the number of aggregates",
            inits.len() == block_aggs.len(),
        )?;
        out.aggs.extend(
            inits
                .into_iter()
                .zip(block_aggs)
                .map(|(init, b)| SbAggExpr::new(init, b.row_agg).with_block_agg(b.block_agg)),
        );
        out.arg_exprs.extend(block_exprs.exprs);
        out.arg_slots.extend(arg_slots);
        out.data_slots.extend(data_slots);
    }
    Ok(Some(out))
}

/// One `(spill slot, merge expression)` pair per internal aggregate.
pub fn generate_merging_exprs(
    state: &mut StageBuilderState,
    group: &GroupNode,
) -> Result<Vec<(SbSlot, SbExpr)>, SbeGroupError> {
    let mut merging = Vec::new();
    let mut expected = 0;
    for stmt in &group.accumulators {
        let acc = AccumOp::new(stmt.expr.op);
        expected += acc.num_aggs();
        let spill_slots: Vec<SbSlot> = (0..acc.num_aggs()).map(|_| SbSlot::new(state.slot_id())).collect();
        let inputs = if stmt.expr.op.is_top_bottom_n() {
            AccumInputs::CombineTopBottomN {
                sort_spec: top_bottom::sort_spec_expr(state, stmt, group.node_id)?,
            }
        } else {
            AccumInputs::None
        };
        let combine = acc.build_combine_aggs(&spill_slots, inputs)?;
        tassert(
            7039555,
            format!("{} must merge each of its aggregates", acc.name()),
            combine.len() == spill_slots.len(),
        )?;
        merging.extend(spill_slots.into_iter().zip(combine));
    }
    tassert(
        7039550,
        "expected one merging expression per aggregate",
        merging.len() == expected,
    )?;
    Ok(merging)
}
