//! Argument compilation for `$top`, `$bottom`, `$topN` and `$bottomN`.
//!
//! The parsed argument is `{output: <expr>}`; the sort pattern rides on the
//! statement and is also published at runtime through an env slot.

use crate::accumulator::AccumInputs;
use crate::error::{tassert, tasserted, SbeGroupError};
use crate::query::{AccumulationStatement, Expression, NodeId, SortPattern};
use crate::sbe::SbExpr;
use crate::stage_builder::expression::generate_expression;
use crate::stage_builder::reqs::PlanStageSlots;
use crate::stage_builder::sort_keys::{build_sort_keys, make_sort_keys_plan, BuildSortKeysPlanType};
use crate::stage_builder::state::StageBuilderState;
use crate::stage_builder::vectorizer::build_vectorized_expr;

pub fn get_output_argument(stmt: &AccumulationStatement) -> Result<&Expression, SbeGroupError> {
    let Expression::Object(fields) = &stmt.expr.argument else {
        return Err(tasserted(
            5807015,
            format!("{} argument must be an object", stmt.expr.op.name()),
        ));
    };
    fields
        .iter()
        .find(|(name, _)| name == "output")
        .map(|(_, e)| e)
        .ok_or_else(|| {
            tasserted(
                5807016,
                format!("{} argument must have an 'output' field", stmt.expr.op.name()),
            )
        })
}

fn sort_pattern(stmt: &AccumulationStatement) -> Result<&SortPattern, SbeGroupError> {
    stmt.sort_pattern.as_ref().ok_or_else(|| {
        tasserted(
            8774900,
            format!("{} requires a sort pattern", stmt.expr.op.name()),
        )
    })
}

pub fn sort_spec_expr(
    state: &mut StageBuilderState,
    stmt: &AccumulationStatement,
    node_id: NodeId,
) -> Result<SbExpr, SbeGroupError> {
    let pattern = sort_pattern(stmt)?;
    Ok(SbExpr::slot(state.sort_spec_slot(node_id, stmt, pattern)))
}

pub fn build_row_inputs(
    state: &mut StageBuilderState,
    stmt: &AccumulationStatement,
    outputs: &PlanStageSlots,
    node_id: NodeId,
) -> Result<AccumInputs, SbeGroupError> {
    let output = get_output_argument(stmt)?;
    let value = match output {
        Expression::Constant(v) => SbExpr::Constant(v.clone()),
        other => SbExpr::fill_empty_null(generate_expression(state, other, None, outputs)?),
    };
    let sort_spec = sort_spec_expr(state, stmt, node_id)?;
    let pattern = sort_pattern(stmt)?;
    let plan = make_sort_keys_plan(pattern, state.config().allow_cheap_sort_key);
    let keys = build_sort_keys(&plan, pattern, outputs, &sort_spec)?;
    Ok(AccumInputs::TopBottomN {
        value,
        sort_by: keys.full_key_expr,
        sort_spec,
    })
}

/// Block inputs, or `None` when the key or output has no block form.
pub fn build_block_inputs(
    state: &mut StageBuilderState,
    stmt: &AccumulationStatement,
    outputs: &PlanStageSlots,
    node_id: NodeId,
) -> Result<Option<AccumInputs>, SbeGroupError> {
    let output = get_output_argument(stmt)?;
    let pattern = sort_pattern(stmt)?;
    let plan = make_sort_keys_plan(pattern, state.config().allow_cheap_sort_key);
    if plan.plan_type != BuildSortKeysPlanType::TraverseFields {
        return Ok(None);
    }
    let sort_spec = sort_spec_expr(state, stmt, node_id)?;
    let keys = build_sort_keys(&plan, pattern, outputs, &sort_spec)?;
    tassert(
        8448720,
        "expected one sort key component per sort part",
        keys.key_exprs.len() == pattern.len(),
    )?;
    if keys.parallel_arrays_check_expr.is_some() {
        return Ok(None);
    }
    let Some(sort_by) = build_vectorized_expr(&keys.full_key_expr) else {
        return Ok(None);
    };
    tassert(
        8448719,
        "a block sort key must read a block",
        sort_by.type_signature().is_block() || !keys.full_key_expr.references_block(),
    )?;

    let (parts, value_is_array) = match output {
        Expression::Array(items) => (items.iter().collect::<Vec<_>>(), true),
        other => (vec![other], false),
    };
    let mut values = Vec::with_capacity(parts.len());
    for part in parts {
        let expr = SbExpr::fill_empty_null(generate_expression(state, part, None, outputs)?);
        match build_vectorized_expr(&expr.optimize()) {
            Some(v) => values.push(v),
            None => return Ok(None),
        }
    }
    Ok(Some(AccumInputs::BlockTopBottomN {
        values,
        value_is_array,
        sort_by,
        sort_spec,
    }))
}
