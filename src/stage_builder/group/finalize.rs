//! The projection turning aggregate states into output fields.

use crate::accumulator::AccumOp;
use crate::error::{tassert, tasserted, SbeGroupError};
use crate::query::GroupNode;
use crate::sbe::{PlanStage, SbExpr, SbSlot};
use crate::stage_builder::builder::SbBuilder;
use crate::stage_builder::group::GroupCompileCtx;
use crate::stage_builder::state::StageBuilderState;
use crate::value::Value;

/// Shape of the `_id` output.
pub enum FinalKey<'a> {
    Constant(Value),
    Single(SbSlot),
    Object(&'a [String], &'a [SbSlot]),
}

/// Returns the output names (`_id` first) and their slots.
pub fn build_group_finalize(
    state: &mut StageBuilderState,
    ctx: GroupCompileCtx,
    group: &GroupNode,
    stage: PlanStage,
    key: FinalKey<'_>,
    agg_slots: &[SbSlot],
) -> Result<(PlanStage, Vec<String>, Vec<SbSlot>), SbeGroupError> {
    let key_expr = match key {
        FinalKey::Constant(v) => SbExpr::Constant(v),
        FinalKey::Single(slot) => SbExpr::slot(slot),
        FinalKey::Object(names, slots) => {
            tassert(
                8620900,
                "an object _id needs one key slot per field",
                names.len() == slots.len(),
            )?;
            SbExpr::new_obj(
                "newObj",
                names.iter().cloned().zip(slots.iter().map(|s| SbExpr::slot(*s))),
            )
        }
    };

    let mut names = vec!["_id".to_string()];
    let mut exprs = vec![(key_expr, None)];
    let mut remaining = agg_slots;
    for stmt in &group.accumulators {
        let acc = AccumOp::new(stmt.expr.op);
        tassert(
            8620902,
            format!("{}: missing aggregate slots", stmt.field_name),
            remaining.len() >= acc.num_aggs(),
        )?;
        let (own, rest) = remaining.split_at(acc.num_aggs());
        remaining = rest;
        let expr = match acc.build_finalize(own, ctx.needs_merge)? {
            Some(expr) => expr,
            None => match own {
                [slot] => SbExpr::slot(*slot),
                _ => {
                    return Err(tasserted(
                        8620903,
                        format!("{} has no finalizer but {} aggregates", acc.name(), own.len()),
                    ));
                }
            },
        };
        names.push(stmt.field_name.clone());
        exprs.push((expr, None));
    }

    let (stage, slots) = SbBuilder::new(state, group.node_id).make_project(stage, exprs);
    Ok((stage, names, slots))
}
