//! Lowering of agg expressions to slot expressions.

use crate::error::SbeGroupError;
use crate::query::{ExprOp, Expression, FieldPath, Variable};
use crate::sbe::{SbExpr, SbSlot};
use crate::stage_builder::reqs::PlanStageSlots;
use crate::stage_builder::state::StageBuilderState;

/// Compile `expr`. Field paths resolve, in order, to an already
/// materialized `PathExpr` slot, a top-level `Field` slot (traversing the
/// rest of the path), or a traversal of `root`. `root` defaults to the
/// `Result` slot of `outputs`.
pub fn generate_expression(
    state: &StageBuilderState,
    expr: &Expression,
    root: Option<SbSlot>,
    outputs: &PlanStageSlots,
) -> Result<SbExpr, SbeGroupError> {
    match expr {
        Expression::Constant(v) => Ok(SbExpr::Constant(v.clone())),
        Expression::FieldPath(fp) => generate_field_path(state, fp, root, outputs),
        Expression::Object(fields) => {
            let fields = fields
                .iter()
                .map(|(name, e)| Ok((name.clone(), generate_expression(state, e, root, outputs)?)))
                .collect::<Result<Vec<_>, SbeGroupError>>()?;
            Ok(SbExpr::new_obj("newObj", fields))
        }
        Expression::Array(items) => {
            let items = items
                .iter()
                .map(|e| Ok(SbExpr::fill_empty_null(generate_expression(state, e, root, outputs)?)))
                .collect::<Result<Vec<_>, SbeGroupError>>()?;
            Ok(SbExpr::func("newArray", items))
        }
        Expression::Op { op, args } => {
            let mut args = args
                .iter()
                .map(|e| generate_expression(state, e, root, outputs))
                .collect::<Result<Vec<_>, _>>()?;
            if *op == ExprOp::Cond {
                let (Some(else_branch), Some(then_branch), Some(cond)) =
                    (args.pop(), args.pop(), args.pop())
                else {
                    return Err(SbeGroupError::QueryParseError(
                        "$cond requires three arguments".into(),
                    ));
                };
                return Ok(SbExpr::if_then_else(
                    SbExpr::func("coerceToBool", vec![cond]),
                    then_branch,
                    else_branch,
                ));
            }
            Ok(SbExpr::func(builtin_for(*op), args))
        }
    }
}

fn builtin_for(op: ExprOp) -> &'static str {
    match op {
        ExprOp::Add => "add",
        ExprOp::Subtract => "subtract",
        ExprOp::Multiply => "multiply",
        ExprOp::Divide => "divide",
        ExprOp::Concat => "concat",
        ExprOp::ToLower => "toLower",
        ExprOp::ToUpper => "toUpper",
        ExprOp::Eq => "eq",
        ExprOp::Ne => "neq",
        ExprOp::Gt => "gt",
        ExprOp::Gte => "gte",
        ExprOp::Lt => "lt",
        ExprOp::Lte => "lte",
        ExprOp::And => "and",
        ExprOp::Or => "or",
        ExprOp::Not => "not",
        ExprOp::Cond => "if",
        ExprOp::IfNull => "ifNull",
        ExprOp::IsArray => "isArray",
        ExprOp::Size => "size",
    }
}

fn generate_field_path(
    state: &StageBuilderState,
    fp: &FieldPath,
    root: Option<SbSlot>,
    outputs: &PlanStageSlots,
) -> Result<SbExpr, SbeGroupError> {
    if let Variable::User(name) = &fp.variable {
        let slot = state.variable_slot(name).ok_or_else(|| {
            SbeGroupError::QueryParseError(format!("use of undefined variable: {name}"))
        })?;
        return Ok(traverse(SbExpr::slot(slot), &fp.path));
    }

    let Some(top) = fp.top_level_field() else {
        return whole_document(root, outputs);
    };
    if root.is_none() {
        if let Some(slot) = outputs.path_expr(&fp.dotted()) {
            return Ok(SbExpr::slot(slot));
        }
        if let Some(slot) = outputs.field(top) {
            return Ok(traverse(SbExpr::slot(slot), &fp.path[1..]));
        }
    }
    let base = whole_document(root, outputs)?;
    Ok(traverse(
        SbExpr::func("getField", vec![base, SbExpr::str(top)]),
        &fp.path[1..],
    ))
}

fn whole_document(root: Option<SbSlot>, outputs: &PlanStageSlots) -> Result<SbExpr, SbeGroupError> {
    root.or_else(|| outputs.result_slot())
        .map(SbExpr::slot)
        .ok_or_else(|| {
            SbeGroupError::InternalError("the input document is not available in a slot".into())
        })
}

fn traverse(base: SbExpr, rest: &[String]) -> SbExpr {
    if rest.is_empty() {
        return base;
    }
    SbExpr::func("traverseP", vec![base, SbExpr::str(&rest.join("."))])
}
