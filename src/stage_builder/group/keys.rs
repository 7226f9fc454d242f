//! Group-key compilation.

use crate::error::SbeGroupError;
use crate::query::{Expression, NodeId};
use crate::sbe::expr::empty_object;
use crate::sbe::{PlanStage, SbExpr, SbSlot, TypeSignature};
use crate::stage_builder::builder::SbBuilder;
use crate::stage_builder::expression::generate_expression;
use crate::stage_builder::reqs::PlanStageSlots;
use crate::stage_builder::state::StageBuilderState;
use crate::stage_builder::vectorizer::build_vectorized_expr;
use crate::value::Value;

/// The compiled key: one expression for a single key, one per field for
/// an object key.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupKeyExprs {
    pub exprs: Vec<SbExpr>,
    /// Field names of an object key, aligned with `exprs`.
    pub object_fields: Option<Vec<String>>,
}

impl GroupKeyExprs {
    pub fn is_single_key(&self) -> bool {
        self.object_fields.is_none()
    }

    pub fn optimize(&mut self) {
        self.exprs = std::mem::take(&mut self.exprs)
            .into_iter()
            .map(SbExpr::optimize)
            .collect();
    }

    /// The key value when it is known at compile time.
    pub fn constant_value(&self) -> Option<Value> {
        match (self.is_single_key(), self.exprs.as_slice()) {
            (true, [expr]) => expr.as_constant().cloned(),
            _ => None,
        }
    }

    /// Block forms of every key expression, or `None` if any has none.
    pub fn vectorize(&self) -> Option<Vec<SbExpr>> {
        self.exprs.iter().map(build_vectorized_expr).collect()
    }
}

pub fn generate_group_by_key_exprs(
    state: &StageBuilderState,
    id_expr: &Expression,
    outputs: &PlanStageSlots,
) -> Result<GroupKeyExprs, SbeGroupError> {
    match id_expr {
        Expression::Object(fields) if !fields.is_empty() => {
            let mut exprs = fields
                .iter()
                .map(|(_, e)| generate_expression(state, e, None, outputs))
                .collect::<Result<Vec<_>, _>>()?;
            // A one-field key collapses missing into null, like a plain key.
            if let [only] = exprs.as_mut_slice() {
                *only = SbExpr::fill_empty_null(std::mem::replace(only, SbExpr::null()));
            }
            Ok(GroupKeyExprs {
                exprs,
                object_fields: Some(fields.iter().map(|(n, _)| n.clone()).collect()),
            })
        }
        other => Ok(GroupKeyExprs {
            exprs: vec![SbExpr::fill_empty_null(generate_expression(
                state, other, None, outputs,
            )?)],
            object_fields: None,
        }),
    }
}

/// Project the key into one slot and derive the object that variable
/// initializers are evaluated against, in `init_root_slot`. An object key
/// is first combined into a single `newObj` key.
pub fn generate_init_root_slot(
    state: &mut StageBuilderState,
    stage: PlanStage,
    keys: &mut GroupKeyExprs,
    init_root_slot: SbSlot,
    node_id: NodeId,
) -> PlanStage {
    if let Some(names) = keys.object_fields.take() {
        let exprs = std::mem::take(&mut keys.exprs);
        keys.exprs = vec![SbExpr::new_obj("newObj", names.into_iter().zip(exprs))];
    }
    let mut builder = SbBuilder::new(state, node_id);
    let key = std::mem::take(&mut keys.exprs);
    let (stage, key_slots) =
        builder.make_project(stage, key.into_iter().map(|e| (e, None)).collect());
    let Some(&key_slot) = key_slots.first() else {
        return stage;
    };
    keys.exprs = vec![SbExpr::slot(key_slot)];

    let root = if key_slot.type_sig.is_subset(TypeSignature::OBJECT) {
        SbExpr::slot(key_slot)
    } else {
        SbExpr::if_then_else(
            SbExpr::func("isObject", vec![SbExpr::slot(key_slot)]),
            SbExpr::slot(key_slot),
            empty_object(),
        )
    };
    let (stage, _) = builder.make_project(stage, vec![(root, Some(init_root_slot))]);
    stage
}
