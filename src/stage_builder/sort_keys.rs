//! Sort keys for order-sensitive accumulators.
//!
//! Two plans exist. `TraverseFields` computes one key component per sort
//! part from the part's top-level field slot; `CallGenCheapSortKey` hands
//! the whole input document and the runtime sort specification to
//! `generateCheapSortKey`, and therefore needs the result object.

use std::collections::BTreeSet;

use crate::error::{ErrorCode, SbeGroupError};
use crate::query::SortPattern;
use crate::sbe::eval::PARALLEL_ARRAYS_MESSAGE;
use crate::sbe::SbExpr;
use crate::stage_builder::reqs::PlanStageSlots;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildSortKeysPlanType {
    TraverseFields,
    CallGenCheapSortKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSortKeysPlan {
    pub plan_type: BuildSortKeysPlanType,
    /// Top-level fields the child must deliver as `Field` slots.
    pub fields_for_sort_keys: BTreeSet<String>,
    pub needs_result_obj: bool,
}

pub fn make_sort_keys_plan(pattern: &SortPattern, allow_cheap_sort_key: bool) -> BuildSortKeysPlan {
    let all_top_level = pattern.parts().iter().all(|p| p.is_top_level());
    if all_top_level || !allow_cheap_sort_key {
        BuildSortKeysPlan {
            plan_type: BuildSortKeysPlanType::TraverseFields,
            fields_for_sort_keys: pattern
                .parts()
                .iter()
                .map(|p| p.top_level_field().to_string())
                .collect(),
            needs_result_obj: false,
        }
    } else {
        BuildSortKeysPlan {
            plan_type: BuildSortKeysPlanType::CallGenCheapSortKey,
            fields_for_sort_keys: BTreeSet::new(),
            needs_result_obj: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKeys {
    /// One component per sort part. Empty for the cheap plan.
    pub key_exprs: Vec<SbExpr>,
    /// Present when more than one part is combined into one key.
    pub parallel_arrays_check_expr: Option<SbExpr>,
    /// The key the accumulator compares.
    pub full_key_expr: SbExpr,
}

/// Compile the sort key of `pattern` according to `plan`. `sort_spec` is
/// the env slot expression holding the runtime specification.
pub fn build_sort_keys(
    plan: &BuildSortKeysPlan,
    pattern: &SortPattern,
    outputs: &PlanStageSlots,
    sort_spec: &SbExpr,
) -> Result<SortKeys, SbeGroupError> {
    match plan.plan_type {
        BuildSortKeysPlanType::CallGenCheapSortKey => {
            let root = outputs.result_slot().ok_or_else(|| {
                SbeGroupError::InternalError("cheap sort keys need the result object".into())
            })?;
            Ok(SortKeys {
                key_exprs: Vec::new(),
                parallel_arrays_check_expr: None,
                full_key_expr: SbExpr::func(
                    "sortKeyComponentVectorToArray",
                    vec![SbExpr::func(
                        "generateCheapSortKey",
                        vec![SbExpr::slot(root), sort_spec.clone()],
                    )],
                ),
            })
        }
        BuildSortKeysPlanType::TraverseFields => {
            let mut values = Vec::with_capacity(pattern.len());
            for part in pattern.parts() {
                let top = part.top_level_field();
                let base = match outputs.field(top) {
                    Some(slot) => SbExpr::slot(slot),
                    None => {
                        let root = outputs.result_slot().ok_or_else(|| {
                            SbeGroupError::InternalError(format!(
                                "sort key field '{top}' is not available"
                            ))
                        })?;
                        SbExpr::func("getField", vec![SbExpr::slot(root), SbExpr::str(top)])
                    }
                };
                let value = if part.is_top_level() {
                    base
                } else {
                    SbExpr::func(
                        "traverseP",
                        vec![base, SbExpr::str(&part.field_path[1..].join("."))],
                    )
                };
                values.push(value);
            }

            let key_exprs: Vec<SbExpr> = values
                .iter()
                .zip(pattern.parts())
                .map(|(v, part)| {
                    SbExpr::func(
                        "sortKeyComponent",
                        vec![v.clone(), SbExpr::constant(part.is_ascending)],
                    )
                })
                .collect();

            if key_exprs.len() == 1 {
                return Ok(SortKeys {
                    full_key_expr: key_exprs[0].clone(),
                    key_exprs,
                    parallel_arrays_check_expr: None,
                });
            }
            let check = SbExpr::func("parallelArraysCheck", values);
            Ok(SortKeys {
                full_key_expr: SbExpr::if_then_else(
                    check.clone(),
                    SbExpr::func("newArray", key_exprs.clone()),
                    SbExpr::fail(ErrorCode::BadValue, PARALLEL_ARRAYS_MESSAGE),
                ),
                key_exprs,
                parallel_arrays_check_expr: Some(check),
            })
        }
    }
}
