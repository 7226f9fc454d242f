//! Rewrites scalar expressions into their block form.

use crate::sbe::eval::is_vectorizable;
use crate::sbe::SbExpr;

/// The block form of `expr`, or `None` when some part reading a block has
/// no element-wise counterpart. Sub-expressions that read no block stay
/// scalar and are broadcast at runtime.
pub fn build_vectorized_expr(expr: &SbExpr) -> Option<SbExpr> {
    match expr {
        SbExpr::Constant(_) | SbExpr::Slot(_) | SbExpr::Fail { .. } => Some(expr.clone()),
        SbExpr::Function { name, args } => {
            let args = args
                .iter()
                .map(build_vectorized_expr)
                .collect::<Option<Vec<_>>>()?;
            if !args.iter().any(produces_block) {
                return Some(SbExpr::func(name, args));
            }
            if name.starts_with("block.") {
                return Some(SbExpr::func(name, args));
            }
            is_vectorizable(name).then(|| SbExpr::func(&format!("block.{name}"), args))
        }
        SbExpr::FillEmpty { input, fallback } => {
            let input = build_vectorized_expr(input)?;
            let fallback = build_vectorized_expr(fallback)?;
            if produces_block(&input) || produces_block(&fallback) {
                Some(SbExpr::func("block.fillEmpty", vec![input, fallback]))
            } else {
                Some(SbExpr::fill_empty(input, fallback))
            }
        }
        SbExpr::If {
            cond,
            then_branch,
            else_branch,
        } => {
            if expr.references_block() {
                return None;
            }
            Some(SbExpr::if_then_else(
                (**cond).clone(),
                (**then_branch).clone(),
                (**else_branch).clone(),
            ))
        }
    }
}

fn produces_block(expr: &SbExpr) -> bool {
    expr.type_signature().is_block()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sbe::{SbSlot, TypeSignature};

    fn block(id: u32) -> SbExpr {
        SbExpr::slot(SbSlot::with_type(id, TypeSignature::BLOCK))
    }

    #[test]
    fn test_vectorizes_element_wise_builtins() {
        let expr = SbExpr::func("add", vec![block(1), SbExpr::constant(1i64)]);
        let v = build_vectorized_expr(&expr).unwrap();
        assert_eq!(v.to_string(), "block.add(s1, 1)");
    }

    #[test]
    fn test_fill_empty_over_blocks() {
        let v = build_vectorized_expr(&SbExpr::fill_empty_null(block(1))).unwrap();
        assert_eq!(v.to_string(), "block.fillEmpty(s1, null)");
    }

    #[test]
    fn test_scalar_parts_stay_scalar() {
        let expr = SbExpr::fill_empty_null(SbExpr::slot(SbSlot::new(3)));
        assert_eq!(build_vectorized_expr(&expr), Some(expr));
    }

    #[test]
    fn test_rejects_non_vectorizable() {
        let traverse = SbExpr::func("traverseP", vec![block(1), SbExpr::str("a")]);
        assert!(build_vectorized_expr(&traverse).is_none());
        let cond = SbExpr::if_then_else(block(1), SbExpr::null(), SbExpr::null());
        assert!(build_vectorized_expr(&cond).is_none());
    }
}
