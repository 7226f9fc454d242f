//! Compiled slot-based expressions.
//!
//! An [`SbExpr`] is a side-effect-free tree over slots and constants. Named
//! functions are resolved by [`crate::sbe::eval`] at runtime; names with a
//! `block.` prefix are the element-wise forms used by block-mode stages.
//! Aggregate functions (`sum`, `min`, `aggTopN`, `valueBlockAggSum`, ...)
//! also appear as top-level [`SbExpr::Function`] nodes inside aggregation
//! stages, where the running state is an implicit first argument.

use std::fmt;

use crate::error::ErrorCode;
use crate::sbe::eval;
use crate::sbe::{SbSlot, TypeSignature};
use crate::value::{Document, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum SbExpr {
    Constant(Value),
    Slot(SbSlot),
    Function {
        name: String,
        args: Vec<SbExpr>,
    },
    If {
        cond: Box<SbExpr>,
        then_branch: Box<SbExpr>,
        else_branch: Box<SbExpr>,
    },
    /// `input ?: fallback`: `fallback` when `input` is Nothing.
    FillEmpty {
        input: Box<SbExpr>,
        fallback: Box<SbExpr>,
    },
    Fail {
        code: ErrorCode,
        message: String,
    },
}

impl SbExpr {
    pub fn constant(value: impl Into<Value>) -> SbExpr {
        SbExpr::Constant(value.into())
    }

    pub fn null() -> SbExpr {
        SbExpr::Constant(Value::Null)
    }

    pub fn nothing() -> SbExpr {
        SbExpr::Constant(Value::Nothing)
    }

    pub fn str(s: &str) -> SbExpr {
        SbExpr::Constant(Value::str(s))
    }

    pub fn slot(slot: SbSlot) -> SbExpr {
        SbExpr::Slot(slot)
    }

    pub fn func(name: &str, args: Vec<SbExpr>) -> SbExpr {
        SbExpr::Function {
            name: name.to_string(),
            args,
        }
    }

    pub fn if_then_else(cond: SbExpr, then_branch: SbExpr, else_branch: SbExpr) -> SbExpr {
        SbExpr::If {
            cond: Box::new(cond),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        }
    }

    pub fn fill_empty(input: SbExpr, fallback: SbExpr) -> SbExpr {
        SbExpr::FillEmpty {
            input: Box::new(input),
            fallback: Box::new(fallback),
        }
    }

    pub fn fill_empty_null(input: SbExpr) -> SbExpr {
        Self::fill_empty(input, SbExpr::null())
    }

    pub fn fail(code: ErrorCode, message: &str) -> SbExpr {
        SbExpr::Fail {
            code,
            message: message.to_string(),
        }
    }

    /// `fn_name("name1", value1, "name2", value2, ...)`.
    pub fn new_obj<I>(fn_name: &str, fields: I) -> SbExpr
    where
        I: IntoIterator<Item = (String, SbExpr)>,
    {
        let mut args = Vec::new();
        for (name, value) in fields {
            args.push(SbExpr::Constant(Value::Str(name)));
            args.push(value);
        }
        SbExpr::func(fn_name, args)
    }

    pub fn as_slot(&self) -> Option<SbSlot> {
        match self {
            SbExpr::Slot(slot) => Some(*slot),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, SbExpr::Constant(_))
    }

    pub fn as_constant(&self) -> Option<&Value> {
        match self {
            SbExpr::Constant(v) => Some(v),
            _ => None,
        }
    }

    pub fn function_name(&self) -> Option<&str> {
        match self {
            SbExpr::Function { name, .. } => Some(name),
            _ => None,
        }
    }

    fn children(&self) -> Vec<&SbExpr> {
        match self {
            SbExpr::Constant(_) | SbExpr::Slot(_) | SbExpr::Fail { .. } => vec![],
            SbExpr::Function { args, .. } => args.iter().collect(),
            SbExpr::If {
                cond,
                then_branch,
                else_branch,
            } => vec![&**cond, &**then_branch, &**else_branch],
            SbExpr::FillEmpty { input, fallback } => vec![&**input, &**fallback],
        }
    }

    /// Whether any slot referenced by this expression satisfies `pred`.
    pub fn references_slot(&self, pred: &impl Fn(&SbSlot) -> bool) -> bool {
        match self {
            SbExpr::Slot(slot) => pred(slot),
            other => other.children().into_iter().any(|c| c.references_slot(pred)),
        }
    }

    pub fn references_block(&self) -> bool {
        self.references_slot(&|s| s.is_block())
    }

    /// Static approximation of the types this expression may produce.
    pub fn type_signature(&self) -> TypeSignature {
        match self {
            SbExpr::Constant(v) => TypeSignature::from_value(v),
            SbExpr::Slot(slot) => slot.type_sig,
            SbExpr::Function { name, .. } => function_type_signature(name),
            SbExpr::If {
                then_branch,
                else_branch,
                ..
            } => then_branch
                .type_signature()
                .include(else_branch.type_signature()),
            SbExpr::FillEmpty { input, fallback } => input
                .type_signature()
                .exclude(TypeSignature::NOTHING)
                .include(fallback.type_signature()),
            SbExpr::Fail { .. } => TypeSignature::NOTHING,
        }
    }

    /// Constant-fold and simplify.
    pub fn optimize(self) -> SbExpr {
        match self {
            SbExpr::Function { name, args } => {
                let args: Vec<SbExpr> = args.into_iter().map(SbExpr::optimize).collect();
                if eval::is_foldable(&name) && args.iter().all(SbExpr::is_constant) {
                    let values: Vec<Value> = args
                        .iter()
                        .filter_map(|a| a.as_constant().cloned())
                        .collect();
                    if let Ok(folded) = eval::call_builtin(&name, values, None) {
                        return SbExpr::Constant(folded);
                    }
                }
                SbExpr::Function { name, args }
            }
            SbExpr::FillEmpty { input, fallback } => {
                let input = input.optimize();
                let fallback = fallback.optimize();
                match input.as_constant() {
                    Some(Value::Nothing) => fallback,
                    Some(_) => input,
                    None if is_never_nothing(input.type_signature()) => input,
                    None => SbExpr::fill_empty(input, fallback),
                }
            }
            SbExpr::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = cond.optimize();
                let then_branch = then_branch.optimize();
                let else_branch = else_branch.optimize();
                match cond.as_constant() {
                    Some(Value::Bool(true)) => then_branch,
                    Some(_) => else_branch,
                    None => SbExpr::if_then_else(cond, then_branch, else_branch),
                }
            }
            other => other,
        }
    }
}

fn is_never_nothing(sig: TypeSignature) -> bool {
    !sig.is_block() && !sig.contains_any(TypeSignature::NOTHING)
}

fn function_type_signature(name: &str) -> TypeSignature {
    if name.starts_with("block.") {
        return TypeSignature::BLOCK;
    }
    match name {
        "newObj" | "newBsonObj" => TypeSignature::OBJECT,
        "newArray" | "generateCheapSortKey" => TypeSignature::ARRAY,
        "isObject" | "isArray" | "isNumber" | "exists" | "eq" | "neq" | "gt" | "gte" | "lt"
        | "lte" | "and" | "or" | "not" | "coerceToBool" | "parallelArraysCheck" => TypeSignature::BOOL,
        "concat" | "toLower" | "toUpper" => TypeSignature::STRING.include(TypeSignature::NULL),
        _ => TypeSignature::ANY_SCALAR,
    }
}

impl From<SbSlot> for SbExpr {
    fn from(slot: SbSlot) -> Self {
        SbExpr::Slot(slot)
    }
}

impl fmt::Display for SbExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SbExpr::Constant(v) => write!(f, "{v}"),
            SbExpr::Slot(slot) => write!(f, "{slot}"),
            SbExpr::Function { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            SbExpr::If {
                cond,
                then_branch,
                else_branch,
            } => write!(f, "if {cond} then {then_branch} else {else_branch}"),
            SbExpr::FillEmpty { input, fallback } => write!(f, "({input} ?: {fallback})"),
            SbExpr::Fail { code, message } => write!(f, "fail({}, \"{message}\")", code.code()),
        }
    }
}

/// The `{}` constant.
pub fn empty_object() -> SbExpr {
    SbExpr::Constant(Value::Object(Document::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_slot(id: u32) -> SbSlot {
        SbSlot::with_type(id, TypeSignature::BLOCK)
    }

    #[test]
    fn test_display_matches_explain_format() {
        let e = SbExpr::fill_empty_null(SbExpr::slot(SbSlot::new(4)));
        assert_eq!(e.to_string(), "(s4 ?: null)");
        let f = SbExpr::func("min", vec![SbExpr::slot(SbSlot::new(5))]);
        assert_eq!(f.to_string(), "min(s5)");
        let fail = SbExpr::fail(ErrorCode::BadValue, "boom");
        assert_eq!(fail.to_string(), "fail(2, \"boom\")");
    }

    #[test]
    fn test_optimize_folds_constant_functions() {
        let e = SbExpr::func("add", vec![SbExpr::constant(1i64), SbExpr::constant(2i64)]);
        assert_eq!(e.optimize(), SbExpr::constant(3i64));

        let obj = SbExpr::new_obj(
            "newObj",
            vec![("a".to_string(), SbExpr::constant(1i64))],
        );
        assert_eq!(
            obj.optimize(),
            SbExpr::Constant(Value::object([("a", Value::Int(1))]))
        );
    }

    #[test]
    fn test_optimize_fill_empty() {
        let missing = SbExpr::fill_empty_null(SbExpr::nothing());
        assert_eq!(missing.optimize(), SbExpr::null());

        let present = SbExpr::fill_empty_null(SbExpr::constant(7i64));
        assert_eq!(present.optimize(), SbExpr::constant(7i64));

        let typed = SbSlot::with_type(3, TypeSignature::NUMBER);
        let kept = SbExpr::fill_empty_null(SbExpr::slot(typed));
        assert_eq!(kept.optimize(), SbExpr::slot(typed));

        let unknown = SbExpr::fill_empty_null(SbExpr::slot(SbSlot::new(3)));
        assert_eq!(unknown.clone().optimize(), unknown);
    }

    #[test]
    fn test_optimize_keeps_failing_calls() {
        let e = SbExpr::func("divide", vec![SbExpr::constant(1i64), SbExpr::constant(0i64)]);
        assert!(matches!(e.optimize(), SbExpr::Function { .. }));
    }

    #[test]
    fn test_type_signatures() {
        let e = SbExpr::fill_empty_null(SbExpr::slot(SbSlot::new(1)));
        assert!(!e.type_signature().contains_any(TypeSignature::NOTHING));
        let obj = SbExpr::new_obj("newObj", vec![]);
        assert!(obj.type_signature().is_subset(TypeSignature::OBJECT));
        let vectorized = SbExpr::func("block.fillEmpty", vec![SbExpr::slot(block_slot(2))]);
        assert!(vectorized.type_signature().is_block());
        assert!(vectorized.references_block());
    }
}
