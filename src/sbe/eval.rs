//! Expression evaluation and the scalar/block builtin function library.

use crate::config::Collation;
use crate::error::{ErrorCode, SbeGroupError};
use crate::sbe::agg;
use crate::sbe::{RuntimeEnvironment, SbExpr, SlotRow};
use crate::value::{
    add_numbers, compare_values, multiply_numbers, subtract_numbers, Document, Value,
};
use std::cmp::Ordering;

pub const PARALLEL_ARRAYS_MESSAGE: &str = "cannot sort with keys that are parallel arrays";

/// Evaluate `expr` against one row.
pub fn eval(expr: &SbExpr, row: &SlotRow, env: &RuntimeEnvironment) -> Result<Value, SbeGroupError> {
    match expr {
        SbExpr::Constant(v) => Ok(v.clone()),
        SbExpr::Slot(slot) => row
            .get(slot.id)
            .or_else(|| env.value(slot.id))
            .cloned()
            .ok_or_else(|| SbeGroupError::InternalError(format!("slot {slot} is not bound"))),
        SbExpr::Function { name, args } => {
            let values = args
                .iter()
                .map(|a| eval(a, row, env))
                .collect::<Result<Vec<_>, _>>()?;
            call_builtin(name, values, env.collation())
        }
        SbExpr::If {
            cond,
            then_branch,
            else_branch,
        } => {
            if eval(cond, row, env)? == Value::Bool(true) {
                eval(then_branch, row, env)
            } else {
                eval(else_branch, row, env)
            }
        }
        SbExpr::FillEmpty { input, fallback } => match eval(input, row, env)? {
            Value::Nothing => eval(fallback, row, env),
            v => Ok(v),
        },
        SbExpr::Fail { code, message } => Err(SbeGroupError::execution(*code, message.clone())),
    }
}

/// Whether calls to `name` may be evaluated at compile time.
pub fn is_foldable(name: &str) -> bool {
    let scalar = name.strip_prefix("block.").unwrap_or(name);
    SCALAR_BUILTINS.contains(&scalar)
}

/// Builtins that may be applied element-wise to blocks.
pub fn is_vectorizable(name: &str) -> bool {
    VECTORIZABLE_BUILTINS.contains(&name)
}

const SCALAR_BUILTINS: &[&str] = &[
    "add",
    "subtract",
    "multiply",
    "divide",
    "concat",
    "toLower",
    "toUpper",
    "eq",
    "neq",
    "gt",
    "gte",
    "lt",
    "lte",
    "and",
    "or",
    "not",
    "coerceToBool",
    "isArray",
    "isObject",
    "isNumber",
    "exists",
    "size",
    "ifNull",
    "fillEmpty",
    "getField",
    "traverseP",
    "newObj",
    "newBsonObj",
    "newArray",
    "sortKeyComponent",
    "parallelArraysCheck",
    "generateCheapSortKey",
    "sortKeyComponentVectorToArray",
    "newAccumNState",
    "aggNFinalize",
    "aggTopNFinalize",
    "aggTopFinalize",
    "avgFinalize",
];

const VECTORIZABLE_BUILTINS: &[&str] = &[
    "add",
    "subtract",
    "multiply",
    "divide",
    "concat",
    "toLower",
    "toUpper",
    "eq",
    "neq",
    "gt",
    "gte",
    "lt",
    "lte",
    "and",
    "or",
    "not",
    "isArray",
    "isObject",
    "isNumber",
    "exists",
    "ifNull",
    "fillEmpty",
    "newArray",
    "sortKeyComponent",
];

pub fn call_builtin(
    name: &str,
    args: Vec<Value>,
    collation: Option<Collation>,
) -> Result<Value, SbeGroupError> {
    match name.strip_prefix("block.") {
        Some(scalar) => call_block(scalar, args, collation),
        None => call_scalar(name, args, collation),
    }
}

/// Apply a scalar builtin element-wise. Scalar arguments are broadcast.
fn call_block(
    name: &str,
    args: Vec<Value>,
    collation: Option<Collation>,
) -> Result<Value, SbeGroupError> {
    let mut len: Option<usize> = None;
    for arg in &args {
        if let Value::Block(items) = arg {
            match len {
                Some(l) if l != items.len() => {
                    return Err(SbeGroupError::InternalError(format!(
                        "block.{name}: block arguments differ in length"
                    )));
                }
                _ => len = Some(items.len()),
            }
        }
    }
    let Some(len) = len else {
        return call_scalar(name, args, collation);
    };

    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        let elems = args
            .iter()
            .map(|a| match a {
                Value::Block(items) => items[i].clone(),
                scalar => scalar.clone(),
            })
            .collect();
        out.push(call_scalar(name, elems, collation)?);
    }
    Ok(Value::Block(out))
}

fn expect_args(name: &str, args: &[Value], n: usize) -> Result<(), SbeGroupError> {
    if args.len() == n {
        Ok(())
    } else {
        Err(SbeGroupError::InternalError(format!(
            "{name} expects {n} arguments, got {}",
            args.len()
        )))
    }
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Nothing | Value::Null => false,
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Double(d) => *d != 0.0,
        _ => true,
    }
}

fn type_mismatch(op: &str, v: &Value) -> SbeGroupError {
    SbeGroupError::execution(
        ErrorCode::TypeMismatch,
        format!("{op} does not support values of type {}", v.type_name()),
    )
}

fn arith_fold(
    op: &str,
    args: Vec<Value>,
    init: Value,
    f: fn(&Value, &Value) -> Option<Value>,
) -> Result<Value, SbeGroupError> {
    let mut acc = init;
    for arg in &args {
        if arg.is_nullish() {
            return Ok(Value::Null);
        }
        acc = f(&acc, arg).ok_or_else(|| type_mismatch(op, arg))?;
    }
    Ok(acc)
}

fn call_scalar(
    name: &str,
    mut args: Vec<Value>,
    collation: Option<Collation>,
) -> Result<Value, SbeGroupError> {
    let cmp = |args: &[Value]| compare_values(&args[0], &args[1], collation);
    match name {
        "add" => arith_fold("$add", args, Value::Int(0), add_numbers),
        "multiply" => arith_fold("$multiply", args, Value::Int(1), multiply_numbers),
        "subtract" => {
            expect_args(name, &args, 2)?;
            if args.iter().any(Value::is_nullish) {
                return Ok(Value::Null);
            }
            subtract_numbers(&args[0], &args[1])
                .ok_or_else(|| type_mismatch("$subtract", &args[1]))
        }
        "divide" => {
            expect_args(name, &args, 2)?;
            if args.iter().any(Value::is_nullish) {
                return Ok(Value::Null);
            }
            let (Some(a), Some(b)) = (args[0].as_f64(), args[1].as_f64()) else {
                return Err(type_mismatch("$divide", &args[1]));
            };
            if b == 0.0 {
                return Err(SbeGroupError::execution(
                    ErrorCode::BadValue,
                    "can't $divide by zero",
                ));
            }
            Ok(Value::Double(a / b))
        }
        "concat" => {
            let mut out = String::new();
            for arg in &args {
                match arg {
                    Value::Str(s) => out.push_str(s),
                    v if v.is_nullish() => return Ok(Value::Null),
                    v => return Err(type_mismatch("$concat", v)),
                }
            }
            Ok(Value::Str(out))
        }
        "toLower" | "toUpper" => {
            expect_args(name, &args, 1)?;
            match &args[0] {
                Value::Str(s) if name == "toLower" => Ok(Value::Str(s.to_lowercase())),
                Value::Str(s) => Ok(Value::Str(s.to_uppercase())),
                v if v.is_nullish() => Ok(Value::str("")),
                v => Err(type_mismatch(name, v)),
            }
        }
        "eq" | "neq" | "gt" | "gte" | "lt" | "lte" => {
            expect_args(name, &args, 2)?;
            let ord = cmp(&args);
            let result = match name {
                "eq" => ord == Ordering::Equal,
                "neq" => ord != Ordering::Equal,
                "gt" => ord == Ordering::Greater,
                "gte" => ord != Ordering::Less,
                "lt" => ord == Ordering::Less,
                _ => ord != Ordering::Greater,
            };
            Ok(Value::Bool(result))
        }
        "and" => Ok(Value::Bool(args.iter().all(is_truthy))),
        "or" => Ok(Value::Bool(args.iter().any(is_truthy))),
        "coerceToBool" => Ok(Value::Bool(args.first().is_some_and(is_truthy))),
        "not" => {
            expect_args(name, &args, 1)?;
            Ok(Value::Bool(!is_truthy(&args[0])))
        }
        "isArray" | "isObject" | "isNumber" | "exists" => {
            expect_args(name, &args, 1)?;
            let v = &args[0];
            Ok(Value::Bool(match name {
                "isArray" => v.is_array(),
                "isObject" => v.is_object(),
                "isNumber" => v.is_number(),
                _ => !v.is_nothing(),
            }))
        }
        "size" => {
            expect_args(name, &args, 1)?;
            match &args[0] {
                Value::Array(items) => Ok(Value::Int(items.len() as i64)),
                v => Err(SbeGroupError::execution(
                    ErrorCode::TypeMismatch,
                    format!("The argument to $size must be an array. Type: {}", v.type_name()),
                )),
            }
        }
        "ifNull" => {
            let last = args.pop().unwrap_or(Value::Null);
            Ok(args.into_iter().find(|v| !v.is_nullish()).unwrap_or(last))
        }
        "fillEmpty" => {
            expect_args(name, &args, 2)?;
            let fallback = args.pop().unwrap_or(Value::Null);
            match args.pop() {
                Some(Value::Nothing) | None => Ok(fallback),
                Some(v) => Ok(v),
            }
        }
        "getField" => {
            expect_args(name, &args, 2)?;
            let field = args[1].as_str().unwrap_or_default().to_string();
            Ok(args[0].get_field(&field))
        }
        "traverseP" => {
            expect_args(name, &args, 2)?;
            let path: Vec<&str> = args[1].as_str().unwrap_or_default().split('.').collect();
            Ok(args[0].traverse(&path))
        }
        "newObj" | "newBsonObj" => {
            if args.len() % 2 != 0 {
                return Err(SbeGroupError::InternalError(format!(
                    "{name} expects name/value pairs"
                )));
            }
            let mut doc = Document::new();
            let mut it = args.into_iter();
            while let (Some(field), Some(value)) = (it.next(), it.next()) {
                let Value::Str(field) = field else {
                    return Err(SbeGroupError::InternalError(format!(
                        "{name} field names must be strings"
                    )));
                };
                doc.insert(field, value);
            }
            if name == "newBsonObj" {
                doc = doc.without_missing();
            }
            Ok(Value::Object(doc))
        }
        "newArray" => Ok(Value::Array(args)),
        "sortKeyComponent" => {
            expect_args(name, &args, 2)?;
            let ascending = args[1].as_bool().unwrap_or(true);
            Ok(sort_key_component(&args[0], ascending, collation))
        }
        "parallelArraysCheck" => Ok(Value::Bool(
            args.iter().filter(|v| v.is_array()).count() <= 1,
        )),
        "generateCheapSortKey" => {
            expect_args(name, &args, 2)?;
            generate_cheap_sort_key(&args[0], &args[1], collation)
        }
        "sortKeyComponentVectorToArray" => {
            expect_args(name, &args, 1)?;
            match args.pop() {
                Some(Value::Array(mut items)) if items.len() == 1 => Ok(items.remove(0)),
                Some(v) => Ok(v),
                None => Ok(Value::Nothing),
            }
        }
        "newAccumNState" => {
            expect_args(name, &args, 1)?;
            agg::new_n_state(&args[0])
        }
        "aggNFinalize" => {
            expect_args(name, &args, 1)?;
            agg::finalize_n(args.remove(0))
        }
        "aggTopNFinalize" => {
            expect_args(name, &args, 1)?;
            agg::finalize_top_n(args.remove(0))
        }
        "aggTopFinalize" => {
            expect_args(name, &args, 1)?;
            agg::finalize_top(args.remove(0))
        }
        "avgFinalize" => {
            expect_args(name, &args, 2)?;
            let count = args[1].as_f64().unwrap_or(0.0);
            if count == 0.0 {
                return Ok(Value::Null);
            }
            match args[0].as_f64() {
                Some(sum) => Ok(Value::Double(sum / count)),
                None => Ok(Value::Null),
            }
        }
        other => Err(SbeGroupError::InternalError(format!(
            "unknown builtin function '{other}'"
        ))),
    }
}

/// The value a document contributes to one sort-key position.
///
/// Arrays contribute their smallest element when ascending and their
/// largest when descending; missing values and empty arrays sort as null.
pub fn sort_key_component(v: &Value, ascending: bool, collation: Option<Collation>) -> Value {
    match v {
        Value::Nothing => Value::Null,
        Value::Array(items) => {
            let pick = items.iter().reduce(|best, item| {
                let ord = compare_values(item, best, collation);
                let better = if ascending {
                    ord == Ordering::Less
                } else {
                    ord == Ordering::Greater
                };
                if better { item } else { best }
            });
            pick.cloned().unwrap_or(Value::Null)
        }
        other => other.clone(),
    }
}

fn generate_cheap_sort_key(
    root: &Value,
    spec: &Value,
    collation: Option<Collation>,
) -> Result<Value, SbeGroupError> {
    let Some(spec) = spec.as_object() else {
        return Err(SbeGroupError::InternalError(
            "sort specification must be an object".into(),
        ));
    };
    let mut arrays = 0;
    let mut components = Vec::with_capacity(spec.len());
    for (path, dir) in spec.iter() {
        let parts: Vec<&str> = path.split('.').collect();
        let value = root.traverse(&parts);
        if value.is_array() {
            arrays += 1;
            if arrays > 1 {
                return Err(SbeGroupError::execution(
                    ErrorCode::BadValue,
                    PARALLEL_ARRAYS_MESSAGE,
                ));
            }
        }
        let ascending = dir.as_i64().is_none_or(|d| d > 0);
        components.push(sort_key_component(&value, ascending, collation));
    }
    Ok(Value::Array(components))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sbe::{SbSlot, TypeSignature};
    use serde_json::json;

    fn run(expr: &SbExpr) -> Result<Value, SbeGroupError> {
        eval(expr, &SlotRow::new(), &RuntimeEnvironment::new())
    }

    #[test]
    fn test_eval_slots_and_fill_empty() {
        let mut row = SlotRow::new();
        row.set(1, Value::Nothing);
        row.set(2, Value::Int(4));
        let env = RuntimeEnvironment::new();
        let e1 = SbExpr::fill_empty_null(SbExpr::slot(SbSlot::new(1)));
        let e2 = SbExpr::fill_empty_null(SbExpr::slot(SbSlot::new(2)));
        assert_eq!(eval(&e1, &row, &env).unwrap(), Value::Null);
        assert_eq!(eval(&e2, &row, &env).unwrap(), Value::Int(4));
        let unbound = SbExpr::slot(SbSlot::new(99));
        assert!(eval(&unbound, &row, &env).is_err());
    }

    #[test]
    fn test_env_slots_are_visible() {
        let mut env = RuntimeEnvironment::new();
        env.register("spec", 10, Value::Int(1));
        let e = SbExpr::slot(SbSlot::new(10));
        assert_eq!(eval(&e, &SlotRow::new(), &env).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_fail_raises_execution_error() {
        let e = SbExpr::if_then_else(
            SbExpr::constant(false),
            SbExpr::null(),
            SbExpr::fail(ErrorCode::BadValue, PARALLEL_ARRAYS_MESSAGE),
        );
        let err = run(&e).unwrap_err();
        assert_eq!(err.code(), Some(2));
        assert!(err.to_string().contains("parallel arrays"));
    }

    #[test]
    fn test_arithmetic_null_semantics() {
        let e = SbExpr::func("add", vec![SbExpr::constant(1i64), SbExpr::nothing()]);
        assert_eq!(run(&e).unwrap(), Value::Null);
        let bad = SbExpr::func("add", vec![SbExpr::constant(1i64), SbExpr::str("x")]);
        assert!(run(&bad).is_err());
        let div = SbExpr::func("divide", vec![SbExpr::constant(1i64), SbExpr::constant(4i64)]);
        assert_eq!(run(&div).unwrap(), Value::Double(0.25));
    }

    #[test]
    fn test_new_obj_vs_new_bson_obj() {
        let pairs = vec![
            ("a".to_string(), SbExpr::nothing()),
            ("b".to_string(), SbExpr::constant(1i64)),
        ];
        let obj = run(&SbExpr::new_obj("newObj", pairs.clone())).unwrap();
        assert_eq!(obj.as_object().unwrap().len(), 2);
        let bson = run(&SbExpr::new_obj("newBsonObj", pairs)).unwrap();
        assert_eq!(bson.as_object().unwrap().len(), 1);
        assert_eq!(obj.to_json(), bson.to_json());
    }

    #[test]
    fn test_block_functions_are_elementwise() {
        let mut row = SlotRow::new();
        row.set(
            1,
            Value::Block(vec![Value::Int(1), Value::Nothing, Value::Int(3)]),
        );
        let block = SbSlot::with_type(1, TypeSignature::BLOCK);
        let e = SbExpr::func(
            "block.fillEmpty",
            vec![SbExpr::slot(block), SbExpr::null()],
        );
        assert_eq!(
            eval(&e, &row, &RuntimeEnvironment::new()).unwrap(),
            Value::Block(vec![Value::Int(1), Value::Null, Value::Int(3)])
        );
    }

    #[test]
    fn test_sort_key_component_of_arrays() {
        let arr = Value::from_json(&json!([3, 1, 2]));
        assert_eq!(sort_key_component(&arr, true, None), Value::Int(1));
        assert_eq!(sort_key_component(&arr, false, None), Value::Int(3));
        assert_eq!(sort_key_component(&Value::Nothing, true, None), Value::Null);
    }

    #[test]
    fn test_cheap_sort_key_detects_parallel_arrays() {
        let spec = Value::object([("a.x", Value::Int(1)), ("b", Value::Int(-1))]);
        let ok = Value::from_json(&json!({"a": {"x": [5, 2]}, "b": 7}));
        assert_eq!(
            generate_cheap_sort_key(&ok, &spec, None).unwrap(),
            Value::Array(vec![Value::Int(2), Value::Int(7)])
        );
        let bad = Value::from_json(&json!({"a": {"x": [5, 2]}, "b": [1, 2]}));
        let err = generate_cheap_sort_key(&bad, &spec, None).unwrap_err();
        assert!(err.to_string().contains(PARALLEL_ARRAYS_MESSAGE));
    }

    #[test]
    fn test_traverse_and_get_field() {
        let doc = SbExpr::Constant(Value::from_json(&json!({"a": {"b": 2}})));
        let get = SbExpr::func("getField", vec![doc.clone(), SbExpr::str("a")]);
        assert_eq!(run(&get).unwrap(), Value::object([("b", Value::Int(2))]));
        let trav = SbExpr::func("traverseP", vec![doc, SbExpr::str("a.b")]);
        assert_eq!(run(&trav).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_avg_finalize() {
        let e = SbExpr::func("avgFinalize", vec![SbExpr::constant(9i64), SbExpr::constant(2i64)]);
        assert_eq!(run(&e).unwrap(), Value::Double(4.5));
        let empty =
            SbExpr::func("avgFinalize", vec![SbExpr::constant(0i64), SbExpr::constant(0i64)]);
        assert_eq!(run(&empty).unwrap(), Value::Null);
    }
}
