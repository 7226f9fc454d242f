//! Aggregate functions.
//!
//! An aggregate call such as `min(s5)` is evaluated against a running
//! state: the state is the implicit first argument and the result replaces
//! it. Block aggregates (`valueBlockAgg*`) take a selectivity bitmap first
//! and fold every selected element of their block arguments.
//!
//! The bounded accumulators (`firstN`, `lastN`, `topN`, `bottomN`) keep
//! their state as `[items, n]`. For the sorted variants every item is a
//! `[sortKey, value]` pair and `items` is kept in sort order.

use std::cmp::Ordering;

use crate::config::Collation;
use crate::error::{ErrorCode, SbeGroupError};
use crate::sbe::eval::{call_builtin, eval};
use crate::sbe::{RuntimeEnvironment, SbExpr, SlotRow};
use crate::value::{add_numbers, compare_values, values_equal, Value};

/// Evaluate one aggregate call, returning the new state.
pub fn eval_agg(
    expr: &SbExpr,
    state: Value,
    row: &SlotRow,
    env: &RuntimeEnvironment,
) -> Result<Value, SbeGroupError> {
    let SbExpr::Function { name, args } = expr else {
        return Err(SbeGroupError::InternalError(format!(
            "aggregate expression must be a function call, got {expr}"
        )));
    };
    let values = args
        .iter()
        .map(|a| eval(a, row, env))
        .collect::<Result<Vec<_>, _>>()?;
    let collation = env.collation();
    match block_agg_scalar_name(name) {
        Some(scalar) => {
            let mut values = values.into_iter();
            let bitmap = values.next().unwrap_or(Value::Nothing);
            apply_block_agg(scalar, state, &bitmap, values.collect(), collation)
        }
        None => apply_agg(name, state, values, collation),
    }
}

fn block_agg_scalar_name(name: &str) -> Option<&'static str> {
    Some(match name {
        "valueBlockAggSum" => "sum",
        "valueBlockAggMin" => "min",
        "valueBlockAggMax" => "max",
        "valueBlockAggCount" => "countNumeric",
        "valueBlockAggFirst" => "first",
        "valueBlockAggLast" => "last",
        "valueBlockAggTopN" => "aggTopN",
        "valueBlockAggBottomN" => "aggBottomN",
        _ => return None,
    })
}

/// Fold every element selected by `bitmap` into `state`.
pub fn apply_block_agg(
    name: &str,
    mut state: Value,
    bitmap: &Value,
    args: Vec<Value>,
    collation: Option<Collation>,
) -> Result<Value, SbeGroupError> {
    let Some(selected) = bitmap.as_block() else {
        return Err(SbeGroupError::InternalError(format!(
            "block aggregate {name} expects a bitmap block"
        )));
    };
    for (i, bit) in selected.iter().enumerate() {
        if *bit != Value::Bool(true) {
            continue;
        }
        let elems = args
            .iter()
            .map(|a| match a {
                Value::Block(items) => items.get(i).cloned().unwrap_or(Value::Nothing),
                scalar => scalar.clone(),
            })
            .collect();
        state = apply_agg(name, state, elems, collation)?;
    }
    Ok(state)
}

/// Apply one scalar aggregate step.
pub fn apply_agg(
    name: &str,
    state: Value,
    args: Vec<Value>,
    collation: Option<Collation>,
) -> Result<Value, SbeGroupError> {
    match name {
        "sum" => {
            let [x] = take::<1>(name, args)?;
            let acc = if state.is_nothing() { Value::Int(0) } else { state };
            if !x.is_number() {
                return Ok(acc);
            }
            add_numbers(&acc, &x).ok_or_else(|| {
                SbeGroupError::execution(ErrorCode::TypeMismatch, "sum state must be numeric")
            })
        }
        "countNumeric" => {
            let [x] = take::<1>(name, args)?;
            let count = state.as_i64().unwrap_or(0);
            Ok(Value::Int(if x.is_number() { count + 1 } else { count }))
        }
        "min" | "max" => {
            let [x] = take::<1>(name, args)?;
            if x.is_nullish() {
                return Ok(state);
            }
            if state.is_nothing() {
                return Ok(x);
            }
            let ord = compare_values(&x, &state, collation);
            let replace = if name == "min" {
                ord == Ordering::Less
            } else {
                ord == Ordering::Greater
            };
            Ok(if replace { x } else { state })
        }
        "first" => {
            let [x] = take::<1>(name, args)?;
            Ok(if state.is_nothing() { x } else { state })
        }
        "last" => {
            let [x] = take::<1>(name, args)?;
            Ok(if x.is_nothing() { state } else { x })
        }
        "addToArray" => {
            let [x] = take::<1>(name, args)?;
            let mut items = into_items(state);
            if !x.is_nothing() {
                items.push(x);
            }
            Ok(Value::Array(items))
        }
        "concatArrays" => {
            let [spill] = take::<1>(name, args)?;
            let mut items = into_items(state);
            items.extend(into_items(spill));
            Ok(Value::Array(items))
        }
        "addToSet" => {
            let [x] = take::<1>(name, args)?;
            let mut items = into_items(state);
            if !x.is_nothing() {
                insert_unique(&mut items, x, collation);
            }
            Ok(Value::Array(items))
        }
        "setUnion" => {
            let [spill] = take::<1>(name, args)?;
            let mut items = into_items(state);
            for x in into_items(spill) {
                insert_unique(&mut items, x, collation);
            }
            Ok(Value::Array(items))
        }
        "aggFirstN" => {
            let [x] = take::<1>(name, args)?;
            let (mut items, n) = n_state(state)?;
            if items.len() < n {
                items.push(x);
            }
            Ok(make_n_state(items, n))
        }
        "aggLastN" => {
            let [x] = take::<1>(name, args)?;
            let (mut items, n) = n_state(state)?;
            items.push(x);
            if items.len() > n {
                items.remove(0);
            }
            Ok(make_n_state(items, n))
        }
        "aggFirstNMerge" => {
            let [spill] = take::<1>(name, args)?;
            let (mut items, n) = n_state(state)?;
            let (other, _) = n_state(spill)?;
            let room = n.saturating_sub(items.len());
            items.extend(other.into_iter().take(room));
            Ok(make_n_state(items, n))
        }
        "aggLastNMerge" => {
            let [spill] = take::<1>(name, args)?;
            let (mut items, n) = n_state(state)?;
            let (other, _) = n_state(spill)?;
            items.extend(other);
            let excess = items.len().saturating_sub(n);
            items.drain(..excess);
            Ok(make_n_state(items, n))
        }
        "aggTopN" | "aggBottomN" => {
            let [key, value, spec] = take::<3>(name, args)?;
            let (mut items, n) = n_state(state)?;
            let directions = sort_directions(&spec);
            insert_sorted(&mut items, Value::Array(vec![key, value]), &directions, collation);
            trim_sorted(&mut items, n, name == "aggTopN");
            Ok(make_n_state(items, n))
        }
        "aggTopNMerge" | "aggBottomNMerge" => {
            let [spill, spec] = take::<2>(name, args)?;
            let (mut items, n) = n_state(state)?;
            let (other, _) = n_state(spill)?;
            let directions = sort_directions(&spec);
            for item in other {
                insert_sorted(&mut items, item, &directions, collation);
            }
            trim_sorted(&mut items, n, name == "aggTopNMerge");
            Ok(make_n_state(items, n))
        }
        // Not an accumulator: any scalar builtin becomes "replace the state".
        other => call_builtin(other, args, collation),
    }
}

fn take<const N: usize>(name: &str, args: Vec<Value>) -> Result<[Value; N], SbeGroupError> {
    let len = args.len();
    args.try_into().map_err(|_| {
        SbeGroupError::InternalError(format!("aggregate {name} expects {N} arguments, got {len}"))
    })
}

fn into_items(state: Value) -> Vec<Value> {
    match state {
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}

fn insert_unique(items: &mut Vec<Value>, x: Value, collation: Option<Collation>) {
    if !items.iter().any(|v| values_equal(v, &x, collation)) {
        items.push(x);
    }
}

/// Initial `[[], n]` state for a bounded accumulator.
pub fn new_n_state(n: &Value) -> Result<Value, SbeGroupError> {
    match n.as_i64() {
        Some(n) if n > 0 => Ok(make_n_state(Vec::new(), n as usize)),
        _ => Err(SbeGroupError::execution(
            ErrorCode::BadValue,
            "'n' must be a positive integer",
        )),
    }
}

fn make_n_state(items: Vec<Value>, n: usize) -> Value {
    Value::Array(vec![Value::Array(items), Value::Int(n as i64)])
}

fn n_state(state: Value) -> Result<(Vec<Value>, usize), SbeGroupError> {
    if let Value::Array(mut parts) = state {
        if parts.len() == 2 {
            let n = parts[1].as_i64().filter(|n| *n > 0);
            if let (Some(n), Value::Array(items)) = (n, parts.swap_remove(0)) {
                return Ok((items, n as usize));
            }
        }
    }
    Err(SbeGroupError::InternalError(
        "bounded accumulator state must be [items, n]".into(),
    ))
}

fn sort_directions(spec: &Value) -> Vec<bool> {
    spec.as_object()
        .map(|doc| doc.iter().map(|(_, d)| d.as_i64().is_none_or(|d| d > 0)).collect())
        .unwrap_or_else(|| vec![true])
}

fn compare_sort_keys(a: &Value, b: &Value, directions: &[bool], collation: Option<Collation>) -> Ordering {
    let directed = |ord: Ordering, ascending: bool| if ascending { ord } else { ord.reverse() };
    if directions.len() <= 1 {
        let ascending = directions.first().copied().unwrap_or(true);
        return directed(compare_values(a, b, collation), ascending);
    }
    let (Some(xs), Some(ys)) = (a.as_array(), b.as_array()) else {
        return compare_values(a, b, collation);
    };
    for ((x, y), ascending) in xs.iter().zip(ys).zip(directions) {
        let ord = directed(compare_values(x, y, collation), *ascending);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn item_key(item: &Value) -> &Value {
    item.as_array().and_then(|pair| pair.first()).unwrap_or(&Value::Nothing)
}

/// Insert after every item whose key sorts at or before `item`'s key.
fn insert_sorted(
    items: &mut Vec<Value>,
    item: Value,
    directions: &[bool],
    collation: Option<Collation>,
) {
    let key = item_key(&item).clone();
    let pos = items.partition_point(|existing| {
        compare_sort_keys(item_key(existing), &key, directions, collation) != Ordering::Greater
    });
    items.insert(pos, item);
}

fn trim_sorted(items: &mut Vec<Value>, n: usize, keep_front: bool) {
    if keep_front {
        items.truncate(n);
    } else {
        let excess = items.len().saturating_sub(n);
        items.drain(..excess);
    }
}

pub fn finalize_n(state: Value) -> Result<Value, SbeGroupError> {
    let (items, _) = n_state(state)?;
    Ok(Value::Array(items))
}

pub fn finalize_top_n(state: Value) -> Result<Value, SbeGroupError> {
    let (items, _) = n_state(state)?;
    Ok(Value::Array(items.into_iter().map(item_value).collect()))
}

pub fn finalize_top(state: Value) -> Result<Value, SbeGroupError> {
    let (items, _) = n_state(state)?;
    Ok(items.into_iter().next().map(item_value).unwrap_or(Value::Null))
}

fn item_value(item: Value) -> Value {
    match item {
        Value::Array(mut pair) if pair.len() == 2 => pair.swap_remove(1),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold(name: &str, init: Value, inputs: &[Value]) -> Value {
        inputs.iter().fold(init, |state, x| {
            apply_agg(name, state, vec![x.clone()], None).unwrap()
        })
    }

    #[test]
    fn test_sum_ignores_non_numeric() {
        let s = fold(
            "sum",
            Value::Int(0),
            &[Value::Int(2), Value::str("x"), Value::Null, Value::Double(0.5)],
        );
        assert_eq!(s, Value::Double(2.5));
    }

    #[test]
    fn test_min_max_skip_nullish() {
        let inputs = [Value::Null, Value::Int(3), Value::Nothing, Value::Int(1)];
        assert_eq!(fold("min", Value::Nothing, &inputs), Value::Int(1));
        assert_eq!(fold("max", Value::Nothing, &inputs), Value::Int(3));
        assert_eq!(fold("min", Value::Nothing, &[Value::Null]), Value::Nothing);
    }

    #[test]
    fn test_first_keeps_explicit_null() {
        let inputs = [Value::Null, Value::Int(3)];
        assert_eq!(fold("first", Value::Nothing, &inputs), Value::Null);
        assert_eq!(fold("last", Value::Nothing, &inputs), Value::Int(3));
    }

    #[test]
    fn test_add_to_set_deduplicates() {
        let inputs = [Value::Int(1), Value::Double(1.0), Value::Int(2)];
        assert_eq!(
            fold("addToSet", Value::Array(vec![]), &inputs),
            Value::Array(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[test]
    fn test_first_n_and_last_n() {
        let init = new_n_state(&Value::Int(2)).unwrap();
        let inputs: Vec<Value> = (1..=4).map(Value::Int).collect();
        let first = fold("aggFirstN", init.clone(), &inputs);
        assert_eq!(
            finalize_n(first).unwrap(),
            Value::Array(vec![Value::Int(1), Value::Int(2)])
        );
        let last = fold("aggLastN", init, &inputs);
        assert_eq!(
            finalize_n(last).unwrap(),
            Value::Array(vec![Value::Int(3), Value::Int(4)])
        );
    }

    #[test]
    fn test_new_n_state_rejects_non_positive() {
        let err = new_n_state(&Value::Int(0)).unwrap_err();
        assert!(err.to_string().contains("positive integer"));
    }

    #[test]
    fn test_top_n_keeps_smallest_keys() {
        let spec = Value::object([("k", Value::Int(1))]);
        let mut state = new_n_state(&Value::Int(2)).unwrap();
        for (k, v) in [(5, "e"), (1, "a"), (3, "c")] {
            state = apply_agg(
                "aggTopN",
                state,
                vec![Value::Int(k), Value::str(v), spec.clone()],
                None,
            )
            .unwrap();
        }
        assert_eq!(
            finalize_top_n(state.clone()).unwrap(),
            Value::Array(vec![Value::str("a"), Value::str("c")])
        );
        assert_eq!(finalize_top(state).unwrap(), Value::str("a"));
    }

    #[test]
    fn test_bottom_n_descending_spec() {
        let spec = Value::object([("k", Value::Int(-1))]);
        let mut state = new_n_state(&Value::Int(1)).unwrap();
        for k in [2, 9, 4] {
            state = apply_agg(
                "aggBottomN",
                state,
                vec![Value::Int(k), Value::Int(k * 10), spec.clone()],
                None,
            )
            .unwrap();
        }
        // Descending order puts 2 last.
        assert_eq!(finalize_top(state).unwrap(), Value::Int(20));
    }

    #[test]
    fn test_top_n_merge_matches_single_pass() {
        let spec = Value::object([("k", Value::Int(1))]);
        let step = |state: Value, k: i64| {
            apply_agg("aggTopN", state, vec![Value::Int(k), Value::Int(k), spec.clone()], None)
                .unwrap()
        };
        let init = new_n_state(&Value::Int(3)).unwrap();
        let a = [7, 2, 9].into_iter().fold(init.clone(), step);
        let b = [1, 8].into_iter().fold(init.clone(), step);
        let merged = apply_agg("aggTopNMerge", a, vec![b, spec.clone()], None).unwrap();
        let single = [7, 2, 9, 1, 8].into_iter().fold(init, step);
        assert_eq!(finalize_top_n(merged).unwrap(), finalize_top_n(single).unwrap());
    }

    #[test]
    fn test_block_agg_honours_bitmap() {
        let bitmap = Value::Block(vec![Value::Bool(true), Value::Bool(false), Value::Bool(true)]);
        let data = Value::Block(vec![Value::Int(1), Value::Int(100), Value::Int(2)]);
        let state = apply_block_agg("sum", Value::Int(0), &bitmap, vec![data], None).unwrap();
        assert_eq!(state, Value::Int(3));
    }
}
