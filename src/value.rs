//! Runtime value model.
//!
//! [`Value`] is what slots hold while a pipeline runs. It distinguishes a
//! missing value ([`Value::Nothing`]) from an explicit `null`, keeps object
//! fields in insertion order, and has a columnar [`Value::Block`] variant
//! used by block-mode stages.
//!
//! Comparison follows the canonical cross-type order
//! `Nothing < Null < numbers < strings < objects < arrays < booleans`, with
//! integers and doubles compared numerically. Hashing is consistent with
//! that comparison: an integral double hashes like the equal integer, and a
//! case-insensitive collation hashes strings by their lowercase form.

use std::cmp::Ordering;
use std::fmt;

use serde_json::{Map, Number, Value as Json};
use xxhash_rust::xxh3::Xxh3;

use crate::config::Collation;

/// An ordered set of named fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let mut doc = Document::new();
        for (name, value) in pairs {
            doc.insert(name, value);
        }
        doc
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Insert a field, replacing the value of an existing field in place.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Copy of this document without fields holding [`Value::Nothing`].
    pub fn without_missing(&self) -> Document {
        Document {
            fields: self
                .fields
                .iter()
                .filter(|(_, v)| !v.is_nothing())
                .cloned()
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absence of a value (a missing field).
    #[default]
    Nothing,
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    Array(Vec<Value>),
    Object(Document),
    /// A column of values processed together by block-mode stages.
    Block(Vec<Value>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    pub fn object<I, S>(pairs: I) -> Value
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        Value::Object(Document::from_pairs(pairs))
    }

    pub fn empty_object() -> Value {
        Value::Object(Document::new())
    }

    pub fn is_nothing(&self) -> bool {
        matches!(self, Value::Nothing)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Nothing | Value::Null)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Double(_))
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    pub fn is_block(&self) -> bool {
        matches!(self, Value::Block(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Double(d) if d.fract() == 0.0 && d.abs() < 9.0e15 => Some(*d as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Document> {
        match self {
            Value::Object(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<&[Value]> {
        match self {
            Value::Block(items) => Some(items),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nothing => "missing",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "long",
            Value::Double(_) => "double",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Block(_) => "block",
        }
    }

    fn canonical_rank(&self) -> u8 {
        match self {
            Value::Nothing => 0,
            Value::Null => 1,
            Value::Int(_) | Value::Double(_) => 2,
            Value::Str(_) => 3,
            Value::Object(_) => 4,
            Value::Array(_) => 5,
            Value::Bool(_) => 6,
            Value::Block(_) => 7,
        }
    }

    /// Field lookup. Anything other than an object yields `Nothing`.
    pub fn get_field(&self, name: &str) -> Value {
        match self {
            Value::Object(doc) => doc.get(name).cloned().unwrap_or(Value::Nothing),
            _ => Value::Nothing,
        }
    }

    /// Dotted-path traversal with implicit array traversal.
    ///
    /// Arrays encountered along the way are mapped over their object
    /// elements; elements that do not yield a value are skipped.
    pub fn traverse(&self, path: &[&str]) -> Value {
        let Some((head, _)) = path.split_first() else {
            return self.clone();
        };
        match self {
            Value::Object(doc) => match doc.get(head) {
                Some(v) => v.traverse(&path[1..]),
                None => Value::Nothing,
            },
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .filter(|v| v.is_object())
                    .map(|v| v.traverse(path))
                    .filter(|v| !v.is_nothing())
                    .collect(),
            ),
            _ => Value::Nothing,
        }
    }

    // ── JSON conversion ─────────────────────────────────────────────────

    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::Str(s.clone()),
            Json::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => Value::Object(Document {
                fields: map
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            }),
        }
    }

    /// Convert to JSON. Missing object fields are omitted; a top-level
    /// `Nothing` becomes `null`.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Nothing | Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::Number(Number::from(*i)),
            Value::Double(d) => Number::from_f64(*d).map(Json::Number).unwrap_or(Json::Null),
            Value::Str(s) => Json::String(s.clone()),
            Value::Array(items) | Value::Block(items) => {
                Json::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(doc) => {
                let mut map = Map::new();
                for (name, value) in doc.iter() {
                    if !value.is_nothing() {
                        map.insert(name.to_string(), value.to_json());
                    }
                }
                Json::Object(map)
            }
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nothing => write!(f, "Nothing"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Double(d) => write!(f, "{d:?}"),
            Value::Str(s) => write!(f, "\"{s}\""),
            Value::Array(items) => {
                write!(f, "[")?;
                write_list(f, items)?;
                write!(f, "]")
            }
            Value::Block(items) => {
                write!(f, "block[")?;
                write_list(f, items)?;
                write!(f, "]")
            }
            Value::Object(doc) => {
                write!(f, "{{")?;
                for (i, (name, value)) in doc.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name} : {value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

// ── Comparison ──────────────────────────────────────────────────────────

/// Total order over values, honouring the given collation for strings.
pub fn compare_values(a: &Value, b: &Value, collation: Option<Collation>) -> Ordering {
    let rank = a.canonical_rank().cmp(&b.canonical_rank());
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (x, y) if x.is_number() => {
            compare_doubles(x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0))
        }
        (Value::Str(x), Value::Str(y)) => compare_strings(x, y, collation),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Object(x), Value::Object(y)) => {
            for ((xn, xv), (yn, yv)) in x.iter().zip(y.iter()) {
                let ord = xn
                    .cmp(yn)
                    .then_with(|| compare_values(xv, yv, collation));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Array(x), Value::Array(y)) | (Value::Block(x), Value::Block(y)) => {
            for (xv, yv) in x.iter().zip(y.iter()) {
                let ord = compare_values(xv, yv, collation);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}

pub fn values_equal(a: &Value, b: &Value, collation: Option<Collation>) -> bool {
    compare_values(a, b, collation) == Ordering::Equal
}

fn compare_doubles(x: f64, y: f64) -> Ordering {
    // NaN sorts below every other number and equals itself.
    match (x.is_nan(), y.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
    }
}

fn compare_strings(x: &str, y: &str, collation: Option<Collation>) -> Ordering {
    match collation {
        Some(Collation::CaseInsensitive) => x.to_lowercase().cmp(&y.to_lowercase()),
        _ => x.cmp(y),
    }
}

// ── Hashing ─────────────────────────────────────────────────────────────

/// Hash a composite group key.
pub fn hash_key(values: &[Value], collation: Option<Collation>) -> u64 {
    let mut hasher = Xxh3::new();
    hasher.update(&(values.len() as u64).to_le_bytes());
    for value in values {
        hash_value_into(value, collation, &mut hasher);
    }
    hasher.digest()
}

fn hash_value_into(value: &Value, collation: Option<Collation>, hasher: &mut Xxh3) {
    hasher.update(&[value.canonical_rank()]);
    match value {
        Value::Nothing | Value::Null => {}
        Value::Bool(b) => hasher.update(&[*b as u8]),
        Value::Int(i) => hasher.update(&i.to_le_bytes()),
        Value::Double(d) => match value.as_i64() {
            Some(i) => hasher.update(&i.to_le_bytes()),
            None if d.is_nan() => hasher.update(b"nan"),
            None => hasher.update(&d.to_bits().to_le_bytes()),
        },
        Value::Str(s) => match collation {
            Some(Collation::CaseInsensitive) => hasher.update(s.to_lowercase().as_bytes()),
            _ => hasher.update(s.as_bytes()),
        },
        Value::Object(doc) => {
            hasher.update(&(doc.len() as u64).to_le_bytes());
            for (name, v) in doc.iter() {
                hasher.update(name.as_bytes());
                hasher.update(&[0]);
                hash_value_into(v, collation, hasher);
            }
        }
        Value::Array(items) | Value::Block(items) => {
            hasher.update(&(items.len() as u64).to_le_bytes());
            for v in items {
                hash_value_into(v, collation, hasher);
            }
        }
    }
}

// ── Arithmetic ──────────────────────────────────────────────────────────

/// Numeric addition; integer overflow widens to double.
pub fn add_numbers(a: &Value, b: &Value) -> Option<Value> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(
            x.checked_add(*y)
                .map(Value::Int)
                .unwrap_or(Value::Double(*x as f64 + *y as f64)),
        ),
        _ => Some(Value::Double(a.as_f64()? + b.as_f64()?)),
    }
}

pub fn subtract_numbers(a: &Value, b: &Value) -> Option<Value> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(
            x.checked_sub(*y)
                .map(Value::Int)
                .unwrap_or(Value::Double(*x as f64 - *y as f64)),
        ),
        _ => Some(Value::Double(a.as_f64()? - b.as_f64()?)),
    }
}

pub fn multiply_numbers(a: &Value, b: &Value) -> Option<Value> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(
            x.checked_mul(*y)
                .map(Value::Int)
                .unwrap_or(Value::Double(*x as f64 * *y as f64)),
        ),
        _ => Some(Value::Double(a.as_f64()? * b.as_f64()?)),
    }
}
