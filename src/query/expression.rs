//! MQL aggregation expressions.
//!
//! Expressions are parsed from their JSON form:
//! - `"$a.b"` is a field path relative to the current document,
//! - `"$$ROOT"`, `"$$CURRENT.x"` and `"$$name"` are variable references,
//! - `{"$op": [args...]}` is an operator call (`$literal` quotes a value),
//! - any other object or array is an object/array literal expression,
//! - everything else is a constant.

use std::collections::BTreeSet;
use std::fmt;

use serde_json::Value as Json;

use crate::error::SbeGroupError;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Variable {
    Current,
    Root,
    User(String),
}

impl Variable {
    pub fn name(&self) -> &str {
        match self {
            Variable::Current => "CURRENT",
            Variable::Root => "ROOT",
            Variable::User(name) => name,
        }
    }
}

/// A variable plus a (possibly empty) dotted path below it.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPath {
    pub variable: Variable,
    pub path: Vec<String>,
}

impl FieldPath {
    /// A path relative to the current document, e.g. `"a.b"`.
    pub fn current(dotted: &str) -> Self {
        FieldPath {
            variable: Variable::Current,
            path: dotted.split('.').map(str::to_string).collect(),
        }
    }

    /// Parse the text of a `$`-prefixed string expression.
    pub fn parse(text: &str) -> Result<Self, SbeGroupError> {
        let (variable, rest) = if let Some(var_text) = text.strip_prefix("$$") {
            let (name, rest) = match var_text.split_once('.') {
                Some((name, rest)) => (name, Some(rest)),
                None => (var_text, None),
            };
            let variable = match name {
                "CURRENT" => Variable::Current,
                "ROOT" => Variable::Root,
                "" => {
                    return Err(SbeGroupError::QueryParseError(format!(
                        "empty variable name in '{text}'"
                    )));
                }
                other => Variable::User(other.to_string()),
            };
            (variable, rest)
        } else if let Some(path_text) = text.strip_prefix('$') {
            (Variable::Current, Some(path_text))
        } else {
            return Err(SbeGroupError::QueryParseError(format!(
                "field path must start with '$': '{text}'"
            )));
        };

        let path: Vec<String> = match rest {
            Some(rest) => rest.split('.').map(str::to_string).collect(),
            None => Vec::new(),
        };
        if path.iter().any(|p| p.is_empty()) {
            return Err(SbeGroupError::QueryParseError(format!(
                "empty field name in path '{text}'"
            )));
        }
        Ok(FieldPath { variable, path })
    }

    /// Number of components including the leading variable.
    pub fn path_length(&self) -> usize {
        1 + self.path.len()
    }

    pub fn is_variable_reference(&self) -> bool {
        matches!(self.variable, Variable::User(_))
    }

    /// The dotted path below the variable, without any `CURRENT.` prefix.
    pub fn dotted(&self) -> String {
        self.path.join(".")
    }

    pub fn top_level_field(&self) -> Option<&str> {
        self.path.first().map(String::as_str)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.variable, self.path.is_empty()) {
            (Variable::Current, false) => write!(f, "${}", self.dotted()),
            (var, true) => write!(f, "$${}", var.name()),
            (var, false) => write!(f, "$${}.{}", var.name(), self.dotted()),
        }
    }
}

/// Operators understood by the expression compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Concat,
    ToLower,
    ToUpper,
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    And,
    Or,
    Not,
    Cond,
    IfNull,
    IsArray,
    Size,
}

impl ExprOp {
    pub fn name(self) -> &'static str {
        match self {
            ExprOp::Add => "$add",
            ExprOp::Subtract => "$subtract",
            ExprOp::Multiply => "$multiply",
            ExprOp::Divide => "$divide",
            ExprOp::Concat => "$concat",
            ExprOp::ToLower => "$toLower",
            ExprOp::ToUpper => "$toUpper",
            ExprOp::Eq => "$eq",
            ExprOp::Ne => "$ne",
            ExprOp::Gt => "$gt",
            ExprOp::Gte => "$gte",
            ExprOp::Lt => "$lt",
            ExprOp::Lte => "$lte",
            ExprOp::And => "$and",
            ExprOp::Or => "$or",
            ExprOp::Not => "$not",
            ExprOp::Cond => "$cond",
            ExprOp::IfNull => "$ifNull",
            ExprOp::IsArray => "$isArray",
            ExprOp::Size => "$size",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let op = match name {
            "$add" => ExprOp::Add,
            "$subtract" => ExprOp::Subtract,
            "$multiply" => ExprOp::Multiply,
            "$divide" => ExprOp::Divide,
            "$concat" => ExprOp::Concat,
            "$toLower" => ExprOp::ToLower,
            "$toUpper" => ExprOp::ToUpper,
            "$eq" => ExprOp::Eq,
            "$ne" => ExprOp::Ne,
            "$gt" => ExprOp::Gt,
            "$gte" => ExprOp::Gte,
            "$lt" => ExprOp::Lt,
            "$lte" => ExprOp::Lte,
            "$and" => ExprOp::And,
            "$or" => ExprOp::Or,
            "$not" => ExprOp::Not,
            "$cond" => ExprOp::Cond,
            "$ifNull" => ExprOp::IfNull,
            "$isArray" => ExprOp::IsArray,
            "$size" => ExprOp::Size,
            _ => return None,
        };
        Some(op)
    }

    /// Accepted argument count range (inclusive).
    fn arity(self) -> (usize, usize) {
        match self {
            ExprOp::Subtract | ExprOp::Divide => (2, 2),
            ExprOp::Eq | ExprOp::Ne | ExprOp::Gt | ExprOp::Gte | ExprOp::Lt | ExprOp::Lte => {
                (2, 2)
            }
            ExprOp::IfNull => (2, 2),
            ExprOp::Cond => (3, 3),
            ExprOp::ToLower | ExprOp::ToUpper | ExprOp::Not | ExprOp::IsArray | ExprOp::Size => {
                (1, 1)
            }
            ExprOp::Add | ExprOp::Multiply | ExprOp::Concat | ExprOp::And | ExprOp::Or => {
                (0, usize::MAX)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Constant(Value),
    FieldPath(FieldPath),
    /// Object literal; field order is significant.
    Object(Vec<(String, Expression)>),
    Array(Vec<Expression>),
    Op { op: ExprOp, args: Vec<Expression> },
}

impl Expression {
    pub fn parse(json: &Json) -> Result<Expression, SbeGroupError> {
        match json {
            Json::String(s) if s.starts_with('$') => Ok(Expression::FieldPath(FieldPath::parse(s)?)),
            Json::Array(items) => Ok(Expression::Array(
                items.iter().map(Expression::parse).collect::<Result<_, _>>()?,
            )),
            Json::Object(map) => {
                let operator_keys = map.keys().filter(|k| k.starts_with('$')).count();
                if operator_keys == 0 {
                    let fields = map
                        .iter()
                        .map(|(k, v)| Ok((k.clone(), Expression::parse(v)?)))
                        .collect::<Result<_, SbeGroupError>>()?;
                    return Ok(Expression::Object(fields));
                }
                if map.len() != 1 {
                    return Err(SbeGroupError::QueryParseError(
                        "an expression object must have exactly one operator field".into(),
                    ));
                }
                let Some((name, arg)) = map.iter().next() else {
                    return Err(SbeGroupError::QueryParseError("empty expression".into()));
                };
                Self::parse_operator(name, arg)
            }
            other => Ok(Expression::Constant(Value::from_json(other))),
        }
    }

    fn parse_operator(name: &str, arg: &Json) -> Result<Expression, SbeGroupError> {
        if name == "$literal" {
            return Ok(Expression::Constant(Value::from_json(arg)));
        }
        let op = ExprOp::from_name(name).ok_or_else(|| {
            SbeGroupError::QueryParseError(format!("unrecognized expression operator '{name}'"))
        })?;

        let args = match (op, arg) {
            (ExprOp::Cond, Json::Object(map)) => {
                let part = |key: &str| {
                    map.get(key).ok_or_else(|| {
                        SbeGroupError::QueryParseError(format!("$cond is missing '{key}'"))
                    })
                };
                vec![
                    Expression::parse(part("if")?)?,
                    Expression::parse(part("then")?)?,
                    Expression::parse(part("else")?)?,
                ]
            }
            (_, Json::Array(items)) => items
                .iter()
                .map(Expression::parse)
                .collect::<Result<_, _>>()?,
            (_, single) => vec![Expression::parse(single)?],
        };

        let (min, max) = op.arity();
        if args.len() < min || args.len() > max {
            return Err(SbeGroupError::QueryParseError(format!(
                "{name} does not accept {} arguments",
                args.len()
            )));
        }
        Ok(Expression::Op { op, args })
    }

    /// Field path relative to the current document.
    pub fn field(dotted: &str) -> Expression {
        Expression::FieldPath(FieldPath::current(dotted))
    }

    pub fn constant(value: impl Into<Value>) -> Expression {
        Expression::Constant(value.into())
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Expression::Constant(_))
    }

    pub fn walk_field_paths(&self, f: &mut impl FnMut(&FieldPath)) {
        match self {
            Expression::Constant(_) => {}
            Expression::FieldPath(fp) => f(fp),
            Expression::Object(fields) => {
                for (_, e) in fields {
                    e.walk_field_paths(f);
                }
            }
            Expression::Array(items) | Expression::Op { args: items, .. } => {
                for e in items {
                    e.walk_field_paths(f);
                }
            }
        }
    }

    pub fn add_dependencies(&self, deps: &mut DepsTracker) {
        self.walk_field_paths(&mut |fp| match fp.variable {
            Variable::User(_) => {}
            Variable::Current | Variable::Root => {
                if fp.path.is_empty() {
                    deps.need_whole_document = true;
                } else {
                    deps.fields.insert(fp.dotted());
                }
            }
        });
    }
}

/// Fields (and whole-document access) an expression tree reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DepsTracker {
    pub fields: BTreeSet<String>,
    pub need_whole_document: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_field_paths() {
        let e = Expression::parse(&json!("$a.b")).unwrap();
        let Expression::FieldPath(fp) = e else {
            panic!("expected field path");
        };
        assert_eq!(fp.variable, Variable::Current);
        assert_eq!(fp.path_length(), 3);
        assert_eq!(fp.dotted(), "a.b");
        assert_eq!(fp.to_string(), "$a.b");
    }

    #[test]
    fn test_parse_variables() {
        let root = FieldPath::parse("$$ROOT").unwrap();
        assert_eq!(root.variable, Variable::Root);
        assert_eq!(root.path_length(), 1);

        let user = FieldPath::parse("$$limit.x").unwrap();
        assert!(user.is_variable_reference());
        assert_eq!(user.to_string(), "$$limit.x");

        assert!(FieldPath::parse("$a..b").is_err());
        assert!(FieldPath::parse("a").is_err());
    }

    #[test]
    fn test_parse_operators() {
        let e = Expression::parse(&json!({"$add": ["$a", 1]})).unwrap();
        assert_eq!(
            e,
            Expression::Op {
                op: ExprOp::Add,
                args: vec![Expression::field("a"), Expression::constant(1i64)],
            }
        );
        let cond = Expression::parse(&json!({"$cond": {"if": true, "then": 1, "else": 2}}))
            .unwrap();
        assert!(matches!(cond, Expression::Op { op: ExprOp::Cond, ref args } if args.len() == 3));
        let single = Expression::parse(&json!({"$toLower": "$name"})).unwrap();
        assert!(matches!(single, Expression::Op { op: ExprOp::ToLower, .. }));
    }

    #[test]
    fn test_parse_rejects_bad_operators() {
        assert!(Expression::parse(&json!({"$nope": 1})).is_err());
        assert!(Expression::parse(&json!({"$subtract": [1]})).is_err());
        assert!(Expression::parse(&json!({"$add": 1, "x": 2})).is_err());
    }

    #[test]
    fn test_literal_and_object_literal() {
        assert_eq!(
            Expression::parse(&json!({"$literal": "$notAPath"})).unwrap(),
            Expression::Constant(Value::str("$notAPath"))
        );
        let obj = Expression::parse(&json!({"k1": "$a", "k2": 3})).unwrap();
        let Expression::Object(fields) = obj else {
            panic!("expected object");
        };
        assert_eq!(fields[0].0, "k1");
        assert_eq!(fields[1].1, Expression::constant(3i64));
    }

    #[test]
    fn test_dependencies() {
        let e = Expression::parse(&json!({"$add": ["$a.b", "$$ROOT", "$$v.c", "$d"]})).unwrap();
        let mut deps = DepsTracker::default();
        e.add_dependencies(&mut deps);
        assert!(deps.need_whole_document);
        assert_eq!(
            deps.fields.iter().cloned().collect::<Vec<_>>(),
            vec!["a.b".to_string(), "d".to_string()]
        );
    }
}
