//! The logical `$group` node and its accumulation statements.

use std::collections::BTreeSet;

use serde_json::Value as Json;

use crate::error::SbeGroupError;
use crate::query::{DepsTracker, Expression, NodeId, QuerySolutionNode, SortPattern};
use crate::value::Value;

/// Accumulator operator tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccumulatorOp {
    Sum,
    Avg,
    Min,
    Max,
    First,
    Last,
    Push,
    AddToSet,
    FirstN,
    LastN,
    TopN,
    BottomN,
    Top,
    Bottom,
}

impl AccumulatorOp {
    pub fn name(self) -> &'static str {
        match self {
            AccumulatorOp::Sum => "$sum",
            AccumulatorOp::Avg => "$avg",
            AccumulatorOp::Min => "$min",
            AccumulatorOp::Max => "$max",
            AccumulatorOp::First => "$first",
            AccumulatorOp::Last => "$last",
            AccumulatorOp::Push => "$push",
            AccumulatorOp::AddToSet => "$addToSet",
            AccumulatorOp::FirstN => "$firstN",
            AccumulatorOp::LastN => "$lastN",
            AccumulatorOp::TopN => "$topN",
            AccumulatorOp::BottomN => "$bottomN",
            AccumulatorOp::Top => "$top",
            AccumulatorOp::Bottom => "$bottom",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let op = match name {
            "$sum" => AccumulatorOp::Sum,
            "$avg" => AccumulatorOp::Avg,
            "$min" => AccumulatorOp::Min,
            "$max" => AccumulatorOp::Max,
            "$first" => AccumulatorOp::First,
            "$last" => AccumulatorOp::Last,
            "$push" => AccumulatorOp::Push,
            "$addToSet" => AccumulatorOp::AddToSet,
            "$firstN" => AccumulatorOp::FirstN,
            "$lastN" => AccumulatorOp::LastN,
            "$topN" => AccumulatorOp::TopN,
            "$bottomN" => AccumulatorOp::BottomN,
            "$top" => AccumulatorOp::Top,
            "$bottom" => AccumulatorOp::Bottom,
            _ => return None,
        };
        Some(op)
    }

    /// `$top`, `$bottom`, `$topN`, `$bottomN`.
    pub fn is_top_bottom_n(self) -> bool {
        matches!(
            self,
            AccumulatorOp::TopN | AccumulatorOp::BottomN | AccumulatorOp::Top | AccumulatorOp::Bottom
        )
    }

    /// Accumulators that keep a bounded collection sized by `n`.
    pub fn is_n_accumulator(self) -> bool {
        self.is_top_bottom_n() || matches!(self, AccumulatorOp::FirstN | AccumulatorOp::LastN)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccumulationExpression {
    pub op: AccumulatorOp,
    pub argument: Expression,
    /// Evaluated once per group against the group key (e.g. `n`).
    pub initializer: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccumulationStatement {
    pub field_name: String,
    pub expr: AccumulationExpression,
    pub sort_pattern: Option<SortPattern>,
}

impl AccumulationStatement {
    pub fn new(field_name: &str, op: AccumulatorOp, argument: Expression) -> Self {
        AccumulationStatement {
            field_name: field_name.to_string(),
            expr: AccumulationExpression {
                op,
                argument,
                initializer: None,
            },
            sort_pattern: None,
        }
    }

    pub fn with_initializer(mut self, initializer: Expression) -> Self {
        self.expr.initializer = Some(initializer);
        self
    }

    pub fn with_sort_pattern(mut self, pattern: SortPattern) -> Self {
        self.sort_pattern = Some(pattern);
        self
    }

    /// Parse `{"$op": <argument>}` for the output field `field_name`.
    pub fn parse(field_name: &str, json: &Json) -> Result<Self, SbeGroupError> {
        let Some((name, arg)) = json.as_object().filter(|m| m.len() == 1).and_then(|m| m.iter().next())
        else {
            return Err(SbeGroupError::QueryParseError(format!(
                "the field '{field_name}' must specify one accumulator"
            )));
        };

        if name == "$count" {
            if arg.as_object().is_none_or(|m| !m.is_empty()) {
                return Err(SbeGroupError::QueryParseError(
                    "$count takes no arguments, i.e. $count: {}".into(),
                ));
            }
            return Ok(Self::new(field_name, AccumulatorOp::Sum, Expression::constant(1i64)));
        }

        let op = AccumulatorOp::from_name(name).ok_or_else(|| {
            SbeGroupError::QueryParseError(format!("unknown group operator '{name}'"))
        })?;

        let stmt = match op {
            AccumulatorOp::FirstN | AccumulatorOp::LastN => {
                let input = required_arg(name, arg, "input")?;
                let n = required_arg(name, arg, "n")?;
                Self::new(field_name, op, Expression::parse(input)?)
                    .with_initializer(Expression::parse(n)?)
            }
            AccumulatorOp::TopN | AccumulatorOp::BottomN | AccumulatorOp::Top | AccumulatorOp::Bottom => {
                let output = required_arg(name, arg, "output")?;
                let sort_by = required_arg(name, arg, "sortBy")?;
                let n = match op {
                    AccumulatorOp::TopN | AccumulatorOp::BottomN => {
                        Expression::parse(required_arg(name, arg, "n")?)?
                    }
                    _ => Expression::constant(1i64),
                };
                let argument =
                    Expression::Object(vec![("output".to_string(), Expression::parse(output)?)]);
                Self::new(field_name, op, argument)
                    .with_initializer(n)
                    .with_sort_pattern(SortPattern::parse(sort_by)?)
            }
            _ => Self::new(field_name, op, Expression::parse(arg)?),
        };
        if let Some(n) = constant_n(&stmt) {
            if !n.as_i64().is_some_and(|n| n > 0) {
                return Err(SbeGroupError::QueryParseError(format!(
                    "{name}: 'n' must be a positive integer, found {n}"
                )));
            }
        }
        Ok(stmt)
    }

    pub fn add_dependencies(&self, deps: &mut DepsTracker) {
        self.expr.argument.add_dependencies(deps);
        if let Some(pattern) = &self.sort_pattern {
            for part in pattern.parts() {
                deps.fields.insert(part.dotted());
            }
        }
    }

    /// Whether the initializer must be evaluated per group at runtime.
    pub fn has_variable_initializer(&self) -> bool {
        self.expr
            .initializer
            .as_ref()
            .is_some_and(|e| !e.is_constant())
    }
}

fn required_arg<'a>(op: &str, arg: &'a Json, key: &str) -> Result<&'a Json, SbeGroupError> {
    arg.as_object()
        .and_then(|m| m.get(key))
        .ok_or_else(|| SbeGroupError::QueryParseError(format!("{op} requires '{key}'")))
}

#[derive(Debug, Clone)]
pub struct GroupNode {
    pub node_id: NodeId,
    pub group_by_expression: Expression,
    pub accumulators: Vec<AccumulationStatement>,
    /// The whole input document is read by some expression.
    pub need_whole_document: bool,
    /// Downstream will combine this node's output with other partials.
    pub will_be_merged: bool,
    /// The result object must be materialized in the external format.
    pub should_produce_bson: bool,
    /// Dotted paths read by the key and argument expressions.
    pub required_fields: BTreeSet<String>,
    pub child: Box<QuerySolutionNode>,
}

impl GroupNode {
    pub fn new(
        node_id: NodeId,
        child: impl Into<QuerySolutionNode>,
        group_by_expression: Expression,
        accumulators: Vec<AccumulationStatement>,
    ) -> Result<Self, SbeGroupError> {
        let mut seen = BTreeSet::new();
        for acc in &accumulators {
            if acc.field_name == "_id" || acc.field_name.contains('.') || acc.field_name.starts_with('$') {
                return Err(SbeGroupError::QueryParseError(format!(
                    "invalid group output field name '{}'",
                    acc.field_name
                )));
            }
            if !seen.insert(acc.field_name.as_str()) {
                return Err(SbeGroupError::QueryParseError(format!(
                    "duplicate group output field '{}'",
                    acc.field_name
                )));
            }
        }

        let mut deps = DepsTracker::default();
        group_by_expression.add_dependencies(&mut deps);
        for acc in &accumulators {
            acc.add_dependencies(&mut deps);
        }

        Ok(GroupNode {
            node_id,
            group_by_expression,
            accumulators,
            need_whole_document: deps.need_whole_document,
            will_be_merged: false,
            should_produce_bson: false,
            required_fields: deps.fields,
            child: Box::new(child.into()),
        })
    }

    /// Parse a `$group` specification such as
    /// `{"_id": "$a", "total": {"$sum": "$b"}}`.
    pub fn parse(
        node_id: NodeId,
        child: impl Into<QuerySolutionNode>,
        spec: &Json,
    ) -> Result<Self, SbeGroupError> {
        let Json::Object(map) = spec else {
            return Err(SbeGroupError::QueryParseError(
                "a group specification must be an object".into(),
            ));
        };
        let id = map.get("_id").ok_or_else(|| {
            SbeGroupError::QueryParseError("a group specification must include an _id".into())
        })?;
        let group_by = Expression::parse(id)?;
        let accumulators = map
            .iter()
            .filter(|(k, _)| k.as_str() != "_id")
            .map(|(k, v)| AccumulationStatement::parse(k, v))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(node_id, child, group_by, accumulators)
    }

    pub fn with_will_be_merged(mut self, will_be_merged: bool) -> Self {
        self.will_be_merged = will_be_merged;
        self
    }

    pub fn with_bson_output(mut self, should_produce_bson: bool) -> Self {
        self.should_produce_bson = should_produce_bson;
        self
    }

    /// `_id` followed by every accumulator field, in declaration order.
    pub fn output_field_names(&self) -> Vec<&str> {
        std::iter::once("_id")
            .chain(self.accumulators.iter().map(|a| a.field_name.as_str()))
            .collect()
    }

    /// The group key, when it is an object literal.
    pub fn id_object_fields(&self) -> Option<&[(String, Expression)]> {
        match &self.group_by_expression {
            Expression::Object(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn has_variable_group_init(&self) -> bool {
        self.accumulators
            .iter()
            .any(AccumulationStatement::has_variable_initializer)
    }
}

/// The literal `n` of an N-accumulator, when it is a constant.
pub fn constant_n(stmt: &AccumulationStatement) -> Option<&Value> {
    match &stmt.expr.initializer {
        Some(Expression::Constant(v)) => Some(v),
        _ => None,
    }
}
