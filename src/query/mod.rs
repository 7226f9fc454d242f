//! Logical query representation consumed by the stage builder.
//!
//! A plan is a tree of [`QuerySolutionNode`]s. Group nodes carry MQL
//! [`Expression`]s for their key and accumulator arguments, parsed from the
//! JSON form of a `$group` stage.

pub mod expression;
pub mod group_node;
pub mod plan;
pub mod sort_pattern;

pub use expression::{DepsTracker, ExprOp, Expression, FieldPath, Variable};
pub use group_node::{AccumulationExpression, AccumulationStatement, AccumulatorOp, GroupNode};
pub use plan::{BlockScanOptions, NodeId, QuerySolutionNode, VirtualScanNode};
pub use sort_pattern::{SortPattern, SortPatternPart};
