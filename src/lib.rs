//! `$group` lowering for a slot-based execution engine.
//!
//! This crate compiles an MQL `$group` node into a tree of physical plan
//! stages that read and write numbered slots. When the child stage
//! delivers columnar blocks, the group is compiled to a block hash
//! aggregation; otherwise, or when any part of the group has no block
//! form, it is compiled for rows.
//!
//! # Layers
//!
//! - [`query`]: the logical input, `GroupNode` and its expressions.
//! - [`stage_builder`]: the lowering itself.
//! - [`accumulator`]: per-operator code generation.
//! - [`sbe`]: slots, expressions and stages of the physical plan.
//! - [`exec`]: a reference interpreter for built plans, including the
//!   spill and merge paths of hash aggregation.

pub mod accumulator;
pub mod config;
pub mod error;
pub mod exec;
pub mod query;
pub mod sbe;
pub mod stage_builder;
pub mod value;

pub use config::{BuilderConfig, Collation};
pub use error::{ErrorCode, SbeGroupError, SbeGroupErrorKind};
pub use query::{GroupNode, QuerySolutionNode, VirtualScanNode};
pub use stage_builder::reqs::{PlanStageReqs, PlanStageSlots, SlotName};
pub use stage_builder::{CompiledPlan, StageBuilder};
pub use value::Value;
