//! Slot-based execution primitives: slots, expressions, stages and the
//! function library they call into.

pub mod agg;
pub mod env;
pub mod eval;
pub mod expr;
pub mod stage;
pub mod types;

pub use env::{RuntimeEnvironment, SlotRow};
pub use expr::SbExpr;
pub use stage::{BlockScan, PlanStage, SbAggExpr};
pub use types::{IdGenerator, SbSlot, SlotId, TypeSignature};
