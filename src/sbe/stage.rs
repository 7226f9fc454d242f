//! Physical plan stages.
//!
//! A [`PlanStage`] tree is the output of the stage builder and the input
//! of [`crate::exec`]. Its `Display` impl renders a top-down explain in
//! the indented `[node] stage ...` form used by tests and debug logging.

use std::fmt;

use crate::query::NodeId;
use crate::sbe::{SbExpr, SlotId};
use crate::value::Value;

/// One accumulator inside an aggregation stage.
///
/// `init` seeds the state of a new group, `agg` folds one row into it and
/// `block_agg`, when present, folds a whole selected block at once.
#[derive(Debug, Clone, PartialEq)]
pub struct SbAggExpr {
    pub init: Option<SbExpr>,
    pub block_agg: Option<SbExpr>,
    pub agg: SbExpr,
}

impl SbAggExpr {
    pub fn new(init: Option<SbExpr>, agg: SbExpr) -> Self {
        SbAggExpr {
            init,
            block_agg: None,
            agg,
        }
    }

    pub fn with_block_agg(mut self, block_agg: SbExpr) -> Self {
        self.block_agg = Some(block_agg);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanStage {
    /// Emits a fixed list of documents, as rows or as blocks.
    VirtualScan {
        node_id: NodeId,
        docs: Vec<Value>,
        result_slot: Option<SlotId>,
        fields: Vec<(String, SlotId)>,
        block: Option<BlockScan>,
    },
    Project {
        node_id: NodeId,
        input: Box<PlanStage>,
        projects: Vec<(SlotId, SbExpr)>,
    },
    HashAgg {
        node_id: NodeId,
        input: Box<PlanStage>,
        group_by: Vec<SlotId>,
        aggs: Vec<(SlotId, SbAggExpr)>,
        collator: Option<SlotId>,
        /// `(spill slot, merge expression)` pairs, one per aggregate.
        merging: Vec<(SlotId, SbExpr)>,
    },
    BlockHashAgg {
        node_id: NodeId,
        input: Box<PlanStage>,
        group_by: Vec<SlotId>,
        aggs: Vec<(SlotId, SbAggExpr)>,
        selectivity_bitmap: SlotId,
        /// Block slots read by the row form of each block aggregate.
        block_acc_args: Vec<SlotId>,
        bitmap_internal: SlotId,
        /// Scalar slots bound to one element of `block_acc_args`.
        acc_data: Vec<SlotId>,
        merging: Vec<(SlotId, SbExpr)>,
    },
    /// Unpacks blocks into one row per selected element.
    BlockToRow {
        node_id: NodeId,
        input: Box<PlanStage>,
        blocks: Vec<SlotId>,
        outputs: Vec<SlotId>,
        bitmap: SlotId,
    },
}

/// Block-mode configuration of a virtual scan.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockScan {
    pub block_size: usize,
    pub bitmap_slot: SlotId,
    /// A field delivered as a scalar: it is constant within each block.
    pub meta_field: Option<(String, SlotId)>,
}

impl PlanStage {
    pub fn name(&self) -> &'static str {
        match self {
            PlanStage::VirtualScan { .. } => "virtualscan",
            PlanStage::Project { .. } => "project",
            PlanStage::HashAgg { .. } => "group",
            PlanStage::BlockHashAgg { .. } => "block_group",
            PlanStage::BlockToRow { .. } => "blockToRow",
        }
    }

    pub fn node_id(&self) -> NodeId {
        match self {
            PlanStage::VirtualScan { node_id, .. }
            | PlanStage::Project { node_id, .. }
            | PlanStage::HashAgg { node_id, .. }
            | PlanStage::BlockHashAgg { node_id, .. }
            | PlanStage::BlockToRow { node_id, .. } => *node_id,
        }
    }

    pub fn input(&self) -> Option<&PlanStage> {
        match self {
            PlanStage::VirtualScan { .. } => None,
            PlanStage::Project { input, .. }
            | PlanStage::HashAgg { input, .. }
            | PlanStage::BlockHashAgg { input, .. }
            | PlanStage::BlockToRow { input, .. } => Some(input),
        }
    }

    /// Stage names from the root down.
    pub fn stage_names(&self) -> Vec<&'static str> {
        let mut names = vec![self.name()];
        let mut cur = self.input();
        while let Some(stage) = cur {
            names.push(stage.name());
            cur = stage.input();
        }
        names
    }

    /// First stage (root first) satisfying `pred`.
    pub fn find(&self, pred: impl Fn(&PlanStage) -> bool) -> Option<&PlanStage> {
        let mut cur = Some(self);
        while let Some(stage) = cur {
            if pred(stage) {
                return Some(stage);
            }
            cur = stage.input();
        }
        None
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "    ".repeat(depth);
        write!(f, "{pad}[{}] {} ", self.node_id(), self.name())?;
        match self {
            PlanStage::VirtualScan {
                docs,
                result_slot,
                fields,
                block,
                ..
            } => {
                write!(f, "docs={}", docs.len())?;
                if let Some(slot) = result_slot {
                    write!(f, " result=s{slot}")?;
                }
                write!(f, " fields={}", fmt_named(fields))?;
                if let Some(block) = block {
                    write!(f, " blockSize={} bitmap=s{}", block.block_size, block.bitmap_slot)?;
                }
            }
            PlanStage::Project { projects, .. } => {
                write!(f, "{}", fmt_assignments(projects))?;
            }
            PlanStage::HashAgg {
                group_by,
                aggs,
                collator,
                merging,
                ..
            } => {
                write!(f, "{} {}", fmt_slots(group_by), fmt_aggs(aggs))?;
                if let Some(c) = collator {
                    write!(f, " collator=s{c}")?;
                }
                if !merging.is_empty() {
                    write!(f, " spill {}", fmt_assignments(merging))?;
                }
            }
            PlanStage::BlockHashAgg {
                group_by,
                aggs,
                selectivity_bitmap,
                block_acc_args,
                bitmap_internal,
                acc_data,
                merging,
                ..
            } => {
                write!(
                    f,
                    "bitmap=s{selectivity_bitmap} {} {} internal=s{bitmap_internal} accArgs={} accData={}",
                    fmt_slots(group_by),
                    fmt_aggs(aggs),
                    fmt_slots(block_acc_args),
                    fmt_slots(acc_data),
                )?;
                if !merging.is_empty() {
                    write!(f, " spill {}", fmt_assignments(merging))?;
                }
            }
            PlanStage::BlockToRow {
                blocks,
                outputs,
                bitmap,
                ..
            } => {
                write!(f, "blocks={} rows={} bitmap=s{bitmap}", fmt_slots(blocks), fmt_slots(outputs))?;
            }
        }
        writeln!(f)?;
        if let Some(input) = self.input() {
            input.fmt_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

fn fmt_slots(slots: &[SlotId]) -> String {
    let names: Vec<String> = slots.iter().map(|s| format!("s{s}")).collect();
    format!("[{}]", names.join(", "))
}

fn fmt_named(fields: &[(String, SlotId)]) -> String {
    let names: Vec<String> = fields.iter().map(|(n, s)| format!("{n}=s{s}")).collect();
    format!("[{}]", names.join(", "))
}

fn fmt_assignments(items: &[(SlotId, SbExpr)]) -> String {
    let parts: Vec<String> = items.iter().map(|(s, e)| format!("s{s} = {e}")).collect();
    format!("[{}]", parts.join(", "))
}

fn fmt_aggs(aggs: &[(SlotId, SbAggExpr)]) -> String {
    let parts: Vec<String> = aggs
        .iter()
        .map(|(slot, agg)| {
            let mut s = format!("s{slot} = {}", agg.agg);
            if let Some(init) = &agg.init {
                s.push_str(&format!(" init{{{init}}}"));
            }
            if let Some(block) = &agg.block_agg {
                s.push_str(&format!(" block{{{block}}}"));
            }
            s
        })
        .collect();
    format!("[{}]", parts.join(", "))
}

impl fmt::Display for PlanStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}
