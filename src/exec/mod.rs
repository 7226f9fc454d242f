//! Reference interpreter for physical plans.
//!
//! Stages are executed eagerly: each stage consumes the full output of its
//! input and returns a vector of [`SlotRow`]s. Aggregation follows the
//! documented spill contract (see [`hash_agg`]).

pub mod hash_agg;

use tracing::trace;

use crate::error::SbeGroupError;
use crate::sbe::eval::eval;
use crate::sbe::{BlockScan, PlanStage, RuntimeEnvironment, SlotId, SlotRow};
use crate::value::Value;

/// Execution limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOptions {
    /// Spill partial aggregates once more groups than this are in memory.
    pub max_groups_in_memory: Option<usize>,
}

pub fn execute(
    stage: &PlanStage,
    env: &RuntimeEnvironment,
    options: ExecOptions,
) -> Result<Vec<SlotRow>, SbeGroupError> {
    let rows = match stage {
        PlanStage::VirtualScan {
            docs,
            result_slot,
            fields,
            block,
            ..
        } => match block {
            Some(block) => scan_blocks(docs, fields, block),
            None => scan_rows(docs, *result_slot, fields),
        },
        PlanStage::Project {
            input, projects, ..
        } => {
            let mut rows = execute(input, env, options)?;
            for row in &mut rows {
                for (slot, expr) in projects {
                    let value = eval(expr, row, env)?;
                    row.set(*slot, value);
                }
            }
            rows
        }
        PlanStage::HashAgg { input, .. } | PlanStage::BlockHashAgg { input, .. } => {
            let rows = execute(input, env, options)?;
            hash_agg::run(stage, rows, env, options)?
        }
        PlanStage::BlockToRow {
            input,
            blocks,
            outputs,
            bitmap,
            ..
        } => {
            let rows = execute(input, env, options)?;
            block_to_row(rows, blocks, outputs, *bitmap)?
        }
    };
    trace!(stage = stage.name(), node = stage.node_id(), rows = rows.len(), "stage done");
    Ok(rows)
}

fn scan_rows(docs: &[Value], result_slot: Option<SlotId>, fields: &[(String, SlotId)]) -> Vec<SlotRow> {
    docs.iter()
        .map(|doc| {
            let mut row = SlotRow::new();
            if let Some(slot) = result_slot {
                row.set(slot, doc.clone());
            }
            for (name, slot) in fields {
                row.set(*slot, doc.get_field(name));
            }
            row
        })
        .collect()
}

/// Cut `docs` into blocks of at most `block_size` documents. With a meta
/// field, a new block also starts whenever the meta value changes.
fn scan_blocks(docs: &[Value], fields: &[(String, SlotId)], block: &BlockScan) -> Vec<SlotRow> {
    let mut chunks: Vec<&[Value]> = Vec::new();
    let mut start = 0;
    for i in 1..=docs.len() {
        let boundary = i == docs.len()
            || i - start == block.block_size
            || block
                .meta_field
                .as_ref()
                .is_some_and(|(name, _)| docs[i].get_field(name) != docs[start].get_field(name));
        if boundary {
            chunks.push(&docs[start..i]);
            start = i;
        }
    }

    chunks
        .into_iter()
        .map(|chunk| {
            let mut row = SlotRow::new();
            for (name, slot) in fields {
                row.set(*slot, Value::Block(chunk.iter().map(|d| d.get_field(name)).collect()));
            }
            if let Some((name, slot)) = &block.meta_field {
                row.set(*slot, chunk[0].get_field(name));
            }
            row.set(block.bitmap_slot, Value::Block(vec![Value::Bool(true); chunk.len()]));
            row
        })
        .collect()
}

fn block_to_row(
    rows: Vec<SlotRow>,
    blocks: &[SlotId],
    outputs: &[SlotId],
    bitmap: SlotId,
) -> Result<Vec<SlotRow>, SbeGroupError> {
    let mut out = Vec::new();
    for row in rows {
        let Some(Value::Block(selected)) = row.get(bitmap) else {
            return Err(SbeGroupError::InternalError(format!(
                "blockToRow: s{bitmap} does not hold a bitmap"
            )));
        };
        let scalars = row.scalars_only();
        for (i, bit) in selected.iter().enumerate() {
            if *bit != Value::Bool(true) {
                continue;
            }
            let mut unpacked = scalars.clone();
            for (block, output) in blocks.iter().zip(outputs) {
                let value = match row.get(*block) {
                    Some(Value::Block(items)) => items.get(i).cloned().unwrap_or(Value::Nothing),
                    Some(scalar) => scalar.clone(),
                    None => Value::Nothing,
                };
                unpacked.set(*output, value);
            }
            out.push(unpacked);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn docs() -> Vec<Value> {
        [json!({"m": 1, "a": 1}), json!({"m": 1, "a": 2}), json!({"m": 2, "a": 3})]
            .iter()
            .map(Value::from_json)
            .collect()
    }

    #[test]
    fn test_scan_blocks_cuts_on_meta_change() {
        let block = BlockScan {
            block_size: 10,
            bitmap_slot: 9,
            meta_field: Some(("m".into(), 8)),
        };
        let rows = scan_blocks(&docs(), &[("a".into(), 1)], &block);
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0].get(1),
            Some(&Value::Block(vec![Value::Int(1), Value::Int(2)]))
        );
        assert_eq!(rows[1].get(8), Some(&Value::Int(2)));
    }

    #[test]
    fn test_scan_blocks_respects_block_size() {
        let block = BlockScan {
            block_size: 2,
            bitmap_slot: 9,
            meta_field: None,
        };
        let rows = scan_blocks(&docs(), &[("a".into(), 1)], &block);
        assert_eq!(rows.len(), 2);
        assert_eq!(scan_blocks(&[], &[], &block).len(), 0);
    }

    #[test]
    fn test_block_to_row_skips_unselected() {
        let mut row = SlotRow::new();
        row.set(1, Value::Block(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));
        row.set(2, Value::Block(vec![Value::Bool(true), Value::Bool(false), Value::Bool(true)]));
        row.set(3, Value::str("meta"));
        let rows = block_to_row(vec![row], &[1], &[10], 2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get(10), Some(&Value::Int(3)));
        assert_eq!(rows[1].get(3), Some(&Value::str("meta")));
        assert_eq!(rows[1].get(1), None);
    }
}
