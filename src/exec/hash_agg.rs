//! Hash aggregation, row and block variants.
//!
//! Groups are emitted in order of first appearance. When more than
//! `max_groups_in_memory` groups are held, every partial state is moved to
//! a spill run and the table starts over. At the end the runs are combined
//! in chronological order (in-memory state last): the first partial of a
//! group becomes its state, and each later partial is bound to the spill
//! slots and folded in with the merge expressions.

use std::collections::HashMap;

use tracing::debug;

use crate::config::Collation;
use crate::error::SbeGroupError;
use crate::exec::ExecOptions;
use crate::sbe::agg::eval_agg;
use crate::sbe::eval::eval;
use crate::sbe::{PlanStage, RuntimeEnvironment, SbAggExpr, SbExpr, SlotId, SlotRow};
use crate::value::{hash_key, values_equal, Value};

type Partial = (Vec<Value>, Vec<Value>);

/// Key -> states table preserving insertion order.
struct GroupTable {
    groups: Vec<Partial>,
    index: HashMap<u64, Vec<usize>>,
    collation: Option<Collation>,
}

impl GroupTable {
    fn new(collation: Option<Collation>) -> Self {
        GroupTable {
            groups: Vec::new(),
            index: HashMap::new(),
            collation,
        }
    }

    fn len(&self) -> usize {
        self.groups.len()
    }

    fn find(&self, key: &[Value]) -> Option<usize> {
        let hash = hash_key(key, self.collation);
        self.index.get(&hash)?.iter().copied().find(|&i| {
            let existing = &self.groups[i].0;
            existing.len() == key.len()
                && existing
                    .iter()
                    .zip(key)
                    .all(|(a, b)| values_equal(a, b, self.collation))
        })
    }

    fn insert(&mut self, key: Vec<Value>, states: Vec<Value>) -> usize {
        let hash = hash_key(&key, self.collation);
        let pos = self.groups.len();
        self.groups.push((key, states));
        self.index.entry(hash).or_default().push(pos);
        pos
    }

    fn drain(&mut self) -> Vec<Partial> {
        self.index.clear();
        std::mem::take(&mut self.groups)
    }
}

struct Aggregator<'a> {
    aggs: &'a [(SlotId, SbAggExpr)],
    merging: &'a [(SlotId, SbExpr)],
    env: &'a RuntimeEnvironment,
    limit: Option<usize>,
    table: GroupTable,
    runs: Vec<Vec<Partial>>,
}

impl<'a> Aggregator<'a> {
    fn new(
        aggs: &'a [(SlotId, SbAggExpr)],
        merging: &'a [(SlotId, SbExpr)],
        collator: Option<SlotId>,
        env: &'a RuntimeEnvironment,
        limit: Option<usize>,
    ) -> Self {
        let collation = collator.and_then(|_| env.collation());
        Aggregator {
            aggs,
            merging,
            env,
            limit,
            table: GroupTable::new(collation),
            runs: Vec::new(),
        }
    }

    /// Index of the group for `key`, creating it from the init
    /// expressions (evaluated against `row`) when new.
    fn group_for(&mut self, key: Vec<Value>, row: &SlotRow) -> Result<usize, SbeGroupError> {
        if let Some(i) = self.table.find(&key) {
            return Ok(i);
        }
        let states = self
            .aggs
            .iter()
            .map(|(_, agg)| match &agg.init {
                Some(init) => eval(init, row, self.env),
                None => Ok(Value::Nothing),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.table.insert(key, states))
    }

    fn state_mut(&mut self, group: usize, agg: usize) -> &mut Value {
        &mut self.table.groups[group].1[agg]
    }

    fn maybe_spill(&mut self) -> Result<(), SbeGroupError> {
        let Some(limit) = self.limit else {
            return Ok(());
        };
        if self.table.len() <= limit {
            return Ok(());
        }
        if self.merging.len() != self.aggs.len() {
            return Err(SbeGroupError::InternalError(format!(
                "cannot spill: {} merge expressions for {} aggregates",
                self.merging.len(),
                self.aggs.len()
            )));
        }
        debug!(groups = self.table.len(), run = self.runs.len(), "spilling partial aggregates");
        let run = self.table.drain();
        self.runs.push(run);
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<Partial>, SbeGroupError> {
        if self.runs.is_empty() {
            return Ok(self.table.drain());
        }
        let collation = self.table.collation;
        let mut runs = std::mem::take(&mut self.runs);
        runs.push(self.table.drain());
        debug!(runs = runs.len(), "merging spilled aggregates");

        let mut merged = GroupTable::new(collation);
        for run in runs {
            for (key, partial) in run {
                let Some(i) = merged.find(&key) else {
                    merged.insert(key, partial);
                    continue;
                };
                let mut row = SlotRow::new();
                for ((spill_slot, _), value) in self.merging.iter().zip(partial) {
                    row.set(*spill_slot, value);
                }
                for (j, (_, merge)) in self.merging.iter().enumerate() {
                    let state = std::mem::take(&mut merged.groups[i].1[j]);
                    merged.groups[i].1[j] = eval_agg(merge, state, &row, self.env)?;
                }
            }
        }
        Ok(merged.drain())
    }
}

fn key_of(row: &SlotRow, group_by: &[SlotId]) -> Vec<Value> {
    group_by
        .iter()
        .map(|s| row.get(*s).cloned().unwrap_or(Value::Nothing))
        .collect()
}

/// Execute a `HashAgg` or `BlockHashAgg` stage over its input rows.
pub fn run(
    stage: &PlanStage,
    rows: Vec<SlotRow>,
    env: &RuntimeEnvironment,
    options: ExecOptions,
) -> Result<Vec<SlotRow>, SbeGroupError> {
    match stage {
        PlanStage::HashAgg {
            group_by,
            aggs,
            collator,
            merging,
            ..
        } => {
            let mut agg = Aggregator::new(aggs, merging, *collator, env, options.max_groups_in_memory);
            for row in &rows {
                let group = agg.group_for(key_of(row, group_by), row)?;
                for (j, (_, expr)) in aggs.iter().enumerate() {
                    let state = std::mem::take(agg.state_mut(group, j));
                    *agg.state_mut(group, j) = eval_agg(&expr.agg, state, row, env)?;
                }
                agg.maybe_spill()?;
            }
            let groups = agg.finish()?;
            Ok(groups
                .into_iter()
                .map(|(key, states)| {
                    let mut out = SlotRow::new();
                    for (slot, value) in group_by.iter().zip(key) {
                        out.set(*slot, value);
                    }
                    for ((slot, _), value) in aggs.iter().zip(states) {
                        out.set(*slot, value);
                    }
                    out
                })
                .collect())
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
            let slots = BlockSlots {
                group_by,
                selectivity_bitmap: *selectivity_bitmap,
                block_acc_args,
                bitmap_internal: *bitmap_internal,
                acc_data,
            };
            run_block(&slots, aggs, merging, rows, env, options)
        }
        other => Err(SbeGroupError::InternalError(format!(
            "{} is not an aggregation stage",
            other.name()
        ))),
    }
}

struct BlockSlots<'a> {
    group_by: &'a [SlotId],
    selectivity_bitmap: SlotId,
    block_acc_args: &'a [SlotId],
    bitmap_internal: SlotId,
    acc_data: &'a [SlotId],
}

fn element(value: Option<&Value>, i: usize) -> Value {
    match value {
        Some(Value::Block(items)) => items.get(i).cloned().unwrap_or(Value::Nothing),
        Some(scalar) => scalar.clone(),
        None => Value::Nothing,
    }
}

/// Block aggregation: selected elements are partitioned by key; a group
/// with several elements in one block is folded by the block aggregate
/// over an internal bitmap, a single element by the row aggregate over
/// the scalar data slots.
fn run_block(
    slots: &BlockSlots<'_>,
    aggs: &[(SlotId, SbAggExpr)],
    merging: &[(SlotId, SbExpr)],
    rows: Vec<SlotRow>,
    env: &RuntimeEnvironment,
    options: ExecOptions,
) -> Result<Vec<SlotRow>, SbeGroupError> {
    let mut agg = Aggregator::new(aggs, merging, None, env, options.max_groups_in_memory);
    for row in &rows {
        let Some(Value::Block(selected)) = row.get(slots.selectivity_bitmap) else {
            return Err(SbeGroupError::InternalError(format!(
                "block group: s{} does not hold a bitmap",
                slots.selectivity_bitmap
            )));
        };
        let scalars = row.scalars_only();

        // Partition selected positions by key, in order of appearance.
        let mut partitions = GroupTable::new(None);
        let mut positions: Vec<Vec<usize>> = Vec::new();
        for (i, bit) in selected.iter().enumerate() {
            if *bit != Value::Bool(true) {
                continue;
            }
            let key: Vec<Value> = slots.group_by.iter().map(|s| element(row.get(*s), i)).collect();
            match partitions.find(&key) {
                Some(p) => positions[p].push(i),
                None => {
                    partitions.insert(key, Vec::new());
                    positions.push(vec![i]);
                }
            }
        }

        for ((key, _), indices) in partitions.drain().into_iter().zip(positions) {
            let group = agg.group_for(key, &scalars)?;
            let mut local = row.clone();
            if let &[i] = indices.as_slice() {
                for (block, data) in slots.block_acc_args.iter().zip(slots.acc_data) {
                    local.set(*data, element(row.get(*block), i));
                }
            } else {
                let mut bitmap = vec![Value::Bool(false); selected.len()];
                for i in &indices {
                    bitmap[*i] = Value::Bool(true);
                }
                local.set(slots.bitmap_internal, Value::Block(bitmap));
            }
            for (j, (_, expr)) in aggs.iter().enumerate() {
                let step = match (&expr.block_agg, indices.len()) {
                    (Some(block_agg), n) if n > 1 => block_agg,
                    _ => &expr.agg,
                };
                let state = std::mem::take(agg.state_mut(group, j));
                *agg.state_mut(group, j) = eval_agg(step, state, &local, env)?;
            }
            agg.maybe_spill()?;
        }
    }

    let groups = agg.finish()?;
    if groups.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = SlotRow::new();
    let mut key_columns: Vec<Vec<Value>> = vec![Vec::with_capacity(groups.len()); slots.group_by.len()];
    let mut agg_columns: Vec<Vec<Value>> = vec![Vec::with_capacity(groups.len()); aggs.len()];
    let count = groups.len();
    for (key, states) in groups {
        for (col, v) in key_columns.iter_mut().zip(key) {
            col.push(v);
        }
        for (col, v) in agg_columns.iter_mut().zip(states) {
            col.push(v);
        }
    }
    for (slot, col) in slots.group_by.iter().zip(key_columns) {
        out.set(*slot, Value::Block(col));
    }
    for ((slot, _), col) in aggs.iter().zip(agg_columns) {
        out.set(*slot, Value::Block(col));
    }
    out.set(slots.selectivity_bitmap, Value::Block(vec![Value::Bool(true); count]));
    Ok(vec![out])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sbe::{SbSlot, TypeSignature};

    fn rows(pairs: &[(i64, i64)]) -> Vec<SlotRow> {
        pairs
            .iter()
            .map(|(k, v)| {
                let mut row = SlotRow::new();
                row.set(1, Value::Int(*k));
                row.set(2, Value::Int(*v));
                row
            })
            .collect()
    }

    fn sum_stage() -> PlanStage {
        let scan = PlanStage::VirtualScan {
            node_id: 1,
            docs: vec![],
            result_slot: None,
            fields: vec![],
            block: None,
        };
        PlanStage::HashAgg {
            node_id: 2,
            input: Box::new(scan),
            group_by: vec![1],
            aggs: vec![(
                3,
                SbAggExpr::new(
                    Some(SbExpr::constant(0i64)),
                    SbExpr::func("sum", vec![SbExpr::slot(SbSlot::new(2))]),
                ),
            )],
            collator: None,
            merging: vec![(4, SbExpr::func("sum", vec![SbExpr::slot(SbSlot::new(4))]))],
        }
    }

    fn sums(out: &[SlotRow]) -> Vec<(Value, Value)> {
        out.iter()
            .map(|r| (r.get(1).cloned().unwrap(), r.get(3).cloned().unwrap()))
            .collect()
    }

    #[test]
    fn test_groups_in_first_appearance_order() {
        let input = rows(&[(2, 1), (1, 5), (2, 3)]);
        let out = run(&sum_stage(), input, &RuntimeEnvironment::new(), ExecOptions::default()).unwrap();
        assert_eq!(
            sums(&out),
            vec![(Value::Int(2), Value::Int(4)), (Value::Int(1), Value::Int(5))]
        );
    }

    #[test]
    fn test_spill_and_merge_matches_single_pass() {
        let pairs = [(1, 1), (2, 2), (3, 3), (1, 10), (2, 20), (4, 4), (1, 100)];
        let env = RuntimeEnvironment::new();
        let single = run(&sum_stage(), rows(&pairs), &env, ExecOptions::default()).unwrap();
        let spilled = run(
            &sum_stage(),
            rows(&pairs),
            &env,
            ExecOptions {
                max_groups_in_memory: Some(1),
            },
        )
        .unwrap();
        assert_eq!(sums(&single), sums(&spilled));
    }

    #[test]
    fn test_block_agg_mixes_block_and_row_forms() {
        let mut row = SlotRow::new();
        row.set(1, Value::Block(vec![Value::Int(1), Value::Int(2), Value::Int(1)]));
        row.set(5, Value::Block(vec![Value::Int(10), Value::Int(20), Value::Int(30)]));
        row.set(9, Value::Block(vec![Value::Bool(true); 3]));
        let block = |id| SbExpr::slot(SbSlot::with_type(id, TypeSignature::BLOCK));
        let aggs = vec![(
            3,
            SbAggExpr::new(
                Some(SbExpr::constant(0i64)),
                SbExpr::func("sum", vec![SbExpr::slot(SbSlot::new(6))]),
            )
            .with_block_agg(SbExpr::func("valueBlockAggSum", vec![block(7), block(5)])),
        )];
        let slots = BlockSlots {
            group_by: &[1],
            selectivity_bitmap: 9,
            block_acc_args: &[5],
            bitmap_internal: 7,
            acc_data: &[6],
        };
        let out = run_block(&slots, &aggs, &[], vec![row], &RuntimeEnvironment::new(), ExecOptions::default())
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get(1), Some(&Value::Block(vec![Value::Int(1), Value::Int(2)])));
        assert_eq!(out[0].get(3), Some(&Value::Block(vec![Value::Int(40), Value::Int(20)])));
    }
}
