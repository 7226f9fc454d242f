//! What a parent asks of a child stage (`PlanStageReqs`) and what the child
//! delivers (`PlanStageSlots`).

use std::collections::{BTreeMap, BTreeSet};

use crate::sbe::SbSlot;
use crate::stage_builder::effects::FieldEffects;

/// Names under which a stage publishes its output slots.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SlotName {
    /// The materialized result object.
    Result,
    RecordId,
    /// Base object to which result-info effects apply.
    ResultInfoBase,
    /// Which positions of the current blocks are selected.
    BlockSelectivityBitmap,
    /// A top-level field.
    Field(String),
    /// A dotted path already traversed into a slot.
    PathExpr(String),
    SortKey(String),
}

/// A request to describe the result through field effects rather than
/// materializing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultInfoReq {
    pub tracked_fields: BTreeSet<String>,
    /// The requester's own effects, applied after the child's.
    pub effects: FieldEffects,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanStageReqs {
    result: bool,
    result_info: Option<ResultInfoReq>,
    fields: BTreeSet<String>,
    sort_keys: BTreeSet<String>,
    record_id: bool,
    can_process_block_values: bool,
}

impl PlanStageReqs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(mut self) -> Self {
        self.result = true;
        self
    }

    pub fn with_result_info(mut self, req: ResultInfoReq) -> Self {
        self.result_info = Some(req);
        self
    }

    pub fn with_fields<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        self.add_fields(names.into_iter().map(str::to_string));
        self
    }

    pub fn with_sort_keys<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        self.sort_keys.extend(names.into_iter().map(str::to_string));
        self
    }

    pub fn with_record_id(mut self) -> Self {
        self.record_id = true;
        self
    }

    pub fn with_block_values(mut self, allowed: bool) -> Self {
        self.can_process_block_values = allowed;
        self
    }

    /// Whether some form of the whole result is requested.
    pub fn has_result(&self) -> bool {
        self.result || self.result_info.is_some()
    }

    pub fn has_result_obj(&self) -> bool {
        self.result
    }

    pub fn result_info(&self) -> Option<&ResultInfoReq> {
        self.result_info.as_ref()
    }

    pub fn set_result(&mut self, requested: bool) {
        self.result = requested;
    }

    pub fn clear_result_info(&mut self) {
        self.result_info = None;
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains(name)
    }

    pub fn add_fields(&mut self, names: impl IntoIterator<Item = String>) {
        self.fields.extend(names);
    }

    pub fn clear_fields(&mut self) {
        self.fields.clear();
    }

    pub fn has_sort_keys(&self) -> bool {
        !self.sort_keys.is_empty()
    }

    pub fn clear_sort_keys(&mut self) {
        self.sort_keys.clear();
    }

    pub fn has_record_id(&self) -> bool {
        self.record_id
    }

    pub fn can_process_block_values(&self) -> bool {
        self.can_process_block_values
    }

    pub fn set_can_process_block_values(&mut self, allowed: bool) {
        self.can_process_block_values = allowed;
    }

    /// A copy to hand to a child. Block processing must be re-enabled
    /// explicitly by whoever builds the child.
    pub fn copy_for_child(&self) -> Self {
        let mut child = self.clone();
        child.can_process_block_values = false;
        child
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanStageSlots {
    slots: BTreeMap<SlotName, SbSlot>,
    effects: Option<FieldEffects>,
}

impl PlanStageSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &SlotName) -> Option<SbSlot> {
        self.slots.get(name).copied()
    }

    pub fn has(&self, name: &SlotName) -> bool {
        self.slots.contains_key(name)
    }

    pub fn set(&mut self, name: SlotName, slot: SbSlot) {
        self.slots.insert(name, slot);
    }

    pub fn clear(&mut self, name: &SlotName) {
        self.slots.remove(name);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SlotName, SbSlot)> {
        self.slots.iter().map(|(n, s)| (n, *s))
    }

    pub fn result_slot(&self) -> Option<SbSlot> {
        self.get(&SlotName::Result)
    }

    pub fn field(&self, name: &str) -> Option<SbSlot> {
        self.get(&SlotName::Field(name.to_string()))
    }

    pub fn path_expr(&self, dotted: &str) -> Option<SbSlot> {
        self.get(&SlotName::PathExpr(dotted.to_string()))
    }

    pub fn bitmap_slot(&self) -> Option<SbSlot> {
        self.get(&SlotName::BlockSelectivityBitmap)
    }

    /// A stage producing blocks always publishes its selectivity bitmap.
    pub fn has_block_output(&self) -> bool {
        self.bitmap_slot().is_some()
    }

    pub fn result_info_base(&self) -> Option<SbSlot> {
        self.get(&SlotName::ResultInfoBase)
    }

    pub fn effects(&self) -> Option<&FieldEffects> {
        self.effects.as_ref()
    }

    pub fn add_effects(&mut self, effects: FieldEffects) {
        self.effects = Some(effects);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sbe::TypeSignature;

    #[test]
    fn test_copy_for_child_resets_block_flag() {
        let reqs = PlanStageReqs::new()
            .with_result()
            .with_fields(["a"])
            .with_block_values(true);
        let child = reqs.copy_for_child();
        assert!(!child.can_process_block_values());
        assert!(child.has_field("a"));
        assert!(child.has_result_obj());
    }

    #[test]
    fn test_result_info_counts_as_result() {
        let reqs = PlanStageReqs::new().with_result_info(ResultInfoReq {
            tracked_fields: BTreeSet::new(),
            effects: FieldEffects::new(crate::stage_builder::effects::FieldEffect::Keep),
        });
        assert!(reqs.has_result());
        assert!(!reqs.has_result_obj());
    }

    #[test]
    fn test_block_output_follows_bitmap() {
        let mut slots = PlanStageSlots::new();
        assert!(!slots.has_block_output());
        slots.set(
            SlotName::BlockSelectivityBitmap,
            SbSlot::with_type(3, TypeSignature::BLOCK),
        );
        assert!(slots.has_block_output());
        slots.clear(&SlotName::BlockSelectivityBitmap);
        assert!(!slots.has_block_output());
    }
}
