//! Virtual scan: the leaf of every plan.

use tracing::debug;

use crate::error::SbeGroupError;
use crate::query::VirtualScanNode;
use crate::sbe::{BlockScan, PlanStage, SbSlot, TypeSignature};
use crate::stage_builder::reqs::{PlanStageReqs, PlanStageSlots, SlotName};
use crate::stage_builder::state::StageBuilderState;

/// Blocks are produced only when the scan supports them, the parent can
/// consume them and no whole-document result is needed.
pub fn build_virtual_scan(
    state: &mut StageBuilderState,
    node: &VirtualScanNode,
    reqs: &PlanStageReqs,
) -> Result<(PlanStage, PlanStageSlots), SbeGroupError> {
    if reqs.has_record_id() || reqs.has_sort_keys() {
        return Err(SbeGroupError::UnsupportedRequirement {
            code: 6360401,
            message: "virtual scan delivers neither record ids nor sort keys".into(),
        });
    }

    let mut outputs = PlanStageSlots::new();
    let block_opts = node
        .block_output
        .as_ref()
        .filter(|_| reqs.can_process_block_values() && !reqs.has_result());

    let Some(opts) = block_opts else {
        let result_slot = reqs.has_result().then(|| {
            let slot = SbSlot::with_type(state.slot_id(), TypeSignature::OBJECT);
            outputs.set(SlotName::Result, slot);
            slot.id
        });
        let fields = reqs
            .fields()
            .map(|name| {
                let slot = SbSlot::new(state.slot_id());
                outputs.set(SlotName::Field(name.to_string()), slot);
                (name.to_string(), slot.id)
            })
            .collect();
        let stage = PlanStage::VirtualScan {
            node_id: node.node_id,
            docs: node.docs.clone(),
            result_slot,
            fields,
            block: None,
        };
        return Ok((stage, outputs));
    };

    debug!(node = node.node_id, block_size = opts.block_size, "scan produces blocks");
    let mut fields = Vec::new();
    let mut meta_field = None;
    for name in reqs.fields() {
        if opts.meta_field.as_deref() == Some(name) {
            let slot = SbSlot::new(state.slot_id());
            outputs.set(SlotName::Field(name.to_string()), slot);
            meta_field = Some((name.to_string(), slot.id));
        } else {
            let slot = SbSlot::with_type(state.slot_id(), TypeSignature::BLOCK);
            outputs.set(SlotName::Field(name.to_string()), slot);
            fields.push((name.to_string(), slot.id));
        }
    }
    let bitmap = SbSlot::with_type(state.slot_id(), TypeSignature::BLOCK);
    outputs.set(SlotName::BlockSelectivityBitmap, bitmap);

    let stage = PlanStage::VirtualScan {
        node_id: node.node_id,
        docs: node.docs.clone(),
        result_slot: None,
        fields,
        block: Some(BlockScan {
            block_size: opts.block_size,
            bitmap_slot: bitmap.id,
            meta_field,
        }),
    };
    Ok((stage, outputs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuilderConfig;
    use serde_json::json;

    fn node() -> VirtualScanNode {
        VirtualScanNode::from_json(1, &[json!({"m": 1, "a": 2})])
            .with_blocks(4)
            .with_meta_field("m")
    }

    #[test]
    fn test_row_scan_when_result_needed() {
        let mut state = StageBuilderState::new(BuilderConfig::default());
        let reqs = PlanStageReqs::new().with_result().with_fields(["a"]).with_block_values(true);
        let (_, outputs) = build_virtual_scan(&mut state, &node(), &reqs).unwrap();
        assert!(outputs.result_slot().is_some());
        assert!(!outputs.has_block_output());
    }

    #[test]
    fn test_block_scan_keeps_meta_field_scalar() {
        let mut state = StageBuilderState::new(BuilderConfig::default());
        let reqs = PlanStageReqs::new().with_fields(["a", "m"]).with_block_values(true);
        let (stage, outputs) = build_virtual_scan(&mut state, &node(), &reqs).unwrap();
        assert!(outputs.has_block_output());
        assert!(outputs.field("a").unwrap().is_block());
        assert!(!outputs.field("m").unwrap().is_block());
        assert!(matches!(stage, PlanStage::VirtualScan { block: Some(_), .. }));
    }

    #[test]
    fn test_rejects_record_id() {
        let mut state = StageBuilderState::new(BuilderConfig::default());
        let reqs = PlanStageReqs::new().with_record_id();
        assert!(build_virtual_scan(&mut state, &node(), &reqs).is_err());
    }
}
