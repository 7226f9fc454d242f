use crate::query::GroupNode;
use crate::stage_builder::reqs::PlanStageReqs;
use crate::stage_builder::sort_keys::make_sort_keys_plan;

/// What a group asks of its child: every top-level field its key and
/// arguments read, plus the whole document only when something needs it.
pub fn compute_child_reqs_for_group(
    reqs: &PlanStageReqs,
    group: &GroupNode,
    allow_cheap_sort_key: bool,
) -> PlanStageReqs {
    let mut child = reqs.copy_for_child();
    child.clear_fields();
    child.clear_result_info();
    child.clear_sort_keys();
    child.set_result(true);

    child.add_fields(
        group
            .required_fields
            .iter()
            .map(|f| f.split('.').next().unwrap_or(f).to_string()),
    );

    if !group.need_whole_document {
        let mut needs_result = false;
        for pattern in group.accumulators.iter().filter_map(|a| a.sort_pattern.as_ref()) {
            let plan = make_sort_keys_plan(pattern, allow_cheap_sort_key);
            needs_result |= plan.needs_result_obj;
            child.add_fields(plan.fields_for_sort_keys);
        }
        if !needs_result {
            child.set_result(false);
        }
    }
    child
}
