//! Mutable compilation state shared by every stage of one plan.

use std::collections::HashMap;

use crate::config::BuilderConfig;
use crate::query::{AccumulationStatement, NodeId, SortPattern};
use crate::sbe::env::{COLLATOR_SLOT_NAME, EMPTY_OBJ_SLOT_NAME, NOTHING_SLOT_NAME};
use crate::sbe::{IdGenerator, RuntimeEnvironment, SbSlot, SlotId, TypeSignature};
use crate::value::Value;

pub struct StageBuilderState {
    slot_ids: IdGenerator,
    env: RuntimeEnvironment,
    config: BuilderConfig,
    /// The caller will merge partial results of this plan.
    needs_merge: bool,
    variables: HashMap<String, SbSlot>,
}

impl StageBuilderState {
    pub fn new(config: BuilderConfig) -> Self {
        let mut state = StageBuilderState {
            slot_ids: IdGenerator::new(),
            env: RuntimeEnvironment::new(),
            config,
            needs_merge: false,
            variables: HashMap::new(),
        };
        if let Some(collation) = state.config.effective_collation() {
            let id = state.slot_id();
            state
                .env
                .register(COLLATOR_SLOT_NAME, id, Value::str(collation.name()));
        }
        state
    }

    pub fn with_needs_merge(mut self, needs_merge: bool) -> Self {
        self.needs_merge = needs_merge;
        self
    }

    /// A fresh slot id. Ids are never reused within one state.
    pub fn slot_id(&mut self) -> SlotId {
        self.slot_ids.generate()
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    pub fn needs_merge(&self) -> bool {
        self.needs_merge
    }

    pub fn env(&self) -> &RuntimeEnvironment {
        &self.env
    }

    pub fn into_env(self) -> RuntimeEnvironment {
        self.env
    }

    fn env_slot(&mut self, name: &str, value: Value, type_sig: TypeSignature) -> SbSlot {
        let id = match self.env.slot_for(name) {
            Some(id) => id,
            None => {
                let id = self.slot_id();
                self.env.register(name, id, value);
                id
            }
        };
        SbSlot::with_type(id, type_sig)
    }

    /// Env slot always holding Nothing.
    pub fn nothing_slot(&mut self) -> SbSlot {
        self.env_slot(NOTHING_SLOT_NAME, Value::Nothing, TypeSignature::NOTHING)
    }

    /// Env slot always holding `{}`.
    pub fn empty_obj_slot(&mut self) -> SbSlot {
        self.env_slot(EMPTY_OBJ_SLOT_NAME, Value::empty_object(), TypeSignature::OBJECT)
    }

    pub fn collator_slot(&self) -> Option<SbSlot> {
        self.env
            .slot_for(COLLATOR_SLOT_NAME)
            .map(|id| SbSlot::with_type(id, TypeSignature::STRING))
    }

    /// Env slot holding the runtime sort specification of `stmt`.
    pub fn sort_spec_slot(
        &mut self,
        node_id: NodeId,
        stmt: &AccumulationStatement,
        pattern: &SortPattern,
    ) -> SbSlot {
        let name = format!("sortSpec.{node_id}.{}", stmt.field_name);
        self.env_slot(&name, pattern.to_value(), TypeSignature::OBJECT)
    }

    /// Bind a user variable (`$$name`) to a constant for the whole plan.
    pub fn bind_variable(&mut self, name: &str, value: Value) -> SbSlot {
        let slot = SbSlot::with_type(self.slot_id(), TypeSignature::from_value(&value));
        self.env.register(&format!("var.{name}"), slot.id, value);
        self.variables.insert(name.to_string(), slot);
        slot
    }

    pub fn variable_slot(&self, name: &str) -> Option<SbSlot> {
        self.variables.get(name).copied()
    }
}
