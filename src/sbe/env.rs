//! Runtime environment and slot rows.

use std::collections::{BTreeMap, HashMap};

use crate::config::Collation;
use crate::sbe::SlotId;
use crate::value::Value;

/// Well-known environment slot names.
pub const COLLATOR_SLOT_NAME: &str = "collator";
pub const NOTHING_SLOT_NAME: &str = "nothing";
pub const EMPTY_OBJ_SLOT_NAME: &str = "emptyObj";

/// Named slots whose values are fixed for a whole execution: sort
/// specifications, bound variables, the collator, shared constants.
#[derive(Debug, Clone, Default)]
pub struct RuntimeEnvironment {
    values: HashMap<SlotId, Value>,
    names: BTreeMap<String, SlotId>,
}

impl RuntimeEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, slot: SlotId, value: Value) {
        self.names.insert(name.to_string(), slot);
        self.values.insert(slot, value);
    }

    pub fn slot_for(&self, name: &str) -> Option<SlotId> {
        self.names.get(name).copied()
    }

    pub fn value(&self, slot: SlotId) -> Option<&Value> {
        self.values.get(&slot)
    }

    pub fn collation(&self) -> Option<Collation> {
        self.slot_for(COLLATOR_SLOT_NAME)
            .and_then(|s| self.value(s))
            .and_then(Value::as_str)
            .and_then(Collation::from_name)
    }

    pub fn names(&self) -> impl Iterator<Item = (&str, SlotId)> {
        self.names.iter().map(|(n, s)| (n.as_str(), *s))
    }
}

/// The values bound to slots for one row flowing between stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotRow {
    values: HashMap<SlotId, Value>,
}

impl SlotRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: SlotId) -> Option<&Value> {
        self.values.get(&slot)
    }

    pub fn set(&mut self, slot: SlotId, value: Value) {
        self.values.insert(slot, value);
    }

    pub fn remove(&mut self, slot: SlotId) -> Option<Value> {
        self.values.remove(&slot)
    }

    /// Copy of this row with every block-valued slot removed.
    pub fn scalars_only(&self) -> SlotRow {
        SlotRow {
            values: self
                .values
                .iter()
                .filter(|(_, v)| !v.is_block())
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
        }
    }
}
