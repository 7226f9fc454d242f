//! Slot identifiers and static type signatures.

use std::fmt;

use crate::value::Value;

pub type SlotId = u32;

/// A set of runtime types a slot or expression may produce.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeSignature(u16);

impl TypeSignature {
    pub const NOTHING: Self = Self(1 << 0);
    pub const NULL: Self = Self(1 << 1);
    pub const BOOL: Self = Self(1 << 2);
    pub const NUMBER: Self = Self(1 << 3);
    pub const STRING: Self = Self(1 << 4);
    pub const OBJECT: Self = Self(1 << 5);
    pub const ARRAY: Self = Self(1 << 6);
    pub const BLOCK: Self = Self(1 << 7);
    pub const ANY_SCALAR: Self = Self(0x7f);

    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Nothing => Self::NOTHING,
            Value::Null => Self::NULL,
            Value::Bool(_) => Self::BOOL,
            Value::Int(_) | Value::Double(_) => Self::NUMBER,
            Value::Str(_) => Self::STRING,
            Value::Object(_) => Self::OBJECT,
            Value::Array(_) => Self::ARRAY,
            Value::Block(_) => Self::BLOCK,
        }
    }

    pub fn include(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn exclude(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn contains_any(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_subset(self, other: Self) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn is_block(self) -> bool {
        self.contains_any(Self::BLOCK)
    }
}

impl Default for TypeSignature {
    fn default() -> Self {
        Self::ANY_SCALAR
    }
}

impl fmt::Debug for TypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [&str; 8] = [
            "nothing", "null", "bool", "number", "string", "object", "array", "block",
        ];
        let names: Vec<&str> = NAMES
            .iter()
            .enumerate()
            .filter(|(i, _)| self.0 & (1 << i) != 0)
            .map(|(_, n)| *n)
            .collect();
        write!(f, "TypeSignature({})", names.join("|"))
    }
}

/// A slot reference with what is statically known about its contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SbSlot {
    pub id: SlotId,
    pub type_sig: TypeSignature,
}

impl SbSlot {
    pub fn new(id: SlotId) -> Self {
        SbSlot {
            id,
            type_sig: TypeSignature::ANY_SCALAR,
        }
    }

    pub fn with_type(id: SlotId, type_sig: TypeSignature) -> Self {
        SbSlot { id, type_sig }
    }

    pub fn is_block(&self) -> bool {
        self.type_sig.is_block()
    }
}

impl fmt::Display for SbSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.id)
    }
}

/// Monotonic id source. Ids are never reused within one generator.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    next: u32,
}

impl IdGenerator {
    pub fn new() -> Self {
        IdGenerator { next: 1 }
    }

    pub fn generate(&mut self) -> u32 {
        let id = self.next;
        self.next += 1;
        id
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_signature_set_ops() {
        let sig = TypeSignature::NUMBER.include(TypeSignature::NOTHING);
        assert!(sig.contains_any(TypeSignature::NOTHING));
        assert!(!sig.exclude(TypeSignature::NOTHING).contains_any(TypeSignature::NOTHING));
        assert!(TypeSignature::OBJECT.is_subset(TypeSignature::ANY_SCALAR));
        assert!(!TypeSignature::ANY_SCALAR.is_block());
        assert!(TypeSignature::BLOCK.is_block());
    }

    #[test]
    fn test_id_generator_is_monotonic() {
        let mut ids = IdGenerator::new();
        let a = ids.generate();
        let b = ids.generate();
        assert!(b > a);
    }
}
