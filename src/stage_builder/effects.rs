//! Field effects: how a stage changes each field of the document flowing
//! through it.
//!
//! A parent that asks for "result info" instead of a materialized result
//! object describes the fields it will read (`tracked_fields`) and its own
//! effects. The child composes its effects with the parent's so that the
//! parent can rebuild only what it needs from individual field slots.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldEffect {
    /// The field passes through unchanged.
    Keep,
    Drop,
    /// The field is overwritten with a new value.
    Set,
    /// The field is appended with a new value.
    Add,
    /// The field's existing value is transformed.
    Modify,
    /// Anything may happen to the field.
    Generic,
}

/// Effects on named fields plus a default for every other field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldEffects {
    default: FieldEffect,
    fields: BTreeMap<String, FieldEffect>,
}

impl FieldEffects {
    pub fn new(default: FieldEffect) -> Self {
        FieldEffects {
            default,
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, effect: FieldEffect) -> Self {
        self.fields.insert(name.to_string(), effect);
        self
    }

    /// A group replaces the document: its output fields are set and
    /// everything else is dropped.
    pub fn for_group<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        names
            .into_iter()
            .fold(Self::new(FieldEffect::Drop), |effects, name| {
                effects.with(name, FieldEffect::Set)
            })
    }

    pub fn default_effect(&self) -> FieldEffect {
        self.default
    }

    pub fn get(&self, name: &str) -> FieldEffect {
        self.fields.get(name).copied().unwrap_or(self.default)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, FieldEffect)> {
        self.fields.iter().map(|(n, e)| (n.as_str(), *e))
    }

    /// Keep only the named effects of tracked fields.
    pub fn narrow(&self, tracked: &BTreeSet<String>) -> FieldEffects {
        FieldEffects {
            default: self.default,
            fields: self
                .fields
                .iter()
                .filter(|(name, _)| tracked.contains(*name))
                .map(|(n, e)| (n.clone(), *e))
                .collect(),
        }
    }

    /// The effects of running `child` and then `parent`, or `None` when
    /// the combination cannot be described per field.
    pub fn compose(child: &FieldEffects, parent: &FieldEffects) -> Option<FieldEffects> {
        let default = compose_one(child.default, parent.default)?;
        let names: BTreeSet<&String> = child.fields.keys().chain(parent.fields.keys()).collect();
        let mut fields = BTreeMap::new();
        for name in names {
            let effect = compose_one(child.get(name), parent.get(name))?;
            if effect != default {
                fields.insert(name.clone(), effect);
            }
        }
        Some(FieldEffects { default, fields })
    }
}

fn compose_one(child: FieldEffect, parent: FieldEffect) -> Option<FieldEffect> {
    match parent {
        FieldEffect::Keep => Some(child),
        FieldEffect::Drop | FieldEffect::Set | FieldEffect::Add => Some(parent),
        FieldEffect::Modify => match child {
            FieldEffect::Drop => None,
            FieldEffect::Keep => Some(FieldEffect::Modify),
            other => Some(other),
        },
        FieldEffect::Generic => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracked(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_group_effects_set_outputs_and_drop_the_rest() {
        let effects = FieldEffects::for_group(["_id", "total"]);
        assert_eq!(effects.get("total"), FieldEffect::Set);
        assert_eq!(effects.get("other"), FieldEffect::Drop);
    }

    #[test]
    fn test_narrow_keeps_tracked_fields_only() {
        let effects = FieldEffects::for_group(["_id", "total"]).narrow(&tracked(&["total"]));
        assert_eq!(effects.fields().count(), 1);
        assert_eq!(effects.get("_id"), FieldEffect::Drop);
    }

    #[test]
    fn test_compose_with_keeping_parent() {
        let child = FieldEffects::for_group(["_id", "total"]);
        let parent = FieldEffects::new(FieldEffect::Keep).with("extra", FieldEffect::Add);
        let composed = FieldEffects::compose(&child, &parent).unwrap();
        assert_eq!(composed.get("total"), FieldEffect::Set);
        assert_eq!(composed.get("extra"), FieldEffect::Add);
        assert_eq!(composed.default_effect(), FieldEffect::Drop);
    }

    #[test]
    fn test_compose_fails_on_generic_or_modified_drop() {
        let child = FieldEffects::for_group(["_id"]);
        assert!(FieldEffects::compose(&child, &FieldEffects::new(FieldEffect::Generic)).is_none());
        let parent = FieldEffects::new(FieldEffect::Keep).with("gone", FieldEffect::Modify);
        assert!(FieldEffects::compose(&child, &parent).is_none());
    }
}
