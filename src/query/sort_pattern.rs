//! Sort patterns for order-sensitive accumulators (`$topN`, `$bottomN`, ...).

use serde_json::Value as Json;

use crate::error::SbeGroupError;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortPatternPart {
    pub field_path: Vec<String>,
    pub is_ascending: bool,
}

impl SortPatternPart {
    pub fn dotted(&self) -> String {
        self.field_path.join(".")
    }

    pub fn top_level_field(&self) -> &str {
        self.field_path.first().map(String::as_str).unwrap_or("")
    }

    pub fn is_top_level(&self) -> bool {
        self.field_path.len() == 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortPattern {
    parts: Vec<SortPatternPart>,
}

impl SortPattern {
    pub fn new(parts: Vec<SortPatternPart>) -> Result<Self, SbeGroupError> {
        if parts.is_empty() {
            return Err(SbeGroupError::QueryParseError(
                "sort pattern must have at least one field".into(),
            ));
        }
        Ok(SortPattern { parts })
    }

    /// Parse `{"a": 1, "b.c": -1}`.
    pub fn parse(json: &Json) -> Result<Self, SbeGroupError> {
        let Json::Object(map) = json else {
            return Err(SbeGroupError::QueryParseError(
                "sortBy must be an object".into(),
            ));
        };
        let mut parts = Vec::with_capacity(map.len());
        for (name, dir) in map {
            let is_ascending = match dir.as_f64() {
                Some(d) if d == 1.0 => true,
                Some(d) if d == -1.0 => false,
                _ => {
                    return Err(SbeGroupError::QueryParseError(format!(
                        "sort direction for '{name}' must be 1 or -1"
                    )));
                }
            };
            if name.is_empty() || name.split('.').any(str::is_empty) {
                return Err(SbeGroupError::QueryParseError(format!(
                    "invalid sort field '{name}'"
                )));
            }
            parts.push(SortPatternPart {
                field_path: name.split('.').map(str::to_string).collect(),
                is_ascending,
            });
        }
        Self::new(parts)
    }

    pub fn parts(&self) -> &[SortPatternPart] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// The runtime sort specification: `{path: 1 | -1, ...}`.
    pub fn to_value(&self) -> Value {
        Value::object(
            self.parts
                .iter()
                .map(|p| (p.dotted(), Value::Int(if p.is_ascending { 1 } else { -1 }))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_sort_pattern() {
        let pattern = SortPattern::parse(&json!({"a": 1, "b.c": -1})).unwrap();
        assert_eq!(pattern.len(), 2);
        assert!(pattern.parts()[0].is_top_level());
        assert!(!pattern.parts()[1].is_ascending);
        assert_eq!(pattern.parts()[1].top_level_field(), "b");
        assert_eq!(
            pattern.to_value(),
            Value::object([("a", Value::Int(1)), ("b.c", Value::Int(-1))])
        );
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert!(SortPattern::parse(&json!({})).is_err());
        assert!(SortPattern::parse(&json!({"a": 2})).is_err());
        assert!(SortPattern::parse(&json!({"a.": 1})).is_err());
        assert!(SortPattern::parse(&json!([1])).is_err());
    }
}
