//! Builder configuration for sbe_group.
//!
//! A [`BuilderConfig`] is handed to the stage builder when it is created and
//! stays fixed for the lifetime of that builder. It can be loaded from TOML:
//!
//! ```toml
//! block_hash_agg_enabled = true
//! allow_cheap_sort_key = true
//! collation = "case_insensitive"
//! max_groups_in_memory = 10000
//! ```
//!
//! Missing keys fall back to [`BuilderConfig::default`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SbeGroupError;

/// String comparison rules applied to group keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collation {
    /// Binary comparison. Equivalent to having no collator at all.
    #[default]
    Simple,
    /// Strings that differ only in ASCII case compare equal.
    CaseInsensitive,
}

impl Collation {
    pub fn name(self) -> &'static str {
        match self {
            Collation::Simple => "simple",
            Collation::CaseInsensitive => "caseInsensitive",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "simple" => Some(Collation::Simple),
            "caseInsensitive" => Some(Collation::CaseInsensitive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Enables every engine feature, including the block hash aggregation.
    pub sbe_full_enabled: bool,

    /// Allows group stages to aggregate columnar blocks directly.
    ///
    /// When false, block-producing children are always converted back to
    /// rows before aggregation.
    pub block_hash_agg_enabled: bool,

    /// Allows sort keys over dotted paths to be generated with a single
    /// call over the whole document instead of per-field traversal.
    pub allow_cheap_sort_key: bool,

    /// Collation used for group-key comparison. `None` means no collator
    /// is installed.
    pub collation: Option<Collation>,

    /// Number of distinct groups a hash aggregation keeps in memory before
    /// spilling partial states. `None` disables spilling.
    pub max_groups_in_memory: Option<usize>,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            sbe_full_enabled: false,
            block_hash_agg_enabled: true,
            allow_cheap_sort_key: true,
            collation: None,
            max_groups_in_memory: None,
        }
    }
}

impl BuilderConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, SbeGroupError> {
        let config: BuilderConfig =
            toml::from_str(text).map_err(|e| SbeGroupError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SbeGroupError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SbeGroupError::ConfigError(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), SbeGroupError> {
        if self.max_groups_in_memory == Some(0) {
            return Err(SbeGroupError::ConfigError(
                "max_groups_in_memory must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Whether the block hash aggregation may be used at all.
    pub fn allows_block_hash_agg(&self) -> bool {
        self.sbe_full_enabled || self.block_hash_agg_enabled
    }

    /// The collator to install, ignoring an explicit simple collation.
    pub fn effective_collation(&self) -> Option<Collation> {
        self.collation.filter(|c| *c != Collation::Simple)
    }

    pub fn with_block_hash_agg(mut self, enabled: bool) -> Self {
        self.block_hash_agg_enabled = enabled;
        self
    }

    pub fn with_collation(mut self, collation: Collation) -> Self {
        self.collation = Some(collation);
        self
    }

    pub fn with_cheap_sort_key(mut self, allowed: bool) -> Self {
        self.allow_cheap_sort_key = allowed;
        self
    }

    pub fn with_max_groups_in_memory(mut self, limit: usize) -> Self {
        self.max_groups_in_memory = Some(limit);
        self
    }
}
