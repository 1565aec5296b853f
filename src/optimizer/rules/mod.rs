//! The built-in normalization rule set.
//!
//! Rules are plain text compiled when a registry is built. File order, and rule order inside a
//! file, decides which rule fires when several match: filter list cleanups come first so the
//! relational rules see flattened conjunctions.

use crate::optimizer::{RuleRegistry, RuleSetError};

pub const FILTERS_RULES: &str = include_str!("filters.opt");
pub const SELECT_RULES: &str = include_str!("select.opt");
pub const JOIN_RULES: &str = include_str!("join.opt");

/// The built-in rule files as `(name, text)` pairs, in the order they're registered.
pub fn default_sources() -> [(&'static str, &'static str); 3] {
    [
        ("filters.opt", FILTERS_RULES),
        ("select.opt", SELECT_RULES),
        ("join.opt", JOIN_RULES),
    ]
}

/// Compile the built-in rule set.
pub fn default_registry() -> Result<RuleRegistry, RuleSetError> {
    RuleRegistry::from_sources(default_sources())
}
