//! Rule-driven normalization of query expressions.
//!
//! Rules are written in a small pattern language (see [`dsl`]), compiled into a
//! [`RuleRegistry`] and applied bottom-up by a [`Normalizer`] until no rule matches.

mod core;
pub mod dsl;
mod errors;
mod norm;
pub mod rules;

pub use self::core::*;
pub use errors::*;
pub use norm::*;
pub use rules::default_registry;
