pub mod catalog;
pub mod expr;
pub mod optimizer;
pub mod types;

pub use optimizer::{
    default_registry, NormalizeError, NormalizeOutcome, Normalizer, NormalizerConfig, RuleRegistry,
    RuleSetError,
};
