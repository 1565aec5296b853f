mod factory;
mod matcher;
mod normalizer;
mod predicates;
mod registry;

pub use factory::*;
pub use matcher::*;
pub use normalizer::*;
pub use predicates::{lookup, Capability, ConstructorFn, FunctionFn, PredicateFn};
pub use registry::*;
