mod pattern;
mod rule;
mod value;

pub use pattern::*;
pub use rule::*;
pub use value::*;
