//! Compiler for the rule language. Rule files are compiled once, when a registry is built;
//! nothing here runs while a query is normalized.

mod lexer;
mod parser;

pub use parser::Parser;

use super::core::Rule;
use super::{PatternSyntaxError, RuleSetError};

/// Compile the rules in `source`, in declaration order.
pub fn compile_rules(source: &str) -> Result<Vec<Rule>, PatternSyntaxError> {
    Parser::new(source)?.parse_rules()
}

/// Like [`compile_rules`], reporting errors against `source_name` (usually a file name).
pub fn compile_rule_file(source_name: &str, source: &str) -> Result<Vec<Rule>, RuleSetError> {
    compile_rules(source).map_err(|source| RuleSetError::PatternSyntax {
        source_name: source_name.to_string(),
        source,
    })
}
