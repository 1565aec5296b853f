use crate::expr::ExprError;

/// A malformed rule definition. Raised while a rule set is compiled, never while a query is
/// normalized.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{line}:{column}: {message}")]
pub struct PatternSyntaxError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl PatternSyntaxError {
    pub fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleSetError {
    #[error("pattern syntax error in {source_name} at {source}")]
    PatternSyntax {
        source_name: String,
        #[source]
        source: PatternSyntaxError,
    },
    #[error("duplicate rule {0}")]
    DuplicateRule(String),
    #[error("unknown rule {0}")]
    UnknownRule(String),
}

/// Failures of a single normalization call. Every variant aborts the whole call; no partially
/// normalized tree is returned.
#[derive(thiserror::Error, Debug)]
pub enum NormalizeError {
    #[error("predicate {name} failed: {reason}")]
    PredicateEvaluation { name: String, reason: String },
    #[error("rule {rule} fired more than {limit} times at one expression")]
    NonTerminationGuardTripped { rule: String, limit: usize },
    #[error("rule {rule} rewrote an expression into one containing itself")]
    RewriteCycle { rule: String },
    #[error("memo already holds normal forms computed with a different rule set")]
    RuleSetMismatch,
    #[error("normalization cancelled")]
    Cancelled,
    #[error("expression error: {0}")]
    ExprError(
        #[from]
        #[source]
        ExprError,
    ),
}

impl NormalizeError {
    pub(crate) fn predicate(name: &str, reason: impl Into<String>) -> Self {
        NormalizeError::PredicateEvaluation {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
