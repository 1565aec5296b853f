use strum_macros::{AsRefStr, Display, EnumString};

use super::{Pattern, Replace};
use crate::expr::Operator;

/// The phase a rule belongs to. There are two kinds of rules:
///
/// - Normalize: always beneficial rewrites applied eagerly, before costing.
/// - Explore: alternatives for the cost-based search. They're parsed but never loaded into a
///   normalizer registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, AsRefStr)]
pub enum RuleCategory {
    Normalize,
    Explore,
}

/// A rule rewrites an expression into a logically equivalent one. The side-conditions live
/// inside `pattern` as `Pattern::Constrain` nodes; the rule fires only when the structure and
/// every side-condition match.
#[derive(Clone, Debug, PartialEq)]
pub struct Rule {
    pub name: String,
    pub category: RuleCategory,
    /// The pattern to determine whether the rule can be applied.
    pub pattern: Pattern,
    /// Builds the replacement from the match bindings.
    pub replace: Replace,
}

impl Rule {
    /// Root operators the rule can match, used to index the registry. `None` means the rule
    /// has to be tried against every operator.
    pub fn root_ops(&self) -> Option<Vec<Operator>> {
        self.pattern.root_ops()
    }
}
