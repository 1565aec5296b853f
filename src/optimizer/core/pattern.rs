use std::fmt;

use crate::expr::Operator;

/// A match template compiled from a rule's pattern text.
#[derive(Clone, Debug, PartialEq)]
pub enum Pattern {
    /// `*` matches anything.
    Any,
    /// `$name:pattern` matches `pattern` and captures the matched value as `name`. A bare
    /// `$name` on first use compiles to `Bind { pattern: Any }`.
    Bind { name: String, pattern: Box<Pattern> },
    /// A later use of an already captured `$name`. Matches only a structurally identical
    /// value.
    Ref(String),
    /// `(Op1 | Op2 ... operands...)` matches an expression whose operator is one of `ops` and
    /// whose leading operands match `operands`. Unmentioned trailing operands are ignored.
    Match {
        ops: Vec<Operator>,
        operands: Vec<Pattern>,
    },
    /// `^pattern` succeeds iff `pattern` fails. Captures made inside never escape.
    Not(Box<Pattern>),
    /// `pattern & (Pred ...) & ^(Pred ...)`: the conditions are evaluated in order, only after
    /// `pattern` matched.
    Constrain {
        pattern: Box<Pattern>,
        conditions: Vec<Condition>,
    },
    /// `[ ... ]` list patterns.
    List(ListPattern),
}

/// List patterns match the items of a list operator such as `Filters`.
#[derive(Clone, Debug, PartialEq)]
pub enum ListPattern {
    /// `[ p1 p2 ... ]` matches a list of exactly that length, item by item. `[]` matches an
    /// empty list.
    Exact(Vec<Pattern>),
    /// `[ ... $x:pat ... ]`. The item binds to the first element, scanning left to right,
    /// that matches. A missing leading (trailing) ellipsis pins the item to the first (last)
    /// position. Named ellipses capture the sub-lists before and after the item.
    Scan {
        head: Option<Ellipsis>,
        item: Box<Pattern>,
        tail: Option<Ellipsis>,
    },
}

/// `...`, optionally captured as `$name:...`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ellipsis {
    pub name: Option<String>,
}

/// A side-condition call such as `(IsBoundBy $item $input)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub negated: bool,
    pub call: Call,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    pub name: String,
    pub args: Vec<Arg>,
}

/// Arguments of side-condition calls.
#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    Var(String),
    Call(Call),
}

/// The replacement half of a rule, evaluated by the construction factory against the match
/// bindings.
#[derive(Clone, Debug, PartialEq)]
pub enum Replace {
    Var(String),
    /// `(Op args...)` or `((OpFunc ...) args...)`.
    Construct {
        op: OpRef,
        args: Vec<Replace>,
    },
    /// `(Func args...)` where `Func` is a registered function.
    Call { name: String, args: Vec<Replace> },
    /// `[ r1 r2 ... ]` builds a list value.
    List(Vec<Replace>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum OpRef {
    Static(Operator),
    /// An operator computed by a function call, e.g. `(OpName)` or
    /// `(ConvertLeftToInnerJoin (OpName $input))`.
    Dynamic(Box<Replace>),
}

impl Pattern {
    /// The operators the pattern's root can match, or `None` when it can match any operator.
    pub fn root_ops(&self) -> Option<Vec<Operator>> {
        match self {
            Pattern::Match { ops, .. } => Some(ops.clone()),
            Pattern::Bind { pattern, .. } => pattern.root_ops(),
            Pattern::Constrain { pattern, .. } => pattern.root_ops(),
            Pattern::List(_) => Some(
                [
                    Operator::Filters,
                    Operator::Projections,
                    Operator::Aggregations,
                ]
                .to_vec(),
            ),
            Pattern::Any | Pattern::Ref(_) | Pattern::Not(_) => None,
        }
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.name)?;
        for arg in self.args.iter() {
            match arg {
                Arg::Var(name) => write!(f, " ${}", name)?,
                Arg::Call(call) => write!(f, " {}", call)?,
            }
        }
        write!(f, ")")
    }
}
