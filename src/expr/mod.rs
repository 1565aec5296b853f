mod format;
mod memo;
mod props;

#[cfg(test)]
pub(crate) mod eval;

use std::collections::BTreeSet;
use std::fmt;

pub use format::*;
pub use memo::*;
pub use props::*;
use sqlparser::ast::BinaryOperator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use crate::catalog::{ColumnId, TableId};
use crate::types::ScalarValue;

/// Index of an interned expression in the memo arena. Two ids are equal iff the expressions
/// are structurally identical.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExprId(pub usize);

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Every operator the memo can hold. The names are the tags used by the rule language, so
/// `Operator::from_str("InnerJoin")` resolves a tag written in a rule file.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, AsRefStr, EnumIter,
)]
pub enum Operator {
    // relational
    Scan,
    Select,
    Project,
    InnerJoin,
    LeftJoin,
    RightJoin,
    FullJoin,
    SemiJoin,
    AntiJoin,
    InnerJoinApply,
    LeftJoinApply,
    RightJoinApply,
    FullJoinApply,
    SemiJoinApply,
    AntiJoinApply,
    GroupBy,

    // scalar
    Variable,
    Const,
    Null,
    True,
    False,
    And,
    Or,
    Not,
    Is,
    IsNot,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Mult,
    CountRows,
    Count,
    Sum,
    Min,
    Max,

    // lists and list items
    Filters,
    Projections,
    ProjectionsItem,
    Aggregations,
    AggregationsItem,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatorKind {
    Relational,
    Scalar,
    /// A scalar operator whose children form an ordered, variadic list.
    List,
}

/// What a single operand slot accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperandKind {
    Relational,
    Scalar,
    /// A filter condition. A plain list of conditions placed here is wrapped in `Filters`.
    Filter,
    /// A list operator of the given type.
    List(Operator),
    /// An expression of exactly the given operator, used for list items.
    Item(Operator),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrivateKind {
    Scan,
    Column,
    Const,
    Passthrough,
    Grouping,
}

/// Static description of an operator: its fixed operand slots, its list item type for list
/// operators, and the private payload it carries after its operands.
#[derive(Clone, Copy, Debug)]
pub struct OperatorShape {
    pub kind: OperatorKind,
    pub operands: &'static [OperandKind],
    pub list_item: Option<OperandKind>,
    pub private: Option<PrivateKind>,
}

const NO_OPERANDS: &[OperandKind] = &[];
const UNARY: &[OperandKind] = &[OperandKind::Scalar];
const BINARY: &[OperandKind] = &[OperandKind::Scalar, OperandKind::Scalar];
const SELECT: &[OperandKind] = &[OperandKind::Relational, OperandKind::Filter];
const PROJECT: &[OperandKind] = &[
    OperandKind::Relational,
    OperandKind::List(Operator::Projections),
];
const JOIN: &[OperandKind] = &[
    OperandKind::Relational,
    OperandKind::Relational,
    OperandKind::Filter,
];
const GROUP_BY: &[OperandKind] = &[
    OperandKind::Relational,
    OperandKind::List(Operator::Aggregations),
];

impl Operator {
    pub fn shape(&self) -> OperatorShape {
        use OperatorKind::*;
        let (kind, operands, list_item, private) = match self {
            Operator::Scan => (Relational, NO_OPERANDS, None, Some(PrivateKind::Scan)),
            Operator::Select => (Relational, SELECT, None, None),
            Operator::Project => (Relational, PROJECT, None, Some(PrivateKind::Passthrough)),
            op if op.is_join() => (Relational, JOIN, None, None),
            Operator::GroupBy => (Relational, GROUP_BY, None, Some(PrivateKind::Grouping)),
            Operator::Variable => (Scalar, NO_OPERANDS, None, Some(PrivateKind::Column)),
            Operator::Const => (Scalar, NO_OPERANDS, None, Some(PrivateKind::Const)),
            Operator::Null | Operator::True | Operator::False | Operator::CountRows => {
                (Scalar, NO_OPERANDS, None, None)
            }
            Operator::Not | Operator::Count | Operator::Sum | Operator::Min | Operator::Max => {
                (Scalar, UNARY, None, None)
            }
            Operator::Filters => (List, NO_OPERANDS, Some(OperandKind::Scalar), None),
            Operator::Projections => (
                List,
                NO_OPERANDS,
                Some(OperandKind::Item(Operator::ProjectionsItem)),
                None,
            ),
            Operator::Aggregations => (
                List,
                NO_OPERANDS,
                Some(OperandKind::Item(Operator::AggregationsItem)),
                None,
            ),
            Operator::ProjectionsItem | Operator::AggregationsItem => {
                (Scalar, UNARY, None, Some(PrivateKind::Column))
            }
            _ => (Scalar, BINARY, None, None),
        };
        OperatorShape {
            kind,
            operands,
            list_item,
            private,
        }
    }

    pub fn is_relational(&self) -> bool {
        self.shape().kind == OperatorKind::Relational
    }

    pub fn is_list(&self) -> bool {
        self.shape().kind == OperatorKind::List
    }

    pub fn is_join(&self) -> bool {
        matches!(
            self,
            Operator::InnerJoin
                | Operator::LeftJoin
                | Operator::RightJoin
                | Operator::FullJoin
                | Operator::SemiJoin
                | Operator::AntiJoin
                | Operator::InnerJoinApply
                | Operator::LeftJoinApply
                | Operator::RightJoinApply
                | Operator::FullJoinApply
                | Operator::SemiJoinApply
                | Operator::AntiJoinApply
        )
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Operator::Eq | Operator::Ne | Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge
        )
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(self, Operator::Plus | Operator::Minus | Operator::Mult)
    }

    /// The sql operator used to render binary scalar operators inline.
    pub fn binary_operator(&self) -> Option<BinaryOperator> {
        let op = match self {
            Operator::Eq => BinaryOperator::Eq,
            Operator::Ne => BinaryOperator::NotEq,
            Operator::Lt => BinaryOperator::Lt,
            Operator::Le => BinaryOperator::LtEq,
            Operator::Gt => BinaryOperator::Gt,
            Operator::Ge => BinaryOperator::GtEq,
            Operator::Plus => BinaryOperator::Plus,
            Operator::Minus => BinaryOperator::Minus,
            Operator::Mult => BinaryOperator::Multiply,
            Operator::And => BinaryOperator::And,
            Operator::Or => BinaryOperator::Or,
            _ => return None,
        };
        Some(op)
    }
}

/// An ordered set of column ids.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ColSet(BTreeSet<ColumnId>);

impl ColSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, col: ColumnId) {
        self.0.insert(col);
    }

    pub fn contains(&self, col: &ColumnId) -> bool {
        self.0.contains(col)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_subset(&self, other: &ColSet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn intersects(&self, other: &ColSet) -> bool {
        !self.0.is_disjoint(&other.0)
    }

    pub fn union_with(&mut self, other: &ColSet) {
        self.0.extend(other.0.iter().copied());
    }

    pub fn union(&self, other: &ColSet) -> ColSet {
        let mut res = self.clone();
        res.union_with(other);
        res
    }

    pub fn difference(&self, other: &ColSet) -> ColSet {
        ColSet(self.0.difference(&other.0).copied().collect())
    }

    pub fn intersection(&self, other: &ColSet) -> ColSet {
        ColSet(self.0.intersection(&other.0).copied().collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = ColumnId> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<ColumnId> for ColSet {
    fn from_iter<T: IntoIterator<Item = ColumnId>>(iter: T) -> Self {
        ColSet(iter.into_iter().collect())
    }
}

impl fmt::Display for ColSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cols = self.iter().map(|c| c.to_string()).collect::<Vec<_>>();
        write!(f, "({})", cols.join(","))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ScanPrivate {
    pub table: TableId,
    pub cols: Vec<ColumnId>,
}

/// Operator-specific data that isn't an expression operand.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Private {
    Scan(ScanPrivate),
    Column(ColumnId),
    Const(ScalarValue),
    /// Input columns a `Project` passes through unchanged.
    Passthrough(ColSet),
    /// Grouping columns of a `GroupBy`. Empty for a scalar group by.
    Grouping(ColSet),
}

impl Private {
    pub fn kind(&self) -> PrivateKind {
        match self {
            Private::Scan(_) => PrivateKind::Scan,
            Private::Column(_) => PrivateKind::Column,
            Private::Const(_) => PrivateKind::Const,
            Private::Passthrough(_) => PrivateKind::Passthrough,
            Private::Grouping(_) => PrivateKind::Grouping,
        }
    }

    /// The column set carried by the payload, if it is one.
    pub fn col_set(&self) -> Option<&ColSet> {
        match self {
            Private::Passthrough(cols) | Private::Grouping(cols) => Some(cols),
            _ => None,
        }
    }
}

impl fmt::Display for Private {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Private::Scan(scan) => write!(f, "{}", scan.table),
            Private::Column(col) => write!(f, "{}", col),
            Private::Const(value) => write!(f, "{}", value),
            Private::Passthrough(cols) => write!(f, "passthrough={}", cols),
            Private::Grouping(cols) => write!(f, "grouping={}", cols),
        }
    }
}

/// An interned, immutable expression node.
#[derive(Clone, Debug)]
pub struct ExprNode {
    pub op: Operator,
    pub children: Vec<ExprId>,
    pub private: Option<Private>,
    pub props: Props,
}

impl ExprNode {
    pub fn child(&self, idx: usize) -> Option<ExprId> {
        self.children.get(idx).copied()
    }
}
