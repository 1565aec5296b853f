use itertools::Itertools;

use super::{ColSet, ExprNode, Operator, Private};
use crate::catalog::{Catalog, ColumnId};

/// Logical properties of a relational expression, derived once when it's interned.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RelationalProps {
    /// Output columns in output order.
    pub output_cols: Vec<ColumnId>,
    pub output_set: ColSet,
    /// Output columns that can never be NULL.
    pub not_null_cols: ColSet,
    /// Columns referenced by the expression but not produced by it, e.g. the left side
    /// columns a correlated right side of an apply join refers to.
    pub outer_cols: ColSet,
}

/// Logical properties of a scalar expression.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScalarProps {
    /// Columns the expression references.
    pub outer_cols: ColSet,
    /// Columns defined by projection and aggregation items, in list order.
    pub produced_cols: Vec<ColumnId>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Props {
    Relational(RelationalProps),
    Scalar(ScalarProps),
}

impl Props {
    pub fn outer_cols(&self) -> &ColSet {
        match self {
            Props::Relational(p) => &p.outer_cols,
            Props::Scalar(p) => &p.outer_cols,
        }
    }

    fn produced_cols(&self) -> &[ColumnId] {
        match self {
            Props::Relational(_) => &[],
            Props::Scalar(p) => &p.produced_cols,
        }
    }

    pub fn relational(&self) -> Option<&RelationalProps> {
        match self {
            Props::Relational(p) => Some(p),
            Props::Scalar(_) => None,
        }
    }
}

/// Derive the properties of a node whose children are already interned. `children` are the
/// child nodes in operand order.
pub(super) fn derive_props(
    op: Operator,
    children: &[&ExprNode],
    private: Option<&Private>,
    catalog: &Catalog,
) -> Props {
    if op.is_relational() {
        Props::Relational(derive_relational(op, children, private, catalog))
    } else {
        Props::Scalar(derive_scalar(op, children, private))
    }
}

fn rel(node: &ExprNode) -> RelationalProps {
    node.props.relational().cloned().unwrap_or_default()
}

fn derive_relational(
    op: Operator,
    children: &[&ExprNode],
    private: Option<&Private>,
    catalog: &Catalog,
) -> RelationalProps {
    // columns referenced by scalar operands, collected for outer column derivation
    let scalar_refs = children
        .iter()
        .filter(|c| !c.op.is_relational())
        .fold(ColSet::new(), |acc, c| acc.union(c.props.outer_cols()));

    let (output_cols, not_null_cols, input_outer) = match op {
        Operator::Scan => {
            let cols = match private {
                Some(Private::Scan(scan)) => scan.cols.clone(),
                _ => vec![],
            };
            let not_null = cols
                .iter()
                .copied()
                .filter(|c| catalog.column(*c).map(|c| !c.nullable).unwrap_or(false))
                .collect::<ColSet>();
            (cols, not_null, ColSet::new())
        }
        Operator::Select => {
            let input = rel(children[0]);
            (input.output_cols, input.not_null_cols, input.outer_cols)
        }
        Operator::Project => {
            let input = rel(children[0]);
            let passthrough = private.and_then(|p| p.col_set()).cloned().unwrap_or_default();
            let mut cols = input
                .output_cols
                .iter()
                .copied()
                .filter(|c| passthrough.contains(c))
                .collect::<Vec<_>>();
            cols.extend(children[1].props.produced_cols());
            let not_null = input.not_null_cols.intersection(&passthrough);
            (cols, not_null, input.outer_cols)
        }
        Operator::GroupBy => {
            let input = rel(children[0]);
            let grouping = private.and_then(|p| p.col_set()).cloned().unwrap_or_default();
            let mut cols = input
                .output_cols
                .iter()
                .copied()
                .filter(|c| grouping.contains(c))
                .collect::<Vec<_>>();
            cols.extend(children[1].props.produced_cols());
            let not_null = input.not_null_cols.intersection(&grouping);
            (cols, not_null, input.outer_cols)
        }
        op if op.is_join() => {
            let left = rel(children[0]);
            let right = rel(children[1]);
            let (cols, not_null) = match op {
                Operator::SemiJoin
                | Operator::AntiJoin
                | Operator::SemiJoinApply
                | Operator::AntiJoinApply => (left.output_cols.clone(), left.not_null_cols.clone()),
                _ => {
                    let cols = left
                        .output_cols
                        .iter()
                        .chain(right.output_cols.iter())
                        .copied()
                        .collect_vec();
                    let not_null = match op {
                        Operator::InnerJoin | Operator::InnerJoinApply => {
                            left.not_null_cols.union(&right.not_null_cols)
                        }
                        Operator::LeftJoin | Operator::LeftJoinApply => left.not_null_cols.clone(),
                        Operator::RightJoin | Operator::RightJoinApply => {
                            right.not_null_cols.clone()
                        }
                        _ => ColSet::new(),
                    };
                    (cols, not_null)
                }
            };
            let outer = left.outer_cols.union(&right.outer_cols);
            (cols, not_null, outer)
        }
        _ => unreachable!("{} is not a relational operator", op),
    };

    let output_set = output_cols.iter().copied().collect::<ColSet>();
    // the right side of a join may refer to the left side's columns, which are produced
    // within the join, so subtract the full output of every relational input
    let produced = children
        .iter()
        .filter(|c| c.op.is_relational())
        .fold(output_set.clone(), |acc, c| acc.union(&rel(c).output_set));
    let outer_cols = input_outer.union(&scalar_refs).difference(&produced);

    RelationalProps {
        output_cols,
        output_set,
        not_null_cols,
        outer_cols,
    }
}

fn derive_scalar(op: Operator, children: &[&ExprNode], private: Option<&Private>) -> ScalarProps {
    let mut outer_cols = children
        .iter()
        .fold(ColSet::new(), |acc, c| acc.union(c.props.outer_cols()));
    let mut produced_cols = vec![];
    match (op, private) {
        (Operator::Variable, Some(Private::Column(col))) => outer_cols.insert(*col),
        (Operator::ProjectionsItem | Operator::AggregationsItem, Some(Private::Column(col))) => {
            produced_cols.push(*col)
        }
        (Operator::Projections | Operator::Aggregations, _) => produced_cols.extend(
            children
                .iter()
                .flat_map(|c| c.props.produced_cols().iter().copied()),
        ),
        _ => {}
    }
    ScalarProps {
        outer_cols,
        produced_cols,
    }
}
