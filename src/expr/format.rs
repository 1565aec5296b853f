use std::fmt::Write;

use itertools::Itertools;

use super::{ExprId, Memo, Operator, Private};
use crate::catalog::ColumnId;

impl Memo {
    /// Write the relational tree rooted at `id` with one operator per line, scalar operands
    /// rendered inline. Scalar roots are written as a single line.
    pub fn explain(&self, id: ExprId, level: usize, explain_result: &mut dyn Write) {
        let expr = self.expr(id);
        let indent = " ".repeat(level * 2);
        if !expr.op.is_relational() {
            writeln!(explain_result, "{}{}", indent, self.format_scalar(id)).unwrap();
            return;
        }
        let detail = match expr.op {
            Operator::Scan => match &expr.private {
                Some(Private::Scan(scan)) => {
                    format!("table {}, columns [{}]", scan.table, self.format_cols(&scan.cols))
                }
                _ => String::new(),
            },
            Operator::Select => format!("filters {}", self.format_filter(expr.children[1])),
            Operator::Project => {
                let passthrough = expr
                    .private
                    .as_ref()
                    .and_then(|p| p.col_set())
                    .map(|cols| self.format_cols(&cols.iter().collect_vec()))
                    .unwrap_or_default();
                format!(
                    "passthrough [{}], projections [{}]",
                    passthrough,
                    self.format_items(expr.children[1])
                )
            }
            Operator::GroupBy => {
                let grouping = expr
                    .private
                    .as_ref()
                    .and_then(|p| p.col_set())
                    .map(|cols| self.format_cols(&cols.iter().collect_vec()))
                    .unwrap_or_default();
                format!(
                    "grouping [{}], aggregations [{}]",
                    grouping,
                    self.format_items(expr.children[1])
                )
            }
            op if op.is_join() => format!("on {}", self.format_filter(expr.children[2])),
            _ => String::new(),
        };
        writeln!(explain_result, "{}{}: {}", indent, expr.op, detail).unwrap();
        for child in expr.children.iter() {
            if self.op(*child).is_relational() {
                self.explain(*child, level + 1, explain_result);
            }
        }
    }

    fn format_cols(&self, cols: &[ColumnId]) -> String {
        cols.iter()
            .map(|c| {
                self.catalog()
                    .column(*c)
                    .map(|c| c.qualified_name())
                    .unwrap_or_else(|| c.to_string())
            })
            .join(", ")
    }

    fn format_filter(&self, id: ExprId) -> String {
        if self.op(id) == Operator::Filters {
            self.format_scalar(id)
        } else {
            format!("({})", self.format_scalar(id))
        }
    }

    fn format_items(&self, list: ExprId) -> String {
        self.list_items(list)
            .iter()
            .map(|item| self.format_scalar(*item))
            .join(", ")
    }

    /// Render a scalar expression as sql-like text.
    pub fn format_scalar(&self, id: ExprId) -> String {
        let expr = self.expr(id);
        let operand = |idx: usize| {
            let child = expr.children[idx];
            let text = self.format_scalar(child);
            if self.op(child).binary_operator().is_some()
                || matches!(self.op(child), Operator::Is | Operator::IsNot)
            {
                format!("({})", text)
            } else {
                text
            }
        };
        match expr.op {
            Operator::Variable => match &expr.private {
                Some(Private::Column(col)) => self.format_cols(&[*col]),
                _ => "?".to_string(),
            },
            Operator::Const => match &expr.private {
                Some(p) => p.to_string(),
                None => "?".to_string(),
            },
            Operator::Null => "NULL".to_string(),
            Operator::True => "true".to_string(),
            Operator::False => "false".to_string(),
            Operator::Not => format!("NOT {}", operand(0)),
            Operator::Is => format!("{} IS {}", operand(0), operand(1)),
            Operator::IsNot => format!("{} IS NOT {}", operand(0), operand(1)),
            Operator::Filters => format!("[{}]", self.format_items(id)),
            Operator::Projections | Operator::Aggregations => self.format_items(id),
            Operator::ProjectionsItem | Operator::AggregationsItem => match &expr.private {
                Some(Private::Column(col)) => {
                    format!("{} := {}", self.format_cols(&[*col]), operand(0))
                }
                _ => operand(0),
            },
            Operator::CountRows => "count_rows()".to_string(),
            Operator::Count | Operator::Sum | Operator::Min | Operator::Max => {
                format!("{}({})", expr.op.as_ref().to_lowercase(), operand(0))
            }
            op => match op.binary_operator() {
                Some(bin) => format!("{} {} {}", operand(0), bin, operand(1)),
                None => format!("{}(?)", op),
            },
        }
    }
}

pub fn pretty_expr_tree_string(memo: &Memo, root: ExprId) -> String {
    let mut explain_result = String::new();
    memo.explain(root, 0, &mut explain_result);
    explain_result
}
