//! A naive row-at-a-time evaluator used to check that rewrites preserve query results.
//! Scalars follow SQL three-valued logic: a filter keeps a row only if it evaluates to true.

use std::collections::{BTreeMap, HashMap, HashSet};

use itertools::Itertools;

use super::{ExprId, Memo, Operator, Private};
use crate::catalog::{ColumnId, TableId};
use crate::types::ScalarValue;

pub type Row = BTreeMap<ColumnId, ScalarValue>;

/// Table contents, rows in table column order.
#[derive(Clone, Debug, Default)]
pub struct Database {
    tables: HashMap<TableId, Vec<Vec<ScalarValue>>>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: &str, rows: Vec<Vec<ScalarValue>>) {
        self.tables.insert(table.to_string(), rows);
    }
}

/// Evaluate the relation `root` and return its rows projected onto `cols`, sorted so that
/// results can be compared as multisets.
pub fn eval_result(memo: &Memo, db: &Database, root: ExprId, cols: &[ColumnId]) -> Vec<Vec<ScalarValue>> {
    let rows = Evaluator { memo, db }.relation(root, &Row::new());
    rows.into_iter()
        .map(|row| {
            cols.iter()
                .map(|c| row.get(c).cloned().unwrap_or(ScalarValue::Null))
                .collect_vec()
        })
        .sorted_by_key(|row| format!("{:?}", row))
        .collect()
}

struct Evaluator<'a> {
    memo: &'a Memo,
    db: &'a Database,
}

impl<'a> Evaluator<'a> {
    /// `outer` holds the columns of enclosing rows a correlated expression may refer to.
    fn relation(&self, id: ExprId, outer: &Row) -> Vec<Row> {
        let expr = self.memo.expr(id);
        match expr.op {
            Operator::Scan => {
                let Some(Private::Scan(scan)) = &expr.private else {
                    panic!("scan without a table");
                };
                self.db
                    .tables
                    .get(&scan.table)
                    .map(|rows| {
                        rows.iter()
                            .map(|values| scan.cols.iter().copied().zip(values.iter().cloned()).collect())
                            .collect()
                    })
                    .unwrap_or_default()
            }
            Operator::Select => self
                .relation(expr.children[0], outer)
                .into_iter()
                .filter(|row| self.passes(expr.children[1], &merge(outer, row)))
                .collect(),
            Operator::Project => {
                let passthrough = expr.private.as_ref().and_then(|p| p.col_set()).cloned().unwrap_or_default();
                self.relation(expr.children[0], outer)
                    .into_iter()
                    .map(|row| {
                        let scope = merge(outer, &row);
                        let mut out = row
                            .into_iter()
                            .filter(|(c, _)| passthrough.contains(c))
                            .collect::<Row>();
                        for (col, value) in self.items(expr.children[1]) {
                            out.insert(col, self.scalar(value, &scope));
                        }
                        out
                    })
                    .collect()
            }
            Operator::GroupBy => self.group_by(id, outer),
            op if op.is_join() => self.join(id, outer),
            op => panic!("{} is not relational", op),
        }
    }

    fn join(&self, id: ExprId, outer: &Row) -> Vec<Row> {
        use Operator::*;
        let expr = self.memo.expr(id);
        let (left, right, on) = (expr.children[0], expr.children[1], expr.children[2]);
        let apply = matches!(
            expr.op,
            InnerJoinApply | LeftJoinApply | RightJoinApply | FullJoinApply | SemiJoinApply | AntiJoinApply
        );
        let lefts = self.relation(left, outer);
        // an apply join evaluates its right side once per left row
        let rights = if apply {
            lefts.iter().map(|l| self.relation(right, &merge(outer, l))).collect_vec()
        } else {
            vec![self.relation(right, outer)]
        };
        let left_cols = self.memo.relational_props(left).map(|p| p.output_cols.clone()).unwrap_or_default();
        let right_cols = self.memo.relational_props(right).map(|p| p.output_cols.clone()).unwrap_or_default();

        let mut out = vec![];
        let mut matched_right = HashSet::new();
        for (i, l) in lefts.iter().enumerate() {
            let k = if apply { i } else { 0 };
            let mut matched = false;
            for (j, r) in rights[k].iter().enumerate() {
                let joined = merge(l, r);
                if self.passes(on, &merge(outer, &joined)) {
                    matched = true;
                    matched_right.insert((k, j));
                    if !matches!(expr.op, SemiJoin | SemiJoinApply | AntiJoin | AntiJoinApply) {
                        out.push(joined);
                    }
                }
            }
            match expr.op {
                SemiJoin | SemiJoinApply if matched => out.push(l.clone()),
                AntiJoin | AntiJoinApply if !matched => out.push(l.clone()),
                LeftJoin | LeftJoinApply | FullJoin | FullJoinApply if !matched => {
                    out.push(merge(l, &nulls(&right_cols)))
                }
                _ => {}
            }
        }
        if matches!(expr.op, RightJoin | RightJoinApply | FullJoin | FullJoinApply) {
            for (k, rows) in rights.iter().enumerate() {
                for (j, r) in rows.iter().enumerate() {
                    if !matched_right.contains(&(k, j)) {
                        out.push(merge(&nulls(&left_cols), r));
                    }
                }
            }
        }
        out
    }

    fn group_by(&self, id: ExprId, outer: &Row) -> Vec<Row> {
        let expr = self.memo.expr(id);
        let grouping = expr.private.as_ref().and_then(|p| p.col_set()).cloned().unwrap_or_default();
        let input = self.relation(expr.children[0], outer);

        let mut groups: Vec<(Vec<ScalarValue>, Vec<Row>)> = vec![];
        if grouping.is_empty() {
            // a scalar group by has one group, even over an empty input
            groups.push((vec![], input));
        } else {
            for row in input {
                let key = grouping.iter().map(|c| row[&c].clone()).collect_vec();
                match groups.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, rows)) => rows.push(row),
                    None => groups.push((key, vec![row])),
                }
            }
        }

        groups
            .into_iter()
            .map(|(key, rows)| {
                let mut out = grouping.iter().zip(key).collect::<Row>();
                for (col, agg) in self.items(expr.children[1]) {
                    out.insert(col, self.aggregate(agg, &rows, outer));
                }
                out
            })
            .collect()
    }

    fn aggregate(&self, id: ExprId, rows: &[Row], outer: &Row) -> ScalarValue {
        let expr = self.memo.expr(id);
        if expr.op == Operator::CountRows {
            return ScalarValue::Int64(Some(rows.len() as i64));
        }
        let values = rows
            .iter()
            .map(|r| self.scalar(expr.children[0], &merge(outer, r)))
            .filter(|v| !v.is_null())
            .collect_vec();
        match expr.op {
            Operator::Count => ScalarValue::Int64(Some(values.len() as i64)),
            Operator::Sum if values.is_empty() => ScalarValue::Null,
            Operator::Sum => ScalarValue::Int64(values.iter().map(|v| v.as_i64()).sum()),
            Operator::Min => values
                .into_iter()
                .min_by(|a, b| a.partial_cmp_value(b).unwrap_or(std::cmp::Ordering::Equal))
                .unwrap_or(ScalarValue::Null),
            Operator::Max => values
                .into_iter()
                .max_by(|a, b| a.partial_cmp_value(b).unwrap_or(std::cmp::Ordering::Equal))
                .unwrap_or(ScalarValue::Null),
            op => panic!("{} is not an aggregate", op),
        }
    }

    /// `(column, expression)` pairs of a projections or aggregations list.
    fn items(&self, list: ExprId) -> Vec<(ColumnId, ExprId)> {
        self.memo
            .list_items(list)
            .iter()
            .map(|item| {
                let node = self.memo.expr(*item);
                match &node.private {
                    Some(Private::Column(col)) => (*col, node.children[0]),
                    _ => panic!("list item without a column"),
                }
            })
            .collect()
    }

    fn passes(&self, filter: ExprId, row: &Row) -> bool {
        self.truth(filter, row) == Some(true)
    }

    fn truth(&self, id: ExprId, row: &Row) -> Option<bool> {
        self.scalar(id, row).as_bool()
    }

    fn scalar(&self, id: ExprId, row: &Row) -> ScalarValue {
        use Operator::*;
        let expr = self.memo.expr(id);
        let child = |idx: usize| self.scalar(expr.children[idx], row);
        let boolean = |b: Option<bool>| ScalarValue::Boolean(b);
        match expr.op {
            Variable => match &expr.private {
                Some(Private::Column(col)) => row.get(col).cloned().unwrap_or(ScalarValue::Null),
                _ => ScalarValue::Null,
            },
            Const => match &expr.private {
                Some(Private::Const(value)) => value.clone(),
                _ => ScalarValue::Null,
            },
            Null => ScalarValue::Null,
            True => boolean(Some(true)),
            False => boolean(Some(false)),
            Filters => boolean(
                expr.children
                    .iter()
                    .fold(Some(true), |acc, c| and3(acc, self.truth(*c, row))),
            ),
            And => boolean(and3(self.truth(expr.children[0], row), self.truth(expr.children[1], row))),
            Or => boolean(or3(self.truth(expr.children[0], row), self.truth(expr.children[1], row))),
            Not => boolean(self.truth(expr.children[0], row).map(|b| !b)),
            Is | IsNot => {
                let (l, r) = (child(0), child(1));
                let same = match (l.is_null(), r.is_null()) {
                    (true, true) => true,
                    (false, false) => l.partial_cmp_value(&r) == Some(std::cmp::Ordering::Equal),
                    _ => false,
                };
                boolean(Some(same == (expr.op == Is)))
            }
            op if op.is_comparison() => {
                let ord = child(0).partial_cmp_value(&child(1));
                boolean(ord.map(|ord| match op {
                    Eq => ord.is_eq(),
                    Ne => ord.is_ne(),
                    Lt => ord.is_lt(),
                    Le => ord.is_le(),
                    Gt => ord.is_gt(),
                    _ => ord.is_ge(),
                }))
            }
            op if op.is_arithmetic() => {
                let value = child(0).as_i64().zip(child(1).as_i64()).and_then(|(l, r)| match op {
                    Plus => l.checked_add(r),
                    Minus => l.checked_sub(r),
                    _ => l.checked_mul(r),
                });
                ScalarValue::Int64(value)
            }
            op => panic!("can't evaluate {} as a scalar", op),
        }
    }
}

fn merge(outer: &Row, row: &Row) -> Row {
    let mut merged = outer.clone();
    merged.extend(row.iter().map(|(c, v)| (*c, v.clone())));
    merged
}

fn nulls(cols: &[ColumnId]) -> Row {
    cols.iter().map(|c| (*c, ScalarValue::Null)).collect()
}

fn and3(l: Option<bool>, r: Option<bool>) -> Option<bool> {
    match (l, r) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

fn or3(l: Option<bool>, r: Option<bool>) -> Option<bool> {
    match (l, r) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use arrow::datatypes::DataType;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::catalog::Catalog;

    #[test]
    fn test_outer_joins_null_extend() {
        let mut catalog = Catalog::new();
        let l = catalog.add_table("l", &[("x", DataType::Int32, true)]);
        let r = catalog.add_table("r", &[("y", DataType::Int32, true)]);
        let mut memo = Memo::new(catalog);
        let scan_l = memo.scan(&l);
        let scan_r = memo.scan(&r);
        let x = memo.variable(l.column_ids[0]);
        let y = memo.variable(r.column_ids[0]);
        let eq = memo.binary(Operator::Eq, x, y);
        let on = memo.filters(vec![eq]);

        let mut db = Database::new();
        let int = |v: i32| ScalarValue::Int32(Some(v));
        db.insert("l", vec![vec![int(1)], vec![int(2)], vec![ScalarValue::Int32(None)]]);
        db.insert("r", vec![vec![int(2)], vec![int(3)]]);
        let cols = [l.column_ids[0], r.column_ids[0]];

        let full = memo.join(Operator::FullJoin, scan_l, scan_r, on);
        let mut expected = vec![
            vec![int(1), ScalarValue::Null],
            vec![int(2), int(2)],
            vec![ScalarValue::Int32(None), ScalarValue::Null],
            vec![ScalarValue::Null, int(3)],
        ];
        expected.sort_by_key(|row| format!("{:?}", row));
        assert_eq!(eval_result(&memo, &db, full, &cols), expected);

        let anti = memo.join(Operator::AntiJoin, scan_l, scan_r, on);
        assert_eq!(eval_result(&memo, &db, anti, &cols[..1]).len(), 2);
    }

    #[test]
    fn test_scalar_group_by_over_empty_input() {
        let mut catalog = Catalog::new();
        let t = catalog.add_table("t", &[("a", DataType::Int32, true)]);
        let n = catalog.add_synthesized_column("n", DataType::Int64, false);
        let mut memo = Memo::new(catalog);
        let scan = memo.scan(&t);
        let count = memo.aggregate(Operator::CountRows, None);
        let group_by = memo.group_by(scan, vec![(n, count)], Default::default());

        let db = Database::new();
        assert_eq!(
            eval_result(&memo, &db, group_by, &[n]),
            vec![vec![ScalarValue::Int64(Some(0))]]
        );
    }
}
