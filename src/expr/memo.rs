use std::collections::HashMap;

use ahash::RandomState;
use itertools::Itertools;

use super::props::derive_props;
use super::{
    ColSet, ExprId, ExprNode, OperandKind, Operator, OperatorKind, Private, RelationalProps,
    ScanPrivate,
};
use crate::catalog::{Catalog, ColumnId, TableCatalog};
use crate::types::ScalarValue;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ExprError {
    #[error("{op} expects {expected} operands, got {got}")]
    OperandCount {
        op: Operator,
        expected: usize,
        got: usize,
    },
    #[error("operand {idx} of {op} has the wrong kind: expected {expected}, got {got}")]
    OperandKind {
        op: Operator,
        idx: usize,
        expected: String,
        got: Operator,
    },
    #[error("{op} expects a {expected} private, got {got}")]
    Private {
        op: Operator,
        expected: String,
        got: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(pub usize);

/// A set of expressions proven equivalent. A freshly interned expression starts in its own
/// group; when the normalizer rewrites an expression, the replacement joins the group of the
/// expression it replaced.
#[derive(Clone, Debug, Default)]
pub struct Group {
    members: Vec<ExprId>,
    /// The group's normalized member, once known.
    normalized: Option<ExprId>,
}

impl Group {
    pub fn members(&self) -> &[ExprId] {
        &self.members
    }

    pub fn normalized(&self) -> Option<ExprId> {
        self.normalized
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ExprKey {
    op: Operator,
    children: Vec<ExprId>,
    private: Option<Private>,
}

/// Arena of interned expressions. Structurally identical expressions always map to the same
/// [`ExprId`], so equality checks and "did it change" checks are id comparisons.
///
/// A memo is owned by a single normalization context and is never shared between queries.
#[derive(Debug)]
pub struct Memo {
    catalog: Catalog,
    exprs: Vec<ExprNode>,
    interned: HashMap<ExprKey, ExprId, RandomState>,
    groups: Vec<Group>,
    expr_groups: Vec<GroupId>,
    /// The rule set whose normal forms the groups record.
    normalized_by: Option<u64>,
}

impl Memo {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            exprs: vec![],
            interned: HashMap::with_hasher(RandomState::new()),
            groups: vec![],
            expr_groups: vec![],
            normalized_by: None,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    pub fn expr(&self, id: ExprId) -> &ExprNode {
        &self.exprs[id.0]
    }

    pub fn op(&self, id: ExprId) -> Operator {
        self.exprs[id.0].op
    }

    /// Number of interned expressions.
    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    pub fn relational_props(&self, id: ExprId) -> Option<&RelationalProps> {
        self.expr(id).props.relational()
    }

    /// Columns referenced by a scalar expression, or the outer columns of a relational one.
    pub fn outer_cols(&self, id: ExprId) -> &ColSet {
        self.expr(id).props.outer_cols()
    }

    /// The items of a list expression. Any other expression yields an empty slice.
    pub fn list_items(&self, id: ExprId) -> &[ExprId] {
        let expr = self.expr(id);
        if expr.op.is_list() {
            &expr.children
        } else {
            &[]
        }
    }

    pub fn group_of(&self, id: ExprId) -> GroupId {
        self.expr_groups[id.0]
    }

    pub fn group(&self, id: GroupId) -> &Group {
        &self.groups[id.0]
    }

    /// The normalized form recorded for the group `id` belongs to.
    pub fn normalized(&self, id: ExprId) -> Option<ExprId> {
        self.group(self.group_of(id)).normalized
    }

    /// Tie the recorded normal forms to `rule_set`. Returns false if they already belong to
    /// another rule set.
    pub(crate) fn claim_normal_forms(&mut self, rule_set: u64) -> bool {
        match self.normalized_by {
            Some(owner) => owner == rule_set,
            None => {
                self.normalized_by = Some(rule_set);
                true
            }
        }
    }

    pub(crate) fn set_normalized(&mut self, id: ExprId, normalized: ExprId) {
        let group = self.group_of(id);
        self.groups[group.0].normalized = Some(normalized);
    }

    /// Record that `replacement` is equivalent to `original` by moving the replacement's
    /// group members into the original's group.
    pub(crate) fn merge_groups(&mut self, original: ExprId, replacement: ExprId) {
        let target = self.group_of(original);
        let source = self.group_of(replacement);
        if target == source {
            return;
        }
        let source_group = std::mem::take(&mut self.groups[source.0]);
        for member in source_group.members.iter() {
            self.expr_groups[member.0] = target;
        }
        let target_group = &mut self.groups[target.0];
        target_group.members.extend(source_group.members);
        if target_group.normalized.is_none() {
            target_group.normalized = source_group.normalized;
        }
    }

    /// Intern an expression after checking it against the operator's shape. Returns the
    /// existing id if a structurally identical expression is already interned.
    pub fn intern(
        &mut self,
        op: Operator,
        children: Vec<ExprId>,
        private: Option<Private>,
    ) -> Result<ExprId, ExprError> {
        self.check_shape(op, &children, private.as_ref())?;
        Ok(self.add(op, children, private))
    }

    fn check_shape(
        &self,
        op: Operator,
        children: &[ExprId],
        private: Option<&Private>,
    ) -> Result<(), ExprError> {
        let shape = op.shape();
        let expected = match shape.list_item {
            Some(item) => vec![item; children.len()],
            None => shape.operands.to_vec(),
        };
        if expected.len() != children.len() {
            return Err(ExprError::OperandCount {
                op,
                expected: expected.len(),
                got: children.len(),
            });
        }
        for (idx, (kind, child)) in expected.iter().zip_eq(children.iter()).enumerate() {
            let child_op = self.op(*child);
            let ok = match kind {
                OperandKind::Relational => child_op.is_relational(),
                OperandKind::Scalar | OperandKind::Filter => {
                    child_op.shape().kind != OperatorKind::Relational
                }
                OperandKind::List(list) | OperandKind::Item(list) => child_op == *list,
            };
            if !ok {
                return Err(ExprError::OperandKind {
                    op,
                    idx,
                    expected: format!("{:?}", kind),
                    got: child_op,
                });
            }
        }
        let got = private.map(|p| p.kind());
        if got != shape.private {
            return Err(ExprError::Private {
                op,
                expected: format!("{:?}", shape.private),
                got: format!("{:?}", got),
            });
        }
        Ok(())
    }

    fn add(&mut self, op: Operator, children: Vec<ExprId>, private: Option<Private>) -> ExprId {
        let key = ExprKey {
            op,
            children,
            private,
        };
        if let Some(id) = self.interned.get(&key) {
            return *id;
        }
        let props = {
            let child_nodes = key.children.iter().map(|c| self.expr(*c)).collect_vec();
            derive_props(op, &child_nodes, key.private.as_ref(), &self.catalog)
        };
        let id = ExprId(self.exprs.len());
        self.exprs.push(ExprNode {
            op,
            children: key.children.clone(),
            private: key.private.clone(),
            props,
        });
        let group = GroupId(self.groups.len());
        self.groups.push(Group {
            members: vec![id],
            normalized: None,
        });
        self.expr_groups.push(group);
        self.interned.insert(key, id);
        id
    }

    pub fn scan(&mut self, table: &TableCatalog) -> ExprId {
        let private = Private::Scan(ScanPrivate {
            table: table.id.clone(),
            cols: table.column_ids.clone(),
        });
        self.add(Operator::Scan, vec![], Some(private))
    }

    pub fn select(&mut self, input: ExprId, filter: ExprId) -> ExprId {
        self.add(Operator::Select, vec![input, filter], None)
    }

    pub fn filters(&mut self, items: Vec<ExprId>) -> ExprId {
        self.add(Operator::Filters, items, None)
    }

    /// Build a `Project`. `items` define new columns, `passthrough` lists input columns that
    /// are passed through unchanged.
    pub fn project(
        &mut self,
        input: ExprId,
        items: Vec<(ColumnId, ExprId)>,
        passthrough: ColSet,
    ) -> ExprId {
        let items = items
            .into_iter()
            .map(|(col, e)| self.add(Operator::ProjectionsItem, vec![e], Some(Private::Column(col))))
            .collect_vec();
        let projections = self.add(Operator::Projections, items, None);
        self.add(
            Operator::Project,
            vec![input, projections],
            Some(Private::Passthrough(passthrough)),
        )
    }

    /// Build a `GroupBy`. An empty `grouping` makes it a scalar group by, which always
    /// returns exactly one row.
    pub fn group_by(
        &mut self,
        input: ExprId,
        aggregations: Vec<(ColumnId, ExprId)>,
        grouping: ColSet,
    ) -> ExprId {
        let items = aggregations
            .into_iter()
            .map(|(col, e)| {
                self.add(Operator::AggregationsItem, vec![e], Some(Private::Column(col)))
            })
            .collect_vec();
        let aggregations = self.add(Operator::Aggregations, items, None);
        self.add(
            Operator::GroupBy,
            vec![input, aggregations],
            Some(Private::Grouping(grouping)),
        )
    }

    /// Build any of the join operators, apply joins included.
    ///
    /// # Panics
    ///
    /// Panics if `op` is not a join. Use [`Memo::intern`] to get an [`ExprError`] instead.
    pub fn join(&mut self, op: Operator, left: ExprId, right: ExprId, on: ExprId) -> ExprId {
        assert!(op.is_join(), "{} is not a join operator", op);
        self.add(op, vec![left, right, on], None)
    }

    pub fn variable(&mut self, col: ColumnId) -> ExprId {
        self.add(Operator::Variable, vec![], Some(Private::Column(col)))
    }

    pub fn constant(&mut self, value: impl Into<ScalarValue>) -> ExprId {
        self.add(Operator::Const, vec![], Some(Private::Const(value.into())))
    }

    pub fn null(&mut self) -> ExprId {
        self.add(Operator::Null, vec![], None)
    }

    pub fn bool_const(&mut self, value: bool) -> ExprId {
        let op = if value { Operator::True } else { Operator::False };
        self.add(op, vec![], None)
    }

    pub fn not(&mut self, input: ExprId) -> ExprId {
        self.add(Operator::Not, vec![input], None)
    }

    /// Build a binary scalar operator: boolean connectives, `Is`/`IsNot`, comparisons and
    /// arithmetic.
    ///
    /// # Panics
    ///
    /// Panics if `op` does not take exactly two scalar operands.
    pub fn binary(&mut self, op: Operator, left: ExprId, right: ExprId) -> ExprId {
        assert!(
            op.shape().operands.len() == 2 && !op.is_relational(),
            "{} is not a binary scalar operator",
            op
        );
        self.add(op, vec![left, right], None)
    }

    pub fn and(&mut self, left: ExprId, right: ExprId) -> ExprId {
        self.binary(Operator::And, left, right)
    }

    pub fn or(&mut self, left: ExprId, right: ExprId) -> ExprId {
        self.binary(Operator::Or, left, right)
    }

    /// Build an aggregate function. `CountRows` takes no argument.
    pub fn aggregate(&mut self, op: Operator, arg: Option<ExprId>) -> ExprId {
        self.add(op, arg.into_iter().collect(), None)
    }
}

#[cfg(test)]
mod tests {
    use arrow::datatypes::DataType;

    use super::*;

    fn build_memo() -> (Memo, TableCatalog) {
        let mut catalog = Catalog::new();
        let t = catalog.add_table(
            "t",
            &[("a", DataType::Int32, true), ("b", DataType::Int32, false)],
        );
        (Memo::new(catalog), t)
    }

    #[test]
    fn test_structurally_identical_exprs_intern_once() {
        let (mut memo, t) = build_memo();
        let scan1 = memo.scan(&t);
        let a1 = memo.variable(t.column_ids[0]);
        let one = memo.constant(1);
        let gt1 = memo.binary(Operator::Gt, a1, one);
        let f1 = memo.filters(vec![gt1]);
        let sel1 = memo.select(scan1, f1);

        let count = memo.len();
        let scan2 = memo.scan(&t);
        let a2 = memo.variable(t.column_ids[0]);
        let one2 = memo.constant(1);
        let gt2 = memo.binary(Operator::Gt, a2, one2);
        let f2 = memo.filters(vec![gt2]);
        let sel2 = memo.select(scan2, f2);

        assert_eq!(sel1, sel2);
        assert_eq!(memo.len(), count);
        assert_ne!(memo.constant(2), one);
    }

    #[test]
    fn test_intern_checks_shape() {
        let (mut memo, t) = build_memo();
        let scan = memo.scan(&t);
        let a = memo.variable(t.column_ids[0]);
        assert_eq!(
            memo.intern(Operator::Select, vec![scan], None),
            Err(ExprError::OperandCount {
                op: Operator::Select,
                expected: 2,
                got: 1
            })
        );
        assert!(matches!(
            memo.intern(Operator::Select, vec![a, a], None),
            Err(ExprError::OperandKind { idx: 0, .. })
        ));
        assert!(matches!(
            memo.intern(Operator::Variable, vec![], None),
            Err(ExprError::Private { .. })
        ));
        let filters = memo.intern(Operator::Filters, vec![a, a], None).unwrap();
        assert_eq!(memo.list_items(filters), &[a, a]);
    }

    #[test]
    fn test_props_derivation() {
        let (mut memo, t) = build_memo();
        let (a, b) = (t.column_ids[0], t.column_ids[1]);
        let scan = memo.scan(&t);
        let props = memo.relational_props(scan).unwrap();
        assert_eq!(props.output_cols, vec![a, b]);
        assert!(props.not_null_cols.contains(&b));
        assert!(!props.not_null_cols.contains(&a));

        let c = memo
            .catalog_mut()
            .add_synthesized_column("c", DataType::Int32, true);
        let va = memo.variable(a);
        let vb = memo.variable(b);
        let plus = memo.binary(Operator::Plus, va, vb);
        let project = memo.project(scan, vec![(c, plus)], [b].into_iter().collect());
        let props = memo.relational_props(project).unwrap();
        assert_eq!(props.output_cols, vec![b, c]);
        assert_eq!(props.not_null_cols, [b].into_iter().collect());
        assert!(props.outer_cols.is_empty());

        // a correlated right side has outer columns until it's joined with its left side
        let u = memo
            .catalog_mut()
            .add_table("u", &[("x", DataType::Int32, true)]);
        let scan_u = memo.scan(&u);
        let vx = memo.variable(u.column_ids[0]);
        let eq = memo.binary(Operator::Eq, va, vx);
        let filters = memo.filters(vec![eq]);
        let correlated = memo.select(scan_u, filters);
        assert_eq!(
            memo.relational_props(correlated).unwrap().outer_cols,
            [a].into_iter().collect()
        );
        let truth = memo.bool_const(true);
        let apply = memo.join(Operator::InnerJoinApply, scan, correlated, truth);
        assert!(memo.relational_props(apply).unwrap().outer_cols.is_empty());
    }

    #[test]
    fn test_merge_groups() {
        let (mut memo, t) = build_memo();
        let scan = memo.scan(&t);
        let truth = memo.bool_const(true);
        let select = memo.select(scan, truth);
        assert_ne!(memo.group_of(select), memo.group_of(scan));

        memo.merge_groups(select, scan);
        memo.set_normalized(select, scan);
        assert_eq!(memo.group_of(select), memo.group_of(scan));
        assert_eq!(memo.group(memo.group_of(scan)).members(), &[select, scan]);
        assert_eq!(memo.normalized(scan), Some(scan));
    }

    #[test]
    fn test_normal_forms_belong_to_one_rule_set() {
        let (mut memo, _) = build_memo();
        assert!(memo.claim_normal_forms(7));
        assert!(memo.claim_normal_forms(7));
        assert!(!memo.claim_normal_forms(8));
    }

    #[test]
    #[should_panic(expected = "is not a join operator")]
    fn test_join_rejects_non_join_operator() {
        let (mut memo, t) = build_memo();
        let scan = memo.scan(&t);
        let truth = memo.bool_const(true);
        memo.join(Operator::Select, scan, scan, truth);
    }

    #[test]
    #[should_panic(expected = "is not a binary scalar operator")]
    fn test_binary_rejects_relational_operator() {
        let (mut memo, t) = build_memo();
        let scan = memo.scan(&t);
        let truth = memo.bool_const(true);
        memo.binary(Operator::Select, scan, truth);
    }
}
