use super::predicates::{lookup, Capability};
use crate::expr::{ExprId, Memo, OperandKind, Operator};
use crate::optimizer::core::{Bindings, OpRef, Replace, Value};
use crate::optimizer::NormalizeError;

/// Builds a rule's replacement from the bindings of a successful match. Every node it builds
/// is interned, so a replacement that already exists in the memo is reused.
pub struct Factory<'a> {
    memo: &'a mut Memo,
    bindings: &'a Bindings,
    /// The expression the rule matched, used by `(OpName)` without arguments.
    root: ExprId,
}

impl<'a> Factory<'a> {
    pub fn new(memo: &'a mut Memo, bindings: &'a Bindings, root: ExprId) -> Self {
        Self {
            memo,
            bindings,
            root,
        }
    }

    /// Evaluate `replace`, which has to produce an expression.
    pub fn construct(&mut self, replace: &Replace) -> Result<ExprId, NormalizeError> {
        match self.eval(replace)? {
            Value::Expr(id) => Ok(id),
            Value::Bool(b) => Ok(self.memo.bool_const(b)),
            other => Err(NormalizeError::predicate(
                "replacement",
                format!("produced a {} instead of an expression", other.kind()),
            )),
        }
    }

    fn eval(&mut self, replace: &Replace) -> Result<Value, NormalizeError> {
        match replace {
            Replace::Var(name) => self.bindings.get(name).cloned().ok_or_else(|| {
                NormalizeError::predicate("replacement", format!("${} is not bound", name))
            }),
            Replace::List(items) => {
                let mut list = vec![];
                for item in items {
                    match self.eval(item)? {
                        Value::Expr(id) => list.push(id),
                        Value::List(ids) => list.extend(ids),
                        other => {
                            return Err(NormalizeError::predicate(
                                "replacement",
                                format!("a {} can't be a list item", other.kind()),
                            ))
                        }
                    }
                }
                Ok(Value::List(list))
            }
            Replace::Call { name, args } => {
                let mut args = args.iter().map(|a| self.eval(a)).collect::<Result<Vec<_>, _>>()?;
                if name == "OpName" && args.is_empty() {
                    args.push(Value::Expr(self.root));
                }
                match lookup(name) {
                    Some(Capability::Predicate(f)) => f(self.memo, &args).map(Value::Bool),
                    Some(Capability::Function(f)) => f(self.memo, &args),
                    Some(Capability::Constructor(f)) => f(self.memo, &args),
                    None => Err(NormalizeError::predicate(name, "unknown function")),
                }
            }
            Replace::Construct { op, args } => {
                let op = match op {
                    OpRef::Static(op) => *op,
                    OpRef::Dynamic(call) => match self.eval(call)? {
                        Value::Operator(op) => op,
                        other => {
                            return Err(NormalizeError::predicate(
                                "replacement",
                                format!("operator computed as a {}", other.kind()),
                            ))
                        }
                    },
                };
                let args = args.iter().map(|a| self.eval(a)).collect::<Result<Vec<_>, _>>()?;
                self.build(op, args).map(Value::Expr)
            }
        }
    }

    fn build(&mut self, op: Operator, args: Vec<Value>) -> Result<ExprId, NormalizeError> {
        let shape = op.shape();
        if op.is_list() {
            let mut items = vec![];
            for arg in args {
                match arg {
                    Value::List(ids) => items.extend(ids),
                    Value::Expr(id) if self.memo.op(id) == op => {
                        items.extend_from_slice(self.memo.list_items(id))
                    }
                    Value::Expr(id) => items.push(id),
                    other => return Err(mismatch(op, "list item", &other)),
                }
            }
            return Ok(self.memo.intern(op, items, None)?);
        }

        let mut args = args.into_iter();
        let mut children = Vec::with_capacity(shape.operands.len());
        for kind in shape.operands {
            let arg = args
                .next()
                .ok_or_else(|| NormalizeError::predicate("replacement", format!("{} is missing operands", op)))?;
            children.push(self.operand(op, *kind, arg)?);
        }
        let private = match (shape.private, args.next()) {
            (Some(_), Some(Value::Private(p))) => Some(p),
            (None, None) => None,
            (_, arg) => {
                return Err(NormalizeError::predicate(
                    "replacement",
                    format!(
                        "{} expects private {:?}, got {}",
                        op,
                        shape.private,
                        arg.map(|a| a.kind()).unwrap_or("nothing")
                    ),
                ))
            }
        };
        Ok(self.memo.intern(op, children, private)?)
    }

    /// Convert an evaluated argument into an operand of kind `kind`. Bare lists are wrapped in
    /// the list operator the slot expects; a filter slot takes a `Filters` list.
    fn operand(&mut self, op: Operator, kind: OperandKind, arg: Value) -> Result<ExprId, NormalizeError> {
        match (kind, arg) {
            (OperandKind::Filter, Value::List(items)) => {
                Ok(self.memo.intern(Operator::Filters, items, None)?)
            }
            (OperandKind::List(list), Value::List(items)) => Ok(self.memo.intern(list, items, None)?),
            (_, Value::Bool(b)) => Ok(self.memo.bool_const(b)),
            (_, Value::Expr(id)) => Ok(id),
            (_, other) => Err(mismatch(op, &format!("{:?} operand", kind), &other)),
        }
    }
}

fn mismatch(op: Operator, expected: &str, got: &Value) -> NormalizeError {
    NormalizeError::predicate(
        "replacement",
        format!("{} expects a {}, got a {}", op, expected, got.kind()),
    )
}

/// Build the replacement of a rule that matched `root`.
pub fn construct(
    memo: &mut Memo,
    replace: &Replace,
    bindings: &Bindings,
    root: ExprId,
) -> Result<ExprId, NormalizeError> {
    Factory::new(memo, bindings, root).construct(replace)
}

#[cfg(test)]
mod tests {
    use arrow::datatypes::DataType;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::catalog::Catalog;
    use crate::optimizer::dsl::compile_rules;
    use crate::optimizer::norm::PatternMatcher;

    fn apply(memo: &mut Memo, rule_text: &str, root: ExprId) -> Result<ExprId, NormalizeError> {
        let rule = compile_rules(rule_text).unwrap().remove(0);
        let bindings = PatternMatcher::new(memo)
            .match_rule(&rule, root)?
            .expect("rule should match");
        construct(memo, &rule.replace, &bindings, root)
    }

    #[test]
    fn test_construct_wraps_lists_and_reuses_nodes() {
        let mut catalog = Catalog::new();
        let t = catalog.add_table("t", &[("a", DataType::Int32, true)]);
        let mut memo = Memo::new(catalog);
        let scan = memo.scan(&t);
        let a = memo.variable(t.column_ids[0]);
        let one = memo.constant(1);
        let two = memo.constant(2);
        let gt = memo.binary(Operator::Gt, a, one);
        let lt = memo.binary(Operator::Lt, a, two);
        let inner_filters = memo.filters(vec![gt]);
        let outer_filters = memo.filters(vec![lt]);
        let inner = memo.select(scan, inner_filters);
        let outer = memo.select(inner, outer_filters);

        let merged = apply(
            &mut memo,
            "[MergeSelects, Normalize]
             (Select (Select $input:* $inner:*) $filter:*)
             =>
             (Select $input (ConcatFilters $inner $filter))",
            outer,
        )
        .unwrap();
        let both = memo.filters(vec![gt, lt]);
        assert_eq!(merged, memo.select(scan, both));

        // building an existing expression yields the existing id
        let same = apply(
            &mut memo,
            "[Rebuild, Normalize] (Select $input:* $filter:*) => (Select $input $filter)",
            outer,
        )
        .unwrap();
        assert_eq!(same, outer);
    }

    #[test]
    fn test_construct_dynamic_operator() {
        let mut catalog = Catalog::new();
        let l = catalog.add_table("l", &[("x", DataType::Int32, true)]);
        let r = catalog.add_table("r", &[("y", DataType::Int32, true)]);
        let mut memo = Memo::new(catalog);
        let scan_l = memo.scan(&l);
        let scan_r = memo.scan(&r);
        let on = memo.filters(vec![]);
        let join = memo.join(Operator::LeftJoinApply, scan_l, scan_r, on);

        let inner = apply(
            &mut memo,
            "[Strengthen, Normalize]
             (LeftJoin | LeftJoinApply $left:* $right:* $on:*)
             =>
             ((ConvertLeftToInnerJoin (OpName)) $left $right [])",
            join,
        )
        .unwrap();
        assert_eq!(memo.op(inner), Operator::InnerJoinApply);
        assert_eq!(memo.expr(inner).children, vec![scan_l, scan_r, on]);
    }

    #[test]
    fn test_construct_reports_private_mismatch() {
        let mut catalog = Catalog::new();
        let t = catalog.add_table("t", &[("a", DataType::Int32, true)]);
        let mut memo = Memo::new(catalog);
        let scan = memo.scan(&t);
        let truth = memo.bool_const(true);
        let select = memo.select(scan, truth);
        let err = apply(
            &mut memo,
            "[Bad, Normalize] (Select $input:* $filter:*) => (Scan $filter)",
            select,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Scan expects private"), "{}", err);
    }
}
