use log::trace;

use super::predicates::{lookup, Capability};
use crate::expr::{ExprId, Memo, Operator};
use crate::optimizer::core::{
    Arg, Bindings, Call, Condition, ListPattern, Pattern, Rule, Value,
};
use crate::optimizer::NormalizeError;

/// Matches a rule's pattern against one expression.
///
/// Matching never changes the memo. Captures go into a [`Bindings`] trail; whenever a
/// sub-pattern fails, the captures it made are rolled back, so the bindings returned for a
/// successful match hold exactly the captures along the successful path.
pub struct PatternMatcher<'a> {
    memo: &'a Memo,
}

impl<'a> PatternMatcher<'a> {
    pub fn new(memo: &'a Memo) -> Self {
        Self { memo }
    }

    /// Try `rule` at `root`. Returns the bindings if the structure and every side-condition
    /// matched.
    pub fn match_rule(&self, rule: &Rule, root: ExprId) -> Result<Option<Bindings>, NormalizeError> {
        let mut bindings = Bindings::new();
        let matched = self.match_pattern(&rule.pattern, &Value::Expr(root), &mut bindings)?;
        trace!(
            "rule {} {} at {}",
            rule.name,
            if matched { "matched" } else { "didn't match" },
            root
        );
        Ok(matched.then_some(bindings))
    }

    pub fn match_pattern(
        &self,
        pattern: &Pattern,
        value: &Value,
        bindings: &mut Bindings,
    ) -> Result<bool, NormalizeError> {
        let checkpoint = bindings.checkpoint();
        let matched = match pattern {
            Pattern::Any => true,
            Pattern::Bind { name, pattern } => {
                // bound before the inner pattern runs, so its conditions can read it
                bindings.bind(name, value.clone());
                self.match_pattern(pattern, value, bindings)?
            }
            Pattern::Ref(name) => match bindings.get(name) {
                Some(bound) => self.same_value(bound, value),
                None => {
                    return Err(NormalizeError::predicate(
                        name,
                        "variable referenced before it was captured",
                    ))
                }
            },
            Pattern::Match { ops, operands } => self.match_operator(ops, operands, value, bindings)?,
            Pattern::Not(inner) => {
                let matched = self.match_pattern(inner, value, bindings)?;
                bindings.rollback(checkpoint);
                !matched
            }
            Pattern::Constrain {
                pattern,
                conditions,
            } => {
                self.match_pattern(pattern, value, bindings)?
                    && self.check_conditions(conditions, bindings)?
            }
            Pattern::List(list) => match self.list_items(value) {
                Some(items) => self.match_list(list, &items, bindings)?,
                None => false,
            },
        };
        if !matched {
            bindings.rollback(checkpoint);
        }
        Ok(matched)
    }

    fn match_operator(
        &self,
        ops: &[Operator],
        operands: &[Pattern],
        value: &Value,
        bindings: &mut Bindings,
    ) -> Result<bool, NormalizeError> {
        let Value::Expr(id) = value else {
            return Ok(false);
        };
        if !ops.contains(&self.memo.op(*id)) {
            return Ok(false);
        }
        let values = self.operands(*id);
        if operands.len() > values.len() {
            return Ok(false);
        }
        for (pattern, value) in operands.iter().zip(values.iter()) {
            if !self.match_pattern(pattern, value, bindings)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The operands patterns see: children in order followed by the private payload. A list
    /// operator has a single operand, the list of its items.
    fn operands(&self, id: ExprId) -> Vec<Value> {
        let expr = self.memo.expr(id);
        if expr.op.is_list() {
            return vec![Value::List(expr.children.clone())];
        }
        expr.children
            .iter()
            .map(|c| Value::Expr(*c))
            .chain(expr.private.iter().map(|p| Value::Private(p.clone())))
            .collect()
    }

    fn list_items(&self, value: &Value) -> Option<Vec<ExprId>> {
        match value {
            Value::List(items) => Some(items.clone()),
            Value::Expr(id) if self.memo.op(*id).is_list() => {
                Some(self.memo.list_items(*id).to_vec())
            }
            _ => None,
        }
    }

    fn match_list(
        &self,
        list: &ListPattern,
        items: &[ExprId],
        bindings: &mut Bindings,
    ) -> Result<bool, NormalizeError> {
        match list {
            ListPattern::Exact(patterns) => {
                if patterns.len() != items.len() {
                    return Ok(false);
                }
                for (pattern, item) in patterns.iter().zip(items.iter()) {
                    if !self.match_pattern(pattern, &Value::Expr(*item), bindings)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            ListPattern::Scan { head, item, tail } => {
                if items.is_empty() {
                    return Ok(false);
                }
                let candidates = match (head, tail) {
                    (Some(_), Some(_)) => 0..items.len(),
                    (None, _) => 0..1,
                    (Some(_), None) => items.len() - 1..items.len(),
                };
                for idx in candidates {
                    if !self.match_pattern(item, &Value::Expr(items[idx]), bindings)? {
                        continue;
                    }
                    if let Some(name) = head.as_ref().and_then(|e| e.name.as_ref()) {
                        bindings.bind(name, Value::List(items[..idx].to_vec()));
                    }
                    if let Some(name) = tail.as_ref().and_then(|e| e.name.as_ref()) {
                        bindings.bind(name, Value::List(items[idx + 1..].to_vec()));
                    }
                    return Ok(true);
                }
                Ok(false)
            }
        }
    }

    fn check_conditions(
        &self,
        conditions: &[Condition],
        bindings: &Bindings,
    ) -> Result<bool, NormalizeError> {
        for condition in conditions {
            let holds = match self.eval_call(&condition.call, bindings)? {
                Value::Bool(b) => b,
                other => {
                    return Err(NormalizeError::predicate(
                        &condition.call.name,
                        format!("returned a {} instead of a bool", other.kind()),
                    ))
                }
            };
            if holds == condition.negated {
                trace!("condition {} failed", condition.call);
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn eval_call(&self, call: &Call, bindings: &Bindings) -> Result<Value, NormalizeError> {
        let args = call
            .args
            .iter()
            .map(|arg| match arg {
                Arg::Var(name) => bindings.get(name).cloned().ok_or_else(|| {
                    NormalizeError::predicate(&call.name, format!("${} is not bound", name))
                }),
                Arg::Call(inner) => self.eval_call(inner, bindings),
            })
            .collect::<Result<Vec<_>, _>>()?;
        match lookup(&call.name) {
            Some(Capability::Predicate(f)) => f(self.memo, &args).map(Value::Bool),
            Some(Capability::Function(f)) => f(self.memo, &args),
            Some(Capability::Constructor(_)) => Err(NormalizeError::predicate(
                &call.name,
                "constructors can't run while matching",
            )),
            None => Err(NormalizeError::predicate(&call.name, "unknown function")),
        }
    }

    /// Structural equality of two captured values. Lists compare item by item, so a list
    /// operator equals a bare list with the same items.
    fn same_value(&self, a: &Value, b: &Value) -> bool {
        match (self.list_items(a), self.list_items(b)) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        }
    }
}

#[cfg(test)]
mod tests {
    use arrow::datatypes::DataType;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::catalog::Catalog;
    use crate::optimizer::dsl::compile_rules;

    struct Fixture {
        memo: Memo,
        scan_l: ExprId,
        x: ExprId,
        y: ExprId,
        one: ExprId,
    }

    fn build_fixture() -> Fixture {
        let mut catalog = Catalog::new();
        let l = catalog.add_table(
            "l",
            &[("x", DataType::Int32, true), ("y", DataType::Int32, true)],
        );
        let mut memo = Memo::new(catalog);
        let scan_l = memo.scan(&l);
        let x = memo.variable(l.column_ids[0]);
        let y = memo.variable(l.column_ids[1]);
        let one = memo.constant(1);
        Fixture {
            memo,
            scan_l,
            x,
            y,
            one,
        }
    }

    fn try_match(memo: &Memo, rule_text: &str, root: ExprId) -> Option<Bindings> {
        let rules = compile_rules(rule_text).unwrap();
        PatternMatcher::new(memo).match_rule(&rules[0], root).unwrap()
    }

    #[test]
    fn test_alternation_and_wildcard_capture() {
        let Fixture {
            mut memo,
            scan_l,
            x,
            one,
            ..
        } = build_fixture();
        let cond = memo.binary(Operator::Gt, x, one);
        let filters = memo.filters(vec![cond]);
        let select = memo.select(scan_l, filters);
        let join = memo.join(Operator::LeftJoin, scan_l, scan_l, filters);

        let rule = "[R, Normalize] (LeftJoin | Select $input:* $rest:*) => $input";
        let bindings = try_match(&memo, rule, select).unwrap();
        assert_eq!(bindings.get("input"), Some(&Value::Expr(scan_l)));
        assert_eq!(bindings.get("rest"), Some(&Value::Expr(filters)));
        assert!(try_match(&memo, rule, join).is_some());
        assert!(try_match(&memo, rule, scan_l).is_none());
    }

    #[test]
    fn test_private_is_a_trailing_operand() {
        let Fixture { memo, scan_l, .. } = build_fixture();
        let bindings = try_match(&memo, "[R, Normalize] (Scan $def) => (Scan $def)", scan_l).unwrap();
        assert!(matches!(bindings.get("def"), Some(Value::Private(_))));
    }

    #[test]
    fn test_negation_discards_captures() {
        let Fixture {
            mut memo,
            scan_l,
            x,
            one,
            ..
        } = build_fixture();
        let cond = memo.binary(Operator::Gt, x, one);
        let select = memo.select(scan_l, cond);
        let rule = "[R, Normalize] (Select $input ^(Filters)) => $input";
        let bindings = try_match(&memo, rule, select).unwrap();
        assert_eq!(bindings.len(), 1);

        let filters = memo.filters(vec![cond]);
        let wrapped = memo.select(scan_l, filters);
        assert!(try_match(&memo, rule, wrapped).is_none());
    }

    #[test]
    fn test_capture_reuse_requires_structural_equality() {
        let Fixture {
            mut memo, x, y, ..
        } = build_fixture();
        let same = memo.binary(Operator::Eq, x, x);
        let different = memo.binary(Operator::Eq, x, y);
        let rule = "[R, Normalize] (Eq $v $v) => (True)";
        assert!(try_match(&memo, rule, same).is_some());
        assert!(try_match(&memo, rule, different).is_none());
    }

    #[test]
    fn test_ellipsis_binds_first_qualifying_item() {
        let Fixture {
            mut memo,
            scan_l,
            x,
            y,
            one,
        } = build_fixture();
        let a = memo.binary(Operator::Gt, x, one);
        let b = memo.binary(Operator::Lt, y, one);
        let c = memo.binary(Operator::Gt, y, one);
        let filters = memo.filters(vec![a, b, c]);
        let select = memo.select(scan_l, filters);

        let rule = "[R, Normalize]
            (Select * [ $head:... $item:(Lt|Gt $v & ^(IsBoundBy $v $v)) ... ])
            => $item";
        // IsBoundBy on a scalar input fails to evaluate, which must surface as an error
        let rules = compile_rules(rule).unwrap();
        assert!(PatternMatcher::new(&memo).match_rule(&rules[0], select).is_err());

        let rule = "[R, Normalize] (Select * [ $head:... $item:(Lt|Gt) $tail:... ]) => $item";
        let bindings = try_match(&memo, rule, select).unwrap();
        assert_eq!(bindings.get("item"), Some(&Value::Expr(a)));
        assert_eq!(bindings.get("head"), Some(&Value::List(vec![])));
        assert_eq!(bindings.get("tail"), Some(&Value::List(vec![b, c])));

        let rule = "[R, Normalize] (Select * [ $head:... $item:(Lt) ... ]) => $item";
        let bindings = try_match(&memo, rule, select).unwrap();
        assert_eq!(bindings.get("item"), Some(&Value::Expr(b)));
        assert_eq!(bindings.get("head"), Some(&Value::List(vec![a])));
    }

    #[test]
    fn test_list_anchors_and_exact_lists() {
        let Fixture {
            mut memo,
            scan_l,
            x,
            y,
            one,
        } = build_fixture();
        let a = memo.binary(Operator::Gt, x, one);
        let b = memo.binary(Operator::Lt, y, one);
        let filters = memo.filters(vec![a, b]);
        let select = memo.select(scan_l, filters);
        let empty = memo.filters(vec![]);
        let empty_select = memo.select(scan_l, empty);

        let first = "[R, Normalize] (Select * [ $item:(Lt) ... ]) => $item";
        assert!(try_match(&memo, first, select).is_none());
        let last = "[R, Normalize] (Select * [ ... $item:(Lt) ]) => $item";
        assert!(try_match(&memo, last, select).is_some());
        let exact = "[R, Normalize] (Select * [ (Gt) (Lt) ]) => (True)";
        assert!(try_match(&memo, exact, select).is_some());
        let nothing = "[R, Normalize] (Select * []) => (True)";
        assert!(try_match(&memo, nothing, select).is_none());
        assert!(try_match(&memo, nothing, empty_select).is_some());
        let any = "[R, Normalize] (Select * [ ... * ... ]) => (True)";
        assert!(try_match(&memo, any, empty_select).is_none());
    }

    #[test]
    fn test_side_conditions_roll_back_captures() {
        let Fixture {
            mut memo,
            scan_l,
            x,
            one,
            ..
        } = build_fixture();
        let cond = memo.binary(Operator::Gt, x, one);
        let filters = memo.filters(vec![cond]);
        let select = memo.select(scan_l, filters);

        let rule = "[R, Normalize]
            (Select $input:* $filter:* & ^(IsBoundBy $filter $input))
            => $input";
        assert!(try_match(&memo, rule, select).is_none());
        let rule = "[R, Normalize]
            (Select $input:* $filter:* & (IsBoundBy $filter $input))
            => $input";
        let bindings = try_match(&memo, rule, select).unwrap();
        assert_eq!(bindings.get("filter"), Some(&Value::Expr(filters)));
    }
}
