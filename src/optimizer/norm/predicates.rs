//! The side-condition library rules call by name.
//!
//! Capabilities come in three kinds:
//!
//! - predicates answer a yes/no question about matched values and may appear as pattern
//!   side-conditions,
//! - functions compute a value (a list partition, an operator) without touching the memo,
//! - constructors build new expressions and may only appear in replacements.
//!
//! All of them are pure with respect to the tree being normalized: constructors only intern
//! new nodes, they never change existing ones.

use std::collections::HashMap;

use ahash::RandomState;
use itertools::Itertools;
use lazy_static::lazy_static;
use paste::paste;

use crate::catalog::ColumnId;
use crate::expr::{ColSet, ExprId, Memo, Operator, Private};
use crate::optimizer::core::Value;
use crate::optimizer::NormalizeError;

pub type PredicateFn = fn(&Memo, &[Value]) -> Result<bool, NormalizeError>;
pub type FunctionFn = fn(&Memo, &[Value]) -> Result<Value, NormalizeError>;
pub type ConstructorFn = fn(&mut Memo, &[Value]) -> Result<Value, NormalizeError>;

#[derive(Clone, Copy)]
pub enum Capability {
    Predicate(PredicateFn),
    Function(FunctionFn),
    Constructor(ConstructorFn),
}

impl Capability {
    /// Whether the capability can run while matching, where the memo is read-only.
    pub fn is_read_only(&self) -> bool {
        !matches!(self, Capability::Constructor(_))
    }
}

/// Register each capability under its rule-language name; the implementing fn is the
/// snake_case form of the name.
macro_rules! capabilities {
    (
        predicates: [$($pred:ident),* $(,)?],
        functions: [$($func:ident),* $(,)?],
        constructors: [$($ctor:ident),* $(,)?] $(,)?
    ) => {
        paste! {
            lazy_static! {
                static ref CAPABILITIES: HashMap<&'static str, Capability, RandomState> = {
                    let mut m = HashMap::with_hasher(RandomState::new());
                    $(m.insert(stringify!($pred), Capability::Predicate([<$pred:snake>] as PredicateFn));)*
                    $(m.insert(stringify!($func), Capability::Function([<$func:snake>] as FunctionFn));)*
                    $(m.insert(stringify!($ctor), Capability::Constructor([<$ctor:snake>] as ConstructorFn));)*
                    m
                };
            }
        }
    };
}

capabilities! {
    predicates: [
        IsBoundBy,
        HasNullRejectingFilter,
        CanMap,
        IsColNotNull,
        IsScalarGroupBy,
        IsSingleton,
    ],
    functions: [
        ExtractBoundConditions,
        ExtractUnboundConditions,
        ConcatFilters,
        RemoveListItem,
        ReplaceListItem,
        FlattenAnd,
        OpName,
        ConvertLeftToInnerJoin,
        ConvertRightToInnerJoin,
        ConvertFullToLeftJoin,
        ConvertFullToRightJoin,
    ],
    constructors: [Map],
}

/// Look up a capability by its rule-language name.
pub fn lookup(name: &str) -> Option<Capability> {
    CAPABILITIES.get(name).copied()
}

fn arg<'a>(name: &str, args: &'a [Value], idx: usize) -> Result<&'a Value, NormalizeError> {
    args.get(idx).ok_or_else(|| {
        NormalizeError::predicate(name, format!("missing argument {} of {}", idx, args.len()))
    })
}

fn expr_arg(name: &str, args: &[Value], idx: usize) -> Result<ExprId, NormalizeError> {
    match arg(name, args, idx)? {
        Value::Expr(id) => Ok(*id),
        other => Err(NormalizeError::predicate(
            name,
            format!("argument {} is a {}, expected an expression", idx, other.kind()),
        )),
    }
}

/// Read a filter list argument. A list operator yields its items, `True` the empty list, and
/// any other scalar a single-item list.
fn list_arg(
    memo: &Memo,
    name: &str,
    args: &[Value],
    idx: usize,
) -> Result<Vec<ExprId>, NormalizeError> {
    match arg(name, args, idx)? {
        Value::List(items) => Ok(items.clone()),
        Value::Expr(id) => match memo.op(*id) {
            op if op.is_list() => Ok(memo.list_items(*id).to_vec()),
            Operator::True => Ok(vec![]),
            op if op.is_relational() => Err(NormalizeError::predicate(
                name,
                format!("argument {} is relational {}, expected a list", idx, op),
            )),
            _ => Ok(vec![*id]),
        },
        other => Err(NormalizeError::predicate(
            name,
            format!("argument {} is a {}, expected a list", idx, other.kind()),
        )),
    }
}

/// Read a column set argument: the output columns of a relational expression, or the
/// columns of a passthrough/grouping private.
fn cols_arg(memo: &Memo, name: &str, args: &[Value], idx: usize) -> Result<ColSet, NormalizeError> {
    match arg(name, args, idx)? {
        Value::Expr(id) => memo
            .relational_props(*id)
            .map(|p| p.output_set.clone())
            .ok_or_else(|| {
                NormalizeError::predicate(
                    name,
                    format!("argument {} is scalar {}, expected a relation", idx, memo.op(*id)),
                )
            }),
        Value::Private(p) => p.col_set().cloned().ok_or_else(|| {
            NormalizeError::predicate(name, format!("argument {} has no columns: {}", idx, p))
        }),
        other => Err(NormalizeError::predicate(
            name,
            format!("argument {} is a {}, expected columns", idx, other.kind()),
        )),
    }
}

fn col_arg(memo: &Memo, name: &str, args: &[Value], idx: usize) -> Result<ColumnId, NormalizeError> {
    let private = match arg(name, args, idx)? {
        Value::Private(p) => Some(p),
        Value::Expr(id) => memo.expr(*id).private.as_ref(),
        _ => None,
    };
    match private {
        Some(Private::Column(col)) => Ok(*col),
        _ => Err(NormalizeError::predicate(
            name,
            format!("argument {} is not a column", idx),
        )),
    }
}

fn op_arg(memo: &Memo, name: &str, args: &[Value], idx: usize) -> Result<Operator, NormalizeError> {
    match arg(name, args, idx)? {
        Value::Operator(op) => Ok(*op),
        Value::Expr(id) => Ok(memo.op(*id)),
        other => Err(NormalizeError::predicate(
            name,
            format!("argument {} is a {}, expected an operator", idx, other.kind()),
        )),
    }
}

/// `(IsBoundBy $expr $input)`: every column `expr` references is produced by `input`.
fn is_bound_by(memo: &Memo, args: &[Value]) -> Result<bool, NormalizeError> {
    let expr = expr_arg("IsBoundBy", args, 0)?;
    let cols = cols_arg(memo, "IsBoundBy", args, 1)?;
    Ok(memo.outer_cols(expr).is_subset(&cols))
}

/// `(HasNullRejectingFilter $filters $side)`: some filter is false or NULL whenever all of
/// `side`'s columns are NULL. Unknown shapes are never treated as null-rejecting.
fn has_null_rejecting_filter(memo: &Memo, args: &[Value]) -> Result<bool, NormalizeError> {
    let filters = list_arg(memo, "HasNullRejectingFilter", args, 0)?;
    let cols = cols_arg(memo, "HasNullRejectingFilter", args, 1)?;
    Ok(filters.iter().any(|f| rejects_nulls(memo, *f, &cols)))
}

fn rejects_nulls(memo: &Memo, id: ExprId, cols: &ColSet) -> bool {
    let expr = memo.expr(id);
    match expr.op {
        Operator::False => true,
        Operator::And => {
            rejects_nulls(memo, expr.children[0], cols) || rejects_nulls(memo, expr.children[1], cols)
        }
        Operator::Or => {
            rejects_nulls(memo, expr.children[0], cols) && rejects_nulls(memo, expr.children[1], cols)
        }
        Operator::IsNot => {
            memo.op(expr.children[1]) == Operator::Null
                && propagates_null(memo, expr.children[0], cols)
        }
        _ => propagates_null(memo, id, cols),
    }
}

/// Whether the expression evaluates to NULL when every column in `cols` is NULL.
fn propagates_null(memo: &Memo, id: ExprId, cols: &ColSet) -> bool {
    let expr = memo.expr(id);
    match expr.op {
        Operator::Null => true,
        Operator::Variable => matches!(&expr.private, Some(Private::Column(c)) if cols.contains(c)),
        Operator::Not => propagates_null(memo, expr.children[0], cols),
        op if op.is_comparison() || op.is_arithmetic() => expr
            .children
            .iter()
            .any(|c| propagates_null(memo, *c, cols)),
        _ => false,
    }
}

/// Group columns into equivalence classes using the `Eq(Variable, Variable)` items of `on`,
/// skipping `except`. Returns a map from each column to its class representative.
fn equivalences(memo: &Memo, on: &[ExprId], except: ExprId) -> HashMap<ColumnId, ColumnId> {
    let mut classes: Vec<ColSet> = vec![];
    for item in on.iter().filter(|i| **i != except) {
        let expr = memo.expr(*item);
        if expr.op != Operator::Eq {
            continue;
        }
        let cols = expr
            .children
            .iter()
            .filter_map(|c| match &memo.expr(*c).private {
                Some(Private::Column(col)) if memo.op(*c) == Operator::Variable => Some(*col),
                _ => None,
            })
            .collect_vec();
        if cols.len() != 2 {
            continue;
        }
        let pair = cols.into_iter().collect::<ColSet>();
        let (merged, rest): (Vec<_>, Vec<_>) =
            classes.into_iter().partition(|c| c.intersects(&pair));
        let class = merged.into_iter().fold(pair, |acc, c| acc.union(&c));
        classes = rest;
        classes.push(class);
    }
    let mut res = HashMap::new();
    for (idx, class) in classes.iter().enumerate() {
        for col in class.iter() {
            res.insert(col, ColumnId(idx));
        }
    }
    res
}

/// For every column of `condition` outside `target`, pick the lowest equivalent target
/// column. Returns `None` if some column has no equivalent.
fn mapping(
    memo: &Memo,
    on: &[ExprId],
    condition: ExprId,
    target: &ColSet,
) -> Option<HashMap<ColumnId, ColumnId>> {
    let classes = equivalences(memo, on, condition);
    let mut res = HashMap::new();
    for col in memo.outer_cols(condition).difference(target).iter() {
        let class = classes.get(&col)?;
        let mapped = target.iter().find(|t| classes.get(t) == Some(class))?;
        res.insert(col, mapped);
    }
    Some(res)
}

/// `(CanMap $on $condition $target)`: the equalities in `on` (other than `condition` itself)
/// allow `condition` to be rewritten purely in terms of `target`'s columns.
fn can_map(memo: &Memo, args: &[Value]) -> Result<bool, NormalizeError> {
    let on = list_arg(memo, "CanMap", args, 0)?;
    let condition = expr_arg("CanMap", args, 1)?;
    let target = cols_arg(memo, "CanMap", args, 2)?;
    if memo.outer_cols(condition).is_subset(&target) {
        return Ok(false);
    }
    Ok(mapping(memo, &on, condition, &target).is_some())
}

/// `(Map $on $condition $target)`: substitute `condition`'s columns with equivalent columns
/// of `target`.
fn map(memo: &mut Memo, args: &[Value]) -> Result<Value, NormalizeError> {
    let on = list_arg(memo, "Map", args, 0)?;
    let condition = expr_arg("Map", args, 1)?;
    let target = cols_arg(memo, "Map", args, 2)?;
    let mapping = mapping(memo, &on, condition, &target).ok_or_else(|| {
        NormalizeError::predicate("Map", "condition can't be mapped onto the target")
    })?;
    Ok(Value::Expr(substitute(memo, condition, &mapping)?))
}

fn substitute(
    memo: &mut Memo,
    id: ExprId,
    mapping: &HashMap<ColumnId, ColumnId>,
) -> Result<ExprId, NormalizeError> {
    let expr = memo.expr(id).clone();
    if let (Operator::Variable, Some(Private::Column(col))) = (expr.op, &expr.private) {
        return Ok(match mapping.get(col) {
            Some(mapped) => memo.variable(*mapped),
            None => id,
        });
    }
    if expr.children.is_empty() {
        return Ok(id);
    }
    let children = expr
        .children
        .iter()
        .map(|c| substitute(memo, *c, mapping))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(memo.intern(expr.op, children, expr.private)?)
}

/// `(IsColNotNull $col $input)`: `input` never produces NULL for `col`.
fn is_col_not_null(memo: &Memo, args: &[Value]) -> Result<bool, NormalizeError> {
    let col = col_arg(memo, "IsColNotNull", args, 0)?;
    let input = expr_arg("IsColNotNull", args, 1)?;
    let props = memo.relational_props(input).ok_or_else(|| {
        NormalizeError::predicate("IsColNotNull", "input has no relational properties")
    })?;
    Ok(props.not_null_cols.contains(&col))
}

/// `(IsScalarGroupBy $def)`: the grouping has no grouping columns.
fn is_scalar_group_by(memo: &Memo, args: &[Value]) -> Result<bool, NormalizeError> {
    let private = match arg("IsScalarGroupBy", args, 0)? {
        Value::Private(p) => Some(p),
        Value::Expr(id) => memo.expr(*id).private.as_ref(),
        _ => None,
    };
    match private {
        Some(Private::Grouping(cols)) => Ok(cols.is_empty()),
        _ => Err(NormalizeError::predicate(
            "IsScalarGroupBy",
            "argument is not a grouping definition",
        )),
    }
}

fn is_singleton(memo: &Memo, args: &[Value]) -> Result<bool, NormalizeError> {
    Ok(list_arg(memo, "IsSingleton", args, 0)?.len() == 1)
}

fn partition_bound(
    memo: &Memo,
    name: &str,
    args: &[Value],
) -> Result<(Vec<ExprId>, Vec<ExprId>), NormalizeError> {
    let list = list_arg(memo, name, args, 0)?;
    let cols = cols_arg(memo, name, args, 1)?;
    Ok(list
        .into_iter()
        .partition(|item| memo.outer_cols(*item).is_subset(&cols)))
}

/// `(ExtractBoundConditions $list $input)`: the items bound by `input`, in list order.
fn extract_bound_conditions(memo: &Memo, args: &[Value]) -> Result<Value, NormalizeError> {
    let (bound, _) = partition_bound(memo, "ExtractBoundConditions", args)?;
    Ok(Value::List(bound))
}

/// `(ExtractUnboundConditions $list $input)`: the complement of `ExtractBoundConditions`.
fn extract_unbound_conditions(memo: &Memo, args: &[Value]) -> Result<Value, NormalizeError> {
    let (_, unbound) = partition_bound(memo, "ExtractUnboundConditions", args)?;
    Ok(Value::List(unbound))
}

fn concat_filters(memo: &Memo, args: &[Value]) -> Result<Value, NormalizeError> {
    let mut list = list_arg(memo, "ConcatFilters", args, 0)?;
    list.extend(list_arg(memo, "ConcatFilters", args, 1)?);
    Ok(Value::List(list))
}

/// `(RemoveListItem $list $item)`: drop the first occurrence of `item`.
fn remove_list_item(memo: &Memo, args: &[Value]) -> Result<Value, NormalizeError> {
    let mut list = list_arg(memo, "RemoveListItem", args, 0)?;
    let item = expr_arg("RemoveListItem", args, 1)?;
    if let Some(pos) = list.iter().position(|i| *i == item) {
        list.remove(pos);
    }
    Ok(Value::List(list))
}

/// `(ReplaceListItem $list $item $with)`: splice the items of `with` in place of the first
/// occurrence of `item`.
fn replace_list_item(memo: &Memo, args: &[Value]) -> Result<Value, NormalizeError> {
    let mut list = list_arg(memo, "ReplaceListItem", args, 0)?;
    let item = expr_arg("ReplaceListItem", args, 1)?;
    let with = list_arg(memo, "ReplaceListItem", args, 2)?;
    if let Some(pos) = list.iter().position(|i| *i == item) {
        list.splice(pos..pos + 1, with);
    }
    Ok(Value::List(list))
}

/// `(FlattenAnd $and)`: the conjuncts of a (nested) `And`, left to right.
fn flatten_and(memo: &Memo, args: &[Value]) -> Result<Value, NormalizeError> {
    fn collect(memo: &Memo, id: ExprId, out: &mut Vec<ExprId>) {
        let expr = memo.expr(id);
        if expr.op == Operator::And {
            collect(memo, expr.children[0], out);
            collect(memo, expr.children[1], out);
        } else {
            out.push(id);
        }
    }
    let and = expr_arg("FlattenAnd", args, 0)?;
    let mut out = vec![];
    collect(memo, and, &mut out);
    Ok(Value::List(out))
}

/// `(OpName $expr)`: the operator of `expr`. The factory passes the matched root when the
/// call has no arguments.
fn op_name(memo: &Memo, args: &[Value]) -> Result<Value, NormalizeError> {
    Ok(Value::Operator(op_arg(memo, "OpName", args, 0)?))
}

macro_rules! join_conversion {
    ($name:ident, $($from:ident => $to:ident),*) => {
        paste! {
            fn [<$name:snake>](memo: &Memo, args: &[Value]) -> Result<Value, NormalizeError> {
                match op_arg(memo, stringify!($name), args, 0)? {
                    $(Operator::$from => Ok(Value::Operator(Operator::$to)),)*
                    op => Err(NormalizeError::predicate(
                        stringify!($name),
                        format!("can't convert {}", op),
                    )),
                }
            }
        }
    };
}

join_conversion!(ConvertLeftToInnerJoin, LeftJoin => InnerJoin, LeftJoinApply => InnerJoinApply);
join_conversion!(ConvertRightToInnerJoin, RightJoin => InnerJoin, RightJoinApply => InnerJoinApply);
join_conversion!(ConvertFullToLeftJoin, FullJoin => LeftJoin, FullJoinApply => LeftJoinApply);
join_conversion!(ConvertFullToRightJoin, FullJoin => RightJoin, FullJoinApply => RightJoinApply);
