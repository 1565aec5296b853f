use std::collections::HashSet;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::RandomState;
use derive_builder::Builder;
use itertools::Itertools;
use log::{debug, trace};

use super::factory::construct;
use super::matcher::PatternMatcher;
use super::registry::RuleRegistry;
use crate::expr::{ExprId, GroupId, Memo};
use crate::optimizer::{NormalizeError, RuleSetError};

#[derive(Builder, Debug, Clone)]
pub struct NormalizerConfig {
    /// How often rules may fire at a single expression before normalization is considered
    /// non-terminating.
    #[builder(default = "1000")]
    pub max_rewrites_per_node: usize,
    /// Rules the normalizer never fires. Names must exist in the registry.
    #[builder(default = "vec![]")]
    pub disabled_rules: Vec<String>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            max_rewrites_per_node: 1000,
            disabled_rules: vec![],
        }
    }
}

/// Cooperative cancellation of a running normalization. Clones share the flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// One rule firing: `before` was rewritten into `after`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppliedRule {
    pub rule: String,
    pub before: ExprId,
    pub after: ExprId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizeOutcome {
    pub root: ExprId,
    /// Every rule firing in the order it happened.
    pub applied: Vec<AppliedRule>,
}

impl NormalizeOutcome {
    pub fn applied_rules(&self) -> Vec<&str> {
        self.applied.iter().map(|a| a.rule.as_str()).collect()
    }
}

/// Per-call state. Normalization of one expression moves through
/// `Unvisited -> NormalizingChildren -> Matching -> (Replaced -> Matching)* -> Stable`;
/// `in_progress` holds the groups between `NormalizingChildren` and `Stable`.
struct NormalizeContext<'a> {
    memo: &'a mut Memo,
    in_progress: HashSet<GroupId>,
    applied: Vec<AppliedRule>,
    last_rule: Option<String>,
}

/// Drives the rule set to a fixpoint, bottom-up.
///
/// Children are normalized before their parent is matched. When a rule fires, the
/// replacement joins the rewritten expression's group, its children are brought to their
/// normal form (a memo lookup for children that were normalized before) and matching
/// restarts from the first rule. An expression is stable once no rule matches it.
pub struct Normalizer {
    registry: Arc<RuleRegistry>,
    config: NormalizerConfig,
    disabled: HashSet<String>,
    /// Identifies the rules this normalizer fires; normal forms recorded in a memo are only
    /// valid for the rule set that computed them.
    rule_set: u64,
    cancel: CancellationToken,
}

impl Normalizer {
    pub fn new(registry: Arc<RuleRegistry>, config: NormalizerConfig) -> Result<Self, RuleSetError> {
        let mut disabled = HashSet::new();
        for name in config.disabled_rules.iter() {
            if registry.get(name).is_none() {
                return Err(RuleSetError::UnknownRule(name.clone()));
            }
            disabled.insert(name.clone());
        }
        let mut hasher = RandomState::with_seeds(0, 0, 0, 0).build_hasher();
        registry.id().hash(&mut hasher);
        disabled.iter().sorted().for_each(|name| name.hash(&mut hasher));
        Ok(Self {
            registry,
            config,
            disabled,
            rule_set: hasher.finish(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Normalize the tree rooted at `root`. On error nothing is returned; the memo may hold
    /// the partial work, which is unreachable from `root`.
    ///
    /// A memo records normal forms for the rule set of the first normalizer that used it.
    /// Normalizers with other rules or other disabled rules get
    /// [`NormalizeError::RuleSetMismatch`].
    pub fn normalize(&self, memo: &mut Memo, root: ExprId) -> Result<NormalizeOutcome, NormalizeError> {
        if !memo.claim_normal_forms(self.rule_set) {
            return Err(NormalizeError::RuleSetMismatch);
        }
        let mut ctx = NormalizeContext {
            memo,
            in_progress: HashSet::new(),
            applied: vec![],
            last_rule: None,
        };
        let root = self.normalize_expr(&mut ctx, root)?;
        debug!("normalized to {} after {} rewrites", root, ctx.applied.len());
        Ok(NormalizeOutcome {
            root,
            applied: ctx.applied,
        })
    }

    fn normalize_expr(&self, ctx: &mut NormalizeContext, id: ExprId) -> Result<ExprId, NormalizeError> {
        if self.cancel.is_cancelled() {
            return Err(NormalizeError::Cancelled);
        }
        if let Some(normalized) = ctx.memo.normalized(id) {
            return Ok(normalized);
        }
        let group = ctx.memo.group_of(id);
        if !ctx.in_progress.insert(group) {
            // an expression equivalent to one of its own ancestors
            return Err(NormalizeError::RewriteCycle {
                rule: ctx.last_rule.clone().unwrap_or_default(),
            });
        }

        let mut current = self.normalize_children(ctx, id)?;
        let mut rewrites = 0;
        while ctx.memo.normalized(id).is_none() {
            let Some((rule, replacement)) = self.apply_first_match(ctx, current)? else {
                break;
            };
            rewrites += 1;
            ctx.last_rule = Some(rule);
            if rewrites > self.config.max_rewrites_per_node {
                return Err(self.guard_tripped(ctx));
            }
            ctx.memo.merge_groups(id, replacement);
            current = self.normalize_children(ctx, replacement)?;
        }

        ctx.in_progress.remove(&group);
        let normalized = ctx.memo.normalized(id).unwrap_or(current);
        ctx.memo.set_normalized(id, normalized);
        trace!("{} is stable as {}", id, normalized);
        Ok(normalized)
    }

    /// Rebuild `id` over normalized children. The rebuilt expression joins `id`'s group.
    fn normalize_children(&self, ctx: &mut NormalizeContext, id: ExprId) -> Result<ExprId, NormalizeError> {
        let expr = ctx.memo.expr(id).clone();
        let mut changed = false;
        let mut children = Vec::with_capacity(expr.children.len());
        for child in expr.children.iter() {
            let normalized = self.normalize_expr(ctx, *child)?;
            changed |= normalized != *child;
            children.push(normalized);
        }
        if !changed {
            return Ok(id);
        }
        let rebuilt = ctx.memo.intern(expr.op, children, expr.private)?;
        ctx.memo.merge_groups(id, rebuilt);
        Ok(rebuilt)
    }

    /// Fire the first rule, in registry order, that matches `id` and produces a different
    /// expression.
    fn apply_first_match(
        &self,
        ctx: &mut NormalizeContext,
        id: ExprId,
    ) -> Result<Option<(String, ExprId)>, NormalizeError> {
        let op = ctx.memo.op(id);
        for rule in self.registry.candidates(op) {
            if self.disabled.contains(&rule.name) {
                continue;
            }
            let Some(bindings) = PatternMatcher::new(ctx.memo).match_rule(rule, id)? else {
                continue;
            };
            let replacement = construct(ctx.memo, &rule.replace, &bindings, id)?;
            if replacement == id {
                trace!("rule {} rebuilt {} unchanged", rule.name, id);
                continue;
            }
            debug!("rule {} fired: {} -> {}", rule.name, id, replacement);
            ctx.applied.push(AppliedRule {
                rule: rule.name.clone(),
                before: id,
                after: replacement,
            });
            return Ok(Some((rule.name.clone(), replacement)));
        }
        Ok(None)
    }

    fn guard_tripped(&self, ctx: &NormalizeContext) -> NormalizeError {
        NormalizeError::NonTerminationGuardTripped {
            rule: ctx.last_rule.clone().unwrap_or_default(),
            limit: self.config.max_rewrites_per_node,
        }
    }
}
