use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use ahash::RandomState;
use itertools::Itertools;
use log::debug;
use strum::IntoEnumIterator;

use crate::expr::Operator;
use crate::optimizer::core::{Rule, RuleCategory};
use crate::optimizer::dsl::compile_rule_file;
use crate::optimizer::RuleSetError;

static NEXT_REGISTRY_ID: AtomicUsize = AtomicUsize::new(0);

/// The immutable, ordered set of normalization rules, indexed by the operators their patterns
/// can match at the root.
///
/// Rule order is declaration order and is part of the rule set's meaning: when several rules
/// match the same expression, the first one fires. A registry is built once and shared
/// read-only between normalizers.
#[derive(Debug)]
pub struct RuleRegistry {
    id: usize,
    rules: Vec<Rule>,
    index: HashMap<Operator, Vec<usize>, RandomState>,
}

impl RuleRegistry {
    /// Build a registry from rules in declaration order. Explore rules are skipped; they
    /// belong to the cost-based search, not to normalization.
    pub fn new(rules: Vec<Rule>) -> Result<Self, RuleSetError> {
        let mut seen = HashSet::new();
        let mut kept: Vec<Rule> = vec![];
        for rule in rules {
            if !seen.insert(rule.name.clone()) {
                return Err(RuleSetError::DuplicateRule(rule.name));
            }
            if rule.category == RuleCategory::Explore {
                debug!("skipping explore rule {}", rule.name);
                continue;
            }
            kept.push(rule);
        }

        let mut index = HashMap::with_hasher(RandomState::new());
        for op in Operator::iter() {
            let candidates = kept
                .iter()
                .enumerate()
                .filter(|(_, r)| r.root_ops().map_or(true, |ops| ops.contains(&op)))
                .map(|(idx, _)| idx)
                .collect_vec();
            if !candidates.is_empty() {
                index.insert(op, candidates);
            }
        }
        Ok(Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            rules: kept,
            index,
        })
    }

    /// Compile `(source_name, text)` rule files in order and build a registry from all of
    /// their rules.
    pub fn from_sources<'a>(
        sources: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, RuleSetError> {
        let mut rules = vec![];
        for (name, text) in sources {
            rules.extend(compile_rule_file(name, text)?);
        }
        Self::new(rules)
    }

    /// Unique per registry built in this process.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name == name)
    }

    /// Rules whose pattern can match an expression with operator `op`, in declaration order.
    pub fn candidates(&self, op: Operator) -> impl Iterator<Item = &Rule> + '_ {
        self.index
            .get(&op)
            .into_iter()
            .flatten()
            .map(|idx| &self.rules[*idx])
    }

    /// The index as `(operator, rule names)` pairs, in operator declaration order.
    pub fn index_summary(&self) -> Vec<(Operator, Vec<&str>)> {
        Operator::iter()
            .filter_map(|op| {
                let names = self.candidates(op).map(|r| r.name.as_str()).collect_vec();
                (!names.is_empty()).then_some((op, names))
            })
            .collect()
    }
}
