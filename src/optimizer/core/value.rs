use crate::expr::{ExprId, Operator, Private};

/// A value captured by a pattern variable, passed to a predicate, or produced while building
/// a replacement.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Expr(ExprId),
    /// A list of expressions not (yet) wrapped in a list operator, such as the items an
    /// ellipsis captured or the partition returned by `ExtractBoundConditions`.
    List(Vec<ExprId>),
    Private(Private),
    Operator(Operator),
    Bool(bool),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Expr(_) => "expression",
            Value::List(_) => "list",
            Value::Private(_) => "private",
            Value::Operator(_) => "operator",
            Value::Bool(_) => "bool",
        }
    }
}

/// The binding environment of one match attempt. Captures are kept in capture order so a
/// failed alternative can be undone by truncating back to a checkpoint.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Bindings {
    entries: Vec<(String, Value)>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn bind(&mut self, name: &str, value: Value) {
        self.entries.push((name.to_string(), value));
    }

    pub fn checkpoint(&self) -> usize {
        self.entries.len()
    }

    /// Drop every capture made after `checkpoint`.
    pub fn rollback(&mut self, checkpoint: usize) {
        self.entries.truncate(checkpoint);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }
}
