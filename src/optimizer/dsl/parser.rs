use std::str::FromStr;

use itertools::Itertools;

use super::lexer::{Lexer, Token, TokenKind};
use crate::expr::Operator;
use crate::optimizer::core::{
    Arg, Call, Condition, Ellipsis, ListPattern, OpRef, Pattern, Replace, Rule, RuleCategory,
};
use crate::optimizer::norm::{lookup, Capability};
use crate::optimizer::PatternSyntaxError;

type ParseResult<T> = Result<T, PatternSyntaxError>;

enum ListElem {
    Ellipsis(Option<String>),
    Item(Pattern),
}

/// Recursive descent parser for rule files:
///
/// ```text
/// [RuleName, Category]
/// <pattern>
/// =>
/// <replacement>
/// ```
///
/// Variables are checked while parsing: a bare `$x` captures on its first use and refers back
/// to the capture afterwards, and every variable a condition or replacement reads must have
/// been captured by then. `$x:pattern` is visible inside its own pattern, so an item condition
/// can refer to the whole list. Captures inside a negation are not visible outside of it.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    scope: Vec<String>,
}

impl Parser {
    pub fn new(source: &str) -> ParseResult<Self> {
        Ok(Self {
            tokens: Lexer::new(source).tokenize()?,
            pos: 0,
            scope: vec![],
        })
    }

    pub fn parse_rules(&mut self) -> ParseResult<Vec<Rule>> {
        let mut rules = vec![];
        while self.peek().kind != TokenKind::Eof {
            rules.push(self.parse_rule()?);
        }
        Ok(rules)
    }

    fn parse_rule(&mut self) -> ParseResult<Rule> {
        self.expect(TokenKind::LBracket)?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::Comma)?;
        let category_token = self.peek().clone();
        let category = self.expect_ident()?;
        let category = RuleCategory::from_str(&category).map_err(|_| {
            self.error_at(
                &category_token,
                format!("unknown rule category '{}'", category),
            )
        })?;
        self.expect(TokenKind::RBracket)?;

        self.scope.clear();
        let start = self.peek().clone();
        let pattern = self.parse_pattern()?;
        if pattern.root_ops().is_none() {
            return Err(self.error_at(
                &start,
                format!("rule {} must match an operator at its root", name),
            ));
        }
        self.expect(TokenKind::Arrow)?;
        let replace = self.parse_replace()?;
        Ok(Rule {
            name,
            category,
            pattern,
            replace,
        })
    }

    fn parse_pattern(&mut self) -> ParseResult<Pattern> {
        let pattern = self.parse_primary()?;
        let mut conditions = vec![];
        while self.eat(&TokenKind::Amp) {
            let negated = self.eat(&TokenKind::Caret);
            let start = self.peek().clone();
            let call = self.parse_call()?;
            if !matches!(lookup(&call.name), Some(Capability::Predicate(_))) {
                return Err(self.error_at(&start, format!("{} is not a predicate", call.name)));
            }
            conditions.push(Condition { negated, call });
        }
        if conditions.is_empty() {
            Ok(pattern)
        } else {
            Ok(Pattern::Constrain {
                pattern: Box::new(pattern),
                conditions,
            })
        }
    }

    fn parse_primary(&mut self) -> ParseResult<Pattern> {
        let token = self.peek().clone();
        match token.kind.clone() {
            TokenKind::Star => {
                self.advance();
                Ok(Pattern::Any)
            }
            TokenKind::Caret => {
                self.advance();
                let mark = self.scope.len();
                let inner = self.parse_primary()?;
                self.scope.truncate(mark);
                Ok(Pattern::Not(Box::new(inner)))
            }
            TokenKind::Var(name) => {
                self.advance();
                if self.eat(&TokenKind::Colon) {
                    if self.is_bound(&name) {
                        return Err(
                            self.error_at(&token, format!("variable ${} is already bound", name))
                        );
                    }
                    self.scope.push(name.clone());
                    let inner = self.parse_primary()?;
                    Ok(Pattern::Bind {
                        name,
                        pattern: Box::new(inner),
                    })
                } else if self.is_bound(&name) {
                    Ok(Pattern::Ref(name))
                } else {
                    self.scope.push(name.clone());
                    Ok(Pattern::Bind {
                        name,
                        pattern: Box::new(Pattern::Any),
                    })
                }
            }
            TokenKind::LParen => self.parse_match(),
            TokenKind::LBracket => self.parse_list(),
            other => Err(self.error_at(
                &token,
                format!("expected a pattern, found {}", other.describe()),
            )),
        }
    }

    fn parse_match(&mut self) -> ParseResult<Pattern> {
        self.expect(TokenKind::LParen)?;
        let start = self.peek().clone();
        let mut ops = vec![self.expect_operator()?];
        while self.eat(&TokenKind::Pipe) {
            ops.push(self.expect_operator()?);
        }
        let mut operands = vec![];
        while self.peek().kind != TokenKind::RParen {
            operands.push(self.parse_pattern()?);
        }
        self.expect(TokenKind::RParen)?;

        let arity = ops.iter().map(operand_count).min().unwrap_or_default();
        if operands.len() > arity {
            return Err(self.error_at(
                &start,
                format!(
                    "{} has {} operands, the pattern gives {}",
                    ops.iter().join("|"),
                    arity,
                    operands.len()
                ),
            ));
        }
        Ok(Pattern::Match { ops, operands })
    }

    fn parse_list(&mut self) -> ParseResult<Pattern> {
        let start = self.peek().clone();
        self.expect(TokenKind::LBracket)?;
        let mut elems = vec![];
        while self.peek().kind != TokenKind::RBracket {
            if self.eat(&TokenKind::Ellipsis) {
                elems.push(ListElem::Ellipsis(None));
                continue;
            }
            if let TokenKind::Var(name) = &self.peek().kind {
                if self.peek_at(1).kind == TokenKind::Colon
                    && self.peek_at(2).kind == TokenKind::Ellipsis
                {
                    let name = name.clone();
                    if self.is_bound(&name) {
                        let token = self.peek().clone();
                        return Err(
                            self.error_at(&token, format!("variable ${} is already bound", name))
                        );
                    }
                    self.pos += 3;
                    elems.push(ListElem::Ellipsis(Some(name)));
                    continue;
                }
            }
            elems.push(ListElem::Item(self.parse_pattern()?));
        }
        self.expect(TokenKind::RBracket)?;

        if !elems.iter().any(|e| matches!(e, ListElem::Ellipsis(_))) {
            let items = elems
                .into_iter()
                .filter_map(|e| match e {
                    ListElem::Item(p) => Some(p),
                    ListElem::Ellipsis(_) => None,
                })
                .collect();
            return Ok(Pattern::List(ListPattern::Exact(items)));
        }

        let (mut head, mut item, mut tail) = (None, None, None);
        for elem in elems {
            match (elem, item.is_some()) {
                (ListElem::Ellipsis(name), false) if head.is_none() => {
                    head = Some(Ellipsis { name })
                }
                (ListElem::Ellipsis(name), true) if tail.is_none() => {
                    tail = Some(Ellipsis { name })
                }
                (ListElem::Item(p), false) => item = Some(p),
                _ => {
                    return Err(self.error_at(
                        &start,
                        "a list pattern with ellipses takes exactly one item between them",
                    ))
                }
            }
        }
        let item = item.ok_or_else(|| {
            self.error_at(&start, "a list pattern with ellipses needs an item to match")
        })?;
        for ellipsis in [&head, &tail].into_iter().flatten() {
            if let Some(name) = &ellipsis.name {
                self.scope.push(name.clone());
            }
        }
        Ok(Pattern::List(ListPattern::Scan {
            head,
            item: Box::new(item),
            tail,
        }))
    }

    /// A side-condition call. Nested calls must be able to run while matching.
    fn parse_call(&mut self) -> ParseResult<Call> {
        self.expect(TokenKind::LParen)?;
        let token = self.peek().clone();
        let name = self.expect_ident()?;
        match lookup(&name) {
            None => return Err(self.error_at(&token, format!("unknown function {}", name))),
            Some(c) if !c.is_read_only() => {
                return Err(self.error_at(
                    &token,
                    format!("{} builds expressions and can't be used in a pattern", name),
                ))
            }
            _ => {}
        }
        let mut args = vec![];
        loop {
            let token = self.peek().clone();
            match token.kind.clone() {
                TokenKind::RParen => break,
                TokenKind::Var(var) => {
                    self.check_defined(&token, &var)?;
                    self.advance();
                    args.push(Arg::Var(var));
                }
                TokenKind::LParen => args.push(Arg::Call(self.parse_call()?)),
                other => {
                    return Err(self.error_at(
                        &token,
                        format!("expected an argument, found {}", other.describe()),
                    ))
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(Call { name, args })
    }

    fn parse_replace(&mut self) -> ParseResult<Replace> {
        let token = self.peek().clone();
        match token.kind.clone() {
            TokenKind::Var(name) => {
                self.check_defined(&token, &name)?;
                self.advance();
                Ok(Replace::Var(name))
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = vec![];
                while !self.eat(&TokenKind::RBracket) {
                    items.push(self.parse_replace()?);
                }
                Ok(Replace::List(items))
            }
            TokenKind::LParen => {
                self.advance();
                let head = self.peek().clone();
                match head.kind.clone() {
                    TokenKind::LParen => {
                        let op = self.parse_replace()?;
                        if !matches!(op, Replace::Call { .. }) {
                            return Err(self.error_at(
                                &head,
                                "a dynamic operator must be computed by a function call",
                            ));
                        }
                        let args = self.parse_replace_args()?;
                        Ok(Replace::Construct {
                            op: OpRef::Dynamic(Box::new(op)),
                            args,
                        })
                    }
                    TokenKind::Ident(name) => {
                        self.advance();
                        if let Ok(op) = Operator::from_str(&name) {
                            let args = self.parse_replace_args()?;
                            let expected = operand_count(&op);
                            if !op.is_list() && args.len() != expected {
                                return Err(self.error_at(
                                    &head,
                                    format!(
                                        "{} takes {} operands, got {}",
                                        op,
                                        expected,
                                        args.len()
                                    ),
                                ));
                            }
                            Ok(Replace::Construct {
                                op: OpRef::Static(op),
                                args,
                            })
                        } else if lookup(&name).is_some() {
                            let args = self.parse_replace_args()?;
                            Ok(Replace::Call { name, args })
                        } else {
                            Err(self.error_at(
                                &head,
                                format!("unknown operator or function {}", name),
                            ))
                        }
                    }
                    other => Err(self.error_at(
                        &head,
                        format!("expected an operator or function, found {}", other.describe()),
                    )),
                }
            }
            other => Err(self.error_at(
                &token,
                format!("expected a replacement, found {}", other.describe()),
            )),
        }
    }

    /// Arguments up to and including the closing parenthesis.
    fn parse_replace_args(&mut self) -> ParseResult<Vec<Replace>> {
        let mut args = vec![];
        while !self.eat(&TokenKind::RParen) {
            if self.peek().kind == TokenKind::Eof {
                let token = self.peek().clone();
                return Err(self.error_at(&token, "expected ')', found end of input"));
            }
            args.push(self.parse_replace()?);
        }
        Ok(args)
    }

    fn expect_operator(&mut self) -> ParseResult<Operator> {
        let token = self.peek().clone();
        let name = self.expect_ident()?;
        Operator::from_str(&name).map_err(|_| {
            let message = if lookup(&name).is_some() {
                format!("{} is a function, not an operator", name)
            } else {
                format!("unknown operator {}", name)
            };
            self.error_at(&token, message)
        })
    }

    fn expect_ident(&mut self) -> ParseResult<String> {
        let token = self.peek().clone();
        match token.kind.clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error_at(
                &token,
                format!("expected a name, found {}", other.describe()),
            )),
        }
    }

    fn expect(&mut self, kind: TokenKind) -> ParseResult<()> {
        if self.eat(&kind) {
            return Ok(());
        }
        let token = self.peek().clone();
        Err(self.error_at(
            &token,
            format!(
                "expected {}, found {}",
                kind.describe(),
                token.kind.describe()
            ),
        ))
    }

    fn check_defined(&self, token: &Token, name: &str) -> ParseResult<()> {
        if self.is_bound(name) {
            Ok(())
        } else {
            Err(self.error_at(token, format!("undefined variable ${}", name)))
        }
    }

    fn is_bound(&self, name: &str) -> bool {
        self.scope.iter().any(|n| n == name)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if &self.peek().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn error_at(&self, token: &Token, message: impl Into<String>) -> PatternSyntaxError {
        PatternSyntaxError::new(token.line, token.column, message)
    }
}

/// Operands a pattern or a construction can give an operator: its expression operands plus
/// the trailing private. List operators have a single operand, their item list.
fn operand_count(op: &Operator) -> usize {
    if op.is_list() {
        return 1;
    }
    let shape = op.shape();
    shape.operands.len() + usize::from(shape.private.is_some())
}
