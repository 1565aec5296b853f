use std::iter::Peekable;
use std::str::CharIndices;

use crate::optimizer::PatternSyntaxError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Ident(String),
    /// `$name`
    Var(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Pipe,
    Amp,
    Caret,
    Star,
    Colon,
    Comma,
    /// `...`
    Ellipsis,
    /// `=>`
    Arrow,
    Eof,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Ident(name) => format!("'{}'", name),
            TokenKind::Var(name) => format!("'${}'", name),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
            TokenKind::LBracket => "'['".to_string(),
            TokenKind::RBracket => "']'".to_string(),
            TokenKind::Pipe => "'|'".to_string(),
            TokenKind::Amp => "'&'".to_string(),
            TokenKind::Caret => "'^'".to_string(),
            TokenKind::Star => "'*'".to_string(),
            TokenKind::Colon => "':'".to_string(),
            TokenKind::Comma => "','".to_string(),
            TokenKind::Ellipsis => "'...'".to_string(),
            TokenKind::Arrow => "'=>'".to_string(),
            TokenKind::Eof => "end of input".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

/// Splits rule text into tokens. Lines and columns are 1-based; `#` starts a comment that
/// runs to the end of the line.
pub struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
    position: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            position: 0,
            line: 1,
            column: 1,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, PatternSyntaxError> {
        let mut tokens = vec![];
        loop {
            let token = self.next_token()?;
            let eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if eof {
                return Ok(tokens);
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, PatternSyntaxError> {
        self.skip_whitespace();
        let (line, column) = (self.line, self.column);
        let token = |kind| Token { kind, line, column };

        let Some(&(_, ch)) = self.chars.peek() else {
            return Ok(token(TokenKind::Eof));
        };
        let kind = match ch {
            'a'..='z' | 'A'..='Z' | '_' => TokenKind::Ident(self.scan_name()),
            '$' => {
                self.advance();
                let name = self.scan_name();
                if name.is_empty() {
                    return Err(PatternSyntaxError::new(
                        line,
                        column,
                        "expected a variable name after '$'",
                    ));
                }
                TokenKind::Var(name)
            }
            '=' => {
                self.advance();
                if !self.match_char('>') {
                    return Err(PatternSyntaxError::new(line, column, "expected '=>'"));
                }
                TokenKind::Arrow
            }
            '.' => {
                for _ in 0..3 {
                    if !self.match_char('.') {
                        return Err(PatternSyntaxError::new(line, column, "expected '...'"));
                    }
                }
                TokenKind::Ellipsis
            }
            _ => {
                let kind = match ch {
                    '(' => TokenKind::LParen,
                    ')' => TokenKind::RParen,
                    '[' => TokenKind::LBracket,
                    ']' => TokenKind::RBracket,
                    '|' => TokenKind::Pipe,
                    '&' => TokenKind::Amp,
                    '^' => TokenKind::Caret,
                    '*' => TokenKind::Star,
                    ':' => TokenKind::Colon,
                    ',' => TokenKind::Comma,
                    _ => {
                        return Err(PatternSyntaxError::new(
                            line,
                            column,
                            format!("unexpected character '{}'", ch),
                        ))
                    }
                };
                self.advance();
                kind
            }
        };
        Ok(token(kind))
    }

    fn skip_whitespace(&mut self) {
        while let Some(&(_, ch)) = self.chars.peek() {
            match ch {
                '#' => {
                    while let Some(&(_, c)) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                c if c.is_whitespace() => {
                    self.advance();
                }
                _ => break,
            }
        }
    }

    fn scan_name(&mut self) -> String {
        let start = self.position;
        while let Some(&(_, ch)) = self.chars.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }
        self.source[start..self.position].to_string()
    }

    fn advance(&mut self) -> Option<char> {
        let (pos, ch) = self.chars.next()?;
        self.position = pos + ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn match_char(&mut self, expected: char) -> bool {
        match self.chars.peek() {
            Some(&(_, ch)) if ch == expected => {
                self.advance();
                true
            }
            _ => false,
        }
    }
}
