//! Lexer - PEST-based tokenizer for Zflow scripts
//!
//! Produces a flat token stream with span information. Deciding which
//! identifiers are models, prompts or inputs is left to the parser:
//! `provX:m1` lexes as `Identifier Colon Identifier`.

use pest::Parser;
use pest_derive::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Span;


#[derive(Parser)]
#[grammar = "lexer/zflow.pest"]
struct ZflowLexer;

/* ===================== Tokens ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    Identifier,
    StringLiteral,
    Equals,
    Arrow,
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Star,
    Comma,
    Underscore,
    Colon,
    /// A newline
    StatementSeparator,
}

impl TokenKind {
    /// Human-readable name used in syntax errors
    pub fn describe(&self) -> &'static str {
        match self {
            TokenKind::Identifier => "identifier",
            TokenKind::StringLiteral => "string literal",
            TokenKind::Equals => "'='",
            TokenKind::Arrow => "'->'",
            TokenKind::LBrace => "'{'",
            TokenKind::RBrace => "'}'",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBracket => "'['",
            TokenKind::RBracket => "']'",
            TokenKind::Star => "'*'",
            TokenKind::Comma => "','",
            TokenKind::Underscore => "'_'",
            TokenKind::Colon => "':'",
            TokenKind::StatementSeparator => "newline",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    /// Source text; for string literals, the unescaped contents without quotes
    pub text: String,
    pub span: Span,
}

impl Token {
    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }

    /// True when `next` starts exactly where this token ends
    pub fn touches(&self, next: &Token) -> bool {
        self.span.end == next.span.start
    }
}

/* ===================== Error Types ===================== */

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("lex error at line {}, col {}: {}", .line + 1, .col + 1, .message)]
pub struct LexError {
    /// Byte offset of the offending character
    pub position: usize,
    pub line: usize,
    pub col: usize,
    pub message: String,
}

impl LexError {
    fn at(source: &str, position: usize) -> Self {
        let span = Span::locate(source, position, position);
        let message = match source.get(position..).and_then(|rest| rest.chars().next()) {
            Some(c) if is_quote(c) => "unterminated string literal".to_string(),
            Some(c) => format!("unexpected character '{}'", c),
            None => "unexpected end of input".to_string(),
        };
        LexError {
            position,
            line: span.line,
            col: span.col,
            message,
        }
    }
}

fn is_quote(c: char) -> bool {
    matches!(c, '\'' | '"' | '‘' | '’' | '“')
}

/* ===================== Public API ===================== */

/// Tokenize a Zflow script
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    let mut pairs = ZflowLexer::parse(Rule::tokens, source).map_err(|err| {
        let position = match err.location {
            pest::error::InputLocation::Pos(pos) => pos,
            pest::error::InputLocation::Span((start, _)) => start,
        };
        LexError::at(source, position)
    })?;

    let Some(root) = pairs.next() else {
        return Ok(Vec::new());
    };

    let mut cursor = Cursor::new(source);
    let mut tokens = Vec::new();
    for pair in root.into_inner() {
        let pest_span = pair.as_span();
        let span = cursor.span(pest_span.start(), pest_span.end());
        let kind = match pair.as_rule() {
            Rule::ident => TokenKind::Identifier,
            Rule::string => {
                let body = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
                tokens.push(Token {
                    kind: TokenKind::StringLiteral,
                    text: unescape(body),
                    span,
                });
                continue;
            }
            Rule::newline => TokenKind::StatementSeparator,
            Rule::arrow => TokenKind::Arrow,
            Rule::equals => TokenKind::Equals,
            Rule::lbrace => TokenKind::LBrace,
            Rule::rbrace => TokenKind::RBrace,
            Rule::lparen => TokenKind::LParen,
            Rule::rparen => TokenKind::RParen,
            Rule::lbracket => TokenKind::LBracket,
            Rule::rbracket => TokenKind::RBracket,
            Rule::star => TokenKind::Star,
            Rule::comma => TokenKind::Comma,
            Rule::underscore => TokenKind::Underscore,
            Rule::colon => TokenKind::Colon,
            _ => continue, // EOI
        };
        tokens.push(Token {
            kind,
            text: pair.as_str().to_string(),
            span,
        });
    }

    Ok(tokens)
}

/// Line and column tracking that only moves forward through the source, so
/// locating every token costs one pass in total.
struct Cursor<'s> {
    source: &'s str,
    offset: usize,
    line: usize,
    col: usize,
}

impl<'s> Cursor<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            source,
            offset: 0,
            line: 0,
            col: 0,
        }
    }

    /// Span for `[start, end)`. Starts must not decrease between calls.
    fn span(&mut self, start: usize, end: usize) -> Span {
        if let Some(skipped) = self.source.get(self.offset..start) {
            for ch in skipped.chars() {
                if ch == '\n' {
                    self.line += 1;
                    self.col = 0;
                } else {
                    self.col += 1;
                }
            }
            self.offset = start;
        }
        Span::new(start, end, self.line, self.col)
    }
}

/// Resolve backslash escapes: `\<quote>` and `\\` drop the backslash,
/// anything else is kept verbatim.
fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(next) if next == '\\' || is_quote(next) || next == '”' => out.push(next),
            Some(next) => {
                out.push('\\');
                out.push(next);
            }
            None => out.push('\\'),
        }
    }
    out
}
