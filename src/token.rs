//! Tokens produced by the layout tokenizer.

use crate::ast::Literal;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// `name:` directive header (also a field namespace prefix).
    Header,
    /// `[Name]`
    RecordHeader,
    /// `[n]`, `[n..m]`, `[n..*]`
    ArraySize,
    Number,
    Boolean,
    String,
    Hex,
    Identifier,
    LParen,
    RParen,
    Comma,
    Equals,
    Less,
    Question,
    At,
    Eol,
    Eof,
}

impl TokenKind {
    pub fn is_literal(self) -> bool {
        matches!(
            self,
            TokenKind::Number | TokenKind::Boolean | TokenKind::String | TokenKind::Hex
        )
    }

    pub fn describe(self) -> &'static str {
        match self {
            TokenKind::Header => "directive header",
            TokenKind::RecordHeader => "record header",
            TokenKind::ArraySize => "array size",
            TokenKind::Number => "number",
            TokenKind::Boolean => "boolean",
            TokenKind::String => "string",
            TokenKind::Hex => "hex literal",
            TokenKind::Identifier => "identifier",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::Comma => "','",
            TokenKind::Equals => "'='",
            TokenKind::Less => "'<'",
            TokenKind::Question => "'?'",
            TokenKind::At => "'@'",
            TokenKind::Eol => "end of line",
            TokenKind::Eof => "end of input",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Decoded payload of a token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue {
    None,
    /// Header/record-header/identifier name without punctuation.
    Name(String),
    Literal(Literal),
    /// Array annotation; `max == None` means unbounded (`*`).
    Bounds { min: u32, max: Option<u32> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub raw: String,
    pub value: TokenValue,
    /// 1-based
    pub line: usize,
    /// 1-based, in characters
    pub column: usize,
}

impl Token {
    pub fn name(&self) -> Option<&str> {
        match &self.value {
            TokenValue::Name(n) => Some(n),
            _ => None,
        }
    }

    pub fn literal(&self) -> Option<&Literal> {
        match &self.value {
            TokenValue::Literal(l) => Some(l),
            _ => None,
        }
    }
}
