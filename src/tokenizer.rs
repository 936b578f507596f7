//! Line-oriented tokenizer for layout source.
//!
//! Each line is scanned left to right: whitespace and `#` comments are skipped, then
//! the ordered alternatives of `layout.pest` are tried at the current position. A
//! non-blank line ends with an EOL token; blank lines produce nothing. The token
//! stream ends with EOF, which repeats forever.

use crate::ast::Literal;
use crate::error::SyntaxError;
use crate::token::{Token, TokenKind, TokenValue};
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser as PestParser;
use rust_decimal::Decimal;
use std::str::FromStr;

#[derive(PestParser)]
#[grammar = "layout.pest"]
struct TokenGrammar;

pub struct Tokenizer<'a> {
    lines: Vec<&'a str>,
    line: usize,
    pos: usize,
    line_open: bool,
    peeked: Option<Token>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(source: &'a str) -> Self {
        Tokenizer {
            lines: source.lines().collect(),
            line: 0,
            pos: 0,
            line_open: false,
            peeked: None,
        }
    }

    /// Look at the next token without consuming it.
    pub fn peek(&mut self) -> Result<&Token, SyntaxError> {
        let tok = match self.peeked.take() {
            Some(t) => t,
            None => self.lex()?,
        };
        Ok(self.peeked.insert(tok))
    }

    pub fn consume(&mut self) -> Result<Token, SyntaxError> {
        match self.peeked.take() {
            Some(t) => Ok(t),
            None => self.lex(),
        }
    }

    fn column_of(&self, text: &str, pos: usize) -> usize {
        text[..pos].chars().count() + 1
    }

    fn simple(&self, kind: TokenKind, column: usize) -> Token {
        Token {
            kind,
            raw: String::new(),
            value: TokenValue::None,
            line: self.line + 1,
            column,
        }
    }

    fn lex(&mut self) -> Result<Token, SyntaxError> {
        loop {
            let Some(&text) = self.lines.get(self.line) else {
                let mut eof = self.simple(TokenKind::Eof, 1);
                eof.line = self.lines.len().max(1);
                return Ok(eof);
            };
            let skipped = text[self.pos..]
                .find(|c: char| !c.is_whitespace())
                .map(|i| self.pos + i)
                .unwrap_or(text.len());
            self.pos = skipped;
            if self.pos >= text.len() || text[self.pos..].starts_with('#') {
                let was_open = self.line_open;
                let column = self.column_of(text, self.pos);
                let eol = self.simple(TokenKind::Eol, column);
                self.line += 1;
                self.pos = 0;
                self.line_open = false;
                if was_open {
                    return Ok(eol);
                }
                continue;
            }
            let tok = self.lex_at(text)?;
            self.line_open = true;
            return Ok(tok);
        }
    }

    fn lex_at(&mut self, text: &str) -> Result<Token, SyntaxError> {
        let rest = &text[self.pos..];
        let line = self.line + 1;
        let column = self.column_of(text, self.pos);
        let unrecognized = || {
            let snippet: String = rest.chars().take_while(|c| !c.is_whitespace()).collect();
            SyntaxError::at(format!("unrecognized input '{}'", snippet), line, column)
                .with_token(snippet)
        };
        let mut pairs = TokenGrammar::parse(Rule::token, rest).map_err(|_| unrecognized())?;
        let outer = pairs.next().ok_or_else(unrecognized)?;
        let len = outer.as_span().end();
        let pair = outer.into_inner().next().ok_or_else(unrecognized)?;
        let raw = rest[..len].to_string();
        let (kind, value) = build_token(pair, line, column)?;
        self.pos += len;
        Ok(Token {
            kind,
            raw,
            value,
            line,
            column,
        })
    }
}

fn build_token(
    pair: Pair<Rule>,
    line: usize,
    column: usize,
) -> Result<(TokenKind, TokenValue), SyntaxError> {
    let raw = pair.as_str().to_string();
    let fail = |msg: String| SyntaxError::at(msg, line, column).with_token(raw.clone());
    let inner_name = |pair: Pair<Rule>| {
        pair.into_inner()
            .find(|p| p.as_rule() == Rule::name)
            .map(|p| TokenValue::Name(p.as_str().to_string()))
    };
    match pair.as_rule() {
        Rule::record_header => {
            let name = inner_name(pair).ok_or_else(|| fail("record header: missing name".into()))?;
            Ok((TokenKind::RecordHeader, name))
        }
        Rule::directive_header => {
            let name = inner_name(pair).ok_or_else(|| fail("header: missing name".into()))?;
            Ok((TokenKind::Header, name))
        }
        Rule::array_size => {
            let mut min = None;
            let mut max = None;
            for p in pair.into_inner() {
                match p.as_rule() {
                    Rule::lower => {
                        min = Some(p.as_str().parse::<u32>().map_err(|_| fail("array bound too large".into()))?)
                    }
                    Rule::upper if p.as_str() == "*" => max = Some(None),
                    Rule::upper => {
                        let n = p.as_str().parse::<u32>().map_err(|_| fail("array bound too large".into()))?;
                        max = Some(Some(n));
                    }
                    _ => {}
                }
            }
            let min = min.ok_or_else(|| fail("array size: missing bound".into()))?;
            let max = max.unwrap_or(Some(min));
            Ok((TokenKind::ArraySize, TokenValue::Bounds { min, max }))
        }
        Rule::hex => {
            let digits = &raw[2..];
            let padded = if digits.len() % 2 == 1 {
                format!("0{}", digits)
            } else {
                digits.to_string()
            };
            let bytes = hex::decode(&padded).map_err(|e| fail(format!("invalid hex literal: {}", e)))?;
            Ok((TokenKind::Hex, TokenValue::Literal(Literal::Hex(bytes))))
        }
        Rule::number => {
            let n = Decimal::from_str(raw.trim_start_matches('+'))
                .map_err(|e| fail(format!("invalid number: {}", e)))?;
            Ok((TokenKind::Number, TokenValue::Literal(Literal::Number(n))))
        }
        Rule::boolean => Ok((
            TokenKind::Boolean,
            TokenValue::Literal(Literal::Bool(raw == "true")),
        )),
        Rule::string => {
            let body = pair
                .into_inner()
                .next()
                .map(|p| p.as_str().to_string())
                .unwrap_or_default();
            let text = unescape(&body).map_err(fail)?;
            Ok((TokenKind::String, TokenValue::Literal(Literal::String(text))))
        }
        Rule::identifier => Ok((TokenKind::Identifier, TokenValue::Name(raw.clone()))),
        Rule::punct => {
            let kind = match raw.as_str() {
                "(" => TokenKind::LParen,
                ")" => TokenKind::RParen,
                "," => TokenKind::Comma,
                "=" => TokenKind::Equals,
                "<" => TokenKind::Less,
                "?" => TokenKind::Question,
                "@" => TokenKind::At,
                other => return Err(fail(format!("unexpected punctuation '{}'", other))),
            };
            Ok((kind, TokenValue::None))
        }
        other => Err(fail(format!("unexpected token rule {:?}", other))),
    }
}

/// Decode backslash escapes of a string literal body.
fn unescape(body: &str) -> Result<String, String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let decoded = match chars.next() {
            Some('n') => '\n',
            Some('t') => '\t',
            Some('b') => '\u{8}',
            Some('r') => '\r',
            Some('f') => '\u{c}',
            Some('\\') => '\\',
            Some('\'') => '\'',
            Some('"') => '"',
            Some(other) => return Err(format!("invalid escape sequence '\\{}'", other)),
            None => return Err("dangling backslash in string".to_string()),
        };
        out.push(decoded);
    }
    Ok(out)
}

/// Tokenize a whole source (EOF included). Handy for diagnostics and tests.
pub fn tokenize(source: &str) -> Result<Vec<Token>, SyntaxError> {
    let mut t = Tokenizer::new(source);
    let mut out = Vec::new();
    loop {
        let tok = t.consume()?;
        let done = tok.kind == TokenKind::Eof;
        out.push(tok);
        if done {
            return Ok(out);
        }
    }
}
