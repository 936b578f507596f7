//! Parsed (not yet linked) form of a layout file.

use rust_decimal::Decimal;
use std::fmt;

/// Reserved record name routing a record to the classifier slot.
pub const CLASSIFIER: &str = "classifier";

/// Root of a parsed layout: directives, record types, optional classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSchema {
    pub source_id: Option<String>,
    pub directives: Vec<Directive>,
    pub record_types: Vec<RecordType>,
    pub classifier: Option<RecordType>,
}

impl ParsedSchema {
    pub fn directive(&self, name: &str) -> Option<&Directive> {
        self.directives
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    pub fn record_type(&self, name: &str) -> Option<&RecordType> {
        self.record_types
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    pub name: String,
    pub value: Literal,
    pub line: usize,
    pub column: usize,
}

/// One named layout variant.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordType {
    pub name: String,
    /// Base type for diff inheritance (`[Name] < [Base]`).
    pub base: Option<String>,
    pub conditions: Vec<Condition>,
    pub fields: Vec<FieldSpec>,
    pub line: usize,
}

impl RecordType {
    pub fn is_classifier(&self) -> bool {
        self.name.eq_ignore_ascii_case(CLASSIFIER)
    }
}

/// `field = literal[, literal...]` dispatch condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub values: Vec<Literal>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    /// 1-based byte position (fixed) or column (variable).
    pub position: u32,
    /// Includes the namespace prefix, if any (`prefix:name`).
    pub name: String,
    /// Field-level text encoding override (`Encoding("Cp037")`).
    pub encoding: Option<String>,
    pub required: bool,
    pub attribute: bool,
    pub filler: bool,
    pub occurs: Occurs,
    /// First convertor of the field line; `None` is reported by the linker.
    pub data_type: Option<ConverterDecl>,
    pub converters: Vec<ConverterDecl>,
    pub line: usize,
    pub column: usize,
}

impl FieldSpec {
    pub fn is_array(&self) -> bool {
        self.occurs.is_array()
    }
}

/// Repetition bounds of a field. Scalars are `{min: 1, max: Some(1)}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurs {
    pub min: u32,
    /// `None` = unbounded (`[n..*]`).
    pub max: Option<u32>,
}

impl Occurs {
    pub const ONE: Occurs = Occurs {
        min: 1,
        max: Some(1),
    };

    pub fn is_array(&self) -> bool {
        self.max.map_or(true, |m| m > 1)
    }

    pub fn is_optional(&self) -> bool {
        self.min == 0
    }
}

/// A DataType or ValueConverter reference by name, with literal arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct ConverterDecl {
    pub name: String,
    pub args: Vec<Literal>,
    /// Created from a bare literal rather than written by name.
    pub synthetic: bool,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Number(Decimal),
    Bool(bool),
    Hex(Vec<u8>),
}

impl Literal {
    pub fn kind(&self) -> LiteralKind {
        match self {
            Literal::String(_) => LiteralKind::String,
            Literal::Number(_) => LiteralKind::Number,
            Literal::Bool(_) => LiteralKind::Bool,
            Literal::Hex(_) => LiteralKind::Hex,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Literal::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        use rust_decimal::prelude::ToPrimitive;
        match self {
            Literal::Number(n) if n.fract().is_zero() => n.to_u64(),
            Literal::Hex(b) if !b.is_empty() && b.len() <= 8 => {
                Some(b.iter().fold(0u64, |acc, &x| (acc << 8) | x as u64))
            }
            _ => None,
        }
    }

    /// Text form used when a literal is compared to a field value.
    pub fn to_text(&self) -> String {
        match self {
            Literal::String(s) => s.clone(),
            Literal::Number(n) => n.normalize().to_string(),
            Literal::Bool(b) => b.to_string(),
            Literal::Hex(b) => hex::encode_upper(b),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "{:?}", s),
            Literal::Hex(b) => write!(f, "0x{}", hex::encode_upper(b)),
            other => f.write_str(&other.to_text()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralKind {
    String,
    Number,
    Bool,
    Hex,
}

impl fmt::Display for LiteralKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LiteralKind::String => "string",
            LiteralKind::Number => "number",
            LiteralKind::Bool => "boolean",
            LiteralKind::Hex => "hex",
        })
    }
}
