//! Field codecs: one [`DataType`] per field plus a chain of [`ValueConverter`]s.
//!
//! A DataType maps raw bytes (fixed layouts) or one text column (variable layouts)
//! to a [`Value`]. ValueConverters map values to values; the engines apply them in
//! declared order on read and in reverse order on write.

pub mod converter;
pub mod datatype;
pub mod decimal;
pub mod registry;

pub use registry::{ConverterFactory, ConverterRegistry, DataTypeFactory, Family};

use crate::ast::Literal;
use crate::charset::Charset;
use crate::error::ConvertError;
use crate::schema::NumericSettings;
use crate::value::Value;
use std::fmt;

/// Per-call inputs a DataType needs beyond its own arguments.
#[derive(Debug, Clone, Copy)]
pub struct CodecContext<'a> {
    pub charset: Charset,
    pub numeric: &'a NumericSettings,
}

/// Link-time environment handed to DataType factories.
#[derive(Debug, Clone, Copy)]
pub struct FieldEnv<'a> {
    pub field: &'a str,
    pub charset: Charset,
}

pub trait DataType: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Bytes per occurrence in a fixed layout; columns (always 1) in a variable one.
    fn width(&self) -> usize;

    fn decode_text(&self, _text: &str, _ctx: &CodecContext<'_>) -> Result<Value, ConvertError> {
        Err(ConvertError::Invalid(format!("{} has no text form", self.name())))
    }

    fn encode_text(&self, _value: &Value, _ctx: &CodecContext<'_>) -> Result<String, ConvertError> {
        Err(ConvertError::Invalid(format!("{} has no text form", self.name())))
    }

    fn decode_bytes(&self, bytes: &[u8], ctx: &CodecContext<'_>) -> Result<Value, ConvertError> {
        self.decode_text(&ctx.charset.decode(bytes), ctx)
    }

    fn encode_bytes(&self, value: &Value, ctx: &CodecContext<'_>) -> Result<Vec<u8>, ConvertError> {
        Ok(ctx.charset.encode(&self.encode_text(value, ctx)?))
    }
}

pub trait ValueConverter: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    fn read(&self, value: Value) -> Result<Value, ConvertError>;
    fn write(&self, value: Value) -> Result<Value, ConvertError>;
}

/// Typed access to the literal arguments of a converter declaration.
#[derive(Debug, Clone, Copy)]
pub struct Args<'a> {
    name: &'a str,
    items: &'a [Literal],
}

impl<'a> Args<'a> {
    pub fn new(name: &'a str, items: &'a [Literal]) -> Self {
        Args { name, items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &'a [Literal] {
        self.items
    }

    pub fn get(&self, i: usize) -> Option<&'a Literal> {
        self.items.get(i)
    }

    fn invalid(&self, msg: impl fmt::Display) -> ConvertError {
        ConvertError::Invalid(format!("{}: {}", self.name, msg))
    }

    pub fn at_most(&self, n: usize) -> Result<(), ConvertError> {
        if self.items.len() > n {
            return Err(self.invalid(format!(
                "takes at most {} argument(s), got {}",
                n,
                self.items.len()
            )));
        }
        Ok(())
    }

    pub fn between(&self, min: usize, max: usize) -> Result<(), ConvertError> {
        if self.items.len() < min {
            return Err(self.invalid(format!(
                "takes at least {} argument(s), got {}",
                min,
                self.items.len()
            )));
        }
        self.at_most(max)
    }

    pub fn usize(&self, i: usize) -> Result<Option<usize>, ConvertError> {
        match self.items.get(i) {
            None => Ok(None),
            Some(Literal::Number(_)) => self.items[i]
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| self.invalid(format!("argument {} must be a non-negative integer", i + 1))),
            Some(other) => Err(self.invalid(format!(
                "argument {} must be a number, found {}",
                i + 1,
                other.kind()
            ))),
        }
    }

    pub fn size(&self, i: usize) -> Result<usize, ConvertError> {
        match self.usize(i)? {
            Some(n) if n > 0 => Ok(n),
            Some(_) => Err(self.invalid("size must be positive")),
            None => Err(self.invalid("missing size argument")),
        }
    }

    pub fn string(&self, i: usize) -> Result<Option<&'a str>, ConvertError> {
        match self.items.get(i) {
            None => Ok(None),
            Some(Literal::String(s)) => Ok(Some(s)),
            Some(other) => Err(self.invalid(format!(
                "argument {} must be a string, found {}",
                i + 1,
                other.kind()
            ))),
        }
    }

    pub fn char(&self, i: usize) -> Result<Option<char>, ConvertError> {
        match self.string(i)? {
            None => Ok(None),
            Some(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(Some(c)),
                    _ => Err(self.invalid(format!("argument {} must be a single character", i + 1))),
                }
            }
        }
    }

    /// Sign nibble (number or hex literal, 0x0..=0xF).
    pub fn nibble(&self, i: usize) -> Result<Option<u8>, ConvertError> {
        match self.items.get(i) {
            None => Ok(None),
            Some(lit) => match lit.as_u64() {
                Some(n) if n <= 0xF => Ok(Some(n as u8)),
                _ => Err(self.invalid(format!("argument {} must be a nibble (0x0..0xF), found {}", i + 1, lit))),
            },
        }
    }
}

impl From<&Literal> for Value {
    fn from(lit: &Literal) -> Self {
        match lit {
            Literal::String(s) => Value::Text(s.clone()),
            Literal::Number(n) => Value::Decimal(*n),
            Literal::Bool(b) => Value::Text(b.to_string()),
            Literal::Hex(b) => Value::Bytes(b.clone()),
        }
    }
}
