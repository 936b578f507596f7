//! Linked (finalized) schema and the scalar settings resolved from directives.

use crate::ast::{Directive, Literal, Occurs};
use crate::charset::Charset;
use crate::config::RuntimeDefaults;
use crate::convert::{CodecContext, DataType, ValueConverter};
use crate::directive::{self as d, FileType};
use crate::error::{ConvertError, SyntaxError};
use crate::predicate::{self, Predicate};
use crate::record::FieldSet;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// Compiled layout. Immutable; share it between formatters with `Arc`.
#[derive(Debug)]
pub struct LinkedSchema {
    pub source_id: Option<String>,
    pub file_type: FileType,
    pub directives: Vec<Directive>,
    pub record_types: Vec<LinkedRecordType>,
    pub classifier: Option<LinkedRecordType>,
    pub(crate) settings: FormatSettings,
}

impl LinkedSchema {
    /// Settings resolved against the runtime defaults the schema was linked with.
    pub fn default_settings(&self) -> &FormatSettings {
        &self.settings
    }

    /// Re-resolve directive scalars against fresh runtime defaults. Fields are not relinked.
    pub fn settings(&self, defaults: &RuntimeDefaults) -> Result<FormatSettings, SyntaxError> {
        FormatSettings::resolve(self.file_type, &self.directives, defaults)
            .map_err(|e| e.with_source(self.source_id.as_deref()))
    }

    pub fn record_type(&self, name: &str) -> Option<&LinkedRecordType> {
        self.record_types
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
    }

    pub fn source_name(&self) -> &str {
        self.source_id.as_deref().unwrap_or("<layout>")
    }
}

#[derive(Debug, Clone)]
pub struct LinkedRecordType {
    pub name: String,
    pub base: Option<String>,
    pub predicates: Vec<Predicate>,
    /// Flattened (base merged), ordered by position.
    pub fields: Vec<LinkedField>,
    /// Bytes (fixed) or columns (variable) covered by the fields.
    pub length: usize,
}

impl LinkedRecordType {
    pub fn matches(&self, record: &FieldSet) -> bool {
        predicate::all_match(&self.predicates, record)
    }

    pub fn field(&self, name: &str) -> Option<&LinkedField> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Human-readable conjunction of the dispatch conditions.
    pub fn describe_conditions(&self) -> String {
        if self.predicates.is_empty() {
            return format!("[{}] (no conditions)", self.name);
        }
        let parts: Vec<String> = self.predicates.iter().map(|p| p.to_string()).collect();
        format!("[{}] {}", self.name, parts.join(" and "))
    }
}

#[derive(Clone)]
pub struct LinkedField {
    pub name: String,
    /// Declared 1-based position.
    pub position: usize,
    /// 0-based byte offset (fixed) or column index (variable).
    pub offset: usize,
    pub occurs: Occurs,
    pub required: bool,
    pub attribute: bool,
    pub filler: bool,
    pub charset: Charset,
    pub data_type: Arc<dyn DataType>,
    pub converters: Vec<Arc<dyn ValueConverter>>,
    pub line: usize,
}

impl LinkedField {
    /// Bytes or columns of one occurrence.
    pub fn width(&self) -> usize {
        self.data_type.width()
    }

    /// Occurrences the layout reserves; unbounded arrays count their minimum.
    pub fn slots(&self) -> usize {
        self.occurs.max.unwrap_or(self.occurs.min) as usize
    }

    /// Total bytes or columns reserved.
    pub fn size(&self) -> usize {
        self.width() * self.slots()
    }

    pub fn is_array(&self) -> bool {
        self.occurs.is_array()
    }

    pub fn has_converter(&self, name: &str) -> bool {
        self.converters.iter().any(|c| c.name().eq_ignore_ascii_case(name))
    }

    /// Run the converter chain in declared order.
    pub fn apply_read(&self, mut value: Value) -> Result<Value, ConvertError> {
        for c in &self.converters {
            value = c.read(value)?;
        }
        Ok(value)
    }

    /// Run the converter chain in reverse order.
    pub fn apply_write(&self, mut value: Value) -> Result<Value, ConvertError> {
        for c in self.converters.iter().rev() {
            value = c.write(value)?;
        }
        Ok(value)
    }

    pub fn context<'a>(&self, settings: &'a FormatSettings) -> CodecContext<'a> {
        CodecContext {
            charset: self.charset,
            numeric: &settings.numeric,
        }
    }
}

impl fmt::Debug for LinkedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let converters: Vec<&str> = self.converters.iter().map(|c| c.name()).collect();
        f.debug_struct("LinkedField")
            .field("name", &self.name)
            .field("position", &self.position)
            .field("offset", &self.offset)
            .field("occurs", &self.occurs)
            .field("filler", &self.filler)
            .field("charset", &self.charset)
            .field("data_type", &self.data_type.name())
            .field("converters", &converters)
            .finish()
    }
}

/// File-level numeric formatting: sign nibbles (directive, else runtime default) and
/// numeric-text options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NumericSettings {
    pub positive_zone_sign_nibble: Option<u8>,
    pub negative_zone_sign_nibble: Option<u8>,
    pub positive_pack_sign_nibble: Option<u8>,
    pub negative_pack_sign_nibble: Option<u8>,
    pub required_decimal_point: bool,
    pub fixed_sign_position: bool,
    pub required_plus_sign: bool,
}

/// Scalars resolved from directives, falling back to runtime defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatSettings {
    pub charset: Charset,
    pub record_separator: Option<String>,
    pub record_length: Option<usize>,
    pub field_separator: Option<String>,
    pub quote: Option<char>,
    pub ignore_blank_lines: bool,
    pub requires_title: bool,
    pub title_type: String,
    pub max_record_length: usize,
    pub numeric: NumericSettings,
    pub flush_per_record: bool,
    pub minimal_quoting: bool,
}

struct Lookup<'a> {
    directives: &'a [Directive],
}

impl<'a> Lookup<'a> {
    fn get(&self, name: &str) -> Option<&'a Directive> {
        self.directives.iter().find(|d| d.name.eq_ignore_ascii_case(name))
    }

    fn fail(d: &Directive, msg: impl fmt::Display) -> SyntaxError {
        SyntaxError::at(format!("directive '{}': {}", d.name, msg), d.line, d.column)
    }

    fn string(&self, name: &str) -> Option<&'a str> {
        self.get(name).and_then(|d| d.value.as_str())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(|d| d.value.as_bool())
    }

    fn usize(&self, name: &str) -> Result<Option<usize>, SyntaxError> {
        match self.get(name) {
            None => Ok(None),
            Some(d) => match d.value.as_u64().and_then(|n| usize::try_from(n).ok()) {
                Some(n) if n > 0 => Ok(Some(n)),
                _ => Err(Self::fail(d, format!("expected a positive integer, found {}", d.value))),
            },
        }
    }

    fn nibble(&self, name: &str) -> Result<Option<u8>, SyntaxError> {
        match self.get(name) {
            None => Ok(None),
            Some(d) => match d.value.as_u64() {
                Some(n) if n <= 0xF => Ok(Some(n as u8)),
                _ => Err(Self::fail(d, format!("expected a nibble (0x0..0xF), found {}", d.value))),
            },
        }
    }
}

impl FormatSettings {
    /// Resolve every scalar: directive first, then runtime default.
    pub fn resolve(
        file_type: FileType,
        directives: &[Directive],
        defaults: &RuntimeDefaults,
    ) -> Result<FormatSettings, SyntaxError> {
        let l = Lookup { directives };

        let charset = match l.get(d::TEXT_ENCODING) {
            Some(dir) => {
                let name = dir.value.as_str().unwrap_or_default();
                Charset::for_name(name)
                    .ok_or_else(|| Lookup::fail(dir, format!("unknown charset {:?}", name)))?
            }
            None => Charset::Utf8,
        };

        let record_separator = match l.get(d::RECORD_SEPARATOR) {
            Some(dir) => {
                let sep = dir.value.as_str().unwrap_or_default();
                if !defaults.is_allowed_separator(sep) {
                    return Err(Lookup::fail(
                        dir,
                        format!(
                            "record separator {:?} is not one of the allowed separators {:?}",
                            sep, defaults.allowed_record_separators
                        ),
                    ));
                }
                Some(sep.to_string())
            }
            None => None,
        };

        let field_separator = match l.get(d::FIELD_SEPARATOR) {
            Some(dir) => {
                let sep = dir.value.as_str().unwrap_or_default();
                if sep.is_empty() {
                    return Err(Lookup::fail(dir, "field separator is empty"));
                }
                Some(sep.to_string())
            }
            None => None,
        };

        let quote = match l.get(d::QUOTING_DELIMITER) {
            Some(dir) => {
                let q = dir.value.as_str().unwrap_or_default();
                let mut chars = q.chars();
                match (chars.next(), chars.next()) {
                    (None, _) => None,
                    (Some(c), None) => Some(c),
                    _ => return Err(Lookup::fail(dir, "quoting delimiter must be one character")),
                }
            }
            None => None,
        };

        let numeric = NumericSettings {
            positive_zone_sign_nibble: l
                .nibble(d::POSITIVE_ZONE_SIGN_NIBBLE)?
                .or(defaults.positive_zone_sign_nibble),
            negative_zone_sign_nibble: l
                .nibble(d::NEGATIVE_ZONE_SIGN_NIBBLE)?
                .or(defaults.negative_zone_sign_nibble),
            positive_pack_sign_nibble: l
                .nibble(d::POSITIVE_PACK_SIGN_NIBBLE)?
                .or(defaults.positive_pack_sign_nibble),
            negative_pack_sign_nibble: l
                .nibble(d::NEGATIVE_PACK_SIGN_NIBBLE)?
                .or(defaults.negative_pack_sign_nibble),
            required_decimal_point: l
                .bool(d::REQUIRED_DECIMAL_POINT)
                .unwrap_or(defaults.required_decimal_point),
            fixed_sign_position: l
                .bool(d::FIXED_SIGN_POSITION)
                .unwrap_or(defaults.fixed_sign_position),
            required_plus_sign: l
                .bool(d::REQUIRED_PLUS_SIGN)
                .unwrap_or(defaults.required_plus_sign),
        };

        Ok(FormatSettings {
            charset,
            record_separator,
            record_length: l.usize(d::RECORD_LENGTH)?,
            field_separator: if file_type == FileType::Variable {
                field_separator
            } else {
                None
            },
            quote,
            ignore_blank_lines: l.bool(d::IGNORE_BLANK_LINES).unwrap_or(false),
            requires_title: l.bool(d::REQUIRES_TITLE).unwrap_or(false),
            title_type: l
                .string(d::TITLE_RECORD_TYPE_NAME)
                .map(str::to_string)
                .unwrap_or_else(|| defaults.title_record_type_name.clone()),
            max_record_length: l
                .usize(d::MAX_RECORD_LENGTH)?
                .unwrap_or(defaults.max_record_length),
            numeric,
            flush_per_record: defaults.flush_per_record,
            minimal_quoting: defaults.minimal_quoting,
        })
    }
}

/// Literal values of a condition, as the text predicates compare against.
pub(crate) fn condition_texts(values: &[Literal]) -> Vec<String> {
    values.iter().map(Literal::to_text).collect()
}
