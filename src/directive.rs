//! Directive catalogs, one per file-type family.

use crate::ast::{Directive, LiteralKind};
use crate::error::SyntaxError;
use std::fmt;

pub const FILE_TYPE: &str = "file-type";
pub const TEXT_ENCODING: &str = "text-encoding";
pub const RECORD_SEPARATOR: &str = "record-separator";
pub const RECORD_LENGTH: &str = "record-length";
pub const FIELD_SEPARATOR: &str = "field-separator";
pub const QUOTING_DELIMITER: &str = "quoting-delimiter";
pub const IGNORE_BLANK_LINES: &str = "ignore-blank-lines";
pub const REQUIRES_TITLE: &str = "requires-title";
pub const MAX_RECORD_LENGTH: &str = "max-record-length";
pub const TITLE_RECORD_TYPE_NAME: &str = "title-record-type-name";
pub const POSITIVE_ZONE_SIGN_NIBBLE: &str = "positive-zone-sign-nibble";
pub const NEGATIVE_ZONE_SIGN_NIBBLE: &str = "negative-zone-sign-nibble";
pub const POSITIVE_PACK_SIGN_NIBBLE: &str = "positive-pack-sign-nibble";
pub const NEGATIVE_PACK_SIGN_NIBBLE: &str = "negative-pack-sign-nibble";
pub const REQUIRED_DECIMAL_POINT: &str = "required-decimal-point";
pub const FIXED_SIGN_POSITION: &str = "fixed-sign-position";
pub const REQUIRED_PLUS_SIGN: &str = "required-plus-sign";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Fixed,
    Variable,
    Json,
    Xml,
}

impl FileType {
    pub fn from_name(name: &str) -> Option<FileType> {
        match name.to_ascii_lowercase().as_str() {
            "fixed" => Some(FileType::Fixed),
            "variable" => Some(FileType::Variable),
            "json" => Some(FileType::Json),
            "xml" => Some(FileType::Xml),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FileType::Fixed => "Fixed",
            FileType::Variable => "Variable",
            FileType::Json => "JSON",
            FileType::Xml => "XML",
        }
    }

    /// Directives accepted by this family.
    pub fn catalog(self) -> &'static [DirectiveDef] {
        match self {
            FileType::Fixed => FIXED,
            FileType::Variable => VARIABLE,
            FileType::Json | FileType::Xml => STRUCTURED,
        }
    }

    pub fn lookup(self, name: &str) -> Option<&'static DirectiveDef> {
        self.catalog()
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    /// Check name and value type of a parsed directive.
    pub fn validate(self, directive: &Directive) -> Result<(), SyntaxError> {
        let def = self.lookup(&directive.name).ok_or_else(|| {
            SyntaxError::at(
                format!(
                    "unknown directive '{}' for file type {}",
                    directive.name,
                    self.name()
                ),
                directive.line,
                directive.column,
            )
        })?;
        let kind = directive.value.kind();
        if !def.kinds.contains(&kind) {
            let wanted: Vec<String> = def.kinds.iter().map(|k| k.to_string()).collect();
            return Err(SyntaxError::at(
                format!(
                    "directive '{}' expects a {} value, found {} {}",
                    def.name,
                    wanted.join(" or "),
                    kind,
                    directive.value
                ),
                directive.line,
                directive.column,
            ));
        }
        Ok(())
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DirectiveDef {
    pub name: &'static str,
    pub kinds: &'static [LiteralKind],
}

const STRING: &[LiteralKind] = &[LiteralKind::String];
const NUMBER: &[LiteralKind] = &[LiteralKind::Number];
const BOOL: &[LiteralKind] = &[LiteralKind::Bool];
const NIBBLE: &[LiteralKind] = &[LiteralKind::Number, LiteralKind::Hex];

const fn def(name: &'static str, kinds: &'static [LiteralKind]) -> DirectiveDef {
    DirectiveDef { name, kinds }
}

static FIXED: &[DirectiveDef] = &[
    def(FILE_TYPE, STRING),
    def(TEXT_ENCODING, STRING),
    def(RECORD_SEPARATOR, STRING),
    def(RECORD_LENGTH, NUMBER),
    def(POSITIVE_ZONE_SIGN_NIBBLE, NIBBLE),
    def(NEGATIVE_ZONE_SIGN_NIBBLE, NIBBLE),
    def(POSITIVE_PACK_SIGN_NIBBLE, NIBBLE),
    def(NEGATIVE_PACK_SIGN_NIBBLE, NIBBLE),
    def(REQUIRED_DECIMAL_POINT, BOOL),
    def(FIXED_SIGN_POSITION, BOOL),
    def(REQUIRED_PLUS_SIGN, BOOL),
];

static VARIABLE: &[DirectiveDef] = &[
    def(FILE_TYPE, STRING),
    def(TEXT_ENCODING, STRING),
    def(RECORD_SEPARATOR, STRING),
    def(FIELD_SEPARATOR, STRING),
    def(QUOTING_DELIMITER, STRING),
    def(IGNORE_BLANK_LINES, BOOL),
    def(REQUIRES_TITLE, BOOL),
    def(MAX_RECORD_LENGTH, NUMBER),
    def(TITLE_RECORD_TYPE_NAME, STRING),
];

static STRUCTURED: &[DirectiveDef] = &[def(FILE_TYPE, STRING), def(TEXT_ENCODING, STRING)];
