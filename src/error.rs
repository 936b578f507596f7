//! Error types shared by the compiler and the record engines.

/// Malformed layout source: raised by the tokenizer, parser and linker.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}: {message}{}", layout_position(source_id, line, column), token_suffix(token))]
pub struct SyntaxError {
    pub source_id: Option<String>,
    pub line: Option<usize>,
    pub column: Option<usize>,
    /// Offending token text, when one is known.
    pub token: Option<String>,
    pub message: String,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>) -> Self {
        SyntaxError {
            source_id: None,
            line: None,
            column: None,
            token: None,
            message: message.into(),
        }
    }

    pub fn at(message: impl Into<String>, line: usize, column: usize) -> Self {
        SyntaxError {
            line: Some(line),
            column: Some(column),
            ..SyntaxError::new(message)
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Attach the layout source id unless one is already set.
    pub fn with_source(mut self, source_id: Option<&str>) -> Self {
        if self.source_id.is_none() {
            self.source_id = source_id.map(str::to_string);
        }
        self
    }
}

fn layout_position(source_id: &Option<String>, line: &Option<usize>, column: &Option<usize>) -> String {
    let mut out = source_id.as_deref().unwrap_or("<layout>").to_string();
    if let Some(line) = line {
        out.push_str(&format!(":{}", line));
        if let Some(col) = column {
            out.push_str(&format!(":{}", col));
        }
    }
    out
}

fn token_suffix(token: &Option<String>) -> String {
    match token {
        Some(tok) => format!(" (at '{}')", tok.escape_debug()),
        None => String::new(),
    }
}

/// A decoded or encoded record violates its schema.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}: {message}", record_position(path, record, field))]
pub struct InvalidDataFormat {
    pub path: Option<String>,
    pub record: Option<u32>,
    pub field: Option<String>,
    pub message: String,
}

impl InvalidDataFormat {
    pub fn new(message: impl Into<String>) -> Self {
        InvalidDataFormat {
            path: None,
            record: None,
            field: None,
            message: message.into(),
        }
    }

    pub fn in_field(mut self, field: &str) -> Self {
        if self.field.is_none() {
            self.field = Some(field.to_string());
        }
        self
    }

    pub fn in_record(mut self, path: Option<&str>, record: u32) -> Self {
        if self.path.is_none() {
            self.path = path.map(str::to_string);
        }
        if self.record.is_none() {
            self.record = Some(record);
        }
        self
    }
}

fn record_position(path: &Option<String>, record: &Option<u32>, field: &Option<String>) -> String {
    let mut out = path.as_deref().unwrap_or("<stream>").to_string();
    if let Some(n) = record {
        out.push_str(&format!(", record {}", n));
    }
    if let Some(field) = field {
        out.push_str(&format!(", field '{}'", field));
    }
    out
}

/// Top-level error for compiling layouts and reading/writing records.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("Syntax: {0}")]
    Syntax(#[from] SyntaxError),
    #[error("Invalid data: {0}")]
    InvalidData(#[from] InvalidDataFormat),
    #[error("IO on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Formatter state: {0}")]
    State(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("Config: {0}")]
    Config(String),
}

impl FormatError {
    pub fn io(path: Option<&str>, source: std::io::Error) -> Self {
        FormatError::Io {
            path: path.unwrap_or("<stream>").to_string(),
            source,
        }
    }
}

/// Field-level conversion failure; engines wrap it with record and field context.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConvertError {
    #[error("invalid {kind} bits 0x{nibble:X}")]
    InvalidSign { kind: &'static str, nibble: u8 },
    #[error("invalid digit nibble 0x{0:X}")]
    InvalidDigit(u8),
    #[error("value {value} does not fit in {capacity} digit(s)")]
    Overflow { value: String, capacity: usize },
    #[error("value has {0} significant digits (max 18)")]
    TooManyDigits(usize),
    #[error("not a number: '{0}'")]
    NotANumber(String),
    #[error("text of {len} byte(s) exceeds field width {width}")]
    TooLong { len: usize, width: usize },
    #[error("expected {expected} byte(s), got {actual}")]
    WrongWidth { expected: usize, actual: usize },
    #[error("{0}")]
    Invalid(String),
}

impl From<ConvertError> for InvalidDataFormat {
    fn from(e: ConvertError) -> Self {
        InvalidDataFormat::new(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_error_display_has_location() {
        let e = SyntaxError::at("expected Identifier", 3, 7)
            .with_token("=")
            .with_source(Some("orders.fmt"));
        assert_eq!(e.to_string(), "orders.fmt:3:7: expected Identifier (at '=')");
    }

    #[test]
    fn invalid_data_keeps_first_context() {
        let e = InvalidDataFormat::new("bad")
            .in_field("amount")
            .in_field("other")
            .in_record(Some("in.dat"), 4);
        assert_eq!(e.to_string(), "in.dat, record 4, field 'amount': bad");
    }

    #[test]
    fn positions_fall_back_when_unknown() {
        assert_eq!(SyntaxError::new("empty layout").to_string(), "<layout>: empty layout");
        assert_eq!(InvalidDataFormat::new("bad").to_string(), "<stream>: bad");
        let wrapped = FormatError::from(InvalidDataFormat::new("bad").in_record(None, 2));
        assert_eq!(wrapped.to_string(), "Invalid data: <stream>, record 2: bad");
    }
}
