//! # recfmt: record layouts for fixed-length and delimited files
//!
//! A small layout language describes the records of a file; the compiler turns a
//! layout into an immutable [`LinkedSchema`], and the record engines read and write
//! [`FieldSet`]s against it.
//!
//! ## Layout language
//!
//! - **Directives**: `name: value` lines (`file-type`, `text-encoding`, `record-length`,
//!   `field-separator`, sign nibbles, ...)
//! - **Record types**: `[Name]` or `[Name] < [Base]`, an optional list of
//!   `field = "v1", "v2"` conditions, then one field per line
//! - **Fields**: `position [?|@] name[min..max] DataType(args) Converter(args) ...`;
//!   `?` marks a filler, `@` an attribute, a bare literal after the DataType is a default
//! - **Classifier**: a record type named `Classifier` whose fields select the record type
//!
//! ## Example layout
//!
//! ```text
//! file-type: Fixed
//! text-encoding: "Cp037"
//! record-length: 20
//!
//! [Header]
//! kind = "H"
//! 1 kind X(1)
//! 2 created N(8)
//! 10 ? filler X(11)
//!
//! [Detail]
//! kind = "D"
//! 1 kind X(1)
//! 2 sku X(9) Trim Upper
//! 11 qty SZ(5)
//! 16 price SP(3, 2) "0"
//! 19 flag X(2)
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use recfmt::{compile, open_formatter, RuntimeDefaults};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), recfmt::FormatError> {
//! let schema = Arc::new(compile(&std::fs::read_to_string("orders.fmt").unwrap())?);
//! let mut reader = open_formatter(schema, &RuntimeDefaults::default())?;
//! reader.set_input_path("orders.dat".as_ref())?;
//! reader.initialize()?;
//! while let Some(record) = reader.read_record()? {
//!     println!("{:?} {:?}", record.record_type(), record.get_text("sku"));
//! }
//! reader.close();
//! # Ok(())
//! # }
//! ```

pub mod ast;
pub mod cache;
pub mod charset;
pub mod config;
pub mod convert;
pub mod directive;
pub mod dump;
pub mod error;
pub mod fixed;
pub mod formatter;
pub mod linker;
pub mod parser;
pub mod predicate;
pub mod record;
pub mod schema;
pub mod token;
pub mod tokenizer;
pub mod value;
pub mod variable;

pub use ast::ParsedSchema;
pub use cache::SchemaCache;
pub use charset::Charset;
pub use config::RuntimeDefaults;
pub use convert::{ConverterRegistry, DataType, Family, ValueConverter};
pub use directive::FileType;
pub use error::{ConvertError, FormatError, InvalidDataFormat, SyntaxError};
pub use fixed::FixedFormatter;
pub use formatter::{open_formatter, RecordFormatter, State};
pub use linker::Linker;
pub use parser::{parse, parse_file, parse_named};
pub use record::FieldSet;
pub use schema::{FormatSettings, LinkedField, LinkedRecordType, LinkedSchema};
pub use value::Value;
pub use variable::VariableFormatter;

/// Parse and link a layout with the built-in registries and default runtime settings.
pub fn compile(source: &str) -> Result<LinkedSchema, FormatError> {
    compile_with(source, None, &Linker::default())
}

/// Parse and link a layout named `source_id` (used in error messages) with `linker`.
pub fn compile_with(
    source: &str,
    source_id: Option<&str>,
    linker: &Linker,
) -> Result<LinkedSchema, FormatError> {
    let parsed = parse_named(source, source_id)?;
    Ok(linker.link(&parsed)?)
}

/// Parse and link a layout file.
pub fn compile_file(path: impl AsRef<std::path::Path>, linker: &Linker) -> Result<LinkedSchema, FormatError> {
    let parsed = parse_file(path)?;
    Ok(linker.link(&parsed)?)
}
