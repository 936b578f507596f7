//! The record API shared by both engines, engine selection and record-type dispatch.

use crate::config::RuntimeDefaults;
use crate::directive::FileType;
use crate::error::{FormatError, InvalidDataFormat};
use crate::fixed::FixedFormatter;
use crate::record::FieldSet;
use crate::schema::{LinkedField, LinkedRecordType, LinkedSchema};
use crate::value::Value;
use crate::variable::VariableFormatter;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

pub type Input = Box<dyn Read + Send>;
pub type Output = Box<dyn Write + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Uninitialized,
    Ready,
    Closed,
}

/// Reads and writes records of one linked schema. One instance serves one stream
/// pair at a time; share the schema, not the formatter.
pub trait RecordFormatter: Send {
    fn schema(&self) -> &Arc<LinkedSchema>;

    fn state(&self) -> State;

    /// Move to the ready state. Repeated calls are no-ops; fails once closed.
    fn initialize(&mut self) -> Result<(), FormatError>;

    fn set_input(&mut self, input: Input);

    fn set_input_path(&mut self, path: &Path) -> Result<(), FormatError>;

    fn set_output(&mut self, output: Output);

    fn set_output_path(&mut self, path: &Path) -> Result<(), FormatError>;

    /// True when another record can be read.
    fn has_next(&mut self) -> Result<bool, FormatError>;

    /// Next record, or `None` at end of data.
    fn read_record(&mut self) -> Result<Option<FieldSet>, FormatError>;

    /// Encode with the record's own type name, or by dispatch when it has none.
    fn write_record(&mut self, record: &FieldSet) -> Result<(), FormatError>;

    fn write_record_as(&mut self, type_name: &str, record: &FieldSet) -> Result<(), FormatError>;

    /// Records read or written so far.
    fn record_number(&self) -> u32;

    /// Flush and release the streams. Idempotent; flush failures are logged.
    fn close(&mut self);
}

/// Pick the engine for the schema's file type.
pub fn open_formatter(
    schema: Arc<LinkedSchema>,
    defaults: &RuntimeDefaults,
) -> Result<Box<dyn RecordFormatter>, FormatError> {
    let settings = schema.settings(defaults)?;
    match schema.file_type {
        FileType::Fixed => Ok(Box::new(FixedFormatter::new(schema, settings)?)),
        FileType::Variable => Ok(Box::new(VariableFormatter::new(schema, settings)?)),
        other => Err(FormatError::Unsupported(format!(
            "{} layouts are handled by the structured-data bridge ({})",
            other,
            schema.source_name()
        ))),
    }
}

/// Lifecycle, output stream, paths and the record counter shared by the engines.
pub(crate) struct Channel {
    pub state: State,
    pub input_path: Option<String>,
    pub output: Option<BufWriter<Output>>,
    pub output_path: Option<String>,
    pub records: u32,
}

impl Channel {
    pub fn new() -> Self {
        Channel {
            state: State::Uninitialized,
            input_path: None,
            output: None,
            output_path: None,
            records: 0,
        }
    }

    pub fn initialize(&mut self) -> Result<(), FormatError> {
        match self.state {
            State::Closed => Err(FormatError::State("formatter is closed".into())),
            _ => {
                self.state = State::Ready;
                Ok(())
            }
        }
    }

    pub fn ensure_ready(&self) -> Result<(), FormatError> {
        match self.state {
            State::Ready => Ok(()),
            State::Uninitialized => Err(FormatError::State("formatter is not initialized".into())),
            State::Closed => Err(FormatError::State("formatter is closed".into())),
        }
    }

    pub fn open_input(path: &Path) -> Result<(Input, String), FormatError> {
        let display = path.display().to_string();
        let file = File::open(path).map_err(|e| FormatError::io(Some(&display), e))?;
        Ok((Box::new(file), display))
    }

    pub fn set_output(&mut self, output: Output, path: Option<String>) {
        self.output = Some(BufWriter::new(output));
        self.output_path = path;
    }

    pub fn set_output_path(&mut self, path: &Path) -> Result<(), FormatError> {
        let display = path.display().to_string();
        let file = File::create(path).map_err(|e| FormatError::io(Some(&display), e))?;
        self.set_output(Box::new(file), Some(display));
        Ok(())
    }

    pub fn input_io(&self, e: std::io::Error) -> FormatError {
        FormatError::io(self.input_path.as_deref(), e)
    }

    /// Attach the input path and current record number to data errors.
    pub fn read_error(&self, e: FormatError) -> FormatError {
        match e {
            FormatError::InvalidData(d) => {
                FormatError::InvalidData(d.in_record(self.input_path.as_deref(), self.records))
            }
            other => other,
        }
    }

    pub fn write_error(&self, e: InvalidDataFormat) -> FormatError {
        FormatError::InvalidData(e.in_record(self.output_path.as_deref(), self.records + 1))
    }

    /// Write one encoded record and count it.
    pub fn emit(&mut self, bytes: &[u8], flush: bool) -> Result<(), FormatError> {
        let path = self.output_path.clone();
        let out = self
            .output
            .as_mut()
            .ok_or_else(|| FormatError::State("no output stream".into()))?;
        out.write_all(bytes)
            .map_err(|e| FormatError::io(path.as_deref(), e))?;
        if flush {
            out.flush().map_err(|e| FormatError::io(path.as_deref(), e))?;
        }
        self.records += 1;
        Ok(())
    }

    pub fn close(&mut self) {
        if self.state == State::Closed {
            return;
        }
        if let Some(mut out) = self.output.take() {
            if let Err(e) = out.flush() {
                warn!(
                    "close: flushing {} failed: {}",
                    self.output_path.as_deref().unwrap_or("<stream>"),
                    e
                );
            }
        }
        self.state = State::Closed;
    }
}

/// Choose the record type for a raw record.
///
/// With a classifier, `decode` runs against the classifier first and the first type
/// whose predicates hold wins. Otherwise a single type is used directly and several
/// types are tried in order until one decodes and satisfies its own predicates.
/// A type named `exclude` is never a candidate.
pub(crate) fn select_for_read<'s, F>(
    schema: &'s LinkedSchema,
    exclude: Option<&str>,
    mut decode: F,
) -> Result<(&'s LinkedRecordType, FieldSet), FormatError>
where
    F: FnMut(&LinkedRecordType) -> Result<FieldSet, FormatError>,
{
    let candidates = candidates(schema, exclude);
    if let Some(classifier) = &schema.classifier {
        let key = decode(classifier)?;
        let rt = candidates
            .iter()
            .copied()
            .find(|rt| rt.matches(&key))
            .ok_or_else(|| {
                InvalidDataFormat::new(format!(
                    "no record type matches classifier fields {}",
                    describe_fields(&key)
                ))
            })?;
        debug!("dispatch: classifier {} -> [{}]", describe_fields(&key), rt.name);
        let record = decode(rt)?;
        return Ok((rt, record));
    }
    if let [only] = candidates.as_slice() {
        let only = *only;
        let record = decode(only)?;
        return Ok((only, record));
    }
    for &rt in &candidates {
        match decode(rt) {
            Ok(record) if rt.matches(&record) => {
                debug!("dispatch: [{}] decoded and matched", rt.name);
                return Ok((rt, record));
            }
            Ok(_) => {}
            Err(FormatError::InvalidData(e)) => debug!("dispatch: [{}] rejected: {}", rt.name, e.message),
            Err(other) => return Err(other),
        }
    }
    Err(InvalidDataFormat::new(format!(
        "no record type matches; tried {}",
        describe_types(&candidates)
    ))
    .into())
}

/// Choose the record type to encode `record` with.
///
/// An explicit or carried type name is used as given; otherwise the type named
/// `exclude` is skipped.
pub(crate) fn select_for_write<'s>(
    schema: &'s LinkedSchema,
    explicit: Option<&str>,
    exclude: Option<&str>,
    record: &FieldSet,
) -> Result<&'s LinkedRecordType, InvalidDataFormat> {
    if let Some(name) = explicit.or(record.record_type()) {
        let rt = schema
            .record_type(name)
            .ok_or_else(|| InvalidDataFormat::new(format!("unknown record type '{}'", name)))?;
        if !rt.matches(record) {
            return Err(InvalidDataFormat::new(format!(
                "record does not satisfy {}",
                rt.describe_conditions()
            )));
        }
        return Ok(rt);
    }
    let candidates = candidates(schema, exclude);
    if let [only] = candidates.as_slice() {
        return Ok(*only);
    }
    candidates
        .iter()
        .copied()
        .find(|rt| rt.matches(record))
        .ok_or_else(|| {
            InvalidDataFormat::new(format!(
                "no record type matches the record; required one of {}",
                describe_types(&candidates)
            ))
        })
}

fn candidates<'s>(schema: &'s LinkedSchema, exclude: Option<&str>) -> Vec<&'s LinkedRecordType> {
    schema
        .record_types
        .iter()
        .filter(|rt| exclude.map_or(true, |name| !rt.name.eq_ignore_ascii_case(name)))
        .collect()
}

fn describe_types(types: &[&LinkedRecordType]) -> String {
    let parts: Vec<String> = types.iter().map(|rt| rt.describe_conditions()).collect();
    parts.join("; ")
}

pub(crate) fn describe_fields(record: &FieldSet) -> String {
    let parts: Vec<String> = record
        .iter()
        .map(|(name, value)| format!("{}={:?}", name, value.to_text()))
        .collect();
    format!("{{{}}}", parts.join(", "))
}

/// Elements of an array field as given by the caller; a scalar counts as one element.
pub(crate) fn array_items(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.into_iter().map(Value::Text).collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

pub(crate) fn check_occurs(field: &LinkedField, count: usize) -> Result<(), InvalidDataFormat> {
    let min = field.occurs.min as usize;
    if count < min {
        return Err(InvalidDataFormat::new(format!(
            "array has {} element(s), at least {} required",
            count, min
        )));
    }
    match field.occurs.max {
        Some(max) if count > max as usize => Err(InvalidDataFormat::new(format!(
            "array has {} element(s), at most {} allowed",
            count, max
        ))),
        _ => Ok(()),
    }
}

/// Converted value of a scalar field about to be encoded.
pub(crate) fn prepare_scalar(field: &LinkedField, value: Value) -> Result<Value, InvalidDataFormat> {
    let value = field.apply_write(value)?;
    if field.required && value.is_empty() {
        return Err(InvalidDataFormat::new("required field has no value"));
    }
    Ok(value)
}
