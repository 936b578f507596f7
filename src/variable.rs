//! Variable-length delimited text engine.
//!
//! Records end with `record-separator`, columns are split on `field-separator`, and a
//! column wrapped in the quoting delimiter may contain either separator (a doubled
//! delimiter stands for one). An optional title record opens the file.

use crate::charset::Charset;
use crate::directive::FileType;
use crate::error::{FormatError, InvalidDataFormat};
use crate::formatter::{
    array_items, check_occurs, prepare_scalar, select_for_read, select_for_write, Channel, Input,
    Output, RecordFormatter, State,
};
use crate::record::FieldSet;
use crate::schema::{FormatSettings, LinkedField, LinkedRecordType, LinkedSchema};
use crate::value::Value;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

/// Character reader over a byte stream with unbounded push-back and a rewind mark.
pub(crate) struct CharStream {
    reader: BufReader<Input>,
    charset: Charset,
    pushback: Vec<char>,
    journal: Option<Vec<char>>,
}

impl CharStream {
    pub fn new(input: Input, charset: Charset) -> Self {
        CharStream {
            reader: BufReader::new(input),
            charset,
            pushback: Vec::new(),
            journal: None,
        }
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let buf = self.reader.fill_buf()?;
        let Some(&b) = buf.first() else {
            return Ok(None);
        };
        self.reader.consume(1);
        Ok(Some(b))
    }

    fn decode_next(&mut self) -> io::Result<Option<char>> {
        let Some(lead) = self.read_byte()? else {
            return Ok(None);
        };
        if self.charset.is_single_byte() || lead < 0x80 {
            return Ok(Some(self.charset.decode_byte(lead)));
        }
        let len = match lead {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => return Ok(Some(char::REPLACEMENT_CHARACTER)),
        };
        let mut bytes = vec![lead];
        while bytes.len() < len {
            match self.read_byte()? {
                Some(b) => bytes.push(b),
                None => break,
            }
        }
        Ok(Some(
            std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.chars().next())
                .unwrap_or(char::REPLACEMENT_CHARACTER),
        ))
    }

    pub fn next(&mut self) -> io::Result<Option<char>> {
        let c = match self.pushback.pop() {
            Some(c) => Some(c),
            None => self.decode_next()?,
        };
        if let (Some(c), Some(journal)) = (c, self.journal.as_mut()) {
            journal.push(c);
        }
        Ok(c)
    }

    pub fn unread(&mut self, c: char) {
        if let Some(journal) = self.journal.as_mut() {
            journal.pop();
        }
        self.pushback.push(c);
    }

    /// Start recording consumed characters so [`CharStream::reset`] can give them back.
    pub fn mark(&mut self) {
        self.journal = Some(Vec::new());
    }

    pub fn reset(&mut self) {
        if let Some(journal) = self.journal.take() {
            self.pushback.extend(journal.into_iter().rev());
        }
    }

    /// Consume `s` if the stream continues with it; otherwise leave the stream untouched.
    pub fn try_match(&mut self, s: &str) -> io::Result<bool> {
        let mut seen = Vec::new();
        for expected in s.chars() {
            match self.next()? {
                Some(c) if c == expected => seen.push(c),
                other => {
                    if let Some(c) = other {
                        self.unread(c);
                    }
                    while let Some(c) = seen.pop() {
                        self.unread(c);
                    }
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    pub fn at_eof(&mut self) -> io::Result<bool> {
        match self.next()? {
            Some(c) => {
                self.unread(c);
                Ok(false)
            }
            None => Ok(true),
        }
    }

    /// Discard everything up to and including the next `separator`.
    pub fn skip_past(&mut self, separator: &str) -> io::Result<()> {
        loop {
            if self.try_match(separator)? {
                return Ok(());
            }
            if self.next()?.is_none() {
                return Ok(());
            }
        }
    }
}

/// Separators and limits the scanner needs, borrowed from the settings.
struct Delimiters<'a> {
    field: &'a str,
    record: &'a str,
    quote: Option<char>,
    max: usize,
}

impl Delimiters<'_> {
    fn oversize(&self, input: &mut CharStream) -> Result<FormatError, FormatError> {
        input.skip_past(self.record).map_err(|e| FormatError::io(None, e))?;
        Ok(InvalidDataFormat::new(format!(
            "record exceeds max-record-length of {} character(s)",
            self.max
        ))
        .into())
    }
}

/// Split the next record into columns. The stream must not be at end of data.
///
/// On a malformed record the rest of it is skipped so the next call starts on a
/// record boundary.
fn scan_record(input: &mut CharStream, delims: &Delimiters<'_>) -> Result<Vec<String>, FormatError> {
    let io_err = |e| FormatError::io(None, e);
    let field_len = delims.field.chars().count();
    let mut columns = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;
    let mut field_start = true;
    loop {
        if std::mem::take(&mut field_start) {
            if let Some(q) = delims.quote {
                match input.next().map_err(io_err)? {
                    Some(c) if c == q => {
                        scan_quoted(input, delims, q, &mut current, &mut count)?;
                        if input.try_match(delims.field).map_err(io_err)? {
                            count += field_len;
                            if count > delims.max {
                                return Err(delims.oversize(input)?);
                            }
                            columns.push(std::mem::take(&mut current));
                            field_start = true;
                            continue;
                        }
                        if input.try_match(delims.record).map_err(io_err)? || input.at_eof().map_err(io_err)? {
                            columns.push(current);
                            return Ok(columns);
                        }
                        input.skip_past(delims.record).map_err(io_err)?;
                        return Err(InvalidDataFormat::new(format!(
                            "quoted field {} is followed by a wrong separator",
                            columns.len() + 1
                        ))
                        .into());
                    }
                    Some(c) => input.unread(c),
                    None => {
                        columns.push(current);
                        return Ok(columns);
                    }
                }
            }
        }
        if input.try_match(delims.record).map_err(io_err)? {
            columns.push(current);
            return Ok(columns);
        }
        if input.try_match(delims.field).map_err(io_err)? {
            count += field_len;
            if count > delims.max {
                return Err(delims.oversize(input)?);
            }
            columns.push(std::mem::take(&mut current));
            field_start = true;
            continue;
        }
        match input.next().map_err(io_err)? {
            None => {
                columns.push(current);
                return Ok(columns);
            }
            Some(c) => {
                count += 1;
                if count > delims.max {
                    return Err(delims.oversize(input)?);
                }
                current.push(c);
            }
        }
    }
}

/// Body of a quoted column, up to and including the closing delimiter.
fn scan_quoted(
    input: &mut CharStream,
    delims: &Delimiters<'_>,
    q: char,
    current: &mut String,
    count: &mut usize,
) -> Result<(), FormatError> {
    let io_err = |e| FormatError::io(None, e);
    *count += 1;
    loop {
        match input.next().map_err(io_err)? {
            None => return Err(InvalidDataFormat::new("unterminated quoted field").into()),
            Some(c) if c == q => match input.next().map_err(io_err)? {
                Some(d) if d == q => {
                    *count += 2;
                    current.push(q);
                }
                Some(d) => {
                    input.unread(d);
                    *count += 1;
                    return Ok(());
                }
                None => {
                    *count += 1;
                    return Ok(());
                }
            },
            Some(c) => {
                *count += 1;
                current.push(c);
            }
        }
        if *count > delims.max {
            return Err(delims.oversize(input)?);
        }
    }
}

/// The record type named by `title-record-type-name`.
fn title_type<'s>(
    schema: &'s LinkedSchema,
    settings: &FormatSettings,
) -> Result<&'s LinkedRecordType, FormatError> {
    schema.record_type(&settings.title_type).ok_or_else(|| {
        FormatError::Config(format!(
            "{}: no record type named '{}' for the title record",
            schema.source_name(),
            settings.title_type
        ))
    })
}

/// Reject a record after the first one that is, or looks like, the title.
fn check_not_title(
    title: &LinkedRecordType,
    rt: &LinkedRecordType,
    record: &FieldSet,
) -> Result<(), InvalidDataFormat> {
    let is_title = rt.name.eq_ignore_ascii_case(&title.name)
        || (!title.predicates.is_empty() && title.matches(record));
    if is_title {
        return Err(InvalidDataFormat::new(format!(
            "only the first record may be a '{}' record",
            title.name
        )));
    }
    Ok(())
}

pub struct VariableFormatter {
    schema: Arc<LinkedSchema>,
    settings: FormatSettings,
    field_separator: String,
    record_separator: String,
    channel: Channel,
    input: Option<CharStream>,
    title_read: bool,
    title_written: bool,
}

impl VariableFormatter {
    pub fn new(schema: Arc<LinkedSchema>, settings: FormatSettings) -> Result<Self, FormatError> {
        if schema.file_type != FileType::Variable {
            return Err(FormatError::Unsupported(format!(
                "{} is a {} layout, not Variable",
                schema.source_name(),
                schema.file_type
            )));
        }
        let missing =
            |name: &str| FormatError::Config(format!("{}: {} is not set", schema.source_name(), name));
        let field_separator = settings
            .field_separator
            .clone()
            .ok_or_else(|| missing("field-separator"))?;
        let record_separator = settings
            .record_separator
            .clone()
            .ok_or_else(|| missing("record-separator"))?;
        Ok(VariableFormatter {
            schema,
            settings,
            field_separator,
            record_separator,
            channel: Channel::new(),
            input: None,
            title_read: false,
            title_written: false,
        })
    }

    pub fn settings(&self) -> &FormatSettings {
        &self.settings
    }

    /// Skip blank lines. Returns how many were skipped, or `None` at end of data.
    fn skip_blank_lines(&mut self) -> Result<Option<u32>, FormatError> {
        let input = self
            .input
            .as_mut()
            .ok_or_else(|| FormatError::State("no input stream".into()))?;
        let io_err = |e| FormatError::io(self.channel.input_path.as_deref(), e);
        let mut blanks = 0;
        if self.settings.ignore_blank_lines {
            while input.try_match(&self.record_separator).map_err(io_err)? {
                blanks += 1;
            }
        }
        // trailing blank lines are not records
        if input.at_eof().map_err(io_err)? {
            return Ok(None);
        }
        Ok(Some(blanks))
    }

    fn write_with(&mut self, explicit: Option<&str>, record: &FieldSet) -> Result<(), FormatError> {
        self.channel.ensure_ready()?;
        let settings = &self.settings;
        let rt = if settings.requires_title {
            let title = title_type(&self.schema, settings)?;
            if self.title_written {
                select_for_write(&self.schema, explicit, Some(&title.name), record)
                    .and_then(|rt| check_not_title(title, rt, record).map(|()| rt))
                    .map_err(|e| self.channel.write_error(e))?
            } else {
                match explicit.or(record.record_type()) {
                    Some(name) if !name.eq_ignore_ascii_case(&title.name) => {
                        return Err(self.channel.write_error(InvalidDataFormat::new(format!(
                            "the first record must be a '{}' record, not '{}'",
                            title.name, name
                        ))));
                    }
                    _ => title,
                }
            }
        } else {
            select_for_write(&self.schema, explicit, None, record).map_err(|e| self.channel.write_error(e))?
        };
        let line = encode_record(rt, record, settings)
            .and_then(|columns| self.join_columns(&columns))
            .map_err(|e| self.channel.write_error(e))?;
        trace!("write [{}]: {:?}", rt.name, line);
        let bytes = settings.charset.encode(&line);
        let flush = settings.flush_per_record;
        self.channel.emit(&bytes, flush)?;
        self.title_written = true;
        Ok(())
    }

    /// One encoded line: quoted, joined, terminated.
    fn join_columns(&self, columns: &[String]) -> Result<String, InvalidDataFormat> {
        let mut line = String::new();
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                line.push_str(&self.field_separator);
            }
            let needs_quote = column.contains(self.field_separator.as_str())
                || self.record_separator.chars().any(|c| column.contains(c));
            match self.settings.quote {
                Some(q) if !self.settings.minimal_quoting || needs_quote || column.contains(q) => {
                    line.push(q);
                    for c in column.chars() {
                        if c == q {
                            line.push(q);
                        }
                        line.push(c);
                    }
                    line.push(q);
                }
                None if needs_quote => {
                    return Err(InvalidDataFormat::new(format!(
                        "column {} contains a separator and no quoting-delimiter is set",
                        i + 1
                    )))
                }
                _ => line.push_str(column),
            }
        }
        line.push_str(&self.record_separator);
        Ok(line)
    }
}

/// Column counts a record type accepts: exact, or a range when it ends in an array.
fn column_bounds(rt: &LinkedRecordType) -> (usize, Option<usize>) {
    match rt.fields.last() {
        Some(last) if last.is_array() => {
            let head = rt.length - last.size();
            let min = head + last.occurs.min as usize * last.width();
            let max = last.occurs.max.map(|m| head + m as usize * last.width());
            (min, max)
        }
        _ => (rt.length, Some(rt.length)),
    }
}

/// Decode the columns of one record with the given type.
///
/// `lenient` is used for the classifier: the column count is not checked and missing
/// columns decode as null.
pub fn decode_record(
    rt: &LinkedRecordType,
    columns: &[String],
    settings: &FormatSettings,
    lenient: bool,
) -> Result<FieldSet, InvalidDataFormat> {
    if !lenient {
        let (min, max) = column_bounds(rt);
        let fits = columns.len() >= min && max.map_or(true, |m| columns.len() <= m);
        if !fits {
            let expected = match max {
                Some(m) if m == min => format!("{}", m),
                Some(m) => format!("{} to {}", min, m),
                None => format!("at least {}", min),
            };
            return Err(InvalidDataFormat::new(format!(
                "[{}] expects {} field(s), found {}",
                rt.name,
                expected,
                columns.len()
            )));
        }
    }
    let mut record = FieldSet::with_type(rt.name.as_str());
    let last = rt.fields.len().saturating_sub(1);
    for (i, field) in rt.fields.iter().enumerate() {
        let slots = if i == last && field.is_array() {
            columns.len().saturating_sub(field.offset)
        } else {
            field.size()
        };
        let value = decode_field(field, columns, slots, settings).map_err(|e| e.in_field(&field.name))?;
        if !field.filler {
            record.insert(field.name.as_str(), value);
        }
    }
    Ok(record)
}

fn decode_field(
    field: &LinkedField,
    columns: &[String],
    slots: usize,
    settings: &FormatSettings,
) -> Result<Value, InvalidDataFormat> {
    let ctx = field.context(settings);
    let decode_one = |text: Option<&String>| -> Result<Value, InvalidDataFormat> {
        let value = match text {
            Some(t) => field.data_type.decode_text(t, &ctx)?,
            None => Value::Null,
        };
        Ok(field.apply_read(value)?)
    };
    if !field.is_array() {
        return decode_one(columns.get(field.offset));
    }
    let mut items = Vec::with_capacity(slots);
    for k in 0..slots {
        items.push(decode_one(columns.get(field.offset + k))?.to_text());
    }
    Ok(Value::Array(items))
}

/// Encode a field-set with the given type into its columns.
pub fn encode_record(
    rt: &LinkedRecordType,
    record: &FieldSet,
    settings: &FormatSettings,
) -> Result<Vec<String>, InvalidDataFormat> {
    let mut columns = Vec::with_capacity(rt.length);
    let last = rt.fields.len().saturating_sub(1);
    for (i, field) in rt.fields.iter().enumerate() {
        let value = if field.filler {
            Value::Null
        } else {
            record.get(&field.name).cloned().unwrap_or_default()
        };
        encode_field(field, value, i == last, settings, &mut columns)
            .map_err(|e| e.in_field(&field.name))?;
    }
    Ok(columns)
}

fn encode_field(
    field: &LinkedField,
    value: Value,
    trailing: bool,
    settings: &FormatSettings,
    columns: &mut Vec<String>,
) -> Result<(), InvalidDataFormat> {
    let ctx = field.context(settings);
    if !field.is_array() {
        let value = prepare_scalar(field, value)?;
        columns.push(field.data_type.encode_text(&value, &ctx)?);
        return Ok(());
    }
    let items = array_items(value);
    check_occurs(field, items.len())?;
    // inner arrays always occupy every slot; a trailing one only what it holds
    let slots = if trailing { items.len() } else { field.slots() };
    for k in 0..slots {
        let item = field.apply_write(items.get(k).cloned().unwrap_or_default())?;
        columns.push(field.data_type.encode_text(&item, &ctx)?);
    }
    Ok(())
}

impl RecordFormatter for VariableFormatter {
    fn schema(&self) -> &Arc<LinkedSchema> {
        &self.schema
    }

    fn state(&self) -> State {
        self.channel.state
    }

    fn initialize(&mut self) -> Result<(), FormatError> {
        self.channel.initialize()?;
        debug!(
            "variable formatter ready: {} (field separator {:?}, record separator {:?}, title {})",
            self.schema.source_name(),
            self.field_separator,
            self.record_separator,
            self.settings.requires_title
        );
        Ok(())
    }

    fn set_input(&mut self, input: Input) {
        self.input = Some(CharStream::new(input, self.settings.charset));
        self.channel.input_path = None;
        self.title_read = false;
    }

    fn set_input_path(&mut self, path: &Path) -> Result<(), FormatError> {
        let (input, display) = Channel::open_input(path)?;
        self.input = Some(CharStream::new(input, self.settings.charset));
        self.channel.input_path = Some(display);
        self.title_read = false;
        Ok(())
    }

    fn set_output(&mut self, output: Output) {
        self.channel.set_output(output, None);
        self.title_written = false;
    }

    fn set_output_path(&mut self, path: &Path) -> Result<(), FormatError> {
        self.channel.set_output_path(path)?;
        self.title_written = false;
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool, FormatError> {
        self.channel.ensure_ready()?;
        let ignore_blank = self.settings.ignore_blank_lines;
        let input = self
            .input
            .as_mut()
            .ok_or_else(|| FormatError::State("no input stream".into()))?;
        let io_err = |e| FormatError::io(self.channel.input_path.as_deref(), e);
        input.mark();
        if ignore_blank {
            while input.try_match(&self.record_separator).map_err(io_err)? {}
        }
        let more = !input.at_eof().map_err(io_err)?;
        input.reset();
        Ok(more)
    }

    fn read_record(&mut self) -> Result<Option<FieldSet>, FormatError> {
        self.channel.ensure_ready()?;
        let Some(blanks) = self.skip_blank_lines()? else {
            return Ok(None);
        };
        self.channel.records += blanks + 1;
        let first = !std::mem::replace(&mut self.title_read, true);
        let delims = Delimiters {
            field: &self.field_separator,
            record: &self.record_separator,
            quote: self.settings.quote,
            max: self.settings.max_record_length,
        };
        let Some(input) = self.input.as_mut() else {
            return Err(FormatError::State("no input stream".into()));
        };
        let columns = scan_record(input, &delims).map_err(|e| match e {
            FormatError::Io { source, .. } => self.channel.input_io(source),
            other => self.channel.read_error(other),
        })?;
        let settings = &self.settings;
        let schema: &LinkedSchema = &self.schema;
        let (rt, mut record) = if settings.requires_title && first {
            let title = title_type(schema, settings)?;
            let record = decode_record(title, &columns, settings, false)
                .map_err(|e| self.channel.read_error(e.into()))?;
            (title, record)
        } else {
            let classifier = schema.classifier.as_ref();
            let title = if settings.requires_title {
                Some(title_type(schema, settings)?)
            } else {
                None
            };
            let (rt, record) = select_for_read(schema, title.map(|t| t.name.as_str()), |rt| {
                let lenient = classifier.map_or(false, |c| std::ptr::eq(c, rt));
                decode_record(rt, &columns, settings, lenient).map_err(FormatError::from)
            })
            .map_err(|e| self.channel.read_error(e))?;
            if let Some(title) = title {
                check_not_title(title, rt, &record)
                    .map_err(|e| self.channel.read_error(e.into()))?;
            }
            (rt, record)
        };
        record.set_sequence(self.channel.records);
        trace!("read record {} as [{}]", self.channel.records, rt.name);
        Ok(Some(record))
    }

    fn write_record(&mut self, record: &FieldSet) -> Result<(), FormatError> {
        self.write_with(None, record)
    }

    fn write_record_as(&mut self, type_name: &str, record: &FieldSet) -> Result<(), FormatError> {
        self.write_with(Some(type_name), record)
    }

    fn record_number(&self) -> u32 {
        self.channel.records
    }

    fn close(&mut self) {
        self.input = None;
        self.channel.close();
    }
}
