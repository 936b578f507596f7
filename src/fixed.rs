//! Fixed-length binary record engine.
//!
//! Every record is exactly `record-length` bytes, optionally followed by the encoded
//! `record-separator`. Fields sit at the byte offsets computed by the linker.

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

pub struct FixedFormatter {
    schema: Arc<LinkedSchema>,
    settings: FormatSettings,
    record_length: usize,
    separator: Vec<u8>,
    channel: Channel,
    input: Option<BufReader<Input>>,
}

impl FixedFormatter {
    pub fn new(schema: Arc<LinkedSchema>, settings: FormatSettings) -> Result<Self, FormatError> {
        if schema.file_type != FileType::Fixed {
            return Err(FormatError::Unsupported(format!(
                "{} is a {} layout, not Fixed",
                schema.source_name(),
                schema.file_type
            )));
        }
        let record_length = settings.record_length.ok_or_else(|| {
            FormatError::Config(format!("{}: record-length is not set", schema.source_name()))
        })?;
        let separator = settings
            .record_separator
            .as_deref()
            .map(|s| settings.charset.encode(s))
            .unwrap_or_default();
        Ok(FixedFormatter {
            schema,
            settings,
            record_length,
            separator,
            channel: Channel::new(),
            input: None,
        })
    }

    pub fn settings(&self) -> &FormatSettings {
        &self.settings
    }

    /// Next raw record, or `None` when the stream ends on a record boundary.
    fn read_raw(&mut self) -> Result<Option<Vec<u8>>, FormatError> {
        let input = self
            .input
            .as_mut()
            .ok_or_else(|| FormatError::State("no input stream".into()))?;
        let mut raw = vec![0u8; self.record_length];
        let got = read_full(input, &mut raw).map_err(|e| self.channel.input_io(e))?;
        if got == 0 {
            return Ok(None);
        }
        self.channel.records += 1;
        if got < self.record_length {
            return Err(self.channel.read_error(
                InvalidDataFormat::new(format!(
                    "truncated record: {} of {} byte(s)",
                    got, self.record_length
                ))
                .into(),
            ));
        }
        if !self.separator.is_empty() {
            let mut sep = vec![0u8; self.separator.len()];
            let n = read_full(input, &mut sep).map_err(|e| self.channel.input_io(e))?;
            // A missing separator after the last record is fine.
            if n > 0 && sep[..n] != self.separator[..] {
                return Err(self.channel.read_error(
                    InvalidDataFormat::new(format!(
                        "expected record separator {:02X?}, found {:02X?}",
                        self.separator,
                        &sep[..n]
                    ))
                    .into(),
                ));
            }
        }
        Ok(Some(raw))
    }

    fn write_with(&mut self, explicit: Option<&str>, record: &FieldSet) -> Result<(), FormatError> {
        self.channel.ensure_ready()?;
        let rt = select_for_write(&self.schema, explicit, None, record)
            .map_err(|e| self.channel.write_error(e))?;
        let mut bytes = encode_record(rt, record, &self.settings)
            .map_err(|e| self.channel.write_error(e))?;
        trace!("write [{}]: {} byte(s)", rt.name, bytes.len());
        bytes.extend_from_slice(&self.separator);
        let flush = self.settings.flush_per_record;
        self.channel.emit(&bytes, flush)
    }
}

fn read_full(input: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Decode one raw record with the given type. Fillers are decoded (and so validated)
/// but left out of the field-set.
pub fn decode_record(
    rt: &LinkedRecordType,
    raw: &[u8],
    settings: &FormatSettings,
) -> Result<FieldSet, InvalidDataFormat> {
    let mut record = FieldSet::with_type(rt.name.as_str());
    for field in &rt.fields {
        let value = decode_field(field, raw, settings).map_err(|e| e.in_field(&field.name))?;
        if !field.filler {
            record.insert(field.name.as_str(), value);
        }
    }
    Ok(record)
}

fn decode_field(
    field: &LinkedField,
    raw: &[u8],
    settings: &FormatSettings,
) -> Result<Value, InvalidDataFormat> {
    let ctx = field.context(settings);
    let end = field.offset + field.size();
    if end > raw.len() {
        return Err(InvalidDataFormat::new(format!(
            "field ends at byte {} beyond a record of {} byte(s)",
            end,
            raw.len()
        )));
    }
    if !field.is_array() {
        let value = field.data_type.decode_bytes(&raw[field.offset..end], &ctx)?;
        return Ok(field.apply_read(value)?);
    }
    let width = field.width();
    let mut items = Vec::with_capacity(field.slots());
    for start in (field.offset..end).step_by(width) {
        let value = field.data_type.decode_bytes(&raw[start..start + width], &ctx)?;
        items.push(field.apply_read(value)?.to_text());
    }
    // blank trailing slots beyond the minimum are unused
    while items.len() > field.occurs.min as usize && items.last().map_or(false, |s| s.is_empty()) {
        items.pop();
    }
    Ok(Value::Array(items))
}

/// Encode a field-set with the given type into exactly `rt.length` bytes.
pub fn encode_record(
    rt: &LinkedRecordType,
    record: &FieldSet,
    settings: &FormatSettings,
) -> Result<Vec<u8>, InvalidDataFormat> {
    let mut out = Vec::with_capacity(rt.length);
    for field in &rt.fields {
        let value = if field.filler {
            Value::Null
        } else {
            record.get(&field.name).cloned().unwrap_or_default()
        };
        let bytes = encode_field(field, value, settings).map_err(|e| e.in_field(&field.name))?;
        out.extend_from_slice(&bytes);
    }
    if out.len() != rt.length {
        return Err(InvalidDataFormat::new(format!(
            "[{}] encoded to {} byte(s), expected {}",
            rt.name,
            out.len(),
            rt.length
        )));
    }
    Ok(out)
}

fn encode_field(
    field: &LinkedField,
    value: Value,
    settings: &FormatSettings,
) -> Result<Vec<u8>, InvalidDataFormat> {
    let ctx = field.context(settings);
    let width = field.width();
    let encode_slot = |value: &Value| -> Result<Vec<u8>, InvalidDataFormat> {
        let bytes = field.data_type.encode_bytes(value, &ctx)?;
        if bytes.len() != width {
            return Err(InvalidDataFormat::new(format!(
                "{} produced {} byte(s) for a {}-byte field",
                field.data_type.name(),
                bytes.len(),
                width
            )));
        }
        Ok(bytes)
    };
    if !field.is_array() {
        return encode_slot(&prepare_scalar(field, value)?);
    }
    let items = array_items(value);
    check_occurs(field, items.len())?;
    let mut out = Vec::with_capacity(field.size());
    for k in 0..field.slots() {
        let item = items.get(k).cloned().unwrap_or_default();
        out.extend(encode_slot(&field.apply_write(item)?)?);
    }
    Ok(out)
}

impl RecordFormatter for FixedFormatter {
    fn schema(&self) -> &Arc<LinkedSchema> {
        &self.schema
    }

    fn state(&self) -> State {
        self.channel.state
    }

    fn initialize(&mut self) -> Result<(), FormatError> {
        self.channel.initialize()?;
        debug!(
            "fixed formatter ready: {} ({} byte records, {} type(s))",
            self.schema.source_name(),
            self.record_length,
            self.schema.record_types.len()
        );
        Ok(())
    }

    fn set_input(&mut self, input: Input) {
        self.input = Some(BufReader::new(input));
        self.channel.input_path = None;
    }

    fn set_input_path(&mut self, path: &Path) -> Result<(), FormatError> {
        let (input, display) = Channel::open_input(path)?;
        self.input = Some(BufReader::new(input));
        self.channel.input_path = Some(display);
        Ok(())
    }

    fn set_output(&mut self, output: Output) {
        self.channel.set_output(output, None);
    }

    fn set_output_path(&mut self, path: &Path) -> Result<(), FormatError> {
        self.channel.set_output_path(path)
    }

    fn has_next(&mut self) -> Result<bool, FormatError> {
        self.channel.ensure_ready()?;
        let input = self
            .input
            .as_mut()
            .ok_or_else(|| FormatError::State("no input stream".into()))?;
        let buf = input.fill_buf().map_err(|e| self.channel.input_io(e))?;
        Ok(!buf.is_empty())
    }

    fn read_record(&mut self) -> Result<Option<FieldSet>, FormatError> {
        self.channel.ensure_ready()?;
        let Some(raw) = self.read_raw()? else {
            return Ok(None);
        };
        let settings = &self.settings;
        let (rt, mut record) = select_for_read(&self.schema, None, |rt| {
            decode_record(rt, &raw, settings).map_err(FormatError::from)
        })
        .map_err(|e| self.channel.read_error(e))?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeDefaults;
    use crate::linker::Linker;
    use crate::parser::parse;
    use rust_decimal::Decimal;
    use std::io::Cursor;
    use std::str::FromStr;
    use std::sync::Mutex;

    fn formatter(src: &str) -> FixedFormatter {
        let schema = Linker::default().link(&parse(src).unwrap()).unwrap();
        let settings = schema.settings(&RuntimeDefaults::default()).unwrap();
        let mut f = FixedFormatter::new(Arc::new(schema), settings).unwrap();
        f.initialize().unwrap();
        f
    }

    /// Output sink whose bytes stay readable after the formatter takes it.
    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    const ORDERS: &str = "file-type: Fixed\ntext-encoding: \"US-ASCII\"\nrecord-length: 8\nrecord-separator: \"\\n\"\n\
        [Header]\nkind = \"H\"\n1 kind X(1)\n2 batch X(7)\n\
        [Detail]\nkind = \"D\"\n1 kind X(1)\n2 qty SZ(3)\n5 price SP(2, 1)\n7 ? pad X(2)\n";

    #[test]
    fn reads_and_dispatches_by_predicate() {
        let mut f = formatter(ORDERS);
        let mut data = b"HB-00042\n".to_vec();
        data.extend_from_slice(b"D12");
        data.push(b'3');
        data.extend_from_slice(&[0x12, 0x37]);
        data.extend_from_slice(b"  \n");
        f.set_input(Box::new(Cursor::new(data)));
        assert!(f.has_next().unwrap());
        let header = f.read_record().unwrap().unwrap();
        assert_eq!(header.record_type(), Some("Header"));
        assert_eq!(header.get_text("batch").as_deref(), Some("B-00042"));
        let detail = f.read_record().unwrap().unwrap();
        assert_eq!(detail.record_type(), Some("Detail"));
        assert_eq!(detail.sequence(), 2);
        assert_eq!(detail.get("qty"), Some(&Value::Decimal(Decimal::from(123))));
        assert_eq!(detail.get("price"), Some(&Value::Decimal(Decimal::from_str("-12.3").unwrap())));
        assert!(!detail.contains("pad"));
        assert!(!f.has_next().unwrap());
        assert!(f.read_record().unwrap().is_none());
        assert_eq!(f.record_number(), 2);
    }

    #[test]
    fn truncated_record_reports_position() {
        let mut f = formatter(ORDERS);
        f.set_input(Box::new(Cursor::new(b"HB-00042\nD1".to_vec())));
        f.read_record().unwrap();
        let err = f.read_record().unwrap_err();
        match err {
            FormatError::InvalidData(e) => {
                assert_eq!(e.record, Some(2));
                assert!(e.message.contains("truncated record: 2 of 8"), "{}", e);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn separator_is_checked() {
        let mut f = formatter(ORDERS);
        f.set_input(Box::new(Cursor::new(b"HB-00042|".to_vec())));
        assert!(f.read_record().is_err());
        let mut f = formatter(ORDERS);
        f.set_input(Box::new(Cursor::new(b"HB-00042".to_vec())));
        assert!(f.read_record().unwrap().is_some());
    }

    #[test]
    fn writes_by_type_and_by_dispatch() {
        let mut f = formatter(ORDERS);
        let sink = Shared::default();
        f.set_output(Box::new(sink.clone()));
        let detail = FieldSet::new()
            .with("kind", "D")
            .with("qty", 7)
            .with("price", Decimal::from_str("-12.3").unwrap());
        f.write_record(&detail).unwrap();
        f.write_record_as("Header", &FieldSet::new().with("kind", "H").with("batch", "B1")).unwrap();
        f.close();
        let mut expected = b"D00".to_vec();
        expected.push(b'7');
        expected.extend_from_slice(&[0x12, 0x37]);
        expected.extend_from_slice(b"  \nHB1     \n");
        assert_eq!(*sink.0.lock().unwrap(), expected);
    }

    #[test]
    fn write_rejects_unmatched_and_overlong() {
        let mut f = formatter(ORDERS);
        f.set_output(Box::new(Shared::default()));
        let err = f.write_record(&FieldSet::new().with("kind", "Z")).unwrap_err();
        assert!(err.to_string().contains("no record type matches"), "{}", err);
        let err = f
            .write_record_as("Header", &FieldSet::new().with("kind", "D"))
            .unwrap_err();
        assert!(err.to_string().contains("does not satisfy [Header] kind = \"H\""), "{}", err);
        let err = f
            .write_record(&FieldSet::new().with("kind", "H").with("batch", "TOO-LONG!"))
            .unwrap_err();
        assert!(err.to_string().contains("field 'batch'"), "{}", err);
        assert_eq!(f.record_number(), 0);
    }

    #[test]
    fn arrays_occupy_consecutive_slots() {
        let mut f = formatter(
            "file-type: Fixed\ntext-encoding: \"US-ASCII\"\nrecord-length: 7\n[R]\n1 id X(1)\n2 codes[0..3] X(2)\n",
        );
        f.set_input(Box::new(Cursor::new(b"1AABB  ".to_vec())));
        let r = f.read_record().unwrap().unwrap();
        assert_eq!(r.get("codes"), Some(&Value::Array(vec!["AA".into(), "BB".into()])));
        let sink = Shared::default();
        f.set_output(Box::new(sink.clone()));
        f.write_record(&r).unwrap();
        let err = f
            .write_record(&FieldSet::new().with("codes", Value::Array(vec!["A".into(); 4])))
            .unwrap_err();
        assert!(err.to_string().contains("at most 3"), "{}", err);
        f.close();
        assert_eq!(*sink.0.lock().unwrap(), b"1AABB  ".to_vec());
    }

    #[test]
    fn lifecycle_is_enforced() {
        let schema = Linker::default()
            .link(&parse("file-type: Fixed\ntext-encoding: \"US-ASCII\"\nrecord-length: 1\n[R]\n1 a X(1)\n").unwrap())
            .unwrap();
        let settings = schema.default_settings().clone();
        let mut f = FixedFormatter::new(Arc::new(schema), settings).unwrap();
        f.set_input(Box::new(Cursor::new(b"a".to_vec())));
        assert!(matches!(f.read_record(), Err(FormatError::State(_))));
        f.initialize().unwrap();
        f.initialize().unwrap();
        assert!(f.read_record().unwrap().is_some());
        f.close();
        f.close();
        assert_eq!(f.state(), State::Closed);
        assert!(f.initialize().is_err());
        assert!(matches!(f.read_record(), Err(FormatError::State(_))));
    }
}
