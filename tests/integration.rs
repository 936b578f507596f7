//! Integration tests: compile layouts, then read and write records through both engines.

use pretty_assertions::assert_eq;
use recfmt::{
    compile, compile_file, open_formatter, FieldSet, FileType, FormatError, Linker, RecordFormatter,
    RuntimeDefaults, SchemaCache, State, Value,
};
use rust_decimal::Decimal;
use std::io::{self, Cursor, Write};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// Output sink that stays readable after a formatter takes ownership of it.
#[derive(Clone, Default)]
struct Sink(Arc<Mutex<Vec<u8>>>);

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Sink {
    fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

fn reader(layout: &str, data: &[u8]) -> Box<dyn RecordFormatter> {
    let schema = Arc::new(compile(layout).expect("layout compiles"));
    let mut f = open_formatter(schema, &RuntimeDefaults::default()).expect("formatter");
    f.set_input(Box::new(Cursor::new(data.to_vec())));
    f.initialize().unwrap();
    f
}

fn writer(layout: &str) -> (Box<dyn RecordFormatter>, Sink) {
    let schema = Arc::new(compile(layout).expect("layout compiles"));
    let mut f = open_formatter(schema, &RuntimeDefaults::default()).expect("formatter");
    let sink = Sink::default();
    f.set_output(Box::new(sink.clone()));
    f.initialize().unwrap();
    (f, sink)
}

/// Decode every record of `data`, then encode them again.
fn round_trip(layout: &str, data: &[u8]) -> (Vec<FieldSet>, Vec<u8>) {
    let mut r = reader(layout, data);
    let mut records = Vec::new();
    while let Some(rec) = r.read_record().unwrap() {
        records.push(rec);
    }
    r.close();
    let (mut w, sink) = writer(layout);
    for rec in &records {
        w.write_record(rec).unwrap();
    }
    w.close();
    (records, sink.bytes())
}

// ==================== Scenarios ====================

#[test]
fn fixed_text_field_round_trips() {
    let layout = "file-type: Fixed\ntext-encoding: \"US-ASCII\"\nrecord-length: 10\n[R]\n1 field X(10)\n";
    let (records, out) = round_trip(layout, b"abc       ");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get_text("field").as_deref(), Some("abc"));
    assert_eq!(out, b"abc       ".to_vec());
}

#[test]
fn ascii_zoned_negative_round_trips() {
    let layout = "file-type: Fixed\ntext-encoding: \"US-ASCII\"\nrecord-length: 5\n[R]\n1 amount SZ(5)\n";
    let data = [0x31, 0x32, 0x33, 0x34, 0x75];
    let (records, out) = round_trip(layout, &data);
    assert_eq!(records[0].get("amount"), Some(&Value::Decimal(Decimal::from(-12345))));
    assert_eq!(out, data.to_vec());
}

#[test]
fn quoted_csv_column_round_trips() {
    let layout = "file-type: Variable\ntext-encoding: \"UTF-8\"\nfield-separator: \",\"\n\
        record-separator: \"\\r\\n\"\nquoting-delimiter: \"\\\"\"\n[R]\n1 a X\n2 b X\n";
    let (records, out) = round_trip(layout, b"\"a,b\",c\r\n");
    assert_eq!(records[0].get_text("a").as_deref(), Some("a,b"));
    assert_eq!(records[0].get_text("b").as_deref(), Some("c"));
    // every column is wrapped on write
    assert_eq!(out, b"\"a,b\",\"c\"\r\n".to_vec());
    let (again, out2) = round_trip(layout, &out);
    assert_eq!(again, records);
    assert_eq!(out2, out);
}

const CLASSIFIED: &str = "file-type: Fixed\ntext-encoding: \"US-ASCII\"\nrecord-length: 6\n\
[Classifier]\n1 kind X(1)\n\
[Header]\nkind = \"H\"\n1 kind X(1)\n2 batch X(5)\n\
[DataRow]\nkind = \"D\"\n1 kind X(1)\n2 qty SZ(5)\n";

#[test]
fn classifier_dispatches_to_first_matching_type() {
    let mut r = reader(CLASSIFIED, b"HB0001D00042");
    let header = r.read_record().unwrap().unwrap();
    assert_eq!(header.record_type(), Some("Header"));
    assert_eq!(header.get_text("batch").as_deref(), Some("B0001"));
    let row = r.read_record().unwrap().unwrap();
    assert_eq!(row.record_type(), Some("DataRow"));
    assert_eq!(row.get("qty"), Some(&Value::Decimal(Decimal::from(42))));
    assert!(!row.contains("batch"));
    assert!(r.read_record().unwrap().is_none());
}

#[test]
fn classifier_without_match_names_the_key() {
    let mut r = reader(CLASSIFIED, b"X12345D00001");
    let err = r.read_record().unwrap_err();
    match err {
        FormatError::InvalidData(e) => {
            assert_eq!(e.record, Some(1));
            assert!(e.message.contains("no record type matches classifier fields"), "{}", e);
            assert!(e.message.contains("kind"), "{}", e);
        }
        other => panic!("unexpected {:?}", other),
    }
    // the bad record was consumed; the next one still reads
    let next = r.read_record().unwrap().unwrap();
    assert_eq!(next.record_type(), Some("DataRow"));
    assert_eq!(next.sequence(), 2);
}

const TITLED: &str = "file-type: Variable\ntext-encoding: \"UTF-8\"\nfield-separator: \";\"\n\
record-separator: \"\\n\"\nrequires-title: true\n\
[Title]\n1 first X\n2 second X\n\
[Row]\n1 id N\n2 name X\n";

#[test]
fn title_mode_rejects_misplaced_records_on_write() {
    let (mut w, sink) = writer(TITLED);
    let row = FieldSet::new().with("id", 1).with("name", "one");
    assert!(w.write_record_as("Row", &row).is_err());
    w.write_record_as("Title", &FieldSet::new().with("first", "id").with("second", "name"))
        .unwrap();
    w.write_record_as("Row", &row).unwrap();
    let err = w
        .write_record_as("Title", &FieldSet::new().with("first", "id").with("second", "name"))
        .unwrap_err();
    assert!(matches!(err, FormatError::InvalidData(_)), "{:?}", err);
    w.close();
    assert_eq!(sink.bytes(), b"id;name\n1;one\n".to_vec());
}

#[test]
fn gap_between_fields_fails_linking() {
    let err = compile("file-type: Fixed\ntext-encoding: \"US-ASCII\"\nrecord-length: 20\n[R]\n1 a X(10)\n5 b X(10)\n")
        .unwrap_err();
    match err {
        FormatError::Syntax(e) => {
            assert!(e.message.contains("expected position 11, found 5"), "{}", e);
            assert_eq!(e.line, Some(6));
        }
        other => panic!("unexpected {:?}", other),
    }
}

// ==================== Sign nibbles ====================

#[test]
fn ebcdic_decimals_use_c_and_d_nibbles() {
    let layout = "file-type: Fixed\ntext-encoding: \"Cp037\"\nrecord-length: 5\n[R]\n1 z SZ(3)\n4 p SP(2)\n";
    let (mut w, sink) = writer(layout);
    w.write_record(&FieldSet::new().with("z", 123).with("p", 123)).unwrap();
    w.write_record(&FieldSet::new().with("z", -123).with("p", -123)).unwrap();
    w.close();
    let bytes = sink.bytes();
    assert_eq!(
        bytes,
        vec![0xF1, 0xF2, 0xC3, 0x12, 0x3C, 0xF1, 0xF2, 0xD3, 0x12, 0x3D]
    );

    let mut r = reader(layout, &bytes);
    let pos = r.read_record().unwrap().unwrap();
    let neg = r.read_record().unwrap().unwrap();
    assert_eq!(pos.get("p"), Some(&Value::Decimal(Decimal::from(123))));
    assert_eq!(neg.get("z"), Some(&Value::Decimal(Decimal::from(-123))));
}

#[test]
fn directive_overrides_family_nibbles() {
    let layout = "file-type: Fixed\ntext-encoding: \"Cp037\"\nrecord-length: 2\n\
        positive-zone-sign-nibble: 0xF\n[R]\n1 z SZ(2)\n";
    let (mut w, sink) = writer(layout);
    w.write_record(&FieldSet::new().with("z", 42)).unwrap();
    w.close();
    assert_eq!(sink.bytes(), vec![0xF4, 0xF2]);
}

#[test]
fn decimals_round_trip_for_every_length() {
    for charset in ["US-ASCII", "Cp037"] {
        for digits in 1..=18usize {
            let zoned = digits;
            let packed = digits / 2 + 1;
            let layout = format!(
                "file-type: Fixed\ntext-encoding: \"{}\"\nrecord-length: {}\n[R]\n1 z SZ({})\n{} p SP({})\n",
                charset,
                zoned + packed,
                zoned,
                zoned + 1,
                packed
            );
            let magnitude = Decimal::from_str(&"9876543210987654321"[..digits]).unwrap();
            for value in [magnitude, -magnitude] {
                let record = FieldSet::with_type("R").with("z", value).with("p", value);
                let (mut w, sink) = writer(&layout);
                w.write_record(&record).unwrap();
                w.close();
                let mut r = reader(&layout, &sink.bytes());
                let back = r.read_record().unwrap().unwrap();
                assert_eq!(back.get("z"), Some(&Value::Decimal(value)), "{} {} digit(s)", charset, digits);
                assert_eq!(back.get("p"), Some(&Value::Decimal(value)), "{} {} digit(s)", charset, digits);
            }
        }
    }
}

#[test]
fn bad_sign_nibble_is_reported() {
    let layout = "file-type: Fixed\ntext-encoding: \"Cp037\"\nrecord-length: 2\n[R]\n1 z SZ(2)\n";
    let mut r = reader(layout, &[0xF1, 0x52]);
    let err = r.read_record().unwrap_err();
    assert!(err.to_string().contains("invalid zone bits"), "{}", err);
}

// ==================== Diff records ====================

#[test]
fn diff_record_replaces_overlapping_base_fields() {
    let layout = "file-type: Fixed\ntext-encoding: \"US-ASCII\"\nrecord-length: 10\n\
        [Detail]\nkind = \"D\"\n1 kind X(1)\n2 sku X(9)\n\
        [Return] < [Detail]\nkind = \"R\"\n2 code X(4)\n6 reason X(5)\n";
    let schema = compile(layout).unwrap();
    let ret = schema.record_type("Return").unwrap();
    let names: Vec<&str> = ret.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["kind", "code", "reason"]);

    let mut r = reader(layout, b"DSKU-00001RC001LATE ");
    assert_eq!(r.read_record().unwrap().unwrap().record_type(), Some("Detail"));
    let back = r.read_record().unwrap().unwrap();
    assert_eq!(back.record_type(), Some("Return"));
    assert_eq!(back.get_text("reason").as_deref(), Some("LATE"));
}

// ==================== Files and lifecycle ====================

#[test]
fn reads_and_writes_files_by_path() {
    let dir = tempfile::tempdir().unwrap();
    let layout_path = dir.path().join("orders.fmt");
    let data_path = dir.path().join("orders.dat");
    std::fs::write(
        &layout_path,
        "file-type: Fixed\ntext-encoding: \"US-ASCII\"\nrecord-length: 8\nrecord-separator: \"\\n\"\n\
         [Line]\n1 sku X(4)\n5 qty SZ(4)\n",
    )
    .unwrap();

    let schema = Arc::new(compile_file(&layout_path, &Linker::default()).unwrap());
    assert_eq!(schema.file_type, FileType::Fixed);
    let mut w = open_formatter(Arc::clone(&schema), &RuntimeDefaults::default()).unwrap();
    w.set_output_path(&data_path).unwrap();
    w.initialize().unwrap();
    for (sku, qty) in [("A1", 5), ("B2", -17)] {
        w.write_record(&FieldSet::new().with("sku", sku).with("qty", qty)).unwrap();
    }
    w.close();
    assert_eq!(w.record_number(), 2);

    let mut r = open_formatter(Arc::clone(&schema), &RuntimeDefaults::default()).unwrap();
    r.set_input_path(&data_path).unwrap();
    r.initialize().unwrap();
    let first = r.read_record().unwrap().unwrap();
    let second = r.read_record().unwrap().unwrap();
    assert!(r.read_record().unwrap().is_none());
    assert_eq!(first.get_text("sku").as_deref(), Some("A1"));
    assert_eq!(second.get("qty"), Some(&Value::Decimal(Decimal::from(-17))));
    r.close();
}

#[test]
fn data_errors_carry_the_input_path() {
    let dir = tempfile::tempdir().unwrap();
    let data_path = dir.path().join("short.dat");
    std::fs::write(&data_path, b"abc").unwrap();
    let schema = Arc::new(
        compile("file-type: Fixed\ntext-encoding: \"US-ASCII\"\nrecord-length: 5\n[R]\n1 a X(5)\n").unwrap(),
    );
    let mut r = open_formatter(schema, &RuntimeDefaults::default()).unwrap();
    r.set_input_path(&data_path).unwrap();
    r.initialize().unwrap();
    match r.read_record().unwrap_err() {
        FormatError::InvalidData(e) => {
            assert_eq!(e.path.as_deref(), Some(data_path.display().to_string().as_str()));
            assert!(e.message.contains("truncated record: 3 of 5"), "{}", e);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn missing_input_file_is_an_io_error() {
    let schema = Arc::new(
        compile("file-type: Fixed\ntext-encoding: \"US-ASCII\"\nrecord-length: 1\n[R]\n1 a X(1)\n").unwrap(),
    );
    let mut r = open_formatter(schema, &RuntimeDefaults::default()).unwrap();
    let err = r.set_input_path("/nonexistent/recfmt/input.dat".as_ref()).unwrap_err();
    assert!(matches!(err, FormatError::Io { .. }), "{:?}", err);
}

#[test]
fn close_is_idempotent() {
    let (mut w, sink) = writer("file-type: Fixed\ntext-encoding: \"US-ASCII\"\nrecord-length: 2\n[R]\n1 a X(2)\n");
    w.write_record(&FieldSet::new().with("a", "ok")).unwrap();
    w.close();
    w.close();
    assert_eq!(w.state(), State::Closed);
    assert!(matches!(
        w.write_record(&FieldSet::new().with("a", "no")),
        Err(FormatError::State(_))
    ));
    assert_eq!(sink.bytes(), b"ok".to_vec());
}

#[test]
fn structured_file_types_are_not_handled_here() {
    let schema = Arc::new(compile("file-type: JSON\ntext-encoding: \"UTF-8\"\n[Doc]\n1 a X\n").unwrap());
    let err = open_formatter(schema, &RuntimeDefaults::default()).err().unwrap();
    assert!(matches!(err, FormatError::Unsupported(_)), "{:?}", err);
}

#[test]
fn cached_schema_is_shared_across_threads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.fmt");
    std::fs::write(&path, "file-type: Fixed\ntext-encoding: \"US-ASCII\"\nrecord-length: 3\n[R]\n1 a X(3)\n")
        .unwrap();
    let cache = Arc::new(SchemaCache::new());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let cache = Arc::clone(&cache);
            let path = path.clone();
            std::thread::spawn(move || {
                let schema = cache.get_or_link(&path, &Linker::default()).unwrap();
                let mut r = open_formatter(Arc::clone(&schema), &RuntimeDefaults::default()).unwrap();
                r.set_input(Box::new(Cursor::new(format!("t{:02}", i).into_bytes())));
                r.initialize().unwrap();
                let rec = r.read_record().unwrap().unwrap();
                assert_eq!(rec.get_text("a"), Some(format!("t{:02}", i)));
                schema
            })
        })
        .collect();
    let schemas: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(schemas.iter().all(|s| Arc::ptr_eq(s, &schemas[0])));
    assert_eq!(cache.len(), 1);
}
