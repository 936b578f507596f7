//! Layout language tests through the public API: what compiles, and what each
//! rejected layout reports (message, position, offending token).

use recfmt::ast::Literal;
use recfmt::{
    compile, compile_file, compile_with, open_formatter, ConvertError, ConverterRegistry, FieldSet, Family,
    FileType, FormatError, Linker, RuntimeDefaults, SyntaxError, Value, ValueConverter,
};
use std::io::Cursor;
use std::sync::{Arc, Mutex};

const FIXED_HEAD: &str = "file-type: Fixed\ntext-encoding: \"US-ASCII\"\nrecord-length: 4\n";
const CSV_HEAD: &str =
    "file-type: Variable\ntext-encoding: \"UTF-8\"\nfield-separator: \",\"\nrecord-separator: \"\\n\"\n";

fn syntax_error(src: &str) -> SyntaxError {
    match compile(src) {
        Err(FormatError::Syntax(e)) => e,
        Err(other) => panic!("expected a syntax error, got {:?}", other),
        Ok(_) => panic!("layout unexpectedly compiled:\n{}", src),
    }
}

// ==================== Valid layouts ====================

#[test]
fn comments_and_blank_lines_are_ignored() {
    let src = "# orders\n\nfile-type: Fixed   # engine\ntext-encoding: \"US-ASCII\"\nrecord-length: 4\n\n\
        [R]   # the only type\n1 a X(2)\n\n3 b N(2)\n";
    let schema = compile(src).unwrap();
    assert_eq!(schema.file_type, FileType::Fixed);
    assert_eq!(schema.record_types[0].fields.len(), 2);
    assert_eq!(schema.record_types[0].length, 4);
}

#[test]
fn directive_names_are_case_insensitive() {
    let schema = compile("FILE-TYPE: variable\nText-Encoding: \"utf-8\"\nfield-separator: \"|\"\n\
        Record-Separator: \"\\r\\n\"\n[R]\n1 a X\n2 b X\n")
        .unwrap();
    assert_eq!(schema.file_type, FileType::Variable);
    assert_eq!(schema.default_settings().record_separator.as_deref(), Some("\r\n"));
}

#[test]
fn variable_fields_count_columns() {
    let schema = compile(&format!("{}[R]\n1 id N\n2 tags[2] X\n4 rest[0..*] X\n", CSV_HEAD)).unwrap();
    let positions: Vec<usize> = schema.record_types[0].fields.iter().map(|f| f.position).collect();
    assert_eq!(positions, [1, 2, 4]);
    assert_eq!(schema.record_types[0].fields[2].occurs.max, None);
}

#[test]
fn title_type_name_can_be_renamed() {
    let schema = compile(&format!(
        "{}requires-title: true\ntitle-record-type-name: \"Columns\"\n[Columns]\n1 a X\n[Row]\n1 a N\n",
        CSV_HEAD
    ))
    .unwrap();
    let settings = schema.default_settings();
    assert!(settings.requires_title);
    assert_eq!(settings.title_type, "Columns");
}

// ==================== Directive errors ====================

#[test]
fn file_type_is_mandatory() {
    let e = syntax_error("text-encoding: \"US-ASCII\"\n[R]\n1 a X(1)\n");
    assert!(e.message.contains("missing mandatory directive 'file-type'"), "{}", e);
}

#[test]
fn unknown_file_type() {
    let e = syntax_error("file-type: Csv\ntext-encoding: \"US-ASCII\"\n[R]\n1 a X\n");
    assert!(e.message.contains("unknown file type"), "{}", e);
    assert_eq!(e.line, Some(1));
}

#[test]
fn family_mandatory_directives() {
    let e = syntax_error("file-type: Fixed\ntext-encoding: \"US-ASCII\"\n[R]\n1 a X(1)\n");
    assert!(
        e.message.contains("missing mandatory directive 'record-length' for file type Fixed"),
        "{}",
        e
    );
    let e = syntax_error("file-type: Variable\ntext-encoding: \"UTF-8\"\nrecord-separator: \"\\n\"\n[R]\n1 a X\n");
    assert!(e.message.contains("'field-separator'"), "{}", e);
}

#[test]
fn directive_from_the_other_family_is_rejected() {
    let e = syntax_error(&format!("{}field-separator: \",\"\n[R]\n1 a X(4)\n", FIXED_HEAD));
    assert!(e.message.contains("unknown directive 'field-separator' for file type Fixed"), "{}", e);
    assert_eq!(e.line, Some(4));
}

#[test]
fn directive_values_are_typed() {
    let e = syntax_error("file-type: Fixed\ntext-encoding: \"US-ASCII\"\nrecord-length: \"ten\"\n[R]\n1 a X(1)\n");
    assert!(e.message.contains("directive 'record-length' expects"), "{}", e);
    let e = syntax_error(&format!("{}negative-zone-sign-nibble: 0x1F\n[R]\n1 a X(4)\n", FIXED_HEAD));
    assert!(e.message.contains("expected a nibble"), "{}", e);
}

#[test]
fn record_separator_must_be_allowed() {
    let src = "file-type: Variable\ntext-encoding: \"UTF-8\"\nfield-separator: \",\"\nrecord-separator: \"|\"\n[R]\n1 a X\n";
    let e = syntax_error(src);
    assert!(e.message.contains("is not one of the allowed separators"), "{}", e);

    let defaults = RuntimeDefaults::from_toml_str("allowed-record-separators = [\"|\"]\n").unwrap();
    assert!(compile_with(src, None, &Linker::new(defaults)).is_ok());
}

#[test]
fn title_type_must_exist() {
    let e = syntax_error(&format!("{}requires-title: true\n[Row]\n1 a X\n", CSV_HEAD));
    assert!(e.message.contains("no record type named 'Title'"), "{}", e);
    assert_eq!(e.line, Some(5));
}

// ==================== Field errors ====================

#[test]
fn unknown_data_type_names_the_token() {
    let e = syntax_error(&format!("{}[R]\n1 a Q(4)\n", FIXED_HEAD));
    assert_eq!(e.message, "record 'R', field 'a': unknown DataType 'Q'");
    assert_eq!(e.token.as_deref(), Some("Q"));
    assert_eq!(e.line, Some(5));
}

#[test]
fn data_types_belong_to_a_family() {
    let e = syntax_error(&format!("{}[R]\n1 a SZ\n", CSV_HEAD));
    assert!(e.message.contains("unknown DataType 'SZ'"), "{}", e);
    let e = syntax_error(&format!("{}[R]\n1 a HEX(4)\n", FIXED_HEAD));
    assert!(e.message.contains("unknown DataType 'HEX'"), "{}", e);
}

#[test]
fn decimal_fields_hold_at_most_28_digits() {
    let fixed = |len: usize, field: &str| {
        format!("file-type: Fixed\ntext-encoding: \"US-ASCII\"\nrecord-length: {}\n[R]\n1 a {}\n", len, field)
    };
    let e = syntax_error(&fixed(29, "SZ(29)"));
    assert_eq!(e.message, "record 'R', field 'a': 29 digit(s) exceed the 28 a decimal field can hold");
    let e = syntax_error(&fixed(15, "SP(15)"));
    assert!(e.message.contains("29 digit(s) exceed"), "{}", e);
    assert!(compile(&fixed(14, "SP(14)")).is_ok());

    let schema = Arc::new(compile(&fixed(28, "SZ(28)")).unwrap());
    let mut r = open_formatter(schema, &RuntimeDefaults::default()).unwrap();
    r.set_input(Box::new(Cursor::new(vec![b'9'; 28])));
    r.initialize().unwrap();
    let rec = r.read_record().unwrap().unwrap();
    match rec.get("a") {
        Some(Value::Decimal(d)) => assert_eq!(d.to_string(), "9".repeat(28)),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn unknown_converter_and_encoding() {
    let e = syntax_error(&format!("{}[R]\n1 a X(4) Frobnicate\n", FIXED_HEAD));
    assert!(e.message.contains("unknown converter 'Frobnicate'"), "{}", e);
    let e = syntax_error(&format!("{}[R]\n1 a X(4) Encoding(\"Klingon\")\n", FIXED_HEAD));
    assert!(e.message.contains("unknown encoding 'Klingon'"), "{}", e);
}

#[test]
fn layout_rules() {
    let e = syntax_error(&format!("{}[R]\n1 a X(2)\n3 a X(2)\n", FIXED_HEAD));
    assert!(e.message.contains("duplicate field name"), "{}", e);
    let e = syntax_error(&format!("{}[R]\n1 a X(2)\n3 b[1..*] X(2)\n", FIXED_HEAD));
    assert!(e.message.contains("unbounded arrays are not allowed"), "{}", e);
    let e = syntax_error(&format!("{}[R]\n1 a X(3)\n", FIXED_HEAD));
    assert!(e.message.contains("covers 3 byte(s) but record-length is 4"), "{}", e);
}

#[test]
fn condition_must_name_a_field() {
    let e = syntax_error(&format!("{}[R]\nkind = \"A\"\n1 a X(4)\n", FIXED_HEAD));
    assert!(e.message.contains("condition on unknown field 'kind'"), "{}", e);
}

// ==================== Lexical errors and locations ====================

#[test]
fn unrecognized_input_has_a_column() {
    let e = syntax_error(&format!("{}[R]\n1 a $X(4)\n", FIXED_HEAD));
    assert!(e.message.contains("unrecognized input '$X(4)'"), "{}", e);
    assert_eq!((e.line, e.column), (Some(5), Some(5)));
}

#[test]
fn errors_name_the_layout_source() {
    let src = format!("{}[R]\n1 a Q(4)\n", FIXED_HEAD);
    match compile_with(&src, Some("orders.fmt"), &Linker::default()) {
        Err(FormatError::Syntax(e)) => {
            assert!(e.to_string().starts_with("orders.fmt:5:"), "{}", e);
            assert!(e.to_string().ends_with("(at 'Q')"), "{}", e);
        }
        other => panic!("unexpected {:?}", other.map(|_| ())),
    }
}

#[test]
fn compile_file_reports_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.fmt");
    std::fs::write(&path, format!("{}[R]\n1 a X(2)\n5 b X(2)\n", FIXED_HEAD)).unwrap();
    match compile_file(&path, &Linker::default()) {
        Err(FormatError::Syntax(e)) => {
            assert_eq!(e.source_id.as_deref(), Some(path.display().to_string().as_str()));
            assert!(e.message.contains("expected position 3, found 5"), "{}", e);
        }
        other => panic!("unexpected {:?}", other.map(|_| ())),
    }
}

// ==================== Runtime defaults and registries ====================

#[test]
fn runtime_defaults_reject_unknown_keys() {
    let err = RuntimeDefaults::from_toml_str("flush-every-record = true\n").unwrap_err();
    assert!(matches!(err, FormatError::Config(_)), "{:?}", err);
    let d = RuntimeDefaults::from_toml_str("flush-per-record = false\nmax-record-length = 80\n").unwrap();
    assert!(!d.flush_per_record);
    assert_eq!(d.max_record_length, 80);
}

#[test]
fn field_nibbles_beat_directive_nibbles() {
    let src = "file-type: Fixed\ntext-encoding: \"Cp037\"\nrecord-length: 4\n\
        positive-zone-sign-nibble: 0xF\n[R]\n1 a SZ(2)\n3 b SZ(2, 0, 0xA, 0xB)\n";
    let schema = Arc::new(compile(src).unwrap());
    let mut w = open_formatter(schema, &RuntimeDefaults::default()).unwrap();
    let out = Arc::new(Mutex::new(Vec::new()));
    w.set_output(Box::new(SharedBuf(Arc::clone(&out))));
    w.initialize().unwrap();
    w.write_record(&FieldSet::new().with("a", 42).with("b", 42)).unwrap();
    w.close();
    assert_eq!(*out.lock().unwrap(), vec![0xF4, 0xF2, 0xF4, 0xA2]);
}

struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
struct Mask;

impl ValueConverter for Mask {
    fn name(&self) -> &str {
        "Mask"
    }
    fn read(&self, value: Value) -> Result<Value, ConvertError> {
        let text = value.to_text();
        let keep = text.len().saturating_sub(4);
        Ok(Value::Text(format!("{}{}", "*".repeat(keep), &text[keep..])))
    }
    fn write(&self, value: Value) -> Result<Value, ConvertError> {
        Ok(value)
    }
}

#[test]
fn caller_registered_converter_is_linked() {
    let mut registry = ConverterRegistry::variable();
    registry.register_converter("Mask", |_args| Ok(Arc::new(Mask) as Arc<dyn ValueConverter>));
    assert_eq!(registry.family(), Family::Variable);
    let linker = Linker::new(RuntimeDefaults::default()).with_registry(registry);

    let src = format!("{}[R]\n1 card X Mask\n", CSV_HEAD);
    assert!(compile(&src).is_err());
    let schema = Arc::new(compile_with(&src, None, &linker).unwrap());
    let mut r = open_formatter(schema, linker.defaults()).unwrap();
    r.set_input(Box::new(Cursor::new(b"4111222233334444\n".to_vec())));
    r.initialize().unwrap();
    let rec = r.read_record().unwrap().unwrap();
    assert_eq!(rec.get_text("card").as_deref(), Some("************4444"));
}

#[test]
fn default_substitution_applies_to_every_field_of_a_type() {
    let mut registry = ConverterRegistry::variable();
    registry.set_default_substitution("X", "Upper", vec![]);
    let linker = Linker::default().with_registry(registry);
    let schema = Arc::new(compile_with(&format!("{}[R]\n1 a X\n2 b X Lower\n", CSV_HEAD), None, &linker).unwrap());
    let mut r = open_formatter(schema, linker.defaults()).unwrap();
    r.set_input(Box::new(Cursor::new(b"abc,DeF\n".to_vec())));
    r.initialize().unwrap();
    let rec = r.read_record().unwrap().unwrap();
    assert_eq!(rec.get_text("a").as_deref(), Some("ABC"));
    // Lower runs first, the substituted Upper after it
    assert_eq!(rec.get_text("b").as_deref(), Some("DEF"));
}

#[test]
fn literal_arguments_keep_their_kind() {
    let mut registry = ConverterRegistry::fixed();
    registry.set_default_substitution("X", "Replace", vec![Literal::String("-".into()), Literal::String("".into())]);
    let linker = Linker::default().with_registry(registry);
    let schema = compile_with(&format!("{}[R]\n1 a X(4)\n", FIXED_HEAD), None, &linker).unwrap();
    assert!(schema.record_types[0].fields[0].has_converter("Replace"));
}
