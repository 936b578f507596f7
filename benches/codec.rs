//! Benchmark: read and write synthetic files through both engines.
//! Fixed: EBCDIC records with zoned and packed decimals. Variable: quoted CSV lines.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use recfmt::{compile, open_formatter, FieldSet, LinkedSchema, RuntimeDefaults};
use rust_decimal::Decimal;
use std::io::{self, Cursor};
use std::sync::{Arc, Mutex};

const FIXED: &str = "file-type: Fixed\ntext-encoding: \"Cp037\"\nrecord-length: 24\n\
[Detail]\n1 sku X(10) Trim\n11 qty SZ(5)\n16 price SP(5, 2)\n21 ? pad X(4)\n";

const CSV: &str = "file-type: Variable\ntext-encoding: \"UTF-8\"\nfield-separator: \",\"\n\
record-separator: \"\\n\"\nquoting-delimiter: \"\\\"\"\n\
[Line]\n1 id N\n2 name X\n3 note X\n4 amount N(2)\n";

const RECORDS: usize = 10_000;

fn defaults() -> RuntimeDefaults {
    RuntimeDefaults {
        flush_per_record: false,
        ..RuntimeDefaults::default()
    }
}

fn write_all(schema: &Arc<LinkedSchema>, records: &[FieldSet]) -> Vec<u8> {
    let sink = Sink::default();
    let mut writer = open_formatter(Arc::clone(schema), &defaults()).unwrap();
    writer.set_output(Box::new(sink.clone()));
    writer.initialize().unwrap();
    for r in records {
        writer.write_record(r).unwrap();
    }
    writer.close();
    let out = sink.0.lock().unwrap().clone();
    out
}

/// Output the formatter owns while the bench keeps a handle on the bytes.
#[derive(Clone, Default)]
struct Sink(Arc<Mutex<Vec<u8>>>);

impl io::Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn read_all(schema: &Arc<LinkedSchema>, data: &[u8]) -> usize {
    let mut reader = open_formatter(Arc::clone(schema), &defaults()).unwrap();
    reader.set_input(Box::new(Cursor::new(data.to_vec())));
    reader.initialize().unwrap();
    let mut n = 0;
    while let Some(r) = reader.read_record().unwrap() {
        black_box(&r);
        n += 1;
    }
    n
}

fn fixed_records() -> Vec<FieldSet> {
    (0..RECORDS)
        .map(|i| {
            FieldSet::new()
                .with("sku", format!("SKU{:06}", i))
                .with("qty", (i % 99_999) as i64 - 50_000)
                .with("price", Decimal::new(i as i64 % 9_999_999, 2))
        })
        .collect()
}

fn csv_records() -> Vec<FieldSet> {
    (0..RECORDS)
        .map(|i| {
            FieldSet::new()
                .with("id", i)
                .with("name", format!("item {}", i))
                .with("note", if i % 3 == 0 { "has, comma" } else { "plain" })
                .with("amount", Decimal::new(i as i64 * 7, 2))
        })
        .collect()
}

fn bench_engines(c: &mut Criterion) {
    let fixed = Arc::new(compile(FIXED).expect("fixed layout"));
    let csv = Arc::new(compile(CSV).expect("csv layout"));
    let fixed_in = fixed_records();
    let csv_in = csv_records();
    let fixed_data = write_all(&fixed, &fixed_in);
    let csv_data = write_all(&csv, &csv_in);

    let mut group = c.benchmark_group("engines");
    group.bench_function("fixed_read", |b| b.iter(|| black_box(read_all(&fixed, &fixed_data))));
    group.bench_function("fixed_write", |b| b.iter(|| black_box(write_all(&fixed, &fixed_in))));
    group.bench_function("variable_read", |b| b.iter(|| black_box(read_all(&csv, &csv_data))));
    group.bench_function("variable_write", |b| b.iter(|| black_box(write_all(&csv, &csv_in))));
    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    c.bench_function("compile_fixed_layout", |b| b.iter(|| black_box(compile(black_box(FIXED)).unwrap())));
}

criterion_group!(benches, bench_engines, bench_compile);
criterion_main!(benches);
