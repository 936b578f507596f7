//! Format decoded records for display (one-line summaries and indented dumps).

use crate::record::FieldSet;
use crate::schema::LinkedRecordType;
use crate::value::Value;

/// Compact rendering of one value: text quoted when it has edge spaces, bytes as hex.
pub fn format_value(v: &Value) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::Text(s) if s.starts_with(' ') || s.ends_with(' ') => format!("{:?}", s),
        Value::Text(s) => s.clone(),
        Value::Decimal(d) => d.to_string(),
        Value::Bytes(b) => format!("hex({})", hex::encode_upper(b)),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(|s| format_value(&Value::Text(s.clone()))).collect();
            format!("[{}]", parts.join(", "))
        }
    }
}

/// `#seq [Type] name=value ...`
pub fn record_summary_line(record: &FieldSet) -> String {
    let mut line = format!("#{} [{}]", record.sequence(), record.record_type().unwrap_or("?"));
    for (name, value) in record.iter() {
        line.push(' ');
        line.push_str(name);
        line.push('=');
        line.push_str(&format_value(value));
    }
    line
}

/// Multi-line dump. With the record type at hand, each field also shows its
/// DataType and its position in the record.
pub fn record_to_dump(record: &FieldSet, rt: Option<&LinkedRecordType>) -> String {
    let mut lines = vec![format!(
        "record {} [{}]",
        record.sequence(),
        record.record_type().unwrap_or("?")
    )];
    let width = record.names().map(str::len).max().unwrap_or(0);
    for (name, value) in record.iter() {
        let detail = rt.and_then(|rt| rt.field(name)).map(|f| {
            format!(
                "  ({} @{}{})",
                f.data_type.name(),
                f.offset + 1,
                if f.is_array() { format!(" x{}", f.slots()) } else { String::new() }
            )
        });
        lines.push(format!(
            "  {:width$} = {}{}",
            name,
            format_value(value),
            detail.unwrap_or_default(),
            width = width
        ));
    }
    lines.join("\n")
}
