//! Built-in ValueConverters: `Default`, `Trim`, `Upper`, `Lower`, `Replace`,
//! `Translate`, `Lookup`.

use super::{Args, ValueConverter};
use crate::error::ConvertError;
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub type ConverterResult = Result<Arc<dyn ValueConverter>, ConvertError>;

/// Substitutes a fixed value for null or empty input, both ways.
#[derive(Debug)]
pub struct DefaultValue {
    value: Value,
}

pub fn default_value(args: Args<'_>) -> ConverterResult {
    args.between(1, 1)?;
    let value = args.get(0).map(Value::from).unwrap_or_default();
    Ok(Arc::new(DefaultValue { value }))
}

impl ValueConverter for DefaultValue {
    fn name(&self) -> &str {
        "Default"
    }

    fn read(&self, value: Value) -> Result<Value, ConvertError> {
        Ok(if value.is_empty() { self.value.clone() } else { value })
    }

    fn write(&self, value: Value) -> Result<Value, ConvertError> {
        self.read(value)
    }
}

#[derive(Debug)]
pub struct Trim;

pub fn trim(args: Args<'_>) -> ConverterResult {
    args.at_most(0)?;
    Ok(Arc::new(Trim))
}

impl ValueConverter for Trim {
    fn name(&self) -> &str {
        "Trim"
    }

    fn read(&self, value: Value) -> Result<Value, ConvertError> {
        Ok(match value {
            Value::Text(s) => Value::Text(s.trim().to_string()),
            other => other,
        })
    }

    fn write(&self, value: Value) -> Result<Value, ConvertError> {
        Ok(value)
    }
}

#[derive(Debug)]
pub struct Case {
    upper: bool,
}

pub fn upper(args: Args<'_>) -> ConverterResult {
    args.at_most(0)?;
    Ok(Arc::new(Case { upper: true }))
}

pub fn lower(args: Args<'_>) -> ConverterResult {
    args.at_most(0)?;
    Ok(Arc::new(Case { upper: false }))
}

impl ValueConverter for Case {
    fn name(&self) -> &str {
        if self.upper {
            "Upper"
        } else {
            "Lower"
        }
    }

    fn read(&self, value: Value) -> Result<Value, ConvertError> {
        Ok(match value {
            Value::Text(s) if self.upper => Value::Text(s.to_uppercase()),
            Value::Text(s) => Value::Text(s.to_lowercase()),
            other => other,
        })
    }

    fn write(&self, value: Value) -> Result<Value, ConvertError> {
        self.read(value)
    }
}

/// `Replace(from, to)`: substring substitution, reversed on write.
#[derive(Debug)]
pub struct Replace {
    from: String,
    to: String,
}

pub fn replace(args: Args<'_>) -> ConverterResult {
    args.between(2, 2)?;
    let from = args.string(0)?.unwrap_or_default().to_string();
    let to = args.string(1)?.unwrap_or_default().to_string();
    if from.is_empty() {
        return Err(ConvertError::Invalid("Replace: search text is empty".into()));
    }
    Ok(Arc::new(Replace { from, to }))
}

impl ValueConverter for Replace {
    fn name(&self) -> &str {
        "Replace"
    }

    fn read(&self, value: Value) -> Result<Value, ConvertError> {
        Ok(match value {
            Value::Text(s) => Value::Text(s.replace(&self.from, &self.to)),
            other => other,
        })
    }

    fn write(&self, value: Value) -> Result<Value, ConvertError> {
        Ok(match value {
            Value::Text(s) if !self.to.is_empty() => Value::Text(s.replace(&self.to, &self.from)),
            other => other,
        })
    }
}

/// `Translate(from, to)`: per-character substitution.
#[derive(Debug)]
pub struct Translate {
    forward: HashMap<char, char>,
    backward: HashMap<char, char>,
}

pub fn translate(args: Args<'_>) -> ConverterResult {
    args.between(2, 2)?;
    let from: Vec<char> = args.string(0)?.unwrap_or_default().chars().collect();
    let to: Vec<char> = args.string(1)?.unwrap_or_default().chars().collect();
    if from.len() != to.len() {
        return Err(ConvertError::Invalid(format!(
            "Translate: {} source character(s) but {} target(s)",
            from.len(),
            to.len()
        )));
    }
    let forward = from.iter().copied().zip(to.iter().copied()).collect();
    let backward = to.into_iter().zip(from).collect();
    Ok(Arc::new(Translate { forward, backward }))
}

impl Translate {
    fn map(table: &HashMap<char, char>, value: Value) -> Value {
        match value {
            Value::Text(s) => Value::Text(s.chars().map(|c| *table.get(&c).unwrap_or(&c)).collect()),
            other => other,
        }
    }
}

impl ValueConverter for Translate {
    fn name(&self) -> &str {
        "Translate"
    }

    fn read(&self, value: Value) -> Result<Value, ConvertError> {
        Ok(Translate::map(&self.forward, value))
    }

    fn write(&self, value: Value) -> Result<Value, ConvertError> {
        Ok(Translate::map(&self.backward, value))
    }
}

/// `Lookup(code, label, ...)`: code → label on read, label → code on write.
#[derive(Debug)]
pub struct Lookup {
    labels: HashMap<String, Value>,
    codes: HashMap<String, Value>,
}

pub fn lookup(args: Args<'_>) -> ConverterResult {
    if args.is_empty() || args.len() % 2 != 0 {
        return Err(ConvertError::Invalid(
            "Lookup takes (code, label) pairs".into(),
        ));
    }
    let mut labels = HashMap::new();
    let mut codes = HashMap::new();
    for pair in args.items().chunks(2) {
        let code = Value::from(&pair[0]);
        let label = Value::from(&pair[1]);
        labels.insert(code.to_text(), label.clone());
        codes.insert(label.to_text(), code);
    }
    Ok(Arc::new(Lookup { labels, codes }))
}

impl ValueConverter for Lookup {
    fn name(&self) -> &str {
        "Lookup"
    }

    fn read(&self, value: Value) -> Result<Value, ConvertError> {
        Ok(self.labels.get(&value.to_text()).cloned().unwrap_or(value))
    }

    fn write(&self, value: Value) -> Result<Value, ConvertError> {
        Ok(self.codes.get(&value.to_text()).cloned().unwrap_or(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Literal;
    use rust_decimal::Decimal;

    fn s(v: &str) -> Literal {
        Literal::String(v.to_string())
    }

    fn text(v: &str) -> Value {
        Value::Text(v.to_string())
    }

    #[test]
    fn default_fills_blanks() {
        let args = [Literal::Number(Decimal::from(7))];
        let c = default_value(Args::new("Default", &args)).unwrap();
        assert_eq!(c.read(Value::Null).unwrap(), Value::from(7));
        assert_eq!(c.read(text("")).unwrap(), Value::from(7));
        assert_eq!(c.write(text("3")).unwrap(), text("3"));
    }

    #[test]
    fn trim_and_case() {
        let t = trim(Args::new("Trim", &[])).unwrap();
        assert_eq!(t.read(text("  ab ")).unwrap(), text("ab"));
        assert_eq!(t.write(text(" ab")).unwrap(), text(" ab"));
        let u = upper(Args::new("Upper", &[])).unwrap();
        assert_eq!(u.read(text("abc")).unwrap(), text("ABC"));
        assert_eq!(u.read(Value::from(1)).unwrap(), Value::from(1));
        assert!(trim(Args::new("Trim", &[s("x")])).is_err());
    }

    #[test]
    fn replace_reverses_on_write() {
        let args = [s("-"), s("/")];
        let r = replace(Args::new("Replace", &args)).unwrap();
        assert_eq!(r.read(text("2024-01-02")).unwrap(), text("2024/01/02"));
        assert_eq!(r.write(text("2024/01/02")).unwrap(), text("2024-01-02"));
    }

    #[test]
    fn translate_maps_characters() {
        let args = [s("\u{0}_"), s(" -")];
        let t = translate(Args::new("Translate", &args)).unwrap();
        assert_eq!(t.read(text("a\u{0}b_c")).unwrap(), text("a b-c"));
        assert_eq!(t.write(text("a b-c")).unwrap(), text("a\u{0}b_c"));
        let bad = [s("ab"), s("c")];
        assert!(translate(Args::new("Translate", &bad)).is_err());
    }

    #[test]
    fn lookup_both_ways() {
        let args = [s("A"), s("Active"), s("I"), s("Inactive")];
        let l = lookup(Args::new("Lookup", &args)).unwrap();
        assert_eq!(l.read(text("A")).unwrap(), text("Active"));
        assert_eq!(l.write(text("Inactive")).unwrap(), text("I"));
        assert_eq!(l.read(text("Z")).unwrap(), text("Z"));
        assert!(lookup(Args::new("Lookup", &args[..3])).is_err());
    }
}
