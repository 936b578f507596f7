//! Name → factory maps for DataTypes and ValueConverters, one per format family.
//!
//! The built-in registries are created once; [`ConverterRegistry::fixed`] and
//! [`ConverterRegistry::variable`] hand out cheap clones callers may extend.

use super::{converter, datatype, Args, DataType, FieldEnv, ValueConverter};
use crate::ast::Literal;
use crate::directive::FileType;
use crate::error::ConvertError;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type DataTypeFactory =
    Arc<dyn Fn(Args<'_>, &FieldEnv<'_>) -> Result<Arc<dyn DataType>, ConvertError> + Send + Sync>;
pub type ConverterFactory =
    Arc<dyn Fn(Args<'_>) -> Result<Arc<dyn ValueConverter>, ConvertError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Fixed,
    Variable,
}

impl Family {
    /// Structured file types link their fields with the text (variable) family.
    pub fn for_file_type(file_type: FileType) -> Family {
        match file_type {
            FileType::Fixed => Family::Fixed,
            FileType::Variable | FileType::Json | FileType::Xml => Family::Variable,
        }
    }
}

/// A converter appended to every field of a DataType that lacks one of that name.
#[derive(Debug, Clone, PartialEq)]
pub struct Substitution {
    pub converter: String,
    pub args: Vec<Literal>,
}

#[derive(Clone)]
pub struct ConverterRegistry {
    family: Family,
    data_types: HashMap<String, DataTypeFactory>,
    converters: HashMap<String, ConverterFactory>,
    substitutions: HashMap<String, Substitution>,
}

static FIXED: Lazy<ConverterRegistry> = Lazy::new(|| {
    let mut r = ConverterRegistry::empty(Family::Fixed);
    r.register_data_type("X", datatype::fixed_text);
    r.register_data_type("N", datatype::fixed_numeric);
    r.register_data_type("SZ", datatype::zoned);
    r.register_data_type("SP", datatype::packed);
    r.register_data_type("BI", datatype::binary_int);
    r.register_data_type("B", datatype::raw_bytes);
    r.register_builtin_converters();
    r
});

static VARIABLE: Lazy<ConverterRegistry> = Lazy::new(|| {
    let mut r = ConverterRegistry::empty(Family::Variable);
    r.register_data_type("X", datatype::var_text);
    r.register_data_type("N", datatype::var_numeric);
    r.register_data_type("HEX", datatype::hex_text);
    r.register_builtin_converters();
    r
});

impl ConverterRegistry {
    pub fn empty(family: Family) -> Self {
        ConverterRegistry {
            family,
            data_types: HashMap::new(),
            converters: HashMap::new(),
            substitutions: HashMap::new(),
        }
    }

    /// Built-in fixed-length DataTypes and converters.
    pub fn fixed() -> Self {
        FIXED.clone()
    }

    /// Built-in variable-length DataTypes and converters.
    pub fn variable() -> Self {
        VARIABLE.clone()
    }

    pub fn for_family(family: Family) -> Self {
        match family {
            Family::Fixed => Self::fixed(),
            Family::Variable => Self::variable(),
        }
    }

    pub fn family(&self) -> Family {
        self.family
    }

    fn register_builtin_converters(&mut self) {
        self.register_converter("Default", converter::default_value);
        self.register_converter("Trim", converter::trim);
        self.register_converter("Upper", converter::upper);
        self.register_converter("Lower", converter::lower);
        self.register_converter("Replace", converter::replace);
        self.register_converter("Translate", converter::translate);
        self.register_converter("Lookup", converter::lookup);
    }

    /// Register (or replace) a DataType. Names are case-insensitive.
    pub fn register_data_type<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(Args<'_>, &FieldEnv<'_>) -> Result<Arc<dyn DataType>, ConvertError> + Send + Sync + 'static,
    {
        self.data_types.insert(name.to_ascii_lowercase(), Arc::new(factory));
    }

    /// Register (or replace) a ValueConverter. Names are case-insensitive.
    pub fn register_converter<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(Args<'_>) -> Result<Arc<dyn ValueConverter>, ConvertError> + Send + Sync + 'static,
    {
        self.converters.insert(name.to_ascii_lowercase(), Arc::new(factory));
    }

    /// Append `converter(args)` to every field of `data_type` that lacks it.
    pub fn set_default_substitution(&mut self, data_type: &str, converter: &str, args: Vec<Literal>) {
        self.substitutions.insert(
            data_type.to_ascii_lowercase(),
            Substitution {
                converter: converter.to_string(),
                args,
            },
        );
    }

    pub fn default_substitution(&self, data_type: &str) -> Option<&Substitution> {
        self.substitutions.get(&data_type.to_ascii_lowercase())
    }

    pub fn has_data_type(&self, name: &str) -> bool {
        self.data_types.contains_key(&name.to_ascii_lowercase())
    }

    pub fn has_converter(&self, name: &str) -> bool {
        self.converters.contains_key(&name.to_ascii_lowercase())
    }

    /// `None` when no DataType of that name is registered.
    pub fn data_type(
        &self,
        name: &str,
        args: &[Literal],
        env: &FieldEnv<'_>,
    ) -> Option<Result<Arc<dyn DataType>, ConvertError>> {
        let factory = self.data_types.get(&name.to_ascii_lowercase())?;
        Some(factory(Args::new(name, args), env))
    }

    /// `None` when no converter of that name is registered.
    pub fn converter(
        &self,
        name: &str,
        args: &[Literal],
    ) -> Option<Result<Arc<dyn ValueConverter>, ConvertError>> {
        let factory = self.converters.get(&name.to_ascii_lowercase())?;
        Some(factory(Args::new(name, args)))
    }
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut data_types: Vec<&String> = self.data_types.keys().collect();
        data_types.sort();
        let mut converters: Vec<&String> = self.converters.keys().collect();
        converters.sort();
        f.debug_struct("ConverterRegistry")
            .field("family", &self.family)
            .field("data_types", &data_types)
            .field("converters", &converters)
            .field("substitutions", &self.substitutions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charset::Charset;
    use crate::error::ConvertError;
    use crate::value::Value;
    use rust_decimal::Decimal;

    fn env() -> FieldEnv<'static> {
        FieldEnv {
            field: "f",
            charset: Charset::Ascii,
        }
    }

    #[test]
    fn builtins_per_family() {
        let fixed = ConverterRegistry::fixed();
        assert!(fixed.has_data_type("sz") && fixed.has_data_type("BI"));
        assert!(!fixed.has_data_type("HEX"));
        let variable = ConverterRegistry::variable();
        assert!(variable.has_data_type("hex"));
        assert!(!variable.has_data_type("SP"));
        assert!(variable.has_converter("lookup"));
    }

    #[test]
    fn instantiate_with_args() {
        let fixed = ConverterRegistry::fixed();
        let args = [Literal::Number(Decimal::from(4))];
        let dt = fixed.data_type("x", &args, &env()).unwrap().unwrap();
        assert_eq!(dt.width(), 4);
        assert!(fixed.data_type("Nope", &args, &env()).is_none());
        assert!(fixed.data_type("X", &[], &env()).unwrap().is_err());
    }

    #[derive(Debug)]
    struct Reverse;

    impl ValueConverter for Reverse {
        fn name(&self) -> &str {
            "Reverse"
        }
        fn read(&self, value: Value) -> Result<Value, ConvertError> {
            Ok(Value::Text(value.to_text().chars().rev().collect()))
        }
        fn write(&self, value: Value) -> Result<Value, ConvertError> {
            self.read(value)
        }
    }

    #[test]
    fn caller_registrations_do_not_leak() {
        let mut custom = ConverterRegistry::variable();
        custom.register_converter("Reverse", |_args| Ok(Arc::new(Reverse) as Arc<dyn ValueConverter>));
        custom.set_default_substitution("X", "Translate", vec![]);
        assert!(custom.has_converter("reverse"));
        assert!(custom.default_substitution("x").is_some());
        assert!(!ConverterRegistry::variable().has_converter("reverse"));
        let rev = custom.converter("REVERSE", &[]).unwrap().unwrap();
        assert_eq!(rev.read(Value::Text("abc".into())).unwrap(), Value::Text("cba".into()));
    }
}
