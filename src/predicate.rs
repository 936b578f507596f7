//! Record-type dispatch predicates.

use crate::record::FieldSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Field's text form equals one of `values`.
    Equals { field: String, values: Vec<String> },
}

impl Predicate {
    pub fn equals(field: impl Into<String>, values: Vec<String>) -> Self {
        Predicate::Equals {
            field: field.into(),
            values,
        }
    }

    pub fn field(&self) -> &str {
        match self {
            Predicate::Equals { field, .. } => field,
        }
    }

    pub fn apply(&self, record: &FieldSet) -> bool {
        match self {
            Predicate::Equals { field, values } => match record.get(field) {
                Some(v) if !v.is_null() => {
                    let text = v.to_text();
                    values.iter().any(|x| *x == text)
                }
                _ => false,
            },
        }
    }
}

/// All predicates hold (conditions are AND-ed). An empty list matches everything.
pub fn all_match(predicates: &[Predicate], record: &FieldSet) -> bool {
    predicates.iter().all(|p| p.apply(record))
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Equals { field, values } => {
                let quoted: Vec<String> = values.iter().map(|v| format!("{:?}", v)).collect();
                write!(f, "{} = {}", field, quoted.join(", "))
            }
        }
    }
}
