//! Generic field-set: the named-value form of one decoded (or to-be-encoded) record.

use crate::value::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    names: Vec<String>,
    value: Value,
}

/// Ordered, case-insensitive, multi-alias name → value map plus the record-type
/// name and the 1-based sequence number of the record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSet {
    record_type: Option<String>,
    sequence: u32,
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

fn key(name: &str) -> String {
    name.to_lowercase()
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(record_type: impl Into<String>) -> Self {
        FieldSet {
            record_type: Some(record_type.into()),
            ..Self::default()
        }
    }

    pub fn record_type(&self) -> Option<&str> {
        self.record_type.as_deref()
    }

    pub fn set_record_type(&mut self, name: impl Into<String>) {
        self.record_type = Some(name.into());
    }

    /// 1-based position of the record in its stream (0 when not read from a stream).
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn set_sequence(&mut self, n: u32) {
        self.sequence = n;
    }

    /// Insert or replace a value. Replacing keeps the original position and aliases.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.index.get(&key(&name)) {
            Some(&i) => self.entries[i].value = value,
            None => {
                self.index.insert(key(&name), self.entries.len());
                self.entries.push(Entry {
                    names: vec![name],
                    value,
                });
            }
        }
    }

    /// Builder form of [`FieldSet::insert`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Make `alias` resolve to the same entry as `existing`. Returns false when
    /// `existing` is unknown or `alias` already names another entry.
    pub fn add_alias(&mut self, existing: &str, alias: impl Into<String>) -> bool {
        let alias = alias.into();
        let Some(&i) = self.index.get(&key(existing)) else {
            return false;
        };
        match self.index.get(&key(&alias)) {
            Some(&j) => j == i,
            None => {
                self.index.insert(key(&alias), i);
                self.entries[i].names.push(alias);
                true
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.index.get(&key(name)).map(|&i| &self.entries[i].value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&key(name))
    }

    /// Stringified value; empty string for Null.
    pub fn get_text(&self, name: &str) -> Option<String> {
        self.get(name).map(Value::to_text)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let i = self.index.get(&key(name)).copied()?;
        let entry = self.entries.remove(i);
        self.index.retain(|_, idx| *idx != i);
        for idx in self.index.values_mut() {
            if *idx > i {
                *idx -= 1;
            }
        }
        Some(entry.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Primary names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.names[0].as_str())
    }

    /// (primary name, value) in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|e| (e.names[0].as_str(), &e.value))
    }

    /// All names (primary first) of the entry that `name` resolves to.
    pub fn aliases(&self, name: &str) -> Option<&[String]> {
        self.index.get(&key(name)).map(|&i| self.entries[i].names.as_slice())
    }
}
