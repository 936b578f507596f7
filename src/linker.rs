//! Semantic linking: [`ParsedSchema`] → [`LinkedSchema`].
//!
//! 1. file type from `file-type`; every directive checked against the family catalog
//! 2. mandatory directives, charset, title record type
//! 3. scalar settings (directive, else runtime default)
//! 4. classifier fields (no contiguity checks)
//! 5. record fields: DataType and converters from the family registry, base fields
//!    merged into diff records, positions contiguous, fixed lengths summed
//! 6. default substitution converters appended per DataType

use crate::ast::{ConverterDecl, FieldSpec, ParsedSchema, RecordType};
use crate::charset::Charset;
use crate::config::RuntimeDefaults;
use crate::convert::{ConverterRegistry, Family, FieldEnv};
use crate::directive::{self as d, FileType};
use crate::error::SyntaxError;
use crate::predicate::Predicate;
use crate::schema::{condition_texts, FormatSettings, LinkedField, LinkedRecordType, LinkedSchema};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct Linker {
    fixed: ConverterRegistry,
    variable: ConverterRegistry,
    defaults: RuntimeDefaults,
}

impl Default for Linker {
    fn default() -> Self {
        Linker::new(RuntimeDefaults::default())
    }
}

fn field_error(rt: &RecordType, f: &FieldSpec, msg: impl std::fmt::Display) -> SyntaxError {
    SyntaxError::at(
        format!("record '{}', field '{}': {}", rt.name, f.name, msg),
        f.line,
        f.column,
    )
}

fn decl_error(rt: &RecordType, f: &FieldSpec, decl: &ConverterDecl, msg: impl std::fmt::Display) -> SyntaxError {
    SyntaxError::at(
        format!("record '{}', field '{}': {}", rt.name, f.name, msg),
        decl.line,
        decl.column,
    )
    .with_token(decl.name.clone())
}

impl Linker {
    /// Built-in registries for both families.
    pub fn new(defaults: RuntimeDefaults) -> Self {
        Linker {
            fixed: ConverterRegistry::fixed(),
            variable: ConverterRegistry::variable(),
            defaults,
        }
    }

    /// Replace the registry of `registry.family()`.
    pub fn with_registry(mut self, registry: ConverterRegistry) -> Self {
        match registry.family() {
            Family::Fixed => self.fixed = registry,
            Family::Variable => self.variable = registry,
        }
        self
    }

    pub fn defaults(&self) -> &RuntimeDefaults {
        &self.defaults
    }

    pub fn registry(&self, family: Family) -> &ConverterRegistry {
        match family {
            Family::Fixed => &self.fixed,
            Family::Variable => &self.variable,
        }
    }

    pub fn link(&self, parsed: &ParsedSchema) -> Result<LinkedSchema, SyntaxError> {
        self.link_inner(parsed)
            .map_err(|e| e.with_source(parsed.source_id.as_deref()))
    }

    fn link_inner(&self, parsed: &ParsedSchema) -> Result<LinkedSchema, SyntaxError> {
        // 1
        let file_type = self.file_type(parsed)?;
        for directive in &parsed.directives {
            file_type.validate(directive)?;
        }
        debug!("link: file type {}, {} directive(s) valid", file_type, parsed.directives.len());

        // 2
        self.check_mandatory(parsed, file_type)?;

        // 3
        let settings = FormatSettings::resolve(file_type, &parsed.directives, &self.defaults)?;
        if settings.requires_title && parsed.record_type(&settings.title_type).is_none() {
            let dir = parsed.directive(d::REQUIRES_TITLE);
            return Err(SyntaxError::at(
                format!(
                    "requires-title is set but no record type named '{}' exists",
                    settings.title_type
                ),
                dir.map_or(1, |x| x.line),
                dir.map_or(1, |x| x.column),
            ));
        }

        let family = Family::for_file_type(file_type);
        let registry = self.registry(family);
        let fixed = file_type == FileType::Fixed;

        // 4
        let classifier = match &parsed.classifier {
            Some(rt) => {
                let mut fields = Vec::with_capacity(rt.fields.len());
                for f in &rt.fields {
                    fields.push(self.link_field(rt, f, registry, &settings)?);
                }
                fields.sort_by_key(|f| f.position);
                let length = fields.iter().map(|f| f.offset + f.size()).max().unwrap_or(0);
                debug!("link: classifier with {} field(s)", fields.len());
                Some(LinkedRecordType {
                    name: rt.name.clone(),
                    base: None,
                    predicates: Vec::new(),
                    fields,
                    length,
                })
            }
            None => None,
        };

        // 5 + 6
        let mut record_types: Vec<LinkedRecordType> = Vec::with_capacity(parsed.record_types.len());
        for rt in &parsed.record_types {
            let mut own = Vec::with_capacity(rt.fields.len());
            for f in &rt.fields {
                own.push(self.link_field(rt, f, registry, &settings)?);
            }
            own.sort_by_key(|f| f.position);
            let fields = match &rt.base {
                Some(base_name) => {
                    let base = record_types
                        .iter()
                        .find(|r| r.name.eq_ignore_ascii_case(base_name))
                        .ok_or_else(|| {
                            SyntaxError::at(format!("unknown base record type '{}'", base_name), rt.line, 1)
                        })?;
                    let merged = merge_diff(own, &base.fields);
                    debug!("link: [{}] merged with base [{}], {} field(s)", rt.name, base.name, merged.len());
                    merged
                }
                None => own,
            };
            let length = check_layout(rt, &fields, fixed)?;
            if fixed {
                let declared = settings.record_length.unwrap_or(0);
                if length != declared {
                    return Err(SyntaxError::at(
                        format!(
                            "record type '{}' covers {} byte(s) but record-length is {}",
                            rt.name, length, declared
                        ),
                        rt.line,
                        1,
                    ));
                }
            }
            let predicates = self.predicates(rt, &fields, classifier.as_ref())?;
            record_types.push(LinkedRecordType {
                name: rt.name.clone(),
                base: rt.base.clone(),
                predicates,
                fields,
                length,
            });
        }

        info!(
            "linked layout {} ({}, {} record type(s){})",
            parsed.source_id.as_deref().unwrap_or("<layout>"),
            file_type,
            record_types.len(),
            if classifier.is_some() { ", classifier" } else { "" }
        );
        Ok(LinkedSchema {
            source_id: parsed.source_id.clone(),
            file_type,
            directives: parsed.directives.clone(),
            record_types,
            classifier,
            settings,
        })
    }

    fn file_type(&self, parsed: &ParsedSchema) -> Result<FileType, SyntaxError> {
        let dir = parsed
            .directive(d::FILE_TYPE)
            .ok_or_else(|| SyntaxError::at(format!("missing mandatory directive '{}'", d::FILE_TYPE), 1, 1))?;
        let name = dir.value.as_str().unwrap_or_default();
        FileType::from_name(name).ok_or_else(|| {
            SyntaxError::at(
                format!("unknown file type '{}' (expected Fixed, Variable, JSON or XML)", dir.value),
                dir.line,
                dir.column,
            )
        })
    }

    fn check_mandatory(&self, parsed: &ParsedSchema, file_type: FileType) -> Result<(), SyntaxError> {
        let mut required = vec![d::TEXT_ENCODING];
        match file_type {
            FileType::Fixed => required.push(d::RECORD_LENGTH),
            FileType::Variable => {
                required.push(d::FIELD_SEPARATOR);
                required.push(d::RECORD_SEPARATOR);
            }
            FileType::Json | FileType::Xml => {}
        }
        for name in required {
            if parsed.directive(name).is_none() {
                return Err(SyntaxError::at(
                    format!("missing mandatory directive '{}' for file type {}", name, file_type),
                    1,
                    1,
                ));
            }
        }
        Ok(())
    }

    fn link_field(
        &self,
        rt: &RecordType,
        f: &FieldSpec,
        registry: &ConverterRegistry,
        settings: &FormatSettings,
    ) -> Result<LinkedField, SyntaxError> {
        let charset = match &f.encoding {
            Some(name) => Charset::for_name(name)
                .ok_or_else(|| field_error(rt, f, format!("unknown encoding '{}'", name)))?,
            None => settings.charset,
        };
        let decl = f
            .data_type
            .as_ref()
            .ok_or_else(|| field_error(rt, f, "no DataType found"))?;
        let env = FieldEnv {
            field: &f.name,
            charset,
        };
        let data_type = registry
            .data_type(&decl.name, &decl.args, &env)
            .ok_or_else(|| decl_error(rt, f, decl, format!("unknown DataType '{}'", decl.name)))?
            .map_err(|e| decl_error(rt, f, decl, e))?;

        let mut converters = Vec::with_capacity(f.converters.len() + 1);
        for c in &f.converters {
            let conv = registry
                .converter(&c.name, &c.args)
                .ok_or_else(|| decl_error(rt, f, c, format!("unknown converter '{}'", c.name)))?
                .map_err(|e| decl_error(rt, f, c, e))?;
            converters.push(conv);
        }

        // 6
        if let Some(sub) = registry.default_substitution(&decl.name) {
            if !converters.iter().any(|c| c.name().eq_ignore_ascii_case(&sub.converter)) {
                let conv = registry
                    .converter(&sub.converter, &sub.args)
                    .ok_or_else(|| {
                        field_error(rt, f, format!("unknown substitution converter '{}'", sub.converter))
                    })?
                    .map_err(|e| field_error(rt, f, e))?;
                converters.push(conv);
            }
        }

        Ok(LinkedField {
            name: f.name.clone(),
            position: f.position as usize,
            offset: f.position as usize - 1,
            occurs: f.occurs,
            required: f.required,
            attribute: f.attribute,
            filler: f.filler,
            charset,
            data_type,
            converters,
            line: f.line,
        })
    }

    fn predicates(
        &self,
        rt: &RecordType,
        fields: &[LinkedField],
        classifier: Option<&LinkedRecordType>,
    ) -> Result<Vec<Predicate>, SyntaxError> {
        let mut out = Vec::with_capacity(rt.conditions.len());
        for c in &rt.conditions {
            let known = fields.iter().any(|f| f.name.eq_ignore_ascii_case(&c.field))
                || classifier.map_or(false, |cl| cl.field(&c.field).is_some());
            if !known {
                return Err(SyntaxError::at(
                    format!("record '{}': condition on unknown field '{}'", rt.name, c.field),
                    c.line,
                    1,
                ));
            }
            out.push(Predicate::equals(c.field.clone(), condition_texts(&c.values)));
        }
        Ok(out)
    }
}

fn overlaps(a: &LinkedField, b: &LinkedField) -> bool {
    let (a0, a1) = (a.position, a.position + a.size());
    let (b0, b1) = (b.position, b.position + b.size());
    a0 < b1 && b0 < a1
}

/// Walk diff and base fields in position order, keeping base fields the diff leaves uncovered.
fn merge_diff(own: Vec<LinkedField>, base: &[LinkedField]) -> Vec<LinkedField> {
    let covered = |b: &LinkedField| {
        own.iter()
            .any(|o| overlaps(o, b) || o.name.eq_ignore_ascii_case(&b.name))
    };
    let mut merged = Vec::with_capacity(own.len() + base.len());
    let (mut i, mut j) = (0, 0);
    while i < own.len() || j < base.len() {
        match (own.get(i), base.get(j)) {
            (Some(o), Some(b)) if b.position < o.position => {
                if !covered(b) {
                    merged.push(b.clone());
                }
                j += 1;
            }
            (Some(o), _) => {
                merged.push(o.clone());
                i += 1;
            }
            (None, Some(b)) => {
                if !covered(b) {
                    merged.push(b.clone());
                }
                j += 1;
            }
            (None, None) => break,
        }
    }
    merged
}

/// Check contiguity and array rules; return the bytes/columns covered.
fn check_layout(rt: &RecordType, fields: &[LinkedField], fixed: bool) -> Result<usize, SyntaxError> {
    let mut expected = 1usize;
    let mut names: Vec<&str> = Vec::with_capacity(fields.len());
    for (i, f) in fields.iter().enumerate() {
        let at = |msg: String| SyntaxError::at(format!("record '{}', field '{}': {}", rt.name, f.name, msg), f.line, 1);
        if f.occurs.max.is_none() {
            if fixed {
                return Err(at("unbounded arrays are not allowed in fixed-length layouts".into()));
            }
            if i + 1 != fields.len() {
                return Err(at("only the last field may be an unbounded array".into()));
            }
        }
        if f.position != expected {
            return Err(at(format!("expected position {}, found {}", expected, f.position)));
        }
        if !f.filler {
            if names.iter().any(|n| n.eq_ignore_ascii_case(&f.name)) {
                return Err(at("duplicate field name".into()));
            }
            names.push(&f.name);
        }
        expected += f.size();
    }
    Ok(expected - 1)
}
