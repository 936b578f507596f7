//! Recursive-descent parser: layout tokens → [`ParsedSchema`].
//!
//! ```text
//! layout       := directive* recordFormat+
//! directive    := HEADER (literal | Identifier) EOL
//! recordFormat := RECORD_HEADER ('<' RECORD_HEADER)? EOL condition* field*
//! condition    := Identifier '=' literal (',' literal)* EOL
//! field        := Number '?'? '@'? HEADER? Identifier ARRAY? convertor* EOL
//! convertor    := Identifier args? | literal
//! args         := '(' (literal (',' literal)*)? ')'
//! ```

use crate::ast::*;
use crate::error::{FormatError, SyntaxError};
use crate::token::{Token, TokenKind, TokenValue};
use crate::tokenizer::Tokenizer;
use rust_decimal::prelude::ToPrimitive;
use std::path::Path;

/// Name of the pseudo-converter that sets a field's encoding.
const ENCODING_CONVERTER: &str = "Encoding";

const LITERALS: &[TokenKind] = &[
    TokenKind::String,
    TokenKind::Number,
    TokenKind::Boolean,
    TokenKind::Hex,
];

/// Parse layout source into a schema IR.
pub fn parse(source: &str) -> Result<ParsedSchema, SyntaxError> {
    parse_named(source, None)
}

/// Parse layout source; `source_id` (usually the file path) is attached to errors.
pub fn parse_named(source: &str, source_id: Option<&str>) -> Result<ParsedSchema, SyntaxError> {
    let mut parser = LayoutParser {
        tokens: Tokenizer::new(source),
    };
    let mut schema = parser.layout().map_err(|e| e.with_source(source_id))?;
    schema.source_id = source_id.map(str::to_string);
    Ok(schema)
}

/// Read and parse a layout file.
pub fn parse_file(path: impl AsRef<Path>) -> Result<ParsedSchema, FormatError> {
    let path = path.as_ref();
    let display = path.display().to_string();
    let source = std::fs::read_to_string(path).map_err(|e| FormatError::io(Some(&display), e))?;
    Ok(parse_named(&source, Some(&display))?)
}

struct LayoutParser<'a> {
    tokens: Tokenizer<'a>,
}

fn unexpected(tok: &Token, expected: &[TokenKind]) -> SyntaxError {
    let wanted: Vec<&str> = expected.iter().map(|k| k.describe()).collect();
    let found = if tok.raw.is_empty() {
        tok.kind.describe().to_string()
    } else {
        format!("{} '{}'", tok.kind, tok.raw)
    };
    let err = SyntaxError::at(
        format!("expected {}, found {}", wanted.join(" or "), found),
        tok.line,
        tok.column,
    );
    if tok.raw.is_empty() {
        err
    } else {
        err.with_token(tok.raw.clone())
    }
}

fn literal_of(tok: Token) -> Result<Literal, SyntaxError> {
    match tok.value {
        TokenValue::Literal(l) => Ok(l),
        _ => Err(unexpected(&tok, LITERALS)),
    }
}

fn name_of(tok: &Token) -> String {
    tok.name().unwrap_or(tok.raw.as_str()).to_string()
}

impl<'a> LayoutParser<'a> {
    fn expect(&mut self, kinds: &[TokenKind]) -> Result<Token, SyntaxError> {
        let tok = self.tokens.consume()?;
        if kinds.contains(&tok.kind) {
            Ok(tok)
        } else {
            Err(unexpected(&tok, kinds))
        }
    }

    fn at(&mut self, kind: TokenKind) -> Result<bool, SyntaxError> {
        Ok(self.tokens.peek()?.kind == kind)
    }

    fn eat(&mut self, kind: TokenKind) -> Result<Option<Token>, SyntaxError> {
        if self.at(kind)? {
            Ok(Some(self.tokens.consume()?))
        } else {
            Ok(None)
        }
    }

    fn layout(&mut self) -> Result<ParsedSchema, SyntaxError> {
        let mut directives: Vec<Directive> = Vec::new();
        while self.at(TokenKind::Header)? {
            let d = self.directive()?;
            if directives.iter().any(|x| x.name.eq_ignore_ascii_case(&d.name)) {
                return Err(SyntaxError::at(
                    format!("duplicate directive '{}'", d.name),
                    d.line,
                    d.column,
                ));
            }
            directives.push(d);
        }

        if !self.at(TokenKind::RecordHeader)? {
            let tok = self.tokens.consume()?;
            let mut err = unexpected(&tok, &[TokenKind::Header, TokenKind::RecordHeader]);
            if tok.kind == TokenKind::Eof {
                err.message = "at least one record format is required".to_string();
            }
            return Err(err);
        }

        let mut record_types: Vec<RecordType> = Vec::new();
        let mut classifier: Option<RecordType> = None;
        while self.at(TokenKind::RecordHeader)? {
            let rt = self.record_format(&record_types)?;
            let clash = record_types
                .iter()
                .chain(classifier.iter())
                .any(|r| r.name.eq_ignore_ascii_case(&rt.name));
            if clash {
                return Err(SyntaxError::at(
                    format!("duplicate record type '{}'", rt.name),
                    rt.line,
                    1,
                ));
            }
            if rt.is_classifier() {
                classifier = Some(rt);
            } else {
                record_types.push(rt);
            }
        }
        self.expect(&[TokenKind::Eof, TokenKind::RecordHeader])?;

        Ok(ParsedSchema {
            source_id: None,
            directives,
            record_types,
            classifier,
        })
    }

    fn directive(&mut self) -> Result<Directive, SyntaxError> {
        let header = self.expect(&[TokenKind::Header])?;
        let value_tok = self.expect(&[
            TokenKind::String,
            TokenKind::Number,
            TokenKind::Boolean,
            TokenKind::Hex,
            TokenKind::Identifier,
        ])?;
        let value = if value_tok.kind == TokenKind::Identifier {
            Literal::String(name_of(&value_tok))
        } else {
            literal_of(value_tok)?
        };
        self.expect(&[TokenKind::Eol])?;
        Ok(Directive {
            name: name_of(&header),
            value,
            line: header.line,
            column: header.column,
        })
    }

    fn record_format(&mut self, declared: &[RecordType]) -> Result<RecordType, SyntaxError> {
        let header = self.expect(&[TokenKind::RecordHeader])?;
        let name = name_of(&header);
        let mut base = None;
        if let Some(less) = self.eat(TokenKind::Less)? {
            let base_tok = self.expect(&[TokenKind::RecordHeader])?;
            let base_name = name_of(&base_tok);
            if name.eq_ignore_ascii_case(CLASSIFIER) {
                return Err(SyntaxError::at(
                    "the classifier record cannot inherit from a base record",
                    less.line,
                    less.column,
                ));
            }
            let found = declared
                .iter()
                .find(|r| r.name.eq_ignore_ascii_case(&base_name))
                .ok_or_else(|| {
                    SyntaxError::at(
                        format!("unknown base record type '{}'", base_name),
                        base_tok.line,
                        base_tok.column,
                    )
                    .with_token(base_tok.raw.clone())
                })?;
            base = Some(found.name.clone());
        }
        self.expect(&[TokenKind::Eol])?;

        let mut conditions = Vec::new();
        while self.at(TokenKind::Identifier)? {
            conditions.push(self.condition()?);
        }
        let mut fields = Vec::new();
        while self.at(TokenKind::Number)? {
            fields.push(self.field()?);
        }

        Ok(RecordType {
            name,
            base,
            conditions,
            fields,
            line: header.line,
        })
    }

    fn condition(&mut self) -> Result<Condition, SyntaxError> {
        let field = self.expect(&[TokenKind::Identifier])?;
        self.expect(&[TokenKind::Equals])?;
        let mut values = vec![literal_of(self.expect(LITERALS)?)?];
        while self.eat(TokenKind::Comma)?.is_some() {
            values.push(literal_of(self.expect(LITERALS)?)?);
        }
        self.expect(&[TokenKind::Eol])?;
        Ok(Condition {
            field: name_of(&field),
            values,
            line: field.line,
        })
    }

    fn field(&mut self) -> Result<FieldSpec, SyntaxError> {
        let pos_tok = self.expect(&[TokenKind::Number])?;
        let position = match pos_tok.literal() {
            Some(Literal::Number(n)) if n.fract().is_zero() && n.is_sign_positive() => {
                n.to_u32().filter(|&p| p > 0)
            }
            _ => None,
        }
        .ok_or_else(|| {
            SyntaxError::at("field position must be a positive integer", pos_tok.line, pos_tok.column)
                .with_token(pos_tok.raw.clone())
        })?;

        let filler = self.eat(TokenKind::Question)?.is_some();
        let attribute = self.eat(TokenKind::At)?.is_some();
        let prefix = self.eat(TokenKind::Header)?.map(|t| name_of(&t));
        let name_tok = self.expect(&[TokenKind::Identifier])?;
        let name = match prefix {
            Some(p) => format!("{}:{}", p, name_of(&name_tok)),
            None => name_of(&name_tok),
        };

        let mut occurs = Occurs::ONE;
        let mut required = false;
        if let Some(tok) = self.eat(TokenKind::ArraySize)? {
            let TokenValue::Bounds { min, max } = tok.value else {
                return Err(unexpected(&tok, &[TokenKind::ArraySize]));
            };
            let fail = |msg: String| SyntaxError::at(msg, tok.line, tok.column).with_token(tok.raw.clone());
            if let Some(m) = max {
                if min > m {
                    return Err(fail(format!("array minimum {} exceeds maximum {}", min, m)));
                }
                if m == 0 {
                    return Err(fail("array bounds [0..0] leave no occurrence".to_string()));
                }
            }
            occurs = Occurs { min, max };
            if attribute && occurs.is_array() {
                return Err(fail(format!("attribute field '{}' cannot be an array", name)));
            }
            required = min >= 1;
        }

        let mut data_type = None;
        let mut converters = Vec::new();
        let mut encoding = None;
        loop {
            let tok = self.tokens.consume()?;
            match tok.kind {
                TokenKind::Eol => break,
                TokenKind::Identifier => {
                    let args = if self.at(TokenKind::LParen)? {
                        self.args()?
                    } else {
                        Vec::new()
                    };
                    let decl = ConverterDecl {
                        name: name_of(&tok),
                        args,
                        synthetic: false,
                        line: tok.line,
                        column: tok.column,
                    };
                    if decl.name.eq_ignore_ascii_case(ENCODING_CONVERTER) && data_type.is_some() {
                        match decl.args.as_slice() {
                            [Literal::String(enc)] => encoding = Some(enc.clone()),
                            _ => {
                                return Err(SyntaxError::at(
                                    "Encoding takes exactly one string argument",
                                    tok.line,
                                    tok.column,
                                ))
                            }
                        }
                    } else if data_type.is_none() {
                        data_type = Some(decl);
                    } else {
                        converters.push(decl);
                    }
                }
                kind if kind.is_literal() => {
                    if data_type.is_none() {
                        return Err(SyntaxError::at(
                            format!("field '{}': the first convertor must name a data type, found a literal", name),
                            tok.line,
                            tok.column,
                        )
                        .with_token(tok.raw.clone()));
                    }
                    let (line, column) = (tok.line, tok.column);
                    converters.push(ConverterDecl {
                        name: "Default".to_string(),
                        args: vec![literal_of(tok)?],
                        synthetic: true,
                        line,
                        column,
                    });
                }
                _ => {
                    let mut expected = vec![TokenKind::Identifier, TokenKind::Eol];
                    expected.extend_from_slice(LITERALS);
                    return Err(unexpected(&tok, &expected));
                }
            }
        }

        Ok(FieldSpec {
            position,
            name,
            encoding,
            required,
            attribute,
            filler,
            occurs,
            data_type,
            converters,
            line: pos_tok.line,
            column: pos_tok.column,
        })
    }

    fn args(&mut self) -> Result<Vec<Literal>, SyntaxError> {
        self.expect(&[TokenKind::LParen])?;
        let mut args = Vec::new();
        if self.eat(TokenKind::RParen)?.is_some() {
            return Ok(args);
        }
        loop {
            args.push(literal_of(self.expect(LITERALS)?)?);
            let sep = self.expect(&[TokenKind::Comma, TokenKind::RParen])?;
            if sep.kind == TokenKind::RParen {
                return Ok(args);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    const ORDERS: &str = r#"
# order interchange
file-type: Fixed
text-encoding: "US-ASCII"
record-length: 20

[Header]
kind = "H"
1 kind X(1)
2 created N(8)
10 ? filler X(11)

[Detail]
kind = "D", "d"
1 kind X(1)
2 sku X(9) Trim Upper
11 qty SZ(5)
16 price SP(3, 2) "0"
19 ns:flag X(2) Encoding("Cp037")
"#;

    #[test]
    fn parses_directives_and_records() {
        let s = parse(ORDERS).expect("parse");
        assert_eq!(s.directives.len(), 3);
        assert_eq!(s.directive("FILE-TYPE").unwrap().value, Literal::String("Fixed".into()));
        assert_eq!(
            s.directive("record-length").unwrap().value,
            Literal::Number(Decimal::from(20))
        );
        assert_eq!(s.record_types.len(), 2);
        let detail = s.record_type("detail").unwrap();
        assert_eq!(detail.conditions[0].values.len(), 2);
        assert_eq!(detail.fields.len(), 5);
        let sku = &detail.fields[1];
        assert_eq!(sku.data_type.as_ref().unwrap().name, "X");
        assert_eq!(sku.converters.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), ["Trim", "Upper"]);
        let price = &detail.fields[3];
        assert!(price.converters[0].synthetic);
        assert_eq!(price.converters[0].args, vec![Literal::String("0".into())]);
        let flag = &detail.fields[4];
        assert_eq!(flag.name, "ns:flag");
        assert_eq!(flag.encoding.as_deref(), Some("Cp037"));
        assert!(flag.converters.is_empty());
    }

    #[test]
    fn filler_and_attribute_flags() {
        let s = parse("[R]\n1 ? pad X(2)\n3 @ id X(1)\n").unwrap();
        assert!(s.record_types[0].fields[0].filler);
        assert!(s.record_types[0].fields[1].attribute);
    }

    #[test]
    fn classifier_goes_to_its_slot() {
        let s = parse("[Classifier]\n1 kind X(1)\n[A]\nkind = \"A\"\n1 kind X(1)\n").unwrap();
        assert!(s.classifier.is_some());
        assert_eq!(s.record_types.len(), 1);
    }

    #[test]
    fn array_bounds() {
        let s = parse("[R]\n1 a[3] X(1)\n4 b[0..1] X(1)\n5 c[1..*] X\n").unwrap();
        let f = &s.record_types[0].fields;
        assert_eq!(f[0].occurs, Occurs { min: 3, max: Some(3) });
        assert!(f[0].required && f[0].is_array());
        assert!(f[1].occurs.is_optional() && !f[1].is_array() && !f[1].required);
        assert_eq!(f[2].occurs.max, None);
    }

    #[test]
    fn array_errors() {
        assert!(parse("[R]\n1 a[3..2] X(1)\n").unwrap_err().message.contains("exceeds"));
        assert!(parse("[R]\n1 a[0] X(1)\n").is_err());
        assert!(parse("[R]\n1 @ a[2] X(1)\n").unwrap_err().message.contains("attribute"));
    }

    #[test]
    fn leading_literal_is_rejected() {
        let err = parse("[R]\n1 a \"x\" X(1)\n").unwrap_err();
        assert!(err.message.contains("first convertor"), "{}", err);
        assert_eq!((err.line, err.column), (Some(2), Some(5)));
    }

    #[test]
    fn unknown_base_fails() {
        let err = parse_named("[B] < [A]\n1 a X(1)\n", Some("x.fmt")).unwrap_err();
        assert!(err.to_string().starts_with("x.fmt:1:7: unknown base record type 'A'"), "{}", err);
    }

    #[test]
    fn requires_a_record() {
        let err = parse("file-type: Fixed\n").unwrap_err();
        assert!(err.message.contains("at least one record"));
    }

    #[test]
    fn duplicate_names_fail() {
        assert!(parse("[A]\n[a]\n").unwrap_err().message.contains("duplicate record"));
        assert!(parse("x: 1\nX: 2\n[A]\n").unwrap_err().message.contains("duplicate directive"));
    }

    #[test]
    fn converter_args() {
        let s = parse("[R]\n1 a X(4, \" \", right) Lookup(\"A\", \"Active\")\n").unwrap_err();
        // `right` is an identifier, not a literal
        assert!(s.message.contains("expected string or number"), "{}", s);
        let s = parse("[R]\n1 a X() Replace('-', \"\")\n").unwrap();
        let f = &s.record_types[0].fields[0];
        assert!(f.data_type.as_ref().unwrap().args.is_empty());
        assert_eq!(f.converters[0].args.len(), 2);
    }
}
