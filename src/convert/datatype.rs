//! Built-in DataTypes.
//!
//! Fixed layouts: `X(size[, pad[, align]])`, `N(size[, scale])`,
//! `SZ(size[, scale[, pos, neg]])`, `SP(size[, scale[, pos, neg]])`, `BI(size[, scale])`,
//! `B(size)`. Variable layouts: `X([max])`, `N([scale])`, `HEX`.

use super::decimal::{self, DecimalKind, SignFamily, SignNibbles};
use super::{Args, CodecContext, DataType, FieldEnv};
use crate::error::ConvertError;
use crate::value::Value;
use byteorder::{BigEndian, ByteOrder};
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;
use std::sync::Arc;

pub type DataTypeResult = Result<Arc<dyn DataType>, ConvertError>;

fn check_width(bytes: &[u8], expected: usize) -> Result<(), ConvertError> {
    if bytes.len() != expected {
        return Err(ConvertError::WrongWidth {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn scale_arg(args: &Args<'_>, i: usize) -> Result<u32, ConvertError> {
    match args.usize(i)? {
        None => Ok(0),
        Some(n) if n <= decimal::MAX_DIGITS => Ok(n as u32),
        Some(n) => Err(ConvertError::Invalid(format!(
            "scale {} exceeds {} digits",
            n,
            decimal::MAX_DIGITS
        ))),
    }
}

fn to_decimal(value: &Value) -> Result<Decimal, ConvertError> {
    value
        .as_decimal()
        .ok_or_else(|| ConvertError::NotANumber(value.to_text()))
}

fn rescaled(value: Decimal, scale: u32) -> Decimal {
    let mut v = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    v.rescale(scale);
    v
}

fn is_blank(bytes: &[u8], ctx: &CodecContext<'_>) -> bool {
    let space = ctx.charset.encode_char(' ');
    bytes.iter().all(|&b| b == space)
}

fn blank(size: usize, ctx: &CodecContext<'_>) -> Vec<u8> {
    vec![ctx.charset.encode_char(' '); size]
}

// ==================== Fixed: text ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

#[derive(Debug)]
pub struct FixedText {
    size: usize,
    pad: char,
    align: Align,
}

pub fn fixed_text(args: Args<'_>, env: &FieldEnv<'_>) -> DataTypeResult {
    args.between(1, 3)?;
    let size = args.size(0)?;
    let pad = args.char(1)?.unwrap_or(' ');
    if env.charset.byte_for(pad).is_none() {
        return Err(ConvertError::Invalid(format!(
            "pad character {:?} is not a single byte in {}",
            pad,
            env.charset.name()
        )));
    }
    let align = match args.string(2)? {
        None => Align::Left,
        Some(a) if a.eq_ignore_ascii_case("left") => Align::Left,
        Some(a) if a.eq_ignore_ascii_case("right") => Align::Right,
        Some(a) => {
            return Err(ConvertError::Invalid(format!(
                "alignment must be \"left\" or \"right\", got {:?}",
                a
            )))
        }
    };
    Ok(Arc::new(FixedText { size, pad, align }))
}

impl DataType for FixedText {
    fn name(&self) -> &str {
        "X"
    }

    fn width(&self) -> usize {
        self.size
    }

    fn decode_bytes(&self, bytes: &[u8], ctx: &CodecContext<'_>) -> Result<Value, ConvertError> {
        check_width(bytes, self.size)?;
        let text = ctx.charset.decode(bytes);
        let trimmed = match self.align {
            Align::Left => text.trim_end_matches(self.pad),
            Align::Right => text.trim_start_matches(self.pad),
        };
        Ok(Value::Text(trimmed.to_string()))
    }

    fn encode_bytes(&self, value: &Value, ctx: &CodecContext<'_>) -> Result<Vec<u8>, ConvertError> {
        let encoded = ctx.charset.encode(&value.to_text());
        if encoded.len() > self.size {
            return Err(ConvertError::TooLong {
                len: encoded.len(),
                width: self.size,
            });
        }
        let fill = vec![ctx.charset.encode_char(self.pad); self.size - encoded.len()];
        Ok(match self.align {
            Align::Left => [encoded, fill].concat(),
            Align::Right => [fill, encoded].concat(),
        })
    }
}

// ==================== Fixed: numeric text ====================

#[derive(Debug)]
pub struct FixedNumeric {
    size: usize,
    scale: u32,
}

pub fn fixed_numeric(args: Args<'_>, _env: &FieldEnv<'_>) -> DataTypeResult {
    args.between(1, 2)?;
    Ok(Arc::new(FixedNumeric {
        size: args.size(0)?,
        scale: scale_arg(&args, 1)?,
    }))
}

impl DataType for FixedNumeric {
    fn name(&self) -> &str {
        "N"
    }

    fn width(&self) -> usize {
        self.size
    }

    fn decode_text(&self, text: &str, _ctx: &CodecContext<'_>) -> Result<Value, ConvertError> {
        let t = text.trim();
        if t.is_empty() {
            return Ok(Value::Null);
        }
        let bad = || ConvertError::NotANumber(t.to_string());
        let (negative, body) = if let Some(rest) = t.strip_prefix('-') {
            (true, rest)
        } else if let Some(rest) = t.strip_suffix('-') {
            (true, rest)
        } else {
            (false, t.trim_start_matches('+').trim_end_matches('+'))
        };
        let body = body.trim();
        if body.is_empty() || !body.chars().all(|c| c.is_ascii_digit() || c == '.') {
            return Err(bad());
        }
        let magnitude = if body.contains('.') {
            Decimal::from_str(body).map_err(|_| bad())?
        } else {
            let n: i128 = body.parse().map_err(|_| bad())?;
            Decimal::try_from_i128_with_scale(n, self.scale).map_err(|_| bad())?
        };
        Ok(Value::Decimal(if negative { -magnitude } else { magnitude }))
    }

    fn encode_text(&self, value: &Value, ctx: &CodecContext<'_>) -> Result<String, ConvertError> {
        if value.is_null() {
            return Ok(" ".repeat(self.size));
        }
        let v = rescaled(to_decimal(value)?, self.scale);
        let digits = v.mantissa().unsigned_abs().to_string();
        let numeric = ctx.numeric;
        let body = if numeric.required_decimal_point && self.scale > 0 {
            let scale = self.scale as usize;
            let padded = format!("{:0>width$}", digits, width = scale + 1);
            let (int, frac) = padded.split_at(padded.len() - scale);
            format!("{}.{}", int, frac)
        } else {
            digits
        };
        let sign = if v.is_sign_negative() && !v.is_zero() {
            "-"
        } else if numeric.required_plus_sign {
            "+"
        } else {
            ""
        };
        let len = sign.len() + body.len();
        if len > self.size {
            return Err(ConvertError::Overflow {
                value: v.to_string(),
                capacity: self.size,
            });
        }
        let fill = self.size - len;
        Ok(if numeric.fixed_sign_position {
            format!("{}{}{}", sign, "0".repeat(fill), body)
        } else {
            format!("{}{}{}", " ".repeat(fill), sign, body)
        })
    }
}

// ==================== Fixed: zoned / packed ====================

#[derive(Debug)]
pub struct Zoned {
    size: usize,
    scale: u32,
    family: SignFamily,
    signs: (Option<u8>, Option<u8>),
}

#[derive(Debug)]
pub struct Packed {
    size: usize,
    scale: u32,
    family: SignFamily,
    signs: (Option<u8>, Option<u8>),
}

fn sign_args(args: &Args<'_>) -> Result<(Option<u8>, Option<u8>), ConvertError> {
    let signs = (args.nibble(2)?, args.nibble(3)?);
    if signs.0.is_some() != signs.1.is_some() {
        return Err(ConvertError::Invalid(
            "sign nibbles come in pairs (positive, negative)".into(),
        ));
    }
    Ok(signs)
}

pub fn zoned(args: Args<'_>, env: &FieldEnv<'_>) -> DataTypeResult {
    args.between(1, 4)?;
    let size = args.size(0)?;
    decimal::check_field_digits(size)?;
    Ok(Arc::new(Zoned {
        size,
        scale: scale_arg(&args, 1)?,
        family: SignFamily::detect(env.charset)?,
        signs: sign_args(&args)?,
    }))
}

pub fn packed(args: Args<'_>, env: &FieldEnv<'_>) -> DataTypeResult {
    args.between(1, 4)?;
    let size = args.size(0)?;
    decimal::check_field_digits(decimal::packed_digits(size))?;
    Ok(Arc::new(Packed {
        size,
        scale: scale_arg(&args, 1)?,
        family: SignFamily::detect(env.charset)?,
        signs: sign_args(&args)?,
    }))
}

impl Zoned {
    fn nibbles(&self, ctx: &CodecContext<'_>) -> SignNibbles {
        let n = ctx.numeric;
        SignNibbles::resolve(
            self.family,
            DecimalKind::Zoned,
            self.signs,
            (n.positive_zone_sign_nibble, n.negative_zone_sign_nibble),
        )
    }
}

impl Packed {
    fn nibbles(&self, ctx: &CodecContext<'_>) -> SignNibbles {
        let n = ctx.numeric;
        SignNibbles::resolve(
            self.family,
            DecimalKind::Packed,
            self.signs,
            (n.positive_pack_sign_nibble, n.negative_pack_sign_nibble),
        )
    }
}

impl DataType for Zoned {
    fn name(&self) -> &str {
        "SZ"
    }

    fn width(&self) -> usize {
        self.size
    }

    fn decode_bytes(&self, bytes: &[u8], ctx: &CodecContext<'_>) -> Result<Value, ConvertError> {
        check_width(bytes, self.size)?;
        if is_blank(bytes, ctx) {
            return Ok(Value::Null);
        }
        let v = decimal::decode_zoned(bytes, self.scale, self.family, self.nibbles(ctx))?;
        Ok(Value::Decimal(v))
    }

    fn encode_bytes(&self, value: &Value, ctx: &CodecContext<'_>) -> Result<Vec<u8>, ConvertError> {
        if value.is_null() {
            return Ok(blank(self.size, ctx));
        }
        decimal::encode_zoned(
            to_decimal(value)?,
            self.scale,
            self.size,
            self.family,
            self.nibbles(ctx),
        )
    }
}

impl DataType for Packed {
    fn name(&self) -> &str {
        "SP"
    }

    fn width(&self) -> usize {
        self.size
    }

    fn decode_bytes(&self, bytes: &[u8], ctx: &CodecContext<'_>) -> Result<Value, ConvertError> {
        check_width(bytes, self.size)?;
        if is_blank(bytes, ctx) {
            return Ok(Value::Null);
        }
        let v = decimal::decode_packed(bytes, self.scale, self.nibbles(ctx))?;
        Ok(Value::Decimal(v))
    }

    fn encode_bytes(&self, value: &Value, ctx: &CodecContext<'_>) -> Result<Vec<u8>, ConvertError> {
        if value.is_null() {
            return Ok(blank(self.size, ctx));
        }
        decimal::encode_packed(to_decimal(value)?, self.scale, self.size, self.nibbles(ctx))
    }
}

// ==================== Fixed: binary ====================

/// Big-endian two's-complement integer.
#[derive(Debug)]
pub struct BinaryInt {
    size: usize,
    scale: u32,
}

pub fn binary_int(args: Args<'_>, _env: &FieldEnv<'_>) -> DataTypeResult {
    args.between(1, 2)?;
    let size = args.size(0)?;
    if ![1, 2, 4, 8].contains(&size) {
        return Err(ConvertError::Invalid(format!(
            "BI size must be 1, 2, 4 or 8 bytes, got {}",
            size
        )));
    }
    Ok(Arc::new(BinaryInt {
        size,
        scale: scale_arg(&args, 1)?,
    }))
}

impl DataType for BinaryInt {
    fn name(&self) -> &str {
        "BI"
    }

    fn width(&self) -> usize {
        self.size
    }

    fn decode_bytes(&self, bytes: &[u8], _ctx: &CodecContext<'_>) -> Result<Value, ConvertError> {
        check_width(bytes, self.size)?;
        let n = BigEndian::read_int(bytes, self.size);
        Ok(Value::Decimal(Decimal::new(n, self.scale)))
    }

    fn encode_bytes(&self, value: &Value, _ctx: &CodecContext<'_>) -> Result<Vec<u8>, ConvertError> {
        let v = if value.is_null() {
            Decimal::ZERO
        } else {
            rescaled(to_decimal(value)?, self.scale)
        };
        let bits = (self.size * 8) as u32;
        let (lo, hi) = (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1);
        let n = Some(v.mantissa())
            .filter(|m| (lo..=hi).contains(m))
            .and_then(|m| i64::try_from(m).ok())
            .ok_or_else(|| ConvertError::Overflow {
            value: v.to_string(),
            capacity: self.size,
        })?;
        let mut out = vec![0u8; self.size];
        BigEndian::write_int(&mut out, n, self.size);
        Ok(out)
    }
}

#[derive(Debug)]
pub struct RawBytes {
    size: usize,
}

pub fn raw_bytes(args: Args<'_>, _env: &FieldEnv<'_>) -> DataTypeResult {
    args.between(1, 1)?;
    Ok(Arc::new(RawBytes { size: args.size(0)? }))
}

impl DataType for RawBytes {
    fn name(&self) -> &str {
        "B"
    }

    fn width(&self) -> usize {
        self.size
    }

    fn decode_bytes(&self, bytes: &[u8], _ctx: &CodecContext<'_>) -> Result<Value, ConvertError> {
        check_width(bytes, self.size)?;
        Ok(Value::Bytes(bytes.to_vec()))
    }

    fn encode_bytes(&self, value: &Value, _ctx: &CodecContext<'_>) -> Result<Vec<u8>, ConvertError> {
        let mut out = match value {
            Value::Null => Vec::new(),
            Value::Bytes(b) => b.clone(),
            Value::Text(t) => hex::decode(t)
                .map_err(|e| ConvertError::Invalid(format!("expected bytes or hex text: {}", e)))?,
            other => {
                return Err(ConvertError::Invalid(format!(
                    "expected bytes, got '{}'",
                    other
                )))
            }
        };
        if out.len() > self.size {
            return Err(ConvertError::TooLong {
                len: out.len(),
                width: self.size,
            });
        }
        out.resize(self.size, 0);
        Ok(out)
    }
}

// ==================== Variable ====================

#[derive(Debug)]
pub struct VarText {
    max: Option<usize>,
}

pub fn var_text(args: Args<'_>, _env: &FieldEnv<'_>) -> DataTypeResult {
    args.at_most(1)?;
    Ok(Arc::new(VarText {
        max: args.usize(0)?,
    }))
}

impl DataType for VarText {
    fn name(&self) -> &str {
        "X"
    }

    fn width(&self) -> usize {
        1
    }

    fn decode_text(&self, text: &str, _ctx: &CodecContext<'_>) -> Result<Value, ConvertError> {
        self.check(text)?;
        Ok(Value::Text(text.to_string()))
    }

    fn encode_text(&self, value: &Value, _ctx: &CodecContext<'_>) -> Result<String, ConvertError> {
        let text = value.to_text();
        self.check(&text)?;
        Ok(text)
    }
}

impl VarText {
    fn check(&self, text: &str) -> Result<(), ConvertError> {
        let len = text.chars().count();
        match self.max {
            Some(max) if len > max => Err(ConvertError::TooLong { len, width: max }),
            _ => Ok(()),
        }
    }
}

#[derive(Debug)]
pub struct VarNumeric {
    scale: Option<u32>,
}

pub fn var_numeric(args: Args<'_>, _env: &FieldEnv<'_>) -> DataTypeResult {
    args.at_most(1)?;
    let scale = match args.usize(0)? {
        Some(_) => Some(scale_arg(&args, 0)?),
        None => None,
    };
    Ok(Arc::new(VarNumeric { scale }))
}

impl DataType for VarNumeric {
    fn name(&self) -> &str {
        "N"
    }

    fn width(&self) -> usize {
        1
    }

    fn decode_text(&self, text: &str, _ctx: &CodecContext<'_>) -> Result<Value, ConvertError> {
        let t = text.trim();
        if t.is_empty() {
            return Ok(Value::Null);
        }
        let v = Decimal::from_str(t.trim_start_matches('+'))
            .map_err(|_| ConvertError::NotANumber(t.to_string()))?;
        Ok(Value::Decimal(v))
    }

    fn encode_text(&self, value: &Value, _ctx: &CodecContext<'_>) -> Result<String, ConvertError> {
        if value.is_empty() {
            return Ok(String::new());
        }
        let v = to_decimal(value)?;
        Ok(match self.scale {
            Some(s) => rescaled(v, s).to_string(),
            None => v.to_string(),
        })
    }
}

#[derive(Debug)]
pub struct HexText;

pub fn hex_text(args: Args<'_>, _env: &FieldEnv<'_>) -> DataTypeResult {
    args.at_most(0)?;
    Ok(Arc::new(HexText))
}

impl DataType for HexText {
    fn name(&self) -> &str {
        "HEX"
    }

    fn width(&self) -> usize {
        1
    }

    fn decode_text(&self, text: &str, _ctx: &CodecContext<'_>) -> Result<Value, ConvertError> {
        if text.is_empty() {
            return Ok(Value::Null);
        }
        hex::decode(text)
            .map(Value::Bytes)
            .map_err(|e| ConvertError::Invalid(format!("invalid hex text '{}': {}", text, e)))
    }

    fn encode_text(&self, value: &Value, _ctx: &CodecContext<'_>) -> Result<String, ConvertError> {
        match value {
            Value::Null => Ok(String::new()),
            Value::Bytes(b) => Ok(hex::encode_upper(b)),
            Value::Text(t) if hex::decode(t).is_ok() => Ok(t.to_ascii_uppercase()),
            other => Err(ConvertError::Invalid(format!("expected bytes, got '{}'", other))),
        }
    }
}
