//! Zoned and packed decimal codecs.
//!
//! Zoned: one digit per byte, the digit in the low nibble and the zone in the high
//! nibble; the last byte's high nibble carries the sign. Packed: two digits per
//! byte; the last byte's low nibble carries the sign.
//!
//! The zone and default sign nibbles depend on the charset family, detected from how
//! the charset encodes `'1'`: `0x31` is ASCII-like (zone 0x3), `0xF1` is EBCDIC-like
//! (zone 0xF).

use crate::charset::Charset;
use crate::error::ConvertError;
use rust_decimal::{Decimal, RoundingStrategy};

/// Most significant digits an encoded value may carry.
pub const MAX_DIGITS: usize = 18;

/// Widest zoned or packed field, in digits, that always decodes into a `Decimal`.
pub const MAX_FIELD_DIGITS: usize = 28;

/// Rejects a field whose digit capacity exceeds [`MAX_FIELD_DIGITS`].
pub fn check_field_digits(digits: usize) -> Result<(), ConvertError> {
    if digits > MAX_FIELD_DIGITS {
        return Err(ConvertError::Invalid(format!(
            "{} digit(s) exceed the {} a decimal field can hold",
            digits, MAX_FIELD_DIGITS
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignFamily {
    Ascii,
    Ebcdic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecimalKind {
    Zoned,
    Packed,
}

impl DecimalKind {
    fn label(self) -> &'static str {
        match self {
            DecimalKind::Zoned => "zone",
            DecimalKind::Packed => "pack",
        }
    }
}

impl SignFamily {
    pub fn detect(charset: Charset) -> Result<SignFamily, ConvertError> {
        match charset.byte_for('1') {
            Some(0x31) => Ok(SignFamily::Ascii),
            Some(0xF1) => Ok(SignFamily::Ebcdic),
            other => Err(ConvertError::Invalid(format!(
                "charset {} has no known sign-nibble family ('1' encodes as {:?})",
                charset.name(),
                other
            ))),
        }
    }

    /// High nibble of an unsigned zoned digit; also the unsigned sign nibble.
    pub fn zone(self) -> u8 {
        match self {
            SignFamily::Ascii => 0x3,
            SignFamily::Ebcdic => 0xF,
        }
    }

    /// Default (positive, negative) sign nibbles.
    pub fn default_signs(self, _kind: DecimalKind) -> (u8, u8) {
        match self {
            SignFamily::Ascii => (0x3, 0x7),
            SignFamily::Ebcdic => (0xC, 0xD),
        }
    }

    fn accepts_zone(self, nibble: u8) -> bool {
        nibble == self.zone() || (self == SignFamily::Ebcdic && nibble == 0x0)
    }
}

/// Fully resolved sign nibbles for one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignNibbles {
    pub positive: u8,
    pub negative: u8,
    pub unsigned: u8,
}

impl SignNibbles {
    /// `field` > `file` (directive or runtime default) > family default.
    pub fn resolve(
        family: SignFamily,
        kind: DecimalKind,
        field: (Option<u8>, Option<u8>),
        file: (Option<u8>, Option<u8>),
    ) -> SignNibbles {
        let (pos, neg) = family.default_signs(kind);
        SignNibbles {
            positive: field.0.or(file.0).unwrap_or(pos),
            negative: field.1.or(file.1).unwrap_or(neg),
            unsigned: family.zone(),
        }
    }

    fn is_negative(&self, nibble: u8, kind: DecimalKind) -> Result<bool, ConvertError> {
        if nibble == self.negative {
            Ok(true)
        } else if nibble == self.positive || nibble == self.unsigned {
            Ok(false)
        } else {
            Err(ConvertError::InvalidSign {
                kind: kind.label(),
                nibble,
            })
        }
    }
}

/// Digits of `value` rescaled to `scale`, left-padded with zeros to `capacity`.
fn digits_of(value: Decimal, scale: u32, capacity: usize) -> Result<(bool, Vec<u8>), ConvertError> {
    let mut v = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    v.rescale(scale);
    let mantissa = v.mantissa();
    let text = mantissa.unsigned_abs().to_string();
    let significant = text.trim_start_matches('0').len();
    if significant > MAX_DIGITS {
        return Err(ConvertError::TooManyDigits(significant));
    }
    if significant > capacity {
        return Err(ConvertError::Overflow {
            value: value.to_string(),
            capacity,
        });
    }
    let mut digits = vec![0u8; capacity];
    let tail = &text.as_bytes()[text.len() - significant..];
    for (slot, d) in digits[capacity - significant..].iter_mut().zip(tail) {
        *slot = d - b'0';
    }
    Ok((mantissa < 0, digits))
}

fn from_digits(digits: &[u8], negative: bool, scale: u32) -> Result<Decimal, ConvertError> {
    let overflow = || ConvertError::Overflow {
        value: digits.iter().map(|&d| char::from(b'0' + d)).collect(),
        capacity: MAX_FIELD_DIGITS,
    };
    let n = digits
        .iter()
        .try_fold(0i128, |acc, &d| acc.checked_mul(10)?.checked_add(i128::from(d)))
        .ok_or_else(overflow)?;
    Decimal::try_from_i128_with_scale(if negative { -n } else { n }, scale).map_err(|_| overflow())
}

pub fn encode_zoned(
    value: Decimal,
    scale: u32,
    size: usize,
    family: SignFamily,
    signs: SignNibbles,
) -> Result<Vec<u8>, ConvertError> {
    let (negative, digits) = digits_of(value, scale, size)?;
    let zone = family.zone();
    let mut out: Vec<u8> = digits.iter().map(|d| (zone << 4) | d).collect();
    let sign = if negative { signs.negative } else { signs.positive };
    if let Some(last) = out.last_mut() {
        *last = (sign << 4) | (*last & 0x0F);
    }
    Ok(out)
}

pub fn decode_zoned(
    bytes: &[u8],
    scale: u32,
    family: SignFamily,
    signs: SignNibbles,
) -> Result<Decimal, ConvertError> {
    let Some((&last, body)) = bytes.split_last() else {
        return Err(ConvertError::WrongWidth { expected: 1, actual: 0 });
    };
    let mut digits = Vec::with_capacity(bytes.len());
    for &b in body {
        if !family.accepts_zone(b >> 4) {
            return Err(ConvertError::InvalidSign {
                kind: DecimalKind::Zoned.label(),
                nibble: b >> 4,
            });
        }
        digits.push(digit(b & 0x0F)?);
    }
    digits.push(digit(last & 0x0F)?);
    let negative = signs.is_negative(last >> 4, DecimalKind::Zoned)?;
    from_digits(&digits, negative, scale)
}

/// Digit capacity of a packed field of `size` bytes.
pub fn packed_digits(size: usize) -> usize {
    size * 2 - 1
}

pub fn encode_packed(
    value: Decimal,
    scale: u32,
    size: usize,
    signs: SignNibbles,
) -> Result<Vec<u8>, ConvertError> {
    let (negative, digits) = digits_of(value, scale, packed_digits(size))?;
    let sign = if negative { signs.negative } else { signs.positive };
    let mut nibbles = digits;
    nibbles.push(sign);
    Ok(nibbles.chunks(2).map(|p| (p[0] << 4) | p[1]).collect())
}

pub fn decode_packed(bytes: &[u8], scale: u32, signs: SignNibbles) -> Result<Decimal, ConvertError> {
    if bytes.is_empty() {
        return Err(ConvertError::WrongWidth { expected: 1, actual: 0 });
    }
    let mut digits = Vec::with_capacity(bytes.len() * 2);
    for &b in bytes {
        digits.push(digit(b >> 4)?);
        digits.push(b & 0x0F);
    }
    let sign = digits.pop().unwrap_or(0);
    if let Some(&bad) = digits.iter().find(|&&d| d > 9) {
        return Err(ConvertError::InvalidDigit(bad));
    }
    let negative = signs.is_negative(sign, DecimalKind::Packed)?;
    from_digits(&digits, negative, scale)
}

fn digit(nibble: u8) -> Result<u8, ConvertError> {
    if nibble > 9 {
        Err(ConvertError::InvalidDigit(nibble))
    } else {
        Ok(nibble)
    }
}
