//! Numeric conversions between 64-bit values, bit patterns and display strings.
//!
//! Every formatter masks the value to `width` bits first, so the output never
//! depends on bits outside the register or cell being displayed. Widths above
//! 64 are treated as 64.

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]

use crate::{SimError, SimResult};

/// Glyph emitted by [`to_ascii_string`] for control characters (`< 32`).
pub const CONTROL_PLACEHOLDER: char = '\u{00B7}';

/// Largest number of bytes [`bytes_to_long`] and [`long_to_bytes`] accept.
pub const MAX_LONG_BYTES: usize = 8;

/// All-ones mask of `width` low bits.
#[must_use]
pub const fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1_u64 << width) - 1
    }
}

/// Low `width` bits of `value`, read as an unsigned number.
#[must_use]
pub const fn to_unsigned(value: i64, width: u32) -> u64 {
    value as u64 & mask(width)
}

/// Low `width` bits of `bits`, read as a two's-complement number.
#[must_use]
pub const fn sign_extend(bits: u64, width: u32) -> i64 {
    match width {
        0 => 0,
        64.. => bits as i64,
        _ => {
            let shift = 64 - width;
            ((bits << shift) as i64) >> shift
        }
    }
}

/// Smallest value accepted for a `width`-bit register: `-2^(width-1)`.
#[must_use]
pub const fn min_value(width: u32) -> i128 {
    if width == 0 {
        0
    } else {
        -(1_i128 << (width - 1))
    }
}

/// Largest value accepted for a `width`-bit register: `2^width - 1`.
#[must_use]
pub const fn max_value(width: u32) -> i128 {
    (1_i128 << width) - 1
}

/// Returns `true` when `value` lies in `[-2^(width-1), 2^width - 1]`.
///
/// The envelope covers both the signed and the unsigned reading of a
/// `width`-bit pattern.
#[must_use]
pub const fn fits_in_bits(value: i128, width: u32) -> bool {
    value >= min_value(width) && value <= max_value(width)
}

/// Binary digits of the low `width` bits, exactly `width` characters long.
#[must_use]
pub fn to_twos_complement_string(value: i64, width: u32) -> String {
    let width = width.min(64);
    if width == 0 {
        return String::new();
    }
    format!("{:0width$b}", to_unsigned(value, width), width = width as usize)
}

/// Uppercase hex digits of the low `width` bits, padded to `ceil(width / 4)`.
#[must_use]
pub fn to_hex_string(value: i64, width: u32) -> String {
    let width = width.min(64);
    let digits = width.div_ceil(4) as usize;
    format!("{:0digits$X}", to_unsigned(value, width))
}

/// Decimal rendering of the low `width` bits read as unsigned.
#[must_use]
pub fn to_unsigned_decimal_string(value: i64, width: u32) -> String {
    to_unsigned(value, width.min(64)).to_string()
}

/// Decimal rendering of the low `width` bits read as two's complement.
#[must_use]
pub fn to_signed_decimal_string(value: i64, width: u32) -> String {
    let width = width.min(64);
    sign_extend(to_unsigned(value, width), width).to_string()
}

/// One character per 8-bit group of the low `width` bits, most significant
/// group first. Groups below 32 render as [`CONTROL_PLACEHOLDER`].
#[must_use]
pub fn to_ascii_string(value: i64, width: u32) -> String {
    let width = width.min(64);
    let bits = to_unsigned(value, width);
    (0..width.div_ceil(8))
        .rev()
        .map(|group| {
            let byte = (bits >> (group * 8)) as u8;
            if byte < 32 {
                CONTROL_PLACEHOLDER
            } else {
                char::from(byte)
            }
        })
        .collect()
}

/// One UTF-16 code unit per 16-bit group of the low `width` bits, most
/// significant group first. Unpaired surrogates decode to U+FFFD.
#[must_use]
pub fn to_16bit_word_string(value: i64, width: u32) -> String {
    let width = width.min(64);
    let bits = to_unsigned(value, width);
    let units = (0..width.div_ceil(16))
        .rev()
        .map(|group| (bits >> (group * 16)) as u16);
    char::decode_utf16(units)
        .map(|unit| unit.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Parses a numeric literal.
///
/// Grammar, after trimming whitespace:
/// - `'c` (optionally `'c'`) yields the code point of `c`;
/// - otherwise an optional `+`/`-`, then `0b` (binary), `0x` (hex), a bare
///   leading `0` (octal) or plain decimal digits.
///
/// Magnitudes up to `u64::MAX` are accepted and wrap into the two's-complement
/// `i64`, so `0xFFFFFFFFFFFFFFFF` is `-1`. Callers re-mask to their width.
///
/// # Errors
///
/// Returns [`SimError::Format`] with the offending text when the digits are
/// not valid in the selected base or the magnitude does not fit 64 bits.
pub fn parse_long(text: &str) -> SimResult<i64> {
    let trimmed = text.trim();
    let format_error = |offending: &str| SimError::Format {
        text: offending.to_owned(),
    };

    if let Some(quoted) = trimmed.strip_prefix('\'') {
        let mut chars = quoted.chars();
        return match (chars.next(), chars.as_str()) {
            (Some(c), "" | "'") => Ok(i64::from(u32::from(c))),
            _ => Err(format_error(trimmed)),
        };
    }

    let (negative, unsigned) = if let Some(rest) = trimmed.strip_prefix('-') {
        (true, rest)
    } else if let Some(rest) = trimmed.strip_prefix('+') {
        (false, rest)
    } else {
        (false, trimmed)
    };

    let (radix, digits) = if let Some(rest) = strip_prefix_ignore_case(unsigned, "0b") {
        (2, rest)
    } else if let Some(rest) = strip_prefix_ignore_case(unsigned, "0x") {
        (16, rest)
    } else if let Some(rest) = unsigned.strip_prefix('0').filter(|rest| !rest.is_empty()) {
        (8, rest)
    } else {
        (10, unsigned)
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return Err(format_error(trimmed));
    }
    let magnitude = u64::from_str_radix(digits, radix).map_err(|_| format_error(trimmed))?;

    if negative {
        if magnitude > 1_u64 << 63 {
            return Err(format_error(trimmed));
        }
        Ok((magnitude as i64).wrapping_neg())
    } else {
        Ok(magnitude as i64)
    }
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &text[prefix.len()..])
}

/// Big-endian two's-complement bytes to a sign-extended `i64`.
///
/// An empty slice is zero.
///
/// # Errors
///
/// Returns [`SimError::InvalidArgument`] for more than eight bytes.
pub fn bytes_to_long(bytes: &[u8]) -> SimResult<i64> {
    if bytes.len() > MAX_LONG_BYTES {
        return Err(SimError::invalid(format!(
            "{} bytes do not fit in a 64-bit value",
            bytes.len()
        )));
    }
    let seed: i64 = match bytes.first() {
        Some(first) if first & 0x80 != 0 => -1,
        _ => 0,
    };
    Ok(bytes
        .iter()
        .fold(seed, |acc, byte| (acc << 8) | i64::from(*byte)))
}

/// The low `num_bytes` bytes of `value`, big-endian.
///
/// # Errors
///
/// Returns [`SimError::InvalidArgument`] for more than eight bytes.
pub fn long_to_bytes(value: i64, num_bytes: usize) -> SimResult<Vec<u8>> {
    if num_bytes > MAX_LONG_BYTES {
        return Err(SimError::invalid(format!(
            "cannot encode a 64-bit value in {num_bytes} bytes"
        )));
    }
    Ok(value.to_be_bytes()[MAX_LONG_BYTES - num_bytes..].to_vec())
}
