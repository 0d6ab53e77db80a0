//! Width-bounded integer arithmetic with overflow and carry detection.
//!
//! Operands are bit patterns of `width` bits. Every operation works in
//! 128-bit intermediates so no input can overflow the host integer.

use crate::convert::{mask, max_value, min_value, sign_extend};

/// Flag outputs of one arithmetic step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArithFlags {
    /// The two's-complement result does not fit the signed range.
    pub overflow: bool,
    /// The unsigned result does not fit the width (a borrow for subtraction).
    pub carry: bool,
}

/// Result bits and flags of one arithmetic step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArithResult {
    /// Low `width` bits of the result.
    pub bits: u64,
    /// Flag outputs.
    pub flags: ArithFlags,
}

fn signed_overflow(value: i128, width: u32) -> bool {
    value < min_value(width) || value > max_value(width) / 2
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
const fn low_bits(value: i128, width: u32) -> u64 {
    (value as u64) & mask(width)
}

fn operands(a: u64, b: u64, width: u32) -> (u64, u64, i128, i128) {
    let ua = a & mask(width);
    let ub = b & mask(width);
    (
        ua,
        ub,
        i128::from(sign_extend(ua, width)),
        i128::from(sign_extend(ub, width)),
    )
}

/// `a + b`.
#[must_use]
pub fn add(a: u64, b: u64, width: u32) -> ArithResult {
    let (ua, ub, sa, sb) = operands(a, b, width);
    let unsigned = i128::from(ua) + i128::from(ub);
    let signed = sa + sb;
    ArithResult {
        bits: low_bits(unsigned, width),
        flags: ArithFlags {
            overflow: signed_overflow(signed, width),
            carry: unsigned > max_value(width),
        },
    }
}

/// `a - b`; carry reports a borrow.
#[must_use]
pub fn subtract(a: u64, b: u64, width: u32) -> ArithResult {
    let (ua, ub, sa, sb) = operands(a, b, width);
    let signed = sa - sb;
    ArithResult {
        bits: low_bits(i128::from(ua) - i128::from(ub), width),
        flags: ArithFlags {
            overflow: signed_overflow(signed, width),
            carry: ua < ub,
        },
    }
}

/// `a * b`; overflow compares the signed product and carry the unsigned one.
#[must_use]
pub fn multiply(a: u64, b: u64, width: u32) -> ArithResult {
    let (ua, ub, sa, sb) = operands(a, b, width);
    let signed = sa * sb;
    let unsigned = u128::from(ua) * u128::from(ub);
    ArithResult {
        bits: low_bits(signed, width),
        flags: ArithFlags {
            overflow: signed_overflow(signed, width),
            carry: unsigned > u128::from(mask(width)),
        },
    }
}

/// Signed `a / b` truncating toward zero, or `None` when `b` is zero.
///
/// The only overflowing quotient is `MIN / -1`. Carry is always clear.
#[must_use]
pub fn divide(a: u64, b: u64, width: u32) -> Option<ArithResult> {
    let (_, _, sa, sb) = operands(a, b, width);
    if sb == 0 {
        return None;
    }
    let quotient = sa / sb;
    Some(ArithResult {
        bits: low_bits(quotient, width),
        flags: ArithFlags {
            overflow: signed_overflow(quotient, width),
            carry: false,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::{add, divide, multiply, subtract, ArithFlags};
    use rstest::rstest;

    #[rstest]
    #[case(7, 1, 4, 0b1000, true, false)]
    #[case(0b1000, 1, 4, 0b1001, false, false)]
    #[case(0b1111, 1, 4, 0, false, true)]
    #[case(0b1000, 0b1000, 4, 0, true, true)]
    #[case(u64::MAX, 1, 64, 0, false, true)]
    #[case(i64::MAX as u64, 1, 64, 1 << 63, true, false)]
    fn add_reports_signed_overflow_and_unsigned_carry(
        #[case] a: u64,
        #[case] b: u64,
        #[case] width: u32,
        #[case] bits: u64,
        #[case] overflow: bool,
        #[case] carry: bool,
    ) {
        let result = add(a, b, width);
        assert_eq!(result.bits, bits);
        assert_eq!(result.flags, ArithFlags { overflow, carry });
    }

    #[test]
    fn subtract_carry_is_a_borrow() {
        let result = subtract(1, 2, 8);
        assert_eq!(result.bits, 0xFF);
        assert!(result.flags.carry);
        assert!(!result.flags.overflow);

        let result = subtract(0x80, 1, 8);
        assert_eq!(result.bits, 0x7F);
        assert!(result.flags.overflow);
        assert!(!result.flags.carry);
    }

    #[test]
    fn multiply_flags_track_both_readings() {
        // -1 * -1 = 1 signed, 255 * 255 unsigned.
        let result = multiply(0xFF, 0xFF, 8);
        assert_eq!(result.bits, 1);
        assert!(!result.flags.overflow);
        assert!(result.flags.carry);

        let result = multiply(64, 2, 8);
        assert_eq!(result.bits, 0x80);
        assert!(result.flags.overflow);
        assert!(!result.flags.carry);

        let result = multiply(u64::MAX, u64::MAX, 64);
        assert_eq!(result.bits, 1);
        assert!(result.flags.carry);
    }

    #[test]
    fn divide_truncates_toward_zero_and_flags_min_over_minus_one() {
        // -7 / 2 = -3
        let result = divide(0xF9, 2, 8).unwrap();
        assert_eq!(result.bits, 0xFD);
        assert_eq!(result.flags, ArithFlags::default());

        let result = divide(0x80, 0xFF, 8).unwrap();
        assert_eq!(result.bits, 0x80);
        assert!(result.flags.overflow);

        assert!(divide(5, 0, 8).is_none());
        assert!(divide(i64::MIN as u64, u64::MAX, 64).unwrap().flags.overflow);
    }
}
