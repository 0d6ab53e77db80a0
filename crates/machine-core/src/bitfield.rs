//! Bit-field extraction and insertion under either indexing direction.
//!
//! Offsets count from the least significant bit when `index_from_right` is
//! set and from the most significant bit otherwise. All shifts go through
//! [`shl`]/[`shr`], which map a shift of 64 or more to 0.

use crate::convert::mask;
use crate::{SimError, SimResult};

/// Left shift where shifting by 64 or more yields 0.
#[must_use]
pub const fn shl(value: u64, amount: u32) -> u64 {
    if amount >= 64 {
        0
    } else {
        value << amount
    }
}

/// Logical right shift where shifting by 64 or more yields 0.
#[must_use]
pub const fn shr(value: u64, amount: u32) -> u64 {
    if amount >= 64 {
        0
    } else {
        value >> amount
    }
}

/// Checks that `num_bits` bits starting at `start` lie inside `width` bits.
///
/// # Errors
///
/// Returns [`SimError::InvalidArgument`] for an empty or out-of-bounds field.
pub fn check_field(start: u32, num_bits: u32, width: u32) -> SimResult<()> {
    if num_bits == 0 || u64::from(start) + u64::from(num_bits) > u64::from(width) {
        return Err(SimError::invalid(format!(
            "{num_bits} bits at offset {start} do not fit in {width} bits"
        )));
    }
    Ok(())
}

/// Offset of the field's first bit counted from the most significant end.
#[must_use]
pub const fn offset_from_left(
    start: u32,
    num_bits: u32,
    width: u32,
    index_from_right: bool,
) -> u32 {
    if index_from_right {
        width - start - num_bits
    } else {
        start
    }
}

/// Offset of the field's lowest bit counted from the least significant end.
#[must_use]
pub const fn offset_from_right(
    start: u32,
    num_bits: u32,
    width: u32,
    index_from_right: bool,
) -> u32 {
    if index_from_right {
        start
    } else {
        width - start - num_bits
    }
}

/// Unsigned contents of the field. The field must satisfy [`check_field`].
#[must_use]
pub const fn extract(
    bits: u64,
    start: u32,
    num_bits: u32,
    width: u32,
    index_from_right: bool,
) -> u64 {
    let aligned = shl(bits, 64 - width);
    let left_offset = offset_from_left(start, num_bits, width, index_from_right);
    shr(shl(aligned, left_offset), 64 - num_bits)
}

/// `bits` with the field replaced by the low `num_bits` bits of `field`.
/// The field must satisfy [`check_field`].
///
/// The register is first left-aligned in the 64-bit frame; the parts above
/// and below the field are kept, the field is or-ed in and the result is
/// shifted back down.
#[must_use]
pub const fn insert(
    bits: u64,
    field: u64,
    start: u32,
    num_bits: u32,
    width: u32,
    index_from_right: bool,
) -> u64 {
    let align = 64 - width;
    let aligned = shl(bits, align);
    let left_offset_shift = offset_from_left(start, num_bits, width, index_from_right);
    let right_offset_shift = 64 - left_offset_shift - num_bits;

    let left_part = shl(shr(aligned, 64 - left_offset_shift), 64 - left_offset_shift);
    let right_part = shr(shl(aligned, 64 - right_offset_shift), 64 - right_offset_shift);
    let placed = shl(field & mask(num_bits), right_offset_shift);

    shr(left_part | placed | right_part, align)
}
