//! Bit/byte quantities used to express widths and sizes.

use crate::{SimError, SimResult};

/// Bits per byte.
pub const BITS_PER_BYTE: u64 = 8;

/// Unit attached to a [`BitQuantity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Unit {
    /// Single bit.
    Bit,
    /// Eight bits.
    Byte,
}

impl Unit {
    /// Number of bits in one unit.
    #[must_use]
    pub const fn bits(self) -> u64 {
        match self {
            Self::Bit => 1,
            Self::Byte => BITS_PER_BYTE,
        }
    }
}

/// Non-negative magnitude tagged with a unit.
///
/// Magnitudes are bounded so that the equivalent bit count always fits in a
/// `u64`; arithmetic between quantities of different units converts the right
/// operand into the left operand's unit first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BitQuantity {
    magnitude: u64,
    unit: Unit,
}

impl BitQuantity {
    /// Creates a quantity from a possibly negative magnitude.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidArgument`] for negative magnitudes or byte
    /// magnitudes whose bit count does not fit in 64 bits.
    pub fn new(magnitude: i64, unit: Unit) -> SimResult<Self> {
        let magnitude = u64::try_from(magnitude)
            .map_err(|_| SimError::invalid(format!("negative quantity {magnitude}")))?;
        Self::from_magnitude(magnitude, unit)
    }

    /// Creates a quantity from an unsigned magnitude.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidArgument`] when the bit count overflows.
    pub fn from_magnitude(magnitude: u64, unit: Unit) -> SimResult<Self> {
        if magnitude.checked_mul(unit.bits()).is_none() {
            return Err(SimError::invalid(format!(
                "{magnitude} bytes exceed the representable bit count"
            )));
        }
        Ok(Self { magnitude, unit })
    }

    /// A quantity in bits.
    #[must_use]
    pub const fn bits(magnitude: u64) -> Self {
        Self {
            magnitude,
            unit: Unit::Bit,
        }
    }

    /// A quantity in bytes, saturated to the largest representable count.
    #[must_use]
    pub const fn bytes(magnitude: u64) -> Self {
        let max = u64::MAX / BITS_PER_BYTE;
        Self {
            magnitude: if magnitude > max { max } else { magnitude },
            unit: Unit::Byte,
        }
    }

    /// Magnitude in this quantity's own unit.
    #[must_use]
    pub const fn magnitude(self) -> u64 {
        self.magnitude
    }

    /// Unit of this quantity.
    #[must_use]
    pub const fn unit(self) -> Unit {
        self.unit
    }

    /// Total number of bits represented.
    #[must_use]
    pub const fn total_bits(self) -> u64 {
        self.magnitude * self.unit.bits()
    }

    /// Smallest quantity in `target` units that can hold this quantity.
    ///
    /// Widening, not an identity: 10 bits convert to 2 bytes, which convert
    /// back to 16 bits.
    #[must_use]
    pub const fn convert(self, target: Unit) -> Self {
        let bits = self.total_bits();
        let magnitude = match target {
            Unit::Bit => bits,
            Unit::Byte => bits.div_ceil(BITS_PER_BYTE),
        };
        Self {
            magnitude,
            unit: target,
        }
    }

    /// All-ones pattern covering this quantity's bits, saturated at 64.
    #[must_use]
    pub const fn mask(self) -> u64 {
        let bits = self.total_bits();
        if bits >= 64 {
            u64::MAX
        } else {
            (1_u64 << bits) - 1
        }
    }

    const fn coerce(self, rhs: Self) -> u64 {
        rhs.convert(self.unit).magnitude
    }

    fn with(self, magnitude: Option<u64>, op: &str) -> SimResult<Self> {
        let magnitude = magnitude
            .ok_or_else(|| SimError::invalid(format!("quantity {op} out of range")))?;
        Self::from_magnitude(magnitude, self.unit)
    }

    /// Sum, in this quantity's unit.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidArgument`] on overflow.
    pub fn checked_add(self, rhs: Self) -> SimResult<Self> {
        self.with(self.magnitude.checked_add(self.coerce(rhs)), "sum")
    }

    /// Difference, in this quantity's unit.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidArgument`] when the result would be negative.
    pub fn checked_sub(self, rhs: Self) -> SimResult<Self> {
        self.with(self.magnitude.checked_sub(self.coerce(rhs)), "difference")
    }

    /// Product, in this quantity's unit.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidArgument`] on overflow.
    pub fn checked_mul(self, rhs: Self) -> SimResult<Self> {
        self.with(self.magnitude.checked_mul(self.coerce(rhs)), "product")
    }

    /// Truncating quotient, in this quantity's unit.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidArgument`] for a zero divisor.
    pub fn checked_div(self, rhs: Self) -> SimResult<Self> {
        self.with(self.magnitude.checked_div(self.coerce(rhs)), "quotient")
    }

    /// Remainder, in this quantity's unit.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidArgument`] for a zero divisor.
    pub fn checked_rem(self, rhs: Self) -> SimResult<Self> {
        self.with(self.magnitude.checked_rem(self.coerce(rhs)), "remainder")
    }

    /// Magnitude shifted left by the other quantity's magnitude.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidArgument`] when set bits would be shifted out.
    pub fn checked_shl(self, rhs: Self) -> SimResult<Self> {
        let amount = self.coerce(rhs);
        let shifted = u32::try_from(amount)
            .ok()
            .and_then(|amount| self.magnitude.checked_shl(amount))
            .filter(|value| value >> amount == self.magnitude);
        self.with(shifted, "left shift")
    }

    /// Magnitude shifted right by the other quantity's magnitude.
    ///
    /// # Errors
    ///
    /// Never fails for valid operands; the signature matches the other
    /// operators.
    pub fn checked_shr(self, rhs: Self) -> SimResult<Self> {
        let amount = self.coerce(rhs);
        let shifted = if amount >= 64 {
            0
        } else {
            self.magnitude >> amount
        };
        self.with(Some(shifted), "right shift")
    }

    /// Arithmetic right shift. Magnitudes are non-negative, so this equals
    /// [`Self::checked_shr`].
    ///
    /// # Errors
    ///
    /// See [`Self::checked_shr`].
    pub fn checked_ashr(self, rhs: Self) -> SimResult<Self> {
        self.checked_shr(rhs)
    }
}

impl std::fmt::Display for BitQuantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let unit = match (self.unit, self.magnitude) {
            (Unit::Bit, 1) => "bit",
            (Unit::Bit, _) => "bits",
            (Unit::Byte, 1) => "byte",
            (Unit::Byte, _) => "bytes",
        };
        write!(f, "{} {unit}", self.magnitude)
    }
}
