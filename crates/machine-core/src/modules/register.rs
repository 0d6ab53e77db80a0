use crate::component::impl_component;
use crate::convert::{fits_in_bits, sign_extend, to_unsigned};
use crate::{ComponentId, MachineId, SimError, SimResult};

/// Widest register the engine models.
pub const MAX_REGISTER_WIDTH: u32 = 64;

/// Whether microinstructions may write a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Access {
    /// Only the host may change the value.
    ReadOnly,
    /// Microinstructions may change the value.
    #[default]
    ReadWrite,
}

/// A `width`-bit storage register.
///
/// The stored value is any integer in `[-2^(width-1), 2^width - 1]`: callers may
/// store either reading of the bit pattern. Microinstructions always store the
/// two's-complement reading of their result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register {
    pub(crate) id: ComponentId,
    pub(crate) owner: MachineId,
    pub(crate) name: String,
    width: u32,
    value: i64,
    initial_value: i64,
    access: Access,
}

impl_component!(Register);

pub(crate) fn check_width(width: u32) -> SimResult<()> {
    if (1..=MAX_REGISTER_WIDTH).contains(&width) {
        Ok(())
    } else {
        Err(SimError::invalid(format!(
            "width {width} outside 1..={MAX_REGISTER_WIDTH}"
        )))
    }
}

impl Register {
    pub(crate) fn new(
        id: ComponentId,
        owner: MachineId,
        name: String,
        width: u32,
        initial_value: i64,
        access: Access,
    ) -> SimResult<Self> {
        check_width(width)?;
        if !fits_in_bits(initial_value.into(), width) {
            return Err(SimError::range(initial_value, width));
        }
        Ok(Self {
            id,
            owner,
            name,
            width,
            value: initial_value,
            initial_value,
            access,
        })
    }

    /// Width in bits (`1..=64`).
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Value exactly as last stored.
    #[must_use]
    pub const fn value(&self) -> i64 {
        self.value
    }

    /// Value read as a `width`-bit two's-complement number.
    #[must_use]
    pub const fn signed_value(&self) -> i64 {
        sign_extend(to_unsigned(self.value, self.width), self.width)
    }

    /// Value read as a `width`-bit unsigned number.
    #[must_use]
    pub const fn unsigned_value(&self) -> u64 {
        to_unsigned(self.value, self.width)
    }

    /// Value restored by [`Self::clear`].
    #[must_use]
    pub const fn initial_value(&self) -> i64 {
        self.initial_value
    }

    /// Write permission for microinstructions.
    #[must_use]
    pub const fn access(&self) -> Access {
        self.access
    }

    /// Returns `true` for [`Access::ReadOnly`] registers.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        matches!(self.access, Access::ReadOnly)
    }

    /// Stores a value.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Range`] when `value` is outside
    /// `[-2^(width-1), 2^width - 1]`.
    pub fn set_value(&mut self, value: i64) -> SimResult<()> {
        if !fits_in_bits(value.into(), self.width) {
            return Err(SimError::range(value, self.width));
        }
        self.value = value;
        Ok(())
    }

    /// Stores the two's-complement reading of the low `width` bits of `bits`.
    pub(crate) const fn store_bits(&mut self, bits: u64) {
        self.value = sign_extend(bits, self.width);
    }

    /// Changes the width.
    ///
    /// A value or initial value that no longer fits the new envelope is
    /// cleared to 0 rather than truncated.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidArgument`] for widths outside `1..=64`.
    pub fn set_width(&mut self, width: u32) -> SimResult<()> {
        check_width(width)?;
        if !fits_in_bits(self.value.into(), width) {
            self.value = 0;
        }
        if !fits_in_bits(self.initial_value.into(), width) {
            self.initial_value = 0;
        }
        self.width = width;
        Ok(())
    }

    /// Changes the value restored by [`Self::clear`].
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Range`] when the value does not fit the width.
    pub fn set_initial_value(&mut self, value: i64) -> SimResult<()> {
        if !fits_in_bits(value.into(), self.width) {
            return Err(SimError::range(value, self.width));
        }
        self.initial_value = value;
        Ok(())
    }

    /// Changes write permission.
    pub const fn set_access(&mut self, access: Access) {
        self.access = access;
    }

    /// Restores the initial value.
    pub const fn clear(&mut self) {
        self.value = self.initial_value;
    }

    /// Copies width, value, initial value and access into `other`, keeping
    /// `other`'s identity.
    pub fn copy_data_to(&self, other: &mut Self) {
        other.width = self.width;
        other.value = self.value;
        other.initial_value = self.initial_value;
        other.access = self.access;
    }

    pub(crate) fn reidentify(&self, id: ComponentId, owner: MachineId) -> Self {
        Self {
            id,
            owner,
            ..self.clone()
        }
    }
}
