use super::register::Register;
use crate::bitfield::{check_field, extract, insert};
use crate::component::impl_component;
use crate::{ComponentId, MachineId, SimResult};

/// One bit of a backing register, optionally halting execution when set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionBit {
    pub(crate) id: ComponentId,
    pub(crate) owner: MachineId,
    pub(crate) name: String,
    pub(crate) register: ComponentId,
    bit: u32,
    halt_on_set: bool,
}

impl_component!(ConditionBit);

impl ConditionBit {
    pub(crate) const fn new(
        id: ComponentId,
        owner: MachineId,
        name: String,
        register: ComponentId,
        bit: u32,
        halt_on_set: bool,
    ) -> Self {
        Self {
            id,
            owner,
            name,
            register,
            bit,
            halt_on_set,
        }
    }

    /// Backing register.
    #[must_use]
    pub const fn register(&self) -> ComponentId {
        self.register
    }

    /// Bit position, interpreted with the machine's indexing direction.
    #[must_use]
    pub const fn bit(&self) -> u32 {
        self.bit
    }

    /// Whether setting this bit halts a run.
    #[must_use]
    pub const fn halt_on_set(&self) -> bool {
        self.halt_on_set
    }

    /// Changes the bit position.
    pub const fn set_bit(&mut self, bit: u32) {
        self.bit = bit;
    }

    /// Changes whether setting this bit halts a run.
    pub const fn set_halt_on_set(&mut self, halt: bool) {
        self.halt_on_set = halt;
    }

    /// Reads the bit from its backing register.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SimError::InvalidArgument`] when the position lies
    /// outside the register.
    pub fn read(&self, register: &Register, index_from_right: bool) -> SimResult<bool> {
        check_field(self.bit, 1, register.width())?;
        let bit = extract(
            register.unsigned_value(),
            self.bit,
            1,
            register.width(),
            index_from_right,
        );
        Ok(bit == 1)
    }

    /// Writes the bit into its backing register, leaving every other bit
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SimError::InvalidArgument`] when the position lies
    /// outside the register.
    pub fn write(&self, register: &mut Register, set: bool, index_from_right: bool) -> SimResult<()> {
        check_field(self.bit, 1, register.width())?;
        let bits = insert(
            register.unsigned_value(),
            u64::from(set),
            self.bit,
            1,
            register.width(),
            index_from_right,
        );
        register.store_bits(bits);
        Ok(())
    }
}
