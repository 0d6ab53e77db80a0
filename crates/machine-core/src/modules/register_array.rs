use super::register::{check_width, Access, Register};
use crate::convert::fits_in_bits;
use crate::{Component, ComponentId, MachineId, SimError, SimResult};

/// Ordered group of registers sharing width, initial access and initial value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterArray {
    pub(crate) id: ComponentId,
    pub(crate) owner: MachineId,
    pub(crate) name: String,
    width: u32,
    initial_value: i64,
    initial_access: Access,
    registers: Vec<Register>,
}

impl Component for RegisterArray {
    fn id(&self) -> ComponentId {
        self.id
    }

    fn owner(&self) -> MachineId {
        self.owner
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.rename(name);
    }
}

impl RegisterArray {
    pub(crate) fn new(
        id: ComponentId,
        owner: MachineId,
        name: String,
        width: u32,
        initial_value: i64,
        initial_access: Access,
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
            initial_value,
            initial_access,
            registers: Vec::new(),
        })
    }

    /// Number of registers.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.registers.len()
    }

    /// Returns `true` when the array holds no registers.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Width shared by every register.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Initial value given to appended registers.
    #[must_use]
    pub const fn initial_value(&self) -> i64 {
        self.initial_value
    }

    /// Access given to appended registers.
    #[must_use]
    pub const fn initial_access(&self) -> Access {
        self.initial_access
    }

    /// Registers in index order.
    #[must_use]
    pub fn registers(&self) -> &[Register] {
        &self.registers
    }

    /// Register at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Address`] when `index` is outside `[0, len)`.
    pub fn get(&self, index: u64) -> SimResult<&Register> {
        let length = self.registers.len();
        usize::try_from(index)
            .ok()
            .and_then(|i| self.registers.get(i))
            .ok_or_else(|| SimError::Address {
                address: index.into(),
                length,
            })
    }

    /// Mutable register at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Address`] when `index` is outside `[0, len)`.
    pub fn get_mut(&mut self, index: u64) -> SimResult<&mut Register> {
        let length = self.registers.len();
        usize::try_from(index)
            .ok()
            .and_then(|i| self.registers.get_mut(i))
            .ok_or_else(|| SimError::Address {
                address: index.into(),
                length,
            })
    }

    pub(crate) fn find(&self, id: ComponentId) -> Option<&Register> {
        self.registers.iter().find(|reg| reg.id() == id)
    }

    pub(crate) fn find_mut(&mut self, id: ComponentId) -> Option<&mut Register> {
        self.registers.iter_mut().find(|reg| reg.id() == id)
    }

    /// Appends fresh registers or truncates from the end until the array holds
    /// `length` registers. `fresh` supplies identifiers for new registers.
    pub(crate) fn resize_with(
        &mut self,
        length: usize,
        mut fresh: impl Iterator<Item = ComponentId>,
    ) -> SimResult<()> {
        self.registers.truncate(length);
        while self.registers.len() < length {
            let index = self.registers.len();
            let Some(id) = fresh.next() else {
                return Err(SimError::invalid(format!(
                    "no identifier for register {index} of {}",
                    self.name
                )));
            };
            let register = Register::new(
                id,
                self.owner,
                element_name(&self.name, index),
                self.width,
                self.initial_value,
                self.initial_access,
            )?;
            self.registers.push(register);
        }
        Ok(())
    }

    /// Changes the width of the array and every register in it; see
    /// [`Register::set_width`] for how values are preserved.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidArgument`] for widths outside `1..=64`.
    pub fn set_width(&mut self, width: u32) -> SimResult<()> {
        check_width(width)?;
        for register in &mut self.registers {
            register.set_width(width)?;
        }
        if !fits_in_bits(self.initial_value.into(), width) {
            self.initial_value = 0;
        }
        self.width = width;
        Ok(())
    }

    /// Changes the initial value used for appended registers.
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

    /// Changes the access used for appended registers.
    pub const fn set_initial_access(&mut self, access: Access) {
        self.initial_access = access;
    }

    /// Renames the array and its registers (`name[i]`).
    pub fn rename(&mut self, name: String) {
        for (index, register) in self.registers.iter_mut().enumerate() {
            register.set_name(element_name(&name, index));
        }
        self.name = name;
    }

    /// Restores every register to its initial value.
    pub fn clear(&mut self) {
        self.registers.iter_mut().for_each(Register::clear);
    }

    pub(crate) fn reidentify(
        &self,
        id: ComponentId,
        owner: MachineId,
        mut remap: impl FnMut(ComponentId) -> ComponentId,
    ) -> Self {
        Self {
            id,
            owner,
            registers: self
                .registers
                .iter()
                .map(|reg| reg.reidentify(remap(reg.id()), owner))
                .collect(),
            ..self.clone()
        }
    }
}

fn element_name(array: &str, index: usize) -> String {
    format!("{array}[{index}]")
}
