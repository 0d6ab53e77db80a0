//! The machine aggregate: owner of every module, field, instruction and
//! microinstruction, and the driver that executes them.

use std::collections::BTreeMap;

use crate::api::{
    IoChannels, MachineConfig, MicroOutcome, RunOutcome, RunStop, TraceEvent, TraceSink,
};
use crate::bitfield::check_field;
use crate::convert::{fits_in_bits, mask};
use crate::error::ComponentKind;
use crate::instruction::{Field, MachineInstruction};
use crate::micro::{compute, CursorUpdate, MicroEffects, MicroOp, Microinstruction};
use crate::modules::{
    ConditionBit, ControlUnit, ControlUnitState, Ram, Register, RegisterArray, Sequence,
};
use crate::{Access, Component, ComponentId, ErrorKind, MachineId, SimError, SimResult};

/// Register values, RAM contents and the control unit cursor, captured by
/// [`Machine::backup`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MachineSnapshot {
    registers: Vec<(ComponentId, i64)>,
    rams: Vec<(ComponentId, Vec<i64>)>,
    control: ControlUnitState,
}

impl MachineSnapshot {
    /// Captured value of `register`, if it was part of the snapshot.
    #[must_use]
    pub fn register_value(&self, register: ComponentId) -> Option<i64> {
        self.registers
            .iter()
            .find(|(id, _)| *id == register)
            .map(|(_, value)| *value)
    }

    /// Captured control unit cursor.
    #[must_use]
    pub const fn control(&self) -> ControlUnitState {
        self.control
    }
}

/// A user-defined CPU.
///
/// Components are addressed by [`ComponentId`]s handed out by the `add_*`
/// methods. Identifiers are never reused within a machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Machine {
    id: MachineId,
    name: String,
    config: MachineConfig,
    next_id: u32,
    registers: Vec<Register>,
    register_arrays: Vec<RegisterArray>,
    condition_bits: Vec<ConditionBit>,
    rams: Vec<Ram>,
    fields: Vec<Field>,
    instructions: Vec<MachineInstruction>,
    micros: Vec<Microinstruction>,
    fetch_sequence: Vec<ComponentId>,
    end: ComponentId,
    control_unit: ControlUnit,
    program_counter: Option<ComponentId>,
    code_store: Option<ComponentId>,
}

impl Machine {
    /// Creates an empty machine with the default configuration.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, MachineConfig::default())
    }

    /// Creates an empty machine.
    ///
    /// Every machine starts with a control unit and the `End` micro.
    #[must_use]
    pub fn with_config(name: impl Into<String>, config: MachineConfig) -> Self {
        let id = MachineId::fresh();
        let control = ComponentId::new(1);
        let end = ComponentId::new(2);
        Self {
            id,
            name: name.into(),
            config,
            next_id: 3,
            registers: Vec::new(),
            register_arrays: Vec::new(),
            condition_bits: Vec::new(),
            rams: Vec::new(),
            fields: Vec::new(),
            instructions: Vec::new(),
            micros: vec![Microinstruction::new(end, id, "End".into(), MicroOp::End)],
            fetch_sequence: Vec::new(),
            end,
            control_unit: ControlUnit::new(control, id, "ControlUnit".into()),
            program_counter: None,
            code_store: None,
        }
    }

    /// Process-unique identity of this machine.
    #[must_use]
    pub const fn id(&self) -> MachineId {
        self.id
    }

    /// Machine name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renames the machine.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Machine-wide settings.
    #[must_use]
    pub const fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Mutable machine-wide settings.
    pub fn config_mut(&mut self) -> &mut MachineConfig {
        &mut self.config
    }

    fn allocate(&mut self) -> SimResult<ComponentId> {
        let id = ComponentId::new(self.next_id);
        self.next_id = self
            .next_id
            .checked_add(1)
            .ok_or_else(|| SimError::invalid("component identifiers exhausted"))?;
        Ok(id)
    }

    fn allocate_many(&mut self, count: usize) -> SimResult<Vec<ComponentId>> {
        (0..count).map(|_| self.allocate()).collect()
    }

    // ---- lookup ----------------------------------------------------------

    /// Kind of the component `id` names, if any. Register-array elements are
    /// registers.
    #[must_use]
    pub fn kind_of(&self, id: ComponentId) -> Option<ComponentKind> {
        if self.registers.iter().any(|reg| reg.id() == id)
            || self.register_arrays.iter().any(|array| array.find(id).is_some())
        {
            Some(ComponentKind::Register)
        } else if self.register_arrays.iter().any(|array| array.id() == id) {
            Some(ComponentKind::RegisterArray)
        } else if self.condition_bits.iter().any(|bit| bit.id() == id) {
            Some(ComponentKind::ConditionBit)
        } else if self.rams.iter().any(|ram| ram.id() == id) {
            Some(ComponentKind::Ram)
        } else if self.fields.iter().any(|field| field.id() == id) {
            Some(ComponentKind::Field)
        } else if self.instructions.iter().any(|instr| instr.id() == id) {
            Some(ComponentKind::Instruction)
        } else if self.micros.iter().any(|micro| micro.id() == id) {
            Some(ComponentKind::Microinstruction)
        } else {
            None
        }
    }

    fn missing(&self, id: ComponentId, expected: ComponentKind) -> SimError {
        if self.kind_of(id).is_some() || id == self.control_unit.id() {
            SimError::WrongComponentKind { id, expected }
        } else {
            SimError::UnknownComponent { id }
        }
    }

    /// Register `id`, including register-array elements.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Reference`] error when `id` is not a register.
    pub fn register(&self, id: ComponentId) -> SimResult<&Register> {
        self.registers
            .iter()
            .find(|reg| reg.id() == id)
            .or_else(|| self.register_arrays.iter().find_map(|array| array.find(id)))
            .ok_or_else(|| self.missing(id, ComponentKind::Register))
    }

    /// Mutable register `id`, including register-array elements.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Reference`] error when `id` is not a register.
    pub fn register_mut(&mut self, id: ComponentId) -> SimResult<&mut Register> {
        if self.kind_of(id) != Some(ComponentKind::Register) {
            return Err(self.missing(id, ComponentKind::Register));
        }
        let standalone = self.registers.iter_mut().find(|reg| reg.id() == id);
        match standalone {
            Some(reg) => Ok(reg),
            None => self
                .register_arrays
                .iter_mut()
                .find_map(|array| array.find_mut(id))
                .ok_or(SimError::UnknownComponent { id }),
        }
    }

    /// Register array `id`.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Reference`] error when `id` is not a register array.
    pub fn register_array(&self, id: ComponentId) -> SimResult<&RegisterArray> {
        self.register_arrays
            .iter()
            .find(|array| array.id() == id)
            .ok_or_else(|| self.missing(id, ComponentKind::RegisterArray))
    }

    /// Mutable register array `id`.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Reference`] error when `id` is not a register array.
    pub fn register_array_mut(&mut self, id: ComponentId) -> SimResult<&mut RegisterArray> {
        match self.register_arrays.iter().position(|array| array.id() == id) {
            Some(index) => Ok(&mut self.register_arrays[index]),
            None => Err(self.missing(id, ComponentKind::RegisterArray)),
        }
    }

    /// Condition bit `id`.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Reference`] error when `id` is not a condition bit.
    pub fn condition_bit(&self, id: ComponentId) -> SimResult<&ConditionBit> {
        self.condition_bits
            .iter()
            .find(|bit| bit.id() == id)
            .ok_or_else(|| self.missing(id, ComponentKind::ConditionBit))
    }

    /// Mutable condition bit `id`.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Reference`] error when `id` is not a condition bit.
    pub fn condition_bit_mut(&mut self, id: ComponentId) -> SimResult<&mut ConditionBit> {
        match self.condition_bits.iter().position(|bit| bit.id() == id) {
            Some(index) => Ok(&mut self.condition_bits[index]),
            None => Err(self.missing(id, ComponentKind::ConditionBit)),
        }
    }

    /// Reads condition bit `id` from its backing register.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Reference`] error for unknown identifiers and
    /// [`SimError::InvalidArgument`] when the bit lies outside its register.
    pub fn condition_bit_state(&self, id: ComponentId) -> SimResult<bool> {
        let bit = self.condition_bit(id)?;
        bit.read(self.register(bit.register())?, self.config.index_from_right)
    }

    /// RAM `id`.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Reference`] error when `id` is not a RAM.
    pub fn ram(&self, id: ComponentId) -> SimResult<&Ram> {
        self.rams
            .iter()
            .find(|ram| ram.id() == id)
            .ok_or_else(|| self.missing(id, ComponentKind::Ram))
    }

    /// Mutable RAM `id`.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Reference`] error when `id` is not a RAM.
    pub fn ram_mut(&mut self, id: ComponentId) -> SimResult<&mut Ram> {
        match self.rams.iter().position(|ram| ram.id() == id) {
            Some(index) => Ok(&mut self.rams[index]),
            None => Err(self.missing(id, ComponentKind::Ram)),
        }
    }

    /// Field `id`.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Reference`] error when `id` is not a field.
    pub fn field(&self, id: ComponentId) -> SimResult<&Field> {
        self.fields
            .iter()
            .find(|field| field.id() == id)
            .ok_or_else(|| self.missing(id, ComponentKind::Field))
    }

    /// Mutable field `id`.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Reference`] error when `id` is not a field.
    pub fn field_mut(&mut self, id: ComponentId) -> SimResult<&mut Field> {
        match self.fields.iter().position(|field| field.id() == id) {
            Some(index) => Ok(&mut self.fields[index]),
            None => Err(self.missing(id, ComponentKind::Field)),
        }
    }

    /// Machine instruction `id`.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Reference`] error when `id` is not an instruction.
    pub fn instruction(&self, id: ComponentId) -> SimResult<&MachineInstruction> {
        self.instructions
            .iter()
            .find(|instr| instr.id() == id)
            .ok_or_else(|| self.missing(id, ComponentKind::Instruction))
    }

    /// Mutable machine instruction `id`.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Reference`] error when `id` is not an instruction.
    pub fn instruction_mut(&mut self, id: ComponentId) -> SimResult<&mut MachineInstruction> {
        match self.instructions.iter().position(|instr| instr.id() == id) {
            Some(index) => Ok(&mut self.instructions[index]),
            None => Err(self.missing(id, ComponentKind::Instruction)),
        }
    }

    /// Microinstruction `id`.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Reference`] error when `id` is not a microinstruction.
    pub fn micro(&self, id: ComponentId) -> SimResult<&Microinstruction> {
        self.micros
            .iter()
            .find(|micro| micro.id() == id)
            .ok_or_else(|| self.missing(id, ComponentKind::Microinstruction))
    }

    /// Standalone registers, in insertion order.
    #[must_use]
    pub fn registers(&self) -> &[Register] {
        &self.registers
    }

    /// Register arrays, in insertion order.
    #[must_use]
    pub fn register_arrays(&self) -> &[RegisterArray] {
        &self.register_arrays
    }

    /// Condition bits, in insertion order.
    #[must_use]
    pub fn condition_bits(&self) -> &[ConditionBit] {
        &self.condition_bits
    }

    /// RAMs, in insertion order.
    #[must_use]
    pub fn rams(&self) -> &[Ram] {
        &self.rams
    }

    /// Instruction fields, in insertion order.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Machine instructions, in decode priority order.
    #[must_use]
    pub fn instructions(&self) -> &[MachineInstruction] {
        &self.instructions
    }

    /// Microinstructions, in insertion order.
    #[must_use]
    pub fn micros(&self) -> &[Microinstruction] {
        &self.micros
    }

    /// Microinstructions executed before every decode.
    #[must_use]
    pub fn fetch_sequence(&self) -> &[ComponentId] {
        &self.fetch_sequence
    }

    /// The machine's `End` micro.
    #[must_use]
    pub const fn end_micro(&self) -> ComponentId {
        self.end
    }

    /// Sequencing cursor.
    #[must_use]
    pub const fn control_unit(&self) -> &ControlUnit {
        &self.control_unit
    }

    /// Mutable sequencing cursor.
    pub fn control_unit_mut(&mut self) -> &mut ControlUnit {
        &mut self.control_unit
    }

    /// Register used as the program counter for breakpoints.
    #[must_use]
    pub const fn program_counter(&self) -> Option<ComponentId> {
        self.program_counter
    }

    /// RAM holding the program.
    #[must_use]
    pub const fn code_store(&self) -> Option<ComponentId> {
        self.code_store
    }

    /// Finds a component by name.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<ComponentId> {
        self.components().find(|c| c.name() == name).map(Component::id)
    }

    /// Name of any component.
    #[must_use]
    pub fn name_of(&self, id: ComponentId) -> Option<&str> {
        self.components().find(|c| c.id() == id).map(Component::name)
    }

    fn components(&self) -> impl Iterator<Item = &dyn Component> {
        let control: &dyn Component = &self.control_unit;
        std::iter::once(control)
            .chain(self.registers.iter().map(|c| c as &dyn Component))
            .chain(self.register_arrays.iter().map(|c| c as &dyn Component))
            .chain(
                self.register_arrays
                    .iter()
                    .flat_map(RegisterArray::registers)
                    .map(|c| c as &dyn Component),
            )
            .chain(self.condition_bits.iter().map(|c| c as &dyn Component))
            .chain(self.rams.iter().map(|c| c as &dyn Component))
            .chain(self.fields.iter().map(|c| c as &dyn Component))
            .chain(self.instructions.iter().map(|c| c as &dyn Component))
            .chain(self.micros.iter().map(|c| c as &dyn Component))
    }

    /// Renames any component.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::UnknownComponent`] for unknown identifiers.
    pub fn rename(&mut self, id: ComponentId, name: impl Into<String>) -> SimResult<()> {
        let name = name.into();
        if id == self.control_unit.id() {
            self.control_unit.set_name(name);
            return Ok(());
        }
        let component: &mut dyn Component = match self.kind_of(id) {
            Some(ComponentKind::Register) => self.register_mut(id)?,
            Some(ComponentKind::RegisterArray) => self.register_array_mut(id)?,
            Some(ComponentKind::ConditionBit) => self.condition_bit_mut(id)?,
            Some(ComponentKind::Ram) => self.ram_mut(id)?,
            Some(ComponentKind::Field) => self.field_mut(id)?,
            Some(ComponentKind::Instruction) => self.instruction_mut(id)?,
            Some(ComponentKind::Microinstruction) => {
                match self.micros.iter_mut().find(|micro| micro.id() == id) {
                    Some(micro) => micro,
                    None => return Err(SimError::UnknownComponent { id }),
                }
            }
            None => return Err(SimError::UnknownComponent { id }),
        };
        component.set_name(name);
        Ok(())
    }

    // ---- construction ----------------------------------------------------

    /// Adds a read-write register with initial value 0.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidArgument`] for widths outside `1..=64`.
    pub fn add_register(&mut self, name: impl Into<String>, width: u32) -> SimResult<ComponentId> {
        self.add_register_with(name, width, 0, Access::ReadWrite)
    }

    /// Adds a register.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidArgument`] for widths outside `1..=64` and
    /// [`SimError::Range`] when the initial value does not fit.
    pub fn add_register_with(
        &mut self,
        name: impl Into<String>,
        width: u32,
        initial_value: i64,
        access: Access,
    ) -> SimResult<ComponentId> {
        let register = Register::new(
            ComponentId::new(self.next_id),
            self.id,
            name.into(),
            width,
            initial_value,
            access,
        )?;
        let id = self.allocate()?;
        log::debug!("added register {} ({width} bits) as {id}", register.name());
        self.registers.push(register);
        Ok(id)
    }

    /// Adds a register array of `length` read-write registers.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidArgument`] for widths outside `1..=64`.
    pub fn add_register_array(
        &mut self,
        name: impl Into<String>,
        length: usize,
        width: u32,
    ) -> SimResult<ComponentId> {
        let mut array = RegisterArray::new(
            ComponentId::new(self.next_id),
            self.id,
            name.into(),
            width,
            0,
            Access::ReadWrite,
        )?;
        let id = self.allocate()?;
        let ids = self.allocate_many(length)?;
        array.resize_with(length, ids.into_iter())?;
        log::debug!("added register array {} [{length} x {width}] as {id}", array.name());
        self.register_arrays.push(array);
        Ok(id)
    }

    /// Grows or shrinks a register array.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Reference`] error when `id` is not a register
    /// array and [`SimError::ModuleInUse`] when a removed element is still
    /// referenced.
    pub fn resize_register_array(&mut self, id: ComponentId, length: usize) -> SimResult<()> {
        let array = self.register_array(id)?;
        let dropped: Vec<ComponentId> =
            array.registers().iter().skip(length).map(Component::id).collect();
        let current = array.len();
        for element in dropped {
            let users = self.users_of(element);
            if !users.is_empty() {
                return Err(SimError::ModuleInUse { id: element, users });
            }
        }
        let ids = self.allocate_many(length.saturating_sub(current))?;
        self.register_array_mut(id)?.resize_with(length, ids.into_iter())
    }

    /// Adds a condition bit backed by `register`.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Reference`] error when `register` is not a
    /// register and [`SimError::InvalidArgument`] when `bit` lies outside it.
    pub fn add_condition_bit(
        &mut self,
        name: impl Into<String>,
        register: ComponentId,
        bit: u32,
        halt_on_set: bool,
    ) -> SimResult<ComponentId> {
        check_field(bit, 1, self.register(register)?.width())?;
        let id = self.allocate()?;
        let name = name.into();
        log::debug!("added condition bit {name} as {id}");
        self.condition_bits.push(ConditionBit::new(
            id,
            self.id,
            name,
            register,
            bit,
            halt_on_set,
        ));
        Ok(id)
    }

    /// Adds a RAM of `length` zeroed cells.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidArgument`] for cell sizes outside `1..=64`
    /// or lengths beyond the 32-bit address space.
    pub fn add_ram(
        &mut self,
        name: impl Into<String>,
        length: usize,
        cell_size: u32,
    ) -> SimResult<ComponentId> {
        let ram = Ram::new(
            ComponentId::new(self.next_id),
            self.id,
            name.into(),
            length,
            cell_size,
        )?;
        let id = self.allocate()?;
        log::debug!("added ram {} [{length} x {cell_size}] as {id}", ram.name());
        self.rams.push(ram);
        Ok(id)
    }

    /// Adds an instruction field.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidArgument`] for widths above 64.
    pub fn add_field(&mut self, name: impl Into<String>, num_bits: u32) -> SimResult<ComponentId> {
        if num_bits > 64 {
            return Err(SimError::invalid(format!("field width {num_bits} exceeds 64")));
        }
        let id = self.allocate()?;
        self.fields
            .push(Field::new(id, self.id, name.into(), num_bits));
        Ok(id)
    }

    /// Adds a microinstruction.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::UnknownComponent`] when the operation references a
    /// component this machine does not own.
    pub fn add_micro(&mut self, name: impl Into<String>, op: MicroOp) -> SimResult<ComponentId> {
        if matches!(op, MicroOp::End) {
            return Err(SimError::invalid("a machine has exactly one End micro"));
        }
        if let Some(id) = op.references().into_iter().find(|id| self.kind_of(*id).is_none()) {
            return Err(SimError::UnknownComponent { id });
        }
        let id = self.allocate()?;
        let micro = Microinstruction::new(id, self.id, name.into(), op);
        log::debug!("added {:?} micro {} as {id}", micro.category(), micro.name());
        self.micros.push(micro);
        Ok(id)
    }

    /// Replaces the operation of a microinstruction.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Reference`] error for unknown identifiers.
    pub fn set_micro_op(&mut self, id: ComponentId, op: MicroOp) -> SimResult<()> {
        if id == self.end || matches!(op, MicroOp::End) {
            return Err(SimError::invalid("the End micro cannot be redefined"));
        }
        if let Some(unknown) = op.references().into_iter().find(|id| self.kind_of(*id).is_none()) {
            return Err(SimError::UnknownComponent { id: unknown });
        }
        self.micro(id)?;
        if let Some(micro) = self.micros.iter_mut().find(|micro| micro.id() == id) {
            *micro.op_mut() = op;
        }
        Ok(())
    }

    fn check_micros(&self, micros: &[ComponentId]) -> SimResult<()> {
        micros.iter().try_for_each(|id| self.micro(*id).map(|_| ()))
    }

    /// Adds a machine instruction at the end of the decode order.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Reference`] error for unknown fields or micros
    /// and [`SimError::Range`] when `opcode` does not fit the first field.
    pub fn add_instruction(
        &mut self,
        name: impl Into<String>,
        opcode: u64,
        fields: Vec<ComponentId>,
        micros: Vec<ComponentId>,
    ) -> SimResult<ComponentId> {
        for field in &fields {
            self.field(*field)?;
        }
        self.check_micros(&micros)?;
        if let Some(first) = fields.first() {
            let width = self.field(*first)?.num_bits;
            if opcode > mask(width) {
                return Err(SimError::range(opcode, width));
            }
        }
        let id = self.allocate()?;
        let name = name.into();
        log::debug!("added instruction {name} (opcode {opcode:#x}) as {id}");
        self.instructions.push(MachineInstruction::new(
            id, self.id, name, opcode, fields, micros,
        ));
        Ok(id)
    }

    /// Replaces the fetch sequence.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Reference`] error when an entry is not a
    /// microinstruction.
    pub fn set_fetch_sequence(&mut self, micros: Vec<ComponentId>) -> SimResult<()> {
        self.check_micros(&micros)?;
        self.fetch_sequence = micros;
        Ok(())
    }

    /// Selects the program counter register.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Reference`] error when `register` is not a register.
    pub fn set_program_counter(&mut self, register: Option<ComponentId>) -> SimResult<()> {
        if let Some(id) = register {
            self.register(id)?;
        }
        self.program_counter = register;
        Ok(())
    }

    /// Selects the RAM holding the program.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Reference`] error when `ram` is not a RAM.
    pub fn set_code_store(&mut self, ram: Option<ComponentId>) -> SimResult<()> {
        if let Some(id) = ram {
            self.ram(id)?;
        }
        self.code_store = ram;
        Ok(())
    }

    // ---- editing ---------------------------------------------------------

    /// Components that reference `module`: microinstructions, condition bits
    /// backed by it and instructions built from it.
    #[must_use]
    pub fn users_of(&self, module: ComponentId) -> Vec<ComponentId> {
        let elements: Vec<ComponentId> = self
            .register_arrays
            .iter()
            .filter(|array| array.id() == module)
            .flat_map(RegisterArray::registers)
            .map(Component::id)
            .collect();
        let targets = |id: ComponentId| id == module || elements.contains(&id);

        let mut users: Vec<ComponentId> = self
            .micros
            .iter()
            .filter(|micro| micro.op().references().into_iter().any(targets))
            .map(Component::id)
            .collect();
        users.extend(
            self.condition_bits
                .iter()
                .filter(|bit| targets(bit.register()))
                .map(Component::id),
        );
        users.extend(
            self.instructions
                .iter()
                .filter(|instr| instr.fields.contains(&module))
                .map(Component::id),
        );
        users
    }

    /// Removes a module, field, instruction or microinstruction.
    ///
    /// Removing a microinstruction also drops it from the fetch sequence and
    /// every instruction.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::ModuleInUse`] while other components reference
    /// `id`, and [`SimError::InvalidArgument`] for the control unit, the `End`
    /// micro and register-array elements.
    pub fn remove(&mut self, id: ComponentId) -> SimResult<()> {
        if id == self.end || id == self.control_unit.id() {
            return Err(SimError::invalid(format!("component {id} cannot be removed")));
        }
        let Some(kind) = self.kind_of(id) else {
            return Err(SimError::UnknownComponent { id });
        };
        if kind == ComponentKind::Microinstruction {
            self.micros.retain(|micro| micro.id() != id);
            self.fetch_sequence.retain(|micro| *micro != id);
            for instruction in &mut self.instructions {
                instruction.micros.retain(|micro| *micro != id);
            }
            self.control_unit.reset();
            log::debug!("removed micro {id}");
            return Ok(());
        }
        let users = self.users_of(id);
        if !users.is_empty() {
            log::warn!("refusing to remove {kind} {id}: {} user(s)", users.len());
            return Err(SimError::ModuleInUse { id, users });
        }
        match kind {
            ComponentKind::Register => {
                if !self.registers.iter().any(|reg| reg.id() == id) {
                    return Err(SimError::invalid(format!(
                        "{id} is a register-array element; resize the array instead"
                    )));
                }
                self.registers.retain(|reg| reg.id() != id);
                if self.program_counter == Some(id) {
                    self.program_counter = None;
                }
            }
            ComponentKind::RegisterArray => {
                let holds_pc = self.program_counter.is_some_and(|pc| {
                    self.register_arrays
                        .iter()
                        .any(|array| array.id() == id && array.find(pc).is_some())
                });
                if holds_pc {
                    self.program_counter = None;
                }
                self.register_arrays.retain(|array| array.id() != id);
            }
            ComponentKind::ConditionBit => self.condition_bits.retain(|bit| bit.id() != id),
            ComponentKind::Ram => {
                self.rams.retain(|ram| ram.id() != id);
                if self.code_store == Some(id) {
                    self.code_store = None;
                }
            }
            ComponentKind::Field => self.fields.retain(|field| field.id() != id),
            ComponentKind::Instruction => {
                self.instructions.retain(|instr| instr.id() != id);
                if self.control_unit.sequence() == Sequence::Instruction(id) {
                    self.control_unit.reset();
                }
            }
            ComponentKind::Microinstruction => {}
        }
        log::debug!("removed {kind} {id}");
        Ok(())
    }

    /// Copy of the whole component graph with fresh identities.
    ///
    /// Every component of the copy gets a new identifier, disjoint from the
    /// identifiers of `self`, and every cross-reference is re-linked to the
    /// copied component.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidArgument`] when the identifier space is
    /// exhausted.
    pub fn deep_clone(&self) -> SimResult<Self> {
        let owner = MachineId::fresh();
        let mut next = self.next_id;
        let mut map: BTreeMap<ComponentId, ComponentId> = BTreeMap::new();
        for component in self.components() {
            map.insert(component.id(), ComponentId::new(next));
            next = next
                .checked_add(1)
                .ok_or_else(|| SimError::invalid("component identifiers exhausted"))?;
        }
        let remap = |old: ComponentId| map.get(&old).copied().unwrap_or(old);

        Ok(Self {
            id: owner,
            name: self.name.clone(),
            config: self.config.clone(),
            next_id: next,
            registers: self
                .registers
                .iter()
                .map(|reg| reg.reidentify(remap(reg.id()), owner))
                .collect(),
            register_arrays: self
                .register_arrays
                .iter()
                .map(|array| array.reidentify(remap(array.id()), owner, remap))
                .collect(),
            condition_bits: self
                .condition_bits
                .iter()
                .map(|bit| {
                    let mut copy = bit.clone();
                    copy.id = remap(bit.id());
                    copy.owner = owner;
                    copy.register = remap(bit.register());
                    copy
                })
                .collect(),
            rams: self
                .rams
                .iter()
                .map(|ram| ram.reidentify(remap(ram.id()), owner))
                .collect(),
            fields: self
                .fields
                .iter()
                .map(|field| field.reidentify(remap(field.id()), owner))
                .collect(),
            instructions: self
                .instructions
                .iter()
                .map(|instr| instr.reidentify(remap(instr.id()), owner, remap))
                .collect(),
            micros: self
                .micros
                .iter()
                .map(|micro| micro.reidentify(remap(micro.id()), owner, remap))
                .collect(),
            fetch_sequence: self.fetch_sequence.iter().map(|id| remap(*id)).collect(),
            end: remap(self.end),
            control_unit: self
                .control_unit
                .reidentify(remap(self.control_unit.id()), owner, remap),
            program_counter: self.program_counter.map(remap),
            code_store: self.code_store.map(remap),
        })
    }

    // ---- state -----------------------------------------------------------

    /// Restores every register to its initial value, clears RAM contents
    /// (keeping breakpoints) and resets the control unit.
    pub fn reset_state(&mut self) {
        self.registers.iter_mut().for_each(Register::clear);
        self.register_arrays.iter_mut().for_each(RegisterArray::clear);
        for ram in &mut self.rams {
            ram.clear(false);
        }
        self.control_unit.reset();
        log::debug!("machine {} reset", self.name);
    }

    /// Captures register values, RAM contents and the control unit cursor.
    #[must_use]
    pub fn backup(&self) -> MachineSnapshot {
        let registers = self
            .registers
            .iter()
            .chain(self.register_arrays.iter().flat_map(RegisterArray::registers))
            .map(|reg| (reg.id(), reg.value()))
            .collect();
        let rams = self
            .rams
            .iter()
            .map(|ram| (ram.id(), ram.snapshot()))
            .collect();
        MachineSnapshot {
            registers,
            rams,
            control: self.control_unit.state(),
        }
    }

    /// Restores a snapshot taken with [`Self::backup`]. Components added since
    /// the snapshot keep their state; removed components are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Range`] when a register has been narrowed below its
    /// captured value. Nothing is restored in that case.
    pub fn restore(&mut self, snapshot: &MachineSnapshot) -> SimResult<()> {
        for (id, value) in &snapshot.registers {
            if let Ok(reg) = self.register(*id) {
                if !fits_in_bits((*value).into(), reg.width()) {
                    return Err(SimError::range(*value, reg.width()));
                }
            }
        }
        for (id, value) in &snapshot.registers {
            if let Ok(reg) = self.register_mut(*id) {
                reg.set_value(*value)?;
            }
        }
        for (id, values) in &snapshot.rams {
            if let Ok(ram) = self.ram_mut(*id) {
                ram.restore(values);
            }
        }
        self.control_unit.restore(snapshot.control);
        Ok(())
    }

    // ---- execution -------------------------------------------------------

    fn sequence_micros(&self, sequence: Sequence) -> SimResult<&[ComponentId]> {
        match sequence {
            Sequence::Fetch => Ok(&self.fetch_sequence),
            Sequence::Instruction(id) => Ok(&self.instruction(id)?.micros),
        }
    }

    /// Micro the control unit points at.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::SequenceExhausted`] when the cursor is past the end
    /// of its sequence.
    pub fn current_micro(&self) -> SimResult<&Microinstruction> {
        let state = self.control_unit.state();
        let sequence = self.sequence_micros(state.sequence)?;
        let id = sequence
            .get(state.micro_index)
            .ok_or_else(|| SimError::SequenceExhausted {
                index: state.micro_index,
                len: sequence.len(),
            })?;
        self.micro(*id)
    }

    /// Executes the micro under the cursor and advances the cursor.
    ///
    /// A failing micro leaves every module and the cursor unchanged. `End`
    /// returns the cursor to the start of the fetch sequence.
    ///
    /// # Errors
    ///
    /// Returns the failure of the micro: range and address errors, unknown
    /// opcodes, division by zero, cancelled I/O and unresolved references.
    pub fn execute_micro(
        &mut self,
        channels: &mut dyn IoChannels,
        trace: &mut dyn TraceSink,
    ) -> SimResult<MicroOutcome> {
        let state = self.control_unit.state();
        let micro = self.current_micro()?;
        log::debug!(
            "executing {} ({:?}) at {:?}[{}]",
            micro.name(),
            micro.category(),
            state.sequence,
            state.micro_index
        );
        if self.config.tracing_enabled {
            trace.on_event(TraceEvent::MicroStart {
                micro: micro.id(),
                sequence: state.sequence,
                index: state.micro_index,
            });
        }
        let effects = match compute(self, micro, state.micro_index, channels) {
            Ok(effects) => effects,
            Err(err) => {
                if err.kind() == ErrorKind::Cancelled {
                    log::warn!("micro {} cancelled by the host", micro.name());
                } else {
                    log::debug!("micro {} failed: {err}", micro.name());
                }
                return Err(err);
            }
        };
        self.commit(state, effects, trace)
    }

    fn commit(
        &mut self,
        state: ControlUnitState,
        effects: MicroEffects,
        trace: &mut dyn TraceSink,
    ) -> SimResult<MicroOutcome> {
        let tracing = self.config.tracing_enabled;
        let ifr = self.config.index_from_right;

        // Resolve everything fallible before the first write.
        let mut bits = Vec::with_capacity(effects.condition_writes.len());
        for (id, value) in &effects.condition_writes {
            let bit = self.condition_bit(*id)?.clone();
            check_field(bit.bit(), 1, self.register(bit.register())?.width())?;
            bits.push((bit, *value));
        }
        for (id, _) in &effects.register_writes {
            self.register(*id)?;
        }
        let will_touch = |register: ComponentId| {
            effects.register_writes.iter().any(|(id, _)| *id == register)
                || bits.iter().any(|(bit, _)| bit.register() == register)
        };
        for bit in &self.condition_bits {
            if bit.halt_on_set() && will_touch(bit.register()) {
                check_field(bit.bit(), 1, self.register(bit.register())?.width())?;
            }
        }

        let mut touched = Vec::new();
        if let Some(write) = effects.memory_write {
            let ram = self.ram_mut(write.ram)?;
            ram.set_data(write.address, write.value, write.num_bits)?;
            log::trace!("{}[{}] <- {}", ram.name(), write.address, write.value);
            if tracing {
                for change in ram.last_changes() {
                    trace.on_event(TraceEvent::CellWrite {
                        ram: write.ram,
                        address: change.address,
                        previous: change.previous,
                        current: change.current,
                    });
                }
            }
        }
        for (id, pattern) in effects.register_writes {
            let register = self.register_mut(id)?;
            let previous = register.value();
            register.store_bits(pattern);
            log::trace!("{} {previous} -> {}", register.name(), register.value());
            if tracing {
                trace.on_event(TraceEvent::RegisterWrite {
                    register: id,
                    previous,
                    current: register.value(),
                });
            }
            touched.push(id);
        }
        for (bit, value) in bits {
            bit.write(self.register_mut(bit.register())?, value, ifr)?;
            if tracing {
                trace.on_event(TraceEvent::ConditionBitWrite {
                    bit: bit.id(),
                    value,
                });
            }
            touched.push(bit.register());
        }
        if let Some(instruction) = effects.decoded {
            log::debug!("decoded {}", self.instruction(instruction)?.name());
            if tracing {
                trace.on_event(TraceEvent::InstructionDecoded { instruction });
            }
        }

        let outcome = match effects.cursor {
            CursorUpdate::Advance => {
                self.control_unit.set_micro_index(state.micro_index + 1);
                MicroOutcome::Continued
            }
            CursorUpdate::Goto(index) => {
                self.control_unit.set_micro_index(index);
                MicroOutcome::Continued
            }
            CursorUpdate::Jump(sequence) => {
                self.control_unit.jump_to(sequence);
                MicroOutcome::Continued
            }
            CursorUpdate::End => {
                self.control_unit.reset();
                MicroOutcome::Ended
            }
        };

        for bit in &self.condition_bits {
            if bit.halt_on_set()
                && touched.contains(&bit.register())
                && bit.read(self.register(bit.register())?, ifr)?
            {
                log::info!("halt bit {} set", bit.name());
                return Ok(MicroOutcome::HaltBitSet { bit: bit.id() });
            }
        }
        Ok(outcome)
    }

    /// Code-store address under the program counter when it is a breakpoint
    /// and the cursor is at the start of a fetch.
    fn breakpoint_hit(&self) -> SimResult<Option<u64>> {
        if !self.config.halt_at_breakpoints
            || self.control_unit.state() != ControlUnitState::default()
        {
            return Ok(None);
        }
        let (Some(ram), Some(pc)) = (self.code_store, self.program_counter) else {
            return Ok(None);
        };
        let ram = self.ram(ram)?;
        if !ram.halt_at_breaks() {
            return Ok(None);
        }
        let address = self.register(pc)?.unsigned_value();
        Ok(ram
            .location(address)
            .ok()
            .filter(|location| location.breakpoint)
            .map(|_| address))
    }

    /// Executes micros until a halt bit is set, a breakpoint is reached or the
    /// micro budget runs out.
    ///
    /// Breakpoints are checked at the start of each fetch except the first,
    /// so a run started on a breakpoint resumes past it.
    ///
    /// # Errors
    ///
    /// Returns the first micro failure; the machine is left at the failing
    /// micro.
    pub fn run(
        &mut self,
        channels: &mut dyn IoChannels,
        trace: &mut dyn TraceSink,
    ) -> SimResult<RunOutcome> {
        let budget = self.config.micro_budget;
        let mut micros = 0;
        let mut instructions = 0;
        log::info!("running {} (budget {budget} micros)", self.name);
        while micros < budget {
            if micros > 0 {
                if let Some(address) = self.breakpoint_hit()? {
                    log::info!("breakpoint at {address}");
                    return Ok(RunOutcome {
                        micros,
                        instructions,
                        stop: RunStop::Breakpoint { address },
                    });
                }
            }
            let outcome = self.execute_micro(channels, trace)?;
            micros += 1;
            match outcome {
                MicroOutcome::Continued => {}
                MicroOutcome::Ended => instructions += 1,
                MicroOutcome::HaltBitSet { bit } => {
                    return Ok(RunOutcome {
                        micros,
                        instructions,
                        stop: RunStop::Halted { bit },
                    });
                }
            }
        }
        log::warn!("micro budget of {budget} exhausted");
        Ok(RunOutcome {
            micros,
            instructions,
            stop: RunStop::BudgetExhausted,
        })
    }
}
