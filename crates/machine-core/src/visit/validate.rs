use std::collections::BTreeMap;
use std::fmt;

use super::{MachineVisitor, MicroinstructionVisitor, ModuleVisitor, VisitResult};
use crate::bitfield::check_field;
use crate::convert::{fits_in_bits, mask};
use crate::instruction::{Field, MachineInstruction};
use crate::machine::Machine;
use crate::micro::{MicroOp, Microinstruction};
use crate::modules::{ConditionBit, Ram, Register, RegisterArray, MAX_REGISTER_WIDTH};
use crate::{Component, ComponentId};

/// One structural problem.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidationIssue {
    /// Offending component, when the problem belongs to one.
    pub component: Option<ComponentId>,
    /// Human-readable description.
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.component {
            Some(id) => write!(f, "{id}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Visitor collecting structural problems: duplicate names, bit fields outside
/// their registers, operand width mismatches, unresolved references and
/// incomplete instruction sequences.
#[derive(Debug)]
pub struct Validator<'m> {
    machine: &'m Machine,
    names: BTreeMap<String, ComponentId>,
    issues: Vec<ValidationIssue>,
}

impl<'m> Validator<'m> {
    /// Validator resolving references against `machine`.
    #[must_use]
    pub const fn new(machine: &'m Machine) -> Self {
        Self {
            machine,
            names: BTreeMap::new(),
            issues: Vec::new(),
        }
    }

    /// Problems found so far.
    #[must_use]
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    /// Consumes the validator, returning its problems.
    #[must_use]
    pub fn into_issues(self) -> Vec<ValidationIssue> {
        self.issues
    }

    fn report(&mut self, component: Option<ComponentId>, message: impl Into<String>) {
        let issue = ValidationIssue {
            component,
            message: message.into(),
        };
        log::debug!("validation: {issue}");
        self.issues.push(issue);
    }

    fn unique_name(&mut self, component: &dyn Component) {
        if component.name().is_empty() {
            self.report(Some(component.id()), "empty name");
            return;
        }
        if let Some(first) = self.names.insert(component.name().to_owned(), component.id()) {
            self.report(
                Some(component.id()),
                format!("name {:?} already used by {first}", component.name()),
            );
        }
    }

    fn register_width(&mut self, micro: ComponentId, register: ComponentId) -> Option<u32> {
        match self.machine.register(register) {
            Ok(reg) => Some(reg.width()),
            Err(err) => {
                self.report(Some(micro), err.to_string());
                None
            }
        }
    }

    fn field_in(&mut self, micro: ComponentId, register: ComponentId, start: u32, num_bits: u32) {
        if let Some(width) = self.register_width(micro, register) {
            if let Err(err) = check_field(start, num_bits, width) {
                self.report(Some(micro), err.to_string());
            }
        }
    }

    fn same_width(&mut self, micro: ComponentId, registers: &[ComponentId]) {
        let widths: Vec<u32> = registers
            .iter()
            .filter_map(|id| self.register_width(micro, *id))
            .collect();
        if widths.windows(2).any(|pair| pair[0] != pair[1]) {
            self.report(Some(micro), format!("operand widths differ: {widths:?}"));
        }
    }

    fn check_array(&mut self, micro: ComponentId, array: ComponentId) {
        if let Err(err) = self.machine.register_array(array) {
            self.report(Some(micro), err.to_string());
        }
    }

    fn check_flag(&mut self, micro: ComponentId, bit: Option<ComponentId>) {
        if let Some(bit) = bit {
            if let Err(err) = self.machine.condition_bit(bit) {
                self.report(Some(micro), err.to_string());
            }
        }
    }

    fn check_op(&mut self, id: ComponentId, op: &MicroOp) {
        match op {
            MicroOp::Set(set) => {
                self.field_in(id, set.register, set.start, set.num_bits);
                if !fits_in_bits(set.value.into(), set.num_bits) {
                    self.report(
                        Some(id),
                        format!("value {} does not fit {} bits", set.value, set.num_bits),
                    );
                }
            }
            MicroOp::Increment(inc) => {
                self.register_width(id, inc.register);
                self.check_flag(id, inc.overflow_bit);
                self.check_flag(id, inc.carry_bit);
            }
            MicroOp::Shift(shift) => self.same_width(id, &[shift.source, shift.destination]),
            MicroOp::Arithmetic(arith) => {
                self.same_width(id, &[arith.source1, arith.source2, arith.destination]);
                self.check_flag(id, arith.overflow_bit);
                self.check_flag(id, arith.carry_bit);
            }
            MicroOp::Logical(logic) => {
                self.same_width(id, &[logic.source1, logic.source2, logic.destination]);
            }
            MicroOp::TransferRtoR(t) => {
                self.field_in(id, t.source, t.src_start, t.num_bits);
                self.field_in(id, t.destination, t.dest_start, t.num_bits);
            }
            MicroOp::TransferRtoA(t) => {
                self.field_in(id, t.source, t.src_start, t.num_bits);
                self.check_array(id, t.destination);
                self.field_in(id, t.index.register, t.index.start, t.index.num_bits);
            }
            MicroOp::TransferAtoR(t) => {
                self.check_array(id, t.source);
                self.field_in(id, t.destination, t.dest_start, t.num_bits);
                self.field_in(id, t.index.register, t.index.start, t.index.num_bits);
            }
            MicroOp::Decode { ir } => {
                self.register_width(id, *ir);
            }
            MicroOp::Test(test) => {
                self.field_in(id, test.register, test.start, test.num_bits);
            }
            MicroOp::SetCondBit { bit, .. } => self.check_flag(id, Some(*bit)),
            MicroOp::Io(io) => {
                self.register_width(id, io.buffer);
                if io.channel.is_empty() {
                    self.report(Some(id), "empty I/O channel name");
                }
            }
            MicroOp::MemoryAccess(access) => {
                if let Err(err) = self.machine.ram(access.memory) {
                    self.report(Some(id), err.to_string());
                }
                self.register_width(id, access.data);
                self.register_width(id, access.address);
            }
            MicroOp::Branch { .. } | MicroOp::Comment { .. } | MicroOp::End => {}
        }
    }

    fn reaches_end(&self, micros: &[ComponentId]) -> bool {
        micros.contains(&self.machine.end_micro())
    }
}

impl MachineVisitor for Validator<'_> {
    fn visit_field(&mut self, field: &Field) -> VisitResult {
        self.unique_name(field);
        if field.num_bits == 0 || field.num_bits > MAX_REGISTER_WIDTH {
            self.report(Some(field.id()), format!("width {} outside 1..=64", field.num_bits));
        } else if !field.fits(field.default_value) {
            self.report(
                Some(field.id()),
                format!("default value {} does not fit", field.default_value),
            );
        }
        VisitResult::Continue
    }

    fn module_visitor(&mut self) -> Option<&mut dyn ModuleVisitor> {
        Some(self)
    }

    fn micro_visitor(&mut self) -> Option<&mut dyn MicroinstructionVisitor> {
        Some(self)
    }

    fn visit_instruction(&mut self, instruction: &MachineInstruction) -> VisitResult {
        self.unique_name(instruction);
        let id = instruction.id();
        match instruction.opcode_field() {
            None => self.report(Some(id), "instruction has no fields"),
            Some(field) => match self.machine.field(field) {
                Ok(field) if instruction.opcode > mask(field.num_bits) => {
                    self.report(
                        Some(id),
                        format!(
                            "opcode {:#x} does not fit the {}-bit opcode field",
                            instruction.opcode, field.num_bits
                        ),
                    );
                }
                Ok(_) => {}
                Err(err) => self.report(Some(id), err.to_string()),
            },
        }
        let clash = self.machine.instructions().iter().find(|other| {
            other.id() != id
                && other.opcode == instruction.opcode
                && other.opcode_field() == instruction.opcode_field()
        });
        if let Some(other) = clash {
            self.report(
                Some(id),
                format!("opcode {:#x} shared with {}", instruction.opcode, other.name()),
            );
        }
        if !self.reaches_end(&instruction.micros) {
            self.report(Some(id), "micro sequence has no End");
        }
        VisitResult::Continue
    }

    fn visit_fetch_sequence(&mut self, micros: &[ComponentId]) -> VisitResult {
        let decodes = micros
            .iter()
            .filter_map(|id| self.machine.micro(*id).ok())
            .any(|micro| matches!(micro.op(), MicroOp::Decode { .. }));
        if !decodes {
            self.report(None, "fetch sequence has no Decode micro");
        }
        VisitResult::Continue
    }
}

impl ModuleVisitor for Validator<'_> {
    fn visit_register(&mut self, register: &Register) -> VisitResult {
        self.unique_name(register);
        VisitResult::Continue
    }

    fn visit_register_array(&mut self, array: &RegisterArray) -> VisitResult {
        self.unique_name(array);
        if array.is_empty() {
            self.report(Some(array.id()), "register array has no registers");
        }
        VisitResult::Continue
    }

    fn visit_array_element(&mut self, _array: &RegisterArray, register: &Register) -> VisitResult {
        self.unique_name(register);
        VisitResult::Continue
    }

    fn visit_condition_bit(&mut self, bit: &ConditionBit) -> VisitResult {
        self.unique_name(bit);
        if let Err(err) = self.machine.condition_bit_state(bit.id()) {
            self.report(Some(bit.id()), err.to_string());
        }
        VisitResult::Continue
    }

    fn visit_ram(&mut self, ram: &Ram) -> VisitResult {
        self.unique_name(ram);
        VisitResult::Continue
    }

    fn visit_code_store(&mut self, ram: Option<&Ram>) -> VisitResult {
        if ram.is_some() != self.machine.program_counter().is_some() {
            self.report(
                None,
                "code store and program counter must be selected together",
            );
        }
        VisitResult::Continue
    }
}

impl MicroinstructionVisitor for Validator<'_> {
    fn visit_micro(&mut self, micro: &Microinstruction) -> VisitResult {
        self.unique_name(micro);
        self.check_op(micro.id(), micro.op());
        VisitResult::Continue
    }
}
