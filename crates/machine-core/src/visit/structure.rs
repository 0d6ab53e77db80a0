use super::{
    MachineVisitor, MicroinstructionVisitor, ModuleKind, ModuleVisitor, VisitResult,
};
use crate::instruction::{Field, MachineInstruction};
use crate::machine::Machine;
use crate::micro::{MicroCategory, Microinstruction};
use crate::modules::{ConditionBit, ControlUnit, Ram, Register, RegisterArray};
use crate::{Component, ComponentId};

/// Visitor that records a machine's structure as identifier-free lines.
///
/// References are rendered by component name, so two machines with the same
/// structure record the same lines even when their identifiers differ.
/// Runtime state (register values, RAM contents, the cursor) is not recorded.
#[derive(Debug)]
pub struct StructureRecorder<'m> {
    machine: &'m Machine,
    lines: Vec<String>,
}

impl<'m> StructureRecorder<'m> {
    /// Recorder resolving names against `machine`.
    #[must_use]
    pub const fn new(machine: &'m Machine) -> Self {
        Self {
            machine,
            lines: Vec::new(),
        }
    }

    /// Records `machine` in full.
    #[must_use]
    pub fn record(machine: &'m Machine) -> Vec<String> {
        let mut recorder = Self::new(machine);
        machine.accept_visitor(&mut recorder);
        recorder.lines
    }

    /// Lines recorded so far.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    fn push(&mut self, line: String) -> VisitResult {
        self.lines.push(line);
        VisitResult::Continue
    }

    fn name(&self, id: ComponentId) -> String {
        self.machine
            .name_of(id)
            .map_or_else(|| format!("<unresolved {id}>"), str::to_owned)
    }

    fn names(&self, ids: &[ComponentId]) -> Vec<String> {
        ids.iter().map(|id| self.name(*id)).collect()
    }
}

impl MachineVisitor for StructureRecorder<'_> {
    fn visit_name(&mut self, name: &str) -> VisitResult {
        self.push(format!("machine {name}"))
    }

    fn visit_index_from_right(&mut self, index_from_right: bool) -> VisitResult {
        self.push(format!("index_from_right {index_from_right}"))
    }

    fn visit_starting_address(&mut self, address: u32) -> VisitResult {
        self.push(format!("starting_address {address}"))
    }

    fn start_fields(&mut self) -> VisitResult {
        self.push("fields {".into())
    }

    fn visit_field(&mut self, field: &Field) -> VisitResult {
        self.push(format!(
            "field {} bits={} kind={:?} relativity={:?} default={} signed={} values={:?}",
            field.name(),
            field.num_bits,
            field.kind,
            field.relativity,
            field.default_value,
            field.signed,
            field.values
        ))
    }

    fn end_fields(&mut self) -> VisitResult {
        self.push("}".into())
    }

    fn start_modules(&mut self) -> VisitResult {
        self.push("modules {".into())
    }

    fn module_visitor(&mut self) -> Option<&mut dyn ModuleVisitor> {
        Some(self)
    }

    fn end_modules(&mut self) -> VisitResult {
        self.push("}".into())
    }

    fn start_micros(&mut self) -> VisitResult {
        self.push("micros {".into())
    }

    fn micro_visitor(&mut self) -> Option<&mut dyn MicroinstructionVisitor> {
        Some(self)
    }

    fn end_micros(&mut self) -> VisitResult {
        self.push("}".into())
    }

    fn start_instructions(&mut self) -> VisitResult {
        self.push("instructions {".into())
    }

    fn visit_instruction(&mut self, instruction: &MachineInstruction) -> VisitResult {
        let line = format!(
            "instruction {} opcode={:#x} fields={:?} micros={:?}",
            instruction.name(),
            instruction.opcode,
            self.names(&instruction.fields),
            self.names(&instruction.micros)
        );
        self.push(line)
    }

    fn end_instructions(&mut self) -> VisitResult {
        self.push("}".into())
    }

    fn visit_fetch_sequence(&mut self, micros: &[ComponentId]) -> VisitResult {
        let line = format!("fetch {:?}", self.names(micros));
        self.push(line)
    }
}

impl ModuleVisitor for StructureRecorder<'_> {
    fn start_group(&mut self, kind: ModuleKind) -> VisitResult {
        self.push(format!("{kind:?} {{"))
    }

    fn end_group(&mut self, _kind: ModuleKind) -> VisitResult {
        self.push("}".into())
    }

    fn visit_register(&mut self, register: &Register) -> VisitResult {
        self.push(format!(
            "register {} width={} initial={} access={:?}",
            register.name(),
            register.width(),
            register.initial_value(),
            register.access()
        ))
    }

    fn visit_register_array(&mut self, array: &RegisterArray) -> VisitResult {
        self.push(format!(
            "array {} length={} width={}",
            array.name(),
            array.len(),
            array.width()
        ))
    }

    fn visit_array_element(&mut self, _array: &RegisterArray, register: &Register) -> VisitResult {
        self.push(format!(
            "  element {} initial={} access={:?}",
            register.name(),
            register.initial_value(),
            register.access()
        ))
    }

    fn visit_condition_bit(&mut self, bit: &ConditionBit) -> VisitResult {
        let line = format!(
            "condition_bit {} register={} bit={} halt={}",
            bit.name(),
            self.name(bit.register()),
            bit.bit(),
            bit.halt_on_set()
        );
        self.push(line)
    }

    fn visit_ram(&mut self, ram: &Ram) -> VisitResult {
        self.push(format!(
            "ram {} length={} cell_size={} halt_at_breaks={}",
            ram.name(),
            ram.len(),
            ram.cell_size(),
            ram.halt_at_breaks()
        ))
    }

    fn visit_code_store(&mut self, ram: Option<&Ram>) -> VisitResult {
        self.push(format!("code_store {:?}", ram.map(Component::name)))
    }

    fn visit_program_counter(&mut self, register: Option<&Register>) -> VisitResult {
        self.push(format!("program_counter {:?}", register.map(Component::name)))
    }

    fn visit_control_unit(&mut self, control_unit: &ControlUnit) -> VisitResult {
        self.push(format!("control_unit {}", control_unit.name()))
    }
}

impl MicroinstructionVisitor for StructureRecorder<'_> {
    fn start_category(&mut self, category: MicroCategory) -> VisitResult {
        self.push(format!("{category:?} {{"))
    }

    fn visit_micro(&mut self, micro: &Microinstruction) -> VisitResult {
        let references = self.names(&micro.op().references());
        let mut op = micro.op().clone();
        op.remap_references(|_| ComponentId::new(0));
        self.push(format!("micro {} {op:?} refs={references:?}", micro.name()))
    }

    fn end_category(&mut self, _category: MicroCategory) -> VisitResult {
        self.push("}".into())
    }
}

/// Returns `true` when both machines record the same structure.
#[must_use]
pub fn machines_equivalent(a: &Machine, b: &Machine) -> bool {
    StructureRecorder::record(a) == StructureRecorder::record(b)
}
