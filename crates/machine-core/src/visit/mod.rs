//! Traversal protocol over a machine's component graph.
//!
//! [`Machine::accept_visitor`] is the only place that knows the visiting
//! order:
//!
//! 1. name, indexing direction, starting load address;
//! 2. fields (`start_fields` / `visit_field` / `end_fields`);
//! 3. modules (`start_modules`, then the nested [`ModuleVisitor`] if one is
//!    offered, then `end_modules`): registers, register arrays with their
//!    elements, condition bits, RAMs, then the code store, program counter
//!    and control unit;
//! 4. microinstructions (`start_micros`, the nested
//!    [`MicroinstructionVisitor`] one [`MicroCategory`] at a time,
//!    `end_micros`);
//! 5. machine instructions, then the fetch sequence.
//!
//! Every callback returns a [`VisitResult`]. `Stop` ends the traversal at
//! once: no further callback, including pending `end_*` calls, is made.
//! Otherwise every `start_*` is matched by its `end_*`, whether or not the
//! children were visited. `SkipSiblings` implies `SkipChildren`.

mod structure;
mod validate;

pub use structure::{machines_equivalent, StructureRecorder};
pub use validate::{ValidationIssue, Validator};

use crate::instruction::{Field, MachineInstruction};
use crate::machine::Machine;
use crate::micro::{MicroCategory, Microinstruction};
use crate::modules::{ConditionBit, ControlUnit, Ram, Register, RegisterArray};
use crate::ComponentId;

/// Traversal control returned by every callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VisitResult {
    /// Descend into children, then continue with siblings.
    #[default]
    Continue,
    /// Do not descend; continue with siblings.
    SkipChildren,
    /// Do not descend and skip the remaining siblings.
    SkipSiblings,
    /// End the traversal immediately.
    Stop,
}

/// How a traversal ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Traversal {
    /// Every scheduled callback ran.
    Completed,
    /// A callback returned [`VisitResult::Stop`].
    Stopped,
}

/// Module group visited between `start_group` and `end_group`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    /// Standalone registers.
    Registers,
    /// Register arrays.
    RegisterArrays,
    /// Condition bits.
    ConditionBits,
    /// RAMs.
    Rams,
}

/// Visitor over machine-level structure. Every callback defaults to
/// [`VisitResult::Continue`].
#[allow(unused_variables)]
pub trait MachineVisitor {
    /// Machine name.
    fn visit_name(&mut self, name: &str) -> VisitResult {
        VisitResult::Continue
    }

    /// Machine-wide bit indexing direction.
    fn visit_index_from_right(&mut self, index_from_right: bool) -> VisitResult {
        VisitResult::Continue
    }

    /// Address at which programs are loaded.
    fn visit_starting_address(&mut self, address: u32) -> VisitResult {
        VisitResult::Continue
    }

    /// Before the first field.
    fn start_fields(&mut self) -> VisitResult {
        VisitResult::Continue
    }

    /// One instruction field.
    fn visit_field(&mut self, field: &Field) -> VisitResult {
        VisitResult::Continue
    }

    /// After the last field.
    fn end_fields(&mut self) -> VisitResult {
        VisitResult::Continue
    }

    /// Before the module groups.
    fn start_modules(&mut self) -> VisitResult {
        VisitResult::Continue
    }

    /// Visitor for the module groups; `None` skips them.
    fn module_visitor(&mut self) -> Option<&mut dyn ModuleVisitor> {
        None
    }

    /// After the module groups.
    fn end_modules(&mut self) -> VisitResult {
        VisitResult::Continue
    }

    /// Before the microinstruction categories.
    fn start_micros(&mut self) -> VisitResult {
        VisitResult::Continue
    }

    /// Visitor for the microinstruction categories; `None` skips them.
    fn micro_visitor(&mut self) -> Option<&mut dyn MicroinstructionVisitor> {
        None
    }

    /// After the microinstruction categories.
    fn end_micros(&mut self) -> VisitResult {
        VisitResult::Continue
    }

    /// Before the first machine instruction.
    fn start_instructions(&mut self) -> VisitResult {
        VisitResult::Continue
    }

    /// One machine instruction, in decode order.
    fn visit_instruction(&mut self, instruction: &MachineInstruction) -> VisitResult {
        VisitResult::Continue
    }

    /// After the last machine instruction.
    fn end_instructions(&mut self) -> VisitResult {
        VisitResult::Continue
    }

    /// The fetch sequence.
    fn visit_fetch_sequence(&mut self, micros: &[ComponentId]) -> VisitResult {
        VisitResult::Continue
    }
}

/// Visitor over hardware modules. Every callback defaults to
/// [`VisitResult::Continue`].
#[allow(unused_variables)]
pub trait ModuleVisitor {
    /// Before a module group.
    fn start_group(&mut self, kind: ModuleKind) -> VisitResult {
        VisitResult::Continue
    }

    /// After a module group.
    fn end_group(&mut self, kind: ModuleKind) -> VisitResult {
        VisitResult::Continue
    }

    /// A standalone register.
    fn visit_register(&mut self, register: &Register) -> VisitResult {
        VisitResult::Continue
    }

    /// A register array; its elements are its children.
    fn visit_register_array(&mut self, array: &RegisterArray) -> VisitResult {
        VisitResult::Continue
    }

    /// One element of a register array.
    fn visit_array_element(&mut self, array: &RegisterArray, register: &Register) -> VisitResult {
        VisitResult::Continue
    }

    /// A condition bit.
    fn visit_condition_bit(&mut self, bit: &ConditionBit) -> VisitResult {
        VisitResult::Continue
    }

    /// A RAM.
    fn visit_ram(&mut self, ram: &Ram) -> VisitResult {
        VisitResult::Continue
    }

    /// The code store, if selected.
    fn visit_code_store(&mut self, ram: Option<&Ram>) -> VisitResult {
        VisitResult::Continue
    }

    /// The program counter, if selected.
    fn visit_program_counter(&mut self, register: Option<&Register>) -> VisitResult {
        VisitResult::Continue
    }

    /// The control unit.
    fn visit_control_unit(&mut self, control_unit: &ControlUnit) -> VisitResult {
        VisitResult::Continue
    }
}

/// Visitor over microinstructions grouped by category. Every callback
/// defaults to [`VisitResult::Continue`].
#[allow(unused_variables)]
pub trait MicroinstructionVisitor {
    /// Before a category.
    fn start_category(&mut self, category: MicroCategory) -> VisitResult {
        VisitResult::Continue
    }

    /// One microinstruction.
    fn visit_micro(&mut self, micro: &Microinstruction) -> VisitResult {
        VisitResult::Continue
    }

    /// After a category.
    fn end_category(&mut self, category: MicroCategory) -> VisitResult {
        VisitResult::Continue
    }
}

/// What the enclosing level does after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Next,
    SkipSiblings,
    Stop,
}

const fn single(result: VisitResult) -> Flow {
    match result {
        VisitResult::Stop => Flow::Stop,
        VisitResult::SkipSiblings => Flow::SkipSiblings,
        VisitResult::Continue | VisitResult::SkipChildren => Flow::Next,
    }
}

/// `start`, each item followed by its children, then `end`.
fn group<V: ?Sized, T: Copy>(
    visitor: &mut V,
    start: impl FnOnce(&mut V) -> VisitResult,
    items: impl IntoIterator<Item = T>,
    mut visit: impl FnMut(&mut V, T) -> VisitResult,
    mut children: impl FnMut(&mut V, T) -> Flow,
    end: impl FnOnce(&mut V) -> VisitResult,
) -> Flow {
    let mut skip_siblings = false;
    match start(visitor) {
        VisitResult::Stop => return Flow::Stop,
        VisitResult::SkipSiblings => skip_siblings = true,
        VisitResult::SkipChildren => {}
        VisitResult::Continue => {
            for item in items {
                match visit(visitor, item) {
                    VisitResult::Stop => return Flow::Stop,
                    VisitResult::SkipChildren => {}
                    VisitResult::SkipSiblings => break,
                    VisitResult::Continue => {
                        if children(visitor, item) == Flow::Stop {
                            return Flow::Stop;
                        }
                    }
                }
            }
        }
    }
    match single(end(visitor)) {
        Flow::Next if skip_siblings => Flow::SkipSiblings,
        flow => flow,
    }
}

fn leaf<V: ?Sized, T>(_: &mut V, _: T) -> Flow {
    Flow::Next
}

/// Runs `steps` in order; a `SkipSiblings` step ends the level early.
macro_rules! siblings {
    ($($step:expr),+ $(,)?) => {{
        'level: {
            $(
                match $step {
                    Flow::Stop => return Flow::Stop,
                    Flow::SkipSiblings => break 'level,
                    Flow::Next => {}
                }
            )+
        }
        Flow::Next
    }};
}

fn drive_modules(machine: &Machine, visitor: &mut dyn ModuleVisitor) -> Flow {
    siblings!(
        group(
            visitor,
            |v| v.start_group(ModuleKind::Registers),
            machine.registers(),
            ModuleVisitor::visit_register,
            leaf,
            |v| v.end_group(ModuleKind::Registers),
        ),
        group(
            visitor,
            |v| v.start_group(ModuleKind::RegisterArrays),
            machine.register_arrays(),
            ModuleVisitor::visit_register_array,
            |v, array| {
                for register in array.registers() {
                    match v.visit_array_element(array, register) {
                        VisitResult::Stop => return Flow::Stop,
                        VisitResult::SkipSiblings => break,
                        VisitResult::Continue | VisitResult::SkipChildren => {}
                    }
                }
                Flow::Next
            },
            |v| v.end_group(ModuleKind::RegisterArrays),
        ),
        group(
            visitor,
            |v| v.start_group(ModuleKind::ConditionBits),
            machine.condition_bits(),
            ModuleVisitor::visit_condition_bit,
            leaf,
            |v| v.end_group(ModuleKind::ConditionBits),
        ),
        group(
            visitor,
            |v| v.start_group(ModuleKind::Rams),
            machine.rams(),
            ModuleVisitor::visit_ram,
            leaf,
            |v| v.end_group(ModuleKind::Rams),
        ),
        single(visitor.visit_code_store(machine.code_store().and_then(|id| machine.ram(id).ok()))),
        single(visitor.visit_program_counter(
            machine
                .program_counter()
                .and_then(|id| machine.register(id).ok()),
        )),
        single(visitor.visit_control_unit(machine.control_unit())),
    )
}

fn drive_micros(machine: &Machine, visitor: &mut dyn MicroinstructionVisitor) -> Flow {
    for category in MicroCategory::ALL {
        let flow = group(
            visitor,
            |v| v.start_category(category),
            machine
                .micros()
                .iter()
                .filter(|micro| micro.category() == category),
            MicroinstructionVisitor::visit_micro,
            leaf,
            |v| v.end_category(category),
        );
        match flow {
            Flow::Stop => return Flow::Stop,
            Flow::SkipSiblings => break,
            Flow::Next => {}
        }
    }
    Flow::Next
}

/// `start`, the nested visitor's traversal unless skipped, then `end`.
fn section<V: ?Sized>(
    visitor: &mut V,
    start: impl FnOnce(&mut V) -> VisitResult,
    nested: impl FnOnce(&mut V) -> Flow,
    end: impl FnOnce(&mut V) -> VisitResult,
) -> Flow {
    let mut nested = Some(nested);
    group(
        visitor,
        start,
        [()],
        |_, ()| VisitResult::Continue,
        |v, ()| nested.take().map_or(Flow::Next, |nested| nested(v)),
        end,
    )
}

fn drive(machine: &Machine, visitor: &mut dyn MachineVisitor) -> Flow {
    siblings!(
        single(visitor.visit_name(machine.name())),
        single(visitor.visit_index_from_right(machine.config().index_from_right)),
        single(visitor.visit_starting_address(machine.config().starting_address_for_loading)),
        group(
            visitor,
            MachineVisitor::start_fields,
            machine.fields(),
            MachineVisitor::visit_field,
            leaf,
            MachineVisitor::end_fields,
        ),
        section(
            visitor,
            MachineVisitor::start_modules,
            |v| match v.module_visitor() {
                Some(modules) => drive_modules(machine, modules),
                None => Flow::Next,
            },
            MachineVisitor::end_modules,
        ),
        section(
            visitor,
            MachineVisitor::start_micros,
            |v| match v.micro_visitor() {
                Some(micros) => drive_micros(machine, micros),
                None => Flow::Next,
            },
            MachineVisitor::end_micros,
        ),
        group(
            visitor,
            MachineVisitor::start_instructions,
            machine.instructions(),
            MachineVisitor::visit_instruction,
            leaf,
            MachineVisitor::end_instructions,
        ),
        single(visitor.visit_fetch_sequence(machine.fetch_sequence())),
    )
}

impl Machine {
    /// Drives `visitor` over this machine in canonical order.
    pub fn accept_visitor(&self, visitor: &mut dyn MachineVisitor) -> Traversal {
        if drive(self, visitor) == Flow::Stop {
            Traversal::Stopped
        } else {
            Traversal::Completed
        }
    }

    /// Structural problems found by a [`Validator`] pass.
    #[must_use]
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut validator = Validator::new(self);
        self.accept_visitor(&mut validator);
        validator.into_issues()
    }

    /// Runs [`Self::validate`] and fails on the first issue.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SimError::InvalidArgument`] describing the first issue.
    pub fn validate_or_err(&self) -> crate::SimResult<()> {
        match self.validate().into_iter().next() {
            Some(issue) => Err(crate::SimError::invalid(issue.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{group, Flow, VisitResult};

    fn run(start: VisitResult, item: impl Fn(u32) -> VisitResult) -> (Flow, Vec<String>) {
        let mut log: Vec<String> = Vec::new();
        let flow = group(
            &mut log,
            |log| {
                log.push("start".into());
                start
            },
            [1_u32, 2, 3],
            |log, n| {
                log.push(format!("item{n}"));
                item(n)
            },
            |log, n| {
                log.push(format!("child{n}"));
                Flow::Next
            },
            |log| {
                log.push("end".into());
                VisitResult::Continue
            },
        );
        (flow, log)
    }

    #[test]
    fn skip_children_keeps_the_pair_symmetric() {
        let (flow, log) = run(VisitResult::SkipChildren, |_| VisitResult::Continue);
        assert_eq!(flow, Flow::Next);
        assert_eq!(log, ["start", "end"]);
    }

    #[test]
    fn item_skip_siblings_still_ends_the_group() {
        let (flow, log) = run(VisitResult::Continue, |n| {
            if n == 2 {
                VisitResult::SkipSiblings
            } else {
                VisitResult::Continue
            }
        });
        assert_eq!(flow, Flow::Next);
        assert_eq!(log, ["start", "item1", "child1", "item2", "end"]);
    }

    #[test]
    fn stop_makes_no_further_calls() {
        let (flow, log) = run(VisitResult::Continue, |n| {
            if n == 2 {
                VisitResult::Stop
            } else {
                VisitResult::SkipChildren
            }
        });
        assert_eq!(flow, Flow::Stop);
        assert_eq!(log, ["start", "item1", "item2"]);
    }

    #[test]
    fn start_skip_siblings_propagates_after_end() {
        let (flow, log) = run(VisitResult::SkipSiblings, |_| VisitResult::Continue);
        assert_eq!(flow, Flow::SkipSiblings);
        assert_eq!(log, ["start", "end"]);
    }

    fn level(first: Flow, second: Flow, log: &mut Vec<u32>) -> Flow {
        let mut step = |n: u32, flow: Flow| {
            log.push(n);
            flow
        };
        siblings!(step(1, first), step(2, second), step(3, Flow::Next))
    }

    #[test]
    fn sibling_skip_ends_the_level_without_propagating() {
        let mut log = Vec::new();
        assert_eq!(level(Flow::SkipSiblings, Flow::Next, &mut log), Flow::Next);
        assert_eq!(log, [1]);
    }

    #[test]
    fn sibling_stop_returns_immediately() {
        let mut log = Vec::new();
        assert_eq!(level(Flow::Next, Flow::Stop, &mut log), Flow::Stop);
        assert_eq!(log, [1, 2]);
    }

    #[test]
    fn siblings_run_in_order() {
        let mut log = Vec::new();
        assert_eq!(level(Flow::Next, Flow::Next, &mut log), Flow::Next);
        assert_eq!(log, [1, 2, 3]);
    }
}
