//! Bit-precise model and microinstruction engine for user-defined digital
//! computers.
//!
//! A [`Machine`] owns registers, register arrays, condition bits, RAMs,
//! instruction fields, machine instructions and microinstructions. Execution
//! runs one microinstruction at a time through the control unit: the fetch
//! sequence ends in a decode that selects a machine instruction, whose own
//! sequence ends in `End`, returning control to the fetch sequence.

/// Bit and byte quantities.
pub mod units;
pub use units::{BitQuantity, Unit, BITS_PER_BYTE};

/// Conversions between 64-bit values, bit patterns and display strings.
pub mod convert;

/// Bit-field extraction and insertion helpers.
pub mod bitfield;

/// Error taxonomy shared by every operation.
pub mod error;
pub use error::{ComponentKind, ErrorKind, SimError, SimResult};

mod component;
pub use component::{Component, ComponentId, MachineId};

/// Registers, register arrays, condition bits, RAMs and the control unit.
pub mod modules;
pub use modules::{
    Access, CellChange, ConditionBit, ControlUnit, ControlUnitState, Ram, RamLocation, Register,
    RegisterArray, Sequence, SourceLine, MAX_REGISTER_WIDTH,
};

/// Instruction fields and machine instructions.
pub mod instruction;
pub use instruction::{Field, FieldKind, FieldValue, MachineInstruction, Relativity};

/// Microinstruction kinds and their parameters.
pub mod micro;
pub use micro::{MicroCategory, MicroOp, Microinstruction};

/// Host-facing configuration, I/O, outcome and trace contracts.
pub mod api;
pub use api::{
    IoChannels, IoKind, IoPort, MachineConfig, MicroOutcome, NoChannels, NullTrace, RunOutcome,
    RunStop, TraceEvent, TraceSink, DEFAULT_MICRO_BUDGET,
};

/// In-memory I/O channel.
pub mod io;
pub use io::BufferChannel;

/// The machine aggregate: construction, editing and execution.
pub mod machine;
pub use machine::{Machine, MachineSnapshot};

/// Structural traversal of a machine.
pub mod visit;
pub use visit::{
    machines_equivalent, MachineVisitor, MicroinstructionVisitor, ModuleKind, ModuleVisitor,
    StructureRecorder, Traversal, ValidationIssue, Validator, VisitResult,
};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
