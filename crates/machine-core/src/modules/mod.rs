//! Hardware modules: registers, register arrays, condition bits, RAMs and the
//! control unit.

/// Condition bits backed by one bit of a register.
pub mod condition_bit;
/// Control-unit execution cursor.
pub mod control_unit;
/// Cell-addressed memory.
pub mod ram;
/// Width-checked storage registers.
pub mod register;
/// Ordered groups of registers.
pub mod register_array;

pub use condition_bit::ConditionBit;
pub use control_unit::{ControlUnit, ControlUnitState, Sequence};
pub use ram::{CellChange, Ram, RamLocation, SourceLine};
pub use register::{Access, Register, MAX_REGISTER_WIDTH};
pub use register_array::RegisterArray;
