//! Microinstruction catalogue.
//!
//! A microinstruction names the modules it touches by [`ComponentId`]. The
//! machine resolves those identifiers when the micro executes, so every
//! micro is a plain value that can be cloned, compared and remapped.

#![allow(missing_docs)]

mod exec;
pub mod flags;

pub(crate) use exec::{compute, CursorUpdate, MicroEffects};

use crate::api::IoKind;
use crate::component::impl_component;
use crate::{ComponentId, MachineId};

/// Visitor grouping of microinstructions, in canonical traversal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum MicroCategory {
    /// [`MicroOp::Arithmetic`].
    Arithmetic,
    /// [`MicroOp::Branch`].
    Branch,
    /// [`MicroOp::Comment`].
    Comment,
    /// [`MicroOp::Decode`].
    Decode,
    /// [`MicroOp::End`].
    End,
    /// [`MicroOp::Increment`].
    Increment,
    /// [`MicroOp::Io`].
    Io,
    /// [`MicroOp::Logical`].
    Logical,
    /// [`MicroOp::MemoryAccess`].
    MemoryAccess,
    /// [`MicroOp::Set`].
    Set,
    /// [`MicroOp::SetCondBit`].
    SetCondBit,
    /// [`MicroOp::Shift`].
    Shift,
    /// [`MicroOp::Test`].
    Test,
    /// [`MicroOp::TransferAtoR`].
    TransferAtoR,
    /// [`MicroOp::TransferRtoA`].
    TransferRtoA,
    /// [`MicroOp::TransferRtoR`].
    TransferRtoR,
}

impl MicroCategory {
    /// Every category in traversal order.
    pub const ALL: [Self; 16] = [
        Self::Arithmetic,
        Self::Branch,
        Self::Comment,
        Self::Decode,
        Self::End,
        Self::Increment,
        Self::Io,
        Self::Logical,
        Self::MemoryAccess,
        Self::Set,
        Self::SetCondBit,
        Self::Shift,
        Self::Test,
        Self::TransferAtoR,
        Self::TransferRtoA,
        Self::TransferRtoR,
    ];
}

/// Writes a constant into a bit field of a register.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Set {
    pub register: ComponentId,
    pub start: u32,
    pub num_bits: u32,
    /// Must fit `num_bits` bits.
    pub value: i64,
}

/// Adds a constant to a register.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Increment {
    pub register: ComponentId,
    pub delta: i64,
    pub overflow_bit: Option<ComponentId>,
    pub carry_bit: Option<ComponentId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ShiftKind {
    /// Vacated bits are zero.
    Logical,
    /// Right shifts replicate the sign bit; left shifts match `Logical`.
    Arithmetic,
    /// Bits shifted out re-enter on the other side.
    Cyclic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ShiftDirection {
    Left,
    Right,
}

/// Shifts `source` by `distance` bits into `destination`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Shift {
    pub source: ComponentId,
    pub destination: ComponentId,
    pub kind: ShiftKind,
    pub direction: ShiftDirection,
    pub distance: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    /// Signed division truncating toward zero.
    Divide,
}

/// Two's-complement arithmetic over the destination's width.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Arithmetic {
    pub op: ArithmeticOp,
    pub source1: ComponentId,
    pub source2: ComponentId,
    pub destination: ComponentId,
    pub overflow_bit: Option<ComponentId>,
    pub carry_bit: Option<ComponentId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum LogicalOp {
    And,
    Or,
    Nand,
    Nor,
    Xor,
    /// Complements `source1`; `source2` is ignored.
    Not,
}

/// Bitwise logic over the destination's width.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Logical {
    pub op: LogicalOp,
    pub source1: ComponentId,
    pub source2: ComponentId,
    pub destination: ComponentId,
}

/// Copies a bit field between registers.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TransferRtoR {
    pub source: ComponentId,
    pub src_start: u32,
    pub destination: ComponentId,
    pub dest_start: u32,
    pub num_bits: u32,
}

/// Array element picked by a bit field of an index register.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ArrayIndex {
    pub register: ComponentId,
    pub start: u32,
    pub num_bits: u32,
}

/// Copies a bit field of a register into a register-array element.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TransferRtoA {
    pub source: ComponentId,
    pub src_start: u32,
    pub destination: ComponentId,
    pub dest_start: u32,
    pub num_bits: u32,
    pub index: ArrayIndex,
}

/// Copies a bit field of a register-array element into a register.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TransferAtoR {
    pub source: ComponentId,
    pub src_start: u32,
    pub destination: ComponentId,
    pub dest_start: u32,
    pub num_bits: u32,
    pub index: ArrayIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl Comparison {
    /// Applies the comparison.
    #[must_use]
    pub const fn holds(self, lhs: i64, rhs: i64) -> bool {
        match self {
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Lt => lhs < rhs,
            Self::Gt => lhs > rhs,
            Self::Le => lhs <= rhs,
            Self::Ge => lhs >= rhs,
        }
    }
}

/// Skips `omission` micros when a signed bit field compares true.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Test {
    pub register: ComponentId,
    pub start: u32,
    pub num_bits: u32,
    pub comparison: Comparison,
    pub value: i64,
    pub omission: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum IoDirection {
    Input,
    Output,
}

/// Moves one value between a register and an I/O channel.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Io {
    pub kind: IoKind,
    pub buffer: ComponentId,
    pub direction: IoDirection,
    pub channel: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum MemoryDirection {
    Read,
    Write,
}

/// Moves `data.width` bits between a register and RAM at the address held
/// in `address`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MemoryAccess {
    pub direction: MemoryDirection,
    pub memory: ComponentId,
    pub data: ComponentId,
    pub address: ComponentId,
}

/// Operation performed by a microinstruction.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum MicroOp {
    Set(Set),
    Increment(Increment),
    Shift(Shift),
    Arithmetic(Arithmetic),
    Logical(Logical),
    TransferRtoR(TransferRtoR),
    TransferRtoA(TransferRtoA),
    TransferAtoR(TransferAtoR),
    /// Moves the cursor by `amount` micros within the current sequence.
    Branch {
        amount: i64,
    },
    /// Selects the machine instruction whose opcode matches the leftmost bits
    /// of `ir`.
    Decode {
        ir: ComponentId,
    },
    Test(Test),
    SetCondBit {
        bit: ComponentId,
        value: bool,
    },
    Io(Io),
    MemoryAccess(MemoryAccess),
    /// Annotation only.
    Comment {
        text: String,
    },
    /// Completes the current machine instruction.
    End,
}

impl MicroOp {
    /// Visitor grouping.
    #[must_use]
    pub const fn category(&self) -> MicroCategory {
        match self {
            Self::Set(_) => MicroCategory::Set,
            Self::Increment(_) => MicroCategory::Increment,
            Self::Shift(_) => MicroCategory::Shift,
            Self::Arithmetic(_) => MicroCategory::Arithmetic,
            Self::Logical(_) => MicroCategory::Logical,
            Self::TransferRtoR(_) => MicroCategory::TransferRtoR,
            Self::TransferRtoA(_) => MicroCategory::TransferRtoA,
            Self::TransferAtoR(_) => MicroCategory::TransferAtoR,
            Self::Branch { .. } => MicroCategory::Branch,
            Self::Decode { .. } => MicroCategory::Decode,
            Self::Test(_) => MicroCategory::Test,
            Self::SetCondBit { .. } => MicroCategory::SetCondBit,
            Self::Io(_) => MicroCategory::Io,
            Self::MemoryAccess(_) => MicroCategory::MemoryAccess,
            Self::Comment { .. } => MicroCategory::Comment,
            Self::End => MicroCategory::End,
        }
    }

    /// Every module referenced by this operation, in field order.
    #[must_use]
    pub fn references(&self) -> Vec<ComponentId> {
        let mut op = self.clone();
        op.reference_slots().into_iter().map(|slot| *slot).collect()
    }

    /// Returns `true` when this operation references `module`.
    #[must_use]
    pub fn uses(&self, module: ComponentId) -> bool {
        self.references().contains(&module)
    }

    /// Rewrites every referenced identifier through `remap`.
    pub fn remap_references(&mut self, mut remap: impl FnMut(ComponentId) -> ComponentId) {
        for slot in self.reference_slots() {
            *slot = remap(*slot);
        }
    }

    fn reference_slots(&mut self) -> Vec<&mut ComponentId> {
        match self {
            Self::Set(set) => vec![&mut set.register],
            Self::Increment(inc) => {
                let mut slots = vec![&mut inc.register];
                slots.extend(inc.overflow_bit.as_mut());
                slots.extend(inc.carry_bit.as_mut());
                slots
            }
            Self::Shift(shift) => vec![&mut shift.source, &mut shift.destination],
            Self::Arithmetic(arith) => {
                let mut slots = vec![
                    &mut arith.source1,
                    &mut arith.source2,
                    &mut arith.destination,
                ];
                slots.extend(arith.overflow_bit.as_mut());
                slots.extend(arith.carry_bit.as_mut());
                slots
            }
            Self::Logical(logic) => vec![
                &mut logic.source1,
                &mut logic.source2,
                &mut logic.destination,
            ],
            Self::TransferRtoR(t) => vec![&mut t.source, &mut t.destination],
            Self::TransferRtoA(t) => {
                vec![&mut t.source, &mut t.destination, &mut t.index.register]
            }
            Self::TransferAtoR(t) => {
                vec![&mut t.source, &mut t.destination, &mut t.index.register]
            }
            Self::Decode { ir } => vec![ir],
            Self::Test(test) => vec![&mut test.register],
            Self::SetCondBit { bit, .. } => vec![bit],
            Self::Io(io) => vec![&mut io.buffer],
            Self::MemoryAccess(access) => {
                vec![&mut access.memory, &mut access.data, &mut access.address]
            }
            Self::Branch { .. } | Self::Comment { .. } | Self::End => Vec::new(),
        }
    }
}

/// A named microinstruction owned by a machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Microinstruction {
    pub(crate) id: ComponentId,
    pub(crate) owner: MachineId,
    pub(crate) name: String,
    op: MicroOp,
}

impl_component!(Microinstruction);

impl Microinstruction {
    pub(crate) const fn new(id: ComponentId, owner: MachineId, name: String, op: MicroOp) -> Self {
        Self {
            id,
            owner,
            name,
            op,
        }
    }

    /// The operation.
    #[must_use]
    pub const fn op(&self) -> &MicroOp {
        &self.op
    }

    pub(crate) const fn op_mut(&mut self) -> &mut MicroOp {
        &mut self.op
    }

    /// Visitor grouping.
    #[must_use]
    pub const fn category(&self) -> MicroCategory {
        self.op.category()
    }

    /// Returns `true` when this micro references `module`.
    #[must_use]
    pub fn uses(&self, module: ComponentId) -> bool {
        self.op.uses(module)
    }

    pub(crate) fn reidentify(
        &self,
        id: ComponentId,
        owner: MachineId,
        remap: impl FnMut(ComponentId) -> ComponentId,
    ) -> Self {
        let mut op = self.op.clone();
        op.remap_references(remap);
        Self {
            id,
            owner,
            name: self.name.clone(),
            op,
        }
    }
}
