//! Microinstruction evaluation.
//!
//! Evaluation reads machine state and produces a [`MicroEffects`] record; the
//! machine applies the record afterwards. A micro that fails therefore
//! leaves every module untouched.

#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]

use super::flags::{self, ArithResult};
use super::{
    Arithmetic, ArithmeticOp, ArrayIndex, Io, IoDirection, Logical, LogicalOp, MemoryAccess,
    MemoryDirection, MicroOp, Microinstruction, Set, Shift, ShiftDirection, ShiftKind, Test,
};
use crate::api::IoChannels;
use crate::bitfield::{check_field, extract, insert, shl, shr};
use crate::convert::{fits_in_bits, mask, sign_extend, to_unsigned};
use crate::machine::Machine;
use crate::modules::{Register, Sequence};
use crate::{Component, ComponentId, SimError, SimResult};

/// Where the control unit goes after a micro.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorUpdate {
    /// Next micro of the current sequence.
    #[default]
    Advance,
    /// Absolute index within the current sequence.
    Goto(usize),
    /// First micro of another sequence.
    Jump(Sequence),
    /// The current machine instruction is complete.
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryWrite {
    pub ram: ComponentId,
    pub address: u64,
    pub value: i64,
    pub num_bits: u32,
}

/// Pending side effects of one micro, applied in field order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MicroEffects {
    pub memory_write: Option<MemoryWrite>,
    /// Register identifier and the bit pattern to store.
    pub register_writes: Vec<(ComponentId, u64)>,
    pub condition_writes: Vec<(ComponentId, bool)>,
    pub cursor: CursorUpdate,
    pub decoded: Option<ComponentId>,
}

impl MicroEffects {
    fn write_register(&mut self, register: &Register, bits: u64) {
        self.register_writes.push((register.id(), bits));
    }

    fn write_flags(
        &mut self,
        overflow_bit: Option<ComponentId>,
        carry_bit: Option<ComponentId>,
        result: &ArithResult,
    ) {
        if let Some(bit) = overflow_bit {
            self.condition_writes.push((bit, result.flags.overflow));
        }
        if let Some(bit) = carry_bit {
            self.condition_writes.push((bit, result.flags.carry));
        }
    }
}

fn writable(register: &Register) -> SimResult<&Register> {
    if register.is_read_only() {
        return Err(SimError::invalid(format!(
            "register {} is read-only",
            register.name()
        )));
    }
    Ok(register)
}

fn offset(index: usize, delta: i128) -> SimResult<usize> {
    let target = index as i128 + delta;
    usize::try_from(target).map_err(|_| {
        SimError::invalid(format!(
            "jump target {target} is before the start of the sequence"
        ))
    })
}

/// Bit pattern of `dest` after copying `num_bits` bits out of `src`.
fn transfer_bits(
    src: &Register,
    src_start: u32,
    dest: &Register,
    dest_start: u32,
    num_bits: u32,
    index_from_right: bool,
) -> SimResult<u64> {
    check_field(src_start, num_bits, src.width())?;
    check_field(dest_start, num_bits, dest.width())?;
    let field = extract(
        src.unsigned_value(),
        src_start,
        num_bits,
        src.width(),
        index_from_right,
    );
    Ok(insert(
        dest.unsigned_value(),
        field,
        dest_start,
        num_bits,
        dest.width(),
        index_from_right,
    ))
}

fn element_index(machine: &Machine, index: &ArrayIndex, index_from_right: bool) -> SimResult<u64> {
    let register = machine.register(index.register)?;
    check_field(index.start, index.num_bits, register.width())?;
    Ok(extract(
        register.unsigned_value(),
        index.start,
        index.num_bits,
        register.width(),
        index_from_right,
    ))
}

const fn rotate(bits: u64, distance: u32, width: u32, direction: ShiftDirection) -> u64 {
    let distance = distance % width;
    if distance == 0 {
        return bits & mask(width);
    }
    let rotated = match direction {
        ShiftDirection::Left => shl(bits, distance) | shr(bits, width - distance),
        ShiftDirection::Right => shr(bits, distance) | shl(bits, width - distance),
    };
    rotated & mask(width)
}

/// Evaluates `micro` at position `index` of the current sequence.
pub fn compute(
    machine: &Machine,
    micro: &Microinstruction,
    index: usize,
    channels: &mut dyn IoChannels,
) -> SimResult<MicroEffects> {
    let ifr = machine.config().index_from_right;
    let mut effects = MicroEffects::default();

    match micro.op() {
        MicroOp::Set(set) => set_field(machine, set, ifr, &mut effects)?,
        MicroOp::Increment(inc) => {
            let reg = writable(machine.register(inc.register)?)?;
            let width = reg.width();
            let result = flags::add(reg.unsigned_value(), to_unsigned(inc.delta, width), width);
            effects.write_register(reg, result.bits);
            effects.write_flags(inc.overflow_bit, inc.carry_bit, &result);
        }
        MicroOp::Shift(shift) => shift_register(machine, shift, &mut effects)?,
        MicroOp::Arithmetic(arith) => arithmetic(machine, micro.id(), arith, &mut effects)?,
        MicroOp::Logical(logic) => logical(machine, logic, &mut effects)?,
        MicroOp::TransferRtoR(t) => {
            let src = machine.register(t.source)?;
            let dest = writable(machine.register(t.destination)?)?;
            let bits = transfer_bits(src, t.src_start, dest, t.dest_start, t.num_bits, ifr)?;
            effects.write_register(dest, bits);
        }
        MicroOp::TransferRtoA(t) => {
            let src = machine.register(t.source)?;
            let element = element_index(machine, &t.index, ifr)?;
            let dest = writable(machine.register_array(t.destination)?.get(element)?)?;
            let bits = transfer_bits(src, t.src_start, dest, t.dest_start, t.num_bits, ifr)?;
            effects.write_register(dest, bits);
        }
        MicroOp::TransferAtoR(t) => {
            let element = element_index(machine, &t.index, ifr)?;
            let src = machine.register_array(t.source)?.get(element)?;
            let dest = writable(machine.register(t.destination)?)?;
            let bits = transfer_bits(src, t.src_start, dest, t.dest_start, t.num_bits, ifr)?;
            effects.write_register(dest, bits);
        }
        MicroOp::Branch { amount } => {
            effects.cursor = CursorUpdate::Goto(offset(index, i128::from(*amount))?);
        }
        MicroOp::Decode { ir } => {
            let ir = machine.register(*ir)?;
            let instruction = decode(machine, ir)?;
            effects.cursor = CursorUpdate::Jump(Sequence::Instruction(instruction));
            effects.decoded = Some(instruction);
        }
        MicroOp::Test(test) => {
            if test_holds(machine, test, ifr)? {
                let skip = 1 + i128::from(test.omission);
                effects.cursor = CursorUpdate::Goto(offset(index, skip)?);
            }
        }
        MicroOp::SetCondBit { bit, value } => {
            machine.condition_bit(*bit)?;
            effects.condition_writes.push((*bit, *value));
        }
        MicroOp::Io(io) => transfer_io(machine, io, channels, &mut effects)?,
        MicroOp::MemoryAccess(access) => memory_access(machine, access, &mut effects)?,
        MicroOp::Comment { .. } => {}
        MicroOp::End => effects.cursor = CursorUpdate::End,
    }

    Ok(effects)
}

fn set_field(machine: &Machine, set: &Set, ifr: bool, effects: &mut MicroEffects) -> SimResult<()> {
    let reg = writable(machine.register(set.register)?)?;
    check_field(set.start, set.num_bits, reg.width())?;
    if !fits_in_bits(set.value.into(), set.num_bits) {
        return Err(SimError::range(set.value, set.num_bits));
    }
    let bits = insert(
        reg.unsigned_value(),
        to_unsigned(set.value, set.num_bits),
        set.start,
        set.num_bits,
        reg.width(),
        ifr,
    );
    effects.write_register(reg, bits);
    Ok(())
}

fn shift_register(machine: &Machine, shift: &Shift, effects: &mut MicroEffects) -> SimResult<()> {
    let src = machine.register(shift.source)?;
    let dest = writable(machine.register(shift.destination)?)?;
    let width = src.width();
    let bits = src.unsigned_value();
    let distance = shift.distance;
    let shifted = match (shift.kind, shift.direction) {
        (ShiftKind::Logical | ShiftKind::Arithmetic, ShiftDirection::Left) => {
            shl(bits, distance) & mask(width)
        }
        (ShiftKind::Logical, ShiftDirection::Right) => shr(bits, distance),
        (ShiftKind::Arithmetic, ShiftDirection::Right) => {
            to_unsigned(src.signed_value() >> distance.min(63), width)
        }
        (ShiftKind::Cyclic, direction) => rotate(bits, distance, width, direction),
    };
    effects.write_register(dest, shifted);
    Ok(())
}

fn arithmetic(
    machine: &Machine,
    micro: ComponentId,
    arith: &Arithmetic,
    effects: &mut MicroEffects,
) -> SimResult<()> {
    let a = machine.register(arith.source1)?;
    let b = machine.register(arith.source2)?;
    let dest = writable(machine.register(arith.destination)?)?;
    let width = dest.width();
    let ua = to_unsigned(a.signed_value(), width);
    let ub = to_unsigned(b.signed_value(), width);
    let result = match arith.op {
        ArithmeticOp::Add => flags::add(ua, ub, width),
        ArithmeticOp::Subtract => flags::subtract(ua, ub, width),
        ArithmeticOp::Multiply => flags::multiply(ua, ub, width),
        ArithmeticOp::Divide => {
            flags::divide(ua, ub, width).ok_or(SimError::DivideByZero { micro })?
        }
    };
    effects.write_register(dest, result.bits);
    effects.write_flags(arith.overflow_bit, arith.carry_bit, &result);
    Ok(())
}

fn logical(machine: &Machine, logic: &Logical, effects: &mut MicroEffects) -> SimResult<()> {
    let a = machine.register(logic.source1)?;
    let b = machine.register(logic.source2)?;
    let dest = writable(machine.register(logic.destination)?)?;
    let width = dest.width();
    let ua = to_unsigned(a.signed_value(), width);
    let ub = to_unsigned(b.signed_value(), width);
    let bits = match logic.op {
        LogicalOp::And => ua & ub,
        LogicalOp::Or => ua | ub,
        LogicalOp::Nand => !(ua & ub),
        LogicalOp::Nor => !(ua | ub),
        LogicalOp::Xor => ua ^ ub,
        LogicalOp::Not => !ua,
    };
    effects.write_register(dest, bits & mask(width));
    Ok(())
}

fn test_holds(machine: &Machine, test: &Test, ifr: bool) -> SimResult<bool> {
    let reg = machine.register(test.register)?;
    check_field(test.start, test.num_bits, reg.width())?;
    let field = sign_extend(
        extract(
            reg.unsigned_value(),
            test.start,
            test.num_bits,
            reg.width(),
            ifr,
        ),
        test.num_bits,
    );
    Ok(test.comparison.holds(field, test.value))
}

fn transfer_io(
    machine: &Machine,
    io: &Io,
    channels: &mut dyn IoChannels,
    effects: &mut MicroEffects,
) -> SimResult<()> {
    let buffer = machine.register(io.buffer)?;
    let port = channels
        .channel(&io.channel)
        .ok_or_else(|| SimError::UnknownChannel {
            name: io.channel.clone(),
        })?;
    match io.direction {
        IoDirection::Input => {
            let buffer = writable(buffer)?;
            let value = port.read_fixed_width(io.kind, buffer.width())?;
            effects.write_register(buffer, to_unsigned(value, buffer.width()));
        }
        IoDirection::Output => {
            port.write_fixed_width(io.kind, buffer.signed_value(), buffer.width())?;
        }
    }
    Ok(())
}

fn memory_access(
    machine: &Machine,
    access: &MemoryAccess,
    effects: &mut MicroEffects,
) -> SimResult<()> {
    let ram = machine.ram(access.memory)?;
    let data = machine.register(access.data)?;
    let address = machine.register(access.address)?.unsigned_value();
    match access.direction {
        MemoryDirection::Read => {
            let data = writable(data)?;
            let value = ram.get_data(address, data.width())?;
            effects.write_register(data, to_unsigned(value, data.width()));
        }
        MemoryDirection::Write => {
            // Bounds are checked here so the commit cannot fail halfway.
            ram.get_data(address, data.width())?;
            effects.memory_write = Some(MemoryWrite {
                ram: ram.id(),
                address,
                value: data.signed_value(),
                num_bits: data.width(),
            });
        }
    }
    Ok(())
}

/// First instruction whose opcode equals the leftmost opcode-field bits of
/// `ir`.
fn decode(machine: &Machine, ir: &Register) -> SimResult<ComponentId> {
    let bits = ir.unsigned_value();
    for instruction in machine.instructions() {
        let Some(field) = instruction.opcode_field() else {
            continue;
        };
        let opcode_bits = machine.field(field)?.num_bits;
        if opcode_bits == 0 || opcode_bits > ir.width() {
            continue;
        }
        if extract(bits, 0, opcode_bits, ir.width(), false) == instruction.opcode {
            return Ok(instruction.id());
        }
    }
    Err(SimError::UnknownOpcode { ir_value: bits })
}
