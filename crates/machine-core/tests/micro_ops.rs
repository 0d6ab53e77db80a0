//! Per-category microinstruction behavior and machine editing.

use machine_core::micro::{
    Arithmetic, ArithmeticOp, ArrayIndex, Increment, Logical, LogicalOp, MemoryAccess,
    MemoryDirection, Shift, ShiftDirection, ShiftKind, TransferAtoR, TransferRtoA, TransferRtoR,
};
use machine_core::{
    Component, ComponentId, ErrorKind, Machine, MicroOp, NoChannels, NullTrace, SimError,
};
use rstest::rstest;

use log as _;
use proptest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

/// Machine with `a`, `b` and `d` registers of `width` bits plus `v`/`c` flags.
struct Bench {
    machine: Machine,
    a: ComponentId,
    b: ComponentId,
    d: ComponentId,
    v: ComponentId,
    c: ComponentId,
}

impl Bench {
    fn new(width: u32) -> Self {
        let mut machine = Machine::new("bench");
        let a = machine.add_register("a", width).unwrap();
        let b = machine.add_register("b", width).unwrap();
        let d = machine.add_register("d", width).unwrap();
        let status = machine.add_register("status", 2).unwrap();
        let v = machine.add_condition_bit("v", status, 0, false).unwrap();
        let c = machine.add_condition_bit("c", status, 1, false).unwrap();
        Self {
            machine,
            a,
            b,
            d,
            v,
            c,
        }
    }

    fn set(&mut self, register: ComponentId, value: i64) {
        self.machine
            .register_mut(register)
            .unwrap()
            .set_value(value)
            .unwrap();
    }

    fn value(&self, register: ComponentId) -> i64 {
        self.machine.register(register).unwrap().value()
    }

    fn flag(&self, bit: ComponentId) -> bool {
        self.machine.condition_bit_state(bit).unwrap()
    }

    fn exec(&mut self, op: MicroOp) -> Result<(), SimError> {
        let micro = self.machine.add_micro("op", op)?;
        self.machine.set_fetch_sequence(vec![micro])?;
        self.machine.control_unit_mut().reset();
        self.machine
            .execute_micro(&mut NoChannels, &mut NullTrace)
            .map(|_| ())
    }
}

#[rstest]
#[case::add(ArithmeticOp::Add, 100, 50, -106, true, false)]
#[case::add_carry(ArithmeticOp::Add, -1, 1, 0, false, true)]
#[case::subtract(ArithmeticOp::Subtract, 5, 7, -2, false, true)]
#[case::subtract_overflow(ArithmeticOp::Subtract, -128, 1, 127, true, false)]
#[case::multiply(ArithmeticOp::Multiply, 20, 10, -56, true, false)]
#[case::multiply_small(ArithmeticOp::Multiply, -3, 4, -12, false, true)]
#[case::divide(ArithmeticOp::Divide, -7, 2, -3, false, false)]
#[case::divide_overflow(ArithmeticOp::Divide, -128, -1, -128, true, false)]
fn arithmetic_on_eight_bits(
    #[case] op: ArithmeticOp,
    #[case] x: i64,
    #[case] y: i64,
    #[case] result: i64,
    #[case] overflow: bool,
    #[case] carry: bool,
) {
    let mut bench = Bench::new(8);
    bench.set(bench.a, x);
    bench.set(bench.b, y);
    let (a, b, d, v, c) = (bench.a, bench.b, bench.d, bench.v, bench.c);
    bench
        .exec(MicroOp::Arithmetic(Arithmetic {
            op,
            source1: a,
            source2: b,
            destination: d,
            overflow_bit: Some(v),
            carry_bit: Some(c),
        }))
        .unwrap();
    assert_eq!(bench.value(d), result);
    assert_eq!(bench.flag(v), overflow);
    assert_eq!(bench.flag(c), carry);
}

#[test]
fn division_by_zero_names_the_micro() {
    let mut bench = Bench::new(8);
    bench.set(bench.a, 9);
    let (a, b, d) = (bench.a, bench.b, bench.d);
    let err = bench
        .exec(MicroOp::Arithmetic(Arithmetic {
            op: ArithmeticOp::Divide,
            source1: a,
            source2: b,
            destination: d,
            overflow_bit: None,
            carry_bit: None,
        }))
        .unwrap_err();
    let op = bench.machine.find_by_name("op").unwrap();
    assert_eq!(err, SimError::DivideByZero { micro: op });
    assert_eq!(bench.value(d), 0);
}

#[rstest]
#[case::and(LogicalOp::And, 0b1100, 0b1010, 0b1000)]
#[case::or(LogicalOp::Or, 0b1100, 0b1010, 0b1110)]
#[case::nand(LogicalOp::Nand, 0b1100, 0b1010, -9)]
#[case::nor(LogicalOp::Nor, 0b1100, 0b1010, -15)]
#[case::xor(LogicalOp::Xor, 0b1100, 0b1010, 0b0110)]
#[case::not(LogicalOp::Not, 0b1100, 0, -13)]
fn logical_on_eight_bits(
    #[case] op: LogicalOp,
    #[case] x: i64,
    #[case] y: i64,
    #[case] result: i64,
) {
    let mut bench = Bench::new(8);
    bench.set(bench.a, x);
    bench.set(bench.b, y);
    let (a, b, d) = (bench.a, bench.b, bench.d);
    bench
        .exec(MicroOp::Logical(Logical {
            op,
            source1: a,
            source2: b,
            destination: d,
        }))
        .unwrap();
    assert_eq!(bench.value(d), result);
}

#[rstest]
#[case::logical_left(ShiftKind::Logical, ShiftDirection::Left, 2, 0b0100_0001, 0b0000_0100)]
#[case::logical_right(ShiftKind::Logical, ShiftDirection::Right, 1, -128, 0b0100_0000)]
#[case::arithmetic_right(ShiftKind::Arithmetic, ShiftDirection::Right, 2, -128, -32)]
#[case::arithmetic_left(ShiftKind::Arithmetic, ShiftDirection::Left, 1, 0b0100_0000, -128)]
#[case::cyclic_left(ShiftKind::Cyclic, ShiftDirection::Left, 1, -127, 3)]
#[case::cyclic_right(ShiftKind::Cyclic, ShiftDirection::Right, 1, 3, -127)]
#[case::logical_far(ShiftKind::Logical, ShiftDirection::Left, 64, 1, 0)]
fn shifts_on_eight_bits(
    #[case] kind: ShiftKind,
    #[case] direction: ShiftDirection,
    #[case] distance: u32,
    #[case] x: i64,
    #[case] result: i64,
) {
    let mut bench = Bench::new(8);
    bench.set(bench.a, x);
    let (a, d) = (bench.a, bench.d);
    bench
        .exec(MicroOp::Shift(Shift {
            source: a,
            destination: d,
            kind,
            direction,
            distance,
        }))
        .unwrap();
    assert_eq!(bench.value(d), result);
}

#[test]
fn register_transfer_moves_only_the_field() {
    let mut bench = Bench::new(8);
    bench.set(bench.a, 0b1011_0000);
    bench.set(bench.d, 0b0000_0001);
    let (a, d) = (bench.a, bench.d);
    bench
        .exec(MicroOp::TransferRtoR(TransferRtoR {
            source: a,
            src_start: 4,
            destination: d,
            dest_start: 1,
            num_bits: 4,
        }))
        .unwrap();
    assert_eq!(bench.value(d), 0b0001_0111);
}

#[test]
fn array_transfers_select_elements_through_the_index_field() {
    let mut machine = Machine::new("arrays");
    let file = machine.add_register_array("file", 4, 8).unwrap();
    let src = machine.add_register("src", 8).unwrap();
    let dst = machine.add_register("dst", 8).unwrap();
    let index = machine.add_register("index", 8).unwrap();
    machine.register_mut(src).unwrap().set_value(42).unwrap();
    // Element number lives in bits 4..6 of `index`.
    machine.register_mut(index).unwrap().set_value(0b0010_0000).unwrap();
    let selector = ArrayIndex {
        register: index,
        start: 4,
        num_bits: 2,
    };
    let store = machine
        .add_micro(
            "store",
            MicroOp::TransferRtoA(TransferRtoA {
                source: src,
                src_start: 0,
                destination: file,
                dest_start: 0,
                num_bits: 8,
                index: selector.clone(),
            }),
        )
        .unwrap();
    let load = machine
        .add_micro(
            "load",
            MicroOp::TransferAtoR(TransferAtoR {
                source: file,
                src_start: 0,
                destination: dst,
                dest_start: 0,
                num_bits: 8,
                index: selector,
            }),
        )
        .unwrap();
    machine.set_fetch_sequence(vec![store, load]).unwrap();
    machine.execute_micro(&mut NoChannels, &mut NullTrace).unwrap();
    machine.execute_micro(&mut NoChannels, &mut NullTrace).unwrap();

    let array = machine.register_array(file).unwrap();
    assert_eq!(array.get(2).unwrap().value(), 42);
    assert_eq!(array.get(1).unwrap().value(), 0);
    assert_eq!(machine.register(dst).unwrap().value(), 42);
}

#[test]
fn memory_writes_span_cells_and_reject_overruns() {
    let mut machine = Machine::new("mem");
    let ram = machine.add_ram("ram", 4, 8).unwrap();
    let data = machine.add_register("data", 16).unwrap();
    let addr = machine.add_register("addr", 8).unwrap();
    machine.register_mut(data).unwrap().set_value(0x1234).unwrap();
    let write = machine
        .add_micro(
            "write",
            MicroOp::MemoryAccess(MemoryAccess {
                direction: MemoryDirection::Write,
                memory: ram,
                data,
                address: addr,
            }),
        )
        .unwrap();
    machine.set_fetch_sequence(vec![write, write]).unwrap();
    machine.execute_micro(&mut NoChannels, &mut NullTrace).unwrap();
    assert_eq!(machine.ram(ram).unwrap().cell(0).unwrap(), 0x12);
    assert_eq!(machine.ram(ram).unwrap().cell(1).unwrap(), 0x34);

    machine.register_mut(addr).unwrap().set_value(3).unwrap();
    let err = machine
        .execute_micro(&mut NoChannels, &mut NullTrace)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Address);
    assert_eq!(machine.ram(ram).unwrap().cell(3).unwrap(), 0);
}

#[test]
fn branch_moves_within_the_sequence_and_rejects_negative_targets() {
    let mut machine = Machine::new("branch");
    let forward = machine
        .add_micro("forward", MicroOp::Branch { amount: 2 })
        .unwrap();
    let back = machine
        .add_micro("back", MicroOp::Branch { amount: -5 })
        .unwrap();
    machine
        .set_fetch_sequence(vec![forward, back, back])
        .unwrap();
    machine.execute_micro(&mut NoChannels, &mut NullTrace).unwrap();
    assert_eq!(machine.control_unit().micro_index(), 2);
    let err = machine
        .execute_micro(&mut NoChannels, &mut NullTrace)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(machine.control_unit().micro_index(), 2);
}

#[test]
fn running_off_the_end_of_a_sequence_is_reported() {
    let mut machine = Machine::new("empty");
    let err = machine
        .execute_micro(&mut NoChannels, &mut NullTrace)
        .unwrap_err();
    assert_eq!(err, SimError::SequenceExhausted { index: 0, len: 0 });
}

#[test]
fn removing_a_micro_strips_it_from_every_sequence() {
    let mut bench = Bench::new(8);
    let note = bench
        .machine
        .add_micro("note", MicroOp::Comment { text: "x".into() })
        .unwrap();
    bench.machine.set_fetch_sequence(vec![note, note]).unwrap();
    let field = bench.machine.add_field("op", 4).unwrap();
    let end = bench.machine.end_micro();
    let ins = bench
        .machine
        .add_instruction("nop", 0, vec![field], vec![note, end])
        .unwrap();

    bench.machine.remove(note).unwrap();

    assert!(bench.machine.fetch_sequence().is_empty());
    assert_eq!(bench.machine.instruction(ins).unwrap().micros, vec![end]);
}

#[test]
fn modules_in_use_report_their_users() {
    let mut bench = Bench::new(8);
    let (a, b, d) = (bench.a, bench.b, bench.d);
    let add = bench
        .machine
        .add_micro(
            "add",
            MicroOp::Arithmetic(Arithmetic {
                op: ArithmeticOp::Add,
                source1: a,
                source2: b,
                destination: d,
                overflow_bit: None,
                carry_bit: None,
            }),
        )
        .unwrap();
    assert_eq!(bench.machine.users_of(a), vec![add]);
    let err = bench.machine.remove(a).unwrap_err();
    assert_eq!(
        err,
        SimError::ModuleInUse {
            id: a,
            users: vec![add]
        }
    );

    bench.machine.remove(add).unwrap();
    bench.machine.remove(a).unwrap();
    assert!(bench.machine.register(a).is_err());
}

#[test]
fn shrinking_an_array_keeps_referenced_elements() {
    let mut machine = Machine::new("resize");
    let file = machine.add_register_array("file", 4, 8).unwrap();
    let last = machine.register_array(file).unwrap().registers()[3].id();
    let poke = machine
        .add_micro(
            "poke",
            MicroOp::Increment(Increment {
                register: last,
                delta: 1,
                overflow_bit: None,
                carry_bit: None,
            }),
        )
        .unwrap();
    let err = machine.resize_register_array(file, 2).unwrap_err();
    assert!(matches!(err, SimError::ModuleInUse { users, .. } if users == vec![poke]));

    machine.resize_register_array(file, 6).unwrap();
    assert_eq!(machine.register_array(file).unwrap().len(), 6);
}
