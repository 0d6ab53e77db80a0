//! Fetch/decode/execute coverage on a small accumulator machine.

use std::collections::BTreeMap;

use machine_core::micro::{
    Arithmetic, ArithmeticOp, Comparison, Increment, Io, IoDirection, MemoryAccess,
    MemoryDirection, Test,
};
use machine_core::{
    Access, BufferChannel, ComponentId, ErrorKind, IoKind, Machine, MicroOp, MicroOutcome,
    NoChannels, NullTrace, RunStop, Sequence, SimError, TraceEvent,
};
use rstest::{fixture, rstest};

use log as _;
use proptest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

const INC: i64 = 0x10;
const OUT: i64 = 0x20;
const IN: i64 = 0x30;
const DIV: i64 = 0x40;
const HALT: i64 = 0xF0;

struct Cpu {
    machine: Machine,
    pc: ComponentId,
    ir: ComponentId,
    acc: ComponentId,
    ram: ComponentId,
    halt: ComponentId,
}

impl Cpu {
    fn load(&mut self, program: &[i64]) {
        let ram = self.machine.ram_mut(self.ram).unwrap();
        for (address, word) in program.iter().enumerate() {
            ram.set_cell(address as u64, *word).unwrap();
        }
    }

    fn acc(&self) -> i64 {
        self.machine.register(self.acc).unwrap().value()
    }

    fn pc(&self) -> i64 {
        self.machine.register(self.pc).unwrap().value()
    }

    fn console() -> BTreeMap<String, BufferChannel> {
        BTreeMap::from([("console".to_owned(), BufferChannel::new())])
    }
}

/// 8-bit machine: a 4-bit opcode in the high nibble of each RAM cell.
#[fixture]
fn cpu() -> Cpu {
    let mut machine = Machine::new("acc8");
    let pc = machine.add_register("pc", 8).unwrap();
    let ir = machine.add_register("ir", 8).unwrap();
    let acc = machine.add_register("acc", 8).unwrap();
    let zero = machine
        .add_register_with("zero", 8, 0, Access::ReadOnly)
        .unwrap();
    let status = machine.add_register("status", 1).unwrap();
    let halt = machine.add_condition_bit("halt", status, 0, true).unwrap();
    let ram = machine.add_ram("main", 16, 8).unwrap();
    machine.set_code_store(Some(ram)).unwrap();
    machine.set_program_counter(Some(pc)).unwrap();

    let read = machine
        .add_micro(
            "ir<-m[pc]",
            MicroOp::MemoryAccess(MemoryAccess {
                direction: MemoryDirection::Read,
                memory: ram,
                data: ir,
                address: pc,
            }),
        )
        .unwrap();
    let bump = machine
        .add_micro(
            "pc+1",
            MicroOp::Increment(Increment {
                register: pc,
                delta: 1,
                overflow_bit: None,
                carry_bit: None,
            }),
        )
        .unwrap();
    let decode = machine.add_micro("decode", MicroOp::Decode { ir }).unwrap();
    machine.set_fetch_sequence(vec![read, bump, decode]).unwrap();

    let inc = machine
        .add_micro(
            "acc+1",
            MicroOp::Increment(Increment {
                register: acc,
                delta: 1,
                overflow_bit: None,
                carry_bit: None,
            }),
        )
        .unwrap();
    let out = machine
        .add_micro(
            "print",
            MicroOp::Io(Io {
                kind: IoKind::Long,
                buffer: acc,
                direction: IoDirection::Output,
                channel: "console".into(),
            }),
        )
        .unwrap();
    let input = machine
        .add_micro(
            "read",
            MicroOp::Io(Io {
                kind: IoKind::Long,
                buffer: acc,
                direction: IoDirection::Input,
                channel: "console".into(),
            }),
        )
        .unwrap();
    let div = machine
        .add_micro(
            "acc/zero",
            MicroOp::Arithmetic(Arithmetic {
                op: ArithmeticOp::Divide,
                source1: acc,
                source2: zero,
                destination: acc,
                overflow_bit: None,
                carry_bit: None,
            }),
        )
        .unwrap();
    let stop = machine
        .add_micro("raise", MicroOp::SetCondBit { bit: halt, value: true })
        .unwrap();

    let opcode = machine.add_field("op", 4).unwrap();
    let operand = machine.add_field("arg", 4).unwrap();
    let end = machine.end_micro();
    let encodings = [
        ("inc", INC, inc),
        ("out", OUT, out),
        ("in", IN, input),
        ("div", DIV, div),
        ("hlt", HALT, stop),
    ];
    for (name, word, micro) in encodings {
        let code = u64::try_from(word >> 4).unwrap();
        machine
            .add_instruction(name, code, vec![opcode, operand], vec![micro, end])
            .unwrap();
    }

    Cpu {
        machine,
        pc,
        ir,
        acc,
        ram,
        halt,
    }
}

#[rstest]
fn program_runs_to_the_halt_bit(mut cpu: Cpu) {
    cpu.load(&[INC, INC, OUT, HALT]);
    let mut channels = Cpu::console();

    let outcome = cpu.machine.run(&mut channels, &mut NullTrace).unwrap();

    assert_eq!(outcome.stop, RunStop::Halted { bit: cpu.halt });
    assert_eq!(outcome.instructions, 3);
    assert_eq!(outcome.micros, 3 * 5 + 4);
    assert_eq!(cpu.acc(), 2);
    assert_eq!(cpu.pc(), 4);
    assert_eq!(channels["console"].pending_output(), "2\n");
    assert!(cpu.machine.validate().is_empty());
}

#[rstest]
fn decode_jumps_into_the_matching_instruction(mut cpu: Cpu) {
    cpu.load(&[OUT]);
    for _ in 0..3 {
        cpu.machine.execute_micro(&mut NoChannels, &mut NullTrace).unwrap();
    }
    let out = cpu.machine.find_by_name("out").unwrap();
    assert_eq!(cpu.machine.control_unit().sequence(), Sequence::Instruction(out));
    assert_eq!(cpu.machine.control_unit().micro_index(), 0);
    assert_eq!(cpu.machine.register(cpu.ir).unwrap().unsigned_value(), 0x20);
}

#[rstest]
fn unknown_opcode_is_an_execution_error(mut cpu: Cpu) {
    cpu.load(&[0x70]);
    let err = cpu.machine.run(&mut NoChannels, &mut NullTrace).unwrap_err();
    assert_eq!(err, SimError::UnknownOpcode { ir_value: 0x70 });
    assert_eq!(err.kind(), ErrorKind::Execution);
}

#[rstest]
fn failing_micro_leaves_state_and_cursor_untouched(mut cpu: Cpu) {
    cpu.load(&[INC, DIV]);
    for _ in 0..8 {
        cpu.machine.execute_micro(&mut NoChannels, &mut NullTrace).unwrap();
    }
    let before = cpu.machine.backup();
    let cursor = cpu.machine.control_unit().state();

    let err = cpu
        .machine
        .execute_micro(&mut NoChannels, &mut NullTrace)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Execution);
    assert!(matches!(err, SimError::DivideByZero { .. }));
    assert_eq!(cpu.machine.backup(), before);
    assert_eq!(cpu.machine.control_unit().state(), cursor);
    assert_eq!(cpu.acc(), 1);
}

#[test]
fn halt_bit_outside_a_narrowed_register_fails_before_any_write() {
    let mut machine = Machine::new("narrowed");
    let r = machine.add_register("r", 8).unwrap();
    machine.add_condition_bit("top", r, 7, true).unwrap();
    let inc = machine
        .add_micro(
            "r+1",
            MicroOp::Increment(Increment {
                register: r,
                delta: 1,
                overflow_bit: None,
                carry_bit: None,
            }),
        )
        .unwrap();
    machine.set_fetch_sequence(vec![inc]).unwrap();
    machine.register_mut(r).unwrap().set_width(4).unwrap();

    let err = machine
        .execute_micro(&mut NoChannels, &mut NullTrace)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(machine.register(r).unwrap().value(), 0);
    assert_eq!(machine.control_unit().micro_index(), 0);
}

#[rstest]
fn input_reads_from_the_named_channel(mut cpu: Cpu) {
    cpu.load(&[IN, OUT, HALT]);
    let mut channels = BTreeMap::from([(
        "console".to_owned(),
        BufferChannel::with_input(["-5"]),
    )]);

    cpu.machine.run(&mut channels, &mut NullTrace).unwrap();

    assert_eq!(cpu.acc(), -5);
    assert_eq!(channels["console"].pending_output(), "-5\n");
    assert_eq!(channels["console"].remaining_input(), 0);
}

#[rstest]
fn exhausted_input_cancels_without_writing(mut cpu: Cpu) {
    cpu.load(&[IN]);
    let mut channels = Cpu::console();
    let err = cpu.machine.run(&mut channels, &mut NullTrace).unwrap_err();
    assert_eq!(err, SimError::ExecutionCancelled);
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(cpu.acc(), 0);
}

#[rstest]
fn missing_channel_is_a_reference_error(mut cpu: Cpu) {
    cpu.load(&[OUT]);
    let err = cpu.machine.run(&mut NoChannels, &mut NullTrace).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Reference);
}

#[rstest]
fn breakpoints_stop_at_the_start_of_a_fetch(mut cpu: Cpu) {
    cpu.load(&[INC, INC, INC, HALT]);
    cpu.machine.ram_mut(cpu.ram).unwrap().set_halt_at_breaks(true);
    cpu.machine
        .ram_mut(cpu.ram)
        .unwrap()
        .toggle_breakpoint(2)
        .unwrap();

    let first = cpu.machine.run(&mut NoChannels, &mut NullTrace).unwrap();
    assert_eq!(first.stop, RunStop::Breakpoint { address: 2 });
    assert_eq!(first.instructions, 2);
    assert_eq!(cpu.acc(), 2);

    let second = cpu.machine.run(&mut NoChannels, &mut NullTrace).unwrap();
    assert_eq!(second.stop, RunStop::Halted { bit: cpu.halt });
    assert_eq!(cpu.acc(), 3);
}

#[rstest]
fn breakpoints_are_ignored_when_disabled(mut cpu: Cpu) {
    cpu.load(&[INC, INC, HALT]);
    cpu.machine.config_mut().halt_at_breakpoints = false;
    cpu.machine.ram_mut(cpu.ram).unwrap().set_halt_at_breaks(true);
    cpu.machine
        .ram_mut(cpu.ram)
        .unwrap()
        .toggle_breakpoint(1)
        .unwrap();
    let outcome = cpu.machine.run(&mut NoChannels, &mut NullTrace).unwrap();
    assert_eq!(outcome.stop, RunStop::Halted { bit: cpu.halt });
}

#[rstest]
fn budget_bounds_a_program_that_never_halts(mut cpu: Cpu) {
    cpu.load(&[INC; 16]);
    cpu.machine.config_mut().micro_budget = 12;
    let outcome = cpu.machine.run(&mut NoChannels, &mut NullTrace).unwrap();
    assert_eq!(outcome.stop, RunStop::BudgetExhausted);
    assert_eq!(outcome.micros, 12);
    assert_eq!(outcome.instructions, 2);
}

#[rstest]
fn tracing_reports_each_write_in_order(mut cpu: Cpu) {
    cpu.load(&[INC, HALT]);
    cpu.machine.config_mut().tracing_enabled = true;
    let mut events: Vec<TraceEvent> = Vec::new();
    for _ in 0..5 {
        cpu.machine.execute_micro(&mut NoChannels, &mut events).unwrap();
    }

    let inc = cpu.machine.find_by_name("inc").unwrap();
    assert!(events.contains(&TraceEvent::InstructionDecoded { instruction: inc }));
    assert!(events.contains(&TraceEvent::RegisterWrite {
        register: cpu.acc,
        previous: 0,
        current: 1,
    }));
    let starts = events
        .iter()
        .filter(|event| matches!(event, TraceEvent::MicroStart { .. }))
        .count();
    assert_eq!(starts, 5);
}

#[rstest]
fn tracing_is_silent_by_default(mut cpu: Cpu) {
    cpu.load(&[INC]);
    let mut events: Vec<TraceEvent> = Vec::new();
    cpu.machine.execute_micro(&mut NoChannels, &mut events).unwrap();
    assert!(events.is_empty());
}

#[rstest]
fn end_returns_to_the_fetch_sequence(mut cpu: Cpu) {
    cpu.load(&[INC]);
    for _ in 0..4 {
        cpu.machine.execute_micro(&mut NoChannels, &mut NullTrace).unwrap();
    }
    let outcome = cpu.machine.execute_micro(&mut NoChannels, &mut NullTrace).unwrap();
    assert_eq!(outcome, MicroOutcome::Ended);
    assert_eq!(cpu.machine.control_unit().sequence(), Sequence::Fetch);
    assert_eq!(cpu.machine.control_unit().micro_index(), 0);
}

#[rstest]
fn backup_and_restore_step_back(mut cpu: Cpu) {
    cpu.load(&[INC, INC]);
    let snapshot = cpu.machine.backup();
    cpu.machine.config_mut().micro_budget = 10;
    cpu.machine.run(&mut NoChannels, &mut NullTrace).unwrap();
    assert_eq!(cpu.acc(), 2);

    cpu.machine.restore(&snapshot).unwrap();
    assert_eq!(cpu.acc(), 0);
    assert_eq!(cpu.pc(), 0);
    assert_eq!(cpu.machine.control_unit().sequence(), Sequence::Fetch);
}

#[rstest]
fn reset_state_restores_initial_values(mut cpu: Cpu) {
    cpu.load(&[INC, HALT]);
    cpu.machine.run(&mut NoChannels, &mut NullTrace).unwrap();
    cpu.machine.reset_state();
    assert_eq!(cpu.acc(), 0);
    assert_eq!(cpu.pc(), 0);
    assert_eq!(cpu.machine.control_unit().micro_index(), 0);
}

#[rstest]
fn micro_writes_to_read_only_registers_are_rejected(mut cpu: Cpu) {
    let zero = cpu.machine.find_by_name("zero").unwrap();
    let poke = cpu
        .machine
        .add_micro(
            "poke",
            MicroOp::Increment(Increment {
                register: zero,
                delta: 1,
                overflow_bit: None,
                carry_bit: None,
            }),
        )
        .unwrap();
    cpu.machine.set_fetch_sequence(vec![poke]).unwrap();
    let err = cpu
        .machine
        .execute_micro(&mut NoChannels, &mut NullTrace)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(cpu.machine.register(zero).unwrap().value(), 0);
}

#[rstest]
#[case::taken(Comparison::Eq, 3, 3, 2)]
#[case::not_taken(Comparison::Ne, 3, 3, 1)]
#[case::signed_less(Comparison::Lt, -1, 0, 2)]
#[case::signed_not_greater(Comparison::Gt, -1, 0, 1)]
fn test_skips_omission_micros_when_true(
    #[case] comparison: Comparison,
    #[case] contents: i64,
    #[case] value: i64,
    #[case] next: usize,
) {
    let mut machine = Machine::new("t");
    let reg = machine.add_register("r", 4).unwrap();
    machine.register_mut(reg).unwrap().set_value(contents).unwrap();
    let test = machine
        .add_micro(
            "test",
            MicroOp::Test(Test {
                register: reg,
                start: 0,
                num_bits: 4,
                comparison,
                value,
                omission: 1,
            }),
        )
        .unwrap();
    let note = machine
        .add_micro("note", MicroOp::Comment { text: "skipped".into() })
        .unwrap();
    machine.set_fetch_sequence(vec![test, note, note]).unwrap();
    machine.execute_micro(&mut NoChannels, &mut NullTrace).unwrap();
    assert_eq!(machine.control_unit().micro_index(), next);
}
