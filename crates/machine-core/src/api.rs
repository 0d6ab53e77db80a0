//! Host-facing configuration, I/O and tracing contracts.

use std::collections::BTreeMap;

use crate::modules::Sequence;
use crate::{ComponentId, SimResult};

/// Default number of micros [`crate::Machine::run`] executes before giving up.
pub const DEFAULT_MICRO_BUDGET: u64 = 100_000;

/// Machine-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MachineConfig {
    /// Bit offset 0 is the least significant bit when set, the most
    /// significant bit otherwise.
    pub index_from_right: bool,
    /// Address at which a loader places assembled programs.
    pub starting_address_for_loading: u32,
    /// Upper bound on micros per [`crate::Machine::run`] call.
    pub micro_budget: u64,
    /// Emits [`TraceEvent`]s to the sink passed to execution calls.
    pub tracing_enabled: bool,
    /// Lets runs stop at RAM breakpoints.
    pub halt_at_breakpoints: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            index_from_right: true,
            starting_address_for_loading: 0,
            micro_budget: DEFAULT_MICRO_BUDGET,
            tracing_enabled: false,
            halt_at_breakpoints: true,
        }
    }
}

/// Value encoding used by fixed-width I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum IoKind {
    /// Integer literal.
    Long,
    /// One 8-bit character.
    Ascii,
    /// One 16-bit UTF-16 code unit.
    Unicode,
}

/// I/O channel contract consumed by `Io` microinstructions.
///
/// Reads may block. A read aborted by the host returns
/// [`crate::SimError::ExecutionCancelled`] after the channel has cleared its
/// buffers.
pub trait IoPort {
    /// Reads one value of `kind` that fits `width` bits.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SimError::ExecutionCancelled`] when the read is aborted
    /// and [`crate::SimError::Range`] or [`crate::SimError::Format`] for input
    /// that does not fit.
    fn read_fixed_width(&mut self, kind: IoKind, width: u32) -> SimResult<i64>;

    /// Writes one value of `kind` taken from the low `width` bits of `value`.
    ///
    /// # Errors
    ///
    /// Implementation-defined transport failures.
    fn write_fixed_width(&mut self, kind: IoKind, value: i64, width: u32) -> SimResult<()>;

    /// Reads a line of text after showing `prompt`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SimError::ExecutionCancelled`] when the read is aborted.
    fn read_string(&mut self, prompt: &str) -> SimResult<String>;

    /// Writes text.
    ///
    /// # Errors
    ///
    /// Implementation-defined transport failures.
    fn write_string(&mut self, text: &str) -> SimResult<()>;

    /// Flushes pending output; input buffers are dropped unless
    /// `save_input_buffers` is set.
    fn flush(&mut self, save_input_buffers: bool);

    /// Returns the channel to its idle state.
    fn reset(&mut self);
}

/// Resolves the channel names used by `Io` microinstructions.
pub trait IoChannels {
    /// Port registered under `name`.
    fn channel(&mut self, name: &str) -> Option<&mut dyn IoPort>;
}

impl<P: IoPort> IoChannels for BTreeMap<String, P> {
    fn channel(&mut self, name: &str) -> Option<&mut dyn IoPort> {
        self.get_mut(name).map(|port| port as &mut dyn IoPort)
    }
}

/// Channel set with no channels, for machines without I/O.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoChannels;

impl IoChannels for NoChannels {
    fn channel(&mut self, _name: &str) -> Option<&mut dyn IoPort> {
        None
    }
}

/// Result of executing one microinstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MicroOutcome {
    /// The cursor moved on within the current sequence.
    Continued,
    /// An `End` micro completed the current machine instruction.
    Ended,
    /// A halt-on-set condition bit was set by this micro.
    HaltBitSet {
        /// The condition bit.
        bit: ComponentId,
    },
}

/// Why [`crate::Machine::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStop {
    /// A halt-on-set condition bit was set.
    Halted {
        /// The condition bit.
        bit: ComponentId,
    },
    /// The program counter reached a RAM cell marked as a breakpoint.
    Breakpoint {
        /// Marked code-store address.
        address: u64,
    },
    /// The configured micro budget ran out.
    BudgetExhausted,
}

/// Summary of a [`crate::Machine::run`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunOutcome {
    /// Micros executed.
    pub micros: u64,
    /// Machine instructions completed by an `End` micro.
    pub instructions: u64,
    /// Reason the run stopped.
    pub stop: RunStop,
}

/// Execution events emitted when tracing is enabled.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TraceEvent {
    /// A micro is about to execute.
    MicroStart {
        /// The micro.
        micro: ComponentId,
        /// Sequence it belongs to.
        sequence: Sequence,
        /// Its index within the sequence.
        index: usize,
    },
    /// A register changed.
    RegisterWrite {
        /// The register.
        register: ComponentId,
        /// Value before the write.
        previous: i64,
        /// Value after the write.
        current: i64,
    },
    /// A RAM cell changed.
    CellWrite {
        /// The RAM.
        ram: ComponentId,
        /// Cell address.
        address: u32,
        /// Contents before the write.
        previous: i64,
        /// Contents after the write.
        current: i64,
    },
    /// A condition bit was written.
    ConditionBitWrite {
        /// The condition bit.
        bit: ComponentId,
        /// Written state.
        value: bool,
    },
    /// `Decode` selected a machine instruction.
    InstructionDecoded {
        /// The selected instruction.
        instruction: ComponentId,
    },
}

/// Receiver of [`TraceEvent`]s.
pub trait TraceSink {
    /// Records an event in execution order.
    fn on_event(&mut self, event: TraceEvent);
}

impl TraceSink for Vec<TraceEvent> {
    fn on_event(&mut self, event: TraceEvent) {
        self.push(event);
    }
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTrace;

impl TraceSink for NullTrace {
    fn on_event(&mut self, _event: TraceEvent) {}
}
