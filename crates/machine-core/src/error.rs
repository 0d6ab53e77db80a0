use thiserror::Error;

use crate::ComponentId;

/// Error classes used by execution drivers to decide how a failure is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ErrorKind {
    /// Value outside the bit-width envelope of a register or cell.
    Range,
    /// Numeric literal rejected by the literal grammar.
    Format,
    /// RAM or register-array access outside `[0, length)`.
    Address,
    /// Blocking I/O read aborted from outside the core.
    Cancelled,
    /// Malformed construction or edit parameters.
    InvalidArgument,
    /// Identifier that does not resolve, or resolves to the wrong kind.
    Reference,
    /// Failure raised while a microinstruction was running.
    Execution,
}

impl ErrorKind {
    /// Errors that abort the current machine instruction.
    ///
    /// Format errors come from host-supplied text and can be corrected and
    /// retried without touching machine state.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        !matches!(self, Self::Format)
    }
}

/// Component category named in reference errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[allow(missing_docs)]
pub enum ComponentKind {
    Register,
    RegisterArray,
    ConditionBit,
    Ram,
    Field,
    Instruction,
    Microinstruction,
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Register => "register",
            Self::RegisterArray => "register array",
            Self::ConditionBit => "condition bit",
            Self::Ram => "RAM",
            Self::Field => "field",
            Self::Instruction => "machine instruction",
            Self::Microinstruction => "microinstruction",
        };
        f.write_str(text)
    }
}

/// Every failure the machine core can report.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum SimError {
    /// A value does not fit the `[-2^(width-1), 2^width - 1]` envelope.
    #[error("value {value} does not fit in {width} bits")]
    Range {
        /// Rejected value.
        value: i128,
        /// Width of the target register or field.
        width: u32,
    },
    /// Numeric literal could not be parsed.
    #[error("invalid numeric literal {text:?}")]
    Format {
        /// Offending substring.
        text: String,
    },
    /// Address outside the valid range of a RAM or register array.
    #[error("address {address} outside valid range 0..{length}")]
    Address {
        /// Requested address (may be negative before unsigned reinterpretation).
        address: i128,
        /// Number of addressable cells or registers.
        length: usize,
    },
    /// An I/O read was cancelled by the host.
    #[error("input cancelled")]
    ExecutionCancelled,
    /// Construction or edit parameter rejected.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Human-readable description of the violated constraint.
        reason: String,
    },
    /// The identifier is not owned by this machine.
    #[error("no component with id {id}")]
    UnknownComponent {
        /// Unresolved identifier.
        id: ComponentId,
    },
    /// The identifier resolves but names a different kind of component.
    #[error("component {id} is not a {expected}")]
    WrongComponentKind {
        /// Resolved identifier.
        id: ComponentId,
        /// Kind the caller required.
        expected: ComponentKind,
    },
    /// `Decode` found no machine instruction with a matching opcode.
    #[error("no machine instruction matches IR contents {ir_value:#x}")]
    UnknownOpcode {
        /// Unsigned contents of the instruction register.
        ir_value: u64,
    },
    /// `Arithmetic` division with a zero divisor.
    #[error("division by zero in microinstruction {micro}")]
    DivideByZero {
        /// Failing microinstruction.
        micro: ComponentId,
    },
    /// The module cannot be removed while microinstructions reference it.
    #[error("component {id} is used by {} microinstruction(s)", users.len())]
    ModuleInUse {
        /// Module that was to be removed.
        id: ComponentId,
        /// Microinstructions that reference it.
        users: Vec<ComponentId>,
    },
    /// An `Io` microinstruction names a channel the host did not provide.
    #[error("no I/O channel named {name:?}")]
    UnknownChannel {
        /// Channel name.
        name: String,
    },
    /// The control unit cursor is past the end of its sequence.
    #[error("micro index {index} is past the end of the current sequence ({len} micros)")]
    SequenceExhausted {
        /// Cursor position.
        index: usize,
        /// Length of the current sequence.
        len: usize,
    },
}

impl SimError {
    /// Returns the taxonomy class for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Range { .. } => ErrorKind::Range,
            Self::Format { .. } => ErrorKind::Format,
            Self::Address { .. } => ErrorKind::Address,
            Self::ExecutionCancelled => ErrorKind::Cancelled,
            Self::InvalidArgument { .. } | Self::ModuleInUse { .. } => {
                ErrorKind::InvalidArgument
            }
            Self::UnknownComponent { .. }
            | Self::WrongComponentKind { .. }
            | Self::UnknownChannel { .. } => ErrorKind::Reference,
            Self::UnknownOpcode { .. }
            | Self::DivideByZero { .. }
            | Self::SequenceExhausted { .. } => ErrorKind::Execution,
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub(crate) fn range(value: impl Into<i128>, width: u32) -> Self {
        Self::Range {
            value: value.into(),
            width,
        }
    }
}

/// Result alias used across the crate.
pub type SimResult<T> = Result<T, SimError>;
