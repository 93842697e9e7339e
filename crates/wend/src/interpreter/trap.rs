use crate::parse::opcode::Opcode;

/// Trap reasons that can occur during execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Trap {
    #[error("unreachable executed")]
    Unreachable,
    #[error("out of bounds memory access")]
    MemoryOutOfBounds,
    #[error("integer divide by zero")]
    IntegerDivideByZero,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("invalid conversion to integer")]
    InvalidConversionToInteger,
    #[error("indirect call type mismatch")]
    IndirectCallTypeMismatch,
    #[error("undefined element")]
    UndefinedElement,
    #[error("uninitialized element")]
    UninitializedElement,
    #[error("call stack exhausted")]
    CallStackExhausted,
    #[error("out of fuel")]
    OutOfFuel,
}

/// Abnormal termination of an invocation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecError {
    #[error("trap: {0}")]
    Trap(#[from] Trap),
    /// An instruction the interpreter knows but does not implement.
    #[error("not implemented: {0:?}")]
    Unsupported(Opcode),
    #[error("host function failed: {0}")]
    Host(String),
    /// Code that does not decode; only reachable with a broken translator.
    #[error("malformed code at offset {0:#x}")]
    Malformed(usize),
}

impl ExecError {
    pub fn is_trap(&self) -> bool {
        matches!(self, ExecError::Trap(_))
    }

    pub fn trap(&self) -> Option<Trap> {
        match self {
            ExecError::Trap(trap) => Some(*trap),
            _ => None,
        }
    }
}
