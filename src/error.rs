//! The five error kinds surfaced at the embedding boundary (spec.md §7).
//!
//! Nothing is caught internally: a `DecodeError`/`ValidationError` aborts
//! `Engine::compile`, a `LinkError`/`TrapError` aborts `Engine::instantiate`, and a
//! `TrapError` from an exported call leaves the `Instance` otherwise intact.

use crate::host::HostError;

/// Malformed input bytes, as reported by the external decoder (`wasmparser`).
#[derive(Debug, thiserror::Error)]
#[error("decode error: {0}")]
pub struct DecodeError(pub String);

/// A well-formed but ill-typed module, as reported by the external validator.
#[derive(Debug, thiserror::Error)]
#[error("validation error: {0}")]
pub struct ValidationError(pub String);

/// Instantiation failed: an import is missing or its type does not match.
#[derive(Debug, thiserror::Error)]
#[error("link error: {0}")]
pub struct LinkError(pub String);

/// A defensive bucket for internal compiler invariant violations.
///
/// Never expected to trigger on input that passed validation; its existence is the
/// fixup phase's "fail loudly" contract (spec.md §4.3).
#[derive(Debug, thiserror::Error)]
#[error("compile error: {0}")]
pub struct CompileError(pub String);

/// Runtime failure raised by the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TrapCode {
    #[error("unreachable instruction executed")]
    Unreachable,
    #[error("out of bounds memory access")]
    MemoryAccessOutOfBounds,
    #[error("out of bounds table access")]
    TableAccessOutOfBounds,
    #[error("uninitialized table element")]
    ElemUninitialized,
    #[error("integer divide by zero")]
    DivisionByZero,
    #[error("invalid conversion to integer")]
    InvalidConversionToInt,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("call stack exhausted")]
    StackOverflow,
    #[error("indirect call type mismatch")]
    UnexpectedSignature,
}

/// A trap: a non-recoverable runtime abort inside the interpreter.
#[derive(Debug, thiserror::Error)]
pub enum TrapError {
    #[error(transparent)]
    Code(#[from] TrapCode),
    /// Error raised by a host function.
    #[error("host error: {0}")]
    Host(Box<dyn HostError>),
}

impl TrapError {
    pub fn is_host(&self) -> bool {
        matches!(self, TrapError::Host(_))
    }
}

/// Top-level error returned at the embedding boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Trap(#[from] TrapError),
}

impl Error {
    /// Returns the host error carried by this error, if any.
    pub fn as_host_error(&self) -> Option<&dyn HostError> {
        match self {
            Error::Trap(TrapError::Host(e)) => Some(&**e),
            _ => None,
        }
    }
}

impl From<TrapCode> for Error {
    fn from(code: TrapCode) -> Self {
        Error::Trap(TrapError::Code(code))
    }
}
