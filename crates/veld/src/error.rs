//! Runtime error model.
//!
//! Every failure surfaced by the runtime carries an [`ErrorKind`] plus a
//! human-readable message. The same type serves as the error carrier stored
//! in a failed coroutine's result and as the `Err` variant of all host-facing
//! APIs.

use std::fmt::{self, Display};

use strum::{Display as StrumDisplay, IntoStaticStr};

/// Result type alias for operations that can produce a runtime error.
pub type VmResult<T> = Result<T, VmError>;

/// The category of a runtime error.
///
/// Static verification kinds are raised while loading or resolving modules;
/// the rest are raised by the interpreter or the allocator while a program
/// runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, IntoStaticStr)]
pub enum ErrorKind {
    /// A bytecode module violated the format rules (bad index, wrong member
    /// kind, invalid id, undecodable instruction).
    ModuleFormat,
    /// An import referenced a module that is not registered.
    UnknownModule,
    /// A module exports the same name more than once.
    DuplicateExport,
    /// Module resolution encountered a cyclic import chain.
    ImportCycle,

    /// An operand had the wrong kind, a value was not callable, or an index
    /// had the wrong type.
    TypeError,
    /// A module member, local, or closure variable was read while undefined.
    NameError,
    /// Integer division or remainder by zero.
    DivisionByZero,
    /// Integer arithmetic overflowed the 64-bit range.
    Overflow,
    /// A sequence index was outside the valid range.
    IndexOutOfBounds,
    /// A record or table key was rejected or missing.
    KeyError,
    /// A coroutine stack exceeded its maximum size.
    StackOverflow,
    /// An `assert` failed.
    Assertion,
    /// A rethrown error value terminated the coroutine.
    Rethrown,

    /// The heap limit was exhausted.
    OutOfMemory,
    /// The run loop went idle while the root coroutine still waits on an
    /// unfulfilled resume token.
    Pending,
}

/// A runtime error: a kind plus a rendered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmError {
    kind: ErrorKind,
    message: String,
}

impl VmError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub(crate) fn name_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NameError, message)
    }

    pub(crate) fn key_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::KeyError, message)
    }

    pub(crate) fn index_out_of_bounds(index: i64, len: usize) -> Self {
        Self::new(
            ErrorKind::IndexOutOfBounds,
            format!("index {index} is out of bounds for length {len}"),
        )
    }

    pub(crate) fn division_by_zero() -> Self {
        Self::new(ErrorKind::DivisionByZero, "integer division by zero")
    }

    pub(crate) fn overflow(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Overflow, message)
    }

    pub(crate) fn stack_overflow() -> Self {
        Self::new(ErrorKind::StackOverflow, "coroutine stack overflow")
    }

    pub(crate) fn out_of_memory() -> Self {
        Self::new(ErrorKind::OutOfMemory, "heap limit exhausted")
    }

    /// A module format violation, locating the offending member where known.
    pub(crate) fn module_format(module: &str, message: impl Display) -> Self {
        Self::new(ErrorKind::ModuleFormat, format!("module {module}: {message}"))
    }

    pub(crate) fn unknown_module(name: &str) -> Self {
        Self::new(ErrorKind::UnknownModule, format!("module \"{name}\" was not found"))
    }

    pub(crate) fn duplicate_export(module: &str, name: &str) -> Self {
        Self::new(
            ErrorKind::DuplicateExport,
            format!("module {module}: the name \"{name}\" is exported more than once"),
        )
    }

    pub(crate) fn import_cycle(chain: &[String]) -> Self {
        Self::new(
            ErrorKind::ImportCycle,
            format!("cyclic import chain: {}", chain.join(" -> ")),
        )
    }
}

impl Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for VmError {}
