//! The root error type surfaced across the embedding boundary.
//!
//! Grounded on `wasmi::Error` (`crates/wasmi/src/error.rs` in the teacher
//! pack): a small struct wrapping a boxed enum so that `Result<T, Error>`
//! stays cheap to pass around even though the individual error variants can
//! carry owned `String` payloads.

use alloc::{boxed::Box, string::String};
use core::fmt::{self, Display};

/// A dynamic error produced while decoding, validating, instantiating or
/// executing a module.
///
/// Corresponds to spec §7's taxonomy: malformed, validation, trap, resource,
/// misuse.
#[derive(Debug)]
pub struct Error {
    kind: Box<ErrorKind>,
}

impl Error {
    fn new(kind: ErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Malformed(message.into()))
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation(message.into()))
    }

    pub(crate) fn resource(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resource(message.into()))
    }

    pub(crate) fn misuse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Misuse(message.into()))
    }

    pub(crate) fn trap(code: TrapCode) -> Self {
        Self::new(ErrorKind::Trap(code))
    }

    /// Returns the [`ErrorKind`] carried by this error.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Returns the [`TrapCode`] of this error if it represents a trap.
    pub fn as_trap_code(&self) -> Option<TrapCode> {
        match &*self.kind {
            ErrorKind::Trap(code) => Some(*code),
            _ => None,
        }
    }

    /// Returns `true` if this error represents a dynamic trap rather than a
    /// decode-, validation- or resource-time failure.
    pub fn is_trap(&self) -> bool {
        self.as_trap_code().is_some()
    }
}

impl From<TrapCode> for Error {
    fn from(code: TrapCode) -> Self {
        Self::trap(code)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&*self.kind, f)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// The specific kind of failure wrapped by an [`Error`].
///
/// The four non-trap variants correspond to spec §7 (1) malformed, (2)
/// validation, (4) resource and (5) misuse; traps are (3).
#[derive(Debug)]
pub enum ErrorKind {
    /// The byte stream could not be decoded: bad magic/version, a truncated
    /// LEB128, non-canonical LEB128, invalid UTF-8, or (in strict mode) an
    /// unknown section id.
    Malformed(String),
    /// The module decoded but violates one of Wasm's static rules: a type
    /// mismatch, an out-of-bounds index, a bad alignment immediate, a
    /// duplicate export name, wrong section order, and so on.
    Validation(String),
    /// A dynamic error mandated by the Wasm spec that aborted the current
    /// call. The context itself remains valid and reusable afterwards.
    Trap(TrapCode),
    /// Allocation failure or a host-imposed bound (stack height, recursion
    /// depth, memory/table maximum) was exceeded.
    Resource(String),
    /// The embedder supplied inconsistent arguments, e.g. the wrong number
    /// of call arguments or an out-of-range function index.
    Misuse(String),
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Malformed(msg) => write!(f, "malformed module: {msg}"),
            ErrorKind::Validation(msg) => write!(f, "invalid module: {msg}"),
            ErrorKind::Trap(code) => write!(f, "trap: {code}"),
            ErrorKind::Resource(msg) => write!(f, "resource error: {msg}"),
            ErrorKind::Misuse(msg) => write!(f, "misuse: {msg}"),
        }
    }
}

/// The reason a [`Trap`](ErrorKind::Trap) was raised.
///
/// Enumerates exactly the dynamic trap conditions spec §4.4 mandates.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TrapCode {
    /// Reached an `unreachable` instruction.
    Unreachable,
    /// Integer division or remainder by zero.
    DivisionByZero,
    /// Signed division overflow (`INT_MIN / -1`).
    IntegerOverflow,
    /// A `trunc` conversion saw a NaN, an infinity, or a value outside the
    /// destination integer's range.
    InvalidConversionToInteger,
    /// A linear-memory access fell outside the current memory size.
    MemoryOutOfBounds,
    /// A table access (`table.get`/`set`/`call_indirect`'s index) fell
    /// outside the current table size.
    TableOutOfBounds,
    /// `call_indirect` found a signature mismatch between the declared
    /// call type and the callee's actual type.
    IndirectCallTypeMismatch,
    /// `call_indirect` targeted a null table element.
    UninitializedElement,
    /// The value stack or call-frame stack exceeded its configured bound.
    StackOverflow,
    /// A `call`/`call_indirect` reached a declared-but-unresolved import.
    ///
    /// This crate has no host-wiring API to satisfy an import, so a module
    /// that declares one decodes and validates like any other function and
    /// only traps if the import is actually reached at runtime, rather than
    /// being rejected outright at decode time.
    UnresolvedImport,
}

impl Display for TrapCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            TrapCode::Unreachable => "unreachable instruction executed",
            TrapCode::DivisionByZero => "integer division by zero",
            TrapCode::IntegerOverflow => "integer overflow",
            TrapCode::InvalidConversionToInteger => "invalid conversion to integer",
            TrapCode::MemoryOutOfBounds => "out of bounds memory access",
            TrapCode::TableOutOfBounds => "out of bounds table access",
            TrapCode::IndirectCallTypeMismatch => "indirect call type mismatch",
            TrapCode::UninitializedElement => "uninitialized element",
            TrapCode::StackOverflow => "call stack exhausted",
            TrapCode::UnresolvedImport => "called an unresolved imported function",
        };
        write!(f, "{msg}")
    }
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
