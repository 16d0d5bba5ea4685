//! VM and compiler error kinds.
//!
//! Hand-rolled rather than built on `thiserror`: the error set is small,
//! fixed, and carries the `IP` at the moment of failure so the harness can
//! report a precise location without a backtrace crate.

use std::error::Error;
use std::fmt;

use tacitus_core::ArenaError;

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    StackUnderflow,
    StackOverflow,
    ArenaBounds(ArenaError),
    TypeMismatch { expected: &'static str, found: &'static str },
    RefError(String),
    CompileError(String),
    Incompatible(String),
    UserError(String),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::StackUnderflow => write!(f, "stack underflow"),
            ErrorKind::StackOverflow => write!(f, "stack overflow"),
            ErrorKind::ArenaBounds(e) => write!(f, "arena bounds: {e}"),
            ErrorKind::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected {expected}, found {found}")
            }
            ErrorKind::RefError(msg) => write!(f, "ref error: {msg}"),
            ErrorKind::CompileError(msg) => write!(f, "compile error: {msg}"),
            ErrorKind::Incompatible(msg) => write!(f, "incompatible write: {msg}"),
            ErrorKind::UserError(msg) => write!(f, "{msg}"),
        }
    }
}

/// A `VmError` is fatal to the current top-level execution: it carries the
/// `IP` at which it occurred (0 for compile-time failures that have no
/// runtime instruction pointer yet) alongside the underlying kind.
#[derive(Debug, Clone, PartialEq)]
pub struct VmError {
    pub kind: ErrorKind,
    pub ip: u32,
}

impl VmError {
    pub fn new(kind: ErrorKind, ip: u32) -> Self {
        VmError { kind, ip }
    }

    pub fn at_compile_time(kind: ErrorKind) -> Self {
        VmError { kind, ip: 0 }
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (ip={})", self.kind, self.ip)
    }
}

impl Error for VmError {}

impl From<ArenaError> for VmError {
    fn from(e: ArenaError) -> Self {
        VmError::new(ErrorKind::ArenaBounds(e), 0)
    }
}

impl From<ArenaError> for ErrorKind {
    fn from(e: ArenaError) -> Self {
        ErrorKind::ArenaBounds(e)
    }
}
