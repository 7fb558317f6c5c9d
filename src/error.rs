//! Error types shared across the crate.

use std::fmt;

/// A fault raised from inside the dispatch loop.
///
/// Fatal faults poison the instance (the `INVALID` register is set);
/// non-fatal conditions are reported as diagnostics and never become a
/// `VmFault` at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmFault {
    /// A memory access fell outside `0..core_size`.
    OutOfBounds { index: i64, core_size: usize },
    /// The dispatcher read an opcode byte it does not recognize.
    IllegalOpcode(i64),
    /// `run` was called on an instance that is already poisoned.
    Poisoned,
}

impl fmt::Display for VmFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmFault::OutOfBounds { index, core_size } => {
                write!(f, "( fatal 'bounds {index} {core_size} )")
            }
            VmFault::IllegalOpcode(op) => write!(f, "( fatal 'illegal-op {op} )"),
            VmFault::Poisoned => write!(f, "( fatal 'invalid )"),
        }
    }
}

impl std::error::Error for VmFault {}

/// Errors surfaced by the host-facing [`crate::runtime::Forth`] API.
#[derive(Debug)]
pub enum ForthError {
    /// Fault raised by the inner interpreter.
    Vm(VmFault),
    /// I/O failure while reading/writing a core image, block file, or
    /// source file.
    Io(std::io::Error),
    /// A core image's header did not match this host (magic, cell
    /// width, version, or endianness mismatch).
    IncompatibleImage(String),
    /// `init` was asked for fewer cells than `MINIMUM_CORE_SIZE`.
    CoreTooSmall { requested: usize, minimum: usize },
}

impl fmt::Display for ForthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForthError::Vm(fault) => write!(f, "{fault}"),
            ForthError::Io(e) => write!(f, "i/o error: {e}"),
            ForthError::IncompatibleImage(reason) => {
                write!(f, "incompatible core image: {reason}")
            }
            ForthError::CoreTooSmall { requested, minimum } => write!(
                f,
                "core size {requested} below minimum of {minimum} cells"
            ),
        }
    }
}

impl std::error::Error for ForthError {}

impl From<VmFault> for ForthError {
    fn from(f: VmFault) -> Self {
        ForthError::Vm(f)
    }
}

impl From<std::io::Error> for ForthError {
    fn from(e: std::io::Error) -> Self {
        ForthError::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, ForthError>;
