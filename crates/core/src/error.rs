//! Arena-level error type.

use std::error::Error;
use std::fmt;

/// Failures raised by the arena while resolving addresses or enforcing
/// region bounds. Kept separate from VM-level errors (`tacitus_vm::VmError`)
/// so the core crate has no upward dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArenaError {
    /// A cell index fell outside every configured region.
    OutOfBounds { cell: u32 },
    /// A requested region grew past its configured capacity.
    RegionFull { region: &'static str, requested: u32, capacity: u32 },
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArenaError::OutOfBounds { cell } => {
                write!(f, "cell {cell} is outside any configured region")
            }
            ArenaError::RegionFull { region, requested, capacity } => {
                write!(
                    f,
                    "{region} region exhausted: requested cell {requested}, capacity {capacity}"
                )
            }
        }
    }
}

impl Error for ArenaError {}
