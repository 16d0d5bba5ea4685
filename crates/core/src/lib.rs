//! Tacitus Core: the tagged-value codec and memory arena.
//!
//! This crate has no upward dependencies on the compiler or VM; it is the
//! leaf of the workspace, providing:
//!
//! - `tagged`: the 32-bit NaN-boxed `TaggedValue` codec.
//! - `arena`: the segmented linear cell array (globals / data stack /
//!   return stack) and its bounds checking.
//! - `error`: `ArenaError`, the error type arena operations return.

pub mod arena;
pub mod error;
pub mod tagged;

pub use arena::{Arena, ArenaConfig, Region};
pub use error::ArenaError;
pub use tagged::{Tag, TaggedValue, MAX_PAYLOAD, NANBOX_BASE};
