//! Top-level compile-then-run harness: turns a source string into a
//! finished `Vm` with its final data stack, or a `VmError` pinpointing
//! where compilation or execution went wrong.

use tracing::info;

use crate::compiler;
use crate::config::VmConfig;
use crate::error::{ErrorKind, VmError};
use crate::printer;
use crate::vm::Vm;

pub struct Outcome {
    pub vm: Vm,
}

impl Outcome {
    /// Render the final data stack, bottom to top.
    pub fn render(&self) -> Result<Vec<String>, ErrorKind> {
        printer::format_stack(&self.vm)
    }
}

/// Compile and run `source` to completion under a freshly constructed `Vm`.
pub fn run_source(config: VmConfig, source: &str) -> Result<Outcome, VmError> {
    let mut vm = Vm::new(config);
    let entry = compiler::compile(&mut vm, source)?;
    info!(entry, "compiled program");
    vm.run(entry)?;
    info!(sp = vm.sp, "run finished");
    Ok(Outcome { vm })
}
