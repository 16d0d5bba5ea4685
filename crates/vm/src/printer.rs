//! Pretty-printing of tagged values for the CLI's result display.
//!
//! Numbers print bare, strings/symbols double-quoted (the backtick
//! shorthand is a source-only convenience and never appears in output),
//! refs resolve before printing, and lists walk their payload recursively.

use tacitus_core::{Arena, TaggedValue};

use crate::digest::Digest;
use crate::error::ErrorKind;
use crate::vm::Vm;

/// Follows at most one hop past the initial dereference, same limit as
/// `refs::resolve`, but also tracks the address a list header was found at
/// — formatting a list needs its header's cell address to locate payload
/// cells, which a bare `TaggedValue` does not carry.
fn deref_for_print(arena: &Arena, addr: u32, v: TaggedValue) -> Result<(u32, TaggedValue), ErrorKind> {
    if !v.is_ref() {
        return Ok((addr, v));
    }
    let target = v.payload();
    let next = arena.read(target)?;
    if next.is_ref() {
        let target2 = next.payload();
        let final_v = arena.read(target2)?;
        if final_v.is_ref() {
            return Err(ErrorKind::RefError("ref chain longer than one hop".into()));
        }
        Ok((target2, final_v))
    } else {
        Ok((target, next))
    }
}

pub fn format_value(arena: &Arena, digest: &Digest, addr: u32) -> Result<String, ErrorKind> {
    let v = arena.read(addr)?;
    let (addr, v) = deref_for_print(arena, addr, v)?;
    render(arena, digest, addr, v)
}

fn render(arena: &Arena, digest: &Digest, addr: u32, v: TaggedValue) -> Result<String, ErrorKind> {
    if let Some(n) = v.as_number() {
        return Ok(format_number(n));
    }
    if v.is_nil() {
        return Ok("nil".to_string());
    }
    if v.is_string() {
        let text = digest.get(v.payload()).unwrap_or("");
        return Ok(format!("\"{}\"", escape(text)));
    }
    if v.is_list() {
        let n = v.payload();
        let base = addr - n;
        let mut parts = Vec::with_capacity(n as usize);
        for i in 0..n {
            parts.push(format_value(arena, digest, base + i)?);
        }
        return Ok(format!("( {} )", parts.join(" ")));
    }
    if v.is_code() {
        return Ok(format!("<code:{}>", v.payload()));
    }
    if v.is_builtin() {
        return Ok(format!("<builtin:{}>", v.payload()));
    }
    Ok(format!("<tagged:{:#x}>", v.bits()))
}

fn format_number(n: f32) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Renders the final data stack bottom-to-top, treating each literal list
/// as one multi-cell span rather than `n + 1` separate top-level values.
pub fn format_stack(vm: &Vm) -> Result<Vec<String>, ErrorKind> {
    let base = vm.arena.stack_base();
    let mut top = vm.sp;
    let mut out = Vec::new();
    while top > base {
        let cell_addr = top - 1;
        let v = vm.arena.read(cell_addr)?;
        let span = if v.is_list() { v.payload() + 1 } else { 1 };
        out.push(format_value(&vm.arena, &vm.digest, cell_addr)?);
        top -= span;
    }
    out.reverse();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler;
    use crate::config::VmConfig;

    fn render_source(src: &str) -> Vec<String> {
        let mut vm = Vm::new(VmConfig::default());
        let entry = compiler::compile(&mut vm, src).unwrap();
        vm.run(entry).unwrap();
        format_stack(&vm).unwrap()
    }

    #[test]
    fn numbers_print_bare() {
        assert_eq!(render_source("1 2 +"), vec!["3"]);
    }

    #[test]
    fn strings_print_quoted() {
        assert_eq!(render_source(r#""hi""#), vec!["\"hi\""]);
    }

    #[test]
    fn nil_prints_as_nil() {
        assert_eq!(render_source("( 1 ) 9 get"), vec!["nil"]);
    }

    #[test]
    fn list_prints_recursively() {
        assert_eq!(render_source("( 1 2 3 )"), vec!["( 1 2 3 )"]);
    }

    #[test]
    fn ref_resolves_before_printing() {
        assert_eq!(render_source("10 -> x &x"), vec!["10"]);
    }
}
