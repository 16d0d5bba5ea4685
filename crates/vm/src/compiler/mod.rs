//! The streaming compiler.
//!
//! Tokens compile to bytecode one at a time; there is no intermediate AST.
//! Control words (`:` `;` `if` `else` `when` `do` `case`) are immediate —
//! recognized directly in [`Compiler::compile_word`] rather than through a
//! dictionary flag, since a plain keyword match is simpler than threading
//! function-pointer-shaped values through the tagged-value codec for a
//! fixed, small set of compiler-only words. Everything else is a normal
//! dictionary lookup.
//!
//! Compile-time bookkeeping (branch patch addresses, `when`/`do` exit
//! targets) rides the VM's own data and return stacks, since compilation
//! fully precedes execution and every construct restores both registers to
//! baseline once its closing `;` runs.

mod tokenizer;

pub use tokenizer::{Token, Tokenizer};

use tacitus_core::TaggedValue;
use tracing::{debug_span, info_span, span::EnteredSpan, trace};

use crate::dict::{self, DictMark};
use crate::error::{ErrorKind, VmError};
use crate::opcode::{Op, FIRST_USER_CODE_ADDR};
use crate::vm::Vm;

const CLOSER_END_DEF: u32 = 0;
const CLOSER_END_IF: u32 = 1;
const CLOSER_END_WHEN: u32 = 2;
const CLOSER_END_DO: u32 = 3;

fn closer(id: u32) -> TaggedValue {
    TaggedValue::builtin(id, true)
}

fn closer_id(v: TaggedValue) -> Option<u32> {
    (v.is_builtin() && v.meta()).then(|| v.payload())
}

fn num(n: u32) -> TaggedValue {
    TaggedValue::from_number(n as f32)
}

/// Compile `source` into `vm`'s code segment, returning the entry address
/// of the compiled program's top-level sequence.
pub fn compile(vm: &mut Vm, source: &str) -> Result<u32, VmError> {
    let _span = info_span!("compile").entered();

    let tokens: Vec<Token> = Tokenizer::new(source)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| VmError::at_compile_time(ErrorKind::CompileError(e)))?;

    let mut c = Compiler::new(vm);
    c.pad_reserved_range();
    let entry = c.cp();

    let mut i = 0;
    while i < tokens.len() {
        trace!(token = ?tokens[i], "token");
        c.compile_token(&tokens, &mut i)?;
        i += 1;
    }
    c.emit(Op::Halt);
    c.finish()?;
    Ok(entry)
}

struct Compiler<'v> {
    vm: &'v mut Vm,
    in_definition: bool,
    local_count: u32,
    def_mark: Option<DictMark>,
    def_span: Option<EnteredSpan>,
}

impl<'v> Compiler<'v> {
    fn new(vm: &'v mut Vm) -> Self {
        Compiler { vm, in_definition: false, local_count: 0, def_mark: None, def_span: None }
    }

    fn cp(&self) -> u32 {
        self.vm.code.len() as u32
    }

    fn emit(&mut self, op: Op) -> u32 {
        let addr = self.cp();
        self.vm.code.push(op.as_word());
        addr
    }

    fn emit_with_operand(&mut self, op: Op, operand: u32) -> u32 {
        let addr = self.cp();
        self.vm.code.push(op.as_word());
        self.vm.code.push(operand);
        addr
    }

    /// Emits `op` with a placeholder operand, returning the operand's
    /// address so a later construct can patch it once its target is known.
    fn emit_branch_placeholder(&mut self, op: Op) -> u32 {
        self.vm.code.push(op.as_word());
        self.vm.code.push(0);
        self.cp() - 1
    }

    fn patch(&mut self, operand_addr: u32, value: u32) {
        self.vm.code[operand_addr as usize] = value;
    }

    fn emit_push_number(&mut self, n: f32) {
        self.vm.code.push(Op::PushNumber.as_word());
        self.vm.code.push(n.to_bits());
    }

    fn emit_push_tagged(&mut self, v: TaggedValue) {
        self.vm.code.push(Op::PushTagged.as_word());
        self.vm.code.push(v.bits());
    }

    /// Colon definitions and top-level code both live past this boundary so
    /// a function's address can never collide with a builtin id in `Call`'s
    /// dispatch range.
    fn pad_reserved_range(&mut self) {
        while self.cp() < FIRST_USER_CODE_ADDR {
            self.vm.code.push(Op::Halt.as_word());
        }
    }

    fn pop_num(&mut self) -> Result<u32, VmError> {
        let v = self.vm.pop()?;
        v.as_number()
            .map(|n| n as u32)
            .ok_or_else(|| VmError::at_compile_time(ErrorKind::CompileError("expected a compiler bookkeeping value".into())))
    }

    fn compile_token(&mut self, tokens: &[Token], i: &mut usize) -> Result<(), VmError> {
        match &tokens[*i] {
            Token::Number(n) => {
                self.emit_push_number(*n);
                Ok(())
            }
            Token::Str(s) => {
                let handle = self.vm.digest.intern(s);
                self.emit_push_tagged(TaggedValue::string(handle, false));
                Ok(())
            }
            Token::Ref(name) => {
                let name = name.clone();
                self.compile_name(&name, true)
            }
            Token::Word(w) => {
                let w = w.clone();
                self.compile_word(&w, tokens, i)
            }
        }
    }

    fn compile_word(&mut self, w: &str, tokens: &[Token], i: &mut usize) -> Result<(), VmError> {
        match w {
            "(" => {
                self.emit(Op::ListMark);
                Ok(())
            }
            ")" => {
                self.emit(Op::ListClose);
                Ok(())
            }
            ":" => self.open_def(tokens, i),
            ";" => self.close(),
            "if" => self.open_if(),
            "else" => self.do_else(),
            "when" | "case" => self.open_when(),
            "do" => self.open_do(),
            "->" => self.compile_assign(tokens, i),
            _ if w.starts_with('@') => {
                Err(VmError::at_compile_time(ErrorKind::CompileError(format!("'{w}': '@' is reserved"))))
            }
            _ => self.compile_name(w, false),
        }
    }

    // --- names --------------------------------------------------------

    fn compile_name(&mut self, name: &str, is_ref: bool) -> Result<(), VmError> {
        let handle = self.vm.digest.intern(name);
        let found = self
            .vm
            .dict
            .lookup(&self.vm.arena, &self.vm.digest, handle)
            .map_err(VmError::from)?;
        let Some(value) = found else {
            return Err(VmError::at_compile_time(ErrorKind::CompileError(format!("unknown word '{name}'"))));
        };

        if let Some(slot) = dict::local_slot(value) {
            self.emit_with_operand(Op::LocalRef, slot);
            if !is_ref {
                self.emit(Op::Resolve);
            }
            return Ok(());
        }

        if is_ref {
            let entry = self.entry_of(handle)?;
            self.emit_push_tagged(TaggedValue::data_ref(entry + 1));
            return Ok(());
        }

        if value.is_code() || value.is_builtin() {
            self.emit_with_operand(Op::Call, value.payload());
        } else {
            let entry = self.entry_of(handle)?;
            self.emit_push_tagged(TaggedValue::data_ref(entry + 1));
            self.emit(Op::Resolve);
        }
        Ok(())
    }

    fn entry_of(&self, handle: u32) -> Result<u32, VmError> {
        self.vm
            .dict
            .lookup_entry(&self.vm.arena, &self.vm.digest, handle)
            .map_err(VmError::from)?
            .ok_or_else(|| VmError::at_compile_time(ErrorKind::CompileError("word vanished during compilation".into())))
    }

    fn compile_assign(&mut self, tokens: &[Token], i: &mut usize) -> Result<(), VmError> {
        *i += 1;
        let name = match tokens.get(*i) {
            Some(Token::Word(w)) => w.clone(),
            _ => return Err(VmError::at_compile_time(ErrorKind::CompileError("'->' expects a name".into()))),
        };
        let handle = self.vm.digest.intern(&name);

        if self.in_definition {
            let def_gp = self.def_mark.expect("in_definition implies def_mark is set").gp;
            let existing_slot = self
                .vm
                .dict
                .lookup_entry(&self.vm.arena, &self.vm.digest, handle)
                .map_err(VmError::from)?
                .filter(|&entry| entry >= def_gp)
                .and_then(|entry| self.vm.arena.read(entry + 1).ok())
                .and_then(dict::local_slot);
            let slot = match existing_slot {
                Some(s) => s,
                None => self.alloc_local(handle)?,
            };
            self.emit_with_operand(Op::AssignLocal, slot);
        } else {
            let entry = self.vm.define_global(handle, TaggedValue::NIL)?;
            self.emit_with_operand(Op::AssignGlobal, entry + 1);
        }
        Ok(())
    }

    fn alloc_local(&mut self, handle: u32) -> Result<u32, VmError> {
        self.local_count += 1;
        let slot = self.local_count;
        self.vm
            .dict
            .define(&mut self.vm.arena, &mut self.vm.gp, handle, dict::local_marker(slot), false)
            .map_err(VmError::from)?;
        Ok(slot)
    }

    // --- colon definitions ----------------------------------------------

    fn open_def(&mut self, tokens: &[Token], i: &mut usize) -> Result<(), VmError> {
        if self.in_definition {
            return Err(VmError::at_compile_time(ErrorKind::CompileError("':' cannot nest inside another definition".into())));
        }
        *i += 1;
        let name = match tokens.get(*i) {
            Some(Token::Word(w)) => w.clone(),
            _ => return Err(VmError::at_compile_time(ErrorKind::CompileError("':' expects a name".into()))),
        };
        let handle = self.vm.digest.intern(&name);
        self.def_span = Some(debug_span!("definition", word = %name).entered());

        // Definitions are compiled inline with top-level code, so a branch
        // over the body keeps the surrounding sequence from falling into it.
        let branch_addr = self.emit_branch_placeholder(Op::Branch);
        let body_addr = self.cp();
        self.vm.define_global(handle, TaggedValue::code(body_addr, false))?;

        self.def_mark = Some(self.vm.dict_mark());
        self.in_definition = true;
        self.local_count = 0;
        self.vm.push(num(branch_addr))?;
        self.vm.push(closer(CLOSER_END_DEF))?;
        Ok(())
    }

    fn close_def(&mut self) -> Result<(), VmError> {
        let branch_addr = self.pop_num()?;
        self.emit(Op::Exit);
        let mark = self.def_mark.take().expect("close_def implies an open definition");
        self.vm.dict_revert(mark);
        self.patch(branch_addr, self.cp());
        self.in_definition = false;
        self.local_count = 0;
        self.def_span.take();
        Ok(())
    }

    // --- if / else --------------------------------------------------------

    fn open_if(&mut self) -> Result<(), VmError> {
        let patch_addr = self.emit_branch_placeholder(Op::IfFalseBranch);
        self.vm.push(num(patch_addr))?;
        self.vm.push(closer(CLOSER_END_IF))?;
        Ok(())
    }

    fn do_else(&mut self) -> Result<(), VmError> {
        let top = self.vm.pop()?;
        if closer_id(top) != Some(CLOSER_END_IF) {
            return Err(VmError::at_compile_time(ErrorKind::CompileError("'else' without matching 'if'".into())));
        }
        let patch_addr = self.pop_num()?;
        let new_patch_addr = self.emit_branch_placeholder(Op::Branch);
        self.patch(patch_addr, self.cp());
        self.vm.push(num(new_patch_addr))?;
        self.vm.push(closer(CLOSER_END_IF))?;
        Ok(())
    }

    fn close_if(&mut self) -> Result<(), VmError> {
        let patch_addr = self.pop_num()?;
        self.patch(patch_addr, self.cp());
        Ok(())
    }

    // --- when / do / case -------------------------------------------------

    fn open_when(&mut self) -> Result<(), VmError> {
        self.vm.push(num(self.vm.rsp))?;
        self.vm.push(closer(CLOSER_END_WHEN))?;
        Ok(())
    }

    fn open_do(&mut self) -> Result<(), VmError> {
        let top = self.vm.peek()?;
        if closer_id(top) != Some(CLOSER_END_WHEN) {
            return Err(VmError::at_compile_time(ErrorKind::CompileError("'do' without matching 'when'".into())));
        }
        let p_skip = self.emit_branch_placeholder(Op::IfFalseBranch);
        self.vm.push(num(p_skip))?;
        self.vm.push(closer(CLOSER_END_DO))?;
        Ok(())
    }

    fn close_do(&mut self) -> Result<(), VmError> {
        let p_skip = self.pop_num()?;
        let exit_addr = self.emit_branch_placeholder(Op::Branch);
        self.vm.push_return(exit_addr)?;
        self.patch(p_skip, self.cp());
        Ok(())
    }

    fn close_when(&mut self) -> Result<(), VmError> {
        let saved_rsp = self.pop_num()?;
        while self.vm.rsp > saved_rsp {
            let patch_addr = self.vm.pop_return()?;
            self.patch(patch_addr, self.cp());
        }
        Ok(())
    }

    // --- shared closer dispatch --------------------------------------------

    fn close(&mut self) -> Result<(), VmError> {
        let top = self.vm.pop()?;
        match closer_id(top) {
            Some(CLOSER_END_DEF) => self.close_def(),
            Some(CLOSER_END_IF) => self.close_if(),
            Some(CLOSER_END_WHEN) => self.close_when(),
            Some(CLOSER_END_DO) => self.close_do(),
            _ => Err(VmError::at_compile_time(ErrorKind::CompileError("';' without a matching opener".into()))),
        }
    }

    fn finish(&mut self) -> Result<(), VmError> {
        if self.in_definition {
            return Err(VmError::at_compile_time(ErrorKind::CompileError("unterminated ':' definition".into())));
        }
        if self.vm.sp != self.vm.arena.stack_base() || self.vm.rsp != self.vm.arena.rstack_base() {
            return Err(VmError::at_compile_time(ErrorKind::CompileError("unclosed control structure at end of input".into())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;

    fn run_source(src: &str) -> Vec<TaggedValue> {
        let mut vm = Vm::new(VmConfig::default());
        let entry = compile(&mut vm, src).unwrap();
        vm.run(entry).unwrap();
        vm.stack_contents().unwrap()
    }

    #[test]
    fn arithmetic() {
        let stack = run_source("1 2 +");
        assert_eq!(stack[0].as_number(), Some(3.0));
    }

    #[test]
    fn list_literal_and_index() {
        let stack = run_source("( 1 2 3 ) 0 get");
        assert_eq!(stack[0].as_number(), Some(1.0));
    }

    #[test]
    fn list_index_out_of_range_is_nil() {
        let stack = run_source("( 1 2 3 ) 5 get");
        assert!(stack[0].is_nil());
    }

    #[test]
    fn maplist_default_fallback() {
        let stack = run_source(r#"( "a" 1 "b" 2 "default" 99 ) "c" get"#);
        assert_eq!(stack[0].as_number(), Some(99.0));
    }

    #[test]
    fn colon_definition_and_call() {
        let stack = run_source(": sq dup * ; 4 sq");
        assert_eq!(stack[0].as_number(), Some(16.0));
    }

    #[test]
    fn local_assign_and_ref_resolve() {
        let stack = run_source("10 -> x x &x resolve");
        assert_eq!(stack, vec![TaggedValue::from_number(10.0), TaggedValue::from_number(10.0)]);
    }

    #[test]
    fn list_assigned_to_a_global_survives_as_a_ref() {
        let stack = run_source("( 1 2 3 ) -> lst lst 1 get");
        assert_eq!(stack.len(), 1);
        assert_eq!(stack[0].as_number(), Some(2.0));
    }

    #[test]
    fn list_assigned_to_a_local_survives_as_a_ref() {
        let stack = run_source(": f ( 1 2 3 ) -> lst lst 1 get ; f");
        assert_eq!(stack.len(), 1);
        assert_eq!(stack[0].as_number(), Some(2.0));
    }

    #[test]
    fn set_scalar_element_then_read_it_back() {
        let stack = run_source("( 1 2 3 ) -> lst lst 1 99 set lst 1 get");
        assert_eq!(stack.len(), 1);
        assert_eq!(stack[0].as_number(), Some(99.0));
    }

    #[test]
    fn set_with_a_fresh_list_value_does_not_corrupt_the_stack() {
        // The value being set is itself a multi-cell list literal; this
        // exercises the same payload-reclaim path as assignment, just
        // ahead of the key/target pops rather than at the very end of the
        // opcode. A mismatched compound write on a scalar target is
        // rejected, but the key lookup afterward must still see the real
        // key, not one of the value's stray payload cells.
        let mut vm = Vm::new(VmConfig::default());
        let err = compile(&mut vm, "( 1 2 3 ) -> lst lst 1 ( 9 9 ) set").and_then(|entry| vm.run(entry));
        assert!(matches!(err, Err(e) if matches!(e.kind, ErrorKind::Incompatible(_))));
    }

    #[test]
    fn global_assign_and_lookup() {
        let stack = run_source("10 -> g g g 1 +");
        assert_eq!(stack[0].as_number(), Some(10.0));
        assert_eq!(stack[1].as_number(), Some(11.0));
    }

    #[test]
    fn if_else_branches() {
        let mut vm = Vm::new(VmConfig::default());
        let entry = compile(&mut vm, "1 if `a else `b ;").unwrap();
        vm.run(entry).unwrap();
        let stack = vm.stack_contents().unwrap();
        assert_eq!(stack.len(), 1);
        assert_eq!(vm.digest.get(stack[0].payload()), Some("a"));

        let mut vm = Vm::new(VmConfig::default());
        let entry = compile(&mut vm, "0 if `a else `b ;").unwrap();
        vm.run(entry).unwrap();
        let stack = vm.stack_contents().unwrap();
        assert_eq!(stack.len(), 1);
        assert_eq!(vm.digest.get(stack[0].payload()), Some("b"));
    }

    #[test]
    fn when_do_dispatches_first_match() {
        let mut vm = Vm::new(VmConfig::default());
        let src = r#"when 1 do `a ; 1 do `b ; `z ;"#;
        let entry = compile(&mut vm, src).unwrap();
        vm.run(entry).unwrap();
        let stack = vm.stack_contents().unwrap();
        assert_eq!(stack.len(), 1);
        let handle = stack[0].payload();
        assert_eq!(vm.digest.get(handle), Some("a"));
    }

    #[test]
    fn unclosed_if_is_a_compile_error() {
        let mut vm = Vm::new(VmConfig::default());
        let err = compile(&mut vm, "1 if `a");
        assert!(matches!(err, Err(VmError { kind: ErrorKind::CompileError(_), .. })));
    }

    #[test]
    fn at_sigil_is_rejected() {
        let mut vm = Vm::new(VmConfig::default());
        let err = compile(&mut vm, "@x");
        assert!(matches!(err, Err(VmError { kind: ErrorKind::CompileError(_), .. })));
    }
}
