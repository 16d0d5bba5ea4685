//! The stack VM: registers, frame protocol, and bytecode dispatch.

use tacitus_core::{Arena, TaggedValue};
use tracing::{debug, trace};

use crate::config::VmConfig;
use crate::dict::{self, DictMark, Dictionary};
use crate::digest::Digest;
use crate::error::{ErrorKind, VmError};
use crate::list::{self, PathKey};
use crate::opcode::{Op, FIRST_USER_CODE_ADDR};
use crate::refs;

/// Sentinel caller-IP value marking the outermost frame; `Exit` on this
/// frame halts the interpreter rather than jumping anywhere.
const TOPLEVEL_RETURN: u32 = u32::MAX;

pub(crate) type BuiltinFn = &'static [(&'static str, Op)];

pub const BUILTIN_WORDS: BuiltinFn = &[
    ("+", Op::Add),
    ("-", Op::Sub),
    ("*", Op::Mul),
    ("/", Op::Div),
    ("=", Op::Eq),
    ("<", Op::Lt),
    (">", Op::Gt),
    ("<=", Op::Le),
    (">=", Op::Ge),
    ("!=", Op::Ne),
    ("dup", Op::Dup),
    ("drop", Op::Drop),
    ("swap", Op::Swap),
    ("over", Op::Over),
    ("rot", Op::Rot),
    ("resolve", Op::Resolve),
    ("length", Op::BuiltinLength),
    ("head", Op::BuiltinHead),
    ("tail", Op::BuiltinTail),
    ("get", Op::BuiltinGet),
    ("set", Op::BuiltinSet),
    ("find", Op::BuiltinFind),
    ("eval", Op::BuiltinEval),
    ("fail", Op::Fail),
];

pub struct Vm {
    pub arena: Arena,
    pub dict: Dictionary,
    pub digest: Digest,
    pub code: Vec<u32>,
    pub ip: u32,
    pub sp: u32,
    pub rsp: u32,
    pub gp: u32,
    pub bp: u32,
    pub default_handle: u32,
}

impl Vm {
    pub fn new(config: VmConfig) -> Self {
        let arena = Arena::new(config.arena_config());
        let mut vm = Vm {
            sp: arena.stack_base(),
            rsp: arena.rstack_base(),
            gp: arena.global_base(),
            bp: arena.rstack_base(),
            arena,
            dict: Dictionary::new(),
            digest: Digest::new(),
            code: vec![Op::Halt.as_word()],
            default_handle: 0,
            ip: 0,
        };
        vm.default_handle = vm.digest.intern("default");
        vm.seed_builtins();
        vm
    }

    fn seed_builtins(&mut self) {
        for (name, op) in BUILTIN_WORDS {
            let handle = self.digest.intern(name);
            let value = TaggedValue::builtin(op.as_word(), false);
            self.dict
                .define(&mut self.arena, &mut self.gp, handle, value, false)
                .expect("builtin seeding must fit the globals region");
        }
    }

    pub fn dict_mark(&self) -> DictMark {
        let mark = self.dict.mark(self.gp);
        debug!(gp = self.gp, "dict_mark");
        mark
    }

    pub fn dict_revert(&mut self, mark: DictMark) {
        self.gp = self.dict.revert(mark);
        debug!(gp = self.gp, "dict_revert");
    }

    // --- data stack -----------------------------------------------------

    pub fn push(&mut self, v: TaggedValue) -> Result<(), VmError> {
        if self.sp >= self.arena.stack_top() {
            return Err(self.err(ErrorKind::StackOverflow));
        }
        self.arena.write(self.sp, v).map_err(|e| self.err(e.into()))?;
        self.sp += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<TaggedValue, VmError> {
        if self.sp <= self.arena.stack_base() {
            return Err(self.err(ErrorKind::StackUnderflow));
        }
        self.sp -= 1;
        self.arena.read(self.sp).map_err(|e| self.err(e.into()))
    }

    pub fn peek(&self) -> Result<TaggedValue, VmError> {
        if self.sp <= self.arena.stack_base() {
            return Err(self.err_const(ErrorKind::StackUnderflow));
        }
        self.arena.read(self.sp - 1).map_err(|e| self.err_const(e.into()))
    }

    pub fn stack_contents(&self) -> Result<Vec<TaggedValue>, VmError> {
        (self.arena.stack_base()..self.sp)
            .map(|c| self.arena.read(c).map_err(|e| self.err_const(e.into())))
            .collect()
    }

    // --- return stack -----------------------------------------------------

    pub(crate) fn push_return(&mut self, n: u32) -> Result<(), VmError> {
        if self.rsp >= self.arena.rstack_top() {
            return Err(self.err(ErrorKind::StackOverflow));
        }
        self.arena
            .write(self.rsp, TaggedValue::from_number(n as f32))
            .map_err(|e| self.err(e.into()))?;
        self.rsp += 1;
        Ok(())
    }

    pub(crate) fn pop_return(&mut self) -> Result<u32, VmError> {
        if self.rsp <= self.arena.rstack_base() {
            return Err(self.err(ErrorKind::StackUnderflow));
        }
        self.rsp -= 1;
        let v = self.arena.read(self.rsp).map_err(|e| self.err(e.into()))?;
        v.as_number()
            .map(|n| n as u32)
            .ok_or_else(|| self.err(ErrorKind::TypeMismatch { expected: "number", found: "tagged" }))
    }

    // --- frames -----------------------------------------------------------

    /// Push caller IP/BP and, for a function (not a block), rebind BP to
    /// the saved-BP cell just written.
    fn enter_frame(&mut self, target: u32, is_block: bool) -> Result<(), VmError> {
        debug!(target, is_block, ip = self.ip, bp = self.bp, "enter_frame");
        self.push_return(self.ip)?;
        self.push_return(self.bp)?;
        if !is_block {
            self.bp = self.rsp - 1;
        }
        self.ip = target;
        Ok(())
    }

    fn local_addr(&self, slot: i64) -> Result<u32, VmError> {
        let addr = self.bp as i64 + slot;
        u32::try_from(addr).map_err(|_| self.err(ErrorKind::ArenaBounds(tacitus_core::ArenaError::OutOfBounds { cell: self.bp })))
    }

    /// A local or global slot is a single cell, but a list literal just
    /// popped off the data stack is a multi-cell span living on that same
    /// stack. Copy it into the globals region and hand back a `DATA_REF` to
    /// the copy so the slot still fits in one cell and survives past the
    /// stack frame that built the list. Scalars and existing refs pass
    /// through untouched.
    fn materialize(&mut self, v: TaggedValue) -> Result<TaggedValue, VmError> {
        if !v.is_list() {
            return Ok(v);
        }
        let n = v.payload();
        let span = if n == 0 {
            Vec::new()
        } else {
            self.arena.read_span(self.sp, n).map_err(|e| self.err(e.into()))?.to_vec()
        };
        self.sp -= n;

        let base = self.gp;
        for (i, cell) in span.iter().enumerate() {
            self.arena.write(base + i as u32, *cell).map_err(|e| self.err(e.into()))?;
        }
        let header_addr = base + n;
        self.arena
            .write(header_addr, TaggedValue::list_header(n))
            .map_err(|e| self.err(e.into()))?;
        self.gp = header_addr + 1;
        Ok(TaggedValue::data_ref(header_addr))
    }

    /// Prepare a popped value for storage into a local or global slot. A
    /// list literal is materialized into its own `DATA_REF` and stored as
    /// that ref directly — resolving it here would immediately dereference
    /// the ref back into a header that no longer has its payload adjacent
    /// to it. Anything else is resolved, collapsing an existing ref chain
    /// down to the concrete value the slot should hold.
    fn resolve_for_storage(&mut self, v: TaggedValue) -> Result<TaggedValue, VmError> {
        if v.is_list() {
            self.materialize(v)
        } else {
            refs::resolve(&self.arena, v).map_err(|e| self.err(e))
        }
    }

    // --- running ------------------------------------------------------------

    /// Run starting at `entry`, returning once the outermost frame exits.
    pub fn run(&mut self, entry: u32) -> Result<(), VmError> {
        self.ip = entry;
        self.push_return(TOPLEVEL_RETURN)?;
        self.push_return(self.bp)?;
        self.bp = self.rsp - 1;

        loop {
            if self.step()? {
                return Ok(());
            }
        }
    }

    fn fetch(&mut self) -> Result<u32, VmError> {
        let word = *self
            .code
            .get(self.ip as usize)
            .ok_or_else(|| self.err(ErrorKind::ArenaBounds(tacitus_core::ArenaError::OutOfBounds { cell: self.ip })))?;
        self.ip += 1;
        Ok(word)
    }

    fn fetch_operand(&mut self) -> Result<u32, VmError> {
        self.fetch()
    }

    /// Execute one instruction. Returns `Ok(true)` when the outermost frame
    /// has returned (interpreter should stop).
    fn step(&mut self) -> Result<bool, VmError> {
        let opcode_ip = self.ip;
        let word = self.fetch()?;
        let op = Op::from_word(word).ok_or_else(|| {
            VmError::new(ErrorKind::TypeMismatch { expected: "opcode", found: "unknown" }, opcode_ip)
        })?;
        trace!(?op, ip = opcode_ip, sp = self.sp, rsp = self.rsp, "dispatch");

        // `operand_count` is the single source of truth for how many words
        // follow an opcode; decode through it here rather than leaving each
        // arm to fetch on its own and risk drifting out of sync with it.
        let operand = match op.operand_count() {
            0 => None,
            1 => Some(self.fetch_operand()?),
            n => unreachable!("opcode {op:?} declares {n} operand words, only 0 or 1 is supported"),
        };

        match op {
            Op::Halt => return Ok(true),
            Op::PushNumber => {
                let bits = operand.unwrap();
                self.push(TaggedValue::from_number(f32::from_bits(bits)))?;
            }
            Op::PushTagged => {
                let bits = operand.unwrap();
                self.push(TaggedValue::from_bits(bits))?;
            }
            Op::Add => self.binary_numeric(|a, b| a + b)?,
            Op::Sub => self.binary_numeric(|a, b| a - b)?,
            Op::Mul => self.binary_numeric(|a, b| a * b)?,
            Op::Div => self.binary_numeric(|a, b| a / b)?,
            Op::Eq => self.binary_compare(|a, b| a == b)?,
            Op::Lt => self.binary_compare(|a, b| a < b)?,
            Op::Gt => self.binary_compare(|a, b| a > b)?,
            Op::Le => self.binary_compare(|a, b| a <= b)?,
            Op::Ge => self.binary_compare(|a, b| a >= b)?,
            Op::Ne => self.binary_compare(|a, b| a != b)?,
            Op::Dup => {
                let v = self.peek()?;
                self.push(v)?;
            }
            Op::Drop => {
                self.pop()?;
            }
            Op::Swap => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(b)?;
                self.push(a)?;
            }
            Op::Over => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(a)?;
                self.push(b)?;
                self.push(a)?;
            }
            Op::Rot => {
                let c = self.pop()?;
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(b)?;
                self.push(c)?;
                self.push(a)?;
            }
            Op::Resolve => {
                let v = self.pop()?;
                let resolved = refs::resolve(&self.arena, v).map_err(|e| self.err(e))?;
                self.push(resolved)?;
            }
            Op::LocalRef => {
                let slot = operand.unwrap() as i64;
                let addr = self.local_addr(slot)?;
                self.push(refs::create_ref(addr))?;
            }
            Op::AssignLocal => {
                let slot = operand.unwrap() as i64;
                let addr = self.local_addr(slot)?;
                let v = self.pop()?;
                let to_store = self.resolve_for_storage(v)?;
                if addr >= self.rsp {
                    self.rsp = addr + 1;
                }
                self.arena.write(addr, to_store).map_err(|e| self.err(e.into()))?;
            }
            Op::AssignGlobal => {
                let addr = operand.unwrap();
                let v = self.pop()?;
                let to_store = self.resolve_for_storage(v)?;
                self.arena.write(addr, to_store).map_err(|e| self.err(e.into()))?;
            }
            Op::Call => {
                self.dispatch_call(operand.unwrap())?;
            }
            Op::Exit => {
                let caller_bp = self.pop_return()?;
                let caller_ip = self.pop_return()?;
                debug!(caller_ip, caller_bp, sp = self.sp, rsp = self.rsp, "exit_frame");
                self.bp = caller_bp;
                if caller_ip == TOPLEVEL_RETURN {
                    return Ok(true);
                }
                self.ip = caller_ip;
            }
            Op::Branch => {
                self.ip = operand.unwrap();
            }
            Op::IfFalseBranch => {
                let target = operand.unwrap();
                let cond = self.pop()?;
                let truthy = cond.as_number().map(|n| n != 0.0).unwrap_or(true);
                if !truthy {
                    self.ip = target;
                }
            }
            Op::ListMark => {
                self.push_return(self.sp)?;
            }
            Op::ListClose => {
                let mark = self.pop_return()?;
                let n = self.sp - mark;
                self.push(TaggedValue::list_header(n))?;
            }
            Op::BuiltinLength
            | Op::BuiltinHead
            | Op::BuiltinTail
            | Op::BuiltinGet
            | Op::BuiltinSet
            | Op::BuiltinFind
            | Op::BuiltinEval => {
                self.dispatch_builtin(op)?;
            }
            Op::Fail => {
                let v = self.pop()?;
                let msg = if v.is_string() {
                    self.digest.get(v.payload()).unwrap_or("fail").to_string()
                } else {
                    "fail".to_string()
                };
                return Err(self.err(ErrorKind::UserError(msg)));
            }
        }
        Ok(false)
    }

    fn dispatch_call(&mut self, operand: u32) -> Result<(), VmError> {
        if operand < FIRST_USER_CODE_ADDR {
            let op = Op::from_word(operand)
                .ok_or_else(|| self.err(ErrorKind::TypeMismatch { expected: "builtin id", found: "unknown" }))?;
            self.dispatch_builtin(op)
        } else {
            self.enter_frame(operand, false)
        }
    }

    fn dispatch_builtin(&mut self, op: Op) -> Result<(), VmError> {
        match op {
            Op::BuiltinLength => {
                let (header_cell, _) = self.pop_list_header()?;
                let header = self.arena.read(header_cell).map_err(|e| self.err(e.into()))?;
                let n = list::header_slot_count(header)
                    .ok_or_else(|| self.err(ErrorKind::TypeMismatch { expected: "list", found: "non-list" }))?;
                self.push(TaggedValue::from_number(n as f32))?;
                Ok(())
            }
            Op::BuiltinHead => {
                let (header_cell, popped_n) = self.pop_list_header()?;
                let result = list::get(&self.arena, header_cell, PathKey::Index(0), self.default_handle)
                    .map_err(|e| self.err(e))?;
                if let Some(n) = popped_n {
                    self.sp = header_cell - n;
                }
                self.push(result)
            }
            Op::BuiltinTail => {
                let (header_cell, popped_n) = self.pop_list_header()?;
                let header = self.arena.read(header_cell).map_err(|e| self.err(e.into()))?;
                let n = list::header_slot_count(header)
                    .ok_or_else(|| self.err(ErrorKind::TypeMismatch { expected: "list", found: "non-list" }))?;
                let tail: Vec<TaggedValue> = if n == 0 {
                    Vec::new()
                } else {
                    self.arena.read_span(header_cell, n).map_err(|e| self.err(e.into()))?[1..].to_vec()
                };
                if let Some(popped) = popped_n {
                    self.sp = header_cell - popped;
                }
                let tail_len = tail.len() as u32;
                for v in tail {
                    self.push(v)?;
                }
                self.push(TaggedValue::list_header(tail_len))
            }
            Op::BuiltinGet | Op::BuiltinFind => {
                let key_raw = self.pop()?;
                let key_raw = refs::resolve(&self.arena, key_raw).map_err(|e| self.err(e))?;
                let key = self.path_key_of(key_raw)?;
                let (header_cell, popped_n) = self.pop_list_header()?;
                let result = if op == Op::BuiltinGet {
                    list::get(&self.arena, header_cell, key, self.default_handle).map_err(|e| self.err(e))?
                } else {
                    match list::find(&self.arena, header_cell, key, self.default_handle).map_err(|e| self.err(e))? {
                        Some(addr) => addr,
                        None => TaggedValue::NIL,
                    }
                };
                if let Some(n) = popped_n {
                    self.sp = header_cell - n;
                }
                self.push(result)
            }
            Op::BuiltinSet => {
                let value = self.pop()?;
                // An inline list's payload cells sit below its header on the
                // data stack, not folded into the single cell `pop` just
                // took — pull them off here (before popping the key) so
                // they don't get mistaken for the key/target underneath.
                let payload = if let Some(n) = list::header_slot_count(value) {
                    let span = if n == 0 {
                        Vec::new()
                    } else {
                        self.arena.read_span(self.sp, n).map_err(|e| self.err(e.into()))?.to_vec()
                    };
                    self.sp -= n;
                    Some(span)
                } else {
                    None
                };
                let key_raw = self.pop()?;
                let key_raw = refs::resolve(&self.arena, key_raw).map_err(|e| self.err(e))?;
                let key = self.path_key_of(key_raw)?;
                let (header_cell, popped_n) = self.pop_list_header()?;
                list::set(&mut self.arena, header_cell, key, self.default_handle, value, payload.as_deref())
                    .map_err(|e| self.err(e))?;
                if let Some(n) = popped_n {
                    self.sp = header_cell - n;
                }
                Ok(())
            }
            Op::BuiltinEval => {
                let v = self.pop()?;
                if v.is_code() {
                    self.enter_frame(v.payload(), v.is_block())
                } else if v.is_builtin() {
                    let inner = Op::from_word(v.payload())
                        .ok_or_else(|| self.err(ErrorKind::TypeMismatch { expected: "builtin id", found: "unknown" }))?;
                    self.dispatch_builtin(inner)
                } else {
                    Err(self.err(ErrorKind::TypeMismatch { expected: "executable", found: "non-executable" }))
                }
            }
            _ => unreachable!("dispatch_builtin called with non-builtin opcode"),
        }
    }

    fn path_key_of(&self, v: TaggedValue) -> Result<PathKey, VmError> {
        if let Some(n) = v.as_number() {
            Ok(PathKey::Index(n as u32))
        } else if v.is_string() {
            Ok(PathKey::Symbol(v.payload()))
        } else {
            Err(self.err_const(ErrorKind::TypeMismatch { expected: "index or symbol", found: "other" }))
        }
    }

    /// Pop the top-of-stack list, yielding the address of its header cell.
    /// Returns `Some(n)` (the slot count still resident on the stack) when
    /// the list was stored inline and must also have its payload cells
    /// reclaimed by the caller; `None` when it was a `DATA_REF` and the
    /// underlying storage lives elsewhere.
    fn pop_list_header(&mut self) -> Result<(u32, Option<u32>), VmError> {
        let v = self.pop()?;
        if v.is_list() {
            Ok((self.sp, Some(v.payload())))
        } else if v.is_ref() {
            Ok((v.payload(), None))
        } else {
            Err(self.err(ErrorKind::TypeMismatch { expected: "list or ref", found: "scalar" }))
        }
    }

    fn binary_numeric(&mut self, f: impl Fn(f32, f32) -> f32) -> Result<(), VmError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let (a, b) = (self.require_number(a)?, self.require_number(b)?);
        self.push(TaggedValue::from_number(f(a, b)))
    }

    fn binary_compare(&mut self, f: impl Fn(f32, f32) -> bool) -> Result<(), VmError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let (a, b) = (self.require_number(a)?, self.require_number(b)?);
        let truthy = if f(a, b) { 1.0 } else { 0.0 };
        self.push(TaggedValue::from_number(truthy))
    }

    fn require_number(&self, v: TaggedValue) -> Result<f32, VmError> {
        v.as_number()
            .ok_or_else(|| self.err_const(ErrorKind::TypeMismatch { expected: "number", found: "tagged" }))
    }

    pub fn lookup(&self, name_handle: u32) -> Result<Option<TaggedValue>, VmError> {
        self.dict
            .lookup(&self.arena, &self.digest, name_handle)
            .map_err(|e| self.err_const(e.into()))
    }

    pub fn define_global(&mut self, name_handle: u32, value: TaggedValue) -> Result<u32, VmError> {
        self.dict
            .define(&mut self.arena, &mut self.gp, name_handle, value, false)
            .map_err(|e| self.err_const(e.into()))
    }

    pub fn define_hidden(&mut self, name_handle: u32, value: TaggedValue) -> Result<u32, VmError> {
        self.dict
            .define(&mut self.arena, &mut self.gp, name_handle, value, true)
            .map_err(|e| self.err_const(e.into()))
    }

    pub(crate) fn err(&self, kind: ErrorKind) -> VmError {
        VmError::new(kind, self.ip)
    }

    pub(crate) fn err_const(&self, kind: ErrorKind) -> VmError {
        VmError::new(kind, self.ip)
    }
}

// DictMark/Dictionary re-export path used by the compiler when opening and
// closing a definition's local scope.
pub use dict::local_marker;
