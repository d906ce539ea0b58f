//! The script execution engine.
//!
//! A stack machine over the opcode set in [`opcode`](crate::vm::opcode).
//! The engine owns the evaluation stack, the alt stack and the invocation
//! stack of script contexts; every instruction executes under the resource
//! bounds in [`VmLimits`](crate::vm::VmLimits) and any breach transitions
//! the engine to [`VmState::Fault`] without touching host state.

use crate::crypto::key_pair::{PublicKey, Signature};
use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use crate::types::hash::{Hash160, Hash256, hash160, hash256};
use crate::vm::VmLimits;
use crate::vm::errors::VmError;
use crate::vm::interop::{InteropFuncPrice, InteropGetter, syscall_id};
use crate::vm::opcode::{OpCode, OperandKind};
use crate::vm::serialization::{deserialize_item, serialize_item};
use crate::vm::stack_item::{ItemType, MapKey, StackItem, index_to_usize, reachable_count};
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};
use ripemd::Ripemd160;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::rc::Rc;

/// Hard per-execution instruction bound, independent of gas.
const MAX_STEPS: u64 = 2_000_000;

/// Maximum SHL/SHR shift amount.
const MAX_SHIFT: i64 = 256;

/// Terminal and intermediate engine states.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum VmState {
    /// Ready to execute the next instruction.
    None = 0x00,
    /// Terminal success: the invocation stack drained.
    Halt = 0x01,
    /// Terminal failure. Absorbing.
    Fault = 0x02,
    /// Stopped at a breakpoint; resumable.
    Break = 0x04,
}

impl Encode for VmState {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        (*self as u8).encode(out);
    }
}

impl Decode for VmState {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        match u8::decode(input)? {
            0x00 => Ok(VmState::None),
            0x01 => Ok(VmState::Halt),
            0x02 => Ok(VmState::Fault),
            0x04 => Ok(VmState::Break),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

/// Per-op pricing injected by the host; receives the opcode and its operand.
pub type PriceGetter = Rc<dyn Fn(OpCode, &[u8]) -> u64>;

/// Resolver for APPCALL targets: script bytes plus the dynamic-invoke
/// permission of the loaded contract.
pub type ScriptGetter = Rc<dyn Fn(&Hash160) -> Option<(Vec<u8>, bool)>>;

/// One invocation context: a script with an instruction pointer.
///
/// Contexts are pushed by `load`, CALL and APPCALL and popped by RET; the
/// evaluation and alt stacks live on the engine and are shared across
/// contexts.
#[derive(Clone)]
pub struct Context {
    script: Rc<[u8]>,
    ip: usize,
    script_hash: Hash160,
    breakpoints: HashSet<usize>,
    dynamic_invoke: bool,
}

impl Context {
    fn new(script: Vec<u8>, dynamic_invoke: bool) -> Context {
        let script_hash = hash160(&script);
        Context {
            script: script.into(),
            ip: 0,
            script_hash,
            breakpoints: HashSet::new(),
            dynamic_invoke,
        }
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    pub fn script_hash(&self) -> Hash160 {
        self.script_hash
    }
}

/// A decoded instruction.
struct Instr {
    op: OpCode,
    operand: Vec<u8>,
    /// Offset of the opcode byte; jump offsets are relative to this.
    start: usize,
}

/// The stack-based script virtual machine.
///
/// Deterministic with respect to its inputs: identical script, limits, gas
/// limit, interop table and checked hash produce identical terminal state,
/// stacks and gas tally.
pub struct Vm {
    state: VmState,
    istack: Vec<Context>,
    estack: Vec<StackItem>,
    astack: Vec<StackItem>,
    limits: VmLimits,
    steps: u64,
    gas_consumed: u64,
    gas_limit: Option<u64>,
    price_getter: Option<PriceGetter>,
    interop_getters: Vec<InteropGetter>,
    script_getter: Option<ScriptGetter>,
    checked_hash: Option<Hash256>,
    fault: Option<VmError>,
}

impl Vm {
    /// Creates an engine with default limits and the built-in interop set
    /// (`Runtime.Serialize`, `Runtime.Deserialize`).
    pub fn new() -> Vm {
        Self::with_limits(VmLimits::default())
    }

    /// Creates an engine with explicit resource limits.
    pub fn with_limits(limits: VmLimits) -> Vm {
        let mut vm = Vm {
            state: VmState::None,
            istack: Vec::new(),
            estack: Vec::new(),
            astack: Vec::new(),
            limits,
            steps: 0,
            gas_consumed: 0,
            gas_limit: None,
            price_getter: None,
            interop_getters: Vec::new(),
            script_getter: None,
            checked_hash: None,
            fault: None,
        };
        vm.register_interop_getter(Rc::new(builtin_interops));
        vm
    }

    // ===================== configuration =====================

    pub fn limits(&self) -> &VmLimits {
        &self.limits
    }

    /// Injects per-op pricing. Without a getter all opcodes are free.
    pub fn set_price_getter(&mut self, getter: PriceGetter) {
        self.price_getter = Some(getter);
    }

    /// Sets the gas ceiling. Exceeding it faults the execution.
    pub fn set_gas_limit(&mut self, limit: u64) {
        self.gas_limit = Some(limit);
    }

    pub fn gas_consumed(&self) -> u64 {
        self.gas_consumed
    }

    /// Registers a syscall resolver. Later registrations take precedence.
    pub fn register_interop_getter(&mut self, getter: InteropGetter) {
        self.interop_getters.push(getter);
    }

    pub fn interop_getter_count(&self) -> usize {
        self.interop_getters.len()
    }

    /// Sets the APPCALL target resolver.
    pub fn set_script_getter(&mut self, getter: ScriptGetter) {
        self.script_getter = Some(getter);
    }

    /// Sets the message digest verified by CHECKSIG / CHECKMULTISIG.
    ///
    /// Set-once: subsequent calls are ignored.
    pub fn set_checked_hash(&mut self, digest: Hash256) {
        self.checked_hash.get_or_insert(digest);
    }

    // ===================== loading =====================

    /// Pushes a new invocation context for `script`.
    pub fn load(&mut self, script: impl Into<Vec<u8>>) -> Result<(), VmError> {
        self.load_with_flags(script, false)
    }

    /// Pushes a new invocation context, marking it dynamic-invoke-capable.
    pub fn load_with_flags(
        &mut self,
        script: impl Into<Vec<u8>>,
        dynamic_invoke: bool,
    ) -> Result<(), VmError> {
        if self.istack.len() >= self.limits.max_invocation_stack {
            return Err(VmError::InvocationStackExceeded {
                max: self.limits.max_invocation_stack,
            });
        }
        self.istack.push(Context::new(script.into(), dynamic_invoke));
        Ok(())
    }

    /// Adds a breakpoint at `ip` in the current context.
    pub fn add_breakpoint(&mut self, ip: usize) {
        if let Some(ctx) = self.istack.last_mut() {
            ctx.breakpoints.insert(ip);
        }
    }

    // ===================== inspection =====================

    pub fn state(&self) -> VmState {
        self.state
    }

    /// The fault reason, when `state() == Fault`.
    pub fn fault_reason(&self) -> Option<&VmError> {
        self.fault.as_ref()
    }

    /// The evaluation stack, bottom first.
    pub fn estack(&self) -> &[StackItem] {
        &self.estack
    }

    pub fn estack_len(&self) -> usize {
        self.estack.len()
    }

    /// Depth of the invocation stack.
    pub fn istack_len(&self) -> usize {
        self.istack.len()
    }

    /// Script hash of the currently executing context.
    pub fn current_script_hash(&self) -> Option<Hash160> {
        self.istack.last().map(|ctx| ctx.script_hash)
    }

    /// Instruction pointer of the currently executing context.
    pub fn current_ip(&self) -> Option<usize> {
        self.istack.last().map(|ctx| ctx.ip)
    }

    // ===================== stack access (interop surface) =====================

    pub fn push_item(&mut self, item: StackItem) {
        self.estack.push(item);
    }

    pub fn pop_item(&mut self) -> Result<StackItem, VmError> {
        self.estack.pop().ok_or(VmError::StackUnderflow)
    }

    /// Pops an item and converts it to an integer within the bit cap.
    pub fn pop_int(&mut self, op: &'static str) -> Result<BigInt, VmError> {
        let value = self.pop_item()?.to_int(op)?;
        self.check_int(&value)?;
        Ok(value)
    }

    /// Pops an item and converts it to its byte form.
    pub fn pop_bytes(&mut self, op: &'static str) -> Result<Vec<u8>, VmError> {
        self.pop_item()?.to_byte_array(op)
    }

    pub fn pop_bool(&mut self) -> Result<bool, VmError> {
        Ok(self.pop_item()?.to_bool())
    }

    /// A reference to the item at `depth` (0 = top).
    pub fn peek_item(&self, depth: usize) -> Result<&StackItem, VmError> {
        let len = self.estack.len();
        if depth >= len {
            return Err(VmError::StackUnderflow);
        }
        Ok(&self.estack[len - 1 - depth])
    }

    fn remove_at(&mut self, depth: usize) -> Result<StackItem, VmError> {
        let len = self.estack.len();
        if depth >= len {
            return Err(VmError::StackUnderflow);
        }
        Ok(self.estack.remove(len - 1 - depth))
    }

    fn insert_at(&mut self, depth: usize, item: StackItem) -> Result<(), VmError> {
        let len = self.estack.len();
        if depth > len {
            return Err(VmError::StackUnderflow);
        }
        self.estack.insert(len - depth, item);
        Ok(())
    }

    // ===================== execution =====================

    /// Steps until a terminal state (or a breakpoint) is reached.
    pub fn run(&mut self) -> VmState {
        if self.state == VmState::Break {
            self.state = VmState::None;
        }
        while self.state == VmState::None {
            self.execute_next();
        }
        self.state
    }

    /// Executes a single instruction, honoring `Break` resumption.
    pub fn step(&mut self) -> VmState {
        match self.state {
            VmState::Halt | VmState::Fault => {}
            _ => {
                self.state = VmState::None;
                self.execute_next();
            }
        }
        self.state
    }

    fn execute_next(&mut self) {
        if let Err(err) = self.try_execute_next() {
            self.state = VmState::Fault;
            self.fault = Some(err);
        }
    }

    fn try_execute_next(&mut self) -> Result<(), VmError> {
        let (script, ip) = match self.istack.last() {
            None => {
                self.state = VmState::Halt;
                return Ok(());
            }
            Some(ctx) => (ctx.script.clone(), ctx.ip),
        };

        self.steps += 1;
        if self.steps > MAX_STEPS {
            return Err(VmError::InstructionLimit);
        }

        // Running off the end of a script is an implicit RET.
        if ip >= script.len() {
            self.op_ret();
            return Ok(());
        }

        let instr = self.decode_instruction(&script, ip)?;
        let next_ip = instr.start + instruction_len(&instr);
        self.istack.last_mut().unwrap().ip = next_ip;

        if let Some(getter) = self.price_getter.clone() {
            self.consume_gas(getter(instr.op, &instr.operand))?;
        }

        self.exec(&instr)?;
        self.check_stack_size()?;

        if self.state == VmState::None
            && let Some(ctx) = self.istack.last()
            && ctx.ip < ctx.script.len()
            && ctx.breakpoints.contains(&ctx.ip)
        {
            self.state = VmState::Break;
        }
        Ok(())
    }

    fn decode_instruction(&self, script: &[u8], ip: usize) -> Result<Instr, VmError> {
        let op = OpCode::try_from(script[ip])?;
        let mut cursor = ip + 1;

        let read = |cursor: &mut usize, n: usize| -> Result<Vec<u8>, VmError> {
            let end = cursor
                .checked_add(n)
                .ok_or(VmError::UnexpectedEndOfScript(*cursor))?;
            let bytes = script
                .get(*cursor..end)
                .ok_or(VmError::UnexpectedEndOfScript(*cursor))?;
            *cursor = end;
            Ok(bytes.to_vec())
        };

        let operand = match op.operand() {
            OperandKind::None => Vec::new(),
            OperandKind::Imm(n) | OperandKind::Off(n) => read(&mut cursor, n)?,
            OperandKind::Data(prefix) => {
                let len_bytes = read(&mut cursor, prefix)?;
                let mut len = 0usize;
                for (i, byte) in len_bytes.iter().enumerate() {
                    len |= (*byte as usize) << (8 * i);
                }
                if len > self.limits.max_item_size {
                    return Err(VmError::ItemTooLarge {
                        size: len,
                        max: self.limits.max_item_size,
                    });
                }
                read(&mut cursor, len)?
            }
            OperandKind::Hash20 => read(&mut cursor, 20)?,
            OperandKind::Sys4 => read(&mut cursor, 4)?,
            OperandKind::Type1 => read(&mut cursor, 1)?,
        };

        Ok(Instr {
            op,
            operand,
            start: ip,
        })
    }

    fn consume_gas(&mut self, amount: u64) -> Result<(), VmError> {
        self.gas_consumed = self.gas_consumed.saturating_add(amount);
        if let Some(limit) = self.gas_limit
            && self.gas_consumed > limit
        {
            return Err(VmError::OutOfGas {
                consumed: self.gas_consumed,
                limit,
            });
        }
        Ok(())
    }

    /// Ensures an integer is within the configured magnitude cap.
    fn check_int(&self, value: &BigInt) -> Result<(), VmError> {
        let bits = value.bits();
        if bits > self.limits.max_bigint_bits {
            return Err(VmError::IntegerOverflow {
                bits,
                max: self.limits.max_bigint_bits,
            });
        }
        Ok(())
    }

    fn check_item_len(&self, len: usize) -> Result<(), VmError> {
        if len > self.limits.max_item_size {
            return Err(VmError::ItemTooLarge {
                size: len,
                max: self.limits.max_item_size,
            });
        }
        Ok(())
    }

    fn check_array_len(&self, len: usize) -> Result<(), VmError> {
        if len > self.limits.max_array_size {
            return Err(VmError::ArraySizeExceeded {
                len,
                max: self.limits.max_array_size,
            });
        }
        Ok(())
    }

    /// Recounts every live item reachable from the stacks.
    ///
    /// Shared compounds are counted once; the count is the unit the clone
    /// budget of struct copies is charged against.
    fn check_stack_size(&self) -> Result<(), VmError> {
        let mut seen = HashSet::new();
        let count: usize = self
            .estack
            .iter()
            .chain(self.astack.iter())
            .map(|item| reachable_count(item, &mut seen))
            .sum();
        if count > self.limits.max_stack_size {
            return Err(VmError::StackSizeExceeded {
                count,
                max: self.limits.max_stack_size,
            });
        }
        Ok(())
    }

    fn exec(&mut self, instr: &Instr) -> Result<(), VmError> {
        let op = instr.op;

        if let Some(value) = op.embedded_int() {
            self.push_item(StackItem::from(value as i64));
            return Ok(());
        }

        match op {
            // ---------- constants ----------
            OpCode::PushInt8
            | OpCode::PushInt16
            | OpCode::PushInt32
            | OpCode::PushInt64
            | OpCode::PushInt128
            | OpCode::PushInt256 => {
                self.push_item(StackItem::Integer(BigInt::from_signed_bytes_le(
                    &instr.operand,
                )));
            }
            OpCode::PushNull => self.push_item(StackItem::Null),
            OpCode::PushData1 | OpCode::PushData2 | OpCode::PushData4 => {
                self.push_item(StackItem::ByteArray(instr.operand.clone()));
            }

            // ---------- control flow ----------
            OpCode::Nop => {}
            OpCode::Jmp | OpCode::JmpL => {
                let target = self.jump_target(instr)?;
                self.istack.last_mut().unwrap().ip = target;
            }
            OpCode::JmpIf | OpCode::JmpIfL => {
                let target = self.jump_target(instr)?;
                if self.pop_bool()? {
                    self.istack.last_mut().unwrap().ip = target;
                }
            }
            OpCode::JmpIfNot | OpCode::JmpIfNotL => {
                let target = self.jump_target(instr)?;
                if !self.pop_bool()? {
                    self.istack.last_mut().unwrap().ip = target;
                }
            }
            OpCode::Call => {
                let target = self.jump_target(instr)?;
                if self.istack.len() >= self.limits.max_invocation_stack {
                    return Err(VmError::InvocationStackExceeded {
                        max: self.limits.max_invocation_stack,
                    });
                }
                let mut callee = self.istack.last().unwrap().clone();
                callee.ip = target;
                self.istack.push(callee);
            }
            OpCode::Ret => self.op_ret(),
            OpCode::AppCall => self.op_app_call(&instr.operand)?,
            OpCode::Syscall => self.op_syscall(&instr.operand)?,

            // ---------- stack manipulation ----------
            OpCode::ToAltStack => {
                let item = self.pop_item()?;
                self.astack.push(item);
            }
            OpCode::FromAltStack => {
                let item = self.astack.pop().ok_or(VmError::AltStackUnderflow)?;
                self.push_item(item);
            }
            OpCode::DupFromAltStack => {
                let item = self
                    .astack
                    .last()
                    .cloned()
                    .ok_or(VmError::AltStackUnderflow)?;
                self.push_item(item);
            }
            OpCode::XDrop => {
                let n = self.pop_depth()?;
                self.remove_at(n)?;
            }
            OpCode::XSwap => {
                let n = self.pop_depth()?;
                if n > 0 {
                    let len = self.estack.len();
                    if n >= len {
                        return Err(VmError::StackUnderflow);
                    }
                    self.estack.swap(len - 1, len - 1 - n);
                }
            }
            OpCode::XTuck => {
                let n = self.pop_depth()?;
                let top = self.peek_item(0)?.clone();
                self.insert_at(n, top)?;
            }
            OpCode::Depth => {
                let depth = self.estack.len();
                self.push_item(StackItem::from(depth as i64));
            }
            OpCode::Drop => {
                self.pop_item()?;
            }
            OpCode::Dup => {
                let top = self.peek_item(0)?.clone();
                self.push_item(top);
            }
            OpCode::Nip => {
                self.remove_at(1)?;
            }
            OpCode::Over => {
                let second = self.peek_item(1)?.clone();
                self.push_item(second);
            }
            OpCode::Pick => {
                let n = self.pop_depth()?;
                let item = self.peek_item(n)?.clone();
                self.push_item(item);
            }
            OpCode::Roll => {
                let n = self.pop_depth()?;
                if n > 0 {
                    let item = self.remove_at(n)?;
                    self.push_item(item);
                }
            }
            OpCode::Rot => {
                let item = self.remove_at(2)?;
                self.push_item(item);
            }
            OpCode::Swap => {
                let len = self.estack.len();
                if len < 2 {
                    return Err(VmError::StackUnderflow);
                }
                self.estack.swap(len - 1, len - 2);
            }
            OpCode::Tuck => {
                let top = self.peek_item(0)?.clone();
                self.insert_at(2, top)?;
            }

            // ---------- byte strings ----------
            OpCode::Cat => {
                let b = self.pop_bytes("CAT")?;
                let mut a = self.pop_bytes("CAT")?;
                self.check_item_len(a.len() + b.len())?;
                a.extend_from_slice(&b);
                self.push_item(StackItem::ByteArray(a));
            }
            OpCode::SubStr => {
                let count = self.pop_index("SUBSTR")?;
                let index = self.pop_index("SUBSTR")?;
                let bytes = self.pop_bytes("SUBSTR")?;
                let end = index
                    .checked_add(count)
                    .filter(|end| *end <= bytes.len())
                    .ok_or(VmError::IndexOutOfRange(index as i64))?;
                self.push_item(StackItem::ByteArray(bytes[index..end].to_vec()));
            }
            OpCode::Left => {
                let count = self.pop_index("LEFT")?;
                let bytes = self.pop_bytes("LEFT")?;
                if count > bytes.len() {
                    return Err(VmError::IndexOutOfRange(count as i64));
                }
                self.push_item(StackItem::ByteArray(bytes[..count].to_vec()));
            }
            OpCode::Right => {
                let count = self.pop_index("RIGHT")?;
                let bytes = self.pop_bytes("RIGHT")?;
                if count > bytes.len() {
                    return Err(VmError::IndexOutOfRange(count as i64));
                }
                self.push_item(StackItem::ByteArray(bytes[bytes.len() - count..].to_vec()));
            }
            OpCode::Size => {
                let size = match self.pop_item()? {
                    StackItem::Array(items) | StackItem::Struct(items) => items.borrow().len(),
                    StackItem::Map(entries) => entries.borrow().len(),
                    other => other.to_byte_array("SIZE")?.len(),
                };
                self.push_item(StackItem::from(size as i64));
            }

            // ---------- bitwise ----------
            OpCode::Invert => {
                let x = self.pop_int("INVERT")?;
                self.push_int_checked(-x - 1)?;
            }
            OpCode::And => {
                let b = self.pop_int("AND")?;
                let a = self.pop_int("AND")?;
                self.push_int_checked(a & b)?;
            }
            OpCode::Or => {
                let b = self.pop_int("OR")?;
                let a = self.pop_int("OR")?;
                self.push_int_checked(a | b)?;
            }
            OpCode::Xor => {
                let b = self.pop_int("XOR")?;
                let a = self.pop_int("XOR")?;
                self.push_int_checked(a ^ b)?;
            }
            OpCode::Equal => {
                let b = self.pop_item()?;
                let a = self.pop_item()?;
                self.push_item(StackItem::Boolean(a.equals(&b)));
            }

            // ---------- arithmetic ----------
            OpCode::Inc => {
                let x = self.pop_int("INC")?;
                self.push_int_checked(x + 1)?;
            }
            OpCode::Dec => {
                let x = self.pop_int("DEC")?;
                self.push_int_checked(x - 1)?;
            }
            OpCode::Sign => {
                let x = self.pop_int("SIGN")?;
                let sign: i64 = if x.is_negative() {
                    -1
                } else if x.is_zero() {
                    0
                } else {
                    1
                };
                self.push_item(StackItem::from(sign));
            }
            OpCode::Negate => {
                let x = self.pop_int("NEGATE")?;
                self.push_int_checked(-x)?;
            }
            OpCode::Abs => {
                let x = self.pop_int("ABS")?;
                self.push_int_checked(x.abs())?;
            }
            OpCode::Not => {
                let x = self.pop_bool()?;
                self.push_item(StackItem::Boolean(!x));
            }
            OpCode::Nz => {
                let x = self.pop_int("NZ")?;
                self.push_item(StackItem::Boolean(!x.is_zero()));
            }
            OpCode::Add => {
                let b = self.pop_int("ADD")?;
                let a = self.pop_int("ADD")?;
                self.push_int_checked(a + b)?;
            }
            OpCode::Sub => {
                let b = self.pop_int("SUB")?;
                let a = self.pop_int("SUB")?;
                self.push_int_checked(a - b)?;
            }
            OpCode::Mul => {
                let b = self.pop_int("MUL")?;
                let a = self.pop_int("MUL")?;
                self.push_int_checked(a * b)?;
            }
            OpCode::Div => {
                let b = self.pop_int("DIV")?;
                let a = self.pop_int("DIV")?;
                if b.is_zero() {
                    return Err(VmError::DivisionByZero);
                }
                self.push_int_checked(a / b)?;
            }
            OpCode::Mod => {
                let b = self.pop_int("MOD")?;
                let a = self.pop_int("MOD")?;
                if b.is_zero() {
                    return Err(VmError::DivisionByZero);
                }
                self.push_int_checked(a % b)?;
            }
            OpCode::Shl => {
                let shift = self.pop_shift()?;
                let x = self.pop_int("SHL")?;
                self.push_int_checked(x << shift)?;
            }
            OpCode::Shr => {
                let shift = self.pop_shift()?;
                let x = self.pop_int("SHR")?;
                self.push_int_checked(x >> shift)?;
            }
            OpCode::BoolAnd => {
                let b = self.pop_bool()?;
                let a = self.pop_bool()?;
                self.push_item(StackItem::Boolean(a && b));
            }
            OpCode::BoolOr => {
                let b = self.pop_bool()?;
                let a = self.pop_bool()?;
                self.push_item(StackItem::Boolean(a || b));
            }
            OpCode::NumEqual => {
                let b = self.pop_int("NUMEQUAL")?;
                let a = self.pop_int("NUMEQUAL")?;
                self.push_item(StackItem::Boolean(a == b));
            }
            OpCode::NumNotEqual => {
                let b = self.pop_int("NUMNOTEQUAL")?;
                let a = self.pop_int("NUMNOTEQUAL")?;
                self.push_item(StackItem::Boolean(a != b));
            }
            OpCode::Lt => {
                let b = self.pop_int("LT")?;
                let a = self.pop_int("LT")?;
                self.push_item(StackItem::Boolean(a < b));
            }
            OpCode::Gt => {
                let b = self.pop_int("GT")?;
                let a = self.pop_int("GT")?;
                self.push_item(StackItem::Boolean(a > b));
            }
            OpCode::Lte => {
                let b = self.pop_int("LTE")?;
                let a = self.pop_int("LTE")?;
                self.push_item(StackItem::Boolean(a <= b));
            }
            OpCode::Gte => {
                let b = self.pop_int("GTE")?;
                let a = self.pop_int("GTE")?;
                self.push_item(StackItem::Boolean(a >= b));
            }
            OpCode::Min => {
                let b = self.pop_int("MIN")?;
                let a = self.pop_int("MIN")?;
                self.push_item(StackItem::Integer(a.min(b)));
            }
            OpCode::Max => {
                let b = self.pop_int("MAX")?;
                let a = self.pop_int("MAX")?;
                self.push_item(StackItem::Integer(a.max(b)));
            }
            OpCode::Within => {
                let b = self.pop_int("WITHIN")?;
                let a = self.pop_int("WITHIN")?;
                let x = self.pop_int("WITHIN")?;
                self.push_item(StackItem::Boolean(a <= x && x < b));
            }

            // ---------- crypto ----------
            OpCode::Sha1 => {
                let data = self.pop_bytes("SHA1")?;
                self.push_item(StackItem::ByteArray(Sha1::digest(&data).to_vec()));
            }
            OpCode::Sha256 => {
                let data = self.pop_bytes("SHA256")?;
                self.push_item(StackItem::ByteArray(Sha256::digest(&data).to_vec()));
            }
            OpCode::Hash160 => {
                let data = self.pop_bytes("HASH160")?;
                let sha: [u8; 32] = Sha256::digest(&data).into();
                self.push_item(StackItem::ByteArray(Ripemd160::digest(sha).to_vec()));
            }
            OpCode::Hash256 => {
                let data = self.pop_bytes("HASH256")?;
                self.push_item(StackItem::ByteArray(hash256(&data).to_vec()));
            }
            OpCode::CheckSig => {
                let key = self.pop_bytes("CHECKSIG")?;
                let sig = self.pop_bytes("CHECKSIG")?;
                let digest = self.checked_hash.ok_or(VmError::CheckedHashUnset)?;
                self.push_item(StackItem::Boolean(verify_signature(&digest, &key, &sig)));
            }
            OpCode::Verify => {
                let key = self.pop_bytes("VERIFY")?;
                let sig = self.pop_bytes("VERIFY")?;
                let message = self.pop_bytes("VERIFY")?;
                let valid = match (PublicKey::from_sec1_bytes(&key), Signature::from_slice(&sig)) {
                    (Some(key), Some(sig)) => key.verify(&message, &sig),
                    _ => false,
                };
                self.push_item(StackItem::Boolean(valid));
            }
            OpCode::CheckMultiSig => self.op_check_multisig()?,

            // ---------- compound types ----------
            OpCode::Pack => {
                let n = self.pop_depth()?;
                self.check_array_len(n)?;
                let mut items = Vec::with_capacity(n);
                for _ in 0..n {
                    items.push(self.pop_item()?);
                }
                self.push_item(StackItem::array(items));
            }
            OpCode::Unpack => {
                let items = self.pop_array("UNPACK")?;
                let items = items.borrow();
                for item in items.iter().rev() {
                    self.estack.push(item.clone());
                }
                self.push_item(StackItem::from(items.len() as i64));
            }
            OpCode::PickItem => self.op_pick_item()?,
            OpCode::SetItem => self.op_set_item()?,
            OpCode::NewArray => {
                let n = self.pop_depth()?;
                self.check_array_len(n)?;
                self.push_item(StackItem::array(vec![StackItem::Null; n]));
            }
            OpCode::NewStruct => {
                let n = self.pop_depth()?;
                self.check_array_len(n)?;
                self.push_item(StackItem::structure(vec![StackItem::Null; n]));
            }
            OpCode::NewMap => self.push_item(StackItem::map()),
            OpCode::Append => self.op_append()?,
            OpCode::ReverseItems => {
                let items = self.pop_array("REVERSEITEMS")?;
                items.borrow_mut().reverse();
            }
            OpCode::Remove => self.op_remove()?,
            OpCode::HasKey => self.op_has_key()?,
            OpCode::Keys => {
                let entries = self.pop_map("KEYS")?;
                let keys: Vec<StackItem> =
                    entries.borrow().keys().map(|key| key.to_item()).collect();
                self.push_item(StackItem::array(keys));
            }
            OpCode::Values => {
                let values = match self.pop_item()? {
                    StackItem::Array(items) | StackItem::Struct(items) => items.borrow().clone(),
                    StackItem::Map(entries) => entries.borrow().values().cloned().collect(),
                    other => {
                        return Err(VmError::TypeMismatch {
                            op: "VALUES",
                            expected: "Array or Map",
                            actual: other.type_name(),
                        });
                    }
                };
                self.push_item(StackItem::array(values));
            }
            OpCode::NewArray0 => self.push_item(StackItem::array(Vec::new())),
            OpCode::NewArrayT => {
                let item_type = ItemType::try_from(instr.operand[0])?;
                let n = self.pop_depth()?;
                self.check_array_len(n)?;
                let items = (0..n).map(|_| StackItem::default_of(item_type)).collect();
                self.push_item(StackItem::Array(Rc::new(std::cell::RefCell::new(items))));
            }
            OpCode::NewStruct0 => self.push_item(StackItem::structure(Vec::new())),
            OpCode::ClearItems => match self.pop_item()? {
                StackItem::Array(items) | StackItem::Struct(items) => items.borrow_mut().clear(),
                StackItem::Map(entries) => entries.borrow_mut().clear(),
                other => {
                    return Err(VmError::TypeMismatch {
                        op: "CLEARITEMS",
                        expected: "Array, Struct or Map",
                        actual: other.type_name(),
                    });
                }
            },

            // ---------- type tests ----------
            OpCode::IsNull => {
                let item = self.pop_item()?;
                self.push_item(StackItem::Boolean(matches!(item, StackItem::Null)));
            }
            OpCode::IsType => {
                let expected = ItemType::try_from(instr.operand[0])?;
                let item = self.pop_item()?;
                self.push_item(StackItem::Boolean(item.item_type() == expected));
            }

            // ---------- exceptions ----------
            OpCode::Throw => return Err(VmError::Throw),
            OpCode::ThrowIfNot => {
                if !self.pop_bool()? {
                    return Err(VmError::Throw);
                }
            }

            // embedded-int pushes handled above
            _ => unreachable!("opcode {op} has no handler"),
        }
        Ok(())
    }

    // ===================== handlers =====================

    fn op_ret(&mut self) {
        self.istack.pop();
        if self.istack.is_empty() {
            self.state = VmState::Halt;
        }
    }

    fn op_app_call(&mut self, operand: &[u8]) -> Result<(), VmError> {
        let inline = Hash160::from_slice(operand).ok_or(VmError::UnexpectedEndOfScript(0))?;
        let target = if inline.is_zero() {
            // Dynamic invocation: the target comes from the stack and the
            // calling context must carry the permission.
            if !self.istack.last().is_some_and(|ctx| ctx.dynamic_invoke) {
                return Err(VmError::DynamicInvokeForbidden);
            }
            let bytes = self.pop_bytes("APPCALL")?;
            Hash160::from_slice(&bytes).ok_or(VmError::TypeMismatch {
                op: "APPCALL",
                expected: "20-byte script hash",
                actual: "ByteArray",
            })?
        } else {
            inline
        };

        let getter = self.script_getter.clone().ok_or(VmError::NoScriptGetter)?;
        let (script, dynamic_invoke) = getter(&target).ok_or(VmError::UnknownScript(target))?;
        self.load_with_flags(script, dynamic_invoke)
    }

    fn op_syscall(&mut self, operand: &[u8]) -> Result<(), VmError> {
        let id = u32::from_le_bytes(operand.try_into().unwrap());
        let resolved = self
            .interop_getters
            .iter()
            .rev()
            .find_map(|getter| getter(id))
            .ok_or(VmError::UnknownSyscall(id))?;
        self.consume_gas(resolved.price)?;
        (resolved.handler)(self)
    }

    fn op_check_multisig(&mut self) -> Result<(), VmError> {
        let keys = self.pop_byte_array_group("CHECKMULTISIG")?;
        let sigs = self.pop_byte_array_group("CHECKMULTISIG")?;
        let digest = self.checked_hash.ok_or(VmError::CheckedHashUnset)?;

        if sigs.is_empty() || sigs.len() > keys.len() {
            self.push_item(StackItem::Boolean(false));
            return Ok(());
        }

        // Signatures must appear in key order; one pass over both lists.
        let mut key_index = 0;
        let mut matched = 0;
        for sig in &sigs {
            while key_index < keys.len() {
                let valid = verify_signature(&digest, &keys[key_index], sig);
                key_index += 1;
                if valid {
                    matched += 1;
                    break;
                }
            }
        }
        self.push_item(StackItem::Boolean(matched == sigs.len()));
        Ok(())
    }

    /// Pops either an array of byte strings or a count followed by that many
    /// byte strings (the two CHECKMULTISIG argument conventions).
    fn pop_byte_array_group(&mut self, op: &'static str) -> Result<Vec<Vec<u8>>, VmError> {
        match self.pop_item()? {
            StackItem::Array(items) | StackItem::Struct(items) => items
                .borrow()
                .iter()
                .map(|item| item.to_byte_array(op))
                .collect(),
            other => {
                let n = other.to_int(op)?;
                let n = index_to_usize(&n)?;
                self.check_array_len(n)?;
                if n == 0 {
                    return Err(VmError::IndexOutOfRange(0));
                }
                let mut group = Vec::with_capacity(n);
                for _ in 0..n {
                    group.push(self.pop_bytes(op)?);
                }
                Ok(group)
            }
        }
    }

    fn op_pick_item(&mut self) -> Result<(), VmError> {
        let key = self.pop_item()?;
        match self.pop_item()? {
            StackItem::Array(items) | StackItem::Struct(items) => {
                let index = index_to_usize(&key.to_int("PICKITEM")?)?;
                let items = items.borrow();
                let item = items
                    .get(index)
                    .cloned()
                    .ok_or(VmError::IndexOutOfRange(index as i64))?;
                self.push_item(item);
            }
            StackItem::Map(entries) => {
                let key = MapKey::from_item(key)?;
                let value = entries
                    .borrow()
                    .get(&key)
                    .cloned()
                    .ok_or(VmError::MapKeyNotFound)?;
                self.push_item(value);
            }
            other => {
                return Err(VmError::TypeMismatch {
                    op: "PICKITEM",
                    expected: "Array, Struct or Map",
                    actual: other.type_name(),
                });
            }
        }
        Ok(())
    }

    fn op_set_item(&mut self) -> Result<(), VmError> {
        let value = self.insert_value()?;
        let key = self.pop_item()?;
        match self.pop_item()? {
            StackItem::Array(items) | StackItem::Struct(items) => {
                let index = index_to_usize(&key.to_int("SETITEM")?)?;
                let mut items = items.borrow_mut();
                if index >= items.len() {
                    return Err(VmError::IndexOutOfRange(index as i64));
                }
                items[index] = value;
            }
            StackItem::Map(entries) => {
                let key = MapKey::from_item(key)?;
                let mut entries = entries.borrow_mut();
                if !entries.contains_key(&key) {
                    self.check_array_len(entries.len() + 1)?;
                }
                entries.insert(key, value);
            }
            other => {
                return Err(VmError::TypeMismatch {
                    op: "SETITEM",
                    expected: "Array, Struct or Map",
                    actual: other.type_name(),
                });
            }
        }
        Ok(())
    }

    fn op_append(&mut self) -> Result<(), VmError> {
        let value = self.insert_value()?;
        match self.pop_item()? {
            StackItem::Array(items) | StackItem::Struct(items) => {
                let mut items = items.borrow_mut();
                self.check_array_len(items.len() + 1)?;
                items.push(value);
            }
            other => {
                return Err(VmError::TypeMismatch {
                    op: "APPEND",
                    expected: "Array or Struct",
                    actual: other.type_name(),
                });
            }
        }
        Ok(())
    }

    /// Pops the value operand of APPEND/SETITEM, applying struct value
    /// semantics: a struct is deep-cloned before it enters a container.
    fn insert_value(&mut self) -> Result<StackItem, VmError> {
        let value = self.pop_item()?;
        if matches!(value, StackItem::Struct(_)) {
            let mut budget = self.limits.max_stack_size;
            value.deep_clone(&mut budget)
        } else {
            Ok(value)
        }
    }

    fn op_remove(&mut self) -> Result<(), VmError> {
        let key = self.pop_item()?;
        match self.pop_item()? {
            StackItem::Array(items) | StackItem::Struct(items) => {
                let index = index_to_usize(&key.to_int("REMOVE")?)?;
                let mut items = items.borrow_mut();
                if index >= items.len() {
                    return Err(VmError::IndexOutOfRange(index as i64));
                }
                items.remove(index);
            }
            StackItem::Map(entries) => {
                let key = MapKey::from_item(key)?;
                entries.borrow_mut().remove(&key);
            }
            other => {
                return Err(VmError::TypeMismatch {
                    op: "REMOVE",
                    expected: "Array, Struct or Map",
                    actual: other.type_name(),
                });
            }
        }
        Ok(())
    }

    fn op_has_key(&mut self) -> Result<(), VmError> {
        let key = self.pop_item()?;
        let has = match self.pop_item()? {
            StackItem::Array(items) | StackItem::Struct(items) => {
                let index = index_to_usize(&key.to_int("HASKEY")?)?;
                index < items.borrow().len()
            }
            StackItem::Map(entries) => {
                let key = MapKey::from_item(key)?;
                entries.borrow().contains_key(&key)
            }
            other => {
                return Err(VmError::TypeMismatch {
                    op: "HASKEY",
                    expected: "Array, Struct or Map",
                    actual: other.type_name(),
                });
            }
        };
        self.push_item(StackItem::Boolean(has));
        Ok(())
    }

    // ===================== small helpers =====================

    fn jump_target(&self, instr: &Instr) -> Result<usize, VmError> {
        let offset = match instr.operand.len() {
            2 => i16::from_le_bytes(instr.operand.as_slice().try_into().unwrap()) as isize,
            4 => i32::from_le_bytes(instr.operand.as_slice().try_into().unwrap()) as isize,
            _ => return Err(VmError::UnexpectedEndOfScript(instr.start)),
        };
        let target = instr.start as isize + offset;
        let script_len = self.istack.last().map(|ctx| ctx.script.len()).unwrap_or(0);
        if target < 0 || target > script_len as isize {
            return Err(VmError::BadJumpTarget(target));
        }
        Ok(target as usize)
    }

    /// Pops a stack depth / element count operand.
    fn pop_depth(&mut self) -> Result<usize, VmError> {
        let n = self.pop_int("stack depth")?;
        index_to_usize(&n)
    }

    /// Pops a byte index operand.
    fn pop_index(&mut self, op: &'static str) -> Result<usize, VmError> {
        let n = self.pop_int(op)?;
        index_to_usize(&n)
    }

    fn pop_shift(&mut self) -> Result<usize, VmError> {
        let shift = self.pop_int("shift amount")?;
        let shift = shift.to_i64().ok_or(VmError::ShiftOutOfRange(i64::MAX))?;
        if !(0..=MAX_SHIFT).contains(&shift) {
            return Err(VmError::ShiftOutOfRange(shift));
        }
        Ok(shift as usize)
    }

    fn push_int_checked(&mut self, value: BigInt) -> Result<(), VmError> {
        self.check_int(&value)?;
        self.push_item(StackItem::Integer(value));
        Ok(())
    }

    fn pop_array(
        &mut self,
        op: &'static str,
    ) -> Result<crate::vm::stack_item::Shared<Vec<StackItem>>, VmError> {
        match self.pop_item()? {
            StackItem::Array(items) | StackItem::Struct(items) => Ok(items),
            other => Err(VmError::TypeMismatch {
                op,
                expected: "Array or Struct",
                actual: other.type_name(),
            }),
        }
    }

    fn pop_map(
        &mut self,
        op: &'static str,
    ) -> Result<crate::vm::stack_item::Shared<std::collections::BTreeMap<MapKey, StackItem>>, VmError>
    {
        match self.pop_item()? {
            StackItem::Map(entries) => Ok(entries),
            other => Err(VmError::TypeMismatch {
                op,
                expected: "Map",
                actual: other.type_name(),
            }),
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

/// ECDSA verification of `sig` by `key` over the checked digest bytes.
///
/// Malformed keys or signatures verify as false rather than faulting, so a
/// witness with garbage data fails cleanly.
fn verify_signature(digest: &Hash256, key: &[u8], sig: &[u8]) -> bool {
    match (PublicKey::from_sec1_bytes(key), Signature::from_slice(sig)) {
        (Some(key), Some(sig)) => key.verify(digest.as_slice(), &sig),
        _ => false,
    }
}

/// The engine's built-in interop set: stack item serialization.
fn builtin_interops(id: u32) -> Option<InteropFuncPrice> {
    if id == syscall_id("Runtime.Serialize") {
        return Some(InteropFuncPrice::new(1, |vm: &mut Vm| {
            let item = vm.pop_item()?;
            let bytes = serialize_item(&item, vm.limits())?;
            vm.push_item(StackItem::ByteArray(bytes));
            Ok(())
        }));
    }
    if id == syscall_id("Runtime.Deserialize") {
        return Some(InteropFuncPrice::new(1, |vm: &mut Vm| {
            let bytes = vm.pop_bytes("Runtime.Deserialize")?;
            let limits = *vm.limits();
            let item = deserialize_item(&bytes, &limits)?;
            vm.push_item(item);
            Ok(())
        }));
    }
    None
}

/// Total encoded length of a decoded instruction.
fn instruction_len(instr: &Instr) -> usize {
    1 + match instr.op.operand() {
        OperandKind::None => 0,
        OperandKind::Imm(n) | OperandKind::Off(n) => n,
        OperandKind::Data(prefix) => prefix + instr.operand.len(),
        OperandKind::Hash20 => 20,
        OperandKind::Sys4 => 4,
        OperandKind::Type1 => 1,
    }
}
