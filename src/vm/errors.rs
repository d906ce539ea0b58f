//! Fault reasons for script execution.
//!
//! Every failure path in the engine yields `Fault` with one of these
//! reasons; the VM never panics on bad input and the reason never crosses
//! the engine boundary as a Rust error.

use crate::types::hash::Hash160;
use ledger_derive::Error;

/// Errors that transition the engine to the `Fault` state.
#[derive(Debug, Clone, Error)]
pub enum VmError {
    /// Unknown opcode byte encountered in a script.
    #[error("invalid opcode: {0:#04x}")]
    InvalidOpcode(u8),
    /// Script ended in the middle of an instruction operand.
    #[error("unexpected end of script at offset {0}")]
    UnexpectedEndOfScript(usize),
    /// An operation needed more evaluation stack items than available.
    #[error("evaluation stack underflow")]
    StackUnderflow,
    /// An operation needed more alt stack items than available.
    #[error("alt stack underflow")]
    AltStackUnderflow,
    /// Jump or call target outside the script.
    #[error("jump target {0} outside script bounds")]
    BadJumpTarget(isize),
    /// An operand had the wrong item type.
    #[error("{op}: expected {expected}, got {actual}")]
    TypeMismatch {
        op: &'static str,
        expected: &'static str,
        actual: &'static str,
    },
    /// An integer exceeded the configured bit width.
    #[error("integer magnitude of {bits} bits exceeds the {max}-bit cap")]
    IntegerOverflow { bits: u64, max: u64 },
    #[error("division by zero")]
    DivisionByZero,
    /// Shift amount negative or beyond the shift cap.
    #[error("shift amount {0} out of range")]
    ShiftOutOfRange(i64),
    /// A byte string or serialized item exceeded the item size cap.
    #[error("item of {size} bytes exceeds the {max}-byte cap")]
    ItemTooLarge { size: usize, max: usize },
    /// The live item count exceeded the stack size cap.
    #[error("live item count {count} exceeds the stack size cap {max}")]
    StackSizeExceeded { count: usize, max: usize },
    /// Too many nested invocation contexts.
    #[error("invocation stack depth exceeds {max}")]
    InvocationStackExceeded { max: usize },
    /// An array, struct or map grew beyond the element cap.
    #[error("collection of {len} elements exceeds the {max}-element cap")]
    ArraySizeExceeded { len: usize, max: usize },
    /// Collection index negative or past the end.
    #[error("index {0} out of range")]
    IndexOutOfRange(i64),
    /// A map key was not a primitive item.
    #[error("invalid map key type: {0}")]
    InvalidMapKey(&'static str),
    /// A map lookup missed.
    #[error("map key not found")]
    MapKeyNotFound,
    /// SYSCALL id with no registered handler.
    #[error("unknown syscall id {0:#010x}")]
    UnknownSyscall(u32),
    /// APPCALL with no script resolver registered.
    #[error("no script getter registered for APPCALL")]
    NoScriptGetter,
    /// APPCALL target not found by the script resolver.
    #[error("unknown script hash {0}")]
    UnknownScript(Hash160),
    /// Dynamic APPCALL from a context without the dynamic-invoke flag.
    #[error("dynamic invocation is not allowed in this context")]
    DynamicInvokeForbidden,
    /// CHECKSIG family executed with no checked hash set.
    #[error("checked hash is not set")]
    CheckedHashUnset,
    /// Accumulated gas passed the configured limit.
    #[error("gas limit exceeded: consumed {consumed}, limit {limit}")]
    OutOfGas { consumed: u64, limit: u64 },
    /// Hard per-execution instruction bound reached.
    #[error("instruction count limit reached")]
    InstructionLimit,
    /// Serialization attempted on a self-referencing compound item.
    #[error("cannot serialize a cyclic item")]
    CyclicItem,
    /// Serialization attempted on an interop handle.
    #[error("item of type {0} is not serializable")]
    NotSerializable(&'static str),
    /// Malformed input to `Runtime.Deserialize`.
    #[error("malformed serialized item")]
    DeserializeFailed,
    /// Unknown stack item type byte in an operand or serialized item.
    #[error("invalid stack item type byte {0:#04x}")]
    InvalidTypeByte(u8),
    /// THROW opcode or a falsy THROWIFNOT condition.
    #[error("script threw an exception")]
    Throw,
    /// An interop handler failed.
    #[error("interop failure: {0}")]
    Interop(String),
}
