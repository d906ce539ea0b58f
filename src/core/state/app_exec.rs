//! Application execution results: the persisted outcome of invocation
//! transactions.

use crate::types::fixed8::Fixed8;
use crate::types::hash::{Hash160, Hash256};
use crate::vm::engine::VmState;
use ledger_derive::BinaryCodec;

/// Why a script was executed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, BinaryCodec)]
pub enum Trigger {
    /// Witness check of a transaction or block.
    Verification = 0x00,
    /// Contract invocation against the world state.
    Application = 0x10,
}

/// A notification raised by `Runtime.Notify` during execution.
///
/// `state` is the notified stack item in its serialized wire form.
#[derive(Clone, Debug, PartialEq, BinaryCodec)]
pub struct NotifyEvent {
    /// Script hash of the contract that raised the notification.
    pub script_hash: Hash160,
    pub state: Vec<u8>,
}

/// Execution record of one invocation transaction.
///
/// Stored for every invocation, including faulted ones: a fault discards the
/// state delta but the record still documents the terminal state and the gas
/// burned.
#[derive(Clone, Debug, PartialEq, BinaryCodec)]
pub struct AppExecResult {
    pub tx_hash: Hash256,
    pub trigger: Trigger,
    pub vm_state: VmState,
    pub gas_consumed: Fixed8,
    /// Final evaluation stack, bottom first, items serialized
    /// (unserializable items are recorded as null).
    pub stack: Vec<Vec<u8>>,
    pub notifications: Vec<NotifyEvent>,
}
