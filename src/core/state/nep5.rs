//! Token-contract balance tracking.
//!
//! Contracts following the standard transfer-event shape (`"transfer"`,
//! from, to, amount) get per-account balance and transfer-history indexes
//! maintained by the blockchain when an invocation halts successfully.

use crate::types::hash::{Hash160, Hash256};
use ledger_derive::BinaryCodec;
use std::collections::BTreeMap;

/// One observed transfer event.
#[derive(Clone, Copy, Debug, Eq, PartialEq, BinaryCodec)]
pub struct Nep5Transfer {
    /// Script hash of the token contract.
    pub asset: Hash160,
    pub from: Hash160,
    pub to: Hash160,
    pub amount: i64,
    pub block: u32,
    pub tx: Hash256,
}

/// Per-account token index: current balances plus transfer history.
#[derive(Clone, Debug, Default, PartialEq, BinaryCodec)]
pub struct Nep5State {
    /// Balance per token contract.
    pub balances: BTreeMap<Hash160, i64>,
    pub transfers: Vec<Nep5Transfer>,
}

impl Nep5State {
    /// Applies one side of a transfer; negative `delta` for the sender.
    pub fn apply(&mut self, asset: Hash160, delta: i64) {
        let balance = self.balances.entry(asset).or_insert(0);
        *balance = balance.saturating_add(delta);
        if *balance == 0 {
            self.balances.remove(&asset);
        }
    }
}
