//! Account state: balances, votes and accrued claims per script hash.

use crate::crypto::key_pair::PublicKey;
use crate::types::fixed8::Fixed8;
use crate::types::hash::{Hash160, Hash256};
use ledger_derive::BinaryCodec;
use std::collections::BTreeMap;

/// One unspent output owned by an account.
#[derive(Clone, Copy, Debug, Eq, PartialEq, BinaryCodec)]
pub struct UnspentBalance {
    pub tx: Hash256,
    pub index: u16,
    pub value: Fixed8,
}

/// A spent governing-token output whose generated utility tokens have not
/// been claimed yet.
///
/// `start` is the height the coin was created at, `end` the height it was
/// spent at; generation accrues over `[start, end)`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, BinaryCodec)]
pub struct UnclaimedBalance {
    pub tx: Hash256,
    pub index: u16,
    pub start: u32,
    pub end: u32,
    pub value: Fixed8,
}

/// The state of one account, keyed by script hash.
///
/// The per-asset balance lists precisely partition the account's unspent
/// outputs: crediting an output appends an entry, spending it removes the
/// entry again.
#[derive(Clone, Debug, PartialEq, BinaryCodec)]
pub struct AccountState {
    pub version: u8,
    pub script_hash: Hash160,
    pub is_frozen: bool,
    /// Validator candidates this account votes for, weighted by its
    /// governing-token balance.
    pub votes: Vec<PublicKey>,
    /// Unspent outputs per asset.
    pub balances: BTreeMap<Hash256, Vec<UnspentBalance>>,
    /// Spent governing coins awaiting a Claim transaction.
    pub unclaimed: Vec<UnclaimedBalance>,
}

impl AccountState {
    pub fn new(script_hash: Hash160) -> AccountState {
        AccountState {
            version: 0,
            script_hash,
            is_frozen: false,
            votes: Vec::new(),
            balances: BTreeMap::new(),
            unclaimed: Vec::new(),
        }
    }

    /// Total balance of one asset.
    pub fn balance_of(&self, asset_id: &Hash256) -> Fixed8 {
        self.balances
            .get(asset_id)
            .map(|entries| entries.iter().map(|entry| entry.value).sum())
            .unwrap_or(Fixed8::ZERO)
    }

    /// Credits an unspent output to this account.
    pub fn add_unspent(&mut self, asset_id: Hash256, tx: Hash256, index: u16, value: Fixed8) {
        self.balances
            .entry(asset_id)
            .or_default()
            .push(UnspentBalance { tx, index, value });
    }

    /// Removes the balance entry for a spent output.
    ///
    /// Returns `false` if the entry was not tracked (which indicates state
    /// corruption upstream).
    pub fn remove_unspent(&mut self, asset_id: &Hash256, tx: &Hash256, index: u16) -> bool {
        let Some(entries) = self.balances.get_mut(asset_id) else {
            return false;
        };
        let Some(position) = entries
            .iter()
            .position(|entry| entry.tx == *tx && entry.index == index)
        else {
            return false;
        };
        entries.swap_remove(position);
        if entries.is_empty() {
            self.balances.remove(asset_id);
        }
        true
    }

    pub fn add_unclaimed(&mut self, entry: UnclaimedBalance) {
        self.unclaimed.push(entry);
    }

    /// Removes the unclaimed entry for `(tx, index)`; `false` if absent.
    pub fn remove_unclaimed(&mut self, tx: &Hash256, index: u16) -> bool {
        let Some(position) = self
            .unclaimed
            .iter()
            .position(|entry| entry.tx == *tx && entry.index == index)
        else {
            return false;
        };
        self.unclaimed.swap_remove(position);
        true
    }
}
