//! Asset state: native UTXO assets created by Register transactions.

use crate::core::transaction::AssetType;
use crate::crypto::key_pair::PublicKey;
use crate::types::fixed8::Fixed8;
use crate::types::hash::{Hash160, Hash256};
use ledger_derive::BinaryCodec;

/// A registered asset. The id is the hash of the Register transaction.
#[derive(Clone, Debug, PartialEq, BinaryCodec)]
pub struct AssetState {
    pub id: Hash256,
    pub asset_type: AssetType,
    pub name: String,
    /// Total amount ever issuable.
    pub amount: Fixed8,
    /// Amount in circulation; grows with Issue transactions, never past
    /// `amount`.
    pub available: Fixed8,
    pub precision: u8,
    pub owner: PublicKey,
    pub admin: Hash160,
    /// Block height at which the registration lapses; may be extended.
    pub expiration: u32,
    pub is_frozen: bool,
}

impl AssetState {
    /// Amount that can still be issued.
    pub fn issuable(&self) -> Fixed8 {
        self.amount - self.available
    }
}
