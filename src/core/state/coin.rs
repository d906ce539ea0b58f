//! Unspent coin state: per-output spend and claim tracking.

use crate::core::transaction::TxOutput;
use ledger_derive::BinaryCodec;

/// Flag bits of a tracked output. Monotonically set, never cleared.
pub mod coin_state {
    /// The output has been consumed by a later transaction's input.
    pub const SPENT: u8 = 1 << 1;
    /// The generated gas of this (spent, governing) output has been claimed.
    pub const CLAIMED: u8 = 1 << 2;
}

/// Tracking record for one output of a transaction.
#[derive(Clone, Copy, Debug, Eq, PartialEq, BinaryCodec)]
pub struct CoinRecord {
    pub output: TxOutput,
    pub state: u8,
    /// Height of the spending block; meaningful once SPENT is set.
    pub spend_height: u32,
}

impl CoinRecord {
    pub fn is_spent(&self) -> bool {
        self.state & coin_state::SPENT != 0
    }

    pub fn is_claimed(&self) -> bool {
        self.state & coin_state::CLAIMED != 0
    }
}

/// Spend state of every output of one transaction.
///
/// Created when the transaction is first applied; indices match the
/// transaction's output vector and the record is retained after full spend
/// for claim accounting.
#[derive(Clone, Debug, PartialEq, BinaryCodec)]
pub struct UnspentCoinState {
    /// Height of the block that contains the transaction.
    pub height: u32,
    pub items: Vec<CoinRecord>,
}

impl UnspentCoinState {
    pub fn new(height: u32, outputs: &[TxOutput]) -> UnspentCoinState {
        UnspentCoinState {
            height,
            items: outputs
                .iter()
                .map(|output| CoinRecord {
                    output: *output,
                    state: 0,
                    spend_height: 0,
                })
                .collect(),
        }
    }
}
