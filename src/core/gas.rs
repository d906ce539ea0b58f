//! Utility-token issuance schedule and claim arithmetic.
//!
//! Every governing-token coin generates utility tokens for each block it
//! stays unspent. The per-block rate is a fixed step table: blocks
//! `[i*D, (i+1)*D)` generate `generation_amount[i]` whole tokens per whole
//! governing coin, zero once the table is exhausted. On top of generation, a
//! claim collects the system fees accumulated over the coin's lifetime
//! (served from per-height cumulative sums in the DAO).

use crate::types::fixed8::Fixed8;

/// The issuance step table. Protocol constants, configured at startup.
#[derive(Clone, Debug)]
pub struct GasSchedule {
    /// Whole utility tokens generated per block per whole governing coin,
    /// one entry per decrement interval.
    pub generation_amount: Vec<u32>,
    /// Number of blocks each step of the table lasts.
    pub decrement_interval: u32,
}

impl GasSchedule {
    /// Whole utility tokens generated per whole governing coin held over the
    /// height range `[start, end)`.
    ///
    /// Piecewise-constant, so the sum is computed per overlapped interval
    /// rather than per block.
    pub fn units_generated(&self, start: u32, end: u32) -> u64 {
        if end <= start || self.decrement_interval == 0 {
            return 0;
        }
        let interval = self.decrement_interval as u64;
        let (start, end) = (start as u64, end as u64);

        let mut total = 0u64;
        let first = start / interval;
        let last = (end - 1) / interval;
        for step in first..=last {
            let Some(rate) = self.generation_amount.get(step as usize) else {
                break;
            };
            let lo = start.max(step * interval);
            let hi = end.min((step + 1) * interval);
            total += *rate as u64 * (hi - lo);
        }
        total
    }

    /// Converts a per-coin entitlement into the claim value of `coins`.
    ///
    /// `per_coin` is the whole-token entitlement of one whole governing coin
    /// (generation plus the system-fee share); fractional coin amounts scale
    /// proportionally.
    pub fn bonus(&self, coins: Fixed8, per_coin: Fixed8) -> Fixed8 {
        // value / 10^8 * per_coin, carried out in raw units
        let scaled = (coins.raw() as i128 * per_coin.raw() as i128) / Fixed8::ONE.raw() as i128;
        Fixed8::from_raw(scaled as i64)
    }
}

impl Default for GasSchedule {
    fn default() -> Self {
        Self {
            generation_amount: vec![8, 7, 6, 5, 4, 3, 2, 1],
            decrement_interval: 2_000_000,
        }
    }
}
