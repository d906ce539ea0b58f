//! The unconfirmed transaction pool.
//!
//! A bounded, priority-ordered set keyed by transaction hash. Priority is
//! (fee per byte, arrival order); when the pool is full the lowest-priority
//! entry is evicted to make room for a better one. Transactions whose
//! inputs conflict with a pooled transaction are rejected outright.

use crate::core::transaction::{CoinReference, Transaction};
use crate::types::fixed8::Fixed8;
use crate::types::hash::Hash256;
use dashmap::DashMap;
use ledger_derive::Error;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

/// Rejection reasons for [`MemPool::try_add`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("transaction already in the pool")]
    Duplicate,
    #[error("an input conflicts with a pooled transaction")]
    ConflictingInput,
    #[error("pool is full and the fee does not beat the floor")]
    LowPriority,
}

/// Priority ordering: higher fee-per-byte wins, earlier arrival breaks ties.
///
/// `Ord` is arranged so that a *greater* key is a *better* transaction; the
/// worst entry is always `ordered.first()`.
#[derive(Clone, Debug, PartialEq, Eq)]
struct PriorityKey {
    fee_per_byte: Fixed8,
    seq: u64,
    hash: Hash256,
}

impl Ord for PriorityKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.fee_per_byte
            .cmp(&other.fee_per_byte)
            .then(other.seq.cmp(&self.seq))
            .then(self.hash.cmp(&other.hash))
    }
}

impl PartialOrd for PriorityKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A pooled transaction with its cached priority inputs.
#[derive(Clone, Debug)]
pub struct PoolItem {
    pub tx: Transaction,
    pub net_fee: Fixed8,
    fee_per_byte: Fixed8,
    seq: u64,
}

struct Inner {
    ordered: BTreeSet<PriorityKey>,
    /// Which pooled transaction claims each input.
    inputs: HashMap<CoinReference, Hash256>,
    seq: u64,
}

/// Thread-safe bounded transaction pool.
pub struct MemPool {
    capacity: usize,
    by_hash: DashMap<Hash256, PoolItem>,
    inner: Mutex<Inner>,
}

impl MemPool {
    pub fn new(capacity: usize) -> MemPool {
        MemPool {
            capacity: capacity.max(1),
            by_hash: DashMap::new(),
            inner: Mutex::new(Inner {
                ordered: BTreeSet::new(),
                inputs: HashMap::new(),
                seq: 0,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    /// O(1) membership test used by consensus to check PrepareRequest hashes.
    pub fn contains(&self, hash: &Hash256) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash256) -> Option<Transaction> {
        self.by_hash.get(hash).map(|item| item.tx.clone())
    }

    /// Hashes of every pooled transaction, unordered.
    pub fn hashes(&self) -> Vec<Hash256> {
        self.by_hash.iter().map(|entry| *entry.key()).collect()
    }

    /// Admits a verified transaction with its already-computed net fee.
    ///
    /// The caller is responsible for validity (`verify_transaction`); the
    /// pool only enforces uniqueness, input exclusivity and capacity.
    pub fn try_add(&self, tx: Transaction, net_fee: Fixed8) -> Result<(), PoolError> {
        let hash = tx.hash();
        if self.by_hash.contains_key(&hash) {
            return Err(PoolError::Duplicate);
        }

        let size = tx.size().max(1);
        let fee_per_byte = Fixed8::from_raw(net_fee.raw() / size as i64);

        let mut inner = self.inner.lock().unwrap();
        if tx.inputs.iter().any(|input| inner.inputs.contains_key(input)) {
            return Err(PoolError::ConflictingInput);
        }

        if self.by_hash.len() >= self.capacity {
            let worst = inner.ordered.first().cloned();
            match worst {
                Some(worst) => {
                    let candidate = PriorityKey {
                        fee_per_byte,
                        seq: inner.seq,
                        hash,
                    };
                    if candidate <= worst {
                        return Err(PoolError::LowPriority);
                    }
                    let worst_hash = worst.hash;
                    self.evict(&mut inner, &worst_hash);
                }
                None => return Err(PoolError::LowPriority),
            }
        }

        let seq = inner.seq;
        inner.seq += 1;
        inner.ordered.insert(PriorityKey {
            fee_per_byte,
            seq,
            hash,
        });
        for input in &tx.inputs {
            inner.inputs.insert(*input, hash);
        }
        self.by_hash.insert(
            hash,
            PoolItem {
                tx,
                net_fee,
                fee_per_byte,
                seq,
            },
        );
        Ok(())
    }

    fn evict(&self, inner: &mut Inner, hash: &Hash256) {
        if let Some((_, item)) = self.by_hash.remove(hash) {
            inner.ordered.remove(&PriorityKey {
                fee_per_byte: item.fee_per_byte,
                seq: item.seq,
                hash: *hash,
            });
            for input in &item.tx.inputs {
                inner.inputs.remove(input);
            }
        }
    }

    /// Removes the given transactions, typically after block application.
    pub fn remove(&self, hashes: &[Hash256]) {
        let mut inner = self.inner.lock().unwrap();
        for hash in hashes {
            self.evict(&mut inner, hash);
        }
    }

    /// Transactions for a block proposal: best priority first, bounded by
    /// count and cumulative byte size. The iteration is a consistent
    /// snapshot under the pool lock.
    pub fn iterate_for_block(&self, max_count: usize, max_bytes: usize) -> Vec<Transaction> {
        let inner = self.inner.lock().unwrap();
        let mut selected = Vec::new();
        let mut bytes_left = max_bytes;
        for key in inner.ordered.iter().rev() {
            if selected.len() >= max_count {
                break;
            }
            let Some(item) = self.by_hash.get(&key.hash) else {
                continue;
            };
            let size = item.tx.size();
            if size > bytes_left {
                continue;
            }
            bytes_left -= size;
            selected.push(item.tx.clone());
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::{TxData, TxOutput};
    use crate::types::hash::Hash160;

    fn tx_with_input(prev: u8, index: u16, payload: u8) -> Transaction {
        let mut tx = Transaction::new(TxData::Contract);
        tx.inputs.push(CoinReference {
            prev_hash: Hash256([prev; 32]),
            prev_index: index,
        });
        tx.outputs.push(TxOutput {
            asset_id: Hash256([payload; 32]),
            value: Fixed8::from_int(1),
            script_hash: Hash160([payload; 20]),
        });
        tx
    }

    #[test]
    fn add_contains_get_remove() {
        let pool = MemPool::new(16);
        let tx = tx_with_input(1, 0, 1);
        let hash = tx.hash();

        pool.try_add(tx.clone(), Fixed8::from_int(1)).unwrap();
        assert!(pool.contains(&hash));
        assert_eq!(pool.get(&hash).unwrap(), tx);
        assert_eq!(pool.len(), 1);

        pool.remove(&[hash]);
        assert!(!pool.contains(&hash));
        assert!(pool.is_empty());
    }

    #[test]
    fn duplicate_is_rejected() {
        let pool = MemPool::new(16);
        let tx = tx_with_input(1, 0, 1);
        pool.try_add(tx.clone(), Fixed8::ZERO).unwrap();
        assert_eq!(pool.try_add(tx, Fixed8::ZERO), Err(PoolError::Duplicate));
    }

    #[test]
    fn conflicting_input_is_rejected() {
        let pool = MemPool::new(16);
        pool.try_add(tx_with_input(1, 0, 1), Fixed8::ZERO).unwrap();

        // different payload, same (prev_hash, prev_index)
        let conflict = tx_with_input(1, 0, 2);
        assert_eq!(
            pool.try_add(conflict, Fixed8::from_int(100)),
            Err(PoolError::ConflictingInput)
        );
    }

    #[test]
    fn removing_frees_claimed_inputs() {
        let pool = MemPool::new(16);
        let tx = tx_with_input(1, 0, 1);
        let hash = tx.hash();
        pool.try_add(tx, Fixed8::ZERO).unwrap();
        pool.remove(&[hash]);

        assert!(pool.try_add(tx_with_input(1, 0, 2), Fixed8::ZERO).is_ok());
    }

    #[test]
    fn eviction_drops_lowest_priority() {
        let pool = MemPool::new(2);
        let cheap = tx_with_input(1, 0, 1);
        let cheap_hash = cheap.hash();
        pool.try_add(cheap, Fixed8::from_int(1)).unwrap();
        pool.try_add(tx_with_input(2, 0, 2), Fixed8::from_int(50))
            .unwrap();

        // better-paying transaction evicts the cheapest
        pool.try_add(tx_with_input(3, 0, 3), Fixed8::from_int(100))
            .unwrap();
        assert_eq!(pool.len(), 2);
        assert!(!pool.contains(&cheap_hash));
    }

    #[test]
    fn full_pool_rejects_worse_fee() {
        let pool = MemPool::new(1);
        pool.try_add(tx_with_input(1, 0, 1), Fixed8::from_int(50))
            .unwrap();

        assert_eq!(
            pool.try_add(tx_with_input(2, 0, 2), Fixed8::ZERO),
            Err(PoolError::LowPriority)
        );
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn block_iteration_orders_by_fee_then_arrival() {
        let pool = MemPool::new(16);
        let low = tx_with_input(1, 0, 1);
        let high = tx_with_input(2, 0, 2);
        let first_free = tx_with_input(3, 0, 3);
        let second_free = tx_with_input(4, 0, 4);

        pool.try_add(first_free.clone(), Fixed8::ZERO).unwrap();
        pool.try_add(low.clone(), Fixed8::from_int(1)).unwrap();
        pool.try_add(high.clone(), Fixed8::from_int(100)).unwrap();
        pool.try_add(second_free.clone(), Fixed8::ZERO).unwrap();

        let selected = pool.iterate_for_block(10, usize::MAX);
        assert_eq!(selected[0], high);
        assert_eq!(selected[1], low);
        // zero-fee entries keep arrival order
        assert_eq!(selected[2], first_free);
        assert_eq!(selected[3], second_free);
    }

    #[test]
    fn block_iteration_respects_count_and_bytes() {
        let pool = MemPool::new(16);
        for i in 0..5u8 {
            pool.try_add(tx_with_input(i, 0, i), Fixed8::from_int(i as i64))
                .unwrap();
        }

        assert_eq!(pool.iterate_for_block(2, usize::MAX).len(), 2);

        let one_size = pool.iterate_for_block(1, usize::MAX)[0].size();
        assert_eq!(pool.iterate_for_block(10, one_size).len(), 1);
    }
}
