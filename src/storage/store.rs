//! The persistent store trait and the key tag space.

use ledger_derive::Error;

/// Errors surfaced by a store backend.
///
/// A backend error is the only failure in the validity chain that signals an
/// operational problem rather than bad data; block application treats it as
/// fatal.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// A batch of writes applied atomically.
///
/// `None` values are deletions.
#[derive(Debug, Default)]
pub struct Batch {
    pub ops: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl Batch {
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push((key, Some(value)));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push((key, None));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Sorted byte key/value store consumed by the blockchain engine.
///
/// Implementations must support concurrent readers with a single writer;
/// the engine's apply task is the only caller of [`Store::write_batch`].
pub trait Store: Send + Sync {
    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Stores a single key/value pair.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Deletes a key. Deleting a missing key is not an error.
    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    /// Returns all pairs whose key starts with `prefix`, in ascending key
    /// order.
    fn seek(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    /// Applies a batch of writes atomically.
    fn write_batch(&self, batch: Batch) -> Result<(), StoreError>;
}

/// Single-byte tags partitioning the store's key space.
///
/// Every key is `[tag] ++ suffix`; suffixes never need length prefixes
/// because each tag's suffix shape is fixed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyPrefix {
    /// Full block by block hash.
    Block = 0x01,
    /// Block hash by big-endian index, for height lookups.
    BlockHashByIndex = 0x02,
    /// Transaction (with inclusion height) by tx hash.
    Transaction = 0x03,
    /// Unspent coin state by tx hash.
    UnspentCoin = 0x44,
    /// Account state by script hash.
    Account = 0x40,
    /// Validator state by compressed public key.
    Validator = 0x48,
    /// Asset state by asset id.
    Asset = 0x4c,
    /// Contract state by script hash.
    Contract = 0x50,
    /// Contract storage item by script hash + item key.
    StorageItem = 0x70,
    /// Application execution result by tx hash.
    AppExecResult = 0x72,
    /// NEP-5 balance record by account script hash.
    Nep5Balances = 0x78,
    /// Cumulative system fee by big-endian block index.
    SystemFee = 0x90,
    /// Current block marker (height + hash).
    CurrentBlock = 0xc0,
}

impl KeyPrefix {
    /// Builds a full key from this tag and a suffix.
    pub fn key(self, suffix: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + suffix.len());
        key.push(self as u8);
        key.extend_from_slice(suffix);
        key
    }

    /// The one-byte prefix for seek operations.
    pub fn prefix(self) -> Vec<u8> {
        vec![self as u8]
    }
}
