//! Layered data access over the persistent store.
//!
//! Reads and writes during block application go through a two-level
//! write-through cache: an optional per-transaction layer on top of a
//! per-block layer on top of the store. Readers see the union with the
//! innermost layer winning. On success the transaction layer merges into the
//! block layer; on an invocation fault it is discarded; on block commit the
//! block layer flushes as one atomic batch.

use crate::core::block::Block;
use crate::core::state::{
    AccountState, AppExecResult, AssetState, ContractState, Nep5State, UnspentCoinState,
    ValidatorState,
};
use crate::core::transaction::Transaction;
use crate::crypto::key_pair::PublicKey;
use crate::storage::store::{Batch, KeyPrefix, Store, StoreError};
use crate::types::encoding::{Decode, DecodeError, Encode};
use crate::types::fixed8::Fixed8;
use crate::types::hash::{Hash160, Hash256};
use ledger_derive::Error;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Failures surfaced by DAO accessors.
#[derive(Debug, Error)]
pub enum DaoError {
    /// The underlying store failed; fatal for the apply task.
    #[error("store error: {0}")]
    Store(StoreError),
    /// A persisted record failed to decode; indicates corruption.
    #[error("corrupt state record: {0}")]
    Corrupt(DecodeError),
}

impl From<StoreError> for DaoError {
    fn from(err: StoreError) -> Self {
        DaoError::Store(err)
    }
}

impl From<DecodeError> for DaoError {
    fn from(err: DecodeError) -> Self {
        DaoError::Corrupt(err)
    }
}

type Layer = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// The layered cache. One instance exists per block being applied, owned by
/// the apply task; snapshot readers go to the store directly.
pub struct Dao {
    store: Arc<dyn Store>,
    block: Layer,
    tx: Option<Layer>,
}

impl Dao {
    pub fn new(store: Arc<dyn Store>) -> Dao {
        Dao {
            store,
            block: BTreeMap::new(),
            tx: None,
        }
    }

    // ===================== layering =====================

    /// Opens the per-transaction layer. Any write until `commit_tx` or
    /// `discard_tx` lands there.
    pub fn begin_tx(&mut self) {
        debug_assert!(self.tx.is_none(), "transaction layer already open");
        self.tx = Some(BTreeMap::new());
    }

    /// Merges the transaction layer into the block layer.
    pub fn commit_tx(&mut self) {
        if let Some(layer) = self.tx.take() {
            self.block.extend(layer);
        }
    }

    /// Drops the transaction layer and every write in it.
    pub fn discard_tx(&mut self) {
        self.tx = None;
    }

    /// Extracts the block layer as an atomic write batch.
    pub fn into_batch(mut self) -> Batch {
        self.commit_tx();
        let mut batch = Batch::new();
        for (key, value) in self.block {
            match value {
                Some(value) => batch.put(key, value),
                None => batch.delete(key),
            }
        }
        batch
    }

    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(layer) = &self.tx
            && let Some(value) = layer.get(key)
        {
            return Ok(value.clone());
        }
        if let Some(value) = self.block.get(key) {
            return Ok(value.clone());
        }
        self.store.get(key)
    }

    fn write(&mut self, key: Vec<u8>, value: Vec<u8>) {
        let layer = self.tx.as_mut().unwrap_or(&mut self.block);
        layer.insert(key, Some(value));
    }

    fn erase(&mut self, key: Vec<u8>) {
        let layer = self.tx.as_mut().unwrap_or(&mut self.block);
        layer.insert(key, None);
    }

    /// All pairs under `prefix`: store results overridden by both cache
    /// layers, in ascending key order.
    pub fn seek(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> = self
            .store
            .seek(prefix)?
            .into_iter()
            .map(|(k, v)| (k, Some(v)))
            .collect();
        for (key, value) in self.block.range(prefix.to_vec()..) {
            if !key.starts_with(prefix) {
                break;
            }
            merged.insert(key.clone(), value.clone());
        }
        if let Some(layer) = &self.tx {
            for (key, value) in layer.range(prefix.to_vec()..) {
                if !key.starts_with(prefix) {
                    break;
                }
                merged.insert(key.clone(), value.clone());
            }
        }
        Ok(merged
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect())
    }

    fn get_decoded<T: Decode>(&self, key: &[u8]) -> Result<Option<T>, DaoError> {
        match self.read(key)? {
            Some(bytes) => Ok(Some(T::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    // ===================== blocks and transactions =====================

    pub fn put_block(&mut self, block: &Block) {
        let hash = block.hash();
        self.write(KeyPrefix::Block.key(hash.as_slice()), block.to_bytes());
        self.write(
            KeyPrefix::BlockHashByIndex.key(&block.index().to_be_bytes()),
            hash.to_vec(),
        );
    }

    pub fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, DaoError> {
        self.get_decoded(&KeyPrefix::Block.key(hash.as_slice()))
    }

    pub fn get_block_hash(&self, index: u32) -> Result<Option<Hash256>, DaoError> {
        Ok(self
            .read(&KeyPrefix::BlockHashByIndex.key(&index.to_be_bytes()))?
            .and_then(|bytes| Hash256::from_slice(&bytes)))
    }

    /// Stores a transaction with its inclusion height.
    pub fn put_transaction(&mut self, height: u32, tx: &Transaction) {
        let mut value = height.to_bytes();
        tx.encode(&mut value);
        self.write(KeyPrefix::Transaction.key(tx.hash().as_slice()), value);
    }

    pub fn get_transaction(&self, hash: &Hash256) -> Result<Option<(u32, Transaction)>, DaoError> {
        match self.read(&KeyPrefix::Transaction.key(hash.as_slice()))? {
            Some(bytes) => {
                let mut input = bytes.as_slice();
                let height = u32::decode(&mut input)?;
                let tx = Transaction::decode(&mut input)?;
                Ok(Some((height, tx)))
            }
            None => Ok(None),
        }
    }

    pub fn put_current_block(&mut self, index: u32, hash: &Hash256) {
        let mut value = index.to_bytes();
        hash.encode(&mut value);
        self.write(KeyPrefix::CurrentBlock.key(&[]), value);
    }

    pub fn get_current_block(&self) -> Result<Option<(u32, Hash256)>, DaoError> {
        self.get_decoded(&KeyPrefix::CurrentBlock.key(&[]))
    }

    /// Cumulative system fee up to and including block `index`.
    pub fn put_sys_fee(&mut self, index: u32, total: Fixed8) {
        self.write(
            KeyPrefix::SystemFee.key(&index.to_be_bytes()),
            total.to_bytes(),
        );
    }

    pub fn get_sys_fee(&self, index: u32) -> Result<Fixed8, DaoError> {
        Ok(self
            .get_decoded(&KeyPrefix::SystemFee.key(&index.to_be_bytes()))?
            .unwrap_or(Fixed8::ZERO))
    }

    // ===================== world state =====================

    pub fn get_account(&self, script_hash: &Hash160) -> Result<Option<AccountState>, DaoError> {
        self.get_decoded(&KeyPrefix::Account.key(script_hash.as_slice()))
    }

    /// The account for `script_hash`, lazily created on first touch.
    pub fn get_account_or_new(&self, script_hash: &Hash160) -> Result<AccountState, DaoError> {
        Ok(self
            .get_account(script_hash)?
            .unwrap_or_else(|| AccountState::new(*script_hash)))
    }

    pub fn put_account(&mut self, account: &AccountState) {
        self.write(
            KeyPrefix::Account.key(account.script_hash.as_slice()),
            account.to_bytes(),
        );
    }

    pub fn get_unspent_coins(
        &self,
        tx_hash: &Hash256,
    ) -> Result<Option<UnspentCoinState>, DaoError> {
        self.get_decoded(&KeyPrefix::UnspentCoin.key(tx_hash.as_slice()))
    }

    pub fn put_unspent_coins(&mut self, tx_hash: &Hash256, coins: &UnspentCoinState) {
        self.write(
            KeyPrefix::UnspentCoin.key(tx_hash.as_slice()),
            coins.to_bytes(),
        );
    }

    pub fn get_asset(&self, asset_id: &Hash256) -> Result<Option<AssetState>, DaoError> {
        self.get_decoded(&KeyPrefix::Asset.key(asset_id.as_slice()))
    }

    pub fn put_asset(&mut self, asset: &AssetState) {
        self.write(KeyPrefix::Asset.key(asset.id.as_slice()), asset.to_bytes());
    }

    pub fn get_contract(&self, script_hash: &Hash160) -> Result<Option<ContractState>, DaoError> {
        self.get_decoded(&KeyPrefix::Contract.key(script_hash.as_slice()))
    }

    pub fn put_contract(&mut self, contract: &ContractState) {
        self.write(
            KeyPrefix::Contract.key(contract.script_hash().as_slice()),
            contract.to_bytes(),
        );
    }

    pub fn delete_contract(&mut self, script_hash: &Hash160) {
        self.erase(KeyPrefix::Contract.key(script_hash.as_slice()));
    }

    pub fn get_validator(&self, key: &PublicKey) -> Result<Option<ValidatorState>, DaoError> {
        self.get_decoded(&KeyPrefix::Validator.key(&key.compressed()))
    }

    pub fn get_validator_or_new(&self, key: &PublicKey) -> Result<ValidatorState, DaoError> {
        Ok(self
            .get_validator(key)?
            .unwrap_or_else(|| ValidatorState::new(*key)))
    }

    pub fn put_validator(&mut self, validator: &ValidatorState) {
        self.write(
            KeyPrefix::Validator.key(&validator.public_key.compressed()),
            validator.to_bytes(),
        );
    }

    /// Every registered validator candidate.
    pub fn registered_validators(&self) -> Result<Vec<ValidatorState>, DaoError> {
        let mut validators = Vec::new();
        for (_, bytes) in self.seek(&KeyPrefix::Validator.prefix())? {
            let validator = ValidatorState::from_bytes(&bytes)?;
            if validator.registered {
                validators.push(validator);
            }
        }
        Ok(validators)
    }

    fn storage_item_key(script_hash: &Hash160, key: &[u8]) -> Vec<u8> {
        let mut suffix = Vec::with_capacity(20 + key.len());
        suffix.extend_from_slice(script_hash.as_slice());
        suffix.extend_from_slice(key);
        KeyPrefix::StorageItem.key(&suffix)
    }

    pub fn get_storage_item(
        &self,
        script_hash: &Hash160,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, DaoError> {
        Ok(self.read(&Self::storage_item_key(script_hash, key))?)
    }

    pub fn put_storage_item(&mut self, script_hash: &Hash160, key: &[u8], value: Vec<u8>) {
        self.write(Self::storage_item_key(script_hash, key), value);
    }

    pub fn delete_storage_item(&mut self, script_hash: &Hash160, key: &[u8]) {
        self.erase(Self::storage_item_key(script_hash, key));
    }

    /// Deletes every storage item of a contract (destroy / migrate).
    pub fn delete_contract_storage(&mut self, script_hash: &Hash160) -> Result<(), DaoError> {
        let prefix = KeyPrefix::StorageItem.key(script_hash.as_slice());
        for (key, _) in self.seek(&prefix)? {
            self.erase(key);
        }
        Ok(())
    }

    /// Every storage item of a contract, for migration copies.
    pub fn contract_storage(
        &self,
        script_hash: &Hash160,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, DaoError> {
        let prefix = KeyPrefix::StorageItem.key(script_hash.as_slice());
        Ok(self
            .seek(&prefix)?
            .into_iter()
            .map(|(key, value)| (key[prefix.len()..].to_vec(), value))
            .collect())
    }

    pub fn put_app_exec_result(&mut self, result: &AppExecResult) {
        self.write(
            KeyPrefix::AppExecResult.key(result.tx_hash.as_slice()),
            result.to_bytes(),
        );
    }

    pub fn get_app_exec_result(
        &self,
        tx_hash: &Hash256,
    ) -> Result<Option<AppExecResult>, DaoError> {
        self.get_decoded(&KeyPrefix::AppExecResult.key(tx_hash.as_slice()))
    }

    pub fn get_nep5_state(&self, account: &Hash160) -> Result<Nep5State, DaoError> {
        Ok(self
            .get_decoded(&KeyPrefix::Nep5Balances.key(account.as_slice()))?
            .unwrap_or_default())
    }

    pub fn put_nep5_state(&mut self, account: &Hash160, state: &Nep5State) {
        self.write(
            KeyPrefix::Nep5Balances.key(account.as_slice()),
            state.to_bytes(),
        );
    }
}
