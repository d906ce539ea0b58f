//! The blockchain state-transition engine.
//!
//! Owns the chain tip and the persistent store, and turns validated blocks
//! into atomically-committed state deltas. Per block, a fresh layered
//! [`Dao`] buffers every write; per invocation transaction, a nested layer
//! isolates the VM's effects so a fault discards them without losing the
//! transaction record. Readers outside the apply path use store snapshots
//! and never see a block in progress.

use crate::config::{ProtocolConfig, build_genesis};
use crate::core::block::Block;
use crate::core::dao::{Dao, DaoError};
use crate::core::interops::{InteropContext, Notification, default_price};
use crate::core::mempool::{MemPool, PoolError};
use crate::core::state::{
    AppExecResult, AssetState, ContractState, NotifyEvent, Trigger, UnclaimedBalance,
    UnspentCoinState, ValidatorState, coin_state,
};
use crate::core::transaction::{
    AttributeUsage, CoinReference, StateKind, Transaction, TxData, TxOutput, TxType, Witness,
};
use crate::crypto::key_pair::PublicKey;
use crate::storage::store::{Store, StoreError};
use crate::types::encoding::{Decode, DecodeError, Encode};
use crate::types::fixed8::Fixed8;
use crate::types::hash::{Hash160, Hash256};
use crate::vm::engine::{Vm, VmState};
use crate::vm::serialization::serialize_item;
use crate::vm::stack_item::{ItemType, StackItem};
use crate::{info, warn};
use ledger_derive::Error;
use num_traits::ToPrimitive;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::rc::Rc;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// Failures of the validity chain and the apply path.
#[derive(Debug, Error)]
pub enum BlockchainError {
    /// Malformed wire data.
    #[error("decode error: {0}")]
    Decode(DecodeError),
    /// Structural or signature verification failed.
    #[error("verification failed: {0}")]
    Verify(String),
    /// A reference to a nonexistent, spent or expired entity.
    #[error("invalid state reference: {0}")]
    State(String),
    /// The underlying store failed; fatal, the caller must stop writing.
    #[error("storage failure: {0}")]
    Storage(StoreError),
    /// Mempool admission failed.
    #[error("mempool rejection: {0}")]
    Pool(PoolError),
}

impl From<DecodeError> for BlockchainError {
    fn from(err: DecodeError) -> Self {
        BlockchainError::Decode(err)
    }
}

impl From<StoreError> for BlockchainError {
    fn from(err: StoreError) -> Self {
        BlockchainError::Storage(err)
    }
}

impl From<DaoError> for BlockchainError {
    fn from(err: DaoError) -> Self {
        match err {
            DaoError::Store(err) => BlockchainError::Storage(err),
            DaoError::Corrupt(err) => BlockchainError::State(format!("corrupt record: {err}")),
        }
    }
}

impl From<PoolError> for BlockchainError {
    fn from(err: PoolError) -> Self {
        BlockchainError::Pool(err)
    }
}

/// Claim entitlements of an account, split by availability.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UnclaimedSummary {
    /// Accrued by spent coins; collectable by a Claim transaction now.
    pub claimable: Fixed8,
    /// Accrued by coins still unspent; collectable only after spending them.
    pub unavailable: Fixed8,
}

/// One resolved transaction input.
struct ResolvedInput {
    reference: CoinReference,
    output: TxOutput,
    /// Height the referenced output was created at.
    origin_height: u32,
}

/// The blockchain engine. Single writer: only the apply task calls
/// [`Blockchain::add_block`].
pub struct Blockchain {
    config: ProtocolConfig,
    store: Arc<dyn Store>,
    mempool: Arc<MemPool>,
    governing_token: Hash256,
    utility_token: Hash256,
    tip: RwLock<(u32, Hash256)>,
}

impl Blockchain {
    /// Opens (or bootstraps) a chain on `store`.
    ///
    /// An empty store gets the deterministic genesis block applied; a
    /// non-empty store must contain the same genesis or it belongs to a
    /// different network.
    pub fn new(config: ProtocolConfig, store: Arc<dyn Store>) -> Result<Blockchain, BlockchainError> {
        let genesis = build_genesis(&config);
        let mempool = Arc::new(MemPool::new(config.max_mempool_capacity));

        let chain = Blockchain {
            config,
            store,
            mempool,
            governing_token: genesis.governing_token,
            utility_token: genesis.utility_token,
            tip: RwLock::new((0, genesis.block.hash())),
        };

        match Dao::new(chain.store.clone()).get_current_block()? {
            None => {
                chain.apply_block_internal(&genesis.block, false)?;
                info!(
                    "chain bootstrapped: genesis={} governing={} utility={}",
                    genesis.block.hash(),
                    chain.governing_token,
                    chain.utility_token
                );
            }
            Some((height, hash)) => {
                let stored_genesis = chain.snapshot().get_block_hash(0)?;
                if stored_genesis != Some(genesis.block.hash()) {
                    return Err(BlockchainError::Verify(
                        "store was initialized for a different network".into(),
                    ));
                }
                *chain.tip.write().unwrap() = (height, hash);
                info!("chain resumed: height={height} tip={hash}");
            }
        }

        Ok(chain)
    }

    // ===================== accessors =====================

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn mempool(&self) -> &Arc<MemPool> {
        &self.mempool
    }

    pub fn governing_token(&self) -> Hash256 {
        self.governing_token
    }

    pub fn utility_token(&self) -> Hash256 {
        self.utility_token
    }

    pub fn current_height(&self) -> u32 {
        self.tip.read().unwrap().0
    }

    pub fn current_hash(&self) -> Hash256 {
        self.tip.read().unwrap().1
    }

    /// A point-in-time read view over committed state.
    pub fn snapshot(&self) -> Dao {
        Dao::new(self.store.clone())
    }

    pub fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, BlockchainError> {
        Ok(self.snapshot().get_block(hash)?)
    }

    pub fn get_block_by_index(&self, index: u32) -> Result<Option<Block>, BlockchainError> {
        let snapshot = self.snapshot();
        match snapshot.get_block_hash(index)? {
            Some(hash) => Ok(snapshot.get_block(&hash)?),
            None => Ok(None),
        }
    }

    pub fn get_header(
        &self,
        hash: &Hash256,
    ) -> Result<Option<crate::core::block::Header>, BlockchainError> {
        Ok(self.snapshot().get_block(hash)?.map(|block| block.header))
    }

    pub fn get_transaction(
        &self,
        hash: &Hash256,
    ) -> Result<Option<(u32, Transaction)>, BlockchainError> {
        Ok(self.snapshot().get_transaction(hash)?)
    }

    pub fn get_account(
        &self,
        script_hash: &Hash160,
    ) -> Result<Option<crate::core::state::AccountState>, BlockchainError> {
        Ok(self.snapshot().get_account(script_hash)?)
    }

    pub fn get_asset(&self, asset_id: &Hash256) -> Result<Option<AssetState>, BlockchainError> {
        Ok(self.snapshot().get_asset(asset_id)?)
    }

    pub fn get_contract(
        &self,
        script_hash: &Hash160,
    ) -> Result<Option<ContractState>, BlockchainError> {
        Ok(self.snapshot().get_contract(script_hash)?)
    }

    pub fn get_storage_item(
        &self,
        script_hash: &Hash160,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, BlockchainError> {
        Ok(self.snapshot().get_storage_item(script_hash, key)?)
    }

    pub fn get_app_exec_result(
        &self,
        tx_hash: &Hash256,
    ) -> Result<Option<AppExecResult>, BlockchainError> {
        Ok(self.snapshot().get_app_exec_result(tx_hash)?)
    }

    /// Registered validator candidates with their vote tallies.
    pub fn get_validators(&self) -> Result<Vec<ValidatorState>, BlockchainError> {
        Ok(self.snapshot().registered_validators()?)
    }

    // ===================== admission =====================

    /// Verifies a transaction against committed state and admits it to the
    /// mempool.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<(), BlockchainError> {
        let net_fee = self.verify_transaction(&tx)?;
        self.mempool.try_add(tx, net_fee)?;
        Ok(())
    }

    /// The standalone validity predicate, used by the mempool and RPC.
    ///
    /// Returns the network fee (inputs minus outputs of the utility token,
    /// minus the protocol fee) used as pool priority.
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<Fixed8, BlockchainError> {
        let dao = Rc::new(RefCell::new(self.snapshot()));
        let tip = *self.tip.read().unwrap();
        self.verify_transaction_in(&dao, tip.0, tx)
    }

    // ===================== block application =====================

    /// Full validate-and-apply. Blocks arrive strictly in height order.
    pub fn add_block(&self, block: &Block) -> Result<(), BlockchainError> {
        self.apply_block_internal(block, true)
    }

    fn apply_block_internal(&self, block: &Block, verify: bool) -> Result<(), BlockchainError> {
        let tip = *self.tip.read().unwrap();
        if verify {
            self.verify_block_header(block, tip)?;
        }

        let dao = Rc::new(RefCell::new(Dao::new(self.store.clone())));

        let mut block_fees = Fixed8::ZERO;
        for tx in &block.transactions {
            if verify && self.config.verify_transactions {
                self.verify_transaction_in(&dao, block.index(), tx)?;
            }
            self.process_transaction(&dao, block, tx)?;
            block_fees += self.config.system_fees.fee_for(tx.tx_type());
        }

        let hash = block.hash();
        {
            let mut dao = dao.borrow_mut();
            let previous_fees = if block.index() == 0 {
                Fixed8::ZERO
            } else {
                dao.get_sys_fee(block.index() - 1)?
            };
            dao.put_sys_fee(block.index(), previous_fees + block_fees);
            dao.put_block(block);
            dao.put_current_block(block.index(), &hash);
        }

        let dao = Rc::try_unwrap(dao)
            .unwrap_or_else(|_| unreachable!("block DAO is exclusively owned"))
            .into_inner();
        self.store.write_batch(dao.into_batch())?;
        *self.tip.write().unwrap() = (block.index(), hash);

        let hashes: Vec<Hash256> = block.transactions.iter().map(|tx| tx.hash()).collect();
        self.mempool.remove(&hashes);

        info!(
            "block applied: height={} hash={} transactions={}",
            block.index(),
            hash,
            block.transactions.len()
        );
        Ok(())
    }

    fn verify_block_header(&self, block: &Block, tip: (u32, Hash256)) -> Result<(), BlockchainError> {
        if block.index() != tip.0 + 1 {
            return Err(BlockchainError::Verify(format!(
                "expected index {}, got {}",
                tip.0 + 1,
                block.index()
            )));
        }
        if block.header.prev_hash != tip.1 {
            return Err(BlockchainError::Verify("previous block hash mismatch".into()));
        }

        let snapshot = self.snapshot();
        let prev = snapshot
            .get_block(&tip.1)?
            .ok_or_else(|| BlockchainError::State("tip block missing from store".into()))?;
        if block.header.timestamp <= prev.header.timestamp {
            return Err(BlockchainError::Verify(
                "timestamp does not increase over the previous block".into(),
            ));
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if block.header.timestamp > now + self.config.max_time_drift {
            return Err(BlockchainError::Verify(
                "timestamp too far in the future".into(),
            ));
        }

        if block.transactions.len() > self.config.max_tx_per_block {
            return Err(BlockchainError::Verify("too many transactions".into()));
        }
        if block.encoded_size() > self.config.max_block_size {
            return Err(BlockchainError::Verify("block exceeds size cap".into()));
        }
        let mut seen = HashSet::new();
        if !block.transactions.iter().all(|tx| seen.insert(tx.hash())) {
            return Err(BlockchainError::Verify("duplicate transaction".into()));
        }
        if !block.merkle_root_valid() {
            return Err(BlockchainError::Verify("merkle root mismatch".into()));
        }

        // The block witness answers for the quorum the previous block
        // committed to.
        if block.header.witness.script_hash() != prev.header.next_consensus {
            return Err(BlockchainError::Verify(
                "witness does not match next_consensus".into(),
            ));
        }
        let dao = Rc::new(RefCell::new(snapshot));
        if !self.verify_witness(
            &dao,
            block.index(),
            block.header.timestamp,
            block.header.digest(),
            &block.header.witness,
        ) {
            return Err(BlockchainError::Verify("invalid block witness".into()));
        }
        Ok(())
    }

    // ===================== transaction verification =====================

    fn verify_transaction_in(
        &self,
        dao: &Rc<RefCell<Dao>>,
        height: u32,
        tx: &Transaction,
    ) -> Result<Fixed8, BlockchainError> {
        // (ii) duplicate inputs
        let mut unique = HashSet::new();
        if !tx.inputs.iter().all(|input| unique.insert(*input)) {
            return Err(BlockchainError::Verify("duplicate inputs".into()));
        }

        // (iii) inputs exist and are unspent under the current view
        let resolved = self.resolve_inputs(&dao.borrow(), tx)?;

        // (iv) output values positive, assets known
        for output in &tx.outputs {
            if output.value <= Fixed8::ZERO {
                return Err(BlockchainError::Verify("non-positive output value".into()));
            }
            if dao.borrow().get_asset(&output.asset_id)?.is_none() {
                return Err(BlockchainError::State(format!(
                    "unknown asset {}",
                    output.asset_id
                )));
            }
        }

        // (v) per-asset balance: minting only for Issue/Claim, burning only
        // as utility-token fees
        let results = self.transaction_results(&resolved, tx);
        for (asset_id, result) in &results {
            if result.is_negative() {
                match tx.tx_type() {
                    TxType::Issue => {
                        let asset = dao.borrow().get_asset(asset_id)?.ok_or_else(|| {
                            BlockchainError::State(format!("issue of unknown asset {asset_id}"))
                        })?;
                        if -*result > asset.issuable() {
                            return Err(BlockchainError::State(format!(
                                "issue exceeds the asset cap of {}",
                                asset.amount
                            )));
                        }
                    }
                    TxType::Claim if *asset_id == self.utility_token => {}
                    _ => {
                        return Err(BlockchainError::Verify(
                            "transaction mints value it is not entitled to".into(),
                        ));
                    }
                }
            } else if result.is_zero() {
                continue;
            } else if *asset_id != self.utility_token {
                return Err(BlockchainError::Verify(
                    "transaction destroys non-fee value".into(),
                ));
            }
        }

        // (vii) type-specific constraints
        self.verify_type_specific(dao, tx, &results)?;

        let utility_result = results
            .get(&self.utility_token)
            .copied()
            .unwrap_or(Fixed8::ZERO);
        let burned = if utility_result.is_negative() {
            Fixed8::ZERO
        } else {
            utility_result
        };
        let system_fee = self.config.system_fees.fee_for(tx.tx_type());
        if burned < system_fee {
            return Err(BlockchainError::Verify(format!(
                "network fee {burned} below the protocol fee {system_fee}"
            )));
        }

        // (vi) witnesses
        self.verify_tx_witnesses(dao, height, tx, &resolved)?;

        Ok(burned - system_fee)
    }

    fn verify_type_specific(
        &self,
        dao: &Rc<RefCell<Dao>>,
        tx: &Transaction,
        results: &BTreeMap<Hash256, Fixed8>,
    ) -> Result<(), BlockchainError> {
        match &tx.data {
            TxData::Claim { claims } => {
                if claims.is_empty() {
                    return Err(BlockchainError::Verify("claim without references".into()));
                }
                let mut unique = HashSet::new();
                if !claims.iter().all(|claim| unique.insert(*claim)) {
                    return Err(BlockchainError::Verify("duplicate claim references".into()));
                }
                let mut claimable = Fixed8::ZERO;
                for claim in claims {
                    claimable += self.claimable_for(&dao.borrow(), claim)?;
                }
                let minted = -results
                    .get(&self.utility_token)
                    .copied()
                    .unwrap_or(Fixed8::ZERO);
                if minted != claimable {
                    return Err(BlockchainError::Verify(format!(
                        "claim of {minted} does not match the entitlement {claimable}"
                    )));
                }
            }
            TxData::Register {
                amount, precision, ..
            } => {
                if *amount <= Fixed8::ZERO {
                    return Err(BlockchainError::Verify("asset amount not positive".into()));
                }
                if *precision > 8 {
                    return Err(BlockchainError::Verify("asset precision above 8".into()));
                }
            }
            TxData::Invocation { script, gas } => {
                if script.is_empty() {
                    return Err(BlockchainError::Verify("empty invocation script".into()));
                }
                if gas.is_negative() {
                    return Err(BlockchainError::Verify("negative invocation gas".into()));
                }
            }
            TxData::Publish { script, .. } => {
                if script.is_empty() {
                    return Err(BlockchainError::Verify("empty contract script".into()));
                }
            }
            TxData::State { descriptors } => {
                for descriptor in descriptors {
                    let valid = match descriptor.kind {
                        StateKind::Account => {
                            descriptor.key.len() == 20 && descriptor.field == "Votes"
                        }
                        StateKind::Validator => {
                            descriptor.key.len() == 33 && descriptor.field == "Registered"
                        }
                    };
                    if !valid {
                        return Err(BlockchainError::Verify(
                            "malformed state descriptor".into(),
                        ));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn resolve_inputs(
        &self,
        dao: &Dao,
        tx: &Transaction,
    ) -> Result<Vec<ResolvedInput>, BlockchainError> {
        let mut resolved = Vec::with_capacity(tx.inputs.len());
        for input in &tx.inputs {
            let coins = dao.get_unspent_coins(&input.prev_hash)?.ok_or_else(|| {
                BlockchainError::State(format!("unknown input {}", input.prev_hash))
            })?;
            let record = coins.items.get(input.prev_index as usize).ok_or_else(|| {
                BlockchainError::State(format!(
                    "bad input index {}/{}",
                    input.prev_hash, input.prev_index
                ))
            })?;
            if record.is_spent() {
                return Err(BlockchainError::State(format!(
                    "double spend: {}/{}",
                    input.prev_hash, input.prev_index
                )));
            }
            resolved.push(ResolvedInput {
                reference: *input,
                output: record.output,
                origin_height: coins.height,
            });
        }
        Ok(resolved)
    }

    /// Per-asset `inputs - outputs`: positive burns, negative mints.
    fn transaction_results(
        &self,
        resolved: &[ResolvedInput],
        tx: &Transaction,
    ) -> BTreeMap<Hash256, Fixed8> {
        let mut results: BTreeMap<Hash256, Fixed8> = BTreeMap::new();
        for input in resolved {
            *results.entry(input.output.asset_id).or_default() += input.output.value;
        }
        for output in &tx.outputs {
            *results.entry(output.asset_id).or_default() -= output.value;
        }
        results.retain(|_, value| !value.is_zero());
        results
    }

    /// The script hashes a transaction's witnesses must answer for, sorted.
    fn script_hashes_for_verifying(
        &self,
        dao: &Dao,
        tx: &Transaction,
        resolved: &[ResolvedInput],
    ) -> Result<Vec<Hash160>, BlockchainError> {
        let mut hashes: BTreeSet<Hash160> = resolved
            .iter()
            .map(|input| input.output.script_hash)
            .collect();

        for attribute in &tx.attributes {
            if attribute.usage == AttributeUsage::Script {
                let hash = Hash160::from_slice(&attribute.data).ok_or_else(|| {
                    BlockchainError::Verify("script attribute is not a 20-byte hash".into())
                })?;
                hashes.insert(hash);
            }
        }

        match &tx.data {
            TxData::Claim { claims } => {
                for claim in claims {
                    let coins = dao.get_unspent_coins(&claim.prev_hash)?.ok_or_else(|| {
                        BlockchainError::State(format!("unknown claim {}", claim.prev_hash))
                    })?;
                    let record =
                        coins.items.get(claim.prev_index as usize).ok_or_else(|| {
                            BlockchainError::State("bad claim index".into())
                        })?;
                    hashes.insert(record.output.script_hash);
                }
            }
            TxData::Enrollment { public_key } => {
                hashes.insert(crate::vm::emit::signature_contract_hash(public_key));
            }
            TxData::Register { owner, .. } => {
                hashes.insert(crate::vm::emit::signature_contract_hash(owner));
            }
            TxData::State { descriptors } => {
                for descriptor in descriptors {
                    match descriptor.kind {
                        StateKind::Account => {
                            if let Some(hash) = Hash160::from_slice(&descriptor.key) {
                                hashes.insert(hash);
                            }
                        }
                        StateKind::Validator => {
                            if let Some(key) = PublicKey::from_sec1_bytes(&descriptor.key) {
                                hashes.insert(crate::vm::emit::signature_contract_hash(&key));
                            }
                        }
                    }
                }
            }
            _ => {}
        }

        Ok(hashes.into_iter().collect())
    }

    fn verify_tx_witnesses(
        &self,
        dao: &Rc<RefCell<Dao>>,
        height: u32,
        tx: &Transaction,
        resolved: &[ResolvedInput],
    ) -> Result<(), BlockchainError> {
        let expected = self.script_hashes_for_verifying(&dao.borrow(), tx, resolved)?;
        if expected.len() != tx.witnesses.len() {
            return Err(BlockchainError::Verify(format!(
                "expected {} witnesses, got {}",
                expected.len(),
                tx.witnesses.len()
            )));
        }

        let mut witnesses: Vec<&Witness> = tx.witnesses.iter().collect();
        witnesses.sort_by_key(|witness| witness.script_hash());

        let timestamp = self
            .get_block_by_index(self.current_height())
            .ok()
            .flatten()
            .map(|block| block.header.timestamp)
            .unwrap_or(0);

        for (expected_hash, witness) in expected.iter().zip(witnesses) {
            if witness.script_hash() != *expected_hash {
                return Err(BlockchainError::Verify(format!(
                    "missing witness for {expected_hash}"
                )));
            }
            if !self.verify_witness(dao, height, timestamp, tx.digest(), witness) {
                return Err(BlockchainError::Verify(format!(
                    "witness for {expected_hash} did not verify"
                )));
            }
        }
        Ok(())
    }

    /// Runs one witness: the verification script with the invocation script
    /// pre-executed, Verification trigger, checked hash set to the signed
    /// digest. Valid iff the engine halts with a single truthy item.
    fn verify_witness(
        &self,
        dao: &Rc<RefCell<Dao>>,
        height: u32,
        timestamp: u64,
        digest: Hash256,
        witness: &Witness,
    ) -> bool {
        let ctx = Rc::new(InteropContext {
            trigger: Trigger::Verification,
            dao: dao.clone(),
            height,
            timestamp,
            tx_hash: None,
            verification_hashes: Vec::new(),
            notifications: RefCell::new(Vec::new()),
            logs: RefCell::new(Vec::new()),
        });

        let mut vm = Vm::new();
        vm.register_interop_getter(ctx.interop_getter());
        vm.set_script_getter(ctx.script_getter());
        vm.set_price_getter(Rc::new(default_price));
        vm.set_gas_limit(self.config.free_gas_limit.raw().max(0) as u64);
        vm.set_checked_hash(digest);

        if vm.load(witness.verification.clone()).is_err() {
            return false;
        }
        if !witness.invocation.is_empty() && vm.load(witness.invocation.clone()).is_err() {
            return false;
        }

        vm.run() == VmState::Halt && vm.estack_len() == 1 && vm.estack()[0].to_bool()
    }

    // ===================== transaction processing =====================

    fn process_transaction(
        &self,
        dao: &Rc<RefCell<Dao>>,
        block: &Block,
        tx: &Transaction,
    ) -> Result<(), BlockchainError> {
        // Inputs are resolved before any mutation: the records are consumed
        // by the balance arithmetic and witness sets below, after the spent
        // bits are already set.
        let resolved = self.resolve_inputs(&dao.borrow(), tx)?;

        {
            let mut dao = dao.borrow_mut();
            dao.put_transaction(block.index(), tx);
            dao.put_unspent_coins(&tx.hash(), &UnspentCoinState::new(block.index(), &tx.outputs));

            // 1. resolve and mark inputs
            self.process_inputs(&mut dao, block, tx)?;
        }

        // 2. type-specific application
        match &tx.data {
            TxData::Contract => {}
            TxData::Register { .. } => self.process_register(&mut dao.borrow_mut(), block, tx)?,
            TxData::Issue => self.process_issue(&mut dao.borrow_mut(), tx, &resolved)?,
            TxData::Claim { claims } => self.process_claim(&mut dao.borrow_mut(), tx, claims)?,
            TxData::Enrollment { public_key } => {
                let mut dao = dao.borrow_mut();
                let mut validator = dao.get_validator_or_new(public_key)?;
                validator.registered = true;
                dao.put_validator(&validator);
            }
            TxData::State { descriptors } => {
                let mut dao = dao.borrow_mut();
                for descriptor in descriptors {
                    self.process_state_descriptor(&mut dao, descriptor)?;
                }
            }
            TxData::Publish {
                script,
                param_list,
                return_type,
                properties,
                name,
                code_version,
                author,
                email,
                description,
            } => {
                dao.borrow_mut().put_contract(&ContractState {
                    script: script.clone(),
                    param_list: param_list.clone(),
                    return_type: *return_type,
                    properties: *properties,
                    name: name.clone(),
                    code_version: code_version.clone(),
                    author: author.clone(),
                    email: email.clone(),
                    description: description.clone(),
                });
            }
            TxData::Invocation { script, gas } => {
                self.process_invocation(dao, block, tx, &resolved, script, *gas)?;
            }
        }

        // 3. credit outputs
        self.credit_outputs(&mut dao.borrow_mut(), tx)?;
        Ok(())
    }

    fn process_inputs(
        &self,
        dao: &mut Dao,
        block: &Block,
        tx: &Transaction,
    ) -> Result<(), BlockchainError> {
        for input in &tx.inputs {
            let mut coins = dao.get_unspent_coins(&input.prev_hash)?.ok_or_else(|| {
                BlockchainError::State(format!("bad input: {}", input.prev_hash))
            })?;
            let record = coins
                .items
                .get_mut(input.prev_index as usize)
                .ok_or_else(|| {
                    BlockchainError::State(format!(
                        "bad input: {}/{}",
                        input.prev_hash, input.prev_index
                    ))
                })?;
            if record.is_spent() {
                return Err(BlockchainError::State(format!(
                    "double spend: {}/{}",
                    input.prev_hash, input.prev_index
                )));
            }
            record.state |= coin_state::SPENT;
            record.spend_height = block.index();
            let spent_output = record.output;
            let origin_height = coins.height;
            dao.put_unspent_coins(&input.prev_hash, &coins);

            let mut account = dao.get_account_or_new(&spent_output.script_hash)?;
            account.remove_unspent(&spent_output.asset_id, &input.prev_hash, input.prev_index);

            if spent_output.asset_id == self.governing_token {
                account.add_unclaimed(UnclaimedBalance {
                    tx: input.prev_hash,
                    index: input.prev_index,
                    start: origin_height,
                    end: block.index(),
                    value: spent_output.value,
                });
                self.adjust_votes(dao, &account.votes, -spent_output.value)?;
            }
            dao.put_account(&account);
        }
        Ok(())
    }

    fn credit_outputs(&self, dao: &mut Dao, tx: &Transaction) -> Result<(), BlockchainError> {
        for (index, output) in tx.outputs.iter().enumerate() {
            let mut account = dao.get_account_or_new(&output.script_hash)?;
            account.add_unspent(output.asset_id, tx.hash(), index as u16, output.value);
            if output.asset_id == self.governing_token {
                self.adjust_votes(dao, &account.votes, output.value)?;
            }
            dao.put_account(&account);
        }
        Ok(())
    }

    /// Moves `delta` of voting weight on every candidate in `votes`.
    fn adjust_votes(
        &self,
        dao: &mut Dao,
        votes: &[PublicKey],
        delta: Fixed8,
    ) -> Result<(), BlockchainError> {
        for key in votes {
            let mut validator = dao.get_validator_or_new(key)?;
            validator.votes += delta;
            dao.put_validator(&validator);
        }
        Ok(())
    }

    fn process_register(
        &self,
        dao: &mut Dao,
        block: &Block,
        tx: &Transaction,
    ) -> Result<(), BlockchainError> {
        let TxData::Register {
            asset_type,
            name,
            amount,
            precision,
            owner,
            admin,
        } = &tx.data
        else {
            unreachable!("caller matched Register");
        };
        dao.put_asset(&AssetState {
            id: tx.hash(),
            asset_type: *asset_type,
            name: name.clone(),
            amount: *amount,
            available: Fixed8::ZERO,
            precision: *precision,
            owner: *owner,
            admin: *admin,
            expiration: block.index() + self.config.registered_asset_lifetime,
            is_frozen: false,
        });
        Ok(())
    }

    fn process_issue(
        &self,
        dao: &mut Dao,
        tx: &Transaction,
        resolved: &[ResolvedInput],
    ) -> Result<(), BlockchainError> {
        for (asset_id, result) in self.transaction_results(resolved, tx) {
            if result.is_negative() {
                let mut asset = dao.get_asset(&asset_id)?.ok_or_else(|| {
                    BlockchainError::State(format!("issue of unknown asset {asset_id}"))
                })?;
                asset.available += -result;
                if asset.available > asset.amount {
                    return Err(BlockchainError::State(format!(
                        "asset {asset_id} issued beyond its cap"
                    )));
                }
                dao.put_asset(&asset);
            }
        }
        Ok(())
    }

    /// Marks claimed coins and removes the matching unclaimed entries.
    ///
    /// A reference that is missing, unspent or already claimed fails the
    /// block in strict-verification mode; otherwise it is logged and the
    /// remaining references are skipped, preserving replay of historical
    /// chains.
    fn process_claim(
        &self,
        dao: &mut Dao,
        tx: &Transaction,
        claims: &[CoinReference],
    ) -> Result<(), BlockchainError> {
        for claim in claims {
            let failure = match dao.get_unspent_coins(&claim.prev_hash)? {
                None => Some("unknown transaction"),
                Some(coins) => match coins.items.get(claim.prev_index as usize) {
                    None => Some("bad claim index"),
                    Some(record) if !record.is_spent() => Some("claim of an unspent coin"),
                    Some(record) if record.is_claimed() => Some("double claim"),
                    Some(_) => None,
                },
            };

            if let Some(reason) = failure {
                if self.config.verify_transactions {
                    return Err(BlockchainError::State(format!(
                        "{reason}: {}/{}",
                        claim.prev_hash, claim.prev_index
                    )));
                }
                warn!(
                    "false or double claim: reason={reason} ref={}/{} tx={}",
                    claim.prev_hash,
                    claim.prev_index,
                    tx.hash()
                );
                break;
            }

            let Some(mut coins) = dao.get_unspent_coins(&claim.prev_hash)? else {
                continue;
            };
            let record = &mut coins.items[claim.prev_index as usize];
            record.state |= coin_state::CLAIMED;
            let owner = record.output.script_hash;
            dao.put_unspent_coins(&claim.prev_hash, &coins);

            let mut account = dao.get_account_or_new(&owner)?;
            if !account.remove_unclaimed(&claim.prev_hash, claim.prev_index) {
                warn!(
                    "no unclaimed entry on the account: tx={} ref={}/{} account={}",
                    tx.hash(),
                    claim.prev_hash,
                    claim.prev_index,
                    owner
                );
            }
            dao.put_account(&account);
        }
        Ok(())
    }

    fn process_state_descriptor(
        &self,
        dao: &mut Dao,
        descriptor: &crate::core::transaction::StateDescriptor,
    ) -> Result<(), BlockchainError> {
        match descriptor.kind {
            StateKind::Account => {
                let hash = Hash160::from_slice(&descriptor.key)
                    .ok_or_else(|| BlockchainError::State("bad account key".into()))?;
                let new_votes = Vec::<PublicKey>::from_bytes(&descriptor.value)?;

                let mut account = dao.get_account_or_new(&hash)?;
                let weight = account.balance_of(&self.governing_token);
                self.adjust_votes(dao, &account.votes.clone(), -weight)?;
                self.adjust_votes(dao, &new_votes, weight)?;
                account.votes = new_votes;
                dao.put_account(&account);
            }
            StateKind::Validator => {
                let key = PublicKey::from_sec1_bytes(&descriptor.key)
                    .ok_or_else(|| BlockchainError::State("bad validator key".into()))?;
                let registered = descriptor.value.first().copied().unwrap_or(0) != 0;
                let mut validator = dao.get_validator_or_new(&key)?;
                validator.registered = registered;
                dao.put_validator(&validator);
            }
        }
        Ok(())
    }

    /// Runs an invocation script against a nested DAO layer.
    ///
    /// On HALT the layer is merged and the notifications scanned for the
    /// canonical `(op, from, to, amount)` transfer shape; on FAULT the layer
    /// is discarded. Either way the AppExecResult is recorded.
    fn process_invocation(
        &self,
        dao: &Rc<RefCell<Dao>>,
        block: &Block,
        tx: &Transaction,
        resolved: &[ResolvedInput],
        script: &[u8],
        gas: Fixed8,
    ) -> Result<(), BlockchainError> {
        let verification_hashes = self.script_hashes_for_verifying(&dao.borrow(), tx, resolved)?;

        dao.borrow_mut().begin_tx();
        let ctx = Rc::new(InteropContext {
            trigger: Trigger::Application,
            dao: dao.clone(),
            height: block.index(),
            timestamp: block.header.timestamp,
            tx_hash: Some(tx.hash()),
            verification_hashes,
            notifications: RefCell::new(Vec::new()),
            logs: RefCell::new(Vec::new()),
        });

        let mut vm = Vm::new();
        vm.register_interop_getter(ctx.interop_getter());
        vm.set_script_getter(ctx.script_getter());
        vm.set_price_getter(Rc::new(default_price));
        let gas_limit = (self.config.free_gas_limit + gas).raw().max(0) as u64;
        vm.set_gas_limit(gas_limit);
        vm.set_checked_hash(tx.digest());
        vm.load(script.to_vec())
            .map_err(|err| BlockchainError::Verify(err.to_string()))?;

        let state = vm.run();
        let notifications: Vec<Notification> = ctx.notifications.borrow().clone();

        if state == VmState::Halt {
            dao.borrow_mut().commit_tx();
            self.track_transfers(&mut dao.borrow_mut(), block, tx, &notifications)?;
        } else {
            dao.borrow_mut().discard_tx();
            warn!(
                "contract invocation failed: tx={} block={} reason={}",
                tx.hash(),
                block.index(),
                vm.fault_reason()
                    .map(|err| err.to_string())
                    .unwrap_or_else(|| "unknown".into())
            );
        }

        let limits = *vm.limits();
        let serialize_lossy = |item: &StackItem| {
            serialize_item(item, &limits).unwrap_or_else(|_| vec![ItemType::Null as u8])
        };
        let result = AppExecResult {
            tx_hash: tx.hash(),
            trigger: Trigger::Application,
            vm_state: state,
            gas_consumed: Fixed8::from_raw(vm.gas_consumed().min(i64::MAX as u64) as i64),
            stack: vm.estack().iter().map(serialize_lossy).collect(),
            notifications: notifications
                .iter()
                .map(|event| NotifyEvent {
                    script_hash: event.script_hash,
                    state: serialize_lossy(&event.item),
                })
                .collect(),
        };
        dao.borrow_mut().put_app_exec_result(&result);
        Ok(())
    }

    /// Updates token balance indexes from `transfer` notifications.
    fn track_transfers(
        &self,
        dao: &mut Dao,
        block: &Block,
        tx: &Transaction,
        notifications: &[Notification],
    ) -> Result<(), BlockchainError> {
        for event in notifications {
            let StackItem::Array(items) = &event.item else {
                continue;
            };
            let items = items.borrow();
            if items.len() != 4 {
                continue;
            }
            let Ok(op) = items[0].to_byte_array("transfer") else {
                continue;
            };
            if op != b"transfer" {
                continue;
            }
            let from = items[1]
                .to_byte_array("transfer")
                .ok()
                .and_then(|bytes| Hash160::from_slice(&bytes));
            let to = items[2]
                .to_byte_array("transfer")
                .ok()
                .and_then(|bytes| Hash160::from_slice(&bytes));
            let Some(amount) = items[3]
                .to_int("transfer")
                .ok()
                .and_then(|amount| amount.to_i64())
            else {
                continue;
            };

            let transfer = crate::core::state::Nep5Transfer {
                asset: event.script_hash,
                from: from.unwrap_or_default(),
                to: to.unwrap_or_default(),
                amount,
                block: block.index(),
                tx: tx.hash(),
            };
            if let Some(from) = from {
                let mut state = dao.get_nep5_state(&from)?;
                state.apply(event.script_hash, -amount);
                state.transfers.push(transfer);
                dao.put_nep5_state(&from, &state);
            }
            if let Some(to) = to {
                let mut state = dao.get_nep5_state(&to)?;
                state.apply(event.script_hash, amount);
                state.transfers.push(transfer);
                dao.put_nep5_state(&to, &state);
            }
        }
        Ok(())
    }

    // ===================== claim arithmetic =====================

    /// System fees accumulated over block heights `[start, end)`.
    fn sys_fee_range(&self, dao: &Dao, start: u32, end: u32) -> Result<Fixed8, BlockchainError> {
        if end == 0 || end <= start {
            return Ok(Fixed8::ZERO);
        }
        let upper = dao.get_sys_fee(end - 1)?;
        let lower = if start == 0 {
            Fixed8::ZERO
        } else {
            dao.get_sys_fee(start - 1)?
        };
        Ok(upper - lower)
    }

    fn claim_value(
        &self,
        dao: &Dao,
        start: u32,
        end: u32,
        value: Fixed8,
    ) -> Result<Fixed8, BlockchainError> {
        let generated = self.config.gas.units_generated(start, end);
        let per_coin =
            Fixed8::from_int(generated as i64) + self.sys_fee_range(dao, start, end)?;
        Ok(self.config.gas.bonus(value, per_coin))
    }

    /// Entitlement of one spent, unclaimed governing coin.
    fn claimable_for(
        &self,
        dao: &Dao,
        claim: &CoinReference,
    ) -> Result<Fixed8, BlockchainError> {
        let coins = dao.get_unspent_coins(&claim.prev_hash)?.ok_or_else(|| {
            BlockchainError::State(format!("unknown claim {}", claim.prev_hash))
        })?;
        let record = coins
            .items
            .get(claim.prev_index as usize)
            .ok_or_else(|| BlockchainError::State("bad claim index".into()))?;
        if !record.is_spent() {
            return Err(BlockchainError::State("claim of an unspent coin".into()));
        }
        if record.is_claimed() {
            return Err(BlockchainError::State("double claim".into()));
        }
        if record.output.asset_id != self.governing_token {
            return Err(BlockchainError::State(
                "claim of a non-governing coin".into(),
            ));
        }
        self.claim_value(dao, coins.height, record.spend_height, record.output.value)
    }

    /// Claimable and still-unavailable utility tokens of an address.
    pub fn get_unclaimed(
        &self,
        script_hash: &Hash160,
    ) -> Result<UnclaimedSummary, BlockchainError> {
        let dao = self.snapshot();
        let Some(account) = dao.get_account(script_hash)? else {
            return Ok(UnclaimedSummary::default());
        };

        let mut summary = UnclaimedSummary::default();
        for entry in &account.unclaimed {
            summary.claimable += self.claim_value(&dao, entry.start, entry.end, entry.value)?;
        }

        let height = self.current_height();
        if let Some(entries) = account.balances.get(&self.governing_token) {
            for entry in entries {
                let origin = dao
                    .get_unspent_coins(&entry.tx)?
                    .map(|coins| coins.height)
                    .unwrap_or(height);
                summary.unavailable += self.claim_value(&dao, origin, height, entry.value)?;
            }
        }
        Ok(summary)
    }
}
