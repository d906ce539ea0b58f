//! Protocol configuration and genesis derivation.
//!
//! Chain-level constants used by the blockchain engine, mempool and
//! consensus. The governing and utility token identities are not variables:
//! they are the hashes of the two Register transactions built
//! deterministically into the genesis block from this configuration.

use crate::core::block::Block;
use crate::core::gas::GasSchedule;
use crate::core::transaction::{
    AssetType, Transaction, TxData, TxOutput, TxType, Witness,
};
use crate::crypto::key_pair::{PrivateKey, PublicKey};
use crate::types::fixed8::Fixed8;
use crate::types::hash::{Hash160, hash160};
use crate::vm::emit;
use crate::vm::opcode::OpCode;

/// Protocol fees charged per transaction type, paid in the utility token.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemFees {
    pub register: Fixed8,
    pub publish: Fixed8,
    pub enrollment: Fixed8,
}

impl SystemFees {
    pub fn fee_for(&self, tx_type: TxType) -> Fixed8 {
        match tx_type {
            TxType::Register => self.register,
            TxType::Publish => self.publish,
            TxType::Enrollment => self.enrollment,
            _ => Fixed8::ZERO,
        }
    }
}

/// Chain-wide protocol parameters, chosen at startup and immutable after.
#[derive(Clone, Debug)]
pub struct ProtocolConfig {
    /// Network magic for signature domain separation across chains.
    pub magic: u32,
    /// The bootstrap validator set, sorted by public key.
    pub standby_validators: Vec<PublicKey>,
    /// Target block interval in seconds; also the base consensus timeout.
    pub seconds_per_block: u64,
    /// Maximum accepted clock drift of block timestamps, in seconds.
    pub max_time_drift: u64,
    /// Gas every invocation gets for free before `tx.gas` is consulted.
    pub free_gas_limit: Fixed8,
    /// Strict verification: fail blocks on false or double claims instead of
    /// logging and skipping.
    pub verify_transactions: bool,
    /// Blocks a registered asset stays valid before its expiration.
    pub registered_asset_lifetime: u32,
    /// Mempool capacity; lowest-priority transactions are evicted beyond it.
    pub max_mempool_capacity: usize,
    /// Transaction count cap per block.
    pub max_tx_per_block: usize,
    /// Byte size cap per block.
    pub max_block_size: usize,
    /// Utility token issuance schedule.
    pub gas: GasSchedule,
    /// Per-type protocol fees.
    pub system_fees: SystemFees,
}

impl ProtocolConfig {
    pub fn validator_count(&self) -> usize {
        self.standby_validators.len()
    }

    /// Byzantine fault tolerance: `F = (N - 1) / 3`.
    pub fn max_faulty(&self) -> usize {
        (self.validator_count() - 1) / 3
    }

    /// Quorum size: `M = N - F`.
    pub fn quorum(&self) -> usize {
        self.validator_count() - self.max_faulty()
    }

    /// Script hash of the current quorum's multi-signature contract.
    pub fn consensus_address(&self) -> Hash160 {
        emit::multisig_contract_hash(self.quorum(), &self.standby_validators)
            .expect("standby validator set is never empty")
    }

    /// Deterministic development configuration with `n` validators.
    ///
    /// Returns the configuration plus the validators' private keys, derived
    /// from fixed seeds. Development only: the seeds are public.
    pub fn dev(n: usize) -> (ProtocolConfig, Vec<PrivateKey>) {
        let keys: Vec<PrivateKey> = (1..=n)
            .map(|i| PrivateKey::from_bytes(&[i as u8; 32]).expect("valid dev seed"))
            .collect();
        let mut standby_validators: Vec<PublicKey> =
            keys.iter().map(|key| key.public_key()).collect();
        standby_validators.sort();

        let config = ProtocolConfig {
            magic: 0x4c454447,
            standby_validators,
            seconds_per_block: 15,
            max_time_drift: 15,
            free_gas_limit: Fixed8::from_int(10),
            verify_transactions: false,
            registered_asset_lifetime: 2_000_000,
            max_mempool_capacity: 50_000,
            max_tx_per_block: 500,
            max_block_size: 1 << 20,
            gas: GasSchedule::default(),
            system_fees: SystemFees::default(),
        };
        (config, keys)
    }
}

/// The genesis block plus the token identities minted inside it.
pub struct Genesis {
    pub block: Block,
    pub governing_token: crate::types::hash::Hash256,
    pub utility_token: crate::types::hash::Hash256,
}

/// Total governing token supply, fully issued in genesis.
pub const GOVERNING_SUPPLY: i64 = 100_000_000;

/// Total utility token supply, released over the issuance schedule.
pub const UTILITY_SUPPLY: i64 = 100_000_000;

/// Fixed genesis timestamp (chosen once per network).
pub const GENESIS_TIMESTAMP: u64 = 1_600_000_000;

/// Builds the deterministic genesis block for a configuration.
///
/// Genesis registers the governing and utility tokens (their asset ids are
/// the register transactions' hashes) and issues the full governing supply
/// to the standby quorum's multi-signature address. The block carries a
/// trivially-true witness; height 0 is exempt from witness verification.
pub fn build_genesis(config: &ProtocolConfig) -> Genesis {
    let owner = config.standby_validators[0];
    let admin = hash160(&[OpCode::Push1 as u8]);

    let governing = Transaction::new(TxData::Register {
        asset_type: AssetType::GoverningToken,
        name: "Share".into(),
        amount: Fixed8::from_int(GOVERNING_SUPPLY),
        precision: 0,
        owner,
        admin,
    });
    let utility = Transaction::new(TxData::Register {
        asset_type: AssetType::UtilityToken,
        name: "Coin".into(),
        amount: Fixed8::from_int(UTILITY_SUPPLY),
        precision: 8,
        owner,
        admin,
    });

    let consensus_address = config.consensus_address();
    let mut issue = Transaction::new(TxData::Issue);
    issue.outputs.push(TxOutput {
        asset_id: governing.hash(),
        value: Fixed8::from_int(GOVERNING_SUPPLY),
        script_hash: consensus_address,
    });
    issue.witnesses.push(Witness {
        invocation: Vec::new(),
        verification: vec![OpCode::Push1 as u8],
    });

    let governing_token = governing.hash();
    let utility_token = utility.hash();

    let mut block = Block::new(
        0,
        crate::types::hash::Hash256::zero(),
        GENESIS_TIMESTAMP,
        0,
        0x4c45444745520001,
        consensus_address,
        vec![governing, utility, issue],
    );
    block.header.witness = Witness {
        invocation: Vec::new(),
        verification: vec![OpCode::Push1 as u8],
    };

    Genesis {
        block,
        governing_token,
        utility_token,
    }
}
