//! Blocks and headers.
//!
//! A header commits to its transaction set through the merkle root and to
//! the consensus quorum through `next_consensus` (the script hash of the
//! multi-signature contract that must witness the *next* block). Like
//! transactions, headers hash in two passes: the witness-exclusive digest is
//! what validators sign, the full hash is the block identity.

use crate::core::transaction::{Transaction, Witness};
use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use crate::types::hash::{Hash160, Hash256, HashBuilder, LazyHash};
use crate::types::merkle_tree::MerkleTree;
use ledger_derive::BinaryCodec;

/// Block header: metadata and cryptographic commitments.
#[derive(Clone, Debug, PartialEq)]
pub struct Header {
    /// Protocol version for future upgrades.
    pub version: u32,
    /// Hash of the parent block, forming the chain.
    pub prev_hash: Hash256,
    /// Merkle root over the transaction hashes.
    pub merkle_root: Hash256,
    /// Unix timestamp in seconds; strictly increases along the chain.
    pub timestamp: u64,
    /// Height of this block (genesis = 0).
    pub index: u32,
    /// Entropy contributed by the consensus primary.
    pub nonce: u64,
    /// Script hash of the quorum contract expected to witness the next block.
    pub next_consensus: Hash160,
    /// Quorum witness for this block.
    pub witness: Witness,

    cached_hash: LazyHash,
    cached_digest: LazyHash,
}

impl Header {
    /// Writes every field except the witness: the portion validators sign.
    pub fn encode_unsigned<S: EncodeSink>(&self, out: &mut S) {
        self.version.encode(out);
        self.prev_hash.encode(out);
        self.merkle_root.encode(out);
        self.timestamp.encode(out);
        self.index.encode(out);
        self.nonce.encode(out);
        self.next_consensus.encode(out);
    }

    /// The digest consensus signatures cover.
    pub fn digest(&self) -> Hash256 {
        self.cached_digest.get_or_compute(|| {
            let mut builder = HashBuilder::new();
            self.encode_unsigned(&mut builder);
            builder.finalize_double()
        })
    }

    /// The block identity: double SHA-256 of the full header encoding.
    pub fn hash(&self) -> Hash256 {
        self.cached_hash.get_or_compute(|| {
            let mut builder = HashBuilder::new();
            self.encode(&mut builder);
            builder.finalize_double()
        })
    }
}

impl Encode for Header {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.encode_unsigned(out);
        self.witness.encode(out);
    }
}

impl Decode for Header {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Header {
            version: u32::decode(input)?,
            prev_hash: Hash256::decode(input)?,
            merkle_root: Hash256::decode(input)?,
            timestamp: u64::decode(input)?,
            index: u32::decode(input)?,
            nonce: u64::decode(input)?,
            next_consensus: Hash160::decode(input)?,
            witness: Witness::decode(input)?,
            cached_hash: LazyHash::new(),
            cached_digest: LazyHash::new(),
        })
    }
}

/// A block: header plus ordered transactions. Immutable once persisted.
#[derive(Clone, Debug, PartialEq, BinaryCodec)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Builds an unsigned header over `transactions` and wraps them.
    ///
    /// The merkle root is computed here; the witness starts empty and is
    /// attached by consensus once the quorum signs.
    pub fn new(
        version: u32,
        prev_hash: Hash256,
        timestamp: u64,
        index: u32,
        nonce: u64,
        next_consensus: Hash160,
        transactions: Vec<Transaction>,
    ) -> Block {
        let merkle_root = Self::merkle_root_of(&transactions);
        Block {
            header: Header {
                version,
                prev_hash,
                merkle_root,
                timestamp,
                index,
                nonce,
                next_consensus,
                witness: Witness::default(),
                cached_hash: LazyHash::new(),
                cached_digest: LazyHash::new(),
            },
            transactions,
        }
    }

    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn index(&self) -> u32 {
        self.header.index
    }

    /// Merkle root over the transaction identity hashes.
    pub fn merkle_root_of(transactions: &[Transaction]) -> Hash256 {
        MerkleTree::compute_root(transactions.iter().map(|tx| tx.hash()).collect())
    }

    /// True if the declared merkle root matches the transaction set.
    pub fn merkle_root_valid(&self) -> bool {
        Self::merkle_root_of(&self.transactions) == self.header.merkle_root
    }
}
