//! Fixed-size protocol hashes and incremental hashing.
//!
//! - [`Hash256`]: 32-byte hash identifying blocks, transactions and assets.
//!   Computed as double SHA-256 of the wire encoding.
//! - [`Hash160`]: 20-byte script hash identifying accounts and contracts.
//!   Computed as RIPEMD-160 of SHA-256 of the script.

use crate::types::encoding::EncodeSink;
use ledger_derive::BinaryCodec;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::OnceLock;

/// Length of a [`Hash256`] in bytes.
pub const HASH256_LEN: usize = 32;

/// Length of a [`Hash160`] in bytes.
pub const HASH160_LEN: usize = 20;

/// 32-byte hash used as the identity of blocks, transactions and assets.
///
/// This type is `Copy` - hashes are passed around constantly during block
/// validation and should live on the stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec, Default, Hash, Ord, PartialOrd)]
pub struct Hash256(pub [u8; HASH256_LEN]);

impl Hash256 {
    /// Creates a zero-valued hash (all bytes 0x00).
    ///
    /// Used as the previous-block reference of the genesis block.
    pub const fn zero() -> Hash256 {
        Hash256([0u8; HASH256_LEN])
    }

    /// Returns the hash as a byte slice.
    pub const fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Returns the hash as a byte Vec.
    pub fn to_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Creates a hash from a byte slice.
    ///
    /// Returns `None` if the slice length is not exactly [`HASH256_LEN`] bytes.
    pub fn from_slice(slice: &[u8]) -> Option<Hash256> {
        if slice.len() != HASH256_LEN {
            return None;
        }
        let mut bytes = [0u8; HASH256_LEN];
        bytes.copy_from_slice(slice);
        Some(Hash256(bytes))
    }

    /// Creates a new SHA-256 builder for incremental hashing.
    pub fn sha256() -> HashBuilder {
        HashBuilder::new()
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// 20-byte script hash identifying accounts, contracts and witnesses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec, Default, Hash, Ord, PartialOrd)]
pub struct Hash160(pub [u8; HASH160_LEN]);

impl Hash160 {
    /// Creates a zero-valued script hash.
    pub const fn zero() -> Hash160 {
        Hash160([0u8; HASH160_LEN])
    }

    /// Returns the hash as a byte slice.
    pub const fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Returns the hash as a byte Vec.
    pub fn to_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Creates a script hash from a byte slice.
    ///
    /// Returns `None` if the slice length is not exactly [`HASH160_LEN`] bytes.
    pub fn from_slice(slice: &[u8]) -> Option<Hash160> {
        if slice.len() != HASH160_LEN {
            return None;
        }
        let mut bytes = [0u8; HASH160_LEN];
        bytes.copy_from_slice(slice);
        Some(Hash160(bytes))
    }

    /// Returns true if every byte is zero.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH160_LEN]
    }
}

impl fmt::Display for Hash160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Incremental SHA-256 hash builder.
///
/// Allows feeding data in chunks and finalizing to a [`Hash256`], either as a
/// single round or as the protocol's double SHA-256. Implements
/// [`EncodeSink`] so encodable types can be hashed without intermediate
/// buffers.
pub struct HashBuilder {
    hasher: Sha256,
}

impl HashBuilder {
    /// Creates a new empty builder.
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    /// Feeds data into the hash computation.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn chain(mut self, data: &[u8]) -> Self {
        self.hasher.update(data);
        self
    }

    /// Consumes the builder and returns the single-round SHA-256 hash.
    pub fn finalize(self) -> Hash256 {
        Hash256(self.hasher.finalize().into())
    }

    /// Consumes the builder and returns SHA-256 of the SHA-256 digest.
    ///
    /// This is the hash used as the identity of wire structures.
    pub fn finalize_double(self) -> Hash256 {
        let first: [u8; 32] = self.hasher.finalize().into();
        Hash256(Sha256::digest(first).into())
    }
}

impl Default for HashBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodeSink for HashBuilder {
    fn write(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }
}

/// Double SHA-256 of `data`.
pub fn hash256(data: &[u8]) -> Hash256 {
    let first: [u8; 32] = Sha256::digest(data).into();
    Hash256(Sha256::digest(first).into())
}

/// RIPEMD-160 of SHA-256 of `data`. The protocol's script hash.
pub fn hash160(data: &[u8]) -> Hash160 {
    let sha: [u8; 32] = Sha256::digest(data).into();
    Hash160(Ripemd160::digest(sha).into())
}

/// Lazily computed hash, filled in on first access.
///
/// Wire structures are hashed often during validation; the hash is a pure
/// function of the encoded bytes, so it is computed once and cached. The
/// cache is invisible to equality, cloning and the wire codec.
#[derive(Debug, Default)]
pub struct LazyHash {
    cached: OnceLock<Hash256>,
}

impl LazyHash {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            cached: OnceLock::new(),
        }
    }

    /// Returns the cached hash, computing it via `f` on first call.
    pub fn get_or_compute(&self, f: impl FnOnce() -> Hash256) -> Hash256 {
        *self.cached.get_or_init(f)
    }
}

impl Clone for LazyHash {
    fn clone(&self) -> Self {
        let cached = OnceLock::new();
        if let Some(hash) = self.cached.get() {
            let _ = cached.set(*hash);
        }
        LazyHash { cached }
    }
}

// The cache never participates in comparisons: two structurally equal values
// hash identically whether or not either has been hashed yet.
impl PartialEq for LazyHash {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for LazyHash {}

impl crate::types::encoding::Encode for LazyHash {
    fn encode<S: EncodeSink>(&self, _out: &mut S) {}
}

impl crate::types::encoding::Decode for LazyHash {
    fn decode(_input: &mut &[u8]) -> Result<Self, crate::types::encoding::DecodeError> {
        Ok(LazyHash::new())
    }
}
