//! ECDSA key pairs on secp256r1.
//!
//! Signatures are deterministic (RFC 6979) 64-byte `r‖s` values over the
//! SHA-256 digest of the message. Public keys travel as 33-byte compressed
//! SEC1 points and sort by their compressed encoding, which fixes the
//! validator ordering used by consensus.

use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use rand_core::OsRng;
use std::cmp::Ordering;
use std::fmt;
use zeroize::Zeroizing;

/// Length of a compressed SEC1 public key in bytes.
pub const PUBLIC_KEY_LEN: usize = 33;

/// Length of an `r‖s` signature in bytes.
pub const SIGNATURE_LEN: usize = 64;

/// Private key for signing transactions, blocks and consensus payloads.
///
/// Generated from OS entropy. Never serialized or transmitted.
#[derive(Clone)]
pub struct PrivateKey {
    key: SigningKey,
}

impl PrivateKey {
    /// Generates a new random private key using OS-provided entropy.
    pub fn new() -> Self {
        Self {
            key: SigningKey::random(&mut OsRng),
        }
    }

    /// Creates a private key from raw scalar bytes.
    ///
    /// Returns `None` if the bytes are not a valid secp256r1 scalar.
    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        let bytes = Zeroizing::new(*bytes);
        SigningKey::from_slice(bytes.as_ref())
            .ok()
            .map(|key| Self { key })
    }

    /// Derives the corresponding public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            key: *self.key.verifying_key(),
        }
    }

    /// Signs arbitrary data, producing a deterministic ECDSA signature.
    pub fn sign(&self, data: &[u8]) -> Signature {
        let sig: EcdsaSignature = self.key.sign(data);
        let mut bytes = [0u8; SIGNATURE_LEN];
        bytes.copy_from_slice(&sig.to_bytes());
        Signature(bytes)
    }
}

impl Default for PrivateKey {
    fn default() -> Self {
        Self::new()
    }
}

/// Public key for signature verification and validator identity.
#[derive(Clone, Copy, Debug)]
pub struct PublicKey {
    key: VerifyingKey,
}

impl PublicKey {
    /// Parses a compressed or uncompressed SEC1 point.
    pub fn from_sec1_bytes(bytes: &[u8]) -> Option<Self> {
        VerifyingKey::from_sec1_bytes(bytes)
            .ok()
            .map(|key| Self { key })
    }

    /// Returns the 33-byte compressed SEC1 encoding.
    pub fn compressed(&self) -> [u8; PUBLIC_KEY_LEN] {
        let point = self.key.to_encoded_point(true);
        let mut bytes = [0u8; PUBLIC_KEY_LEN];
        bytes.copy_from_slice(point.as_bytes());
        bytes
    }

    /// Verifies a signature over `data`.
    ///
    /// Returns `true` if the signature is valid.
    pub fn verify(&self, data: &[u8], signature: &Signature) -> bool {
        let Ok(sig) = EcdsaSignature::from_slice(&signature.0) else {
            return false;
        };
        self.key.verify(data, &sig).is_ok()
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.compressed() == other.compressed()
    }
}

impl Eq for PublicKey {}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compressed().cmp(&other.compressed())
    }
}

impl std::hash::Hash for PublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.compressed().hash(state);
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.compressed() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Writes the compressed point, byte-for-byte.
impl Encode for PublicKey {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&self.compressed());
    }
}

impl Decode for PublicKey {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let bytes = <[u8; PUBLIC_KEY_LEN]>::decode(input)?;
        PublicKey::from_sec1_bytes(&bytes).ok_or(DecodeError::InvalidValue)
    }
}

/// A 64-byte `r‖s` ECDSA signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; SIGNATURE_LEN]);

impl Signature {
    pub const fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn from_slice(slice: &[u8]) -> Option<Signature> {
        if slice.len() != SIGNATURE_LEN {
            return None;
        }
        let mut bytes = [0u8; SIGNATURE_LEN];
        bytes.copy_from_slice(slice);
        Some(Signature(bytes))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(")?;
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "…)")
    }
}

impl Encode for Signature {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&self.0);
    }
}

impl Decode for Signature {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Signature(<[u8; SIGNATURE_LEN]>::decode(input)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::encoding::{Decode, Encode};

    fn fixed_key(seed: u8) -> PrivateKey {
        PrivateKey::from_bytes(&[seed; 32]).expect("valid scalar")
    }

    #[test]
    fn sign_and_verify() {
        let key = PrivateKey::new();
        let sig = key.sign(b"message");
        assert!(key.public_key().verify(b"message", &sig));
    }

    #[test]
    fn verify_fails_for_tampered_message() {
        let key = PrivateKey::new();
        let sig = key.sign(b"message");
        assert!(!key.public_key().verify(b"other message", &sig));
    }

    #[test]
    fn verify_fails_for_wrong_key() {
        let key1 = PrivateKey::new();
        let key2 = PrivateKey::new();
        let sig = key1.sign(b"message");
        assert!(!key2.public_key().verify(b"message", &sig));
    }

    #[test]
    fn signing_is_deterministic() {
        let key = fixed_key(1);
        assert_eq!(key.sign(b"data").0, key.sign(b"data").0);
    }

    #[test]
    fn from_bytes_rejects_zero_scalar() {
        assert!(PrivateKey::from_bytes(&[0u8; 32]).is_none());
    }

    #[test]
    fn public_key_codec_roundtrip() {
        let public = fixed_key(2).public_key();
        let bytes = public.to_bytes();
        assert_eq!(bytes.len(), PUBLIC_KEY_LEN);
        assert_eq!(PublicKey::from_bytes(&bytes).unwrap(), public);
    }

    #[test]
    fn public_key_decode_rejects_garbage() {
        let result = PublicKey::from_bytes(&[0x02; PUBLIC_KEY_LEN]);
        assert!(result.is_err());
    }

    #[test]
    fn ordering_is_total_and_stable() {
        let mut keys: Vec<PublicKey> = (1u8..=5).map(|i| fixed_key(i).public_key()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        sorted.sort();
        keys.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn signature_codec_roundtrip() {
        let sig = fixed_key(3).sign(b"payload");
        let decoded = Signature::from_bytes(&sig.to_bytes()).unwrap();
        assert_eq!(sig, decoded);
    }
}
