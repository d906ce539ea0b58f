//! Validator candidate state.

use crate::crypto::key_pair::PublicKey;
use crate::types::fixed8::Fixed8;
use ledger_derive::BinaryCodec;

/// A validator candidate: registration flag plus accumulated vote weight.
///
/// Vote weight moves with the governing-token balances of the accounts
/// voting for the candidate.
#[derive(Clone, Debug, PartialEq, BinaryCodec)]
pub struct ValidatorState {
    pub public_key: PublicKey,
    pub registered: bool,
    pub votes: Fixed8,
}

impl ValidatorState {
    pub fn new(public_key: PublicKey) -> ValidatorState {
        ValidatorState {
            public_key,
            registered: false,
            votes: Fixed8::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key_pair::PrivateKey;
    use crate::types::encoding::{Decode, Encode};

    #[test]
    fn codec_roundtrip() {
        let mut validator =
            ValidatorState::new(PrivateKey::from_bytes(&[4; 32]).unwrap().public_key());
        validator.registered = true;
        validator.votes = Fixed8::from_int(1234);

        let decoded = ValidatorState::from_bytes(&validator.to_bytes()).expect("decode");
        assert_eq!(validator, decoded);
    }
}
