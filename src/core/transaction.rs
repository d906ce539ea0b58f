//! Transactions: type-tagged records moving value and driving state change.
//!
//! A transaction carries UTXO inputs and outputs, attributes, witnesses and
//! a type-specific payload. Hashing is two-pass: the witness-exclusive
//! digest is what signers commit to; the hash over the full encoding is the
//! transaction's identity.

use crate::crypto::key_pair::{PrivateKey, PublicKey};
use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink, write_var_bytes};
use crate::types::encoding::read_var_bytes;
use crate::types::fixed8::Fixed8;
use crate::types::hash::{Hash160, Hash256, HashBuilder, LazyHash, hash160};
use crate::vm::emit;
use ledger_derive::BinaryCodec;

/// Transaction type tag, the first byte of the wire encoding.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum TxType {
    Issue = 0x01,
    Claim = 0x02,
    Enrollment = 0x20,
    Register = 0x40,
    Contract = 0x80,
    State = 0x90,
    Publish = 0xd0,
    Invocation = 0xd1,
}

/// A reference to the output `prev_index` of transaction `prev_hash`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, BinaryCodec)]
pub struct CoinReference {
    pub prev_hash: Hash256,
    pub prev_index: u16,
}

/// A transaction output: `value` of asset `asset_id` owned by `script_hash`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, BinaryCodec)]
pub struct TxOutput {
    pub asset_id: Hash256,
    pub value: Fixed8,
    pub script_hash: Hash160,
}

/// A witness: executing `verification` with `invocation` pre-executed must
/// leave a single truthy value.
#[derive(Clone, Debug, Default, Eq, PartialEq, BinaryCodec)]
pub struct Witness {
    pub invocation: Vec<u8>,
    pub verification: Vec<u8>,
}

impl Witness {
    /// The identity the witness answers for.
    pub fn script_hash(&self) -> Hash160 {
        hash160(&self.verification)
    }
}

/// Well-known attribute usages.
#[derive(Clone, Copy, Debug, Eq, PartialEq, BinaryCodec)]
pub enum AttributeUsage {
    ContractHash = 0x00,
    /// Adds an extra script hash to the verification set.
    Script = 0x20,
    Vote = 0x30,
    Remark = 0xf0,
}

/// A free-form transaction attribute.
#[derive(Clone, Debug, Eq, PartialEq, BinaryCodec)]
pub struct TxAttribute {
    pub usage: AttributeUsage,
    pub data: Vec<u8>,
}

/// Registrable asset categories.
#[derive(Clone, Copy, Debug, Eq, PartialEq, BinaryCodec)]
pub enum AssetType {
    GoverningToken = 0x00,
    UtilityToken = 0x01,
    Token = 0x60,
    Share = 0x90,
}

/// Parameter and return types of published contracts.
#[derive(Clone, Copy, Debug, Eq, PartialEq, BinaryCodec)]
pub enum ContractParamType {
    Signature = 0x00,
    Boolean = 0x01,
    Integer = 0x02,
    Hash160 = 0x03,
    Hash256 = 0x04,
    ByteArray = 0x05,
    PublicKey = 0x06,
    String = 0x07,
    Array = 0x10,
    InteropInterface = 0xf0,
    Void = 0xff,
}

/// Property flags of a published contract.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, BinaryCodec)]
pub struct ContractProperties(pub u8);

impl ContractProperties {
    pub const HAS_STORAGE: u8 = 1 << 0;
    pub const HAS_DYNAMIC_INVOKE: u8 = 1 << 1;
    pub const IS_PAYABLE: u8 = 1 << 2;

    pub fn has_storage(self) -> bool {
        self.0 & Self::HAS_STORAGE != 0
    }

    pub fn has_dynamic_invoke(self) -> bool {
        self.0 & Self::HAS_DYNAMIC_INVOKE != 0
    }

    pub fn is_payable(self) -> bool {
        self.0 & Self::IS_PAYABLE != 0
    }
}

/// Target of a State transaction descriptor.
#[derive(Clone, Copy, Debug, Eq, PartialEq, BinaryCodec)]
pub enum StateKind {
    /// `key` is an account script hash; `field` is `"Votes"`.
    Account = 0x40,
    /// `key` is a compressed public key; `field` is `"Registered"`.
    Validator = 0x48,
}

/// One governance update carried by a State transaction.
#[derive(Clone, Debug, Eq, PartialEq, BinaryCodec)]
pub struct StateDescriptor {
    pub kind: StateKind,
    pub key: Vec<u8>,
    pub field: String,
    pub value: Vec<u8>,
}

/// The type-specific payload of a transaction.
#[derive(Clone, Debug, PartialEq)]
pub enum TxData {
    /// Plain value transfer; no extra payload.
    Contract,
    /// Creates an asset whose id is this transaction's hash.
    Register {
        asset_type: AssetType,
        name: String,
        amount: Fixed8,
        precision: u8,
        owner: PublicKey,
        admin: Hash160,
    },
    /// Mints outputs of a registered asset against its available pool.
    Issue,
    /// Converts accrued claims on spent governing coins into utility tokens.
    Claim { claims: Vec<CoinReference> },
    /// Registers a validator candidate.
    Enrollment { public_key: PublicKey },
    /// Applies governance descriptors (votes, candidate registration).
    State { descriptors: Vec<StateDescriptor> },
    /// Publishes a contract.
    Publish {
        script: Vec<u8>,
        param_list: Vec<ContractParamType>,
        return_type: ContractParamType,
        properties: ContractProperties,
        name: String,
        code_version: String,
        author: String,
        email: String,
        description: String,
    },
    /// Runs a script against the world state.
    Invocation { script: Vec<u8>, gas: Fixed8 },
}

impl TxData {
    pub fn tx_type(&self) -> TxType {
        match self {
            TxData::Contract => TxType::Contract,
            TxData::Register { .. } => TxType::Register,
            TxData::Issue => TxType::Issue,
            TxData::Claim { .. } => TxType::Claim,
            TxData::Enrollment { .. } => TxType::Enrollment,
            TxData::State { .. } => TxType::State,
            TxData::Publish { .. } => TxType::Publish,
            TxData::Invocation { .. } => TxType::Invocation,
        }
    }

    fn encode_payload<S: EncodeSink>(&self, out: &mut S) {
        match self {
            TxData::Contract | TxData::Issue => {}
            TxData::Register {
                asset_type,
                name,
                amount,
                precision,
                owner,
                admin,
            } => {
                asset_type.encode(out);
                name.encode(out);
                amount.encode(out);
                precision.encode(out);
                owner.encode(out);
                admin.encode(out);
            }
            TxData::Claim { claims } => claims.encode(out),
            TxData::Enrollment { public_key } => public_key.encode(out),
            TxData::State { descriptors } => descriptors.encode(out),
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
                write_var_bytes(out, script);
                param_list.encode(out);
                return_type.encode(out);
                properties.encode(out);
                name.encode(out);
                code_version.encode(out);
                author.encode(out);
                email.encode(out);
                description.encode(out);
            }
            TxData::Invocation { script, gas } => {
                write_var_bytes(out, script);
                gas.encode(out);
            }
        }
    }

    fn decode_payload(tx_type: u8, input: &mut &[u8]) -> Result<TxData, DecodeError> {
        match tx_type {
            t if t == TxType::Contract as u8 => Ok(TxData::Contract),
            t if t == TxType::Issue as u8 => Ok(TxData::Issue),
            t if t == TxType::Register as u8 => Ok(TxData::Register {
                asset_type: AssetType::decode(input)?,
                name: String::decode(input)?,
                amount: Fixed8::decode(input)?,
                precision: u8::decode(input)?,
                owner: PublicKey::decode(input)?,
                admin: Hash160::decode(input)?,
            }),
            t if t == TxType::Claim as u8 => Ok(TxData::Claim {
                claims: Vec::<CoinReference>::decode(input)?,
            }),
            t if t == TxType::Enrollment as u8 => Ok(TxData::Enrollment {
                public_key: PublicKey::decode(input)?,
            }),
            t if t == TxType::State as u8 => Ok(TxData::State {
                descriptors: Vec::<StateDescriptor>::decode(input)?,
            }),
            t if t == TxType::Publish as u8 => Ok(TxData::Publish {
                script: read_var_bytes(input)?,
                param_list: Vec::<ContractParamType>::decode(input)?,
                return_type: ContractParamType::decode(input)?,
                properties: ContractProperties::decode(input)?,
                name: String::decode(input)?,
                code_version: String::decode(input)?,
                author: String::decode(input)?,
                email: String::decode(input)?,
                description: String::decode(input)?,
            }),
            t if t == TxType::Invocation as u8 => Ok(TxData::Invocation {
                script: read_var_bytes(input)?,
                gas: Fixed8::decode(input)?,
            }),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

/// A blockchain transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct Transaction {
    pub version: u8,
    pub data: TxData,
    pub attributes: Vec<TxAttribute>,
    pub inputs: Vec<CoinReference>,
    pub outputs: Vec<TxOutput>,
    pub witnesses: Vec<Witness>,

    /// Identity hash over the full encoding; lazily computed.
    cached_hash: LazyHash,
    /// Witness-exclusive signing digest; lazily computed.
    cached_digest: LazyHash,
}

impl Transaction {
    pub fn new(data: TxData) -> Transaction {
        Transaction {
            version: 0,
            data,
            attributes: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            witnesses: Vec::new(),
            cached_hash: LazyHash::new(),
            cached_digest: LazyHash::new(),
        }
    }

    pub fn tx_type(&self) -> TxType {
        self.data.tx_type()
    }

    /// Writes every field except the witnesses: the portion signers commit to.
    pub fn encode_unsigned<S: EncodeSink>(&self, out: &mut S) {
        (self.tx_type() as u8).encode(out);
        self.version.encode(out);
        self.data.encode_payload(out);
        self.attributes.encode(out);
        self.inputs.encode(out);
        self.outputs.encode(out);
    }

    /// The digest signatures cover: double SHA-256 of the witness-exclusive
    /// encoding.
    pub fn digest(&self) -> Hash256 {
        self.cached_digest.get_or_compute(|| {
            let mut builder = HashBuilder::new();
            self.encode_unsigned(&mut builder);
            builder.finalize_double()
        })
    }

    /// The transaction identity: double SHA-256 of the full encoding.
    pub fn hash(&self) -> Hash256 {
        self.cached_hash.get_or_compute(|| {
            let mut builder = HashBuilder::new();
            self.encode(&mut builder);
            builder.finalize_double()
        })
    }

    /// Encoded size in bytes, the unit of fee-per-byte priority.
    pub fn size(&self) -> usize {
        self.encoded_size()
    }

    /// Appends a standard single-signature witness for `key`.
    ///
    /// The invocation script pushes the signature over [`Self::digest`];
    /// the verification script is the key's signature contract. Witnesses
    /// must be appended in ascending order of their script hash.
    pub fn sign(&mut self, key: &PrivateKey) {
        let signature = key.sign(self.digest().as_slice());
        let mut invocation = Vec::with_capacity(66);
        emit::push_data(&mut invocation, signature.as_slice());
        self.witnesses.push(Witness {
            invocation,
            verification: emit::signature_contract(&key.public_key()),
        });
    }

    /// Total output value per asset is frequently needed; this sums one.
    pub fn output_sum(&self, asset_id: &Hash256) -> Fixed8 {
        self.outputs
            .iter()
            .filter(|output| output.asset_id == *asset_id)
            .map(|output| output.value)
            .sum()
    }
}

impl Encode for Transaction {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.encode_unsigned(out);
        self.witnesses.encode(out);
    }
}

impl Decode for Transaction {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let tx_type = u8::decode(input)?;
        let version = u8::decode(input)?;
        let data = TxData::decode_payload(tx_type, input)?;
        Ok(Transaction {
            version,
            data,
            attributes: Vec::<TxAttribute>::decode(input)?,
            inputs: Vec::<CoinReference>::decode(input)?,
            outputs: Vec::<TxOutput>::decode(input)?,
            witnesses: Vec::<Witness>::decode(input)?,
            cached_hash: LazyHash::new(),
            cached_digest: LazyHash::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> PrivateKey {
        PrivateKey::from_bytes(&[seed; 32]).unwrap()
    }

    fn sample_transfer() -> Transaction {
        let mut tx = Transaction::new(TxData::Contract);
        tx.inputs.push(CoinReference {
            prev_hash: Hash256([0xab; 32]),
            prev_index: 0,
        });
        tx.outputs.push(TxOutput {
            asset_id: Hash256([0x01; 32]),
            value: Fixed8::from_int(40),
            script_hash: Hash160([0x11; 20]),
        });
        tx.outputs.push(TxOutput {
            asset_id: Hash256([0x01; 32]),
            value: Fixed8::from_int(60),
            script_hash: Hash160([0x22; 20]),
        });
        tx
    }

    #[test]
    fn roundtrip_contract_transfer() {
        let mut tx = sample_transfer();
        tx.sign(&key(1));

        let bytes = tx.to_bytes();
        let decoded = Transaction::from_bytes(&bytes).expect("decode");
        assert_eq!(tx, decoded);
        assert_eq!(tx.hash(), decoded.hash());
        assert_eq!(tx.digest(), decoded.digest());
    }

    #[test]
    fn roundtrip_every_payload_kind() {
        let owner = key(2).public_key();
        let payloads = vec![
            TxData::Contract,
            TxData::Issue,
            TxData::Register {
                asset_type: AssetType::Token,
                name: "Gold".into(),
                amount: Fixed8::from_int(1_000_000),
                precision: 8,
                owner,
                admin: Hash160([9; 20]),
            },
            TxData::Claim {
                claims: vec![CoinReference {
                    prev_hash: Hash256([3; 32]),
                    prev_index: 7,
                }],
            },
            TxData::Enrollment { public_key: owner },
            TxData::State {
                descriptors: vec![StateDescriptor {
                    kind: StateKind::Account,
                    key: vec![1; 20],
                    field: "Votes".into(),
                    value: vec![0],
                }],
            },
            TxData::Publish {
                script: vec![0x51, 0x66],
                param_list: vec![ContractParamType::ByteArray],
                return_type: ContractParamType::Boolean,
                properties: ContractProperties(ContractProperties::HAS_STORAGE),
                name: "test".into(),
                code_version: "1.0".into(),
                author: "dev".into(),
                email: "dev@example.org".into(),
                description: "".into(),
            },
            TxData::Invocation {
                script: vec![0x52, 0x53, 0x93],
                gas: Fixed8::from_int(1),
            },
        ];

        for data in payloads {
            let tx = Transaction::new(data);
            let bytes = tx.to_bytes();
            let decoded = Transaction::from_bytes(&bytes).expect("decode");
            assert_eq!(tx, decoded, "payload {:?}", tx.tx_type());
        }
    }

    #[test]
    fn digest_excludes_witnesses() {
        let mut tx = sample_transfer();
        let digest_before = tx.digest();
        tx.sign(&key(1));
        assert_eq!(tx.digest(), digest_before);
    }

    #[test]
    fn hash_covers_witnesses() {
        let unsigned = sample_transfer();
        let mut signed = sample_transfer();
        signed.sign(&key(1));
        assert_ne!(unsigned.hash(), signed.hash());
    }

    #[test]
    fn signature_verifies_over_digest() {
        let signer = key(3);
        let mut tx = sample_transfer();
        tx.sign(&signer);

        let witness = &tx.witnesses[0];
        assert_eq!(
            witness.script_hash(),
            emit::signature_contract_hash(&signer.public_key())
        );
        // invocation is PUSHDATA1 64 <sig>
        assert_eq!(witness.invocation.len(), 66);
        let sig = crate::crypto::key_pair::Signature::from_slice(&witness.invocation[2..]).unwrap();
        assert!(signer.public_key().verify(tx.digest().as_slice(), &sig));
    }

    #[test]
    fn output_sum_filters_by_asset() {
        let mut tx = sample_transfer();
        tx.outputs.push(TxOutput {
            asset_id: Hash256([0x02; 32]),
            value: Fixed8::from_int(5),
            script_hash: Hash160([0x33; 20]),
        });
        assert_eq!(tx.output_sum(&Hash256([0x01; 32])), Fixed8::from_int(100));
        assert_eq!(tx.output_sum(&Hash256([0x02; 32])), Fixed8::from_int(5));
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let err = Transaction::from_bytes(&[0x7e, 0x00]);
        assert!(matches!(err, Err(DecodeError::InvalidValue)));
    }

    #[test]
    fn tx_type_byte_is_first_on_wire() {
        let tx = Transaction::new(TxData::Invocation {
            script: vec![0x51],
            gas: Fixed8::ZERO,
        });
        assert_eq!(tx.to_bytes()[0], TxType::Invocation as u8);
    }
}
