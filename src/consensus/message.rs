//! Consensus wire messages.
//!
//! Every message travels inside a [`ConsensusPayload`] envelope signed by
//! the sending validator; the signature covers the witness-exclusive
//! encoding (everything but the signature itself), bound to the network
//! magic and the sender's height, view and validator index.

use crate::crypto::key_pair::{PrivateKey, PublicKey, Signature};
use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use crate::types::hash::{Hash160, Hash256, HashBuilder};
use ledger_derive::BinaryCodec;

/// Why a replica asks to leave the current view.
#[derive(Clone, Copy, Debug, Eq, PartialEq, BinaryCodec)]
pub enum ChangeViewReason {
    Timeout = 0x00,
    InvalidPrepareRequest = 0x01,
    TransactionsMissing = 0x02,
    ProposalRejected = 0x03,
}

/// A ChangeView vote another replica sent, compacted for recovery.
///
/// Carries enough to rebuild and re-verify the original payload.
#[derive(Clone, Debug, PartialEq, BinaryCodec)]
pub struct ChangeViewCompact {
    pub validator_index: u16,
    pub original_view: u8,
    pub new_view: u8,
    pub timestamp: u64,
    pub reason: ChangeViewReason,
    pub signature: Signature,
}

/// The primary's proposal inside a recovery bundle.
#[derive(Clone, Debug, PartialEq, BinaryCodec)]
pub struct PrepareRequestCompact {
    pub timestamp: u64,
    pub nonce: u64,
    pub next_consensus: Hash160,
    pub tx_hashes: Vec<Hash256>,
    pub signature: Signature,
}

/// A PrepareResponse another replica sent, compacted for recovery.
#[derive(Clone, Debug, PartialEq, BinaryCodec)]
pub struct PreparationCompact {
    pub validator_index: u16,
    pub signature: Signature,
}

/// A Commit another replica sent, compacted for recovery.
#[derive(Clone, Debug, PartialEq, BinaryCodec)]
pub struct CommitCompact {
    pub validator_index: u16,
    pub view: u8,
    /// The validator's signature over the proposed block digest.
    pub block_signature: Signature,
    /// The payload signature authenticating the original Commit message.
    pub signature: Signature,
}

/// The dBFT message set.
#[derive(Clone, Debug, PartialEq, BinaryCodec)]
#[repr(u8)]
pub enum ConsensusMessage {
    /// Vote to advance to `new_view`.
    ChangeView {
        new_view: u8,
        timestamp: u64,
        reason: ChangeViewReason,
    } = 0x00,
    /// The primary's block proposal: transactions travel as hashes and are
    /// fetched separately.
    PrepareRequest {
        timestamp: u64,
        nonce: u64,
        next_consensus: Hash160,
        tx_hashes: Vec<Hash256>,
    } = 0x20,
    /// A backup's agreement, identified by the proposal payload hash.
    PrepareResponse { preparation_hash: Hash256 } = 0x21,
    /// The sender's signature over the proposed block digest.
    Commit { signature: Signature } = 0x30,
    /// Ask peers for their view of the current height.
    RecoveryRequest { timestamp: u64 } = 0x40,
    /// Everything a lagging replica needs to catch up within this height.
    RecoveryMessage {
        change_views: Vec<ChangeViewCompact>,
        prepare_request: Option<PrepareRequestCompact>,
        /// Set when the proposal itself is unknown but responses reference it.
        preparation_hash: Option<Hash256>,
        preparations: Vec<PreparationCompact>,
        commits: Vec<CommitCompact>,
    } = 0x41,
}

impl ConsensusMessage {
    /// Short tag for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ConsensusMessage::ChangeView { .. } => "ChangeView",
            ConsensusMessage::PrepareRequest { .. } => "PrepareRequest",
            ConsensusMessage::PrepareResponse { .. } => "PrepareResponse",
            ConsensusMessage::Commit { .. } => "Commit",
            ConsensusMessage::RecoveryRequest { .. } => "RecoveryRequest",
            ConsensusMessage::RecoveryMessage { .. } => "RecoveryMessage",
        }
    }
}

/// Signed envelope carrying one consensus message.
#[derive(Clone, Debug, PartialEq)]
pub struct ConsensusPayload {
    pub magic: u32,
    pub validator_index: u16,
    pub height: u32,
    pub view: u8,
    pub message: ConsensusMessage,
    pub signature: Signature,
}

impl ConsensusPayload {
    /// Builds and signs a payload for the given replica coordinates.
    pub fn sign(
        magic: u32,
        validator_index: u16,
        height: u32,
        view: u8,
        message: ConsensusMessage,
        key: &PrivateKey,
    ) -> ConsensusPayload {
        let mut payload = ConsensusPayload {
            magic,
            validator_index,
            height,
            view,
            message,
            signature: Signature([0; 64]),
        };
        payload.signature = key.sign(payload.digest().as_slice());
        payload
    }

    pub fn encode_unsigned<S: EncodeSink>(&self, out: &mut S) {
        self.magic.encode(out);
        self.validator_index.encode(out);
        self.height.encode(out);
        self.view.encode(out);
        self.message.encode(out);
    }

    /// The digest the sender signs; also identifies the payload
    /// (PrepareResponse references the proposal by this hash).
    pub fn digest(&self) -> Hash256 {
        let mut builder = HashBuilder::new();
        self.encode_unsigned(&mut builder);
        builder.finalize_double()
    }

    /// Checks the envelope signature against the claimed validator key.
    pub fn verify(&self, key: &PublicKey) -> bool {
        key.verify(self.digest().as_slice(), &self.signature)
    }
}

impl Encode for ConsensusPayload {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.encode_unsigned(out);
        self.signature.encode(out);
    }
}

impl Decode for ConsensusPayload {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(ConsensusPayload {
            magic: u32::decode(input)?,
            validator_index: u16::decode(input)?,
            height: u32::decode(input)?,
            view: u8::decode(input)?,
            message: ConsensusMessage::decode(input)?,
            signature: Signature::decode(input)?,
        })
    }
}
