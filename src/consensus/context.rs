//! The dBFT replica state machine.
//!
//! Pure with respect to time and I/O: callers feed in signed payloads, the
//! local clock and a transaction lookup, and get back a list of [`Action`]s
//! to perform. One context instance tracks one `(height, view)` at a time;
//! advancing a view discards non-matching phase state, advancing a height
//! resets everything.
//!
//! Safety hinges on two rules encoded here: a replica only commits after
//! `M` matching preparations, and a commit is sticky - once sent at view
//! `v`, the replica never signs a different proposal at a later view.

use crate::config::ProtocolConfig;
pub use crate::consensus::message::{
    ChangeViewCompact, ChangeViewReason, CommitCompact, ConsensusMessage, ConsensusPayload,
    PrepareRequestCompact, PreparationCompact,
};
use crate::core::block::Block;
use crate::core::transaction::{Transaction, Witness};
use crate::crypto::key_pair::{PrivateKey, PublicKey, Signature};
use crate::types::hash::{Hash160, Hash256};
use crate::vm::emit;
use crate::warn;
use ledger_derive::Error;
use std::collections::HashMap;
use std::time::Duration;

/// Rejection reasons for incoming payloads.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("payload for another network (magic {0:#010x})")]
    WrongMagic(u32),
    #[error("payload for height {got}, replica is at {expected}")]
    WrongHeight { expected: u32, got: u32 },
    #[error("validator index {0} out of range")]
    UnknownValidator(u16),
    #[error("payload signature does not verify")]
    BadSignature,
    #[error("prepare request not sent by the view's primary")]
    NotFromPrimary,
    #[error("invalid proposal: {0}")]
    BadProposal(String),
    #[error("replica has no validator key")]
    NotAValidator,
    #[error("duplicate prepare request")]
    DuplicateProposal,
}

/// Side effects the caller must carry out.
#[derive(Clone, Debug)]
pub enum Action {
    /// Send this signed payload to the other validators.
    Broadcast(ConsensusPayload),
    /// A quorum of commits assembled this block; hand it to the blockchain.
    RelayBlock(Block),
    /// The proposal references transactions the replica does not have.
    RequestTransactions(Vec<Hash256>),
    /// The view advanced; restart the phase timer.
    ViewChanged { view: u8 },
}

/// What to do when the phase timer fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerAdvice {
    /// This replica is the primary and owes the proposal.
    ProposeBlock,
    /// Ask the quorum to move to the next view.
    RequestViewChange,
    /// Committed already: re-broadcast state instead of changing view.
    SendRecovery,
    /// Nothing to do (observer, or block already out).
    Idle,
}

/// The per-height replica state.
pub struct Context {
    config: ProtocolConfig,
    validators: Vec<PublicKey>,
    my_key: Option<PrivateKey>,
    my_index: Option<u16>,

    height: u32,
    prev_hash: Hash256,
    prev_timestamp: u64,
    view: u8,

    // proposal draft
    timestamp: u64,
    nonce: u64,
    next_consensus: Hash160,
    tx_hashes: Vec<Hash256>,
    transactions: HashMap<Hash256, Transaction>,

    prepare_request: Option<ConsensusPayload>,
    preparation_hash: Option<Hash256>,
    preparations: Vec<Option<Signature>>,
    commits: Vec<Option<CommitCompact>>,
    change_views: Vec<Option<ChangeViewCompact>>,

    request_sent: bool,
    response_sent: bool,
    commit_sent: bool,
    block_sent: bool,
}

impl Context {
    /// Creates a replica. `key` is `None` for observers, which track the
    /// protocol but never send.
    pub fn new(config: ProtocolConfig, key: Option<PrivateKey>) -> Context {
        let validators = config.standby_validators.clone();
        let my_index = key.as_ref().and_then(|key| {
            let public = key.public_key();
            validators
                .iter()
                .position(|validator| *validator == public)
                .map(|position| position as u16)
        });
        let n = validators.len();
        let next_consensus = config.consensus_address();

        Context {
            config,
            validators,
            my_key: key,
            my_index,
            height: 0,
            prev_hash: Hash256::zero(),
            prev_timestamp: 0,
            view: 0,
            timestamp: 0,
            nonce: 0,
            next_consensus,
            tx_hashes: Vec::new(),
            transactions: HashMap::new(),
            prepare_request: None,
            preparation_hash: None,
            preparations: vec![None; n],
            commits: vec![None; n],
            change_views: vec![None; n],
            request_sent: false,
            response_sent: false,
            commit_sent: false,
            block_sent: false,
        }
    }

    // ===================== coordinates =====================

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn view(&self) -> u8 {
        self.view
    }

    pub fn my_index(&self) -> Option<u16> {
        self.my_index
    }

    pub fn validator_count(&self) -> usize {
        self.validators.len()
    }

    /// Quorum size `M = N - F`.
    pub fn quorum(&self) -> usize {
        self.config.quorum()
    }

    /// The primary for `view` at this height: `(height - view) mod N`.
    pub fn primary_index(&self, view: u8) -> u16 {
        let n = self.validators.len() as i64;
        (((self.height as i64 - view as i64) % n + n) % n) as u16
    }

    pub fn is_primary(&self) -> bool {
        self.my_index == Some(self.primary_index(self.view))
    }

    pub fn commit_sent(&self) -> bool {
        self.commit_sent
    }

    pub fn block_sent(&self) -> bool {
        self.block_sent
    }

    /// Timer for the current view.
    ///
    /// The view-0 primary owes its proposal after one block interval;
    /// everyone else waits the doubled interval before raising a view
    /// change, doubling again per view.
    pub fn timeout(&self) -> Duration {
        if self.view == 0 && self.is_primary() && !self.request_sent {
            Duration::from_secs(self.config.seconds_per_block)
        } else {
            Duration::from_secs(self.config.seconds_per_block << (self.view + 1))
        }
    }

    /// Starts a fresh round on top of the given chain tip.
    pub fn reset(&mut self, height: u32, prev_hash: Hash256, prev_timestamp: u64) {
        let n = self.validators.len();
        self.height = height;
        self.prev_hash = prev_hash;
        self.prev_timestamp = prev_timestamp;
        self.view = 0;
        self.timestamp = 0;
        self.nonce = 0;
        self.tx_hashes.clear();
        self.transactions.clear();
        self.prepare_request = None;
        self.preparation_hash = None;
        self.preparations = vec![None; n];
        self.commits = vec![None; n];
        self.change_views = vec![None; n];
        self.request_sent = false;
        self.response_sent = false;
        self.commit_sent = false;
        self.block_sent = false;
    }

    // ===================== timer =====================

    pub fn on_timer(&self) -> TimerAdvice {
        if self.my_index.is_none() || self.block_sent {
            return TimerAdvice::Idle;
        }
        if self.commit_sent {
            return TimerAdvice::SendRecovery;
        }
        if self.is_primary() && !self.request_sent {
            return TimerAdvice::ProposeBlock;
        }
        TimerAdvice::RequestViewChange
    }

    // ===================== sending =====================

    fn sign_payload(&self, message: ConsensusMessage) -> Result<ConsensusPayload, ConsensusError> {
        let key = self.my_key.as_ref().ok_or(ConsensusError::NotAValidator)?;
        let index = self.my_index.ok_or(ConsensusError::NotAValidator)?;
        Ok(ConsensusPayload::sign(
            self.config.magic,
            index,
            self.height,
            self.view,
            message,
            key,
        ))
    }

    /// Primary duty: propose a block over the given candidate transactions.
    ///
    /// `timestamp` is clamped above the previous block's; `nonce` is the
    /// caller's fresh entropy.
    pub fn make_prepare_request(
        &mut self,
        transactions: Vec<Transaction>,
        timestamp: u64,
        nonce: u64,
    ) -> Result<Vec<Action>, ConsensusError> {
        if !self.is_primary() {
            return Err(ConsensusError::NotFromPrimary);
        }
        if self.request_sent {
            return Err(ConsensusError::DuplicateProposal);
        }

        self.timestamp = timestamp.max(self.prev_timestamp + 1);
        self.nonce = nonce;
        self.tx_hashes = transactions.iter().map(|tx| tx.hash()).collect();
        self.transactions = transactions
            .into_iter()
            .map(|tx| (tx.hash(), tx))
            .collect();

        let payload = self.sign_payload(ConsensusMessage::PrepareRequest {
            timestamp: self.timestamp,
            nonce: self.nonce,
            next_consensus: self.next_consensus,
            tx_hashes: self.tx_hashes.clone(),
        })?;

        self.preparation_hash = Some(payload.digest());
        self.preparations[payload.validator_index as usize] = Some(payload.signature);
        self.prepare_request = Some(payload.clone());
        self.request_sent = true;

        let mut actions = vec![Action::Broadcast(payload)];
        actions.extend(self.check_preparations()?);
        Ok(actions)
    }

    /// Vote to abandon the current view.
    ///
    /// A committed replica never changes view; it re-broadcasts recovery
    /// state instead so the quorum can finish the round.
    pub fn request_view_change(
        &mut self,
        reason: ChangeViewReason,
        timestamp: u64,
    ) -> Result<Vec<Action>, ConsensusError> {
        if self.commit_sent {
            return self.make_recovery_broadcast();
        }

        let new_view = self.view + 1;
        let payload = self.sign_payload(ConsensusMessage::ChangeView {
            new_view,
            timestamp,
            reason,
        })?;
        let index = payload.validator_index as usize;
        self.change_views[index] = Some(ChangeViewCompact {
            validator_index: payload.validator_index,
            original_view: self.view,
            new_view,
            timestamp,
            reason,
            signature: payload.signature,
        });

        let mut actions = vec![Action::Broadcast(payload)];
        actions.extend(self.try_change_view(new_view));
        Ok(actions)
    }

    /// Broadcasts everything this replica knows about the current height.
    pub fn make_recovery_broadcast(&self) -> Result<Vec<Action>, ConsensusError> {
        let payload = self.sign_payload(self.recovery_message())?;
        Ok(vec![Action::Broadcast(payload)])
    }

    fn recovery_message(&self) -> ConsensusMessage {
        let prepare_request = self.prepare_request.as_ref().and_then(|payload| {
            let ConsensusMessage::PrepareRequest {
                timestamp,
                nonce,
                next_consensus,
                tx_hashes,
            } = &payload.message
            else {
                return None;
            };
            Some(PrepareRequestCompact {
                timestamp: *timestamp,
                nonce: *nonce,
                next_consensus: *next_consensus,
                tx_hashes: tx_hashes.clone(),
                signature: payload.signature,
            })
        });

        let primary = self.primary_index(self.view);
        let preparations = self
            .preparations
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != primary as usize)
            .filter_map(|(index, signature)| {
                signature.as_ref().map(|signature| PreparationCompact {
                    validator_index: index as u16,
                    signature: *signature,
                })
            })
            .collect();

        ConsensusMessage::RecoveryMessage {
            change_views: self.change_views.iter().flatten().cloned().collect(),
            prepare_request,
            preparation_hash: self.preparation_hash,
            preparations,
            commits: self.commits.iter().flatten().cloned().collect(),
        }
    }

    // ===================== receiving =====================

    /// Validates and applies one payload from the network.
    ///
    /// `local_clock` is the replica's wall clock in seconds (used only for
    /// proposal timestamp bounds); `tx_lookup` resolves proposal hashes
    /// from the mempool or the fetch cache.
    pub fn process_payload(
        &mut self,
        payload: &ConsensusPayload,
        local_clock: u64,
        tx_lookup: &dyn Fn(&Hash256) -> Option<Transaction>,
    ) -> Result<Vec<Action>, ConsensusError> {
        if payload.magic != self.config.magic {
            return Err(ConsensusError::WrongMagic(payload.magic));
        }
        if payload.height != self.height {
            return Err(ConsensusError::WrongHeight {
                expected: self.height,
                got: payload.height,
            });
        }
        let index = payload.validator_index;
        let key = self
            .validators
            .get(index as usize)
            .ok_or(ConsensusError::UnknownValidator(index))?;
        if !payload.verify(key) {
            return Err(ConsensusError::BadSignature);
        }
        if Some(index) == self.my_index {
            // our own payload echoed back
            return Ok(Vec::new());
        }

        match &payload.message {
            ConsensusMessage::ChangeView {
                new_view,
                timestamp,
                reason,
            } => self.on_change_view(payload, *new_view, *timestamp, *reason),
            ConsensusMessage::PrepareRequest { .. } => {
                self.on_prepare_request(payload, local_clock, tx_lookup)
            }
            ConsensusMessage::PrepareResponse { preparation_hash } => {
                Ok(self.on_prepare_response(payload, *preparation_hash)?)
            }
            ConsensusMessage::Commit { signature } => self.on_commit(payload, *signature),
            ConsensusMessage::RecoveryRequest { .. } => {
                if self.my_index.is_some() {
                    self.make_recovery_broadcast()
                } else {
                    Ok(Vec::new())
                }
            }
            ConsensusMessage::RecoveryMessage { .. } => {
                self.on_recovery(payload, local_clock, tx_lookup)
            }
        }
    }

    fn on_change_view(
        &mut self,
        payload: &ConsensusPayload,
        new_view: u8,
        timestamp: u64,
        reason: ChangeViewReason,
    ) -> Result<Vec<Action>, ConsensusError> {
        if new_view <= self.view {
            return Ok(Vec::new());
        }
        let index = payload.validator_index as usize;
        let keep = match &self.change_views[index] {
            Some(existing) => existing.new_view < new_view,
            None => true,
        };
        if keep {
            self.change_views[index] = Some(ChangeViewCompact {
                validator_index: payload.validator_index,
                original_view: payload.view,
                new_view,
                timestamp,
                reason,
                signature: payload.signature,
            });
        }
        Ok(self.try_change_view(new_view))
    }

    /// Moves to `new_view` once `M` replicas ask for it (or beyond it).
    fn try_change_view(&mut self, new_view: u8) -> Vec<Action> {
        let votes = self
            .change_views
            .iter()
            .flatten()
            .filter(|compact| compact.new_view >= new_view)
            .count();
        if votes < self.quorum() || self.commit_sent || new_view <= self.view {
            return Vec::new();
        }

        self.view = new_view;
        self.timestamp = 0;
        self.nonce = 0;
        self.tx_hashes.clear();
        self.transactions.clear();
        self.prepare_request = None;
        self.preparation_hash = None;
        self.preparations = vec![None; self.validators.len()];
        self.request_sent = false;
        self.response_sent = false;

        vec![Action::ViewChanged { view: new_view }]
    }

    fn on_prepare_request(
        &mut self,
        payload: &ConsensusPayload,
        local_clock: u64,
        tx_lookup: &dyn Fn(&Hash256) -> Option<Transaction>,
    ) -> Result<Vec<Action>, ConsensusError> {
        if self.prepare_request.is_some() {
            return Ok(Vec::new());
        }
        if payload.view != self.view {
            return Ok(Vec::new());
        }
        if payload.validator_index != self.primary_index(self.view) {
            return Err(ConsensusError::NotFromPrimary);
        }

        let ConsensusMessage::PrepareRequest {
            timestamp,
            nonce,
            next_consensus,
            tx_hashes,
        } = &payload.message
        else {
            unreachable!("caller matched PrepareRequest");
        };

        if *timestamp <= self.prev_timestamp {
            return Err(ConsensusError::BadProposal(
                "timestamp not after the previous block".into(),
            ));
        }
        if *timestamp > local_clock + self.config.max_time_drift {
            return Err(ConsensusError::BadProposal(
                "timestamp too far in the future".into(),
            ));
        }
        if *next_consensus != self.next_consensus {
            return Err(ConsensusError::BadProposal(
                "unexpected next_consensus".into(),
            ));
        }
        if tx_hashes.len() > self.config.max_tx_per_block {
            return Err(ConsensusError::BadProposal("too many transactions".into()));
        }

        self.timestamp = *timestamp;
        self.nonce = *nonce;
        self.tx_hashes = tx_hashes.clone();
        self.transactions.clear();
        self.preparation_hash = Some(payload.digest());
        self.preparations[payload.validator_index as usize] = Some(payload.signature);
        self.prepare_request = Some(payload.clone());

        let mut missing = Vec::new();
        for hash in &self.tx_hashes {
            match tx_lookup(hash) {
                Some(tx) => {
                    self.transactions.insert(*hash, tx);
                }
                None => missing.push(*hash),
            }
        }

        let mut actions = Vec::new();
        if !missing.is_empty() {
            actions.push(Action::RequestTransactions(missing));
            return Ok(actions);
        }

        actions.extend(self.send_prepare_response()?);
        Ok(actions)
    }

    /// Supplies a transaction requested for the pending proposal.
    pub fn add_transaction(&mut self, tx: Transaction) -> Result<Vec<Action>, ConsensusError> {
        let hash = tx.hash();
        if !self.tx_hashes.contains(&hash) {
            return Ok(Vec::new());
        }
        self.transactions.insert(hash, tx);
        if self.proposal_complete() && !self.response_sent && !self.commit_sent {
            return self.send_prepare_response();
        }
        Ok(Vec::new())
    }

    fn proposal_complete(&self) -> bool {
        self.prepare_request.is_some()
            && self
                .tx_hashes
                .iter()
                .all(|hash| self.transactions.contains_key(hash))
    }

    fn send_prepare_response(&mut self) -> Result<Vec<Action>, ConsensusError> {
        let mut actions = Vec::new();
        if self.my_index.is_some() && !self.response_sent && !self.commit_sent {
            let preparation_hash = self
                .preparation_hash
                .expect("proposal recorded before responding");
            let payload =
                self.sign_payload(ConsensusMessage::PrepareResponse { preparation_hash })?;
            self.preparations[payload.validator_index as usize] = Some(payload.signature);
            self.response_sent = true;
            actions.push(Action::Broadcast(payload));
        }
        actions.extend(self.check_preparations()?);
        Ok(actions)
    }

    fn on_prepare_response(
        &mut self,
        payload: &ConsensusPayload,
        preparation_hash: Hash256,
    ) -> Result<Vec<Action>, ConsensusError> {
        if payload.view != self.view {
            return Ok(Vec::new());
        }
        if self.preparation_hash != Some(preparation_hash) {
            return Ok(Vec::new());
        }
        let index = payload.validator_index as usize;
        if self.preparations[index].is_some() {
            return Ok(Vec::new());
        }
        self.preparations[index] = Some(payload.signature);
        self.check_preparations()
    }

    /// Commits once `M` preparations match and every proposed transaction is
    /// on hand.
    fn check_preparations(&mut self) -> Result<Vec<Action>, ConsensusError> {
        let count = self.preparations.iter().flatten().count();
        if count < self.quorum()
            || self.commit_sent
            || self.my_index.is_none()
            || !self.proposal_complete()
        {
            return Ok(Vec::new());
        }

        let digest = self
            .proposed_block()
            .expect("complete proposal assembles")
            .header
            .digest();
        let key = self.my_key.as_ref().ok_or(ConsensusError::NotAValidator)?;
        let block_signature = key.sign(digest.as_slice());

        let payload = self.sign_payload(ConsensusMessage::Commit {
            signature: block_signature,
        })?;
        let index = payload.validator_index as usize;
        self.commits[index] = Some(CommitCompact {
            validator_index: payload.validator_index,
            view: self.view,
            block_signature,
            signature: payload.signature,
        });
        self.commit_sent = true;

        let mut actions = vec![Action::Broadcast(payload)];
        actions.extend(self.check_commits());
        Ok(actions)
    }

    fn on_commit(
        &mut self,
        payload: &ConsensusPayload,
        block_signature: Signature,
    ) -> Result<Vec<Action>, ConsensusError> {
        if payload.view != self.view {
            return Ok(Vec::new());
        }
        let index = payload.validator_index as usize;
        if self.commits[index].is_some() {
            return Ok(Vec::new());
        }
        self.commits[index] = Some(CommitCompact {
            validator_index: payload.validator_index,
            view: payload.view,
            block_signature,
            signature: payload.signature,
        });
        Ok(self.check_commits())
    }

    /// Assembles and relays the block once `M` valid commits exist.
    fn check_commits(&mut self) -> Vec<Action> {
        if self.block_sent || !self.proposal_complete() {
            return Vec::new();
        }
        let Some(block) = self.proposed_block() else {
            return Vec::new();
        };
        let digest = block.header.digest();

        let valid: Vec<&CommitCompact> = self
            .commits
            .iter()
            .flatten()
            .filter(|commit| {
                commit.view == self.view
                    && self.validators[commit.validator_index as usize]
                        .verify(digest.as_slice(), &commit.block_signature)
            })
            .collect();
        if valid.len() < self.quorum() {
            return Vec::new();
        }

        // Invocation pushes the first M signatures in ascending validator
        // order, matching the multisig contract's key scan.
        let mut invocation = Vec::new();
        for commit in valid.iter().take(self.quorum()) {
            emit::push_data(&mut invocation, commit.block_signature.as_slice());
        }
        let verification = emit::multisig_contract(self.quorum(), &self.validators)
            .expect("validator set is a valid multisig quorum");

        let mut block = block;
        block.header.witness = Witness {
            invocation,
            verification,
        };
        self.block_sent = true;
        vec![Action::RelayBlock(block)]
    }

    /// The block this round is agreeing on, if the proposal is complete.
    pub fn proposed_block(&self) -> Option<Block> {
        if !self.proposal_complete() {
            return None;
        }
        let transactions = self
            .tx_hashes
            .iter()
            .map(|hash| self.transactions[hash].clone())
            .collect();
        Some(Block::new(
            0,
            self.prev_hash,
            self.timestamp,
            self.height,
            self.nonce,
            self.next_consensus,
            transactions,
        ))
    }

    // ===================== recovery =====================

    fn on_recovery(
        &mut self,
        payload: &ConsensusPayload,
        local_clock: u64,
        tx_lookup: &dyn Fn(&Hash256) -> Option<Transaction>,
    ) -> Result<Vec<Action>, ConsensusError> {
        let ConsensusMessage::RecoveryMessage {
            change_views,
            prepare_request,
            preparation_hash,
            preparations,
            commits,
        } = &payload.message
        else {
            unreachable!("caller matched RecoveryMessage");
        };

        let mut actions = Vec::new();

        for compact in change_views {
            let rebuilt = ConsensusPayload {
                magic: self.config.magic,
                validator_index: compact.validator_index,
                height: self.height,
                view: compact.original_view,
                message: ConsensusMessage::ChangeView {
                    new_view: compact.new_view,
                    timestamp: compact.timestamp,
                    reason: compact.reason,
                },
                signature: compact.signature,
            };
            match self.process_payload(&rebuilt, local_clock, tx_lookup) {
                Ok(more) => actions.extend(more),
                Err(err) => warn!("recovery change view dropped: {err}"),
            }
        }

        if let Some(compact) = prepare_request
            && self.prepare_request.is_none()
        {
            let rebuilt = ConsensusPayload {
                magic: self.config.magic,
                validator_index: self.primary_index(self.view),
                height: self.height,
                view: self.view,
                message: ConsensusMessage::PrepareRequest {
                    timestamp: compact.timestamp,
                    nonce: compact.nonce,
                    next_consensus: compact.next_consensus,
                    tx_hashes: compact.tx_hashes.clone(),
                },
                signature: compact.signature,
            };
            match self.process_payload(&rebuilt, local_clock, tx_lookup) {
                Ok(more) => actions.extend(more),
                Err(err) => warn!("recovery prepare request dropped: {err}"),
            }
        }

        if let Some(preparation_hash) = self
            .preparation_hash
            .or(*preparation_hash)
        {
            for compact in preparations {
                let rebuilt = ConsensusPayload {
                    magic: self.config.magic,
                    validator_index: compact.validator_index,
                    height: self.height,
                    view: self.view,
                    message: ConsensusMessage::PrepareResponse { preparation_hash },
                    signature: compact.signature,
                };
                match self.process_payload(&rebuilt, local_clock, tx_lookup) {
                    Ok(more) => actions.extend(more),
                    Err(err) => warn!("recovery preparation dropped: {err}"),
                }
            }
        }

        for compact in commits {
            let rebuilt = ConsensusPayload {
                magic: self.config.magic,
                validator_index: compact.validator_index,
                height: self.height,
                view: compact.view,
                message: ConsensusMessage::Commit {
                    signature: compact.block_signature,
                },
                signature: compact.signature,
            };
            match self.process_payload(&rebuilt, local_clock, tx_lookup) {
                Ok(more) => actions.extend(more),
                Err(err) => warn!("recovery commit dropped: {err}"),
            }
        }

        Ok(actions)
    }
}

#[cfg(test)]
mod tests;
