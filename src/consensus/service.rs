//! The consensus task.
//!
//! Wraps a [`Context`] in a tokio task that owns the validator key, the
//! per-view timer and the message channels. Inbound payloads arrive from
//! the P2P layer on one channel; outbound payloads leave on another. The
//! service is the only caller of `add_block` for blocks it assembles, and
//! resynchronizes its context from the chain tip after every application.

use crate::consensus::context::{Action, ChangeViewReason, Context, TimerAdvice};
use crate::consensus::message::ConsensusPayload;
use crate::core::blockchain::Blockchain;
use crate::crypto::key_pair::PrivateKey;
use crate::types::hash::Hash256;
use crate::{error, info, warn};
use rand_core::{OsRng, RngCore};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::time::Instant;

pub use crate::consensus::context::ConsensusError;

fn local_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn fresh_nonce() -> u64 {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    u64::from_le_bytes(bytes)
}

/// The consensus replica task.
pub struct Service {
    chain: Arc<Blockchain>,
    context: Context,
    inbound: mpsc::Receiver<ConsensusPayload>,
    outbound: mpsc::Sender<ConsensusPayload>,
}

impl Service {
    /// Creates a replica over `chain`. `key` is `None` for observers.
    pub fn new(
        chain: Arc<Blockchain>,
        key: Option<PrivateKey>,
        inbound: mpsc::Receiver<ConsensusPayload>,
        outbound: mpsc::Sender<ConsensusPayload>,
    ) -> Service {
        let context = Context::new(chain.config().clone(), key);
        Service {
            chain,
            context,
            inbound,
            outbound,
        }
    }

    /// Points the context at the block after the current chain tip.
    fn sync_context(&mut self) {
        let height = self.chain.current_height();
        let prev_hash = self.chain.current_hash();
        let prev_timestamp = self
            .chain
            .get_block(&prev_hash)
            .ok()
            .flatten()
            .map(|block| block.header.timestamp)
            .unwrap_or(0);
        self.context.reset(height + 1, prev_hash, prev_timestamp);
        info!(
            "consensus round started: height={} primary={}",
            height + 1,
            self.context.primary_index(0)
        );
    }

    /// Runs the replica until the inbound channel closes.
    pub async fn run(mut self) {
        self.sync_context();
        let mut deadline = Instant::now() + self.context.timeout();

        loop {
            tokio::select! {
                payload = self.inbound.recv() => {
                    let Some(payload) = payload else { break };
                    self.on_payload(payload, &mut deadline).await;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    self.on_timer(&mut deadline).await;
                }
            }
        }
    }

    async fn on_payload(&mut self, payload: ConsensusPayload, deadline: &mut Instant) {
        // blocks assembled elsewhere may have moved the chain forward
        if self.chain.current_height() + 1 != self.context.height() {
            self.sync_context();
            *deadline = Instant::now() + self.context.timeout();
        }

        let mempool = self.chain.mempool().clone();
        let lookup = move |hash: &Hash256| mempool.get(hash);
        match self.context.process_payload(&payload, local_clock(), &lookup) {
            Ok(actions) => self.perform(actions, deadline).await,
            Err(err) => {
                info!(
                    "consensus payload dropped: kind={} sender={} reason={}",
                    payload.message.kind(),
                    payload.validator_index,
                    err
                );
            }
        }
    }

    async fn on_timer(&mut self, deadline: &mut Instant) {
        if self.chain.current_height() + 1 != self.context.height() {
            self.sync_context();
        }

        let advice = self.context.on_timer();
        let result = match advice {
            TimerAdvice::ProposeBlock => {
                let config = self.chain.config();
                let transactions = self
                    .chain
                    .mempool()
                    .iterate_for_block(config.max_tx_per_block, config.max_block_size / 2);
                self.context.make_prepare_request(
                    transactions,
                    local_clock(),
                    fresh_nonce(),
                )
            }
            TimerAdvice::RequestViewChange => self
                .context
                .request_view_change(ChangeViewReason::Timeout, local_clock()),
            TimerAdvice::SendRecovery => self.context.make_recovery_broadcast(),
            TimerAdvice::Idle => Ok(Vec::new()),
        };

        match result {
            Ok(actions) => self.perform(actions, deadline).await,
            Err(err) => warn!("consensus timer action failed: {err}"),
        }
        *deadline = Instant::now() + self.context.timeout();
    }

    async fn perform(&mut self, actions: Vec<Action>, deadline: &mut Instant) {
        for action in actions {
            match action {
                Action::Broadcast(payload) => {
                    if self.outbound.send(payload).await.is_err() {
                        warn!("consensus outbound channel closed");
                    }
                }
                Action::RelayBlock(block) => match self.chain.add_block(&block) {
                    Ok(()) => {
                        info!(
                            "consensus produced block: height={} hash={}",
                            block.index(),
                            block.hash()
                        );
                        self.sync_context();
                        *deadline = Instant::now() + self.context.timeout();
                    }
                    Err(err) => {
                        error!(
                            "assembled block rejected by the chain: height={} reason={}",
                            block.index(),
                            err
                        );
                    }
                },
                Action::RequestTransactions(hashes) => {
                    // fetching is the P2P layer's job; it feeds results back
                    // through the mempool
                    info!(
                        "consensus waiting for {} proposal transactions",
                        hashes.len()
                    );
                }
                Action::ViewChanged { view } => {
                    warn!(
                        "consensus view changed: height={} view={view}",
                        self.context.height()
                    );
                    *deadline = Instant::now() + self.context.timeout();
                }
            }
        }
    }
}
