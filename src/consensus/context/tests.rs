use super::*;
use crate::config::ProtocolConfig;
use crate::core::blockchain::Blockchain;
use crate::storage::memory_store::MemoryStore;
use std::collections::VecDeque;
use std::sync::Arc;

const CLOCK: u64 = 2_000_000_000;

fn make_contexts(n: usize) -> Vec<Context> {
    let (config, keys) = ProtocolConfig::dev(n);
    keys.into_iter()
        .map(|key| Context::new(config.clone(), Some(key)))
        .collect()
}

fn reset_all(contexts: &mut [Context], height: u32, prev_hash: Hash256, prev_timestamp: u64) {
    for context in contexts.iter_mut() {
        context.reset(height, prev_hash, prev_timestamp);
    }
}

fn primary_position(contexts: &[Context]) -> usize {
    contexts
        .iter()
        .position(|context| context.is_primary())
        .expect("one context is primary")
}

fn no_tx(_: &Hash256) -> Option<Transaction> {
    None
}

/// Delivers every broadcast to every other replica until the message flow
/// drains, collecting relayed blocks.
fn run_to_completion(contexts: &mut [Context], initial: Vec<Action>) -> Vec<Block> {
    let mut queue: VecDeque<ConsensusPayload> = VecDeque::new();
    let mut blocks = Vec::new();

    let mut absorb = |actions: Vec<Action>,
                      queue: &mut VecDeque<ConsensusPayload>,
                      blocks: &mut Vec<Block>| {
        for action in actions {
            match action {
                Action::Broadcast(payload) => queue.push_back(payload),
                Action::RelayBlock(block) => blocks.push(block),
                Action::RequestTransactions(_) | Action::ViewChanged { .. } => {}
            }
        }
    };

    absorb(initial, &mut queue, &mut blocks);

    while let Some(payload) = queue.pop_front() {
        for context in contexts.iter_mut() {
            if context.my_index() == Some(payload.validator_index) {
                continue;
            }
            let actions = context
                .process_payload(&payload, CLOCK, &no_tx)
                .expect("payload accepted");
            absorb(actions, &mut queue, &mut blocks);
        }
    }
    blocks
}

// ========== quorum arithmetic and primary rotation ==========

#[test]
fn primary_rotates_backwards_with_views() {
    let mut contexts = make_contexts(4);
    reset_all(&mut contexts, 1, Hash256([1; 32]), 1000);

    let context = &contexts[0];
    assert_eq!(context.primary_index(0), 1);
    assert_eq!(context.primary_index(1), 0);
    assert_eq!(context.primary_index(2), 3);
    assert_eq!(context.primary_index(3), 2);
    assert_eq!(context.primary_index(4), 1);
}

#[test]
fn quorum_is_n_minus_f() {
    let contexts = make_contexts(7);
    assert_eq!(contexts[0].quorum(), 5);
    let contexts = make_contexts(4);
    assert_eq!(contexts[0].quorum(), 3);
}

#[test]
fn exactly_one_primary_per_view() {
    let mut contexts = make_contexts(4);
    reset_all(&mut contexts, 5, Hash256([1; 32]), 1000);
    assert_eq!(
        contexts.iter().filter(|context| context.is_primary()).count(),
        1
    );
}

#[test]
fn timeout_doubles_per_view() {
    let mut contexts = make_contexts(4);
    reset_all(&mut contexts, 1, Hash256([1; 32]), 1000);

    // watch a backup: the primary has the shorter proposal deadline
    let observer = contexts
        .iter()
        .position(|context| !context.is_primary())
        .unwrap();
    let base = contexts[observer].timeout();
    let block_interval = Duration::from_secs(15);
    assert_eq!(base, block_interval * 2);

    // push the quorum to view 1
    let voters: Vec<usize> = (0..4).filter(|index| *index != observer).collect();
    let mut payloads = Vec::new();
    for index in voters {
        let actions = contexts[index]
            .request_view_change(ChangeViewReason::Timeout, CLOCK)
            .unwrap();
        for action in actions {
            if let Action::Broadcast(payload) = action {
                payloads.push(payload);
            }
        }
    }
    for payload in payloads {
        let _ = contexts[observer].process_payload(&payload, CLOCK, &no_tx);
    }
    assert_eq!(contexts[observer].view(), 1);
    assert_eq!(contexts[observer].timeout(), base * 2);
}

// ========== happy path ==========

#[test]
fn four_replicas_agree_on_an_empty_block() {
    let mut contexts = make_contexts(4);
    reset_all(&mut contexts, 1, Hash256([9; 32]), 1000);

    let primary = primary_position(&contexts);
    let initial = contexts[primary]
        .make_prepare_request(vec![], 2000, 0xabcd)
        .unwrap();
    let blocks = run_to_completion(&mut contexts, initial);

    // every replica reaches BLOCK_SENT with the same block
    assert_eq!(blocks.len(), 4);
    let hash = blocks[0].hash();
    assert!(blocks.iter().all(|block| block.hash() == hash));
    assert!(contexts.iter().all(|context| context.block_sent()));
    assert_eq!(blocks[0].index(), 1);
    assert_eq!(blocks[0].header.nonce, 0xabcd);
}

#[test]
fn agreed_block_is_accepted_by_the_blockchain() {
    let (config, keys) = ProtocolConfig::dev(4);
    let chain = Blockchain::new(config.clone(), Arc::new(MemoryStore::new())).unwrap();

    let mut contexts: Vec<Context> = keys
        .into_iter()
        .map(|key| Context::new(config.clone(), Some(key)))
        .collect();
    let genesis = chain.get_block_by_index(0).unwrap().unwrap();
    reset_all(
        &mut contexts,
        1,
        chain.current_hash(),
        genesis.header.timestamp,
    );

    let primary = primary_position(&contexts);
    let initial = contexts[primary]
        .make_prepare_request(vec![], genesis.header.timestamp + 15, 7)
        .unwrap();
    let blocks = run_to_completion(&mut contexts, initial);

    chain.add_block(&blocks[0]).expect("consensus block applies");
    assert_eq!(chain.current_height(), 1);
    assert_eq!(chain.current_hash(), blocks[0].hash());
}

#[test]
fn single_validator_commits_alone() {
    let mut contexts = make_contexts(1);
    reset_all(&mut contexts, 1, Hash256([3; 32]), 500);
    assert!(contexts[0].is_primary());

    let actions = contexts[0].make_prepare_request(vec![], 600, 1).unwrap();
    let blocks: Vec<Block> = actions
        .into_iter()
        .filter_map(|action| match action {
            Action::RelayBlock(block) => Some(block),
            _ => None,
        })
        .collect();
    assert_eq!(blocks.len(), 1);
    assert!(contexts[0].block_sent());
}

// ========== proposal validation ==========

#[test]
fn prepare_request_from_non_primary_is_rejected() {
    let mut contexts = make_contexts(4);
    reset_all(&mut contexts, 1, Hash256([1; 32]), 1000);
    let primary = primary_position(&contexts);
    let backup = (primary + 1) % 4;

    // a backup fabricating a proposal fails the primary check
    let err = contexts[backup].make_prepare_request(vec![], 2000, 1);
    assert!(matches!(err, Err(ConsensusError::NotFromPrimary)));
}

#[test]
fn stale_timestamp_proposal_is_rejected() {
    let mut contexts = make_contexts(4);
    reset_all(&mut contexts, 1, Hash256([1; 32]), 1000);
    let primary = primary_position(&contexts);

    // primary clamps its own timestamp above the previous block, so build
    // the payload by hand to simulate a bad proposal
    let initial = contexts[primary]
        .make_prepare_request(vec![], 500, 1)
        .unwrap();
    let Action::Broadcast(payload) = &initial[0] else {
        panic!("expected broadcast");
    };
    // the clamp kicked in
    let ConsensusMessage::PrepareRequest { timestamp, .. } = &payload.message else {
        panic!("expected prepare request");
    };
    assert_eq!(*timestamp, 1001);

    // a proposal claiming a far-future timestamp is rejected by backups
    let mut far_future = make_contexts(4);
    reset_all(&mut far_future, 1, Hash256([1; 32]), 1000);
    let future_initial = far_future[primary]
        .make_prepare_request(vec![], CLOCK * 2, 1)
        .unwrap();
    let Action::Broadcast(future_payload) = &future_initial[0] else {
        panic!("expected broadcast");
    };
    let backup = (primary + 1) % 4;
    let err = far_future[backup].process_payload(future_payload, CLOCK, &no_tx);
    assert!(matches!(err, Err(ConsensusError::BadProposal(_))));
}

#[test]
fn missing_transactions_are_requested_before_responding() {
    let mut contexts = make_contexts(4);
    reset_all(&mut contexts, 1, Hash256([1; 32]), 1000);
    let primary = primary_position(&contexts);

    let tx = Transaction::new(crate::core::transaction::TxData::Contract);
    let initial = contexts[primary]
        .make_prepare_request(vec![tx.clone()], 2000, 1)
        .unwrap();
    let Action::Broadcast(payload) = &initial[0] else {
        panic!("expected broadcast");
    };

    let backup = (primary + 1) % 4;
    let actions = contexts[backup]
        .process_payload(payload, CLOCK, &no_tx)
        .unwrap();
    assert!(matches!(
        actions.as_slice(),
        [Action::RequestTransactions(missing)] if missing == &vec![tx.hash()]
    ));

    // once the transaction arrives the response goes out
    let actions = contexts[backup].add_transaction(tx).unwrap();
    assert!(actions
        .iter()
        .any(|action| matches!(action, Action::Broadcast(p)
            if matches!(p.message, ConsensusMessage::PrepareResponse { .. }))));
}

// ========== message hygiene ==========

#[test]
fn bad_signature_is_rejected() {
    let mut contexts = make_contexts(4);
    reset_all(&mut contexts, 1, Hash256([1; 32]), 1000);
    let primary = primary_position(&contexts);

    let initial = contexts[primary]
        .make_prepare_request(vec![], 2000, 1)
        .unwrap();
    let Action::Broadcast(payload) = &initial[0] else {
        panic!("expected broadcast");
    };
    let mut tampered = payload.clone();
    tampered.signature.0[0] ^= 1;

    let backup = (primary + 1) % 4;
    let err = contexts[backup].process_payload(&tampered, CLOCK, &no_tx);
    assert!(matches!(err, Err(ConsensusError::BadSignature)));
}

#[test]
fn wrong_height_is_rejected() {
    let mut contexts = make_contexts(4);
    reset_all(&mut contexts, 1, Hash256([1; 32]), 1000);
    let primary = primary_position(&contexts);

    let initial = contexts[primary]
        .make_prepare_request(vec![], 2000, 1)
        .unwrap();
    let Action::Broadcast(payload) = &initial[0] else {
        panic!("expected broadcast");
    };

    let backup = (primary + 1) % 4;
    contexts[backup].reset(2, Hash256([2; 32]), 2000);
    let err = contexts[backup].process_payload(payload, CLOCK, &no_tx);
    assert!(matches!(
        err,
        Err(ConsensusError::WrongHeight { expected: 2, got: 1 })
    ));
}

#[test]
fn duplicate_messages_are_idempotent() {
    let mut contexts = make_contexts(4);
    reset_all(&mut contexts, 1, Hash256([1; 32]), 1000);
    let primary = primary_position(&contexts);

    let initial = contexts[primary]
        .make_prepare_request(vec![], 2000, 1)
        .unwrap();
    let Action::Broadcast(request) = initial[0].clone() else {
        panic!("expected broadcast");
    };

    let backup = (primary + 1) % 4;
    let first = contexts[backup]
        .process_payload(&request, CLOCK, &no_tx)
        .unwrap();
    assert!(!first.is_empty());
    let second = contexts[backup]
        .process_payload(&request, CLOCK, &no_tx)
        .unwrap();
    assert!(second.is_empty(), "duplicate proposal must be ignored");
}

// ========== view change ==========

#[test]
fn quorum_of_change_views_advances_the_view() {
    let mut contexts = make_contexts(4);
    reset_all(&mut contexts, 1, Hash256([1; 32]), 1000);

    let mut payloads = Vec::new();
    for index in [0usize, 1, 2] {
        let actions = contexts[index]
            .request_view_change(ChangeViewReason::Timeout, CLOCK)
            .unwrap();
        for action in actions {
            if let Action::Broadcast(payload) = action {
                payloads.push(payload);
            }
        }
    }
    for payload in payloads {
        for context in contexts.iter_mut() {
            if context.my_index() == Some(payload.validator_index) {
                continue;
            }
            let _ = context.process_payload(&payload, CLOCK, &no_tx).unwrap();
        }
    }

    assert!(contexts.iter().all(|context| context.view() == 1));
    // the view-1 primary differs from the view-0 primary
    assert_eq!(contexts[0].primary_index(1), 0);
}

#[test]
fn too_few_change_views_do_not_advance() {
    let mut contexts = make_contexts(4);
    reset_all(&mut contexts, 1, Hash256([1; 32]), 1000);

    let actions = contexts[0]
        .request_view_change(ChangeViewReason::Timeout, CLOCK)
        .unwrap();
    let Action::Broadcast(payload) = &actions[0] else {
        panic!("expected broadcast");
    };
    let _ = contexts[1].process_payload(payload, CLOCK, &no_tx).unwrap();

    assert!(contexts.iter().all(|context| context.view() == 0));
}

// ========== sticky commit ==========

/// Drives a full preparation phase so every replica has sent its commit.
fn drive_to_commit(contexts: &mut [Context]) {
    let primary = primary_position(contexts);
    let initial = contexts[primary]
        .make_prepare_request(vec![], 2000, 1)
        .unwrap();

    let mut queue: VecDeque<ConsensusPayload> = initial
        .into_iter()
        .filter_map(|action| match action {
            Action::Broadcast(payload) => Some(payload),
            _ => None,
        })
        .collect();

    // deliver prepare request and responses only, hold back commits
    while let Some(payload) = queue.pop_front() {
        if matches!(payload.message, ConsensusMessage::Commit { .. }) {
            continue;
        }
        for context in contexts.iter_mut() {
            if context.my_index() == Some(payload.validator_index) {
                continue;
            }
            let actions = context.process_payload(&payload, CLOCK, &no_tx).unwrap();
            for action in actions {
                if let Action::Broadcast(next) = action {
                    queue.push_back(next);
                }
            }
        }
    }
}

#[test]
fn committed_replica_refuses_to_change_view() {
    let mut contexts = make_contexts(4);
    reset_all(&mut contexts, 1, Hash256([1; 32]), 1000);
    drive_to_commit(&mut contexts);
    assert!(contexts.iter().all(|context| context.commit_sent()));

    // a committed replica answers a timeout with recovery, not ChangeView
    assert_eq!(contexts[0].on_timer(), TimerAdvice::SendRecovery);
    let actions = contexts[0]
        .request_view_change(ChangeViewReason::Timeout, CLOCK)
        .unwrap();
    assert!(actions.iter().all(|action| matches!(
        action,
        Action::Broadcast(payload)
            if matches!(payload.message, ConsensusMessage::RecoveryMessage { .. })
    )));
    assert_eq!(contexts[0].view(), 0);

    // even a quorum of change views cannot move it off its commit
    let mut votes = Vec::new();
    for index in [1usize, 2, 3] {
        // other replicas are equally committed; fabricate votes from fresh
        // uncommitted replicas at the same coordinates instead
        let mut fresh = make_contexts(4);
        reset_all(&mut fresh, 1, Hash256([1; 32]), 1000);
        let actions = fresh[index]
            .request_view_change(ChangeViewReason::Timeout, CLOCK)
            .unwrap();
        for action in actions {
            if let Action::Broadcast(payload) = action {
                votes.push(payload);
            }
        }
    }
    for vote in votes {
        let _ = contexts[0].process_payload(&vote, CLOCK, &no_tx).unwrap();
    }
    assert_eq!(contexts[0].view(), 0, "sticky commit must hold the view");
}

// ========== recovery ==========

#[test]
fn recovery_catches_up_a_lagging_replica() {
    let mut contexts = make_contexts(4);
    reset_all(&mut contexts, 1, Hash256([1; 32]), 1000);

    // one backup misses the whole round; the remaining three (a quorum)
    // finish it without it
    let lagging_position = (primary_position(&contexts) + 1) % 4;
    let mut lagging = contexts.remove(lagging_position);

    let primary = primary_position(&contexts);
    let initial = contexts[primary]
        .make_prepare_request(vec![], 2000, 1)
        .unwrap();
    let blocks = run_to_completion(&mut contexts, initial);
    assert_eq!(blocks.len(), 3);
    assert!(!lagging.commit_sent());

    let recovery_actions = contexts[0].make_recovery_broadcast().unwrap();
    let Action::Broadcast(recovery) = &recovery_actions[0] else {
        panic!("expected broadcast");
    };

    let actions = lagging.process_payload(recovery, CLOCK, &no_tx).unwrap();

    // catching up: the replica responds, commits and, with the quorum's
    // commits in the bundle, assembles the same block
    assert!(lagging.commit_sent());
    let relayed = actions.iter().find_map(|action| match action {
        Action::RelayBlock(block) => Some(block.hash()),
        _ => None,
    });
    assert_eq!(relayed, Some(blocks[0].hash()));
}

#[test]
fn recovery_request_is_answered_with_state() {
    let mut contexts = make_contexts(4);
    reset_all(&mut contexts, 1, Hash256([1; 32]), 1000);
    let primary = primary_position(&contexts);
    let initial = contexts[primary]
        .make_prepare_request(vec![], 2000, 1)
        .unwrap();
    let Action::Broadcast(request) = &initial[0] else {
        panic!("expected broadcast");
    };
    let backup = (primary + 1) % 4;
    let _ = contexts[backup].process_payload(request, CLOCK, &no_tx);

    let ask = contexts[(backup + 1) % 4]
        .sign_payload(ConsensusMessage::RecoveryRequest { timestamp: CLOCK })
        .unwrap();
    let answer = contexts[backup].process_payload(&ask, CLOCK, &no_tx).unwrap();
    assert!(answer.iter().any(|action| matches!(
        action,
        Action::Broadcast(payload)
            if matches!(payload.message, ConsensusMessage::RecoveryMessage { .. })
    )));
}
