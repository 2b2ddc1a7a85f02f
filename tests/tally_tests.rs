//! Vote tally unit tests: import outcomes, equivocation handling, GHOST
//! and completability.

use grandpa_finality::chain::{ChainOracle, HeaderChain};
use grandpa_finality::consensus::tally::{RejectReason, RoundTally, VoteOutcome, VoteTally};
use grandpa_finality::types::*;
use std::sync::Arc;

fn make_id(seed: u8) -> VoterId {
    let mut id = [0u8; 32];
    id[0] = seed;
    VoterId(id)
}

fn make_vset(n: usize) -> (Arc<VoterSet>, Vec<VoterId>) {
    let mut voters = Vec::new();
    let mut ids = Vec::new();
    for i in 0..n {
        let id = make_id(i as u8 + 1);
        ids.push(id);
        voters.push((id, 1));
    }
    (Arc::new(VoterSet::new(voters, 0).unwrap()), ids)
}

/// Linear chain of `len` blocks on top of genesis. `blocks[i]` has number i.
fn make_chain(len: u64) -> (HeaderChain, Vec<BlockInfo>) {
    let mut chain = HeaderChain::new();
    let genesis = chain.insert_genesis(BlockHeader {
        parent_hash: Hash::ZERO,
        number: 0,
        state_root: Hash::ZERO,
    });
    let mut blocks = vec![genesis];
    for i in 1..=len {
        let info = chain
            .insert(BlockHeader {
                parent_hash: blocks[(i - 1) as usize].hash,
                number: i,
                state_root: Hash::ZERO,
            })
            .unwrap();
        blocks.push(info);
    }
    (chain, blocks)
}

/// A fork branch off `parent`, `len` blocks long, distinguished by `seed`.
fn fork(chain: &mut HeaderChain, parent: BlockInfo, len: u64, seed: u8) -> Vec<BlockInfo> {
    let mut blocks = Vec::new();
    let mut tip = parent;
    for i in 1..=len {
        tip = chain
            .insert(BlockHeader {
                parent_hash: tip.hash,
                number: parent.number + i,
                state_root: Hash([seed; 32]),
            })
            .unwrap();
        blocks.push(tip);
    }
    blocks
}

fn prevote(target: BlockInfo, id: VoterId) -> SignedMessage {
    SignedMessage {
        vote: Vote::Prevote(target),
        signature: Signature::ZERO,
        id,
    }
}

fn precommit(target: BlockInfo, id: VoterId) -> SignedMessage {
    SignedMessage {
        vote: Vote::Precommit(target),
        signature: Signature::ZERO,
        id,
    }
}

#[test]
fn test_threshold() {
    let (vset, _) = make_vset(4);
    assert_eq!(vset.total_weight(), 4);
    assert_eq!(vset.threshold(), 3);

    let weighted = VoterSet::new(vec![(make_id(1), 10), (make_id(2), 5)], 0).unwrap();
    assert_eq!(weighted.total_weight(), 15);
    assert_eq!(weighted.threshold(), 11);
}

#[test]
fn test_import_idempotent() {
    let (vset, ids) = make_vset(4);
    let (chain, blocks) = make_chain(10);
    let mut tally = RoundTally::new(1, vset, blocks[0]);

    let v = prevote(blocks[10], ids[0]);
    assert_eq!(tally.import(v.clone()), VoteOutcome::Accepted);
    assert_eq!(tally.import(v.clone()), VoteOutcome::Duplicate);
    assert_eq!(tally.import(v), VoteOutcome::Duplicate);

    assert_eq!(tally.prevotes.accepted().count(), 1);
    assert_eq!(tally.prevotes.equivocations().count(), 0);
    assert_eq!(
        tally
            .prevotes
            .supporting_weight(tally.voter_set(), &chain, &blocks[0]),
        1
    );
}

#[test]
fn test_equivocation_emits_one_proof_and_excludes_weight() {
    let (vset, ids) = make_vset(4);
    let (chain, blocks) = make_chain(11);
    let mut tally = RoundTally::new(1, vset, blocks[0]);

    let first = prevote(blocks[10], ids[0]);
    let second = prevote(blocks[11], ids[0]);
    assert_eq!(tally.import(first.clone()), VoteOutcome::Accepted);

    match tally.import(second.clone()) {
        VoteOutcome::Equivocated(proof) => {
            assert_eq!(proof.round, 1);
            assert_eq!(proof.id, ids[0]);
            assert_eq!(proof.first, first);
            assert_eq!(proof.second, second);
        }
        other => panic!("expected equivocation, got {:?}", other),
    }

    // Excluded from all subsequent tallying for this kind.
    assert_eq!(
        tally
            .prevotes
            .supporting_weight(tally.voter_set(), &chain, &blocks[0]),
        0
    );
    // A third vote from the equivocator changes nothing.
    assert_eq!(tally.import(prevote(blocks[5], ids[0])), VoteOutcome::Duplicate);
    assert_eq!(tally.prevotes.equivocations().count(), 1);
    assert_eq!(tally.prevotes.accepted().count(), 0);
}

#[test]
fn test_unknown_voter_rejected() {
    let (vset, _) = make_vset(4);
    let (_, blocks) = make_chain(5);
    let mut tally = RoundTally::new(1, vset, blocks[0]);

    let outsider = make_id(99);
    assert_eq!(
        tally.import(prevote(blocks[5], outsider)),
        VoteOutcome::Rejected(RejectReason::UnknownVoter)
    );
    assert_eq!(tally.prevotes.accepted().count(), 0);
}

#[test]
fn test_wrong_kind_rejected() {
    let (vset, ids) = make_vset(4);
    let (_, blocks) = make_chain(5);
    let mut prevotes = VoteTally::new(VoteKind::Prevote, 1);

    assert_eq!(
        prevotes.import(&vset, precommit(blocks[5], ids[0])),
        VoteOutcome::Rejected(RejectReason::WrongKind)
    );
}

#[test]
fn test_prevote_ghost_simple() {
    let (vset, ids) = make_vset(4);
    let (chain, blocks) = make_chain(10);
    let mut tally = RoundTally::new(1, vset, blocks[0]);

    tally.import(prevote(blocks[10], ids[0]));
    tally.import(prevote(blocks[10], ids[1]));
    assert_eq!(tally.prevote_ghost(&chain).unwrap(), None);

    tally.import(prevote(blocks[10], ids[2]));
    assert_eq!(tally.prevote_ghost(&chain).unwrap(), Some(blocks[10]));
}

#[test]
fn test_prevote_ghost_settles_on_common_ancestor() {
    let (vset, ids) = make_vset(4);
    let (mut chain, blocks) = make_chain(5);
    let branch_a = fork(&mut chain, blocks[5], 3, 0xaa);
    let branch_b = fork(&mut chain, blocks[5], 3, 0xbb);
    let mut tally = RoundTally::new(1, vset, blocks[0]);

    tally.import(prevote(branch_a[2], ids[0]));
    tally.import(prevote(branch_a[2], ids[1]));
    tally.import(prevote(branch_b[2], ids[2]));
    tally.import(prevote(branch_b[2], ids[3]));

    // Neither branch tip has supermajority; the fork point has all four.
    assert_eq!(tally.prevote_ghost(&chain).unwrap(), Some(blocks[5]));
}

#[test]
fn test_best_final_never_exceeds_prevote_ghost() {
    let (vset, ids) = make_vset(4);
    let (chain, blocks) = make_chain(10);
    let mut tally = RoundTally::new(1, vset, blocks[0]);

    // Prevote supermajority only up to #8.
    tally.import(prevote(blocks[8], ids[0]));
    tally.import(prevote(blocks[8], ids[1]));
    tally.import(prevote(blocks[10], ids[2]));
    assert_eq!(tally.prevote_ghost(&chain).unwrap(), Some(blocks[8]));

    // Precommits all land on #10, beyond the ghost.
    tally.import(precommit(blocks[10], ids[0]));
    tally.import(precommit(blocks[10], ids[1]));
    tally.import(precommit(blocks[10], ids[2]));

    let ghost = tally.prevote_ghost(&chain).unwrap().unwrap();
    let best = tally.best_final_candidate(&chain).unwrap().unwrap();
    assert_eq!(best, blocks[8]);
    assert!(chain.is_equal_or_descendant(&best, &ghost));
}

#[test]
fn test_scenario_three_of_four_precommit_same_block() {
    // Voters {A,B,C,D} each weight 1, threshold 3. A, B, C precommit #10,
    // D stays silent.
    let (vset, ids) = make_vset(4);
    let (chain, blocks) = make_chain(10);
    let mut tally = RoundTally::new(1, vset, blocks[0]);

    for id in &ids[..3] {
        tally.import(prevote(blocks[10], *id));
        tally.import(precommit(blocks[10], *id));
    }

    assert_eq!(tally.best_final_candidate(&chain).unwrap(), Some(blocks[10]));
    assert!(tally.is_completable(&chain).unwrap());
}

#[test]
fn test_scenario_equivocation_blocks_finality() {
    // A precommits #10, B precommits #9, C equivocates (#10 and #11).
    // C is excluded, so remaining weight is 2 < 3 and nothing is
    // finalizable; D's single remaining weight could still tip #9 over
    // the threshold, so the round is not completable either.
    let (vset, ids) = make_vset(4);
    let (chain, blocks) = make_chain(11);
    let mut tally = RoundTally::new(1, vset, blocks[0]);

    for id in &ids {
        tally.import(prevote(blocks[10], *id));
    }
    tally.import(precommit(blocks[10], ids[0]));
    tally.import(precommit(blocks[9], ids[1]));
    tally.import(precommit(blocks[10], ids[2]));
    match tally.import(precommit(blocks[11], ids[2])) {
        VoteOutcome::Equivocated(_) => {}
        other => panic!("expected equivocation, got {:?}", other),
    }

    assert_eq!(tally.best_final_candidate(&chain).unwrap(), None);
    assert!(!tally.is_completable(&chain).unwrap());

    // D precommits #9: threshold reached there, and no higher block can
    // still turn, so the round settles.
    tally.import(precommit(blocks[9], ids[3]));
    assert_eq!(tally.best_final_candidate(&chain).unwrap(), Some(blocks[9]));
    assert!(tally.is_completable(&chain).unwrap());
}

#[test]
fn test_completable_outcome_is_stable() {
    let (vset, ids) = make_vset(4);
    let (chain, blocks) = make_chain(10);
    let mut tally = RoundTally::new(1, vset, blocks[0]);

    for id in &ids {
        tally.import(prevote(blocks[10], *id));
    }
    for id in &ids[..3] {
        tally.import(precommit(blocks[10], *id));
    }
    assert!(tally.is_completable(&chain).unwrap());
    let settled = tally.best_final_candidate(&chain).unwrap();

    // D's late precommit cannot move the outcome.
    tally.import(precommit(blocks[9], ids[3]));
    assert!(tally.is_completable(&chain).unwrap());
    assert_eq!(tally.best_final_candidate(&chain).unwrap(), settled);
}

#[test]
fn test_late_voter_cannot_move_a_settled_outcome() {
    // A and B prevote and precommit #3; C prevotes and precommits #2.
    // Ghost and best final candidate are #2, but D has not voted at all:
    // a prevote from D lifts the ghost to #3 and a precommit finalizes it
    // there. The round must not read as settled while that is possible.
    let (vset, ids) = make_vset(4);
    let (chain, blocks) = make_chain(3);
    let mut tally = RoundTally::new(1, vset, blocks[0]);

    tally.import(prevote(blocks[3], ids[0]));
    tally.import(prevote(blocks[3], ids[1]));
    tally.import(prevote(blocks[2], ids[2]));
    tally.import(precommit(blocks[3], ids[0]));
    tally.import(precommit(blocks[3], ids[1]));
    tally.import(precommit(blocks[2], ids[2]));

    assert_eq!(tally.prevote_ghost(&chain).unwrap(), Some(blocks[2]));
    assert_eq!(tally.best_final_candidate(&chain).unwrap(), Some(blocks[2]));
    assert!(!tally.is_completable(&chain).unwrap());

    // D votes #3: the ghost rises and the outcome moves, which is exactly
    // what completability had to wait for.
    tally.import(prevote(blocks[3], ids[3]));
    tally.import(precommit(blocks[3], ids[3]));
    assert_eq!(tally.best_final_candidate(&chain).unwrap(), Some(blocks[3]));
    assert!(tally.is_completable(&chain).unwrap());
}

#[test]
fn test_vote_on_unknown_branch_not_counted() {
    // Votes whose target the oracle cannot connect to the base contribute
    // no candidates and no weight.
    let (vset, ids) = make_vset(4);
    let (chain, blocks) = make_chain(5);
    let stranger = BlockInfo::new(9, Hash([0xde; 32]));
    let mut tally = RoundTally::new(1, vset, blocks[0]);

    tally.import(prevote(stranger, ids[0]));
    tally.import(prevote(blocks[5], ids[1]));
    tally.import(prevote(blocks[5], ids[2]));
    tally.import(prevote(blocks[5], ids[3]));

    assert_eq!(tally.prevote_ghost(&chain).unwrap(), Some(blocks[5]));
}

#[test]
fn test_snapshot_carries_both_equivocation_halves() {
    let (vset, ids) = make_vset(4);
    let (_, blocks) = make_chain(11);
    let mut tally = RoundTally::new(7, vset, blocks[0]);

    tally.import(prevote(blocks[10], ids[0]));
    tally.import(prevote(blocks[11], ids[0]));
    tally.import(prevote(blocks[10], ids[1]));
    tally.import(precommit(blocks[10], ids[2]));

    let snap = tally.snapshot();
    assert_eq!(snap.round_number, 7);
    assert_eq!(snap.base, blocks[0]);
    // B's accepted prevote plus both of A's conflicting prevotes.
    assert_eq!(snap.prevotes.len(), 3);
    assert_eq!(snap.precommits.len(), 1);
}
