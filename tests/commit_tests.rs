//! Commit aggregation, the compact wire form, and catch-up replay.

use grandpa_finality::chain::HeaderChain;
use grandpa_finality::commit::{CatchUpResponse, Commit, CommitError};
use grandpa_finality::consensus::round::{Round, RoundDeps};
use grandpa_finality::consensus::tally::RoundTally;
use grandpa_finality::crypto::ed25519;
use grandpa_finality::justification::JustificationError;
use grandpa_finality::types::codec::{decode_commit_message, encode_commit_message, signable_payload};
use grandpa_finality::types::*;
use ed25519_dalek::SigningKey;
use std::sync::Arc;

struct TestVoter {
    sk: SigningKey,
    id: VoterId,
}

fn make_voters(n: usize) -> (Arc<VoterSet>, Vec<TestVoter>) {
    let mut voters = Vec::new();
    let mut entries = Vec::new();
    for _ in 0..n {
        let (sk, vk) = ed25519::generate_keypair();
        let id = ed25519::voter_id(&vk);
        entries.push((id, 1));
        voters.push(TestVoter { sk, id });
    }
    let set = Arc::new(VoterSet::new(entries, 0).unwrap());
    voters.sort_by_key(|v| v.id);
    (set, voters)
}

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

fn signed_vote(round: RoundNumber, vote: Vote, voter: &TestVoter) -> SignedMessage {
    let payload = signable_payload(round, 0, &vote);
    SignedMessage {
        vote,
        signature: ed25519::sign(&voter.sk, &payload),
        id: voter.id,
    }
}

fn verify_fn(payload: &[u8], sig: &Signature, id: &VoterId) -> bool {
    ed25519::verify(payload, sig, id)
}

fn concluded_round(
    set: &Arc<VoterSet>,
    voters: &[TestVoter],
    blocks: &[BlockInfo],
) -> RoundTally {
    let mut tally = RoundTally::new(5, set.clone(), blocks[0]);
    for v in voters {
        tally.import(signed_vote(5, Vote::Prevote(blocks[10]), v));
    }
    tally.import(signed_vote(5, Vote::Precommit(blocks[10]), &voters[0]));
    tally.import(signed_vote(5, Vote::Precommit(blocks[10]), &voters[1]));
    tally.import(signed_vote(5, Vote::Precommit(blocks[9]), &voters[2]));
    tally
}

#[test]
fn test_commit_compact_round_trip() {
    let (set, voters) = make_voters(4);
    let (chain, blocks) = make_chain(10);
    let tally = concluded_round(&set, &voters, &blocks);
    let commit = Commit::build(&tally, &chain).unwrap();

    let msg = commit.to_message();
    assert_eq!(msg.round_number, 5);
    assert_eq!(msg.compact.target_hash, commit.vote.hash);
    assert_eq!(msg.compact.target_number, commit.vote.number);
    assert_eq!(msg.compact.precommits.len(), msg.compact.auth_data.len());

    let wire = encode_commit_message(&msg);
    let decoded = decode_commit_message(&wire).unwrap();
    assert_eq!(decoded, msg);

    let expanded = decoded.expand().unwrap();
    assert_eq!(expanded.vote, commit.vote);
    // The full set of (target, signature, id) triples survives, in order.
    let original: Vec<_> = commit
        .justification
        .items
        .iter()
        .map(|m| (m.block_info(), m.signature, m.id))
        .collect();
    let recovered: Vec<_> = expanded
        .justification
        .items
        .iter()
        .map(|m| (m.block_info(), m.signature, m.id))
        .collect();
    assert_eq!(original, recovered);
}

#[test]
fn test_expanded_commit_verifies_with_local_ancestry() {
    let (set, voters) = make_voters(4);
    let (chain, blocks) = make_chain(10);
    let tally = concluded_round(&set, &voters, &blocks);
    let commit = Commit::build(&tally, &chain).unwrap();

    let expanded = commit.to_message().expand().unwrap();
    // Commits carry no headers; descendant targets cannot be bridged yet.
    assert!(expanded.justification.votes_ancestries.is_empty());

    let bridged = expanded.justification.with_local_ancestry(&chain);
    assert_eq!(bridged.verify(&set, &verify_fn), Ok(3));
}

#[test]
fn test_tampered_compact_commit_fails_verification() {
    let (set, voters) = make_voters(4);
    let (chain, blocks) = make_chain(10);
    let tally = concluded_round(&set, &voters, &blocks);

    let mut msg = Commit::build(&tally, &chain).unwrap().to_message();
    msg.compact.auth_data[1].0 .0[3] ^= 0x10;

    let j = msg.expand().unwrap().justification.with_local_ancestry(&chain);
    assert_eq!(
        j.verify(&set, &verify_fn),
        Err(JustificationError::InsufficientVotes { got: 2, needed: 3 })
    );
}

#[test]
fn test_mismatched_parallel_sequences_rejected() {
    let (set, voters) = make_voters(4);
    let (chain, blocks) = make_chain(10);
    let tally = concluded_round(&set, &voters, &blocks);

    let mut msg = Commit::build(&tally, &chain).unwrap().to_message();
    msg.compact.auth_data.pop();
    assert_eq!(msg.expand().unwrap_err(), CommitError::LengthMismatch);
}

#[test]
fn test_catch_up_replay_reaches_same_conclusions() {
    let (set, voters) = make_voters(4);
    let (chain, blocks) = make_chain(10);
    let tally = concluded_round(&set, &voters, &blocks);

    let resp = CatchUpResponse::from_snapshot(tally.snapshot());
    assert_eq!(resp.round_number, 5);
    assert_eq!(resp.set_id, 0);

    // A lagging node replays the raw votes through a fresh round with full
    // validation and recomputes, rather than trusting derived results.
    let deps = RoundDeps {
        sign: Box::new(|_| Signature::ZERO),
        verify: Box::new(|payload, sig, id| ed25519::verify(payload, sig, id)),
    };
    let mut replayed = Round::new(resp.round_number, set, resp.base, None, deps);
    replayed.start();
    replayed.begin_voting();
    for signed in resp.prevotes.into_iter().chain(resp.precommits) {
        replayed.import_vote(&chain, signed);
    }

    assert_eq!(
        replayed.tally().best_final_candidate(&chain).unwrap(),
        tally.best_final_candidate(&chain).unwrap()
    );
    assert_eq!(
        replayed.tally().is_completable(&chain).unwrap(),
        tally.is_completable(&chain).unwrap()
    );
}
