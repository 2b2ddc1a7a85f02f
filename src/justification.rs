//! Portable finality proofs: a set of signed precommits plus the minimal
//! header chain tying every precommit target back to the finalized block.
//! Anyone holding the voter set can check one without replaying the round.

use crate::chain::ChainOracle;
use crate::consensus::tally::{GhostError, RoundTally};
use crate::types::codec::signable_payload;
use crate::types::{
    BlockHeader, BlockInfo, Hash, RoundNumber, Signature, SignedMessage, VoteKind, VoterId,
    VoterSet, Weight,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum JustificationError {
    #[error("no finalizable block yet")]
    NothingFinalizable,
    #[error("insufficient precommit weight: {got} of {needed} needed")]
    InsufficientVotes { got: Weight, needed: Weight },
    #[error("ancestry headers do not bridge precommit targets to the finalized block")]
    AncestryGap,
    #[error(transparent)]
    Ghost(#[from] GhostError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrandpaJustification {
    pub round_number: RoundNumber,
    /// The block proven final.
    pub block_info: BlockInfo,
    /// Signed precommits targeting the finalized block or a descendant.
    pub items: Vec<SignedMessage>,
    /// Headers bridging descendant targets back to `block_info`. Every
    /// counted precommit must be reachable through these alone.
    pub votes_ancestries: Vec<BlockHeader>,
}

impl GrandpaJustification {
    /// Package a concluded round's precommits into a proof for its best
    /// final candidate.
    pub fn build(
        tally: &RoundTally,
        chain: &dyn ChainOracle,
    ) -> Result<Self, JustificationError> {
        let target = tally
            .best_final_candidate(chain)?
            .ok_or(JustificationError::NothingFinalizable)?;

        let voter_set = tally.voter_set();
        let mut items = Vec::new();
        let mut weight = 0u64;
        let mut headers: BTreeMap<Hash, BlockHeader> = BTreeMap::new();

        for signed in tally.precommits.accepted() {
            let vote_target = signed.block_info();
            if !chain.is_equal_or_descendant(&target, &vote_target) {
                continue;
            }
            // Headers for every block from the vote target down to (but
            // excluding) the finalized block.
            let mut cursor = vote_target;
            while cursor != target {
                if headers.contains_key(&cursor.hash) {
                    break;
                }
                let header = chain
                    .header(&cursor.hash)
                    .ok_or(JustificationError::AncestryGap)?;
                let parent = BlockInfo::new(header.number.saturating_sub(1), header.parent_hash);
                headers.insert(cursor.hash, header);
                cursor = parent;
            }
            weight = weight.saturating_add(voter_set.weight_of(&signed.id).unwrap_or(0));
            items.push(signed.clone());
        }

        let needed = voter_set.threshold();
        if weight < needed {
            return Err(JustificationError::InsufficientVotes {
                got: weight,
                needed,
            });
        }

        Ok(Self {
            round_number: tally.round_number(),
            block_info: target,
            items,
            votes_ancestries: headers.into_values().collect(),
        })
    }

    /// Check the proof against a voter set and a signature verifier.
    ///
    /// Defective precommits — bad signature, unknown or repeated voter, or
    /// a target that the ancestry headers cannot tie to the finalized
    /// block — lose their weight but do not fail the proof by themselves.
    /// The proof fails only when the surviving weight misses the threshold.
    pub fn verify(
        &self,
        voter_set: &VoterSet,
        verify: &dyn Fn(&[u8], &Signature, &VoterId) -> bool,
    ) -> Result<Weight, JustificationError> {
        // Headers are keyed by the hash of their content, so a header whose
        // claimed identity does not match its digest simply never matches a
        // parent link.
        let headers: BTreeMap<Hash, BlockHeader> = self
            .votes_ancestries
            .iter()
            .map(|h| (h.hash(), h.clone()))
            .collect();

        let mut seen: BTreeSet<VoterId> = BTreeSet::new();
        let mut weight = 0u64;
        let mut dropped_unreachable = false;

        for signed in &self.items {
            if !signed.is(VoteKind::Precommit) {
                debug!(round = self.round_number, "justification item is not a precommit, skipping");
                continue;
            }
            let Some(voter_weight) = voter_set.weight_of(&signed.id) else {
                debug!(round = self.round_number, voter = ?signed.id, "justification precommit from unknown voter");
                continue;
            };
            if !seen.insert(signed.id) {
                debug!(round = self.round_number, voter = ?signed.id, "repeated voter in justification");
                continue;
            }
            let payload = signable_payload(self.round_number, voter_set.set_id(), &signed.vote);
            if !verify(&payload, &signed.signature, &signed.id) {
                debug!(round = self.round_number, voter = ?signed.id, "bad signature in justification");
                continue;
            }
            if !self.reaches_target(&headers, signed.block_info()) {
                debug!(round = self.round_number, voter = ?signed.id, "precommit target not bridged by ancestry");
                dropped_unreachable = true;
                continue;
            }
            weight = weight.saturating_add(voter_weight);
        }

        let needed = voter_set.threshold();
        if weight < needed {
            if dropped_unreachable {
                return Err(JustificationError::AncestryGap);
            }
            return Err(JustificationError::InsufficientVotes {
                got: weight,
                needed,
            });
        }
        Ok(weight)
    }

    /// Walk parent links through the supplied headers from `from` down to
    /// the finalized block.
    fn reaches_target(&self, headers: &BTreeMap<Hash, BlockHeader>, from: BlockInfo) -> bool {
        let mut cursor = from;
        loop {
            if cursor == self.block_info {
                return true;
            }
            if cursor.number <= self.block_info.number {
                return false;
            }
            match headers.get(&cursor.hash) {
                Some(header) if header.number == cursor.number => {
                    cursor = BlockInfo::new(cursor.number - 1, header.parent_hash);
                }
                _ => return false,
            }
        }
    }

    /// Fill in ancestry headers from a local oracle for targets the proof
    /// itself does not bridge. Commits travel without headers; the receiver
    /// supplies them from its own chain before verifying.
    pub fn with_local_ancestry(mut self, chain: &dyn ChainOracle) -> Self {
        let mut headers: BTreeMap<Hash, BlockHeader> = self
            .votes_ancestries
            .iter()
            .map(|h| (h.hash(), h.clone()))
            .collect();
        for signed in &self.items {
            let mut cursor = signed.block_info();
            while cursor != self.block_info && cursor.number > self.block_info.number {
                if let Some(header) = headers.get(&cursor.hash) {
                    cursor = BlockInfo::new(cursor.number - 1, header.parent_hash);
                    continue;
                }
                match chain.header(&cursor.hash) {
                    Some(header) => {
                        let parent =
                            BlockInfo::new(cursor.number - 1, header.parent_hash);
                        headers.insert(cursor.hash, header);
                        cursor = parent;
                    }
                    None => break,
                }
            }
        }
        self.votes_ancestries = headers.into_values().collect();
        self
    }
}
