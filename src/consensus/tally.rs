//! Per-round vote accounting: acceptance, equivocation detection, and the
//! supermajority queries (GHOST, best final candidate, completability).

use crate::chain::ChainOracle;
use crate::types::{
    BlockInfo, Equivocation, RoundNumber, SignedMessage, VoteKind, VoterId, VoterSet, Weight,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Result of importing one signed vote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoteOutcome {
    /// First vote of this kind from this voter.
    Accepted,
    /// Exact re-delivery, or any further vote from a voter already caught
    /// equivocating. No state change.
    Duplicate,
    /// Second conflicting vote from the same voter. The proof holds both
    /// signed messages; the voter no longer counts toward this kind.
    Equivocated(Box<Equivocation>),
    Rejected(RejectReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// Voter id is not in the round's voter set.
    UnknownVoter,
    /// Vote target is not the round base or a descendant of it.
    NotDescendantOfBase,
    /// Signature did not verify against the signable payload.
    BadSignature,
    /// Message kind does not match the tally it was routed to.
    WrongKind,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum GhostError {
    /// Two blocks at the same number both reached supermajority. Only
    /// possible if weights were double-counted; the gadget must halt.
    #[error("ghost ambiguity: distinct blocks at number {number} both reached threshold")]
    Ambiguous { number: u64 },
}

/// Votes of a single kind for one round.
///
/// A voter appears in `votes` or in `equivocations`, never both. Once an
/// equivocation is recorded the voter's weight is excluded from every
/// query on this tally.
#[derive(Clone, Debug)]
pub struct VoteTally {
    kind: VoteKind,
    round: RoundNumber,
    votes: BTreeMap<VoterId, SignedMessage>,
    equivocations: BTreeMap<VoterId, Equivocation>,
}

impl VoteTally {
    pub fn new(kind: VoteKind, round: RoundNumber) -> Self {
        Self {
            kind,
            round,
            votes: BTreeMap::new(),
            equivocations: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> VoteKind {
        self.kind
    }

    /// Pure bookkeeping step. The caller has already checked the signature
    /// and the base-descendancy of the target.
    pub fn import(&mut self, voter_set: &VoterSet, signed: SignedMessage) -> VoteOutcome {
        if !signed.is(self.kind) {
            return VoteOutcome::Rejected(RejectReason::WrongKind);
        }
        if !voter_set.contains(&signed.id) {
            // Recorded nowhere, but worth a trace: an adversary probing with
            // made-up ids shows up here.
            debug!(round = self.round, kind = ?self.kind, voter = ?signed.id, "vote from unknown voter");
            return VoteOutcome::Rejected(RejectReason::UnknownVoter);
        }
        if self.equivocations.contains_key(&signed.id) {
            return VoteOutcome::Duplicate;
        }
        match self.votes.get(&signed.id) {
            None => {
                self.votes.insert(signed.id, signed);
                VoteOutcome::Accepted
            }
            Some(existing) if existing.block_info() == signed.block_info() => {
                // Same target. A differing signature over the same vote is
                // not conflicting evidence.
                VoteOutcome::Duplicate
            }
            Some(existing) => {
                let id = signed.id;
                let proof = Equivocation::new(self.round, id, existing.clone(), signed)
                    .expect("conflicting votes from one voter form a valid proof");
                self.votes.remove(&id);
                self.equivocations.insert(id, proof.clone());
                VoteOutcome::Equivocated(Box::new(proof))
            }
        }
    }

    pub fn accepted(&self) -> impl Iterator<Item = &SignedMessage> {
        self.votes.values()
    }

    pub fn equivocations(&self) -> impl Iterator<Item = &Equivocation> {
        self.equivocations.values()
    }

    pub fn has_voted(&self, id: &VoterId) -> bool {
        self.votes.contains_key(id) || self.equivocations.contains_key(id)
    }

    /// Weight of everyone who committed to this kind: accepted voters plus
    /// equivocators (they have spoken, even though they no longer count
    /// toward any block).
    pub fn participation_weight(&self, voter_set: &VoterSet) -> Weight {
        let mut sum = 0u64;
        for id in self.votes.keys().chain(self.equivocations.keys()) {
            sum = sum.saturating_add(voter_set.weight_of(id).unwrap_or(0));
        }
        sum
    }

    /// Every signed message received on this tally: accepted votes plus both
    /// halves of each equivocation. This is what catch-up responses carry so
    /// a peer reaches the same tally independently.
    pub fn messages(&self) -> Vec<SignedMessage> {
        let mut out: Vec<SignedMessage> = self.votes.values().cloned().collect();
        for eq in self.equivocations.values() {
            out.push(eq.first.clone());
            out.push(eq.second.clone());
        }
        out
    }

    /// Cumulative weight of accepted voters whose target is `block` or a
    /// descendant of it.
    pub fn supporting_weight(
        &self,
        voter_set: &VoterSet,
        chain: &dyn ChainOracle,
        block: &BlockInfo,
    ) -> Weight {
        let mut sum = 0u64;
        for signed in self.votes.values() {
            if chain.is_equal_or_descendant(block, &signed.block_info()) {
                sum = sum.saturating_add(voter_set.weight_of(&signed.id).unwrap_or(0));
            }
        }
        sum
    }
}

/// Both tallies of a round plus the shared voter set and base.
#[derive(Clone, Debug)]
pub struct RoundTally {
    round_number: RoundNumber,
    voter_set: Arc<VoterSet>,
    base: BlockInfo,
    pub prevotes: VoteTally,
    pub precommits: VoteTally,
}

impl RoundTally {
    pub fn new(round_number: RoundNumber, voter_set: Arc<VoterSet>, base: BlockInfo) -> Self {
        Self {
            round_number,
            voter_set,
            base,
            prevotes: VoteTally::new(VoteKind::Prevote, round_number),
            precommits: VoteTally::new(VoteKind::Precommit, round_number),
        }
    }

    pub fn round_number(&self) -> RoundNumber {
        self.round_number
    }

    pub fn base(&self) -> BlockInfo {
        self.base
    }

    pub fn voter_set(&self) -> &Arc<VoterSet> {
        &self.voter_set
    }

    /// Route a pre-validated vote to the tally of its kind. Primary
    /// proposals carry no weight and are not tallied here.
    pub fn import(&mut self, signed: SignedMessage) -> VoteOutcome {
        match signed.kind() {
            VoteKind::Prevote => self.prevotes.import(&self.voter_set, signed),
            VoteKind::Precommit => self.precommits.import(&self.voter_set, signed),
            VoteKind::PrimaryPropose => VoteOutcome::Rejected(RejectReason::WrongKind),
        }
    }

    /// Candidate blocks: the base plus everything between the base and any
    /// accepted vote target of the given tally.
    fn candidates(&self, tally: &VoteTally, chain: &dyn ChainOracle) -> BTreeSet<BlockInfo> {
        let mut out: BTreeSet<BlockInfo> = BTreeSet::new();
        out.insert(self.base);
        for signed in tally.accepted() {
            let target = signed.block_info();
            if let Some(between) = chain.ancestry(&self.base, &target) {
                out.insert(target);
                out.extend(between);
            }
        }
        out
    }

    fn best_with_supermajority(
        &self,
        tally: &VoteTally,
        chain: &dyn ChainOracle,
        candidates: &BTreeSet<BlockInfo>,
    ) -> Result<Option<BlockInfo>, GhostError> {
        let threshold = self.voter_set.threshold();
        let mut best: Option<BlockInfo> = None;
        for block in candidates {
            if tally.supporting_weight(&self.voter_set, chain, block) < threshold {
                continue;
            }
            match best {
                Some(current) if current.number == block.number && current.hash != block.hash => {
                    return Err(GhostError::Ambiguous {
                        number: block.number,
                    });
                }
                Some(current) if current.number >= block.number => {}
                _ => best = Some(*block),
            }
        }
        Ok(best)
    }

    /// GRANDPA GHOST over prevotes: the highest-numbered block whose
    /// equal-or-descendant prevote weight reaches the supermajority
    /// threshold, or `None` while there is no such block yet.
    pub fn prevote_ghost(&self, chain: &dyn ChainOracle) -> Result<Option<BlockInfo>, GhostError> {
        let candidates = self.candidates(&self.prevotes, chain);
        self.best_with_supermajority(&self.prevotes, chain, &candidates)
    }

    /// Best finalizable block: the same rule over precommits, restricted to
    /// the prevote-ghost chain so it can never exceed the prevote ghost.
    pub fn best_final_candidate(
        &self,
        chain: &dyn ChainOracle,
    ) -> Result<Option<BlockInfo>, GhostError> {
        let Some(ghost) = self.prevote_ghost(chain)? else {
            return Ok(None);
        };
        self.best_with_supermajority(&self.precommits, chain, &self.ghost_chain(chain, &ghost))
    }

    /// Blocks from the base up to and including the prevote ghost.
    fn ghost_chain(&self, chain: &dyn ChainOracle, ghost: &BlockInfo) -> BTreeSet<BlockInfo> {
        let mut out: BTreeSet<BlockInfo> = BTreeSet::new();
        out.insert(self.base);
        out.insert(*ghost);
        if let Some(between) = chain.ancestry(&self.base, ghost) {
            out.extend(between);
        }
        out
    }

    /// Whether the round's outcome is settled: no voter who has not yet
    /// voted could push a strictly higher block past the threshold, either
    /// on the current ghost chain or by lifting the prevote ghost itself
    /// onto a descendant. Equivocators count as having spoken.
    pub fn is_completable(&self, chain: &dyn ChainOracle) -> Result<bool, GhostError> {
        let Some(ghost) = self.prevote_ghost(chain)? else {
            return Ok(false);
        };
        let best = self.best_final_candidate(chain)?;

        let threshold = self.voter_set.threshold();
        let total = self.voter_set.total_weight();
        let undecided_precommits =
            total.saturating_sub(self.precommits.participation_weight(&self.voter_set));
        let undecided_prevotes =
            total.saturating_sub(self.prevotes.participation_weight(&self.voter_set));

        // Candidates that could displace the current outcome: strictly above
        // the best final candidate, or anywhere on the ghost chain when
        // nothing is finalizable yet.
        let floor = best.map(|b| b.number);
        for block in self.ghost_chain(chain, &ghost) {
            if let Some(floor) = floor {
                if block.number <= floor {
                    continue;
                }
            }
            let support = self
                .precommits
                .supporting_weight(&self.voter_set, chain, &block);
            if support.saturating_add(undecided_precommits) >= threshold {
                return Ok(false);
            }
        }

        // The ghost itself is not fixed yet: voters who have not prevoted
        // can lift the prevote supermajority onto a strict descendant, and
        // the undecided precommit weight could then finalize it there. A
        // descendant only wins if both its prevote and its precommit weight
        // can still reach the threshold.
        for block in self.candidates_above(chain, &ghost) {
            let prevote_cap = self
                .prevotes
                .supporting_weight(&self.voter_set, chain, &block)
                .saturating_add(undecided_prevotes);
            let precommit_cap = self
                .precommits
                .supporting_weight(&self.voter_set, chain, &block)
                .saturating_add(undecided_precommits);
            if prevote_cap >= threshold && precommit_cap >= threshold {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Strict descendants of the ghost touched by any accepted vote. These
    /// are the only blocks the prevote ghost could still rise to: a block
    /// no vote has reached needs full supermajority prevote weight from
    /// scratch, which the existing ghost already rules out.
    fn candidates_above(
        &self,
        chain: &dyn ChainOracle,
        ghost: &BlockInfo,
    ) -> BTreeSet<BlockInfo> {
        let mut out = self.candidates(&self.prevotes, chain);
        out.extend(self.candidates(&self.precommits, chain));
        out.retain(|b| b.number > ghost.number && chain.is_equal_or_descendant(ghost, b));
        out
    }

    /// Immutable copy of both tallies, for catch-up responses. The engine
    /// takes it in one step so a response never observes a half-applied
    /// import.
    pub fn snapshot(&self) -> TallySnapshot {
        TallySnapshot {
            round_number: self.round_number,
            set_id: self.voter_set.set_id(),
            base: self.base,
            prevotes: self.prevotes.messages(),
            precommits: self.precommits.messages(),
        }
    }
}

/// Frozen view of a round's received votes.
#[derive(Clone, Debug)]
pub struct TallySnapshot {
    pub round_number: RoundNumber,
    pub set_id: u64,
    pub base: BlockInfo,
    pub prevotes: Vec<SignedMessage>,
    pub precommits: Vec<SignedMessage>,
}
