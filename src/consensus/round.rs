//! Lifecycle of a single voting round.

use crate::chain::ChainOracle;
use crate::consensus::tally::{GhostError, RejectReason, RoundTally, VoteOutcome};
use crate::types::codec::signable_payload;
use crate::types::{
    BlockInfo, RoundNumber, Signature, SignedMessage, Vote, VoteKind, VoteMessage, VoterId,
    VoterSet,
};
use std::sync::Arc;
use tracing::debug;

/// Monotonic round phases. A phase is never revisited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Start,
    Proposing,
    Voting,
    Completable,
    Concluded,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RoundError {
    #[error("local node is not a member of the voter set")]
    NotVoter,
    #[error("local node is not the primary for this round")]
    NotPrimary,
    #[error("{0:?} already cast this round")]
    AlreadyCast(VoteKind),
    #[error("round is concluded")]
    Concluded,
}

/// Signing and verification, injected. Consensus never touches key
/// material; it only shapes the payload that gets signed.
pub struct RoundDeps {
    pub sign: Box<dyn Fn(&[u8]) -> Signature + Send>,
    pub verify: Box<dyn Fn(&[u8], &Signature, &VoterId) -> bool + Send>,
}

pub struct Round {
    tally: RoundTally,
    deps: RoundDeps,
    phase: Phase,
    /// None for pure observers.
    local_id: Option<VoterId>,
    primary: VoterId,
    /// Advisory proposal received from the primary, if any.
    primary_propose: Option<SignedMessage>,
    prevoted: bool,
    precommitted: bool,
    proposed: bool,
}

impl Round {
    pub fn new(
        round_number: RoundNumber,
        voter_set: Arc<VoterSet>,
        base: BlockInfo,
        local_id: Option<VoterId>,
        deps: RoundDeps,
    ) -> Self {
        // Deterministic primary: round number modulo set size, in canonical
        // voter order. Every honest node picks the same one.
        let index = (round_number % voter_set.len() as u64) as usize;
        let primary = voter_set
            .voter_at(index)
            .expect("voter set is never empty");
        Self {
            tally: RoundTally::new(round_number, voter_set, base),
            deps,
            phase: Phase::Start,
            local_id,
            primary,
            primary_propose: None,
            prevoted: false,
            precommitted: false,
            proposed: false,
        }
    }

    pub fn round_number(&self) -> RoundNumber {
        self.tally.round_number()
    }

    pub fn base(&self) -> BlockInfo {
        self.tally.base()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn primary_voter(&self) -> VoterId {
        self.primary
    }

    pub fn is_primary(&self) -> bool {
        self.local_id == Some(self.primary)
    }

    pub fn primary_propose(&self) -> Option<&SignedMessage> {
        self.primary_propose.as_ref()
    }

    pub fn tally(&self) -> &RoundTally {
        &self.tally
    }

    fn advance(&mut self, phase: Phase) {
        if phase > self.phase {
            debug!(round = self.round_number(), from = ?self.phase, to = ?phase, "round phase");
            self.phase = phase;
        }
    }

    pub fn start(&mut self) {
        self.advance(Phase::Proposing);
    }

    /// Leave the propose window. Called by the driver once the primary has
    /// proposed (or declined to); proposals are advisory and never block
    /// progress.
    pub fn begin_voting(&mut self) {
        self.advance(Phase::Voting);
    }

    fn sign_vote(&self, vote: Vote) -> SignedMessage {
        let id = self.local_id.expect("checked by callers");
        let payload = signable_payload(
            self.round_number(),
            self.tally.voter_set().set_id(),
            &vote,
        );
        SignedMessage {
            vote,
            signature: (self.deps.sign)(&payload),
            id,
        }
    }

    fn envelope(&self, message: SignedMessage) -> VoteMessage {
        VoteMessage {
            round_number: self.round_number(),
            set_id: self.tally.voter_set().set_id(),
            message,
        }
    }

    /// Broadcast-ready primary proposal. Only the primary may call this,
    /// and only once.
    pub fn cast_primary_propose(&mut self, target: BlockInfo) -> Result<VoteMessage, RoundError> {
        if self.phase == Phase::Concluded {
            return Err(RoundError::Concluded);
        }
        if !self.is_primary() {
            return Err(RoundError::NotPrimary);
        }
        if self.proposed {
            return Err(RoundError::AlreadyCast(VoteKind::PrimaryPropose));
        }
        self.proposed = true;
        let signed = self.sign_vote(Vote::PrimaryPropose(target));
        self.primary_propose = Some(signed.clone());
        Ok(self.envelope(signed))
    }

    /// Cast the local prevote. One-shot: a second call is a caller bug and
    /// comes back as an error rather than a second vote on the wire.
    pub fn cast_prevote(&mut self, target: BlockInfo) -> Result<VoteMessage, RoundError> {
        if self.phase == Phase::Concluded {
            return Err(RoundError::Concluded);
        }
        if self.local_id.map_or(true, |id| !self.tally.voter_set().contains(&id)) {
            return Err(RoundError::NotVoter);
        }
        if self.prevoted {
            return Err(RoundError::AlreadyCast(VoteKind::Prevote));
        }
        self.prevoted = true;
        self.advance(Phase::Voting);
        let signed = self.sign_vote(Vote::Prevote(target));
        self.tally.import(signed.clone());
        Ok(self.envelope(signed))
    }

    /// Cast the local precommit, after the prevote view stabilized or the
    /// round's prevote timer fired. One-shot like `cast_prevote`.
    pub fn cast_precommit(&mut self, target: BlockInfo) -> Result<VoteMessage, RoundError> {
        if self.phase == Phase::Concluded {
            return Err(RoundError::Concluded);
        }
        if self.local_id.map_or(true, |id| !self.tally.voter_set().contains(&id)) {
            return Err(RoundError::NotVoter);
        }
        if self.precommitted {
            return Err(RoundError::AlreadyCast(VoteKind::Precommit));
        }
        self.precommitted = true;
        let signed = self.sign_vote(Vote::Precommit(target));
        self.tally.import(signed.clone());
        Ok(self.envelope(signed))
    }

    /// Import a vote received from the network.
    ///
    /// Verification order matters: signature and ancestry checks run first
    /// (both may be slow external calls), then the in-memory tally update is
    /// applied in one step. Imports into a concluded round are no-ops.
    pub fn import_vote(&mut self, chain: &dyn ChainOracle, signed: SignedMessage) -> VoteOutcome {
        if self.phase == Phase::Concluded {
            return VoteOutcome::Duplicate;
        }

        let payload = signable_payload(
            self.round_number(),
            self.tally.voter_set().set_id(),
            &signed.vote,
        );
        if !(self.deps.verify)(&payload, &signed.signature, &signed.id) {
            return VoteOutcome::Rejected(RejectReason::BadSignature);
        }
        if !chain.is_equal_or_descendant(&self.base(), &signed.block_info()) {
            return VoteOutcome::Rejected(RejectReason::NotDescendantOfBase);
        }

        if signed.is(VoteKind::PrimaryPropose) {
            return self.import_primary_propose(signed);
        }
        self.tally.import(signed)
    }

    fn import_primary_propose(&mut self, signed: SignedMessage) -> VoteOutcome {
        if signed.id != self.primary {
            return VoteOutcome::Rejected(RejectReason::UnknownVoter);
        }
        // Only the first proposal is kept; it is advisory, so a conflicting
        // second one is dropped rather than treated as an equivocation.
        match &self.primary_propose {
            Some(_) => VoteOutcome::Duplicate,
            None => {
                self.primary_propose = Some(signed);
                VoteOutcome::Accepted
            }
        }
    }

    /// Re-evaluate completability after imports. The phase only ever moves
    /// forward; a completable round keeps accepting votes (they strengthen
    /// the eventual justification) but its outcome is already settled.
    pub fn update_phase(&mut self, chain: &dyn ChainOracle) -> Result<Phase, GhostError> {
        if self.phase >= Phase::Completable {
            return Ok(self.phase);
        }
        if self.tally.is_completable(chain)? {
            self.advance(Phase::Completable);
        }
        Ok(self.phase)
    }

    /// Retire the round. After this every import is a no-op.
    pub fn set_concluded(&mut self) {
        self.advance(Phase::Concluded);
    }
}
