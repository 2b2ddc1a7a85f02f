//! The voter engine: sequences rounds, casts the local votes, and answers
//! commit and catch-up traffic.
//!
//! One engine thread owns all round state. Every vote import flows through
//! `process_event`, which makes concurrent network deliveries race-free
//! without a lock held across signature or ancestry checks: those happen
//! inside the import path before the tally is touched, all on this thread.

use crate::chain::ChainOracle;
use crate::commit::{CatchUpRequest, CatchUpResponse, Commit, CommitMessage};
use crate::config::RoundTimings;
use crate::consensus::events::{EngineCommand, EngineEvent, TimeoutKind};
use crate::consensus::round::{Phase, Round, RoundDeps};
use crate::consensus::tally::{GhostError, VoteOutcome};
use crate::justification::JustificationError;
use crate::types::{
    BlockInfo, RoundNumber, Signature, VoteMessage, VoterId, VoterSet,
};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub type SignFn = Arc<dyn Fn(&[u8]) -> Signature + Send + Sync>;
pub type VerifyFn = Arc<dyn Fn(&[u8], &Signature, &VoterId) -> bool + Send + Sync>;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CatchUpError {
    #[error("voter set {requested} is not the active set {active}")]
    UnknownVoterSet { requested: u64, active: u64 },
    #[error("round {0} is no longer held")]
    RoundUnavailable(RoundNumber),
}

pub struct VoterEngine<C: ChainOracle> {
    cfg: RoundTimings,
    chain: C,
    voter_set: Arc<VoterSet>,
    local_id: Option<VoterId>,
    sign: SignFn,
    verify: VerifyFn,

    /// The round currently being voted, and its predecessor, which may
    /// still be collecting signatures for its justification. Older rounds
    /// are gone; catch-up serves only these two.
    current: Round,
    previous: Option<Round>,

    rx: Receiver<EngineEvent>,
    tx_cmd: Sender<EngineCommand>,
}

impl<C: ChainOracle> VoterEngine<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: RoundTimings,
        chain: C,
        voter_set: Arc<VoterSet>,
        local_id: Option<VoterId>,
        sign: SignFn,
        verify: VerifyFn,
        start_round: RoundNumber,
        base: BlockInfo,
        rx: Receiver<EngineEvent>,
        tx_cmd: Sender<EngineCommand>,
    ) -> Self {
        let deps = make_deps(&sign, &verify);
        let current = Round::new(start_round, voter_set.clone(), base, local_id, deps);
        Self {
            cfg,
            chain,
            voter_set,
            local_id,
            sign,
            verify,
            current,
            previous: None,
            rx,
            tx_cmd,
        }
    }

    /// Kick off the first round. Embedders driving `process_event`
    /// themselves call this once instead of `run`.
    pub fn start(&mut self) {
        self.enter_round();
    }

    /// Run until the event channel closes or an internal invariant breaks.
    /// A `GhostError` is unsound state; the gadget halts rather than
    /// finalizing on top of it.
    pub fn run(mut self) -> Result<(), GhostError> {
        self.start();

        loop {
            let ev = match self.rx.recv() {
                Ok(ev) => ev,
                Err(_) => return Ok(()),
            };
            self.process_event(ev)?;

            // Drain whatever else arrived without blocking.
            while let Ok(ev) = self.rx.try_recv() {
                self.process_event(ev)?;
            }
        }
    }

    pub fn process_event(&mut self, ev: EngineEvent) -> Result<(), GhostError> {
        match ev {
            EngineEvent::VoteReceived(vm) => self.handle_vote(vm),
            EngineEvent::CommitReceived(cm) => {
                self.handle_commit(cm);
                Ok(())
            }
            EngineEvent::CatchUpRequested(req) => {
                self.handle_catch_up_request(req);
                Ok(())
            }
            EngineEvent::CatchUpResponseReceived(resp) => self.handle_catch_up_response(resp),
            EngineEvent::Timeout { round, kind } => self.handle_timeout(round, kind),
        }
    }

    pub fn current_round(&self) -> &Round {
        &self.current
    }

    // -------------------------------------------------------
    // Round sequencing
    // -------------------------------------------------------

    fn enter_round(&mut self) {
        let round = self.current.round_number();
        let base = self.current.base();
        info!(round, %base, "entering round");

        self.current.start();

        for (kind, duration_ms) in [
            (TimeoutKind::Prevote, self.cfg.prevote_timeout_ms),
            (TimeoutKind::Precommit, self.cfg.precommit_timeout_ms),
            (TimeoutKind::Round, self.cfg.round_timeout_ms),
        ] {
            self.tx_cmd
                .send(EngineCommand::ScheduleTimeout {
                    round,
                    kind,
                    duration_ms,
                })
                .ok();
        }

        // The primary proposes the best block it knows of on top of the
        // base; purely advisory.
        if self.current.is_primary() {
            let target = self.chain.best_containing(&base).unwrap_or(base);
            if let Ok(vm) = self.current.cast_primary_propose(target) {
                self.tx_cmd.send(EngineCommand::BroadcastVote(vm)).ok();
            }
        }
        self.current.begin_voting();

        self.cast_prevote();
    }

    fn cast_prevote(&mut self) {
        if self.local_id.is_none() {
            return;
        }
        // Prefer the primary's proposal when it sits on a chain we agree
        // extends the base; otherwise vote our own best chain.
        let base = self.current.base();
        let target = self
            .current
            .primary_propose()
            .map(|p| p.block_info())
            .filter(|t| self.chain.is_equal_or_descendant(&base, t))
            .or_else(|| self.chain.best_containing(&base))
            .unwrap_or(base);
        match self.current.cast_prevote(target) {
            Ok(vm) => {
                self.tx_cmd.send(EngineCommand::BroadcastVote(vm)).ok();
            }
            Err(e) => debug!(round = self.current.round_number(), %e, "prevote not cast"),
        }
    }

    /// Precommit once our prevote view produced a ghost, or on prevote
    /// timeout with whatever we have.
    fn maybe_cast_precommit(&mut self, force: bool) -> Result<(), GhostError> {
        if self.local_id.is_none() || self.current.phase() >= Phase::Concluded {
            return Ok(());
        }
        let ghost = self.current.tally().prevote_ghost(&self.chain)?;
        let target = match (ghost, force) {
            (Some(g), _) => g,
            (None, true) => self.current.base(),
            (None, false) => return Ok(()),
        };
        if let Ok(vm) = self.current.cast_precommit(target) {
            self.tx_cmd.send(EngineCommand::BroadcastVote(vm)).ok();
        }
        Ok(())
    }

    /// Conclude the current round if its outcome is settled, announce the
    /// finalized block and move on.
    fn try_conclude(&mut self) -> Result<(), GhostError> {
        if self.current.update_phase(&self.chain)? != Phase::Completable {
            return Ok(());
        }
        let commit = match Commit::build(self.current.tally(), &self.chain) {
            Ok(commit) => commit,
            // Settled on "nothing finalizable"; the round timer will move
            // us along.
            Err(JustificationError::NothingFinalizable) => return Ok(()),
            Err(JustificationError::Ghost(e)) => return Err(e),
            Err(e) => {
                warn!(round = self.current.round_number(), %e, "cannot build justification yet");
                return Ok(());
            }
        };

        let round = self.current.round_number();
        info!(round, block = %commit.vote, "round concluded");
        self.tx_cmd
            .send(EngineCommand::Finalized {
                round,
                block: commit.vote,
                justification: commit.justification.clone(),
            })
            .ok();
        self.tx_cmd
            .send(EngineCommand::BroadcastCommit(commit.to_message()))
            .ok();

        self.current.set_concluded();
        self.next_round(commit.vote);
        Ok(())
    }

    fn next_round(&mut self, base: BlockInfo) {
        let deps = make_deps(&self.sign, &self.verify);
        let next = Round::new(
            self.current.round_number() + 1,
            self.voter_set.clone(),
            base,
            self.local_id,
            deps,
        );
        self.previous = Some(std::mem::replace(&mut self.current, next));
        self.enter_round();
    }

    // -------------------------------------------------------
    // Event handlers
    // -------------------------------------------------------

    fn handle_vote(&mut self, vm: VoteMessage) -> Result<(), GhostError> {
        if vm.set_id != self.voter_set.set_id() {
            debug!(set_id = vm.set_id, "vote for unknown voter set, dropping");
            return Ok(());
        }

        let current_number = self.current.round_number();
        let round = if vm.round_number == current_number {
            &mut self.current
        } else if Some(vm.round_number) == self.previous.as_ref().map(|r| r.round_number()) {
            self.previous.as_mut().expect("checked above")
        } else {
            debug!(round = vm.round_number, "vote for a round we do not hold");
            return Ok(());
        };

        match round.import_vote(&self.chain, vm.message) {
            VoteOutcome::Accepted => {}
            VoteOutcome::Duplicate => return Ok(()),
            VoteOutcome::Equivocated(proof) => {
                warn!(round = proof.round, voter = ?proof.id, "equivocation detected");
                self.tx_cmd
                    .send(EngineCommand::ReportEquivocation(*proof))
                    .ok();
            }
            VoteOutcome::Rejected(reason) => {
                debug!(round = vm.round_number, ?reason, "vote rejected");
                return Ok(());
            }
        }

        if vm.round_number == current_number {
            self.maybe_cast_precommit(false)?;
            self.try_conclude()?;
        }
        Ok(())
    }

    fn handle_timeout(&mut self, round: RoundNumber, kind: TimeoutKind) -> Result<(), GhostError> {
        if round != self.current.round_number() {
            return Ok(());
        }
        match kind {
            TimeoutKind::Prevote => self.maybe_cast_precommit(true),
            TimeoutKind::Precommit => {
                debug!(round, "precommit outcome still open");
                self.try_conclude()
            }
            TimeoutKind::Round => {
                // Give up on this round; the next one starts from the best
                // final candidate we saw, or the same base.
                let base = self
                    .current
                    .tally()
                    .best_final_candidate(&self.chain)?
                    .unwrap_or_else(|| self.current.base());
                warn!(round, next_base = %base, "round timed out, moving on");
                self.next_round(base);
                Ok(())
            }
        }
    }

    fn handle_commit(&mut self, cm: CommitMessage) {
        let commit = match cm.expand() {
            Ok(commit) => commit,
            Err(e) => {
                warn!(round = cm.round_number, %e, "malformed commit, dropping");
                return;
            }
        };
        let justification = commit.justification.with_local_ancestry(&self.chain);
        let verify = self.verify.clone();
        match justification.verify(&self.voter_set, &move |p, s, id| verify(p, s, id)) {
            Ok(weight) => {
                debug!(round = cm.round_number, block = %commit.vote, weight, "commit verified");
                self.tx_cmd
                    .send(EngineCommand::Finalized {
                        round: cm.round_number,
                        block: commit.vote,
                        justification,
                    })
                    .ok();
            }
            Err(e) => {
                // Discard; peer penalties are the embedder's business.
                warn!(round = cm.round_number, %e, "invalid commit, dropping");
            }
        }
    }

    /// Pure catch-up answering, exposed for the embedder as well.
    pub fn answer_catch_up(&self, req: &CatchUpRequest) -> Result<CatchUpResponse, CatchUpError> {
        if req.set_id != self.voter_set.set_id() {
            return Err(CatchUpError::UnknownVoterSet {
                requested: req.set_id,
                active: self.voter_set.set_id(),
            });
        }
        let round = if req.round_number == self.current.round_number() {
            &self.current
        } else if Some(req.round_number) == self.previous.as_ref().map(|r| r.round_number()) {
            self.previous.as_ref().expect("checked above")
        } else {
            return Err(CatchUpError::RoundUnavailable(req.round_number));
        };
        Ok(CatchUpResponse::from_snapshot(round.tally().snapshot()))
    }

    fn handle_catch_up_request(&mut self, req: CatchUpRequest) {
        match self.answer_catch_up(&req) {
            Ok(resp) => {
                self.tx_cmd
                    .send(EngineCommand::SendCatchUpResponse(resp))
                    .ok();
            }
            Err(e) => debug!(round = req.round_number, %e, "catch-up request not served"),
        }
    }

    /// Replay a peer's vote state for a round ahead of ours and jump to it.
    /// Every message goes through full import validation; we trust nothing
    /// derived.
    fn handle_catch_up_response(&mut self, resp: CatchUpResponse) -> Result<(), GhostError> {
        if resp.set_id != self.voter_set.set_id() {
            debug!(set_id = resp.set_id, "catch-up for unknown voter set, dropping");
            return Ok(());
        }
        if resp.round_number <= self.current.round_number() {
            return Ok(());
        }

        let deps = make_deps(&self.sign, &self.verify);
        let mut replayed = Round::new(
            resp.round_number,
            self.voter_set.clone(),
            resp.base,
            self.local_id,
            deps,
        );
        replayed.start();
        replayed.begin_voting();
        for signed in resp.prevotes.into_iter().chain(resp.precommits) {
            // Double votes inside the replayed set are evidence like any
            // other; don't swallow them just because they arrived bundled.
            if let VoteOutcome::Equivocated(proof) = replayed.import_vote(&self.chain, signed) {
                warn!(round = proof.round, voter = ?proof.id, "equivocation detected");
                self.tx_cmd
                    .send(EngineCommand::ReportEquivocation(*proof))
                    .ok();
            }
        }

        let base = replayed
            .tally()
            .best_final_candidate(&self.chain)?
            .unwrap_or(resp.base);
        info!(round = resp.round_number, next_base = %base, "caught up");

        self.previous = Some(replayed);
        let deps = make_deps(&self.sign, &self.verify);
        self.current = Round::new(
            resp.round_number + 1,
            self.voter_set.clone(),
            base,
            self.local_id,
            deps,
        );
        self.enter_round();
        Ok(())
    }
}

fn make_deps(sign: &SignFn, verify: &VerifyFn) -> RoundDeps {
    let sign = sign.clone();
    let verify = verify.clone();
    RoundDeps {
        sign: Box::new(move |payload| sign(payload)),
        verify: Box::new(move |payload, sig, id| verify(payload, sig, id)),
    }
}
