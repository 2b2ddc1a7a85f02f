//! Broadcastable finality announcements and the catch-up protocol.

use crate::chain::ChainOracle;
use crate::consensus::tally::{RoundTally, TallySnapshot};
use crate::justification::{GrandpaJustification, JustificationError};
use crate::types::{
    BlockInfo, BlockNumber, Hash, RoundNumber, Signature, SignedMessage, Vote, VoterId,
    VoterSetId,
};
use serde::{Deserialize, Serialize};

/// A finality announcement: the finalized target plus its proof.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    pub vote: BlockInfo,
    pub justification: GrandpaJustification,
}

impl Commit {
    /// Aggregate a concluded round's precommits.
    pub fn build(tally: &RoundTally, chain: &dyn ChainOracle) -> Result<Self, JustificationError> {
        let justification = GrandpaJustification::build(tally, chain)?;
        Ok(Self {
            vote: justification.block_info,
            justification,
        })
    }

    /// Compact wire form. Ancestry headers are dropped; receivers bridge
    /// targets from their own chain. Precommit targets and auth data stay
    /// in input order, index-aligned.
    pub fn to_message(&self) -> CommitMessage {
        let mut precommits = Vec::with_capacity(self.justification.items.len());
        let mut auth_data = Vec::with_capacity(self.justification.items.len());
        for signed in &self.justification.items {
            precommits.push(signed.block_info());
            auth_data.push((signed.signature, signed.id));
        }
        CommitMessage {
            round_number: self.justification.round_number,
            compact: CompactCommit {
                target_hash: self.vote.hash,
                target_number: self.vote.number,
                precommits,
                auth_data,
            },
        }
    }
}

/// Commit with the per-precommit repetition stripped out.
///
/// `precommits[i]` and `auth_data[i]` describe the same precommit; the two
/// sequences must never be reordered independently.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactCommit {
    pub target_hash: Hash,
    pub target_number: BlockNumber,
    pub precommits: Vec<BlockInfo>,
    pub auth_data: Vec<(Signature, VoterId)>,
}

/// The gossiped form: a compact commit plus the round it came from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMessage {
    pub round_number: RoundNumber,
    pub compact: CompactCommit,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CommitError {
    #[error("precommit and auth data sequences differ in length")]
    LengthMismatch,
}

impl CommitMessage {
    /// Rebuild the full commit. The justification comes back without
    /// ancestry headers ([`GrandpaJustification::with_local_ancestry`]
    /// restores them from a local oracle before verification).
    pub fn expand(&self) -> Result<Commit, CommitError> {
        let c = &self.compact;
        if c.precommits.len() != c.auth_data.len() {
            return Err(CommitError::LengthMismatch);
        }
        let items = c
            .precommits
            .iter()
            .zip(&c.auth_data)
            .map(|(target, (signature, id))| SignedMessage {
                vote: Vote::Precommit(*target),
                signature: *signature,
                id: *id,
            })
            .collect();
        let vote = BlockInfo::new(c.target_number, c.target_hash);
        Ok(Commit {
            vote,
            justification: GrandpaJustification {
                round_number: self.round_number,
                block_info: vote,
                items,
                votes_ancestries: Vec::new(),
            },
        })
    }
}

/// Ask a peer for the full vote state of a round under a voter-set version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatchUpRequest {
    pub round_number: RoundNumber,
    pub set_id: VoterSetId,
}

/// Everything a lagging node needs to recompute a round for itself: the
/// complete received prevote and precommit sets, not the derived results.
/// The requester replays these through its own tally and reaches the same
/// candidates independently.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatchUpResponse {
    pub set_id: VoterSetId,
    pub round_number: RoundNumber,
    pub base: BlockInfo,
    pub prevotes: Vec<SignedMessage>,
    pub precommits: Vec<SignedMessage>,
}

impl CatchUpResponse {
    pub fn from_snapshot(snapshot: TallySnapshot) -> Self {
        Self {
            set_id: snapshot.set_id,
            round_number: snapshot.round_number,
            base: snapshot.base,
            prevotes: snapshot.prevotes,
            precommits: snapshot.precommits,
        }
    }
}
