use crate::types::{BlockInfo, BlockNumber, Hash, VoterId, VoterSetId};
use serde::{Deserialize, Serialize};

pub type RoundNumber = u64;

/// Ed25519 signature bytes. Produced and checked by the injected
/// signer/verifier; this crate only shapes the signed payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "serde_bytes")] pub [u8; 64]);

impl Signature {
    pub const ZERO: Signature = Signature([0u8; 64]);
}

/// Discriminant order is part of the wire format and must never change:
/// Prevote = 0, Precommit = 1, PrimaryPropose = 2.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VoteKind {
    Prevote,
    Precommit,
    PrimaryPropose,
}

/// A vote for a block, tagged by phase. Closed sum type; every accessor
/// matches exhaustively so adding a variant is a compile error everywhere.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Vote {
    Prevote(BlockInfo),
    Precommit(BlockInfo),
    PrimaryPropose(BlockInfo),
}

impl Vote {
    pub fn kind(&self) -> VoteKind {
        match self {
            Vote::Prevote(_) => VoteKind::Prevote,
            Vote::Precommit(_) => VoteKind::Precommit,
            Vote::PrimaryPropose(_) => VoteKind::PrimaryPropose,
        }
    }

    pub fn block_info(&self) -> BlockInfo {
        match self {
            Vote::Prevote(b) | Vote::Precommit(b) | Vote::PrimaryPropose(b) => *b,
        }
    }

    pub fn block_number(&self) -> BlockNumber {
        self.block_info().number
    }

    pub fn block_hash(&self) -> Hash {
        self.block_info().hash
    }
}

/// A vote with the signature and identity of the voter that cast it.
/// Equality is structural over all three fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMessage {
    pub vote: Vote,
    pub signature: Signature,
    pub id: VoterId,
}

impl SignedMessage {
    pub fn kind(&self) -> VoteKind {
        self.vote.kind()
    }

    pub fn is(&self, kind: VoteKind) -> bool {
        self.vote.kind() == kind
    }

    pub fn block_info(&self) -> BlockInfo {
        self.vote.block_info()
    }

    pub fn block_number(&self) -> BlockNumber {
        self.vote.block_number()
    }

    pub fn block_hash(&self) -> Hash {
        self.vote.block_hash()
    }
}

/// Proof that a voter cast two conflicting votes of the same kind in the
/// same round. Portable: anyone holding the voter set can check both
/// signatures and see the differing targets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equivocation {
    pub round: RoundNumber,
    pub id: VoterId,
    pub first: SignedMessage,
    pub second: SignedMessage,
}

impl Equivocation {
    /// Both messages must come from `id`, carry the same vote kind, and
    /// target different blocks.
    pub fn new(
        round: RoundNumber,
        id: VoterId,
        first: SignedMessage,
        second: SignedMessage,
    ) -> Option<Self> {
        if first.id != id || second.id != id {
            return None;
        }
        if first.kind() != second.kind() {
            return None;
        }
        if first.block_info() == second.block_info() {
            return None;
        }
        Some(Self {
            round,
            id,
            first,
            second,
        })
    }

    pub fn kind(&self) -> VoteKind {
        self.first.kind()
    }
}

/// Gossip envelope for a single vote: round and voter-set version travel
/// with the message so receivers can route and replay-check it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteMessage {
    pub round_number: RoundNumber,
    pub set_id: VoterSetId,
    pub message: SignedMessage,
}

impl VoteMessage {
    pub fn id(&self) -> VoterId {
        self.message.id
    }
}
