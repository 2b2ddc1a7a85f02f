pub mod block;
pub mod codec;
pub mod hash;
pub mod vote;
pub mod voter;

pub use block::{BlockHeader, BlockInfo, BlockNumber};
pub use hash::Hash;
pub use vote::{
    Equivocation, RoundNumber, Signature, SignedMessage, Vote, VoteKind, VoteMessage,
};
pub use voter::{VoterId, VoterSet, VoterSetError, VoterSetId, Weight};
