pub mod engine;
pub mod events;
pub mod round;
pub mod tally;

pub use engine::{CatchUpError, SignFn, VerifyFn, VoterEngine};
pub use events::{EngineCommand, EngineEvent, TimeoutKind};
pub use round::{Phase, Round, RoundDeps, RoundError};
pub use tally::{GhostError, RejectReason, RoundTally, TallySnapshot, VoteOutcome, VoteTally};
