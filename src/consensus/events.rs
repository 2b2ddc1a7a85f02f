use crate::commit::{CatchUpRequest, CatchUpResponse, CommitMessage};
use crate::justification::GrandpaJustification;
use crate::types::{BlockInfo, Equivocation, RoundNumber, VoteMessage};

/// Inbound events for the voter engine. Delivery order across sources is
/// arbitrary; the engine loop is the serialization point.
#[derive(Clone, Debug)]
pub enum EngineEvent {
    // From the network
    VoteReceived(VoteMessage),
    CommitReceived(CommitMessage),
    CatchUpRequested(CatchUpRequest),
    CatchUpResponseReceived(CatchUpResponse),

    // From timers
    Timeout { round: RoundNumber, kind: TimeoutKind },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeoutKind {
    /// Prevote view did not stabilize; precommit to the best view we have.
    Prevote,
    /// Precommit outcome still open; keep collecting but note the delay.
    Precommit,
    /// Whole-round budget spent; move on to the next round.
    Round,
}

/// Outbound commands. The embedder owns transport, timers, storage and
/// misbehavior reporting; the engine only says what should happen.
#[derive(Clone, Debug)]
pub enum EngineCommand {
    BroadcastVote(VoteMessage),
    BroadcastCommit(CommitMessage),
    SendCatchUpResponse(CatchUpResponse),

    ScheduleTimeout {
        round: RoundNumber,
        kind: TimeoutKind,
        duration_ms: u64,
    },

    /// Accountable double-vote evidence, ready for an external reporter.
    ReportEquivocation(Equivocation),

    /// A block became irreversibly final, with its proof for persistence.
    Finalized {
        round: RoundNumber,
        block: BlockInfo,
        justification: GrandpaJustification,
    },
}
