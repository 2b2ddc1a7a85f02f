use serde::{Deserialize, Serialize};

/// Round timing configuration.
///
/// The engine never blocks on a round forever: when the round timer fires
/// the next round starts from the best outcome seen so far.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundTimings {
    /// How long to wait for a prevote supermajority before precommitting
    /// to the best view available.
    #[serde(default = "default_prevote_ms")]
    pub prevote_timeout_ms: u64,
    /// How long to wait for the precommit outcome before giving up on
    /// concluding this round.
    #[serde(default = "default_precommit_ms")]
    pub precommit_timeout_ms: u64,
    /// Hard cap on a whole round; after this the next round starts anyway.
    #[serde(default = "default_round_ms")]
    pub round_timeout_ms: u64,
}

fn default_prevote_ms() -> u64 {
    1000
}
fn default_precommit_ms() -> u64 {
    1000
}
fn default_round_ms() -> u64 {
    6000
}

impl Default for RoundTimings {
    fn default() -> Self {
        Self {
            prevote_timeout_ms: default_prevote_ms(),
            precommit_timeout_ms: default_precommit_ms(),
            round_timeout_ms: default_round_ms(),
        }
    }
}
