//! A round-based BFT finality gadget.
//!
//! A weighted voter set runs numbered voting rounds on top of a
//! probabilistically-final block tree. Each round collects prevotes and
//! precommits, detects double votes, and derives the highest block with
//! supermajority support. A concluded round yields a portable
//! justification any third party can verify against the voter set alone,
//! and a compact commit for broadcast. Lagging nodes reconstruct round
//! state through the catch-up exchange.
//!
//! Block storage, networking, key management and the surrounding node are
//! external: the engine consumes a [`chain::ChainOracle`], injected
//! signing callbacks, and channels of events and commands.

pub mod chain;
pub mod commit;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod justification;
pub mod types;
