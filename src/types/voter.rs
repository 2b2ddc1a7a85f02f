use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VoterId(pub [u8; 32]);

pub type Weight = u64;

/// Version number of a voter set. Incremented by the authority-set change
/// logic outside this crate; never reused.
pub type VoterSetId = u64;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum VoterSetError {
    #[error("voter set must not be empty")]
    Empty,
    #[error("voter weight must be at least 1")]
    ZeroWeight,
    #[error("duplicate voter id")]
    DuplicateVoter,
}

/// Immutable weighted roster of voters, valid for one set id.
///
/// An authority-set change produces a whole new `VoterSet` with an
/// incremented id; rounds keep a shared reference to the set they started
/// under until they are retired.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VoterSet {
    // Deterministic iteration order, no HashMap.
    voters: BTreeMap<VoterId, Weight>,
    total_weight: Weight,
    set_id: VoterSetId,
}

impl VoterSet {
    pub fn new(voters: Vec<(VoterId, Weight)>, set_id: VoterSetId) -> Result<Self, VoterSetError> {
        if voters.is_empty() {
            return Err(VoterSetError::Empty);
        }
        let mut map = BTreeMap::new();
        let mut total = 0u64;
        for (id, weight) in voters {
            if weight == 0 {
                return Err(VoterSetError::ZeroWeight);
            }
            if map.insert(id, weight).is_some() {
                return Err(VoterSetError::DuplicateVoter);
            }
            total = total.saturating_add(weight);
        }
        Ok(Self {
            voters: map,
            total_weight: total,
            set_id,
        })
    }

    pub fn set_id(&self) -> VoterSetId {
        self.set_id
    }

    pub fn total_weight(&self) -> Weight {
        self.total_weight
    }

    /// Supermajority threshold: strictly more than two thirds of total weight.
    pub fn threshold(&self) -> Weight {
        (self.total_weight.saturating_mul(2) / 3).saturating_add(1)
    }

    /// None for ids outside the set. Callers treat unknown voters as
    /// non-counting, not as an abort.
    pub fn weight_of(&self, id: &VoterId) -> Option<Weight> {
        self.voters.get(id).copied()
    }

    pub fn contains(&self, id: &VoterId) -> bool {
        self.voters.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.voters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voters.is_empty()
    }

    /// Voter at a position in the canonical (sorted) order.
    pub fn voter_at(&self, index: usize) -> Option<VoterId> {
        self.voters.keys().nth(index).copied()
    }

    pub fn ids_in_order(&self) -> impl Iterator<Item = &VoterId> {
        self.voters.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VoterId, &Weight)> {
        self.voters.iter()
    }
}
