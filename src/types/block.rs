use crate::crypto::hash::sha256;
use crate::types::Hash;
use serde::{Deserialize, Serialize};

pub type BlockNumber = u64;

/// A block reference: number plus hash.
///
/// Ordered by number first. Two distinct blocks at the same number are on
/// different branches; resolving their relationship needs the chain oracle.
/// The hash tie-break exists only to keep containers deterministic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockInfo {
    pub number: BlockNumber,
    pub hash: Hash,
}

impl BlockInfo {
    pub fn new(number: BlockNumber, hash: Hash) -> Self {
        Self { number, hash }
    }
}

impl std::fmt::Display for BlockInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} ({})", self.number, self.hash)
    }
}

/// Minimal header carried in justification ancestries.
/// Its identity is the sha256 of its canonical encoding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub parent_hash: Hash,
    pub number: BlockNumber,
    pub state_root: Hash,
}

impl BlockHeader {
    pub fn hash(&self) -> Hash {
        sha256(&crate::types::codec::encode_header(self))
    }

    pub fn info(&self) -> BlockInfo {
        BlockInfo::new(self.number, self.hash())
    }
}
