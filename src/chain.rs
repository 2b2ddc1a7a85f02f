//! Ancestry queries consumed by the tally and justification logic.
//!
//! Block storage itself lives outside this crate; the voting code only needs
//! to ask whether one block descends from another and to walk header chains.

use crate::types::{BlockHeader, BlockInfo, Hash};
use std::collections::BTreeMap;

pub trait ChainOracle {
    /// Whether `block` is `base` itself or a descendant of `base`.
    fn is_equal_or_descendant(&self, base: &BlockInfo, block: &BlockInfo) -> bool;

    /// Blocks strictly between `base` and `block`, ordered child-to-parent.
    /// `None` if `block` does not descend from `base`.
    fn ancestry(&self, base: &BlockInfo, block: &BlockInfo) -> Option<Vec<BlockInfo>>;

    fn header(&self, hash: &Hash) -> Option<BlockHeader>;

    /// Highest-numbered block on the oracle's best chain that is `block` or
    /// one of its descendants.
    fn best_containing(&self, block: &BlockInfo) -> Option<BlockInfo>;
}

/// In-memory header chain keyed by header hash. Deterministic iteration,
/// no eviction; the embedder prunes when rounds are retired.
#[derive(Clone, Debug, Default)]
pub struct HeaderChain {
    headers: BTreeMap<Hash, BlockHeader>,
    genesis: Option<BlockInfo>,
}

impl HeaderChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a genesis block with no parent.
    pub fn insert_genesis(&mut self, header: BlockHeader) -> BlockInfo {
        let info = header.info();
        self.headers.insert(info.hash, header);
        self.genesis = Some(info);
        info
    }

    /// Insert a header whose parent is already known. Returns `None` when
    /// the parent is missing or the number does not follow it.
    pub fn insert(&mut self, header: BlockHeader) -> Option<BlockInfo> {
        let parent = self.headers.get(&header.parent_hash)?;
        if header.number != parent.number.saturating_add(1) {
            return None;
        }
        let info = header.info();
        self.headers.insert(info.hash, header);
        Some(info)
    }

    fn parent_of(&self, info: &BlockInfo) -> Option<BlockInfo> {
        let header = self.headers.get(&info.hash)?;
        if Some(*info) == self.genesis {
            return None;
        }
        let parent = self.headers.get(&header.parent_hash)?;
        Some(parent.info())
    }

    fn leaves(&self) -> Vec<BlockInfo> {
        let parents: std::collections::BTreeSet<Hash> =
            self.headers.values().map(|h| h.parent_hash).collect();
        self.headers
            .values()
            .map(|h| h.info())
            .filter(|info| !parents.contains(&info.hash))
            .collect()
    }
}

impl ChainOracle for HeaderChain {
    fn is_equal_or_descendant(&self, base: &BlockInfo, block: &BlockInfo) -> bool {
        if base == block {
            return true;
        }
        let mut cursor = *block;
        while cursor.number > base.number {
            match self.parent_of(&cursor) {
                Some(parent) => cursor = parent,
                None => return false,
            }
        }
        cursor == *base
    }

    fn ancestry(&self, base: &BlockInfo, block: &BlockInfo) -> Option<Vec<BlockInfo>> {
        let mut out = Vec::new();
        let mut cursor = *block;
        while cursor.number > base.number {
            let parent = self.parent_of(&cursor)?;
            if parent.number > base.number {
                out.push(parent);
            }
            cursor = parent;
        }
        (cursor == *base || *block == *base).then_some(out)
    }

    fn header(&self, hash: &Hash) -> Option<BlockHeader> {
        self.headers.get(hash).cloned()
    }

    fn best_containing(&self, block: &BlockInfo) -> Option<BlockInfo> {
        self.leaves()
            .into_iter()
            .filter(|leaf| self.is_equal_or_descendant(block, leaf))
            .max_by_key(|leaf| (leaf.number, leaf.hash))
    }
}
