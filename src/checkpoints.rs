//! Hardened checkpoints

use std::collections::BTreeMap;

use crate::network::ConsensusParameters;
use crate::types::Hash;

pub trait CheckpointProvider: Send + Sync {
    /// False only when a checkpoint exists at `height` with a different hash.
    fn check_hardened(&self, height: u32, hash: &Hash) -> bool;

    /// Height of the highest checkpoint, `None` when there are none (or checkpoints are disabled).
    fn last_checkpoint_height(&self) -> Option<u32>;

    /// Lowest checkpoint at or above `height`.
    fn next_checkpoint(&self, height: u32) -> Option<(u32, Hash)>;
}

#[derive(Debug, Clone, Default)]
pub struct Checkpoints {
    entries: BTreeMap<u32, Hash>,
    enabled: bool,
}

impl Checkpoints {
    pub fn new(parameters: &ConsensusParameters, enabled: bool) -> Self {
        Checkpoints::from_entries(parameters.checkpoints.iter().copied(), enabled)
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (u32, Hash)>, enabled: bool) -> Self {
        Checkpoints { entries: entries.into_iter().collect(), enabled }
    }

    pub fn get(&self, height: u32) -> Option<&Hash> {
        if !self.enabled {
            return None;
        }
        self.entries.get(&height)
    }
}

impl CheckpointProvider for Checkpoints {
    fn check_hardened(&self, height: u32, hash: &Hash) -> bool {
        self.get(height).map_or(true, |expected| expected == hash)
    }

    fn last_checkpoint_height(&self) -> Option<u32> {
        if !self.enabled {
            return None;
        }
        self.entries.keys().next_back().copied()
    }

    fn next_checkpoint(&self, height: u32) -> Option<(u32, Hash)> {
        if !self.enabled {
            return None;
        }
        self.entries.range(height..).next().map(|(h, hash)| (*h, *hash))
    }
}
