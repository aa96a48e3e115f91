use std::collections::HashMap;

use log::debug;
use parking_lot::RwLock;

use super::{CoinView, CoinViewBatch, FetchCoinsResponse, RewindData, UnspentOutputs};
use crate::error::CoinViewError;
use crate::types::*;

struct MemoryState {
    tip: Hash,
    coins: HashMap<Hash, UnspentOutputs>,
    rewind: Vec<RewindData>,
}

/// In-memory coin view.
pub struct MemoryCoinView {
    state: RwLock<MemoryState>,
}

impl MemoryCoinView {
    /// Empty view positioned at `genesis_hash`.
    pub fn new(genesis_hash: Hash) -> Self {
        MemoryCoinView {
            state: RwLock::new(MemoryState { tip: genesis_hash, coins: HashMap::new(), rewind: Vec::new() }),
        }
    }

    /// Number of transactions with unspent outputs.
    pub fn len(&self) -> usize {
        self.state.read().coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().coins.is_empty()
    }

    /// Number of blocks that can be rewound.
    pub fn rewind_depth(&self) -> usize {
        self.state.read().rewind.len()
    }
}

impl CoinView for MemoryCoinView {
    fn get_tip_hash(&self) -> Result<Hash, CoinViewError> {
        Ok(self.state.read().tip)
    }

    fn fetch_coins(&self, transaction_ids: &[Hash]) -> Result<FetchCoinsResponse, CoinViewError> {
        let state = self.state.read();
        let unspent_outputs = transaction_ids.iter().map(|id| state.coins.get(id).cloned()).collect();
        Ok(FetchCoinsResponse { unspent_outputs, block_hash: state.tip })
    }

    fn save_changes(&self, batch: CoinViewBatch) -> Result<(), CoinViewError> {
        let mut state = self.state.write();
        if state.tip != batch.old_block_hash {
            return Err(CoinViewError::TipMismatch { expected: batch.old_block_hash, actual: state.tip });
        }

        for unspent in batch.unspent_outputs {
            if unspent.is_fully_spent() {
                state.coins.remove(&unspent.transaction_id);
            } else {
                state.coins.insert(unspent.transaction_id, unspent);
            }
        }
        state.rewind.extend(batch.rewind_data);
        state.tip = batch.next_block_hash;
        debug!(target: "coinview", "tip moved to {}", display_hash(&state.tip));
        Ok(())
    }

    fn rewind(&self) -> Result<Hash, CoinViewError> {
        let mut state = self.state.write();
        let rewind = state.rewind.pop().ok_or(CoinViewError::NothingToRewind)?;
        for id in &rewind.transactions_to_remove {
            state.coins.remove(id);
        }
        for unspent in rewind.outputs_to_restore {
            if unspent.is_fully_spent() {
                state.coins.remove(&unspent.transaction_id);
            } else {
                state.coins.insert(unspent.transaction_id, unspent);
            }
        }
        state.tip = rewind.previous_block_hash;
        debug!(target: "coinview", "rewound to {}", display_hash(&state.tip));
        Ok(state.tip)
    }
}
