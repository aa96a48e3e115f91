use std::collections::HashMap;

use log::{debug, trace};
use parking_lot::Mutex;

use super::{CoinView, CoinViewBatch, FetchCoinsResponse, RewindData, UnspentOutputs};
use crate::error::CoinViewError;
use crate::types::*;

/// Default number of records kept before the cache flushes itself.
pub const DEFAULT_MAX_ITEMS: usize = 100_000;

#[derive(Debug, Clone)]
struct CacheItem {
    /// `None` for a record known to be fully spent
    coins: Option<UnspentOutputs>,
    dirty: bool,
}

struct CacheState {
    tip: Hash,
    items: HashMap<Hash, CacheItem>,
    /// Rewind data of saved blocks not yet written to the inner view, oldest first
    pending_rewind: Vec<RewindData>,
}

/// Write-back cache over another [`CoinView`].
///
/// Saves stay in memory until [`flush`](Self::flush) is called or the cache
/// grows past `max_items`. Its tip runs ahead of the inner view's tip by the
/// number of pending blocks.
pub struct CachedCoinView<C: CoinView> {
    inner: C,
    max_items: usize,
    state: Mutex<CacheState>,
}

impl<C: CoinView> CachedCoinView<C> {
    pub fn new(inner: C) -> Result<Self, CoinViewError> {
        Self::with_max_items(inner, DEFAULT_MAX_ITEMS)
    }

    pub fn with_max_items(inner: C, max_items: usize) -> Result<Self, CoinViewError> {
        let tip = inner.get_tip_hash()?;
        Ok(CachedCoinView {
            inner,
            max_items,
            state: Mutex::new(CacheState { tip, items: HashMap::new(), pending_rewind: Vec::new() }),
        })
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Record count past which a save flushes the cache.
    pub fn max_items(&self) -> usize {
        self.max_items
    }

    /// Number of cached records, clean and dirty.
    pub fn cached_items(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Number of saved blocks not yet written to the inner view.
    pub fn pending_blocks(&self) -> usize {
        self.state.lock().pending_rewind.len()
    }

    /// Write every dirty record and pending rewind entry to the inner view.
    pub fn flush(&self) -> Result<(), CoinViewError> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state)
    }

    fn flush_locked(&self, state: &mut CacheState) -> Result<(), CoinViewError> {
        let inner_tip = self.inner.get_tip_hash()?;
        if inner_tip == state.tip && state.pending_rewind.is_empty() {
            return Ok(());
        }

        let mut unspent_outputs: Vec<UnspentOutputs> = state
            .items
            .iter()
            .filter(|(_, item)| item.dirty)
            .map(|(id, item)| item.coins.clone().unwrap_or_else(|| UnspentOutputs::removed(*id)))
            .collect();
        unspent_outputs.sort_by(|a, b| a.transaction_id.cmp(&b.transaction_id));

        let batch = CoinViewBatch {
            old_block_hash: inner_tip,
            next_block_hash: state.tip,
            unspent_outputs,
            rewind_data: state.pending_rewind.clone(),
        };
        let written = batch.unspent_outputs.len();
        self.inner.save_changes(batch)?;

        state.pending_rewind.clear();
        for item in state.items.values_mut() {
            item.dirty = false;
        }
        debug!(target: "coinview", "flushed {} records up to {}", written, display_hash(&state.tip));
        Ok(())
    }

    fn put(state: &mut CacheState, id: Hash, coins: Option<UnspentOutputs>) {
        let coins = coins.filter(|c| !c.is_fully_spent());
        state.items.insert(id, CacheItem { coins, dirty: true });
    }
}

impl<C: CoinView> CoinView for CachedCoinView<C> {
    fn get_tip_hash(&self) -> Result<Hash, CoinViewError> {
        Ok(self.state.lock().tip)
    }

    fn fetch_coins(&self, transaction_ids: &[Hash]) -> Result<FetchCoinsResponse, CoinViewError> {
        let mut state = self.state.lock();

        let misses: Vec<Hash> = transaction_ids.iter().filter(|id| !state.items.contains_key(*id)).copied().collect();
        if !misses.is_empty() {
            trace!(target: "coinview", "loading {} of {} records from inner view", misses.len(), transaction_ids.len());
            let loaded = self.inner.fetch_coins(&misses)?;
            for (id, coins) in misses.into_iter().zip(loaded.unspent_outputs) {
                state.items.insert(id, CacheItem { coins, dirty: false });
            }
        }

        let unspent_outputs = transaction_ids
            .iter()
            .map(|id| state.items.get(id).and_then(|item| item.coins.clone()))
            .collect();
        Ok(FetchCoinsResponse { unspent_outputs, block_hash: state.tip })
    }

    fn save_changes(&self, batch: CoinViewBatch) -> Result<(), CoinViewError> {
        let mut state = self.state.lock();
        if state.tip != batch.old_block_hash {
            return Err(CoinViewError::TipMismatch { expected: batch.old_block_hash, actual: state.tip });
        }

        let previous_tip = state.tip;
        let pending = state.pending_rewind.len();
        let mut replaced = Vec::with_capacity(batch.unspent_outputs.len());
        for unspent in batch.unspent_outputs {
            let id = unspent.transaction_id;
            replaced.push((id, state.items.get(&id).cloned()));
            Self::put(&mut state, id, Some(unspent));
        }
        state.pending_rewind.extend(batch.rewind_data);
        state.tip = batch.next_block_hash;

        if state.items.len() > self.max_items {
            if let Err(error) = self.flush_locked(&mut state) {
                // The block is not saved unless the inner view accepted it too
                for (id, item) in replaced.into_iter().rev() {
                    match item {
                        Some(item) => state.items.insert(id, item),
                        None => state.items.remove(&id),
                    };
                }
                state.pending_rewind.truncate(pending);
                state.tip = previous_tip;
                debug!(target: "coinview", "save of {} abandoned: {}", display_hash(&batch.next_block_hash), error);
                return Err(error);
            }
            state.items.clear();
        }
        Ok(())
    }

    fn rewind(&self) -> Result<Hash, CoinViewError> {
        let mut state = self.state.lock();

        if let Some(rewind) = state.pending_rewind.pop() {
            for id in rewind.transactions_to_remove {
                Self::put(&mut state, id, None);
            }
            for unspent in rewind.outputs_to_restore {
                Self::put(&mut state, unspent.transaction_id, Some(unspent));
            }
            state.tip = rewind.previous_block_hash;
            debug!(target: "coinview", "rewound cached block, tip {}", display_hash(&state.tip));
            return Ok(state.tip);
        }

        self.flush_locked(&mut state)?;
        let tip = self.inner.rewind()?;
        state.items.clear();
        state.tip = tip;
        debug!(target: "coinview", "rewound inner view, tip {}", display_hash(&tip));
        Ok(tip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coinview::MemoryCoinView;

    fn coins(id: u8, value: Integer) -> UnspentOutputs {
        UnspentOutputs {
            transaction_id: [id; 32],
            height: 1,
            version: 1,
            time: 0,
            is_coinbase: false,
            is_coinstake: false,
            outputs: vec![Some(TransactionOutput { value, script_pubkey: vec![] })],
        }
    }

    fn block(old: u8, next: u8, created: UnspentOutputs) -> CoinViewBatch {
        let id = created.transaction_id;
        CoinViewBatch {
            old_block_hash: [old; 32],
            next_block_hash: [next; 32],
            unspent_outputs: vec![created],
            rewind_data: vec![RewindData {
                previous_block_hash: [old; 32],
                transactions_to_remove: vec![id],
                outputs_to_restore: vec![],
            }],
        }
    }

    #[test]
    fn test_saves_stay_in_cache_until_flush() {
        let cache = CachedCoinView::new(MemoryCoinView::new([0; 32])).unwrap();
        cache.save_changes(block(0, 1, coins(1, 10))).unwrap();

        assert_eq!(cache.get_tip_hash().unwrap(), [1; 32]);
        assert_eq!(cache.inner().get_tip_hash().unwrap(), [0; 32]);
        assert_eq!(cache.fetch_coins(&[[1; 32]]).unwrap().unspent_outputs[0], Some(coins(1, 10)));

        cache.flush().unwrap();
        assert_eq!(cache.inner().get_tip_hash().unwrap(), [1; 32]);
        assert_eq!(cache.inner().len(), 1);
        assert_eq!(cache.inner().rewind_depth(), 1);
    }

    #[test]
    fn test_rewind_pending_block_in_cache() {
        let cache = CachedCoinView::new(MemoryCoinView::new([0; 32])).unwrap();
        cache.save_changes(block(0, 1, coins(1, 10))).unwrap();
        cache.save_changes(block(1, 2, coins(2, 20))).unwrap();

        assert_eq!(cache.rewind().unwrap(), [1; 32]);
        let response = cache.fetch_coins(&[[1; 32], [2; 32]]).unwrap();
        assert_eq!(response.block_hash, [1; 32]);
        assert!(response.unspent_outputs[0].is_some());
        assert!(response.unspent_outputs[1].is_none());

        cache.flush().unwrap();
        assert_eq!(cache.inner().len(), 1);
    }

    #[test]
    fn test_rewind_past_flush_reaches_inner_view() {
        let cache = CachedCoinView::new(MemoryCoinView::new([0; 32])).unwrap();
        cache.save_changes(block(0, 1, coins(1, 10))).unwrap();
        cache.flush().unwrap();

        assert_eq!(cache.rewind().unwrap(), [0; 32]);
        assert_eq!(cache.inner().get_tip_hash().unwrap(), [0; 32]);
        assert_eq!(cache.fetch_coins(&[[1; 32]]).unwrap().unspent_outputs[0], None);
        assert_eq!(cache.rewind(), Err(CoinViewError::NothingToRewind));
    }

    #[test]
    fn test_overflow_flushes_and_evicts() {
        let cache = CachedCoinView::with_max_items(MemoryCoinView::new([0; 32]), 1).unwrap();
        cache.save_changes(block(0, 1, coins(1, 10))).unwrap();
        assert_eq!(cache.cached_items(), 1);
        cache.save_changes(block(1, 2, coins(2, 20))).unwrap();

        assert_eq!(cache.cached_items(), 0);
        assert_eq!(cache.pending_blocks(), 0);
        assert_eq!(cache.inner().get_tip_hash().unwrap(), [2; 32]);
        assert_eq!(cache.fetch_coins(&[[1; 32]]).unwrap().unspent_outputs[0], Some(coins(1, 10)));
    }

    /// Inner view that accepts reads but fails every write.
    struct ReadOnlyCoinView(MemoryCoinView);

    impl CoinView for ReadOnlyCoinView {
        fn get_tip_hash(&self) -> Result<Hash, CoinViewError> {
            self.0.get_tip_hash()
        }
        fn fetch_coins(&self, transaction_ids: &[Hash]) -> Result<FetchCoinsResponse, CoinViewError> {
            self.0.fetch_coins(transaction_ids)
        }
        fn save_changes(&self, _batch: CoinViewBatch) -> Result<(), CoinViewError> {
            Err(CoinViewError::Backend("read-only".to_string()))
        }
        fn rewind(&self) -> Result<Hash, CoinViewError> {
            self.0.rewind()
        }
    }

    #[test]
    fn test_failed_flush_leaves_cache_unchanged() {
        let cache = CachedCoinView::with_max_items(ReadOnlyCoinView(MemoryCoinView::new([0; 32])), 1).unwrap();
        cache.save_changes(block(0, 1, coins(1, 10))).unwrap();

        // Overflows, so the save has to reach the failing inner view
        let mut overwrite = block(1, 2, coins(2, 20));
        overwrite.unspent_outputs.push(coins(1, 5));
        assert_eq!(cache.save_changes(overwrite), Err(CoinViewError::Backend("read-only".to_string())));

        assert_eq!(cache.get_tip_hash().unwrap(), [1; 32]);
        assert_eq!(cache.pending_blocks(), 1);
        let response = cache.fetch_coins(&[[1; 32], [2; 32]]).unwrap();
        assert_eq!(response.unspent_outputs, vec![Some(coins(1, 10)), None]);

        // Still rewindable in-cache
        assert_eq!(cache.rewind().unwrap(), [0; 32]);
    }

    #[test]
    fn test_save_checks_cache_tip() {
        let cache = CachedCoinView::new(MemoryCoinView::new([0; 32])).unwrap();
        assert!(matches!(
            cache.save_changes(block(5, 6, coins(1, 1))),
            Err(CoinViewError::TipMismatch { .. })
        ));
    }
}
