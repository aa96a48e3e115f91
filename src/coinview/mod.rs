//! UTXO set access
//!
//! A [`CoinView`] stores [`UnspentOutputs`] keyed by transaction id, together
//! with the hash of the block its state corresponds to (the tip). Every save
//! moves the tip forward by one block and records [`RewindData`] so that the
//! block can later be undone with [`CoinView::rewind`].
//!
//! Layers:
//! - [`MemoryCoinView`]: the backing store
//! - [`CachedCoinView`]: write-back cache in front of another view
//! - [`UnspentOutputSet`]: per-block working set the rules mutate

mod cached;
mod memory;
mod unspent_outputs;
mod working_set;

pub use cached::{CachedCoinView, DEFAULT_MAX_ITEMS};
pub use memory::MemoryCoinView;
pub use unspent_outputs::UnspentOutputs;
pub use working_set::UnspentOutputSet;

use serde::{Deserialize, Serialize};

use crate::error::CoinViewError;
use crate::types::Hash;

/// Result of [`CoinView::fetch_coins`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCoinsResponse {
    /// One entry per requested id, in request order; `None` when unknown or fully spent
    pub unspent_outputs: Vec<Option<UnspentOutputs>>,
    /// Tip the answer was read at
    pub block_hash: Hash,
}

/// Everything needed to undo one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewindData {
    /// Tip to restore
    pub previous_block_hash: Hash,
    /// Transactions created by the block
    pub transactions_to_remove: Vec<Hash>,
    /// Pre-block state of every pre-existing record the block touched
    pub outputs_to_restore: Vec<UnspentOutputs>,
}

/// A set of changes moving the view from `old_block_hash` to `next_block_hash`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinViewBatch {
    pub old_block_hash: Hash,
    pub next_block_hash: Hash,
    /// New state of every touched record; fully spent records are deleted
    pub unspent_outputs: Vec<UnspentOutputs>,
    pub rewind_data: Vec<RewindData>,
}

pub trait CoinView: Send + Sync {
    fn get_tip_hash(&self) -> Result<Hash, CoinViewError>;

    fn fetch_coins(&self, transaction_ids: &[Hash]) -> Result<FetchCoinsResponse, CoinViewError>;

    /// Apply `batch`. Fails with [`CoinViewError::TipMismatch`] unless the
    /// current tip is `batch.old_block_hash`.
    fn save_changes(&self, batch: CoinViewBatch) -> Result<(), CoinViewError>;

    /// Undo the most recently saved block and return the restored tip.
    fn rewind(&self) -> Result<Hash, CoinViewError>;
}
