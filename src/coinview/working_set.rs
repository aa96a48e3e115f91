use std::collections::HashMap;

use super::{RewindData, UnspentOutputs};
use crate::error::{ConsensusError, Result};
use crate::types::*;

/// Coins loaded for one block, mutated as its transactions are connected.
///
/// The first modification of a record remembers its loaded state so the block's
/// changes and rewind data can be produced afterwards.
#[derive(Debug, Clone, Default)]
pub struct UnspentOutputSet {
    unspents: HashMap<Hash, UnspentOutputs>,
    originals: HashMap<Hash, Option<UnspentOutputs>>,
}

impl UnspentOutputSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load fetched records. `None` entries are ids the store does not know.
    pub fn set_coins(&mut self, coins: Vec<(Hash, Option<UnspentOutputs>)>) {
        for (id, unspent) in coins {
            if let Some(unspent) = unspent {
                self.unspents.insert(id, unspent);
            }
        }
    }

    /// The loaded record for `id`, including records this block has fully spent.
    pub fn access_coins(&self, id: &Hash) -> Option<&UnspentOutputs> {
        self.unspents.get(id)
    }

    pub fn get_output(&self, outpoint: &OutPoint) -> Option<&TransactionOutput> {
        self.unspents.get(&outpoint.hash)?.try_get_output(outpoint.index)
    }

    fn remember(&mut self, id: Hash) {
        if !self.originals.contains_key(&id) {
            let original = self.unspents.get(&id).cloned();
            self.originals.insert(id, original);
        }
    }

    /// Spend the inputs of `tx` and add its outputs.
    pub fn update(&mut self, tx: &Transaction, height: u32, block_time: u32) -> Result<()> {
        if !tx.is_coinbase() {
            for input in &tx.inputs {
                self.remember(input.prevout.hash);
                self.unspents
                    .get_mut(&input.prevout.hash)
                    .and_then(|coins| coins.spend(input.prevout.index))
                    .ok_or(ConsensusError::BadTransactionMissingInput)?;
            }
        }

        let created = UnspentOutputs::from_transaction(tx, height, block_time);
        self.remember(created.transaction_id);
        self.unspents.insert(created.transaction_id, created);
        Ok(())
    }

    /// New state of every record this block touched, ordered by transaction id.
    /// Fully spent records come back as [`UnspentOutputs::removed`].
    pub fn get_changes(&self) -> Vec<UnspentOutputs> {
        let mut changes: Vec<UnspentOutputs> = self
            .originals
            .keys()
            .map(|id| match self.unspents.get(id) {
                Some(coins) if !coins.is_fully_spent() => coins.clone(),
                _ => UnspentOutputs::removed(*id),
            })
            .collect();
        changes.sort_by(|a, b| a.transaction_id.cmp(&b.transaction_id));
        changes
    }

    /// Data undoing [`get_changes`](Self::get_changes) back to `previous_block_hash`.
    pub fn rewind_data(&self, previous_block_hash: Hash) -> RewindData {
        let mut transactions_to_remove = Vec::new();
        let mut outputs_to_restore = Vec::new();
        for (id, original) in &self.originals {
            match original {
                Some(coins) => outputs_to_restore.push(coins.clone()),
                None => transactions_to_remove.push(*id),
            }
        }
        transactions_to_remove.sort();
        outputs_to_restore.sort_by(|a, b| a.transaction_id.cmp(&b.transaction_id));
        RewindData { previous_block_hash, transactions_to_remove, outputs_to_restore }
    }
}
