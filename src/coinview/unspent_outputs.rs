use serde::{Deserialize, Serialize};

use crate::types::*;

/// Unspent outputs of one transaction, as stored in the coin view.
///
/// Spent outputs are `None`; a record with no unspent outputs left is fully
/// spent and is removed from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutputs {
    pub transaction_id: Hash,
    pub height: u32,
    pub version: i32,
    /// Transaction time if the transaction carries one, otherwise its block's time
    pub time: u32,
    pub is_coinbase: bool,
    pub is_coinstake: bool,
    pub outputs: Vec<Option<TransactionOutput>>,
}

impl UnspentOutputs {
    pub fn from_transaction(tx: &Transaction, height: u32, block_time: u32) -> Self {
        UnspentOutputs {
            transaction_id: tx.txid(),
            height,
            version: tx.version,
            time: tx.time.unwrap_or(block_time),
            is_coinbase: tx.is_coinbase(),
            is_coinstake: tx.is_coinstake(),
            outputs: tx.outputs.iter().cloned().map(Some).collect(),
        }
    }

    /// Marker for a transaction whose outputs are all gone; saving it deletes the record.
    pub fn removed(transaction_id: Hash) -> Self {
        UnspentOutputs {
            transaction_id,
            height: 0,
            version: 0,
            time: 0,
            is_coinbase: false,
            is_coinstake: false,
            outputs: Vec::new(),
        }
    }

    pub fn is_fully_spent(&self) -> bool {
        self.outputs.iter().all(Option::is_none)
    }

    pub fn unspent_count(&self) -> usize {
        self.outputs.iter().filter(|o| o.is_some()).count()
    }

    pub fn try_get_output(&self, index: u32) -> Option<&TransactionOutput> {
        self.outputs.get(index as usize).and_then(Option::as_ref)
    }

    /// Spend one output, returning it. `None` if it does not exist or is already spent.
    pub fn spend(&mut self, index: u32) -> Option<TransactionOutput> {
        self.outputs.get_mut(index as usize).and_then(Option::take)
    }
}
