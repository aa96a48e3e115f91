//! UTXO snapshot reconstruction
//!
//! Replays already validated blocks into a throwaway in-memory set for
//! historical balance queries. Nothing here is persisted or rewindable.

use std::collections::HashMap;

use log::debug;
use thiserror::Error;

use crate::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SnapshotError {
    /// The replayed chain spends an output the snapshot never saw.
    #[error("block at height {height} spends unknown output {outpoint:?}")]
    MissingInput { height: u32, outpoint: OutPoint },
}

/// Unspent output captured by a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotOutput {
    pub value: Integer,
    pub script_pubkey: ByteString,
    pub height: u32,
}

#[derive(Debug, Clone, Default)]
pub struct UtxoSnapshot {
    outputs: HashMap<OutPoint, SnapshotOutput>,
    height: Option<u32>,
}

impl UtxoSnapshot {
    /// Replay `blocks` (genesis first, index = height) up to and including
    /// `up_to_height`.
    ///
    /// Each block first adds every output it creates, then removes every
    /// output its inputs spend, so spends of same-block outputs resolve.
    pub fn replay(blocks: &[Block], up_to_height: u32) -> Result<Self, SnapshotError> {
        let mut snapshot = UtxoSnapshot::default();
        for (height, block) in blocks.iter().enumerate().take(up_to_height as usize + 1) {
            snapshot.apply_block(block, height as u32)?;
        }
        debug!(
            target: "consensus",
            "snapshot at height {:?} holds {} outputs",
            snapshot.height,
            snapshot.outputs.len()
        );
        Ok(snapshot)
    }

    fn apply_block(&mut self, block: &Block, height: u32) -> Result<(), SnapshotError> {
        for tx in &block.transactions {
            let txid = tx.txid();
            for (index, output) in tx.outputs.iter().enumerate() {
                if output.is_empty() {
                    continue;
                }
                self.outputs.insert(
                    OutPoint::new(txid, index as u32),
                    SnapshotOutput { value: output.value, script_pubkey: output.script_pubkey.clone(), height },
                );
            }
        }

        for tx in block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
            for input in &tx.inputs {
                if self.outputs.remove(&input.prevout).is_none() {
                    return Err(SnapshotError::MissingInput { height, outpoint: input.prevout });
                }
            }
        }
        self.height = Some(height);
        Ok(())
    }

    /// Height of the last replayed block, `None` when nothing was replayed.
    pub fn height(&self) -> Option<u32> {
        self.height
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&SnapshotOutput> {
        self.outputs.get(outpoint)
    }

    /// Total unspent value locked by exactly `script_pubkey`.
    pub fn balance_of(&self, script_pubkey: &[u8]) -> Integer {
        self.outputs
            .values()
            .filter(|output| output.script_pubkey == script_pubkey)
            .map(|output| output.value)
            .sum()
    }
}
