//! Core chain types consumed by the consensus rules

use serde::{Deserialize, Serialize};

use crate::serialization;

/// Hash type: 256-bit hash, stored in internal (little-endian) byte order
pub type Hash = [u8; 32];

/// Byte string type
pub type ByteString = Vec<u8>;

/// Natural number type
pub type Natural = u64;

/// Integer type (monetary amounts)
pub type Integer = i64;

/// The all-zero hash
pub const ZERO_HASH: Hash = [0u8; 32];

/// Parse a hash from its reversed (display) hex form, as printed by block explorers.
pub fn parse_hash(display_hex: &str) -> Option<Hash> {
    let bytes = hex::decode(display_hex).ok()?;
    if bytes.len() != 32 {
        return None;
    }
    let mut hash = [0u8; 32];
    for (i, byte) in bytes.iter().rev().enumerate() {
        hash[i] = *byte;
    }
    Some(hash)
}

/// Format a hash in reversed (display) hex form.
pub fn display_hash(hash: &Hash) -> String {
    let mut reversed = *hash;
    reversed.reverse();
    hex::encode(reversed)
}

/// Reference to a single output of a previous transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: Hash,
    pub index: u32,
}

impl OutPoint {
    pub fn new(hash: Hash, index: u32) -> Self {
        OutPoint { hash, index }
    }

    /// The prevout carried by coinbase inputs.
    pub fn null() -> Self {
        OutPoint { hash: ZERO_HASH, index: u32::MAX }
    }

    pub fn is_null(&self) -> bool {
        self.hash == ZERO_HASH && self.index == u32::MAX
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub prevout: OutPoint,
    pub script_sig: ByteString,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub value: Integer,
    pub script_pubkey: ByteString,
}

impl TransactionOutput {
    /// An empty output carries no value and no script (coinbase/coinstake markers).
    pub fn is_empty(&self) -> bool {
        self.value == 0 && self.script_pubkey.is_empty()
    }
}

/// Transaction.
///
/// `time` is only present on networks whose transactions carry their own
/// timestamp (proof-of-stake networks); it is serialized right after `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: i32,
    pub time: Option<u32>,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub lock_time: u32,
}

impl Transaction {
    /// Double-SHA256 of the consensus serialization.
    pub fn txid(&self) -> Hash {
        serialization::double_sha256(&serialization::serialize_transaction(self))
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    /// A coinstake spends a real prevout and starts with an empty marker output.
    pub fn is_coinstake(&self) -> bool {
        !self.inputs.is_empty()
            && !self.inputs[0].prevout.is_null()
            && self.outputs.len() >= 2
            && self.outputs[0].is_empty()
    }

    /// Sum of output values, saturating on overflow.
    pub fn total_out(&self) -> Integer {
        self.outputs.iter().fold(0i64, |acc, o| acc.saturating_add(o.value))
    }

    pub fn serialized_size(&self) -> usize {
        serialization::serialize_transaction(self).len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn hash(&self) -> Hash {
        serialization::double_sha256(&serialization::serialize_header(self))
    }
}

/// Block: header, transactions and (proof-of-stake only) the staker's signature
/// over the header hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub signature: ByteString,
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// A block is proof-of-stake when its second transaction is a coinstake.
    pub fn is_proof_of_stake(&self) -> bool {
        self.transactions.len() > 1 && self.transactions[1].is_coinstake()
    }

    pub fn is_proof_of_work(&self) -> bool {
        !self.is_proof_of_stake()
    }

    /// Computed merkle root and whether the transaction list is a mutated
    /// (duplicated trailing pair) form of another list with the same root.
    pub fn merkle_root(&self) -> (Hash, bool) {
        let txids: Vec<Hash> = self.transactions.iter().map(|tx| tx.txid()).collect();
        serialization::merkle_root(&txids)
    }

    /// Serialized size without witness data or block signature.
    pub fn base_size(&self) -> usize {
        serialization::serialize_block(self).len()
    }

    /// Block weight. Witness data is not carried, so weight is four times the base size.
    pub fn weight(&self) -> usize {
        self.base_size() * crate::constants::WITNESS_SCALE_FACTOR
    }
}
