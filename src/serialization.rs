//! Consensus serialization: varints, transactions, headers, blocks and merkle roots
//!
//! Only encoding is needed by validation. Sizes, weights, txids and header
//! hashes are all derived from these byte layouts.

use bitcoin_hashes::{sha256d, Hash as _};

use crate::types::*;

/// Double SHA-256.
pub fn double_sha256(data: &[u8]) -> Hash {
    sha256d::Hash::hash(data).into_inner()
}

/// Encode a u64 as a compact-size varint.
///
/// - `< 0xfd`: single byte
/// - `<= 0xffff`: `0xfd` + 2 bytes LE
/// - `<= 0xffffffff`: `0xfe` + 4 bytes LE
/// - otherwise: `0xff` + 8 bytes LE
pub fn encode_varint(value: u64, out: &mut Vec<u8>) {
    if value < 0xfd {
        out.push(value as u8);
    } else if value <= 0xffff {
        out.push(0xfd);
        out.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value <= 0xffff_ffff {
        out.push(0xfe);
        out.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        out.push(0xff);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

fn write_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    encode_varint(bytes.len() as u64, out);
    out.extend_from_slice(bytes);
}

pub fn write_input(input: &TransactionInput, out: &mut Vec<u8>) {
    out.extend_from_slice(&input.prevout.hash);
    out.extend_from_slice(&input.prevout.index.to_le_bytes());
    write_bytes(&input.script_sig, out);
    out.extend_from_slice(&input.sequence.to_le_bytes());
}

pub fn write_output(output: &TransactionOutput, out: &mut Vec<u8>) {
    out.extend_from_slice(&output.value.to_le_bytes());
    write_bytes(&output.script_pubkey, out);
}

/// Serialize a transaction.
///
/// Layout: version, [time], inputs, outputs, lock_time. The time field is
/// written only when the transaction carries one.
pub fn serialize_transaction(tx: &Transaction) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + tx.inputs.len() * 41 + tx.outputs.len() * 34);
    out.extend_from_slice(&tx.version.to_le_bytes());
    if let Some(time) = tx.time {
        out.extend_from_slice(&time.to_le_bytes());
    }
    encode_varint(tx.inputs.len() as u64, &mut out);
    for input in &tx.inputs {
        write_input(input, &mut out);
    }
    encode_varint(tx.outputs.len() as u64, &mut out);
    for output in &tx.outputs {
        write_output(output, &mut out);
    }
    out.extend_from_slice(&tx.lock_time.to_le_bytes());
    out
}

/// Serialize the 80-byte block header.
pub fn serialize_header(header: &BlockHeader) -> Vec<u8> {
    let mut out = Vec::with_capacity(80);
    out.extend_from_slice(&header.version.to_le_bytes());
    out.extend_from_slice(&header.prev_block_hash);
    out.extend_from_slice(&header.merkle_root);
    out.extend_from_slice(&header.timestamp.to_le_bytes());
    out.extend_from_slice(&header.bits.to_le_bytes());
    out.extend_from_slice(&header.nonce.to_le_bytes());
    out
}

/// Serialize a block's header and transactions (the block signature is not included).
pub fn serialize_block(block: &Block) -> Vec<u8> {
    let mut out = serialize_header(&block.header);
    encode_varint(block.transactions.len() as u64, &mut out);
    for tx in &block.transactions {
        out.extend_from_slice(&serialize_transaction(tx));
    }
    out
}

/// Merkle root over txids.
///
/// Returns the root and a mutation flag: true when any level pairs two
/// identical hashes, meaning a different transaction list hashes to the same root.
pub fn merkle_root(txids: &[Hash]) -> (Hash, bool) {
    if txids.is_empty() {
        return (ZERO_HASH, false);
    }
    let mut layer = txids.to_vec();
    let mut mutated = false;
    while layer.len() > 1 {
        let size = layer.len();
        let mut next = Vec::with_capacity(size.div_ceil(2));
        let mut i = 0usize;
        while i < size {
            let i2 = if i + 1 < size { i + 1 } else { i };
            if i2 == i + 1 && layer[i] == layer[i2] {
                mutated = true;
            }
            let mut data = Vec::with_capacity(64);
            data.extend_from_slice(&layer[i]);
            data.extend_from_slice(&layer[i2]);
            next.push(double_sha256(&data));
            i += 2;
        }
        layer = next;
    }
    (layer[0], mutated)
}
