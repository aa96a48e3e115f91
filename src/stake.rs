//! Proof-of-stake bookkeeping: per-block stake records, the stake modifier and
//! the stake kernel check

use std::collections::HashMap;

use bitflags::bitflags;
use log::trace;
use parking_lot::RwLock;
use primitive_types::{U256, U512};

use crate::chain::ChainedHeader;
use crate::error::{ConsensusError, Result};
use crate::network::ProofOfStakeParameters;
use crate::pow::{compact_to_target, hash_to_u256};
use crate::serialization::double_sha256;
use crate::types::*;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BlockFlags: u32 {
        const PROOF_OF_STAKE = 1 << 0;
        const STAKE_ENTROPY = 1 << 1;
        const STAKE_MODIFIER = 1 << 2;
    }
}

impl Default for BlockFlags {
    fn default() -> Self {
        BlockFlags::empty()
    }
}

/// Stake data recorded for every block of a proof-of-stake network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockStake {
    pub flags: BlockFlags,
    pub stake_modifier_v2: Hash,
    /// Kernel hash for stake blocks, header hash for work blocks
    pub hash_proof: Hash,
    pub stake_time: u32,
    pub prevout_stake: Option<OutPoint>,
}

impl BlockStake {
    /// Initial record for `block`; the modifier and proof are filled in during validation.
    pub fn from_block(block: &Block) -> Self {
        let mut stake = BlockStake::default();
        if block.is_proof_of_stake() {
            let coinstake = &block.transactions[1];
            stake.flags |= BlockFlags::PROOF_OF_STAKE;
            stake.prevout_stake = Some(coinstake.inputs[0].prevout);
            stake.stake_time = coinstake.time.unwrap_or(block.header.timestamp);
        }
        stake
    }

    pub fn is_proof_of_stake(&self) -> bool {
        self.flags.contains(BlockFlags::PROOF_OF_STAKE)
    }
}

/// Storage of [`BlockStake`] records by block hash.
pub trait StakeChain: Send + Sync {
    fn get(&self, hash: &Hash) -> Option<BlockStake>;
    fn set(&self, hash: Hash, stake: BlockStake);
}

#[derive(Default)]
pub struct MemoryStakeChain {
    entries: RwLock<HashMap<Hash, BlockStake>>,
}

impl MemoryStakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl StakeChain for MemoryStakeChain {
    fn get(&self, hash: &Hash) -> Option<BlockStake> {
        self.entries.read().get(hash).cloned()
    }

    fn set(&self, hash: Hash, stake: BlockStake) {
        self.entries.write().insert(hash, stake);
    }
}

/// StakeModifierV2 = sha256d(kernel ‖ previous modifier).
///
/// The kernel is the staked prevout's hash for stake blocks and the block hash
/// for work blocks. With no previous block the modifier is zero.
pub fn compute_stake_modifier_v2(previous: Option<&ChainedHeader>, previous_modifier: &Hash, kernel: &Hash) -> Hash {
    if previous.is_none() {
        return ZERO_HASH;
    }
    let mut data = Vec::with_capacity(64);
    data.extend_from_slice(kernel);
    data.extend_from_slice(previous_modifier);
    double_sha256(&data)
}

/// Result of a kernel evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StakeKernel {
    pub hash: Hash,
    pub meets_target: bool,
}

/// Kernel hash: sha256d(modifier ‖ coin time ‖ prevout hash ‖ prevout index ‖ coinstake time).
pub fn stake_kernel_hash(stake_modifier_v2: &Hash, coin_time: u32, prevout: &OutPoint, transaction_time: u32) -> Hash {
    let mut data = Vec::with_capacity(32 + 4 + 32 + 4 + 4);
    data.extend_from_slice(stake_modifier_v2);
    data.extend_from_slice(&coin_time.to_le_bytes());
    data.extend_from_slice(&prevout.hash);
    data.extend_from_slice(&prevout.index.to_le_bytes());
    data.extend_from_slice(&transaction_time.to_le_bytes());
    double_sha256(&data)
}

/// CheckStakeKernelHash.
///
/// 1. The staked coin may not be younger than the coinstake
/// 2. Target is weighted by the staked value: hash ≤ target × value
pub fn check_stake_kernel_hash(
    stake_modifier_v2: &Hash,
    bits: u32,
    coin_time: u32,
    prevout: &OutPoint,
    value: Integer,
    transaction_time: u32,
) -> Result<StakeKernel> {
    if transaction_time < coin_time {
        return Err(ConsensusError::StakeTimeViolation);
    }
    let target = compact_to_target(bits).ok_or(ConsensusError::StakeHashInvalidTarget)?;
    let weight = U256::from(value.max(0) as u64);
    let weighted_target = U512::from(target) * U512::from(weight);

    let hash = stake_kernel_hash(stake_modifier_v2, coin_time, prevout, transaction_time);
    let meets_target = U512::from(hash_to_u256(&hash)) <= weighted_target;
    trace!(
        target: "consensus",
        "stake kernel {} for {}:{} meets target: {}",
        display_hash(&hash),
        display_hash(&prevout.hash),
        prevout.index,
        meets_target
    );
    Ok(StakeKernel { hash, meets_target })
}

/// True when a coin at `coin_height` has fewer than `depth` confirmations
/// counted from `reference_height`.
pub fn is_confirmed_in_n_prev_blocks(coin_height: u32, reference_height: u32, depth: u32) -> bool {
    reference_height.saturating_sub(coin_height) < depth
}

/// Stake depth check for a coin spent by the coinstake of the block on top of `previous`.
pub fn check_stake_depth(pos: &ProofOfStakeParameters, coin_height: u32, previous: &ChainedHeader) -> Result<()> {
    if is_confirmed_in_n_prev_blocks(coin_height, previous.height(), pos.stake_min_confirmations.saturating_sub(1)) {
        return Err(ConsensusError::InvalidStakeDepth);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{ConsensusParameters, Network};

    #[test]
    fn test_modifier_is_zero_without_previous() {
        assert_eq!(compute_stake_modifier_v2(None, &[5; 32], &[6; 32]), ZERO_HASH);
    }

    #[test]
    fn test_modifier_chains_kernel_and_previous() {
        let genesis = ChainedHeader::genesis(BlockHeader {
            version: 1,
            prev_block_hash: ZERO_HASH,
            merkle_root: ZERO_HASH,
            timestamp: 0,
            bits: 0x207fffff,
            nonce: 0,
        });
        let a = compute_stake_modifier_v2(Some(&genesis), &ZERO_HASH, &[1; 32]);
        let b = compute_stake_modifier_v2(Some(&genesis), &ZERO_HASH, &[2; 32]);
        let c = compute_stake_modifier_v2(Some(&genesis), &a, &[1; 32]);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, ZERO_HASH);
    }

    #[test]
    fn test_kernel_time_violation() {
        let prevout = OutPoint::new([3; 32], 1);
        assert_eq!(
            check_stake_kernel_hash(&ZERO_HASH, 0x207fffff, 2000, &prevout, 100, 1999),
            Err(ConsensusError::StakeTimeViolation)
        );
    }

    #[test]
    fn test_kernel_weighting_by_value() {
        let prevout = OutPoint::new([3; 32], 1);
        // Regtest limit is about half the hash space, so a value of 4 covers every hash
        let easy = check_stake_kernel_hash(&ZERO_HASH, 0x207fffff, 1000, &prevout, 4, 1600).unwrap();
        assert!(easy.meets_target);
        // Zero value never passes
        let zero_value = check_stake_kernel_hash(&ZERO_HASH, 0x207fffff, 1000, &prevout, 0, 1600).unwrap();
        assert!(!zero_value.meets_target);
        let hard = check_stake_kernel_hash(&ZERO_HASH, 0x03000001, 1000, &prevout, 1, 1600).unwrap();
        assert!(!hard.meets_target);
        assert_eq!(easy.hash, hard.hash);
    }

    #[test]
    fn test_stake_depth() {
        let pos = ConsensusParameters::for_network(Network::StratisRegTest).proof_of_stake.unwrap();
        let mut tip = ChainedHeader::genesis(BlockHeader {
            version: 7,
            prev_block_hash: ZERO_HASH,
            merkle_root: ZERO_HASH,
            timestamp: 0,
            bits: 0x207fffff,
            nonce: 0,
        });
        for i in 1..=12u32 {
            let header = BlockHeader { prev_block_hash: tip.hash(), timestamp: i * 16, ..tip.header().clone() };
            tip = ChainedHeader::extend(&tip, header);
        }
        // min confirmations 10: coin at height 3 is 9 deep from height 12
        assert_eq!(check_stake_depth(&pos, 3, &tip), Ok(()));
        assert_eq!(check_stake_depth(&pos, 4, &tip), Err(ConsensusError::InvalidStakeDepth));
    }

    #[test]
    fn test_block_stake_from_block() {
        let coinstake = Transaction {
            version: 1,
            time: Some(160),
            inputs: vec![TransactionInput { prevout: OutPoint::new([8; 32], 0), script_sig: vec![], sequence: 0 }],
            outputs: vec![
                TransactionOutput { value: 0, script_pubkey: vec![] },
                TransactionOutput { value: 5, script_pubkey: vec![0x51] },
            ],
            lock_time: 0,
        };
        let coinbase = Transaction {
            version: 1,
            time: Some(160),
            inputs: vec![TransactionInput { prevout: OutPoint::null(), script_sig: vec![0x51, 0x00], sequence: 0 }],
            outputs: vec![TransactionOutput { value: 0, script_pubkey: vec![] }],
            lock_time: 0,
        };
        let block = Block {
            header: BlockHeader {
                version: 7,
                prev_block_hash: ZERO_HASH,
                merkle_root: ZERO_HASH,
                timestamp: 160,
                bits: 0x207fffff,
                nonce: 0,
            },
            transactions: vec![coinbase, coinstake],
            signature: vec![],
        };
        let stake = BlockStake::from_block(&block);
        assert!(stake.is_proof_of_stake());
        assert_eq!(stake.prevout_stake, Some(OutPoint::new([8; 32], 0)));
        assert_eq!(stake.stake_time, 160);
    }
}
