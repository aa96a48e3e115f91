//! Absolute and relative (BIP68) lock times

use crate::chain::ChainedHeader;
use crate::constants::*;
use crate::deployments::LockTimeFlags;
use crate::types::*;

/// IsFinalTx: a transaction is final once its lock time has passed, or when
/// every input opts out with a final sequence.
pub fn is_final_tx(tx: &Transaction, block_height: u32, block_time: u32) -> bool {
    if tx.lock_time == 0 {
        return true;
    }
    let cutoff = if tx.lock_time < LOCKTIME_THRESHOLD { block_height } else { block_time };
    if tx.lock_time < cutoff {
        return true;
    }
    tx.inputs.iter().all(|input| input.sequence == SEQUENCE_FINAL)
}

/// Minimum height and time (exclusive) a block must exceed to include a transaction.
/// `-1` means no constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceLock {
    pub min_height: i64,
    pub min_time: i64,
}

/// CalculateSequenceLocks
///
/// `prev_heights[i]` is the height of the coin spent by input `i`. `block` is
/// the header of the block that would include the transaction.
///
/// 1. Only version >= 2 transactions with VERIFY_SEQUENCE are constrained
/// 2. Inputs with the disable flag are skipped
/// 3. Time-based locks count from the median time past of the block before the coin's block
/// 4. Height-based locks count from the coin's height
pub fn calculate_sequence_locks(
    tx: &Transaction,
    flags: LockTimeFlags,
    prev_heights: &[u32],
    block: &ChainedHeader,
) -> SequenceLock {
    let mut lock = SequenceLock { min_height: -1, min_time: -1 };
    let enforce = tx.version >= 2 && flags.contains(LockTimeFlags::VERIFY_SEQUENCE);
    if !enforce {
        return lock;
    }

    for (input, coin_height) in tx.inputs.iter().zip(prev_heights) {
        if input.sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG != 0 {
            continue;
        }
        let value = (input.sequence & SEQUENCE_LOCKTIME_MASK) as i64;
        if input.sequence & SEQUENCE_LOCKTIME_TYPE_FLAG != 0 {
            let coin_time = block
                .get_ancestor(coin_height.saturating_sub(1))
                .map_or(0, |ancestor| ancestor.median_time_past()) as i64;
            lock.min_time = lock.min_time.max(coin_time + (value << SEQUENCE_LOCKTIME_GRANULARITY) - 1);
        } else {
            lock.min_height = lock.min_height.max(*coin_height as i64 + value - 1);
        }
    }
    lock
}

/// EvaluateSequenceLocks: the lock is satisfied when `block` is above the
/// minimum height and its parent's median time past is above the minimum time.
pub fn evaluate_sequence_locks(block: &ChainedHeader, lock: SequenceLock) -> bool {
    let block_time = block.previous().map_or(0, |previous| previous.median_time_past()) as i64;
    !(lock.min_height >= block.height() as i64 || lock.min_time >= block_time)
}

pub fn sequence_locks(tx: &Transaction, flags: LockTimeFlags, prev_heights: &[u32], block: &ChainedHeader) -> bool {
    evaluate_sequence_locks(block, calculate_sequence_locks(tx, flags, prev_heights, block))
}
