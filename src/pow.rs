//! Targets, proof-of-work checks and difficulty retargeting

use primitive_types::{U256, U512};

use crate::chain::ChainedHeader;
use crate::network::ConsensusParameters;
use crate::stake::StakeChain;
use crate::types::*;

/// Expand a compact target.
///
/// Returns `None` for negative or overflowing encodings.
pub fn compact_to_target(bits: u32) -> Option<U256> {
    let size = bits >> 24;
    let mut word = bits & 0x007f_ffff;
    let negative = word != 0 && (bits & 0x0080_0000) != 0;
    let overflow = word != 0 && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32));
    if negative || overflow {
        return None;
    }
    if size <= 3 {
        word >>= 8 * (3 - size);
        Some(U256::from(word))
    } else {
        Some(U256::from(word) << (8 * (size - 3) as usize))
    }
}

/// Compact encoding of a target (inverse of [`compact_to_target`] up to mantissa precision).
pub fn target_to_compact(target: U256) -> u32 {
    let mut size = (target.bits() + 7) / 8;
    let mut compact = if size <= 3 {
        (target.low_u64() << (8 * (3 - size))) as u32
    } else {
        (target >> (8 * (size - 3))).low_u64() as u32
    };
    // The mantissa's top bit is a sign bit
    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }
    compact | ((size as u32) << 24)
}

/// Interpret a hash (internal byte order) as a 256-bit number.
pub fn hash_to_u256(hash: &Hash) -> U256 {
    U256::from_little_endian(hash)
}

fn u512_to_u256(value: U512) -> U256 {
    let mut bytes = [0u8; 64];
    value.to_little_endian(&mut bytes);
    U256::from_little_endian(&bytes[..32])
}

/// CheckProofOfWork.
///
/// 1. Target must decode, be non-zero and not exceed `pow_limit`
/// 2. The hash, read as a number, must not exceed the target
pub fn check_proof_of_work(hash: &Hash, bits: u32, pow_limit: u32) -> bool {
    let target = match compact_to_target(bits) {
        Some(target) => target,
        None => return false,
    };
    let limit = compact_to_target(pow_limit).unwrap_or_else(U256::max_value);
    if target.is_zero() || target > limit {
        return false;
    }
    hash_to_u256(hash) <= target
}

/// Compact bits required for the proof-of-work block following `previous`.
///
/// 1. Off a retarget boundary the previous bits carry over, except on
///    min-difficulty networks where a block more than two spacings late may use
///    the limit, and otherwise the last non-limit bits of the interval apply
/// 2. On a boundary, scale the previous target by the actual timespan of the
///    interval, clamped to [timespan/4, timespan*4], and cap at the limit
pub fn get_next_work_required(previous: &ChainedHeader, header_time: u32, params: &ConsensusParameters) -> u32 {
    let pow_limit = params.pow_limit;
    let interval = params.difficulty_adjustment_interval();
    let next_height = previous.height() + 1;

    if next_height % interval != 0 {
        if params.pow_allow_min_difficulty_blocks {
            if header_time > previous.header().timestamp.saturating_add(params.pow_target_spacing * 2) {
                return pow_limit;
            }
            let mut current = previous;
            while let Some(parent) = current.previous() {
                if current.height() % interval == 0 || current.header().bits != pow_limit {
                    break;
                }
                current = parent;
            }
            return current.header().bits;
        }
        return previous.header().bits;
    }

    if params.pow_no_retargeting {
        return previous.header().bits;
    }

    let first_height = previous.height().saturating_sub(interval - 1);
    let first = match previous.get_ancestor(first_height) {
        Some(first) => first,
        None => return previous.header().bits,
    };
    calculate_next_work_required(previous, first.header().timestamp, params)
}

pub fn calculate_next_work_required(previous: &ChainedHeader, first_block_time: u32, params: &ConsensusParameters) -> u32 {
    let target_timespan = params.pow_target_timespan as i64;
    let actual = (previous.header().timestamp as i64 - first_block_time as i64)
        .clamp(target_timespan / 4, target_timespan * 4);

    let limit = compact_to_target(params.pow_limit).unwrap_or_else(U256::max_value);
    let old = compact_to_target(previous.header().bits).unwrap_or(limit);
    let scaled = U512::from(old) * U512::from(actual as u64) / U512::from(target_timespan as u64);
    let new = if scaled > U512::from(limit) { limit } else { u512_to_u256(scaled) };
    target_to_compact(new)
}

/// Most recent header (starting at `start`) whose block is of the requested kind.
///
/// Headers without a stake record count as proof-of-work. Stops at genesis.
pub fn last_block_of_kind<'a>(
    stake_chain: &dyn StakeChain,
    start: &'a ChainedHeader,
    proof_of_stake: bool,
) -> &'a ChainedHeader {
    let mut current = start;
    while let Some(parent) = current.previous() {
        let is_pos = stake_chain.get(&current.hash()).map_or(false, |s| s.is_proof_of_stake());
        if is_pos == proof_of_stake {
            break;
        }
        current = parent;
    }
    current
}

/// Compact target for the next block on a hybrid chain.
///
/// 1. Find the last two blocks of the same kind (stake or work)
/// 2. With fewer than two, use the kind's limit
/// 3. Clamp the spacing between them to (0, 10 × spacing], negatives to the target spacing
/// 4. target = prev × ((n − 1)·spacing + 2·actual) / ((n + 1)·spacing),
///    with n = timespan / spacing
/// 5. Zero or above-limit results fall back to the limit
pub fn get_next_target_required(
    stake_chain: &dyn StakeChain,
    previous: Option<&ChainedHeader>,
    params: &ConsensusParameters,
    proof_of_stake: bool,
) -> u32 {
    let pos = match &params.proof_of_stake {
        Some(pos) => pos,
        None => return params.pow_limit,
    };
    let limit_bits = if proof_of_stake { pos.pos_limit } else { params.pow_limit };
    let limit = compact_to_target(limit_bits).unwrap_or_else(U256::max_value);

    let previous = match previous {
        Some(previous) => previous,
        None => return limit_bits,
    };
    let last = last_block_of_kind(stake_chain, previous, proof_of_stake);
    let before_last = match last.previous() {
        Some(parent) => last_block_of_kind(stake_chain, parent, proof_of_stake),
        None => return limit_bits,
    };
    if before_last.previous().is_none() {
        return limit_bits;
    }

    let spacing = pos.target_spacing as i64;
    let mut actual = last.header().timestamp as i64 - before_last.header().timestamp as i64;
    if actual < 0 {
        actual = spacing;
    }
    if actual > spacing * 10 {
        actual = spacing * 10;
    }

    let interval = pos.target_timespan as i64 / spacing;
    let old = compact_to_target(last.header().bits).unwrap_or(limit);
    let numerator = ((interval - 1) * spacing + 2 * actual) as u64;
    let denominator = ((interval + 1) * spacing) as u64;
    let scaled = U512::from(old) * U512::from(numerator) / U512::from(denominator);

    if scaled.is_zero() || scaled > U512::from(limit) {
        limit_bits
    } else {
        target_to_compact(u512_to_u256(scaled))
    }
}
