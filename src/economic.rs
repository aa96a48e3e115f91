//! Block rewards

use crate::constants::*;
use crate::network::ConsensusParameters;
use crate::types::*;

/// GetBlockSubsidy: ℕ → ℤ
///
/// Reward available to the coinbase of a proof-of-work block at `height`.
///
/// Bitcoin networks: 50 coins halving every `subsidy_halving_interval` blocks,
/// zero after 64 halvings. Proof-of-stake networks: the premine at the premine
/// height, otherwise the fixed proof-of-work reward.
pub fn get_block_subsidy(height: u32, params: &ConsensusParameters) -> Integer {
    if let Some(pos) = &params.proof_of_stake {
        if height == pos.premine_height {
            return pos.premine_reward;
        }
        return pos.proof_of_work_reward;
    }

    let halvings = height / params.subsidy_halving_interval;
    if halvings >= 64 {
        return 0;
    }
    INITIAL_SUBSIDY >> halvings
}

/// Reward a coinstake at `height` may claim on top of the fees it collects.
pub fn get_proof_of_stake_reward(height: u32, params: &ConsensusParameters) -> Integer {
    match &params.proof_of_stake {
        Some(pos) if height == pos.premine_height => pos.premine_reward,
        Some(pos) => pos.proof_of_stake_reward,
        None => 0,
    }
}
