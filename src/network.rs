//! Per-network consensus parameters
//!
//! Every network-dependent constant the rules read lives in
//! [`ConsensusParameters`], built with [`ConsensusParameters::for_network`].
//!
//! Block headers are hashed with double SHA-256 on every network. Stratis main
//! hashes its headers with X13, which is not implemented here, so
//! [`Network::StratisMain`] supplies parameters only: its checkpoints are X13
//! hashes and its proof-of-work checks will not match real main-net headers.
//! Full header validation of a Stratis chain runs on
//! [`Network::StratisRegTest`].

use serde::{Deserialize, Serialize};

use crate::constants::COIN;
use crate::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    BitcoinMain,
    BitcoinRegTest,
    /// Parameters only; main-net headers hash with X13, not double SHA-256
    StratisMain,
    StratisRegTest,
}

/// Which rule set a network runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsensusType {
    ProofOfWork,
    /// Hybrid chain: proof-of-work up to `last_pow_block`, then proof-of-stake
    ProofOfStake,
}

/// Soft forks activated at a fixed height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuriedDeployments {
    pub bip34: u32,
    pub bip65: u32,
    pub bip66: u32,
    /// `None` on networks without cold staking
    pub cold_staking: Option<u32>,
}

/// A BIP9 version-bits deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdDeployment {
    pub name: &'static str,
    pub bit: u8,
    /// Median time past at which signalling starts
    pub start_time: u32,
    /// Median time past after which a deployment that has not locked in fails
    pub timeout: u32,
}

/// Index of CSV (BIP68/112/113) in [`ConsensusParameters::deployments`].
pub const DEPLOYMENT_CSV: usize = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofOfStakeParameters {
    /// Coinstake and block timestamps must have these bits cleared
    pub stake_timestamp_mask: u32,
    pub drifting_bug_fix_timestamp: u32,
    pub max_future_drift_before_fix: u32,
    pub max_future_drift_after_fix: u32,
    pub stake_min_confirmations: u32,
    pub last_pow_block: u32,
    /// Easiest allowed proof-of-stake target (compact)
    pub pos_limit: u32,
    pub target_spacing: u32,
    pub target_timespan: u32,
    pub proof_of_stake_reward: Integer,
    pub proof_of_work_reward: Integer,
    pub premine_height: u32,
    pub premine_reward: Integer,
}

impl ProofOfStakeParameters {
    /// Latest acceptable block time given the node's adjusted time.
    pub fn future_drift(&self, adjusted_time: u32) -> u32 {
        let drift = if adjusted_time > self.drifting_bug_fix_timestamp {
            self.max_future_drift_after_fix
        } else {
            self.max_future_drift_before_fix
        };
        adjusted_time.saturating_add(drift)
    }

    pub fn check_stake_timestamp(&self, time: u32) -> bool {
        time & self.stake_timestamp_mask == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusParameters {
    pub network: Network,
    pub consensus_type: ConsensusType,
    pub max_money: Integer,
    pub max_block_weight: u32,
    pub max_block_base_size: u32,
    pub max_block_sigops_cost: u32,
    pub coinbase_maturity: u32,
    /// Proof-of-work networks: seconds a header may run ahead of adjusted time
    pub max_future_block_time: u32,

    pub pow_limit: u32,
    pub pow_target_timespan: u32,
    pub pow_target_spacing: u32,
    pub pow_allow_min_difficulty_blocks: bool,
    pub pow_no_retargeting: bool,
    pub subsidy_halving_interval: u32,

    pub bip16_time: u32,
    pub buried: BuriedDeployments,
    /// Blocks allowed to overwrite unspent transactions (pre-BIP30 duplicates)
    pub bip30_exceptions: Vec<(u32, Hash)>,
    /// (activation height, minimum header version), ascending by height
    pub min_header_versions: Vec<(u32, i32)>,

    pub miner_confirmation_window: u32,
    pub rule_change_activation_threshold: u32,
    pub deployments: Vec<ThresholdDeployment>,

    pub checkpoints: Vec<(u32, Hash)>,
    pub proof_of_stake: Option<ProofOfStakeParameters>,
}

fn hash(display_hex: &str) -> Hash {
    parse_hash(display_hex).unwrap_or(ZERO_HASH)
}

impl ConsensusParameters {
    pub fn for_network(network: Network) -> Self {
        match network {
            Network::BitcoinMain => Self::bitcoin_main(),
            Network::BitcoinRegTest => Self::bitcoin_regtest(),
            Network::StratisMain => Self::stratis_main(),
            Network::StratisRegTest => Self::stratis_regtest(),
        }
    }

    fn bitcoin_main() -> Self {
        ConsensusParameters {
            network: Network::BitcoinMain,
            consensus_type: ConsensusType::ProofOfWork,
            max_money: 21_000_000 * COIN,
            max_block_weight: 4_000_000,
            max_block_base_size: 1_000_000,
            max_block_sigops_cost: 80_000,
            coinbase_maturity: 100,
            max_future_block_time: 2 * 60 * 60,
            pow_limit: 0x1d00ffff,
            pow_target_timespan: 14 * 24 * 60 * 60,
            pow_target_spacing: 10 * 60,
            pow_allow_min_difficulty_blocks: false,
            pow_no_retargeting: false,
            subsidy_halving_interval: 210_000,
            bip16_time: 1333238400,
            buried: BuriedDeployments { bip34: 227931, bip65: 388381, bip66: 363725, cold_staking: None },
            bip30_exceptions: vec![
                (91842, hash("00000000000a4d0a398161ffc163c503763b1f4360639393e0e4c8e300e0caec")),
                (91880, hash("00000000000743f190a18c5577a3c2d2a1f610ae9601ac046a38084ccb7cd721")),
            ],
            min_header_versions: vec![(227931, 2), (363725, 3), (388381, 4)],
            miner_confirmation_window: 2016,
            rule_change_activation_threshold: 1916,
            deployments: vec![ThresholdDeployment {
                name: "csv",
                bit: 0,
                start_time: 1462060800,
                timeout: 1493596800,
            }],
            checkpoints: vec![
                (0, hash("000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f")),
                (11111, hash("0000000069e244f73d78e8fd29ba2fd2ed618bd6fa2ee92559f542fdb26e7c1d")),
                (33333, hash("000000002dd5588a74784eaa7ab0507a18ad16a236e7b1ce69f00d7ddfb5d0a6")),
                (74000, hash("0000000000573993a3c9e41ce34471c079dcf5f52a0e824a81e7f953b8661a20")),
            ],
            proof_of_stake: None,
        }
    }

    fn bitcoin_regtest() -> Self {
        ConsensusParameters {
            network: Network::BitcoinRegTest,
            pow_limit: 0x207fffff,
            pow_allow_min_difficulty_blocks: true,
            pow_no_retargeting: true,
            subsidy_halving_interval: 150,
            bip16_time: 0,
            buried: BuriedDeployments { bip34: 500, bip65: 1351, bip66: 1251, cold_staking: None },
            bip30_exceptions: Vec::new(),
            min_header_versions: vec![(500, 2), (1251, 3), (1351, 4)],
            miner_confirmation_window: 144,
            rule_change_activation_threshold: 108,
            deployments: vec![ThresholdDeployment { name: "csv", bit: 0, start_time: 0, timeout: u32::MAX }],
            checkpoints: Vec::new(),
            ..Self::bitcoin_main()
        }
    }

    fn stratis_main() -> Self {
        ConsensusParameters {
            network: Network::StratisMain,
            consensus_type: ConsensusType::ProofOfStake,
            max_money: i64::MAX,
            max_block_weight: 4_000_000,
            max_block_base_size: 1_000_000,
            max_block_sigops_cost: 80_000,
            coinbase_maturity: 50,
            max_future_block_time: 2 * 60 * 60,
            pow_limit: 0x1e0fffff,
            pow_target_timespan: 14 * 24 * 60 * 60,
            pow_target_spacing: 10 * 60,
            pow_allow_min_difficulty_blocks: false,
            pow_no_retargeting: false,
            subsidy_halving_interval: 210_000,
            bip16_time: 0,
            buried: BuriedDeployments { bip34: 0, bip65: 0, bip66: 0, cold_staking: Some(1_000_000) },
            bip30_exceptions: Vec::new(),
            min_header_versions: vec![(0, 7)],
            miner_confirmation_window: 2016,
            rule_change_activation_threshold: 1916,
            deployments: vec![ThresholdDeployment { name: "csv", bit: 0, start_time: 1462060800, timeout: 1493596800 }],
            checkpoints: vec![(0, hash("0000066e91e46e5a264d42c89e1204963b2ee6be230b443e9159020539d972af"))],
            proof_of_stake: Some(ProofOfStakeParameters {
                stake_timestamp_mask: 0x0000000F,
                drifting_bug_fix_timestamp: 1510704000,
                max_future_drift_before_fix: 128 * 60 * 60,
                max_future_drift_after_fix: 15,
                stake_min_confirmations: 50,
                last_pow_block: 12500,
                pos_limit: 0x1e0fffff,
                target_spacing: 64,
                target_timespan: 16 * 60,
                proof_of_stake_reward: COIN,
                proof_of_work_reward: 4 * COIN,
                premine_height: 2,
                premine_reward: 98_000_000 * COIN,
            }),
        }
    }

    fn stratis_regtest() -> Self {
        let main = Self::stratis_main();
        let pos = main.proof_of_stake.clone().map(|pos| ProofOfStakeParameters {
            stake_min_confirmations: 10,
            pos_limit: 0x207fffff,
            ..pos
        });
        ConsensusParameters {
            network: Network::StratisRegTest,
            coinbase_maturity: 10,
            pow_limit: 0x207fffff,
            pow_allow_min_difficulty_blocks: true,
            pow_no_retargeting: true,
            buried: BuriedDeployments { bip34: 0, bip65: 0, bip66: 0, cold_staking: Some(0) },
            miner_confirmation_window: 144,
            rule_change_activation_threshold: 108,
            deployments: vec![ThresholdDeployment { name: "csv", bit: 0, start_time: 0, timeout: u32::MAX }],
            checkpoints: Vec::new(),
            proof_of_stake: pos,
            ..main
        }
    }

    pub fn is_proof_of_stake(&self) -> bool {
        self.consensus_type == ConsensusType::ProofOfStake
    }

    pub fn difficulty_adjustment_interval(&self) -> u32 {
        self.pow_target_timespan / self.pow_target_spacing
    }

    /// Lowest header version accepted at `height`.
    pub fn min_header_version(&self, height: u32) -> i32 {
        self.min_header_versions
            .iter()
            .filter(|(activation, _)| height >= *activation)
            .map(|(_, version)| *version)
            .last()
            .unwrap_or(1)
    }

    pub fn is_bip30_exception(&self, height: u32, block_hash: &Hash) -> bool {
        self.bip30_exceptions.iter().any(|(h, hash)| *h == height && hash == block_hash)
    }

    pub fn is_cold_staking_active(&self, height: u32) -> bool {
        self.buried.cold_staking.map_or(false, |activation| height >= activation)
    }
}
