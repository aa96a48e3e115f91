//! Soft-fork activation
//!
//! Buried deployments activate at a fixed height. Threshold (BIP9) deployments
//! move through [`ThresholdState`] once per confirmation window, based on how
//! many blocks in the previous window signalled the deployment's version bit.
//! [`DeploymentFlagsCalculator`] folds both into the [`DeploymentFlags`] that
//! the rules consult for a block.

use std::collections::HashMap;
use std::sync::Arc;

use bitflags::bitflags;
use log::trace;
use parking_lot::Mutex;

use crate::chain::ChainedHeader;
use crate::constants::{VERSIONBITS_TOP_BITS, VERSIONBITS_TOP_MASK};
use crate::network::{ConsensusParameters, DEPLOYMENT_CSV};
use crate::types::Hash;

bitflags! {
    /// Script verification flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ScriptFlags: u32 {
        const P2SH = 1 << 0;
        const DERSIG = 1 << 2;
        const CHECKLOCKTIMEVERIFY = 1 << 9;
        const CHECKSEQUENCEVERIFY = 1 << 10;
        const CHECKCOLDSTAKEVERIFY = 1 << 20;
    }
}

bitflags! {
    /// Lock time interpretation flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LockTimeFlags: u32 {
        /// Enforce BIP68 relative lock times
        const VERIFY_SEQUENCE = 1 << 0;
        /// Use the previous block's median time past as the finality cutoff (BIP113)
        const MEDIAN_TIME_PAST = 1 << 1;
    }
}

/// Flags in force for one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeploymentFlags {
    pub script_flags: ScriptFlags,
    pub lock_time_flags: LockTimeFlags,
    pub enforce_bip30: bool,
    pub enforce_bip34: bool,
}

impl Default for DeploymentFlags {
    fn default() -> Self {
        DeploymentFlags {
            script_flags: ScriptFlags::empty(),
            lock_time_flags: LockTimeFlags::empty(),
            enforce_bip30: true,
            enforce_bip34: false,
        }
    }
}

impl DeploymentFlags {
    pub fn is_cold_staking_active(&self) -> bool {
        self.script_flags.contains(ScriptFlags::CHECKCOLDSTAKEVERIFY)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThresholdState {
    Defined,
    Started,
    LockedIn,
    Active,
    Failed,
}

/// Computes deployment flags, caching threshold states per window boundary.
pub struct DeploymentFlagsCalculator {
    parameters: Arc<ConsensusParameters>,
    cache: Mutex<HashMap<(usize, Hash), ThresholdState>>,
}

impl DeploymentFlagsCalculator {
    pub fn new(parameters: Arc<ConsensusParameters>) -> Self {
        DeploymentFlagsCalculator { parameters, cache: Mutex::new(HashMap::new()) }
    }

    /// Flags for the block at `chained_header`.
    ///
    /// 1. P2SH once the header time reaches the BIP16 switch time
    /// 2. BIP34/66/65 and cold staking by buried height
    /// 3. CSV script and lock-time flags when the CSV deployment is active
    /// 4. BIP30 unless the block is one of the historic exceptions
    pub fn compute(&self, chained_header: &ChainedHeader) -> DeploymentFlags {
        let params = &self.parameters;
        let height = chained_header.height();
        let mut flags = DeploymentFlags {
            enforce_bip30: !params.is_bip30_exception(height, &chained_header.hash()),
            ..DeploymentFlags::default()
        };

        if chained_header.header().timestamp >= params.bip16_time {
            flags.script_flags |= ScriptFlags::P2SH;
        }
        if height >= params.buried.bip34 {
            flags.enforce_bip34 = true;
        }
        if height >= params.buried.bip66 {
            flags.script_flags |= ScriptFlags::DERSIG;
        }
        if height >= params.buried.bip65 {
            flags.script_flags |= ScriptFlags::CHECKLOCKTIMEVERIFY;
        }
        if params.deployments.len() > DEPLOYMENT_CSV
            && self.state(chained_header.previous().map(|p| p.as_ref()), DEPLOYMENT_CSV) == ThresholdState::Active
        {
            flags.script_flags |= ScriptFlags::CHECKSEQUENCEVERIFY;
            flags.lock_time_flags |= LockTimeFlags::VERIFY_SEQUENCE | LockTimeFlags::MEDIAN_TIME_PAST;
        }
        if params.is_cold_staking_active(height) {
            flags.script_flags |= ScriptFlags::CHECKCOLDSTAKEVERIFY;
        }

        trace!(target: "consensus", "deployment flags at height {}: {:?}", height, flags);
        flags
    }

    /// State of `deployment` for the block built on `previous`.
    ///
    /// 1. Move back to the last block of the previous window
    /// 2. Walk back window by window until a cached state, genesis, or a window
    ///    that ended before the start time (all `Defined`)
    /// 3. Replay the transitions forward, caching each window's state
    pub fn state(&self, previous: Option<&ChainedHeader>, deployment: usize) -> ThresholdState {
        let params = &self.parameters;
        let period = params.miner_confirmation_window;
        let threshold = params.rule_change_activation_threshold;
        let deployment_params = match params.deployments.get(deployment) {
            Some(d) => d,
            None => return ThresholdState::Failed,
        };

        let mut boundary = previous.and_then(|p| {
            p.height()
                .checked_sub((p.height() + 1) % period)
                .and_then(|h| p.get_ancestor(h))
        });

        let mut cache = self.cache.lock();
        let mut to_compute: Vec<&ChainedHeader> = Vec::new();
        let mut state = loop {
            let current = match boundary {
                None => break ThresholdState::Defined,
                Some(current) => current,
            };
            if let Some(cached) = cache.get(&(deployment, current.hash())) {
                break *cached;
            }
            if current.median_time_past() < deployment_params.start_time {
                cache.insert((deployment, current.hash()), ThresholdState::Defined);
                break ThresholdState::Defined;
            }
            to_compute.push(current);
            boundary = current.height().checked_sub(period).and_then(|h| current.get_ancestor(h));
        };

        while let Some(current) = to_compute.pop() {
            let median_time = current.median_time_past();
            state = match state {
                ThresholdState::Defined => {
                    if median_time >= deployment_params.timeout {
                        ThresholdState::Failed
                    } else if median_time >= deployment_params.start_time {
                        ThresholdState::Started
                    } else {
                        ThresholdState::Defined
                    }
                }
                ThresholdState::Started => {
                    if median_time >= deployment_params.timeout {
                        ThresholdState::Failed
                    } else {
                        let signalling = current
                            .ancestors()
                            .take(period as usize)
                            .filter(|h| signals(h.header().version, deployment_params.bit))
                            .count() as u32;
                        if signalling >= threshold {
                            ThresholdState::LockedIn
                        } else {
                            ThresholdState::Started
                        }
                    }
                }
                ThresholdState::LockedIn => ThresholdState::Active,
                terminal => terminal,
            };
            cache.insert((deployment, current.hash()), state);
        }
        state
    }
}

fn signals(version: i32, bit: u8) -> bool {
    (version & VERSIONBITS_TOP_MASK) == VERSIONBITS_TOP_BITS && (version >> bit) & 1 == 1
}
