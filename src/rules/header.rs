//! Header rules

use super::{ConsensusRule, RuleCategory};
use crate::context::RuleContext;
use crate::engine::RuleServices;
use crate::error::{ConsensusError, Result};
use crate::pow::{check_proof_of_work, get_next_work_required};

/// Reject headers conflicting with a hardened checkpoint.
pub struct CheckpointsRule;

impl ConsensusRule for CheckpointsRule {
    fn name(&self) -> &'static str {
        "CheckpointsRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Header
    }

    fn run(&self, ctx: &mut RuleContext, services: &RuleServices) -> Result<()> {
        let header = ctx.chained_header();
        if !services.checkpoints.check_hardened(header.height(), &header.hash()) {
            return Err(ConsensusError::CheckpointViolation);
        }
        Ok(())
    }
}

/// Proof-of-work header time: after the previous median time past and not
/// further ahead of adjusted time than the network allows.
pub struct HeaderTimeChecksRule;

impl ConsensusRule for HeaderTimeChecksRule {
    fn name(&self) -> &'static str {
        "HeaderTimeChecksRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Header
    }

    fn run(&self, ctx: &mut RuleContext, services: &RuleServices) -> Result<()> {
        let timestamp = ctx.chained_header().header().timestamp;
        if timestamp <= ctx.previous()?.median_time_past() {
            return Err(ConsensusError::TimeTooOld);
        }
        if timestamp > ctx.time.saturating_add(services.parameters.max_future_block_time) {
            return Err(ConsensusError::TimeTooNew);
        }
        Ok(())
    }
}

/// Proof-of-work value and expected difficulty bits.
pub struct CheckDifficultyPowRule;

impl ConsensusRule for CheckDifficultyPowRule {
    fn name(&self) -> &'static str {
        "CheckDifficultyPowRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Header
    }

    fn run(&self, ctx: &mut RuleContext, services: &RuleServices) -> Result<()> {
        let params = &services.parameters;
        let chained_header = ctx.chained_header();
        let header = chained_header.header();

        if !ctx.skip_validation && !check_proof_of_work(&chained_header.hash(), header.bits, params.pow_limit) {
            return Err(ConsensusError::HighHash);
        }
        let expected = get_next_work_required(ctx.previous()?, header.timestamp, params);
        if header.bits != expected {
            return Err(ConsensusError::BadDiffBits);
        }
        Ok(())
    }
}

/// Header version must meet the minimum for its height.
pub struct HeaderVersionRule;

impl ConsensusRule for HeaderVersionRule {
    fn name(&self) -> &'static str {
        "HeaderVersionRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Header
    }

    fn run(&self, ctx: &mut RuleContext, services: &RuleServices) -> Result<()> {
        let version = ctx.chained_header().header().version;
        if version < services.parameters.min_header_version(ctx.height()) {
            return Err(ConsensusError::BadVersion);
        }
        Ok(())
    }
}

/// Proof-of-stake header time: strictly after the previous block.
pub struct HeaderTimeChecksPosRule;

impl ConsensusRule for HeaderTimeChecksPosRule {
    fn name(&self) -> &'static str {
        "HeaderTimeChecksPosRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Header
    }

    fn run(&self, ctx: &mut RuleContext, _services: &RuleServices) -> Result<()> {
        let timestamp = ctx.chained_header().header().timestamp;
        if timestamp <= ctx.previous()?.header().timestamp {
            return Err(ConsensusError::BlockTimestampTooEarly);
        }
        Ok(())
    }
}

/// Proof-of-stake header time may not run past the network's future drift.
pub struct PosFutureDriftRule;

impl ConsensusRule for PosFutureDriftRule {
    fn name(&self) -> &'static str {
        "PosFutureDriftRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Header
    }

    fn run(&self, ctx: &mut RuleContext, services: &RuleServices) -> Result<()> {
        let pos = match &services.parameters.proof_of_stake {
            Some(pos) => pos,
            None => return Ok(()),
        };
        if ctx.chained_header().header().timestamp > pos.future_drift(ctx.time) {
            return Err(ConsensusError::BlockTimestampTooFar);
        }
        Ok(())
    }
}
