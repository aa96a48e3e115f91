//! Proof-of-stake rules
//!
//! Partial checks on coinstake placement and timestamps, then the full
//! validation steps that need coins: the kernel check, stake record, reward
//! and cold staking constraints.

use std::sync::Arc;

use log::trace;

use super::coinview::connect_transactions;
use super::{ConsensusRule, RuleCategory};
use crate::context::RuleContext;
use crate::economic::{get_block_subsidy, get_proof_of_stake_reward};
use crate::engine::RuleServices;
use crate::error::{ConsensusError, Result};
use crate::pow::{check_proof_of_work, get_next_target_required};
use crate::script::{is_cold_staking, is_op_return};
use crate::stake::{check_stake_depth, check_stake_kernel_hash, compute_stake_modifier_v2, BlockStake};
use crate::types::*;

/// Stake block and coinstake timestamps must be equal and pass the stake
/// timestamp mask; no transaction may be timestamped after its block.
pub struct PosTimeMaskRule;

impl ConsensusRule for PosTimeMaskRule {
    fn name(&self) -> &'static str {
        "PosTimeMaskRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::PartialValidation
    }

    fn run(&self, ctx: &mut RuleContext, services: &RuleServices) -> Result<()> {
        let pos = match &services.parameters.proof_of_stake {
            Some(pos) => pos,
            None => return Ok(()),
        };
        let block = ctx.block()?;
        let timestamp = block.header.timestamp;

        if block.is_proof_of_stake() {
            if !pos.check_stake_timestamp(timestamp) {
                return Err(ConsensusError::StakeTimeViolation);
            }
            let coinstake_time = block.transactions.get(1).and_then(|tx| tx.time).unwrap_or(timestamp);
            if coinstake_time != timestamp || !pos.check_stake_timestamp(coinstake_time) {
                return Err(ConsensusError::StakeTimeViolation);
            }
        }

        if block.transactions.iter().any(|tx| tx.time.map_or(false, |time| time > timestamp)) {
            return Err(ConsensusError::BlockTimeBeforeTrx);
        }
        Ok(())
    }
}

/// Ordinary transactions may not create empty outputs; that shape marks
/// coinbase and coinstake markers only.
pub struct CheckPosTransactionRule;

impl ConsensusRule for CheckPosTransactionRule {
    fn name(&self) -> &'static str {
        "CheckPosTransactionRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::PartialValidation
    }

    fn run(&self, ctx: &mut RuleContext, _services: &RuleServices) -> Result<()> {
        let offending = ctx
            .block()?
            .transactions
            .iter()
            .filter(|tx| !tx.is_coinbase() && !tx.is_coinstake())
            .any(|tx| tx.outputs.iter().any(TransactionOutput::is_empty));
        if offending {
            return Err(ConsensusError::BadTransactionEmptyOutput);
        }
        Ok(())
    }
}

/// Coinstake placement.
///
/// A stake block has exactly one coinstake, second in the block, and its
/// coinbase pays nothing through an empty first output. A work block has no
/// coinstake at all.
pub struct PosCoinstakeRule;

impl ConsensusRule for PosCoinstakeRule {
    fn name(&self) -> &'static str {
        "PosCoinstakeRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::PartialValidation
    }

    fn run(&self, ctx: &mut RuleContext, _services: &RuleServices) -> Result<()> {
        let block = ctx.block()?;
        if block.is_proof_of_stake() {
            let coinbase = block.transactions.first().ok_or(ConsensusError::BadCoinbaseMissing)?;
            let empty_first = coinbase.outputs.first().map_or(false, TransactionOutput::is_empty);
            if coinbase.total_out() != 0 || !empty_first {
                return Err(ConsensusError::BadStakeBlock);
            }
            if block.transactions.iter().skip(2).any(Transaction::is_coinstake) {
                return Err(ConsensusError::BadMultipleCoinstake);
            }
        } else if block.transactions.iter().any(Transaction::is_coinstake) {
            return Err(ConsensusError::BadStakeBlock);
        }
        Ok(())
    }
}

/// Difficulty on the hybrid chain.
///
/// Work blocks are only allowed up to the last proof-of-work height and must
/// meet their own target. Both kinds must carry the target computed from the
/// previous two blocks of the same kind.
pub struct CheckDifficultyHybridRule;

impl ConsensusRule for CheckDifficultyHybridRule {
    fn name(&self) -> &'static str {
        "CheckDifficultyHybridRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::FullValidation
    }

    fn run(&self, ctx: &mut RuleContext, services: &RuleServices) -> Result<()> {
        let params = &services.parameters;
        let pos = match &params.proof_of_stake {
            Some(pos) => pos,
            None => return Ok(()),
        };
        let is_proof_of_stake = ctx.block()?.is_proof_of_stake();
        let chained_header = ctx.chained_header();
        let bits = chained_header.header().bits;

        if !is_proof_of_stake {
            if chained_header.height() > pos.last_pow_block {
                return Err(ConsensusError::ProofOfWorkTooHigh);
            }
            if !ctx.skip_validation && !check_proof_of_work(&chained_header.hash(), bits, params.pow_limit) {
                return Err(ConsensusError::HighHash);
            }
        }

        let previous = ctx.previous()?;
        let expected =
            get_next_target_required(services.stake_chain.as_ref(), Some(previous.as_ref()), params, is_proof_of_stake);
        if bits != expected {
            return Err(ConsensusError::BadDiffBits);
        }
        Ok(())
    }
}

/// Full validation of a block on a proof-of-stake network.
///
/// 1. Build the block's stake record: for stake blocks check the staked coin's
///    depth and kernel hash, then chain the stake modifier
/// 2. Connect the transactions
/// 3. A stake block's coinstake may claim fees plus the stake reward; a work
///    block's coinbase fees plus the subsidy
pub struct PosCoinviewRule;

impl PosCoinviewRule {
    fn compute_block_stake(&self, ctx: &mut RuleContext, services: &RuleServices) -> Result<()> {
        let pos = services.parameters.proof_of_stake.as_ref().ok_or(ConsensusError::BadStakeBlock)?;
        let previous = Arc::clone(ctx.previous()?);
        let block = ctx.block()?;

        let mut stake = BlockStake::from_block(block);
        let previous_modifier = services
            .stake_chain
            .get(&previous.hash())
            .map_or(ZERO_HASH, |previous_stake| previous_stake.stake_modifier_v2);

        let kernel = if block.is_proof_of_stake() {
            let coinstake = block.transactions.get(1).ok_or(ConsensusError::NonCoinstake)?;
            let prevout = coinstake.inputs.first().ok_or(ConsensusError::NonCoinstake)?.prevout;
            let coins = ctx.unspent_output_set()?.access_coins(&prevout.hash).ok_or(ConsensusError::ReadTxPrevFailed)?;
            let staked = coins.try_get_output(prevout.index).ok_or(ConsensusError::ReadTxPrevFailed)?;

            if !ctx.skip_validation {
                check_stake_depth(pos, coins.height, &previous)?;
            }
            let result = check_stake_kernel_hash(
                &previous_modifier,
                block.header.bits,
                coins.time,
                &prevout,
                staked.value,
                coinstake.time.unwrap_or(block.header.timestamp),
            )?;
            if !result.meets_target && !ctx.skip_validation {
                return Err(ConsensusError::StakeHashInvalidTarget);
            }
            stake.hash_proof = result.hash;
            prevout.hash
        } else {
            let hash = block.hash();
            stake.hash_proof = hash;
            hash
        };

        stake.stake_modifier_v2 = compute_stake_modifier_v2(Some(previous.as_ref()), &previous_modifier, &kernel);
        trace!(
            target: "consensus",
            "stake modifier {} for block {}",
            display_hash(&stake.stake_modifier_v2),
            display_hash(&block.hash())
        );
        ctx.pos_mut().block_stake = Some(stake);
        Ok(())
    }
}

impl ConsensusRule for PosCoinviewRule {
    fn name(&self) -> &'static str {
        "PosCoinviewRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::FullValidation
    }

    fn run(&self, ctx: &mut RuleContext, services: &RuleServices) -> Result<()> {
        let params = &services.parameters;
        self.compute_block_stake(ctx, services)?;
        let fees = connect_transactions(ctx, services)?;

        let height = ctx.height();
        let value_in = ctx.pos.as_ref().map_or(0, |pos| pos.total_coinstake_value_in);
        let block = ctx.block()?;
        if block.is_proof_of_stake() {
            let coinstake = block.transactions.get(1).ok_or(ConsensusError::NonCoinstake)?;
            let reward = coinstake.total_out().saturating_sub(value_in);
            if reward > fees.saturating_add(get_proof_of_stake_reward(height, params)) {
                return Err(ConsensusError::BadCoinstakeAmount);
            }
        } else {
            let coinbase = block.transactions.first().ok_or(ConsensusError::BadCoinbaseMissing)?;
            if coinbase.total_out() > fees.saturating_add(get_block_subsidy(height, params)) {
                return Err(ConsensusError::BadCoinbaseAmount);
            }
        }
        Ok(())
    }
}

/// Cold staking coinstakes.
///
/// When any staked coin is a cold staking output, every staked coin must share
/// that script and the coinstake must pay at least the staked value back to
/// it. OP_RETURN outputs (the revealed signing key) are ignored.
pub struct PosColdStakingRule;

impl ConsensusRule for PosColdStakingRule {
    fn name(&self) -> &'static str {
        "PosColdStakingRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::FullValidation
    }

    fn run(&self, ctx: &mut RuleContext, _services: &RuleServices) -> Result<()> {
        if !ctx.flags.is_cold_staking_active() {
            return Ok(());
        }
        let block = ctx.block()?;
        let coinstake = match block.transactions.get(1) {
            Some(tx) if block.is_proof_of_stake() => tx,
            _ => return Ok(()),
        };
        let pos = match &ctx.pos {
            Some(pos) => pos,
            None => return Ok(()),
        };
        let spent = &pos.coinstake_prev_outputs;
        if !spent.iter().any(|output| is_cold_staking(&output.script_pubkey)) {
            return Ok(());
        }

        let script = match spent.first() {
            Some(first) => &first.script_pubkey,
            None => return Ok(()),
        };
        if spent.iter().any(|output| output.script_pubkey != *script) {
            return Err(ConsensusError::BadColdstakeInputs);
        }

        let mut returned: Integer = 0;
        for output in coinstake.outputs.iter().skip(1) {
            if is_op_return(&output.script_pubkey) {
                continue;
            }
            if output.script_pubkey != *script {
                return Err(ConsensusError::BadColdstakeOutputs);
            }
            returned = returned.saturating_add(output.value);
        }
        if returned < pos.total_coinstake_value_in {
            return Err(ConsensusError::BadColdstakeAmount);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainedHeader;
    use crate::coinview::MemoryCoinView;
    use crate::context::ValidationContext;
    use crate::deployments::ScriptFlags;
    use crate::network::{ConsensusParameters, Network};
    use crate::script::ScriptBuilder;

    fn services() -> RuleServices {
        RuleServices::new(
            ConsensusParameters::for_network(Network::StratisRegTest),
            Arc::new(MemoryCoinView::new(ZERO_HASH)),
        )
    }

    fn coinbase(value: Integer) -> Transaction {
        Transaction {
            version: 1,
            time: Some(160),
            inputs: vec![TransactionInput { prevout: OutPoint::null(), script_sig: vec![0x51, 0x00], sequence: 0 }],
            outputs: vec![TransactionOutput { value, script_pubkey: vec![] }],
            lock_time: 0,
        }
    }

    fn coinstake(time: u32, outputs: Vec<TransactionOutput>) -> Transaction {
        let mut all = vec![TransactionOutput { value: 0, script_pubkey: vec![] }];
        all.extend(outputs);
        Transaction {
            version: 1,
            time: Some(time),
            inputs: vec![TransactionInput { prevout: OutPoint::new([1; 32], 0), script_sig: vec![], sequence: 0 }],
            outputs: all,
            lock_time: 0,
        }
    }

    fn reward(value: Integer) -> TransactionOutput {
        TransactionOutput { value, script_pubkey: vec![0x51] }
    }

    fn context(timestamp: u32, bits: u32, transactions: Vec<Transaction>) -> RuleContext {
        let genesis = ChainedHeader::genesis(BlockHeader {
            version: 7,
            prev_block_hash: ZERO_HASH,
            merkle_root: ZERO_HASH,
            timestamp: 16,
            bits: 0x207fffff,
            nonce: 0,
        });
        let header = BlockHeader { prev_block_hash: genesis.hash(), timestamp, bits, ..genesis.header().clone() };
        let block = Block { header: header.clone(), transactions, signature: vec![] };
        RuleContext::new(ValidationContext::for_block(block, ChainedHeader::extend(&genesis, header)), 0, None)
    }

    #[test]
    fn test_stake_time_mask() {
        let services = services();
        let mut ctx = context(160, 0x207fffff, vec![coinbase(0), coinstake(160, vec![reward(5)])]);
        assert_eq!(PosTimeMaskRule.run(&mut ctx, &services), Ok(()));

        let mut ctx = context(161, 0x207fffff, vec![coinbase(0), coinstake(161, vec![reward(5)])]);
        assert_eq!(PosTimeMaskRule.run(&mut ctx, &services), Err(ConsensusError::StakeTimeViolation));

        // Coinstake time must equal the block time
        let mut ctx = context(176, 0x207fffff, vec![coinbase(0), coinstake(160, vec![reward(5)])]);
        assert_eq!(PosTimeMaskRule.run(&mut ctx, &services), Err(ConsensusError::StakeTimeViolation));
    }

    #[test]
    fn test_transaction_after_block_time() {
        let services = services();
        let mut late = coinbase(5);
        late.time = Some(200);
        let mut ctx = context(160, 0x207fffff, vec![late]);
        assert_eq!(PosTimeMaskRule.run(&mut ctx, &services), Err(ConsensusError::BlockTimeBeforeTrx));
    }

    #[test]
    fn test_coinstake_placement() {
        let services = services();
        let mut ctx = context(160, 0x207fffff, vec![coinbase(0), coinstake(160, vec![reward(5)])]);
        assert_eq!(PosCoinstakeRule.run(&mut ctx, &services), Ok(()));

        let mut ctx = context(160, 0x207fffff, vec![coinbase(1), coinstake(160, vec![reward(5)])]);
        assert_eq!(PosCoinstakeRule.run(&mut ctx, &services), Err(ConsensusError::BadStakeBlock));

        let second = Transaction { lock_time: 1, ..coinstake(160, vec![reward(5)]) };
        let mut ctx = context(160, 0x207fffff, vec![coinbase(0), coinstake(160, vec![reward(5)]), second.clone()]);
        assert_eq!(PosCoinstakeRule.run(&mut ctx, &services), Err(ConsensusError::BadMultipleCoinstake));

        // A coinstake that is not second makes a work block carrying a coinstake
        let user = Transaction { outputs: vec![reward(1)], ..coinstake(160, vec![]) };
        let mut ctx = context(160, 0x207fffff, vec![coinbase(5), user, second]);
        assert_eq!(PosCoinstakeRule.run(&mut ctx, &services), Err(ConsensusError::BadStakeBlock));
    }

    #[test]
    fn test_user_transaction_empty_output() {
        let services = services();
        let user = Transaction {
            outputs: vec![reward(1), TransactionOutput { value: 0, script_pubkey: vec![] }],
            inputs: vec![TransactionInput { prevout: OutPoint::new([2; 32], 0), script_sig: vec![], sequence: 0 }],
            ..coinbase(0)
        };
        let mut ctx = context(160, 0x207fffff, vec![coinbase(5), user]);
        assert_eq!(
            CheckPosTransactionRule.run(&mut ctx, &services),
            Err(ConsensusError::BadTransactionEmptyOutput)
        );
    }

    #[test]
    fn test_hybrid_target_at_limit() {
        let services = services();
        let mut ctx = context(160, 0x207fffff, vec![coinbase(0), coinstake(160, vec![reward(5)])]);
        assert_eq!(CheckDifficultyHybridRule.run(&mut ctx, &services), Ok(()));

        let mut ctx = context(160, 0x1d00ffff, vec![coinbase(0), coinstake(160, vec![reward(5)])]);
        assert_eq!(CheckDifficultyHybridRule.run(&mut ctx, &services), Err(ConsensusError::BadDiffBits));
    }

    fn cold_context(outputs: Vec<TransactionOutput>, spent: Vec<TransactionOutput>) -> RuleContext {
        let value_in: Integer = spent.iter().map(|output| output.value).sum();
        let mut ctx = context(160, 0x207fffff, vec![coinbase(0), coinstake(160, outputs)]);
        ctx.flags.script_flags |= ScriptFlags::CHECKCOLDSTAKEVERIFY;
        let pos = ctx.pos_mut();
        pos.total_coinstake_value_in = value_in;
        pos.coinstake_prev_outputs = spent;
        ctx
    }

    #[test]
    fn test_cold_staking_outputs() {
        let services = services();
        let script = ScriptBuilder::cold_staking(&[1; 20], &[2; 20]);
        let cold = |value| TransactionOutput { value, script_pubkey: script.clone() };
        let key_reveal = TransactionOutput { value: 0, script_pubkey: ScriptBuilder::op_return(&[2; 33]) };

        let mut ctx = cold_context(vec![cold(60), cold(41), key_reveal.clone()], vec![cold(100)]);
        assert_eq!(PosColdStakingRule.run(&mut ctx, &services), Ok(()));

        let mut ctx = cold_context(vec![cold(99)], vec![cold(100)]);
        assert_eq!(PosColdStakingRule.run(&mut ctx, &services), Err(ConsensusError::BadColdstakeAmount));

        let mut ctx = cold_context(vec![cold(100), reward(1)], vec![cold(100)]);
        assert_eq!(PosColdStakingRule.run(&mut ctx, &services), Err(ConsensusError::BadColdstakeOutputs));

        let mut ctx = cold_context(vec![cold(101)], vec![cold(50), reward(50)]);
        assert_eq!(PosColdStakingRule.run(&mut ctx, &services), Err(ConsensusError::BadColdstakeInputs));

        // Not enforced before activation
        let mut ctx = cold_context(vec![cold(99)], vec![cold(100)]);
        ctx.flags.script_flags.remove(ScriptFlags::CHECKCOLDSTAKEVERIFY);
        assert_eq!(PosColdStakingRule.run(&mut ctx, &services), Ok(()));
    }
}
