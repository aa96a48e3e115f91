//! Context-free block checks

use super::{ConsensusRule, RuleCategory};
use crate::constants::WITNESS_SCALE_FACTOR;
use crate::context::RuleContext;
use crate::deployments::LockTimeFlags;
use crate::engine::RuleServices;
use crate::error::{ConsensusError, Result};
use crate::locktime::is_final_tx;
use crate::script::{count_sigops, script_push_int};
use crate::transaction::check_transaction;
use crate::types::*;

/// Compute the deployment flags for the block before any other partial check.
pub struct SetActivationDeploymentsPartialValidationRule;

impl ConsensusRule for SetActivationDeploymentsPartialValidationRule {
    fn name(&self) -> &'static str {
        "SetActivationDeploymentsPartialValidationRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::PartialValidation
    }

    fn run(&self, ctx: &mut RuleContext, services: &RuleServices) -> Result<()> {
        ctx.flags = services.deployments.compute(ctx.chained_header());
        Ok(())
    }
}

/// Every transaction must be final at the block's height, judged against the
/// parent's median time past once BIP113 is active and the block time before.
pub struct TransactionLocktimeActivationRule;

impl ConsensusRule for TransactionLocktimeActivationRule {
    fn name(&self) -> &'static str {
        "TransactionLocktimeActivationRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::PartialValidation
    }

    fn run(&self, ctx: &mut RuleContext, _services: &RuleServices) -> Result<()> {
        let block = ctx.block()?;
        let chained_header = ctx.chained_header();
        let cutoff = if ctx.flags.lock_time_flags.contains(LockTimeFlags::MEDIAN_TIME_PAST) {
            chained_header.previous().map_or(block.header.timestamp, |previous| previous.median_time_past())
        } else {
            block.header.timestamp
        };

        if block.transactions.iter().any(|tx| !is_final_tx(tx, chained_header.height(), cutoff)) {
            return Err(ConsensusError::BadTransactionNonFinal);
        }
        Ok(())
    }
}

/// Transaction count, serialized size and weight limits.
pub struct BlockSizeRule;

impl ConsensusRule for BlockSizeRule {
    fn name(&self) -> &'static str {
        "BlockSizeRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::PartialValidation
    }

    fn run(&self, ctx: &mut RuleContext, services: &RuleServices) -> Result<()> {
        let params = &services.parameters;
        let block = ctx.block()?;
        let max_weight = params.max_block_weight as usize;

        if block.transactions.is_empty()
            || block.transactions.len() * WITNESS_SCALE_FACTOR > max_weight
            || block.base_size() > params.max_block_base_size as usize
        {
            return Err(ConsensusError::BadBlockLength);
        }
        if block.weight() > max_weight {
            return Err(ConsensusError::BadBlockWeight);
        }
        Ok(())
    }
}

/// Exactly one coinbase, first in the block.
pub struct EnsureCoinbaseRule;

impl ConsensusRule for EnsureCoinbaseRule {
    fn name(&self) -> &'static str {
        "EnsureCoinbaseRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::PartialValidation
    }

    fn run(&self, ctx: &mut RuleContext, _services: &RuleServices) -> Result<()> {
        let block = ctx.block()?;
        match block.transactions.first() {
            Some(first) if first.is_coinbase() => {}
            _ => return Err(ConsensusError::BadCoinbaseMissing),
        }
        if block.transactions[1..].iter().any(Transaction::is_coinbase) {
            return Err(ConsensusError::BadMultipleCoinbase);
        }
        Ok(())
    }
}

/// BIP34: the coinbase scriptSig starts with the block height.
pub struct CoinbaseHeightActivationRule;

impl ConsensusRule for CoinbaseHeightActivationRule {
    fn name(&self) -> &'static str {
        "CoinbaseHeightActivationRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::PartialValidation
    }

    fn run(&self, ctx: &mut RuleContext, _services: &RuleServices) -> Result<()> {
        if !ctx.flags.enforce_bip34 {
            return Ok(());
        }
        let expected = script_push_int(ctx.height() as i64);
        let coinbase = ctx.block()?.transactions.first().ok_or(ConsensusError::BadCoinbaseMissing)?;
        let script_sig = coinbase.inputs.first().map(|input| input.script_sig.as_slice()).unwrap_or_default();
        if !script_sig.starts_with(&expected) {
            return Err(ConsensusError::BadCoinbaseHeight);
        }
        Ok(())
    }
}

/// Context-free checks on every transaction.
pub struct CheckPowTransactionRule;

impl ConsensusRule for CheckPowTransactionRule {
    fn name(&self) -> &'static str {
        "CheckPowTransactionRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::PartialValidation
    }

    fn run(&self, ctx: &mut RuleContext, services: &RuleServices) -> Result<()> {
        for tx in &ctx.block()?.transactions {
            check_transaction(tx, &services.parameters)?;
        }
        Ok(())
    }
}

/// Legacy signature operation count, scaled to cost.
pub struct CheckSigOpsRule;

pub fn legacy_sigops(tx: &Transaction) -> u32 {
    let inputs: u32 = tx.inputs.iter().map(|input| count_sigops(&input.script_sig, false)).sum();
    let outputs: u32 = tx.outputs.iter().map(|output| count_sigops(&output.script_pubkey, false)).sum();
    inputs + outputs
}

impl ConsensusRule for CheckSigOpsRule {
    fn name(&self) -> &'static str {
        "CheckSigOpsRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::PartialValidation
    }

    fn run(&self, ctx: &mut RuleContext, services: &RuleServices) -> Result<()> {
        let sigops: u64 = ctx.block()?.transactions.iter().map(|tx| legacy_sigops(tx) as u64).sum();
        if sigops * WITNESS_SCALE_FACTOR as u64 > services.parameters.max_block_sigops_cost as u64 {
            return Err(ConsensusError::BadBlockSigOps);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::chain::ChainedHeader;
    use crate::coinview::MemoryCoinView;
    use crate::constants::SEQUENCE_FINAL;
    use crate::context::ValidationContext;
    use crate::network::{ConsensusParameters, Network};
    use crate::script::opcodes::OP_CHECKSIG;

    fn services() -> RuleServices {
        RuleServices::new(
            ConsensusParameters::for_network(Network::BitcoinRegTest),
            Arc::new(MemoryCoinView::new(ZERO_HASH)),
        )
    }

    fn coinbase(script_sig: Vec<u8>) -> Transaction {
        Transaction {
            version: 1,
            time: None,
            inputs: vec![TransactionInput { prevout: OutPoint::null(), script_sig, sequence: SEQUENCE_FINAL }],
            outputs: vec![TransactionOutput { value: 50, script_pubkey: vec![0x51] }],
            lock_time: 0,
        }
    }

    fn spend(lock_time: u32, sequence: u32) -> Transaction {
        Transaction {
            version: 1,
            time: None,
            inputs: vec![TransactionInput { prevout: OutPoint::new([1; 32], 0), script_sig: vec![], sequence }],
            outputs: vec![TransactionOutput { value: 1, script_pubkey: vec![0x51] }],
            lock_time,
        }
    }

    /// Context for a block at `height` whose parent chain has 600 second spacing.
    fn context(height: u32, transactions: Vec<Transaction>) -> RuleContext {
        let mut tip = ChainedHeader::genesis(BlockHeader {
            version: 4,
            prev_block_hash: ZERO_HASH,
            merkle_root: ZERO_HASH,
            timestamp: 1_000_000,
            bits: 0x207fffff,
            nonce: 0,
        });
        for i in 1..=height {
            let header = BlockHeader { prev_block_hash: tip.hash(), timestamp: 1_000_000 + i * 600, ..tip.header().clone() };
            tip = ChainedHeader::extend(&tip, header);
        }
        let block = Block { header: tip.header().clone(), transactions, signature: vec![] };
        RuleContext::new(ValidationContext::for_block(block, tip), 0, None)
    }

    #[test]
    fn test_coinbase_must_lead() {
        let services = services();
        let mut ctx = context(1, vec![spend(0, 0)]);
        assert_eq!(EnsureCoinbaseRule.run(&mut ctx, &services), Err(ConsensusError::BadCoinbaseMissing));

        let mut ctx = context(1, vec![coinbase(vec![0x51, 0x00]), coinbase(vec![0x52, 0x00])]);
        assert_eq!(EnsureCoinbaseRule.run(&mut ctx, &services), Err(ConsensusError::BadMultipleCoinbase));

        let mut ctx = context(1, vec![]);
        assert_eq!(EnsureCoinbaseRule.run(&mut ctx, &services), Err(ConsensusError::BadCoinbaseMissing));
        assert_eq!(BlockSizeRule.run(&mut ctx, &services), Err(ConsensusError::BadBlockLength));
    }

    #[test]
    fn test_coinbase_height_encoding() {
        let services = services();
        let height = 600;
        let mut script = script_push_int(height as i64);
        script.push(0x00);

        let mut ctx = context(height, vec![coinbase(script)]);
        SetActivationDeploymentsPartialValidationRule.run(&mut ctx, &services).unwrap();
        assert!(ctx.flags.enforce_bip34);
        assert_eq!(CoinbaseHeightActivationRule.run(&mut ctx, &services), Ok(()));

        let mut wrong = script_push_int(height as i64 - 1);
        wrong.push(0x00);
        let mut ctx = context(height, vec![coinbase(wrong.clone())]);
        SetActivationDeploymentsPartialValidationRule.run(&mut ctx, &services).unwrap();
        assert_eq!(CoinbaseHeightActivationRule.run(&mut ctx, &services), Err(ConsensusError::BadCoinbaseHeight));

        // Below the BIP34 height anything goes
        let mut ctx = context(20, vec![coinbase(wrong)]);
        SetActivationDeploymentsPartialValidationRule.run(&mut ctx, &services).unwrap();
        assert_eq!(CoinbaseHeightActivationRule.run(&mut ctx, &services), Ok(()));
    }

    #[test]
    fn test_non_final_transaction() {
        let services = services();
        let mut ctx = context(10, vec![coinbase(vec![0x51, 0x00]), spend(10, 0)]);
        assert_eq!(
            TransactionLocktimeActivationRule.run(&mut ctx, &services),
            Err(ConsensusError::BadTransactionNonFinal)
        );

        let mut ctx = context(10, vec![coinbase(vec![0x51, 0x00]), spend(9, 0)]);
        assert_eq!(TransactionLocktimeActivationRule.run(&mut ctx, &services), Ok(()));
    }

    #[test]
    fn test_sigops_limit() {
        let services = services();
        let limit = services.parameters.max_block_sigops_cost / WITNESS_SCALE_FACTOR as u32;
        let mut heavy = spend(0, 0);
        heavy.outputs[0].script_pubkey = vec![OP_CHECKSIG; limit as usize];

        let mut ctx = context(1, vec![coinbase(vec![0x51, 0x00]), heavy.clone()]);
        assert_eq!(CheckSigOpsRule.run(&mut ctx, &services), Ok(()));

        heavy.outputs[0].script_pubkey.push(OP_CHECKSIG);
        let mut ctx = context(1, vec![coinbase(vec![0x51, 0x00]), heavy]);
        assert_eq!(CheckSigOpsRule.run(&mut ctx, &services), Err(ConsensusError::BadBlockSigOps));
    }

    #[test]
    fn test_transaction_checks_applied_to_all() {
        let services = services();
        let mut bad = spend(0, 0);
        bad.outputs[0].value = -1;
        let mut ctx = context(1, vec![coinbase(vec![0x51, 0x00]), bad]);
        assert_eq!(
            CheckPowTransactionRule.run(&mut ctx, &services),
            Err(ConsensusError::BadTransactionNegativeOutput)
        );
    }
}
