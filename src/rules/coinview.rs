//! Full validation: load coins, connect the block, commit
//!
//! [`LoadCoinviewRule`] fills the context's working set from the coin view,
//! the connect rules spend and create outputs in it, and [`SaveCoinviewRule`]
//! writes the resulting changes with their rewind record. Nothing reaches the
//! coin view until the save.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, trace};

use super::partial::legacy_sigops;
use super::{ConsensusRule, RuleCategory};
use crate::coinview::{CoinViewBatch, UnspentOutputSet};
use crate::constants::WITNESS_SCALE_FACTOR;
use crate::context::RuleContext;
use crate::deployments::{LockTimeFlags, ScriptFlags};
use crate::economic::get_block_subsidy;
use crate::engine::RuleServices;
use crate::error::{ConsensusError, Result};
use crate::locktime::sequence_locks;
use crate::script::p2sh_sigops;
use crate::transaction::{check_tx_inputs, money_range};
use crate::types::*;

/// Recompute the deployment flags; full validation may run long after the
/// partial checks, on a different branch.
pub struct SetActivationDeploymentsFullValidationRule;

impl ConsensusRule for SetActivationDeploymentsFullValidationRule {
    fn name(&self) -> &'static str {
        "SetActivationDeploymentsFullValidationRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::FullValidation
    }

    fn run(&self, ctx: &mut RuleContext, services: &RuleServices) -> Result<()> {
        ctx.flags = services.deployments.compute(ctx.chained_header());
        Ok(())
    }
}

/// Fetch every coin the block may touch into the working set.
///
/// The coin view must sit exactly at the block's parent.
pub struct LoadCoinviewRule;

impl ConsensusRule for LoadCoinviewRule {
    fn name(&self) -> &'static str {
        "LoadCoinviewRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::FullValidation
    }

    fn run(&self, ctx: &mut RuleContext, services: &RuleServices) -> Result<()> {
        let previous_hash = ctx.previous()?.hash();
        if services.coin_view.get_tip_hash()? != previous_hash {
            return Err(ConsensusError::InvalidPrevTip);
        }

        let block = ctx.block()?;
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for tx in &block.transactions {
            let txid = tx.txid();
            if seen.insert(txid) {
                ids.push(txid);
            }
        }
        for tx in block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
            for input in &tx.inputs {
                if seen.insert(input.prevout.hash) {
                    ids.push(input.prevout.hash);
                }
            }
        }

        let response = services.coin_view.fetch_coins(&ids)?;
        if response.block_hash != previous_hash {
            return Err(ConsensusError::InvalidPrevTip);
        }
        trace!(target: "coinview", "loaded {} records at {}", ids.len(), display_hash(&previous_hash));

        let mut set = UnspentOutputSet::new();
        set.set_coins(ids.into_iter().zip(response.unspent_outputs).collect());
        ctx.unspent_output_set = Some(set);
        Ok(())
    }
}

/// BIP30: a transaction may not overwrite one that still has unspent outputs.
pub struct TransactionDuplicationActivationRule;

impl ConsensusRule for TransactionDuplicationActivationRule {
    fn name(&self) -> &'static str {
        "TransactionDuplicationActivationRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::FullValidation
    }

    fn run(&self, ctx: &mut RuleContext, _services: &RuleServices) -> Result<()> {
        if !ctx.flags.enforce_bip30 {
            return Ok(());
        }
        let set = ctx.unspent_output_set()?;
        for tx in &ctx.block()?.transactions {
            if set.access_coins(&tx.txid()).map_or(false, |coins| !coins.is_fully_spent()) {
                return Err(ConsensusError::BadTransactionBip30);
            }
        }
        Ok(())
    }
}

/// Connect the block's transactions to the working set and return the fees
/// collected by ordinary transactions.
///
/// Per transaction, in block order:
/// 1. BIP68 relative lock times, when enforced
/// 2. Running sigop cost (legacy, plus P2SH redeem scripts once BIP16 applies)
/// 3. Input existence, maturity and amounts
/// 4. Input scripts, unless validation is skipped
/// 5. Spend the inputs and add the outputs
///
/// The coinstake's input value and spent outputs are recorded in the
/// proof-of-stake context; its fee is not counted.
pub fn connect_transactions(ctx: &mut RuleContext, services: &RuleServices) -> Result<Integer> {
    let params = &services.parameters;
    let flags = ctx.flags;
    let skip_validation = ctx.skip_validation;
    let chained_header = Arc::clone(ctx.chained_header());
    let height = chained_header.height();
    let block = ctx.validation_context.block_to_validate.as_ref().ok_or(ConsensusError::MissingBlockData)?;
    let set = ctx.unspent_output_set.as_mut().ok_or(ConsensusError::CoinViewFailure)?;

    let mut fees: Integer = 0;
    let mut sigops_cost: u64 = 0;
    let mut coinstake = None;

    for tx in &block.transactions {
        let is_coinbase = tx.is_coinbase();

        if !is_coinbase && flags.lock_time_flags.contains(LockTimeFlags::VERIFY_SEQUENCE) {
            let prev_heights = tx
                .inputs
                .iter()
                .map(|input| {
                    set.access_coins(&input.prevout.hash)
                        .map(|coins| coins.height)
                        .ok_or(ConsensusError::BadTransactionMissingInput)
                })
                .collect::<Result<Vec<u32>>>()?;
            if !sequence_locks(tx, flags.lock_time_flags, &prev_heights, &chained_header) {
                return Err(ConsensusError::BadTransactionNonFinal);
            }
        }

        sigops_cost += legacy_sigops(tx) as u64 * WITNESS_SCALE_FACTOR as u64;
        if !is_coinbase && flags.script_flags.contains(ScriptFlags::P2SH) {
            for input in &tx.inputs {
                if let Some(spent) = set.get_output(&input.prevout) {
                    sigops_cost +=
                        p2sh_sigops(&input.script_sig, &spent.script_pubkey) as u64 * WITNESS_SCALE_FACTOR as u64;
                }
            }
        }
        if sigops_cost > params.max_block_sigops_cost as u64 {
            return Err(ConsensusError::BadBlockSigOps);
        }

        if !is_coinbase {
            let values = check_tx_inputs(tx, set, height, params)?;
            if tx.is_coinstake() {
                let spent = tx.inputs.iter().filter_map(|input| set.get_output(&input.prevout).cloned()).collect::<Vec<_>>();
                coinstake = Some((values.value_in, spent));
            } else {
                fees = fees
                    .checked_add(values.fee)
                    .filter(|total| money_range(*total, params))
                    .ok_or(ConsensusError::BadTransactionFeeOutOfRange)?;
            }

            if !skip_validation {
                for (index, input) in tx.inputs.iter().enumerate() {
                    let spent = set.get_output(&input.prevout).ok_or(ConsensusError::BadTransactionMissingInput)?;
                    if let Err(error) = services.script_verifier.verify_input(tx, index, spent, flags.script_flags) {
                        debug!(
                            target: "consensus",
                            "input {} of {} failed script verification: {}",
                            index,
                            display_hash(&tx.txid()),
                            error
                        );
                        return Err(ConsensusError::BadTransactionScriptError);
                    }
                }
            }
        }

        set.update(tx, height, block.header.timestamp)?;
    }

    if let Some((value_in, spent)) = coinstake {
        let pos = ctx.pos_mut();
        pos.total_coinstake_value_in = value_in;
        pos.coinstake_prev_outputs = spent;
    }
    Ok(fees)
}

/// Connect a proof-of-work block and cap its coinbase at fees plus subsidy.
pub struct PowCoinviewRule;

impl ConsensusRule for PowCoinviewRule {
    fn name(&self) -> &'static str {
        "PowCoinviewRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::FullValidation
    }

    fn run(&self, ctx: &mut RuleContext, services: &RuleServices) -> Result<()> {
        let fees = connect_transactions(ctx, services)?;
        let allowed = fees.saturating_add(get_block_subsidy(ctx.height(), &services.parameters));
        let coinbase = ctx.block()?.transactions.first().ok_or(ConsensusError::BadCoinbaseMissing)?;
        if coinbase.total_out() > allowed {
            return Err(ConsensusError::BadCoinbaseAmount);
        }
        Ok(())
    }
}

/// Commit the working set and its rewind record; store the block's stake
/// record on proof-of-stake networks.
pub struct SaveCoinviewRule;

impl ConsensusRule for SaveCoinviewRule {
    fn name(&self) -> &'static str {
        "SaveCoinviewRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::FullValidation
    }

    fn run(&self, ctx: &mut RuleContext, services: &RuleServices) -> Result<()> {
        let hash = ctx.chained_header().hash();
        let previous_hash = ctx.previous()?.hash();
        let set = ctx.unspent_output_set()?;

        let batch = CoinViewBatch {
            old_block_hash: previous_hash,
            next_block_hash: hash,
            unspent_outputs: set.get_changes(),
            rewind_data: vec![set.rewind_data(previous_hash)],
        };
        let changed = batch.unspent_outputs.len();
        services.coin_view.save_changes(batch)?;
        trace!(target: "coinview", "saved {} records for {}", changed, display_hash(&hash));

        if let Some(stake) = ctx.pos.as_ref().and_then(|pos| pos.block_stake.clone()) {
            services.stake_chain.set(hash, stake);
        }
        Ok(())
    }
}
