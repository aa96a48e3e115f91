//! Context-free and input-dependent transaction checks

use std::collections::HashSet;

use crate::constants::*;
use crate::coinview::UnspentOutputSet;
use crate::error::{ConsensusError, Result};
use crate::network::ConsensusParameters;
use crate::types::*;

pub fn money_range(value: Integer, params: &ConsensusParameters) -> bool {
    value >= 0 && value <= params.max_money
}

/// CheckTransaction
///
/// 1. Inputs and outputs must be non-empty
/// 2. Serialized size (as weight) must fit in a block
/// 3. Every output value and the running total lie in [0, max money]
/// 4. No input is spent twice
/// 5. Coinbase scriptSig length in [2, 100]; other transactions have no null prevouts
pub fn check_transaction(tx: &Transaction, params: &ConsensusParameters) -> Result<()> {
    // 1. Basic shape
    if tx.inputs.is_empty() {
        return Err(ConsensusError::BadTransactionNoInput);
    }
    if tx.outputs.is_empty() {
        return Err(ConsensusError::BadTransactionNoOutput);
    }

    // 2. Size
    if tx.serialized_size() * WITNESS_SCALE_FACTOR > params.max_block_weight as usize {
        return Err(ConsensusError::BadTransactionOversize);
    }

    // 3. Output values
    let mut total_out: Integer = 0;
    for output in &tx.outputs {
        if output.value < 0 {
            return Err(ConsensusError::BadTransactionNegativeOutput);
        }
        if output.value > params.max_money {
            return Err(ConsensusError::BadTransactionTooLargeOutput);
        }
        total_out = total_out
            .checked_add(output.value)
            .ok_or(ConsensusError::BadTransactionTooLargeTotalOutput)?;
        if !money_range(total_out, params) {
            return Err(ConsensusError::BadTransactionTooLargeTotalOutput);
        }
    }

    // 4. Duplicate inputs
    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        if !seen.insert(input.prevout) {
            return Err(ConsensusError::BadTransactionDuplicateInputs);
        }
    }

    // 5. Coinbase script / null prevouts
    if tx.is_coinbase() {
        let len = tx.inputs[0].script_sig.len();
        if !(MIN_COINBASE_SCRIPT_SIZE..=MAX_COINBASE_SCRIPT_SIZE).contains(&len) {
            return Err(ConsensusError::BadCoinbaseSize);
        }
    } else if tx.inputs.iter().any(|input| input.prevout.is_null()) {
        return Err(ConsensusError::BadTransactionNullPrevout);
    }

    Ok(())
}

/// Amounts collected by [`check_tx_inputs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputValues {
    pub value_in: Integer,
    /// Zero for coinstakes, whose outputs legitimately exceed their inputs
    pub fee: Integer,
}

/// CheckTxInputs against the working set, for a transaction in the block at `spend_height`.
///
/// 1. Every prevout must be unspent in the working set
/// 2. Coinbase and coinstake outputs must have matured
/// 3. Each input value and the running total lie in the money range
/// 4. Non-coinstake transactions may not create value; the fee must be in range
pub fn check_tx_inputs(
    tx: &Transaction,
    view: &UnspentOutputSet,
    spend_height: u32,
    params: &ConsensusParameters,
) -> Result<InputValues> {
    let mut value_in: Integer = 0;
    for input in &tx.inputs {
        let coins = view
            .access_coins(&input.prevout.hash)
            .ok_or(ConsensusError::BadTransactionMissingInput)?;
        let output = coins
            .try_get_output(input.prevout.index)
            .ok_or(ConsensusError::BadTransactionMissingInput)?;

        let depth = spend_height.saturating_sub(coins.height);
        if coins.is_coinbase && depth < params.coinbase_maturity {
            return Err(ConsensusError::BadTransactionPrematureCoinbaseSpending);
        }
        if coins.is_coinstake && depth < params.coinbase_maturity {
            return Err(ConsensusError::BadTransactionPrematureCoinstakeSpending);
        }

        if !money_range(output.value, params) {
            return Err(ConsensusError::BadTransactionInputValueOutOfRange);
        }
        value_in = value_in
            .checked_add(output.value)
            .filter(|total| money_range(*total, params))
            .ok_or(ConsensusError::BadTransactionInputValueOutOfRange)?;
    }

    if tx.is_coinstake() {
        return Ok(InputValues { value_in, fee: 0 });
    }

    let value_out = tx.total_out();
    if value_in < value_out {
        return Err(ConsensusError::BadTransactionInBelowOut);
    }
    let fee = value_in - value_out;
    if !money_range(fee, params) {
        return Err(ConsensusError::BadTransactionFeeOutOfRange);
    }
    Ok(InputValues { value_in, fee })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coinview::UnspentOutputs;
    use crate::network::Network;

    fn params() -> ConsensusParameters {
        ConsensusParameters::for_network(Network::BitcoinRegTest)
    }

    fn tx_with_outputs(values: &[Integer]) -> Transaction {
        Transaction {
            version: 1,
            time: None,
            inputs: vec![TransactionInput {
                prevout: OutPoint::new([1; 32], 0),
                script_sig: vec![],
                sequence: SEQUENCE_FINAL,
            }],
            outputs: values
                .iter()
                .map(|value| TransactionOutput { value: *value, script_pubkey: vec![0x51] })
                .collect(),
            lock_time: 0,
        }
    }

    // ========================================================================
    // CheckTransaction
    // ========================================================================

    #[test]
    fn test_check_transaction_valid() {
        assert_eq!(check_transaction(&tx_with_outputs(&[1000]), &params()), Ok(()));
    }

    #[test]
    fn test_check_transaction_empty_inputs_and_outputs() {
        let mut tx = tx_with_outputs(&[1000]);
        tx.inputs.clear();
        assert_eq!(check_transaction(&tx, &params()), Err(ConsensusError::BadTransactionNoInput));

        let mut tx = tx_with_outputs(&[]);
        tx.outputs.clear();
        assert_eq!(check_transaction(&tx, &params()), Err(ConsensusError::BadTransactionNoOutput));
    }

    #[test]
    fn test_check_transaction_money_boundaries() {
        let params = params();
        let max = params.max_money;
        assert_eq!(check_transaction(&tx_with_outputs(&[max]), &params), Ok(()));
        assert_eq!(
            check_transaction(&tx_with_outputs(&[max + 1]), &params),
            Err(ConsensusError::BadTransactionTooLargeOutput)
        );
        assert_eq!(
            check_transaction(&tx_with_outputs(&[-1]), &params),
            Err(ConsensusError::BadTransactionNegativeOutput)
        );
        assert_eq!(
            check_transaction(&tx_with_outputs(&[max, 1]), &params),
            Err(ConsensusError::BadTransactionTooLargeTotalOutput)
        );
    }

    #[test]
    fn test_check_transaction_duplicate_inputs() {
        let mut tx = tx_with_outputs(&[1]);
        tx.inputs.push(tx.inputs[0].clone());
        assert_eq!(check_transaction(&tx, &params()), Err(ConsensusError::BadTransactionDuplicateInputs));
    }

    #[test]
    fn test_check_transaction_coinbase_script_size() {
        let mut tx = tx_with_outputs(&[1]);
        tx.inputs[0].prevout = OutPoint::null();
        tx.inputs[0].script_sig = vec![0x51];
        assert_eq!(check_transaction(&tx, &params()), Err(ConsensusError::BadCoinbaseSize));
        tx.inputs[0].script_sig = vec![0x51; 101];
        assert_eq!(check_transaction(&tx, &params()), Err(ConsensusError::BadCoinbaseSize));
        tx.inputs[0].script_sig = vec![0x51; 100];
        assert_eq!(check_transaction(&tx, &params()), Ok(()));
    }

    #[test]
    fn test_check_transaction_null_prevout() {
        let mut tx = tx_with_outputs(&[1]);
        tx.inputs.push(TransactionInput { prevout: OutPoint::null(), script_sig: vec![], sequence: 0 });
        assert_eq!(check_transaction(&tx, &params()), Err(ConsensusError::BadTransactionNullPrevout));
    }

    // ========================================================================
    // CheckTxInputs
    // ========================================================================

    fn view_with_coin(value: Integer, height: u32, is_coinbase: bool) -> UnspentOutputSet {
        let mut coins = UnspentOutputs::from_transaction(&tx_with_outputs(&[value]), height, 0);
        coins.transaction_id = [1; 32];
        coins.is_coinbase = is_coinbase;
        let mut view = UnspentOutputSet::new();
        view.set_coins(vec![([1; 32], Some(coins))]);
        view
    }

    #[test]
    fn test_check_tx_inputs_fee() {
        let params = params();
        let view = view_with_coin(5000, 1, false);
        let tx = tx_with_outputs(&[4000]);
        assert_eq!(
            check_tx_inputs(&tx, &view, 2, &params),
            Ok(InputValues { value_in: 5000, fee: 1000 })
        );
        let tx = tx_with_outputs(&[6000]);
        assert_eq!(check_tx_inputs(&tx, &view, 2, &params), Err(ConsensusError::BadTransactionInBelowOut));
    }

    #[test]
    fn test_check_tx_inputs_coinbase_maturity() {
        let params = params();
        let view = view_with_coin(5000, 1, true);
        let tx = tx_with_outputs(&[4000]);
        assert_eq!(
            check_tx_inputs(&tx, &view, 100, &params),
            Err(ConsensusError::BadTransactionPrematureCoinbaseSpending)
        );
        assert!(check_tx_inputs(&tx, &view, 101, &params).is_ok());
    }

    #[test]
    fn test_check_tx_inputs_missing() {
        let view = UnspentOutputSet::new();
        assert_eq!(
            check_tx_inputs(&tx_with_outputs(&[1]), &view, 5, &params()),
            Err(ConsensusError::BadTransactionMissingInput)
        );
    }
}
