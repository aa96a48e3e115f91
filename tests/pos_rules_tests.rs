//! Stratis regtest: hybrid chains with stake blocks and cold staking

mod common;

use common::*;
use consensus_rules::constants::COIN;
use consensus_rules::script::{hash160, ScriptBuilder};
use consensus_rules::stake::StakeChain;
use consensus_rules::types::*;
use consensus_rules::ConsensusError;

const STAKER: u8 = 1;
const COLD_OWNER: u8 = 2;

/// Twelve work blocks paying the staker, enough for the first coinbase to be
/// deep and mature at height 13.
fn staking_chain() -> TestChain {
    let mut chain = TestChain::stratis();
    chain.extend(12, 4 * COIN, &p2pk(STAKER));
    chain
}

fn cold_script() -> Vec<u8> {
    ScriptBuilder::cold_staking(&hash160(&public_key(STAKER)), &hash160(&public_key(COLD_OWNER)))
}

#[test]
fn test_stake_block_connects_and_records_stake() {
    let mut chain = staking_chain();
    let staked = chain.coinbase_outpoint(1);
    let block = chain.p2pk_stake_block(staked, 4 * COIN, COIN, STAKER);
    let coinstake_id = block.transactions[1].txid();

    chain.submit(block).unwrap();
    assert_eq!(chain.height(), 13);
    assert!(!chain.is_unspent(&staked));
    assert!(chain.is_unspent(&OutPoint::new(coinstake_id, 1)));

    let stake_chain = &chain.engine.services().stake_chain;
    let stake = stake_chain.get(&chain.tip.hash()).unwrap();
    assert!(stake.is_proof_of_stake());
    assert_eq!(stake.prevout_stake, Some(staked));
    let previous = stake_chain.get(&chain.tip.previous().unwrap().hash()).unwrap();
    assert!(!previous.is_proof_of_stake());
    assert_ne!(stake.stake_modifier_v2, previous.stake_modifier_v2);
}

#[test]
fn test_work_and_stake_blocks_interleave() {
    let mut chain = staking_chain();
    let block = chain.p2pk_stake_block(chain.coinbase_outpoint(1), 4 * COIN, COIN, STAKER);
    chain.submit(block).unwrap();
    chain.extend(1, 4 * COIN, &p2pk(STAKER));
    let block = chain.p2pk_stake_block(chain.coinbase_outpoint(2), 4 * COIN, COIN, STAKER);
    chain.submit(block).unwrap();
    assert_eq!(chain.height(), 15);
}

#[test]
fn test_stake_too_shallow() {
    let mut chain = staking_chain();
    let block = chain.p2pk_stake_block(chain.coinbase_outpoint(5), 4 * COIN, COIN, STAKER);
    let error = chain.submit(block).unwrap_err();
    assert_eq!(error.rule, "PosCoinviewRule");
    assert_eq!(error.error, ConsensusError::InvalidStakeDepth);
}

#[test]
fn test_stake_of_unknown_coin() {
    let mut chain = staking_chain();
    let block = chain.p2pk_stake_block(OutPoint::new([7; 32], 0), 4 * COIN, COIN, STAKER);
    assert_eq!(chain.submit(block).unwrap_err().error, ConsensusError::ReadTxPrevFailed);
}

#[test]
fn test_coinstake_claims_too_much() {
    let mut chain = staking_chain();
    let block = chain.p2pk_stake_block(chain.coinbase_outpoint(1), 4 * COIN, 2 * COIN, STAKER);
    let error = chain.submit(block).unwrap_err();
    assert_eq!(error.rule, "PosCoinviewRule");
    assert_eq!(error.error, ConsensusError::BadCoinstakeAmount);
}

#[test]
fn test_block_signed_by_other_key() {
    let mut chain = staking_chain();
    let mut block = chain.p2pk_stake_block(chain.coinbase_outpoint(1), 4 * COIN, COIN, STAKER);
    sign_block(&mut block, COLD_OWNER);
    let error = chain.submit(block).unwrap_err();
    assert_eq!(error.rule, "PosBlockSignatureRule");
    assert_eq!(error.error, ConsensusError::BadBlockSignature);
}

#[test]
fn test_stake_timestamp_off_mask() {
    let mut chain = staking_chain();
    let mut block = chain.p2pk_stake_block(chain.coinbase_outpoint(1), 4 * COIN, COIN, STAKER);
    block.header.timestamp += 1;
    sign_block(&mut block, STAKER);
    let error = chain.submit(block).unwrap_err();
    assert_eq!(error.rule, "PosTimeMaskRule");
    assert_eq!(error.error, ConsensusError::StakeTimeViolation);
}

#[test]
fn test_stake_block_coinbase_must_be_empty() {
    let mut chain = staking_chain();
    let template = chain.p2pk_stake_block(chain.coinbase_outpoint(1), 4 * COIN, COIN, STAKER);
    let mut block = chain.template(vec![output(1, p2pk(STAKER))], vec![template.transactions[1].clone()]);
    sign_block(&mut block, STAKER);
    let error = chain.submit(block).unwrap_err();
    assert_eq!(error.rule, "PosCoinstakeRule");
    assert_eq!(error.error, ConsensusError::BadStakeBlock);
}

#[test]
fn test_unsigned_stake_block() {
    let mut chain = staking_chain();
    let mut block = chain.p2pk_stake_block(chain.coinbase_outpoint(1), 4 * COIN, COIN, STAKER);
    block.signature.clear();
    let error = chain.submit(block).unwrap_err();
    assert_eq!(error.rule, "PosBlockSignatureRepresentationRule");
}

fn cold_staking_chain() -> TestChain {
    let mut chain = TestChain::stratis();
    chain.extend(1, 4 * COIN, &cold_script());
    chain.extend(11, 4 * COIN, &p2pk(STAKER));
    chain
}

/// Coinstake spending the cold coin from block 1 with the hot key.
fn cold_stake_block(chain: &TestChain, reward_script: Vec<u8>, reward_value: Integer) -> Block {
    let script = cold_script();
    let reveal = output(0, ScriptBuilder::op_return(&public_key(STAKER)));
    let mut coinstake = chain.coinstake(chain.coinbase_outpoint(1), vec![output(reward_value, reward_script), reveal]);
    let signature = sign_input(&coinstake, 0, &script, STAKER);
    coinstake.inputs[0].script_sig =
        ScriptBuilder::new().push_slice(&signature).push_slice(&public_key(STAKER)).push_slice(&[1]).into_script();
    chain.stake_block(coinstake, STAKER)
}

#[test]
fn test_cold_stake_with_hot_key() {
    let mut chain = cold_staking_chain();
    let block = cold_stake_block(&chain, cold_script(), 5 * COIN);
    let coinstake_id = block.transactions[1].txid();
    chain.submit(block).unwrap();
    assert!(chain.is_unspent(&OutPoint::new(coinstake_id, 1)));
}

#[test]
fn test_cold_stake_must_return_to_cold_script() {
    let mut chain = cold_staking_chain();
    let block = cold_stake_block(&chain, p2pk(STAKER), 5 * COIN);
    let error = chain.submit(block).unwrap_err();
    assert_eq!(error.rule, "PosColdStakingRule");
    assert_eq!(error.error, ConsensusError::BadColdstakeOutputs);
}

#[test]
fn test_cold_stake_may_not_shrink() {
    let mut chain = cold_staking_chain();
    let block = cold_stake_block(&chain, cold_script(), 3 * COIN);
    let error = chain.submit(block).unwrap_err();
    assert_eq!(error.rule, "PosColdStakingRule");
    assert_eq!(error.error, ConsensusError::BadColdstakeAmount);
}

#[test]
fn test_hot_key_cannot_spend_cold_coin_outside_coinstake() {
    let mut chain = TestChain::stratis();
    chain.extend(1, 4 * COIN, &cold_script());
    chain.extend(10, 4 * COIN, &p2pk(STAKER));

    let script = cold_script();
    let mut tx = spend(&[chain.coinbase_outpoint(1)], chain.tx_time(), vec![output(4 * COIN, p2pk(STAKER))]);
    let signature = sign_input(&tx, 0, &script, STAKER);
    tx.inputs[0].script_sig =
        ScriptBuilder::new().push_slice(&signature).push_slice(&public_key(STAKER)).push_slice(&[1]).into_script();
    let block = chain.pow_block(vec![output(4 * COIN, p2pk(STAKER))], vec![tx]);

    let error = chain.submit(block).unwrap_err();
    assert_eq!(error.error, ConsensusError::BadTransactionScriptError);
}

#[test]
fn test_coinbase_height_enforced_from_genesis() {
    let mut chain = TestChain::stratis();
    chain.extend(2, 4 * COIN, &p2pk(STAKER));

    let mut block = chain.template(vec![], vec![]);
    block.transactions[0] = coinbase(chain.height(), chain.tx_time(), vec![output(4 * COIN, p2pk(STAKER))]);
    finish(&mut block);
    mine(&mut block.header);
    let error = chain.submit(block).unwrap_err();
    assert_eq!(error.rule, "CoinbaseHeightActivationRule");
    assert_eq!(error.error, ConsensusError::BadCoinbaseHeight);

    chain.extend(1, 4 * COIN, &p2pk(STAKER));
    assert_eq!(chain.height(), 3);
}

#[test]
fn test_lock_time_script_enforced_from_genesis() {
    use consensus_rules::script::opcodes::{OP_1, OP_CHECKLOCKTIMEVERIFY, OP_DROP};

    let locked = ScriptBuilder::new()
        .push_slice(&[8])
        .push_opcode(OP_CHECKLOCKTIMEVERIFY)
        .push_opcode(OP_DROP)
        .push_opcode(OP_1)
        .into_script();
    let mut chain = TestChain::stratis();
    chain.extend(1, 4 * COIN, &locked);
    chain.extend(10, 4 * COIN, &p2pk(STAKER));

    let spending = |chain: &TestChain, lock_time: u32| {
        let mut tx = spend(&[chain.coinbase_outpoint(1)], chain.tx_time(), vec![output(4 * COIN, p2pk(STAKER))]);
        tx.lock_time = lock_time;
        tx.inputs[0].sequence = 0;
        tx
    };

    let early = chain.pow_block(vec![output(4 * COIN, p2pk(STAKER))], vec![spending(&chain, 5)]);
    let error = chain.submit(early).unwrap_err();
    assert_eq!(error.rule, "PosCoinviewRule");
    assert_eq!(error.error, ConsensusError::BadTransactionScriptError);

    let on_time = chain.pow_block(vec![output(4 * COIN, p2pk(STAKER))], vec![spending(&chain, 8)]);
    chain.submit(on_time).unwrap();
    assert!(!chain.is_unspent(&chain.coinbase_outpoint(1)));
}
