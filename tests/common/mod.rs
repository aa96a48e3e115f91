//! Shared helpers: regtest chains driven through the rule engine

#![allow(dead_code)]

use std::sync::Arc;

use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

use consensus_rules::chain::ChainedHeader;
use consensus_rules::coinview::{CoinView, MemoryCoinView};
use consensus_rules::constants::{COIN, SEQUENCE_FINAL, SIGHASH_ALL};
use consensus_rules::context::ValidationContext;
use consensus_rules::engine::{ConsensusRuleEngine, RuleServices};
use consensus_rules::error::ConsensusRuleError;
use consensus_rules::network::{ConsensusParameters, Network};
use consensus_rules::pow::check_proof_of_work;
use consensus_rules::script::{script_push_int, ScriptBuilder};
use consensus_rules::types::*;
use consensus_rules::verifier::signature_hash;

pub const REGTEST_BITS: u32 = 0x207fffff;

pub fn secret_key(byte: u8) -> SecretKey {
    SecretKey::from_slice(&[byte; 32]).unwrap()
}

pub fn public_key(byte: u8) -> Vec<u8> {
    PublicKey::from_secret_key(&Secp256k1::new(), &secret_key(byte)).serialize().to_vec()
}

pub fn p2pk(byte: u8) -> Vec<u8> {
    ScriptBuilder::pay_to_pubkey(&public_key(byte))
}

/// DER signature plus SIGHASH_ALL for input `index` of `tx`.
pub fn sign_input(tx: &Transaction, index: usize, script_code: &[u8], key: u8) -> Vec<u8> {
    let sighash = signature_hash(tx, index, script_code, SIGHASH_ALL);
    let message = Message::from_digest_slice(&sighash).unwrap();
    let mut signature = Secp256k1::new().sign_ecdsa(&message, &secret_key(key)).serialize_der().to_vec();
    signature.push(SIGHASH_ALL);
    signature
}

pub fn sign_block(block: &mut Block, key: u8) {
    let message = Message::from_digest_slice(&block.hash()).unwrap();
    block.signature = Secp256k1::new().sign_ecdsa(&message, &secret_key(key)).serialize_der().to_vec();
}

pub fn output(value: Integer, script_pubkey: Vec<u8>) -> TransactionOutput {
    TransactionOutput { value, script_pubkey }
}

pub fn coinbase(height: u32, time: Option<u32>, outputs: Vec<TransactionOutput>) -> Transaction {
    let mut script_sig = script_push_int(height as i64);
    script_sig.push(0x00);
    Transaction {
        version: 1,
        time,
        inputs: vec![TransactionInput { prevout: OutPoint::null(), script_sig, sequence: SEQUENCE_FINAL }],
        outputs,
        lock_time: 0,
    }
}

pub fn spend(prevouts: &[OutPoint], time: Option<u32>, outputs: Vec<TransactionOutput>) -> Transaction {
    Transaction {
        version: 1,
        time,
        inputs: prevouts
            .iter()
            .map(|prevout| TransactionInput { prevout: *prevout, script_sig: vec![], sequence: SEQUENCE_FINAL })
            .collect(),
        outputs,
        lock_time: 0,
    }
}

pub fn mine(header: &mut BlockHeader) {
    while !check_proof_of_work(&header.hash(), header.bits, REGTEST_BITS) {
        header.nonce += 1;
    }
}

pub fn finish(block: &mut Block) {
    block.header.merkle_root = block.merkle_root().0;
}

/// A regtest chain whose blocks are validated and connected by a real engine.
pub struct TestChain {
    pub engine: ConsensusRuleEngine,
    pub coin_view: Arc<MemoryCoinView>,
    pub tip: Arc<ChainedHeader>,
    pub blocks: Vec<Block>,
    spacing: u32,
    version: i32,
    timestamped: bool,
}

impl TestChain {
    pub fn bitcoin() -> Self {
        Self::new(Network::BitcoinRegTest, 1_296_688_602, 600, 4)
    }

    /// Stratis regtest; spacing is a multiple of the stake mask and long
    /// enough that every hybrid target stays at its limit.
    pub fn stratis() -> Self {
        Self::new(Network::StratisRegTest, 1_600_000_000, 128, 7)
    }

    fn new(network: Network, genesis_time: u32, spacing: u32, version: i32) -> Self {
        let parameters = ConsensusParameters::for_network(network);
        let timestamped = parameters.is_proof_of_stake();
        let mut genesis = Block {
            header: BlockHeader {
                version,
                prev_block_hash: ZERO_HASH,
                merkle_root: ZERO_HASH,
                timestamp: genesis_time,
                bits: REGTEST_BITS,
                nonce: 0,
            },
            transactions: vec![coinbase(0, timestamped.then_some(genesis_time), vec![output(50 * COIN, vec![0x51])])],
            signature: vec![],
        };
        finish(&mut genesis);

        let tip = ChainedHeader::genesis(genesis.header.clone());
        let coin_view = Arc::new(MemoryCoinView::new(tip.hash()));
        let engine = ConsensusRuleEngine::new(RuleServices::new(parameters, coin_view.clone()));
        TestChain { engine, coin_view, tip, blocks: vec![genesis], spacing, version, timestamped }
    }

    pub fn height(&self) -> u32 {
        self.tip.height()
    }

    pub fn next_time(&self) -> u32 {
        self.tip.header().timestamp + self.spacing
    }

    /// Transaction time for the next block, on networks that carry one.
    pub fn tx_time(&self) -> Option<u32> {
        self.timestamped.then(|| self.next_time())
    }

    /// Unmined block on the tip with the given coinbase outputs.
    pub fn template(&self, coinbase_outputs: Vec<TransactionOutput>, transactions: Vec<Transaction>) -> Block {
        let mut all = vec![coinbase(self.height() + 1, self.tx_time(), coinbase_outputs)];
        all.extend(transactions);
        let mut block = Block {
            header: BlockHeader {
                version: self.version,
                prev_block_hash: self.tip.hash(),
                merkle_root: ZERO_HASH,
                timestamp: self.next_time(),
                bits: REGTEST_BITS,
                nonce: 0,
            },
            transactions: all,
            signature: vec![],
        };
        finish(&mut block);
        block
    }

    pub fn pow_block(&self, coinbase_outputs: Vec<TransactionOutput>, transactions: Vec<Transaction>) -> Block {
        let mut block = self.template(coinbase_outputs, transactions);
        mine(&mut block.header);
        block
    }

    /// Coinstake spending `staked` with the empty marker followed by `outputs`.
    pub fn coinstake(&self, staked: OutPoint, outputs: Vec<TransactionOutput>) -> Transaction {
        let mut all = vec![output(0, vec![])];
        all.extend(outputs);
        spend(&[staked], self.tx_time(), all)
    }

    /// Signed stake block around `coinstake`.
    pub fn stake_block(&self, coinstake: Transaction, signer: u8) -> Block {
        let mut block = self.template(vec![output(0, vec![])], vec![coinstake]);
        sign_block(&mut block, signer);
        block
    }

    /// Stake block spending a pay-to-pubkey coin of `key`, paying stake plus
    /// `reward` back to the same key.
    pub fn p2pk_stake_block(&self, staked: OutPoint, staked_value: Integer, reward: Integer, key: u8) -> Block {
        let script = p2pk(key);
        let mut coinstake = self.coinstake(staked, vec![output(staked_value + reward, script.clone())]);
        let signature = sign_input(&coinstake, 0, &script, key);
        coinstake.inputs[0].script_sig = ScriptBuilder::new().push_slice(&signature).into_script();
        self.stake_block(coinstake, key)
    }

    /// Validate `block` on the tip through every rule category; the tip only
    /// advances on success.
    pub fn submit(&mut self, block: Block) -> Result<(), ConsensusRuleError> {
        let chained = ChainedHeader::extend(&self.tip, block.header.clone());
        let time = block.header.timestamp;
        let mut ctx = self.engine.create_rule_context(
            ValidationContext::for_block(block.clone(), Arc::clone(&chained)),
            time,
            Some(Arc::clone(&self.tip)),
        );
        self.engine.run_block_validation(&mut ctx)?;
        self.tip = chained;
        self.blocks.push(block);
        Ok(())
    }

    /// Mine and connect `count` blocks whose coinbase pays `value` to `script`.
    pub fn extend(&mut self, count: u32, value: Integer, script: &[u8]) {
        for _ in 0..count {
            let block = self.pow_block(vec![output(value, script.to_vec())], vec![]);
            self.submit(block).unwrap();
        }
    }

    pub fn coinbase_outpoint(&self, height: u32) -> OutPoint {
        OutPoint::new(self.blocks[height as usize].transactions[0].txid(), 0)
    }

    pub fn is_unspent(&self, outpoint: &OutPoint) -> bool {
        let response = self.coin_view.fetch_coins(&[outpoint.hash]).unwrap();
        response.unspent_outputs[0].as_ref().and_then(|coins| coins.try_get_output(outpoint.index)).is_some()
    }
}
