//! Block body against header

use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, VerifyOnly};

use super::{ConsensusRule, RuleCategory};
use crate::context::RuleContext;
use crate::engine::RuleServices;
use crate::error::{ConsensusError, Result};
use crate::script::{self, Instruction, ScriptTemplate};
use crate::types::*;
use crate::verifier::is_low_der_signature;

/// The header's merkle root must commit to the transaction list, and the list
/// must not be a mutated form (some level pairs a hash with itself).
pub struct BlockMerkleRootRule;

impl ConsensusRule for BlockMerkleRootRule {
    fn name(&self) -> &'static str {
        "BlockMerkleRootRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Integrity
    }

    fn run(&self, ctx: &mut RuleContext, _services: &RuleServices) -> Result<()> {
        let block = ctx.block()?;
        let (root, mutated) = block.merkle_root();
        if root != block.header.merkle_root {
            return Err(ConsensusError::BadMerkleRoot);
        }
        if mutated {
            return Err(ConsensusError::BadTransactionDuplicate);
        }
        Ok(())
    }
}

/// Signature encoding: stake blocks carry a strict low-S DER signature, work
/// blocks carry none.
pub struct PosBlockSignatureRepresentationRule;

impl ConsensusRule for PosBlockSignatureRepresentationRule {
    fn name(&self) -> &'static str {
        "PosBlockSignatureRepresentationRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Integrity
    }

    fn run(&self, ctx: &mut RuleContext, _services: &RuleServices) -> Result<()> {
        let block = ctx.block()?;
        let valid = if block.is_proof_of_stake() {
            is_low_der_signature(&block.signature)
        } else {
            block.signature.is_empty()
        };
        if !valid {
            return Err(ConsensusError::BadBlockSignature);
        }
        Ok(())
    }
}

/// The block signature must verify over the block hash with the key that
/// owns the coinstake's first reward output.
pub struct PosBlockSignatureRule {
    secp: Secp256k1<VerifyOnly>,
}

impl Default for PosBlockSignatureRule {
    fn default() -> Self {
        Self::new()
    }
}

impl PosBlockSignatureRule {
    pub fn new() -> Self {
        PosBlockSignatureRule { secp: Secp256k1::verification_only() }
    }

    fn verify(&self, block: &Block) -> bool {
        let key = match block.transactions.get(1).and_then(block_signing_key) {
            Some(key) => key,
            None => return false,
        };
        let (public_key, signature) = match (PublicKey::from_slice(key), Signature::from_der(&block.signature)) {
            (Ok(public_key), Ok(signature)) => (public_key, signature),
            _ => return false,
        };
        let message = match Message::from_digest_slice(&block.hash()) {
            Ok(message) => message,
            Err(_) => return false,
        };
        self.secp.verify_ecdsa(&message, &signature, &public_key).is_ok()
    }
}

/// Key the staker signs the block with.
///
/// Pay-to-pubkey stakes name it directly. Pay-to-pubkey-hash and cold staking
/// stakes must reveal it in an OP_RETURN output whose pushed key hashes to the
/// (hot) key hash.
pub fn block_signing_key(coinstake: &Transaction) -> Option<&[u8]> {
    let output = coinstake.outputs.get(1)?;
    match script::classify(&output.script_pubkey) {
        ScriptTemplate::PayToPubkey(key) => Some(key),
        ScriptTemplate::PayToPubkeyHash(hash) => revealed_key(coinstake, hash),
        ScriptTemplate::ColdStaking { hot, .. } => revealed_key(coinstake, hot),
        _ => None,
    }
}

fn revealed_key<'a>(coinstake: &'a Transaction, key_hash: &[u8]) -> Option<&'a [u8]> {
    coinstake
        .outputs
        .iter()
        .filter(|output| script::is_op_return(&output.script_pubkey))
        .find_map(|output| match script::instructions(&output.script_pubkey[1..]).next() {
            Some(Ok(Instruction::Push(key))) if key.len() == 33 && script::hash160(key)[..] == *key_hash => Some(key),
            _ => None,
        })
}

impl ConsensusRule for PosBlockSignatureRule {
    fn name(&self) -> &'static str {
        "PosBlockSignatureRule"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Integrity
    }

    fn skippable(&self) -> bool {
        true
    }

    fn run(&self, ctx: &mut RuleContext, _services: &RuleServices) -> Result<()> {
        let block = ctx.block()?;
        if block.is_proof_of_work() {
            return Ok(());
        }
        if !self.verify(block) {
            return Err(ConsensusError::BadBlockSignature);
        }
        Ok(())
    }
}
