//! Input script verification
//!
//! [`ScriptVerifier`] is the seam the full-validation rules call for every
//! non-coinbase input. [`StandardScriptVerifier`] checks the standard templates
//! recognized by [`crate::script::classify`] directly, with secp256k1
//! signatures over the legacy signature hash, and runs every other script
//! through [`crate::interpreter`].

use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, VerifyOnly};
use thiserror::Error;

use crate::constants::*;
use crate::deployments::ScriptFlags;
use crate::interpreter::{self, SignatureChecker};
use crate::script::{self, ScriptTemplate};
use crate::serialization::{double_sha256, encode_varint, write_output};
use crate::types::*;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("scriptSig must be push only when spending a script hash")]
    SigPushOnly,
    #[error("invalid stack operation")]
    InvalidStackOperation,
    #[error("invalid alt stack operation")]
    InvalidAltstackOperation,
    #[error("script evaluated to false")]
    EvalFalse,
    #[error("output is unspendable")]
    Unspendable,
    #[error("public key does not match the committed hash")]
    PubkeyHashMismatch,
    #[error("redeem script does not match the script hash")]
    ScriptHashMismatch,
    #[error("non-canonical signature encoding")]
    SignatureEncoding,
    #[error("invalid public key encoding")]
    PubkeyEncoding,
    #[error("signature does not verify")]
    InvalidSignature,
    #[error("hot key spends are only valid inside a coinstake")]
    ColdStakeVerify,
    #[error("input index {0} out of range")]
    InputIndex(usize),
    #[error("script is larger than the maximum size")]
    ScriptSize,
    #[error("push is larger than the maximum element size")]
    PushSize,
    #[error("script exceeds the operation limit")]
    OpCount,
    #[error("stack exceeds the maximum depth")]
    StackSize,
    #[error("bad or reserved opcode")]
    BadOpcode,
    #[error("disabled opcode")]
    DisabledOpcode,
    #[error("unbalanced conditional")]
    UnbalancedConditional,
    #[error("script number out of range")]
    NumberOverflow,
    #[error("OP_VERIFY failed")]
    Verify,
    #[error("OP_EQUALVERIFY failed")]
    EqualVerify,
    #[error("OP_NUMEQUALVERIFY failed")]
    NumEqualVerify,
    #[error("OP_CHECKSIGVERIFY failed")]
    CheckSigVerify,
    #[error("OP_CHECKMULTISIGVERIFY failed")]
    CheckMultisigVerify,
    #[error("public key count out of range")]
    PubkeyCount,
    #[error("signature count out of range")]
    SigCount,
    #[error("negative lock time")]
    NegativeLocktime,
    #[error("lock time requirement not satisfied")]
    UnsatisfiedLocktime,
}

pub trait ScriptVerifier: Send + Sync {
    /// Verify input `input_index` of `tx` against the output it spends.
    fn verify_input(
        &self,
        tx: &Transaction,
        input_index: usize,
        spent_output: &TransactionOutput,
        flags: ScriptFlags,
    ) -> Result<(), ScriptError>;
}

/// Legacy signature hash.
///
/// 1. SIGHASH_SINGLE with no matching output hashes to one (historic behavior)
/// 2. Inputs other than the signed one get empty scripts; with NONE/SINGLE their
///    sequences are zeroed; with ANYONECANPAY only the signed input is kept
/// 3. Outputs: all (ALL), none (NONE), or up to the signed index with earlier
///    ones blanked (SINGLE)
/// 4. Append the 4-byte hash type and double SHA-256
pub fn signature_hash(tx: &Transaction, input_index: usize, script_code: &[u8], hash_type: u8) -> Hash {
    let base_type = hash_type & 0x1f;
    let anyone_can_pay = hash_type & SIGHASH_ANYONECANPAY != 0;

    if base_type == SIGHASH_SINGLE && input_index >= tx.outputs.len() {
        let mut one = ZERO_HASH;
        one[0] = 1;
        return one;
    }

    let mut out = Vec::new();
    out.extend_from_slice(&tx.version.to_le_bytes());
    if let Some(time) = tx.time {
        out.extend_from_slice(&time.to_le_bytes());
    }

    let inputs: Vec<(usize, &TransactionInput)> = if anyone_can_pay {
        tx.inputs.iter().enumerate().filter(|(i, _)| *i == input_index).collect()
    } else {
        tx.inputs.iter().enumerate().collect()
    };
    encode_varint(inputs.len() as u64, &mut out);
    for (i, input) in inputs {
        out.extend_from_slice(&input.prevout.hash);
        out.extend_from_slice(&input.prevout.index.to_le_bytes());
        if i == input_index {
            encode_varint(script_code.len() as u64, &mut out);
            out.extend_from_slice(script_code);
        } else {
            out.push(0);
        }
        let sequence = if i != input_index && (base_type == SIGHASH_NONE || base_type == SIGHASH_SINGLE) {
            0
        } else {
            input.sequence
        };
        out.extend_from_slice(&sequence.to_le_bytes());
    }

    match base_type {
        SIGHASH_NONE => encode_varint(0, &mut out),
        SIGHASH_SINGLE => {
            encode_varint(input_index as u64 + 1, &mut out);
            for _ in 0..input_index {
                write_output(&TransactionOutput { value: -1, script_pubkey: Vec::new() }, &mut out);
            }
            write_output(&tx.outputs[input_index], &mut out);
        }
        _ => {
            encode_varint(tx.outputs.len() as u64, &mut out);
            for output in &tx.outputs {
                write_output(output, &mut out);
            }
        }
    }

    out.extend_from_slice(&tx.lock_time.to_le_bytes());
    out.extend_from_slice(&(hash_type as u32).to_le_bytes());
    double_sha256(&out)
}

/// Strict DER with a low S value.
pub fn is_low_der_signature(signature: &[u8]) -> bool {
    match Signature::from_der(signature) {
        Ok(sig) => {
            let mut normalized = sig;
            normalized.normalize_s();
            normalized == sig
        }
        Err(_) => false,
    }
}

pub struct StandardScriptVerifier {
    secp: Secp256k1<VerifyOnly>,
}

impl Default for StandardScriptVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl StandardScriptVerifier {
    pub fn new() -> Self {
        StandardScriptVerifier { secp: Secp256k1::verification_only() }
    }

    fn check_sig(
        &self,
        tx: &Transaction,
        input_index: usize,
        script_code: &[u8],
        sig_with_type: &[u8],
        pubkey: &[u8],
        flags: ScriptFlags,
    ) -> Result<(), ScriptError> {
        let (hash_type, der) = match sig_with_type.split_last() {
            Some((hash_type, der)) => (*hash_type, der),
            None => return Err(ScriptError::InvalidSignature),
        };
        let mut signature = if flags.contains(ScriptFlags::DERSIG) {
            Signature::from_der(der)
        } else {
            Signature::from_der_lax(der)
        }
        .map_err(|_| ScriptError::SignatureEncoding)?;
        // libsecp256k1 only verifies low-S signatures
        signature.normalize_s();

        let pubkey = PublicKey::from_slice(pubkey).map_err(|_| ScriptError::PubkeyEncoding)?;
        let sighash = signature_hash(tx, input_index, script_code, hash_type);
        let message = Message::from_digest_slice(&sighash).map_err(|_| ScriptError::InvalidSignature)?;
        self.secp
            .verify_ecdsa(&message, &signature, &pubkey)
            .map_err(|_| ScriptError::InvalidSignature)
    }
}

/// One input being verified; answers the interpreter's transaction checks.
struct InputChecker<'a> {
    verifier: &'a StandardScriptVerifier,
    tx: &'a Transaction,
    input_index: usize,
    flags: ScriptFlags,
}

impl SignatureChecker for InputChecker<'_> {
    fn check_signature(&self, signature: &[u8], pubkey: &[u8], script_code: &[u8]) -> Result<bool, ScriptError> {
        match self.verifier.check_sig(self.tx, self.input_index, script_code, signature, pubkey, self.flags) {
            Ok(()) => Ok(true),
            Err(ScriptError::SignatureEncoding) if self.flags.contains(ScriptFlags::DERSIG) => {
                Err(ScriptError::SignatureEncoding)
            }
            Err(_) => Ok(false),
        }
    }

    fn check_lock_time(&self, lock_time: i64) -> bool {
        let tx_lock_time = self.tx.lock_time as i64;
        let threshold = LOCKTIME_THRESHOLD as i64;
        // Heights and times never compare
        if (tx_lock_time < threshold) != (lock_time < threshold) || lock_time > tx_lock_time {
            return false;
        }
        // A final input disables the transaction lock time
        self.tx.inputs.get(self.input_index).map_or(false, |input| input.sequence != SEQUENCE_FINAL)
    }

    fn check_sequence(&self, sequence: i64) -> bool {
        let tx_sequence = match self.tx.inputs.get(self.input_index) {
            Some(input) => input.sequence as i64,
            None => return false,
        };
        if self.tx.version < 2 || tx_sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG as i64 != 0 {
            return false;
        }
        let type_flag = SEQUENCE_LOCKTIME_TYPE_FLAG as i64;
        let mask = type_flag | SEQUENCE_LOCKTIME_MASK as i64;
        let (tx_masked, masked) = (tx_sequence & mask, sequence & mask);
        if (tx_masked < type_flag) != (masked < type_flag) {
            return false;
        }
        masked <= tx_masked
    }

    fn is_coinstake(&self) -> bool {
        self.tx.is_coinstake()
    }
}

impl InputChecker<'_> {
    fn check_sig(&self, script_code: &[u8], signature: &[u8], pubkey: &[u8]) -> Result<(), ScriptError> {
        self.verifier.check_sig(self.tx, self.input_index, script_code, signature, pubkey, self.flags)
    }

    /// Run `script_code` on `items`; the top item must end up true.
    fn evaluate(&self, script_code: &[u8], items: &[Vec<u8>]) -> Result<(), ScriptError> {
        let mut stack = items.to_vec();
        interpreter::eval_script(script_code, &mut stack, self.flags, self)?;
        match stack.last() {
            Some(top) if interpreter::cast_to_bool(top) => Ok(()),
            _ => Err(ScriptError::EvalFalse),
        }
    }

    fn verify_template(&self, script_code: &[u8], items: &[Vec<u8>], allow_p2sh: bool) -> Result<(), ScriptError> {
        match script::classify(script_code) {
            ScriptTemplate::True => Ok(()),
            ScriptTemplate::NullData => Err(ScriptError::Unspendable),
            ScriptTemplate::NonStandard => self.evaluate(script_code, items),
            ScriptTemplate::PayToPubkey(key) => match items {
                [sig] => self.check_sig(script_code, sig, key),
                _ => Err(ScriptError::InvalidStackOperation),
            },
            ScriptTemplate::PayToPubkeyHash(hash) => match items {
                [sig, key] => {
                    if script::hash160(key)[..] != *hash {
                        return Err(ScriptError::PubkeyHashMismatch);
                    }
                    self.check_sig(script_code, sig, key)
                }
                _ => Err(ScriptError::InvalidStackOperation),
            },
            ScriptTemplate::ColdStaking { hot, cold } => match items {
                [sig, key, selector] => {
                    let use_hot = interpreter::cast_to_bool(selector);
                    if use_hot && self.flags.contains(ScriptFlags::CHECKCOLDSTAKEVERIFY) && !self.tx.is_coinstake() {
                        return Err(ScriptError::ColdStakeVerify);
                    }
                    let expected = if use_hot { hot } else { cold };
                    if script::hash160(key)[..] != *expected {
                        return Err(ScriptError::PubkeyHashMismatch);
                    }
                    self.check_sig(script_code, sig, key)
                }
                _ => Err(ScriptError::InvalidStackOperation),
            },
            ScriptTemplate::Multisig { required, keys } => {
                // The leading dummy item is consumed without being checked
                let sigs = match items.split_first() {
                    Some((_, sigs)) => sigs,
                    None => return Err(ScriptError::InvalidStackOperation),
                };
                if sigs.len() != required {
                    return Err(ScriptError::InvalidStackOperation);
                }
                // Signatures must appear in key order; each key is tried at most once.
                let mut key_iter = keys.iter();
                for sig in sigs {
                    let mut matched = false;
                    for key in key_iter.by_ref() {
                        if self.check_sig(script_code, sig, key).is_ok() {
                            matched = true;
                            break;
                        }
                    }
                    if !matched {
                        return Err(ScriptError::InvalidSignature);
                    }
                }
                Ok(())
            }
            ScriptTemplate::PayToScriptHash(hash) => {
                let (redeem_script, rest) = match items.split_last() {
                    Some(split) => split,
                    None => return Err(ScriptError::InvalidStackOperation),
                };
                if script::hash160(redeem_script)[..] != *hash {
                    return Err(ScriptError::ScriptHashMismatch);
                }
                if !allow_p2sh || !self.flags.contains(ScriptFlags::P2SH) {
                    return Ok(());
                }
                // A redeem script shaped like a script hash is only matched against its preimage
                self.verify_template(redeem_script, rest, false)
            }
        }
    }
}

impl ScriptVerifier for StandardScriptVerifier {
    /// 1. Run the scriptSig; it must be push only when spending a script hash
    /// 2. Match the spent script against the templates, falling back to the interpreter
    fn verify_input(
        &self,
        tx: &Transaction,
        input_index: usize,
        spent_output: &TransactionOutput,
        flags: ScriptFlags,
    ) -> Result<(), ScriptError> {
        let input = tx.inputs.get(input_index).ok_or(ScriptError::InputIndex(input_index))?;
        let checker = InputChecker { verifier: self, tx, input_index, flags };

        let spends_script_hash =
            flags.contains(ScriptFlags::P2SH) && script::is_pay_to_script_hash(&spent_output.script_pubkey);
        if spends_script_hash && script::push_only_items(&input.script_sig).is_none() {
            return Err(ScriptError::SigPushOnly);
        }
        let mut items = Vec::new();
        interpreter::eval_script(&input.script_sig, &mut items, flags, &checker)?;
        checker.verify_template(&spent_output.script_pubkey, &items, true)
    }
}
