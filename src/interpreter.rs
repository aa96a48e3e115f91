//! Opcode interpreter
//!
//! [`eval_script`] runs a script against a stack the way a legacy (pre-segwit)
//! node does, for scripts that match none of the templates in
//! [`crate::script`]. Signature and lock time checks go through
//! [`SignatureChecker`], so the interpreter never touches the spending
//! transaction directly.
//!
//! OP_CHECKLOCKTIMEVERIFY, OP_CHECKSEQUENCEVERIFY and OP_CHECKCOLDSTAKEVERIFY
//! stay NOPs until their [`ScriptFlags`] bit is set.

use bitcoin_hashes::{sha1, Hash as _};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::constants::*;
use crate::deployments::ScriptFlags;
use crate::script::opcodes::*;
use crate::script::{instructions, script_num_to_vec, Instruction, ScriptBuilder};
use crate::serialization::double_sha256;
use crate::verifier::ScriptError;

pub type Stack = Vec<Vec<u8>>;

/// Operand width for arithmetic opcodes.
const MAX_NUM_SIZE: usize = 4;
/// CHECKLOCKTIMEVERIFY and CHECKSEQUENCEVERIFY accept five-byte operands.
const LOCKTIME_NUM_SIZE: usize = 5;

/// Transaction-side checks the interpreter delegates.
pub trait SignatureChecker {
    /// `Ok(false)` for a signature that does not verify; `Err` only when the
    /// active flags make the encoding itself fatal.
    fn check_signature(&self, signature: &[u8], pubkey: &[u8], script_code: &[u8]) -> Result<bool, ScriptError>;

    /// BIP65: `lock_time` against the transaction lock time.
    fn check_lock_time(&self, lock_time: i64) -> bool;

    /// BIP112: `sequence` against the spending input's sequence.
    fn check_sequence(&self, sequence: i64) -> bool;

    fn is_coinstake(&self) -> bool;
}

/// Stack items are true unless every byte is zero, allowing a sign bit on the last.
pub fn cast_to_bool(item: &[u8]) -> bool {
    match item.split_last() {
        Some((last, rest)) => rest.iter().any(|b| *b != 0) || (*last != 0 && *last != 0x80),
        None => false,
    }
}

/// Decode a little-endian sign-magnitude number of at most `max_size` bytes.
pub fn decode_num(item: &[u8], max_size: usize) -> Result<i64, ScriptError> {
    if item.len() > max_size {
        return Err(ScriptError::NumberOverflow);
    }
    let last = match item.last() {
        Some(last) => *last,
        None => return Ok(0),
    };
    let mut value = 0i64;
    for (i, byte) in item.iter().enumerate() {
        value |= (*byte as i64) << (8 * i);
    }
    if last & 0x80 != 0 {
        let sign_bit = 0x80i64 << (8 * (item.len() - 1));
        return Ok(-(value & !sign_bit));
    }
    Ok(value)
}

fn is_disabled(op: u8) -> bool {
    matches!(op, OP_CAT..=OP_RIGHT | OP_INVERT..=OP_XOR | OP_2MUL | OP_2DIV | OP_MUL..=OP_RSHIFT)
}

/// Remove every push of exactly `data` from `script`, at instruction boundaries.
pub fn find_and_delete(script: &[u8], data: &[u8]) -> Vec<u8> {
    if data.is_empty() {
        return script.to_vec();
    }
    let pattern = ScriptBuilder::new().push_slice(data).into_script();
    let mut out = Vec::with_capacity(script.len());
    let mut parsed = instructions(script);
    let mut start = 0;
    while parsed.next().is_some() {
        let end = parsed.position();
        if script[start..end] != pattern[..] {
            out.extend_from_slice(&script[start..end]);
        }
        start = end;
    }
    out.extend_from_slice(&script[start..]);
    out
}

/// Run `script` on `stack`.
///
/// 1. Reject scripts over the size limit
/// 2. For each instruction: enforce the push size and op count limits, reject
///    disabled opcodes even in unexecuted branches, then execute it if every
///    enclosing conditional is true (conditionals themselves always run)
/// 3. Enforce the combined stack limit after every step
/// 4. Every OP_IF must be closed
pub fn eval_script(
    script: &[u8],
    stack: &mut Stack,
    flags: ScriptFlags,
    checker: &dyn SignatureChecker,
) -> Result<(), ScriptError> {
    if script.len() > MAX_SCRIPT_SIZE {
        return Err(ScriptError::ScriptSize);
    }
    let mut machine = Machine {
        script,
        stack,
        alt_stack: Vec::new(),
        conditions: Vec::new(),
        op_count: 0,
        code_start: 0,
        flags,
        checker,
    };

    let mut parsed = instructions(script);
    while let Some(instruction) = parsed.next() {
        let executing = machine.conditions.iter().all(|branch| *branch);
        match instruction.map_err(|_| ScriptError::BadOpcode)? {
            Instruction::Push(data) => {
                if data.len() > MAX_SCRIPT_ELEMENT_SIZE {
                    return Err(ScriptError::PushSize);
                }
                if executing {
                    machine.stack.push(data.to_vec());
                }
            }
            Instruction::Op(op) => {
                if op > OP_16 {
                    machine.count_ops(1)?;
                }
                if is_disabled(op) {
                    return Err(ScriptError::DisabledOpcode);
                }
                if op == OP_CODESEPARATOR {
                    if executing {
                        machine.code_start = parsed.position();
                    }
                } else if executing || (OP_IF..=OP_ENDIF).contains(&op) {
                    machine.execute(op, executing)?;
                }
            }
        }
        if machine.stack.len() + machine.alt_stack.len() > MAX_STACK_SIZE {
            return Err(ScriptError::StackSize);
        }
    }

    if !machine.conditions.is_empty() {
        return Err(ScriptError::UnbalancedConditional);
    }
    Ok(())
}

struct Machine<'a> {
    script: &'a [u8],
    stack: &'a mut Stack,
    alt_stack: Stack,
    /// One entry per open OP_IF/OP_NOTIF: whether its current branch runs
    conditions: Vec<bool>,
    op_count: usize,
    /// Signatures commit to the script after the last executed OP_CODESEPARATOR
    code_start: usize,
    flags: ScriptFlags,
    checker: &'a dyn SignatureChecker,
}

impl Machine<'_> {
    fn count_ops(&mut self, count: usize) -> Result<(), ScriptError> {
        self.op_count += count;
        if self.op_count > MAX_OPS_PER_SCRIPT {
            return Err(ScriptError::OpCount);
        }
        Ok(())
    }

    fn pop(&mut self) -> Result<Vec<u8>, ScriptError> {
        self.stack.pop().ok_or(ScriptError::InvalidStackOperation)
    }

    fn pop_num(&mut self) -> Result<i64, ScriptError> {
        let item = self.pop()?;
        decode_num(&item, MAX_NUM_SIZE)
    }

    /// Item `depth` places below the top.
    fn peek(&self, depth: usize) -> Result<&Vec<u8>, ScriptError> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .map(|index| &self.stack[index])
            .ok_or(ScriptError::InvalidStackOperation)
    }

    /// Stack length, once it holds at least `count` items.
    fn require(&self, count: usize) -> Result<usize, ScriptError> {
        if self.stack.len() < count {
            return Err(ScriptError::InvalidStackOperation);
        }
        Ok(self.stack.len())
    }

    fn push_bool(&mut self, value: bool) {
        self.stack.push(if value { vec![1] } else { Vec::new() });
    }

    fn push_num(&mut self, value: i64) {
        self.stack.push(script_num_to_vec(value));
    }

    fn execute(&mut self, op: u8, executing: bool) -> Result<(), ScriptError> {
        match op {
            OP_1NEGATE => self.push_num(-1),
            OP_1..=OP_16 => self.push_num((op - OP_1 + 1) as i64),

            OP_NOP | OP_NOP1 | OP_NOP4..=OP_NOP9 => {}
            OP_CHECKLOCKTIMEVERIFY => {
                if self.flags.contains(ScriptFlags::CHECKLOCKTIMEVERIFY) {
                    let lock_time = decode_num(self.peek(0)?, LOCKTIME_NUM_SIZE)?;
                    if lock_time < 0 {
                        return Err(ScriptError::NegativeLocktime);
                    }
                    if !self.checker.check_lock_time(lock_time) {
                        return Err(ScriptError::UnsatisfiedLocktime);
                    }
                }
            }
            OP_CHECKSEQUENCEVERIFY => {
                if self.flags.contains(ScriptFlags::CHECKSEQUENCEVERIFY) {
                    let sequence = decode_num(self.peek(0)?, LOCKTIME_NUM_SIZE)?;
                    if sequence < 0 {
                        return Err(ScriptError::NegativeLocktime);
                    }
                    // A disabled relative lock in the operand makes the opcode a NOP
                    if sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG as i64 == 0 && !self.checker.check_sequence(sequence) {
                        return Err(ScriptError::UnsatisfiedLocktime);
                    }
                }
            }
            OP_CHECKCOLDSTAKEVERIFY => {
                if self.flags.contains(ScriptFlags::CHECKCOLDSTAKEVERIFY) && !self.checker.is_coinstake() {
                    return Err(ScriptError::ColdStakeVerify);
                }
            }

            OP_IF | OP_NOTIF => {
                let mut branch = false;
                if executing {
                    let condition = self.pop()?;
                    branch = cast_to_bool(&condition) == (op == OP_IF);
                }
                self.conditions.push(branch);
            }
            OP_ELSE => match self.conditions.last_mut() {
                Some(branch) => *branch = !*branch,
                None => return Err(ScriptError::UnbalancedConditional),
            },
            OP_ENDIF => {
                if self.conditions.pop().is_none() {
                    return Err(ScriptError::UnbalancedConditional);
                }
            }
            OP_VERIFY => {
                let item = self.pop()?;
                if !cast_to_bool(&item) {
                    return Err(ScriptError::Verify);
                }
            }
            OP_RETURN => return Err(ScriptError::Unspendable),

            OP_TOALTSTACK => {
                let item = self.pop()?;
                self.alt_stack.push(item);
            }
            OP_FROMALTSTACK => {
                let item = self.alt_stack.pop().ok_or(ScriptError::InvalidAltstackOperation)?;
                self.stack.push(item);
            }
            OP_2DROP => {
                let len = self.require(2)?;
                self.stack.truncate(len - 2);
            }
            OP_2DUP | OP_3DUP => {
                let count = if op == OP_2DUP { 2 } else { 3 };
                let len = self.require(count)?;
                let items = self.stack[len - count..].to_vec();
                self.stack.extend(items);
            }
            OP_2OVER => {
                let len = self.require(4)?;
                let items = self.stack[len - 4..len - 2].to_vec();
                self.stack.extend(items);
            }
            OP_2ROT => {
                let len = self.require(6)?;
                self.stack[len - 6..].rotate_left(2);
            }
            OP_2SWAP => {
                let len = self.require(4)?;
                self.stack[len - 4..].rotate_left(2);
            }
            OP_IFDUP => {
                let item = self.peek(0)?.clone();
                if cast_to_bool(&item) {
                    self.stack.push(item);
                }
            }
            OP_DEPTH => self.push_num(self.stack.len() as i64),
            OP_DROP => {
                self.pop()?;
            }
            OP_DUP | OP_OVER => {
                let item = self.peek(if op == OP_DUP { 0 } else { 1 })?.clone();
                self.stack.push(item);
            }
            OP_NIP => {
                let len = self.require(2)?;
                self.stack.remove(len - 2);
            }
            OP_PICK | OP_ROLL => {
                let depth = self.pop_num()?;
                if depth < 0 || depth as usize >= self.stack.len() {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let index = self.stack.len() - 1 - depth as usize;
                let item = if op == OP_ROLL { self.stack.remove(index) } else { self.stack[index].clone() };
                self.stack.push(item);
            }
            OP_ROT => {
                let len = self.require(3)?;
                self.stack[len - 3..].rotate_left(1);
            }
            OP_SWAP => {
                let len = self.require(2)?;
                self.stack.swap(len - 2, len - 1);
            }
            OP_TUCK => {
                let len = self.require(2)?;
                let top = self.stack[len - 1].clone();
                self.stack.insert(len - 2, top);
            }
            OP_SIZE => {
                let size = self.peek(0)?.len();
                self.push_num(size as i64);
            }

            OP_EQUAL | OP_EQUALVERIFY => {
                let a = self.pop()?;
                let b = self.pop()?;
                if op == OP_EQUALVERIFY {
                    if a != b {
                        return Err(ScriptError::EqualVerify);
                    }
                } else {
                    self.push_bool(a == b);
                }
            }

            OP_1ADD | OP_1SUB | OP_NEGATE | OP_ABS | OP_NOT | OP_0NOTEQUAL => {
                let a = self.pop_num()?;
                let result = match op {
                    OP_1ADD => a + 1,
                    OP_1SUB => a - 1,
                    OP_NEGATE => -a,
                    OP_ABS => a.abs(),
                    OP_NOT => (a == 0) as i64,
                    _ => (a != 0) as i64,
                };
                self.push_num(result);
            }
            OP_ADD..=OP_SUB | OP_BOOLAND..=OP_MAX => {
                let b = self.pop_num()?;
                let a = self.pop_num()?;
                let result = match op {
                    OP_ADD => a + b,
                    OP_SUB => a - b,
                    OP_BOOLAND => (a != 0 && b != 0) as i64,
                    OP_BOOLOR => (a != 0 || b != 0) as i64,
                    OP_NUMEQUAL | OP_NUMEQUALVERIFY => (a == b) as i64,
                    OP_NUMNOTEQUAL => (a != b) as i64,
                    OP_LESSTHAN => (a < b) as i64,
                    OP_GREATERTHAN => (a > b) as i64,
                    OP_LESSTHANOREQUAL => (a <= b) as i64,
                    OP_GREATERTHANOREQUAL => (a >= b) as i64,
                    OP_MIN => a.min(b),
                    _ => a.max(b),
                };
                if op == OP_NUMEQUALVERIFY {
                    if result == 0 {
                        return Err(ScriptError::NumEqualVerify);
                    }
                } else {
                    self.push_num(result);
                }
            }
            OP_WITHIN => {
                let max = self.pop_num()?;
                let min = self.pop_num()?;
                let x = self.pop_num()?;
                self.push_bool(min <= x && x < max);
            }

            OP_RIPEMD160 | OP_SHA1 | OP_SHA256 | OP_HASH160 | OP_HASH256 => {
                let item = self.pop()?;
                let digest = match op {
                    OP_RIPEMD160 => Ripemd160::digest(&item).to_vec(),
                    OP_SHA1 => sha1::Hash::hash(&item).into_inner().to_vec(),
                    OP_SHA256 => Sha256::digest(&item).to_vec(),
                    OP_HASH160 => Ripemd160::digest(Sha256::digest(&item)).to_vec(),
                    _ => double_sha256(&item).to_vec(),
                };
                self.stack.push(digest);
            }

            OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                let pubkey = self.pop()?;
                let signature = self.pop()?;
                let script_code = find_and_delete(&self.script[self.code_start..], &signature);
                let valid = self.checker.check_signature(&signature, &pubkey, &script_code)?;
                if op == OP_CHECKSIGVERIFY {
                    if !valid {
                        return Err(ScriptError::CheckSigVerify);
                    }
                } else {
                    self.push_bool(valid);
                }
            }
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                let valid = self.check_multisig()?;
                if op == OP_CHECKMULTISIGVERIFY {
                    if !valid {
                        return Err(ScriptError::CheckMultisigVerify);
                    }
                } else {
                    self.push_bool(valid);
                }
            }

            _ => return Err(ScriptError::BadOpcode),
        }
        Ok(())
    }

    /// Stack: dummy, signatures, signature count, keys, key count (top).
    /// Signatures must follow key order and each key is tried at most once.
    fn check_multisig(&mut self) -> Result<bool, ScriptError> {
        let key_count = self.pop_num()?;
        if key_count < 0 || key_count > MAX_PUBKEYS_PER_MULTISIG as i64 {
            return Err(ScriptError::PubkeyCount);
        }
        let key_count = key_count as usize;
        self.count_ops(key_count)?;
        let len = self.require(key_count)?;
        let keys = self.stack.split_off(len - key_count);

        let sig_count = self.pop_num()?;
        if sig_count < 0 || sig_count as usize > key_count {
            return Err(ScriptError::SigCount);
        }
        let sig_count = sig_count as usize;
        let len = self.require(sig_count)?;
        let signatures = self.stack.split_off(len - sig_count);

        // Historic off-by-one: one extra item is consumed
        self.pop()?;

        let script_code = signatures
            .iter()
            .fold(self.script[self.code_start..].to_vec(), |code, signature| find_and_delete(&code, signature));

        let mut remaining_keys = keys.iter();
        for signature in &signatures {
            let mut matched = false;
            for key in remaining_keys.by_ref() {
                if self.checker.check_signature(signature, key, &script_code)? {
                    matched = true;
                    break;
                }
            }
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
