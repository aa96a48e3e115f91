//! Script parsing, standard templates and signature operation counting
//!
//! Scripts are parsed into instructions and matched against the templates the
//! networks accept. [`crate::verifier`] checks signatures on top of the
//! templates and hands every other script to [`crate::interpreter`].

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::constants::MAX_PUBKEYS_PER_MULTISIG;

pub mod opcodes {
    pub const OP_0: u8 = 0x00;
    pub const OP_PUSHDATA1: u8 = 0x4c;
    pub const OP_PUSHDATA2: u8 = 0x4d;
    pub const OP_PUSHDATA4: u8 = 0x4e;
    pub const OP_1NEGATE: u8 = 0x4f;
    pub const OP_RESERVED: u8 = 0x50;
    pub const OP_1: u8 = 0x51;
    pub const OP_16: u8 = 0x60;

    pub const OP_NOP: u8 = 0x61;
    pub const OP_VER: u8 = 0x62;
    pub const OP_IF: u8 = 0x63;
    pub const OP_NOTIF: u8 = 0x64;
    pub const OP_VERIF: u8 = 0x65;
    pub const OP_VERNOTIF: u8 = 0x66;
    pub const OP_ELSE: u8 = 0x67;
    pub const OP_ENDIF: u8 = 0x68;
    pub const OP_VERIFY: u8 = 0x69;
    pub const OP_RETURN: u8 = 0x6a;

    pub const OP_TOALTSTACK: u8 = 0x6b;
    pub const OP_FROMALTSTACK: u8 = 0x6c;
    pub const OP_2DROP: u8 = 0x6d;
    pub const OP_2DUP: u8 = 0x6e;
    pub const OP_3DUP: u8 = 0x6f;
    pub const OP_2OVER: u8 = 0x70;
    pub const OP_2ROT: u8 = 0x71;
    pub const OP_2SWAP: u8 = 0x72;
    pub const OP_IFDUP: u8 = 0x73;
    pub const OP_DEPTH: u8 = 0x74;
    pub const OP_DROP: u8 = 0x75;
    pub const OP_DUP: u8 = 0x76;
    pub const OP_NIP: u8 = 0x77;
    pub const OP_OVER: u8 = 0x78;
    pub const OP_PICK: u8 = 0x79;
    pub const OP_ROLL: u8 = 0x7a;
    pub const OP_ROT: u8 = 0x7b;
    pub const OP_SWAP: u8 = 0x7c;
    pub const OP_TUCK: u8 = 0x7d;

    pub const OP_CAT: u8 = 0x7e;
    pub const OP_RIGHT: u8 = 0x81;
    pub const OP_SIZE: u8 = 0x82;
    pub const OP_INVERT: u8 = 0x83;
    pub const OP_XOR: u8 = 0x86;
    pub const OP_EQUAL: u8 = 0x87;
    pub const OP_EQUALVERIFY: u8 = 0x88;

    pub const OP_1ADD: u8 = 0x8b;
    pub const OP_1SUB: u8 = 0x8c;
    pub const OP_2MUL: u8 = 0x8d;
    pub const OP_2DIV: u8 = 0x8e;
    pub const OP_NEGATE: u8 = 0x8f;
    pub const OP_ABS: u8 = 0x90;
    pub const OP_NOT: u8 = 0x91;
    pub const OP_0NOTEQUAL: u8 = 0x92;
    pub const OP_ADD: u8 = 0x93;
    pub const OP_SUB: u8 = 0x94;
    pub const OP_MUL: u8 = 0x95;
    pub const OP_RSHIFT: u8 = 0x99;
    pub const OP_BOOLAND: u8 = 0x9a;
    pub const OP_BOOLOR: u8 = 0x9b;
    pub const OP_NUMEQUAL: u8 = 0x9c;
    pub const OP_NUMEQUALVERIFY: u8 = 0x9d;
    pub const OP_NUMNOTEQUAL: u8 = 0x9e;
    pub const OP_LESSTHAN: u8 = 0x9f;
    pub const OP_GREATERTHAN: u8 = 0xa0;
    pub const OP_LESSTHANOREQUAL: u8 = 0xa1;
    pub const OP_GREATERTHANOREQUAL: u8 = 0xa2;
    pub const OP_MIN: u8 = 0xa3;
    pub const OP_MAX: u8 = 0xa4;
    pub const OP_WITHIN: u8 = 0xa5;

    pub const OP_RIPEMD160: u8 = 0xa6;
    pub const OP_SHA1: u8 = 0xa7;
    pub const OP_SHA256: u8 = 0xa8;
    pub const OP_HASH160: u8 = 0xa9;
    pub const OP_HASH256: u8 = 0xaa;
    pub const OP_CODESEPARATOR: u8 = 0xab;
    pub const OP_CHECKSIG: u8 = 0xac;
    pub const OP_CHECKSIGVERIFY: u8 = 0xad;
    pub const OP_CHECKMULTISIG: u8 = 0xae;
    pub const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;

    pub const OP_NOP1: u8 = 0xb0;
    /// OP_NOP2 (BIP65)
    pub const OP_CHECKLOCKTIMEVERIFY: u8 = 0xb1;
    /// OP_NOP3 (BIP112)
    pub const OP_CHECKSEQUENCEVERIFY: u8 = 0xb2;
    pub const OP_NOP4: u8 = 0xb3;
    pub const OP_NOP9: u8 = 0xb8;
    /// OP_NOP10, repurposed as the cold staking opcode
    pub const OP_CHECKCOLDSTAKEVERIFY: u8 = 0xb9;
}

use opcodes::*;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("push runs past the end of the script")]
    TruncatedPush,
}

/// One parsed script element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction<'a> {
    /// Data push (OP_0 is an empty push)
    Push(&'a [u8]),
    /// Any non-push opcode, including OP_1NEGATE and OP_1..OP_16
    Op(u8),
}

/// Iterator over the instructions of a script.
pub struct Instructions<'a> {
    script: &'a [u8],
    cursor: usize,
    failed: bool,
}

pub fn instructions(script: &[u8]) -> Instructions<'_> {
    Instructions { script, cursor: 0, failed: false }
}

impl<'a> Instructions<'a> {
    /// Offset of the next unread byte.
    pub fn position(&self) -> usize {
        self.cursor
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ParseError> {
        let end = self.cursor.checked_add(len).ok_or(ParseError::TruncatedPush)?;
        if end > self.script.len() {
            return Err(ParseError::TruncatedPush);
        }
        let data = &self.script[self.cursor..end];
        self.cursor = end;
        Ok(data)
    }

    fn read_len(&mut self, width: usize) -> Result<usize, ParseError> {
        let bytes = self.take(width)?;
        let mut len = 0usize;
        for (i, byte) in bytes.iter().enumerate() {
            len |= (*byte as usize) << (8 * i);
        }
        Ok(len)
    }
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Result<Instruction<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.cursor >= self.script.len() {
            return None;
        }
        let opcode = self.script[self.cursor];
        self.cursor += 1;
        let result = match opcode {
            OP_0 => Ok(Instruction::Push(&[])),
            0x01..=0x4b => self.take(opcode as usize).map(Instruction::Push),
            OP_PUSHDATA1 => self.read_len(1).and_then(|len| self.take(len)).map(Instruction::Push),
            OP_PUSHDATA2 => self.read_len(2).and_then(|len| self.take(len)).map(Instruction::Push),
            OP_PUSHDATA4 => self.read_len(4).and_then(|len| self.take(len)).map(Instruction::Push),
            other => Ok(Instruction::Op(other)),
        };
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}

/// Decode a push-only script into its stack items.
///
/// OP_1NEGATE and OP_1..OP_16 become their numeric encodings. Returns `None`
/// if the script contains any other opcode or is malformed.
pub fn push_only_items(script: &[u8]) -> Option<Vec<Vec<u8>>> {
    let mut items = Vec::new();
    for instruction in instructions(script) {
        match instruction.ok()? {
            Instruction::Push(data) => items.push(data.to_vec()),
            Instruction::Op(OP_1NEGATE) => items.push(vec![0x81]),
            Instruction::Op(op) if (OP_1..=OP_16).contains(&op) => items.push(vec![op - OP_1 + 1]),
            Instruction::Op(_) => return None,
        }
    }
    Some(items)
}

/// RIPEMD160(SHA256(data))
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    let ripemd = Ripemd160::digest(sha);
    let mut out = [0u8; 20];
    out.copy_from_slice(&ripemd);
    out
}

/// Recognized script-pubkey shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptTemplate<'a> {
    PayToPubkey(&'a [u8]),
    PayToPubkeyHash(&'a [u8]),
    PayToScriptHash(&'a [u8]),
    Multisig { required: usize, keys: Vec<&'a [u8]> },
    /// Delegated staking: the hot key may only stake, the cold key may spend
    ColdStaking { hot: &'a [u8], cold: &'a [u8] },
    NullData,
    /// Anyone-can-spend `OP_TRUE`
    True,
    NonStandard,
}

fn small_int(op: u8) -> Option<usize> {
    if (OP_1..=OP_16).contains(&op) {
        Some((op - OP_1 + 1) as usize)
    } else {
        None
    }
}

fn is_pubkey(data: &[u8]) -> bool {
    match data.len() {
        33 => data[0] == 0x02 || data[0] == 0x03,
        65 => data[0] == 0x04,
        _ => false,
    }
}

pub fn classify(script: &[u8]) -> ScriptTemplate<'_> {
    if script.first() == Some(&OP_RETURN) {
        return ScriptTemplate::NullData;
    }
    let parsed: Result<Vec<Instruction>, ParseError> = instructions(script).collect();
    let parsed = match parsed {
        Ok(parsed) => parsed,
        Err(_) => return ScriptTemplate::NonStandard,
    };

    use Instruction::*;
    match parsed.as_slice() {
        [Op(OP_1)] => ScriptTemplate::True,
        [Push(key), Op(OP_CHECKSIG)] if is_pubkey(key) => ScriptTemplate::PayToPubkey(*key),
        [Op(OP_DUP), Op(OP_HASH160), Push(hash), Op(OP_EQUALVERIFY), Op(OP_CHECKSIG)]
            if hash.len() == 20 =>
        {
            ScriptTemplate::PayToPubkeyHash(*hash)
        }
        [Op(OP_HASH160), Push(hash), Op(OP_EQUAL)] if hash.len() == 20 && script.len() == 23 => {
            ScriptTemplate::PayToScriptHash(*hash)
        }
        [Op(OP_DUP), Op(OP_HASH160), Op(OP_ROT), Op(OP_IF), Op(OP_CHECKCOLDSTAKEVERIFY), Push(hot), Op(OP_ELSE), Push(cold), Op(OP_ENDIF), Op(OP_EQUALVERIFY), Op(OP_CHECKSIG)]
            if hot.len() == 20 && cold.len() == 20 =>
        {
            ScriptTemplate::ColdStaking { hot: *hot, cold: *cold }
        }
        [Op(m), keys @ .., Op(n), Op(OP_CHECKMULTISIG)] => {
            let (required, total) = match (small_int(*m), small_int(*n)) {
                (Some(required), Some(total)) => (required, total),
                _ => return ScriptTemplate::NonStandard,
            };
            let mut pubkeys = Vec::with_capacity(keys.len());
            for key in keys {
                match key {
                    Push(data) if is_pubkey(data) => pubkeys.push(*data),
                    _ => return ScriptTemplate::NonStandard,
                }
            }
            if pubkeys.len() != total || required > total {
                return ScriptTemplate::NonStandard;
            }
            ScriptTemplate::Multisig { required, keys: pubkeys }
        }
        _ => ScriptTemplate::NonStandard,
    }
}

pub fn is_pay_to_script_hash(script: &[u8]) -> bool {
    matches!(classify(script), ScriptTemplate::PayToScriptHash(_))
}

pub fn is_cold_staking(script: &[u8]) -> bool {
    matches!(classify(script), ScriptTemplate::ColdStaking { .. })
}

pub fn is_op_return(script: &[u8]) -> bool {
    script.first() == Some(&OP_RETURN)
}

/// Count signature operations.
///
/// Legacy counting charges the maximum (20) for every CHECKMULTISIG; accurate
/// counting uses the preceding OP_n when there is one. Counting stops at the
/// first malformed push.
pub fn count_sigops(script: &[u8], accurate: bool) -> u32 {
    let mut count = 0u32;
    let mut last_op: Option<u8> = None;
    for instruction in instructions(script) {
        let op = match instruction {
            Ok(Instruction::Op(op)) => op,
            Ok(Instruction::Push(_)) => {
                last_op = None;
                continue;
            }
            Err(_) => break,
        };
        match op {
            OP_CHECKSIG | OP_CHECKSIGVERIFY => count += 1,
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                count += match last_op.and_then(small_int) {
                    Some(n) if accurate => n as u32,
                    _ => MAX_PUBKEYS_PER_MULTISIG,
                }
            }
            _ => {}
        }
        last_op = Some(op);
    }
    count
}

/// Sigops of the redeem script when spending a P2SH output.
pub fn p2sh_sigops(script_sig: &[u8], prev_script_pubkey: &[u8]) -> u32 {
    if !is_pay_to_script_hash(prev_script_pubkey) {
        return 0;
    }
    match push_only_items(script_sig).and_then(|mut items| items.pop()) {
        Some(redeem_script) => count_sigops(&redeem_script, true),
        None => 0,
    }
}

fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    match data.len() {
        len if len < OP_PUSHDATA1 as usize => script.push(len as u8),
        len if len <= 0xff => {
            script.push(OP_PUSHDATA1);
            script.push(len as u8);
        }
        len if len <= 0xffff => {
            script.push(OP_PUSHDATA2);
            script.extend_from_slice(&(len as u16).to_le_bytes());
        }
        len => {
            script.push(OP_PUSHDATA4);
            script.extend_from_slice(&(len as u32).to_le_bytes());
        }
    }
    script.extend_from_slice(data);
}

/// Little-endian sign-magnitude encoding of a script number.
pub(crate) fn script_num_to_vec(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let negative = value < 0;
    let mut abs = value.unsigned_abs();
    let mut result = Vec::new();
    while abs > 0 {
        result.push((abs & 0xff) as u8);
        abs >>= 8;
    }
    if let Some(last) = result.last_mut() {
        if *last & 0x80 != 0 {
            result.push(if negative { 0x80 } else { 0x00 });
        } else if negative {
            *last |= 0x80;
        }
    }
    result
}

/// Minimal script encoding of an integer push, as required at the start of a
/// BIP34 coinbase scriptSig.
pub fn script_push_int(value: i64) -> Vec<u8> {
    if value == 0 {
        return vec![OP_0];
    }
    if value == -1 {
        return vec![OP_1NEGATE];
    }
    if (1..=16).contains(&value) {
        return vec![OP_1 + (value as u8 - 1)];
    }
    let mut script = Vec::new();
    push_data(&mut script, &script_num_to_vec(value));
    script
}

/// Builder-style helpers for the standard templates.
pub struct ScriptBuilder {
    script: Vec<u8>,
}

impl Default for ScriptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptBuilder {
    pub fn new() -> Self {
        ScriptBuilder { script: Vec::new() }
    }

    pub fn push_slice(mut self, data: &[u8]) -> Self {
        if data.is_empty() {
            self.script.push(OP_0);
        } else {
            push_data(&mut self.script, data);
        }
        self
    }

    pub fn push_opcode(mut self, op: u8) -> Self {
        self.script.push(op);
        self
    }

    pub fn into_script(self) -> Vec<u8> {
        self.script
    }

    pub fn pay_to_pubkey(pubkey: &[u8]) -> Vec<u8> {
        Self::new().push_slice(pubkey).push_opcode(OP_CHECKSIG).into_script()
    }

    pub fn pay_to_pubkey_hash(hash: &[u8; 20]) -> Vec<u8> {
        Self::new()
            .push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_slice(hash)
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_CHECKSIG)
            .into_script()
    }

    pub fn pay_to_script_hash(redeem_script: &[u8]) -> Vec<u8> {
        Self::new()
            .push_opcode(OP_HASH160)
            .push_slice(&hash160(redeem_script))
            .push_opcode(OP_EQUAL)
            .into_script()
    }

    pub fn cold_staking(hot_key_hash: &[u8; 20], cold_key_hash: &[u8; 20]) -> Vec<u8> {
        Self::new()
            .push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_opcode(OP_ROT)
            .push_opcode(OP_IF)
            .push_opcode(OP_CHECKCOLDSTAKEVERIFY)
            .push_slice(hot_key_hash)
            .push_opcode(OP_ELSE)
            .push_slice(cold_key_hash)
            .push_opcode(OP_ENDIF)
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_CHECKSIG)
            .into_script()
    }

    pub fn op_return(data: &[u8]) -> Vec<u8> {
        Self::new().push_opcode(OP_RETURN).push_slice(data).into_script()
    }
}
