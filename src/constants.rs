//! Consensus constants shared by every network
//!
//! Network-specific values (money supply, maturity, limits, activation heights)
//! live in [`crate::network::ConsensusParameters`].

/// Satoshis per coin
pub const COIN: i64 = 100_000_000;

/// Initial block subsidy on bitcoin networks: 50 coins
pub const INITIAL_SUBSIDY: i64 = 50 * COIN;

/// Weight units per byte of non-witness data
pub const WITNESS_SCALE_FACTOR: usize = 4;

/// Lock time threshold: lock times below this are block heights, above are unix times
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Sequence number for final inputs
pub const SEQUENCE_FINAL: u32 = 0xffffffff;

/// BIP68: relative lock time disabled for this input
pub const SEQUENCE_LOCKTIME_DISABLE_FLAG: u32 = 1 << 31;

/// BIP68: relative lock time is time based (512 second units)
pub const SEQUENCE_LOCKTIME_TYPE_FLAG: u32 = 1 << 22;

/// BIP68: mask extracting the relative lock value
pub const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000ffff;

/// BIP68: time based relative locks are in units of 2^9 seconds
pub const SEQUENCE_LOCKTIME_GRANULARITY: u32 = 9;

/// Number of blocks used for median time past
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Coinbase scriptSig length bounds
pub const MIN_COINBASE_SCRIPT_SIZE: usize = 2;
pub const MAX_COINBASE_SCRIPT_SIZE: usize = 100;

/// Maximum public keys counted for a CHECKMULTISIG when the count is not known
pub const MAX_PUBKEYS_PER_MULTISIG: u32 = 20;

/// Script execution limits
pub const MAX_SCRIPT_SIZE: usize = 10_000;
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;
pub const MAX_OPS_PER_SCRIPT: usize = 201;
/// Combined main and alt stack depth
pub const MAX_STACK_SIZE: usize = 1000;

/// BIP9 version bits
pub const VERSIONBITS_TOP_BITS: i32 = 0x20000000;
pub const VERSIONBITS_TOP_MASK: i32 = 0xE0000000u32 as i32;

/// Signature hash types
pub const SIGHASH_ALL: u8 = 0x01;
pub const SIGHASH_NONE: u8 = 0x02;
pub const SIGHASH_SINGLE: u8 = 0x03;
pub const SIGHASH_ANYONECANPAY: u8 = 0x80;
