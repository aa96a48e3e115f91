//! Error types for consensus validation

use thiserror::Error;

use crate::types::Hash;

/// Every way a header or block can violate consensus.
///
/// Each variant carries a stable machine-readable code (see [`ConsensusError::code`])
/// and a human-readable message (its `Display`).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsensusError {
    #[error("invalid block prevout hash")]
    InvalidPrevTip,

    #[error("proof of work failed")]
    HighHash,

    #[error("block height mismatch in coinbase")]
    BadCoinbaseHeight,

    #[error("contains a non-final transaction")]
    BadTransactionNonFinal,

    #[error("weight limit failed")]
    BadBlockWeight,

    #[error("incorrect proof of work")]
    BadDiffBits,

    #[error("block's timestamp is too early")]
    TimeTooOld,

    #[error("block timestamp too far in the future")]
    TimeTooNew,

    #[error("block version rejected")]
    BadVersion,

    #[error("hashMerkleRoot mismatch")]
    BadMerkleRoot,

    #[error("size limits failed")]
    BadBlockLength,

    #[error("first tx is not coinbase")]
    BadCoinbaseMissing,

    #[error("more than one coinbase")]
    BadMultipleCoinbase,

    #[error("out-of-bounds SigOpCount")]
    BadBlockSigOps,

    #[error("duplicate transaction")]
    BadTransactionDuplicate,

    #[error("vin empty")]
    BadTransactionNoInput,

    #[error("vout empty")]
    BadTransactionNoOutput,

    #[error("size limits failed")]
    BadTransactionOversize,

    #[error("txout.nValue negative")]
    BadTransactionNegativeOutput,

    #[error("txout.nValue too high")]
    BadTransactionTooLargeOutput,

    #[error("txout total too high")]
    BadTransactionTooLargeTotalOutput,

    #[error("duplicate inputs")]
    BadTransactionDuplicateInputs,

    #[error("this is not coinbase transaction")]
    BadTransactionNullPrevout,

    #[error("tried to overwrite transaction")]
    BadTransactionBip30,

    #[error("input missing/spent")]
    BadTransactionMissingInput,

    #[error("coinbase script size out of range")]
    BadCoinbaseSize,

    #[error("tried to spend coinbase before maturity")]
    BadTransactionPrematureCoinbaseSpending,

    #[error("tried to spend coinstake before maturity")]
    BadTransactionPrematureCoinstakeSpending,

    #[error("input values out of range")]
    BadTransactionInputValueOutOfRange,

    #[error("value in < value out")]
    BadTransactionInBelowOut,

    #[error("fee out of range")]
    BadTransactionFeeOutOfRange,

    #[error("user transaction output is empty")]
    BadTransactionEmptyOutput,

    #[error("script verification failed")]
    BadTransactionScriptError,

    #[error("coinbase pays too much")]
    BadCoinbaseAmount,

    #[error("coinstake pays too much")]
    BadCoinstakeAmount,

    #[error("non-coinstake")]
    NonCoinstake,

    #[error("read txPrev failed")]
    ReadTxPrevFailed,

    #[error("tried to stake at depth")]
    InvalidStakeDepth,

    #[error("stake time violation")]
    StakeTimeViolation,

    #[error("proof-of-stake hash did not meet target protocol")]
    StakeHashInvalidTarget,

    #[error("bad stake block")]
    BadStakeBlock,

    #[error("more than one coinstake")]
    BadMultipleCoinstake,

    #[error("block timestamp earlier than transaction timestamp")]
    BlockTimeBeforeTrx,

    #[error("block timestamp too early")]
    BlockTimestampTooEarly,

    #[error("block timestamp too far in the future")]
    BlockTimestampTooFar,

    #[error("proof of work too high")]
    ProofOfWorkTooHigh,

    #[error("bad block signature")]
    BadBlockSignature,

    #[error("cold staking inputs do not share the same script")]
    BadColdstakeInputs,

    #[error("cold staking outputs do not return to the staked script")]
    BadColdstakeOutputs,

    #[error("cold staking outputs are worth less than the inputs")]
    BadColdstakeAmount,

    #[error("checkpoint violation")]
    CheckpointViolation,

    #[error("block data missing from validation context")]
    MissingBlockData,

    #[error("coin view failure")]
    CoinViewFailure,
}

impl ConsensusError {
    /// Stable short code, matching what peers log and ban on.
    pub fn code(&self) -> &'static str {
        use ConsensusError::*;
        match self {
            InvalidPrevTip => "invalid-prev-tip",
            HighHash => "high-hash",
            BadCoinbaseHeight => "bad-cb-height",
            BadTransactionNonFinal => "bad-txns-nonfinal",
            BadBlockWeight => "bad-blk-weight",
            BadDiffBits => "bad-diffbits",
            TimeTooOld => "time-too-old",
            TimeTooNew => "time-too-new",
            BadVersion => "bad-version",
            BadMerkleRoot => "bad-txnmrklroot",
            BadBlockLength => "bad-blk-length",
            BadCoinbaseMissing => "bad-cb-missing",
            BadMultipleCoinbase => "bad-cb-multiple",
            BadBlockSigOps => "bad-blk-sigops",
            BadTransactionDuplicate => "bad-txns-duplicate",
            BadTransactionNoInput => "bad-txns-vin-empty",
            BadTransactionNoOutput => "bad-txns-vout-empty",
            BadTransactionOversize => "bad-txns-oversize",
            BadTransactionNegativeOutput => "bad-txns-vout-negative",
            BadTransactionTooLargeOutput => "bad-txns-vout-toolarge",
            BadTransactionTooLargeTotalOutput => "bad-txns-txouttotal-toolarge",
            BadTransactionDuplicateInputs => "bad-txns-inputs-duplicate",
            BadTransactionNullPrevout => "bad-txns-prevout-null",
            BadTransactionBip30 => "bad-txns-BIP30",
            BadTransactionMissingInput => "bad-txns-inputs-missingorspent",
            BadCoinbaseSize => "bad-cb-length",
            BadTransactionPrematureCoinbaseSpending => "bad-txns-premature-spend-of-coinbase",
            BadTransactionPrematureCoinstakeSpending => "bad-txns-premature-spend-of-coinstake",
            BadTransactionInputValueOutOfRange => "bad-txns-inputvalues-outofrange",
            BadTransactionInBelowOut => "bad-txns-in-belowout",
            BadTransactionFeeOutOfRange => "bad-txns-fee-outofrange",
            BadTransactionEmptyOutput => "user-txout-empty",
            BadTransactionScriptError => "mandatory-script-verify-flag-failed",
            BadCoinbaseAmount => "bad-cb-amount",
            BadCoinstakeAmount => "bad-cs-amount",
            NonCoinstake => "non-coinstake",
            ReadTxPrevFailed => "read-txPrev-failed",
            InvalidStakeDepth => "invalid-stake-depth",
            StakeTimeViolation => "stake-time-violation",
            StakeHashInvalidTarget => "proof-of-stake-hash-invalid-target",
            BadStakeBlock => "bad-stake-block",
            BadMultipleCoinstake => "bad-cs-multiple",
            BlockTimeBeforeTrx => "block-time-before-trx",
            BlockTimestampTooEarly => "block-timestamp-to-early",
            BlockTimestampTooFar => "block-timestamp-to-far",
            ProofOfWorkTooHigh => "proof-of-work-too-high",
            BadBlockSignature => "bad-block-signature",
            BadColdstakeInputs => "bad-coldstake-inputs",
            BadColdstakeOutputs => "bad-coldstake-outputs",
            BadColdstakeAmount => "bad-coldstake-amount",
            CheckpointViolation => "checkpoint-violation",
            MissingBlockData => "missing-block-data",
            CoinViewFailure => "coinview-failure",
        }
    }

    /// Human-readable message.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

/// A consensus error tagged with the rule that raised it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{rule} failed: {error} ({})", .error.code())]
pub struct ConsensusRuleError {
    pub rule: &'static str,
    pub error: ConsensusError,
}

/// Failures of the UTXO store itself, as opposed to consensus violations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoinViewError {
    #[error("coin view tip is {actual:?}, expected {expected:?}")]
    TipMismatch { expected: Hash, actual: Hash },

    #[error("no rewind data available")]
    NothingToRewind,

    #[error("coin view backend failure: {0}")]
    Backend(String),
}

impl From<CoinViewError> for ConsensusError {
    fn from(error: CoinViewError) -> Self {
        match error {
            CoinViewError::TipMismatch { .. } => ConsensusError::InvalidPrevTip,
            CoinViewError::NothingToRewind | CoinViewError::Backend(_) => {
                ConsensusError::CoinViewFailure
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ConsensusError>;
