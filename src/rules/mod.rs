//! Consensus rules
//!
//! Each rule is a unit struct implementing [`ConsensusRule`]. The order rules
//! are registered in matters: later rules rely on structure checked by earlier
//! ones (a coinbase exists before its height is read, coins are loaded before
//! they are spent). [`network_rules`] builds the fixed list for a network.

mod coinview;
mod header;
mod integrity;
mod partial;
mod pos;

pub use coinview::*;
pub use header::*;
pub use integrity::*;
pub use partial::*;
pub use pos::*;

use crate::context::RuleContext;
use crate::engine::RuleServices;
use crate::error::Result;
use crate::network::ConsensusParameters;

/// Validation stage a rule belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleCategory {
    /// Header only, no block data
    Header,
    /// Block body against its header
    Integrity,
    /// Context-free block and transaction checks
    PartialValidation,
    /// Checks against, and updates to, the coin view
    FullValidation,
}

pub trait ConsensusRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn category(&self) -> RuleCategory;

    /// Skippable rules are not run at all when the context skips validation.
    fn skippable(&self) -> bool {
        false
    }

    fn run(&self, ctx: &mut RuleContext, services: &RuleServices) -> Result<()>;
}

/// The network's rule lists, in registration order.
pub fn network_rules(params: &ConsensusParameters) -> Vec<Box<dyn ConsensusRule>> {
    if params.is_proof_of_stake() {
        pos_rules()
    } else {
        pow_rules()
    }
}

pub fn pow_rules() -> Vec<Box<dyn ConsensusRule>> {
    vec![
        // Header
        Box::new(CheckpointsRule),
        Box::new(HeaderTimeChecksRule),
        Box::new(CheckDifficultyPowRule),
        Box::new(HeaderVersionRule),
        // Integrity
        Box::new(BlockMerkleRootRule),
        // Partial
        Box::new(SetActivationDeploymentsPartialValidationRule),
        Box::new(TransactionLocktimeActivationRule),
        Box::new(BlockSizeRule),
        Box::new(EnsureCoinbaseRule),
        Box::new(CoinbaseHeightActivationRule),
        Box::new(CheckPowTransactionRule),
        Box::new(CheckSigOpsRule),
        // Full
        Box::new(SetActivationDeploymentsFullValidationRule),
        Box::new(LoadCoinviewRule),
        Box::new(TransactionDuplicationActivationRule),
        Box::new(PowCoinviewRule),
        Box::new(SaveCoinviewRule),
    ]
}

pub fn pos_rules() -> Vec<Box<dyn ConsensusRule>> {
    vec![
        // Header
        Box::new(CheckpointsRule),
        Box::new(HeaderTimeChecksPosRule),
        Box::new(PosFutureDriftRule),
        Box::new(HeaderVersionRule),
        // Integrity
        Box::new(BlockMerkleRootRule),
        Box::new(PosBlockSignatureRepresentationRule),
        Box::new(PosBlockSignatureRule::new()),
        // Partial
        Box::new(SetActivationDeploymentsPartialValidationRule),
        Box::new(PosTimeMaskRule),
        Box::new(TransactionLocktimeActivationRule),
        Box::new(BlockSizeRule),
        Box::new(EnsureCoinbaseRule),
        Box::new(CoinbaseHeightActivationRule),
        Box::new(CheckPowTransactionRule),
        Box::new(CheckPosTransactionRule),
        Box::new(CheckSigOpsRule),
        Box::new(PosCoinstakeRule),
        // Full
        Box::new(SetActivationDeploymentsFullValidationRule),
        Box::new(CheckDifficultyHybridRule),
        Box::new(LoadCoinviewRule),
        Box::new(TransactionDuplicationActivationRule),
        Box::new(PosCoinviewRule),
        Box::new(PosColdStakingRule),
        Box::new(SaveCoinviewRule),
    ]
}
