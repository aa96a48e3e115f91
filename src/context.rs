//! Per-validation state threaded through the rules

use std::sync::Arc;

use crate::chain::ChainedHeader;
use crate::coinview::UnspentOutputSet;
use crate::deployments::DeploymentFlags;
use crate::error::{ConsensusError, Result};
use crate::stake::BlockStake;
use crate::types::*;

/// What is being validated: a header, and the block once it has been downloaded.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub block_to_validate: Option<Block>,
    pub chained_header_to_validate: Arc<ChainedHeader>,
}

impl ValidationContext {
    pub fn for_header(chained_header: Arc<ChainedHeader>) -> Self {
        ValidationContext { block_to_validate: None, chained_header_to_validate: chained_header }
    }

    pub fn for_block(block: Block, chained_header: Arc<ChainedHeader>) -> Self {
        ValidationContext { block_to_validate: Some(block), chained_header_to_validate: chained_header }
    }
}

/// Proof-of-stake state collected during full validation.
#[derive(Debug, Clone, Default)]
pub struct PosRuleContext {
    /// Stake record computed for the block; stored once the block is saved
    pub block_stake: Option<BlockStake>,
    pub total_coinstake_value_in: Integer,
    /// Outputs spent by the coinstake, in input order
    pub coinstake_prev_outputs: Vec<TransactionOutput>,
}

/// Mutable state for one validation run. Owned by the caller and lent to each
/// rule in turn; nothing here is shared between blocks.
#[derive(Debug)]
pub struct RuleContext {
    pub validation_context: ValidationContext,
    /// Adjusted network time the header is checked against
    pub time: u32,
    pub consensus_tip: Option<Arc<ChainedHeader>>,
    pub flags: DeploymentFlags,
    /// Set for blocks under a checkpoint or the assume-valid block; expensive
    /// proof and script checks are not performed
    pub skip_validation: bool,
    /// Loaded by the coin view rule at the start of full validation
    pub unspent_output_set: Option<UnspentOutputSet>,
    pub pos: Option<PosRuleContext>,
}

impl RuleContext {
    pub fn new(validation_context: ValidationContext, time: u32, consensus_tip: Option<Arc<ChainedHeader>>) -> Self {
        RuleContext {
            validation_context,
            time,
            consensus_tip,
            flags: DeploymentFlags::default(),
            skip_validation: false,
            unspent_output_set: None,
            pos: None,
        }
    }

    pub fn chained_header(&self) -> &Arc<ChainedHeader> {
        &self.validation_context.chained_header_to_validate
    }

    pub fn height(&self) -> u32 {
        self.validation_context.chained_header_to_validate.height()
    }

    pub fn block(&self) -> Result<&Block> {
        self.validation_context.block_to_validate.as_ref().ok_or(ConsensusError::MissingBlockData)
    }

    /// Header the validated block builds on.
    pub fn previous(&self) -> Result<&Arc<ChainedHeader>> {
        self.validation_context.chained_header_to_validate.previous().ok_or(ConsensusError::InvalidPrevTip)
    }

    pub fn unspent_output_set(&self) -> Result<&UnspentOutputSet> {
        self.unspent_output_set.as_ref().ok_or(ConsensusError::CoinViewFailure)
    }

    pub fn pos_mut(&mut self) -> &mut PosRuleContext {
        self.pos.get_or_insert_with(PosRuleContext::default)
    }
}
