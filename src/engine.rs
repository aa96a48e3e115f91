//! The rule engine
//!
//! [`ConsensusRuleEngine`] owns the network's four ordered rule lists and runs
//! them against a [`RuleContext`]. The first failing rule stops its list and is
//! reported as a [`ConsensusRuleError`] naming the rule.
//!
//! Header, integrity and partial validation only read shared state and may run
//! concurrently for different candidates. Full validation reads, stages and
//! commits coin view changes, so it holds the engine's commit lock for its whole
//! run; [`ConsensusRuleEngine::rewind`] takes the same lock.

use std::sync::Arc;

use log::{debug, info, trace};
use parking_lot::Mutex;

use crate::chain::{ChainIndex, ChainedHeader};
use crate::checkpoints::{CheckpointProvider, Checkpoints};
use crate::coinview::CoinView;
use crate::config::ConsensusSettings;
use crate::context::{RuleContext, ValidationContext};
use crate::deployments::DeploymentFlagsCalculator;
use crate::error::{CoinViewError, ConsensusRuleError};
use crate::network::ConsensusParameters;
use crate::rules::{self, ConsensusRule, RuleCategory};
use crate::stake::{MemoryStakeChain, StakeChain};
use crate::types::*;
use crate::verifier::{ScriptVerifier, StandardScriptVerifier};

/// Collaborators the rules consult.
#[derive(Clone)]
pub struct RuleServices {
    pub parameters: Arc<ConsensusParameters>,
    pub coin_view: Arc<dyn CoinView>,
    pub stake_chain: Arc<dyn StakeChain>,
    pub checkpoints: Arc<dyn CheckpointProvider>,
    pub chain_index: Option<Arc<dyn ChainIndex>>,
    pub script_verifier: Arc<dyn ScriptVerifier>,
    pub deployments: Arc<DeploymentFlagsCalculator>,
    pub assume_valid: Option<Hash>,
}

impl RuleServices {
    /// Services with the network's checkpoints, an in-memory stake chain and
    /// the standard script verifier.
    pub fn new(parameters: ConsensusParameters, coin_view: Arc<dyn CoinView>) -> Self {
        let parameters = Arc::new(parameters);
        RuleServices {
            checkpoints: Arc::new(Checkpoints::new(&parameters, true)),
            deployments: Arc::new(DeploymentFlagsCalculator::new(Arc::clone(&parameters))),
            parameters,
            coin_view,
            stake_chain: Arc::new(MemoryStakeChain::new()),
            chain_index: None,
            script_verifier: Arc::new(StandardScriptVerifier::new()),
            assume_valid: None,
        }
    }

    /// Services for `settings`. Build `coin_view` with
    /// [`ConsensusSettings::cached_coin_view`] so the cache follows the same settings.
    pub fn from_settings(settings: &ConsensusSettings, coin_view: Arc<dyn CoinView>) -> anyhow::Result<Self> {
        let mut services = RuleServices::new(settings.parameters(), coin_view);
        services.checkpoints = Arc::new(Checkpoints::new(&services.parameters, settings.use_checkpoints));
        services.assume_valid = settings.assume_valid_hash()?;
        Ok(services)
    }

    pub fn with_stake_chain(mut self, stake_chain: Arc<dyn StakeChain>) -> Self {
        self.stake_chain = stake_chain;
        self
    }

    pub fn with_checkpoints(mut self, checkpoints: Arc<dyn CheckpointProvider>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    pub fn with_chain_index(mut self, chain_index: Arc<dyn ChainIndex>) -> Self {
        self.chain_index = Some(chain_index);
        self
    }

    pub fn with_script_verifier(mut self, script_verifier: Arc<dyn ScriptVerifier>) -> Self {
        self.script_verifier = script_verifier;
        self
    }

    pub fn with_assume_valid(mut self, assume_valid: Option<Hash>) -> Self {
        self.assume_valid = assume_valid;
        self
    }
}

pub struct ConsensusRuleEngine {
    services: RuleServices,
    header_rules: Vec<Box<dyn ConsensusRule>>,
    integrity_rules: Vec<Box<dyn ConsensusRule>>,
    partial_validation_rules: Vec<Box<dyn ConsensusRule>>,
    full_validation_rules: Vec<Box<dyn ConsensusRule>>,
    commit_lock: Mutex<()>,
}

impl ConsensusRuleEngine {
    /// Engine with the standard rule lists for the services' network.
    pub fn new(services: RuleServices) -> Self {
        let mut engine = Self::empty(services);
        for rule in rules::network_rules(&engine.services.parameters) {
            engine.register(rule);
        }
        engine
    }

    /// Engine with no rules registered.
    pub fn empty(services: RuleServices) -> Self {
        ConsensusRuleEngine {
            services,
            header_rules: Vec::new(),
            integrity_rules: Vec::new(),
            partial_validation_rules: Vec::new(),
            full_validation_rules: Vec::new(),
            commit_lock: Mutex::new(()),
        }
    }

    pub fn services(&self) -> &RuleServices {
        &self.services
    }

    /// Append `rule` to the list of its category.
    pub fn register(&mut self, rule: Box<dyn ConsensusRule>) {
        self.rules_mut(rule.category()).push(rule);
    }

    fn rules(&self, category: RuleCategory) -> &[Box<dyn ConsensusRule>] {
        match category {
            RuleCategory::Header => &self.header_rules,
            RuleCategory::Integrity => &self.integrity_rules,
            RuleCategory::PartialValidation => &self.partial_validation_rules,
            RuleCategory::FullValidation => &self.full_validation_rules,
        }
    }

    fn rules_mut(&mut self, category: RuleCategory) -> &mut Vec<Box<dyn ConsensusRule>> {
        match category {
            RuleCategory::Header => &mut self.header_rules,
            RuleCategory::Integrity => &mut self.integrity_rules,
            RuleCategory::PartialValidation => &mut self.partial_validation_rules,
            RuleCategory::FullValidation => &mut self.full_validation_rules,
        }
    }

    pub fn rule_names(&self, category: RuleCategory) -> Vec<&'static str> {
        self.rules(category).iter().map(|rule| rule.name()).collect()
    }

    /// Fresh context for validating `validation_context` at adjusted time `time`.
    ///
    /// Validation is skipped for headers on the checkpointed chain at or below
    /// the last checkpoint, and for ancestors of the assume-valid block.
    pub fn create_rule_context(
        &self,
        validation_context: ValidationContext,
        time: u32,
        consensus_tip: Option<Arc<ChainedHeader>>,
    ) -> RuleContext {
        let header = &validation_context.chained_header_to_validate;
        let below_checkpoint = self.is_under_checkpoint(header);
        let assumed_valid = self.is_assumed_valid(header);

        let mut ctx = RuleContext::new(validation_context, time, consensus_tip);
        ctx.skip_validation = below_checkpoint || assumed_valid;
        if self.services.parameters.is_proof_of_stake() {
            ctx.pos_mut();
        }
        ctx
    }

    /// True when `header` is the next checkpoint at or above its height, or an
    /// ancestor of that checkpoint's indexed header. A fork off the checkpointed
    /// chain never qualifies.
    fn is_under_checkpoint(&self, header: &ChainedHeader) -> bool {
        let (height, hash) = match self.services.checkpoints.next_checkpoint(header.height()) {
            Some(checkpoint) => checkpoint,
            None => return false,
        };
        if height == header.height() {
            return hash == header.hash();
        }
        self.services
            .chain_index
            .as_ref()
            .and_then(|index| index.get_by_hash(&hash))
            .map_or(false, |checkpointed| checkpointed.contains(header))
    }

    fn is_assumed_valid(&self, header: &ChainedHeader) -> bool {
        let (assume_valid, chain_index) = match (&self.services.assume_valid, &self.services.chain_index) {
            (Some(hash), Some(index)) => (hash, index),
            _ => return false,
        };
        chain_index.get_by_hash(assume_valid).map_or(false, |assumed| assumed.contains(header))
    }

    fn run(&self, category: RuleCategory, ctx: &mut RuleContext) -> Result<(), ConsensusRuleError> {
        let hash = ctx.chained_header().hash();
        for rule in self.rules(category) {
            if ctx.skip_validation && rule.skippable() {
                trace!(target: "consensus", "skipping {} for {}", rule.name(), display_hash(&hash));
                continue;
            }
            trace!(target: "consensus", "running {} for {}", rule.name(), display_hash(&hash));
            if let Err(error) = rule.run(ctx, &self.services) {
                debug!(
                    target: "consensus",
                    "block {} at height {} rejected by {}: {} ({})",
                    display_hash(&hash),
                    ctx.height(),
                    rule.name(),
                    error,
                    error.code()
                );
                return Err(ConsensusRuleError { rule: rule.name(), error });
            }
        }
        Ok(())
    }

    pub fn run_header_validation(&self, ctx: &mut RuleContext) -> Result<(), ConsensusRuleError> {
        self.run(RuleCategory::Header, ctx)
    }

    pub fn run_integrity_validation(&self, ctx: &mut RuleContext) -> Result<(), ConsensusRuleError> {
        self.run(RuleCategory::Integrity, ctx)
    }

    pub fn run_partial_validation(&self, ctx: &mut RuleContext) -> Result<(), ConsensusRuleError> {
        self.run(RuleCategory::PartialValidation, ctx)
    }

    /// Validate against the coin view and commit the block on success. On
    /// failure the staged working set is dropped and the coin view is untouched.
    pub fn run_full_validation(&self, ctx: &mut RuleContext) -> Result<(), ConsensusRuleError> {
        let _commit = self.commit_lock.lock();
        let result = self.run(RuleCategory::FullValidation, ctx);
        if result.is_err() {
            ctx.unspent_output_set = None;
        }
        result
    }

    /// Header, integrity, partial and full validation in turn.
    pub fn run_block_validation(&self, ctx: &mut RuleContext) -> Result<(), ConsensusRuleError> {
        self.run_header_validation(ctx)?;
        self.run_integrity_validation(ctx)?;
        self.run_partial_validation(ctx)?;
        self.run_full_validation(ctx)
    }

    /// Undo the last committed block in the coin view.
    pub fn rewind(&self) -> Result<Hash, CoinViewError> {
        let _commit = self.commit_lock.lock();
        let tip = self.services.coin_view.rewind()?;
        info!(target: "consensus", "coin view rewound to {}", display_hash(&tip));
        Ok(tip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coinview::MemoryCoinView;
    use crate::context::RuleContext;
    use crate::error::{ConsensusError, Result};
    use crate::network::Network;

    struct FailingRule;

    impl ConsensusRule for FailingRule {
        fn name(&self) -> &'static str {
            "FailingRule"
        }
        fn category(&self) -> RuleCategory {
            RuleCategory::Integrity
        }
        fn skippable(&self) -> bool {
            true
        }
        fn run(&self, _ctx: &mut RuleContext, _services: &RuleServices) -> Result<()> {
            Err(ConsensusError::BadBlockSignature)
        }
    }

    fn genesis() -> Arc<ChainedHeader> {
        ChainedHeader::genesis(BlockHeader {
            version: 1,
            prev_block_hash: ZERO_HASH,
            merkle_root: ZERO_HASH,
            timestamp: 0,
            bits: 0x207fffff,
            nonce: 0,
        })
    }

    fn services(network: Network) -> RuleServices {
        RuleServices::new(ConsensusParameters::for_network(network), Arc::new(MemoryCoinView::new(ZERO_HASH)))
    }

    #[test]
    fn test_failure_names_rule() {
        let mut engine = ConsensusRuleEngine::empty(services(Network::BitcoinRegTest));
        engine.register(Box::new(FailingRule));
        assert_eq!(engine.rule_names(RuleCategory::Integrity), vec!["FailingRule"]);

        let mut ctx = engine.create_rule_context(ValidationContext::for_header(genesis()), 0, None);
        assert!(!ctx.skip_validation);
        let error = engine.run_integrity_validation(&mut ctx).unwrap_err();
        assert_eq!(error.rule, "FailingRule");
        assert_eq!(error.error, ConsensusError::BadBlockSignature);
    }

    #[test]
    fn test_skippable_rule_not_run_under_checkpoint() {
        let checkpoints = Checkpoints::from_entries(vec![(0, genesis().hash())], true);
        let mut engine = ConsensusRuleEngine::empty(
            services(Network::BitcoinRegTest).with_checkpoints(Arc::new(checkpoints)),
        );
        engine.register(Box::new(FailingRule));
        let mut ctx = engine.create_rule_context(ValidationContext::for_header(genesis()), 0, None);
        assert!(ctx.skip_validation);
        assert!(engine.run_integrity_validation(&mut ctx).is_ok());
    }

    #[test]
    fn test_pos_network_context_carries_stake_state() {
        let engine = ConsensusRuleEngine::empty(services(Network::StratisRegTest));
        let ctx = engine.create_rule_context(ValidationContext::for_header(genesis()), 0, None);
        assert!(ctx.pos.is_some());
    }

    #[test]
    fn test_rewind_without_history_fails() {
        let engine = ConsensusRuleEngine::empty(services(Network::BitcoinRegTest));
        assert_eq!(engine.rewind(), Err(CoinViewError::NothingToRewind));
    }
}
