//! # Consensus-Rules
//!
//! Consensus validation core for a full node: the ordered rule engine that
//! accepts or rejects headers and blocks, for Bitcoin and for a hybrid
//! proof-of-work / proof-of-stake chain with cold staking.
//!
//! ## Architecture
//!
//! - Primitives: [`types`], [`serialization`], [`script`], [`interpreter`], [`verifier`]
//! - Network parameters and chain state: [`network`], [`chain`], [`checkpoints`],
//!   [`deployments`]
//! - Consensus math: [`pow`], [`stake`], [`economic`], [`transaction`], [`locktime`]
//! - UTXO layers: [`coinview`] (store trait, memory store, write-back cache,
//!   per-block working set) and [`snapshot`]
//! - Validation: [`rules`] run by the [`engine`] against a [`context`]
//!
//! Validation runs in four stages, each an ordered list of rules: header,
//! integrity, partial and full. The first failing rule stops its stage and is
//! reported by name along with a [`ConsensusError`]. Only full validation
//! touches the coin view, and it commits atomically.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use consensus_rules::coinview::MemoryCoinView;
//! use consensus_rules::engine::{ConsensusRuleEngine, RuleServices};
//! use consensus_rules::network::{ConsensusParameters, Network};
//! use consensus_rules::rules::RuleCategory;
//! use consensus_rules::types::ZERO_HASH;
//!
//! let parameters = ConsensusParameters::for_network(Network::StratisRegTest);
//! let services = RuleServices::new(parameters, Arc::new(MemoryCoinView::new(ZERO_HASH)));
//! let engine = ConsensusRuleEngine::new(services);
//!
//! let full = engine.rule_names(RuleCategory::FullValidation);
//! assert_eq!(full.first(), Some(&"SetActivationDeploymentsFullValidationRule"));
//! assert_eq!(full.last(), Some(&"SaveCoinviewRule"));
//! ```

pub mod chain;
pub mod checkpoints;
pub mod coinview;
pub mod config;
pub mod constants;
pub mod context;
pub mod deployments;
pub mod economic;
pub mod engine;
pub mod error;
pub mod interpreter;
pub mod locktime;
pub mod network;
pub mod pow;
pub mod rules;
pub mod script;
pub mod serialization;
pub mod snapshot;
pub mod stake;
pub mod transaction;
pub mod types;
pub mod verifier;

// Re-export commonly used types
pub use config::ConsensusSettings;
pub use context::{RuleContext, ValidationContext};
pub use engine::{ConsensusRuleEngine, RuleServices};
pub use error::{CoinViewError, ConsensusError, ConsensusRuleError, Result};
pub use network::{ConsensusParameters, Network};
pub use types::*;
