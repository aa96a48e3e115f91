//! Node-level consensus settings
//!
//! Network constants live in [`ConsensusParameters`]; the few knobs an operator
//! may change are loaded from JSON into [`ConsensusSettings`].

use std::path::Path;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

use crate::coinview::{CachedCoinView, CoinView, DEFAULT_MAX_ITEMS};
use crate::network::{ConsensusParameters, Network};
use crate::types::{parse_hash, Hash};

fn default_use_checkpoints() -> bool {
    true
}

fn default_max_coinview_cache_items() -> usize {
    DEFAULT_MAX_ITEMS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsensusSettings {
    pub network: Network,
    /// Reject blocks conflicting with hardened checkpoints and skip expensive
    /// checks below the last one
    #[serde(default = "default_use_checkpoints")]
    pub use_checkpoints: bool,
    /// Display-hex hash of a block whose ancestors skip expensive checks
    #[serde(default)]
    pub assume_valid: Option<String>,
    /// Records the coin view cache holds before flushing to its store
    #[serde(default = "default_max_coinview_cache_items")]
    pub max_coinview_cache_items: usize,
}

impl ConsensusSettings {
    pub fn new(network: Network) -> Self {
        ConsensusSettings {
            network,
            use_checkpoints: default_use_checkpoints(),
            assume_valid: None,
            max_coinview_cache_items: default_max_coinview_cache_items(),
        }
    }

    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let settings: ConsensusSettings = serde_json::from_str(json).context("invalid consensus settings")?;
        settings.assume_valid_hash()?;
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read consensus settings from {}", path.display()))?;
        Self::from_json_str(&json).with_context(|| format!("in {}", path.display()))
    }

    pub fn parameters(&self) -> ConsensusParameters {
        ConsensusParameters::for_network(self.network)
    }

    /// Write-back cache over `store`, sized by `max_coinview_cache_items`.
    pub fn cached_coin_view<C: CoinView>(&self, store: C) -> anyhow::Result<CachedCoinView<C>> {
        CachedCoinView::with_max_items(store, self.max_coinview_cache_items)
            .context("failed to read the coin view tip")
    }

    pub fn assume_valid_hash(&self) -> anyhow::Result<Option<Hash>> {
        match &self.assume_valid {
            None => Ok(None),
            Some(hex) => parse_hash(hex)
                .map(Some)
                .ok_or_else(|| anyhow!("assume_valid is not a 32-byte hex hash: {}", hex)),
        }
    }
}
