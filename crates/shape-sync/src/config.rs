//! Protocol configuration.
//!
//! Every field has a default, so an empty TOML document is a valid config:
//!
//! ```toml
//! max_registry_entries = 64
//! max_depth = 256
//! negotiation = "known-id"
//! track_access = false
//! ```

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const DEFAULT_MAX_REGISTRY_ENTRIES: usize = 256;
pub const DEFAULT_MAX_DEPTH: usize = 512;

/// How the peer tells the sender what it already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NegotiationMode {
    /// The peer names the single structure it expects. Only `full` and
    /// `values-only` packets are produced.
    KnownId,
    /// The peer lists every structure it holds and the sender picks
    /// `full`, `values-only` or `differential` on its own.
    #[default]
    KnownList,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Upper bound on cached structure definitions per registry.
    pub max_registry_entries: usize,
    /// Traversal depth bound for shape, flatten and unflatten walks.
    pub max_depth: usize,
    pub negotiation: NegotiationMode,
    /// When false, access patterns are ignored and no differential packets
    /// are emitted.
    pub track_access: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_registry_entries: DEFAULT_MAX_REGISTRY_ENTRIES,
            max_depth: DEFAULT_MAX_DEPTH,
            negotiation: NegotiationMode::default(),
            track_access: true,
        }
    }
}

impl SyncConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        Ok(toml::from_str(input)?)
    }

    pub fn with_max_registry_entries(mut self, max: usize) -> Self {
        self.max_registry_entries = max;
        self
    }

    pub fn with_negotiation(mut self, mode: NegotiationMode) -> Self {
        self.negotiation = mode;
        self
    }

    /// Whether encode may emit differential packets at all.
    pub fn differentials_enabled(&self) -> bool {
        self.track_access && self.negotiation == NegotiationMode::KnownList
    }
}
