//! Runtime configuration.
//!
//! The runtime works with defaults; embedders that want different limits
//! deserialize a [`RuntimeConfig`] (usually from JSON) and install it with
//! [`Runtime::configure`](crate::reactive::Runtime::configure).

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Limits applied by the reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum number of effect runs in one flush before the flush is
    /// aborted. Guards against effects that keep invalidating each other.
    pub max_flush_iterations: usize,

    /// Maximum number of back-to-back re-runs of a single effect that
    /// invalidates itself while running.
    pub max_effect_reruns: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_flush_iterations: 10_000,
            max_effect_reruns: 100,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from a JSON string. Missing keys keep their
    /// defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
