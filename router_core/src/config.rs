//! Router-wide tunables.
//!
//! Loaded from a TOML file, or constructed directly with
//! [`RouterConfig::default`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum number of source slots a single connection may carry.
pub const MAX_CONNECTION_SOURCES: usize = 8;

/// Default per-instance history ring capacity, in samples.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Per-instance history ring capacity, in samples. Never shrinks at runtime.
    pub history_capacity: usize,
    /// Hard cap on sources per connection; `add_connection` rejects beyond this.
    pub max_connection_sources: usize,
    /// How long a link may go without a clock-sync response before external
    /// housekeeping is allowed to prune it. The router itself never enforces
    /// this; see [`crate::router::Router::check_link`].
    pub link_liveness_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            max_connection_sources: MAX_CONNECTION_SOURCES,
            link_liveness_timeout: Duration::from_secs(10),
        }
    }
}

impl RouterConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_constants() {
        let cfg = RouterConfig::default();
        assert_eq!(cfg.max_connection_sources, MAX_CONNECTION_SOURCES);
        assert_eq!(cfg.history_capacity, DEFAULT_HISTORY_CAPACITY);
    }

    #[test]
    fn loads_partial_toml_with_defaults() {
        let cfg = RouterConfig::from_toml_str("history_capacity = 16\n").unwrap();
        assert_eq!(cfg.history_capacity, 16);
        assert_eq!(cfg.max_connection_sources, MAX_CONNECTION_SOURCES);
    }
}
