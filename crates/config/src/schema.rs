//! Config schema types (router policy, store backend).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    pub router: RouterConfig,
    pub store: StoreConfig,
}

/// Routing policy knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Display-name prefix that marks a sender as a human agent, matched
    /// case-insensitively. Defaults to "agent".
    pub agent_name_prefix: String,
    /// Upper bound for delivering a forwarded message to the counterpart
    /// conversation. Defaults to 10 seconds.
    pub forward_timeout_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            agent_name_prefix: "agent".into(),
            forward_timeout_secs: 10,
        }
    }
}

impl RouterConfig {
    pub fn forward_timeout(&self) -> Duration {
        Duration::from_secs(self.forward_timeout_secs)
    }
}

/// Which storage engine backs the handoff store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local, lost on restart.
    #[default]
    Memory,
    Sqlite,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// SQLite connection URL, e.g. `sqlite://handoff.db?mode=rwc`.
    /// Required when `backend = "sqlite"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            database_url: None,
            max_connections: 5,
        }
    }
}
