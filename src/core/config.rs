use crate::core::{error::Error, msgs::CONNECTION_VERSION_IDENTIFIER};
use ibc_relayer_types::core::ics04_channel::channel::Ordering;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// config options for a [`crate::core::link::Link`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Upper bound on handshake steps submitted by one `complete_*` call
    pub max_handshake_steps: usize,
    /// Connection delay period in nanoseconds
    pub connection_delay: u64,
    /// Connection version identifier proposed on ConnOpenInit
    pub connection_version: String,
    /// Channel orderings proposed as connection version features
    pub connection_features: Vec<Ordering>,
    /// Submit receive packets of unordered channels concurrently
    pub parallel_unordered: bool,
    /// Delay between passes of the continuous relay loop, in milliseconds
    pub relay_interval_ms: u64,
    /// How many times a proof is refreshed at a newer height before a packet is reported as failed
    pub proof_refresh_retries: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_handshake_steps: 8,
            connection_delay: 0,
            connection_version: CONNECTION_VERSION_IDENTIFIER.to_string(),
            connection_features: vec![Ordering::Ordered, Ordering::Unordered],
            parallel_unordered: true,
            relay_interval_ms: 1_000,
            proof_refresh_retries: 1,
        }
    }
}

impl LinkConfig {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn relay_interval(&self) -> Duration {
        Duration::from_millis(self.relay_interval_ms)
    }

    pub fn connection_features(&self) -> Vec<String> {
        self.connection_features
            .iter()
            .map(|order| order.as_str().to_string())
            .collect()
    }
}
