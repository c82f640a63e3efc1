use super::{counter::CounterContract, light_client::LightClient, store::VersionedStore};
use crate::core::{error::Error, events::IbcEventWithHeight};
use ibc_relayer_types::{
    core::ics23_commitment::commitment::CommitmentPrefix, signer::Signer, Height,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, str::FromStr, sync::Arc};
use tokio::sync::Mutex;

/// An in-process chain with an IBC module and counter contracts.
///
/// Every transaction is executed atomically and committed in a block of its own; a refused
/// transaction leaves no trace. Clones share the same chain.
#[derive(Clone)]
pub struct MockChain {
    /// Chain name
    pub name: String,
    pub config: MockChainConfig,
    /// Reference to commitment
    pub commitment_prefix: CommitmentPrefix,
    /// The account that signs transactions
    pub signer: Signer,
    pub(crate) state: Arc<Mutex<ChainState>>,
}

/// config options for [`MockChain`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockChainConfig {
    /// Chain name
    pub name: String,
    /// Chain Id, also the revision-less chain id light clients track
    pub chain_id: String,
    /// Store prefix
    pub store_prefix: String,
    /// Relayer account
    pub account: String,
    /// Time of block zero in nanoseconds since the unix epoch
    pub genesis_time: u64,
    /// Block time in milliseconds
    pub block_time_ms: u64,
    /// Maximum weight of a transaction
    pub block_max_weight: u64,
    /// How many blocks back from the latest height proofs can be produced for,
    /// unlimited when `None`
    pub proof_retention: Option<u64>,
}

impl Default for MockChainConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            chain_id: "mock".to_string(),
            store_prefix: "ibc".to_string(),
            account: "relayer".to_string(),
            genesis_time: 1_650_000_000_000_000_000,
            block_time_ms: 1_000,
            block_max_weight: 1_000_000,
            proof_retention: None,
        }
    }
}

impl MockChainConfig {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), chain_id: name.to_string(), ..Default::default() }
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_fills_in_defaults() {
        let config =
            MockChainConfig::from_json(r#"{"name": "osmosis", "chain_id": "osmo-test-5"}"#)
                .unwrap();
        assert_eq!(config.chain_id, "osmo-test-5");
        assert_eq!(config.store_prefix, "ibc");
        assert_eq!(config.proof_retention, None);

        let chain = MockChain::new(config).unwrap();
        assert_eq!(chain.timestamp_at(2) - chain.timestamp_at(1), 1_000_000_000);
    }
}

/// State of a mock chain as of its latest block.
#[derive(Clone, Debug, Default)]
pub struct ChainState {
    /// Latest height, at least 1
    pub height: u64,
    pub store: VersionedStore,
    /// Light clients of other chains, by client id
    pub clients: BTreeMap<String, LightClient>,
    pub connection_counter: u64,
    pub channel_counter: u64,
    /// Counter contracts by address
    pub contracts: BTreeMap<String, CounterContract>,
    /// Every event emitted, oldest first
    pub events: Vec<IbcEventWithHeight>,
    /// Queries and transactions fail while offline
    pub offline: bool,
    pub proof_retention: Option<u64>,
}

/// The block a transaction is executed in.
#[derive(Clone, Debug)]
pub struct BlockContext {
    pub chain_id: String,
    pub height: u64,
    pub timestamp: u64,
    /// Store prefix of this chain
    pub prefix: Vec<u8>,
}

impl MockChain {
    /// Initializes a [`MockChain`] given a [`MockChainConfig`], at height 1
    pub fn new(config: MockChainConfig) -> Result<Self, Error> {
        let commitment_prefix = CommitmentPrefix::try_from(config.store_prefix.as_bytes().to_vec())
            .map_err(|e| Error::from(format!("Invalid store prefix {:?}", e)))?;
        let signer = Signer::from_str(&config.account)
            .map_err(|e| Error::from(format!("Invalid account {:?}", e)))?;
        let state = ChainState {
            height: 1,
            proof_retention: config.proof_retention,
            ..Default::default()
        };
        Ok(Self {
            name: config.name.clone(),
            config,
            commitment_prefix,
            signer,
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// Block time of `height` in nanoseconds.
    pub fn timestamp_at(&self, height: u64) -> u64 {
        self.config.genesis_time + height * self.config.block_time_ms * 1_000_000
    }

    pub fn height(&self, height: u64) -> Result<Height, Error> {
        Height::new(0, height)
            .map_err(|e| Error::query(&self.name, format!("invalid height {height}: {e}")))
    }

    pub(crate) fn block_context(&self, height: u64) -> BlockContext {
        BlockContext {
            chain_id: self.config.chain_id.clone(),
            height,
            timestamp: self.timestamp_at(height),
            prefix: self.commitment_prefix.as_bytes().to_vec(),
        }
    }

    /// Locks the chain state, failing while the chain is offline.
    pub(crate) async fn online_state(
        &self,
    ) -> Result<tokio::sync::MutexGuard<'_, ChainState>, Error> {
        let state = self.state.lock().await;
        if state.offline {
            return Err(Error::query(&self.name, "endpoint unreachable"))
        }
        Ok(state)
    }
}
