//! Light client of a mock chain, hosted by its counterparty.
//!
//! Client states, consensus states, headers and proofs are JSON documents wrapped in `Any`.
//! A proof lists the store entries it covers as of one height; the light client accepts it for a
//! height it holds a consensus state for.

use super::ibc::Rejection;
use crate::core::error::Error;
use ibc_proto::google::protobuf::Any;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;

pub const CLIENT_STATE_TYPE_URL: &str = "/ibc.mock.ClientState";
pub const CONSENSUS_STATE_TYPE_URL: &str = "/ibc.mock.ConsensusState";
pub const HEADER_TYPE_URL: &str = "/ibc.mock.Header";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockClientState {
    pub chain_id: String,
    pub latest_height: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockConsensusState {
    /// Block time in nanoseconds
    pub timestamp: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockHeader {
    pub chain_id: String,
    pub height: u64,
    pub timestamp: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockProof {
    pub chain_id: String,
    pub height: u64,
    pub entries: Vec<ProofEntry>,
}

/// A store entry covered by a proof. Key and value are hex encoded; a missing value proves
/// absence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofEntry {
    pub key: String,
    pub value: Option<String>,
}

pub fn to_json_any<T: Serialize>(type_url: &str, value: &T) -> Result<Any, Error> {
    Ok(Any { type_url: type_url.to_string(), value: serde_json::to_vec(value)? })
}

pub fn from_json_any<T: DeserializeOwned>(type_url: &str, any: &Any) -> Result<T, Rejection> {
    if any.type_url != type_url {
        return Err(Rejection::rejected(format!(
            "expected {type_url}, got {}",
            any.type_url
        )))
    }
    serde_json::from_slice(&any.value)
        .map_err(|e| Rejection::rejected(format!("malformed {type_url}: {e}")))
}

#[derive(Clone, Debug)]
pub struct LightClient {
    pub client_state: MockClientState,
    /// Consensus states by revision height
    pub consensus_states: BTreeMap<u64, MockConsensusState>,
}

impl LightClient {
    pub fn new(client_state: MockClientState, consensus_state: MockConsensusState) -> Self {
        let mut consensus_states = BTreeMap::new();
        consensus_states.insert(client_state.latest_height, consensus_state);
        Self { client_state, consensus_states }
    }

    pub fn update(&mut self, header: MockHeader) -> Result<(), Rejection> {
        if header.chain_id != self.client_state.chain_id {
            return Err(Rejection::rejected(format!(
                "header of {} submitted to client of {}",
                header.chain_id, self.client_state.chain_id
            )))
        }
        if self.consensus_states.contains_key(&header.height) {
            return Err(Rejection::redundant(format!(
                "consensus state at height {} already stored",
                header.height
            )))
        }
        self.consensus_states
            .insert(header.height, MockConsensusState { timestamp: header.timestamp });
        self.client_state.latest_height = self.client_state.latest_height.max(header.height);
        Ok(())
    }

    pub fn consensus_state(&self, height: u64) -> Result<&MockConsensusState, Rejection> {
        self.consensus_states.get(&height).ok_or_else(|| {
            Rejection::proof(format!(
                "no consensus state of {} at height {height}",
                self.client_state.chain_id
            ))
        })
    }

    /// Checks that `proof` shows `key` holding `value` at `height`, or absent when `value` is
    /// `None`.
    pub fn verify(
        &self,
        proof: &[u8],
        height: u64,
        key: &[u8],
        value: Option<&[u8]>,
    ) -> Result<(), Rejection> {
        self.consensus_state(height)?;
        let proof: MockProof = serde_json::from_slice(proof)
            .map_err(|e| Rejection::proof(format!("malformed proof: {e}")))?;
        if proof.chain_id != self.client_state.chain_id || proof.height != height {
            return Err(Rejection::proof(format!(
                "proof of {} at {} presented for {} at {height}",
                proof.chain_id, proof.height, self.client_state.chain_id
            )))
        }

        let key = hex::encode(key);
        let entry = proof
            .entries
            .iter()
            .find(|entry| entry.key == key)
            .ok_or_else(|| Rejection::proof(format!("proof does not cover key {key}")))?;
        if entry.value.as_deref() != value.map(hex::encode).as_deref() {
            let reason = match value {
                Some(_) => "value mismatch",
                None => "key is present",
            };
            return Err(Rejection::proof(format!("{reason} for key {key}")))
        }
        Ok(())
    }
}
