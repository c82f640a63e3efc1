//! The counter contract: a count per chain, kept in step over one IBC channel.
//!
//! Executing `increment` or `reset` changes the local count and, once a channel is connected,
//! sends the same message to the contract on the other chain. A received `increment` bumps the
//! receiver's count; a received `reset` is acknowledged and otherwise ignored.

use ibc_relayer_types::core::ics04_channel::channel::Ordering;
use base64::{engine::general_purpose::STANDARD, Engine};
use ibc_relayer_types::core::ics24_host::identifier::{ChannelId, PortId};
use serde::{Deserialize, Serialize};

/// Channel version the contract negotiates.
pub const COUNTER_VERSION: &str = "counter-1";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterMsg {
    Increment {},
    Reset { count: i32 },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMsg {
    GetCount {},
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: i32,
}

/// Acknowledgement envelope written by the contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StdAck {
    /// Base64 of the JSON encoded result
    Result(String),
    Error(String),
}

impl StdAck {
    pub fn success(data: &impl Serialize) -> Self {
        // serializing a plain value cannot fail
        let json = serde_json::to_vec(data).unwrap_or_default();
        StdAck::Result(STANDARD.encode(json))
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        StdAck::Error(reason.into())
    }

    pub fn to_vec(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ContractError {
    #[error("invalid IBC channel version {0}, must be {COUNTER_VERSION}")]
    InvalidVersion(String),
    #[error("channel ordering {0} not accepted")]
    InvalidOrder(Ordering),
    #[error("already connected over {0}/{1}")]
    AlreadyConnected(PortId, ChannelId),
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

/// When packets sent by the contract time out on the receiving chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketTimeout {
    /// Nanoseconds after the sending block's time
    pub after: Option<u64>,
    /// Absolute height on the receiving chain
    pub height: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct CounterContract {
    pub address: String,
    pub count: i32,
    /// Ordering accepted on channel open, any when `None`
    pub accepted_order: Option<Ordering>,
    pub packet_timeout: PacketTimeout,
    /// The channel this contract is connected over, local end
    pub endpoint: Option<(PortId, ChannelId)>,
    /// Sequences received, in delivery order
    pub received: Vec<u64>,
    /// Acknowledgements relayed back, by sequence
    pub acknowledged: Vec<(u64, Vec<u8>)>,
    /// Sequences released by a timeout
    pub timed_out: Vec<u64>,
}

impl CounterContract {
    pub fn new(address: String, count: i32) -> Self {
        Self {
            address,
            count,
            accepted_order: None,
            packet_timeout: PacketTimeout::default(),
            endpoint: None,
            received: vec![],
            acknowledged: vec![],
            timed_out: vec![],
        }
    }

    pub fn channel_open(
        &self,
        order: Ordering,
        version: &str,
        counterparty_version: Option<&str>,
    ) -> Result<(), ContractError> {
        if let Some((port, channel)) = &self.endpoint {
            return Err(ContractError::AlreadyConnected(port.clone(), channel.clone()))
        }
        if self.accepted_order.map_or(false, |accepted| accepted != order) {
            return Err(ContractError::InvalidOrder(order))
        }
        for version in std::iter::once(version).chain(counterparty_version) {
            if version != COUNTER_VERSION {
                return Err(ContractError::InvalidVersion(version.to_string()))
            }
        }
        Ok(())
    }

    pub fn channel_connect(
        &mut self,
        port_id: PortId,
        channel_id: ChannelId,
        counterparty_version: &str,
    ) -> Result<(), ContractError> {
        if let Some((port, channel)) = &self.endpoint {
            return Err(ContractError::AlreadyConnected(port.clone(), channel.clone()))
        }
        if counterparty_version != COUNTER_VERSION {
            return Err(ContractError::InvalidVersion(counterparty_version.to_string()))
        }
        self.endpoint = Some((port_id, channel_id));
        Ok(())
    }

    /// Applies `msg` locally. Returns the packet data to send when connected.
    pub fn execute(&mut self, msg: &serde_json::Value) -> Result<Option<Vec<u8>>, ContractError> {
        let msg: CounterMsg = serde_json::from_value(msg.clone())
            .map_err(|e| ContractError::InvalidMessage(e.to_string()))?;
        match &msg {
            CounterMsg::Increment {} => self.count += 1,
            CounterMsg::Reset { count } => self.count = *count,
        }
        if self.endpoint.is_none() {
            return Ok(None)
        }
        serde_json::to_vec(&msg)
            .map(Some)
            .map_err(|e| ContractError::InvalidMessage(e.to_string()))
    }

    pub fn query(&self, msg: &serde_json::Value) -> Result<Vec<u8>, ContractError> {
        let QueryMsg::GetCount {} = serde_json::from_value(msg.clone())
            .map_err(|e| ContractError::InvalidMessage(e.to_string()))?;
        serde_json::to_vec(&CountResponse { count: self.count })
            .map_err(|e| ContractError::InvalidMessage(e.to_string()))
    }

    /// Handles a received packet and returns the acknowledgement to write. A received
    /// `increment` is applied to the local count; a received `reset` is only acknowledged.
    pub fn receive(&mut self, sequence: u64, data: &[u8]) -> Vec<u8> {
        self.received.push(sequence);
        let ack = match serde_json::from_slice::<CounterMsg>(data) {
            Ok(CounterMsg::Increment {}) => {
                self.count += 1;
                StdAck::success(&"0")
            },
            Ok(CounterMsg::Reset { .. }) => StdAck::success(&"0"),
            Err(e) => StdAck::fail(format!("invalid packet: {e}")),
        };
        ack.to_vec()
    }

    pub fn on_acknowledgement(&mut self, sequence: u64, ack: &[u8]) {
        self.acknowledged.push((sequence, ack.to_vec()));
    }

    pub fn on_timeout(&mut self, sequence: u64) {
        self.timed_out.push(sequence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    fn connected() -> CounterContract {
        let mut contract = CounterContract::new("wasmd-counter-0".to_string(), 0);
        contract
            .channel_connect(
                PortId::from_str("wasm.wasmd-counter-0").unwrap(),
                ChannelId::new(0),
                COUNTER_VERSION,
            )
            .unwrap();
        contract
    }

    #[test]
    fn ack_wraps_the_json_result_in_base64() {
        assert_eq!(StdAck::success(&"0").to_vec(), br#"{"result":"IjAi"}"#.to_vec());
        assert_eq!(
            serde_json::to_value(StdAck::fail("boom")).unwrap(),
            json!({ "error": "boom" })
        );
    }

    #[test]
    fn sends_only_when_connected() {
        let mut contract = CounterContract::new("wasmd-counter-0".to_string(), 0);
        assert_eq!(contract.execute(&json!({ "increment": {} })).unwrap(), None);
        assert_eq!(contract.count, 1);

        let mut contract = connected();
        let data = contract.execute(&json!({ "reset": { "count": 20 } })).unwrap().unwrap();
        assert_eq!(contract.count, 20);
        assert_eq!(data, br#"{"reset":{"count":20}}"#.to_vec());
    }

    #[test]
    fn receiving_increment_bumps_the_count() {
        let mut contract = connected();
        let ack = contract.receive(1, br#"{"increment":{}}"#);
        assert_eq!(ack, StdAck::success(&"0").to_vec());
        assert_eq!(contract.count, 1);
    }

    #[test]
    fn receiving_reset_leaves_the_count() {
        let mut contract = connected();
        contract.receive(1, br#"{"increment":{}}"#);
        contract.receive(2, br#"{"reset":{"count":20}}"#);
        assert_eq!(contract.count, 1);
        assert_eq!(contract.received, vec![1, 2]);

        let ack: StdAck = serde_json::from_slice(&contract.receive(3, b"garbage")).unwrap();
        assert!(matches!(ack, StdAck::Error(_)));
    }

    #[test]
    fn rejects_a_second_channel_and_foreign_versions() {
        let contract = connected();
        assert!(matches!(
            contract.channel_open(Ordering::Unordered, COUNTER_VERSION, None),
            Err(ContractError::AlreadyConnected(..))
        ));

        let mut contract = CounterContract::new("osmosis-counter-0".to_string(), 0);
        assert_eq!(
            contract.channel_open(Ordering::Unordered, COUNTER_VERSION, Some("ics20-1")),
            Err(ContractError::InvalidVersion("ics20-1".to_string()))
        );
        contract.accepted_order = Some(Ordering::Ordered);
        assert_eq!(
            contract.channel_open(Ordering::Unordered, COUNTER_VERSION, None),
            Err(ContractError::InvalidOrder(Ordering::Unordered))
        );
        contract.channel_open(Ordering::Ordered, COUNTER_VERSION, Some(COUNTER_VERSION)).unwrap();
    }

    #[test]
    fn answers_count_queries() {
        let contract = connected();
        let response = contract.query(&json!({ "get_count": {} })).unwrap();
        assert_eq!(serde_json::from_slice::<CountResponse>(&response).unwrap().count, 0);
    }
}
