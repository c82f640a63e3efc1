// Copyright 2022 ComposableFi
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::core::{error::Error, packets::types::PacketInfo};
use ibc_relayer_types::{
    core::ics24_host::identifier::{ChannelId, ClientId, ConnectionId, PortId},
    Height,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifiers carried by connection handshake events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionAttributes {
    pub connection_id: ConnectionId,
    pub client_id: ClientId,
    pub counterparty_connection_id: Option<ConnectionId>,
    pub counterparty_client_id: ClientId,
}

/// Identifiers carried by channel handshake events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelAttributes {
    pub port_id: PortId,
    pub channel_id: ChannelId,
    pub connection_id: ConnectionId,
    pub counterparty_port_id: PortId,
    pub counterparty_channel_id: Option<ChannelId>,
}

/// Events emitted by a chain while executing a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IbcEvent {
    CreateClient(ClientId),
    UpdateClient { client_id: ClientId, consensus_height: Height },
    OpenInitConnection(ConnectionAttributes),
    OpenTryConnection(ConnectionAttributes),
    OpenAckConnection(ConnectionAttributes),
    OpenConfirmConnection(ConnectionAttributes),
    OpenInitChannel(ChannelAttributes),
    OpenTryChannel(ChannelAttributes),
    OpenAckChannel(ChannelAttributes),
    OpenConfirmChannel(ChannelAttributes),
    CloseChannel(ChannelAttributes),
    SendPacket(PacketInfo),
    ReceivePacket(PacketInfo),
    WriteAcknowledgement(PacketInfo),
    AcknowledgePacket(PacketInfo),
    TimeoutPacket(PacketInfo),
}

impl IbcEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            IbcEvent::CreateClient(_) => "create_client",
            IbcEvent::UpdateClient { .. } => "update_client",
            IbcEvent::OpenInitConnection(_) => "connection_open_init",
            IbcEvent::OpenTryConnection(_) => "connection_open_try",
            IbcEvent::OpenAckConnection(_) => "connection_open_ack",
            IbcEvent::OpenConfirmConnection(_) => "connection_open_confirm",
            IbcEvent::OpenInitChannel(_) => "channel_open_init",
            IbcEvent::OpenTryChannel(_) => "channel_open_try",
            IbcEvent::OpenAckChannel(_) => "channel_open_ack",
            IbcEvent::OpenConfirmChannel(_) => "channel_open_confirm",
            IbcEvent::CloseChannel(_) => "channel_close",
            IbcEvent::SendPacket(_) => "send_packet",
            IbcEvent::ReceivePacket(_) => "recv_packet",
            IbcEvent::WriteAcknowledgement(_) => "write_acknowledgement",
            IbcEvent::AcknowledgePacket(_) => "acknowledge_packet",
            IbcEvent::TimeoutPacket(_) => "timeout_packet",
        }
    }
}

impl fmt::Display for IbcEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IbcEvent::SendPacket(info)
            | IbcEvent::ReceivePacket(info)
            | IbcEvent::WriteAcknowledgement(info)
            | IbcEvent::AcknowledgePacket(info)
            | IbcEvent::TimeoutPacket(info) => write!(
                f,
                "{} {}/{} seq {}",
                self.event_type(),
                info.packet.source_port,
                info.packet.source_channel,
                info.packet.sequence
            ),
            _ => write!(f, "{}", self.event_type()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IbcEventWithHeight {
    pub event: IbcEvent,
    pub height: Height,
}

/// Result of a transaction included in a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResponse {
    pub hash: String,
    pub height: Height,
    pub events: Vec<IbcEvent>,
}

impl TxResponse {
    pub fn events_with_height(&self) -> Vec<IbcEventWithHeight> {
        self.events
            .iter()
            .cloned()
            .map(|event| IbcEventWithHeight {
                event,
                height: self.height,
            })
            .collect()
    }
}

/// Finds the client created by a `MsgCreateClient` transaction.
pub fn created_client_id(tx: &TxResponse) -> Result<ClientId, Error> {
    tx.events
        .iter()
        .find_map(|ev| match ev {
            IbcEvent::CreateClient(client_id) => Some(client_id.clone()),
            _ => None,
        })
        .ok_or_else(|| Error::Custom(format!("no create_client event in tx {}", tx.hash)))
}

/// Finds the connection end created by a `ConnOpenInit` or `ConnOpenTry` transaction.
pub fn created_connection_id(tx: &TxResponse) -> Result<ConnectionId, Error> {
    tx.events
        .iter()
        .find_map(|ev| match ev {
            IbcEvent::OpenInitConnection(attrs) | IbcEvent::OpenTryConnection(attrs) =>
                Some(attrs.connection_id.clone()),
            _ => None,
        })
        .ok_or_else(|| Error::Custom(format!("no connection open event in tx {}", tx.hash)))
}

/// Finds the channel end created by a `ChanOpenInit` or `ChanOpenTry` transaction.
pub fn created_channel_id(tx: &TxResponse) -> Result<ChannelId, Error> {
    tx.events
        .iter()
        .find_map(|ev| match ev {
            IbcEvent::OpenInitChannel(attrs) | IbcEvent::OpenTryChannel(attrs) =>
                Some(attrs.channel_id.clone()),
            _ => None,
        })
        .ok_or_else(|| Error::Custom(format!("no channel open event in tx {}", tx.hash)))
}

/// Acknowledgement written for `sequence` by a `MsgRecvPacket` transaction, if any.
pub fn written_acknowledgement(tx: &TxResponse, sequence: u64) -> Option<Vec<u8>> {
    tx.events.iter().find_map(|ev| match ev {
        IbcEvent::WriteAcknowledgement(info) if info.packet.sequence == sequence =>
            info.ack.as_ref().map(|ack| ack.0.clone()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn finds_created_identifiers() {
        let tx = TxResponse {
            hash: "AB01".to_string(),
            height: Height::new(0, 7).unwrap(),
            events: vec![
                IbcEvent::UpdateClient {
                    client_id: ClientId::from_str("9999-mock-0").unwrap(),
                    consensus_height: Height::new(0, 5).unwrap(),
                },
                IbcEvent::OpenTryConnection(ConnectionAttributes {
                    connection_id: ConnectionId::new(4),
                    client_id: ClientId::from_str("9999-mock-0").unwrap(),
                    counterparty_connection_id: Some(ConnectionId::new(0)),
                    counterparty_client_id: ClientId::from_str("9999-mock-1").unwrap(),
                }),
            ],
        };
        assert_eq!(created_connection_id(&tx).unwrap(), ConnectionId::new(4));
        assert!(created_channel_id(&tx).is_err());
        assert!(created_client_id(&tx).is_err());
    }
}
