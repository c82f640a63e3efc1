//! Connection and channel handshakes between two chains.
//!
//! The coordinator keeps no state of its own between steps: before each step it reads both ends
//! from the chains, asks [`state::next_step`] what to do and submits that single message. A failed
//! attempt is resumed by calling `complete_connection` or `complete_channel` again with whatever
//! identifiers are already on chain.

pub mod channel;
pub mod connection;
pub mod state;

use crate::core::{
    config::LinkConfig,
    error::{Error, HandshakeError, HandshakeStage},
    events::created_client_id,
    msgs::{to_any, CREATE_CLIENT_TYPE_URL},
    packets::tracker::ChannelEnds,
};
use crate::primitives::ChainEndpoint;
use ibc_proto::ibc::core::client::v1::MsgCreateClient;
use ibc_relayer_types::core::ics24_host::identifier::{
    ChannelId, ClientId, ConnectionId, PortId,
};
use ibc_relayer_types::core::ics04_channel::channel::Ordering;
use serde::{Deserialize, Serialize};

/// Identifiers of one connection end.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionEnd {
    /// Client of the counterparty chain hosted on this chain
    pub client_id: ClientId,
    pub connection_id: ConnectionId,
}

/// An open connection between chain A and chain B.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub a: ConnectionEnd,
    pub b: ConnectionEnd,
}

impl Connection {
    /// The same connection with the roles of the chains swapped.
    pub fn reversed(&self) -> Self {
        Self { a: self.b.clone(), b: self.a.clone() }
    }
}

/// What is known about a connection handshake that may not have finished.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionHandshake {
    pub client_a: ClientId,
    pub client_b: ClientId,
    pub connection_a: Option<ConnectionId>,
    pub connection_b: Option<ConnectionId>,
}

impl ConnectionHandshake {
    pub fn new(client_a: ClientId, client_b: ClientId) -> Self {
        Self { client_a, client_b, connection_a: None, connection_b: None }
    }
}

/// Identifiers of one channel end.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelEnd {
    pub port_id: PortId,
    pub channel_id: ChannelId,
    pub connection_id: ConnectionId,
}

/// An open channel. `src` is the end on the chain that initiated the handshake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub src: ChannelEnd,
    pub dest: ChannelEnd,
    pub ordering: Ordering,
    pub version: String,
}

impl Channel {
    /// Packet flow from `src` to `dest`.
    pub fn ends(&self) -> ChannelEnds {
        ChannelEnds {
            source_port: self.src.port_id.clone(),
            source_channel: self.src.channel_id.clone(),
            destination_port: self.dest.port_id.clone(),
            destination_channel: self.dest.channel_id.clone(),
            ordering: self.ordering,
        }
    }
}

/// What is known about a channel handshake that may not have finished. Side A initiates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelHandshake {
    pub port_a: PortId,
    pub port_b: PortId,
    pub ordering: Ordering,
    pub version: String,
    pub channel_a: Option<ChannelId>,
    pub channel_b: Option<ChannelId>,
}

impl ChannelHandshake {
    pub fn new(port_a: PortId, port_b: PortId, ordering: Ordering, version: &str) -> Self {
        Self {
            port_a,
            port_b,
            ordering,
            version: version.to_string(),
            channel_a: None,
            channel_b: None,
        }
    }
}

/// Drives handshakes between chain `a` and chain `b`. Chain `a` always sends the Init message.
pub struct HandshakeCoordinator<'a, A, B> {
    pub a: &'a A,
    pub b: &'a B,
    pub config: &'a LinkConfig,
}

impl<'a, A, B> HandshakeCoordinator<'a, A, B>
where
    A: ChainEndpoint,
    B: ChainEndpoint,
{
    pub fn new(a: &'a A, b: &'a B, config: &'a LinkConfig) -> Self {
        Self { a, b, config }
    }

    /// Creates a light client of each chain on the other.
    /// Returns the client hosted on A (tracking B) and the client hosted on B (tracking A).
    pub async fn create_clients(&self) -> Result<(ClientId, ClientId), Error> {
        let client_a = create_client(self.b, self.a).await?;
        let client_b = create_client(self.a, self.b).await?;
        log::info!(
            target: "hyperspace-link",
            "🪪 Created clients {} on {} and {} on {}",
            client_a,
            self.a.name(),
            client_b,
            self.b.name()
        );
        Ok((client_a, client_b))
    }
}

/// Creates a client of `tracked` on `host`.
async fn create_client(
    tracked: &impl ChainEndpoint,
    host: &impl ChainEndpoint,
) -> Result<ClientId, Error> {
    let fail = |e: Error| HandshakeError::new(HandshakeStage::CreateClient, e.to_string());
    let (client_state, consensus_state) = tracked.initialize_client_state().await.map_err(fail)?;
    let msg = MsgCreateClient {
        client_state: Some(client_state),
        consensus_state: Some(consensus_state),
        signer: host.account_id().to_string(),
    };
    let tx = host.submit(vec![to_any(CREATE_CLIENT_TYPE_URL, &msg)]).await.map_err(fail)?;
    Ok(created_client_id(&tx).map_err(fail)?)
}
