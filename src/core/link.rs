use crate::core::{
    config::LinkConfig,
    error::Error,
    handshake::{
        state::Side,
        Channel, ChannelHandshake, Connection, HandshakeCoordinator,
    },
    relay::RelayEngine,
    summary::RelaySummary,
};
use crate::primitives::ChainEndpoint;
use ibc_relayer_types::core::{ics04_channel::channel::Ordering, ics24_host::identifier::PortId};

/// Two chains joined by an open connection.
///
/// Holds only identifiers and configuration. Every operation reads what it needs from the chains,
/// so a link can be rebuilt from the connection identifiers at any time with [`Link::new`].
pub struct Link<A, B> {
    pub a: A,
    pub b: B,
    pub connection: Connection,
    config: LinkConfig,
}

impl<A, B> Link<A, B>
where
    A: ChainEndpoint,
    B: ChainEndpoint,
{
    pub fn new(a: A, b: B, connection: Connection, config: LinkConfig) -> Self {
        Self { a, b, connection, config }
    }

    /// Creates a light client of each chain on the other and opens a new connection between
    /// them, initiated by `a`.
    pub async fn create_with_new_connections(
        a: A,
        b: B,
        config: LinkConfig,
    ) -> Result<Self, Error> {
        let connection = {
            let coordinator = HandshakeCoordinator::new(&a, &b, &config);
            let (client_a, client_b) = coordinator.create_clients().await?;
            coordinator.create_connection(client_a, client_b).await?
        };
        log::info!(
            target: "hyperspace-link",
            "🔗 Connection {} on {} <> {} on {} is open",
            connection.a.connection_id,
            a.name(),
            connection.b.connection_id,
            b.name()
        );
        Ok(Self::new(a, b, connection, config))
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Opens a channel over the link's connection. `sender` sends ChanOpenInit from `src_port`;
    /// the returned channel's `src` is its end and `dest` the end on the other chain.
    pub async fn create_channel(
        &self,
        sender: Side,
        src_port: PortId,
        dest_port: PortId,
        ordering: Ordering,
        version: &str,
    ) -> Result<Channel, Error> {
        self.complete_channel(
            sender,
            ChannelHandshake::new(src_port, dest_port, ordering, version),
        )
        .await
    }

    /// Resumes a channel handshake `sender` started, from whatever the chains recorded.
    /// `handshake.port_a` and `handshake.channel_a` describe the sender's end.
    pub async fn complete_channel(
        &self,
        sender: Side,
        handshake: ChannelHandshake,
    ) -> Result<Channel, Error> {
        let channel = match sender {
            Side::A =>
                HandshakeCoordinator::new(&self.a, &self.b, &self.config)
                    .complete_channel(&self.connection, handshake)
                    .await?,
            Side::B =>
                HandshakeCoordinator::new(&self.b, &self.a, &self.config)
                    .complete_channel(&self.connection.reversed(), handshake)
                    .await?,
        };
        log::info!(
            target: "hyperspace-link",
            "🔗 Channel {}/{} <> {}/{} is open ({}, {})",
            channel.src.port_id,
            channel.src.channel_id,
            channel.dest.port_id,
            channel.dest.channel_id,
            channel.ordering,
            channel.version
        );
        Ok(channel)
    }

    /// One relay pass over every channel of the connection, in both directions: pending packets
    /// are delivered or timed out, then acknowledgements written for them are relayed back.
    pub async fn relay_all(&self) -> Result<RelaySummary, Error> {
        let engine = RelayEngine {
            a: &self.a,
            b: &self.b,
            connection: &self.connection,
            config: &self.config,
        };
        let summary = engine.relay_all().await?;
        log::debug!(target: "hyperspace-link", "Relay pass: {}", summary);
        Ok(summary)
    }
}
