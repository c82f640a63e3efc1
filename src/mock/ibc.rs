//! IBC message execution on a mock chain.

use super::{
    client::{BlockContext, ChainState},
    counter::{ContractError, CounterContract},
    light_client::{
        from_json_any, LightClient, MockClientState, MockConsensusState, MockHeader,
        CLIENT_STATE_TYPE_URL, CONSENSUS_STATE_TYPE_URL, HEADER_TYPE_URL,
    },
    store::{decode_u64, encode_u64},
};
use crate::core::{
    error::RejectionKind,
    events::{ChannelAttributes, ConnectionAttributes, IbcEvent},
    msgs::*,
    packets::types::{parse_channel, parse_port, Acknowledgement, Packet, PacketInfo},
};
use crate::primitives::funcs::apply_prefix;
use ibc_proto::{
    google::protobuf::Any,
    ibc::core::{
        channel::v1::{
            Channel as RawChannel, Counterparty as ChannelCounterparty, MsgAcknowledgement,
            MsgChannelOpenAck, MsgChannelOpenConfirm, MsgChannelOpenInit, MsgChannelOpenTry,
            MsgRecvPacket, MsgTimeout, MsgTimeoutOnClose, Packet as RawPacket,
        },
        client::v1::{Height as RawHeight, MsgCreateClient, MsgUpdateClient},
        commitment::v1::MerklePrefix,
        connection::v1::{
            ConnectionEnd as RawConnectionEnd, Counterparty as ConnectionCounterparty,
            MsgConnectionOpenAck, MsgConnectionOpenConfirm, MsgConnectionOpenInit,
            MsgConnectionOpenTry, Version,
        },
    },
};
use ibc_relayer_types::{
    core::{
        ics03_connection::connection::State as ConnectionState,
        ics04_channel::{
            channel::{Ordering, State},
            packet::Sequence,
        },
        ics24_host::{
            identifier::{ChannelId, ClientId, ConnectionId, PortId},
            path::{
                AcksPath, ChannelEndsPath, CommitmentsPath, ConnectionsPath, ReceiptsPath,
                SeqAcksPath, SeqRecvsPath, SeqSendsPath,
            },
        },
    },
    Height,
};
use prost::Message;
use std::str::FromStr;

/// Why the chain refused a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub reason: String,
}

impl Rejection {
    pub fn redundant(reason: impl Into<String>) -> Self {
        Self { kind: RejectionKind::Redundant, reason: reason.into() }
    }

    pub fn proof(reason: impl Into<String>) -> Self {
        Self { kind: RejectionKind::Proof, reason: reason.into() }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self { kind: RejectionKind::Rejected, reason: reason.into() }
    }
}

impl From<ContractError> for Rejection {
    fn from(error: ContractError) -> Self {
        Rejection::rejected(format!("contract error: {error}"))
    }
}

impl From<prost::DecodeError> for Rejection {
    fn from(error: prost::DecodeError) -> Self {
        Rejection::rejected(format!("malformed message: {error}"))
    }
}

impl From<crate::core::error::Error> for Rejection {
    fn from(error: crate::core::error::Error) -> Self {
        Rejection::rejected(error.to_string())
    }
}

type Handled = Result<Vec<IbcEvent>, Rejection>;

/// Connection version features this chain supports.
const SUPPORTED_FEATURES: [&str; 2] = ["ORDER_ORDERED", "ORDER_UNORDERED"];

/// Port a counter contract is bound to.
pub fn contract_port(address: &str) -> String {
    format!("wasm.{address}")
}

fn decode<M: Message + Default>(any: &Any) -> Result<M, Rejection> {
    Ok(M::decode(any.value.as_slice())?)
}

fn proof_height(height: Option<RawHeight>) -> Result<u64, Rejection> {
    Ok(from_raw_height(height)?.revision_height())
}

fn block_height(ctx: &BlockContext) -> Result<Height, Rejection> {
    Height::new(0, ctx.height).map_err(|e| Rejection::rejected(e.to_string()))
}

fn state_of(state: i32) -> Result<State, Rejection> {
    State::from_i32(state).map_err(|e| Rejection::rejected(e.to_string()))
}

fn connection_state_of(state: i32) -> Result<ConnectionState, Rejection> {
    ConnectionState::from_i32(state).map_err(|e| Rejection::rejected(e.to_string()))
}

fn ordering_of(ordering: i32) -> Result<Ordering, Rejection> {
    match Ordering::from_i32(ordering).map_err(|e| Rejection::rejected(e.to_string()))? {
        Ordering::Uninitialized => Err(Rejection::rejected("channel ordering is not set")),
        ordering => Ok(ordering),
    }
}

fn supported_version(version: &Version) -> bool {
    version.identifier == CONNECTION_VERSION_IDENTIFIER &&
        version.features.iter().all(|f| SUPPORTED_FEATURES.contains(&f.as_str()))
}

fn commitment_key(packet: &Packet) -> String {
    CommitmentsPath {
        port_id: packet.source_port.clone(),
        channel_id: packet.source_channel.clone(),
        sequence: Sequence::from(packet.sequence),
    }
    .to_string()
}

fn receipt_key(packet: &Packet) -> String {
    ReceiptsPath {
        port_id: packet.destination_port.clone(),
        channel_id: packet.destination_channel.clone(),
        sequence: Sequence::from(packet.sequence),
    }
    .to_string()
}

fn ack_key(packet: &Packet) -> String {
    AcksPath {
        port_id: packet.destination_port.clone(),
        channel_id: packet.destination_channel.clone(),
        sequence: Sequence::from(packet.sequence),
    }
    .to_string()
}

/// A channel end with the connection it runs over.
struct ChannelContext {
    end: RawChannel,
    ordering: Ordering,
    connection: RawConnectionEnd,
    /// Store prefix of the counterparty chain
    counterparty_prefix: Vec<u8>,
}

impl ChainState {
    /// Executes one message in the block described by `ctx`.
    pub fn execute(&mut self, ctx: &BlockContext, msg: &Any) -> Handled {
        match msg.type_url.as_str() {
            CREATE_CLIENT_TYPE_URL => self.create_client(decode(msg)?),
            UPDATE_CLIENT_TYPE_URL => self.update_client(decode(msg)?),
            CONN_OPEN_INIT_TYPE_URL => self.conn_open_init(ctx, decode(msg)?),
            CONN_OPEN_TRY_TYPE_URL => self.conn_open_try(ctx, decode(msg)?),
            CONN_OPEN_ACK_TYPE_URL => self.conn_open_ack(ctx, decode(msg)?),
            CONN_OPEN_CONFIRM_TYPE_URL => self.conn_open_confirm(ctx, decode(msg)?),
            CHAN_OPEN_INIT_TYPE_URL => self.chan_open_init(ctx, decode(msg)?),
            CHAN_OPEN_TRY_TYPE_URL => self.chan_open_try(ctx, decode(msg)?),
            CHAN_OPEN_ACK_TYPE_URL => self.chan_open_ack(ctx, decode(msg)?),
            CHAN_OPEN_CONFIRM_TYPE_URL => self.chan_open_confirm(ctx, decode(msg)?),
            RECV_PACKET_TYPE_URL => self.recv_packet(ctx, decode(msg)?),
            ACKNOWLEDGEMENT_TYPE_URL => self.acknowledge_packet(ctx, decode(msg)?),
            TIMEOUT_TYPE_URL => self.timeout_packet(ctx, decode(msg)?),
            TIMEOUT_ON_CLOSE_TYPE_URL => self.timeout_on_close(ctx, decode(msg)?),
            other => Err(Rejection::rejected(format!("unsupported message type {other}"))),
        }
    }

    fn client(&self, client_id: &str) -> Result<&LightClient, Rejection> {
        self.clients
            .get(client_id)
            .ok_or_else(|| Rejection::rejected(format!("client {client_id} not found")))
    }

    fn connection(&self, connection_id: &str) -> Result<RawConnectionEnd, Rejection> {
        let key = format!("connections/{connection_id}");
        let bytes = self
            .store
            .get(&key)
            .ok_or_else(|| Rejection::rejected(format!("connection {connection_id} not found")))?;
        Ok(RawConnectionEnd::decode(bytes)?)
    }

    fn channel(&self, port_id: &str, channel_id: &str) -> Result<RawChannel, Rejection> {
        let key = format!("channelEnds/ports/{port_id}/channels/{channel_id}");
        let bytes = self.store.get(&key).ok_or_else(|| {
            Rejection::rejected(format!("channel {port_id}/{channel_id} not found"))
        })?;
        Ok(RawChannel::decode(bytes)?)
    }

    fn contract_mut(&mut self, port_id: &str) -> Result<&mut CounterContract, Rejection> {
        let address = port_id.strip_prefix("wasm.").unwrap_or_default();
        self.contracts
            .get_mut(address)
            .ok_or_else(|| Rejection::rejected(format!("no module bound to port {port_id}")))
    }

    fn contract(&self, port_id: &str) -> Result<&CounterContract, Rejection> {
        let address = port_id.strip_prefix("wasm.").unwrap_or_default();
        self.contracts
            .get(address)
            .ok_or_else(|| Rejection::rejected(format!("no module bound to port {port_id}")))
    }

    /// Checks a proof from the chain tracked by `client_id`. `key` is relative to that chain's
    /// store prefix.
    fn verify(
        &self,
        client_id: &str,
        prefix: &[u8],
        proof: &[u8],
        height: u64,
        key: String,
        value: Option<&[u8]>,
    ) -> Result<(), Rejection> {
        let key = apply_prefix(prefix.to_vec(), key);
        self.client(client_id)?.verify(proof, height, &key, value)
    }

    fn open_connection_of(&self, channel: &RawChannel) -> Result<RawConnectionEnd, Rejection> {
        let hop = channel
            .connection_hops
            .first()
            .ok_or_else(|| Rejection::rejected("channel has no connection hop"))?;
        let connection = self.connection(hop)?;
        if connection_state_of(connection.state)? != ConnectionState::Open {
            return Err(Rejection::rejected(format!("connection {hop} is not open")))
        }
        Ok(connection)
    }

    fn channel_context(&self, port_id: &str, channel_id: &str) -> Result<ChannelContext, Rejection> {
        let end = self.channel(port_id, channel_id)?;
        let ordering = ordering_of(end.ordering)?;
        let connection = self.open_connection_of(&end)?;
        let counterparty_prefix = connection
            .counterparty
            .as_ref()
            .and_then(|c| c.prefix.as_ref())
            .map(|p| p.key_prefix.clone())
            .unwrap_or_default();
        Ok(ChannelContext { end, ordering, connection, counterparty_prefix })
    }

    fn set_channel(&mut self, ctx: &BlockContext, port_id: &str, channel_id: &str, end: &RawChannel) {
        self.store.set(
            ctx.height,
            format!("channelEnds/ports/{port_id}/channels/{channel_id}"),
            end.encode_to_vec(),
        );
    }

    fn create_client(&mut self, msg: MsgCreateClient) -> Handled {
        let client_state = msg
            .client_state
            .ok_or_else(|| Rejection::rejected("missing client state"))?;
        let consensus_state = msg
            .consensus_state
            .ok_or_else(|| Rejection::rejected("missing consensus state"))?;
        let client_state: MockClientState = from_json_any(CLIENT_STATE_TYPE_URL, &client_state)?;
        let consensus_state: MockConsensusState =
            from_json_any(CONSENSUS_STATE_TYPE_URL, &consensus_state)?;

        let client_id = ClientId::from_str(&format!("9999-mock-{}", self.clients.len()))
            .map_err(|e| Rejection::rejected(e.to_string()))?;
        self.clients
            .insert(client_id.to_string(), LightClient::new(client_state, consensus_state));
        Ok(vec![IbcEvent::CreateClient(client_id)])
    }

    fn update_client(&mut self, msg: MsgUpdateClient) -> Handled {
        let header = msg
            .client_message
            .ok_or_else(|| Rejection::rejected("missing header"))?;
        let header: MockHeader = from_json_any(HEADER_TYPE_URL, &header)?;
        let client = self
            .clients
            .get_mut(&msg.client_id)
            .ok_or_else(|| Rejection::rejected(format!("client {} not found", msg.client_id)))?;
        let height = header.height;
        client.update(header)?;
        Ok(vec![IbcEvent::UpdateClient {
            client_id: ClientId::from_str(&msg.client_id)
                .map_err(|e| Rejection::rejected(e.to_string()))?,
            consensus_height: Height::new(0, height)
                .map_err(|e| Rejection::rejected(e.to_string()))?,
        }])
    }

    fn connection_attributes(
        connection_id: &ConnectionId,
        end: &RawConnectionEnd,
    ) -> Result<ConnectionAttributes, Rejection> {
        let counterparty = end.counterparty.clone().unwrap_or_default();
        let parse_client =
            |id: &str| ClientId::from_str(id).map_err(|e| Rejection::rejected(e.to_string()));
        Ok(ConnectionAttributes {
            connection_id: connection_id.clone(),
            client_id: parse_client(&end.client_id)?,
            counterparty_connection_id: ConnectionId::from_str(&counterparty.connection_id).ok(),
            counterparty_client_id: parse_client(&counterparty.client_id)?,
        })
    }

    fn new_connection(&mut self, ctx: &BlockContext, end: &RawConnectionEnd) -> ConnectionId {
        let connection_id = ConnectionId::new(self.connection_counter);
        self.connection_counter += 1;
        self.store.set(
            ctx.height,
            ConnectionsPath(connection_id.clone()).to_string(),
            end.encode_to_vec(),
        );
        connection_id
    }

    fn conn_open_init(&mut self, ctx: &BlockContext, msg: MsgConnectionOpenInit) -> Handled {
        self.client(&msg.client_id)?;
        let version = msg.version.unwrap_or_else(|| Version {
            identifier: CONNECTION_VERSION_IDENTIFIER.to_string(),
            features: SUPPORTED_FEATURES.iter().map(|f| f.to_string()).collect(),
        });
        if !supported_version(&version) {
            return Err(Rejection::rejected(format!(
                "unsupported connection version {} {:?}",
                version.identifier, version.features
            )))
        }
        let end = RawConnectionEnd {
            client_id: msg.client_id,
            versions: vec![version],
            state: ConnectionState::Init as i32,
            counterparty: msg.counterparty,
            delay_period: msg.delay_period,
        };
        let connection_id = self.new_connection(ctx, &end);
        Ok(vec![IbcEvent::OpenInitConnection(Self::connection_attributes(&connection_id, &end)?)])
    }

    fn conn_open_try(&mut self, ctx: &BlockContext, msg: MsgConnectionOpenTry) -> Handled {
        self.client(&msg.client_id)?;
        if let Some(client_state) = &msg.client_state {
            let state: MockClientState = from_json_any(CLIENT_STATE_TYPE_URL, client_state)?;
            if state.chain_id != ctx.chain_id {
                return Err(Rejection::rejected(format!(
                    "counterparty tracks {} instead of {}",
                    state.chain_id, ctx.chain_id
                )))
            }
        }
        let counterparty = msg
            .counterparty
            .ok_or_else(|| Rejection::rejected("missing counterparty"))?;
        if counterparty.connection_id.is_empty() {
            return Err(Rejection::rejected("missing counterparty connection id"))
        }

        let version = msg
            .counterparty_versions
            .iter()
            .find(|v| v.identifier == CONNECTION_VERSION_IDENTIFIER)
            .map(|v| Version {
                identifier: v.identifier.clone(),
                features: v
                    .features
                    .iter()
                    .filter(|f| SUPPORTED_FEATURES.contains(&f.as_str()))
                    .cloned()
                    .collect(),
            })
            .filter(|v| !v.features.is_empty())
            .ok_or_else(|| Rejection::rejected("no compatible connection version"))?;

        let expected = RawConnectionEnd {
            client_id: counterparty.client_id.clone(),
            versions: msg.counterparty_versions.clone(),
            state: ConnectionState::Init as i32,
            counterparty: Some(ConnectionCounterparty {
                client_id: msg.client_id.clone(),
                connection_id: String::new(),
                prefix: Some(MerklePrefix { key_prefix: ctx.prefix.clone() }),
            }),
            delay_period: msg.delay_period,
        };
        let prefix = counterparty.prefix.clone().unwrap_or_default().key_prefix;
        self.verify(
            &msg.client_id,
            &prefix,
            &msg.proof_init,
            proof_height(msg.proof_height)?,
            format!("connections/{}", counterparty.connection_id),
            Some(&expected.encode_to_vec()),
        )?;

        let end = RawConnectionEnd {
            client_id: msg.client_id,
            versions: vec![version],
            state: ConnectionState::TryOpen as i32,
            counterparty: Some(counterparty),
            delay_period: msg.delay_period,
        };
        let connection_id = self.new_connection(ctx, &end);
        Ok(vec![IbcEvent::OpenTryConnection(Self::connection_attributes(&connection_id, &end)?)])
    }

    /// The counterparty's end as it must be stored for `end` to move to the next state.
    fn expected_counterparty_connection(
        ctx: &BlockContext,
        connection_id: &str,
        end: &RawConnectionEnd,
        state: ConnectionState,
        versions: Vec<Version>,
    ) -> RawConnectionEnd {
        RawConnectionEnd {
            client_id: end.counterparty.as_ref().map(|c| c.client_id.clone()).unwrap_or_default(),
            versions,
            state: state as i32,
            counterparty: Some(ConnectionCounterparty {
                client_id: end.client_id.clone(),
                connection_id: connection_id.to_string(),
                prefix: Some(MerklePrefix { key_prefix: ctx.prefix.clone() }),
            }),
            delay_period: end.delay_period,
        }
    }

    fn conn_open_ack(&mut self, ctx: &BlockContext, msg: MsgConnectionOpenAck) -> Handled {
        let mut end = self.connection(&msg.connection_id)?;
        match connection_state_of(end.state)? {
            ConnectionState::Init => {},
            ConnectionState::Open =>
                return Err(Rejection::redundant(format!("{} already open", msg.connection_id))),
            other =>
                return Err(Rejection::rejected(format!("{} is {other}", msg.connection_id))),
        }
        let version = msg
            .version
            .ok_or_else(|| Rejection::rejected("missing connection version"))?;
        let proposed = end.versions.iter().any(|v| {
            v.identifier == version.identifier &&
                version.features.iter().all(|f| v.features.contains(f))
        });
        if !proposed {
            return Err(Rejection::rejected(format!(
                "version {} {:?} was not proposed",
                version.identifier, version.features
            )))
        }

        let expected = Self::expected_counterparty_connection(
            ctx,
            &msg.connection_id,
            &end,
            ConnectionState::TryOpen,
            vec![version.clone()],
        );
        let prefix = end
            .counterparty
            .as_ref()
            .and_then(|c| c.prefix.clone())
            .unwrap_or_default()
            .key_prefix;
        self.verify(
            &end.client_id,
            &prefix,
            &msg.proof_try,
            proof_height(msg.proof_height)?,
            format!("connections/{}", msg.counterparty_connection_id),
            Some(&expected.encode_to_vec()),
        )?;

        end.state = ConnectionState::Open as i32;
        end.versions = vec![version];
        if let Some(counterparty) = end.counterparty.as_mut() {
            counterparty.connection_id = msg.counterparty_connection_id;
        }
        self.store.set(ctx.height, format!("connections/{}", msg.connection_id), end.encode_to_vec());
        let connection_id = ConnectionId::from_str(&msg.connection_id)
            .map_err(|e| Rejection::rejected(e.to_string()))?;
        Ok(vec![IbcEvent::OpenAckConnection(Self::connection_attributes(&connection_id, &end)?)])
    }

    fn conn_open_confirm(&mut self, ctx: &BlockContext, msg: MsgConnectionOpenConfirm) -> Handled {
        let mut end = self.connection(&msg.connection_id)?;
        match connection_state_of(end.state)? {
            ConnectionState::TryOpen => {},
            ConnectionState::Open =>
                return Err(Rejection::redundant(format!("{} already open", msg.connection_id))),
            other =>
                return Err(Rejection::rejected(format!("{} is {other}", msg.connection_id))),
        }
        let counterparty = end.counterparty.clone().unwrap_or_default();
        let expected = Self::expected_counterparty_connection(
            ctx,
            &msg.connection_id,
            &end,
            ConnectionState::Open,
            end.versions.clone(),
        );
        self.verify(
            &end.client_id,
            &counterparty.prefix.unwrap_or_default().key_prefix,
            &msg.proof_ack,
            proof_height(msg.proof_height)?,
            format!("connections/{}", counterparty.connection_id),
            Some(&expected.encode_to_vec()),
        )?;

        end.state = ConnectionState::Open as i32;
        self.store.set(ctx.height, format!("connections/{}", msg.connection_id), end.encode_to_vec());
        let connection_id = ConnectionId::from_str(&msg.connection_id)
            .map_err(|e| Rejection::rejected(e.to_string()))?;
        Ok(vec![IbcEvent::OpenConfirmConnection(Self::connection_attributes(&connection_id, &end)?)])
    }

    fn channel_attributes(
        port_id: &str,
        channel_id: &str,
        end: &RawChannel,
    ) -> Result<ChannelAttributes, Rejection> {
        let counterparty = end.counterparty.clone().unwrap_or_default();
        let hop = end.connection_hops.first().cloned().unwrap_or_default();
        Ok(ChannelAttributes {
            port_id: parse_port(port_id)?,
            channel_id: parse_channel(channel_id)?,
            connection_id: ConnectionId::from_str(&hop)
                .map_err(|e| Rejection::rejected(e.to_string()))?,
            counterparty_port_id: parse_port(&counterparty.port_id)?,
            counterparty_channel_id: parse_channel(&counterparty.channel_id).ok(),
        })
    }

    /// Checks the connection a new channel end runs over can carry its ordering.
    fn check_channel_connection(&self, end: &RawChannel) -> Result<Ordering, Rejection> {
        if end.connection_hops.len() != 1 {
            return Err(Rejection::rejected("exactly one connection hop is supported"))
        }
        let connection = self.connection(&end.connection_hops[0])?;
        let ordering = ordering_of(end.ordering)?;
        let supported = connection
            .versions
            .iter()
            .any(|v| v.features.iter().any(|f| f == ordering.as_str()));
        if !supported {
            return Err(Rejection::rejected(format!(
                "connection {} does not support {ordering}",
                end.connection_hops[0]
            )))
        }
        Ok(ordering)
    }

    fn new_channel(&mut self, ctx: &BlockContext, port_id: &str, end: &RawChannel) -> Result<ChannelId, Rejection> {
        let channel_id = ChannelId::new(self.channel_counter);
        self.channel_counter += 1;
        let port = parse_port(port_id)?;
        self.set_channel(ctx, port_id, channel_id.as_str(), end);
        for key in [
            SeqSendsPath(port.clone(), channel_id.clone()).to_string(),
            SeqRecvsPath(port.clone(), channel_id.clone()).to_string(),
            SeqAcksPath(port, channel_id.clone()).to_string(),
        ] {
            self.store.set(ctx.height, key, encode_u64(1));
        }
        Ok(channel_id)
    }

    fn chan_open_init(&mut self, ctx: &BlockContext, msg: MsgChannelOpenInit) -> Handled {
        let mut end = msg.channel.ok_or_else(|| Rejection::rejected("missing channel"))?;
        let ordering = self.check_channel_connection(&end)?;
        self.contract(&msg.port_id)?.channel_open(ordering, &end.version, None)?;

        end.state = State::Init as i32;
        let channel_id = self.new_channel(ctx, &msg.port_id, &end)?;
        Ok(vec![IbcEvent::OpenInitChannel(Self::channel_attributes(
            &msg.port_id,
            channel_id.as_str(),
            &end,
        )?)])
    }

    fn chan_open_try(&mut self, ctx: &BlockContext, msg: MsgChannelOpenTry) -> Handled {
        let mut end = msg.channel.ok_or_else(|| Rejection::rejected("missing channel"))?;
        let ordering = self.check_channel_connection(&end)?;
        let connection = self.open_connection_of(&end)?;
        let counterparty = end.counterparty.clone().unwrap_or_default();
        if counterparty.channel_id.is_empty() {
            return Err(Rejection::rejected("missing counterparty channel id"))
        }
        self.contract(&msg.port_id)?.channel_open(
            ordering,
            &end.version,
            Some(&msg.counterparty_version),
        )?;

        let remote = connection.counterparty.clone().unwrap_or_default();
        let expected = RawChannel {
            state: State::Init as i32,
            ordering: end.ordering,
            counterparty: Some(ChannelCounterparty {
                port_id: msg.port_id.clone(),
                channel_id: String::new(),
            }),
            connection_hops: vec![remote.connection_id.clone()],
            version: msg.counterparty_version.clone(),
            ..Default::default()
        };
        self.verify(
            &connection.client_id,
            &remote.prefix.unwrap_or_default().key_prefix,
            &msg.proof_init,
            proof_height(msg.proof_height)?,
            format!("channelEnds/ports/{}/channels/{}", counterparty.port_id, counterparty.channel_id),
            Some(&expected.encode_to_vec()),
        )?;

        end.state = State::TryOpen as i32;
        let channel_id = self.new_channel(ctx, &msg.port_id, &end)?;
        Ok(vec![IbcEvent::OpenTryChannel(Self::channel_attributes(
            &msg.port_id,
            channel_id.as_str(),
            &end,
        )?)])
    }

    fn chan_open_ack(&mut self, ctx: &BlockContext, msg: MsgChannelOpenAck) -> Handled {
        let mut end = self.channel(&msg.port_id, &msg.channel_id)?;
        match state_of(end.state)? {
            State::Init => {},
            State::Open =>
                return Err(Rejection::redundant(format!(
                    "{}/{} already open",
                    msg.port_id, msg.channel_id
                ))),
            other =>
                return Err(Rejection::rejected(format!(
                    "{}/{} is {other}",
                    msg.port_id, msg.channel_id
                ))),
        }
        let connection = self.open_connection_of(&end)?;
        let remote = connection.counterparty.clone().unwrap_or_default();
        let counterparty_port = end.counterparty.clone().unwrap_or_default().port_id;

        let expected = RawChannel {
            state: State::TryOpen as i32,
            ordering: end.ordering,
            counterparty: Some(ChannelCounterparty {
                port_id: msg.port_id.clone(),
                channel_id: msg.channel_id.clone(),
            }),
            connection_hops: vec![remote.connection_id.clone()],
            version: msg.counterparty_version.clone(),
            ..Default::default()
        };
        self.verify(
            &connection.client_id,
            &remote.prefix.unwrap_or_default().key_prefix,
            &msg.proof_try,
            proof_height(msg.proof_height)?,
            format!("channelEnds/ports/{counterparty_port}/channels/{}", msg.counterparty_channel_id),
            Some(&expected.encode_to_vec()),
        )?;

        self.contract_mut(&msg.port_id)?.channel_connect(
            parse_port(&msg.port_id)?,
            parse_channel(&msg.channel_id)?,
            &msg.counterparty_version,
        )?;
        end.state = State::Open as i32;
        if let Some(counterparty) = end.counterparty.as_mut() {
            counterparty.channel_id = msg.counterparty_channel_id;
        }
        self.set_channel(ctx, &msg.port_id, &msg.channel_id, &end);
        Ok(vec![IbcEvent::OpenAckChannel(Self::channel_attributes(
            &msg.port_id,
            &msg.channel_id,
            &end,
        )?)])
    }

    fn chan_open_confirm(&mut self, ctx: &BlockContext, msg: MsgChannelOpenConfirm) -> Handled {
        let mut end = self.channel(&msg.port_id, &msg.channel_id)?;
        match state_of(end.state)? {
            State::TryOpen => {},
            State::Open =>
                return Err(Rejection::redundant(format!(
                    "{}/{} already open",
                    msg.port_id, msg.channel_id
                ))),
            other =>
                return Err(Rejection::rejected(format!(
                    "{}/{} is {other}",
                    msg.port_id, msg.channel_id
                ))),
        }
        let connection = self.open_connection_of(&end)?;
        let remote = connection.counterparty.clone().unwrap_or_default();
        let counterparty = end.counterparty.clone().unwrap_or_default();

        let expected = RawChannel {
            state: State::Open as i32,
            ordering: end.ordering,
            counterparty: Some(ChannelCounterparty {
                port_id: msg.port_id.clone(),
                channel_id: msg.channel_id.clone(),
            }),
            connection_hops: vec![remote.connection_id.clone()],
            version: end.version.clone(),
            ..Default::default()
        };
        self.verify(
            &connection.client_id,
            &remote.prefix.unwrap_or_default().key_prefix,
            &msg.proof_ack,
            proof_height(msg.proof_height)?,
            format!(
                "channelEnds/ports/{}/channels/{}",
                counterparty.port_id, counterparty.channel_id
            ),
            Some(&expected.encode_to_vec()),
        )?;

        self.contract_mut(&msg.port_id)?.channel_connect(
            parse_port(&msg.port_id)?,
            parse_channel(&msg.channel_id)?,
            &end.version,
        )?;
        end.state = State::Open as i32;
        self.set_channel(ctx, &msg.port_id, &msg.channel_id, &end);
        Ok(vec![IbcEvent::OpenConfirmChannel(Self::channel_attributes(
            &msg.port_id,
            &msg.channel_id,
            &end,
        )?)])
    }

    /// Commits a packet the contract bound to `port_id` sends over its channel.
    pub fn send_packet(
        &mut self,
        ctx: &BlockContext,
        port_id: &PortId,
        channel_id: &ChannelId,
        data: Vec<u8>,
        timeout_height: Option<Height>,
        timeout_timestamp: u64,
    ) -> Handled {
        let context = self.channel_context(port_id.as_str(), channel_id.as_str())?;
        if state_of(context.end.state)? != State::Open {
            return Err(Rejection::rejected(format!("{port_id}/{channel_id} is not open")))
        }
        let counterparty = context.end.counterparty.clone().unwrap_or_default();
        let seq_key = SeqSendsPath(port_id.clone(), channel_id.clone()).to_string();
        let sequence = decode_u64(self.store.get(&seq_key));

        let packet = Packet {
            sequence,
            source_port: port_id.clone(),
            source_channel: channel_id.clone(),
            destination_port: parse_port(&counterparty.port_id)?,
            destination_channel: parse_channel(&counterparty.channel_id)?,
            data,
            timeout_height,
            timeout_timestamp,
        };
        self.store.set(ctx.height, commitment_key(&packet), packet.commitment());
        self.store.set(ctx.height, seq_key, encode_u64(sequence + 1));
        Ok(vec![IbcEvent::SendPacket(PacketInfo {
            height: block_height(ctx)?,
            channel_order: context.ordering,
            packet,
            ack: None,
        })])
    }

    fn packet(raw: Option<RawPacket>) -> Result<Packet, Rejection> {
        let raw = raw.ok_or_else(|| Rejection::rejected("missing packet"))?;
        Ok(Packet::try_from(raw)?)
    }

    fn check_counterparty(end: &RawChannel, port_id: &PortId, channel_id: &ChannelId) -> Result<(), Rejection> {
        let counterparty = end.counterparty.clone().unwrap_or_default();
        if counterparty.port_id != port_id.as_str() || counterparty.channel_id != channel_id.as_str() {
            return Err(Rejection::rejected(format!(
                "channel counterparty is {}/{}, packet names {port_id}/{channel_id}",
                counterparty.port_id, counterparty.channel_id
            )))
        }
        Ok(())
    }

    fn recv_packet(&mut self, ctx: &BlockContext, msg: MsgRecvPacket) -> Handled {
        let packet = Self::packet(msg.packet)?;
        let context = self.channel_context(
            packet.destination_port.as_str(),
            packet.destination_channel.as_str(),
        )?;
        if state_of(context.end.state)? != State::Open {
            return Err(Rejection::rejected(format!(
                "{}/{} is not open",
                packet.destination_port, packet.destination_channel
            )))
        }
        Self::check_counterparty(&context.end, &packet.source_port, &packet.source_channel)?;

        let seq_recv_key =
            SeqRecvsPath(packet.destination_port.clone(), packet.destination_channel.clone())
                .to_string();
        if context.ordering == Ordering::Ordered {
            let next = decode_u64(self.store.get(&seq_recv_key));
            if packet.sequence < next {
                return Err(Rejection::redundant(format!(
                    "packet {} already received",
                    packet.sequence
                )))
            }
            if packet.sequence > next {
                return Err(Rejection::rejected(format!(
                    "packet {} out of order, expected {next}",
                    packet.sequence
                )))
            }
        } else if self.store.get(&receipt_key(&packet)).is_some() {
            return Err(Rejection::redundant(format!("packet {} already received", packet.sequence)))
        }
        if packet.is_timed_out(block_height(ctx)?, ctx.timestamp) {
            return Err(Rejection::rejected(format!("packet {} timed out", packet.sequence)))
        }

        self.verify(
            &context.connection.client_id,
            &context.counterparty_prefix,
            &msg.proof_commitment,
            proof_height(msg.proof_height)?,
            commitment_key(&packet),
            Some(&packet.commitment()),
        )?;

        if context.ordering == Ordering::Ordered {
            self.store.set(ctx.height, seq_recv_key, encode_u64(packet.sequence + 1));
        } else {
            self.store.set(ctx.height, receipt_key(&packet), vec![1]);
        }
        let ack = Acknowledgement(
            self.contract_mut(packet.destination_port.as_str())?
                .receive(packet.sequence, &packet.data),
        );
        self.store.set(ctx.height, ack_key(&packet), ack.commitment());

        let info = PacketInfo {
            height: block_height(ctx)?,
            channel_order: context.ordering,
            packet,
            ack: None,
        };
        Ok(vec![
            IbcEvent::ReceivePacket(info.clone()),
            IbcEvent::WriteAcknowledgement(PacketInfo { ack: Some(ack), ..info }),
        ])
    }

    /// Checks the commitment of a packet sent from this chain is still stored and matches.
    fn check_commitment(&self, packet: &Packet) -> Result<(), Rejection> {
        match self.store.get(&commitment_key(packet)) {
            None => Err(Rejection::redundant(format!(
                "packet {} already acknowledged or timed out",
                packet.sequence
            ))),
            Some(commitment) if commitment != packet.commitment().as_slice() =>
                Err(Rejection::rejected(format!("packet {} commitment mismatch", packet.sequence))),
            Some(_) => Ok(()),
        }
    }

    fn acknowledge_packet(&mut self, ctx: &BlockContext, msg: MsgAcknowledgement) -> Handled {
        let packet = Self::packet(msg.packet)?;
        let context =
            self.channel_context(packet.source_port.as_str(), packet.source_channel.as_str())?;
        if state_of(context.end.state)? != State::Open {
            return Err(Rejection::rejected(format!(
                "{}/{} is not open",
                packet.source_port, packet.source_channel
            )))
        }
        Self::check_counterparty(&context.end, &packet.destination_port, &packet.destination_channel)?;
        self.check_commitment(&packet)?;

        let seq_ack_key =
            SeqAcksPath(packet.source_port.clone(), packet.source_channel.clone()).to_string();
        if context.ordering == Ordering::Ordered {
            let next = decode_u64(self.store.get(&seq_ack_key));
            if packet.sequence != next {
                return Err(Rejection::rejected(format!(
                    "acknowledgement {} out of order, expected {next}",
                    packet.sequence
                )))
            }
        }
        let ack = Acknowledgement(msg.acknowledgement);
        self.verify(
            &context.connection.client_id,
            &context.counterparty_prefix,
            &msg.proof_acked,
            proof_height(msg.proof_height)?,
            ack_key(&packet),
            Some(&ack.commitment()),
        )?;

        self.store.delete(ctx.height, &commitment_key(&packet));
        if context.ordering == Ordering::Ordered {
            self.store.set(ctx.height, seq_ack_key, encode_u64(packet.sequence + 1));
        }
        self.contract_mut(packet.source_port.as_str())?
            .on_acknowledgement(packet.sequence, ack.as_bytes());
        Ok(vec![IbcEvent::AcknowledgePacket(PacketInfo {
            height: block_height(ctx)?,
            channel_order: context.ordering,
            packet,
            ack: Some(ack),
        })])
    }

    /// Checks the proof that the counterparty never received `packet`.
    fn verify_unreceived(
        &self,
        context: &ChannelContext,
        packet: &Packet,
        proof: &[u8],
        height: u64,
        next_sequence_recv: u64,
    ) -> Result<(), Rejection> {
        match context.ordering {
            Ordering::Ordered => {
                if next_sequence_recv > packet.sequence {
                    return Err(Rejection::rejected(format!(
                        "packet {} was received, next sequence is {next_sequence_recv}",
                        packet.sequence
                    )))
                }
                self.verify(
                    &context.connection.client_id,
                    &context.counterparty_prefix,
                    proof,
                    height,
                    SeqRecvsPath(packet.destination_port.clone(), packet.destination_channel.clone())
                        .to_string(),
                    Some(&encode_u64(next_sequence_recv)),
                )
            },
            _ => self.verify(
                &context.connection.client_id,
                &context.counterparty_prefix,
                proof,
                height,
                receipt_key(packet),
                None,
            ),
        }
    }

    /// Clears a timed out packet. Ordered channels close on their first timeout.
    fn release_timed_out(
        &mut self,
        ctx: &BlockContext,
        mut context: ChannelContext,
        packet: Packet,
    ) -> Handled {
        self.store.delete(ctx.height, &commitment_key(&packet));
        let mut events = vec![];
        if context.ordering == Ordering::Ordered && state_of(context.end.state)? != State::Closed {
            context.end.state = State::Closed as i32;
            self.set_channel(ctx, packet.source_port.as_str(), packet.source_channel.as_str(), &context.end);
            events.push(IbcEvent::CloseChannel(Self::channel_attributes(
                packet.source_port.as_str(),
                packet.source_channel.as_str(),
                &context.end,
            )?));
        }
        self.contract_mut(packet.source_port.as_str())?.on_timeout(packet.sequence);
        events.insert(
            0,
            IbcEvent::TimeoutPacket(PacketInfo {
                height: block_height(ctx)?,
                channel_order: context.ordering,
                packet,
                ack: None,
            }),
        );
        Ok(events)
    }

    fn timeout_context(&self, packet: &Packet) -> Result<ChannelContext, Rejection> {
        // the source end may already be closed by an earlier timeout of an ordered channel
        let context =
            self.channel_context(packet.source_port.as_str(), packet.source_channel.as_str())?;
        if !matches!(state_of(context.end.state)?, State::Open | State::Closed) {
            return Err(Rejection::rejected(format!(
                "{}/{} is not open",
                packet.source_port, packet.source_channel
            )))
        }
        Self::check_counterparty(&context.end, &packet.destination_port, &packet.destination_channel)?;
        self.check_commitment(packet)?;
        Ok(context)
    }

    fn timeout_packet(&mut self, ctx: &BlockContext, msg: MsgTimeout) -> Handled {
        let packet = Self::packet(msg.packet)?;
        let context = self.timeout_context(&packet)?;
        let height = proof_height(msg.proof_height)?;

        let consensus = self.client(&context.connection.client_id)?.consensus_state(height)?;
        let at = Height::new(0, height).map_err(|e| Rejection::rejected(e.to_string()))?;
        if !packet.is_timed_out(at, consensus.timestamp) {
            return Err(Rejection::rejected(format!(
                "packet {} has not timed out at height {height}",
                packet.sequence
            )))
        }
        self.verify_unreceived(&context, &packet, &msg.proof_unreceived, height, msg.next_sequence_recv)?;
        self.release_timed_out(ctx, context, packet)
    }

    fn timeout_on_close(&mut self, ctx: &BlockContext, msg: MsgTimeoutOnClose) -> Handled {
        let packet = Self::packet(msg.packet)?;
        let context = self.timeout_context(&packet)?;
        let height = proof_height(msg.proof_height)?;

        let remote = context.connection.counterparty.clone().unwrap_or_default();
        let expected = RawChannel {
            state: State::Closed as i32,
            ordering: context.end.ordering,
            counterparty: Some(ChannelCounterparty {
                port_id: packet.source_port.to_string(),
                channel_id: packet.source_channel.to_string(),
            }),
            connection_hops: vec![remote.connection_id],
            version: context.end.version.clone(),
            ..Default::default()
        };
        self.verify(
            &context.connection.client_id,
            &context.counterparty_prefix,
            &msg.proof_close,
            height,
            ChannelEndsPath(packet.destination_port.clone(), packet.destination_channel.clone())
                .to_string(),
            Some(&expected.encode_to_vec()),
        )?;
        self.verify_unreceived(&context, &packet, &msg.proof_unreceived, height, msg.next_sequence_recv)?;
        self.release_timed_out(ctx, context, packet)
    }

    /// Runs a counter contract message, sending a packet when the contract asks for one.
    pub fn execute_contract(
        &mut self,
        ctx: &BlockContext,
        address: &str,
        msg: &serde_json::Value,
    ) -> Handled {
        let contract = self
            .contracts
            .get_mut(address)
            .ok_or_else(|| Rejection::rejected(format!("contract {address} not found")))?;
        let timeout = contract.packet_timeout;
        let endpoint = contract.endpoint.clone();
        let Some(data) = contract.execute(msg)? else { return Ok(vec![]) };
        let Some((port_id, channel_id)) = endpoint else { return Ok(vec![]) };

        let timeout_height = timeout
            .height
            .map(|h| Height::new(0, h).map_err(|e| Rejection::rejected(e.to_string())))
            .transpose()?;
        let timeout_timestamp = timeout.after.map(|after| ctx.timestamp + after).unwrap_or(0);
        self.send_packet(ctx, &port_id, &channel_id, data, timeout_height, timeout_timestamp)
    }
}
