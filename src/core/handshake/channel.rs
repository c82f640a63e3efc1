use super::{
    state::{next_step, HandshakeStep, Side},
    Channel, ChannelEnd, ChannelHandshake, Connection, HandshakeCoordinator,
};
use crate::core::{
    error::{Error, HandshakeError, HandshakeStage},
    events::created_channel_id,
    msgs::{
        to_any, to_raw_height, CHAN_OPEN_ACK_TYPE_URL, CHAN_OPEN_CONFIRM_TYPE_URL,
        CHAN_OPEN_INIT_TYPE_URL, CHAN_OPEN_TRY_TYPE_URL,
    },
    packets::{tracker::ChainHead, types::parse_channel},
};
use crate::primitives::{
    funcs::{apply_prefix, channel_ordering, channel_state, ensure_client_updated, query_channel},
    ChainEndpoint,
};
use ibc_proto::ibc::core::channel::v1::{
    Channel as RawChannel, Counterparty as ChannelCounterparty, MsgChannelOpenAck,
    MsgChannelOpenConfirm, MsgChannelOpenInit, MsgChannelOpenTry,
};
use ibc_relayer_types::core::{
    ics04_channel::channel::{Ordering, State},
    ics24_host::{
        identifier::{ChannelId, ClientId, ConnectionId, PortId},
        path::ChannelEndsPath,
    },
};

/// One side of a channel handshake: the chain's connection end and the channel's port on it.
struct Local<'h> {
    client_id: &'h ClientId,
    connection_id: &'h ConnectionId,
    port_id: &'h PortId,
}

impl<'a, A, B> HandshakeCoordinator<'a, A, B>
where
    A: ChainEndpoint,
    B: ChainEndpoint,
{
    /// Opens a channel between `port_a` on A and `port_b` on B over `connection`, starting with
    /// ChanOpenInit on A. The returned channel's `src` is A's end.
    pub async fn create_channel(
        &self,
        connection: &Connection,
        ordering: Ordering,
        version: &str,
        port_a: PortId,
        port_b: PortId,
    ) -> Result<Channel, Error> {
        self.complete_channel(connection, ChannelHandshake::new(port_a, port_b, ordering, version))
            .await
    }

    /// Moves the channel handshake forward from whatever state the chains recorded until both
    /// ends are open, then validates them against each other.
    pub async fn complete_channel(
        &self,
        connection: &Connection,
        mut handshake: ChannelHandshake,
    ) -> Result<Channel, Error> {
        let local_a = Local {
            client_id: &connection.a.client_id,
            connection_id: &connection.a.connection_id,
            port_id: &handshake.port_a,
        };
        let local_b = Local {
            client_id: &connection.b.client_id,
            connection_id: &connection.b.connection_id,
            port_id: &handshake.port_b,
        };
        let mut channel_a = handshake.channel_a.clone();
        let mut channel_b = handshake.channel_b.clone();

        let mut stage = HandshakeStage::ChanOpenInit;
        for _ in 0..=self.config.max_handshake_steps {
            let fail = move |e: Error| HandshakeError::new(stage, e.to_string());
            let (end_a, end_b) = self
                .channel_ends(&local_a, &local_b, &mut channel_a, &mut channel_b)
                .await
                .map_err(fail)?;
            let state_a = channel_state(end_a.as_ref()).map_err(fail)?;
            let state_b = channel_state(end_b.as_ref()).map_err(fail)?;
            let step = next_step(state_a, state_b).map_err(|reason| {
                HandshakeError::new(
                    HandshakeStep::stalled_at(state_a, state_b).channel_stage(),
                    reason,
                )
            })?;
            stage = step.channel_stage();
            let fail = move |e: Error| HandshakeError::new(stage, e.to_string());
            log::info!(
                target: "hyperspace-link",
                "🤝 Channel {}/{:?} <> {}/{:?} at ({}, {}), next {}",
                local_a.port_id,
                channel_a,
                local_b.port_id,
                channel_b,
                state_a,
                state_b,
                stage
            );

            match step {
                HandshakeStep::Done => {
                    handshake.channel_a = channel_a;
                    handshake.channel_b = channel_b;
                    return Ok(validate_channel(connection, &handshake, end_a, end_b)?)
                },
                HandshakeStep::Init(Side::A) => {
                    let id = chan_open_init(
                        self.a,
                        &local_a,
                        local_b.port_id,
                        handshake.ordering,
                        &handshake.version,
                    )
                    .await
                    .map_err(fail)?;
                    channel_a = Some(id);
                },
                HandshakeStep::Init(Side::B) => {
                    let id = chan_open_init(
                        self.b,
                        &local_b,
                        local_a.port_id,
                        handshake.ordering,
                        &handshake.version,
                    )
                    .await
                    .map_err(fail)?;
                    channel_b = Some(id);
                },
                HandshakeStep::Try(Side::B) => {
                    let id = chan_open_try(
                        self.b,
                        self.a,
                        &local_b,
                        local_a.port_id,
                        known(&channel_a, stage)?,
                        end_a.as_ref(),
                    )
                    .await
                    .map_err(fail)?;
                    channel_b = Some(id);
                },
                HandshakeStep::Try(Side::A) => {
                    let id = chan_open_try(
                        self.a,
                        self.b,
                        &local_a,
                        local_b.port_id,
                        known(&channel_b, stage)?,
                        end_b.as_ref(),
                    )
                    .await
                    .map_err(fail)?;
                    channel_a = Some(id);
                },
                HandshakeStep::Ack(Side::A) => chan_open_ack(
                    self.a,
                    self.b,
                    &local_a,
                    known(&channel_a, stage)?,
                    local_b.port_id,
                    known(&channel_b, stage)?,
                    end_b.as_ref(),
                )
                .await
                .map_err(fail)?,
                HandshakeStep::Ack(Side::B) => chan_open_ack(
                    self.b,
                    self.a,
                    &local_b,
                    known(&channel_b, stage)?,
                    local_a.port_id,
                    known(&channel_a, stage)?,
                    end_a.as_ref(),
                )
                .await
                .map_err(fail)?,
                HandshakeStep::Confirm(Side::B) => chan_open_confirm(
                    self.b,
                    self.a,
                    &local_b,
                    known(&channel_b, stage)?,
                    local_a.port_id,
                    known(&channel_a, stage)?,
                )
                .await
                .map_err(fail)?,
                HandshakeStep::Confirm(Side::A) => chan_open_confirm(
                    self.a,
                    self.b,
                    &local_a,
                    known(&channel_a, stage)?,
                    local_b.port_id,
                    known(&channel_b, stage)?,
                )
                .await
                .map_err(fail)?,
            }
        }

        Err(HandshakeError::new(
            stage,
            format!("channel not open after {} handshake steps", self.config.max_handshake_steps),
        )
        .into())
    }

    async fn channel_ends(
        &self,
        local_a: &Local<'_>,
        local_b: &Local<'_>,
        channel_a: &mut Option<ChannelId>,
        channel_b: &mut Option<ChannelId>,
    ) -> Result<(Option<RawChannel>, Option<RawChannel>), Error> {
        let (head_a, head_b) =
            futures::try_join!(ChainHead::latest(self.a), ChainHead::latest(self.b))?;
        let mut end_a = match channel_a {
            Some(id) => query_channel(self.a, head_a.height, local_a.port_id, id).await?,
            None => None,
        };
        let mut end_b = match channel_b {
            Some(id) => query_channel(self.b, head_b.height, local_b.port_id, id).await?,
            None => None,
        };

        if channel_b.is_none() {
            if let Some(id) = counterparty_channel_id(end_a.as_ref())? {
                end_b = query_channel(self.b, head_b.height, local_b.port_id, &id).await?;
                *channel_b = Some(id);
            }
        }
        if channel_a.is_none() {
            if let Some(id) = counterparty_channel_id(end_b.as_ref())? {
                end_a = query_channel(self.a, head_a.height, local_a.port_id, &id).await?;
                *channel_a = Some(id);
            }
        }
        Ok((end_a, end_b))
    }
}

fn known(id: &Option<ChannelId>, stage: HandshakeStage) -> Result<&ChannelId, HandshakeError> {
    id.as_ref().ok_or_else(|| HandshakeError::new(stage, "channel identifier unknown"))
}

fn counterparty_channel_id(end: Option<&RawChannel>) -> Result<Option<ChannelId>, Error> {
    match end.and_then(|end| end.counterparty.as_ref()) {
        Some(counterparty) if !counterparty.channel_id.is_empty() =>
            parse_channel(&counterparty.channel_id).map(Some),
        _ => Ok(None),
    }
}

fn channel_key(chain: &impl ChainEndpoint, port_id: &PortId, channel_id: &ChannelId) -> Vec<u8> {
    apply_prefix(
        chain.connection_prefix().into_vec(),
        ChannelEndsPath(port_id.clone(), channel_id.clone()).to_string(),
    )
}

async fn chan_open_init(
    chain: &impl ChainEndpoint,
    local: &Local<'_>,
    remote_port: &PortId,
    ordering: Ordering,
    version: &str,
) -> Result<ChannelId, Error> {
    let msg = MsgChannelOpenInit {
        port_id: local.port_id.to_string(),
        channel: Some(RawChannel {
            state: State::Init as i32,
            ordering: ordering as i32,
            counterparty: Some(ChannelCounterparty {
                port_id: remote_port.to_string(),
                channel_id: String::new(),
            }),
            connection_hops: vec![local.connection_id.to_string()],
            version: version.to_string(),
            ..Default::default()
        }),
        signer: chain.account_id().to_string(),
    };
    let tx = chain.submit(vec![to_any(CHAN_OPEN_INIT_TYPE_URL, &msg)]).await?;
    created_channel_id(&tx)
}

async fn chan_open_try(
    chain: &impl ChainEndpoint,
    remote: &impl ChainEndpoint,
    local: &Local<'_>,
    remote_port: &PortId,
    remote_channel: &ChannelId,
    remote_end: Option<&RawChannel>,
) -> Result<ChannelId, Error> {
    let remote_end = remote_end.ok_or_else(|| {
        Error::Custom(format!("{remote_port}/{remote_channel} not found on {}", remote.name()))
    })?;
    let head = ChainHead::latest(remote).await?;
    ensure_client_updated(remote, chain, local.client_id, head.height).await?;
    let proof_init = remote
        .query_proof(head.height, vec![channel_key(remote, remote_port, remote_channel)])
        .await?;

    // ordering and version are taken from the initiating end as recorded on chain
    let msg = MsgChannelOpenTry {
        port_id: local.port_id.to_string(),
        channel: Some(RawChannel {
            state: State::TryOpen as i32,
            ordering: remote_end.ordering,
            counterparty: Some(ChannelCounterparty {
                port_id: remote_port.to_string(),
                channel_id: remote_channel.to_string(),
            }),
            connection_hops: vec![local.connection_id.to_string()],
            version: remote_end.version.clone(),
            ..Default::default()
        }),
        counterparty_version: remote_end.version.clone(),
        proof_init,
        proof_height: Some(to_raw_height(head.height)),
        signer: chain.account_id().to_string(),
        ..Default::default()
    };
    let tx = chain.submit(vec![to_any(CHAN_OPEN_TRY_TYPE_URL, &msg)]).await?;
    created_channel_id(&tx)
}

async fn chan_open_ack(
    chain: &impl ChainEndpoint,
    remote: &impl ChainEndpoint,
    local: &Local<'_>,
    local_channel: &ChannelId,
    remote_port: &PortId,
    remote_channel: &ChannelId,
    remote_end: Option<&RawChannel>,
) -> Result<(), Error> {
    let counterparty_version = remote_end
        .map(|end| end.version.clone())
        .ok_or_else(|| Error::Custom(format!("{remote_port}/{remote_channel} not found")))?;
    let head = ChainHead::latest(remote).await?;
    ensure_client_updated(remote, chain, local.client_id, head.height).await?;
    let proof_try = remote
        .query_proof(head.height, vec![channel_key(remote, remote_port, remote_channel)])
        .await?;

    let msg = MsgChannelOpenAck {
        port_id: local.port_id.to_string(),
        channel_id: local_channel.to_string(),
        counterparty_channel_id: remote_channel.to_string(),
        counterparty_version,
        proof_try,
        proof_height: Some(to_raw_height(head.height)),
        signer: chain.account_id().to_string(),
    };
    chain.submit(vec![to_any(CHAN_OPEN_ACK_TYPE_URL, &msg)]).await?;
    Ok(())
}

async fn chan_open_confirm(
    chain: &impl ChainEndpoint,
    remote: &impl ChainEndpoint,
    local: &Local<'_>,
    local_channel: &ChannelId,
    remote_port: &PortId,
    remote_channel: &ChannelId,
) -> Result<(), Error> {
    let head = ChainHead::latest(remote).await?;
    ensure_client_updated(remote, chain, local.client_id, head.height).await?;
    let proof_ack = remote
        .query_proof(head.height, vec![channel_key(remote, remote_port, remote_channel)])
        .await?;

    let msg = MsgChannelOpenConfirm {
        port_id: local.port_id.to_string(),
        channel_id: local_channel.to_string(),
        proof_ack,
        proof_height: Some(to_raw_height(head.height)),
        signer: chain.account_id().to_string(),
    };
    chain.submit(vec![to_any(CHAN_OPEN_CONFIRM_TYPE_URL, &msg)]).await?;
    Ok(())
}

/// Both ends open over the connection, naming each other, with identical ordering and version.
fn validate_channel(
    connection: &Connection,
    handshake: &ChannelHandshake,
    end_a: Option<RawChannel>,
    end_b: Option<RawChannel>,
) -> Result<Channel, HandshakeError> {
    let invalid = |reason: String| HandshakeError::new(HandshakeStage::Validate, reason);
    let (Some(end_a), Some(end_b), Some(id_a), Some(id_b)) =
        (end_a, end_b, &handshake.channel_a, &handshake.channel_b)
    else {
        return Err(invalid("channel ends missing".to_string()))
    };

    let names = |end: &RawChannel, port: &PortId, channel: &ChannelId, hop: &ConnectionId| {
        end.connection_hops == vec![hop.to_string()] &&
            end.counterparty.as_ref().map_or(false, |c| {
                c.port_id == port.as_str() && c.channel_id == channel.as_str()
            })
    };
    if !names(&end_a, &handshake.port_b, id_b, &connection.a.connection_id) {
        return Err(invalid(format!(
            "{}/{id_a} does not point at {}/{id_b}",
            handshake.port_a, handshake.port_b
        )))
    }
    if !names(&end_b, &handshake.port_a, id_a, &connection.b.connection_id) {
        return Err(invalid(format!(
            "{}/{id_b} does not point at {}/{id_a}",
            handshake.port_b, handshake.port_a
        )))
    }
    if end_a.ordering != end_b.ordering {
        return Err(invalid(format!(
            "ordering mismatch: {} on {id_a}, {} on {id_b}",
            end_a.ordering, end_b.ordering
        )))
    }
    if end_a.version.as_bytes() != end_b.version.as_bytes() {
        return Err(invalid(format!(
            "version mismatch: {:?} on {id_a}, {:?} on {id_b}",
            end_a.version, end_b.version
        )))
    }
    let ordering = channel_ordering(&end_a).map_err(|e| invalid(e.to_string()))?;

    Ok(Channel {
        src: ChannelEnd {
            port_id: handshake.port_a.clone(),
            channel_id: id_a.clone(),
            connection_id: connection.a.connection_id.clone(),
        },
        dest: ChannelEnd {
            port_id: handshake.port_b.clone(),
            channel_id: id_b.clone(),
            connection_id: connection.b.connection_id.clone(),
        },
        ordering,
        version: end_a.version,
    })
}
