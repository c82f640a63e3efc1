use super::{
    state::{connection_progress, next_step, HandshakeStep, Side},
    Connection, ConnectionEnd, ConnectionHandshake, HandshakeCoordinator,
};
use crate::core::{
    config::LinkConfig,
    error::{Error, HandshakeError, HandshakeStage},
    events::created_connection_id,
    msgs::{
        to_any, to_raw_height, CONN_OPEN_ACK_TYPE_URL, CONN_OPEN_CONFIRM_TYPE_URL,
        CONN_OPEN_INIT_TYPE_URL, CONN_OPEN_TRY_TYPE_URL,
    },
    packets::tracker::ChainHead,
};
use crate::primitives::{
    funcs::{apply_prefix, connection_state, ensure_client_updated, query_connection},
    ChainEndpoint,
};
use ibc_proto::ibc::core::{
    commitment::v1::MerklePrefix,
    connection::v1::{
        ConnectionEnd as RawConnectionEnd, Counterparty, MsgConnectionOpenAck,
        MsgConnectionOpenConfirm, MsgConnectionOpenInit, MsgConnectionOpenTry, Version,
    },
};
use ibc_relayer_types::core::ics24_host::{
    identifier::{ClientId, ConnectionId},
    path::ConnectionsPath,
};
use std::str::FromStr;

impl<'a, A, B> HandshakeCoordinator<'a, A, B>
where
    A: ChainEndpoint,
    B: ChainEndpoint,
{
    /// Opens a new connection between the existing clients `client_a` (on A) and `client_b`
    /// (on B), starting with ConnOpenInit on A.
    pub async fn create_connection(
        &self,
        client_a: ClientId,
        client_b: ClientId,
    ) -> Result<Connection, Error> {
        self.complete_connection(ConnectionHandshake::new(client_a, client_b)).await
    }

    /// Moves the connection handshake forward from whatever state the chains recorded until
    /// both ends are open, then validates them against each other.
    pub async fn complete_connection(
        &self,
        mut handshake: ConnectionHandshake,
    ) -> Result<Connection, Error> {
        let mut stage = HandshakeStage::ConnOpenInit;
        for _ in 0..=self.config.max_handshake_steps {
            let fail = move |e: Error| HandshakeError::new(stage, e.to_string());
            let (end_a, end_b) = self.connection_ends(&mut handshake).await.map_err(fail)?;
            let state_a = connection_progress(connection_state(end_a.as_ref()).map_err(fail)?);
            let state_b = connection_progress(connection_state(end_b.as_ref()).map_err(fail)?);
            let step = next_step(state_a, state_b).map_err(|reason| {
                HandshakeError::new(
                    HandshakeStep::stalled_at(state_a, state_b).connection_stage(),
                    reason,
                )
            })?;
            stage = step.connection_stage();
            let fail = move |e: Error| HandshakeError::new(stage, e.to_string());
            log::info!(
                target: "hyperspace-link",
                "🤝 Connection {:?}/{:?} at ({}, {}), next {}",
                handshake.connection_a,
                handshake.connection_b,
                state_a,
                state_b,
                stage
            );

            match step {
                HandshakeStep::Done =>
                    return Ok(validate_connection(&handshake, end_a, end_b)?),
                HandshakeStep::Init(Side::A) => {
                    let id = conn_open_init(
                        self.a,
                        self.b,
                        &handshake.client_a,
                        &handshake.client_b,
                        self.config,
                    )
                    .await
                    .map_err(fail)?;
                    handshake.connection_a = Some(id);
                },
                HandshakeStep::Init(Side::B) => {
                    let id = conn_open_init(
                        self.b,
                        self.a,
                        &handshake.client_b,
                        &handshake.client_a,
                        self.config,
                    )
                    .await
                    .map_err(fail)?;
                    handshake.connection_b = Some(id);
                },
                HandshakeStep::Try(Side::B) => {
                    let id = conn_open_try(
                        self.b,
                        self.a,
                        &handshake.client_b,
                        &handshake.client_a,
                        known(&handshake.connection_a, stage)?,
                        end_a.as_ref(),
                    )
                    .await
                    .map_err(fail)?;
                    handshake.connection_b = Some(id);
                },
                HandshakeStep::Try(Side::A) => {
                    let id = conn_open_try(
                        self.a,
                        self.b,
                        &handshake.client_a,
                        &handshake.client_b,
                        known(&handshake.connection_b, stage)?,
                        end_b.as_ref(),
                    )
                    .await
                    .map_err(fail)?;
                    handshake.connection_a = Some(id);
                },
                HandshakeStep::Ack(Side::A) => conn_open_ack(
                    self.a,
                    self.b,
                    &handshake.client_a,
                    known(&handshake.connection_a, stage)?,
                    known(&handshake.connection_b, stage)?,
                    end_b.as_ref(),
                )
                .await
                .map_err(fail)?,
                HandshakeStep::Ack(Side::B) => conn_open_ack(
                    self.b,
                    self.a,
                    &handshake.client_b,
                    known(&handshake.connection_b, stage)?,
                    known(&handshake.connection_a, stage)?,
                    end_a.as_ref(),
                )
                .await
                .map_err(fail)?,
                HandshakeStep::Confirm(Side::B) => conn_open_confirm(
                    self.b,
                    self.a,
                    &handshake.client_b,
                    known(&handshake.connection_b, stage)?,
                    known(&handshake.connection_a, stage)?,
                )
                .await
                .map_err(fail)?,
                HandshakeStep::Confirm(Side::A) => conn_open_confirm(
                    self.a,
                    self.b,
                    &handshake.client_a,
                    known(&handshake.connection_a, stage)?,
                    known(&handshake.connection_b, stage)?,
                )
                .await
                .map_err(fail)?,
            }
        }

        Err(HandshakeError::new(
            stage,
            format!(
                "connection not open after {} handshake steps",
                self.config.max_handshake_steps
            ),
        )
        .into())
    }

    /// Reads both connection ends at the latest heights, learning a missing identifier from
    /// the counterparty field of the other end.
    async fn connection_ends(
        &self,
        handshake: &mut ConnectionHandshake,
    ) -> Result<(Option<RawConnectionEnd>, Option<RawConnectionEnd>), Error> {
        let (head_a, head_b) =
            futures::try_join!(ChainHead::latest(self.a), ChainHead::latest(self.b))?;
        let mut end_a = match &handshake.connection_a {
            Some(id) => query_connection(self.a, head_a.height, id).await?,
            None => None,
        };
        let mut end_b = match &handshake.connection_b {
            Some(id) => query_connection(self.b, head_b.height, id).await?,
            None => None,
        };

        if handshake.connection_b.is_none() {
            if let Some(id) = counterparty_connection_id(end_a.as_ref())? {
                end_b = query_connection(self.b, head_b.height, &id).await?;
                handshake.connection_b = Some(id);
            }
        }
        if handshake.connection_a.is_none() {
            if let Some(id) = counterparty_connection_id(end_b.as_ref())? {
                end_a = query_connection(self.a, head_a.height, &id).await?;
                handshake.connection_a = Some(id);
            }
        }
        Ok((end_a, end_b))
    }
}

fn known(id: &Option<ConnectionId>, stage: HandshakeStage) -> Result<&ConnectionId, HandshakeError> {
    id.as_ref()
        .ok_or_else(|| HandshakeError::new(stage, "connection identifier unknown"))
}

fn counterparty_connection_id(
    end: Option<&RawConnectionEnd>,
) -> Result<Option<ConnectionId>, Error> {
    match end.and_then(|end| end.counterparty.as_ref()) {
        Some(counterparty) if !counterparty.connection_id.is_empty() =>
            ConnectionId::from_str(&counterparty.connection_id)
                .map(Some)
                .map_err(|e| Error::Codec(format!("invalid counterparty connection id: {e}"))),
        _ => Ok(None),
    }
}

fn connection_key(chain: &impl ChainEndpoint, connection_id: &ConnectionId) -> Vec<u8> {
    apply_prefix(
        chain.connection_prefix().into_vec(),
        ConnectionsPath(connection_id.clone()).to_string(),
    )
}

fn counterparty(
    chain: &impl ChainEndpoint,
    client_id: &ClientId,
    connection_id: Option<&ConnectionId>,
) -> Counterparty {
    Counterparty {
        client_id: client_id.to_string(),
        connection_id: connection_id.map(|id| id.to_string()).unwrap_or_default(),
        prefix: Some(MerklePrefix { key_prefix: chain.connection_prefix().into_vec() }),
    }
}

async fn conn_open_init(
    local: &impl ChainEndpoint,
    remote: &impl ChainEndpoint,
    local_client: &ClientId,
    remote_client: &ClientId,
    config: &LinkConfig,
) -> Result<ConnectionId, Error> {
    let msg = MsgConnectionOpenInit {
        client_id: local_client.to_string(),
        counterparty: Some(counterparty(remote, remote_client, None)),
        version: Some(Version {
            identifier: config.connection_version.clone(),
            features: config.connection_features(),
        }),
        delay_period: config.connection_delay,
        signer: local.account_id().to_string(),
    };
    let tx = local.submit(vec![to_any(CONN_OPEN_INIT_TYPE_URL, &msg)]).await?;
    created_connection_id(&tx)
}

async fn conn_open_try(
    local: &impl ChainEndpoint,
    remote: &impl ChainEndpoint,
    local_client: &ClientId,
    remote_client: &ClientId,
    remote_connection: &ConnectionId,
    remote_end: Option<&RawConnectionEnd>,
) -> Result<ConnectionId, Error> {
    let remote_end = remote_end
        .ok_or_else(|| Error::Custom(format!("{remote_connection} not found on {}", remote.name())))?;
    let head = ChainHead::latest(remote).await?;
    ensure_client_updated(remote, local, local_client, head.height).await?;
    let proof_init = remote
        .query_proof(head.height, vec![connection_key(remote, remote_connection)])
        .await?;
    let client_state = remote
        .query_client_state(head.height, remote_client.clone())
        .await?
        .client_state;

    let msg = MsgConnectionOpenTry {
        client_id: local_client.to_string(),
        client_state,
        counterparty: Some(counterparty(remote, remote_client, Some(remote_connection))),
        delay_period: remote_end.delay_period,
        counterparty_versions: remote_end.versions.clone(),
        proof_height: Some(to_raw_height(head.height)),
        proof_init,
        signer: local.account_id().to_string(),
        ..Default::default()
    };
    let tx = local.submit(vec![to_any(CONN_OPEN_TRY_TYPE_URL, &msg)]).await?;
    created_connection_id(&tx)
}

async fn conn_open_ack(
    local: &impl ChainEndpoint,
    remote: &impl ChainEndpoint,
    local_client: &ClientId,
    local_connection: &ConnectionId,
    remote_connection: &ConnectionId,
    remote_end: Option<&RawConnectionEnd>,
) -> Result<(), Error> {
    let version = remote_end
        .and_then(|end| end.versions.first().cloned())
        .ok_or_else(|| Error::Custom(format!("{remote_connection} has no negotiated version")))?;
    let head = ChainHead::latest(remote).await?;
    ensure_client_updated(remote, local, local_client, head.height).await?;
    let proof_try = remote
        .query_proof(head.height, vec![connection_key(remote, remote_connection)])
        .await?;

    let msg = MsgConnectionOpenAck {
        connection_id: local_connection.to_string(),
        counterparty_connection_id: remote_connection.to_string(),
        version: Some(version),
        proof_height: Some(to_raw_height(head.height)),
        proof_try,
        signer: local.account_id().to_string(),
        ..Default::default()
    };
    local.submit(vec![to_any(CONN_OPEN_ACK_TYPE_URL, &msg)]).await?;
    Ok(())
}

async fn conn_open_confirm(
    local: &impl ChainEndpoint,
    remote: &impl ChainEndpoint,
    local_client: &ClientId,
    local_connection: &ConnectionId,
    remote_connection: &ConnectionId,
) -> Result<(), Error> {
    let head = ChainHead::latest(remote).await?;
    ensure_client_updated(remote, local, local_client, head.height).await?;
    let proof_ack = remote
        .query_proof(head.height, vec![connection_key(remote, remote_connection)])
        .await?;

    let msg = MsgConnectionOpenConfirm {
        connection_id: local_connection.to_string(),
        proof_ack,
        proof_height: Some(to_raw_height(head.height)),
        signer: local.account_id().to_string(),
    };
    local.submit(vec![to_any(CONN_OPEN_CONFIRM_TYPE_URL, &msg)]).await?;
    Ok(())
}

/// Both ends open, naming each other, over the expected clients, with the same version.
fn validate_connection(
    handshake: &ConnectionHandshake,
    end_a: Option<RawConnectionEnd>,
    end_b: Option<RawConnectionEnd>,
) -> Result<Connection, HandshakeError> {
    let invalid = |reason: String| HandshakeError::new(HandshakeStage::Validate, reason);
    let (Some(end_a), Some(end_b), Some(id_a), Some(id_b)) =
        (end_a, end_b, &handshake.connection_a, &handshake.connection_b)
    else {
        return Err(invalid("connection ends missing".to_string()))
    };

    let names = |end: &RawConnectionEnd,
                 client: &ClientId,
                 cp_client: &ClientId,
                 cp: &ConnectionId| {
        end.client_id == client.as_str() &&
            end.counterparty.as_ref().map_or(false, |c| {
                c.client_id == cp_client.as_str() && c.connection_id == cp.as_str()
            })
    };
    if !names(&end_a, &handshake.client_a, &handshake.client_b, id_b) {
        return Err(invalid(format!("{id_a} does not point at {id_b} over {}", handshake.client_b)))
    }
    if !names(&end_b, &handshake.client_b, &handshake.client_a, id_a) {
        return Err(invalid(format!("{id_b} does not point at {id_a} over {}", handshake.client_a)))
    }
    if end_a.versions != end_b.versions {
        return Err(invalid(format!(
            "version mismatch: {:?} on {id_a}, {:?} on {id_b}",
            end_a.versions, end_b.versions
        )))
    }

    Ok(Connection {
        a: ConnectionEnd { client_id: handshake.client_a.clone(), connection_id: id_a.clone() },
        b: ConnectionEnd { client_id: handshake.client_b.clone(), connection_id: id_b.clone() },
    })
}
