use super::traits::ChainEndpoint;
use crate::core::{
    error::Error,
    events::TxResponse,
    msgs::{to_any, UPDATE_CLIENT_TYPE_URL},
};
use ibc_proto::ibc::core::{
    channel::v1::Channel as RawChannel, client::v1::MsgUpdateClient,
    connection::v1::ConnectionEnd as RawConnectionEnd,
};
use ibc_relayer_types::{
    core::{
        ics03_connection::connection::State as ConnectionState,
        ics04_channel::channel::{Ordering, State},
        ics24_host::identifier::{ChannelId, ClientId, ConnectionId, PortId},
    },
    Height,
};

/// Returns the sequences committed on `source` for the channel that `sink` has not received.
/// Works for both ordered and unordered channels; the result is ascending.
pub async fn query_undelivered_sequences(
    source_height: Height,
    sink_height: Height,
    channel_id: &ChannelId,
    port_id: &PortId,
    counterparty_channel_id: &ChannelId,
    counterparty_port_id: &PortId,
    ordering: Ordering,
    source: &impl ChainEndpoint,
    sink: &impl ChainEndpoint,
) -> Result<Vec<u64>, Error> {
    // First we fetch all packet commitments from source
    let mut seqs = source
        .query_packet_commitments(source_height, channel_id.clone(), port_id.clone())
        .await?;
    seqs.sort_unstable();

    let undelivered_sequences = if ordering == Ordering::Unordered {
        let mut received = sink
            .query_packet_receipts(
                sink_height,
                counterparty_channel_id.clone(),
                counterparty_port_id.clone(),
            )
            .await?;
        received.sort_unstable();
        seqs.into_iter()
            .filter(|seq| received.binary_search(seq).is_err())
            .collect()
    } else {
        let next_seq_recv = sink
            .query_next_sequence_recv(sink_height, counterparty_port_id, counterparty_channel_id)
            .await?
            .next_sequence_receive;
        seqs.into_iter()
            .filter(|seq| *seq >= next_seq_recv)
            .collect()
    };

    Ok(undelivered_sequences)
}

/// Queries the `source` chain for packet acknowledgements whose packet commitment still exists
/// on the `sink` chain, i.e. acknowledgements the sink has not processed yet. Ascending.
pub async fn query_undelivered_acks(
    source_height: Height,
    sink_height: Height,
    channel_id: &ChannelId,
    port_id: &PortId,
    counterparty_channel_id: &ChannelId,
    counterparty_port_id: &PortId,
    source: &impl ChainEndpoint,
    sink: &impl ChainEndpoint,
) -> Result<Vec<u64>, Error> {
    // First we fetch all packet acknowledgements from source
    let mut seqs = source
        .query_packet_acknowledgements(source_height, channel_id.clone(), port_id.clone())
        .await?;
    seqs.sort_unstable();
    let mut commitments = sink
        .query_packet_commitments(
            sink_height,
            counterparty_channel_id.clone(),
            counterparty_port_id.clone(),
        )
        .await?;
    commitments.sort_unstable();

    Ok(seqs
        .into_iter()
        .filter(|seq| commitments.binary_search(seq).is_ok())
        .collect())
}

/// Connection end as stored on `chain`, `None` if it does not exist.
pub async fn query_connection(
    chain: &impl ChainEndpoint,
    at: Height,
    connection_id: &ConnectionId,
) -> Result<Option<RawConnectionEnd>, Error> {
    Ok(chain
        .query_connection_end(at, connection_id.clone())
        .await?
        .connection)
}

/// Channel end as stored on `chain`, `None` if it does not exist.
pub async fn query_channel(
    chain: &impl ChainEndpoint,
    at: Height,
    port_id: &PortId,
    channel_id: &ChannelId,
) -> Result<Option<RawChannel>, Error> {
    Ok(chain
        .query_channel_end(at, channel_id.clone(), port_id.clone())
        .await?
        .channel)
}

pub fn connection_state(end: Option<&RawConnectionEnd>) -> Result<ConnectionState, Error> {
    end.map(|end| ConnectionState::from_i32(end.state).map_err(|e| Error::Codec(e.to_string())))
        .unwrap_or(Ok(ConnectionState::Uninitialized))
}

pub fn channel_state(end: Option<&RawChannel>) -> Result<State, Error> {
    end.map(|end| State::from_i32(end.state).map_err(|e| Error::Codec(e.to_string())))
        .unwrap_or(Ok(State::Uninitialized))
}

/// Ordering of an existing channel end, which is never left unset.
pub fn channel_ordering(end: &RawChannel) -> Result<Ordering, Error> {
    match Ordering::from_i32(end.ordering).map_err(|e| Error::Codec(e.to_string()))? {
        Ordering::Uninitialized => Err(Error::Codec("channel ordering is not set".to_string())),
        ordering => Ok(ordering),
    }
}

/// Makes sure the light client of `source` hosted on `sink` can verify proofs at `at`,
/// submitting a client update when it has no consensus state for that height.
pub async fn ensure_client_updated(
    source: &impl ChainEndpoint,
    sink: &impl ChainEndpoint,
    client_id_on_sink: &ClientId,
    at: Height,
) -> Result<Option<TxResponse>, Error> {
    let (sink_height, _) = sink.latest_height_and_timestamp().await?;
    let consensus = sink
        .query_client_consensus(sink_height, client_id_on_sink.clone(), at)
        .await?;
    if consensus.consensus_state.is_some() {
        return Ok(None);
    }

    let header = source.query_update_header(at).await?;
    let msg = MsgUpdateClient {
        client_id: client_id_on_sink.to_string(),
        client_message: Some(header),
        signer: sink.account_id().to_string(),
    };
    log::debug!(
        target: "hyperspace-link",
        "Updating client {} on {} to {} height {}",
        client_id_on_sink,
        sink.name(),
        source.name(),
        at
    );
    let tx = sink.submit(vec![to_any(UPDATE_CLIENT_TYPE_URL, &msg)]).await?;
    Ok(Some(tx))
}

pub fn apply_prefix(mut commitment_prefix: Vec<u8>, path: String) -> Vec<u8> {
    let path = path.as_bytes().to_vec();
    commitment_prefix.extend_from_slice(&path);
    commitment_prefix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_ends_decode_into_ibc_states() {
        let end = RawChannel { state: 3, ordering: 2, ..Default::default() };
        assert_eq!(channel_state(Some(&end)).unwrap(), State::Open);
        assert_eq!(channel_ordering(&end).unwrap(), Ordering::Ordered);
        assert_eq!(channel_state(None).unwrap(), State::Uninitialized);
        assert!(channel_state(Some(&RawChannel { state: 9, ..Default::default() })).is_err());
        assert!(channel_ordering(&RawChannel::default()).is_err());

        let connection = RawConnectionEnd { state: 2, ..Default::default() };
        assert_eq!(connection_state(Some(&connection)).unwrap(), ConnectionState::TryOpen);
        let closed = RawConnectionEnd { state: 4, ..Default::default() };
        assert!(connection_state(Some(&closed)).is_err());
    }
}
