use super::{
    client::{ChainState, MockChain},
    light_client::{
        to_json_any, MockClientState, MockConsensusState, MockHeader, MockProof, ProofEntry,
        CLIENT_STATE_TYPE_URL, CONSENSUS_STATE_TYPE_URL, HEADER_TYPE_URL,
    },
    store::decode_u64,
};
use crate::core::{
    error::Error,
    events::IbcEvent,
    msgs::to_raw_height,
    packets::types::PacketInfo,
};
use crate::primitives::IbcProvider;
use ibc_proto::{
    google::protobuf::Any,
    ibc::core::{
        channel::v1::{
            Channel as RawChannel, IdentifiedChannel, QueryChannelResponse,
            QueryConnectionChannelsResponse, QueryNextSequenceReceiveResponse,
        },
        client::v1::{QueryClientStateResponse, QueryConsensusStateResponse},
        connection::v1::{ConnectionEnd as RawConnectionEnd, QueryConnectionResponse},
    },
};
use ibc_relayer_types::{
    core::{
        ics23_commitment::commitment::CommitmentPrefix,
        ics24_host::{
            identifier::{ChannelId, ClientId, ConnectionId, PortId},
            path::{ChannelEndsPath, ConnectionsPath, SeqRecvsPath},
        },
    },
    Height,
};
use prost::Message;
use std::time::Duration;

impl MockChain {
    /// Fails for heights this chain has not produced yet.
    fn produced(&self, state: &ChainState, at: Height) -> Result<u64, Error> {
        let height = at.revision_height();
        if height > state.height {
            return Err(Error::query(
                &self.name,
                format!("height {at} not produced yet, latest is {}", state.height),
            ))
        }
        Ok(height)
    }

    /// Sequences of the entries stored under `prefix` at `height`, ascending.
    fn sequences_under(state: &ChainState, height: u64, prefix: &str) -> Vec<u64> {
        let mut seqs = state
            .store
            .scan_at(height, prefix)
            .into_iter()
            .filter_map(|(key, _)| key[prefix.len()..].parse::<u64>().ok())
            .collect::<Vec<_>>();
        seqs.sort_unstable();
        seqs
    }
}

#[async_trait::async_trait]
impl IbcProvider for MockChain {
    async fn latest_height_and_timestamp(&self) -> Result<(Height, u64), Error> {
        let state = self.online_state().await?;
        Ok((self.height(state.height)?, self.timestamp_at(state.height)))
    }

    async fn query_proof(&self, at: Height, keys: Vec<Vec<u8>>) -> Result<Vec<u8>, Error> {
        let state = self.online_state().await?;
        let height = at.revision_height();
        let unprovable =
            |reason: String| Error::Proof { chain: self.name.clone(), height: at, reason };
        if height > state.height {
            return Err(unprovable(format!("latest height is {}", state.height)))
        }
        if let Some(retention) = state.proof_retention {
            if height + retention < state.height {
                return Err(unprovable(format!("pruned, state is kept for {retention} blocks")))
            }
        }

        let prefix = self.commitment_prefix.as_bytes();
        let entries = keys
            .iter()
            .map(|key| {
                let path = key
                    .strip_prefix(prefix)
                    .and_then(|path| std::str::from_utf8(path).ok())
                    .ok_or_else(|| {
                        unprovable(format!("key {} is outside the IBC store", hex::encode(key)))
                    })?;
                Ok(ProofEntry {
                    key: hex::encode(key),
                    value: state.store.get_at(height, path).map(hex::encode),
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let proof = MockProof { chain_id: self.config.chain_id.clone(), height, entries };
        Ok(serde_json::to_vec(&proof)?)
    }

    async fn query_client_state(
        &self,
        at: Height,
        client_id: ClientId,
    ) -> Result<QueryClientStateResponse, Error> {
        let state = self.online_state().await?;
        self.produced(&state, at)?;
        let client = state
            .clients
            .get(client_id.as_str())
            .ok_or_else(|| Error::query(&self.name, format!("client {client_id} not found")))?;
        Ok(QueryClientStateResponse {
            client_state: Some(to_json_any(CLIENT_STATE_TYPE_URL, &client.client_state)?),
            proof: vec![],
            proof_height: Some(to_raw_height(at)),
        })
    }

    async fn query_client_consensus(
        &self,
        at: Height,
        client_id: ClientId,
        consensus_height: Height,
    ) -> Result<QueryConsensusStateResponse, Error> {
        let state = self.online_state().await?;
        self.produced(&state, at)?;
        let client = state
            .clients
            .get(client_id.as_str())
            .ok_or_else(|| Error::query(&self.name, format!("client {client_id} not found")))?;
        let consensus_state = client
            .consensus_states
            .get(&consensus_height.revision_height())
            .map(|consensus| to_json_any(CONSENSUS_STATE_TYPE_URL, consensus))
            .transpose()?;
        Ok(QueryConsensusStateResponse {
            consensus_state,
            proof: vec![],
            proof_height: Some(to_raw_height(at)),
        })
    }

    async fn query_connection_end(
        &self,
        at: Height,
        connection_id: ConnectionId,
    ) -> Result<QueryConnectionResponse, Error> {
        let state = self.online_state().await?;
        let height = self.produced(&state, at)?;
        let connection = state
            .store
            .get_at(height, &ConnectionsPath(connection_id).to_string())
            .map(RawConnectionEnd::decode)
            .transpose()?;
        Ok(QueryConnectionResponse {
            connection,
            proof: vec![],
            proof_height: Some(to_raw_height(at)),
        })
    }

    async fn query_channel_end(
        &self,
        at: Height,
        channel_id: ChannelId,
        port_id: PortId,
    ) -> Result<QueryChannelResponse, Error> {
        let state = self.online_state().await?;
        let height = self.produced(&state, at)?;
        let channel = state
            .store
            .get_at(height, &ChannelEndsPath(port_id, channel_id).to_string())
            .map(RawChannel::decode)
            .transpose()?;
        Ok(QueryChannelResponse { channel, proof: vec![], proof_height: Some(to_raw_height(at)) })
    }

    async fn query_next_sequence_recv(
        &self,
        at: Height,
        port_id: &PortId,
        channel_id: &ChannelId,
    ) -> Result<QueryNextSequenceReceiveResponse, Error> {
        let state = self.online_state().await?;
        let height = self.produced(&state, at)?;
        let key = SeqRecvsPath(port_id.clone(), channel_id.clone()).to_string();
        Ok(QueryNextSequenceReceiveResponse {
            next_sequence_receive: decode_u64(state.store.get_at(height, &key)),
            proof: vec![],
            proof_height: Some(to_raw_height(at)),
        })
    }

    async fn query_connection_channels(
        &self,
        at: Height,
        connection_id: &ConnectionId,
    ) -> Result<QueryConnectionChannelsResponse, Error> {
        let state = self.online_state().await?;
        let height = self.produced(&state, at)?;
        let prefix = "channelEnds/ports/";

        let mut channels = vec![];
        for (key, bytes) in state.store.scan_at(height, prefix) {
            let Some((port_id, channel_id)) = key[prefix.len()..].split_once("/channels/") else {
                continue
            };
            let channel = RawChannel::decode(bytes)?;
            if channel.connection_hops.first().map(String::as_str) != Some(connection_id.as_str()) {
                continue
            }
            channels.push(IdentifiedChannel {
                state: channel.state,
                ordering: channel.ordering,
                counterparty: channel.counterparty,
                connection_hops: channel.connection_hops,
                version: channel.version,
                port_id: port_id.to_string(),
                channel_id: channel_id.to_string(),
                ..Default::default()
            });
        }
        Ok(QueryConnectionChannelsResponse {
            channels,
            pagination: None,
            height: Some(to_raw_height(at)),
        })
    }

    async fn query_packet_commitments(
        &self,
        at: Height,
        channel_id: ChannelId,
        port_id: PortId,
    ) -> Result<Vec<u64>, Error> {
        let state = self.online_state().await?;
        let height = self.produced(&state, at)?;
        let prefix = format!("commitments/ports/{port_id}/channels/{channel_id}/sequences/");
        Ok(Self::sequences_under(&state, height, &prefix))
    }

    async fn query_packet_receipts(
        &self,
        at: Height,
        channel_id: ChannelId,
        port_id: PortId,
    ) -> Result<Vec<u64>, Error> {
        let state = self.online_state().await?;
        let height = self.produced(&state, at)?;
        let prefix = format!("receipts/ports/{port_id}/channels/{channel_id}/sequences/");
        Ok(Self::sequences_under(&state, height, &prefix))
    }

    async fn query_packet_acknowledgements(
        &self,
        at: Height,
        channel_id: ChannelId,
        port_id: PortId,
    ) -> Result<Vec<u64>, Error> {
        let state = self.online_state().await?;
        let height = self.produced(&state, at)?;
        let prefix = format!("acks/ports/{port_id}/channels/{channel_id}/sequences/");
        Ok(Self::sequences_under(&state, height, &prefix))
    }

    async fn query_send_packets(
        &self,
        channel_id: ChannelId,
        port_id: PortId,
        seqs: Vec<u64>,
    ) -> Result<Vec<PacketInfo>, Error> {
        let state = self.online_state().await?;
        Ok(state
            .events
            .iter()
            .filter_map(|ev| match &ev.event {
                IbcEvent::SendPacket(info)
                    if info.packet.source_channel == channel_id &&
                        info.packet.source_port == port_id &&
                        seqs.contains(&info.packet.sequence) =>
                    Some(info.clone()),
                _ => None,
            })
            .collect())
    }

    async fn query_recv_packets(
        &self,
        channel_id: ChannelId,
        port_id: PortId,
        seqs: Vec<u64>,
    ) -> Result<Vec<PacketInfo>, Error> {
        let state = self.online_state().await?;
        Ok(state
            .events
            .iter()
            .filter_map(|ev| match &ev.event {
                IbcEvent::WriteAcknowledgement(info)
                    if info.packet.destination_channel == channel_id &&
                        info.packet.destination_port == port_id &&
                        seqs.contains(&info.packet.sequence) =>
                    Some(info.clone()),
                _ => None,
            })
            .collect())
    }

    async fn query_update_header(&self, at: Height) -> Result<Any, Error> {
        let state = self.online_state().await?;
        let height = self.produced(&state, at)?;
        let header = MockHeader {
            chain_id: self.config.chain_id.clone(),
            height,
            timestamp: self.timestamp_at(height),
        };
        to_json_any(HEADER_TYPE_URL, &header)
    }

    async fn initialize_client_state(&self) -> Result<(Any, Any), Error> {
        let state = self.online_state().await?;
        let client_state =
            MockClientState { chain_id: self.config.chain_id.clone(), latest_height: state.height };
        let consensus_state = MockConsensusState { timestamp: self.timestamp_at(state.height) };
        Ok((
            to_json_any(CLIENT_STATE_TYPE_URL, &client_state)?,
            to_json_any(CONSENSUS_STATE_TYPE_URL, &consensus_state)?,
        ))
    }

    fn expected_block_time(&self) -> Duration {
        Duration::from_millis(self.config.block_time_ms)
    }

    fn connection_prefix(&self) -> CommitmentPrefix {
        self.commitment_prefix.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockChainConfig;

    #[tokio::test]
    async fn proofs_are_limited_to_retained_heights() {
        let chain = MockChain::new(MockChainConfig {
            proof_retention: Some(2),
            ..MockChainConfig::new("osmosis")
        })
        .unwrap();
        chain.advance_blocks(5).await;
        let key = b"ibcconnections/connection-0".to_vec();

        let latest = chain.latest_height_and_timestamp().await.unwrap().0;
        assert_eq!(latest.revision_height(), 6);
        let proof = chain.query_proof(latest, vec![key.clone()]).await.unwrap();
        let proof: MockProof = serde_json::from_slice(&proof).unwrap();
        assert_eq!(proof.entries[0].value, None);

        let old = Height::new(0, 3).unwrap();
        assert!(matches!(
            chain.query_proof(old, vec![key.clone()]).await,
            Err(Error::Proof { .. })
        ));
        let future = Height::new(0, 7).unwrap();
        assert!(matches!(chain.query_proof(future, vec![key]).await, Err(Error::Proof { .. })));
    }

    #[tokio::test]
    async fn offline_chain_fails_queries() {
        let chain = MockChain::new(MockChainConfig::new("osmosis")).unwrap();
        chain.set_offline(true).await;
        assert!(matches!(chain.latest_height_and_timestamp().await, Err(Error::Query { .. })));
        chain.set_offline(false).await;
        assert!(chain.latest_height_and_timestamp().await.is_ok());
    }
}
