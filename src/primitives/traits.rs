use crate::core::{error::Error, events::TxResponse, packets::types::PacketInfo};
use ibc_proto::{
    google::protobuf::Any,
    ibc::core::{
        channel::v1::{
            QueryChannelResponse, QueryConnectionChannelsResponse,
            QueryNextSequenceReceiveResponse,
        },
        client::v1::{QueryClientStateResponse, QueryConsensusStateResponse},
        connection::v1::QueryConnectionResponse,
    },
};
use ibc_relayer_types::{
    core::{
        ics23_commitment::commitment::CommitmentPrefix,
        ics24_host::identifier::{ChannelId, ClientId, ConnectionId, PortId},
    },
    signer::Signer,
    Height,
};
use std::time::Duration;

/// Query and submit access to one chain. Holds no relay logic.
#[async_trait::async_trait]
pub trait ChainEndpoint: IbcProvider + KeyProvider + Send + Sync {
    /// Name of this chain, used in logs.
    fn name(&self) -> &str;

    /// Should return a numerical value for the max weight of transactions allowed in a block.
    fn block_max_weight(&self) -> u64;

    /// Should return an estimate of the weight of a batch of messages.
    async fn estimate_weight(&self, msg: Vec<Any>) -> Result<u64, Error>;

    /// Submit messages as one transaction and wait for it to be included in a block.
    /// A message the chain refuses fails the whole transaction with [`Error::Submission`].
    async fn submit(&self, messages: Vec<Any>) -> Result<TxResponse, Error>;
}

/// Provides an interface for reading Ibc state, with proofs, from the chain.
#[async_trait::async_trait]
pub trait IbcProvider {
    /// Return latest height and its block timestamp in nanoseconds
    async fn latest_height_and_timestamp(&self) -> Result<(Height, u64), Error>;

    /// Query proof for provided key path. Fails with [`Error::Proof`] when the chain cannot
    /// prove state at `at`, e.g. the height is pruned or not produced yet.
    async fn query_proof(&self, at: Height, keys: Vec<Vec<u8>>) -> Result<Vec<u8>, Error>;

    /// Query client state with proof
    async fn query_client_state(
        &self,
        at: Height,
        client_id: ClientId,
    ) -> Result<QueryClientStateResponse, Error>;

    /// Query client consensus state at `consensus_height`. The response carries no consensus
    /// state if the client has none stored for that height.
    async fn query_client_consensus(
        &self,
        at: Height,
        client_id: ClientId,
        consensus_height: Height,
    ) -> Result<QueryConsensusStateResponse, Error>;

    /// Query connection end with proof
    async fn query_connection_end(
        &self,
        at: Height,
        connection_id: ConnectionId,
    ) -> Result<QueryConnectionResponse, Error>;

    /// Query channel end with proof
    async fn query_channel_end(
        &self,
        at: Height,
        channel_id: ChannelId,
        port_id: PortId,
    ) -> Result<QueryChannelResponse, Error>;

    /// Query next sequence to be received, with proof
    async fn query_next_sequence_recv(
        &self,
        at: Height,
        port_id: &PortId,
        channel_id: &ChannelId,
    ) -> Result<QueryNextSequenceReceiveResponse, Error>;

    /// Query all channels for a connection
    async fn query_connection_channels(
        &self,
        at: Height,
        connection_id: &ConnectionId,
    ) -> Result<QueryConnectionChannelsResponse, Error>;

    /// Sequences with a packet commitment stored on this chain, ascending.
    async fn query_packet_commitments(
        &self,
        at: Height,
        channel_id: ChannelId,
        port_id: PortId,
    ) -> Result<Vec<u64>, Error>;

    /// Sequences with a packet receipt stored on this chain, ascending.
    /// Ordered channels keep no receipts, only the next sequence to receive.
    async fn query_packet_receipts(
        &self,
        at: Height,
        channel_id: ChannelId,
        port_id: PortId,
    ) -> Result<Vec<u64>, Error>;

    /// Sequences with an acknowledgement commitment stored on this chain, ascending.
    async fn query_packet_acknowledgements(
        &self,
        at: Height,
        channel_id: ChannelId,
        port_id: PortId,
    ) -> Result<Vec<u64>, Error>;

    /// Query send packets
    /// This represents packets that for which the `SendPacket` event was emitted
    async fn query_send_packets(
        &self,
        channel_id: ChannelId,
        port_id: PortId,
        seqs: Vec<u64>,
    ) -> Result<Vec<PacketInfo>, Error>;

    /// Query received packets with their acknowledgement
    /// This represents packets for which the `ReceivePacket` and `WriteAcknowledgement` events were
    /// emitted.
    async fn query_recv_packets(
        &self,
        channel_id: ChannelId,
        port_id: PortId,
        seqs: Vec<u64>,
    ) -> Result<Vec<PacketInfo>, Error>;

    /// Header for this chain at `at`, encoded for the light client the counterparty hosts.
    async fn query_update_header(&self, at: Height) -> Result<Any, Error>;

    /// This should return a client and consensus state for this chain at its latest height,
    /// to create a light client of it on the counterparty.
    async fn initialize_client_state(&self) -> Result<(Any, Any), Error>;

    /// Return the expected block time for this chain
    fn expected_block_time(&self) -> Duration;

    /// Return the chain connection prefix
    fn connection_prefix(&self) -> CommitmentPrefix;
}

/// Provides an interface for managing key management for signing.
pub trait KeyProvider {
    /// Should return the relayer's account id on the host chain as a string in the expected format
    /// Could be a hexadecimal, bech32 or ss58 string, any format the chain supports
    fn account_id(&self) -> Signer;
}

/// Access to smart contracts deployed on the chain. Only test scenarios use it.
#[async_trait::async_trait]
pub trait ContractProvider: ChainEndpoint + Clone + 'static {
    /// Execute a contract message signed by the relayer account.
    async fn execute_contract(
        &self,
        contract: &str,
        msg: &serde_json::Value,
    ) -> Result<TxResponse, Error>;

    /// Smart query against a contract, returning the raw response bytes.
    async fn query_contract(&self, contract: &str, query: &serde_json::Value)
        -> Result<Vec<u8>, Error>;
}
