use super::types::{Acknowledgement, Packet};
use crate::core::{
    error::Error,
    msgs::{
        to_any, to_raw_height, ACKNOWLEDGEMENT_TYPE_URL, RECV_PACKET_TYPE_URL,
        TIMEOUT_ON_CLOSE_TYPE_URL, TIMEOUT_TYPE_URL,
    },
};
use crate::primitives::{funcs::apply_prefix, traits::ChainEndpoint};
use ibc_proto::{
    google::protobuf::Any,
    ibc::core::channel::v1::{MsgAcknowledgement, MsgRecvPacket, MsgTimeout, MsgTimeoutOnClose},
};
use ibc_relayer_types::{
    core::{
        ics04_channel::{channel::Ordering, packet::Sequence},
        ics24_host::path::{AcksPath, ChannelEndsPath, CommitmentsPath, ReceiptsPath, SeqRecvsPath},
    },
    Height,
};

/// Builds a `MsgRecvPacket` for `sink`, proving the packet commitment stored on `source`.
pub async fn construct_recv_message(
    source: &impl ChainEndpoint,
    sink: &impl ChainEndpoint,
    packet: &Packet,
    proof_height: Height,
) -> Result<Any, Error> {
    let path = get_key_path(KeyPathType::CommitmentPath, packet);
    let key = apply_prefix(source.connection_prefix().into_vec(), path);
    let proof = source.query_proof(proof_height, vec![key]).await?;
    let msg = MsgRecvPacket {
        packet: Some(packet.to_raw()),
        proof_commitment: proof,
        proof_height: Some(to_raw_height(proof_height)),
        signer: sink.account_id().to_string(),
    };
    Ok(to_any(RECV_PACKET_TYPE_URL, &msg))
}

/// Builds a `MsgAcknowledgement` for `sink` (the packet's sender), proving the acknowledgement
/// commitment stored on `source` (the packet's receiver).
pub async fn construct_ack_message(
    source: &impl ChainEndpoint,
    sink: &impl ChainEndpoint,
    packet: &Packet,
    ack: &Acknowledgement,
    proof_height: Height,
) -> Result<Any, Error> {
    let path = get_key_path(KeyPathType::AcksPath, packet);
    let key = apply_prefix(source.connection_prefix().into_vec(), path);
    let proof = source.query_proof(proof_height, vec![key]).await?;
    let msg = MsgAcknowledgement {
        packet: Some(packet.to_raw()),
        acknowledgement: ack.0.clone(),
        proof_acked: proof,
        proof_height: Some(to_raw_height(proof_height)),
        signer: sink.account_id().to_string(),
    };
    Ok(to_any(ACKNOWLEDGEMENT_TYPE_URL, &msg))
}

/// Builds a timeout message for `source` (the packet's sender), proving on `sink` that the packet
/// was never received: absence of the receipt on unordered channels, the next receive sequence on
/// ordered ones. A closed `sink` channel end turns it into `MsgTimeoutOnClose`.
pub async fn construct_timeout_message(
    source: &impl ChainEndpoint,
    sink: &impl ChainEndpoint,
    ordering: Ordering,
    sink_channel_closed: bool,
    packet: &Packet,
    next_sequence_recv: u64,
    proof_height: Height,
) -> Result<Any, Error> {
    let path = if ordering == Ordering::Ordered {
        get_key_path(KeyPathType::SeqRecv, packet)
    } else {
        get_key_path(KeyPathType::ReceiptPath, packet)
    };
    let key = apply_prefix(sink.connection_prefix().into_vec(), path);
    let proof_unreceived = sink.query_proof(proof_height, vec![key]).await?;

    let msg = if sink_channel_closed {
        let path = get_key_path(KeyPathType::ChannelPath, packet);
        let channel_key = apply_prefix(sink.connection_prefix().into_vec(), path);
        let proof_close = sink.query_proof(proof_height, vec![channel_key]).await?;
        let msg = MsgTimeoutOnClose {
            packet: Some(packet.to_raw()),
            proof_unreceived,
            proof_close,
            proof_height: Some(to_raw_height(proof_height)),
            next_sequence_recv,
            signer: source.account_id().to_string(),
            ..Default::default()
        };
        to_any(TIMEOUT_ON_CLOSE_TYPE_URL, &msg)
    } else {
        let msg = MsgTimeout {
            packet: Some(packet.to_raw()),
            proof_unreceived,
            proof_height: Some(to_raw_height(proof_height)),
            next_sequence_recv,
            signer: source.account_id().to_string(),
        };
        to_any(TIMEOUT_TYPE_URL, &msg)
    };
    Ok(msg)
}

pub enum KeyPathType {
    SeqRecv,
    ReceiptPath,
    CommitmentPath,
    AcksPath,
    ChannelPath,
}

/// Store path of the packet-related entry, relative to the prefix of the chain that holds it.
/// Commitments live on the sending chain; receipts, acknowledgements, the next receive sequence
/// and the channel end used for closing proofs live on the receiving chain.
pub fn get_key_path(key_path_type: KeyPathType, packet: &Packet) -> String {
    let sequence = Sequence::from(packet.sequence);
    match key_path_type {
        KeyPathType::SeqRecv => {
            format!(
                "{}",
                SeqRecvsPath(
                    packet.destination_port.clone(),
                    packet.destination_channel.clone()
                )
            )
        }
        KeyPathType::ReceiptPath => {
            format!(
                "{}",
                ReceiptsPath {
                    port_id: packet.destination_port.clone(),
                    channel_id: packet.destination_channel.clone(),
                    sequence
                }
            )
        }
        KeyPathType::CommitmentPath => {
            format!(
                "{}",
                CommitmentsPath {
                    port_id: packet.source_port.clone(),
                    channel_id: packet.source_channel.clone(),
                    sequence
                }
            )
        }
        KeyPathType::AcksPath => {
            format!(
                "{}",
                AcksPath {
                    port_id: packet.destination_port.clone(),
                    channel_id: packet.destination_channel.clone(),
                    sequence
                }
            )
        }
        KeyPathType::ChannelPath => {
            format!(
                "{}",
                ChannelEndsPath(
                    packet.destination_port.clone(),
                    packet.destination_channel.clone()
                )
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ibc_relayer_types::core::ics24_host::identifier::{ChannelId, PortId};
    use std::str::FromStr;

    #[test]
    fn key_paths_point_at_the_chain_holding_the_entry() {
        let packet = Packet {
            sequence: 7,
            source_port: PortId::from_str("wasm.sender").unwrap(),
            source_channel: ChannelId::new(1),
            destination_port: PortId::from_str("wasm.receiver").unwrap(),
            destination_channel: ChannelId::new(2),
            data: vec![],
            timeout_height: None,
            timeout_timestamp: 0,
        };

        assert_eq!(
            get_key_path(KeyPathType::CommitmentPath, &packet),
            "commitments/ports/wasm.sender/channels/channel-1/sequences/7"
        );
        assert_eq!(
            get_key_path(KeyPathType::AcksPath, &packet),
            "acks/ports/wasm.receiver/channels/channel-2/sequences/7"
        );
        assert_eq!(
            get_key_path(KeyPathType::ReceiptPath, &packet),
            "receipts/ports/wasm.receiver/channels/channel-2/sequences/7"
        );
        assert_eq!(
            get_key_path(KeyPathType::SeqRecv, &packet),
            "nextSequenceRecv/ports/wasm.receiver/channels/channel-2"
        );
        assert_eq!(
            get_key_path(KeyPathType::ChannelPath, &packet),
            "channelEnds/ports/wasm.receiver/channels/channel-2"
        );
    }
}
