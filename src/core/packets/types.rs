use crate::core::{
    error::Error,
    msgs::{from_raw_height, to_raw_height},
};
use ibc_proto::ibc::core::channel::v1::Packet as RawPacket;
use ibc_relayer_types::{
    core::{
        ics04_channel::channel::Ordering,
        ics24_host::identifier::{ChannelId, PortId},
    },
    Height,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;

/// One unit of cross-chain application data.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Packet sequence, 1-based and monotonic per channel
    pub sequence: u64,
    /// Source port
    pub source_port: PortId,
    /// Source channel
    pub source_channel: ChannelId,
    /// Destination port
    pub destination_port: PortId,
    /// Destination channel
    pub destination_channel: ChannelId,
    /// Opaque packet data
    pub data: Vec<u8>,
    /// Timeout height on the destination chain, `None` if the packet never times out by height
    pub timeout_height: Option<Height>,
    /// Timeout timestamp in nanoseconds on the destination chain, zero if unset
    pub timeout_timestamp: u64,
}

impl Packet {
    /// Whether the destination chain, at the given height and block time, must refuse this packet.
    pub fn is_timed_out(&self, destination_height: Height, destination_timestamp: u64) -> bool {
        let height_elapsed = self
            .timeout_height
            .map(|timeout| destination_height >= timeout)
            .unwrap_or(false);
        let timestamp_elapsed =
            self.timeout_timestamp != 0 && destination_timestamp >= self.timeout_timestamp;
        height_elapsed || timestamp_elapsed
    }

    /// ICS-04 packet commitment:
    /// `sha256(timeout_timestamp || revision_number || revision_height || sha256(data))`.
    pub fn commitment(&self) -> Vec<u8> {
        let (revision_number, revision_height) = self
            .timeout_height
            .map(|h| (h.revision_number(), h.revision_height()))
            .unwrap_or((0, 0));
        let mut hasher = Sha256::new();
        hasher.update(self.timeout_timestamp.to_be_bytes());
        hasher.update(revision_number.to_be_bytes());
        hasher.update(revision_height.to_be_bytes());
        hasher.update(Sha256::digest(&self.data));
        hasher.finalize().to_vec()
    }

    pub fn to_raw(&self) -> RawPacket {
        RawPacket {
            sequence: self.sequence,
            source_port: self.source_port.to_string(),
            source_channel: self.source_channel.to_string(),
            destination_port: self.destination_port.to_string(),
            destination_channel: self.destination_channel.to_string(),
            data: self.data.clone(),
            timeout_height: self.timeout_height.map(to_raw_height),
            timeout_timestamp: self.timeout_timestamp,
        }
    }
}

impl TryFrom<RawPacket> for Packet {
    type Error = Error;

    fn try_from(raw: RawPacket) -> Result<Self, Self::Error> {
        if raw.sequence == 0 {
            return Err(Error::Codec("packet sequence cannot be 0".to_string()));
        }
        let timeout_height = match raw.timeout_height {
            Some(h) if h.revision_number == 0 && h.revision_height == 0 => None,
            None => None,
            some => Some(from_raw_height(some)?),
        };
        Ok(Packet {
            sequence: raw.sequence,
            source_port: parse_port(&raw.source_port)?,
            source_channel: parse_channel(&raw.source_channel)?,
            destination_port: parse_port(&raw.destination_port)?,
            destination_channel: parse_channel(&raw.destination_channel)?,
            data: raw.data,
            timeout_height,
            timeout_timestamp: raw.timeout_timestamp,
        })
    }
}

/// Acknowledgement bytes written by the destination application.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Acknowledgement(pub Vec<u8>);

impl Acknowledgement {
    /// ICS-04 acknowledgement commitment: `sha256(ack)`.
    pub fn commitment(&self) -> Vec<u8> {
        Sha256::digest(&self.0).to_vec()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// A packet recovered from the events of the chain that emitted it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PacketInfo {
    /// Height at which packet event was emitted
    pub height: Height,
    /// Channel order
    pub channel_order: Ordering,
    pub packet: Packet,
    /// Packet acknowledgement, for packets read from the receiving chain
    pub ack: Option<Acknowledgement>,
}

pub fn parse_port(port: &str) -> Result<PortId, Error> {
    PortId::from_str(port).map_err(|e| Error::Codec(format!("invalid port id {port}: {e}")))
}

pub fn parse_channel(channel: &str) -> Result<ChannelId, Error> {
    ChannelId::from_str(channel)
        .map_err(|e| Error::Codec(format!("invalid channel id {channel}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(timeout_height: Option<u64>, timeout_timestamp: u64) -> Packet {
        Packet {
            sequence: 1,
            source_port: PortId::from_str("wasm.counter_a").unwrap(),
            source_channel: ChannelId::new(0),
            destination_port: PortId::from_str("wasm.counter_b").unwrap(),
            destination_channel: ChannelId::new(3),
            data: br#"{"increment":{}}"#.to_vec(),
            timeout_height: timeout_height.map(|h| Height::new(0, h).unwrap()),
            timeout_timestamp,
        }
    }

    #[test]
    fn timeout_height_is_inclusive() {
        let p = packet(Some(10), 0);
        assert!(!p.is_timed_out(Height::new(0, 9).unwrap(), u64::MAX));
        assert!(p.is_timed_out(Height::new(0, 10).unwrap(), 0));
    }

    #[test]
    fn zero_timestamp_never_times_out() {
        let p = packet(None, 0);
        assert!(!p.is_timed_out(Height::new(0, 1_000_000).unwrap(), u64::MAX));

        let p = packet(None, 500);
        assert!(!p.is_timed_out(Height::new(0, 1).unwrap(), 499));
        assert!(p.is_timed_out(Height::new(0, 1).unwrap(), 500));
    }

    #[test]
    fn commitment_covers_timeout_and_data() {
        let base = packet(Some(10), 0);
        let mut other_data = base.clone();
        other_data.data = br#"{"reset":{"count":20}}"#.to_vec();
        let other_timeout = packet(Some(11), 0);

        assert_eq!(base.commitment().len(), 32);
        assert_ne!(base.commitment(), other_data.commitment());
        assert_ne!(base.commitment(), other_timeout.commitment());
        // the sequence is part of the store path, not of the commitment
        let mut other_sequence = base.clone();
        other_sequence.sequence = 2;
        assert_eq!(base.commitment(), other_sequence.commitment());
    }

    #[test]
    fn raw_packet_without_timeout_height_converts_back() {
        let p = packet(None, 42);
        let back = Packet::try_from(p.to_raw()).unwrap();
        assert_eq!(back, p);
    }
}
