use super::types::{Acknowledgement, Packet};
use crate::core::error::Error;
use crate::primitives::{
    funcs::{channel_state, query_channel, query_undelivered_acks, query_undelivered_sequences},
    ChainEndpoint,
};
use ibc_relayer_types::{
    core::{
        ics04_channel::channel::{Ordering, State},
        ics24_host::identifier::{ChannelId, PortId},
    },
    Height,
};
use std::collections::BTreeMap;

/// The two ends of an open channel, seen from the chain packets are sent on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelEnds {
    pub source_port: PortId,
    pub source_channel: ChannelId,
    pub destination_port: PortId,
    pub destination_channel: ChannelId,
    pub ordering: Ordering,
}

impl ChannelEnds {
    /// The same channel seen from the other chain.
    pub fn reversed(&self) -> Self {
        Self {
            source_port: self.destination_port.clone(),
            source_channel: self.destination_channel.clone(),
            destination_port: self.source_port.clone(),
            destination_channel: self.source_channel.clone(),
            ordering: self.ordering,
        }
    }
}

/// Latest height of a chain together with its block timestamp in nanoseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainHead {
    pub height: Height,
    pub timestamp: u64,
}

impl ChainHead {
    pub async fn latest(chain: &impl ChainEndpoint) -> Result<Self, Error> {
        let (height, timestamp) = chain.latest_height_and_timestamp().await?;
        Ok(Self { height, timestamp })
    }
}

/// Undelivered packets of one channel direction, ascending by sequence.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingSends {
    /// Packets the destination can still receive
    pub deliverable: Vec<Packet>,
    /// Packets whose timeout elapsed on the destination, eligible for a timeout proof
    pub timed_out: Vec<Packet>,
    /// The destination channel end is closed: nothing can be delivered any more and every
    /// undelivered packet is timed out on close.
    pub destination_closed: bool,
}

impl PendingSends {
    pub fn is_empty(&self) -> bool {
        self.deliverable.is_empty() && self.timed_out.is_empty()
    }
}

/// Snapshot of one channel direction, taken at the latest height of both chains.
///
/// Holds nothing that outlives a pass. Every query goes to the chains at the heights read when
/// the snapshot was taken, so results are consistent with each other and with the proofs
/// fetched at those heights.
pub struct PacketTracker<'a, S, D> {
    source: &'a S,
    destination: &'a D,
    ends: &'a ChannelEnds,
    pub source_head: ChainHead,
    pub destination_head: ChainHead,
}

impl<'a, S, D> PacketTracker<'a, S, D>
where
    S: ChainEndpoint,
    D: ChainEndpoint,
{
    pub async fn snapshot(
        source: &'a S,
        destination: &'a D,
        ends: &'a ChannelEnds,
    ) -> Result<PacketTracker<'a, S, D>, Error> {
        let (source_head, destination_head) =
            futures::try_join!(ChainHead::latest(source), ChainHead::latest(destination))?;
        Ok(Self { source, destination, ends, source_head, destination_head })
    }

    /// Packets committed on the source that the destination has not received, split by whether
    /// their timeout has elapsed on the destination.
    pub async fn pending_sends(&self) -> Result<PendingSends, Error> {
        let destination_end = query_channel(
            self.destination,
            self.destination_head.height,
            &self.ends.destination_port,
            &self.ends.destination_channel,
        )
        .await?;
        let destination_closed = channel_state(destination_end.as_ref())? == State::Closed;

        let seqs = query_undelivered_sequences(
            self.source_head.height,
            self.destination_head.height,
            &self.ends.source_channel,
            &self.ends.source_port,
            &self.ends.destination_channel,
            &self.ends.destination_port,
            self.ends.ordering,
            self.source,
            self.destination,
        )
        .await?;
        if seqs.is_empty() {
            return Ok(PendingSends { destination_closed, ..Default::default() })
        }

        let packets = self
            .source
            .query_send_packets(
                self.ends.source_channel.clone(),
                self.ends.source_port.clone(),
                seqs.clone(),
            )
            .await?
            .into_iter()
            .filter(|info| seqs.binary_search(&info.packet.sequence).is_ok())
            .map(|info| (info.packet.sequence, info.packet))
            .collect::<BTreeMap<_, _>>();

        if packets.len() != seqs.len() {
            let missing = seqs
                .iter()
                .filter(|seq| !packets.contains_key(seq))
                .collect::<Vec<_>>();
            return Err(Error::query(
                self.source.name(),
                format!("no send_packet event found for committed sequences {missing:?}"),
            ))
        }

        let mut pending = PendingSends { destination_closed, ..Default::default() };
        for packet in packets.into_values() {
            if destination_closed ||
                packet.is_timed_out(self.destination_head.height, self.destination_head.timestamp)
            {
                pending.timed_out.push(packet);
            } else {
                pending.deliverable.push(packet);
            }
        }
        log::debug!(
            target: "hyperspace-link",
            "{}/{} on {}: {} deliverable, {} timed out",
            self.ends.source_port,
            self.ends.source_channel,
            self.source.name(),
            pending.deliverable.len(),
            pending.timed_out.len()
        );
        Ok(pending)
    }

    /// Packets from the source acknowledged on the destination whose commitment the source
    /// still holds, with the acknowledgement the destination wrote.
    pub async fn pending_acks(&self) -> Result<Vec<(Packet, Acknowledgement)>, Error> {
        let seqs = query_undelivered_acks(
            self.destination_head.height,
            self.source_head.height,
            &self.ends.destination_channel,
            &self.ends.destination_port,
            &self.ends.source_channel,
            &self.ends.source_port,
            self.destination,
            self.source,
        )
        .await?;
        if seqs.is_empty() {
            return Ok(vec![])
        }

        let acks = self
            .destination
            .query_recv_packets(
                self.ends.destination_channel.clone(),
                self.ends.destination_port.clone(),
                seqs.clone(),
            )
            .await?
            .into_iter()
            .filter(|info| seqs.binary_search(&info.packet.sequence).is_ok())
            .filter_map(|info| info.ack.map(|ack| (info.packet.sequence, (info.packet, ack))))
            .collect::<BTreeMap<_, _>>();

        if acks.len() != seqs.len() {
            return Err(Error::query(
                self.destination.name(),
                format!(
                    "found {} write_acknowledgement events for {} acknowledged sequences",
                    acks.len(),
                    seqs.len()
                ),
            ))
        }

        Ok(acks.into_values().collect())
    }
}
