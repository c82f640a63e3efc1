//! What a relay pass did, per direction.

use crate::core::{error::RejectionKind, events::TxResponse, packets::types::Packet};
use ibc_relayer_types::{
    core::ics24_host::identifier::{ChannelId, PortId},
    Height,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of one relayed packet, acknowledgement or timeout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayReceipt {
    pub sequence: u64,
    pub source_port: PortId,
    pub source_channel: ChannelId,
    pub destination_port: PortId,
    pub destination_channel: ChannelId,
    /// Hash of the transaction that carried the message
    pub tx_hash: String,
    /// Height the transaction was included at
    pub height: Height,
    /// Acknowledgement written by the receiving application, for delivered packets,
    /// or the acknowledgement relayed back, for acks.
    pub acknowledgement: Option<Vec<u8>>,
}

impl RelayReceipt {
    pub fn new(packet: &Packet, tx: &TxResponse, acknowledgement: Option<Vec<u8>>) -> Self {
        Self {
            sequence: packet.sequence,
            source_port: packet.source_port.clone(),
            source_channel: packet.source_channel.clone(),
            destination_port: packet.destination_port.clone(),
            destination_channel: packet.destination_channel.clone(),
            tx_hash: tx.hash.clone(),
            height: tx.height,
            acknowledgement,
        }
    }
}

/// Sub-phase of a relay pass a packet failed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayPhase {
    Deliver,
    Acknowledge,
    Timeout,
}

impl fmt::Display for RelayPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayPhase::Deliver => write!(f, "deliver"),
            RelayPhase::Acknowledge => write!(f, "acknowledge"),
            RelayPhase::Timeout => write!(f, "timeout"),
        }
    }
}

/// A packet the pass could not relay. Its commitment stays on chain for the next pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketFailure {
    pub sequence: u64,
    pub phase: RelayPhase,
    pub kind: RejectionKind,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionSummary {
    /// Packets received on the destination
    pub packets: Vec<RelayReceipt>,
    /// Acknowledgements of packets sent the other way, relayed back to their sender on this
    /// direction's destination
    pub acks: Vec<RelayReceipt>,
    /// Timed out packets released on their source
    pub timeouts: Vec<RelayReceipt>,
    pub failures: Vec<PacketFailure>,
}

impl DirectionSummary {
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty() &&
            self.acks.is_empty() &&
            self.timeouts.is_empty() &&
            self.failures.is_empty()
    }

    pub fn merge(&mut self, other: DirectionSummary) {
        self.packets.extend(other.packets);
        self.acks.extend(other.acks);
        self.timeouts.extend(other.timeouts);
        self.failures.extend(other.failures);
    }

    /// Failures that are not explained by another relayer getting there first.
    pub fn hard_failures(&self) -> impl Iterator<Item = &PacketFailure> {
        self.failures.iter().filter(|f| f.kind != RejectionKind::Redundant)
    }
}

/// Result of [`crate::core::link::Link::relay_all`].
///
/// Directions are named after where packets flow: `a_to_b.packets` were sent on A and received
/// on B, `a_to_b.acks` are acknowledgements written on A and relayed to B.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaySummary {
    pub a_to_b: DirectionSummary,
    pub b_to_a: DirectionSummary,
}

impl RelaySummary {
    pub fn is_empty(&self) -> bool {
        self.a_to_b.is_empty() && self.b_to_a.is_empty()
    }

    pub fn packets_from_a(&self) -> &[RelayReceipt] {
        &self.a_to_b.packets
    }

    pub fn packets_from_b(&self) -> &[RelayReceipt] {
        &self.b_to_a.packets
    }

    pub fn acks_from_a(&self) -> &[RelayReceipt] {
        &self.a_to_b.acks
    }

    pub fn acks_from_b(&self) -> &[RelayReceipt] {
        &self.b_to_a.acks
    }

    pub fn timeouts_from_a(&self) -> &[RelayReceipt] {
        &self.a_to_b.timeouts
    }

    pub fn timeouts_from_b(&self) -> &[RelayReceipt] {
        &self.b_to_a.timeouts
    }

    pub fn failures(&self) -> impl Iterator<Item = &PacketFailure> {
        self.a_to_b.failures.iter().chain(self.b_to_a.failures.iter())
    }

    pub fn merge(&mut self, other: RelaySummary) {
        self.a_to_b.merge(other.a_to_b);
        self.b_to_a.merge(other.b_to_a);
    }
}

impl fmt::Display for RelaySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seqs = |receipts: &[RelayReceipt]| {
            receipts.iter().map(|r| r.sequence).collect::<Vec<_>>()
        };
        write!(
            f,
            "A->B packets {:?} acks {:?} timeouts {:?} failures {}; \
             B->A packets {:?} acks {:?} timeouts {:?} failures {}",
            seqs(&self.a_to_b.packets),
            seqs(&self.a_to_b.acks),
            seqs(&self.a_to_b.timeouts),
            self.a_to_b.failures.len(),
            seqs(&self.b_to_a.packets),
            seqs(&self.b_to_a.acks),
            seqs(&self.b_to_a.timeouts),
            self.b_to_a.failures.len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn receipt(sequence: u64) -> RelayReceipt {
        RelayReceipt {
            sequence,
            source_port: PortId::from_str("wasm.a").unwrap(),
            source_channel: ChannelId::new(0),
            destination_port: PortId::from_str("wasm.b").unwrap(),
            destination_channel: ChannelId::new(1),
            tx_hash: format!("{sequence:064X}"),
            height: Height::new(0, 10 + sequence).unwrap(),
            acknowledgement: None,
        }
    }

    #[test]
    fn redundant_failures_still_make_a_summary_non_empty() {
        let mut summary = RelaySummary::default();
        assert!(summary.is_empty());
        summary.b_to_a.failures.push(PacketFailure {
            sequence: 2,
            phase: RelayPhase::Deliver,
            kind: RejectionKind::Redundant,
            reason: "packet already received".into(),
        });
        assert!(!summary.is_empty());
        assert_eq!(summary.b_to_a.hard_failures().count(), 0);
    }

    #[test]
    fn merge_and_display() {
        let mut summary = RelaySummary::default();
        summary.a_to_b.packets.push(receipt(1));
        let mut next = RelaySummary::default();
        next.a_to_b.packets.push(receipt(2));
        next.b_to_a.acks.push(receipt(1));
        summary.merge(next);

        assert_eq!(summary.packets_from_a().len(), 2);
        assert_eq!(summary.acks_from_b().len(), 1);
        assert_eq!(
            summary.to_string(),
            "A->B packets [1, 2] acks [] timeouts [] failures 0; \
             B->A packets [] acks [1] timeouts [] failures 0"
        );
    }

    #[test]
    fn summary_serializes_with_rejection_kinds() {
        let mut summary = RelaySummary::default();
        summary.a_to_b.packets.push(receipt(1));
        summary.a_to_b.failures.push(PacketFailure {
            sequence: 2,
            phase: RelayPhase::Acknowledge,
            kind: RejectionKind::Redundant,
            reason: "acknowledgement already relayed".into(),
        });

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["a_to_b"]["failures"][0]["kind"], "Redundant");
        assert_eq!(json["a_to_b"]["failures"][0]["phase"], "Acknowledge");

        let decoded: RelaySummary = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, summary);
    }
}
