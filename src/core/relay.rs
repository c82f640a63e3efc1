use crate::core::{
    config::LinkConfig,
    error::{Error, RejectionKind},
    events::{written_acknowledgement, IbcEvent, TxResponse},
    handshake::Connection,
    link::Link,
    packets::{
        tracker::{ChainHead, ChannelEnds, PacketTracker},
        types::{parse_channel, parse_port, Acknowledgement, Packet},
        utils::{construct_ack_message, construct_recv_message, construct_timeout_message},
    },
    queue::{flush_message_batch, BatchError},
    summary::{DirectionSummary, PacketFailure, RelayPhase, RelayReceipt, RelaySummary},
};
use crate::primitives::{
    funcs::{channel_ordering, channel_state, ensure_client_updated},
    ChainEndpoint,
};
use futures::future::join_all;
use ibc_proto::{google::protobuf::Any, ibc::core::channel::v1::Channel as RawChannel};
use ibc_relayer_types::{
    core::{
        ics04_channel::channel::{Ordering, State},
        ics24_host::identifier::ClientId,
    },
    Height,
};
use std::{future::Future, time::Duration};

/// One direction of a channel: packets flow from `source` to `destination`, acknowledgements
/// flow back.
pub struct RelayPath<'a, S, D> {
    pub source: &'a S,
    pub destination: &'a D,
    /// Client of the source chain hosted on the destination
    pub source_client: &'a ClientId,
    /// Client of the destination chain hosted on the source
    pub destination_client: &'a ClientId,
    pub ends: ChannelEnds,
    pub config: &'a LinkConfig,
}

/// Outcome of relaying a single packet. The outer error aborts the pass.
type PacketOutcome = Result<Result<RelayReceipt, PacketFailure>, Error>;

impl<'a, S, D> RelayPath<'a, S, D>
where
    S: ChainEndpoint,
    D: ChainEndpoint,
{
    pub async fn tracker(&self) -> Result<PacketTracker<'_, S, D>, Error> {
        PacketTracker::snapshot(self.source, self.destination, &self.ends).await
    }

    /// Delivers pending packets, releases timed out ones and relays acknowledgements back.
    ///
    /// Returns the summary of this direction (packets, timeouts) and the acknowledgements
    /// relayed back to the source, which belong to the opposite direction.
    pub async fn relay_packets(&self) -> Result<(DirectionSummary, DirectionSummary), Error> {
        let mut forward = DirectionSummary::default();
        let tracker = self.tracker().await?;
        let pending = tracker.pending_sends().await?;

        if !pending.deliverable.is_empty() {
            // on ordered channels nothing after a timed out packet can be received
            let blocked_from = match self.ends.ordering {
                Ordering::Ordered => pending.timed_out.first().map(|p| p.sequence),
                _ => None,
            };
            forward.merge(
                self.deliver(tracker.source_head.height, pending.deliverable, blocked_from)
                    .await?,
            );
        }
        if !pending.timed_out.is_empty() {
            forward.merge(
                self.time_out(
                    tracker.destination_head.height,
                    pending.destination_closed,
                    pending.timed_out,
                )
                .await?,
            );
        }

        // receipts written above are only visible from a fresh snapshot
        let tracker = self.tracker().await?;
        let acks = tracker.pending_acks().await?;
        let backward = if acks.is_empty() {
            DirectionSummary::default()
        } else {
            self.acknowledge(tracker.destination_head.height, acks).await?
        };

        Ok((forward, backward))
    }

    /// Submits a receive packet transaction per packet to the destination, proving each
    /// commitment at `proof_height` of the source.
    ///
    /// Ordered channels go strictly ascending, one transaction at a time. After a failure that
    /// is not a redundant delivery, or from `blocked_from` on, the remaining packets are only
    /// reported as blocked.
    pub async fn deliver(
        &self,
        proof_height: Height,
        mut packets: Vec<Packet>,
        blocked_from: Option<u64>,
    ) -> Result<DirectionSummary, Error> {
        packets.sort_by_key(|packet| packet.sequence);
        self.update_client(self.source, self.destination, self.source_client, proof_height)
            .await?;
        log::info!(
            target: "hyperspace-link",
            "📦 Delivering {} packets from {} to {}",
            packets.len(),
            self.source.name(),
            self.destination.name()
        );

        let mut summary = DirectionSummary::default();
        let outcomes = match self.ends.ordering {
            Ordering::Ordered => {
                let mut outcomes = Vec::with_capacity(packets.len());
                let mut blocked_by = None;
                for packet in &packets {
                    let blocked_by_timeout = blocked_from.filter(|seq| packet.sequence > *seq);
                    if let Some(seq) = blocked_by.or(blocked_by_timeout) {
                        outcomes.push(Ok(Err(PacketFailure {
                            sequence: packet.sequence,
                            phase: RelayPhase::Deliver,
                            kind: RejectionKind::Rejected,
                            reason: format!("blocked by sequence {seq}"),
                        })));
                        continue
                    }
                    let outcome = self.deliver_one(packet, proof_height).await;
                    if let Ok(Err(failure)) = &outcome {
                        if failure.kind != RejectionKind::Redundant {
                            blocked_by = Some(packet.sequence);
                        }
                    }
                    outcomes.push(outcome);
                }
                outcomes
            },
            _ if self.config.parallel_unordered =>
                join_all(packets.iter().map(|packet| self.deliver_one(packet, proof_height)))
                    .await,
            _ => {
                let mut outcomes = Vec::with_capacity(packets.len());
                for packet in &packets {
                    outcomes.push(self.deliver_one(packet, proof_height).await);
                }
                outcomes
            },
        };

        for outcome in outcomes {
            match outcome? {
                Ok(receipt) => summary.packets.push(receipt),
                Err(failure) => summary.failures.push(failure),
            }
        }
        Ok(summary)
    }

    async fn deliver_one(&self, packet: &Packet, proof_height: Height) -> PacketOutcome {
        let result = async {
            let msg = with_proof_refresh(
                self.source,
                self.destination,
                self.source_client,
                proof_height,
                self.config.proof_refresh_retries,
                |height| construct_recv_message(self.source, self.destination, packet, height),
            )
            .await?;
            self.destination.submit(vec![msg]).await
        }
        .await;

        match result {
            Ok(tx) => {
                let ack = written_acknowledgement(&tx, packet.sequence);
                log::info!(
                    target: "hyperspace-link",
                    "✉️ Packet {} received on {} in tx {}",
                    packet.sequence,
                    self.destination.name(),
                    tx.hash
                );
                Ok(Ok(RelayReceipt::new(packet, &tx, ack)))
            },
            Err(e) => classify(packet.sequence, RelayPhase::Deliver, e).map(Err),
        }
    }

    /// Releases timed out packets on the source with a proof, taken at `proof_height` of the
    /// destination, that they were never received.
    pub async fn time_out(
        &self,
        proof_height: Height,
        destination_closed: bool,
        packets: Vec<Packet>,
    ) -> Result<DirectionSummary, Error> {
        self.update_client(self.destination, self.source, self.destination_client, proof_height)
            .await?;
        let next_sequence_recv = match self.ends.ordering {
            Ordering::Ordered =>
                self.destination
                    .query_next_sequence_recv(
                        proof_height,
                        &self.ends.destination_port,
                        &self.ends.destination_channel,
                    )
                    .await?
                    .next_sequence_receive,
            _ => 0,
        };
        log::info!(
            target: "hyperspace-link",
            "⏰ Timing out {} packets on {}",
            packets.len(),
            self.source.name()
        );

        let mut summary = DirectionSummary::default();
        for packet in &packets {
            let result = async {
                let msg = with_proof_refresh(
                    self.destination,
                    self.source,
                    self.destination_client,
                    proof_height,
                    self.config.proof_refresh_retries,
                    |height| {
                        construct_timeout_message(
                            self.source,
                            self.destination,
                            self.ends.ordering,
                            destination_closed,
                            packet,
                            match self.ends.ordering {
                                Ordering::Ordered => next_sequence_recv,
                                _ => packet.sequence,
                            },
                            height,
                        )
                    },
                )
                .await?;
                self.source.submit(vec![msg]).await
            }
            .await;

            match result {
                Ok(tx) => summary.timeouts.push(RelayReceipt::new(packet, &tx, None)),
                Err(e) => summary.failures.push(classify(packet.sequence, RelayPhase::Timeout, e)?),
            }
        }
        Ok(summary)
    }

    /// Relays acknowledgements written on the destination back to the source, proven at
    /// `proof_height` of the destination. All acknowledgements go out as one batch. If part of
    /// the batch is refused, acknowledgements the landed transactions did not carry are retried
    /// one by one so a single bad packet cannot hold up the rest.
    pub async fn acknowledge(
        &self,
        proof_height: Height,
        acks: Vec<(Packet, Acknowledgement)>,
    ) -> Result<DirectionSummary, Error> {
        self.update_client(self.destination, self.source, self.destination_client, proof_height)
            .await?;
        log::info!(
            target: "hyperspace-link",
            "📬 Relaying {} acknowledgements from {} to {}",
            acks.len(),
            self.destination.name(),
            self.source.name()
        );

        let mut summary = DirectionSummary::default();
        let mut msgs = Vec::with_capacity(acks.len());
        for (packet, ack) in &acks {
            match self.ack_message(packet, ack, proof_height).await {
                Ok(msg) => msgs.push(Some(msg)),
                Err(e) => {
                    summary.failures.push(classify(packet.sequence, RelayPhase::Acknowledge, e)?);
                    msgs.push(None);
                },
            }
        }

        let batch = msgs.iter().flatten().cloned().collect::<Vec<_>>();
        let (responses, refused) = match flush_message_batch(batch, self.source).await {
            Ok(responses) => (responses, false),
            Err(BatchError { landed, error }) if error.rejection_kind().is_some() => {
                log::debug!(
                    target: "hyperspace-link",
                    "Acknowledgement batch refused by {} after {} transactions: {}",
                    self.source.name(),
                    landed.len(),
                    error
                );
                (landed, true)
            },
            Err(BatchError { error, .. }) => return Err(error),
        };

        for ((packet, ack), msg) in acks.iter().zip(msgs) {
            let Some(msg) = msg else { continue };
            let acked_in = responses.iter().find(|tx| acknowledges(tx, packet.sequence));
            let outcome = match acked_in {
                Some(tx) => Ok(tx.clone()),
                None if refused => self.source.submit(vec![msg]).await,
                None => Err(Error::Custom(format!(
                    "no acknowledge_packet event for sequence {}",
                    packet.sequence
                ))),
            };
            match outcome {
                Ok(tx) => summary.acks.push(RelayReceipt::new(packet, &tx, Some(ack.0.clone()))),
                Err(e) =>
                    summary.failures.push(classify(packet.sequence, RelayPhase::Acknowledge, e)?),
            }
        }
        Ok(summary)
    }

    async fn ack_message(
        &self,
        packet: &Packet,
        ack: &Acknowledgement,
        proof_height: Height,
    ) -> Result<Any, Error> {
        with_proof_refresh(
            self.destination,
            self.source,
            self.destination_client,
            proof_height,
            self.config.proof_refresh_retries,
            |height| construct_ack_message(self.destination, self.source, packet, ack, height),
        )
        .await
    }

    async fn update_client(
        &self,
        prover: &impl ChainEndpoint,
        verifier: &impl ChainEndpoint,
        client_id: &ClientId,
        height: Height,
    ) -> Result<(), Error> {
        match ensure_client_updated(prover, verifier, client_id, height).await {
            // another relayer updated the client to the same height
            Err(e) if e.is_redundant() => Ok(()),
            other => other.map(|_| ()),
        }
    }
}

fn acknowledges(tx: &TxResponse, sequence: u64) -> bool {
    tx.events.iter().any(|ev| {
        matches!(ev, IbcEvent::AcknowledgePacket(info) if info.packet.sequence == sequence)
    })
}

/// Turns a per-packet error into a reported failure. Errors that are not about the packet
/// itself are returned as they are and abort the pass.
fn classify(sequence: u64, phase: RelayPhase, error: Error) -> Result<PacketFailure, Error> {
    let kind = match error.rejection_kind() {
        Some(kind) => kind,
        None => return Err(error),
    };
    if error.is_redundant() {
        log::debug!(target: "hyperspace-link", "Skipping {phase} of packet {sequence}: {error}");
    } else {
        log::warn!(target: "hyperspace-link", "Failed {phase} of packet {sequence}: {error}");
    }
    Ok(PacketFailure { sequence, phase, kind, reason: error.to_string() })
}

/// Builds a proof carrying message at `height`. When `prover` can no longer prove state at that
/// height, moves to its latest height, updates the client on `verifier` and tries again, at most
/// `retries` times.
async fn with_proof_refresh<P, V, F, Fut>(
    prover: &P,
    verifier: &V,
    client_id: &ClientId,
    mut height: Height,
    mut retries: usize,
    build: F,
) -> Result<Any, Error>
where
    P: ChainEndpoint,
    V: ChainEndpoint,
    F: Fn(Height) -> Fut,
    Fut: Future<Output = Result<Any, Error>>,
{
    loop {
        match build(height).await {
            Err(Error::Proof { reason, .. }) if retries > 0 => {
                retries -= 1;
                let head = ChainHead::latest(prover).await?;
                log::debug!(
                    target: "hyperspace-link",
                    "Refreshing proof height on {} from {} to {}: {}",
                    prover.name(),
                    height,
                    head.height,
                    reason
                );
                match ensure_client_updated(prover, verifier, client_id, head.height).await {
                    Err(e) if !e.is_redundant() => return Err(e),
                    _ => {},
                }
                height = head.height;
            },
            other => return other,
        }
    }
}

/// Runs relay passes for every channel of a connection.
pub struct RelayEngine<'a, A, B> {
    pub a: &'a A,
    pub b: &'a B,
    pub connection: &'a Connection,
    pub config: &'a LinkConfig,
}

impl<'a, A, B> RelayEngine<'a, A, B>
where
    A: ChainEndpoint,
    B: ChainEndpoint,
{
    /// Channels of the connection that are open or closed on A, seen from A.
    pub async fn channels(&self) -> Result<Vec<ChannelEnds>, Error> {
        let head = ChainHead::latest(self.a).await?;
        let response = self
            .a
            .query_connection_channels(head.height, &self.connection.a.connection_id)
            .await?;

        let mut channels = vec![];
        for channel in response.channels {
            let end = RawChannel {
                state: channel.state,
                ordering: channel.ordering,
                counterparty: channel.counterparty.clone(),
                connection_hops: channel.connection_hops.clone(),
                version: channel.version.clone(),
            };
            let state = channel_state(Some(&end))?;
            let Some(counterparty) = channel.counterparty else { continue };
            if !matches!(state, State::Open | State::Closed) || counterparty.channel_id.is_empty() {
                continue
            }
            channels.push(ChannelEnds {
                source_port: parse_port(&channel.port_id)?,
                source_channel: parse_channel(&channel.channel_id)?,
                destination_port: parse_port(&counterparty.port_id)?,
                destination_channel: parse_channel(&counterparty.channel_id)?,
                ordering: channel_ordering(&end)?,
            });
        }
        Ok(channels)
    }

    /// One relay pass over a channel, in both directions. `channel` is seen from A.
    pub async fn relay_channel(&self, channel: &ChannelEnds) -> Result<RelaySummary, Error> {
        let a_to_b = RelayPath {
            source: self.a,
            destination: self.b,
            source_client: &self.connection.b.client_id,
            destination_client: &self.connection.a.client_id,
            ends: channel.clone(),
            config: self.config,
        };
        let b_to_a = RelayPath {
            source: self.b,
            destination: self.a,
            source_client: &self.connection.a.client_id,
            destination_client: &self.connection.b.client_id,
            ends: channel.reversed(),
            config: self.config,
        };

        let mut summary = RelaySummary::default();
        let (sent, acked) = a_to_b.relay_packets().await?;
        summary.a_to_b.merge(sent);
        summary.b_to_a.merge(acked);
        let (sent, acked) = b_to_a.relay_packets().await?;
        summary.b_to_a.merge(sent);
        summary.a_to_b.merge(acked);
        Ok(summary)
    }

    pub async fn relay_all(&self) -> Result<RelaySummary, Error> {
        let mut summary = RelaySummary::default();
        for channel in self.channels().await? {
            summary.merge(self.relay_channel(&channel).await?);
        }
        Ok(summary)
    }
}

/// Core relayer loop, runs a relay pass every `relay_interval` until `shutdown` resolves.
/// A failed pass is logged and retried on the next tick. Returns everything relayed.
pub async fn relay<A, B>(
    link: &Link<A, B>,
    shutdown: impl Future<Output = ()>,
) -> Result<RelaySummary, anyhow::Error>
where
    A: ChainEndpoint,
    B: ChainEndpoint,
{
    let period = link.config().relay_interval().max(Duration::from_millis(1));
    let mut interval = tokio::time::interval(period);
    tokio::pin!(shutdown);
    let mut relayed = RelaySummary::default();
    // loop until shutdown
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = interval.tick() => {
                match link.relay_all().await {
                    Ok(summary) => {
                        if !summary.is_empty() {
                            log::info!(target: "hyperspace-link", "🧾 {}", summary);
                        }
                        relayed.merge(summary);
                    },
                    Err(e) => {
                        log::error!(target: "hyperspace-link", "Relay pass failed, retrying next tick: {}", e);
                    },
                }
            }
        }
    }

    Ok(relayed)
}
