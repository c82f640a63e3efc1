use super::{
    create::{increment, query_count, reset, sent_packets, timeout_future, wait_for_count},
    setup::{setup_chains, CounterLink},
};
use crate::core::{
    config::LinkConfig,
    error::{Error, HandshakeStage, RejectionKind},
    events::IbcEvent,
    handshake::{
        state::Side,
        Channel, ChannelHandshake, ConnectionHandshake, HandshakeCoordinator,
    },
    link::Link,
    packets::{tracker::ChainHead, utils::construct_ack_message},
    relay::{relay, RelayPath},
};
use crate::mock::{
    counter::{StdAck, COUNTER_VERSION},
    MockChain, MockChainConfig,
};
use crate::primitives::{
    funcs::{channel_state, query_channel},
    ChainEndpoint, IbcProvider,
};
use ibc_relayer_types::core::ics04_channel::channel::{Ordering, State};

/// The A to B direction of `channel`, relayed under `config`.
fn a_to_b<'a>(
    link: &'a Link<MockChain, MockChain>,
    channel: &Channel,
    config: &'a LinkConfig,
) -> RelayPath<'a, MockChain, MockChain> {
    RelayPath {
        source: &link.a,
        destination: &link.b,
        source_client: &link.connection.b.client_id,
        destination_client: &link.connection.a.client_id,
        ends: channel.ends(),
        config,
    }
}

async fn pending_commitments(chain: &MockChain, channel: &Channel) -> Result<Vec<u64>, Error> {
    let head = ChainHead::latest(chain).await?;
    chain
        .query_packet_commitments(
            head.height,
            channel.src.channel_id.clone(),
            channel.src.port_id.clone(),
        )
        .await
}

fn success_ack() -> Vec<u8> {
    StdAck::success(&"0").to_vec()
}

/// An increment on either side reaches the other counter and its acknowledgement comes back,
/// all in one relay pass.
pub async fn counter_state_converges(setup: &CounterLink) -> Result<(), anyhow::Error> {
    let (chain_a, chain_b) = (setup.chain_a(), setup.chain_b());
    let tx = increment(chain_a, &setup.counter_a).await?;
    assert_eq!(sent_packets(&tx).len(), 1);
    assert_eq!(query_count(chain_a, &setup.counter_a).await?, 1);
    assert_eq!(query_count(chain_b, &setup.counter_b).await?, 0);

    let info = setup.link.relay_all().await?;
    log::info!(target: "hyperspace-link", "Relayed {}", info);
    assert_eq!(info.packets_from_a().len(), 1);
    assert_eq!(info.acks_from_b().len(), 1);
    assert_eq!(info.acks_from_b()[0].acknowledgement, Some(success_ack()));
    assert_eq!(info.failures().count(), 0);
    assert_eq!(query_count(chain_b, &setup.counter_b).await?, 1);
    assert!(pending_commitments(chain_a, &setup.channel).await?.is_empty());

    let sent_by_a = chain_a.counter(&setup.counter_a).await.map(|c| c.acknowledged);
    assert_eq!(sent_by_a, Some(vec![(1, success_ack())]));

    // and back the other way
    increment(chain_b, &setup.counter_b).await?;
    let info = setup.link.relay_all().await?;
    assert_eq!(info.packets_from_b().len(), 1);
    assert_eq!(info.acks_from_a().len(), 1);
    assert_eq!(info.acks_from_a()[0].acknowledgement, Some(success_ack()));
    assert_eq!(query_count(chain_a, &setup.counter_a).await?, 2);
    assert_eq!(query_count(chain_b, &setup.counter_b).await?, 2);

    let info = setup.link.relay_all().await?;
    assert!(info.is_empty(), "nothing left to relay, got {info}");
    log::info!(target: "hyperspace-link", "🙌🙌🙌 Counters converged");
    Ok(())
}

/// A reset is applied where it was executed and acknowledged by the other side, whose count
/// stays as it was.
pub async fn reset_is_acknowledged(setup: &CounterLink) -> Result<(), anyhow::Error> {
    let (chain_a, chain_b) = (setup.chain_a(), setup.chain_b());
    let before = query_count(chain_a, &setup.counter_a).await?;
    reset(chain_b, &setup.counter_b, 20).await?;
    assert_eq!(query_count(chain_b, &setup.counter_b).await?, 20);

    let info = setup.link.relay_all().await?;
    assert_eq!(info.packets_from_b().len(), 1);
    assert_eq!(info.acks_from_a().len(), 1);
    assert_eq!(info.acks_from_a()[0].acknowledgement, Some(success_ack()));
    assert_eq!(query_count(chain_a, &setup.counter_a).await?, before);
    Ok(())
}

/// Relaying with nothing pending does nothing, however often it runs.
pub async fn relay_is_idempotent(setup: &CounterLink) -> Result<(), anyhow::Error> {
    let (height_a, _) = setup.chain_a().latest_height_and_timestamp().await?;
    let (height_b, _) = setup.chain_b().latest_height_and_timestamp().await?;
    for _ in 0..2 {
        let info = setup.link.relay_all().await?;
        assert!(info.is_empty(), "unexpected relay: {info}");
    }
    // no transaction was submitted either
    assert_eq!(setup.chain_a().latest_height_and_timestamp().await?.0, height_a);
    assert_eq!(setup.chain_b().latest_height_and_timestamp().await?.0, height_b);
    Ok(())
}

/// Packets on an ordered channel are received in sequence order whatever order they are
/// handed over in.
pub async fn ordered_packets_arrive_in_sequence(setup: &CounterLink) -> Result<(), anyhow::Error> {
    assert_eq!(setup.channel.ordering, Ordering::Ordered);
    let (chain_a, chain_b) = (setup.chain_a(), setup.chain_b());
    for _ in 0..3 {
        increment(chain_a, &setup.counter_a).await?;
    }

    let path = a_to_b(&setup.link, &setup.channel, setup.link.config());
    let tracker = path.tracker().await?;
    let pending = tracker.pending_sends().await?;
    let mut packets = pending.deliverable;
    assert_eq!(packets.iter().map(|p| p.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);
    packets.reverse();

    let delivered = path.deliver(tracker.source_head.height, packets, None).await?;
    assert!(delivered.failures.is_empty(), "{:?}", delivered.failures);
    assert_eq!(delivered.packets.iter().map(|r| r.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(delivered.packets.windows(2).all(|w| w[0].height < w[1].height));
    let received = chain_b.counter(&setup.counter_b).await.map(|c| c.received);
    assert_eq!(received, Some(vec![1, 2, 3]));

    let info = setup.link.relay_all().await?;
    assert!(info.packets_from_a().is_empty());
    assert_eq!(info.acks_from_b().iter().map(|r| r.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(query_count(chain_b, &setup.counter_b).await?, 3);
    Ok(())
}

/// A packet whose timeout height has passed on the destination is released on the source
/// instead of being delivered.
pub async fn packet_height_timeout(setup: &CounterLink) -> Result<(), anyhow::Error> {
    let (chain_a, chain_b) = (setup.chain_a(), setup.chain_b());
    chain_a
        .configure_counter(&setup.counter_a, |counter| counter.packet_timeout.height = Some(1))
        .await?;
    let before = query_count(chain_b, &setup.counter_b).await?;
    let tx = increment(chain_a, &setup.counter_a).await?;
    let sequence = sent_packets(&tx)[0].sequence;

    let info = setup.link.relay_all().await?;
    assert!(info.packets_from_a().is_empty());
    assert_eq!(info.timeouts_from_a().len(), 1);
    assert_eq!(info.timeouts_from_a()[0].sequence, sequence);
    assert_eq!(query_count(chain_b, &setup.counter_b).await?, before);
    assert!(pending_commitments(chain_a, &setup.channel).await?.is_empty());
    let timed_out = chain_a.counter(&setup.counter_a).await.map(|c| c.timed_out);
    assert_eq!(timed_out, Some(vec![sequence]));

    chain_a
        .configure_counter(&setup.counter_a, |counter| counter.packet_timeout.height = None)
        .await?;
    Ok(())
}

/// Same as [`packet_height_timeout`] with a timestamp that passes while the destination
/// produces blocks.
pub async fn packet_timestamp_timeout(setup: &CounterLink) -> Result<(), anyhow::Error> {
    let (chain_a, chain_b) = (setup.chain_a(), setup.chain_b());
    let five_blocks = 5 * chain_a.config.block_time_ms * 1_000_000;
    chain_a
        .configure_counter(&setup.counter_a, |counter| {
            counter.packet_timeout.after = Some(five_blocks)
        })
        .await?;
    let tx = increment(chain_a, &setup.counter_a).await?;
    let sequence = sent_packets(&tx)[0].sequence;

    // not elapsed yet, unless B is already far ahead of A
    let (sent_at, _) = chain_a.latest_height_and_timestamp().await?;
    let (head_b, _) = chain_b.latest_height_and_timestamp().await?;
    if head_b.revision_height() < sent_at.revision_height() + 5 {
        let path = a_to_b(&setup.link, &setup.channel, setup.link.config());
        let pending = path.tracker().await?.pending_sends().await?;
        assert!(pending.timed_out.is_empty());
    }

    chain_b.advance_blocks(sent_at.revision_height() + 10).await;
    let info = setup.link.relay_all().await?;
    assert!(info.packets_from_a().is_empty());
    let timeouts = info.timeouts_from_a().iter().map(|r| r.sequence).collect::<Vec<_>>();
    assert_eq!(timeouts, vec![sequence]);

    chain_a
        .configure_counter(&setup.counter_a, |counter| counter.packet_timeout.after = None)
        .await?;
    Ok(())
}

/// On an ordered channel a timeout closes the sender's end; packets sent the other way are
/// then timed out on close.
pub async fn ordered_timeout_closes_channel(setup: &CounterLink) -> Result<(), anyhow::Error> {
    assert_eq!(setup.channel.ordering, Ordering::Ordered);
    let (chain_a, chain_b) = (setup.chain_a(), setup.chain_b());
    chain_a
        .configure_counter(&setup.counter_a, |counter| counter.packet_timeout.height = Some(1))
        .await?;
    increment(chain_a, &setup.counter_a).await?;

    let info = setup.link.relay_all().await?;
    assert_eq!(info.timeouts_from_a().len(), 1);
    let head = ChainHead::latest(chain_a).await?;
    let src = &setup.channel.src;
    let end_a = query_channel(chain_a, head.height, &src.port_id, &src.channel_id).await?;
    assert_eq!(channel_state(end_a.as_ref())?, State::Closed);

    let count_a = query_count(chain_a, &setup.counter_a).await?;
    let tx = increment(chain_b, &setup.counter_b).await?;
    let sequence = sent_packets(&tx)[0].sequence;
    let info = setup.link.relay_all().await?;
    assert!(info.packets_from_b().is_empty());
    let timeouts = info.timeouts_from_b().iter().map(|r| r.sequence).collect::<Vec<_>>();
    assert_eq!(timeouts, vec![sequence]);
    assert_eq!(query_count(chain_a, &setup.counter_a).await?, count_a);
    let timed_out = chain_b.counter(&setup.counter_b).await.map(|c| c.timed_out);
    assert_eq!(timed_out, Some(vec![sequence]));
    Ok(())
}

/// Two relayers over the same link: every packet is received exactly once and the loser of
/// each race only sees redundant rejections.
pub async fn racing_relayers_deliver_once(setup: &CounterLink) -> Result<(), anyhow::Error> {
    let (chain_a, chain_b) = (setup.chain_a(), setup.chain_b());
    let rival = Link::new(
        chain_a.clone(),
        chain_b.clone(),
        setup.link.connection.clone(),
        setup.link.config().clone(),
    );
    let before = query_count(chain_b, &setup.counter_b).await?;

    // the rival takes its snapshot, then falls behind
    increment(chain_a, &setup.counter_a).await?;
    let path = a_to_b(&rival, &setup.channel, rival.config());
    let tracker = path.tracker().await?;
    let stale = tracker.pending_sends().await?;
    let info = setup.link.relay_all().await?;
    assert_eq!(info.packets_from_a().len(), 1);

    let late = path.deliver(tracker.source_head.height, stale.deliverable, None).await?;
    assert!(late.packets.is_empty());
    assert_eq!(late.failures.len(), 1);
    assert_eq!(late.failures[0].kind, RejectionKind::Redundant);

    for _ in 0..2 {
        increment(chain_a, &setup.counter_a).await?;
    }
    let (ours, theirs) = futures::try_join!(setup.link.relay_all(), rival.relay_all())?;
    log::info!(target: "hyperspace-link", "Ours: {}, theirs: {}", ours, theirs);
    assert_eq!(ours.packets_from_a().len() + theirs.packets_from_a().len(), 2);
    assert!(ours
        .failures()
        .chain(theirs.failures())
        .all(|failure| failure.kind == RejectionKind::Redundant));
    assert_eq!(query_count(chain_b, &setup.counter_b).await?, before + 3);
    assert!(pending_commitments(chain_a, &setup.channel).await?.is_empty());
    Ok(())
}

/// An unreachable chain fails the whole pass; nothing is lost once it is back.
pub async fn unreachable_chain_aborts_pass(setup: &CounterLink) -> Result<(), anyhow::Error> {
    let (chain_a, chain_b) = (setup.chain_a(), setup.chain_b());
    increment(chain_a, &setup.counter_a).await?;

    chain_b.set_offline(true).await;
    let result = setup.link.relay_all().await;
    chain_b.set_offline(false).await;
    match result {
        Err(Error::Query { chain, .. }) => assert_eq!(chain, chain_b.name),
        other => panic!("expected a query error, got {other:?}"),
    }

    let info = setup.link.relay_all().await?;
    assert_eq!(info.packets_from_a().len(), 1);
    assert_eq!(info.acks_from_b().len(), 1);
    Ok(())
}

/// Proofs at a height the source no longer serves are refreshed at its latest height, as many
/// times as configured.
pub async fn stale_proofs_are_refreshed(setup: &CounterLink) -> Result<(), anyhow::Error> {
    let chain_a = setup.chain_a();

    increment(chain_a, &setup.counter_a).await?;
    let path = a_to_b(&setup.link, &setup.channel, setup.link.config());
    assert!(path.config.proof_refresh_retries > 0);
    let tracker = path.tracker().await?;
    let pending = tracker.pending_sends().await?;
    chain_a.advance_blocks(3).await;
    chain_a.set_proof_retention(Some(0)).await;
    let delivered = path.deliver(tracker.source_head.height, pending.deliverable, None).await?;
    chain_a.set_proof_retention(None).await;
    assert!(delivered.failures.is_empty(), "{:?}", delivered.failures);
    assert_eq!(delivered.packets.len(), 1);

    let strict = LinkConfig { proof_refresh_retries: 0, ..setup.link.config().clone() };
    increment(chain_a, &setup.counter_a).await?;
    let path = a_to_b(&setup.link, &setup.channel, &strict);
    let tracker = path.tracker().await?;
    let pending = tracker.pending_sends().await?;
    chain_a.advance_blocks(3).await;
    chain_a.set_proof_retention(Some(0)).await;
    let refused = path.deliver(tracker.source_head.height, pending.deliverable, None).await?;
    chain_a.set_proof_retention(None).await;
    assert!(refused.packets.is_empty());
    assert_eq!(refused.failures.len(), 1);
    assert_eq!(refused.failures[0].kind, RejectionKind::Proof);

    // the packet is still pending and goes out on the next pass
    let info = setup.link.relay_all().await?;
    assert_eq!(info.packets_from_a().len(), 1);
    Ok(())
}

/// When an acknowledgement batch is split and a later transaction is refused, the
/// acknowledgements that already landed are reported as relayed.
pub async fn split_ack_batch_keeps_landed_acks(setup: &CounterLink) -> Result<(), anyhow::Error> {
    let (chain_a, chain_b) = (setup.chain_a(), setup.chain_b());
    let path = a_to_b(&setup.link, &setup.channel, setup.link.config());

    for _ in 0..2 {
        increment(chain_a, &setup.counter_a).await?;
    }
    let tracker = path.tracker().await?;
    let pending = tracker.pending_sends().await?;
    let delivered = path.deliver(tracker.source_head.height, pending.deliverable, None).await?;
    assert_eq!(delivered.packets.len(), 2);

    let tracker = path.tracker().await?;
    let proof_height = tracker.destination_head.height;
    let mut acks = tracker.pending_acks().await?;
    acks.sort_by_key(|(packet, _)| packet.sequence);
    assert_eq!(acks.len(), 2);
    let (first, second) = (acks[0].0.sequence, acks[1].0.sequence);

    // one acknowledgement per transaction fits on a chain with this limit
    let mut heaviest = 0;
    for (packet, ack) in &acks {
        let msg = construct_ack_message(chain_b, chain_a, packet, ack, proof_height).await?;
        heaviest = heaviest.max(chain_a.estimate_weight(vec![msg]).await?);
    }
    let narrow = MockChain {
        config: MockChainConfig { block_max_weight: heaviest + 1, ..chain_a.config.clone() },
        ..chain_a.clone()
    };

    // another relayer gets the second acknowledgement in first
    let rival = path.acknowledge(proof_height, vec![acks[1].clone()]).await?;
    assert_eq!(rival.acks.len(), 1);

    let narrow_path = RelayPath { source: &narrow, ..path };
    let summary = narrow_path.acknowledge(proof_height, acks).await?;
    let relayed = summary.acks.iter().map(|receipt| receipt.sequence).collect::<Vec<_>>();
    assert_eq!(relayed, vec![first]);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].sequence, second);
    assert_eq!(summary.failures[0].kind, RejectionKind::Redundant);
    assert!(pending_commitments(chain_a, &setup.channel).await?.is_empty());
    Ok(())
}

/// The relay loop picks up packets as they are sent and stops on shutdown.
pub async fn continuous_relay(setup: &CounterLink) -> Result<(), anyhow::Error> {
    let (chain_a, chain_b) = (setup.chain_a(), setup.chain_b());
    let expected = query_count(chain_b, &setup.counter_b).await? + 1;
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let shutdown = async {
        let _ = shutdown_rx.await;
    };

    let send = async {
        increment(chain_a, &setup.counter_a).await?;
        timeout_future(
            wait_for_count(chain_b, &setup.counter_b, expected),
            10,
            format!("Counter on {} never reached {expected}", chain_b.name),
        )
        .await?;
        let _ = shutdown_tx.send(());
        Ok::<_, anyhow::Error>(())
    };
    let (relayed, sent) = tokio::join!(relay(&setup.link, shutdown), send);
    sent?;
    let relayed = relayed?;
    assert_eq!(relayed.packets_from_a().len(), 1);
    Ok(())
}

/// A connection version the chain does not support stops the handshake at ConnOpenInit.
pub async fn connection_version_mismatch() -> Result<(), anyhow::Error> {
    let (chain_a, chain_b) = setup_chains()?;
    let config = LinkConfig { connection_version: "2".to_string(), ..Default::default() };
    match Link::create_with_new_connections(chain_a, chain_b, config).await {
        Err(Error::Handshake(e)) => assert_eq!(e.stage, HandshakeStage::ConnOpenInit),
        Err(e) => panic!("expected a handshake error, got {e}"),
        Ok(_) => panic!("connection opened with an unsupported version"),
    }
    Ok(())
}

/// A connection handshake cut short can be finished from the identifiers the chains recorded.
pub async fn connection_handshake_resumes() -> Result<(), anyhow::Error> {
    let (chain_a, chain_b) = setup_chains()?;
    let short = LinkConfig { max_handshake_steps: 1, ..Default::default() };
    let coordinator = HandshakeCoordinator::new(&chain_a, &chain_b, &short);
    let (client_a, client_b) = coordinator.create_clients().await?;
    match coordinator.create_connection(client_a.clone(), client_b.clone()).await {
        Err(Error::Handshake(e)) => assert_eq!(e.stage, HandshakeStage::ConnOpenTry),
        other => panic!("expected the step budget to run out, got {other:?}"),
    }

    let connection_a = chain_a.events().await.into_iter().find_map(|ev| match ev.event {
        IbcEvent::OpenInitConnection(attributes) => Some(attributes.connection_id),
        _ => None,
    });
    let connection_b = chain_b.events().await.into_iter().find_map(|ev| match ev.event {
        IbcEvent::OpenTryConnection(attributes) => Some(attributes.connection_id),
        _ => None,
    });
    assert!(connection_a.is_some() && connection_b.is_some());

    let config = LinkConfig::default();
    let connection = HandshakeCoordinator::new(&chain_a, &chain_b, &config)
        .complete_connection(ConnectionHandshake {
            connection_a: connection_a.clone(),
            connection_b: connection_b.clone(),
            ..ConnectionHandshake::new(client_a, client_b)
        })
        .await?;
    assert_eq!(Some(connection.a.connection_id), connection_a);
    assert_eq!(Some(connection.b.connection_id), connection_b);
    Ok(())
}

/// A channel version the contract does not speak stops the handshake at ChanOpenInit.
pub async fn channel_version_mismatch(setup: &CounterLink) -> Result<(), anyhow::Error> {
    let counter_a = setup.chain_a().instantiate_counter(0).await;
    let counter_b = setup.chain_b().instantiate_counter(0).await;
    let result = setup
        .link
        .create_channel(
            Side::A,
            MockChain::counter_port(&counter_a)?,
            MockChain::counter_port(&counter_b)?,
            Ordering::Unordered,
            "counter-2",
        )
        .await;
    match result {
        Err(Error::Handshake(e)) => assert_eq!(e.stage, HandshakeStage::ChanOpenInit),
        other => panic!("expected a handshake error, got {other:?}"),
    }
    Ok(())
}

/// The counterparty refusing the ordering stops the handshake at ChanOpenTry. Once it accepts,
/// the handshake picks up from the channel A already initialized.
pub async fn channel_order_mismatch_resumes(setup: &CounterLink) -> Result<(), anyhow::Error> {
    let (chain_a, chain_b) = (setup.chain_a(), setup.chain_b());
    let counter_a = chain_a.instantiate_counter(0).await;
    let counter_b = chain_b.instantiate_counter(0).await;
    chain_b
        .configure_counter(&counter_b, |counter| counter.accepted_order = Some(Ordering::Ordered))
        .await?;
    let (port_a, port_b) =
        (MockChain::counter_port(&counter_a)?, MockChain::counter_port(&counter_b)?);

    let result = setup
        .link
        .create_channel(
            Side::A,
            port_a.clone(),
            port_b.clone(),
            Ordering::Unordered,
            COUNTER_VERSION,
        )
        .await;
    match result {
        Err(Error::Handshake(e)) => assert_eq!(e.stage, HandshakeStage::ChanOpenTry),
        other => panic!("expected a handshake error, got {other:?}"),
    }

    let initialized = chain_a.events().await.into_iter().rev().find_map(|ev| match ev.event {
        IbcEvent::OpenInitChannel(attributes) if attributes.port_id == port_a =>
            Some(attributes.channel_id),
        _ => None,
    });
    assert!(initialized.is_some());

    chain_b
        .configure_counter(&counter_b, |counter| counter.accepted_order = None)
        .await?;
    let channel = setup
        .link
        .complete_channel(
            Side::A,
            ChannelHandshake {
                channel_a: initialized.clone(),
                ..ChannelHandshake::new(port_a, port_b, Ordering::Unordered, COUNTER_VERSION)
            },
        )
        .await?;
    assert_eq!(Some(channel.src.channel_id.clone()), initialized);
    assert_eq!(channel.version, COUNTER_VERSION);

    increment(chain_a, &counter_a).await?;
    let info = setup.link.relay_all().await?;
    assert_eq!(info.packets_from_a().len(), 1);
    assert_eq!(query_count(chain_b, &counter_b).await?, 1);
    Ok(())
}
