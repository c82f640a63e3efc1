use hyperspace_link::core::{config::LinkConfig, logging};
use ibc_relayer_types::core::ics04_channel::channel::Ordering;
use hyperspace_link::testsuite::{
    setup::setup_counter_link,
    tests::{
        ordered_timeout_closes_channel, packet_height_timeout, packet_timestamp_timeout,
        racing_relayers_deliver_once, split_ack_batch_keeps_landed_acks, stale_proofs_are_refreshed,
        unreachable_chain_aborts_pass,
    },
};

#[tokio::test(flavor = "multi_thread")]
async fn packet_timeouts() {
    logging::setup_logging();
    let setup = setup_counter_link(Ordering::Unordered, LinkConfig::default()).await.unwrap();
    packet_height_timeout(&setup).await.unwrap();
    packet_timestamp_timeout(&setup).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn timeout_on_close() {
    logging::setup_logging();
    let setup = setup_counter_link(Ordering::Ordered, LinkConfig::default()).await.unwrap();
    ordered_timeout_closes_channel(&setup).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn racing_relayers() {
    logging::setup_logging();
    let setup = setup_counter_link(Ordering::Unordered, LinkConfig::default()).await.unwrap();
    racing_relayers_deliver_once(&setup).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn sequential_racing_relayers() {
    logging::setup_logging();
    let config = LinkConfig { parallel_unordered: false, ..Default::default() };
    let setup = setup_counter_link(Ordering::Unordered, config).await.unwrap();
    racing_relayers_deliver_once(&setup).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn failures() {
    logging::setup_logging();
    let setup = setup_counter_link(Ordering::Unordered, LinkConfig::default()).await.unwrap();
    unreachable_chain_aborts_pass(&setup).await.unwrap();
    stale_proofs_are_refreshed(&setup).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn split_ack_batch() {
    logging::setup_logging();
    let setup = setup_counter_link(Ordering::Unordered, LinkConfig::default()).await.unwrap();
    split_ack_batch_keeps_landed_acks(&setup).await.unwrap();
}
