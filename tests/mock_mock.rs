use hyperspace_link::core::{config::LinkConfig, logging};
use ibc_relayer_types::core::ics04_channel::channel::Ordering;
use hyperspace_link::testsuite::{
    setup::setup_counter_link,
    tests::{
        continuous_relay, counter_state_converges, ordered_packets_arrive_in_sequence,
        relay_is_idempotent, reset_is_acknowledged,
    },
};

#[tokio::test(flavor = "multi_thread")]
async fn mock_mock() {
    logging::setup_logging();
    let setup = setup_counter_link(Ordering::Unordered, LinkConfig::default()).await.unwrap();
    // Run tests sequentially
    relay_is_idempotent(&setup).await.unwrap();
    counter_state_converges(&setup).await.unwrap();
    reset_is_acknowledged(&setup).await.unwrap();
    relay_is_idempotent(&setup).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn mock_mock_ordered() {
    logging::setup_logging();
    let setup = setup_counter_link(Ordering::Ordered, LinkConfig::default()).await.unwrap();
    ordered_packets_arrive_in_sequence(&setup).await.unwrap();
    relay_is_idempotent(&setup).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn mock_mock_relay_loop() {
    logging::setup_logging();
    let config = LinkConfig { relay_interval_ms: 10, ..Default::default() };
    let setup = setup_counter_link(Ordering::Unordered, config).await.unwrap();
    continuous_relay(&setup).await.unwrap();
}
