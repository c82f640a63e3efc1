use hyperspace_link::core::{config::LinkConfig, logging};
use ibc_relayer_types::core::ics04_channel::channel::Ordering;
use hyperspace_link::testsuite::{
    setup::setup_counter_link,
    tests::{
        channel_order_mismatch_resumes, channel_version_mismatch, connection_handshake_resumes,
        connection_version_mismatch,
    },
};

#[tokio::test(flavor = "multi_thread")]
async fn connection_handshake() {
    logging::setup_logging();
    connection_version_mismatch().await.unwrap();
    connection_handshake_resumes().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn channel_handshake() {
    logging::setup_logging();
    let setup = setup_counter_link(Ordering::Unordered, LinkConfig::default()).await.unwrap();
    channel_version_mismatch(&setup).await.unwrap();
    channel_order_mismatch_resumes(&setup).await.unwrap();
}
