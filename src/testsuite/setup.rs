use crate::core::{
    config::LinkConfig,
    handshake::{state::Side, Channel},
    link::Link,
};
use crate::mock::{counter::COUNTER_VERSION, MockChain, MockChainConfig};
use ibc_relayer_types::core::ics04_channel::channel::Ordering;

/// Two linked chains with a counter contract on each and a channel between the counters.
pub struct CounterLink {
    pub link: Link<MockChain, MockChain>,
    /// Counter channel, `src` on A
    pub channel: Channel,
    pub counter_a: String,
    pub counter_b: String,
}

impl CounterLink {
    pub fn chain_a(&self) -> &MockChain {
        &self.link.a
    }

    pub fn chain_b(&self) -> &MockChain {
        &self.link.b
    }
}

pub fn setup_chains() -> Result<(MockChain, MockChain), anyhow::Error> {
    log::info!(target: "hyperspace-link", "============================== Starting Test ==============================");
    let chain_a = MockChain::new(MockChainConfig::new("wasmd"))?;
    let chain_b = MockChain::new(MockChainConfig::new("osmosis"))?;
    Ok((chain_a, chain_b))
}

/// Deploys a counter on each chain, opens a connection and lets A open a counter channel
/// with `ordering`.
pub async fn setup_counter_link(
    ordering: Ordering,
    config: LinkConfig,
) -> Result<CounterLink, anyhow::Error> {
    let (chain_a, chain_b) = setup_chains()?;
    let counter_a = chain_a.instantiate_counter(0).await;
    let counter_b = chain_b.instantiate_counter(0).await;

    let link = Link::create_with_new_connections(chain_a, chain_b, config).await?;
    let channel = link
        .create_channel(
            Side::A,
            MockChain::counter_port(&counter_a)?,
            MockChain::counter_port(&counter_b)?,
            ordering,
            COUNTER_VERSION,
        )
        .await?;
    log::info!(
        target: "hyperspace-link",
        "Counter channel {} on {} <> {} on {}",
        channel.src.channel_id,
        link.a.name,
        channel.dest.channel_id,
        link.b.name
    );

    Ok(CounterLink { link, channel, counter_a, counter_b })
}
