//! An in-process chain hosting an IBC module and counter contracts, used to exercise the relayer
//! without running nodes.

pub mod chain;
pub mod client;
pub mod counter;
pub mod ibc;
pub mod light_client;
pub mod provider;
pub mod store;
pub mod test_provider;

pub use client::{MockChain, MockChainConfig};
