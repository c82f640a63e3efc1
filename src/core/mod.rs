pub mod config;
pub mod error;
pub mod events;
pub mod handshake;
pub mod link;
pub mod logging;
pub mod msgs;
pub mod packets;
pub mod queue;
pub mod relay;
pub mod summary;

pub use crate::primitives;
