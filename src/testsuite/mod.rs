//! Relayer scenarios over two mock chains running the counter contract.

pub mod create;
pub mod setup;
pub mod tests;
