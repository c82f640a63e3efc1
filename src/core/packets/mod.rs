pub mod tracker;
pub mod types;
pub mod utils;
