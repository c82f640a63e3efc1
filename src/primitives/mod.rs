pub mod funcs;
pub mod traits;

pub use traits::*;
