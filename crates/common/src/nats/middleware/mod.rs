mod stats;
mod types;

pub use stats::*;
pub use types::*;
