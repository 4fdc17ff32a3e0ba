mod client;
mod middleware;
mod partitioned;
mod traits;

pub use client::*;
pub use middleware::*;
pub use partitioned::*;
pub use traits::*;
