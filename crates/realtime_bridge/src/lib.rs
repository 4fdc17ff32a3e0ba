pub mod bridge;
pub mod fanout;
pub mod protocol;
pub mod registry;
pub mod server;

pub use bridge::*;
pub use fanout::*;
pub use protocol::*;
pub use registry::*;
