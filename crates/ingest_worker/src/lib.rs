pub mod ingest_worker;
pub mod nats;

pub use ingest_worker::*;
pub use nats::*;
