pub mod clickhouse;
pub mod job;
pub mod nats;
pub mod telemetry;

pub use clickhouse::*;
pub use job::*;
pub use nats::*;
