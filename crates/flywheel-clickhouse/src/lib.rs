mod conversions;
mod models;
mod telemetry_repository;

pub use models::*;
pub use telemetry_repository::*;
