mod reading_consumer_service;

pub use reading_consumer_service::*;
