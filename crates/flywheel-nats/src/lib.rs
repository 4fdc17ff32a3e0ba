mod control_producer;
mod dead_letter_sink;
mod metrics_sink;

pub use control_producer::*;
pub use dead_letter_sink::*;
pub use metrics_sink::*;
