// Current entity states and session metrics

mod engine;
mod entity;
pub mod metrics;

pub use engine::{StateEngine, StateReader};
pub use entity::{
    value_to_string, EntityState, STATE_OFF, STATE_ON, STATE_UNAVAILABLE, STATE_UNKNOWN,
};
pub use metrics::{MetricsSnapshot, MetricsTracker};

#[cfg(test)]
mod tests;
