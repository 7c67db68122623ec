//! Core data model for Cadence.
//!
//! Heartbeats flow through the pipeline; results flow back.

mod heartbeat;
mod result;

pub use heartbeat::{Category, EntityType, Heartbeat, user_agent};
pub use result::{HeartbeatResult, ResultStatus};
