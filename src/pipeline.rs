//! Heartbeat processing pipeline.
//!
//! A pipeline is a terminal [`Sender`] wrapped by an ordered list of
//! [`Stage`]s. Each stage receives the batch and a [`Next`] handle for the
//! rest of the chain, and may:
//!
//! - mutate the batch and delegate,
//! - drop entries before delegating (results for them are simply absent),
//! - abort by returning an error, which skips every later stage.
//!
//! Stages run strictly in construction order. The chain never retries.

use crate::api::ApiError;
use crate::model::{Heartbeat, HeartbeatResult};
use crate::offline::QueueError;

/// Reasons a batch can abort.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("won't send heartbeats due to backoff")]
    Backoff,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("offline queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("{0}")]
    Stage(String),
}

impl Error {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Api(ApiError::Auth(_)))
    }
}

pub type Result<T> = core::result::Result<T, Error>;

/// A decorating step in the pipeline.
pub trait Stage {
    /// Processes the batch, usually by calling `next.run(..)`.
    fn process(&self, heartbeats: Vec<Heartbeat>, next: Next<'_>) -> Result<Vec<HeartbeatResult>>;
}

/// The terminal step: consumes the batch.
///
/// Implementations must return exactly one result per heartbeat, in order,
/// or fail the whole batch.
pub trait Sender {
    fn send(&self, heartbeats: Vec<Heartbeat>) -> Result<Vec<HeartbeatResult>>;
}

impl<F> Sender for F
where
    F: Fn(Vec<Heartbeat>) -> Result<Vec<HeartbeatResult>>,
{
    fn send(&self, heartbeats: Vec<Heartbeat>) -> Result<Vec<HeartbeatResult>> {
        self(heartbeats)
    }
}

/// The remainder of the chain after the current stage.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Box<dyn Stage + 'a>],
    sender: &'a dyn Sender,
}

impl Next<'_> {
    /// Runs the remaining stages, then the sender.
    pub fn run(self, heartbeats: Vec<Heartbeat>) -> Result<Vec<HeartbeatResult>> {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.process(
                heartbeats,
                Next {
                    stages: rest,
                    sender: self.sender,
                },
            ),
            None => self.sender.send(heartbeats),
        }
    }
}

/// A sender composed with its stages.
pub struct Pipeline<'a> {
    stages: Vec<Box<dyn Stage + 'a>>,
    sender: Box<dyn Sender + 'a>,
}

impl<'a> Pipeline<'a> {
    /// Creates a pipeline with no stages.
    pub fn new(sender: impl Sender + 'a) -> Self {
        Self {
            stages: Vec::new(),
            sender: Box::new(sender),
        }
    }

    /// Appends a stage. Stages added first run first.
    #[must_use]
    pub fn with(mut self, stage: impl Stage + 'a) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Appends several stages, preserving their order.
    #[must_use]
    pub fn with_all(mut self, stages: impl IntoIterator<Item = Box<dyn Stage + 'a>>) -> Self {
        self.stages.extend(stages);
        self
    }

    /// Runs the whole chain over one batch.
    pub fn handle(&self, heartbeats: Vec<Heartbeat>) -> Result<Vec<HeartbeatResult>> {
        Next {
            stages: &self.stages,
            sender: self.sender.as_ref(),
        }
        .run(heartbeats)
    }
}
