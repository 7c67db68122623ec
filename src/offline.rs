//! Offline persistence.
//!
//! Heartbeats that cannot be delivered are written to a local SQLite
//! queue and sent later by `offline sync`. Two entry points write to it:
//!
//! - [`QueueFallback`], a stage on the online path that queues whatever
//!   the sender could not deliver.
//! - [`save_heartbeats`], which runs the enrichment stages and ends in an
//!   [`OfflineSink`] instead of the network.

pub mod queue;
pub mod sync;

use tracing::{debug, error, warn};

use crate::config::Context;
use crate::heartbeat::{self, Params};
use crate::model::{Heartbeat, HeartbeatResult, ResultStatus};
use crate::pipeline::{self, Next, Pipeline, Sender, Stage};
use crate::stage;

pub use queue::{Queue, QueueError};

/// Errors from saving heartbeats offline.
#[derive(Debug, thiserror::Error)]
pub enum OfflineError {
    #[error("saving to offline queue disabled")]
    Disabled,

    #[error("failed saving heartbeats because unable to init offline queue: {0}")]
    Init(#[source] QueueError),
}

/// Terminal sender that writes every heartbeat to the queue.
///
/// Each heartbeat gets `Accepted` if it was queued and `Error` otherwise.
pub struct OfflineSink {
    queue: Queue,
}

impl OfflineSink {
    pub fn new(queue: Queue) -> Self {
        Self { queue }
    }
}

impl Sender for OfflineSink {
    fn send(&self, heartbeats: Vec<Heartbeat>) -> pipeline::Result<Vec<HeartbeatResult>> {
        debug!("saving {} heartbeat(s) to offline queue", heartbeats.len());
        Ok(heartbeats
            .iter()
            .map(|h| match self.queue.push(h) {
                Ok(()) => HeartbeatResult::accepted(),
                Err(e) => {
                    warn!("failed to queue heartbeat for {}: {e}", h.entity);
                    HeartbeatResult::error(e.to_string())
                }
            })
            .collect())
    }
}

/// Queues heartbeats the rest of the chain failed to deliver.
///
/// On error the whole batch is queued and the error is passed on. On
/// success, entries whose result is retryable are queued again.
pub struct QueueFallback {
    queue: Queue,
}

impl QueueFallback {
    pub fn new(queue: Queue) -> Self {
        Self { queue }
    }
}

impl Stage for QueueFallback {
    fn process(
        &self,
        heartbeats: Vec<Heartbeat>,
        next: Next<'_>,
    ) -> pipeline::Result<Vec<HeartbeatResult>> {
        let results = match next.run(heartbeats.clone()) {
            Ok(results) => results,
            Err(e) => {
                debug!("pushing {} heartbeat(s) to offline queue after error", heartbeats.len());
                if let Err(qe) = self.queue.push_many(&heartbeats) {
                    error!("failed to push heartbeats to offline queue: {qe}");
                }
                return Err(e);
            }
        };

        if results.len() != heartbeats.len() {
            warn!(
                "got {} result(s) for {} heartbeat(s); not requeuing",
                results.len(),
                heartbeats.len()
            );
            return Ok(results);
        }

        let retry: Vec<Heartbeat> = heartbeats
            .into_iter()
            .zip(&results)
            .filter(|(_, r)| r.status == ResultStatus::Error)
            .map(|(h, _)| h)
            .collect();
        if !retry.is_empty() {
            debug!("requeuing {} heartbeat(s) with retryable errors", retry.len());
            if let Err(qe) = self.queue.push_many(&retry) {
                error!("failed to push heartbeats to offline queue: {qe}");
            }
        }

        Ok(results)
    }
}

/// Saves heartbeats to the offline queue without trying to send them.
///
/// When `heartbeats` is `None` the batch is built from `params`, exactly as
/// the online path builds it. Results from the queue are not inspected.
pub fn save_heartbeats(
    ctx: &Context,
    params: &Params,
    heartbeats: Option<Vec<Heartbeat>>,
) -> Result<(), OfflineError> {
    if ctx.settings().offline_disabled() {
        return Err(OfflineError::Disabled);
    }

    let heartbeats = heartbeats.unwrap_or_else(|| heartbeat::build_heartbeats(params));
    let queue = Queue::open(&ctx.queue_path()).map_err(OfflineError::Init)?;

    let pipeline = Pipeline::new(OfflineSink::new(queue)).with_all(stage::enrichment(ctx.settings()));
    match pipeline.handle(heartbeats) {
        Ok(results) => debug!("offline queue handled {} heartbeat(s)", results.len()),
        Err(e) => debug!("offline save ended early: {e}"),
    }
    Ok(())
}
