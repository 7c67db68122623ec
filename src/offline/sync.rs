//! Sending queued heartbeats.

use std::rc::Rc;

use tracing::{debug, error, info, warn};

use crate::api::ApiClient;
use crate::backoff::BackoffGate;
use crate::config::{ConfigStore, Context, TomlStore};
use crate::exitcode;
use crate::heartbeat::{self, SEND_LIMIT};
use crate::model::{Heartbeat, ResultStatus, user_agent};
use crate::pipeline::{self, Pipeline};
use crate::supervisor::{CommandError, CommandResult};

use super::Queue;

/// What one sync pass did with the heartbeats it popped.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub accepted: usize,
    pub rejected: usize,
    pub requeued: usize,
}

/// `offline sync`: sends up to `max` queued heartbeats (default `sync_max`).
pub fn run(ctx: &Context, max: Option<usize>) -> CommandResult {
    let settings = ctx.settings();
    if settings.offline_disabled() {
        debug!("offline queue disabled, nothing to sync");
        return Ok(exitcode::SUCCESS);
    }

    let max = max.unwrap_or(settings.sync_max);
    if max == 0 {
        debug!("offline sync disabled by sync_max = 0");
        return Ok(exitcode::SUCCESS);
    }

    let queue = Queue::open(&ctx.queue_path())
        .map_err(|e| CommandError::new(exitcode::ERR_GENERIC, format!("failed to open offline queue: {e}")))?;
    if queue.count().unwrap_or_default() == 0 {
        debug!("no queued heartbeats");
        return Ok(exitcode::SUCCESS);
    }

    let client = ApiClient::new(settings, user_agent(ctx.plugin.as_deref()))
        .map_err(|e| heartbeat::client_error(&e))?;
    let store: Rc<dyn ConfigStore> = Rc::new(TomlStore::new(ctx.paths.internal_config.clone()));
    let pipeline = Pipeline::new(client).with(BackoffGate::new(store));

    match sync(&queue, &pipeline, max) {
        Ok(summary) => {
            info!(
                "synced offline heartbeats: {} accepted, {} rejected, {} requeued",
                summary.accepted, summary.rejected, summary.requeued
            );
            Ok(exitcode::SUCCESS)
        }
        Err(e) => heartbeat::failure(e),
    }
}

/// `offline count`: prints the number of queued heartbeats.
pub fn count(ctx: &Context) -> CommandResult {
    let queue = Queue::open(&ctx.queue_path())
        .map_err(|e| CommandError::new(exitcode::ERR_GENERIC, format!("failed to open offline queue: {e}")))?;
    let n = queue
        .count()
        .map_err(|e| CommandError::new(exitcode::ERR_GENERIC, e))?;
    println!("{n}");
    Ok(exitcode::SUCCESS)
}

/// Pops up to `max` heartbeats in batches of [`SEND_LIMIT`] and pushes them
/// through `pipeline`.
///
/// The pass is bounded by the queue size at the start, so heartbeats that
/// get requeued are not retried within the same pass. A failed batch is
/// requeued whole and ends the pass.
pub fn sync(queue: &Queue, pipeline: &Pipeline<'_>, max: usize) -> pipeline::Result<SyncSummary> {
    let total = queue.count()?.min(max);
    let mut summary = SyncSummary::default();
    let mut popped = 0;

    while popped < total {
        let batch = queue.pop_many((total - popped).min(SEND_LIMIT))?;
        if batch.is_empty() {
            break;
        }
        popped += batch.len();

        let results = match pipeline.handle(batch.clone()) {
            Ok(results) => results,
            Err(e) => {
                if let Err(qe) = queue.push_many(&batch) {
                    error!(
                        "failed to requeue {} heartbeat(s) after send error: {qe}",
                        batch.len()
                    );
                }
                return Err(e);
            }
        };

        let mut retry: Vec<Heartbeat> = Vec::new();
        for (h, result) in batch.into_iter().zip(&results) {
            match result.status {
                ResultStatus::Accepted => summary.accepted += 1,
                ResultStatus::Rejected => {
                    warn!(
                        "dropping rejected heartbeat for {}: {}",
                        h.entity,
                        result.message.as_deref().unwrap_or("no reason given")
                    );
                    summary.rejected += 1;
                }
                ResultStatus::Error => retry.push(h),
            }
        }
        if !retry.is_empty() {
            summary.requeued += queue.push_many(&retry)?;
        }
    }

    Ok(summary)
}
