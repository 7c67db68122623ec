//! The `heartbeat` command: assemble a batch, enrich it, deliver it.

use std::{path::PathBuf, rc::Rc};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError};
use crate::backoff::BackoffGate;
use crate::config::{ConfigStore, Context, TomlStore};
use crate::exitcode;
use crate::model::{Category, EntityType, Heartbeat, HeartbeatResult, ResultStatus, user_agent};
use crate::offline::{self, Queue, QueueFallback};
use crate::pipeline::{self, Pipeline};
use crate::stage;
use crate::supervisor::{CommandError, CommandResult};

/// Most heartbeats sent in one request. The rest wait in the offline queue.
pub const SEND_LIMIT: usize = 25;

/// Everything needed to assemble a batch.
#[derive(Debug, Clone, Default)]
pub struct Params {
    pub entity: String,
    pub entity_type: EntityType,
    pub category: Category,
    /// Unix seconds.
    pub time: f64,
    pub is_write: Option<bool>,
    pub lineno: Option<u32>,
    pub cursorpos: Option<u32>,
    pub lines_in_file: Option<u32>,
    pub language: Option<String>,
    pub project: Option<String>,
    pub alternate_project: Option<String>,
    pub local_file: Option<PathBuf>,
    pub plugin: Option<String>,
    pub extra: Vec<ExtraHeartbeat>,
}

/// A heartbeat supplied on stdin alongside the primary one.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtraHeartbeat {
    pub entity: String,
    #[serde(rename = "type", default)]
    pub entity_type: EntityType,
    #[serde(default)]
    pub category: Category,
    pub time: f64,
    #[serde(default)]
    pub is_write: Option<bool>,
    #[serde(default)]
    pub lineno: Option<u32>,
    #[serde(default)]
    pub cursorpos: Option<u32>,
    #[serde(default)]
    pub lines: Option<u32>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub alternate_project: Option<String>,
    #[serde(default)]
    pub local_file: Option<PathBuf>,
}

/// Parses the JSON array of extra heartbeats read from stdin.
pub fn parse_extra_heartbeats(input: &str) -> Result<Vec<ExtraHeartbeat>, serde_json::Error> {
    if input.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(input)
}

/// Assembles the batch: the primary heartbeat first, then the extras.
///
/// This is the only place a batch is built, for sending and for saving.
pub fn build_heartbeats(params: &Params) -> Vec<Heartbeat> {
    let agent = user_agent(params.plugin.as_deref());

    let primary = Heartbeat {
        category: params.category,
        is_write: params.is_write,
        lineno: params.lineno,
        cursorpos: params.cursorpos,
        lines: params.lines_in_file,
        language: params.language.clone(),
        project: params.project.clone(),
        user_agent: agent.clone(),
        local_file: params.local_file.clone(),
        project_alternate: params.alternate_project.clone(),
        ..Heartbeat::new(params.entity.clone(), params.entity_type, params.time)
    };

    if !params.extra.is_empty() {
        debug!("include {} extra heartbeat(s) from stdin", params.extra.len());
    }

    std::iter::once(primary)
        .chain(params.extra.iter().map(|e| Heartbeat {
            category: e.category,
            is_write: e.is_write,
            lineno: e.lineno,
            cursorpos: e.cursorpos,
            lines: e.lines,
            language: e.language.clone(),
            project: e.project.clone(),
            user_agent: agent.clone(),
            local_file: e.local_file.clone(),
            project_alternate: e.alternate_project.clone(),
            ..Heartbeat::new(e.entity.clone(), e.entity_type, e.time)
        }))
        .collect()
}

/// Sends the batch, saving any surplus beyond [`SEND_LIMIT`] offline.
pub fn run(ctx: &Context, params: &Params) -> CommandResult {
    let mut heartbeats = build_heartbeats(params);

    if heartbeats.len() > SEND_LIMIT {
        let surplus = heartbeats.split_off(SEND_LIMIT);
        debug!("save {} surplus heartbeat(s) to offline queue", surplus.len());
        if let Err(e) = offline::save_heartbeats(ctx, params, Some(surplus)) {
            warn!("failed to save surplus heartbeats: {e}");
        }
    }

    send(ctx, params, heartbeats)
}

/// Saves the batch offline without attempting delivery.
pub fn run_without_sending(ctx: &Context, params: &Params) -> CommandResult {
    offline::save_heartbeats(ctx, params, None)
        .map(|()| exitcode::SUCCESS)
        .map_err(|e| CommandError::new(exitcode::ERR_GENERIC, e))
}

fn send(ctx: &Context, params: &Params, heartbeats: Vec<Heartbeat>) -> CommandResult {
    let settings = ctx.settings();

    let client = match ApiClient::new(settings, user_agent(params.plugin.as_deref())) {
        Ok(client) => client,
        Err(e) => {
            if let Err(oe) = offline::save_heartbeats(ctx, params, Some(heartbeats)) {
                warn!("failed to save heartbeats offline: {oe}");
            }
            return Err(client_error(&e));
        }
    };

    let mut pipeline = Pipeline::new(client).with_all(stage::enrichment(settings));
    if !settings.offline_disabled() {
        match Queue::open(&ctx.queue_path()) {
            Ok(queue) => pipeline = pipeline.with(QueueFallback::new(queue)),
            Err(e) => warn!("offline queue unavailable: {e}"),
        }
    }
    let store: Rc<dyn ConfigStore> = Rc::new(TomlStore::new(ctx.paths.internal_config.clone()));
    let pipeline = pipeline.with(BackoffGate::new(store));

    match pipeline.handle(heartbeats) {
        Ok(results) => {
            log_results(&results);
            Ok(exitcode::SUCCESS)
        }
        Err(e) => failure(e),
    }
}

fn log_results(results: &[HeartbeatResult]) {
    let accepted = results
        .iter()
        .filter(|r| r.status == ResultStatus::Accepted)
        .count();
    for r in results.iter().filter(|r| r.status != ResultStatus::Accepted) {
        warn!(
            "heartbeat not accepted ({:?}): {}",
            r.status,
            r.message.as_deref().unwrap_or("no reason given")
        );
    }
    info!("sent {accepted} of {} heartbeat(s)", results.len());
}

/// Maps a chain failure to the command's result.
///
/// Backoff is an expected state, not a failure worth diagnostics.
pub fn failure(err: pipeline::Error) -> CommandResult {
    if matches!(err, pipeline::Error::Backoff) {
        warn!("{err}");
        return Ok(exitcode::ERR_BACKOFF);
    }
    if err.is_auth() {
        return Err(CommandError::new(
            exitcode::ERR_AUTH,
            format!("failed to send heartbeat(s) due to auth error: {err}"),
        ));
    }
    Err(CommandError::new(
        exitcode::ERR_API,
        format!("failed to send heartbeat(s): {err}"),
    ))
}

/// Maps a client construction failure to the command's error.
pub fn client_error(err: &ApiError) -> CommandError {
    let code = match err {
        ApiError::Auth(_) => exitcode::ERR_AUTH,
        _ => exitcode::ERR_GENERIC,
    };
    CommandError::new(code, format!("failed to initialize api client: {err}"))
}
