//! The heartbeat command's arguments.

use std::{io, path::PathBuf};

use clap::{Args, ValueEnum};
use jiff::Timestamp;

use crate::config::Context;
use crate::exitcode;
use crate::heartbeat::{self, Params, parse_extra_heartbeats};
use crate::model::{Category, EntityType};
use crate::offline::sync;
use crate::supervisor::{CommandError, CommandResult, Supervisor};

#[derive(Debug, Args)]
pub struct HeartbeatArgs {
    /// File path, app name, or domain the activity happened in.
    #[arg(long)]
    entity: String,

    #[arg(long, value_enum, default_value_t = EntityTypeArg::File)]
    entity_type: EntityTypeArg,

    #[arg(long, value_enum, default_value_t = CategoryArg::Coding)]
    category: CategoryArg,

    /// Unix time in seconds. Defaults to now.
    #[arg(long)]
    time: Option<f64>,

    /// The file was saved.
    #[arg(long)]
    write: bool,

    #[arg(long)]
    lineno: Option<u32>,

    #[arg(long)]
    cursorpos: Option<u32>,

    /// Total lines in the file, when the editor already knows.
    #[arg(long)]
    lines_in_file: Option<u32>,

    #[arg(long)]
    language: Option<String>,

    /// Project name, overriding detection.
    #[arg(long)]
    project: Option<String>,

    /// Project name to use when detection finds nothing.
    #[arg(long)]
    alternate_project: Option<String>,

    /// Local copy of a remote entity, read for stats.
    #[arg(long)]
    local_file: Option<PathBuf>,

    /// Read a JSON array of additional heartbeats from stdin.
    #[arg(long)]
    extra_heartbeats: bool,
}

/// CLI-facing entity type, mapped to the domain `EntityType`.
#[derive(Debug, Clone, ValueEnum)]
enum EntityTypeArg {
    File,
    App,
    Domain,
}

impl EntityTypeArg {
    fn to_domain(&self) -> EntityType {
        match self {
            Self::File => EntityType::File,
            Self::App => EntityType::App,
            Self::Domain => EntityType::Domain,
        }
    }
}

/// CLI-facing category, mapped to the domain `Category`.
#[derive(Debug, Clone, ValueEnum)]
enum CategoryArg {
    Coding,
    Building,
    Debugging,
    CodeReviewing,
    Learning,
    Meeting,
    Planning,
    Researching,
    RunningTests,
    WritingDocs,
    WritingTests,
}

impl CategoryArg {
    fn to_domain(&self) -> Category {
        match self {
            Self::Coding => Category::Coding,
            Self::Building => Category::Building,
            Self::Debugging => Category::Debugging,
            Self::CodeReviewing => Category::CodeReviewing,
            Self::Learning => Category::Learning,
            Self::Meeting => Category::Meeting,
            Self::Planning => Category::Planning,
            Self::Researching => Category::Researching,
            Self::RunningTests => Category::RunningTests,
            Self::WritingDocs => Category::WritingDocs,
            Self::WritingTests => Category::WritingTests,
        }
    }
}

impl HeartbeatArgs {
    /// Builds heartbeat params. `stdin` is read only with `--extra-heartbeats`.
    fn into_params(
        self,
        plugin: Option<String>,
        stdin: impl FnOnce() -> io::Result<String>,
    ) -> Result<Params, CommandError> {
        let extra = if self.extra_heartbeats {
            let input = stdin().map_err(|e| {
                CommandError::new(exitcode::ERR_GENERIC, format!("failed to read stdin: {e}"))
            })?;
            parse_extra_heartbeats(&input).map_err(|e| {
                CommandError::new(
                    exitcode::ERR_GENERIC,
                    format!("failed to parse extra heartbeats: {e}"),
                )
            })?
        } else {
            Vec::new()
        };

        Ok(Params {
            entity: self.entity,
            entity_type: self.entity_type.to_domain(),
            category: self.category.to_domain(),
            time: self
                .time
                .unwrap_or_else(|| Timestamp::now().as_duration().as_secs_f64()),
            is_write: self.write.then_some(true),
            lineno: self.lineno,
            cursorpos: self.cursorpos,
            lines_in_file: self.lines_in_file,
            language: self.language,
            project: self.project,
            alternate_project: self.alternate_project,
            local_file: self.local_file,
            plugin,
            extra,
        })
    }
}

fn read_stdin() -> io::Result<String> {
    io::read_to_string(io::stdin())
}

/// Sends the heartbeat, then syncs the offline queue if that succeeded.
pub(super) fn cmd_heartbeat(supervisor: &Supervisor<'_>, ctx: &Context, args: HeartbeatArgs) -> i32 {
    supervisor.run_with_offline_sync(
        || {
            let params = args.into_params(ctx.plugin.clone(), read_stdin)?;
            heartbeat::run(ctx, &params)
        },
        || sync::run(ctx, None),
    )
}

/// Saves the heartbeat offline, then exits with `config_code` for the
/// config file that could not be loaded.
pub(super) fn cmd_save_only(
    supervisor: &Supervisor<'_>,
    ctx: &Context,
    args: HeartbeatArgs,
    config_code: i32,
) -> i32 {
    let code = supervisor.run(|| -> CommandResult {
        let params = args.into_params(ctx.plugin.clone(), read_stdin)?;
        heartbeat::run_without_sending(ctx, &params)
    });
    if code == exitcode::SUCCESS {
        config_code
    } else {
        code
    }
}
