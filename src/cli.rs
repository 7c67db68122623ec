//! CLI interface for Cadence.
//!
//! Editor plugins call `cadence heartbeat ...` on every save or cursor move.
//! Every command except `useragent` runs under the [`Supervisor`], which
//! owns the exit code.
//!
//! Exit codes are listed in [`crate::exitcode`].

mod config;
mod heartbeat;
mod offline;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::error;

use crate::config::{Config, ConfigError, Context, Paths};
use crate::diagnostic::ApiDiagnostics;
use crate::exitcode;
use crate::logging::{self, LogSink};
use crate::model::user_agent;
use crate::supervisor::{CommandResult, Supervisor};

use config::ConfigCommand;
use heartbeat::HeartbeatArgs;
use offline::OfflineCommand;

/// Cadence: track coding activity from your editor.
#[derive(Debug, Parser)]
#[command(name = "cadence", version, after_long_help = USAGE_HELP)]
pub struct Cli {
    /// User config file. Defaults to `~/.cadence.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Internal state file. Defaults to `~/.cadence/internal.toml`.
    #[arg(long, global = true)]
    internal_config: Option<PathBuf>,

    /// Offline queue database. Defaults to `~/.cadence/offline.sqlite`.
    #[arg(long, global = true)]
    offline_queue_file: Option<PathBuf>,

    /// Log file. Defaults to `~/.cadence/cadence.log`.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Log to stdout instead of the log file.
    #[arg(long, global = true)]
    log_to_stdout: bool,

    /// Debug logging. Also suppresses most diagnostics uploads.
    #[arg(long, global = true)]
    verbose: bool,

    /// Calling plugin, as `<editor>/<version> <plugin>/<version>`.
    #[arg(long, global = true)]
    plugin: Option<String>,

    #[command(subcommand)]
    command: Command,
}

const USAGE_HELP: &str = r#"Examples:
  cadence heartbeat --entity src/main.rs --write --lineno 42
  echo '[{"entity":"Slack","type":"app","time":1700000000}]' \
    | cadence heartbeat --entity src/main.rs --extra-heartbeats
  cadence offline count
  cadence offline sync --max 100
  cadence config write api_key=<key>"#;

#[derive(Debug, Subcommand)]
enum Command {
    /// Send a heartbeat, then sync anything queued offline.
    Heartbeat(HeartbeatArgs),

    /// Inspect or flush the offline queue.
    Offline {
        #[command(subcommand)]
        command: OfflineCommand,
    },

    /// Read or write config values.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Print the version.
    Version,

    /// Print the user agent sent with heartbeats.
    Useragent,
}

/// Runs the CLI and returns the process exit code.
pub fn run(cli: Cli) -> i32 {
    if let Command::Useragent = cli.command {
        println!("{}", user_agent(cli.plugin.as_deref()));
        return exitcode::SUCCESS;
    }

    match Paths::resolve() {
        Ok(paths) => run_with(cli, paths),
        Err(e) => {
            eprintln!("{e}");
            exitcode::ERR_GENERIC
        }
    }
}

/// Runs a command against `paths`, after applying the path flags.
fn run_with(cli: Cli, mut paths: Paths) -> i32 {
    if let Some(p) = &cli.config {
        paths.config.clone_from(p);
    }
    if let Some(p) = &cli.internal_config {
        paths.internal_config.clone_from(p);
    }

    let (mut config, load_error) = match Config::load(&paths.config) {
        Ok(c) => (c, None),
        Err(e @ ConfigError::Parse { .. }) => {
            (Config::default(), Some((e, exitcode::ERR_CONFIG_FILE_PARSE)))
        }
        Err(e) => (Config::default(), Some((e, exitcode::ERR_CONFIG_FILE_READ))),
    };
    if let Some(queue) = cli.offline_queue_file {
        config.settings.offline_queue_file = Some(queue);
    }

    let verbose = cli.verbose || config.settings.debug;
    let sink = log_sink(cli.log_to_stdout, cli.log_file.or(config.settings.log_file.clone()), &paths);
    logging::init(verbose, sink.clone());

    let ctx = Context {
        config,
        paths,
        plugin: cli.plugin,
    };
    let diagnostics = ApiDiagnostics::new(ctx.settings().clone(), ctx.plugin.clone());
    let supervisor = Supervisor::new(verbose, sink, &diagnostics);

    if let Some((e, code)) = load_error {
        error!("{e}");
        return match cli.command {
            Command::Heartbeat(args) => heartbeat::cmd_save_only(&supervisor, &ctx, args, code),
            Command::Version => supervisor.run(print_version),
            _ => code,
        };
    }

    match cli.command {
        Command::Heartbeat(args) => heartbeat::cmd_heartbeat(&supervisor, &ctx, args),
        Command::Offline { command } => offline::cmd_offline(&supervisor, &ctx, command),
        Command::Config { command } => supervisor.run(|| config::cmd_config(&ctx, &command)),
        Command::Version => supervisor.run(print_version),
        Command::Useragent => exitcode::SUCCESS,
    }
}

fn print_version() -> CommandResult {
    println!("{}", env!("CARGO_PKG_VERSION"));
    Ok(exitcode::SUCCESS)
}

/// The log destination: stdout if asked, else the log file, else stdout
/// when the file cannot be opened.
fn log_sink(to_stdout: bool, log_file: Option<PathBuf>, paths: &Paths) -> LogSink {
    if to_stdout {
        return LogSink::stdout();
    }
    let path = log_file.unwrap_or_else(|| paths.log_file.clone());
    LogSink::file(&path).unwrap_or_else(|e| {
        eprintln!("failed to open log file {}: {e}", path.display());
        LogSink::stdout()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use clap::CommandFactory;
    use tempfile::TempDir;

    use crate::offline::queue::Queue;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_apply_after_subcommand() {
        let cli = Cli::try_parse_from([
            "cadence",
            "offline",
            "count",
            "--verbose",
            "--config",
            "/tmp/c.toml",
            "--plugin",
            "vim/9.1 vim-cadence/1.2",
        ])
        .unwrap();

        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
        assert_eq!(cli.plugin.as_deref(), Some("vim/9.1 vim-cadence/1.2"));
        assert!(matches!(
            cli.command,
            Command::Offline {
                command: OfflineCommand::Count
            }
        ));
    }

    #[test]
    fn heartbeat_requires_entity() {
        assert!(Cli::try_parse_from(["cadence", "heartbeat"]).is_err());
        assert!(Cli::try_parse_from(["cadence", "heartbeat", "--entity", "a.rs"]).is_ok());
    }

    // ── Broken config ──

    /// Runs `heartbeat` for a real file with the user config at `config`.
    fn heartbeat_with_config(dir: &TempDir, config: &std::path::Path) -> i32 {
        let entity = dir.path().join("main.rs");
        fs::write(&entity, "fn main() {}\n").unwrap();
        let cli = Cli::try_parse_from([
            "cadence",
            "heartbeat",
            "--entity",
            entity.to_str().unwrap(),
            "--config",
            config.to_str().unwrap(),
            "--log-to-stdout",
        ])
        .unwrap();
        run_with(cli, Paths::under(dir.path()))
    }

    fn queued(dir: &TempDir) -> usize {
        Queue::open(&Paths::under(dir.path()).offline_queue)
            .unwrap()
            .count()
            .unwrap()
    }

    #[test]
    fn unparsable_config_saves_heartbeat_offline() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("broken.toml");
        fs::write(&config, "[settings\napi_key = ").unwrap();

        assert_eq!(heartbeat_with_config(&dir, &config), exitcode::ERR_CONFIG_FILE_PARSE);
        assert_eq!(queued(&dir), 1);
    }

    #[test]
    fn unreadable_config_saves_heartbeat_offline() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("config-dir");
        fs::create_dir(&config).unwrap();

        assert_eq!(heartbeat_with_config(&dir, &config), exitcode::ERR_CONFIG_FILE_READ);
        assert_eq!(queued(&dir), 1);
    }

    #[test]
    fn other_commands_exit_with_config_error() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("broken.toml");
        fs::write(&config, "not toml at all = = =").unwrap();
        let cli = Cli::try_parse_from([
            "cadence",
            "offline",
            "count",
            "--config",
            config.to_str().unwrap(),
            "--log-to-stdout",
        ])
        .unwrap();

        assert_eq!(run_with(cli, Paths::under(dir.path())), exitcode::ERR_CONFIG_FILE_PARSE);
    }

    #[test]
    fn version_runs_even_with_broken_config() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("broken.toml");
        fs::write(&config, "[settings").unwrap();
        let cli = Cli::try_parse_from([
            "cadence",
            "version",
            "--config",
            config.to_str().unwrap(),
            "--log-to-stdout",
        ])
        .unwrap();

        assert_eq!(run_with(cli, Paths::under(dir.path())), exitcode::SUCCESS);
    }
}
