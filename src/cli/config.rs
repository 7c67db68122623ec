//! Config read/write subcommands.

use std::{collections::BTreeMap, fmt, fs, io};

use clap::Subcommand;

use crate::config::{Config, ConfigStore, Context, TomlStore};
use crate::exitcode;
use crate::supervisor::{CommandError, CommandResult};

/// Section holding backoff state, stored in the internal config file.
const INTERNAL_SECTION: &str = "internal";

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print one config value.
    Read {
        key: String,

        #[arg(long, default_value = "settings")]
        section: String,
    },

    /// Set config values, given as `key=value`.
    Write {
        #[arg(required = true, value_parser = parse_pair)]
        pairs: Vec<(String, String)>,

        #[arg(long, default_value = "settings")]
        section: String,
    },
}

pub(super) fn cmd_config(ctx: &Context, command: &ConfigCommand) -> CommandResult {
    match command {
        ConfigCommand::Read { key, section } => {
            let value = store_for(ctx, section).read(section, key).ok_or_else(|| {
                CommandError::new(
                    exitcode::ERR_CONFIG_FILE_READ,
                    format!("{section}.{key} is not set"),
                )
            })?;
            println!("{value}");
        }
        ConfigCommand::Write { pairs, section } => {
            let values: BTreeMap<String, String> = pairs.iter().cloned().collect();
            if section == INTERNAL_SECTION {
                store_for(ctx, section)
                    .write(section, &values)
                    .map_err(write_error)?;
            } else {
                write_user_config(ctx, section, &values)?;
            }
        }
    }
    Ok(exitcode::SUCCESS)
}

/// Writes to the user config and keeps it loadable: if the result no
/// longer parses as settings, the previous file is put back.
fn write_user_config(
    ctx: &Context,
    section: &str,
    values: &BTreeMap<String, String>,
) -> Result<(), CommandError> {
    let path = &ctx.paths.config;

    let previous = match fs::read_to_string(path) {
        Ok(contents) => Some(contents),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(write_error(e)),
    };

    TomlStore::new(path)
        .write(section, values)
        .map_err(write_error)?;

    if let Err(e) = Config::load(path) {
        let restored = match &previous {
            Some(contents) => fs::write(path, contents),
            None => fs::remove_file(path),
        };
        if let Err(re) = restored {
            tracing::error!("failed to restore {}: {re}", path.display());
        }
        return Err(write_error(format!("refusing to write invalid setting: {e}")));
    }
    Ok(())
}

fn write_error(e: impl fmt::Display) -> CommandError {
    CommandError::new(exitcode::ERR_CONFIG_FILE_WRITE, e)
}

/// The `internal` section lives in its own file; everything else in the
/// user config.
fn store_for(ctx: &Context, section: &str) -> TomlStore {
    if section == INTERNAL_SECTION {
        TomlStore::new(&ctx.paths.internal_config)
    } else {
        TomlStore::new(&ctx.paths.config)
    }
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected key=value, got {raw:?}")),
    }
}
