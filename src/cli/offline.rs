//! Offline queue subcommands.

use clap::Subcommand;

use crate::config::Context;
use crate::offline::sync;
use crate::supervisor::Supervisor;

#[derive(Debug, Subcommand)]
pub enum OfflineCommand {
    /// Send queued heartbeats to the API.
    Sync {
        /// Most heartbeats to send. Defaults to the `sync_max` setting.
        #[arg(long)]
        max: Option<usize>,
    },

    /// Print the number of queued heartbeats.
    Count,
}

pub(super) fn cmd_offline(supervisor: &Supervisor<'_>, ctx: &Context, command: OfflineCommand) -> i32 {
    match command {
        OfflineCommand::Sync { max } => supervisor.run(|| sync::run(ctx, max)),
        OfflineCommand::Count => supervisor.run(|| sync::count(ctx)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Harness {
        #[command(subcommand)]
        command: OfflineCommand,
    }

    #[test]
    fn sync_max_is_optional() {
        let plain = Harness::try_parse_from(["offline", "sync"]).unwrap();
        let capped = Harness::try_parse_from(["offline", "sync", "--max", "50"]).unwrap();

        assert!(matches!(plain.command, OfflineCommand::Sync { max: None }));
        assert!(matches!(capped.command, OfflineCommand::Sync { max: Some(50) }));
    }
}
