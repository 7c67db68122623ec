mod api;
mod backoff;
mod cli;
mod config;
mod diagnostic;
mod exitcode;
mod heartbeat;
mod logging;
mod model;
mod offline;
mod pipeline;
mod stage;
mod supervisor;

use std::process;

use clap::Parser;

fn main() {
    process::exit(cli::run(cli::Cli::parse()));
}
