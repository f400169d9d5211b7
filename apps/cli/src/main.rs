//! MediaLens CLI: incremental processing of daily news-site snapshots.
//!
//! Runs pipeline steps over stored jobs and weekly windows, and exposes the
//! operator actions (status, stop, cursor reset and rewind, audit).

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
