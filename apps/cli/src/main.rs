//! pipetrack CLI: observe and control company-data pipeline sessions.
//!
//! Lists sessions, shows one session's stages and errors, follows a running
//! session live, and sends lifecycle commands to the job-control backend.

mod commands;
mod render;

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
