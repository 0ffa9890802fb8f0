//! The `apirun` binary's library half: argument parsing, command dispatch,
//! the stage orchestrator, logging and pretty-printing.

pub mod cli;
pub mod commands;
pub mod logging;
pub mod pretty;
pub mod stages;

use apirun_core::Result;
use clap::Parser;
use cli::{Cli, Command};

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match &cli.command {
        Command::Up(args) => commands::up::run(args).await,
        Command::Down(args) => commands::down::run(args).await,
        Command::Status(args) => commands::status::run(args).await,
        Command::Create(args) => commands::create::run(args).await,
        Command::Validate(args) => commands::validate::run(args).await,
        Command::Stages(args) => commands::stages::run(args).await,
    }
}
