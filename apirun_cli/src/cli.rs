//! Argument parsing. `clap`'s `env` feature gives every flag its automatic
//! `APIRUN_*` binding for free.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "apirun", about = "Versioned HTTP migrations for remote APIs", version)]
pub struct Cli {
    /// Increase logging verbosity; repeat for more (-v, -vv, ...).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply pending migrations.
    Up(UpArgs),
    /// Roll back applied migrations.
    Down(DownArgs),
    /// Print applied-version and run history.
    Status(StatusArgs),
    /// Scaffold a new migration file.
    Create(CreateArgs),
    /// Structurally validate migration files without running them.
    Validate(ValidateArgs),
    /// Operate on a stage file spanning multiple migration configs.
    Stages(StagesArgs),
}

#[derive(clap::Args, Debug)]
pub struct UpArgs {
    #[arg(long, env = "APIRUN_CONFIG", default_value = "apirun.yaml")]
    pub config: String,
    #[arg(long, env = "APIRUN_TO", default_value_t = 0)]
    pub to: u64,
    #[arg(long, env = "APIRUN_DRY_RUN")]
    pub dry_run: bool,
    #[arg(long, env = "APIRUN_DRY_RUN_FROM", default_value_t = 0)]
    pub dry_run_from: u64,
}

#[derive(clap::Args, Debug)]
pub struct DownArgs {
    #[arg(long, env = "APIRUN_CONFIG", default_value = "apirun.yaml")]
    pub config: String,
    #[arg(long, env = "APIRUN_TO", default_value_t = 0)]
    pub to: u64,
    #[arg(long, env = "APIRUN_DRY_RUN")]
    pub dry_run: bool,
    #[arg(long, env = "APIRUN_DRY_RUN_FROM", default_value_t = 0)]
    pub dry_run_from: u64,
}

#[derive(clap::Args, Debug)]
pub struct StatusArgs {
    #[arg(long, env = "APIRUN_CONFIG", default_value = "apirun.yaml")]
    pub config: String,
    #[arg(long)]
    pub history: bool,
    #[arg(long)]
    pub history_all: bool,
    #[arg(long, default_value_t = 20)]
    pub history_limit: u32,
}

#[derive(clap::Args, Debug)]
pub struct CreateArgs {
    /// Short, snake-ish name; the version prefix is generated.
    pub name: String,
    #[arg(long, env = "APIRUN_CONFIG", default_value = "apirun.yaml")]
    pub config: String,
}

#[derive(clap::Args, Debug)]
pub struct ValidateArgs {
    #[arg(long, env = "APIRUN_CONFIG", default_value = "apirun.yaml")]
    pub config: String,
}

#[derive(clap::Args, Debug)]
pub struct StagesArgs {
    #[command(subcommand)]
    pub action: StagesAction,
}

#[derive(Subcommand, Debug)]
pub enum StagesAction {
    Up(StagesRunArgs),
    Down(StagesRunArgs),
    Status(StagesStatusArgs),
    Validate(StagesStatusArgs),
}

#[derive(clap::Args, Debug)]
pub struct StagesRunArgs {
    #[arg(long, env = "APIRUN_STAGES_CONFIG", default_value = "stages.yaml")]
    pub config: String,
    #[arg(long)]
    pub from: Option<String>,
    #[arg(long)]
    pub to: Option<String>,
    #[arg(long)]
    pub stage: Option<String>,
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(clap::Args, Debug)]
pub struct StagesStatusArgs {
    #[arg(long, env = "APIRUN_STAGES_CONFIG", default_value = "stages.yaml")]
    pub config: String,
}
