use std::path::Path;

use apirun_core::Result;

use crate::cli::{StagesAction, StagesArgs, StagesRunArgs, StagesStatusArgs};
use crate::pretty;
use crate::stages::Orchestrator;

pub async fn run(args: &StagesArgs) -> Result<()> {
    match &args.action {
        StagesAction::Up(run_args) => run_direction(run_args, true).await,
        StagesAction::Down(run_args) => run_direction(run_args, false).await,
        StagesAction::Status(status_args) => status(status_args).await,
        StagesAction::Validate(status_args) => validate(status_args).await,
    }
}

fn range(run_args: &StagesRunArgs) -> (Option<&str>, Option<&str>) {
    if let Some(stage) = &run_args.stage {
        return (Some(stage.as_str()), Some(stage.as_str()));
    }
    (run_args.from.as_deref(), run_args.to.as_deref())
}

async fn run_direction(run_args: &StagesRunArgs, up: bool) -> Result<()> {
    let orchestrator = Orchestrator::load(Path::new(&run_args.config))?;
    let (from, to) = range(run_args);

    let outcomes =
        if up { orchestrator.run_up(from, to, run_args.dry_run).await? } else { orchestrator.run_down(from, to, run_args.dry_run).await? };

    for outcome in &outcomes {
        if outcome.skipped {
            pretty::skip(&format!("{} ({})", outcome.name, outcome.skip_reason.as_deref().unwrap_or("skipped")));
        } else if outcome.success {
            pretty::ok(&outcome.name);
        } else {
            pretty::fail(&format!("{}: {}", outcome.name, outcome.error.as_deref().unwrap_or("unknown error")));
        }
    }
    Ok(())
}

async fn status(args: &StagesStatusArgs) -> Result<()> {
    let orchestrator = Orchestrator::load(Path::new(&args.config))?;
    for (name, version) in orchestrator.status().await? {
        pretty::stage_row(&name, &format!("current version {}", version));
    }
    Ok(())
}

async fn validate(args: &StagesStatusArgs) -> Result<()> {
    let orchestrator = Orchestrator::load(Path::new(&args.config))?;
    orchestrator.validate()?;
    pretty::ok("stage graph is valid");
    Ok(())
}
