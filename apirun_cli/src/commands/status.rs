use std::path::Path;

use apirun_core::Result;

use crate::cli::StatusArgs;
use crate::{commands, pretty};

pub async fn run(args: &StatusArgs) -> Result<()> {
    let config_path = Path::new(&args.config);
    let (_config, store, _env) = commands::bootstrap(config_path).await?;

    let current = store.current_version().await?;
    let applied = store.list_applied().await?;
    println!("current version: {}", current);
    for version in &applied {
        pretty::status_row(*version, "applied");
    }

    if args.history || args.history_all {
        let limit = if args.history_all { None } else { Some(args.history_limit) };
        let runs = store.list_runs(limit, args.history_all).await?;
        println!("\nrun history:");
        for run in runs {
            let label = format!(
                "{} {} -> {:?} [{}]",
                run.direction.as_str(),
                run.version,
                run.status_code,
                run.status.as_str()
            );
            match run.status.as_str() {
                "ok" => pretty::ok(&label),
                "failed" => pretty::fail(&label),
                _ => pretty::skip(&label),
            }
        }
    }
    Ok(())
}
