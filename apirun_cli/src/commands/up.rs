use std::path::Path;
use std::time::Duration;

use apirun_core::executor::{Executor, ExecutorConfig};
use apirun_core::store;
use apirun_core::{migration, Result};
use log::info;

use crate::cli::UpArgs;
use crate::{commands, pretty};

pub async fn run(args: &UpArgs) -> Result<()> {
    let config_path = Path::new(&args.config);
    let (config, store, mut env) = commands::bootstrap(config_path).await?;

    let migrate_dir = config.migrate_dir(config_path);
    let files = migration::discover(&migrate_dir)?;

    let executor_config = ExecutorConfig {
        client: config.client.clone(),
        render_body_default: config.render_body,
        delay_between_migrations: Duration::from_secs_f64(config.delay_between_migrations_secs),
        save_response_body: config.store.save_response_body,
        retry: store::default_retry_policy(),
    };
    let executor = Executor::new(&*store, executor_config);

    info!("applying up to version {}", if args.to == 0 { "latest".to_string() } else { args.to.to_string() });
    let reports = executor.migrate_up(&files, &mut env, args.to, args.dry_run, args.dry_run_from).await?;

    for report in &reports {
        pretty::ok(&format!("version {} applied ({:?})", report.version, report.state));
    }
    if reports.is_empty() {
        pretty::ok("nothing to apply");
    }
    Ok(())
}
