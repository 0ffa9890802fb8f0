use std::path::Path;

use apirun_core::config::MigrationConfig;
use apirun_core::{migration, Result};

use crate::cli::ValidateArgs;
use crate::pretty;

/// Structural validation only: discovers and parses every migration file
/// without touching the store or issuing any HTTP request.
pub async fn run(args: &ValidateArgs) -> Result<()> {
    let config_path = Path::new(&args.config);
    let config = MigrationConfig::load(config_path)?;
    let migrate_dir = config.migrate_dir(config_path);
    let files = migration::discover(&migrate_dir)?;

    for file in &files {
        pretty::ok(&format!("{} ({})", file.filename, file.version));
    }
    pretty::ok(&format!("{} migration file(s) valid", files.len()));
    Ok(())
}
