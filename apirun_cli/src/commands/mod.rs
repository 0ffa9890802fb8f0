pub mod create;
pub mod down;
pub mod stages;
pub mod status;
pub mod up;
pub mod validate;

use std::path::Path;

use apirun_core::config::MigrationConfig;
use apirun_core::env::Env;
use apirun_core::store::Store;
use apirun_core::{auth, store, wait, Result};

/// Loads config, wires auth into a fresh env, opens the store and runs the
/// wait probe — the bootstrap shared by `up`/`down`/`status`.
pub async fn bootstrap(config_path: &Path) -> Result<(MigrationConfig, Box<dyn Store>, Env)> {
    let config = MigrationConfig::load(config_path)?;
    let mut env = Env::new();
    for nv in &config.env {
        env.global.insert(nv.name.clone(), nv.value.clone());
    }
    auth::install(&mut env, &config.auth).await?;
    let store = store::open(&config.store).await?;
    if let Some(wait_config) = &config.wait {
        wait::run(wait_config, &env, &config.client).await?;
    }
    Ok((config, store, env))
}
