//! Config file loading: YAML on disk with `APIRUN_*` environment overrides,
//! merged through `figment`.

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::Deserialize;

use crate::auth::AuthConfig;
use crate::client::ClientConfig;
use crate::error::ErrorKind;
use crate::store::StoreConfig;
use crate::Result;

/// `wait:` block.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct WaitConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_wait_method")]
    pub method: String,
    #[serde(default = "default_wait_status")]
    pub expected_status: u16,
    #[serde(default = "default_wait_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_wait_timeout")]
    pub timeout_secs: u64,
}

fn default_wait_method() -> String {
    "GET".to_string()
}
fn default_wait_status() -> u16 {
    200
}
fn default_wait_interval() -> u64 {
    2
}
fn default_wait_timeout() -> u64 {
    60
}

/// Top-level migration config file.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationConfig {
    #[serde(default)]
    pub auth: Vec<AuthConfig>,
    #[serde(default)]
    pub env: Vec<crate::migration::NameValue>,
    pub migrate_dir: String,
    #[serde(default)]
    pub wait: Option<WaitConfig>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: Option<String>,
    #[serde(default = "default_render_body")]
    pub render_body: bool,
    #[serde(default = "default_delay")]
    pub delay_between_migrations_secs: f64,
}

fn default_render_body() -> bool {
    true
}
fn default_delay() -> f64 {
    1.0
}

impl MigrationConfig {
    /// Loads YAML at `path`, then lets any `APIRUN_*` environment variable
    /// override the matching (case-insensitive, `_`-separated) key.
    pub fn load(path: &Path) -> Result<MigrationConfig> {
        Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("APIRUN_").split("_"))
            .extract()
            .map_err(|e| ErrorKind::Config(format!("could not load config '{}': {}", path.display(), e)).into())
    }

    /// Resolves `migrate_dir` relative to the directory the config file
    /// itself lives in, matching how stage configs resolve relative to the
    /// stages file.
    pub fn migrate_dir(&self, config_path: &Path) -> PathBuf {
        let dir = Path::new(&self.migrate_dir);
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            config_path.parent().unwrap_or_else(|| Path::new(".")).join(dir)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apirun.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "migrate_dir: ./migrations").unwrap();

        let config = MigrationConfig::load(&path).unwrap();
        assert_eq!(config.migrate_dir, "./migrations");
        assert!(config.render_body);
        assert_eq!(config.store.store_type, "sqlite");
    }

    #[test]
    fn env_override_takes_precedence_over_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apirun.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "migrate_dir: ./migrations\nrender_body: true").unwrap();

        // figment's Env provider is queried process-wide; scope this test's
        // env var narrowly and restore it to avoid bleeding into others.
        std::env::set_var("APIRUN_RENDER_BODY", "false");
        let config = MigrationConfig::load(&path).unwrap();
        std::env::remove_var("APIRUN_RENDER_BODY");
        assert!(!config.render_body);
    }
}
