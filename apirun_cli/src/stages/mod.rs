//! Stage file data model and the DAG orchestrator built on top of it.

pub mod condition;
pub mod graph;
pub mod orchestrator;

use std::collections::HashMap;
use std::path::PathBuf;

use apirun_core::migration::NameValue;
use serde::Deserialize;

pub use orchestrator::{Orchestrator, StageOutcome};

/// One `env_from_stages` import entry.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvFromStage {
    pub stage: String,
    pub vars: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    #[default]
    Stop,
    Continue,
    SkipDependents,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StageDef {
    pub name: String,
    pub config_path: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub env_from_stages: Vec<EnvFromStage>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub on_failure: OnFailure,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub wait_between_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct GlobalConfig {
    #[serde(default)]
    pub env: Vec<NameValue>,
    #[serde(default)]
    pub wait_between_stages_secs: Option<u64>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_stages: usize,
}

fn default_max_concurrent() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct StagesFile {
    #[serde(rename = "apiVersion", default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    pub stages: Vec<StageDef>,
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}
