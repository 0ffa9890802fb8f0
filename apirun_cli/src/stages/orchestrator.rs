//! Drives a whole stage file: loads it, builds the dependency graph, and
//! runs (or dry-runs) each stage's migration config through its own
//! executor and store handle — stages never share an executor instance.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use apirun_core::config::MigrationConfig;
use apirun_core::env::Env;
use apirun_core::error::ErrorKind;
use apirun_core::executor::{Executor, ExecutorConfig};
use apirun_core::store;
use apirun_core::{auth, migration, wait, Result};
use log::{info, warn};
use tokio::sync::{RwLock, Semaphore};

use super::condition;
use super::graph;
use super::{GlobalConfig, StageDef, StagesFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// Recorded result of running (or skipping) one stage.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub name: String,
    pub success: bool,
    pub skipped: bool,
    pub skip_reason: Option<String>,
    pub error: Option<String>,
    pub extracted_env: HashMap<String, String>,
}

pub struct Orchestrator {
    file: StagesFile,
}

impl Orchestrator {
    pub fn load(path: &Path) -> Result<Orchestrator> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ErrorKind::Config(format!("could not read stages file '{}': {}", path.display(), e)))?;
        let mut file: StagesFile = serde_yaml::from_str(&contents)
            .map_err(|e| ErrorKind::Config(format!("could not parse stages file '{}': {}", path.display(), e)))?;
        file.base_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        Ok(Orchestrator { file })
    }

    fn stage_names(&self) -> Vec<String> {
        self.file.stages.iter().map(|s| s.name.clone()).collect()
    }

    fn depends_on_map(&self) -> HashMap<String, Vec<String>> {
        self.file.stages.iter().map(|s| (s.name.clone(), s.depends_on.clone())).collect()
    }

    fn stage(&self, name: &str) -> Option<&StageDef> {
        self.file.stages.iter().find(|s| s.name == name)
    }

    /// Validates the stage graph (unknown dependencies, cycles) and that
    /// every referenced `config_path` exists.
    pub fn validate(&self) -> Result<()> {
        let names = self.stage_names();
        graph::topo_batches(&names, &self.depends_on_map())?;
        for stage in &self.file.stages {
            let path = self.resolve_config_path(stage);
            if !path.is_file() {
                return Err(ErrorKind::Config(format!(
                    "stage '{}' config_path '{}' does not exist",
                    stage.name,
                    path.display()
                ))
                .into());
            }
        }
        Ok(())
    }

    fn resolve_config_path(&self, stage: &StageDef) -> PathBuf {
        let p = Path::new(&stage.config_path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.file.base_dir.join(p)
        }
    }

    /// Batches in execution order for `direction`, reversed for down.
    fn ordered_batches(&self, direction: Direction) -> Result<Vec<Vec<String>>> {
        let mut batches = graph::topo_batches(&self.stage_names(), &self.depends_on_map())?;
        if direction == Direction::Down {
            batches.reverse();
            for batch in &mut batches {
                batch.reverse();
            }
        }
        Ok(batches)
    }

    pub async fn run_up(&self, from: Option<&str>, to: Option<&str>, dry_run: bool) -> Result<Vec<StageOutcome>> {
        self.run(Direction::Up, from, to, dry_run).await
    }

    pub async fn run_down(&self, from: Option<&str>, to: Option<&str>, dry_run: bool) -> Result<Vec<StageOutcome>> {
        self.run(Direction::Down, from, to, dry_run).await
    }

    async fn run(
        &self,
        direction: Direction,
        from: Option<&str>,
        to: Option<&str>,
        dry_run: bool,
    ) -> Result<Vec<StageOutcome>> {
        let batches = self.ordered_batches(direction)?;
        let selected = graph::range_filter(&batches, from, to, direction);
        let selected_set: std::collections::HashSet<&str> = selected.iter().map(|s| s.as_str()).collect();

        let results: Arc<RwLock<HashMap<String, StageOutcome>>> = Arc::new(RwLock::new(HashMap::new()));
        let mut skip_reasons: HashMap<String, String> = HashMap::new();
        let semaphore = Arc::new(Semaphore::new(self.file.global.max_concurrent_stages.max(1)));
        let mut ordered_outcomes = Vec::new();

        for batch in &batches {
            let mut handles = Vec::new();
            for name in batch {
                if !selected_set.contains(name.as_str()) {
                    continue;
                }
                let stage = match self.stage(name) {
                    Some(s) => s.clone(),
                    None => continue,
                };

                if let Some(dependent_on_failed) = self.skipped_via_dependency(&stage, &skip_reasons) {
                    let outcome = StageOutcome {
                        name: stage.name.clone(),
                        success: false,
                        skipped: true,
                        skip_reason: Some(dependent_on_failed.clone()),
                        error: None,
                        extracted_env: HashMap::new(),
                    };
                    for dep in graph_dependents(&self.depends_on_map(), &stage.name) {
                        skip_reasons.entry(dep).or_insert_with(|| dependent_on_failed.clone());
                    }
                    results.write().await.insert(stage.name.clone(), outcome.clone());
                    ordered_outcomes.push(outcome);
                    continue;
                }

                let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
                let results = results.clone();
                let global = self.file.global.clone();
                let base_dir = self.file.base_dir.clone();
                let stage_for_task = stage.clone();

                let handle = tokio::spawn(async move {
                    let outcome = run_one_stage(&stage_for_task, &base_dir, &global, direction, dry_run, &results).await;
                    drop(permit);
                    outcome
                });
                handles.push((stage.name.clone(), stage.on_failure, handle));
            }

            for (name, on_failure, handle) in handles {
                let outcome = handle.await.map_err(|e| ErrorKind::Config(format!("stage task panicked: {}", e)))?;
                let failed = !outcome.success && !outcome.skipped;
                results.write().await.insert(name.clone(), outcome.clone());
                ordered_outcomes.push(outcome.clone());

                if failed {
                    match on_failure {
                        super::OnFailure::Stop => {
                            return Err(ErrorKind::Config(
                                outcome.error.unwrap_or_else(|| format!("stage '{}' failed", name)),
                            )
                            .into());
                        }
                        super::OnFailure::Continue => {
                            warn!("stage '{}' failed, continuing per on_failure: continue", name);
                        }
                        super::OnFailure::SkipDependents => {
                            let reason = format!("dependency {} failed", name);
                            for dep in graph_dependents(&self.depends_on_map(), &name) {
                                skip_reasons.entry(dep).or_insert_with(|| reason.clone());
                            }
                        }
                    }
                }
            }

            if let Some(secs) = self.file.global.wait_between_stages_secs {
                tokio::time::sleep(Duration::from_secs(secs)).await;
            }
        }

        Ok(ordered_outcomes)
    }

    fn skipped_via_dependency(&self, stage: &StageDef, skip_reasons: &HashMap<String, String>) -> Option<String> {
        skip_reasons.get(&stage.name).cloned()
    }

    pub async fn status(&self) -> Result<Vec<(String, u64)>> {
        let mut out = Vec::with_capacity(self.file.stages.len());
        for stage in &self.file.stages {
            let path = self.resolve_config_path(stage);
            let config = MigrationConfig::load(&path)?;
            let store = store::open(&config.store).await?;
            out.push((stage.name.clone(), store.current_version().await?));
        }
        Ok(out)
    }
}

/// All stages (transitively) that depend on `name`, used to propagate
/// `skip_dependents`.
fn graph_dependents(depends_on: &HashMap<String, Vec<String>>, name: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut frontier = vec![name.to_string()];
    while let Some(current) = frontier.pop() {
        for (stage, deps) in depends_on {
            if deps.contains(&current) && !out.contains(stage) {
                out.push(stage.clone());
                frontier.push(stage.clone());
            }
        }
    }
    out
}

async fn run_one_stage(
    stage: &StageDef,
    base_dir: &Path,
    global: &GlobalConfig,
    direction: Direction,
    dry_run: bool,
    results: &Arc<RwLock<HashMap<String, StageOutcome>>>,
) -> StageOutcome {
    match run_one_stage_inner(stage, base_dir, global, direction, dry_run, results).await {
        Ok(outcome) => outcome,
        Err(e) => StageOutcome {
            name: stage.name.clone(),
            success: false,
            skipped: false,
            skip_reason: None,
            error: Some(e.to_string()),
            extracted_env: HashMap::new(),
        },
    }
}

async fn run_one_stage_inner(
    stage: &StageDef,
    base_dir: &Path,
    global: &GlobalConfig,
    direction: Direction,
    dry_run: bool,
    results: &Arc<RwLock<HashMap<String, StageOutcome>>>,
) -> Result<StageOutcome> {
    let path = if Path::new(&stage.config_path).is_absolute() {
        PathBuf::from(&stage.config_path)
    } else {
        base_dir.join(&stage.config_path)
    };
    let config = MigrationConfig::load(&path)?;

    let mut env = Env::new();
    for nv in &global.env {
        env.global.insert(nv.name.clone(), nv.value.clone());
    }
    for nv in &config.env {
        env.global.insert(nv.name.clone(), nv.value.clone());
    }
    for (k, v) in &stage.env {
        env.global.insert(k.clone(), v.clone());
    }

    if direction == Direction::Up {
        for import in &stage.env_from_stages {
            let snapshot = results.read().await;
            let predecessor = snapshot
                .get(&import.stage)
                .ok_or_else(|| ErrorKind::Dependency(stage.name.clone(), import.stage.clone()))?;
            for var in &import.vars {
                match predecessor.extracted_env.get(var) {
                    Some(value) => {
                        env.global.insert(var.clone(), value.clone());
                    }
                    None => warn!(
                        "stage '{}' requested var '{}' from '{}' but it was never extracted",
                        stage.name, var, import.stage
                    ),
                }
            }
        }
    }

    auth::install(&mut env, &config.auth).await?;

    if let Some(condition_src) = &stage.condition {
        let snapshot = results.read().await.clone();
        let global_env: HashMap<String, String> = env.global.clone();
        if !condition::evaluate(condition_src, &snapshot, &global_env) {
            return Ok(StageOutcome {
                name: stage.name.clone(),
                success: false,
                skipped: true,
                skip_reason: Some("condition evaluated to false".into()),
                error: None,
                extracted_env: HashMap::new(),
            });
        }
    }

    if let Some(wait_config) = &config.wait {
        wait::run(wait_config, &env, &config.client).await?;
    }

    let migrate_dir = config.migrate_dir(&path);
    let files = migration::discover(&migrate_dir)?;

    let store = store::open(&config.store).await?;
    let executor_config = ExecutorConfig {
        client: config.client.clone(),
        render_body_default: config.render_body,
        delay_between_migrations: Duration::from_secs_f64(config.delay_between_migrations_secs),
        save_response_body: config.store.save_response_body,
        retry: store::default_retry_policy(),
    };
    let executor = Executor::new(&*store, executor_config);

    let run_fut = async {
        match direction {
            Direction::Up => executor.migrate_up(&files, &mut env, 0, dry_run, 0).await,
            Direction::Down => executor.migrate_down(&files, &mut env, 0, dry_run, if dry_run { 1 } else { 0 }).await,
        }
    };

    let reports = if let Some(secs) = stage.timeout_secs {
        match tokio::time::timeout(Duration::from_secs(secs), run_fut).await {
            Ok(result) => result?,
            Err(_) => return Err(ErrorKind::Timeout(stage.name.clone(), Duration::from_secs(secs)).into()),
        }
    } else {
        run_fut.await?
    };

    let mut extracted_env = HashMap::new();
    for report in &reports {
        extracted_env.extend(report.extracted.clone());
    }

    info!("stage '{}' completed {} step(s)", stage.name, reports.len());

    if let Some(secs) = stage.wait_between_secs {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    Ok(StageOutcome { name: stage.name.clone(), success: true, skipped: false, skip_reason: None, error: None, extracted_env })
}
