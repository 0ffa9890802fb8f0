//! The ordered migration executor — the hard part. Renders
//! templates, runs the HTTP exchange, validates the response, extracts
//! variables, persists bookkeeping, and drives `up`/`down` across a whole
//! migrate dir.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};

use crate::client::{self, ClientConfig};
use crate::env::Env;
use crate::error::ErrorKind;
use crate::extract;
use crate::migration::{MigrationFile, Request, ResultCode, Step};
use crate::retry::RetryPolicy;
use crate::store::{Direction, RunRecord, RunStatus, Store};
use crate::Result;

/// `Pending -> Rendered -> Requested -> Validated -> Extracted -> Persisted`,
/// terminal at `Failed` anywhere, `Observed` replacing `Persisted` under
/// dry-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Pending,
    Rendered,
    Requested,
    Validated,
    Extracted,
    Persisted,
    Observed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct StepReport {
    pub version: u64,
    pub direction: Direction,
    pub state: StepState,
    pub status_code: Option<u16>,
    pub extracted: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub client: ClientConfig,
    pub render_body_default: bool,
    pub delay_between_migrations: Duration,
    pub save_response_body: bool,
    pub retry: RetryPolicy,
}

pub struct Executor<'a> {
    store: &'a dyn Store,
    config: ExecutorConfig,
}

struct Rendered {
    method: String,
    url: String,
    headers: Vec<(String, String)>,
    queries: Vec<(String, String)>,
    body: Option<String>,
}

fn matches_result_code(status: u16, rules: &[ResultCode]) -> bool {
    if rules.is_empty() {
        return true;
    }
    let status_str = status.to_string();
    rules.iter().any(|r| r.as_str() == status_str)
}

impl<'a> Executor<'a> {
    pub fn new(store: &'a dyn Store, config: ExecutorConfig) -> Executor<'a> {
        Executor { store, config }
    }

    async fn render_request(&self, request: &Request, env: &Env, render_body: bool) -> Result<Rendered> {
        let url = env.render(&request.url).await?;

        let mut headers = Vec::with_capacity(request.headers.len());
        for h in &request.headers {
            headers.push((h.name.clone(), env.render(&h.value).await?));
        }

        let mut queries = Vec::with_capacity(request.queries.len());
        for q in &request.queries {
            queries.push((q.name.clone(), env.render(&q.value).await?));
        }

        let raw_body = if let Some(body) = &request.body {
            Some(body.clone())
        } else if let Some(path) = &request.body_from_file {
            Some(
                std::fs::read_to_string(path)
                    .map_err(|e| ErrorKind::Config(format!("could not read body_from_file '{}': {}", path, e)))?,
            )
        } else {
            None
        };
        let body = match raw_body {
            Some(raw) if render_body => Some(env.render(&raw).await?),
            other => other,
        };

        Ok(Rendered { method: request.method.clone(), url, headers, queries, body })
    }

    async fn execute(&self, rendered: &Rendered) -> Result<(u16, reqwest::header::HeaderMap, String)> {
        debug!("{} {}", rendered.method, rendered.url);
        let http = client::build(&self.config.client)?;
        let mut builder = client::request(&http, &rendered.method, &rendered.url)?;
        for (name, value) in &rendered.headers {
            builder = builder.header(name, value);
        }
        if !rendered.queries.is_empty() {
            builder = builder.query(&rendered.queries);
        }
        if let Some(body) = &rendered.body {
            builder = builder.body(body.clone());
        }

        let res = builder
            .send()
            .await
            .map_err(|e| ErrorKind::Transport(rendered.url.clone(), e.to_string()))?;
        let status = res.status().as_u16();
        let headers = res.headers().clone();
        let body_text = res
            .text()
            .await
            .map_err(|e| ErrorKind::Transport(rendered.url.clone(), e.to_string()))?;
        Ok((status, headers, body_text))
    }

    /// Applies (or rolls back) a single step. `seed_local` is merged into the
    /// local env before the step's own `env:` map — used by `migrate_down`
    /// to rehydrate a prior up's extracted variables.
    #[allow(clippy::too_many_arguments)]
    async fn apply_one(
        &self,
        version: u64,
        step: &Step,
        direction: Direction,
        env: &mut Env,
        dry_run: bool,
        seed_local: Option<HashMap<String, String>>,
    ) -> Result<StepReport> {
        env.reset_local();
        if let Some(seed) = seed_local {
            env.local.extend(seed);
        }
        env.local.extend(step.env.clone());

        let render_body = step.render_body.unwrap_or(self.config.render_body_default);

        // `find`: two-pass rendering — a pre-request whose extractions are
        // merged into local env before the main request renders.
        if let Some(find) = &step.find {
            let find_rendered = self.render_request(&find.request, env, render_body).await?;
            let (status, headers, body_text) = self.execute(&find_rendered).await?;
            if !matches_result_code(status, &find.response.result_code) {
                return Err(ErrorKind::Response(find_rendered.url.clone(), status, find.response.result_code.iter().map(|r| r.as_str()).collect()).into());
            }
            let extracted = extract::extract(&find.response.env_from, &headers, &body_text);
            let vars = extract::apply_missing_policy(extracted, find.response.env_missing)?;
            env.local.extend(vars);
        }

        let rendered = self.render_request(&step.request, env, render_body).await?;
        let (status, headers, body_text) = self.execute(&rendered).await?;
        debug!("{} {} -> {}", rendered.method, rendered.url, status);
        let request_summary = format!("{} {}", rendered.method, rendered.url);

        if !matches_result_code(status, &step.response.result_code) {
            let allowed: Vec<String> = step.response.result_code.iter().map(|r| r.as_str()).collect();
            warn!("version {} returned status {}, expected one of {:?}", version, status, allowed);
            let started_at = Utc::now();
            let record = RunRecord {
                version,
                direction,
                started_at,
                finished_at: Utc::now(),
                status: RunStatus::Failed,
                status_code: Some(status),
                error_message: Some(format!("unexpected status {}, expected one of {:?}", status, allowed)),
                request_summary,
                response_body: if step.response.save_response_body || self.config.save_response_body {
                    Some(body_text.clone())
                } else {
                    None
                },
            };
            let _ = self.config.retry.run(|| self.store.record_run(&record)).await;
            return Err(ErrorKind::Response(rendered.url, status, allowed).into());
        }

        let extracted_items = extract::extract(&step.response.env_from, &headers, &body_text);
        let extracted = match extract::apply_missing_policy(extracted_items, step.response.env_missing) {
            Ok(vars) => vars,
            Err(err) => {
                let started_at = Utc::now();
                let record = RunRecord {
                    version,
                    direction,
                    started_at,
                    finished_at: Utc::now(),
                    status: RunStatus::Failed,
                    status_code: Some(status),
                    error_message: Some(err.to_string()),
                    request_summary,
                    response_body: None,
                };
                let _ = self.config.retry.run(|| self.store.record_run(&record)).await;
                return Err(err);
            }
        };

        if dry_run {
            let record = RunRecord {
                version,
                direction,
                started_at: Utc::now(),
                finished_at: Utc::now(),
                status: RunStatus::DryRun,
                status_code: Some(status),
                error_message: None,
                request_summary,
                response_body: None,
            };
            // Dry-run writes nothing to the store at all — not even the
            // observational run record above would be legal,
            // so it is constructed only for the caller's own reporting and
            // never persisted.
            let _ = &record;
            return Ok(StepReport {
                version,
                direction,
                state: StepState::Observed,
                status_code: Some(status),
                extracted,
            });
        }

        let started_at = Utc::now();
        self.config.retry.run(|| self.store.apply(version, &extracted)).await?;
        let record = RunRecord {
            version,
            direction,
            started_at,
            finished_at: Utc::now(),
            status: RunStatus::Ok,
            status_code: Some(status),
            error_message: None,
            request_summary: request_summary.clone(),
            response_body: if step.response.save_response_body || self.config.save_response_body {
                Some(body_text)
            } else {
                None
            },
        };
        self.config.retry.run(|| self.store.record_run(&record)).await?;
        info!("applied version {} ({})", version, direction.as_str());

        Ok(StepReport { version, direction, state: StepState::Persisted, status_code: Some(status), extracted })
    }

    /// `migrate_up(to)`: discover is the caller's job; this consumes
    /// an already-discovered, version-sorted file list. `to == 0` means all.
    pub async fn migrate_up(
        &self,
        files: &[MigrationFile],
        env: &mut Env,
        to: u64,
        dry_run: bool,
        dry_run_from: u64,
    ) -> Result<Vec<StepReport>> {
        let applied: std::collections::HashSet<u64> =
            self.config.retry.run(|| self.store.list_applied()).await?.into_iter().collect();

        let pending: Vec<&MigrationFile> = files
            .iter()
            .filter(|f| !applied.contains(&f.version) && (to == 0 || f.version <= to))
            .collect();

        let mut reports = Vec::with_capacity(pending.len());
        for (idx, file) in pending.iter().enumerate() {
            let is_dry = dry_run && (dry_run_from == 0 || file.version >= dry_run_from);
            let report = self.apply_one(file.version, &file.up, Direction::Up, env, is_dry, None).await?;
            reports.push(report);
            if idx + 1 < pending.len() {
                tokio::time::sleep(self.config.delay_between_migrations).await;
            }
        }
        Ok(reports)
    }

    /// `migrate_down(to)`: pops strictly-decreasing applied versions
    /// down to (but not including) `to`.
    pub async fn migrate_down(
        &self,
        files: &[MigrationFile],
        env: &mut Env,
        to: u64,
        dry_run: bool,
        dry_run_from: u64,
    ) -> Result<Vec<StepReport>> {
        let current = self.config.retry.run(|| self.store.current_version()).await?;
        if to > current {
            return Err(
                ErrorKind::Store(format!("cannot migrate down to {} when current version is {}", to, current)).into()
            );
        }

        let mut applied = self.config.retry.run(|| self.store.list_applied()).await?;
        applied.sort_unstable_by(|a, b| b.cmp(a));
        let to_pop: Vec<u64> = applied.into_iter().filter(|v| *v > to).collect();

        let by_version: HashMap<u64, &MigrationFile> = files.iter().map(|f| (f.version, f)).collect();

        let mut reports = Vec::with_capacity(to_pop.len());
        for (idx, version) in to_pop.iter().enumerate() {
            let file = by_version
                .get(version)
                .ok_or_else(|| ErrorKind::Discovery(format!("no migration file found for applied version {}", version)))?;
            let down_step = match file.down.as_ref() {
                Some(step) => step,
                None => {
                    warn!("version {} has no down step, aborting rollback", version);
                    let now = Utc::now();
                    let record = RunRecord {
                        version: *version,
                        direction: Direction::Down,
                        started_at: now,
                        finished_at: now,
                        status: RunStatus::Failed,
                        status_code: None,
                        error_message: Some(format!("version {} has no down step", version)),
                        request_summary: String::new(),
                        response_body: None,
                    };
                    let _ = self.config.retry.run(|| self.store.record_run(&record)).await;
                    return Err(ErrorKind::Discovery(format!("version {} has no down step", version)).into());
                }
            };

            let stored = self.config.retry.run(|| self.store.load_extracted_env(*version)).await?;
            let is_dry = dry_run && (dry_run_from == 0 || *version >= dry_run_from);
            let report = self.apply_one(*version, down_step, Direction::Down, env, is_dry, Some(stored)).await?;

            if !is_dry {
                self.config.retry.run(|| self.store.remove(*version)).await?;
            }
            reports.push(report);
            if idx + 1 < to_pop.len() {
                tokio::time::sleep(self.config.delay_between_migrations).await;
            }
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{EnvFrom, Find, FindResponse, NameValue, Response};
    use crate::store::{SqliteConfig, SqliteStore, StoreConfig};
    use std::sync::Arc;

    fn config() -> ExecutorConfig {
        ExecutorConfig {
            client: ClientConfig::default(),
            render_body_default: true,
            delay_between_migrations: Duration::from_millis(0),
            save_response_body: false,
            retry: RetryPolicy { max_retries: 0, ..RetryPolicy::default() },
        }
    }

    async fn sqlite_store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apirun.db");
        let config = StoreConfig {
            sqlite: SqliteConfig { path: path.to_str().unwrap().to_string() },
            store_type: "sqlite".into(),
            ..Default::default()
        };
        (SqliteStore::open(&config).await.unwrap(), dir)
    }

    fn up_step(url: String) -> Step {
        Step {
            request: Request { method: "POST".into(), url, ..Request::default() },
            response: Response { result_code: vec![ResultCode::Int(201)], ..Response::default() },
            ..Step::default()
        }
    }

    fn down_step(url: String, auth_name: &str) -> Step {
        Step {
            request: Request {
                method: "DELETE".into(),
                url,
                headers: vec![NameValue {
                    name: "Authorization".into(),
                    value: format!("Basic {{{{ auth.{} }}}}", auth_name),
                }],
                ..Request::default()
            },
            response: Response { result_code: vec![ResultCode::Int(204)], ..Response::default() },
            ..Step::default()
        }
    }

    #[tokio::test]
    async fn down_uses_distinct_auth_per_version() {
        let mut server = mockito::Server::new_async().await;
        let up1 = server.mock("POST", "/up1").with_status(201).create_async().await;
        let up2 = server.mock("POST", "/up2").with_status(201).create_async().await;
        let down1 = server
            .mock("DELETE", "/down1")
            .match_header("authorization", "Basic dTE6cDE=")
            .with_status(204)
            .create_async()
            .await;
        let down2 = server
            .mock("DELETE", "/down2")
            .match_header("authorization", "Basic dTI6cDI=")
            .with_status(204)
            .create_async()
            .await;

        let files = vec![
            MigrationFile {
                version: 1,
                filename: "001_first.yaml".into(),
                up: up_step(format!("{}/up1", server.url())),
                down: Some(down_step(format!("{}/down1", server.url()), "a1")),
            },
            MigrationFile {
                version: 2,
                filename: "002_second.yaml".into(),
                up: up_step(format!("{}/up2", server.url())),
                down: Some(down_step(format!("{}/down2", server.url()), "a2")),
            },
        ];

        let (store, _dir) = sqlite_store().await;
        let executor = Executor::new(&store, config());
        let mut env = Env::new();
        env.auth.insert("a1".into(), Arc::new(crate::env::LazyValue::eager("a1", "dTE6cDE=")));
        env.auth.insert("a2".into(), Arc::new(crate::env::LazyValue::eager("a2", "dTI6cDI=")));

        executor.migrate_up(&files, &mut env, 0, false, 0).await.unwrap();
        executor.migrate_down(&files, &mut env, 0, false, 0).await.unwrap();

        up1.assert_async().await;
        up2.assert_async().await;
        down1.assert_async().await;
        down2.assert_async().await;
        assert!(store.list_applied().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn partial_rollback_stops_at_target_version() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/up1").with_status(201).create_async().await;
        server.mock("POST", "/up2").with_status(201).create_async().await;
        let down2 = server.mock("DELETE", "/down2").with_status(204).create_async().await;

        let files = vec![
            MigrationFile {
                version: 1,
                filename: "001_first.yaml".into(),
                up: up_step(format!("{}/up1", server.url())),
                down: Some(down_step(format!("{}/down1", server.url()), "a1")),
            },
            MigrationFile {
                version: 2,
                filename: "002_second.yaml".into(),
                up: up_step(format!("{}/up2", server.url())),
                down: Some(down_step(format!("{}/down2", server.url()), "a2")),
            },
        ];

        let (store, _dir) = sqlite_store().await;
        let executor = Executor::new(&store, config());
        let mut env = Env::new();
        env.auth.insert("a1".into(), Arc::new(crate::env::LazyValue::eager("a1", "x")));
        env.auth.insert("a2".into(), Arc::new(crate::env::LazyValue::eager("a2", "y")));

        executor.migrate_up(&files, &mut env, 0, false, 0).await.unwrap();
        executor.migrate_down(&files, &mut env, 1, false, 0).await.unwrap();

        down2.assert_async().await;
        let applied = store.list_applied().await.unwrap();
        assert_eq!(applied, vec![1]);
        assert_eq!(store.current_version().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dry_run_up_writes_nothing_to_the_store() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/up1").with_status(201).create_async().await;

        let files = vec![MigrationFile {
            version: 1,
            filename: "001_first.yaml".into(),
            up: up_step(format!("{}/up1", server.url())),
            down: None,
        }];

        let (store, _dir) = sqlite_store().await;
        let executor = Executor::new(&store, config());
        let mut env = Env::new();

        let reports = executor.migrate_up(&files, &mut env, 0, true, 0).await.unwrap();
        assert_eq!(reports[0].state as u8, StepState::Observed as u8);
        assert!(store.list_applied().await.unwrap().is_empty());
        assert!(store.list_runs(None, true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dry_run_down_preserves_applied_state() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/up1").with_status(201).create_async().await;
        server.mock("DELETE", "/down1").with_status(204).create_async().await;

        let files = vec![MigrationFile {
            version: 1,
            filename: "001_first.yaml".into(),
            up: up_step(format!("{}/up1", server.url())),
            down: Some(down_step(format!("{}/down1", server.url()), "a1")),
        }];

        let (store, _dir) = sqlite_store().await;
        let executor = Executor::new(&store, config());
        let mut env = Env::new();
        env.auth.insert("a1".into(), Arc::new(crate::env::LazyValue::eager("a1", "x")));

        executor.migrate_up(&files, &mut env, 0, false, 0).await.unwrap();
        executor.migrate_down(&files, &mut env, 1, true, 1).await.unwrap();

        assert_eq!(store.list_applied().await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn find_extraction_feeds_the_main_request() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/find")
            .with_status(200)
            .with_body(r#"{"id": "thing-9"}"#)
            .create_async()
            .await;
        let main = server.mock("POST", "/things/thing-9/activate").with_status(201).create_async().await;

        let step = Step {
            request: Request {
                method: "POST".into(),
                url: format!("{}/things/{{{{ id }}}}/activate", server.url()),
                ..Request::default()
            },
            response: Response { result_code: vec![ResultCode::Int(201)], ..Response::default() },
            find: Some(Find {
                request: Request { method: "GET".into(), url: format!("{}/find", server.url()), ..Request::default() },
                response: FindResponse {
                    result_code: vec![ResultCode::Int(200)],
                    env_from: vec![EnvFrom { name: "id".into(), from: "id".into() }],
                    ..FindResponse::default()
                },
            }),
            ..Step::default()
        };

        let files =
            vec![MigrationFile { version: 1, filename: "001_first.yaml".into(), up: step, down: None }];

        let (store, _dir) = sqlite_store().await;
        let executor = Executor::new(&store, config());
        let mut env = Env::new();

        executor.migrate_up(&files, &mut env, 0, false, 0).await.unwrap();
        main.assert_async().await;
    }
}
