//! Pre-run dependency wait probe.

use std::time::{Duration, Instant};

use crate::client::{self, ClientConfig};
use crate::config::WaitConfig;
use crate::env::Env;
use crate::error::ErrorKind;
use crate::Result;

/// Polls `wait.url` until it returns `wait.expected_status` or
/// `wait.timeout_secs` elapses. An empty URL is a no-op. `HEAD` is honored,
/// any other method folds to `GET`.
pub async fn run(wait: &WaitConfig, env: &Env, client_config: &ClientConfig) -> Result<()> {
    let url = env.render(&wait.url).await?;
    if url.is_empty() {
        return Ok(());
    }

    let http = client::build(client_config)?;
    let method = if wait.method.eq_ignore_ascii_case("HEAD") { "HEAD" } else { "GET" };
    let interval = Duration::from_secs(wait.interval_secs);
    let timeout = Duration::from_secs(wait.timeout_secs);
    let deadline = Instant::now() + timeout;

    loop {
        let attempt = client::request(&http, method, &url)?.send().await;
        if let Ok(res) = attempt {
            if res.status().as_u16() == wait.expected_status {
                return Ok(());
            }
        }
        if Instant::now() >= deadline {
            return Err(ErrorKind::Timeout(format!("wait probe for '{}'", url), timeout).into());
        }
        tokio::time::sleep(interval.min(deadline.saturating_duration_since(Instant::now()))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_url_is_a_noop() {
        let wait = WaitConfig { url: String::new(), ..WaitConfig::default() };
        let env = Env::new();
        run(&wait, &env, &ClientConfig::default()).await.unwrap();
    }

    #[tokio::test]
    async fn succeeds_once_expected_status_is_returned() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("GET", "/healthz").with_status(200).create_async().await;
        let wait = WaitConfig {
            url: format!("{}/healthz", server.url()),
            interval_secs: 0,
            timeout_secs: 5,
            ..WaitConfig::default()
        };
        let env = Env::new();
        run(&wait, &env, &ClientConfig::default()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn times_out_if_status_never_matches() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/healthz").with_status(503).create_async().await;
        let wait = WaitConfig {
            url: format!("{}/healthz", server.url()),
            interval_secs: 0,
            timeout_secs: 0,
            ..WaitConfig::default()
        };
        let env = Env::new();
        let err = run(&wait, &env, &ClientConfig::default()).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Timeout(_, _)));
    }
}
