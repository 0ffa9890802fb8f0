use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::Method;
use crate::error::ErrorKind;
use crate::Result;

/// `pocketbase` auth: identity+password POST, extracts `token`.
pub struct PocketbaseMethod {
    url: String,
    identity: String,
    password: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct Config {
    url: String,
    identity: String,
    password: String,
}

#[derive(Deserialize)]
struct AuthResponse {
    token: String,
}

impl PocketbaseMethod {
    pub fn from_config(value: Value) -> Result<PocketbaseMethod> {
        let cfg: Config = serde_json::from_value(value)
            .map_err(|e| ErrorKind::Config(format!("invalid pocketbase auth config: {}", e)))?;
        Ok(PocketbaseMethod {
            url: cfg.url,
            identity: cfg.identity,
            password: cfg.password,
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl Method for PocketbaseMethod {
    async fn acquire(&self) -> Result<String> {
        let res = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({"identity": self.identity, "password": self.password}))
            .send()
            .await
            .map_err(|e| ErrorKind::Transport(self.url.clone(), e.to_string()))?;

        if !res.status().is_success() {
            let status = res.status();
            return Err(ErrorKind::Response(self.url.clone(), status.as_u16(), vec!["2xx".into()]).into());
        }

        let body: AuthResponse = res
            .json()
            .await
            .map_err(|e| ErrorKind::Extraction("token".into(), e.to_string()))?;
        Ok(body.token)
    }
}
