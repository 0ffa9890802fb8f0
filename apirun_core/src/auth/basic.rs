use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;

use super::Method;
use crate::error::ErrorKind;
use crate::Result;

/// `basic` auth: returns `base64(user:pass)` only. The caller's header
/// template is expected to prepend `Basic ` itself.
pub struct BasicMethod {
    user: String,
    pass: String,
}

#[derive(Deserialize)]
struct Config {
    user: String,
    pass: String,
}

impl BasicMethod {
    pub fn from_config(value: Value) -> Result<BasicMethod> {
        let cfg: Config = serde_json::from_value(value)
            .map_err(|e| ErrorKind::Config(format!("invalid basic auth config: {}", e)))?;
        Ok(BasicMethod { user: cfg.user, pass: cfg.pass })
    }
}

#[async_trait]
impl Method for BasicMethod {
    async fn acquire(&self) -> Result<String> {
        let payload = format!("{}:{}", self.user, self.pass);
        Ok(base64::engine::general_purpose::STANDARD.encode(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn encodes_user_and_pass() {
        let method = BasicMethod::from_config(serde_json::json!({"user": "u1", "pass": "p1"})).unwrap();
        assert_eq!(method.acquire().await.unwrap(), base64::engine::general_purpose::STANDARD.encode("u1:p1"));
    }
}
