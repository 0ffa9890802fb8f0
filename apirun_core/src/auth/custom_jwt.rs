use std::collections::BTreeMap;

use async_trait::async_trait;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Method;
use crate::error::ErrorKind;
use crate::Result;

/// `custom_jwt` auth: an HS256 issuer with a configurable TTL and custom
/// claims, returning `Bearer <jwt>` directly (the only provider that
/// prepends its own scheme).
pub struct CustomJwtMethod {
    secret: String,
    ttl_seconds: i64,
    claims: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
struct Config {
    secret: String,
    #[serde(default = "default_ttl")]
    ttl_seconds: i64,
    #[serde(default)]
    claims: BTreeMap<String, Value>,
}

fn default_ttl() -> i64 {
    3600
}

#[derive(Serialize)]
struct Claims {
    iat: i64,
    exp: i64,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl CustomJwtMethod {
    pub fn from_config(value: Value) -> Result<CustomJwtMethod> {
        let cfg: Config = serde_json::from_value(value)
            .map_err(|e| ErrorKind::Config(format!("invalid custom_jwt auth config: {}", e)))?;
        Ok(CustomJwtMethod { secret: cfg.secret, ttl_seconds: cfg.ttl_seconds, claims: cfg.claims })
    }
}

#[async_trait]
impl Method for CustomJwtMethod {
    async fn acquire(&self) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims { iat: now, exp: now + self.ttl_seconds, extra: self.claims.clone() };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(self.secret.as_bytes()))
            .map_err(|e| ErrorKind::Auth("custom_jwt".into(), e.to_string()))?;
        Ok(format!("Bearer {}", token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn issues_bearer_prefixed_hs256_token() {
        let method = CustomJwtMethod::from_config(serde_json::json!({
            "secret": "s3cr3t",
            "ttl_seconds": 60,
            "claims": {"sub": "svc-account"}
        }))
        .unwrap();
        let token = method.acquire().await.unwrap();
        assert!(token.starts_with("Bearer "));
        assert_eq!(token.matches('.').count(), 2);
    }
}
