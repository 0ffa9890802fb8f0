use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::Method;
use crate::error::ErrorKind;
use crate::Result;

/// `oauth2` auth: `client_credentials` or `password` grant, POSTed to
/// `token_url`. Grounded on `vault.rs`'s own "authenticated reqwest call,
/// then pull one field out of the JSON body" shape (`get_secret`/`read`),
/// generalized to a POST and a configurable grant.
pub struct OAuth2Method {
    token_url: String,
    grant: Grant,
    client: reqwest::Client,
}

enum Grant {
    ClientCredentials { client_id: String, client_secret: String, scope: Option<String> },
    Password { client_id: String, client_secret: Option<String>, username: String, password: String, scope: Option<String> },
}

#[derive(Deserialize)]
struct Config {
    token_url: String,
    grant_type: String,
    client_id: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl OAuth2Method {
    pub fn from_config(value: Value) -> Result<OAuth2Method> {
        let cfg: Config = serde_json::from_value(value)
            .map_err(|e| ErrorKind::Config(format!("invalid oauth2 auth config: {}", e)))?;
        let grant = match cfg.grant_type.as_str() {
            "client_credentials" => {
                let client_secret = cfg.client_secret.ok_or_else(|| {
                    ErrorKind::Config("oauth2 client_credentials requires client_secret".into())
                })?;
                Grant::ClientCredentials { client_id: cfg.client_id, client_secret, scope: cfg.scope }
            }
            "password" => {
                let username = cfg
                    .username
                    .ok_or_else(|| ErrorKind::Config("oauth2 password grant requires username".into()))?;
                let password = cfg
                    .password
                    .ok_or_else(|| ErrorKind::Config("oauth2 password grant requires password".into()))?;
                Grant::Password {
                    client_id: cfg.client_id,
                    client_secret: cfg.client_secret,
                    username,
                    password,
                    scope: cfg.scope,
                }
            }
            other => {
                return Err(ErrorKind::Config(format!("unsupported oauth2 grant_type '{}'", other)).into())
            }
        };
        Ok(OAuth2Method { token_url: cfg.token_url, grant, client: reqwest::Client::new() })
    }
}

#[async_trait]
impl Method for OAuth2Method {
    async fn acquire(&self) -> Result<String> {
        let mut form: Vec<(&str, &str)> = Vec::new();
        match &self.grant {
            Grant::ClientCredentials { client_id, client_secret, scope } => {
                form.push(("grant_type", "client_credentials"));
                form.push(("client_id", client_id));
                form.push(("client_secret", client_secret));
                if let Some(scope) = scope {
                    form.push(("scope", scope));
                }
            }
            Grant::Password { client_id, client_secret, username, password, scope } => {
                form.push(("grant_type", "password"));
                form.push(("client_id", client_id));
                if let Some(secret) = client_secret {
                    form.push(("client_secret", secret));
                }
                form.push(("username", username));
                form.push(("password", password));
                if let Some(scope) = scope {
                    form.push(("scope", scope));
                }
            }
        }

        let res = self
            .client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| ErrorKind::Transport(self.token_url.clone(), e.to_string()))?;

        if !res.status().is_success() {
            let status = res.status();
            return Err(ErrorKind::Response(self.token_url.clone(), status.as_u16(), vec!["2xx".into()]).into());
        }

        let body: TokenResponse = res
            .json()
            .await
            .map_err(|e| ErrorKind::Extraction("access_token".into(), e.to_string()))?;
        Ok(body.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn client_credentials_extracts_access_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"t-cc-env","token_type":"Bearer"}"#)
            .create_async()
            .await;

        let method = OAuth2Method::from_config(serde_json::json!({
            "token_url": format!("{}/token", server.url()),
            "grant_type": "client_credentials",
            "client_id": "id",
            "client_secret": "secret",
        }))
        .unwrap();

        let token = method.acquire().await.unwrap();
        assert_eq!(token, "t-cc-env");
        mock.assert_async().await;
    }
}
