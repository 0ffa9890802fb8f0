//! HTTP client factory. One client is built per step (or per wait probe),
//! so that TLS floor/ceiling and the insecure toggle are never shared
//! across runs with different client config.

use std::time::Duration;

use log::debug;
use serde::Deserialize;

use crate::error::ErrorKind;
use crate::Result;

/// `client` block of the config file.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ClientConfig {
    #[serde(default)]
    pub insecure: bool,
    #[serde(default)]
    pub min_tls_version: Option<String>,
    #[serde(default)]
    pub max_tls_version: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

/// Maps any of `"1.0"/"10"/"tls1.0"/"tls10"` ... `"1.3"/...` to a concrete
/// TLS version; unknown strings fall back to 0, meaning "library default".
fn parse_tls_version(raw: &str) -> Option<reqwest::tls::Version> {
    let normalized: String = raw.to_lowercase().chars().filter(|c| c.is_ascii_digit()).collect();
    match normalized.as_str() {
        "10" => Some(reqwest::tls::Version::TLS_1_0),
        "11" => Some(reqwest::tls::Version::TLS_1_1),
        "12" => Some(reqwest::tls::Version::TLS_1_2),
        "13" => Some(reqwest::tls::Version::TLS_1_3),
        _ => None,
    }
}

pub fn build(config: &ClientConfig) -> Result<reqwest::Client> {
    debug!("building http client (insecure={}, timeout={}s)", config.insecure, config.timeout_secs);
    let mut builder = reqwest::Client::builder()
        .danger_accept_invalid_certs(config.insecure)
        .timeout(Duration::from_secs(config.timeout_secs));

    if let Some(min) = config.min_tls_version.as_deref().and_then(parse_tls_version) {
        builder = builder.min_tls_version(min);
    }
    if let Some(max) = config.max_tls_version.as_deref().and_then(parse_tls_version) {
        builder = builder.max_tls_version(max);
    }

    builder.build().map_err(|e| ErrorKind::Config(format!("could not build http client: {}", e)).into())
}

/// Method dispatch used by the executor and the wait probe.
pub fn request(client: &reqwest::Client, method: &str, url: &str) -> Result<reqwest::RequestBuilder> {
    let method = method.to_uppercase();
    let builder = match method.as_str() {
        "GET" => client.get(url),
        "POST" => client.post(url),
        "PUT" => client.put(url),
        "PATCH" => client.patch(url),
        "DELETE" => client.delete(url),
        "HEAD" => client.head(url),
        "OPTIONS" => client.request(reqwest::Method::OPTIONS, url),
        other => return Err(ErrorKind::Config(format!("unsupported http method '{}'", other)).into()),
    };
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tls_string_maps_to_library_default() {
        assert_eq!(parse_tls_version("bogus"), None);
        assert_eq!(parse_tls_version("1.2"), Some(reqwest::tls::Version::TLS_1_2));
        assert_eq!(parse_tls_version("tls10"), Some(reqwest::tls::Version::TLS_1_0));
    }
}
