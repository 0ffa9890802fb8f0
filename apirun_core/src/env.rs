//! Three-layer variable namespace (`auth`, `env`/global, local-per-task) and
//! the lazy credential values the auth registry installs into it.
//!
//! Rendering is done with `tera`. Its default behaviour of failing a render
//! when a referenced variable is absent from the context is exactly the
//! strict-undefined-key semantics this layer needs.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;
use tera::{Context, Tera};
use tokio::sync::{Mutex, OnceCell};

use crate::error::{Error, ErrorKind};
use crate::Result;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
type Resolver = Box<dyn FnOnce() -> BoxFuture<'static, Result<String>> + Send>;

/// A credential resolver memoized on first stringification.
///
/// The resolver closure is consumed exactly once; everyone who calls
/// `resolve` after that sees the cached value, or the cached error.
pub struct LazyValue {
    name: String,
    resolver: Mutex<Option<Resolver>>,
    cached: OnceCell<std::result::Result<String, String>>,
}

impl LazyValue {
    pub fn new<F>(name: impl Into<String>, resolver: F) -> LazyValue
    where
        F: FnOnce() -> BoxFuture<'static, Result<String>> + Send + 'static,
    {
        LazyValue {
            name: name.into(),
            resolver: Mutex::new(Some(Box::new(resolver))),
            cached: OnceCell::new(),
        }
    }

    /// A lazy value that is already known (used in tests and for values
    /// seeded directly from config rather than acquired over HTTP).
    pub fn eager(name: impl Into<String>, value: impl Into<String>) -> LazyValue {
        let value = value.into();
        LazyValue::new(name, move || Box::pin(async move { Ok(value) }))
    }

    pub async fn resolve(&self) -> Result<String> {
        let name = self.name.clone();
        let cached = self
            .cached
            .get_or_init(|| async {
                let taken = {
                    let mut guard = self.resolver.lock().await;
                    guard.take()
                };
                match taken {
                    Some(resolver) => resolver().await.map_err(|e| e.to_string()),
                    None => Err("lazy value resolver already consumed".to_string()),
                }
            })
            .await;
        cached
            .clone()
            .map_err(|msg| Error::from(ErrorKind::Auth(name, msg)))
    }
}

/// The three-layer env tree the executor renders requests against.
#[derive(Default)]
pub struct Env {
    pub auth: HashMap<String, Arc<LazyValue>>,
    pub global: HashMap<String, String>,
    pub local: HashMap<String, String>,
}

impl Env {
    pub fn new() -> Env {
        Env::default()
    }

    /// Local env reset between steps; auth and global survive for the whole run.
    pub fn reset_local(&mut self) {
        self.local.clear();
    }

    fn merged_env(&self) -> HashMap<String, String> {
        let mut merged = self.global.clone();
        merged.extend(self.local.clone());
        merged
    }

    async fn auth_context(&self, template: &str) -> Result<HashMap<String, String>> {
        let re = Regex::new(r"auth\.([A-Za-z0-9_-]+)").expect("static regex");
        let mut out = HashMap::new();
        for cap in re.captures_iter(template) {
            let key = &cap[1];
            if out.contains_key(key) {
                continue;
            }
            if let Some(lazy) = self.auth.get(key) {
                out.insert(key.to_string(), lazy.resolve().await?);
            }
        }
        Ok(out)
    }

    /// Render a single template string against local > global precedence,
    /// plus the grouped `env.*` and `auth.*` namespaces.
    pub async fn render(&self, template: &str) -> Result<String> {
        if !template.contains("{{") {
            // Cheap path: most header/url values have no template at all.
            return Ok(template.to_string());
        }
        let merged = self.merged_env();
        let auth_ctx = self.auth_context(template).await?;

        let mut ctx = Context::new();
        for (k, v) in &merged {
            ctx.insert(k, v);
        }
        ctx.insert("env", &merged);
        ctx.insert("auth", &auth_ctx);

        Tera::one_off(template, &ctx, false)
            .map_err(|e| Error::from(ErrorKind::Render(template.to_string(), e.to_string())))
    }

    /// Recursively render every string found in a nested JSON-ish value.
    /// Used to prepare auth provider configs before the factory runs.
    pub async fn render_any(&self, value: &Value) -> Result<Value> {
        match value {
            Value::String(s) => Ok(Value::String(self.render(s).await?)),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(Box::pin(self.render_any(item)).await?);
                }
                Ok(Value::Array(out))
            }
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), Box::pin(self.render_any(v)).await?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn flat_lookup_prefers_local_over_global() {
        let mut env = Env::new();
        env.global.insert("name".into(), "global-name".into());
        env.local.insert("name".into(), "local-name".into());
        let rendered = env.render("hello {{ name }}").await.unwrap();
        assert_eq!(rendered, "hello local-name");
    }

    #[tokio::test]
    async fn grouped_env_lookup_merges_layers() {
        let mut env = Env::new();
        env.global.insert("a".into(), "1".into());
        env.local.insert("b".into(), "2".into());
        let rendered = env.render("{{ env.a }}-{{ env.b }}").await.unwrap();
        assert_eq!(rendered, "1-2");
    }

    #[tokio::test]
    async fn missing_key_fails_render() {
        let env = Env::new();
        let err = env.render("{{ missing }}").await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Render(_, _)));
    }

    #[tokio::test]
    async fn auth_lazy_resolved_once_and_only_if_referenced() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let mut env = Env::new();
        env.auth.insert(
            "kc".into(),
            Arc::new(LazyValue::new("kc", move || {
                calls2.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move { Ok("token-1".to_string()) })
            })),
        );
        // Not referenced: resolver never runs.
        env.render("no auth here").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let rendered = env.render("Bearer {{ auth.kc }}").await.unwrap();
        assert_eq!(rendered, "Bearer token-1");
        env.render("Bearer {{ auth.kc }}").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn render_any_walks_nested_structures() {
        let mut env = Env::new();
        env.global.insert("host".into(), "example.com".into());
        let value = serde_json::json!({
            "url": "https://{{ env.host }}/token",
            "nested": ["a", "{{ env.host }}"]
        });
        let rendered = env.render_any(&value).await.unwrap();
        assert_eq!(rendered["url"], "https://example.com/token");
        assert_eq!(rendered["nested"][1], "example.com");
    }
}
