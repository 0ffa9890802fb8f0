//! Pluggable auth provider registry.
//!
//! A process-wide name -> factory map, populated once at start-of-run and
//! never mutated after, the same treatment given the default logger.

mod basic;
mod custom_jwt;
mod oauth2;
mod pocketbase;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::env::{BoxFuture, Env, LazyValue};
use crate::error::{Error, ErrorKind};
use crate::Result;

pub use basic::BasicMethod;
pub use custom_jwt::CustomJwtMethod;
pub use oauth2::OAuth2Method;
pub use pocketbase::PocketbaseMethod;

/// A resolved auth provider. `acquire` performs whatever network call (or
/// pure computation, for `custom_jwt`) is needed and returns the bare
/// credential string the templates will interpolate into an `Authorization`
/// header (the caller's YAML decides whether to prepend `Basic `/`Bearer `).
#[async_trait]
pub trait Method: Send + Sync {
    async fn acquire(&self) -> Result<String>;
}

type Factory = Arc<dyn Fn(Value) -> Result<Arc<dyn Method>> + Send + Sync>;

/// Process-wide name -> factory map. Third parties register new
/// provider types here without touching the executor.
pub struct Registry {
    factories: RwLock<HashMap<String, Factory>>,
}

impl Registry {
    fn new() -> Registry {
        let registry = Registry { factories: RwLock::new(HashMap::new()) };
        registry.register("basic", |cfg| Ok(Arc::new(BasicMethod::from_config(cfg)?)));
        registry.register("oauth2", |cfg| Ok(Arc::new(OAuth2Method::from_config(cfg)?)));
        registry.register("pocketbase", |cfg| Ok(Arc::new(PocketbaseMethod::from_config(cfg)?)));
        registry.register("custom_jwt", |cfg| Ok(Arc::new(CustomJwtMethod::from_config(cfg)?)));
        registry
    }

    pub fn register<F>(&self, provider_type: &str, factory: F)
    where
        F: Fn(Value) -> Result<Arc<dyn Method>> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .expect("auth registry lock poisoned")
            .insert(provider_type.to_string(), Arc::new(factory));
    }

    pub fn build(&self, provider_type: &str, config: Value) -> Result<Arc<dyn Method>> {
        let factories = self.factories.read().expect("auth registry lock poisoned");
        match factories.get(provider_type) {
            Some(factory) => factory(config),
            None => Err(ErrorKind::Config(format!("unknown auth provider type '{}'", provider_type)).into()),
        }
    }
}

/// The process-wide registry instance, initialized before `main` runs and
/// never mutated afterwards except through `register` for custom provider
/// types.
pub fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Registry::new)
}

/// One entry of the config file's top-level `auth[]` list.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct AuthConfig {
    /// The logical name templates reference as `{{ auth.name }}`.
    pub name: String,
    #[serde(rename = "type")]
    pub provider_type: String,
    #[serde(flatten)]
    pub config: Value,
}

/// Install every configured auth entry into `env.auth` as a lazy value.
/// Provider config strings are rendered against the current env *before*
/// the factory runs so provider config can itself reference
/// `env`/global values seeded earlier in the same config file.
pub async fn install(env: &mut Env, configs: &[AuthConfig]) -> Result<()> {
    for auth in configs {
        let rendered_config = env.render_any(&auth.config).await?;
        let method = registry().build(&auth.provider_type, rendered_config)?;
        let name = auth.name.clone();
        let lazy = LazyValue::new(name.clone(), move || -> BoxFuture<'static, Result<String>> {
            Box::pin(async move {
                method.acquire().await.map_err(|e| {
                    Error::from(ErrorKind::Auth(name.clone(), e.to_string()))
                })
            })
        });
        env.auth.insert(auth.name.clone(), Arc::new(lazy));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_provider_type_is_a_config_error() {
        let err = registry().build("nonexistent", serde_json::json!({})).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Config(_)));
    }
}
