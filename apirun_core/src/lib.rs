//! Core library: templated env, pluggable auth, the HTTP client, the
//! migration file model, extraction, the state store, retry policy, config
//! loading and the executor that drives them all together.

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

pub mod auth;
pub mod client;
pub mod config;
pub mod env;
pub mod error;
pub mod executor;
pub mod extract;
pub mod migration;
pub mod retry;
pub mod store;
pub mod wait;

pub use env::Env;
pub use error::ErrorKind;
pub use executor::{Executor, ExecutorConfig, StepReport, StepState};
pub use migration::MigrationFile;
pub use store::Store;
