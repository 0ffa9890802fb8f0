use std::fmt::{self, Display};

use failure::{Backtrace, Context, Fail};

/// All main errors that can happen while rendering, requesting, persisting
/// or orchestrating a migration.
#[derive(Debug)]
pub struct Error {
    inner: Context<ErrorKind>,
}

/// The unified error taxonomy shared by the executor, the auth registry,
/// the store and the stage orchestrator.
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "{}", _0)]
    Config(String),

    #[fail(display = "{}", _0)]
    Discovery(String),

    #[fail(display = "failed to render '{}': {}", _0, _1)]
    Render(String, String),

    #[fail(display = "auth '{}' could not be acquired: {}", _0, _1)]
    Auth(String, String),

    #[fail(display = "request to '{}' failed: {}", _0, _1)]
    Transport(String, String),

    #[fail(display = "response from '{}' had status {}, expected one of {:?}", _0, _1, _2)]
    Response(String, u16, Vec<String>),

    #[fail(display = "could not extract '{}' from response: {}", _0, _1)]
    Extraction(String, String),

    #[fail(display = "store error: {}", _0)]
    Store(String),

    #[fail(display = "stage '{}' depends on unknown or unresolved stage '{}'", _0, _1)]
    Dependency(String, String),

    #[fail(display = "cycle detected in stage graph: {}", _0)]
    Cycle(String),

    #[fail(display = "'{}' timed out after {:?}", _0, _1)]
    Timeout(String, std::time::Duration),

    #[fail(display = "operation was cancelled")]
    Cancellation,
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.inner, f)
    }
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.inner.get_context()
    }

    /// True if the store should retry this error per its classification policy.
    pub fn is_retryable_store_error(&self, patterns: &[String]) -> bool {
        let msg = match self.kind() {
            ErrorKind::Store(m) => m.to_lowercase(),
            _ => return false,
        };
        patterns.iter().any(|p| msg.contains(&p.to_lowercase()))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error { inner: Context::new(kind) }
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(inner: Context<ErrorKind>) -> Error {
        Error { inner }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
