//! Worker contract — one long-running chat platform session.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use tracing::warn;

use crate::error::{StopError, WorkerError};

/// A long-running connection to an external chat platform.
///
/// Implementations are owned by exactly one supervised task per run; every
/// restart constructs a fresh instance through the [`WorkerSpec`] factory.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Run the session. Blocks until a stop has been requested (returns
    /// `Ok`) or an unrecoverable fault occurs. A healthy session never
    /// returns on its own.
    async fn run(&self) -> Result<(), WorkerError>;

    /// Signal the running session to begin graceful shutdown. Returns
    /// immediately after signalling; safe to call repeatedly or on a
    /// session that already stopped.
    async fn request_stop(&self) -> Result<(), StopError>;
}

/// Builds a fresh worker instance for each run attempt.
pub type WorkerFactory = Arc<dyn Fn() -> Arc<dyn Worker> + Send + Sync>;

/// Registration record for one bot. Immutable once handed to the supervisor.
#[derive(Clone)]
pub struct WorkerSpec {
    pub name: String,
    pub enabled: bool,
    pub factory: WorkerFactory,
}

impl WorkerSpec {
    pub fn new(name: impl Into<String>, enabled: bool, factory: WorkerFactory) -> Self {
        Self {
            name: name.into(),
            enabled,
            factory,
        }
    }

    /// Registration record for a platform bot whose credential may be
    /// absent. An enabled flag without its credential downgrades to
    /// disabled, with a warning naming the missing variable.
    pub fn with_credential(
        name: impl Into<String>,
        enabled: bool,
        token: Option<SecretString>,
        token_var: &str,
        build: impl Fn(SecretString) -> Arc<dyn Worker> + Send + Sync + 'static,
    ) -> Self {
        let name = name.into();
        let (enabled, token) = match (enabled, token) {
            (true, Some(token)) => (true, token),
            (true, None) => {
                warn!(bot = %name, "Bot enabled but {token_var} is not set; disabling");
                (false, SecretString::from(""))
            }
            (false, token) => (false, token.unwrap_or_else(|| SecretString::from(""))),
        };
        Self::new(name, enabled, Arc::new(move || build(token.clone())))
    }
}

impl fmt::Debug for WorkerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerSpec")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}
