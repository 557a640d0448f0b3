//! Error types for the bot runner.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Stop error: {0}")]
    Stop(#[from] StopError),

    /// Lifecycle misuse: a supervisor runs a single start/stop cycle.
    #[error("Supervisor already started; it runs one start/stop cycle per process")]
    AlreadyStarted,
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No bots are enabled. Set ENABLE_TELEGRAM_BOT or ENABLE_DISCORD_BOT.")]
    NoWorkersEnabled,
}

/// Faults raised by a worker's `run()`. Caught at the supervised-task
/// boundary and fed into the restart policy; never escalated to siblings.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("{worker} connection failed: {reason}")]
    ConnectionFailed { worker: String, reason: String },

    #[error("{worker} session lost: {reason}")]
    SessionLost { worker: String, reason: String },

    #[error("Authentication failed for {worker}")]
    AuthFailed { worker: String },

    #[error("{worker} protocol error: {reason}")]
    Protocol { worker: String, reason: String },
}

/// Faults raised by a worker's `request_stop()` during shutdown.
/// Logged per worker; shutdown of the remaining workers continues.
#[derive(Debug, thiserror::Error)]
pub enum StopError {
    #[error("Failed to signal stop to {worker}: {reason}")]
    SignalFailed { worker: String, reason: String },
}

/// Result type alias for the bot runner.
pub type Result<T> = std::result::Result<T, Error>;
