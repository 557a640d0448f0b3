//! Configuration types.

use std::time::Duration;

use secrecy::SecretString;

/// Supervisor tuning.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Delay before restarting a crashed bot session.
    pub restart_cooldown: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            restart_cooldown: Duration::from_secs(30),
        }
    }
}

impl RunnerConfig {
    /// Read tuning from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("BOT_RESTART_COOLDOWN_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) => config.restart_cooldown = Duration::from_secs(secs),
                Err(_) => tracing::warn!(
                    value = %raw,
                    "Invalid BOT_RESTART_COOLDOWN_SECS; using default"
                ),
            }
        }
        config
    }
}

/// Per-platform enablement and credentials, read from the environment.
#[derive(Debug, Clone)]
pub struct BotsConfig {
    pub enable_telegram: bool,
    pub telegram_token: Option<SecretString>,
    pub enable_discord: bool,
    pub discord_token: Option<SecretString>,
}

impl BotsConfig {
    pub fn from_env() -> Self {
        Self {
            enable_telegram: env_flag("ENABLE_TELEGRAM_BOT"),
            telegram_token: env_secret("TELEGRAM_BOT_TOKEN"),
            enable_discord: env_flag("ENABLE_DISCORD_BOT"),
            discord_token: env_secret("DISCORD_BOT_TOKEN"),
        }
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| parse_flag(&v))
        .unwrap_or(false)
}

fn env_secret(key: &str) -> Option<SecretString> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
