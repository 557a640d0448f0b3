use std::sync::Arc;

use tracing::{error, info};

use bot_runner::bots::{DiscordBot, TelegramBot};
use bot_runner::config::{BotsConfig, RunnerConfig};
use bot_runner::supervisor::Supervisor;
use bot_runner::worker::{Worker, WorkerSpec};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting bot runner");

    let bots = BotsConfig::from_env();
    let specs = vec![
        WorkerSpec::with_credential(
            "telegram",
            bots.enable_telegram,
            bots.telegram_token,
            "TELEGRAM_BOT_TOKEN",
            |token| Arc::new(TelegramBot::new(token)) as Arc<dyn Worker>,
        ),
        WorkerSpec::with_credential(
            "discord",
            bots.enable_discord,
            bots.discord_token,
            "DISCORD_BOT_TOKEN",
            |token| Arc::new(DiscordBot::new(token)) as Arc<dyn Worker>,
        ),
    ];

    let supervisor = Supervisor::new(RunnerConfig::from_env());
    let result = Arc::clone(&supervisor).start(specs).await;

    // Final cleanup: every live worker gets a stop signal no matter how
    // start() returned.
    supervisor.stop().await;

    if let Err(e) = result {
        error!(error = %e, "Bot runner exited with error");
    }
    Ok(())
}
