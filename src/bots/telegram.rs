//! Telegram bot worker — keeps a long-polling session against the Bot API.
//!
//! Deliberately thin: it validates the token, holds the `getUpdates` long
//! poll open, and advances the offset. It implements no command handling
//! and no retry of its own — reconnecting after a fault is the
//! supervisor's job.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{StopError, WorkerError};
use crate::worker::Worker;

/// How long one `getUpdates` call is held open server-side.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Telegram session worker, long-polling the Bot API.
pub struct TelegramBot {
    token: SecretString,
    client: reqwest::Client,
    stop_tx: watch::Sender<bool>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Me {
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
}

impl TelegramBot {
    pub fn new(token: SecretString) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            token,
            client: reqwest::Client::new(),
            stop_tx,
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{method}",
            self.token.expose_secret()
        )
    }

    fn fault(reason: impl Into<String>) -> WorkerError {
        WorkerError::ConnectionFailed {
            worker: "telegram".into(),
            reason: reason.into(),
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, WorkerError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::fault(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(WorkerError::AuthFailed {
                worker: "telegram".into(),
            });
        }

        let status = resp.status();
        let parsed: ApiResponse<T> = resp
            .json()
            .await
            .map_err(|e| Self::fault(format!("{method} returned invalid JSON: {e}")))?;

        if !parsed.ok || !status.is_success() {
            return Err(WorkerError::SessionLost {
                worker: "telegram".into(),
                reason: parsed
                    .description
                    .unwrap_or_else(|| format!("{method} failed with status {status}")),
            });
        }
        parsed.result.ok_or_else(|| WorkerError::Protocol {
            worker: "telegram".into(),
            reason: format!("{method} response carried no result"),
        })
    }

    async fn get_me(&self) -> Result<Me, WorkerError> {
        self.call("getMe", serde_json::json!({})).await
    }

    async fn poll_updates(&self, offset: i64) -> Result<Vec<Update>, WorkerError> {
        self.call(
            "getUpdates",
            serde_json::json!({
                "offset": offset,
                "timeout": POLL_TIMEOUT_SECS,
            }),
        )
        .await
    }
}

#[async_trait]
impl Worker for TelegramBot {
    async fn run(&self) -> Result<(), WorkerError> {
        let me = self.get_me().await?;
        info!(
            bot = "telegram",
            username = me.username.as_deref().unwrap_or("<unknown>"),
            "Connected to Telegram"
        );

        let mut stop_rx = self.stop_tx.subscribe();
        let mut offset: i64 = 0;
        loop {
            if *stop_rx.borrow() {
                info!(bot = "telegram", "Stop requested; closing session");
                return Ok(());
            }

            tokio::select! {
                res = self.poll_updates(offset) => {
                    let updates = res?;
                    if let Some(max_id) = updates.iter().map(|u| u.update_id).max() {
                        debug!(bot = "telegram", count = updates.len(), "Updates received");
                        offset = max_id + 1;
                    }
                }
                _ = stop_rx.changed() => {
                    info!(bot = "telegram", "Stop requested; closing session");
                    return Ok(());
                }
            }
        }
    }

    async fn request_stop(&self) -> Result<(), StopError> {
        // Later calls are no-ops; the flag only ever flips to true.
        self.stop_tx.send_replace(true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_url_embeds_token_and_method() {
        let bot = TelegramBot::new(SecretString::from("123:abc"));
        assert_eq!(
            bot.api_url("getUpdates"),
            "https://api.telegram.org/bot123:abc/getUpdates"
        );
    }

    #[tokio::test]
    async fn stopped_session_returns_ok_without_polling() {
        let bot = TelegramBot::new(SecretString::from("123:abc"));
        bot.request_stop().await.unwrap();
        // A second stop is a no-op.
        bot.request_stop().await.unwrap();
        assert!(*bot.stop_tx.subscribe().borrow());
    }

    #[test]
    fn update_batches_deserialize() {
        let raw = r#"{"ok":true,"result":[{"update_id":7},{"update_id":9}]}"#;
        let parsed: ApiResponse<Vec<Update>> = serde_json::from_str(raw).unwrap();
        assert!(parsed.ok);
        let ids: Vec<i64> = parsed
            .result
            .unwrap()
            .iter()
            .map(|u| u.update_id)
            .collect();
        assert_eq!(ids, vec![7, 9]);
    }
}
