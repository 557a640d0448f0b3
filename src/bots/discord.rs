//! Discord bot worker — minimal gateway session.
//!
//! Connects to the gateway websocket, identifies, and answers heartbeats.
//! Dispatch events are drained and logged at debug; anything that ends the
//! session surfaces as a `WorkerError` so the supervisor reconnects it.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::{StopError, WorkerError};
use crate::worker::Worker;

const GATEWAY_ENDPOINT: &str = "https://discord.com/api/v10/gateway";
const HELLO_TIMEOUT: Duration = Duration::from_secs(30);

// Gateway opcodes this session speaks.
const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

/// Discord session worker, holding one identified gateway connection.
pub struct DiscordBot {
    token: SecretString,
    client: reqwest::Client,
    stop_tx: watch::Sender<bool>,
}

#[derive(Debug, Deserialize)]
struct GatewayInfo {
    url: String,
}

#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(default)]
    d: Option<serde_json::Value>,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

impl DiscordBot {
    pub fn new(token: SecretString) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            token,
            client: reqwest::Client::new(),
            stop_tx,
        }
    }

    fn fault(reason: impl Into<String>) -> WorkerError {
        WorkerError::ConnectionFailed {
            worker: "discord".into(),
            reason: reason.into(),
        }
    }

    fn lost(reason: impl Into<String>) -> WorkerError {
        WorkerError::SessionLost {
            worker: "discord".into(),
            reason: reason.into(),
        }
    }

    async fn gateway_url(&self) -> Result<String, WorkerError> {
        let info: GatewayInfo = self
            .client
            .get(GATEWAY_ENDPOINT)
            .send()
            .await
            .map_err(|e| Self::fault(e.to_string()))?
            .json()
            .await
            .map_err(|e| Self::fault(format!("gateway endpoint returned invalid JSON: {e}")))?;
        Ok(format!("{}/?v=10&encoding=json", info.url))
    }

    fn identify_payload(&self) -> serde_json::Value {
        json!({
            "op": OP_IDENTIFY,
            "d": {
                "token": self.token.expose_secret(),
                "intents": 0,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "bot-runner",
                    "device": "bot-runner",
                },
            },
        })
    }
}

#[async_trait]
impl Worker for DiscordBot {
    async fn run(&self) -> Result<(), WorkerError> {
        let url = self.gateway_url().await?;
        let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| Self::fault(e.to_string()))?;
        let (mut tx, mut rx) = ws.split();

        // The first frame must be Hello, carrying the heartbeat interval.
        let hello = tokio::time::timeout(HELLO_TIMEOUT, rx.next())
            .await
            .map_err(|_| Self::fault("timed out waiting for gateway hello"))?
            .ok_or_else(|| Self::lost("gateway closed before hello"))?
            .map_err(|e| Self::lost(e.to_string()))?;
        let heartbeat_ms = match parse_payload(&hello)? {
            Some(p) if p.op == OP_HELLO => p
                .d
                .as_ref()
                .and_then(|d| d.get("heartbeat_interval"))
                .and_then(|v| v.as_u64())
                .ok_or_else(|| protocol("hello carried no heartbeat_interval"))?,
            _ => return Err(protocol("expected hello as first gateway frame")),
        };

        tx.send(Message::Text(self.identify_payload().to_string().into()))
            .await
            .map_err(|e| Self::lost(e.to_string()))?;
        info!(bot = "discord", heartbeat_ms, "Connected to Discord gateway");

        // First heartbeat is jittered per the gateway contract.
        let first_beat = Duration::from_millis(
            (heartbeat_ms as f64 * rand::thread_rng().gen_range(0.0..1.0)) as u64,
        );
        tokio::time::sleep(first_beat).await;

        let mut heartbeat = tokio::time::interval(Duration::from_millis(heartbeat_ms));
        let mut seq: Option<u64> = None;
        let mut stop_rx = self.stop_tx.subscribe();

        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    let _ = tx.send(Message::Close(None)).await;
                    info!(bot = "discord", "Stop requested; gateway closed");
                    return Ok(());
                }
                _ = heartbeat.tick() => {
                    let beat = json!({ "op": OP_HEARTBEAT, "d": seq });
                    tx.send(Message::Text(beat.to_string().into()))
                        .await
                        .map_err(|e| Self::lost(e.to_string()))?;
                }
                frame = rx.next() => {
                    let msg = match frame {
                        None => return Err(Self::lost("gateway connection closed")),
                        Some(Err(e)) => return Err(Self::lost(e.to_string())),
                        Some(Ok(msg)) => msg,
                    };
                    let Some(payload) = parse_payload(&msg)? else {
                        continue;
                    };
                    if let Some(s) = payload.s {
                        seq = Some(s);
                    }
                    match payload.op {
                        OP_DISPATCH => {
                            debug!(
                                bot = "discord",
                                event = payload.t.as_deref().unwrap_or("<unknown>"),
                                "Gateway dispatch"
                            );
                        }
                        OP_HEARTBEAT => {
                            // Server asked for an immediate beat.
                            let beat = json!({ "op": OP_HEARTBEAT, "d": seq });
                            tx.send(Message::Text(beat.to_string().into()))
                                .await
                                .map_err(|e| Self::lost(e.to_string()))?;
                        }
                        OP_HEARTBEAT_ACK => {
                            debug!(bot = "discord", "Heartbeat acknowledged");
                        }
                        OP_RECONNECT => {
                            return Err(Self::lost("gateway requested reconnect"));
                        }
                        OP_INVALID_SESSION => {
                            return Err(protocol("gateway invalidated the session"));
                        }
                        other => {
                            warn!(bot = "discord", op = other, "Unhandled gateway opcode");
                        }
                    }
                }
            }
        }
    }

    async fn request_stop(&self) -> Result<(), StopError> {
        self.stop_tx.send_replace(true);
        Ok(())
    }
}

fn protocol(reason: impl Into<String>) -> WorkerError {
    WorkerError::Protocol {
        worker: "discord".into(),
        reason: reason.into(),
    }
}

/// Decode a gateway frame. Non-text frames (pings, pongs) carry no payload.
/// A Close frame ends the session.
fn parse_payload(msg: &Message) -> Result<Option<GatewayPayload>, WorkerError> {
    match msg {
        Message::Text(text) => serde_json::from_str(text.as_str())
            .map(Some)
            .map_err(|e| protocol(format!("undecodable gateway frame: {e}"))),
        Message::Close(frame) => Err(DiscordBot::lost(match frame {
            Some(f) => format!("gateway sent close: {} {}", f.code, f.reason),
            None => "gateway sent close".to_string(),
        })),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_payload_parses_heartbeat_interval() {
        let raw = r#"{"op":10,"d":{"heartbeat_interval":41250}}"#;
        let msg = Message::Text(raw.to_string().into());
        let payload = parse_payload(&msg).unwrap().unwrap();
        assert_eq!(payload.op, OP_HELLO);
        assert_eq!(
            payload.d.unwrap()["heartbeat_interval"].as_u64(),
            Some(41250)
        );
    }

    #[test]
    fn dispatch_payload_tracks_sequence_and_event() {
        let raw = r#"{"op":0,"t":"MESSAGE_CREATE","s":42,"d":{}}"#;
        let msg = Message::Text(raw.to_string().into());
        let payload = parse_payload(&msg).unwrap().unwrap();
        assert_eq!(payload.op, OP_DISPATCH);
        assert_eq!(payload.s, Some(42));
        assert_eq!(payload.t.as_deref(), Some("MESSAGE_CREATE"));
    }

    #[test]
    fn close_frame_is_a_session_loss() {
        let msg = Message::Close(None);
        assert!(matches!(
            parse_payload(&msg),
            Err(WorkerError::SessionLost { .. })
        ));
    }

    #[test]
    fn identify_payload_never_leaks_beyond_token_field() {
        let bot = DiscordBot::new(SecretString::from("s3cret"));
        let payload = bot.identify_payload();
        assert_eq!(payload["op"].as_u64(), Some(OP_IDENTIFY as u64));
        assert_eq!(payload["d"]["token"].as_str(), Some("s3cret"));
        assert_eq!(payload["d"]["intents"].as_u64(), Some(0));
    }
}
