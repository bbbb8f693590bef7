//! Slack socket mode transport.
//!
//! Keeps a WebSocket connection open, acknowledges every envelope and turns
//! the payloads into [`Event`]s. Connection problems are reported as
//! [`Event::StreamError`] and retried after a delay; a rejected token is
//! reported as [`Event::InvalidAuth`] and ends the transport.

use std::time::Duration;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{is_auth_error, SlackClient};
use crate::events::{Event, MessageEvent};

#[derive(Debug, Clone, Deserialize)]
struct SocketEnvelope {
    #[serde(rename = "type")]
    envelope_type: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventCallback {
    #[serde(rename = "type")]
    callback_type: String,
    #[serde(default)]
    event: Value,
}

#[derive(Debug, Deserialize)]
struct SlackMessage {
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    ts: Option<String>,
}

#[derive(Debug, PartialEq)]
enum Inbound {
    Event(Event),
    /// Slack is about to close this connection
    Disconnect(String),
}

enum SessionEnd {
    Cancelled,
    Reconnect,
    ConsumerGone,
}

pub struct SocketTransport {
    client: SlackClient,
    reconnect_delay: Duration,
}

impl SocketTransport {
    pub fn new(client: SlackClient, reconnect_delay: Duration) -> Self {
        Self {
            client,
            reconnect_delay,
        }
    }

    /// Start delivering events in a background task until `cancel` fires or
    /// the workspace rejects our token
    pub fn spawn(
        self,
        cancel: CancellationToken,
        capacity: usize,
    ) -> (mpsc::Receiver<Event>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(self.run(tx, cancel));
        (rx, task)
    }

    async fn run(self, events: mpsc::Sender<Event>, cancel: CancellationToken) {
        loop {
            let opened = tokio::select! {
                _ = cancel.cancelled() => return,
                opened = self.client.open_socket_url() => opened,
            };

            let problem = match opened {
                Err(e) if is_auth_error(&e) => {
                    warn!("Slack rejected the app token: {:#}", e);
                    events.send(Event::InvalidAuth).await.ok();
                    return;
                }
                Err(e) => Some(format!("failed to open socket connection: {:#}", e)),
                Ok(url) => match self.run_session(&url, &events, &cancel).await {
                    Ok(SessionEnd::Cancelled) | Ok(SessionEnd::ConsumerGone) => return,
                    Ok(SessionEnd::Reconnect) => None,
                    Err(e) => Some(format!("socket session error: {:#}", e)),
                },
            };

            if let Some(problem) = problem {
                if events.send(Event::StreamError(problem)).await.is_err() {
                    return;
                }
            }

            info!("Reconnecting to Slack in {:?}", self.reconnect_delay);
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
    }

    async fn run_session(
        &self,
        url: &str,
        events: &mpsc::Sender<Event>,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd> {
        let (stream, _response) = connect_async(url)
            .await
            .context("failed to connect slack socket mode websocket")?;
        let (mut sink, mut source) = stream.split();

        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => {
                    sink.close().await.ok();
                    return Ok(SessionEnd::Cancelled);
                }
                frame = source.next() => frame,
            };

            let Some(frame) = frame else {
                return Ok(SessionEnd::Reconnect);
            };
            let frame = frame.context("failed reading slack websocket message")?;

            let envelope = match parse_frame(frame) {
                Ok(Some(envelope)) => envelope,
                Ok(None) => continue,
                Err(e) => {
                    if events
                        .send(Event::StreamError(format!("{:#}", e)))
                        .await
                        .is_err()
                    {
                        return Ok(SessionEnd::ConsumerGone);
                    }
                    continue;
                }
            };

            if let Some(envelope_id) = &envelope.envelope_id {
                let ack = json!({ "envelope_id": envelope_id }).to_string();
                sink.send(WsMessage::Text(ack.into()))
                    .await
                    .context("failed to send slack socket ack")?;
            }

            let event = match decode_envelope(&envelope) {
                Ok(Inbound::Event(event)) => event,
                Ok(Inbound::Disconnect(reason)) => {
                    info!("Slack requested disconnect: {}", reason);
                    return Ok(SessionEnd::Reconnect);
                }
                Err(e) => Event::StreamError(format!("{:#}", e)),
            };

            if events.send(event).await.is_err() {
                return Ok(SessionEnd::ConsumerGone);
            }
        }
    }
}

fn parse_frame(frame: WsMessage) -> Result<Option<SocketEnvelope>> {
    let text = match frame {
        WsMessage::Text(text) => text.as_str().to_string(),
        WsMessage::Binary(bytes) => {
            String::from_utf8(bytes.to_vec()).context("invalid utf-8 slack socket payload")?
        }
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Close(_) | WsMessage::Frame(_) => {
            return Ok(None)
        }
    };

    serde_json::from_str(&text)
        .map(Some)
        .context("failed to parse slack socket envelope")
}

fn decode_envelope(envelope: &SocketEnvelope) -> Result<Inbound> {
    match envelope.envelope_type.as_str() {
        "hello" => Ok(Inbound::Event(Event::Connected)),
        "disconnect" => Ok(Inbound::Disconnect(
            envelope.reason.clone().unwrap_or_else(|| "unknown".to_string()),
        )),
        "events_api" => decode_event_callback(&envelope.payload).map(Inbound::Event),
        other => Ok(Inbound::Event(Event::Other(other.to_string()))),
    }
}

fn decode_event_callback(payload: &Value) -> Result<Event> {
    let callback = EventCallback::deserialize(payload)
        .context("failed to decode slack event callback payload")?;
    if callback.callback_type != "event_callback" {
        return Ok(Event::Other(callback.callback_type));
    }

    let event_type = callback.event["type"].as_str().unwrap_or_default();
    if event_type != "message" {
        return Ok(Event::Other(event_type.to_string()));
    }

    let message = SlackMessage::deserialize(&callback.event)
        .context("failed to decode slack message event")?;
    if let Some(subtype) = message.subtype {
        debug!("Skipping message with subtype {}", subtype);
        return Ok(Event::Other(format!("message:{}", subtype)));
    }

    let (Some(channel), Some(user), Some(ts)) = (message.channel, message.user, message.ts) else {
        anyhow::bail!("slack message event missing channel, user or ts: {}", callback.event);
    };

    Ok(Event::Message(MessageEvent {
        channel,
        user,
        text: message.text.unwrap_or_default(),
        ts,
    }))
}
