//! Realtime client speaking the backend's Phoenix channel protocol over a
//! WebSocket (`/realtime/v1/websocket`, protocol `vsn=1.0.0`).
//!
//! Each subscription owns one socket and one background task. The task
//! relays inbound broadcasts, writes outbound ones, and heartbeats. Dropping
//! the channel ends the task after a `phx_leave`.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{BroadcastEvent, Channel, RealtimeClient, RealtimeError};
use crate::config::{BackendConfig, RealtimeConfig};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Frames
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl Frame {
    fn encode(&self) -> Result<String, RealtimeError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Wire topic for a channel name.
pub fn wire_topic(topic: &str) -> String {
    format!("realtime:{}", topic)
}

pub fn join_frame(topic: &str, access_token: &str, reference: u64) -> Frame {
    Frame {
        topic: wire_topic(topic),
        event: "phx_join".to_string(),
        payload: json!({
            "config": {
                "broadcast": { "self": false, "ack": false },
                "presence": { "key": "" },
                "postgres_changes": []
            },
            "access_token": access_token
        }),
        reference: Some(reference.to_string()),
    }
}

pub fn broadcast_frame(topic: &str, event: &str, payload: Value, reference: u64) -> Frame {
    Frame {
        topic: wire_topic(topic),
        event: "broadcast".to_string(),
        payload: json!({ "type": "broadcast", "event": event, "payload": payload }),
        reference: Some(reference.to_string()),
    }
}

pub fn heartbeat_frame(reference: u64) -> Frame {
    Frame {
        topic: "phoenix".to_string(),
        event: "heartbeat".to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    }
}

pub fn leave_frame(topic: &str, reference: u64) -> Frame {
    Frame {
        topic: wire_topic(topic),
        event: "phx_leave".to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    }
}

/// What an inbound frame means for a subscription to `topic`/`event`.
#[derive(Debug, PartialEq)]
pub enum Inbound {
    Broadcast(BroadcastEvent),
    Reply {
        reference: Option<String>,
        ok: bool,
        response: Value,
    },
    Closed,
    Ignored,
}

pub fn classify(text: &str, topic: &str, event: &str) -> Result<Inbound, RealtimeError> {
    let frame: Frame = serde_json::from_str(text)?;
    let wire = wire_topic(topic);

    let inbound = match frame.event.as_str() {
        "phx_reply" => Inbound::Reply {
            reference: frame.reference,
            ok: frame.payload["status"] == "ok",
            response: frame.payload["response"].clone(),
        },
        "broadcast" if frame.topic == wire && frame.payload["event"] == event => {
            Inbound::Broadcast(BroadcastEvent {
                event: event.to_string(),
                payload: frame.payload["payload"].clone(),
            })
        }
        "phx_close" | "phx_error" if frame.topic == wire => Inbound::Closed,
        _ => Inbound::Ignored,
    };
    Ok(inbound)
}

/// `https://x.supabase.co` -> `wss://x.supabase.co/realtime/v1/websocket?apikey=..&vsn=1.0.0`
pub fn socket_url(backend: &BackendConfig) -> Result<String, RealtimeError> {
    let ws_base = if let Some(rest) = backend.url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = backend.url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        return Err(RealtimeError::InvalidUrl(backend.url.clone()));
    };

    let mut url = reqwest::Url::parse(&format!(
        "{}/realtime/v1/websocket",
        ws_base.trim_end_matches('/')
    ))
    .map_err(|e| RealtimeError::InvalidUrl(e.to_string()))?;
    url.query_pairs_mut()
        .append_pair("apikey", &backend.anon_key)
        .append_pair("vsn", "1.0.0");
    Ok(url.to_string())
}

// ============================================================================
// SupabaseRealtime
// ============================================================================

#[derive(Debug, Clone)]
pub struct SupabaseRealtime {
    backend: BackendConfig,
    config: RealtimeConfig,
    access_token: Option<String>,
}

impl SupabaseRealtime {
    pub fn new(backend: BackendConfig, config: RealtimeConfig) -> Self {
        Self {
            backend,
            config,
            access_token: None,
        }
    }

    /// Join channels as the signed-in user (session JWT) instead of with the
    /// public key. Needed when the backend authorizes channels per user.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into()).filter(|t: &String| !t.is_empty());
        self
    }

    fn join_token(&self) -> &str {
        self.access_token
            .as_deref()
            .unwrap_or(self.backend.anon_key.as_str())
    }

    async fn connect(&self) -> Result<Socket, RealtimeError> {
        let url = socket_url(&self.backend)?;
        let strategy = ExponentialBackoff::from_millis(200)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(self.config.connect_retries);

        let (socket, _) = Retry::spawn(strategy, || connect_async(url.as_str()))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Realtime connect failed");
                RealtimeError::from(e)
            })?;
        Ok(socket)
    }
}

async fn await_join(socket: &mut Socket, topic: &str, event: &str, reference: &str) -> Result<(), RealtimeError> {
    loop {
        let next = tokio::time::timeout(JOIN_TIMEOUT, socket.next())
            .await
            .map_err(|_| RealtimeError::Timeout(format!("join of {}", topic)))?;
        let text = match next {
            Some(Ok(WsMessage::Text(text))) => text,
            Some(Ok(WsMessage::Close(_))) | None => return Err(RealtimeError::Closed),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        };

        if let Inbound::Reply {
            reference: Some(r),
            ok,
            response,
        } = classify(text.as_str(), topic, event)?
        {
            if r != reference {
                continue;
            }
            if ok {
                return Ok(());
            }
            return Err(RealtimeError::JoinRejected {
                topic: topic.to_string(),
                reason: response.to_string(),
            });
        }
    }
}

#[async_trait]
impl RealtimeClient for SupabaseRealtime {
    async fn subscribe(&self, topic: &str, event: &str) -> Result<Box<dyn Channel>, RealtimeError> {
        let mut socket = self.connect().await?;
        let mut next_ref: u64 = 1;

        let join = join_frame(topic, self.join_token(), next_ref).encode()?;
        socket.send(WsMessage::Text(join.into())).await?;
        await_join(&mut socket, topic, event, &next_ref.to_string()).await?;
        next_ref += 1;
        tracing::info!(topic, "Joined realtime channel");

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_socket(
            socket,
            SocketTask {
                topic: topic.to_string(),
                event: event.to_string(),
                heartbeat: Duration::from_secs(self.config.heartbeat_seconds.max(1)),
                next_ref,
            },
            inbound_tx,
            command_rx,
        ));

        Ok(Box::new(SupabaseChannel {
            topic: topic.to_string(),
            commands: Some(command_tx),
            inbound: inbound_rx,
            task: Some(task),
        }))
    }
}

// ============================================================================
// Socket task
// ============================================================================

#[derive(Debug)]
enum Command {
    Broadcast { event: String, payload: Value },
    Leave,
}

struct SocketTask {
    topic: String,
    event: String,
    heartbeat: Duration,
    next_ref: u64,
}

impl SocketTask {
    fn take_ref(&mut self) -> u64 {
        let r = self.next_ref;
        self.next_ref += 1;
        r
    }
}

async fn write_frame(socket: &mut Socket, frame: Frame) -> Result<(), RealtimeError> {
    let text = frame.encode()?;
    socket.send(WsMessage::Text(text.into())).await?;
    Ok(())
}

async fn run_socket(
    mut socket: Socket,
    mut task: SocketTask,
    inbound: mpsc::UnboundedSender<BroadcastEvent>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut ticker = tokio::time::interval(task.heartbeat);
    ticker.tick().await;

    loop {
        tokio::select! {
            frame = socket.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    match classify(text.as_str(), &task.topic, &task.event) {
                        Ok(Inbound::Broadcast(event)) => {
                            if inbound.send(event).is_err() {
                                break;
                            }
                        }
                        Ok(Inbound::Closed) => {
                            tracing::warn!(topic = %task.topic, "Realtime channel closed by server");
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => tracing::debug!(error = %e, "Ignoring malformed realtime frame"),
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(topic = %task.topic, error = %e, "Realtime socket error");
                    break;
                }
            },
            command = commands.recv() => match command {
                Some(Command::Broadcast { event, payload }) => {
                    let r = task.take_ref();
                    let frame = broadcast_frame(&task.topic, &event, payload, r);
                    // publish is fire-and-forget
                    if let Err(e) = write_frame(&mut socket, frame).await {
                        tracing::warn!(topic = %task.topic, error = %e, "Broadcast dropped");
                    }
                }
                Some(Command::Leave) | None => {
                    let r = task.take_ref();
                    let _ = write_frame(&mut socket, leave_frame(&task.topic, r)).await;
                    let _ = socket.close(None).await;
                    tracing::info!(topic = %task.topic, "Left realtime channel");
                    break;
                }
            },
            _ = ticker.tick() => {
                let r = task.take_ref();
                if let Err(e) = write_frame(&mut socket, heartbeat_frame(r)).await {
                    tracing::warn!(topic = %task.topic, error = %e, "Heartbeat failed");
                    break;
                }
            }
        }
    }
}

// ============================================================================
// SupabaseChannel
// ============================================================================

pub struct SupabaseChannel {
    topic: String,
    commands: Option<mpsc::UnboundedSender<Command>>,
    inbound: mpsc::UnboundedReceiver<BroadcastEvent>,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl Channel for SupabaseChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn send(&mut self, event: &str, payload: Value) -> Result<(), RealtimeError> {
        let commands = self.commands.as_ref().ok_or(RealtimeError::Closed)?;
        commands
            .send(Command::Broadcast {
                event: event.to_string(),
                payload,
            })
            .map_err(|_| RealtimeError::Closed)
    }

    async fn recv(&mut self) -> Option<BroadcastEvent> {
        self.commands.as_ref()?;
        self.inbound.recv().await
    }

    fn try_recv(&mut self) -> Option<BroadcastEvent> {
        self.commands.as_ref()?;
        self.inbound.try_recv().ok()
    }

    async fn unsubscribe(&mut self) -> Result<(), RealtimeError> {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Leave);
        }
        self.inbound.close();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(topic = %self.topic, error = %e, "Realtime task ended abnormally");
            }
        }
        Ok(())
    }
}
