//! Realtime publish/subscribe boundary.
//!
//! A `RealtimeClient` hands out one `Channel` per subscription. Events the
//! subscriber itself publishes are not delivered back to it.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub mod local;
pub mod supabase;

pub use local::LocalHub;
pub use supabase::SupabaseRealtime;

#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Join of {topic} rejected: {reason}")]
    JoinRejected { topic: String, reason: String },

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Invalid frame: {0}")]
    Frame(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Channel closed")]
    Closed,
}

/// One inbound broadcast: the event name and its JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastEvent {
    pub event: String,
    pub payload: Value,
}

#[async_trait]
pub trait Channel: Send {
    fn topic(&self) -> &str;

    /// Fire-and-forget broadcast to every other subscriber of the topic.
    async fn send(&mut self, event: &str, payload: Value) -> Result<(), RealtimeError>;

    /// Next inbound event, or `None` once the channel is closed.
    async fn recv(&mut self) -> Option<BroadcastEvent>;

    /// Next inbound event if one is already queued.
    fn try_recv(&mut self) -> Option<BroadcastEvent>;

    /// Leave the topic. Further sends fail with `RealtimeError::Closed`.
    async fn unsubscribe(&mut self) -> Result<(), RealtimeError>;
}

#[async_trait]
pub trait RealtimeClient: Send + Sync {
    /// Join `topic`, delivering only broadcasts named `event`.
    async fn subscribe(&self, topic: &str, event: &str) -> Result<Box<dyn Channel>, RealtimeError>;
}
