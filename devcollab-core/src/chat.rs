//! Room-bound chat surface.
//!
//! `ChatSurface` owns at most one channel binding at a time. Binding a room
//! always releases the previous binding first, so events from the old channel
//! can never reach the new room's store. The store is owned by the binding
//! and is discarded with it.

use chrono::{DateTime, Local};
use std::sync::Arc;
use thiserror::Error;

use crate::models::{Identity, Message};
use crate::realtime::{BroadcastEvent, Channel, RealtimeClient, RealtimeError};

/// Broadcast event name carrying chat messages.
pub const MESSAGE_EVENT: &str = "message";

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error("Not signed in")]
    NoIdentity,

    #[error("No room is bound")]
    NoRoom,

    #[error("Chat surface has been unmounted")]
    Unmounted,

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Realtime(#[from] RealtimeError),
}

/// Every client using the same room key converges on this channel.
pub fn channel_name(room: &str) -> String {
    format!("chat-{}", room)
}

// ============================================================================
// MessageStore
// ============================================================================

/// Append-only message log for one room, in arrival order.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` (and keeps the log unchanged) if a message with the
    /// same id is already present.
    pub fn append(&mut self, message: Message) -> bool {
        if self.messages.iter().any(|m| m.id == message.id) {
            tracing::debug!(id = %message.id, "Dropping duplicate message");
            return false;
        }
        self.messages.push(message);
        true
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

// ============================================================================
// Composer
// ============================================================================

/// Builds outgoing messages. Ids are `<identity id>-<millis>`; the millis
/// component is kept strictly increasing so two sends within one millisecond
/// still get distinct ids.
#[derive(Debug, Default)]
pub struct Composer {
    last_millis: i64,
}

impl Composer {
    pub fn compose(&mut self, identity: &Identity, raw: &str) -> Option<Message> {
        self.compose_at(identity, raw, Local::now())
    }

    pub fn compose_at(
        &mut self,
        identity: &Identity,
        raw: &str,
        now: DateTime<Local>,
    ) -> Option<Message> {
        let content = raw.trim();
        if content.is_empty() {
            return None;
        }

        let millis = now.timestamp_millis().max(self.last_millis + 1);
        self.last_millis = millis;

        Some(Message {
            id: format!("{}-{}", identity.id, millis),
            sender_id: identity.id.clone(),
            sender_name: identity.display_name.clone(),
            sender_avatar: identity.avatar_url.clone(),
            content: content.to_string(),
            sent_at_display: now.format("%-I:%M %p").to_string(),
        })
    }
}

// ============================================================================
// ChatSurface
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceState {
    Unauthenticated,
    NoRoom,
    Bound(String),
    Unbound,
}

struct RoomBinding {
    room: String,
    channel: Box<dyn Channel>,
    store: MessageStore,
}

impl RoomBinding {
    fn accept(&mut self, event: BroadcastEvent) -> Option<Message> {
        if event.event != MESSAGE_EVENT {
            return None;
        }
        match serde_json::from_value::<Message>(event.payload) {
            Ok(message) => {
                if self.store.append(message.clone()) {
                    Some(message)
                } else {
                    None
                }
            }
            Err(e) => {
                tracing::warn!(room = %self.room, error = %e, "Ignoring malformed chat payload");
                None
            }
        }
    }
}

pub struct ChatSurface {
    realtime: Arc<dyn RealtimeClient>,
    identity: Option<Identity>,
    binding: Option<RoomBinding>,
    composer: Composer,
    unmounted: bool,
}

impl ChatSurface {
    pub fn new(realtime: Arc<dyn RealtimeClient>) -> Self {
        Self {
            realtime,
            identity: None,
            binding: None,
            composer: Composer::default(),
            unmounted: false,
        }
    }

    pub fn state(&self) -> SurfaceState {
        if self.unmounted {
            return SurfaceState::Unbound;
        }
        match (&self.identity, &self.binding) {
            (None, _) => SurfaceState::Unauthenticated,
            (Some(_), None) => SurfaceState::NoRoom,
            (Some(_), Some(b)) => SurfaceState::Bound(b.room.clone()),
        }
    }

    /// Set the identity once it is resolved. Later calls are ignored: an
    /// identity does not change within a session, and a retired surface
    /// takes no state at all.
    pub fn authenticate(&mut self, identity: Identity) {
        if self.unmounted {
            tracing::debug!(id = %identity.id, "Identity resolved after unmount, dropped");
            return;
        }
        if self.identity.is_none() {
            self.identity = Some(identity);
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn room(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.room.as_str())
    }

    /// Messages of the bound room, oldest first.
    pub fn messages(&self) -> &[Message] {
        self.binding
            .as_ref()
            .map(|b| b.store.messages())
            .unwrap_or(&[])
    }

    /// Bind `room` with a fresh store, releasing any current binding first.
    /// A room can only be bound once an identity is resolved.
    pub async fn bind(&mut self, room: &str) -> Result<(), ChatError> {
        if self.unmounted {
            return Err(ChatError::Unmounted);
        }
        if self.identity.is_none() {
            return Err(ChatError::NoIdentity);
        }
        self.unbind().await;

        let topic = channel_name(room);
        let channel = self.realtime.subscribe(&topic, MESSAGE_EVENT).await?;
        self.binding = Some(RoomBinding {
            room: room.to_string(),
            channel,
            store: MessageStore::new(),
        });
        tracing::info!(room, topic = %topic, "Bound chat room");
        Ok(())
    }

    pub async fn unbind(&mut self) {
        if let Some(mut binding) = self.binding.take() {
            if let Err(e) = binding.channel.unsubscribe().await {
                tracing::warn!(room = %binding.room, error = %e, "Unsubscribe failed");
            }
            tracing::info!(room = %binding.room, "Unbound chat room");
        }
    }

    /// Release the binding for good. The surface accepts no further binds.
    pub async fn unmount(&mut self) {
        self.unbind().await;
        self.unmounted = true;
    }

    /// Compose, append locally, then publish. Rejected input changes nothing.
    ///
    /// A publish failure is logged and the message stays in the local log.
    pub async fn send(&mut self, raw: &str) -> Result<Message, ChatError> {
        if raw.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let identity = self.identity.as_ref().ok_or(ChatError::NoIdentity)?;
        let binding = self.binding.as_mut().ok_or(ChatError::NoRoom)?;

        let message = self
            .composer
            .compose(identity, raw)
            .ok_or(ChatError::EmptyMessage)?;
        let payload = serde_json::to_value(&message)?;

        binding.store.append(message.clone());

        if let Err(e) = binding.channel.send(MESSAGE_EVENT, payload).await {
            tracing::warn!(room = %binding.room, id = %message.id, error = %e, "Publish failed");
        }
        Ok(message)
    }

    /// Apply every inbound event that is already queued. Returns how many
    /// messages were appended.
    pub fn pump(&mut self) -> usize {
        let Some(binding) = self.binding.as_mut() else {
            return 0;
        };
        let mut appended = 0;
        while let Some(event) = binding.channel.try_recv() {
            if binding.accept(event).is_some() {
                appended += 1;
            }
        }
        appended
    }

    /// Wait for the next inbound message and append it. `None` when no room
    /// is bound or the channel has closed.
    pub async fn next_inbound(&mut self) -> Option<Message> {
        let binding = self.binding.as_mut()?;
        loop {
            let event = binding.channel.recv().await?;
            if let Some(message) = binding.accept(event) {
                return Some(message);
            }
        }
    }
}
