use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use super::{BroadcastEvent, Channel, RealtimeClient, RealtimeError};

const TOPIC_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct Envelope {
    origin: u64,
    event: String,
    payload: Value,
}

struct Topic {
    tx: broadcast::Sender<Envelope>,
    subscribers: usize,
}

#[derive(Default)]
struct HubState {
    topics: HashMap<String, Topic>,
    next_id: u64,
}

/// In-process broadcast hub. Every subscriber of a topic sees every other
/// subscriber's broadcasts in publish order.
#[derive(Clone, Default)]
pub struct LocalHub {
    state: Arc<Mutex<HubState>>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock().topics.get(topic).map_or(0, |t| t.subscribers)
    }

    fn release(&self, topic: &str) {
        let mut state = self.lock();
        let remove = match state.topics.get_mut(topic) {
            Some(t) => {
                t.subscribers = t.subscribers.saturating_sub(1);
                t.subscribers == 0
            }
            None => false,
        };
        if remove {
            state.topics.remove(topic);
        }
    }
}

#[async_trait]
impl RealtimeClient for LocalHub {
    async fn subscribe(&self, topic: &str, event: &str) -> Result<Box<dyn Channel>, RealtimeError> {
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        let entry = state.topics.entry(topic.to_string()).or_insert_with(|| Topic {
            tx: broadcast::channel(TOPIC_CAPACITY).0,
            subscribers: 0,
        });
        entry.subscribers += 1;
        let tx = entry.tx.clone();
        let rx = tx.subscribe();
        drop(state);

        tracing::debug!(topic, id, "Local subscription opened");
        Ok(Box::new(LocalChannel {
            hub: self.clone(),
            topic: topic.to_string(),
            event: event.to_string(),
            id,
            tx,
            rx: Some(rx),
        }))
    }
}

pub struct LocalChannel {
    hub: LocalHub,
    topic: String,
    event: String,
    id: u64,
    tx: broadcast::Sender<Envelope>,
    rx: Option<broadcast::Receiver<Envelope>>,
}

impl LocalChannel {
    fn accept(&self, envelope: Envelope) -> Option<BroadcastEvent> {
        if envelope.origin == self.id || envelope.event != self.event {
            return None;
        }
        Some(BroadcastEvent {
            event: envelope.event,
            payload: envelope.payload,
        })
    }
}

#[async_trait]
impl Channel for LocalChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn send(&mut self, event: &str, payload: Value) -> Result<(), RealtimeError> {
        if self.rx.is_none() {
            return Err(RealtimeError::Closed);
        }
        // our own receiver keeps the topic alive, so this cannot fail
        let _ = self.tx.send(Envelope {
            origin: self.id,
            event: event.to_string(),
            payload,
        });
        Ok(())
    }

    async fn recv(&mut self) -> Option<BroadcastEvent> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.recv().await {
                Ok(envelope) => {
                    if let Some(event) = self.accept(envelope) {
                        return Some(event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(topic = %self.topic, skipped, "Local subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    fn try_recv(&mut self) -> Option<BroadcastEvent> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.try_recv() {
                Ok(envelope) => {
                    if let Some(event) = self.accept(envelope) {
                        return Some(event);
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(topic = %self.topic, skipped, "Local subscriber lagged");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    async fn unsubscribe(&mut self) -> Result<(), RealtimeError> {
        if self.rx.take().is_some() {
            self.hub.release(&self.topic);
            tracing::debug!(topic = %self.topic, id = self.id, "Local subscription closed");
        }
        Ok(())
    }
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        if self.rx.take().is_some() {
            self.hub.release(&self.topic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_others_but_not_self() {
        let hub = LocalHub::new();
        let mut alice = hub.subscribe("chat-a", "message").await.unwrap();
        let mut bob = hub.subscribe("chat-a", "message").await.unwrap();

        alice
            .send("message", serde_json::json!({ "n": 1 }))
            .await
            .unwrap();

        let got = bob.recv().await.unwrap();
        assert_eq!(got.payload["n"], 1);
        assert!(alice.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_other_events_are_filtered() {
        let hub = LocalHub::new();
        let mut alice = hub.subscribe("chat-a", "message").await.unwrap();
        let mut bob = hub.subscribe("chat-a", "message").await.unwrap();

        alice.send("typing", Value::Null).await.unwrap();
        alice.send("message", Value::from("hi")).await.unwrap();

        assert_eq!(bob.try_recv().unwrap().payload, Value::from("hi"));
        assert!(bob.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let hub = LocalHub::new();
        let mut a = hub.subscribe("chat-a", "message").await.unwrap();
        let mut b = hub.subscribe("chat-b", "message").await.unwrap();

        a.send("message", Value::from(1)).await.unwrap();
        assert!(b.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_and_drop_release_the_topic() {
        let hub = LocalHub::new();
        let mut a = hub.subscribe("chat-a", "message").await.unwrap();
        let b = hub.subscribe("chat-a", "message").await.unwrap();
        assert_eq!(hub.subscriber_count("chat-a"), 2);

        a.unsubscribe().await.unwrap();
        a.unsubscribe().await.unwrap();
        assert_eq!(hub.subscriber_count("chat-a"), 1);
        assert!(matches!(
            a.send("message", Value::Null).await,
            Err(RealtimeError::Closed)
        ));

        drop(b);
        assert_eq!(hub.subscriber_count("chat-a"), 0);
    }
}
