use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Outbound queue capacity per connection.
pub const CONNECTION_QUEUE: usize = 256;

struct ConnectionEntry {
    sender: mpsc::Sender<String>,
    user: Option<Value>,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    channels: HashMap<String, HashSet<ConnectionId>>,
}

/// A registered real-time connection: its id, a handle for direct replies and its outbound queue.
pub struct Subscription {
    pub id: ConnectionId,
    pub sender: mpsc::Sender<String>,
    pub receiver: mpsc::Receiver<String>,
}

/// Connection registry and named channel membership.
#[derive(Clone, Default)]
pub struct ChannelHub {
    inner: Arc<RwLock<HubState>>,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel(CONNECTION_QUEUE);
        let id = Uuid::new_v4();
        self.inner.write().await.connections.insert(
            id,
            ConnectionEntry {
                sender: sender.clone(),
                user: None,
            },
        );
        Subscription {
            id,
            sender,
            receiver,
        }
    }

    /// Drops the connection and its membership in every channel.
    pub async fn unregister(&self, id: ConnectionId) {
        let mut state = self.inner.write().await;
        state.connections.remove(&id);
        state.channels.retain(|_, members| {
            members.remove(&id);
            !members.is_empty()
        });
    }

    pub async fn join(&self, channel: &str, id: ConnectionId) -> bool {
        let mut state = self.inner.write().await;
        if !state.connections.contains_key(&id) {
            return false;
        }
        state
            .channels
            .entry(channel.to_string())
            .or_default()
            .insert(id)
    }

    pub async fn leave(&self, channel: &str, id: ConnectionId) -> bool {
        let mut state = self.inner.write().await;
        let Some(members) = state.channels.get_mut(channel) else {
            return false;
        };
        let removed = members.remove(&id);
        if members.is_empty() {
            state.channels.remove(channel);
        }
        removed
    }

    pub async fn set_user(&self, id: ConnectionId, user: Option<Value>) {
        if let Some(entry) = self.inner.write().await.connections.get_mut(&id) {
            entry.user = user;
        }
    }

    pub async fn user(&self, id: ConnectionId) -> Option<Value> {
        self.inner
            .read()
            .await
            .connections
            .get(&id)
            .and_then(|c| c.user.clone())
    }

    pub async fn members(&self, channel: &str) -> Vec<ConnectionId> {
        self.inner
            .read()
            .await
            .channels
            .get(channel)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Sends `message` once to every connection in any of `channels`.
    /// Returns how many connections accepted it.
    pub async fn deliver(&self, channels: &[String], message: &str) -> usize {
        let state = self.inner.read().await;
        let mut targets: HashSet<ConnectionId> = HashSet::new();
        for name in channels {
            if let Some(members) = state.channels.get(name) {
                targets.extend(members.iter().copied());
            }
        }
        let mut delivered = 0;
        for id in targets {
            let Some(conn) = state.connections.get(&id) else {
                continue;
            };
            match conn.sender.try_send(message.to_string()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(connection_id = %id, "channel_delivery_dropped_queue_full");
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivery_is_deduplicated_across_channels() {
        let hub = ChannelHub::new();
        let mut a = hub.register().await;
        let mut b = hub.register().await;
        hub.join("authenticated", a.id).await;
        hub.join("admins", a.id).await;
        hub.join("anonymous", b.id).await;

        let n = hub
            .deliver(&["authenticated".into(), "admins".into()], "hello")
            .await;
        assert_eq!(n, 1);
        assert_eq!(a.receiver.recv().await.as_deref(), Some("hello"));
        assert!(a.receiver.try_recv().is_err());
        assert!(b.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_leaves_every_channel() {
        let hub = ChannelHub::new();
        let a = hub.register().await;
        hub.join("authenticated", a.id).await;
        hub.join("anonymous", a.id).await;
        hub.unregister(a.id).await;
        assert!(hub.members("authenticated").await.is_empty());
        assert!(hub.members("anonymous").await.is_empty());
        assert_eq!(hub.connection_count().await, 0);
        assert!(!hub.join("authenticated", a.id).await);
    }

    #[tokio::test]
    async fn full_queues_drop_instead_of_blocking() {
        let hub = ChannelHub::new();
        let a = hub.register().await;
        hub.join("authenticated", a.id).await;
        for _ in 0..CONNECTION_QUEUE {
            assert_eq!(hub.deliver(&["authenticated".into()], "x").await, 1);
        }
        assert_eq!(hub.deliver(&["authenticated".into()], "x").await, 0);
        drop(a);
    }
}
