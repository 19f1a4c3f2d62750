//! Real-time channels: which connections receive which service events.

use std::sync::Arc;

use serde_json::{Value, json};

pub mod hub;

pub use hub::{ChannelHub, ConnectionId, Subscription};

pub const ANONYMOUS: &str = "anonymous";
pub const AUTHENTICATED: &str = "authenticated";

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceEvent {
    pub path: String,
    pub event: &'static str,
    pub data: Value,
}

impl ServiceEvent {
    /// Socket event name, e.g. `users patched`.
    pub fn name(&self) -> String {
        format!("{} {}", self.path, self.event)
    }

    pub fn to_message(&self) -> String {
        json!({ "event": self.name(), "data": self.data }).to_string()
    }
}

/// Routing rules for connections and published events.
pub trait ChannelPolicy: Send + Sync {
    /// Channels a fresh connection joins.
    fn on_connection(&self) -> Vec<String> {
        vec![ANONYMOUS.to_string()]
    }

    /// Channels to leave and to join once a connection has authenticated.
    fn on_login(&self, _user: &Value) -> (Vec<String>, Vec<String>) {
        (vec![ANONYMOUS.to_string()], vec![AUTHENTICATED.to_string()])
    }

    /// Channels an event is published to. Empty means nobody.
    fn publish(&self, event: &ServiceEvent) -> Vec<String>;
}

/// Every event goes to authenticated connections.
pub struct DefaultChannelPolicy;

impl ChannelPolicy for DefaultChannelPolicy {
    fn publish(&self, _event: &ServiceEvent) -> Vec<String> {
        vec![AUTHENTICATED.to_string()]
    }
}

/// Hub plus the installed policy. Without a policy nothing is published.
#[derive(Clone)]
pub struct Channels {
    hub: ChannelHub,
    policy: Option<Arc<dyn ChannelPolicy>>,
}

impl Channels {
    pub fn new(hub: ChannelHub, policy: Option<Arc<dyn ChannelPolicy>>) -> Self {
        Self { hub, policy }
    }

    pub fn hub(&self) -> &ChannelHub {
        &self.hub
    }

    pub async fn connect(&self) -> Subscription {
        let sub = self.hub.register().await;
        if let Some(policy) = &self.policy {
            for channel in policy.on_connection() {
                self.hub.join(&channel, sub.id).await;
            }
        }
        tracing::debug!(connection_id = %sub.id, "realtime_connected");
        sub
    }

    pub async fn login(&self, id: ConnectionId, user: Value) {
        if let Some(policy) = &self.policy {
            let (leave, join) = policy.on_login(&user);
            for channel in leave {
                self.hub.leave(&channel, id).await;
            }
            for channel in join {
                self.hub.join(&channel, id).await;
            }
        }
        self.hub.set_user(id, Some(user)).await;
    }

    /// Reverses `login`.
    pub async fn logout(&self, id: ConnectionId) {
        let Some(user) = self.hub.user(id).await else {
            return;
        };
        if let Some(policy) = &self.policy {
            let (rejoin, left) = policy.on_login(&user);
            for channel in left {
                self.hub.leave(&channel, id).await;
            }
            for channel in rejoin {
                self.hub.join(&channel, id).await;
            }
        }
        self.hub.set_user(id, None).await;
    }

    pub async fn disconnect(&self, id: ConnectionId) {
        self.hub.unregister(id).await;
        tracing::debug!(connection_id = %id, "realtime_disconnected");
    }

    pub async fn publish(&self, event: &ServiceEvent) -> usize {
        let Some(policy) = &self.policy else {
            return 0;
        };
        let targets = policy.publish(event);
        if targets.is_empty() {
            return 0;
        }
        let delivered = self.hub.deliver(&targets, &event.to_message()).await;
        tracing::debug!(event = %event.name(), delivered, "service_event_published");
        delivered
    }
}
