//! Local subscriber set for one concrete topic.

use std::collections::HashMap;
use std::sync::Arc;

use tether_core::{ConnId, Packet};
use tracing::warn;

use crate::connection::Outbound;
use crate::registry::Channel;

/// Subscribers of one topic within a single worker.
///
/// Duplicate subscription is refused upstream by the dispatcher; here a
/// repeat `subscribe` just reports `false`.
pub struct Topic {
    name: String,
    channel: Arc<Channel>,
    suffix: Option<String>,
    subscribers: HashMap<ConnId, Outbound>,
}

impl Topic {
    /// Empty topic resolved to `channel`.
    pub fn new(name: impl Into<String>, channel: Arc<Channel>, suffix: Option<String>) -> Self {
        Self {
            name: name.into(),
            channel,
            suffix,
            subscribers: HashMap::new(),
        }
    }

    /// Full topic name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Channel the topic resolved to.
    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Captured wildcard remainder.
    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }

    /// Add a subscriber. Returns `false` if it was already present.
    pub fn subscribe(&mut self, conn_id: ConnId, outbound: Outbound) -> bool {
        if self.subscribers.contains_key(&conn_id) {
            return false;
        }
        let _ = self.subscribers.insert(conn_id, outbound);
        true
    }

    /// Remove a subscriber. Returns `false` if it was not present.
    pub fn unsubscribe(&mut self, conn_id: &ConnId) -> bool {
        self.subscribers.remove(conn_id).is_some()
    }

    /// Whether `conn_id` is subscribed.
    pub fn is_subscribed(&self, conn_id: &ConnId) -> bool {
        self.subscribers.contains_key(conn_id)
    }

    /// Deliver `packet` to every local subscriber; returns how many accepted it.
    pub fn publish_local(&self, packet: &Arc<Packet>) -> usize {
        let mut delivered = 0;
        for (conn_id, outbound) in &self.subscribers {
            if outbound.send(packet.clone()) {
                delivered += 1;
            } else {
                warn!(%conn_id, topic = %self.name, "outbound queue full or closed, event dropped");
            }
        }
        delivered
    }

    /// Number of local subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Whether no local subscriber remains.
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl std::fmt::Debug for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("subscribers", &self.subscribers.len())
            .finish_non_exhaustive()
    }
}
