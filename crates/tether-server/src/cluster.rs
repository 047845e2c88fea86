//! Cross-worker fan-out.
//!
//! A [`ClusterBus`] has two operations: publish to every sibling and take the
//! local inbound queue. [`InProcessBus`] wires sibling workers inside one OS
//! process; a network bus can carry [`ClusterMessage`] unchanged since it is
//! plain serde data.
//!
//! Sends never wait. A full or closed sibling is counted in the
//! [`FanoutReport`] and logged; the remaining siblings still get the message.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tether_core::{Payload, WorkerId};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::errors::ClusterError;
use crate::metrics::{CLUSTER_SEND_FAILURES_TOTAL, CLUSTER_SENT_TOTAL};

/// Topic traffic relayed between workers. Never sent to end connections.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMessage {
    /// Worker that accepted the original EVENT.
    pub origin: WorkerId,
    /// Full topic name.
    pub topic: String,
    /// EVENT payload, `topic` included.
    pub payload: Payload,
}

/// Outcome of one cluster publish.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Siblings that accepted the message.
    pub sent: usize,
    /// Siblings that did not.
    pub failed: Vec<ClusterError>,
}

/// Message bus connecting one worker to its siblings.
pub trait ClusterBus: Send + Sync {
    /// The local worker's identity.
    fn worker_id(&self) -> &WorkerId;

    /// Send `message` to every sibling (never to the local worker).
    fn publish(&self, message: ClusterMessage) -> FanoutReport;

    /// Take the local inbound queue. Only the first call succeeds.
    fn subscribe(&self) -> Result<mpsc::Receiver<ClusterMessage>, ClusterError>;
}

type Members = Arc<RwLock<HashMap<WorkerId, mpsc::Sender<ClusterMessage>>>>;

/// Bus for workers sharing one process.
#[derive(Clone)]
pub struct InProcessBus {
    capacity: usize,
    members: Members,
}

impl InProcessBus {
    /// Bus whose per-worker inbound queues hold `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            members: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Join the bus as `worker_id`.
    pub fn attach(&self, worker_id: WorkerId) -> InProcessMember {
        let (tx, rx) = mpsc::channel(self.capacity);
        let _ = self.members.write().insert(worker_id.clone(), tx);
        debug!(%worker_id, "worker attached to cluster bus");
        InProcessMember {
            worker_id,
            members: self.members.clone(),
            inbound: Mutex::new(Some(rx)),
        }
    }

    /// Attached workers.
    pub fn member_count(&self) -> usize {
        self.members.read().len()
    }
}

/// One worker's handle on an [`InProcessBus`]. Detaches on drop.
pub struct InProcessMember {
    worker_id: WorkerId,
    members: Members,
    inbound: Mutex<Option<mpsc::Receiver<ClusterMessage>>>,
}

impl ClusterBus for InProcessMember {
    fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    fn publish(&self, message: ClusterMessage) -> FanoutReport {
        let mut report = FanoutReport::default();
        let members = self.members.read();
        for (sibling, tx) in members.iter().filter(|(id, _)| **id != self.worker_id) {
            match tx.try_send(message.clone()) {
                Ok(()) => report.sent += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(%sibling, topic = %message.topic, "sibling inbound full, cluster message dropped");
                    report
                        .failed
                        .push(ClusterError::SiblingFull(sibling.to_string()));
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(%sibling, topic = %message.topic, "sibling unreachable, cluster message dropped");
                    report
                        .failed
                        .push(ClusterError::SiblingClosed(sibling.to_string()));
                }
            }
        }
        counter!(CLUSTER_SENT_TOTAL).increment(report.sent as u64);
        counter!(CLUSTER_SEND_FAILURES_TOTAL).increment(report.failed.len() as u64);
        report
    }

    fn subscribe(&self) -> Result<mpsc::Receiver<ClusterMessage>, ClusterError> {
        self.inbound
            .lock()
            .take()
            .ok_or(ClusterError::AlreadySubscribed)
    }
}

impl Drop for InProcessMember {
    fn drop(&mut self) {
        let _ = self.members.write().remove(&self.worker_id);
    }
}

/// Origin-aware publishing on top of a [`ClusterBus`].
#[derive(Clone)]
pub struct ClusterBroadcaster {
    bus: Arc<dyn ClusterBus>,
}

impl ClusterBroadcaster {
    /// Wrap a bus.
    pub fn new(bus: Arc<dyn ClusterBus>) -> Self {
        Self { bus }
    }

    /// Local worker identity.
    pub fn worker_id(&self) -> &WorkerId {
        self.bus.worker_id()
    }

    /// Relay an EVENT to sibling workers. Local delivery is the caller's job.
    pub fn publish_cluster(&self, topic: &str, payload: Payload) -> FanoutReport {
        self.bus.publish(ClusterMessage {
            origin: self.bus.worker_id().clone(),
            topic: topic.to_owned(),
            payload,
        })
    }

    /// Whether an inbound message should be delivered locally.
    pub fn accepts(&self, message: &ClusterMessage) -> bool {
        message.origin != *self.bus.worker_id()
    }

    /// Take the local inbound queue.
    pub fn subscribe(&self) -> Result<mpsc::Receiver<ClusterMessage>, ClusterError> {
        self.bus.subscribe()
    }
}

impl std::fmt::Debug for ClusterBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterBroadcaster")
            .field("worker_id", self.bus.worker_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn message(origin: &str, topic: &str) -> ClusterMessage {
        let mut payload = Payload::new();
        let _ = payload.insert("topic".into(), json!(topic));
        ClusterMessage {
            origin: WorkerId::from(origin),
            topic: topic.into(),
            payload,
        }
    }

    #[test]
    fn message_serde_shape() {
        let value = serde_json::to_value(message("w1", "chat")).unwrap();
        assert_eq!(value["origin"], "w1");
        assert_eq!(value["topic"], "chat");
        assert_eq!(value["payload"]["topic"], "chat");
        let back: ClusterMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back.origin, WorkerId::from("w1"));
    }

    #[tokio::test]
    async fn publish_reaches_siblings_not_self() {
        let bus = InProcessBus::new(8);
        let a = bus.attach(WorkerId::from("a"));
        let b = bus.attach(WorkerId::from("b"));
        let c = bus.attach(WorkerId::from("c"));
        let mut rx_a = a.subscribe().unwrap();
        let mut rx_b = b.subscribe().unwrap();
        let mut rx_c = c.subscribe().unwrap();

        let report = a.publish(message("a", "chat"));
        assert_eq!(report.sent, 2);
        assert!(report.failed.is_empty());

        assert_eq!(rx_b.recv().await.unwrap().topic, "chat");
        assert_eq!(rx_c.recv().await.unwrap().topic, "chat");
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn subscribe_only_once() {
        let bus = InProcessBus::new(8);
        let a = bus.attach(WorkerId::from("a"));
        assert!(a.subscribe().is_ok());
        assert_matches!(a.subscribe(), Err(ClusterError::AlreadySubscribed));
    }

    #[test]
    fn full_sibling_does_not_block_others() {
        let bus = InProcessBus::new(1);
        let a = bus.attach(WorkerId::from("a"));
        let b = bus.attach(WorkerId::from("b"));
        let c = bus.attach(WorkerId::from("c"));
        let _rx_b = b.subscribe().unwrap();
        let mut rx_c = c.subscribe().unwrap();

        assert_eq!(a.publish(message("a", "t")).sent, 2);
        let _ = rx_c.try_recv().unwrap();

        let report = a.publish(message("a", "t"));
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, vec![ClusterError::SiblingFull("b".into())]);
    }

    #[test]
    fn closed_sibling_reported() {
        let bus = InProcessBus::new(4);
        let a = bus.attach(WorkerId::from("a"));
        let b = bus.attach(WorkerId::from("b"));
        drop(b.subscribe().unwrap());

        let report = a.publish(message("a", "t"));
        assert_eq!(report.sent, 0);
        assert_eq!(report.failed, vec![ClusterError::SiblingClosed("b".into())]);
    }

    #[test]
    fn dropped_member_detaches() {
        let bus = InProcessBus::new(4);
        let a = bus.attach(WorkerId::from("a"));
        {
            let _b = bus.attach(WorkerId::from("b"));
            assert_eq!(bus.member_count(), 2);
        }
        assert_eq!(bus.member_count(), 1);
        assert_eq!(a.publish(message("a", "t")), FanoutReport::default());
    }

    #[tokio::test]
    async fn broadcaster_stamps_origin_and_filters_own() {
        let bus = InProcessBus::new(4);
        let a = ClusterBroadcaster::new(Arc::new(bus.attach(WorkerId::from("a"))));
        let b = ClusterBroadcaster::new(Arc::new(bus.attach(WorkerId::from("b"))));
        let mut rx_b = b.subscribe().unwrap();

        let report = a.publish_cluster("room:1", Payload::new());
        assert_eq!(report.sent, 1);

        let received = rx_b.recv().await.unwrap();
        assert_eq!(received.origin, WorkerId::from("a"));
        assert!(b.accepts(&received));
        assert!(!a.accepts(&received));
    }
}
