//! A process's worth of workers sharing one cluster bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tether_core::{Payload, WorkerId};
use tether_settings::TetherSettings;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cluster::{ClusterBroadcaster, InProcessBus};
use crate::errors::ServerError;
use crate::hub::{Hub, HubConfig, HubStats};
use crate::registry::ChannelRegistry;
use crate::worker::{Worker, WorkerHandle};

/// Workers plus connection admission.
pub struct Node {
    workers: Vec<WorkerHandle>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    next: AtomicUsize,
    active: Arc<AtomicUsize>,
    max_connections: usize,
}

impl Node {
    /// Boot `cluster.workers` workers. Must be called inside a Tokio runtime.
    ///
    /// Every worker shares `registry` and stops when `cancel` fires.
    pub fn start(
        settings: &TetherSettings,
        registry: Arc<ChannelRegistry>,
        encoder: &'static str,
        cancel: &CancellationToken,
    ) -> Self {
        let bus = InProcessBus::new(settings.cluster.bus_capacity);
        let config = HubConfig::from_settings(settings, encoder);
        let count = settings.cluster.workers.max(1);

        let (workers, tasks): (Vec<_>, Vec<_>) = (0..count)
            .map(|_| {
                let member = bus.attach(WorkerId::new());
                let hub = Hub::new(
                    registry.clone(),
                    ClusterBroadcaster::new(Arc::new(member)),
                    config.clone(),
                );
                Worker::spawn(hub, cancel.child_token())
            })
            .unzip();

        info!(workers = count, channels = registry.len(), "node started");
        Self {
            workers,
            tasks: Mutex::new(tasks),
            next: AtomicUsize::new(0),
            active: Arc::new(AtomicUsize::new(0)),
            max_connections: settings.server.max_connections,
        }
    }

    /// Next worker in round-robin order.
    pub fn assign(&self) -> &WorkerHandle {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        &self.workers[index]
    }

    /// All worker handles.
    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    /// Number of workers.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Reserve a connection slot, or `None` at `max_connections`.
    pub fn admit(&self) -> Option<Admission> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_connections).then_some(n + 1)
            })
            .ok()
            .map(|_| Admission {
                active: self.active.clone(),
            })
    }

    /// Currently admitted transport sessions.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Publish an EVENT from application code through one worker.
    ///
    /// That worker delivers locally and relays to its siblings, so every
    /// subscriber in the node gets the event once. Returns the publishing
    /// worker's local delivery count.
    pub async fn publish(&self, topic: &str, payload: Payload) -> Result<usize, ServerError> {
        self.assign().publish(topic, payload).await
    }

    /// Stats from every worker.
    pub async fn stats(&self) -> Result<Vec<HubStats>, ServerError> {
        futures::future::join_all(self.workers.iter().map(WorkerHandle::stats))
            .await
            .into_iter()
            .collect()
    }

    /// Take the worker task handles for joining at shutdown.
    pub fn take_tasks(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.tasks.lock())
    }
}

/// A reserved connection slot; released on drop.
#[derive(Debug)]
pub struct Admission {
    active: Arc<AtomicUsize>,
}

impl Drop for Admission {
    fn drop(&mut self) {
        let _ = self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::NoopHandler;
    use crate::connection::{Frame, Outbound};
    use tether_core::{ConnId, Packet};

    fn settings(workers: usize, max_connections: usize) -> TetherSettings {
        let mut settings = TetherSettings::default();
        settings.cluster.workers = workers;
        settings.server.max_connections = max_connections;
        settings
    }

    fn registry() -> Arc<ChannelRegistry> {
        let mut registry = ChannelRegistry::new();
        registry.register("room:*", NoopHandler).unwrap();
        Arc::new(registry)
    }

    #[tokio::test]
    async fn assigns_round_robin() {
        let cancel = CancellationToken::new();
        let node = Node::start(&settings(3, 10), registry(), "json", &cancel);
        let ids: Vec<_> = (0..6).map(|_| node.assign().id().clone()).collect();
        assert_eq!(ids[0], ids[3]);
        assert_eq!(ids[1], ids[4]);
        assert_ne!(ids[0], ids[1]);
        assert_ne!(ids[1], ids[2]);
        assert_eq!(node.worker_count(), 3);
    }

    #[tokio::test]
    async fn admission_is_capped_and_released() {
        let cancel = CancellationToken::new();
        let node = Node::start(&settings(1, 2), registry(), "json", &cancel);
        let first = node.admit().unwrap();
        let _second = node.admit().unwrap();
        assert!(node.admit().is_none());
        assert_eq!(node.active_connections(), 2);

        drop(first);
        assert_eq!(node.active_connections(), 1);
        assert!(node.admit().is_some());
    }

    #[tokio::test]
    async fn server_publish_reaches_every_worker() {
        let cancel = CancellationToken::new();
        let node = Node::start(&settings(2, 10), registry(), "json", &cancel);
        let mut receivers = Vec::new();
        for (i, worker) in node.workers().iter().enumerate() {
            let (outbound, mut rx) = Outbound::channel(8);
            let id = ConnId::from(format!("c{i}"));
            worker.open(id.clone(), outbound).await.unwrap();
            worker.inbound(id, Packet::join("room:7")).await.unwrap();
            let _open = rx.recv().await;
            let _ack = rx.recv().await;
            receivers.push(rx);
        }

        let _ = node.publish("room:7", Payload::new()).await.unwrap();
        for rx in &mut receivers {
            match rx.recv().await {
                Some(Frame::Packet(packet)) => assert_eq!(packet.topic(), Some("room:7")),
                other => panic!("expected event, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn stats_cover_all_workers_and_stop_after_cancel() {
        let cancel = CancellationToken::new();
        let node = Node::start(&settings(2, 10), registry(), "json", &cancel);
        assert_eq!(node.stats().await.unwrap().len(), 2);

        cancel.cancel();
        for task in node.take_tasks() {
            task.await.unwrap();
        }
        assert!(node.take_tasks().is_empty());
        assert!(node.stats().await.is_err());
    }
}
