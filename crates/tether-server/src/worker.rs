//! Worker event loop.
//!
//! Each worker owns one [`Hub`] and mutates it from a single task. Transport
//! sessions, liveness timers and the cluster bus all talk to it through
//! queues, so packet handling for one worker never interleaves.

use std::collections::HashMap;

use tether_core::{ConnId, Packet, Payload, WorkerId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cluster::ClusterMessage;
use crate::connection::{CloseReason, Outbound};
use crate::errors::ServerError;
use crate::hub::{Disposition, Hub, HubStats};
use crate::liveness::run_liveness_timer;

/// Command queue length per worker.
pub const COMMAND_QUEUE_CAPACITY: usize = 1024;

/// Work items for a worker.
#[derive(Debug)]
pub enum Command {
    /// A transport session was accepted.
    Open {
        /// New connection id.
        conn_id: ConnId,
        /// Its outbound queue.
        outbound: Outbound,
    },
    /// A decoded packet arrived.
    Inbound {
        /// Sender.
        conn_id: ConnId,
        /// The packet.
        packet: Packet,
    },
    /// A frame could not be decoded.
    Violation {
        /// Sender.
        conn_id: ConnId,
        /// What went wrong.
        reason: String,
    },
    /// The transport closed.
    Closed {
        /// Connection that went away.
        conn_id: ConnId,
    },
    /// A liveness check is due.
    LivenessTick {
        /// Connection to check.
        conn_id: ConnId,
    },
    /// Application publish.
    Publish {
        /// Topic.
        topic: String,
        /// EVENT fields.
        payload: Payload,
        /// Receives the local delivery count.
        reply: oneshot::Sender<usize>,
    },
    /// Snapshot request.
    Stats {
        /// Receives the snapshot.
        reply: oneshot::Sender<HubStats>,
    },
}

/// Cloneable handle used by transport sessions to reach a worker.
#[derive(Clone, Debug)]
pub struct WorkerHandle {
    id: WorkerId,
    tx: mpsc::Sender<Command>,
}

impl WorkerHandle {
    /// Worker identity.
    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Register a new connection; the worker sends OPEN.
    pub async fn open(&self, conn_id: ConnId, outbound: Outbound) -> Result<(), ServerError> {
        self.send(Command::Open { conn_id, outbound }).await
    }

    /// Hand over a decoded packet.
    pub async fn inbound(&self, conn_id: ConnId, packet: Packet) -> Result<(), ServerError> {
        self.send(Command::Inbound { conn_id, packet }).await
    }

    /// Report an undecodable frame.
    pub async fn violation(&self, conn_id: ConnId, reason: String) -> Result<(), ServerError> {
        self.send(Command::Violation { conn_id, reason }).await
    }

    /// Report that the transport closed.
    pub async fn closed(&self, conn_id: ConnId) -> Result<(), ServerError> {
        self.send(Command::Closed { conn_id }).await
    }

    /// Publish an EVENT from application code. Returns the local delivery count.
    pub async fn publish(&self, topic: &str, payload: Payload) -> Result<usize, ServerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Publish {
            topic: topic.to_owned(),
            payload,
            reply,
        })
        .await?;
        rx.await.map_err(|_| self.gone())
    }

    /// Connection and topic counts.
    pub async fn stats(&self) -> Result<HubStats, ServerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply }).await?;
        rx.await.map_err(|_| self.gone())
    }

    async fn send(&self, command: Command) -> Result<(), ServerError> {
        self.tx.send(command).await.map_err(|_| self.gone())
    }

    fn gone(&self) -> ServerError {
        ServerError::WorkerGone(self.id.to_string())
    }
}

/// A running worker.
pub struct Worker {
    hub: Hub,
    commands: mpsc::Receiver<Command>,
    ticks: mpsc::Sender<Command>,
    cluster: Option<mpsc::Receiver<ClusterMessage>>,
    timers: HashMap<ConnId, CancellationToken>,
    cancel: CancellationToken,
}

impl Worker {
    /// Start a worker task around `hub`. It stops when `cancel` fires.
    pub fn spawn(hub: Hub, cancel: CancellationToken) -> (WorkerHandle, JoinHandle<()>) {
        let (tx, commands) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let id = hub.worker_id().clone();
        let cluster = match hub.subscribe_cluster() {
            Ok(rx) => Some(rx),
            Err(error) => {
                warn!(worker_id = %id, %error, "running without cluster inbound");
                None
            }
        };
        let worker = Self {
            hub,
            commands,
            ticks: tx.clone(),
            cluster,
            timers: HashMap::new(),
            cancel,
        };
        let task = tokio::spawn(worker.run());
        (WorkerHandle { id, tx }, task)
    }

    async fn run(mut self) {
        let worker_id = self.hub.worker_id().clone();
        info!(%worker_id, "worker started");

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                message = recv_cluster(&mut self.cluster) => match message {
                    Some(message) => {
                        let _ = self.hub.on_cluster_message(message);
                    }
                    None => {
                        warn!(%worker_id, "cluster inbound closed");
                        self.cluster = None;
                    }
                },
            }
        }

        let closed = self.hub.shutdown();
        for (_, timer) in self.timers.drain() {
            timer.cancel();
        }
        info!(%worker_id, closed, "worker stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Open { conn_id, outbound } => {
                if self.hub.open(conn_id.clone(), outbound, Instant::now()) {
                    self.start_timer(conn_id);
                }
            }
            Command::Inbound { conn_id, packet } => {
                let disposition = self.hub.dispatch(&conn_id, packet, Instant::now());
                self.settle(&conn_id, disposition);
            }
            Command::Violation { conn_id, reason } => {
                let disposition = self.hub.violation(&conn_id, &reason);
                self.settle(&conn_id, disposition);
            }
            Command::Closed { conn_id } => {
                let _ = self.hub.close(&conn_id, CloseReason::ClientClosed);
                self.stop_timer(&conn_id);
            }
            Command::LivenessTick { conn_id } => {
                let disposition = self.hub.liveness_tick(&conn_id);
                self.settle(&conn_id, disposition);
            }
            Command::Publish {
                topic,
                payload,
                reply,
            } => {
                let _ = reply.send(self.hub.publish(&topic, payload));
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.hub.stats());
            }
        }
    }

    fn settle(&mut self, conn_id: &ConnId, disposition: Disposition) {
        if let Disposition::Closed(reason) = disposition {
            debug!(%conn_id, reason = reason.label(), "stopping liveness timer");
            self.stop_timer(conn_id);
        }
    }

    fn start_timer(&mut self, conn_id: ConnId) {
        let token = self.cancel.child_token();
        let interval = self.hub.liveness().server_interval();
        let id = conn_id.clone();
        let _ = tokio::spawn(run_liveness_timer(
            interval,
            self.ticks.clone(),
            move || Command::LivenessTick {
                conn_id: id.clone(),
            },
            token.clone(),
        ));
        if let Some(previous) = self.timers.insert(conn_id, token) {
            previous.cancel();
        }
    }

    fn stop_timer(&mut self, conn_id: &ConnId) {
        if let Some(token) = self.timers.remove(conn_id) {
            token.cancel();
        }
    }
}

async fn recv_cluster(rx: &mut Option<mpsc::Receiver<ClusterMessage>>) -> Option<ClusterMessage> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
