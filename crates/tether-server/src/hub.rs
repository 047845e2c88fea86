//! Packet dispatcher: one worker's connections, topics and protocol rules.
//!
//! A `Hub` is owned by exactly one worker task and mutated only there, so
//! nothing in it is locked. Every operation runs to completion without
//! awaiting; outbound packets go onto bounded per-connection queues.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use metrics::{counter, gauge};
use serde::Serialize;
use tether_core::{ConnId, OpenPayload, Packet, PacketType, Payload, WorkerId};
use tether_settings::{LivenessSettings, TetherSettings, ViolationPolicy};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

use crate::channel::{EventInfo, JoinInfo, JoinNotify};
use crate::cluster::{ClusterBroadcaster, ClusterMessage};
use crate::connection::{CloseReason, Connection, ConnectionState, Outbound};
use crate::errors::{ClusterError, Refusal};
use crate::liveness::Verdict;
use crate::metrics::{
    CLUSTER_RECEIVED_TOTAL, CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL, DISCONNECTIONS_TOTAL,
    EVENTS_DELIVERED_TOTAL, JOINS_TOTAL, LEAVES_TOTAL, LIVENESS_EVICTIONS_TOTAL, PACKETS_IN_TOTAL,
};
use crate::registry::ChannelRegistry;
use crate::topic::Topic;

/// Protocol parameters a hub enforces.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Contract announced in OPEN and enforced by liveness ticks.
    pub liveness: LivenessSettings,
    /// Reaction to protocol violations.
    pub violation_policy: ViolationPolicy,
    /// Codec name announced in OPEN.
    pub encoder: &'static str,
}

impl HubConfig {
    /// Take the protocol parameters from loaded settings.
    pub fn from_settings(settings: &TetherSettings, encoder: &'static str) -> Self {
        Self {
            liveness: settings.liveness.clone(),
            violation_policy: settings.protocol.violation_policy,
            encoder,
        }
    }
}

/// What the transport should do after a hub operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Keep the connection.
    Keep,
    /// The connection was closed and its memberships released.
    Closed(CloseReason),
}

/// Point-in-time counts for one worker.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    /// Worker identity.
    pub worker_id: String,
    /// Open connections.
    pub connections: usize,
    /// Local subscriber count per live topic.
    pub topics: BTreeMap<String, usize>,
}

/// One worker's multiplexing state.
pub struct Hub {
    registry: Arc<ChannelRegistry>,
    broadcaster: ClusterBroadcaster,
    config: HubConfig,
    connections: HashMap<ConnId, Connection>,
    topics: HashMap<String, Topic>,
}

impl Hub {
    /// Hub for one worker.
    pub fn new(
        registry: Arc<ChannelRegistry>,
        broadcaster: ClusterBroadcaster,
        config: HubConfig,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            config,
            connections: HashMap::new(),
            topics: HashMap::new(),
        }
    }

    /// This worker's identity.
    pub fn worker_id(&self) -> &WorkerId {
        self.broadcaster.worker_id()
    }

    /// Liveness contract in force.
    pub fn liveness(&self) -> &LivenessSettings {
        &self.config.liveness
    }

    /// Take this worker's cluster inbound queue.
    pub fn subscribe_cluster(&self) -> Result<mpsc::Receiver<ClusterMessage>, ClusterError> {
        self.broadcaster.subscribe()
    }

    /// Accept a transport session: send OPEN and enter `Open`.
    ///
    /// Returns `false` if the id is already in use.
    #[instrument(skip_all, fields(conn_id = %conn_id))]
    pub fn open(&mut self, conn_id: ConnId, outbound: Outbound, now: Instant) -> bool {
        if self.connections.contains_key(&conn_id) {
            warn!("duplicate connection id, refusing");
            return false;
        }
        let mut conn = Connection::new(conn_id.clone(), outbound, now);
        let _ = conn.send(Packet::open(OpenPayload {
            server_interval_ms: self.config.liveness.server_interval_ms,
            server_attempts: self.config.liveness.server_attempts,
            client_interval_ms: self.config.liveness.client_interval_ms,
            conn_id: conn_id.clone(),
            encoder: self.config.encoder.to_owned(),
        }));
        if let Err(error) = conn.transition(ConnectionState::Open) {
            warn!(%error, "connection could not be opened");
            return false;
        }
        let _ = self.connections.insert(conn_id, conn);

        counter!(CONNECTIONS_TOTAL).increment(1);
        gauge!(CONNECTIONS_ACTIVE).increment(1.0);
        info!(worker_id = %self.worker_id(), "connection opened");
        true
    }

    /// Handle one decoded packet from `conn_id`.
    #[instrument(skip_all, fields(conn_id = %conn_id, packet_type = packet.kind().name()))]
    pub fn dispatch(&mut self, conn_id: &ConnId, packet: Packet, now: Instant) -> Disposition {
        let Some(conn) = self.connections.get_mut(conn_id) else {
            debug!("packet for unknown connection, ignoring");
            return Disposition::Keep;
        };
        if !conn.is_open() {
            trace!(state = ?conn.state(), "connection not open, ignoring packet");
            return Disposition::Keep;
        }
        counter!(PACKETS_IN_TOTAL, "type" => packet.kind().name()).increment(1);

        match packet.kind() {
            PacketType::Join => match packet.topic() {
                Some(topic) => match self.join(conn_id, topic) {
                    Some(reply) => self.reply(conn_id, reply),
                    None => Disposition::Keep,
                },
                None => self.violation(conn_id, "JOIN without topic"),
            },
            PacketType::Leave => match packet.topic() {
                Some(topic) => match self.leave(conn_id, topic) {
                    Some(reply) => self.reply(conn_id, reply),
                    None => Disposition::Keep,
                },
                None => self.violation(conn_id, "LEAVE without topic"),
            },
            PacketType::Event => {
                self.event(conn_id, packet);
                Disposition::Keep
            }
            PacketType::Ping => {
                conn.liveness_mut().record_ping(now);
                self.reply(conn_id, Packet::pong())
            }
            kind => {
                debug_assert!(kind.is_server_only());
                self.violation(conn_id, "server-only packet type from client")
            }
        }
    }

    /// Apply the violation policy to `conn_id`.
    pub fn violation(&mut self, conn_id: &ConnId, what: &str) -> Disposition {
        match self.config.violation_policy {
            ViolationPolicy::Close => {
                warn!(%conn_id, violation = what, "protocol violation, closing connection");
                if self.close(conn_id, CloseReason::ProtocolViolation) {
                    Disposition::Closed(CloseReason::ProtocolViolation)
                } else {
                    Disposition::Keep
                }
            }
            ViolationPolicy::Ignore => {
                warn!(%conn_id, violation = what, "protocol violation, packet discarded");
                Disposition::Keep
            }
        }
    }

    /// Queue a control reply to `conn_id`. A reply that does not fit
    /// evicts the connection, since its membership state already changed.
    fn reply(&mut self, conn_id: &ConnId, packet: Packet) -> Disposition {
        let kind = packet.kind().name();
        let queued = self
            .connections
            .get(conn_id)
            .is_some_and(|conn| conn.send(packet));
        if queued {
            return Disposition::Keep;
        }
        warn!(%conn_id, packet_type = kind, "outbound queue full, evicting slow consumer");
        if self.close(conn_id, CloseReason::SlowConsumer) {
            Disposition::Closed(CloseReason::SlowConsumer)
        } else {
            Disposition::Keep
        }
    }

    /// Apply a JOIN and return the reply to send.
    fn join(&mut self, conn_id: &ConnId, topic: &str) -> Option<Packet> {
        let conn = self.connections.get_mut(conn_id)?;
        if conn.is_joined(topic) {
            return Some(refuse(conn_id, PacketType::Join, topic, Refusal::AlreadyJoined));
        }
        let Some(resolved) = self.registry.resolve(topic) else {
            return Some(refuse(conn_id, PacketType::Join, topic, Refusal::NoChannel));
        };

        let entry = self
            .topics
            .entry(topic.to_owned())
            .or_insert_with(|| Topic::new(topic, resolved.channel.clone(), resolved.suffix));
        let first = entry.is_empty();
        let _ = entry.subscribe(conn_id.clone(), conn.outbound().clone());
        let _ = conn.add_topic(topic);

        let channel = entry.channel();
        if first || channel.notify() == JoinNotify::EverySubscriber {
            let pattern = channel.pattern().to_string();
            channel.handler().on_join(&JoinInfo {
                conn_id,
                topic,
                pattern: &pattern,
                suffix: entry.suffix(),
            });
        }

        counter!(JOINS_TOTAL, "outcome" => "ok").increment(1);
        debug!(%conn_id, topic, subscribers = entry.subscriber_count(), "joined");
        Some(Packet::join_ack(topic))
    }

    fn leave(&mut self, conn_id: &ConnId, topic: &str) -> Option<Packet> {
        let conn = self.connections.get_mut(conn_id)?;
        if !conn.remove_topic(topic) {
            return Some(refuse(conn_id, PacketType::Leave, topic, Refusal::NotJoined));
        }
        release(&mut self.topics, conn_id, topic);
        counter!(LEAVES_TOTAL, "outcome" => "ok").increment(1);
        debug!(%conn_id, topic, "left");
        Some(Packet::leave_ack(topic))
    }

    fn event(&mut self, conn_id: &ConnId, packet: Packet) {
        let Some(topic) = packet.topic().map(str::to_owned) else {
            trace!(%conn_id, "EVENT without topic dropped");
            return;
        };
        let joined = self
            .connections
            .get(conn_id)
            .is_some_and(|conn| conn.is_joined(&topic));
        let Some(entry) = self.topics.get(&topic).filter(|_| joined) else {
            debug!(%conn_id, topic, "EVENT from non-subscriber dropped");
            return;
        };

        entry.channel().handler().on_event(&EventInfo {
            conn_id,
            topic: &topic,
            suffix: entry.suffix(),
            payload: packet.data(),
        });

        let packet = Arc::new(packet);
        let delivered = entry.publish_local(&packet);
        counter!(EVENTS_DELIVERED_TOTAL).increment(delivered as u64);
        let report = self
            .broadcaster
            .publish_cluster(&topic, packet.data().clone());
        debug!(%conn_id, topic, delivered, siblings = report.sent, "event published");
    }

    /// Push an EVENT to `topic` from application code.
    ///
    /// Delivers to local subscribers and relays to siblings. Returns the
    /// local delivery count.
    pub fn publish(&mut self, topic: &str, payload: Payload) -> usize {
        let packet = Arc::new(Packet::event(topic, payload));
        let delivered = self
            .topics
            .get(topic)
            .map_or(0, |entry| entry.publish_local(&packet));
        counter!(EVENTS_DELIVERED_TOTAL).increment(delivered as u64);
        let report = self
            .broadcaster
            .publish_cluster(topic, packet.data().clone());
        debug!(topic, delivered, siblings = report.sent, "server publish");
        delivered
    }

    /// Deliver a sibling's EVENT to local subscribers. Never re-broadcast.
    pub fn on_cluster_message(&mut self, message: ClusterMessage) -> usize {
        if !self.broadcaster.accepts(&message) {
            trace!(topic = %message.topic, "own cluster message ignored");
            return 0;
        }
        counter!(CLUSTER_RECEIVED_TOTAL).increment(1);
        let Some(entry) = self.topics.get(&message.topic) else {
            trace!(topic = %message.topic, "no local subscribers for cluster message");
            return 0;
        };
        let packet = Arc::new(Packet::event(&message.topic, message.payload));
        let delivered = entry.publish_local(&packet);
        counter!(EVENTS_DELIVERED_TOTAL).increment(delivered as u64);
        debug!(topic = %message.topic, origin = %message.origin, delivered, "cluster event delivered");
        delivered
    }

    /// Run one liveness check for `conn_id`.
    pub fn liveness_tick(&mut self, conn_id: &ConnId) -> Disposition {
        let attempts = self.config.liveness.server_attempts;
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return Disposition::Keep;
        };
        if !conn.is_open() {
            return Disposition::Keep;
        }
        let verdict = conn.liveness_mut().check(attempts);
        match verdict {
            Verdict::Alive => {
                trace!(%conn_id, "liveness check passed");
                Disposition::Keep
            }
            Verdict::Missed(missed) => {
                debug!(%conn_id, missed, attempts, "liveness check missed");
                Disposition::Keep
            }
            Verdict::Expired => {
                warn!(%conn_id, attempts, "no PING within liveness window, evicting");
                counter!(LIVENESS_EVICTIONS_TOTAL).increment(1);
                let _ = self.close(conn_id, CloseReason::LivenessExpired);
                Disposition::Closed(CloseReason::LivenessExpired)
            }
        }
    }

    /// Close `conn_id`, releasing all memberships.
    ///
    /// Returns `false` if the connection was already gone; memberships are
    /// released exactly once.
    pub fn close(&mut self, conn_id: &ConnId, reason: CloseReason) -> bool {
        let Some(mut conn) = self.connections.remove(conn_id) else {
            return false;
        };
        if let Err(error) = conn.transition(ConnectionState::Closing) {
            warn!(%conn_id, %error, "unexpected state on close");
        }
        for topic in conn.take_topics() {
            release(&mut self.topics, conn_id, &topic);
        }
        if reason != CloseReason::ClientClosed {
            let _ = conn.outbound().close(reason);
        }
        if let Err(error) = conn.transition(ConnectionState::Closed) {
            warn!(%conn_id, %error, "unexpected state on close");
        }

        counter!(DISCONNECTIONS_TOTAL, "reason" => reason.label()).increment(1);
        gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
        info!(
            %conn_id,
            reason = reason.label(),
            dropped = conn.outbound().drop_count(),
            age_ms = conn.age(Instant::now()).as_millis(),
            "connection closed"
        );
        true
    }

    /// Close every connection. Returns how many were closed.
    pub fn shutdown(&mut self) -> usize {
        let ids: Vec<ConnId> = self.connections.keys().cloned().collect();
        ids.iter()
            .filter(|id| self.close(id, CloseReason::Shutdown))
            .count()
    }

    /// Open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Local subscribers of `topic` (0 if the topic is not live).
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, Topic::subscriber_count)
    }

    /// Whether `conn_id` holds membership in `topic`.
    pub fn is_joined(&self, conn_id: &ConnId, topic: &str) -> bool {
        self.connections
            .get(conn_id)
            .is_some_and(|conn| conn.is_joined(topic))
    }

    /// Snapshot of connection and topic counts.
    pub fn stats(&self) -> HubStats {
        HubStats {
            worker_id: self.worker_id().to_string(),
            connections: self.connections.len(),
            topics: self
                .topics
                .iter()
                .map(|(name, topic)| (name.clone(), topic.subscriber_count()))
                .collect(),
        }
    }
}

fn refuse(conn_id: &ConnId, kind: PacketType, topic: &str, refusal: Refusal) -> Packet {
    let message = refusal.to_string();
    let (packet, metric) = match kind {
        PacketType::Leave => (Packet::leave_error(topic, &message), LEAVES_TOTAL),
        _ => (Packet::join_error(topic, &message), JOINS_TOTAL),
    };
    counter!(metric, "outcome" => refusal.label()).increment(1);
    debug!(%conn_id, topic, %refusal, "refused");
    packet
}

/// Remove `conn_id` from `topic`, firing `on_leave` and tearing the topic
/// down once empty.
fn release(topics: &mut HashMap<String, Topic>, conn_id: &ConnId, topic: &str) {
    let Some(entry) = topics.get_mut(topic) else {
        return;
    };
    if !entry.unsubscribe(conn_id) {
        return;
    }
    let last = entry.is_empty();
    let channel = entry.channel();
    if last || channel.notify() == JoinNotify::EverySubscriber {
        let pattern = channel.pattern().to_string();
        channel.handler().on_leave(&JoinInfo {
            conn_id,
            topic,
            pattern: &pattern,
            suffix: entry.suffix(),
        });
    }
    if last {
        let _ = topics.remove(topic);
        debug!(topic, "topic torn down");
    }
}
