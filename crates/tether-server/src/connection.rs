//! Per-connection state machine.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tether_core::{ConnId, Packet};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::StateError;
use crate::liveness::Liveness;

/// Why a connection was closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The transport went away or the peer closed it.
    ClientClosed,
    /// Too many consecutive liveness checks without a PING.
    LivenessExpired,
    /// The peer broke the protocol under the `close` violation policy.
    ProtocolViolation,
    /// The server is shutting down.
    Shutdown,
    /// A control reply did not fit in the outbound queue.
    SlowConsumer,
}

impl CloseReason {
    /// Short label for logs and metrics.
    pub fn label(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::LivenessExpired => "liveness_expired",
            Self::ProtocolViolation => "protocol_violation",
            Self::Shutdown => "shutdown",
            Self::SlowConsumer => "slow_consumer",
        }
    }
}

/// Item read from a connection's outbound queue.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// Encode and send this packet.
    Packet(Arc<Packet>),
    /// Close the transport. Always the last frame.
    Close(CloseReason),
}

/// Close request shared by both ends of a queue. It lives beside the
/// queue, so a full queue cannot lose it.
#[derive(Debug, Default)]
struct CloseSignal {
    reason: OnceLock<CloseReason>,
    token: CancellationToken,
}

/// Sending half of a connection's bounded outbound queue.
///
/// Packet sends never wait: a full or closed queue drops the packet and
/// bumps the drop counter shared by all clones. Closing bypasses the queue.
#[derive(Clone, Debug)]
pub struct Outbound {
    tx: mpsc::Sender<Arc<Packet>>,
    dropped: Arc<AtomicU64>,
    signal: Arc<CloseSignal>,
}

impl Outbound {
    /// Create a queue of `capacity` packets.
    pub fn channel(capacity: usize) -> (Self, OutboundRx) {
        let (tx, rx) = mpsc::channel(capacity);
        let signal = Arc::new(CloseSignal::default());
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
                signal: signal.clone(),
            },
            OutboundRx {
                rx,
                signal,
                finished: false,
            },
        )
    }

    /// Queue a packet. Returns `false` if it was dropped.
    pub fn send(&self, packet: Arc<Packet>) -> bool {
        if self.tx.try_send(packet).is_ok() {
            true
        } else {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(crate::metrics::OUTBOUND_DROPPED_TOTAL).increment(1);
            false
        }
    }

    /// Ask the transport to close. The first reason wins; returns `false`
    /// if a close was already requested.
    pub fn close(&self, reason: CloseReason) -> bool {
        let first = self.signal.reason.set(reason).is_ok();
        self.signal.token.cancel();
        first
    }

    /// Packets dropped so far.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Receiving half of an outbound queue.
///
/// Yields queued packets in order, then a single [`Frame::Close`] once a
/// close was requested.
#[derive(Debug)]
pub struct OutboundRx {
    rx: mpsc::Receiver<Arc<Packet>>,
    signal: Arc<CloseSignal>,
    finished: bool,
}

impl OutboundRx {
    /// Next frame, or `None` once every sender is gone without a close.
    pub async fn recv(&mut self) -> Option<Frame> {
        if self.finished {
            return None;
        }
        tokio::select! {
            biased;
            packet = self.rx.recv() => {
                if let Some(packet) = packet {
                    return Some(Frame::Packet(packet));
                }
            }
            () = self.signal.token.cancelled() => {
                if let Ok(packet) = self.rx.try_recv() {
                    return Some(Frame::Packet(packet));
                }
            }
        }
        self.finish()
    }

    /// Non-blocking [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Result<Frame, TryRecvError> {
        if self.finished {
            return Err(TryRecvError::Disconnected);
        }
        match self.rx.try_recv() {
            Ok(packet) => Ok(Frame::Packet(packet)),
            Err(error) => match self.signal.reason.get() {
                Some(&reason) => {
                    self.finished = true;
                    Ok(Frame::Close(reason))
                }
                None => Err(error),
            },
        }
    }

    /// Token cancelled as soon as a close is requested, whether or not the
    /// queue has drained.
    pub fn close_signal(&self) -> CancellationToken {
        self.signal.token.clone()
    }

    fn finish(&mut self) -> Option<Frame> {
        self.finished = true;
        self.signal.reason.get().copied().map(Frame::Close)
    }
}

/// Lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Accepted, OPEN not yet sent.
    Connecting,
    /// OPEN sent; packets are dispatched.
    Open,
    /// Teardown in progress; memberships are being released.
    Closing,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// Whether `self -> to` is a legal transition.
    pub fn can_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Connecting, Self::Open | Self::Closing)
                | (Self::Open, Self::Closing)
                | (Self::Closing, Self::Closed)
        )
    }
}

/// One live transport session as seen by its worker.
#[derive(Debug)]
pub struct Connection {
    id: ConnId,
    state: ConnectionState,
    topics: HashSet<String>,
    outbound: Outbound,
    liveness: Liveness,
    opened_at: Instant,
}

impl Connection {
    /// A new connection in `Connecting`.
    pub fn new(id: ConnId, outbound: Outbound, now: Instant) -> Self {
        Self {
            id,
            state: ConnectionState::Connecting,
            topics: HashSet::new(),
            outbound,
            liveness: Liveness::new(),
            opened_at: now,
        }
    }

    /// Connection id.
    pub fn id(&self) -> &ConnId {
        &self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether packets should be dispatched.
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Move to `to`, rejecting illegal transitions.
    pub fn transition(&mut self, to: ConnectionState) -> Result<(), StateError> {
        if !self.state.can_transition(to) {
            return Err(StateError {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Whether the connection holds membership in `topic`.
    pub fn is_joined(&self, topic: &str) -> bool {
        self.topics.contains(topic)
    }

    /// Record membership. Returns `false` if it was already present.
    pub fn add_topic(&mut self, topic: &str) -> bool {
        self.topics.insert(topic.to_owned())
    }

    /// Drop membership. Returns `false` if it was not present.
    pub fn remove_topic(&mut self, topic: &str) -> bool {
        self.topics.remove(topic)
    }

    /// Remove and return every membership.
    pub fn take_topics(&mut self) -> Vec<String> {
        self.topics.drain().collect()
    }

    /// Number of joined topics.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Outbound queue handle.
    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    /// Queue a packet for this connection only.
    pub fn send(&self, packet: Packet) -> bool {
        self.outbound.send(Arc::new(packet))
    }

    /// Liveness bookkeeping.
    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    /// Mutable liveness bookkeeping.
    pub fn liveness_mut(&mut self) -> &mut Liveness {
        &mut self.liveness
    }

    /// Time since the connection was accepted.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.opened_at)
    }
}
