//! Error types for the engine and server.

use thiserror::Error;

use crate::connection::ConnectionState;
use crate::pattern::PatternError;

/// Application-level refusal of a JOIN or LEAVE.
///
/// `Display` is the exact `message` sent in JOIN_ERROR / LEAVE_ERROR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Refusal {
    /// The connection is already a member of the topic.
    #[error("Topic has already been joined")]
    AlreadyJoined,
    /// No registered channel pattern matches the topic.
    #[error("Topic has not been found")]
    NoChannel,
    /// LEAVE for a topic the connection never joined.
    #[error("Topic has not been joined")]
    NotJoined,
}

impl Refusal {
    /// Short label for metrics.
    pub fn label(self) -> &'static str {
        match self {
            Self::AlreadyJoined => "already_joined",
            Self::NoChannel => "no_channel",
            Self::NotJoined => "not_joined",
        }
    }
}

/// Channel registration failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The pattern string is not a valid channel pattern.
    #[error("invalid channel pattern: {0}")]
    InvalidPattern(#[from] PatternError),
    /// The pattern could match a topic already covered by another pattern.
    #[error("channel pattern {pattern:?} overlaps registered pattern {existing:?}")]
    Overlap {
        /// Pattern being registered.
        pattern: String,
        /// Previously registered pattern it conflicts with.
        existing: String,
    },
}

/// Illegal connection lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal connection transition {from:?} -> {to:?}")]
pub struct StateError {
    /// State before the attempted transition.
    pub from: ConnectionState,
    /// Requested state.
    pub to: ConnectionState,
}

/// Cluster bus failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
    /// The sibling's inbound queue is full.
    #[error("sibling {0} inbound queue is full")]
    SiblingFull(String),
    /// The sibling is gone.
    #[error("sibling {0} is unreachable")]
    SiblingClosed(String),
    /// The inbound receiver was already taken.
    #[error("cluster inbound already subscribed")]
    AlreadySubscribed,
}

/// Server lifecycle errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind or read the listener address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// A worker task is no longer running.
    #[error("worker {0} is not running")]
    WorkerGone(String),
}
