//! Channel handler hooks.
//!
//! Handlers run on the worker task that owns the topic, so they must not
//! block. Every hook has a no-op default.

use tether_core::{ConnId, Payload};

/// When `on_join` / `on_leave` fire for a topic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JoinNotify {
    /// When the topic gains its first local subscriber and loses its last.
    #[default]
    FirstSubscriber,
    /// On every accepted JOIN and every released membership.
    EverySubscriber,
}

/// Context passed to `on_join` / `on_leave`.
#[derive(Clone, Debug)]
pub struct JoinInfo<'a> {
    /// Connection that joined or left.
    pub conn_id: &'a ConnId,
    /// Full topic name.
    pub topic: &'a str,
    /// Pattern the topic resolved to, as registered.
    pub pattern: &'a str,
    /// Captured wildcard remainder, if the pattern is a wildcard.
    pub suffix: Option<&'a str>,
}

/// Context passed to `on_event`.
#[derive(Clone, Debug)]
pub struct EventInfo<'a> {
    /// Sending connection.
    pub conn_id: &'a ConnId,
    /// Full topic name.
    pub topic: &'a str,
    /// Captured wildcard remainder, if the pattern is a wildcard.
    pub suffix: Option<&'a str>,
    /// The EVENT payload, `topic` included.
    pub payload: &'a Payload,
}

/// Application hooks attached to a registered pattern.
pub trait ChannelHandler: Send + Sync {
    /// A connection joined a topic under this channel.
    fn on_join(&self, _info: &JoinInfo<'_>) {}

    /// A connection left a topic under this channel (LEAVE or close).
    ///
    /// Under [`JoinNotify::FirstSubscriber`] this fires only when the last
    /// local subscriber is gone.
    fn on_leave(&self, _info: &JoinInfo<'_>) {}

    /// A subscriber sent an EVENT. Not called for cluster-inbound events.
    fn on_event(&self, _event: &EventInfo<'_>) {}
}

impl<T: ChannelHandler + ?Sized> ChannelHandler for std::sync::Arc<T> {
    fn on_join(&self, info: &JoinInfo<'_>) {
        (**self).on_join(info);
    }

    fn on_leave(&self, info: &JoinInfo<'_>) {
        (**self).on_leave(info);
    }

    fn on_event(&self, event: &EventInfo<'_>) {
        (**self).on_event(event);
    }
}

/// Handler with no hooks.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHandler;

impl ChannelHandler for NoopHandler {}
