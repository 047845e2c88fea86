//! # tether-server
//!
//! Connection multiplexing over WebSocket.
//!
//! - Channel registry: static and `prefix:*` patterns with handler hooks
//! - Hub: per-worker dispatcher for JOIN / LEAVE / EVENT / PING
//! - Liveness: client PINGs checked on a server-side interval
//! - Cluster: EVENT fan-out to sibling workers over a [`ClusterBus`]
//! - Transport: Axum WebSocket sessions, `/health`, `/metrics`, graceful shutdown

#![deny(unsafe_code)]

pub mod channel;
pub mod cluster;
pub mod connection;
pub mod errors;
pub mod health;
pub mod hub;
pub mod liveness;
pub mod metrics;
pub mod node;
pub mod pattern;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod topic;
pub mod worker;

pub use channel::{ChannelHandler, EventInfo, JoinInfo, JoinNotify, NoopHandler};
pub use cluster::{ClusterBroadcaster, ClusterBus, ClusterMessage, InProcessBus};
pub use errors::{ClusterError, RegistryError, ServerError};
pub use hub::{Hub, HubConfig, HubStats};
pub use node::Node;
pub use registry::ChannelRegistry;
pub use server::TetherServer;
pub use worker::WorkerHandle;
