//! # Claim Bus - Bus Client Capability
//!
//! The notification core never speaks a wire protocol itself. It consumes a
//! bus client through the [`BusClient`] / [`BusConnection`] traits defined
//! here, and receives lifecycle callbacks as [`ConnectionEvent`] values on a
//! channel it owns.
//!
//! ```text
//! ┌──────────────┐  connect(options, events)   ┌──────────────┐
//! │  Connection  │ ──────────────────────────→ │  BusClient   │
//! │   Manager    │ ←── Arc<dyn BusConnection> ─│              │
//! │              │                             └──────┬───────┘
//! │              │ ←── ConnectionEvent ───────────────┘
//! └──────────────┘     (error, disconnected, reconnected,
//!                       discovered, closed)
//! ```
//!
//! [`NatsBusClient`] connects to a NATS cluster and is what the runtime uses
//! in production.
//!
//! [`LoopbackBus`] is an in-process implementation: every connection made
//! through the same `LoopbackBus` shares one broadcast channel. It also
//! exposes failure injection so connection-management code can be exercised
//! without a network.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod client;
pub mod error;
pub mod loopback;
pub mod nats;
pub mod subject;
pub mod subscription;

// Re-export main types
pub use client::{
    event_channel, BusClient, BusConnection, ConnectOptions, ConnectionEvent,
    ConnectionEventReceiver, ConnectionEventSender, TlsOptions,
};
pub use error::BusError;
pub use loopback::{LoopbackBus, LoopbackConnection};
pub use nats::{NatsBusClient, NatsConnection};
pub use subject::{subject_matches, validate_pattern, validate_subject};
pub use subscription::{Message, Subscription};

/// Messages buffered per subscriber before the slowest subscriber lags.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Maximum payload accepted by [`BusConnection::publish`] on the loopback bus.
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;
