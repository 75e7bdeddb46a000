//! # Claim Notify - Cross-Instance Claim Propagation
//!
//! Keeps the claim caches of several server instances coherent by announcing
//! claim changes on a publish/subscribe bus.
//!
//! ## Components
//!
//! | Component | Role |
//! |-----------|------|
//! | [`ServerState`] | Owns the bus connection: connect, retry, stop, fatal shutdown |
//! | [`NotificationPublisher`] | Announces local claim changes |
//! | [`NotificationHandler`] | Ingests remote changes: decode, store, refresh cache |
//! | [`CacheState`] | Claim identifier → expiry |
//!
//! ## Subjects
//!
//! - `SYS.ACCOUNT.<account>.CLAIMS.UPDATE`
//! - `SYS.ACCOUNT.<account>.CLAIMS.ACTIVATE.<hash>`
//!
//! Only primary instances subscribe. Delivery is at most once, unordered and
//! possibly duplicated; handling is idempotent.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod cache;
pub mod config;
pub mod error;
pub mod fatal;
pub mod handler;
pub mod publisher;
pub mod server;
pub mod subjects;

pub use cache::{CacheState, DEFAULT_CACHE_TTL};
pub use config::{ConfigError, NotifyConfig, TlsConfig, CONFIG_FILE_ENV};
pub use error::NotifyError;
pub use fatal::{FatalHandler, ProcessExit, FATAL_EXIT_CODE};
pub use handler::{DropReason, HandleOutcome, NotificationHandler, NotificationKind};
pub use publisher::NotificationPublisher;
pub use server::{RetryState, ServerState};
pub use subjects::{
    account_update_subject, account_update_wildcard, activation_subject, activation_wildcard,
};
