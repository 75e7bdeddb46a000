//! Errors surfaced by the notification core.
//!
//! Connection failures during `connect()` are retried in the background and
//! inbound message failures are dropped, so neither reaches a caller. Only an
//! explicit reconnect reports a failed connection attempt.

use crate::config::ConfigError;
use claim_bus::BusError;
use thiserror::Error;

/// Errors from the notification core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    /// Configuration rejected at construction.
    #[error("Invalid notification configuration: {0}")]
    Config(#[from] ConfigError),

    /// An explicit reconnect could not establish a connection.
    #[error("Failed to connect to notification bus: {0}")]
    Connect(BusError),

    /// The bus rejected a publish. Not retried.
    #[error("Failed to publish notification on {subject}: {source}")]
    Publish {
        subject: String,
        #[source]
        source: BusError,
    },
}
